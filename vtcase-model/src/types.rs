//! Canonical data model shared between the canonicalizer, the on-disk store,
//! and the replay matcher.
//!
//! Shape grounded on `preprocess_and_group_communications`/
//! `create_criterion_for_json`/`create_response_for_json` in
//! `original_source/vts-qa-recorder/vts-recording/service_handling/http.py`,
//! and the JSON layout `ComplexHTTPEndpoint` reads in
//! `original_source/scan-target-emulator/target_emulator/models/http_endpoint.py`:
//! endpoints are grouped by URI *path* (the query string is its own
//! `URL_Parameters` field, always matched verbatim), and criteria are split
//! into two ordered lists — "superset" (the headers/body lines that
//! distinguish this request from its siblings) and "subset" (no
//! distinguishing feature exists, so the full request stands in as its own
//! criterion) — rather than a per-criterion kind tag.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vtcase_http::{HeaderMap, HttpRequest, HttpResponse};

/// A single captured request/response exchange with already-decompressed
/// bodies (Content-Encoding has been undone by `vtcase_http::decode_body`
/// before this type is constructed).
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedExchange {
    pub request: HttpRequest,
    pub response: HttpResponse,
}

impl ParsedExchange {
    /// Splits a decompressed body into the line-indexed map criteria store
    /// their distinguishing body lines in.
    pub fn body_lines(body: &[u8]) -> BTreeMap<usize, String> {
        String::from_utf8_lossy(body)
            .lines()
            .enumerate()
            .map(|(i, l)| (i, l.to_string()))
            .collect()
    }

    /// The path component of a request URI, with any `?query` stripped —
    /// the key endpoints are grouped and registered under (ground: `base_url
    /// = current_request_info.uri.split("?", 1)[0]`).
    pub fn uri_path(uri: &str) -> &str {
        uri.split('?').next().unwrap_or(uri)
    }

    /// The `?...` tail of a request URI, or empty if it has none.
    pub fn url_parameters(uri: &str) -> String {
        match uri.find('?') {
            Some(pos) => uri[pos..].to_string(),
            None => String::new(),
        }
    }
}

/// A distinguishing-feature bucket for one or more recorded requests that
/// reduced to the exact same criterion, matched in document order against
/// incoming replay traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(rename = "ID")]
    pub id: String,
    /// The full recorded query string (e.g. `?x=1`), always matched
    /// verbatim regardless of superset/subset — it is never reduced away.
    #[serde(rename = "URL_Parameters")]
    pub url_parameters: String,
    /// Distinguishing headers (superset) or the full request's headers
    /// (subset): `IndexMap` keeps wire case and order.
    #[serde(rename = "Headers")]
    pub headers: HeaderMap,
    /// Distinguishing body lines (superset) or the full request's body
    /// lines (subset), keyed by 0-based line index.
    #[serde(rename = "Body")]
    pub body: BTreeMap<usize, String>,
    /// Indices into the owning `EndpointMethod::responses`, in the order
    /// they were originally recorded for this exact criterion. A criterion
    /// matched N times during recording advances through this sequence one
    /// response per match (ground: `_determine_next_response_index` in
    /// `http_endpoint.py`), 404ing once exhausted.
    #[serde(rename = "Responses")]
    pub response_sequence: Vec<usize>,
}

/// The two ordered criteria lists a method bucket is scanned against:
/// superset first, subset second (ground: `_request_handler` tries
/// `criteria_superset` then falls back to `criteria_subset`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CriteriaLists {
    #[serde(rename = "Superset")]
    pub superset: Vec<Criterion>,
    #[serde(rename = "Subset")]
    pub subset: Vec<Criterion>,
}

/// A deduplicated recorded response. `body` holds the decompressed bytes in
/// memory; on disk it is written to a sibling file and `body_file` records
/// the relative path (see `vtcase_model::store`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "Headers")]
    pub headers: HeaderMap,
    #[serde(skip)]
    pub body: Vec<u8>,
    #[serde(rename = "BodyFile", skip_serializing_if = "Option::is_none")]
    pub body_file: Option<String>,
}

impl RecordedResponse {
    pub fn from_response(resp: &HttpResponse) -> Self {
        Self {
            status: resp.status.clone(),
            reason: resp.reason.clone(),
            headers: resp.headers.clone(),
            body: resp.body.clone(),
            body_file: None,
        }
    }
}

/// All criteria and deduplicated responses recorded for one (URI path,
/// method) bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMethod {
    #[serde(rename = "Criteria")]
    pub criteria: CriteriaLists,
    #[serde(rename = "Responses")]
    pub responses: Vec<RecordedResponse>,
}

impl EndpointMethod {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `response` in `self.responses`, inserting it if
    /// this exact response hasn't been seen before for this bucket (ground:
    /// the original's linear `unique_responses.index(response)` dedup).
    pub fn dedup_response(&mut self, response: RecordedResponse) -> usize {
        if let Some(pos) = self.responses.iter().position(|r| {
            r.status == response.status && r.headers == response.headers && r.body == response.body
        }) {
            return pos;
        }
        self.responses.push(response);
        self.responses.len() - 1
    }
}

/// One URI path's worth of method buckets, the element type of
/// `EndpointMap::endpoints`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "URI")]
    pub uri: String,
    #[serde(rename = "Methods")]
    pub methods: IndexMap<String, EndpointMethod>,
}

/// The full endpoint map for one service in one TestCase, i.e. the contents
/// of `endpoint_mapping.json` (ground: `{"Endpoints": [...]}` in
/// `save_to_new_test_case`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMap {
    #[serde(rename = "Endpoints")]
    pub endpoints: Vec<Endpoint>,
}

impl EndpointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method_bucket(&mut self, uri_path: &str, method: &str) -> &mut EndpointMethod {
        let idx = match self.endpoints.iter().position(|e| e.uri == uri_path) {
            Some(i) => i,
            None => {
                self.endpoints.push(Endpoint {
                    uri: uri_path.to_string(),
                    methods: IndexMap::new(),
                });
                self.endpoints.len() - 1
            }
        };
        self.endpoints[idx]
            .methods
            .entry(method.to_string())
            .or_default()
    }

    pub fn get(&self, uri_path: &str, method: &str) -> Option<&EndpointMethod> {
        self.endpoints.iter().find(|e| e.uri == uri_path)?.methods.get(method)
    }

    pub fn get_endpoint(&self, uri_path: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.uri == uri_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_identical_responses() {
        let mut bucket = EndpointMethod::new();
        let a = RecordedResponse {
            status: "200".into(),
            reason: "OK".into(),
            headers: HeaderMap::new(),
            body: b"same".to_vec(),
            body_file: None,
        };
        let b = a.clone();
        let idx_a = bucket.dedup_response(a);
        let idx_b = bucket.dedup_response(b);
        assert_eq!(idx_a, idx_b);
        assert_eq!(bucket.responses.len(), 1);
    }

    #[test]
    fn body_lines_indexes_from_zero() {
        let lines = ParsedExchange::body_lines(b"first\nsecond\n");
        assert_eq!(lines.get(&0).unwrap(), "first");
        assert_eq!(lines.get(&1).unwrap(), "second");
    }

    #[test]
    fn uri_path_and_url_parameters_split_on_first_question_mark() {
        assert_eq!(ParsedExchange::uri_path("/a/b?x=1&y=2"), "/a/b");
        assert_eq!(ParsedExchange::url_parameters("/a/b?x=1&y=2"), "?x=1&y=2");
        assert_eq!(ParsedExchange::uri_path("/a/b"), "/a/b");
        assert_eq!(ParsedExchange::url_parameters("/a/b"), "");
    }

    #[test]
    fn method_bucket_groups_by_uri_path_not_full_uri() {
        let mut endpoints = EndpointMap::new();
        endpoints.method_bucket("/a", "GET");
        endpoints.method_bucket("/a", "POST");
        assert_eq!(endpoints.endpoints.len(), 1);
        assert_eq!(endpoints.endpoints[0].methods.len(), 2);
    }
}
