//! The canonicalizer: turns a chronological list of recorded exchanges into
//! the criteria/response buckets an `EndpointMap` stores.
//!
//! Grounded on `preprocess_and_group_communications`,
//! `create_criterion_for_json`, and `create_response_for_json` in
//! `original_source/vts-qa-recorder/vts-recording/service_handling/http.py`:
//! exchanges are grouped by (URI path, method) — the query string plays no
//! part in grouping, it is carried per-criterion as `URL_Parameters` and
//! always matched verbatim. Before anything else, `host`/`connection`
//! request headers and `date`/`content-length`/`connection` response headers
//! are stripped (`preprocess_request`/`preprocess_response`), since those
//! vary with the replay host or get regenerated by whatever serves the
//! response. Within a group, each request's headers and body lines are then
//! reduced to whatever isn't shared verbatim by every sibling. A request
//! with nothing left to distinguish it falls back to a "subset" criterion
//! built from its full headers and body instead of an empty one; a
//! superset criterion that reduced to empty on only one side (headers or
//! body, not both) gets that side restored to its full recorded value
//! rather than left empty, so the other side remains the sole
//! discriminator.
//!
//! Requests that reduce to the exact same URL parameters, headers, and body
//! are the same criterion recorded more than once; they're merged into one
//! `Criterion` whose `response_sequence` holds each occurrence's response in
//! recording order, so replay can advance through them one match at a time
//! (ground: `_determine_next_response_index` in `http_endpoint.py`).

use indexmap::IndexMap;
use std::collections::BTreeMap;
use vtcase_http::{HeaderMap, HttpRequest, HttpResponse, get_ci};
use vtcase_model::{Criterion, EndpointMap, ParsedExchange, RecordedResponse};

/// Request headers that vary with the replay host or connection and carry
/// no distinguishing information (ground: `preprocess_request`).
const REQUEST_HEADERS_TO_STRIP: &[&str] = &["host", "connection"];
/// Response headers the target regenerates on every response regardless of
/// which criterion matched (ground: `preprocess_response`).
const RESPONSE_HEADERS_TO_STRIP: &[&str] = &["date", "content-length", "connection"];

fn strip_headers(headers: &HeaderMap, names: &[&str]) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !names.iter().any(|stripped| name.eq_ignore_ascii_case(stripped)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn sanitize_exchange(exchange: &ParsedExchange) -> ParsedExchange {
    ParsedExchange {
        request: HttpRequest {
            headers: strip_headers(&exchange.request.headers, REQUEST_HEADERS_TO_STRIP),
            ..exchange.request.clone()
        },
        response: HttpResponse {
            headers: strip_headers(&exchange.response.headers, RESPONSE_HEADERS_TO_STRIP),
            ..exchange.response.clone()
        },
    }
}

struct Reduced {
    url_parameters: String,
    headers: HeaderMap,
    body: BTreeMap<usize, String>,
    is_subset: bool,
    response_index: usize,
}

struct Merged {
    url_parameters: String,
    headers: HeaderMap,
    body: BTreeMap<usize, String>,
    is_subset: bool,
    responses: Vec<usize>,
}

/// Canonicalizes a full scan's worth of exchanges into an `EndpointMap`.
/// `exchanges` must already be in the chronological order they were
/// recorded in, since criterion IDs are assigned in that order.
pub fn canonicalize(exchanges: &[ParsedExchange]) -> EndpointMap {
    let exchanges: Vec<ParsedExchange> = exchanges.iter().map(sanitize_exchange).collect();
    let exchanges = exchanges.as_slice();

    let mut endpoints = EndpointMap::new();
    let mut groups: IndexMap<(String, String), Vec<usize>> = IndexMap::new();
    for (i, exchange) in exchanges.iter().enumerate() {
        let key = (
            ParsedExchange::uri_path(&exchange.request.uri).to_string(),
            exchange.request.method.clone(),
        );
        groups.entry(key).or_default().push(i);
    }

    for ((uri_path, method), indices) in groups {
        let bucket = endpoints.method_bucket(&uri_path, &method);

        let mut reduced = Vec::with_capacity(indices.len());
        for &i in &indices {
            let exchange = &exchanges[i];
            let siblings: Vec<&ParsedExchange> = indices
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| &exchanges[j])
                .collect();

            let distinguishing_headers = distinguish_headers(&exchange.request.headers, &siblings);
            let request_body_lines = ParsedExchange::body_lines(&exchange.request.body);
            let distinguishing_body = distinguish_body(&request_body_lines, &siblings);

            let headers_empty = distinguishing_headers.is_empty();
            let body_empty = distinguishing_body.is_empty();

            let (is_subset, headers, body) = if headers_empty && body_empty {
                (true, exchange.request.headers.clone(), request_body_lines)
            } else {
                // Only one side reduced to empty: restore it to the full
                // recorded value so the other side remains the sole
                // discriminator, rather than matching on nothing.
                let headers = if headers_empty {
                    exchange.request.headers.clone()
                } else {
                    distinguishing_headers
                };
                let body = if body_empty {
                    request_body_lines
                } else {
                    distinguishing_body
                };
                (false, headers, body)
            };

            let url_parameters = ParsedExchange::url_parameters(&exchange.request.uri);
            let response = RecordedResponse::from_response(&exchange.response);
            let response_index = bucket.dedup_response(response);

            reduced.push(Reduced {
                url_parameters,
                headers,
                body,
                is_subset,
                response_index,
            });
        }

        // Merge occurrences that reduced to the exact same criterion
        // (same URL parameters, headers, and body), preserving first-seen
        // order for ID assignment and per-criterion response ordering.
        let mut merged: Vec<Merged> = Vec::new();
        for r in reduced {
            if let Some(existing) = merged.iter_mut().find(|m| {
                m.url_parameters == r.url_parameters && m.headers == r.headers && m.body == r.body
            }) {
                existing.responses.push(r.response_index);
            } else {
                merged.push(Merged {
                    url_parameters: r.url_parameters,
                    headers: r.headers,
                    body: r.body,
                    is_subset: r.is_subset,
                    responses: vec![r.response_index],
                });
            }
        }

        for (n, m) in merged.into_iter().enumerate() {
            let criterion = Criterion {
                id: format!("{method}{}", n + 1),
                url_parameters: m.url_parameters,
                headers: m.headers,
                body: m.body,
                response_sequence: m.responses,
            };
            if m.is_subset {
                bucket.criteria.subset.push(criterion);
            } else {
                bucket.criteria.superset.push(criterion);
            }
        }
    }

    endpoints
}

/// Drops every header whose (name, value) pair is shared verbatim by all
/// siblings, keeping only what's characteristic of this one request. A
/// request with no siblings in its bucket has nothing to distinguish itself
/// from, so it distinguishes on nothing.
fn distinguish_headers(headers: &HeaderMap, siblings: &[&ParsedExchange]) -> HeaderMap {
    if siblings.is_empty() {
        return HeaderMap::new();
    }
    let mut result = HeaderMap::new();
    for (name, value) in headers {
        let shared_by_all = siblings.iter().all(|sibling| {
            get_ci(&sibling.request.headers, name)
                .map(|sibling_value| sibling_value == value)
                .unwrap_or(false)
        });
        if !shared_by_all {
            result.insert(name.clone(), value.clone());
        }
    }
    result
}

/// Same reduction as `distinguish_headers`, applied to body lines by index.
fn distinguish_body(
    lines: &BTreeMap<usize, String>,
    siblings: &[&ParsedExchange],
) -> BTreeMap<usize, String> {
    if siblings.is_empty() {
        return BTreeMap::new();
    }
    let mut result = BTreeMap::new();
    for (idx, text) in lines {
        let shared_by_all = siblings.iter().all(|sibling| {
            let sibling_lines = ParsedExchange::body_lines(&sibling.request.body);
            sibling_lines.get(idx) == Some(text)
        });
        if !shared_by_all {
            result.insert(*idx, text.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtcase_http::{HttpRequest, HttpResponse};

    fn exchange(uri: &str, method: &str, headers: &[(&str, &str)], body: &str, status: &str) -> ParsedExchange {
        let mut h = HeaderMap::new();
        for (k, v) in headers {
            h.insert(k.to_string(), vtcase_http::HeaderValue::Scalar(v.to_string()));
        }
        ParsedExchange {
            request: HttpRequest {
                method: method.to_string(),
                uri: uri.to_string(),
                version: "1.1".to_string(),
                headers: h,
                body: body.as_bytes().to_vec(),
            },
            response: HttpResponse {
                status: status.to_string(),
                reason: "OK".to_string(),
                version: "1.1".to_string(),
                headers: HeaderMap::new(),
                body: Vec::new(),
            },
        }
    }

    #[test]
    fn lone_request_in_bucket_is_a_subset() {
        let exchanges = vec![exchange("/a", "GET", &[("Host", "t")], "", "200")];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        assert!(bucket.criteria.superset.is_empty());
        assert_eq!(bucket.criteria.subset.len(), 1);
        assert_eq!(bucket.criteria.subset[0].id, "GET1");
    }

    #[test]
    fn differing_header_becomes_a_superset_criterion() {
        let exchanges = vec![
            exchange("/a", "GET", &[("Host", "t"), ("X-Variant", "1")], "", "200"),
            exchange("/a", "GET", &[("Host", "t"), ("X-Variant", "2")], "", "201"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        assert!(bucket.criteria.subset.is_empty());
        assert_eq!(bucket.criteria.superset.len(), 2);
        for criterion in &bucket.criteria.superset {
            assert!(criterion.headers.contains_key("X-Variant"));
            assert!(!criterion.headers.contains_key("Host"));
        }
        assert_eq!(bucket.responses.len(), 2);
    }

    #[test]
    fn identical_responses_are_deduplicated() {
        let exchanges = vec![
            exchange("/a", "GET", &[("Host", "t"), ("X-Variant", "1")], "", "200"),
            exchange("/a", "GET", &[("Host", "t"), ("X-Variant", "2")], "", "200"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        assert_eq!(bucket.responses.len(), 1);
        assert_eq!(bucket.criteria.superset[0].response_sequence, vec![0]);
        assert_eq!(bucket.criteria.superset[1].response_sequence, vec![0]);
    }

    #[test]
    fn repeated_identical_criterion_accumulates_a_response_sequence() {
        let exchanges = vec![
            exchange("/a", "GET", &[("Host", "t")], "", "200"),
            exchange("/a", "GET", &[("Host", "t")], "", "201"),
            exchange("/a", "GET", &[("Host", "t")], "", "202"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        assert_eq!(bucket.criteria.subset.len(), 1);
        assert_eq!(bucket.criteria.subset[0].response_sequence.len(), 3);
        assert_eq!(bucket.responses.len(), 3);
        let statuses: Vec<&str> = bucket.criteria.subset[0]
            .response_sequence
            .iter()
            .map(|&idx| bucket.responses[idx].status.as_str())
            .collect();
        assert_eq!(statuses, vec!["200", "201", "202"]);
    }

    #[test]
    fn criterion_ids_follow_method_n_scheme() {
        let exchanges = vec![
            exchange("/a", "POST", &[("X-Variant", "1")], "", "200"),
            exchange("/a", "POST", &[("X-Variant", "2")], "", "200"),
            exchange("/a", "POST", &[("X-Variant", "3")], "", "200"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "POST").unwrap();
        let ids: Vec<&str> = bucket.criteria.superset.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["POST1", "POST2", "POST3"]);
    }

    #[test]
    fn host_and_connection_request_headers_are_stripped_before_distinguishing() {
        let exchanges = vec![
            exchange("/a", "GET", &[("Host", "one.example"), ("Connection", "keep-alive")], "", "200"),
            exchange("/a", "GET", &[("Host", "two.example"), ("Connection", "close")], "", "200"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        // Host/Connection differed per request but are stripped before
        // distinguishing, so both recordings reduce to the same criterion.
        assert_eq!(bucket.criteria.subset.len(), 1);
        assert_eq!(bucket.criteria.subset[0].response_sequence.len(), 2);
    }

    #[test]
    fn response_date_content_length_and_connection_headers_are_stripped() {
        let mut e = exchange("/a", "GET", &[], "", "200");
        let mut headers = HeaderMap::new();
        headers.insert("Date".into(), vtcase_http::HeaderValue::Scalar("Wed, 01 Jan 2026 00:00:00 GMT".into()));
        headers.insert("Content-Length".into(), vtcase_http::HeaderValue::Scalar("11".into()));
        headers.insert("Connection".into(), vtcase_http::HeaderValue::Scalar("close".into()));
        headers.insert("X-Keep".into(), vtcase_http::HeaderValue::Scalar("yes".into()));
        e.response.headers = headers;

        let endpoints = canonicalize(&[e]);
        let bucket = endpoints.get("/a", "GET").unwrap();
        let response_headers = &bucket.responses[0].headers;
        assert!(!response_headers.contains_key("Date"));
        assert!(!response_headers.contains_key("Content-Length"));
        assert!(!response_headers.contains_key("Connection"));
        assert!(response_headers.contains_key("X-Keep"));
    }

    #[test]
    fn superset_criterion_with_non_discriminating_body_restores_full_body() {
        let exchanges = vec![
            exchange("/a", "GET", &[("X-Variant", "1")], "shared body", "200"),
            exchange("/a", "GET", &[("X-Variant", "2")], "shared body", "200"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        assert_eq!(bucket.criteria.superset.len(), 2);
        for criterion in &bucket.criteria.superset {
            assert!(criterion.headers.contains_key("X-Variant"));
            assert_eq!(criterion.body.get(&0).map(String::as_str), Some("shared body"));
        }
    }

    #[test]
    fn superset_criterion_with_non_discriminating_headers_restores_full_headers() {
        let exchanges = vec![
            exchange("/a", "GET", &[("X-Common", "v")], "body one", "200"),
            exchange("/a", "GET", &[("X-Common", "v")], "body two", "200"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        assert_eq!(bucket.criteria.superset.len(), 2);
        for criterion in &bucket.criteria.superset {
            assert!(criterion.body.get(&0).is_some());
            assert_eq!(criterion.headers.get("X-Common").map(|v| v.first()), Some("v"));
        }
    }

    #[test]
    fn differing_query_strings_stay_distinct_criteria() {
        let exchanges = vec![
            exchange("/a?x=1", "GET", &[], "", "200"),
            exchange("/a?x=2", "GET", &[], "", "200"),
        ];
        let endpoints = canonicalize(&exchanges);
        let bucket = endpoints.get("/a", "GET").unwrap();
        assert_eq!(bucket.criteria.subset.len(), 2);
        let params: Vec<&str> = bucket
            .criteria
            .subset
            .iter()
            .map(|c| c.url_parameters.as_str())
            .collect();
        assert_eq!(params, vec!["?x=1", "?x=2"]);
    }
}
