//! The replay matcher: serves recorded responses for incoming requests.
//!
//! Grounded on `_request_handler`/`_check_criteria_list`/
//! `_determine_next_response_index`/`_preprocess_headers` in
//! `original_source/scan-target-emulator/target_emulator/models/http_endpoint.py`.
//! One axum fallback handler looks the path+method up in the loaded
//! `EndpointMap` (routes are keyed on path alone; the query string is
//! `URL_Parameters`, an always-checked field rather than part of the route),
//! scans superset criteria in document order, falls back to subset, and on a
//! field match advances that criterion's monotonic response counter.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap as AxumHeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vtcase_http::{get_ci, HeaderMap, HeaderValue};
use vtcase_model::{Criterion, EndpointMap, EndpointMethod, ParsedExchange, RecordedResponse};

use crate::loader::LoadedService;

const NOT_FOUND_BODY: &str = "Error. Could not handle this request.";
const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

/// Strips a scanner version suffix from `User-Agent`, keeping only whether
/// it carried a dev-build marker — the digits before and after `~dev` are
/// discarded either way (ground: `_user_agent_version_regex`, substituted
/// with `OpenVAS-VT\2`; group 2 is the literal `~dev`, not its digits).
static USER_AGENT_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"OpenVAS-VT\s[0-9.]+((~dev)[0-9]+)?").unwrap());

fn normalize_user_agent(value: &str) -> String {
    USER_AGENT_VERSION.replace_all(value, "OpenVAS-VT$2").into_owned()
}

/// Lowercases header names and normalizes `User-Agent`, the same
/// preprocessing step applied to both the incoming request and each
/// criterion's recorded headers before comparing them.
fn preprocess_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        let value = if lower == "user-agent" {
            match value {
                HeaderValue::Scalar(s) => HeaderValue::Scalar(normalize_user_agent(s)),
                HeaderValue::List(values) => {
                    HeaderValue::List(values.iter().map(|v| normalize_user_agent(v)).collect())
                }
            }
        } else {
            value.clone()
        };
        out.insert(lower, value);
    }
    out
}

fn axum_headers_to_model(headers: &AxumHeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap_or_default().to_string())
            .collect();
        let value = match values.len() {
            0 => continue,
            1 => HeaderValue::Scalar(values.into_iter().next().unwrap()),
            _ => HeaderValue::List(values),
        };
        out.insert(name.as_str().to_string(), value);
    }
    out
}

fn request_url_parameters(uri: &axum::http::Uri) -> String {
    match uri.query() {
        Some(q) => format!("?{q}"),
        None => String::new(),
    }
}

/// True if every field `criterion` records matches the preprocessed
/// request — URL parameters exactly, every criterion header present with
/// an equal (preprocessed) value, every indexed body line equal.
fn criterion_matches(
    criterion: &Criterion,
    request_url_parameters: &str,
    request_headers: &HeaderMap,
    request_body_lines: &BTreeMap<usize, String>,
) -> bool {
    if criterion.url_parameters != request_url_parameters {
        return false;
    }
    let criterion_headers = preprocess_headers(&criterion.headers);
    for (name, value) in &criterion_headers {
        match get_ci(request_headers, name) {
            Some(actual) if actual == value => {}
            _ => return false,
        }
    }
    for (idx, text) in &criterion.body {
        match request_body_lines.get(idx) {
            Some(actual) if actual == text => {}
            _ => return false,
        }
    }
    true
}

fn first_match<'a>(
    criteria: &'a [Criterion],
    url_parameters: &str,
    headers: &HeaderMap,
    body_lines: &BTreeMap<usize, String>,
) -> Option<&'a Criterion> {
    criteria
        .iter()
        .find(|c| criterion_matches(c, url_parameters, headers, body_lines))
}

fn counter_key(path: &str, method: &str, criterion_id: &str) -> String {
    format!("{path}\n{method}\n{criterion_id}")
}

struct MatcherState {
    endpoints: EndpointMap,
    static_files: HashMap<String, Vec<u8>>,
    /// One monotonic counter per criterion, keyed by (path, method, ID) —
    /// criterion IDs are only unique within their own method bucket (ground:
    /// `_determine_next_response_index`'s per-criterion `defaultdict(int)`).
    counters: HashMap<String, AtomicUsize>,
}

/// Builds the axum router serving a loaded TestCase's `HTTP` service.
pub fn build(loaded: LoadedService) -> Router {
    let mut counters = HashMap::new();
    for endpoint in &loaded.endpoints.endpoints {
        for (method, bucket) in &endpoint.methods {
            for criterion in bucket.criteria.superset.iter().chain(bucket.criteria.subset.iter()) {
                counters.insert(
                    counter_key(&endpoint.uri, method, &criterion.id),
                    AtomicUsize::new(0),
                );
            }
        }
    }
    let static_files = loaded
        .static_files
        .into_iter()
        .map(|f| (f.path, f.contents))
        .collect();

    let state = Arc::new(MatcherState {
        endpoints: loaded.endpoints,
        static_files,
        counters,
    });
    Router::new()
        .fallback(handle)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle(State(state): State<Arc<MatcherState>>, req: Request) -> Response {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let url_parameters = request_url_parameters(req.uri());
    let headers = preprocess_headers(&axum_headers_to_model(req.headers()));

    let (_, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .unwrap_or_default();
    let body_lines = ParsedExchange::body_lines(&body_bytes);

    if let Some(bucket) = state.endpoints.get(&path, &method) {
        if let Some(response) = dispatch(&state, &path, &method, bucket, &url_parameters, &headers, &body_lines) {
            return response;
        }
    }

    if method == "GET" {
        if let Some(contents) = state.static_files.get(&path) {
            return (StatusCode::OK, contents.clone()).into_response();
        }
    }

    not_found()
}

fn dispatch(
    state: &MatcherState,
    path: &str,
    method: &str,
    bucket: &EndpointMethod,
    url_parameters: &str,
    headers: &HeaderMap,
    body_lines: &BTreeMap<usize, String>,
) -> Option<Response> {
    let matched = first_match(&bucket.criteria.superset, url_parameters, headers, body_lines)
        .or_else(|| first_match(&bucket.criteria.subset, url_parameters, headers, body_lines))?;

    let key = counter_key(path, method, &matched.id);
    let counter = state
        .counters
        .get(&key)
        .expect("every criterion gets a counter at load time");
    let idx = counter.fetch_add(1, Ordering::SeqCst);

    Some(match matched.response_sequence.get(idx) {
        Some(&response_idx) => build_response(&bucket.responses[response_idx]),
        None => {
            tracing::warn!(criterion = %matched.id, path, method, "response counter exhausted");
            not_found()
        }
    })
}

fn build_response(response: &RecordedResponse) -> Response {
    let status = response
        .status
        .parse::<u16>()
        .ok()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        for v in value.values() {
            builder = builder.header(name, v);
        }
    }
    builder
        .body(Body::from(response.body.clone()))
        .unwrap_or_else(|_| not_found())
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticFile;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;
    use vtcase_model::EndpointMap;

    fn loaded_with(endpoints: EndpointMap) -> LoadedService {
        LoadedService {
            endpoints,
            static_files: vec![StaticFile {
                path: "/robots.txt".into(),
                contents: b"disallow".to_vec(),
            }],
        }
    }

    fn criterion(id: &str, url_parameters: &str, response_sequence: Vec<usize>) -> Criterion {
        Criterion {
            id: id.into(),
            url_parameters: url_parameters.into(),
            headers: HeaderMap::new(),
            body: BTreeMap::new(),
            response_sequence,
        }
    }

    fn response(status: &str, body: &str) -> RecordedResponse {
        RecordedResponse {
            status: status.into(),
            reason: "".into(),
            headers: HeaderMap::new(),
            body: body.as_bytes().to_vec(),
            body_file: None,
        }
    }

    #[test]
    fn normalizes_dev_build_but_not_release_version() {
        assert_eq!(normalize_user_agent("OpenVAS-VT 21.4.5~dev1"), "OpenVAS-VT~dev");
        assert_eq!(normalize_user_agent("OpenVAS-VT 22.0.0"), "OpenVAS-VT");
    }

    #[tokio::test]
    async fn replays_ordered_responses_then_404s_on_exhaustion() {
        let mut endpoints = EndpointMap::new();
        let bucket = endpoints.method_bucket("/x", "POST");
        bucket.responses = vec![response("200", "a"), response("200", "b"), response("500", "c")];
        bucket.criteria.subset.push(criterion("POST1", "", vec![0, 1, 2]));

        let app = build(loaded_with(endpoints));

        for expected in [StatusCode::OK, StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR] {
            let resp = app
                .clone()
                .oneshot(HttpRequest::post("/x").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), expected);
        }

        let resp = app
            .clone()
            .oneshot(HttpRequest::post("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn url_parameters_are_always_checked() {
        let mut endpoints = EndpointMap::new();
        let bucket = endpoints.method_bucket("/a", "GET");
        bucket.responses = vec![response("200", "ok")];
        bucket.criteria.subset.push(criterion("GET1", "?x=1", vec![0]));

        let app = build(loaded_with(endpoints));

        let resp = app
            .clone()
            .oneshot(HttpRequest::get("/a?x=1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(HttpRequest::get("/a?x=2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unmatched_get_falls_back_to_a_static_file() {
        let app = build(loaded_with(EndpointMap::new()));
        let resp = app
            .oneshot(HttpRequest::get("/robots.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
