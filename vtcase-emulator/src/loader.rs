//! Replay loader: reads a TestCase's `HTTP/endpoint_mapping.json`, replaces
//! every occurrence of the recorded host sentinel with the runtime bind
//! host, and recompresses response bodies per their recorded
//! Content-Encoding so the matcher can serve them unchanged.
//!
//! Grounded on `_parse_data_for_test_case`/`_preprocess_all_criteria`/
//! `_compress_body` in
//! `original_source/scan-target-emulator/target_emulator/services/http.py`.
//! Unlike that implementation, the `br` recompression branch here actually
//! calls the Brotli encoder (see DESIGN.md: the original calls `decompress`
//! there, a latent bug this crate does not reproduce).

use std::path::{Path, PathBuf};

use vtcase_http::{HeaderMap, HeaderValue, content_encoding_tokens, encode_body};
use vtcase_model::{EndpointMap, StoreError, TestCaseStore};

#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    #[error("failed to read TestCase at {0}: {1}")]
    Store(PathBuf, #[source] StoreError),
    #[error("HTTP service not recorded in {0}")]
    NoHttpService(PathBuf),
    #[error("failed to recompress a response body: {0}")]
    Encoding(#[from] vtcase_http::EncodingError),
    #[error("io error reading static file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A `TestCase/HTTP` directory's worth of criteria/response state, ready to
/// be served: host-substituted and response bodies recompressed to wire
/// form. Static (non-JSON) files under the service directory are carried
/// alongside as plain GET-only endpoints.
#[derive(Clone, Debug, Default)]
pub struct LoadedService {
    pub endpoints: EndpointMap,
    pub static_files: Vec<StaticFile>,
}

#[derive(Clone, Debug)]
pub struct StaticFile {
    /// URI path this file is served at, e.g. `/robots.txt`.
    pub path: String,
    pub contents: Vec<u8>,
}

const ENDPOINT_MAPPING_FILE: &str = "endpoint_mapping.json";
const BODIES_DIR: &str = "bodies";

/// Loads and prepares the `HTTP` service of the TestCase at `test_case_dir`
/// for replay against `runtime_host`.
pub async fn load(test_case_dir: &Path, runtime_host: &str) -> Result<LoadedService, LoaderError> {
    let store = TestCaseStore::existing(test_case_dir.to_path_buf());
    let (_scan_info, mut services) = store
        .read()
        .map_err(|e| LoaderError::Store(test_case_dir.to_path_buf(), e))?;

    let mut endpoints = services
        .swap_remove(vtcase_core::HTTP_SERVICE_NAME)
        .ok_or_else(|| LoaderError::NoHttpService(test_case_dir.to_path_buf()))?;

    substitute_host(&mut endpoints, runtime_host);
    recompress_responses(&mut endpoints).await?;

    let static_files = load_static_files(
        &test_case_dir.join(vtcase_core::HTTP_SERVICE_NAME),
        runtime_host,
    )?;

    Ok(LoadedService {
        endpoints,
        static_files,
    })
}

/// Replaces `vtcase_core::RECORDED_HOST` with `runtime_host` in every
/// criterion header/body text and every response header/body, byte for
/// byte so binary response bodies aren't corrupted by a lossy decode.
fn substitute_host(endpoints: &mut EndpointMap, runtime_host: &str) {
    let from = vtcase_core::RECORDED_HOST.as_bytes();
    let to = runtime_host.as_bytes();

    for endpoint in &mut endpoints.endpoints {
        for bucket in endpoint.methods.values_mut() {
            let criteria = bucket
                .criteria
                .superset
                .iter_mut()
                .chain(bucket.criteria.subset.iter_mut());
            for criterion in criteria {
                criterion.url_parameters = criterion
                    .url_parameters
                    .replace(vtcase_core::RECORDED_HOST, runtime_host);
                substitute_headers(&mut criterion.headers, runtime_host);
                for line in criterion.body.values_mut() {
                    *line = line.replace(vtcase_core::RECORDED_HOST, runtime_host);
                }
            }
            for response in &mut bucket.responses {
                substitute_headers(&mut response.headers, runtime_host);
                response.body = replace_bytes(&response.body, from, to);
            }
        }
    }
}

fn substitute_headers(headers: &mut HeaderMap, runtime_host: &str) {
    for value in headers.values_mut() {
        *value = match value {
            HeaderValue::Scalar(s) => {
                HeaderValue::Scalar(s.replace(vtcase_core::RECORDED_HOST, runtime_host))
            }
            HeaderValue::List(values) => HeaderValue::List(
                values
                    .iter()
                    .map(|v| v.replace(vtcase_core::RECORDED_HOST, runtime_host))
                    .collect(),
            ),
        };
    }
}

/// Byte-level, non-overlapping substring replace. Used instead of a
/// UTF-8 round trip so binary (already-decompressed-but-not-text) bodies
/// aren't mangled by a lossy conversion.
fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() || haystack.len() < from.len() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// Recompresses every response body per its own recorded Content-Encoding
/// header. Stored bodies are already decompressed (see `vtcase_recorder`'s
/// aggregator), so this undoes that for the wire.
async fn recompress_responses(endpoints: &mut EndpointMap) -> Result<(), LoaderError> {
    for endpoint in &mut endpoints.endpoints {
        for bucket in endpoint.methods.values_mut() {
            for response in &mut bucket.responses {
                if response.body.is_empty() {
                    continue;
                }
                let tokens = content_encoding_tokens(&response.headers);
                if tokens.is_empty() {
                    continue;
                }
                response.body = encode_body(&tokens, &response.body).await?;
            }
        }
    }
    Ok(())
}

/// Walks `service_dir` for files other than `endpoint_mapping.json`,
/// `bodies/` (response body spill files), and any other `.json` file,
/// mapping the remainder onto GET-only static endpoints at their relative
/// path, with the recorded host sentinel substituted in their contents.
fn load_static_files(service_dir: &Path, runtime_host: &str) -> Result<Vec<StaticFile>, LoaderError> {
    let mut files = Vec::new();
    if !service_dir.is_dir() {
        return Ok(files);
    }
    let from = vtcase_core::RECORDED_HOST.as_bytes();
    let to = runtime_host.as_bytes();
    walk(service_dir, service_dir, &mut files, from, to)?;
    Ok(files)
}

fn walk(
    root: &Path,
    dir: &Path,
    out: &mut Vec<StaticFile>,
    from: &[u8],
    to: &[u8],
) -> Result<(), LoaderError> {
    for entry in std::fs::read_dir(dir).map_err(|e| LoaderError::Io {
        path: dir.to_path_buf(),
        source: e,
    })? {
        let entry = entry.map_err(|e| LoaderError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some(BODIES_DIR) {
                continue;
            }
            walk(root, &path, out, from, to)?;
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let is_mapping = rel.to_str() == Some(ENDPOINT_MAPPING_FILE);
        let is_other_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if is_mapping || is_other_json {
            continue;
        }
        let contents = std::fs::read(&path).map_err(|e| LoaderError::Io {
            path: path.clone(),
            source: e,
        })?;
        let contents = replace_bytes(&contents, from, to);
        let uri_path = format!("/{}", rel.to_string_lossy().replace('\\', "/"));
        out.push(StaticFile {
            path: uri_path,
            contents,
        });
    }
    Ok(())
}

/// Returns the tail of a request-target string beginning with `?`, or an
/// empty string if there's no query component (spec §4.G step 1).
pub fn url_parameters(uri: &str) -> &str {
    match uri.find('?') {
        Some(pos) => &uri[pos..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vtcase_model::{Criterion, RecordedResponse};

    #[test]
    fn replace_bytes_handles_binary_data() {
        let haystack = [0xffu8, b'1', b'9', b'2', b'.', b'0', b'.', b'2', b'.', b'1', b'2', b'3', 0xfe];
        let out = replace_bytes(&haystack, b"192.0.2.123", b"10.0.0.5");
        assert_eq!(out, [0xffu8, b'1', b'0', b'.', b'0', b'.', b'0', b'.', b'5', 0xfe]);
    }

    #[test]
    fn substitute_host_rewrites_headers_body_lines_and_url_parameters() {
        let mut endpoints = EndpointMap::new();
        let bucket = endpoints.method_bucket("/a", "GET");
        let mut headers = HeaderMap::new();
        headers.insert("Host".to_string(), HeaderValue::Scalar("192.0.2.123".to_string()));
        let mut body = BTreeMap::new();
        body.insert(0, "target=192.0.2.123".to_string());
        bucket.criteria.subset.push(Criterion {
            id: "GET1".into(),
            url_parameters: "?host=192.0.2.123".into(),
            headers,
            body,
            response_sequence: vec![],
        });

        substitute_host(&mut endpoints, "127.0.0.1:8080");
        let criterion = &endpoints.get("/a", "GET").unwrap().criteria.subset[0];
        assert_eq!(criterion.headers.get("Host").unwrap().first(), "127.0.0.1:8080");
        assert_eq!(criterion.body.get(&0).unwrap(), "target=127.0.0.1:8080");
        assert_eq!(criterion.url_parameters, "?host=127.0.0.1:8080");
    }

    #[test]
    fn url_parameters_is_empty_without_a_query() {
        assert_eq!(url_parameters("/a/b"), "");
        assert_eq!(url_parameters("/a/b?x=1"), "?x=1");
    }

    #[tokio::test]
    async fn recompresses_response_bodies_matching_their_content_encoding() {
        let mut endpoints = EndpointMap::new();
        let bucket = endpoints.method_bucket("/a", "GET");
        let mut headers = HeaderMap::new();
        headers.insert("Content-Encoding".to_string(), HeaderValue::Scalar("gzip".to_string()));
        let idx = bucket.dedup_response(RecordedResponse {
            status: "200".into(),
            reason: "OK".into(),
            headers,
            body: b"plain text body".to_vec(),
            body_file: None,
        });
        assert_eq!(idx, 0);

        recompress_responses(&mut endpoints).await.unwrap();
        let response = &endpoints.get("/a", "GET").unwrap().responses[0];
        assert_ne!(response.body, b"plain text body");
        let decoded = vtcase_http::decode_body(&["gzip".to_string()], &response.body)
            .await
            .unwrap();
        assert_eq!(decoded, b"plain text body");
    }
}
