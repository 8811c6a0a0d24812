//! On-disk TestCase layout:
//!
//! ```text
//! <root>/<OID>/TestCase<N>/scan_info.json
//! <root>/<OID>/TestCase<N>/<Service>/endpoint_mapping.json
//! <root>/<OID>/TestCase<N>/<Service>/bodies/<index>.bin
//! ```
//!
//! Grounded on `test_case_processing.py`'s write side (the next-`TestCaseN`
//! scheme: max existing index + 1) and `test_case.py`'s read side
//! (`required_services`/`scan_info` directory scan).

use crate::scan_info::ScanInfo;
use crate::types::EndpointMap;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} has no TestCase directories")]
    NoTestCases(PathBuf),
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_err(path: &Path, source: serde_json::Error) -> StoreError {
    StoreError::Json {
        path: path.to_path_buf(),
        source,
    }
}

const SCAN_INFO_FILE: &str = "scan_info.json";
const ENDPOINT_MAPPING_FILE: &str = "endpoint_mapping.json";
const BODIES_DIR: &str = "bodies";
const TEST_CASE_PREFIX: &str = "TestCase";

/// A single TestCase directory: one scan's worth of recorded services.
pub struct TestCaseStore {
    pub dir: PathBuf,
}

impl TestCaseStore {
    /// Picks `<oid_root>/TestCase<N>` where N is one greater than the
    /// highest existing `TestCaseN` sibling (or 1 if none exist).
    pub fn next(oid_root: &Path) -> Result<Self, StoreError> {
        let mut max_seen = 0u32;
        if oid_root.exists() {
            for entry in fs::read_dir(oid_root).map_err(|e| io_err(oid_root, e))? {
                let entry = entry.map_err(|e| io_err(oid_root, e))?;
                if !entry.path().is_dir() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(n) = name
                        .strip_prefix(TEST_CASE_PREFIX)
                        .and_then(|s| s.parse::<u32>().ok())
                    {
                        max_seen = max_seen.max(n);
                    }
                }
            }
        }
        let dir = oid_root.join(format!("{TEST_CASE_PREFIX}{}", max_seen + 1));
        Ok(Self { dir })
    }

    pub fn existing(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Lists existing `TestCaseN` directories under `oid_root`, in
    /// ascending N order.
    pub fn list(oid_root: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut dirs: Vec<(u32, PathBuf)> = Vec::new();
        for entry in fs::read_dir(oid_root).map_err(|e| io_err(oid_root, e))? {
            let entry = entry.map_err(|e| io_err(oid_root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(n) = name
                    .strip_prefix(TEST_CASE_PREFIX)
                    .and_then(|s| s.parse::<u32>().ok())
                {
                    dirs.push((n, path));
                }
            }
        }
        if dirs.is_empty() {
            return Err(StoreError::NoTestCases(oid_root.to_path_buf()));
        }
        dirs.sort_by_key(|(n, _)| *n);
        Ok(dirs.into_iter().map(|(_, p)| p).collect())
    }

    /// Writes `scan_info` and every service's endpoint map, spilling
    /// response bodies to `<service>/bodies/<index>.bin`.
    pub fn write(
        &self,
        scan_info: &ScanInfo,
        services: &IndexMap<String, EndpointMap>,
    ) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let scan_info_path = self.dir.join(SCAN_INFO_FILE);
        let scan_info_json =
            serde_json::to_string_pretty(scan_info).map_err(|e| json_err(&scan_info_path, e))?;
        fs::write(&scan_info_path, scan_info_json).map_err(|e| io_err(&scan_info_path, e))?;

        for (service, endpoints) in services {
            let service_dir = self.dir.join(service);
            let bodies_dir = service_dir.join(BODIES_DIR);
            fs::create_dir_all(&bodies_dir).map_err(|e| io_err(&bodies_dir, e))?;

            let mut endpoints = endpoints.clone();
            for endpoint in &mut endpoints.endpoints {
                for bucket in endpoint.methods.values_mut() {
                    for (idx, response) in bucket.responses.iter_mut().enumerate() {
                        if response.body.is_empty() {
                            continue;
                        }
                        let rel = format!("{BODIES_DIR}/{idx}.bin");
                        let body_path = service_dir.join(&rel);
                        fs::write(&body_path, &response.body).map_err(|e| io_err(&body_path, e))?;
                        response.body_file = Some(rel);
                    }
                }
            }

            let mapping_path = service_dir.join(ENDPOINT_MAPPING_FILE);
            let mapping_json =
                serde_json::to_string_pretty(&endpoints).map_err(|e| json_err(&mapping_path, e))?;
            fs::write(&mapping_path, mapping_json).map_err(|e| io_err(&mapping_path, e))?;
        }

        Ok(())
    }

    /// Reads `scan_info.json` and every `<service>/endpoint_mapping.json`
    /// under this TestCase directory, rehydrating response bodies from
    /// their sibling `bodies/` files.
    pub fn read(&self) -> Result<(ScanInfo, IndexMap<String, EndpointMap>), StoreError> {
        let scan_info_path = self.dir.join(SCAN_INFO_FILE);
        let scan_info_text =
            fs::read_to_string(&scan_info_path).map_err(|e| io_err(&scan_info_path, e))?;
        let scan_info: ScanInfo =
            serde_json::from_str(&scan_info_text).map_err(|e| json_err(&scan_info_path, e))?;

        let mut services = IndexMap::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let service_dir = entry.path();
            if !service_dir.is_dir() {
                continue;
            }
            let mapping_path = service_dir.join(ENDPOINT_MAPPING_FILE);
            if !mapping_path.exists() {
                continue;
            }
            let mapping_text =
                fs::read_to_string(&mapping_path).map_err(|e| io_err(&mapping_path, e))?;
            let mut endpoints: EndpointMap =
                serde_json::from_str(&mapping_text).map_err(|e| json_err(&mapping_path, e))?;

            for endpoint in &mut endpoints.endpoints {
                for bucket in endpoint.methods.values_mut() {
                    for response in bucket.responses.iter_mut() {
                        if let Some(rel) = &response.body_file {
                            let body_path = service_dir.join(rel);
                            response.body =
                                fs::read(&body_path).map_err(|e| io_err(&body_path, e))?;
                        }
                    }
                }
            }

            let service_name = entry
                .file_name()
                .to_str()
                .unwrap_or_default()
                .to_string();
            services.insert(service_name, endpoints);
        }

        Ok((scan_info, services))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Criterion, RecordedResponse};
    use std::collections::BTreeMap;
    use vtcase_http::HeaderMap;

    fn sample_services() -> IndexMap<String, EndpointMap> {
        let mut endpoints = EndpointMap::new();
        let bucket = endpoints.method_bucket("/foo", "GET");
        let response = RecordedResponse {
            status: "200".into(),
            reason: "OK".into(),
            headers: HeaderMap::new(),
            body: b"hello world".to_vec(),
            body_file: None,
        };
        let idx = bucket.dedup_response(response);
        bucket.criteria.subset.push(Criterion {
            id: "GET1".into(),
            url_parameters: String::new(),
            headers: HeaderMap::new(),
            body: BTreeMap::new(),
            response_sequence: vec![idx],
        });
        let mut services = IndexMap::new();
        services.insert("HTTP".to_string(), endpoints);
        services
    }

    #[test]
    fn next_picks_one_past_the_highest_existing_index() {
        let tmp = tempfile::tempdir().unwrap();
        let oid_root = tmp.path().join("1.3.6.1.4.1.25623.1.0.1");
        fs::create_dir_all(oid_root.join("TestCase1")).unwrap();
        fs::create_dir_all(oid_root.join("TestCase3")).unwrap();
        let store = TestCaseStore::next(&oid_root).unwrap();
        assert_eq!(store.dir, oid_root.join("TestCase4"));
    }

    #[test]
    fn next_is_testcase1_when_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let oid_root = tmp.path().join("oid");
        let store = TestCaseStore::next(&oid_root).unwrap();
        assert_eq!(store.dir, oid_root.join("TestCase1"));
    }

    #[test]
    fn write_then_read_round_trips_bodies() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TestCaseStore::existing(tmp.path().join("TestCase1"));
        let scan_info = ScanInfo::new(vec![80], vec!["oid".into()]);
        let services = sample_services();
        store.write(&scan_info, &services).unwrap();

        let (read_info, read_services) = store.read().unwrap();
        assert_eq!(read_info.recorded_host, "192.0.2.123");
        let bucket = read_services.get("HTTP").unwrap().get("/foo", "GET").unwrap();
        assert_eq!(bucket.responses[0].body, b"hello world");
        assert_eq!(bucket.criteria.subset[0].id, "GET1");
    }
}
