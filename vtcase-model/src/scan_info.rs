//! `ScanInfo`: the scan-level metadata recorded alongside each TestCase.
//!
//! Field names and shape are grounded on the original recorder's
//! `scan_info.json` output (`test_case_processing.py`).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    #[serde(rename = "RecordedHost")]
    pub recorded_host: String,
    #[serde(rename = "RecordedPorts")]
    pub recorded_ports: Vec<u16>,
    #[serde(rename = "RecordedPlugins")]
    pub recorded_plugins: Vec<String>,
    #[serde(rename = "KbArgs")]
    pub kb_args: serde_json::Value,
    #[serde(rename = "Result")]
    pub result: String,
}

impl ScanInfo {
    pub fn new(recorded_ports: Vec<u16>, recorded_plugins: Vec<String>) -> Self {
        Self {
            recorded_host: vtcase_core::RECORDED_HOST.to_string(),
            recorded_ports,
            recorded_plugins,
            kb_args: serde_json::Value::Object(Default::default()),
            result: String::new(),
        }
    }
}
