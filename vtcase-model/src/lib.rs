//! Data model for a recorded TestCase: the parsed request/response shape
//! kept around during canonicalization, the canonical endpoint map a
//! TestCase stores on disk, and the directory layout itself.

pub mod scan_info;
pub mod store;
pub mod types;

pub use scan_info::ScanInfo;
pub use store::{StoreError, TestCaseStore};
pub use types::{
    CriteriaLists, Criterion, Endpoint, EndpointMap, EndpointMethod, ParsedExchange,
    RecordedResponse,
};
