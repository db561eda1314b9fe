pub mod call_site;
pub mod dataflow;
pub mod liveness_analysis;
pub mod report;
pub mod summary;
