pub mod analysis;
pub mod derived;
pub mod export;
pub mod ingest;
pub mod insights;
pub mod store;
