pub mod cancel;
pub mod cli;
pub mod confidence;
pub mod config;
pub mod extract;
pub mod fields;
pub mod ingest;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod policy;
pub mod report;
pub mod util;
