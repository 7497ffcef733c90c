//! I/O modules for scene metadata, rasters, transfers and the status server

pub mod metadata;
pub mod mtl;
pub mod raster;
pub mod status;
pub mod transfer;

pub use metadata::EspaMetadata;
pub use mtl::MtlDocument;
pub use status::{StatusReporter, XmlRpcClient};
