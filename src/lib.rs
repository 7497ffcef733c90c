//! espa-processing: per-product controller for ESPA on-demand processing
//!
//! Takes product requests for Landsat and MODIS scenes, runs the science
//! applications that build the requested products, customizes and
//! reformats the results, and packages them for distribution.

pub mod config;
pub mod core;
pub mod io;
pub mod logging;
pub mod mapper;
pub mod types;

// Re-export main types and functions for easier access
pub use config::ProcessingConfig;
pub use types::{
    Datum, EspaError, EspaResult, OutputFormat, ProductLocation, ProductType, ResampleMethod,
    TargetProjection, Units,
};
