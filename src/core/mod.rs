//! Core processing modules

pub mod command;
pub mod distribution;
pub mod parameters;
pub mod plot;
pub mod processor;
pub mod reformat;
pub mod science;
pub mod sensor;
pub mod statistics;
pub mod warp;

// Re-export main types
pub use command::ExternalCommand;
pub use parameters::{ProcessingOptions, ProcessingRequest};
pub use processor::{get_instance, PlotProcessor, ProductProcessor, SceneProcessor};
pub use sensor::SensorInfo;
pub use statistics::BandStatistics;
