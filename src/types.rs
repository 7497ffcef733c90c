use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Product family handled by a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Landsat,
    Modis,
    Plot,
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductType::Landsat => write!(f, "landsat"),
            ProductType::Modis => write!(f, "modis"),
            ProductType::Plot => write!(f, "plot"),
        }
    }
}

impl FromStr for ProductType {
    type Err = EspaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "landsat" => Ok(ProductType::Landsat),
            "modis" => Ok(ProductType::Modis),
            "plot" => Ok(ProductType::Plot),
            _ => Err(EspaError::InvalidParameter(format!("Invalid product type {}", s))),
        }
    }
}

/// Distributed output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "envi")]
    Envi,
    #[serde(rename = "gtiff")]
    Gtiff,
    #[serde(rename = "hdf-eos2")]
    HdfEos2,
    #[serde(rename = "netcdf")]
    Netcdf,
}

impl OutputFormat {
    pub const VALID: [&'static str; 4] = ["envi", "gtiff", "hdf-eos2", "netcdf"];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Envi => "envi",
            OutputFormat::Gtiff => "gtiff",
            OutputFormat::HdfEos2 => "hdf-eos2",
            OutputFormat::Netcdf => "netcdf",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = EspaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "envi" => Ok(OutputFormat::Envi),
            "gtiff" => Ok(OutputFormat::Gtiff),
            "hdf-eos2" => Ok(OutputFormat::HdfEos2),
            "netcdf" => Ok(OutputFormat::Netcdf),
            _ => Err(EspaError::InvalidParameter(format!("Invalid Output format {}", s))),
        }
    }
}

/// Target projection for customized products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProjection {
    /// Sinusoidal
    Sinu,
    /// Albers Equal Area
    Aea,
    /// Universal Transverse Mercator
    Utm,
    /// Geographic
    Lonlat,
    /// Polar Stereographic
    Ps,
}

impl TargetProjection {
    /// Units the projection's coordinates are expressed in
    pub fn units(&self) -> Units {
        match self {
            TargetProjection::Lonlat => Units::Dd,
            _ => Units::Meters,
        }
    }
}

impl std::fmt::Display for TargetProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetProjection::Sinu => write!(f, "sinu"),
            TargetProjection::Aea => write!(f, "aea"),
            TargetProjection::Utm => write!(f, "utm"),
            TargetProjection::Lonlat => write!(f, "lonlat"),
            TargetProjection::Ps => write!(f, "ps"),
        }
    }
}

impl FromStr for TargetProjection {
    type Err = EspaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sinu" => Ok(TargetProjection::Sinu),
            "aea" => Ok(TargetProjection::Aea),
            "utm" => Ok(TargetProjection::Utm),
            "lonlat" => Ok(TargetProjection::Lonlat),
            "ps" => Ok(TargetProjection::Ps),
            _ => Err(EspaError::InvalidParameter(format!("Invalid target_projection {}", s))),
        }
    }
}

/// Resampling kernel used while warping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    #[default]
    Near,
    Bil,
    Cc,
}

impl ResampleMethod {
    /// Name understood by gdalwarp's `-r` flag
    pub fn gdal_name(&self) -> &'static str {
        match self {
            ResampleMethod::Near => "near",
            ResampleMethod::Bil => "bilinear",
            ResampleMethod::Cc => "cubic",
        }
    }
}

impl FromStr for ResampleMethod {
    type Err = EspaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "near" => Ok(ResampleMethod::Near),
            "bil" => Ok(ResampleMethod::Bil),
            "cc" => Ok(ResampleMethod::Cc),
            _ => Err(EspaError::InvalidParameter(format!("Invalid resample_method {}", s))),
        }
    }
}

/// Units for pixel sizes and image extents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Meters,
    Dd,
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Units::Meters => write!(f, "meters"),
            Units::Dd => write!(f, "dd"),
        }
    }
}

impl FromStr for Units {
    type Err = EspaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meters" => Ok(Units::Meters),
            "dd" => Ok(Units::Dd),
            _ => Err(EspaError::InvalidParameter(format!("Invalid units {}", s))),
        }
    }
}

/// Datum used by the Albers projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datum {
    WGS84,
    NAD27,
    NAD83,
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::WGS84 => write!(f, "WGS84"),
            Datum::NAD27 => write!(f, "NAD27"),
            Datum::NAD83 => write!(f, "NAD83"),
        }
    }
}

/// Geographic bounding box; `min_lon` is the western edge, which is
/// numerically greater than `max_lon` when the box crosses the antimeridian
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Whether the western edge lies east of the eastern edge
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon > self.max_lon
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Map coordinates of a pixel corner
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }
}

/// Where a distributed product ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductLocation {
    pub product_file: PathBuf,
    pub cksum_file: PathBuf,
}

/// Error types for product processing
#[derive(Debug, thiserror::Error)]
pub enum EspaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported product: {0}")]
    UnsupportedProduct(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Command [{command}] failed with {status}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Status server error: {0}")]
    Status(String),

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl EspaError {
    /// Captured output of a failed external command
    pub fn output(&self) -> Option<&str> {
        match self {
            EspaError::Command { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

/// Result type for processing operations
pub type EspaResult<T> = Result<T, EspaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_names() {
        for name in OutputFormat::VALID {
            let format: OutputFormat = name.parse().unwrap();
            assert_eq!(format.as_str(), name);
        }
        assert!("tiff".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_json_names() {
        let format: OutputFormat = serde_json::from_str("\"hdf-eos2\"").unwrap();
        assert_eq!(format, OutputFormat::HdfEos2);
    }

    #[test]
    fn test_resample_gdal_names() {
        assert_eq!(ResampleMethod::Near.gdal_name(), "near");
        assert_eq!("bil".parse::<ResampleMethod>().unwrap().gdal_name(), "bilinear");
        assert_eq!("cc".parse::<ResampleMethod>().unwrap().gdal_name(), "cubic");
    }

    #[test]
    fn test_bounding_box_antimeridian() {
        let normal = BoundingBox { min_lon: -122.0, max_lon: -119.0, min_lat: 35.0, max_lat: 37.0 };
        let crossing = BoundingBox { min_lon: 179.2, max_lon: -178.9, min_lat: -17.0, max_lat: -15.0 };
        assert!(!normal.crosses_antimeridian());
        assert!(crossing.crosses_antimeridian());
    }

    #[test]
    fn test_command_error_output() {
        let err = EspaError::Command {
            command: "cfmask --xml=a.xml".to_string(),
            status: "exit status: 1".to_string(),
            output: "bad input".to_string(),
        };
        assert_eq!(err.output(), Some("bad input"));
        assert!(EspaError::Processing("x".into()).output().is_none());
    }
}
