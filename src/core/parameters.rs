//! Request lines and processing options.
//!
//! Requests arrive as one JSON document per line. The options carried by a
//! request are validated against the sensor before any processing starts.

use crate::config::ProcessingConfig;
use crate::core::sensor::SensorInfo;
use crate::types::{
    Datum, EspaError, EspaResult, OutputFormat, ProductType, ResampleMethod, TargetProjection, Units,
};
use serde::{Deserialize, Serialize};

/// Value of `xmlrpcurl` that disables status reporting
pub const SKIP_XMLRPC: &str = "skip_xmlrpc";

/// Product id that requests order-level statistics plots
pub const PLOT_PRODUCT_ID: &str = "plot";

/// Pixel size limits per unit
const METERS_PIXEL_RANGE: (f64, f64) = (30.0, 1000.0);
const DD_PIXEL_RANGE: (f64, f64) = (0.0002695, 0.0089831);

/// Earth radius of the MODIS sinusoidal sphere
const SINUSOIDAL_SPHERE_RADIUS: f64 = 6371007.181;

/// A request line as written by the order scheduler
#[derive(Debug, Clone, Deserialize)]
struct RawRequest {
    orderid: String,
    scene: String,
    #[serde(default)]
    product_id: Option<String>,
    product_type: String,
    #[serde(default)]
    options: Option<serde_json::Value>,
    #[serde(default)]
    xmlrpcurl: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

/// A request whose options have not been typed yet
///
/// Carries enough to report status for the product. Option values are
/// checked by [`RequestEnvelope::to_request`], so a bad value fails the
/// product instead of the line.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub orderid: String,
    pub scene: String,
    pub product_id: String,
    pub product_type: String,
    pub options: serde_json::Value,
    pub xmlrpcurl: Option<String>,
    pub download_url: Option<String>,
}

fn status_url_of(xmlrpcurl: Option<&str>) -> Option<&str> {
    xmlrpcurl.filter(|url| !url.is_empty() && *url != SKIP_XMLRPC)
}

impl RequestEnvelope {
    /// Parse one input line
    ///
    /// Lines are accepted with any prefix before the JSON document (the
    /// scheduler prepends a line number). Lines without `{` are skipped and
    /// yield `Ok(None)`.
    pub fn parse_line(line: &str) -> EspaResult<Option<Self>> {
        let Some(start) = line.find('{') else {
            return Ok(None);
        };
        let json = line[start..].trim().replace('#', "");

        let raw: RawRequest = serde_json::from_str(&json)?;
        let options = raw
            .options
            .filter(|options| !options.is_null())
            .ok_or_else(|| EspaError::InvalidParameter("Error missing JSON 'options' record".to_string()))?;

        // Order ids end up on command lines
        let orderid = raw.orderid.replace('\'', "");
        let product_id = raw.product_id.unwrap_or_else(|| raw.scene.clone());

        Ok(Some(Self {
            orderid,
            scene: raw.scene,
            product_id,
            product_type: raw.product_type,
            options,
            xmlrpcurl: raw.xmlrpcurl,
            download_url: raw.download_url,
        }))
    }

    pub fn status_url(&self) -> Option<&str> {
        status_url_of(self.xmlrpcurl.as_deref())
    }

    /// Per-request debug logging, if the options ask for it
    pub fn debug(&self) -> bool {
        self.options.get("debug").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn keep_log(&self) -> Option<bool> {
        self.options.get("keep_log").and_then(|v| v.as_bool())
    }

    /// Type the product and its options
    pub fn to_request(&self) -> EspaResult<ProcessingRequest> {
        let product_type = self.product_type.parse::<ProductType>()?;
        let options: ProcessingOptions = serde_json::from_value(self.options.clone())
            .map_err(|e| EspaError::InvalidParameter(format!("Invalid options for {}: {}", self.product_id, e)))?;

        Ok(ProcessingRequest {
            orderid: self.orderid.clone(),
            scene: self.scene.clone(),
            product_id: self.product_id.clone(),
            product_type,
            options,
            xmlrpcurl: self.xmlrpcurl.clone(),
            download_url: self.download_url.clone(),
        })
    }
}

/// One product request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingRequest {
    pub orderid: String,
    pub scene: String,
    pub product_id: String,
    pub product_type: ProductType,
    pub options: ProcessingOptions,
    pub xmlrpcurl: Option<String>,
    pub download_url: Option<String>,
}

impl ProcessingRequest {
    /// Parse and type one input line
    pub fn parse_line(line: &str) -> EspaResult<Option<Self>> {
        RequestEnvelope::parse_line(line)?
            .map(|envelope| envelope.to_request())
            .transpose()
    }

    /// Status server URL, unless reporting is disabled
    pub fn status_url(&self) -> Option<&str> {
        status_url_of(self.xmlrpcurl.as_deref())
    }

    pub fn is_plot(&self) -> bool {
        self.product_id == PLOT_PRODUCT_ID
    }

    /// Where the input product is staged from
    pub fn input_url(&self, config: &ProcessingConfig) -> String {
        let extension = match self.product_type {
            ProductType::Modis => "hdf",
            _ => "tar.gz",
        };
        match &self.download_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!(
                "file://{}",
                config
                    .processing
                    .work_dir
                    .join(format!("{}.{}", self.product_id, extension))
                    .display()
            ),
        }
    }
}

/// Options attached to a request; unknown keys are ignored
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub include_source_data: bool,
    pub include_source_metadata: bool,
    pub include_customized_source_data: bool,
    pub include_sr: bool,
    pub include_sr_toa: bool,
    pub include_sr_thermal: bool,
    pub include_cfmask: bool,
    pub include_dswe: bool,
    pub include_st: bool,
    pub include_dem: bool,
    pub include_sr_ndvi: bool,
    pub include_sr_evi: bool,
    pub include_sr_savi: bool,
    pub include_sr_msavi: bool,
    pub include_sr_nbr: bool,
    pub include_sr_nbr2: bool,
    pub include_sr_ndmi: bool,
    pub include_statistics: bool,

    pub output_format: Option<String>,

    pub reproject: bool,
    pub target_projection: Option<TargetProjection>,
    pub utm_zone: Option<i32>,
    pub utm_north_south: Option<String>,
    pub central_meridian: Option<f64>,
    pub false_easting: Option<f64>,
    pub false_northing: Option<f64>,
    pub std_parallel_1: Option<f64>,
    pub std_parallel_2: Option<f64>,
    pub origin_lat: Option<f64>,
    pub latitude_true_scale: Option<f64>,
    pub longitude_pole: Option<f64>,
    pub datum: Option<Datum>,

    pub resample_method: Option<ResampleMethod>,
    pub resize: bool,
    pub pixel_size: Option<f64>,
    pub pixel_size_units: Option<Units>,

    pub image_extents: bool,
    pub minx: Option<f64>,
    pub miny: Option<f64>,
    pub maxx: Option<f64>,
    pub maxy: Option<f64>,
    pub image_extents_units: Option<Units>,

    pub debug: bool,
    pub keep_log: Option<bool>,
    pub keep_directory: bool,
    pub keep_intermediate_data: bool,
}

/// Image extents in request units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extents {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
    pub units: Units,
}

impl Extents {
    /// dd extents whose western edge lies east of the eastern edge
    pub fn crosses_antimeridian(&self) -> bool {
        self.units == Units::Dd && self.minx > self.maxx
    }
}

fn require<T: Copy>(value: Option<T>, name: &str) -> EspaResult<T> {
    value.ok_or_else(|| EspaError::InvalidParameter(format!("Missing required parameter {}", name)))
}

fn check_latitude(value: f64, name: &str) -> EspaResult<()> {
    if !(-90.0..=90.0).contains(&value) {
        return Err(EspaError::InvalidParameter(format!(
            "{} {} is outside [-90, 90]",
            name, value
        )));
    }
    Ok(())
}

fn check_longitude(value: f64, name: &str) -> EspaResult<()> {
    if !(-180.0..=180.0).contains(&value) {
        return Err(EspaError::InvalidParameter(format!(
            "{} {} is outside [-180, 180]",
            name, value
        )));
    }
    Ok(())
}

impl ProcessingOptions {
    /// Names of the products this request selects
    pub fn requested_products(&self) -> Vec<&'static str> {
        let flags = [
            (self.include_source_data, "source_data"),
            (self.include_source_metadata, "source_metadata"),
            (self.include_customized_source_data, "customized_source_data"),
            (self.include_sr, "sr"),
            (self.include_sr_toa, "sr_toa"),
            (self.include_sr_thermal, "sr_thermal"),
            (self.include_cfmask, "cfmask"),
            (self.include_dswe, "dswe"),
            (self.include_st, "st"),
            (self.include_dem, "dem"),
            (self.include_sr_ndvi, "sr_ndvi"),
            (self.include_sr_evi, "sr_evi"),
            (self.include_sr_savi, "sr_savi"),
            (self.include_sr_msavi, "sr_msavi"),
            (self.include_sr_nbr, "sr_nbr"),
            (self.include_sr_nbr2, "sr_nbr2"),
            (self.include_sr_ndmi, "sr_ndmi"),
        ];
        flags.iter().filter(|(on, _)| *on).map(|(_, name)| *name).collect()
    }

    /// Any spectral index selected
    pub fn any_index(&self) -> bool {
        self.include_sr_ndvi
            || self.include_sr_evi
            || self.include_sr_savi
            || self.include_sr_msavi
            || self.include_sr_nbr
            || self.include_sr_nbr2
            || self.include_sr_ndmi
    }

    /// Output format, defaulting to ENVI when absent
    pub fn output_format(&self) -> EspaResult<OutputFormat> {
        match self.output_format.as_deref() {
            None => Ok(OutputFormat::Envi),
            Some(name) => name.parse(),
        }
    }

    pub fn resample(&self) -> ResampleMethod {
        self.resample_method.unwrap_or_default()
    }

    /// Whether the output differs geometrically from the input
    pub fn needs_customization(&self) -> bool {
        self.reproject || self.resize || self.image_extents
    }

    /// Units of the output grid
    pub fn target_units(&self) -> Units {
        match (self.reproject, self.target_projection) {
            (true, Some(projection)) => projection.units(),
            _ => Units::Meters,
        }
    }

    pub fn extents(&self) -> Option<Extents> {
        if !self.image_extents {
            return None;
        }
        Some(Extents {
            minx: self.minx?,
            miny: self.miny?,
            maxx: self.maxx?,
            maxy: self.maxy?,
            units: self.image_extents_units?,
        })
    }

    /// Validate the options for `sensor`, filling in defaults
    pub fn validate(&mut self, sensor: &SensorInfo) -> EspaResult<()> {
        if self.output_format.is_none() {
            log::warn!("'output_format' parameter missing defaulting to envi");
            self.output_format = Some(OutputFormat::Envi.as_str().to_string());
        }
        self.output_format()?;

        if self.resample_method.is_none() {
            self.resample_method = Some(ResampleMethod::Near);
        }

        self.validate_products(sensor)?;

        if self.reproject {
            self.validate_projection()?;
        }
        if self.resize {
            self.validate_pixel_size()?;
        }
        if self.image_extents {
            self.validate_extents()?;
        }

        Ok(())
    }

    fn validate_products(&self, sensor: &SensorInfo) -> EspaResult<()> {
        let requested = self.requested_products();
        if requested.is_empty() {
            return Err(EspaError::InvalidParameter(
                "No products were requested".to_string(),
            ));
        }

        let unsupported = |product: &str| {
            Err(EspaError::InvalidParameter(format!(
                "{} is not available for {} {}",
                product, sensor.satellite, sensor.instrument
            )))
        };

        if sensor.is_modis() {
            let allowed = ["source_data", "source_metadata", "customized_source_data"];
            if let Some(product) = requested.iter().find(|p| !allowed.contains(p)) {
                return unsupported(product);
            }
            return Ok(());
        }

        if !sensor.has_reflective() {
            let reflective = self.include_sr
                || self.include_sr_toa
                || self.include_dswe
                || self.any_index();
            if reflective {
                return unsupported("Surface reflectance");
            }
        }

        if !sensor.has_thermal() && (self.include_st || self.include_sr_thermal) {
            return unsupported("Thermal");
        }

        if self.include_cfmask && !(sensor.has_thermal() && sensor.has_reflective()) {
            return unsupported("cfmask");
        }

        Ok(())
    }

    fn validate_projection(&self) -> EspaResult<()> {
        let projection = require(self.target_projection, "target_projection")?;

        match projection {
            TargetProjection::Utm => {
                let zone = require(self.utm_zone, "utm_zone")?;
                if !(1..=60).contains(&zone) {
                    return Err(EspaError::InvalidParameter(format!(
                        "utm_zone {} is outside 1..60",
                        zone
                    )));
                }
                match self.utm_north_south.as_deref() {
                    Some("north") | Some("south") => {}
                    Some(other) => {
                        return Err(EspaError::InvalidParameter(format!(
                            "Invalid utm_north_south {}",
                            other
                        )))
                    }
                    None => {
                        return Err(EspaError::InvalidParameter(
                            "Missing required parameter utm_north_south".to_string(),
                        ))
                    }
                }
            }
            TargetProjection::Sinu => {
                check_longitude(require(self.central_meridian, "central_meridian")?, "central_meridian")?;
                require(self.false_easting, "false_easting")?;
                require(self.false_northing, "false_northing")?;
            }
            TargetProjection::Aea => {
                check_latitude(require(self.std_parallel_1, "std_parallel_1")?, "std_parallel_1")?;
                check_latitude(require(self.std_parallel_2, "std_parallel_2")?, "std_parallel_2")?;
                check_longitude(require(self.central_meridian, "central_meridian")?, "central_meridian")?;
                check_latitude(require(self.origin_lat, "origin_lat")?, "origin_lat")?;
                require(self.false_easting, "false_easting")?;
                require(self.false_northing, "false_northing")?;
                require(self.datum, "datum")?;
            }
            TargetProjection::Ps => {
                let true_scale = require(self.latitude_true_scale, "latitude_true_scale")?;
                if !(60.0..=90.0).contains(&true_scale.abs()) {
                    return Err(EspaError::InvalidParameter(format!(
                        "latitude_true_scale {} must be within 60..90 degrees of either pole",
                        true_scale
                    )));
                }
                check_longitude(require(self.longitude_pole, "longitude_pole")?, "longitude_pole")?;
                require(self.false_easting, "false_easting")?;
                require(self.false_northing, "false_northing")?;
            }
            TargetProjection::Lonlat => {}
        }

        Ok(())
    }

    fn validate_pixel_size(&self) -> EspaResult<()> {
        let size = require(self.pixel_size, "pixel_size")?;
        let units = require(self.pixel_size_units, "pixel_size_units")?;

        let (min, max) = match units {
            Units::Meters => METERS_PIXEL_RANGE,
            Units::Dd => DD_PIXEL_RANGE,
        };
        if !(min..=max).contains(&size) {
            return Err(EspaError::InvalidParameter(format!(
                "pixel_size {} {} is outside {}..{}",
                size, units, min, max
            )));
        }

        let expected = self.target_units();
        if units != expected {
            return Err(EspaError::InvalidParameter(format!(
                "pixel_size_units must be {} for the target projection, got {}",
                expected, units
            )));
        }

        Ok(())
    }

    fn validate_extents(&self) -> EspaResult<()> {
        let extents = Extents {
            minx: require(self.minx, "minx")?,
            miny: require(self.miny, "miny")?,
            maxx: require(self.maxx, "maxx")?,
            maxy: require(self.maxy, "maxy")?,
            units: require(self.image_extents_units, "image_extents_units")?,
        };

        if extents.miny >= extents.maxy {
            return Err(EspaError::InvalidParameter(format!(
                "miny {} must be less than maxy {}",
                extents.miny, extents.maxy
            )));
        }

        if extents.minx >= extents.maxx && !extents.crosses_antimeridian() {
            return Err(EspaError::InvalidParameter(format!(
                "minx {} must be less than maxx {}",
                extents.minx, extents.maxx
            )));
        }

        if extents.units == Units::Dd {
            for (value, name) in [(extents.miny, "miny"), (extents.maxy, "maxy")] {
                check_latitude(value, name)?;
            }
            for (value, name) in [(extents.minx, "minx"), (extents.maxx, "maxx")] {
                check_longitude(value, name)?;
            }
        }

        Ok(())
    }

    /// PROJ.4 definition of the target projection, `None` when the product
    /// keeps its native projection
    pub fn target_proj4(&self) -> EspaResult<Option<String>> {
        if !self.reproject {
            return Ok(None);
        }

        let projection = require(self.target_projection, "target_projection")?;
        let proj4 = match projection {
            TargetProjection::Utm => {
                let zone = require(self.utm_zone, "utm_zone")?;
                let south = if self.utm_north_south.as_deref() == Some("south") {
                    " +south"
                } else {
                    ""
                };
                format!("+proj=utm +zone={}{} +ellps=WGS84 +datum=WGS84 +units=m +no_defs", zone, south)
            }
            TargetProjection::Sinu => format!(
                "+proj=sinu +lon_0={} +x_0={} +y_0={} +a={r} +b={r} +units=m +no_defs",
                require(self.central_meridian, "central_meridian")?,
                require(self.false_easting, "false_easting")?,
                require(self.false_northing, "false_northing")?,
                r = SINUSOIDAL_SPHERE_RADIUS,
            ),
            TargetProjection::Aea => {
                let datum = match require(self.datum, "datum")? {
                    Datum::WGS84 => "+ellps=WGS84 +datum=WGS84",
                    Datum::NAD27 => "+ellps=clrk66 +datum=NAD27",
                    Datum::NAD83 => "+ellps=GRS80 +datum=NAD83",
                };
                format!(
                    "+proj=aea +lat_1={} +lat_2={} +lat_0={} +lon_0={} +x_0={} +y_0={} {} +units=m +no_defs",
                    require(self.std_parallel_1, "std_parallel_1")?,
                    require(self.std_parallel_2, "std_parallel_2")?,
                    require(self.origin_lat, "origin_lat")?,
                    require(self.central_meridian, "central_meridian")?,
                    require(self.false_easting, "false_easting")?,
                    require(self.false_northing, "false_northing")?,
                    datum
                )
            }
            TargetProjection::Ps => {
                let true_scale = require(self.latitude_true_scale, "latitude_true_scale")?;
                let pole = if true_scale < 0.0 { -90 } else { 90 };
                format!(
                    "+proj=stere +lat_ts={} +lat_0={} +lon_0={} +k_0=1.0 +x_0={} +y_0={} +ellps=WGS84 +datum=WGS84 +units=m +no_defs",
                    true_scale,
                    pole,
                    require(self.longitude_pole, "longitude_pole")?,
                    require(self.false_easting, "false_easting")?,
                    require(self.false_northing, "false_northing")?,
                )
            }
            TargetProjection::Lonlat => "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs".to_string(),
        };

        Ok(Some(proj4))
    }
}
