//! Product identifier parsing for Landsat and MODIS inputs.

use crate::types::{EspaError, EspaResult, ProductType, Units};
use chrono::NaiveDate;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Platform that acquired the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Satellite {
    Landsat4,
    Landsat5,
    Landsat7,
    Landsat8,
    Terra,
    Aqua,
}

impl std::fmt::Display for Satellite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Satellite::Landsat4 => write!(f, "LANDSAT_4"),
            Satellite::Landsat5 => write!(f, "LANDSAT_5"),
            Satellite::Landsat7 => write!(f, "LANDSAT_7"),
            Satellite::Landsat8 => write!(f, "LANDSAT_8"),
            Satellite::Terra => write!(f, "TERRA"),
            Satellite::Aqua => write!(f, "AQUA"),
        }
    }
}

/// Instrument on board the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrument {
    Tm,
    Etm,
    OliTirs,
    Oli,
    Tirs,
    Modis,
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instrument::Tm => write!(f, "TM"),
            Instrument::Etm => write!(f, "ETM"),
            Instrument::OliTirs => write!(f, "OLI_TIRS"),
            Instrument::Oli => write!(f, "OLI"),
            Instrument::Tirs => write!(f, "TIRS"),
            Instrument::Modis => write!(f, "MODIS"),
        }
    }
}

/// Scene location on the platform's reference grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneLocation {
    /// Landsat WRS-2 path/row
    Wrs { path: u32, row: u32 },
    /// MODIS sinusoidal tile
    Tile { horizontal: u32, vertical: u32 },
}

/// Everything the controller can infer from a product identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub product_id: String,
    /// Leading sensor code as written in the id (`LT5`, `LC08`, `MOD`, ...)
    pub sensor_code: String,
    pub satellite: Satellite,
    pub instrument: Instrument,
    pub acquisition_date: NaiveDate,
    pub location: SceneLocation,
    /// Landsat collection number, absent for pre-collection ids
    pub collection: Option<String>,
    /// MODIS product code such as `09GA`
    pub modis_product: Option<String>,
}

fn pre_collection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(LT4|LT5|LE7|LC8|LO8|LT8)(\d{3})(\d{3})(\d{4})(\d{3})([A-Z]{3})(\d{2})$")
            .expect("valid pre-collection regex")
    })
}

fn collection_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(LT04|LT05|LE07|LC08|LO08|LT08)_(L1TP|L1GT|L1GS)_(\d{3})(\d{3})_(\d{8})_(\d{8})_(\d{2})_(T1|T2|RT)$",
        )
        .expect("valid collection regex")
    })
}

fn modis_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(MOD|MYD)(09A1|09GA|09GQ|09Q1|13A1|13A2|13A3|13Q1|11A1|11A2)\.A(\d{4})(\d{3})\.h(\d{2})v(\d{2})\.(\d{3})\.(\d{13})$",
        )
        .expect("valid MODIS regex")
    })
}

fn landsat_platform(code: &str) -> Option<(Satellite, Instrument)> {
    match code {
        "LT4" | "LT04" => Some((Satellite::Landsat4, Instrument::Tm)),
        "LT5" | "LT05" => Some((Satellite::Landsat5, Instrument::Tm)),
        "LE7" | "LE07" => Some((Satellite::Landsat7, Instrument::Etm)),
        "LC8" | "LC08" => Some((Satellite::Landsat8, Instrument::OliTirs)),
        "LO8" | "LO08" => Some((Satellite::Landsat8, Instrument::Oli)),
        "LT8" | "LT08" => Some((Satellite::Landsat8, Instrument::Tirs)),
        _ => None,
    }
}

fn capture_u32(caps: &Captures, index: usize) -> EspaResult<u32> {
    caps[index]
        .parse()
        .map_err(|e| EspaError::UnsupportedProduct(format!("Bad numeric field {}: {}", &caps[index], e)))
}

fn date_from_year_doy(year: &str, doy: &str) -> EspaResult<NaiveDate> {
    let year: i32 = year
        .parse()
        .map_err(|_| EspaError::UnsupportedProduct(format!("Bad year {}", year)))?;
    let doy: u32 = doy
        .parse()
        .map_err(|_| EspaError::UnsupportedProduct(format!("Bad day of year {}", doy)))?;
    NaiveDate::from_yo_opt(year, doy)
        .ok_or_else(|| EspaError::UnsupportedProduct(format!("Invalid date {} day {}", year, doy)))
}

impl SensorInfo {
    /// Identify the sensor behind a product id
    pub fn from_product_id(product_id: &str) -> EspaResult<Self> {
        let product_id = product_id.trim();

        if let Some(caps) = pre_collection_regex().captures(product_id) {
            let (satellite, instrument) = landsat_platform(&caps[1])
                .ok_or_else(|| EspaError::UnsupportedProduct(product_id.to_string()))?;
            return Ok(Self {
                product_id: product_id.to_string(),
                sensor_code: caps[1].to_string(),
                satellite,
                instrument,
                acquisition_date: date_from_year_doy(&caps[4], &caps[5])?,
                location: SceneLocation::Wrs {
                    path: capture_u32(&caps, 2)?,
                    row: capture_u32(&caps, 3)?,
                },
                collection: None,
                modis_product: None,
            });
        }

        if let Some(caps) = collection_regex().captures(product_id) {
            let (satellite, instrument) = landsat_platform(&caps[1])
                .ok_or_else(|| EspaError::UnsupportedProduct(product_id.to_string()))?;
            let acquisition_date = NaiveDate::parse_from_str(&caps[5], "%Y%m%d").map_err(|e| {
                EspaError::UnsupportedProduct(format!("Bad acquisition date in {}: {}", product_id, e))
            })?;
            return Ok(Self {
                product_id: product_id.to_string(),
                sensor_code: caps[1].to_string(),
                satellite,
                instrument,
                acquisition_date,
                location: SceneLocation::Wrs {
                    path: capture_u32(&caps, 3)?,
                    row: capture_u32(&caps, 4)?,
                },
                collection: Some(caps[7].to_string()),
                modis_product: None,
            });
        }

        if let Some(caps) = modis_regex().captures(product_id) {
            let satellite = if &caps[1] == "MOD" {
                Satellite::Terra
            } else {
                Satellite::Aqua
            };
            return Ok(Self {
                product_id: product_id.to_string(),
                sensor_code: caps[1].to_string(),
                satellite,
                instrument: Instrument::Modis,
                acquisition_date: date_from_year_doy(&caps[3], &caps[4])?,
                location: SceneLocation::Tile {
                    horizontal: capture_u32(&caps, 5)?,
                    vertical: capture_u32(&caps, 6)?,
                },
                collection: Some(caps[7].to_string()),
                modis_product: Some(caps[2].to_string()),
            });
        }

        Err(EspaError::UnsupportedProduct(format!(
            "Unable to determine sensor for product id {}",
            product_id
        )))
    }

    pub fn product_type(&self) -> ProductType {
        match self.instrument {
            Instrument::Modis => ProductType::Modis,
            _ => ProductType::Landsat,
        }
    }

    pub fn is_landsat(&self) -> bool {
        self.product_type() == ProductType::Landsat
    }

    pub fn is_modis(&self) -> bool {
        self.product_type() == ProductType::Modis
    }

    /// Whether the sensor records thermal bands
    pub fn has_thermal(&self) -> bool {
        match self.instrument {
            Instrument::Tm | Instrument::Etm | Instrument::OliTirs | Instrument::Tirs => true,
            Instrument::Oli => false,
            Instrument::Modis => matches!(self.modis_product.as_deref(), Some("11A1" | "11A2")),
        }
    }

    /// Whether the sensor records reflective bands
    pub fn has_reflective(&self) -> bool {
        match self.instrument {
            Instrument::Tirs => false,
            Instrument::Modis => !matches!(self.modis_product.as_deref(), Some("11A1" | "11A2")),
            _ => true,
        }
    }

    /// Surface reflectance runs through LaSRC rather than LEDAPS
    pub fn uses_lasrc(&self) -> bool {
        matches!(self.instrument, Instrument::OliTirs | Instrument::Oli)
    }

    /// Native pixel size of the product in the requested units
    pub fn default_pixel_size(&self, units: Units) -> f64 {
        let (meters, dd) = match self.modis_product.as_deref() {
            Some("09GQ" | "09Q1" | "13Q1") => (231.656358, 0.002086),
            Some("09A1" | "09GA" | "13A1") => (463.312716, 0.004170),
            Some(_) => (926.625433, 0.008340),
            None => (30.0, 0.0002695),
        };
        match units {
            Units::Meters => meters,
            Units::Dd => dd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_collection_landsat() {
        let info = SensorInfo::from_product_id("LT50460282002042EDC01").unwrap();
        assert_eq!(info.sensor_code, "LT5");
        assert_eq!(info.satellite, Satellite::Landsat5);
        assert_eq!(info.instrument, Instrument::Tm);
        assert_eq!(info.acquisition_date, NaiveDate::from_ymd_opt(2002, 2, 11).unwrap());
        assert_eq!(info.location, SceneLocation::Wrs { path: 46, row: 28 });
        assert_eq!(info.product_type(), ProductType::Landsat);
        assert!(info.has_thermal());
        assert!(!info.uses_lasrc());
    }

    #[test]
    fn test_collection_landsat() {
        let info = SensorInfo::from_product_id("LC08_L1TP_042034_20170616_20170629_01_T1").unwrap();
        assert_eq!(info.satellite, Satellite::Landsat8);
        assert_eq!(info.instrument, Instrument::OliTirs);
        assert_eq!(info.acquisition_date, NaiveDate::from_ymd_opt(2017, 6, 16).unwrap());
        assert_eq!(info.location, SceneLocation::Wrs { path: 42, row: 34 });
        assert_eq!(info.collection.as_deref(), Some("01"));
        assert!(info.uses_lasrc());
    }

    #[test]
    fn test_landsat8_single_instrument() {
        let oli = SensorInfo::from_product_id("LO80460282014171LGN00").unwrap();
        assert_eq!(oli.instrument, Instrument::Oli);
        assert!(!oli.has_thermal());
        assert!(oli.has_reflective());

        let tirs = SensorInfo::from_product_id("LT80460282014171LGN00").unwrap();
        assert_eq!(tirs.instrument, Instrument::Tirs);
        assert!(tirs.has_thermal());
        assert!(!tirs.has_reflective());
    }

    #[test]
    fn test_modis() {
        let info = SensorInfo::from_product_id("MOD09GA.A2000072.h02v09.005.2008237032813").unwrap();
        assert_eq!(info.satellite, Satellite::Terra);
        assert_eq!(info.instrument, Instrument::Modis);
        assert_eq!(info.modis_product.as_deref(), Some("09GA"));
        assert_eq!(info.acquisition_date, NaiveDate::from_ymd_opt(2000, 3, 12).unwrap());
        assert_eq!(info.location, SceneLocation::Tile { horizontal: 2, vertical: 9 });
        assert_eq!(info.product_type(), ProductType::Modis);
        assert_eq!(info.default_pixel_size(Units::Meters), 463.312716);

        let aqua = SensorInfo::from_product_id("MYD13Q1.A2014001.h10v05.005.2014019012345").unwrap();
        assert_eq!(aqua.satellite, Satellite::Aqua);
        assert_eq!(aqua.default_pixel_size(Units::Dd), 0.002086);
    }

    #[test]
    fn test_landsat_default_pixel_size() {
        let info = SensorInfo::from_product_id("LE70460282002042EDC00").unwrap();
        assert_eq!(info.default_pixel_size(Units::Meters), 30.0);
        assert_eq!(info.default_pixel_size(Units::Dd), 0.0002695);
    }

    #[test]
    fn test_unsupported_ids() {
        for id in ["plot", "LX50460282002042EDC01", "LT5046028200204EDC01", "MOD09GA.A2000072"] {
            assert!(matches!(
                SensorInfo::from_product_id(id),
                Err(EspaError::UnsupportedProduct(_))
            ));
        }
        // Day 366 of a non-leap year
        assert!(SensorInfo::from_product_id("LT50460282001366EDC01").is_err());
    }
}
