use crate::io::raster::RasterGeometry;
use crate::types::{BoundingBox, EspaError, EspaResult, TargetProjection};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// ESPA internal metadata document, the root `<espa_metadata>` element
///
/// Only the parts of the schema the controller reads or rewrites are
/// modelled; other elements are dropped when the document is written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EspaMetadata {
    #[serde(rename = "@version", default = "default_version")]
    pub version: String,
    #[serde(rename = "@xmlns", default, skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    pub global_metadata: GlobalMetadata,
    #[serde(default)]
    pub bands: Bands,
}

fn default_version() -> String {
    "2.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_provider: Option<String>,
    pub satellite: String,
    pub instrument: String,
    pub acquisition_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_center_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level1_production_date: Option<String>,
    pub bounding_coordinates: BoundingCoordinates,
    pub projection_information: ProjectionInformation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrs: Option<Wrs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modis: Option<ModisTile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingCoordinates {
    pub west: f64,
    pub east: f64,
    pub north: f64,
    pub south: f64,
}

impl From<BoundingBox> for BoundingCoordinates {
    fn from(bbox: BoundingBox) -> Self {
        Self {
            west: bbox.min_lon,
            east: bbox.max_lon,
            north: bbox.max_lat,
            south: bbox.min_lat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionInformation {
    #[serde(rename = "@projection")]
    pub projection: String,
    #[serde(rename = "@datum", default, skip_serializing_if = "Option::is_none")]
    pub datum: Option<String>,
    #[serde(rename = "@units")]
    pub units: String,
    #[serde(rename = "corner_point", default)]
    pub corner_points: Vec<CornerPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_proj_params: Option<UtmProjParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CornerPoint {
    #[serde(rename = "@location")]
    pub location: String,
    #[serde(rename = "@x")]
    pub x: f64,
    #[serde(rename = "@y")]
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtmProjParams {
    pub zone_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wrs {
    #[serde(rename = "@system")]
    pub system: u32,
    #[serde(rename = "@path")]
    pub path: u32,
    #[serde(rename = "@row")]
    pub row: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModisTile {
    #[serde(rename = "@htile")]
    pub htile: u32,
    #[serde(rename = "@vtile")]
    pub vtile: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Bands {
    #[serde(rename = "band", default)]
    pub band: Vec<Band>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    #[serde(rename = "@product")]
    pub product: String,
    #[serde(rename = "@source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@category")]
    pub category: String,
    #[serde(rename = "@data_type")]
    pub data_type: String,
    #[serde(rename = "@nlines")]
    pub nlines: usize,
    #[serde(rename = "@nsamps")]
    pub nsamps: usize,
    #[serde(rename = "@fill_value", default, skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<f64>,
    #[serde(rename = "@saturate_value", default, skip_serializing_if = "Option::is_none")]
    pub saturate_value: Option<f64>,
    #[serde(rename = "@scale_factor", default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    #[serde(rename = "@add_offset", default, skip_serializing_if = "Option::is_none")]
    pub add_offset: Option<f64>,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub long_name: String,
    pub file_name: String,
    pub pixel_size: PixelSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resample_method: Option<String>,
    #[serde(default)]
    pub data_units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_range: Option<ValidRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_date: Option<String>,
}

impl Band {
    /// Whether `value` is neither fill nor outside the valid range
    pub fn is_valid_value(&self, value: f64) -> bool {
        if let Some(fill) = self.fill_value {
            if value == fill {
                return false;
            }
        }
        match &self.valid_range {
            Some(range) => value >= range.min && value <= range.max,
            None => true,
        }
    }

    /// Quality or mask band that must never be interpolated
    pub fn is_discrete(&self) -> bool {
        self.category == "qa" || matches!(self.product.as_str(), "cfmask" | "dswe")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    #[serde(rename = "@x")]
    pub x: f64,
    #[serde(rename = "@y")]
    pub y: f64,
    #[serde(rename = "@units")]
    pub units: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    #[serde(rename = "@min")]
    pub min: f64,
    #[serde(rename = "@max")]
    pub max: f64,
}

/// Projection name ESPA metadata uses for a target projection
pub fn espa_projection_name(projection: TargetProjection) -> &'static str {
    match projection {
        TargetProjection::Utm => "UTM",
        TargetProjection::Ps => "PS",
        TargetProjection::Aea => "AEA",
        TargetProjection::Sinu => "SIN",
        TargetProjection::Lonlat => "GEO",
    }
}

impl EspaMetadata {
    /// Parse an ESPA metadata XML document
    pub fn parse(xml_content: &str) -> EspaResult<Self> {
        from_str::<EspaMetadata>(xml_content)
            .map_err(|e| EspaError::XmlParsing(format!("Failed to parse ESPA metadata: {}", e)))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> EspaResult<Self> {
        log::debug!("Reading ESPA metadata: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn to_xml_string(&self) -> EspaResult<String> {
        let body = quick_xml::se::to_string_with_root("espa_metadata", self)
            .map_err(|e| EspaError::XmlParsing(format!("Failed to write ESPA metadata: {}", e)))?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n", body))
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> EspaResult<()> {
        std::fs::write(path.as_ref(), self.to_xml_string()?)?;
        log::debug!("Wrote ESPA metadata: {}", path.as_ref().display());
        Ok(())
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.band.iter().find(|b| b.name == name)
    }

    pub fn band_mut(&mut self, name: &str) -> Option<&mut Band> {
        self.bands.band.iter_mut().find(|b| b.name == name)
    }

    pub fn bands_of(&self, product: &str) -> Vec<&Band> {
        self.bands.band.iter().filter(|b| b.product == product).collect()
    }

    /// Distinct product names present in the document
    pub fn products(&self) -> BTreeSet<String> {
        self.bands.band.iter().map(|b| b.product.clone()).collect()
    }

    /// Drop every band belonging to one of `products`
    ///
    /// Returns the file names of the removed bands so the caller can delete
    /// them from disk.
    pub fn remove_products(&mut self, products: &[&str]) -> Vec<String> {
        let mut removed = Vec::new();
        self.bands.band.retain(|band| {
            if products.contains(&band.product.as_str()) {
                removed.push(band.file_name.clone());
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            log::info!("Removed {} bands for products {:?}", removed.len(), products);
        }
        removed
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let coords = &self.global_metadata.bounding_coordinates;
        BoundingBox {
            min_lon: coords.west,
            max_lon: coords.east,
            min_lat: coords.south,
            max_lat: coords.north,
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.bounding_box().crosses_antimeridian()
    }

    /// Record the dimensions and pixel size of a warped band
    pub fn update_geometry(&mut self, band_name: &str, geometry: &RasterGeometry) -> EspaResult<()> {
        let band = self.band_mut(band_name).ok_or_else(|| {
            EspaError::Metadata(format!("Band {} not found in metadata", band_name))
        })?;

        band.nlines = geometry.height;
        band.nsamps = geometry.width;
        band.pixel_size.x = geometry.geo_transform.pixel_width.abs();
        band.pixel_size.y = geometry.geo_transform.pixel_height.abs();
        band.pixel_size.units = geometry.units.clone();
        Ok(())
    }

    /// Replace the global projection block after warping
    pub fn update_projection(
        &mut self,
        geometry: &RasterGeometry,
        projection: TargetProjection,
        utm_zone: Option<i32>,
    ) {
        let (ul_x, ul_y) = geometry.upper_left();
        let (lr_x, lr_y) = geometry.lower_right();

        let info = &mut self.global_metadata.projection_information;
        info.projection = espa_projection_name(projection).to_string();
        info.units = geometry.units.clone();
        info.datum = Some("WGS84".to_string());
        info.grid_origin = Some("UL".to_string());
        info.corner_points = vec![
            CornerPoint { location: "UL".to_string(), x: ul_x, y: ul_y },
            CornerPoint { location: "LR".to_string(), x: lr_x, y: lr_y },
        ];
        info.utm_proj_params = match (projection, utm_zone) {
            (TargetProjection::Utm, Some(zone)) => Some(UtmProjParams { zone_code: zone }),
            _ => None,
        };

        self.global_metadata.bounding_coordinates = geometry.bounds.into();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<espa_metadata version="2.0" xmlns="http://espa.cr.usgs.gov/v2">
    <global_metadata>
        <data_provider>USGS/EROS</data_provider>
        <satellite>LANDSAT_8</satellite>
        <instrument>OLI_TIRS</instrument>
        <acquisition_date>2014-06-20</acquisition_date>
        <scene_center_time>18:48:33.2480770Z</scene_center_time>
        <bounding_coordinates>
            <west>-124.254450</west>
            <east>-121.135420</east>
            <north>47.886370</north>
            <south>45.734120</south>
        </bounding_coordinates>
        <projection_information projection="UTM" datum="WGS84" units="meters">
            <corner_point location="UL" x="418200.000000" y="5305200.000000"/>
            <corner_point location="LR" x="649800.000000" y="5066400.000000"/>
            <grid_origin>CENTER</grid_origin>
            <utm_proj_params>
                <zone_code>10</zone_code>
            </utm_proj_params>
        </projection_information>
        <orientation_angle>0.0</orientation_angle>
        <wrs system="2" path="46" row="28"/>
    </global_metadata>
    <bands>
        <band product="sr_refl" source="toa_refl" name="sr_band1" category="image" data_type="INT16" nlines="3" nsamps="2" fill_value="-9999" scale_factor="0.0001">
            <short_name>LC8SR</short_name>
            <long_name>band 1 surface reflectance</long_name>
            <file_name>LC80460282014171LGN00_sr_band1.img</file_name>
            <pixel_size x="30" y="30" units="meters"/>
            <resample_method>none</resample_method>
            <data_units>reflectance</data_units>
            <valid_range min="-2000" max="16000"/>
            <app_version>LaSRC_0.1.0</app_version>
        </band>
        <band product="toa_refl" name="toa_band1" category="image" data_type="INT16" nlines="3" nsamps="2" fill_value="-9999">
            <short_name>LC8TOA</short_name>
            <long_name>band 1 top-of-atmosphere reflectance</long_name>
            <file_name>LC80460282014171LGN00_toa_band1.img</file_name>
            <pixel_size x="30" y="30" units="meters"/>
            <data_units>reflectance</data_units>
            <valid_range min="-2000" max="16000"/>
        </band>
        <band product="cfmask" name="cfmask" category="qa" data_type="UINT8" nlines="3" nsamps="2" fill_value="255">
            <short_name>LC8CM</short_name>
            <long_name>cfmask_band</long_name>
            <file_name>LC80460282014171LGN00_cfmask.img</file_name>
            <pixel_size x="30" y="30" units="meters"/>
            <data_units>quality/feature classification</data_units>
        </band>
    </bands>
</espa_metadata>
"#;

    #[test]
    fn test_parse_sample() {
        let meta = EspaMetadata::parse(SAMPLE_XML).unwrap();

        assert_eq!(meta.global_metadata.satellite, "LANDSAT_8");
        assert_eq!(meta.global_metadata.projection_information.projection, "UTM");
        assert_eq!(meta.global_metadata.projection_information.corner_points.len(), 2);
        assert_eq!(
            meta.global_metadata.projection_information.utm_proj_params,
            Some(UtmProjParams { zone_code: 10 })
        );
        assert_eq!(meta.global_metadata.wrs.as_ref().map(|w| w.path), Some(46));
        assert_eq!(meta.bands.band.len(), 3);

        let sr = meta.band("sr_band1").unwrap();
        assert_eq!(sr.nlines, 3);
        assert_eq!(sr.nsamps, 2);
        assert_eq!(sr.fill_value, Some(-9999.0));
        assert_eq!(sr.pixel_size.units, "meters");
        assert_eq!(sr.valid_range.map(|r| r.max), Some(16000.0));
        assert!(!meta.crosses_antimeridian());
    }

    #[test]
    fn test_band_value_checks() {
        let meta = EspaMetadata::parse(SAMPLE_XML).unwrap();
        let sr = meta.band("sr_band1").unwrap();
        assert!(sr.is_valid_value(120.0));
        assert!(!sr.is_valid_value(-9999.0));
        assert!(!sr.is_valid_value(16001.0));
        assert!(!sr.is_discrete());
        assert!(meta.band("cfmask").unwrap().is_discrete());
    }

    #[test]
    fn test_remove_products() {
        let mut meta = EspaMetadata::parse(SAMPLE_XML).unwrap();
        let removed = meta.remove_products(&["toa_refl"]);

        assert_eq!(removed, vec!["LC80460282014171LGN00_toa_band1.img".to_string()]);
        assert!(meta.band("toa_band1").is_none());
        assert_eq!(meta.bands_of("sr_refl").len(), 1);
        assert_eq!(
            meta.products().into_iter().collect::<Vec<_>>(),
            vec!["cfmask".to_string(), "sr_refl".to_string()]
        );
    }

    #[test]
    fn test_write_and_reparse() {
        let mut meta = EspaMetadata::parse(SAMPLE_XML).unwrap();
        meta.remove_products(&["cfmask"]);

        let written = meta.to_xml_string().unwrap();
        assert!(written.starts_with("<?xml"));
        assert!(written.contains("<espa_metadata"));

        let reparsed = EspaMetadata::parse(&written).unwrap();
        assert_eq!(reparsed.bands.band.len(), 2);
        assert_eq!(reparsed.band("sr_band1"), meta.band("sr_band1"));
        assert_eq!(reparsed.global_metadata, meta.global_metadata);
    }

    #[test]
    fn test_malformed_metadata() {
        assert!(matches!(
            EspaMetadata::parse("<espa_metadata><bands/></espa_metadata>"),
            Err(EspaError::XmlParsing(_))
        ));
    }
}
