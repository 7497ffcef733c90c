use crate::types::{BoundingBox, EspaError, EspaResult, GeoTransform};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Size in bytes of one sample of an ESPA data type
pub fn data_type_size(data_type: &str) -> EspaResult<usize> {
    match data_type {
        "INT8" | "UINT8" => Ok(1),
        "INT16" | "UINT16" => Ok(2),
        "INT32" | "UINT32" | "FLOAT32" => Ok(4),
        "FLOAT64" => Ok(8),
        _ => Err(EspaError::Metadata(format!("Unsupported data type {}", data_type))),
    }
}

/// Read a raw little-endian ESPA band into a 2D array
///
/// # Arguments
/// * `path` - The `.img` file
/// * `data_type` - ESPA data type name (`INT16`, `FLOAT32`, ...)
/// * `nlines` - Number of rows
/// * `nsamps` - Number of columns
pub fn read_band<P: AsRef<Path>>(
    path: P,
    data_type: &str,
    nlines: usize,
    nsamps: usize,
) -> EspaResult<Array2<f64>> {
    let size = data_type_size(data_type)?;
    let bytes = std::fs::read(path.as_ref())?;

    let expected = nlines * nsamps * size;
    if bytes.len() != expected {
        return Err(EspaError::Metadata(format!(
            "{} holds {} bytes, expected {} for {}x{} {}",
            path.as_ref().display(),
            bytes.len(),
            expected,
            nlines,
            nsamps,
            data_type
        )));
    }

    let values: Vec<f64> = match data_type {
        "INT8" => bytes.iter().map(|&b| b as i8 as f64).collect(),
        "UINT8" => bytes.iter().map(|&b| b as f64).collect(),
        "INT16" => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f64)
            .collect(),
        "UINT16" => bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as f64)
            .collect(),
        "INT32" => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        "UINT32" => bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        "FLOAT32" => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        _ => bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
    };

    Array2::from_shape_vec((nlines, nsamps), values)
        .map_err(|e| EspaError::Processing(format!("Failed to reshape band data: {}", e)))
}

/// Grid geometry of a raster read back through GDAL
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGeometry {
    pub width: usize,
    pub height: usize,
    pub geo_transform: GeoTransform,
    /// `meters` or `degrees`
    pub units: String,
    /// Geographic extent of the four grid corners
    pub bounds: BoundingBox,
}

impl RasterGeometry {
    /// Open a raster with GDAL and derive its geometry
    pub fn from_file<P: AsRef<Path>>(path: P) -> EspaResult<Self> {
        log::debug!("Reading raster geometry: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let (width, height) = dataset.raster_size();
        let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let srs = dataset.spatial_ref()?;

        let units = if srs.is_geographic() { "degrees" } else { "meters" }.to_string();

        let corners = [
            geo_transform.apply(0.0, 0.0),
            geo_transform.apply(width as f64, 0.0),
            geo_transform.apply(0.0, height as f64),
            geo_transform.apply(width as f64, height as f64),
        ];

        // PROJ.4 definition keeps longitude first regardless of GDAL axis order
        let wgs84 = SpatialRef::from_proj4("+proj=longlat +datum=WGS84 +no_defs")?;
        let transform = CoordTransform::new(&srs, &wgs84)?;

        let mut xs: Vec<f64> = corners.iter().map(|c| c.0).collect();
        let mut ys: Vec<f64> = corners.iter().map(|c| c.1).collect();
        let mut zs = vec![0.0; corners.len()];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

        let points: Vec<(f64, f64)> = xs.into_iter().zip(ys).collect();
        let bounds = geographic_bounds(&points)?;

        Ok(Self {
            width,
            height,
            geo_transform,
            units,
            bounds,
        })
    }

    pub fn upper_left(&self) -> (f64, f64) {
        self.geo_transform.apply(0.0, 0.0)
    }

    pub fn lower_right(&self) -> (f64, f64) {
        self.geo_transform.apply(self.width as f64, self.height as f64)
    }
}

/// Bounding box of (lon, lat) points, wrapping across the antimeridian
/// when the longitudes span more than half the globe
pub fn geographic_bounds(points: &[(f64, f64)]) -> EspaResult<BoundingBox> {
    if points.is_empty() {
        return Err(EspaError::Processing("No points to bound".to_string()));
    }

    let lons: Vec<f64> = points.iter().map(|p| p.0).collect();
    let lats: Vec<f64> = points.iter().map(|p| p.1).collect();

    let min = |v: &[f64]| v.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = |v: &[f64]| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let (mut min_lon, mut max_lon) = (min(&lons), max(&lons));
    if max_lon - min_lon > 180.0 {
        let east: Vec<f64> = lons.iter().cloned().filter(|l| *l < 0.0).collect();
        let west: Vec<f64> = lons.iter().cloned().filter(|l| *l >= 0.0).collect();
        min_lon = min(&west);
        max_lon = max(&east);
    }

    Ok(BoundingBox {
        min_lon,
        max_lon,
        min_lat: min(&lats),
        max_lat: max(&lats),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_int16_band() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let values: [i16; 6] = [1, -2, 300, -9999, 5, 6];
        for v in values {
            file.write_all(&v.to_le_bytes()).unwrap();
        }

        let band = read_band(file.path(), "INT16", 2, 3).unwrap();
        assert_eq!(band.dim(), (2, 3));
        assert_eq!(band[[0, 1]], -2.0);
        assert_eq!(band[[1, 0]], -9999.0);
    }

    #[test]
    fn test_read_float32_band() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for v in [0.5f32, 1.25, -3.0, 8.0] {
            file.write_all(&v.to_le_bytes()).unwrap();
        }

        let band = read_band(file.path(), "FLOAT32", 2, 2).unwrap();
        assert_eq!(band[[0, 1]], 1.25);
        assert_eq!(band[[1, 0]], -3.0);
    }

    #[test]
    fn test_size_mismatch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 5]).unwrap();
        assert!(read_band(file.path(), "INT16", 2, 2).is_err());
        assert!(read_band(file.path(), "COMPLEX", 1, 5).is_err());
    }

    #[test]
    fn test_geographic_bounds() {
        let bounds = geographic_bounds(&[(-124.2, 47.8), (-121.1, 47.9), (-124.1, 45.7), (-121.2, 45.8)])
            .unwrap();
        assert_eq!(bounds.min_lon, -124.2);
        assert_eq!(bounds.max_lon, -121.1);
        assert_eq!(bounds.min_lat, 45.7);
        assert_eq!(bounds.max_lat, 47.9);
        assert!(!bounds.crosses_antimeridian());
    }

    #[test]
    fn test_geographic_bounds_across_antimeridian() {
        let bounds = geographic_bounds(&[(179.1, -15.0), (-178.8, -15.1), (179.3, -17.0), (-178.6, -17.1)])
            .unwrap();
        assert!(bounds.crosses_antimeridian());
        assert_eq!(bounds.min_lon, 179.1);
        assert_eq!(bounds.max_lon, -178.6);
    }
}
