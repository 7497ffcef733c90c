//! Reprojection, resizing and subsetting through `gdalwarp`.

use crate::config::ProcessingConfig;
use crate::core::command::{self, ExternalCommand};
use crate::core::parameters::{Extents, ProcessingOptions};
use crate::core::sensor::SensorInfo;
use crate::io::metadata::{Band, EspaMetadata};
use crate::io::mtl::MtlDocument;
use crate::io::raster::RasterGeometry;
use crate::types::{EspaError, EspaResult, ResampleMethod, TargetProjection, Units};
use std::path::{Path, PathBuf};

/// Geographic reference used for extents given in decimal degrees
const GEOGRAPHIC_SRS: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// Everything needed to warp the bands of one product
#[derive(Debug, Clone, PartialEq)]
pub struct WarpSettings {
    /// PROJ.4 target, `None` to keep the native projection
    pub target_srs: Option<String>,
    pub projection: Option<TargetProjection>,
    pub utm_zone: Option<i32>,
    /// Output pixel size in `target_units`
    pub pixel_size: f64,
    pub target_units: Units,
    pub extents: Option<Extents>,
    pub resample: ResampleMethod,
    pub crosses_antimeridian: bool,
    pub memory_mb: u32,
    pub multithread: bool,
}

impl WarpSettings {
    pub fn new(
        options: &ProcessingOptions,
        sensor: &SensorInfo,
        config: &ProcessingConfig,
        crosses_antimeridian: bool,
    ) -> EspaResult<Self> {
        let target_units = options.target_units();
        let pixel_size = match (options.resize, options.pixel_size) {
            (true, Some(size)) => size,
            _ => sensor.default_pixel_size(target_units),
        };

        let projection = if options.reproject {
            options.target_projection
        } else {
            None
        };

        Ok(Self {
            target_srs: options.target_proj4()?,
            projection,
            utm_zone: options.utm_zone,
            pixel_size,
            target_units,
            extents: options.extents(),
            resample: options.resample(),
            crosses_antimeridian,
            memory_mb: config.warp.memory_mb,
            multithread: config.warp.multithread,
        })
    }

    fn is_lonlat(&self) -> bool {
        self.projection == Some(TargetProjection::Lonlat)
    }

    /// Whether gdalwarp must center the output on 180 degrees
    pub fn needs_center_long(&self) -> bool {
        let extents_cross = self.extents.map_or(false, |e| e.crosses_antimeridian());
        self.is_lonlat() && (self.crosses_antimeridian || extents_cross)
    }
}

/// Decide whether a scene crosses the antimeridian
///
/// The ESPA metadata bounding coordinates are checked first. MTL corner
/// coordinates are used when the metadata does not show a crossing.
pub fn scene_crosses_antimeridian(metadata: &EspaMetadata, mtl: Option<&MtlDocument>) -> bool {
    if metadata.crosses_antimeridian() {
        return true;
    }
    match mtl.map(MtlDocument::corner_coordinates) {
        Some(Ok(bounds)) => bounds.crosses_antimeridian(),
        Some(Err(e)) => {
            log::debug!("No usable MTL corners: {}", e);
            false
        }
        None => false,
    }
}

fn format_value(value: f64) -> String {
    format!("{}", value)
}

/// Build the gdalwarp invocation for one band
pub fn build_warp_command(
    settings: &WarpSettings,
    band: &Band,
    src: &Path,
    dst: &Path,
    program: &str,
) -> ExternalCommand {
    let mut cmd = ExternalCommand::new(program)
        .arg("-wm")
        .arg(settings.memory_mb.to_string());
    if settings.multithread {
        cmd = cmd.arg("-multi");
    }
    cmd = cmd.args(["-of", "ENVI"]);

    if let Some(srs) = &settings.target_srs {
        cmd = cmd.arg("-t_srs").arg(srs.clone());
    }

    let size = format_value(settings.pixel_size);
    cmd = cmd.arg("-tr").arg(size.clone()).arg(size);

    if let Some(extents) = settings.extents {
        let maxx = if extents.crosses_antimeridian() {
            extents.maxx + 360.0
        } else {
            extents.maxx
        };
        cmd = cmd.arg("-te").args([
            format_value(extents.minx),
            format_value(extents.miny),
            format_value(maxx),
            format_value(extents.maxy),
        ]);
        if extents.units != settings.target_units {
            let te_srs = match extents.units {
                Units::Dd => GEOGRAPHIC_SRS.to_string(),
                Units::Meters => settings.target_srs.clone().unwrap_or_default(),
            };
            if !te_srs.is_empty() {
                cmd = cmd.arg("-te_srs").arg(te_srs);
            }
        }
    }

    // Masks and quality bands hold class values
    let method = if band.is_discrete() {
        ResampleMethod::Near
    } else {
        settings.resample
    };
    cmd = cmd.arg("-r").arg(method.gdal_name());

    if let Some(fill) = band.fill_value {
        let fill = format_value(fill);
        cmd = cmd.arg("-srcnodata").arg(fill.clone()).arg("-dstnodata").arg(fill);
    }

    if settings.needs_center_long() {
        cmd = cmd.args(["--config", "CENTER_LONG", "180"]);
    }

    cmd.arg(src.display().to_string()).arg(dst.display().to_string())
}

/// ENVI header that accompanies a raw band file
pub fn header_path(image: &Path) -> PathBuf {
    image.with_extension("hdr")
}

fn replace_band_files(warped: &Path, original: &Path) -> EspaResult<()> {
    std::fs::rename(warped, original)?;

    let warped_hdr = header_path(warped);
    if warped_hdr.exists() {
        std::fs::rename(&warped_hdr, header_path(original))?;
    }

    let aux = PathBuf::from(format!("{}.aux.xml", warped.display()));
    if aux.exists() {
        std::fs::remove_file(aux)?;
    }
    Ok(())
}

/// Warp every band listed in `metadata` in place
///
/// Band files are replaced by their warped versions and the band and
/// projection entries of the metadata are rewritten to match, then the
/// metadata is written to `xml_path`.
pub fn warp_product(
    work_dir: &Path,
    metadata: &mut EspaMetadata,
    settings: &WarpSettings,
    config: &ProcessingConfig,
    xml_path: &Path,
) -> EspaResult<()> {
    let program = config.program("gdalwarp");
    let bands: Vec<Band> = metadata.bands.band.clone();
    if bands.is_empty() {
        return Err(EspaError::Processing("No bands available to warp".to_string()));
    }

    log::info!(
        "Warping {} bands to {} at {} {}",
        bands.len(),
        settings.target_srs.as_deref().unwrap_or("native projection"),
        settings.pixel_size,
        settings.target_units
    );
    if settings.needs_center_long() {
        log::info!("Product crosses the antimeridian, centering output on 180 degrees");
    }

    let mut reference: Option<RasterGeometry> = None;
    for band in &bands {
        let src = work_dir.join(&band.file_name);
        let tmp = work_dir.join(format!("tmp-{}", band.file_name));

        let cmd = build_warp_command(settings, band, &src, &tmp, &program);
        command::run(&cmd, Some(work_dir))?;
        replace_band_files(&tmp, &src)?;

        let geometry = RasterGeometry::from_file(&src)?;
        metadata.update_geometry(&band.name, &geometry)?;
        if let Some(entry) = metadata.band_mut(&band.name) {
            let method = if band.is_discrete() {
                ResampleMethod::Near
            } else {
                settings.resample
            };
            entry.resample_method = Some(method.gdal_name().to_string());
        }
        if reference.is_none() {
            reference = Some(geometry);
        }
    }

    if let (Some(geometry), Some(projection)) = (reference.as_ref(), settings.projection) {
        metadata.update_projection(geometry, projection, settings.utm_zone);
    } else if let Some(geometry) = reference.as_ref() {
        metadata.global_metadata.bounding_coordinates = geometry.bounds.into();
    }

    metadata.write_file(xml_path)
}
