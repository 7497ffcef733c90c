//! Per-band statistics written alongside each product.

use crate::io::metadata::{Band, EspaMetadata};
use crate::io::raster;
use crate::types::{EspaError, EspaResult};
use ndarray::{Array1, Array2};
use std::path::{Path, PathBuf};

/// Directory, relative to the work directory, holding `.stats` files
pub const STATS_DIR: &str = "stats";

/// Products whose image bands get statistics
pub const STATISTICS_PRODUCTS: [&str; 5] = ["sr_refl", "toa_refl", "toa_bt", "spectral_indices", "st"];

/// Summary of the valid pixels of one band
#[derive(Debug, Clone, PartialEq)]
pub struct BandStatistics {
    pub file_name: String,
    pub minimum: f64,
    pub maximum: f64,
    pub mean: f64,
    pub stddev: f64,
    pub valid: bool,
}

impl BandStatistics {
    /// Statistics of `data`, ignoring fill and out-of-range values
    pub fn compute(file_name: &str, data: &Array2<f64>, band: &Band) -> Self {
        let values: Array1<f64> = data.iter().cloned().filter(|v| band.is_valid_value(*v)).collect();

        let Some(mean) = values.mean() else {
            log::warn!("No valid pixels in {}", file_name);
            return Self {
                file_name: file_name.to_string(),
                minimum: 0.0,
                maximum: 0.0,
                mean: 0.0,
                stddev: 0.0,
                valid: false,
            };
        };

        Self {
            file_name: file_name.to_string(),
            minimum: values.fold(f64::INFINITY, |acc, v| acc.min(*v)),
            maximum: values.fold(f64::NEG_INFINITY, |acc, v| acc.max(*v)),
            mean,
            stddev: values.std(0.0),
            valid: true,
        }
    }

    /// Render in the `.stats` line format
    pub fn to_stats_string(&self) -> String {
        format!(
            "FILENAME={}\nMINIMUM={:.6}\nMAXIMUM={:.6}\nMEAN={:.6}\nSTDDEV={:.6}\nVALID={}\n",
            self.file_name,
            self.minimum,
            self.maximum,
            self.mean,
            self.stddev,
            if self.valid { "yes" } else { "no" }
        )
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> EspaResult<()> {
        std::fs::write(path.as_ref(), self.to_stats_string())?;
        Ok(())
    }

    /// Parse the `.stats` line format
    pub fn parse(text: &str) -> EspaResult<Self> {
        let mut file_name = None;
        let mut numbers = [None; 4];
        let mut valid = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| EspaError::Metadata(format!("Malformed statistics line [{}]", line)))?;
            let number = || {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| EspaError::Metadata(format!("Bad {} value {}: {}", key, value, e)))
            };

            match key.trim() {
                "FILENAME" => file_name = Some(value.trim().to_string()),
                "MINIMUM" => numbers[0] = Some(number()?),
                "MAXIMUM" => numbers[1] = Some(number()?),
                "MEAN" => numbers[2] = Some(number()?),
                "STDDEV" => numbers[3] = Some(number()?),
                "VALID" => valid = Some(value.trim() == "yes"),
                other => log::debug!("Ignoring statistics key {}", other),
            }
        }

        let missing = |name: &str| EspaError::Metadata(format!("Statistics missing {}", name));
        Ok(Self {
            file_name: file_name.ok_or_else(|| missing("FILENAME"))?,
            minimum: numbers[0].ok_or_else(|| missing("MINIMUM"))?,
            maximum: numbers[1].ok_or_else(|| missing("MAXIMUM"))?,
            mean: numbers[2].ok_or_else(|| missing("MEAN"))?,
            stddev: numbers[3].ok_or_else(|| missing("STDDEV"))?,
            valid: valid.ok_or_else(|| missing("VALID"))?,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> EspaResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }
}

/// Whether statistics are generated for a band
pub fn is_statistics_band(band: &Band) -> bool {
    band.category == "image"
        && (STATISTICS_PRODUCTS.contains(&band.product.as_str())
            || band.product.starts_with("MOD")
            || band.product.starts_with("MYD"))
}

fn band_statistics(work_dir: &Path, stats_dir: &Path, band: &Band) -> EspaResult<PathBuf> {
    let data = raster::read_band(work_dir.join(&band.file_name), &band.data_type, band.nlines, band.nsamps)?;
    let stats = BandStatistics::compute(&band.file_name, &data, band);

    let stem = Path::new(&band.file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(band.file_name.as_str())
        .to_string();
    let path = stats_dir.join(format!("{}.stats", stem));
    stats.write_file(&path)?;

    log::debug!("Wrote {}", path.display());
    Ok(path)
}

/// Compute statistics for every eligible band into `<work_dir>/stats`
///
/// # Returns
/// * Paths of the `.stats` files written
pub fn generate_statistics(work_dir: &Path, metadata: &EspaMetadata) -> EspaResult<Vec<PathBuf>> {
    let stats_dir = work_dir.join(STATS_DIR);
    std::fs::create_dir_all(&stats_dir)?;

    let bands: Vec<&Band> = metadata
        .bands
        .band
        .iter()
        .filter(|b| is_statistics_band(b))
        .collect();
    log::info!("Generating statistics for {} bands", bands.len());

    #[cfg(feature = "parallel")]
    let paths: EspaResult<Vec<PathBuf>> = {
        use rayon::prelude::*;
        bands
            .par_iter()
            .map(|band| band_statistics(work_dir, &stats_dir, band))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let paths: EspaResult<Vec<PathBuf>> = bands
        .iter()
        .map(|band| band_statistics(work_dir, &stats_dir, band))
        .collect();

    paths
}
