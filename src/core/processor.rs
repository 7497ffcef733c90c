//! Product pipelines.
//!
//! A processor owns one request from staging through distribution. Scene
//! products (Landsat and MODIS) run the science applications and the
//! ancillary steps; the `plot` product summarises an order's statistics.

use crate::config::{DistributionMethod, ProcessingConfig};
use crate::core::command::{self, ExternalCommand};
use crate::core::distribution::{self, PackagedProduct};
use crate::core::parameters::ProcessingRequest;
use crate::core::plot;
use crate::core::reformat;
use crate::core::science::{self, SciencePaths, LEVEL1_PRODUCTS};
use crate::core::sensor::SensorInfo;
use crate::core::statistics::{self, STATS_DIR};
use crate::core::warp::{self, WarpSettings};
use crate::io::metadata::EspaMetadata;
use crate::io::mtl::{self, MtlDocument, MtlValue, BAND_FILE_PREFIX};
use crate::io::transfer;
use crate::types::{EspaError, EspaResult, OutputFormat, ProductLocation, ProductType};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A product pipeline
pub trait ProductProcessor {
    /// Run the pipeline and return where the product was distributed
    fn process(&mut self) -> EspaResult<ProductLocation>;

    /// Delete the product's working tree
    fn remove_product_directory(&self) -> EspaResult<()>;

    fn product_directory(&self) -> &Path;
}

/// Working tree of one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDirectories {
    pub product: PathBuf,
    pub stage: PathBuf,
    pub work: PathBuf,
    pub output: PathBuf,
}

impl ProductDirectories {
    pub fn new(config: &ProcessingConfig, order_id: &str, product_id: &str) -> Self {
        let product = config
            .processing
            .work_dir
            .join(format!("{}-{}", order_id, product_id));
        Self {
            stage: product.join("stage"),
            work: product.join("work"),
            output: product.join("output"),
            product,
        }
    }

    /// Start from empty stage, work and output directories
    pub fn initialize(&self) -> EspaResult<()> {
        if self.product.exists() {
            log::warn!("Removing leftover product directory {}", self.product.display());
            std::fs::remove_dir_all(&self.product)?;
        }
        for dir in [&self.stage, &self.work, &self.output] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn remove(&self) -> EspaResult<()> {
        if self.product.exists() {
            log::info!("Removing product directory {}", self.product.display());
            std::fs::remove_dir_all(&self.product)?;
        }
        Ok(())
    }
}

/// Name of the distributed archive for a product
pub fn product_name(product_id: &str) -> String {
    format!("{}-SC{}", product_id, Utc::now().format("%Y%m%d%H%M%S"))
}

/// Files in `dir` whose names end with `suffix`
fn files_with_suffix(dir: &Path, suffix: &str) -> EspaResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(suffix));
        if matches && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn file_name_of(path: &Path) -> EspaResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| EspaError::Processing(format!("Invalid file name {}", path.display())))
}

/// Delete files in `work_dir` that are not part of the product
///
/// Band images and their ENVI headers listed in the metadata, the metadata
/// itself and anything in `keep` survive, as does the statistics directory.
pub fn clean_work_directory(work_dir: &Path, metadata: &EspaMetadata, keep: &[String]) -> EspaResult<usize> {
    let mut wanted: HashSet<String> = keep.iter().cloned().collect();
    for band in &metadata.bands.band {
        wanted.insert(band.file_name.clone());
        wanted.insert(warp::header_path(Path::new(&band.file_name)).display().to_string());
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(work_dir)? {
        let path = entry?.path();
        let name = file_name_of(&path)?;
        if wanted.contains(&name) {
            continue;
        }
        if path.is_dir() {
            if name == STATS_DIR {
                continue;
            }
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        log::debug!("Removed intermediate {}", name);
        removed += 1;
    }

    log::info!("Removed {} intermediate files from {}", removed, work_dir.display());
    Ok(removed)
}

/// ESPA band name for an MTL `FILE_NAME_BAND_*` key
///
/// `FILE_NAME_BAND_6_VCID_1` is `b61` and `FILE_NAME_BAND_QUALITY` is `bqa`.
fn level1_band_name(key: &str) -> Option<String> {
    let suffix = key.strip_prefix(BAND_FILE_PREFIX)?;
    match suffix {
        "QUALITY" => Some("bqa".to_string()),
        _ => Some(format!("b{}", suffix.replace("_VCID_", "").to_lowercase())),
    }
}

/// Name a level-1 band file has once the product is in `format`
fn delivered_file_name(file_name: &str, format: OutputFormat, base: &str) -> String {
    match format {
        OutputFormat::Envi => file_name.to_string(),
        OutputFormat::Gtiff => Path::new(file_name).with_extension("tif").display().to_string(),
        OutputFormat::HdfEos2 => format!("{}.hdf", base),
        OutputFormat::Netcdf => format!("{}.nc", base),
    }
}

/// Point the MTL band file names at the delivered level-1 bands
///
/// # Returns
/// * Number of entries rewritten; keys without a level-1 band stay as they are
pub fn rename_source_bands(
    mtl: &mut MtlDocument,
    metadata: &EspaMetadata,
    format: OutputFormat,
    base: &str,
) -> EspaResult<usize> {
    let mut renamed = 0;
    for (group, key, old_name) in mtl.band_file_names() {
        let Some(name) = level1_band_name(&key) else {
            continue;
        };
        let band = metadata
            .bands
            .band
            .iter()
            .find(|b| b.name == name && LEVEL1_PRODUCTS.contains(&b.product.as_str()));
        let Some(band) = band else {
            log::debug!("No level-1 band for MTL {}", key);
            continue;
        };

        let new_name = delivered_file_name(&band.file_name, format, base);
        log::debug!("MTL {}: {} -> {}", key, old_name, new_name);
        mtl.set(&group, &key, MtlValue::Text(new_name))?;
        renamed += 1;
    }
    Ok(renamed)
}

/// Pipeline for Landsat and MODIS scenes
pub struct SceneProcessor {
    request: ProcessingRequest,
    config: ProcessingConfig,
    sensor: SensorInfo,
    dirs: ProductDirectories,
}

impl SceneProcessor {
    /// Validate the request for its sensor and set up the processor
    pub fn new(mut request: ProcessingRequest, config: ProcessingConfig) -> EspaResult<Self> {
        let sensor = SensorInfo::from_product_id(&request.product_id)?;
        if sensor.product_type() != request.product_type {
            return Err(EspaError::UnsupportedProduct(format!(
                "{} is a {} product but was requested as {}",
                request.product_id,
                sensor.product_type(),
                request.product_type
            )));
        }

        request.options.validate(&sensor)?;
        let dirs = ProductDirectories::new(&config, &request.orderid, &request.product_id);

        Ok(Self {
            request,
            config,
            sensor,
            dirs,
        })
    }

    pub fn sensor(&self) -> &SensorInfo {
        &self.sensor
    }

    fn xml_name(&self) -> String {
        format!("{}.xml", self.request.product_id)
    }

    fn keep_intermediate_data(&self) -> bool {
        self.request.options.keep_intermediate_data || self.config.processing.keep_intermediate_data
    }

    fn stage_input(&self) -> EspaResult<()> {
        let url = self.request.input_url(&self.config);
        let staged = transfer::stage_input(&url, &self.dirs.stage, &self.config.retry)?;
        transfer::unpack(&staged, &self.dirs.work)
    }

    fn science_paths(&self) -> EspaResult<SciencePaths> {
        let xml = PathBuf::from(self.xml_name());
        match self.sensor.product_type() {
            ProductType::Modis => {
                let hdf = files_with_suffix(&self.dirs.work, ".hdf")?;
                let [hdf] = hdf.as_slice() else {
                    return Err(EspaError::Processing(format!(
                        "Expected one HDF file in {}, found {}",
                        self.dirs.work.display(),
                        hdf.len()
                    )));
                };
                Ok(SciencePaths {
                    mtl: None,
                    hdf: Some(PathBuf::from(file_name_of(hdf)?)),
                    xml,
                })
            }
            _ => {
                let mtl = mtl::find_mtl_file(&self.dirs.work)?;
                Ok(SciencePaths {
                    mtl: Some(PathBuf::from(file_name_of(&mtl)?)),
                    hdf: None,
                    xml,
                })
            }
        }
    }

    fn build_science_products(&self, paths: &SciencePaths) -> EspaResult<()> {
        let commands = science::science_commands(&self.sensor, &self.request.options, paths, &self.config)?;
        for cmd in &commands {
            command::run(cmd, Some(&self.dirs.work))?;
        }
        Ok(())
    }

    fn remove_unrequested_products(&self, metadata: &mut EspaMetadata) -> EspaResult<()> {
        let products = science::products_to_remove(&self.sensor, &self.request.options);
        for file in metadata.remove_products(&products) {
            let image = self.dirs.work.join(&file);
            for path in [warp::header_path(&image), image] {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    fn package(&self) -> EspaResult<PackagedProduct> {
        distribution::package_product(
            &self.dirs.work,
            &self.dirs.output,
            &product_name(&self.request.product_id),
        )
    }
}

impl ProductProcessor for SceneProcessor {
    fn process(&mut self) -> EspaResult<ProductLocation> {
        let order_id = self.request.orderid.clone();
        log::info!(
            "Processing {} {} ({} {}) for order {}",
            self.sensor.product_type(),
            self.request.product_id,
            self.sensor.satellite,
            self.sensor.instrument,
            order_id
        );

        self.dirs.initialize()?;
        self.stage_input()?;

        let paths = self.science_paths()?;
        let mut mtl_doc = match &paths.mtl {
            Some(mtl) => Some(MtlDocument::from_file(self.dirs.work.join(mtl))?),
            None => None,
        };

        self.build_science_products(&paths)?;

        let xml_path = self.dirs.work.join(&paths.xml);
        let mut metadata = EspaMetadata::from_file(&xml_path)?;
        self.remove_unrequested_products(&mut metadata)?;
        metadata.write_file(&xml_path)?;

        if !self.keep_intermediate_data() {
            let mut keep = vec![self.xml_name()];
            let options = &self.request.options;
            if let (Some(mtl), true) = (&paths.mtl, options.include_source_metadata || options.include_source_data) {
                keep.push(mtl.display().to_string());
            }
            clean_work_directory(&self.dirs.work, &metadata, &keep)?;
        }

        if self.request.options.include_statistics {
            statistics::generate_statistics(&self.dirs.work, &metadata)?;
            distribution::deliver_statistics(&self.config, &order_id, &self.dirs.work.join(STATS_DIR))?;
        }

        if self.request.options.needs_customization() {
            let crosses = warp::scene_crosses_antimeridian(&metadata, mtl_doc.as_ref());
            let settings = WarpSettings::new(&self.request.options, &self.sensor, &self.config, crosses)?;
            warp::warp_product(&self.dirs.work, &mut metadata, &settings, &self.config, &xml_path)?;
        }

        let format = self.request.options.output_format()?;
        if let (Some(mtl_name), Some(doc)) = (&paths.mtl, mtl_doc.as_mut()) {
            let mtl_path = self.dirs.work.join(mtl_name);
            if self.request.options.include_source_data && mtl_path.is_file() {
                let renamed = rename_source_bands(doc, &metadata, format, &self.request.product_id)?;
                if renamed > 0 {
                    doc.write_file(&mtl_path)?;
                    log::info!("Updated {} band file names in {}", renamed, mtl_name.display());
                }
            }
        }
        reformat::reformat(&self.dirs.work, &self.xml_name(), format, &self.config)?;

        let package = self.package()?;
        let location = distribution::deliver(&self.config, &order_id, &package)?;
        log::info!("Product delivered to {}", location.product_file.display());
        Ok(location)
    }

    fn remove_product_directory(&self) -> EspaResult<()> {
        if self.request.options.keep_directory {
            log::info!("Keeping product directory {}", self.dirs.product.display());
            return Ok(());
        }
        self.dirs.remove()
    }

    fn product_directory(&self) -> &Path {
        &self.dirs.product
    }
}

/// Order-level statistics plots
pub struct PlotProcessor {
    request: ProcessingRequest,
    config: ProcessingConfig,
    dirs: ProductDirectories,
}

impl PlotProcessor {
    pub fn new(request: ProcessingRequest, config: ProcessingConfig) -> Self {
        let dirs = ProductDirectories::new(&config, &request.orderid, &request.product_id);
        Self { request, config, dirs }
    }

    /// Name of the package holding the plots
    pub fn package_name(&self) -> String {
        format!("{}_statistics", self.request.orderid)
    }

    /// Bring the order's `.stats` files into the stage directory
    fn stage_statistics(&self) -> EspaResult<PathBuf> {
        let source = self.config.order_stats_dir(&self.request.orderid);
        let local = self.dirs.stage.join(STATS_DIR);
        std::fs::create_dir_all(&local)?;

        match self.config.processing.distribution_method {
            DistributionMethod::Local => {
                if !source.is_dir() {
                    return Err(EspaError::Processing(format!(
                        "No statistics directory {}",
                        source.display()
                    )));
                }
                for file in files_with_suffix(&source, ".stats")? {
                    std::fs::copy(&file, local.join(file_name_of(&file)?))?;
                }
            }
            DistributionMethod::Remote => {
                let host = self.config.processing.distribution_host.as_deref().unwrap_or_default();
                let cmd = ExternalCommand::new("scp")
                    .args(["-q", "-o", "StrictHostKeyChecking=no"])
                    .arg(format!("{}:{}/*.stats", host, source.display()))
                    .arg(local.display().to_string());
                command::run(&cmd, None)?;
            }
        }
        Ok(local)
    }
}

impl ProductProcessor for PlotProcessor {
    fn process(&mut self) -> EspaResult<ProductLocation> {
        log::info!("Generating statistics plots for order {}", self.request.orderid);

        self.dirs.initialize()?;
        let stats_dir = self.stage_statistics()?;

        let name = self.package_name();
        let plot_dir = self.dirs.work.join(&name);
        plot::generate_plots(&stats_dir, &plot_dir)?;

        let package = distribution::package_product(&self.dirs.work, &self.dirs.output, &name)?;
        distribution::deliver(&self.config, &self.request.orderid, &package)
    }

    fn remove_product_directory(&self) -> EspaResult<()> {
        self.dirs.remove()
    }

    fn product_directory(&self) -> &Path {
        &self.dirs.product
    }
}

/// Processor for a request
pub fn get_instance(request: &ProcessingRequest, config: &ProcessingConfig) -> EspaResult<Box<dyn ProductProcessor>> {
    if request.is_plot() || request.product_type == ProductType::Plot {
        return Ok(Box::new(PlotProcessor::new(request.clone(), config.clone())));
    }
    Ok(Box::new(SceneProcessor::new(request.clone(), config.clone())?))
}
