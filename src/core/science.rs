//! Selection of the external science applications for a request.

use crate::config::ProcessingConfig;
use crate::core::command::ExternalCommand;
use crate::core::parameters::ProcessingOptions;
use crate::core::sensor::SensorInfo;
use crate::types::{EspaError, EspaResult};
use std::path::PathBuf;

/// Level-1 product names found in converted Landsat metadata
pub const LEVEL1_PRODUCTS: [&str; 3] = ["L1T", "L1G", "L1GT"];

/// Input files the applications are pointed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SciencePaths {
    /// Landsat MTL file
    pub mtl: Option<PathBuf>,
    /// MODIS HDF file
    pub hdf: Option<PathBuf>,
    /// ESPA metadata produced by the conversion step
    pub xml: PathBuf,
}

fn path_arg(path: &std::path::Path) -> String {
    path.display().to_string()
}

/// Whether the surface reflectance application has to run
fn needs_surface_reflectance(options: &ProcessingOptions) -> bool {
    options.include_sr
        || options.include_sr_toa
        || options.include_sr_thermal
        || options.include_cfmask
        || options.include_dswe
        || options.include_st
        || options.any_index()
}

/// Flags understood by `spectral_indices`
fn index_flags(options: &ProcessingOptions) -> Vec<&'static str> {
    let flags = [
        (options.include_sr_ndvi, "--ndvi"),
        (options.include_sr_evi, "--evi"),
        (options.include_sr_savi, "--savi"),
        (options.include_sr_msavi, "--msavi"),
        (options.include_sr_nbr, "--nbr"),
        (options.include_sr_nbr2, "--nbr2"),
        (options.include_sr_ndmi, "--ndmi"),
    ];
    flags.iter().filter(|(on, _)| *on).map(|(_, flag)| *flag).collect()
}

/// Ordered list of applications that build the requested products
pub fn science_commands(
    sensor: &SensorInfo,
    options: &ProcessingOptions,
    paths: &SciencePaths,
    config: &ProcessingConfig,
) -> EspaResult<Vec<ExternalCommand>> {
    let xml = path_arg(&paths.xml);

    if sensor.is_modis() {
        let hdf = paths
            .hdf
            .as_deref()
            .ok_or_else(|| EspaError::Processing("No HDF input found for MODIS product".to_string()))?;
        return Ok(vec![ExternalCommand::new(config.program("convert_modis_to_espa"))
            .args(["--hdf".to_string(), path_arg(hdf), "--xml".to_string(), xml])]);
    }

    let mtl = paths
        .mtl
        .as_deref()
        .ok_or_else(|| EspaError::Processing("No MTL file found for Landsat product".to_string()))?;
    let mtl = path_arg(mtl);

    let mut commands = vec![ExternalCommand::new(config.program("convert_lpgs_to_espa"))
        .args(["--mtl", mtl.as_str(), "--xml", xml.as_str()])];

    if options.include_dem || options.include_st {
        commands.push(
            ExternalCommand::new(config.program("do_create_dem.py"))
                .args(["--mtl", mtl.as_str(), "--xml", xml.as_str()]),
        );
    }

    if needs_surface_reflectance(options) {
        let program = if sensor.uses_lasrc() {
            "do_lasrc.py"
        } else {
            "do_ledaps.py"
        };
        commands.push(ExternalCommand::new(config.program(program)).args(["--xml", xml.as_str()]));
    }

    if options.include_cfmask || options.include_dswe {
        commands.push(ExternalCommand::new(config.program("cfmask")).args(["--xml", xml.as_str()]));
    }

    let flags = index_flags(options);
    if !flags.is_empty() {
        commands.push(
            ExternalCommand::new(config.program("spectral_indices"))
                .args(["--xml", xml.as_str()])
                .args(flags),
        );
    }

    if options.include_dswe {
        commands.push(ExternalCommand::new(config.program("dswe")).args(["--xml", xml.as_str()]));
    }

    if options.include_st {
        commands.push(ExternalCommand::new(config.program("do_st.py")).args(["--xml", xml.as_str()]));
    }

    Ok(commands)
}

/// Products that were generated along the way but not ordered
pub fn products_to_remove(sensor: &SensorInfo, options: &ProcessingOptions) -> Vec<&'static str> {
    if sensor.is_modis() {
        return Vec::new();
    }

    let mut remove = Vec::new();
    if !(options.include_source_data || options.include_customized_source_data) {
        remove.extend(LEVEL1_PRODUCTS);
    }

    let products = [
        (options.include_sr_toa, "toa_refl"),
        (options.include_sr_thermal, "toa_bt"),
        (options.include_sr, "sr_refl"),
        (options.include_cfmask, "cfmask"),
        (options.any_index(), "spectral_indices"),
        (options.include_dswe, "dswe"),
        (options.include_st, "st"),
        (options.include_dem, "elevation"),
    ];
    remove.extend(products.iter().filter(|(keep, _)| !keep).map(|(_, name)| *name));
    remove
}
