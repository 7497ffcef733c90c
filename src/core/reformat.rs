use crate::config::ProcessingConfig;
use crate::core::command::{self, ExternalCommand};
use crate::types::{EspaError, EspaResult, OutputFormat};
use std::path::Path;

/// Conversion command for `format`; ENVI output needs none
pub fn reformat_command(
    format: OutputFormat,
    xml_name: &str,
    config: &ProcessingConfig,
) -> EspaResult<Option<ExternalCommand>> {
    let base = xml_name
        .strip_suffix(".xml")
        .ok_or_else(|| EspaError::Processing(format!("{} is not an XML metadata file", xml_name)))?;

    let cmd = match format {
        OutputFormat::Envi => return Ok(None),
        OutputFormat::Gtiff => ExternalCommand::new(config.program("convert_espa_to_gtif"))
            .args(["--xml", xml_name, "--gtif", base]),
        OutputFormat::HdfEos2 => ExternalCommand::new(config.program("convert_espa_to_hdf"))
            .args(["--xml", xml_name, "--hdf"])
            .arg(format!("{}.hdf", base)),
        OutputFormat::Netcdf => ExternalCommand::new(config.program("convert_espa_to_netcdf"))
            .args(["--xml", xml_name, "--netcdf"])
            .arg(format!("{}.nc", base)),
    };

    Ok(Some(cmd.arg("--del_src_files")))
}

/// Convert the product in `work_dir` to the requested output format
pub fn reformat(
    work_dir: &Path,
    xml_name: &str,
    format: OutputFormat,
    config: &ProcessingConfig,
) -> EspaResult<()> {
    match reformat_command(format, xml_name, config)? {
        Some(cmd) => {
            log::info!("Converting product to {}", format);
            command::run(&cmd, Some(work_dir))?;
        }
        None => log::info!("Product stays in {} format", format),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProcessingConfig {
        ProcessingConfig::with_distribution_dir("/dist")
    }

    #[test]
    fn test_envi_is_noop() {
        let cmd = reformat_command(OutputFormat::Envi, "LT50460282002042EDC01.xml", &config()).unwrap();
        assert!(cmd.is_none());
    }

    #[test]
    fn test_conversion_commands() {
        let xml = "LT50460282002042EDC01.xml";

        let gtiff = reformat_command(OutputFormat::Gtiff, xml, &config()).unwrap().unwrap();
        assert_eq!(
            gtiff.to_string(),
            "convert_espa_to_gtif --xml LT50460282002042EDC01.xml --gtif LT50460282002042EDC01 --del_src_files"
        );

        let hdf = reformat_command(OutputFormat::HdfEos2, xml, &config()).unwrap().unwrap();
        assert!(hdf.has_arg("LT50460282002042EDC01.hdf"));

        let netcdf = reformat_command(OutputFormat::Netcdf, xml, &config()).unwrap().unwrap();
        assert_eq!(netcdf.program, "convert_espa_to_netcdf");
        assert!(netcdf.has_arg("LT50460282002042EDC01.nc"));
        assert!(netcdf.has_arg("--del_src_files"));
    }

    #[test]
    fn test_requires_xml_name() {
        assert!(reformat_command(OutputFormat::Gtiff, "scene.img", &config()).is_err());
    }
}
