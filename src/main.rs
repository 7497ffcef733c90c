//! `espa` command line entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use espa_processing::config::ProcessingConfig;
use espa_processing::core::parameters::{ProcessingRequest, PLOT_PRODUCT_ID, SKIP_XMLRPC};
use espa_processing::core::processor;
use espa_processing::core::sensor::SensorInfo;
use espa_processing::{logging, mapper, ProductType};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "espa", version, about = "ESPA on-demand product processing")]
struct Cli {
    /// Configuration file (default: ~/.usgs/espa/processing.conf)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process request lines read from stdin
    Mapper {
        /// Keep product directories after processing
        #[arg(long)]
        keep_log: bool,
    },

    /// Process a single product without the status server
    Run {
        #[arg(long)]
        order_id: String,

        #[arg(long)]
        product_id: String,

        /// landsat, modis or plot; inferred from the product id when absent
        #[arg(long)]
        product_type: Option<String>,

        /// Processing options as a JSON object
        #[arg(long, default_value = "{}")]
        options: String,

        /// Input location (file://, http(s)://, scp://)
        #[arg(long)]
        download_url: Option<String>,

        /// Keep the product directory afterwards
        #[arg(long)]
        keep_directory: bool,
    },

    /// Check request lines from stdin without processing them
    Validate,
}

fn run_single(
    config: &ProcessingConfig,
    order_id: String,
    product_id: String,
    product_type: Option<String>,
    options: &str,
    download_url: Option<String>,
    keep_directory: bool,
) -> Result<()> {
    let product_type = match product_type {
        Some(name) => name.parse::<ProductType>()?,
        None if product_id == PLOT_PRODUCT_ID => ProductType::Plot,
        None => SensorInfo::from_product_id(&product_id)?.product_type(),
    };

    let mut options: serde_json::Value =
        serde_json::from_str(options).context("--options must be a JSON object")?;
    if keep_directory {
        options["keep_directory"] = serde_json::Value::Bool(true);
    }

    let line = serde_json::json!({
        "orderid": order_id,
        "scene": product_id,
        "product_type": product_type,
        "options": options,
        "xmlrpcurl": SKIP_XMLRPC,
        "download_url": download_url,
    });
    let request = ProcessingRequest::parse_line(&line.to_string())?
        .context("request line did not contain a JSON document")?;

    let mut pipeline = processor::get_instance(&request, config)?;
    let result = pipeline.process();
    if let Err(e) = pipeline.remove_product_directory() {
        log::warn!("Failed to remove {}: {}", pipeline.product_directory().display(), e);
    }

    let location = result?;
    println!("{}", location.product_file.display());
    println!("{}", location.cksum_file.display());
    Ok(())
}

/// Validate every request line; returns the number of invalid lines
fn validate_lines<R: BufRead>(reader: R) -> Result<usize> {
    let mut invalid = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let checked = ProcessingRequest::parse_line(&line).and_then(|request| {
            let Some(mut request) = request else {
                return Ok(None);
            };
            if !request.is_plot() {
                let sensor = SensorInfo::from_product_id(&request.product_id)?;
                request.options.validate(&sensor)?;
            }
            Ok(Some(request))
        });

        match checked {
            Ok(Some(request)) => log::info!("Line {}: {} is valid", number + 1, request.product_id),
            Ok(None) => {}
            Err(e) => {
                log::error!("Line {}: {}", number + 1, e);
                invalid += 1;
            }
        }
    }
    Ok(invalid)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(None, cli.debug)?;

    match cli.command {
        Command::Mapper { keep_log } => {
            // The mapper always exits 0
            let config = match ProcessingConfig::load(cli.config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    log::error!("Failed to load configuration: {}", e);
                    return Ok(ExitCode::SUCCESS);
                }
            };

            let base_log = config.processing.work_dir.join(logging::ONDEMAND_LOG_FILENAME);
            if let Err(e) = logging::init(Some(&base_log), cli.debug) {
                log::error!("Unable to open {}: {}", base_log.display(), e);
            }

            let stdin = std::io::stdin();
            mapper::process_requests(stdin.lock(), &config, keep_log, &mapper::xmlrpc_connector);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            order_id,
            product_id,
            product_type,
            options,
            download_url,
            keep_directory,
        } => {
            let result = ProcessingConfig::load(cli.config.as_deref())
                .context("failed to load configuration")
                .and_then(|config| {
                    run_single(&config, order_id, product_id, product_type, &options, download_url, keep_directory)
                });
            match result {
                Ok(()) => Ok(ExitCode::SUCCESS),
                Err(e) => {
                    log::error!("Processing failed: {:#}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Validate => {
            let invalid = validate_lines(std::io::stdin().lock())?;
            if invalid > 0 {
                log::error!("{} invalid request lines", invalid);
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
