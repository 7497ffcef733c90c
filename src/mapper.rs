//! On-demand request loop.
//!
//! Each input line is one product request. The mapper reports progress to
//! the status server, runs the product pipeline, and archives the logs of
//! every request it sees. A failing request never stops the loop.

use crate::config::ProcessingConfig;
use crate::core::processor;
use crate::core::parameters::RequestEnvelope;
use crate::core::sensor::SensorInfo;
use crate::io::status::{StatusReporter, XmlRpcClient};
use crate::logging;
use crate::types::{EspaResult, ProductLocation};
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a status server connection for a URL
pub type Connector = dyn Fn(&str) -> EspaResult<Box<dyn StatusReporter>>;

/// Counts of what happened to the input lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapperSummary {
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Status server connection over XML-RPC
pub fn xmlrpc_connector(url: &str) -> EspaResult<Box<dyn StatusReporter>> {
    Ok(Box::new(XmlRpcClient::new(url)?))
}

/// Name this host reports as its processing location
pub fn processing_location() -> String {
    let name = gethostname::gethostname().to_string_lossy().trim().to_string();
    if name.is_empty() {
        "localhost".to_string()
    } else {
        name
    }
}

/// Report a failed product, retrying while the server cannot be reached
///
/// Returns false when the server refused the update or every attempt
/// failed. Without a status server there is nothing to report.
pub fn set_product_error(
    reporter: Option<&dyn StatusReporter>,
    config: &ProcessingConfig,
    order_id: &str,
    product_id: &str,
    location: &str,
) -> bool {
    let Some(reporter) = reporter else {
        return true;
    };

    let retry = &config.retry;
    let mut sleep_seconds = retry.default_sleep_seconds;
    let mut attempt = 0;

    loop {
        let contents = logging::read_product_log();
        match reporter.set_scene_error(product_id, order_id, location, &contents) {
            Ok(true) => return true,
            Ok(false) => {
                log::error!("Failed processing xmlrpc call to set_scene_error");
                return false;
            }
            Err(e) => {
                log::error!("Failed processing xmlrpc call to set_scene_error: {}", e);
                if attempt >= retry.max_set_scene_error_attempts {
                    return false;
                }
                std::thread::sleep(Duration::from_secs(sleep_seconds));
                attempt += 1;
                sleep_seconds = retry.next_sleep(sleep_seconds);
            }
        }
    }
}

fn run_product(
    envelope: &RequestEnvelope,
    config: &ProcessingConfig,
    keep_log: bool,
    location: &str,
    connect: &Connector,
    reporter: &mut Option<Box<dyn StatusReporter>>,
) -> EspaResult<ProductLocation> {
    if let Some(url) = envelope.status_url() {
        let client = reporter.insert(connect(url)?);
        if !client.update_status(&envelope.product_id, &envelope.orderid, location, "processing")? {
            log::warn!("Failed processing xmlrpc call to update_status to processing");
        }
    }

    let request = envelope.to_request()?;
    if !request.is_plot() {
        SensorInfo::from_product_id(&request.product_id)?;
        if request.options.output_format.is_none() {
            log::warn!("'output_format' parameter missing defaulting to envi");
        }
        request.options.output_format()?;
    }

    let mut pipeline = processor::get_instance(&request, config)?;
    let result = pipeline.process();

    if !keep_log {
        if let Err(e) = pipeline.remove_product_directory() {
            log::warn!(
                "Failed to remove {}: {}",
                pipeline.product_directory().display(),
                e
            );
        }
    }

    result
}

fn archive_logs(config: &ProcessingConfig, order_id: &str, product_log: Option<&Path>) -> EspaResult<()> {
    let destination = config.log_archive_dir(order_id);
    std::fs::create_dir_all(&destination)?;

    let base_log = config.processing.work_dir.join(logging::ONDEMAND_LOG_FILENAME);
    for log_file in product_log.into_iter().chain([base_log.as_path()]) {
        if let Some(name) = log_file.file_name() {
            if log_file.is_file() {
                std::fs::copy(log_file, destination.join(name))?;
            }
        }
    }
    Ok(())
}

/// Process a single request from start to log archival
///
/// # Returns
/// * Whether the product was produced
pub fn process_request(
    envelope: &RequestEnvelope,
    config: &ProcessingConfig,
    keep_log_flag: bool,
    location: &str,
    connect: &Connector,
) -> bool {
    let start = Instant::now();
    let order_id = envelope.orderid.as_str();
    let product_id = envelope.product_id.as_str();

    let product_log = match logging::begin_product(
        &config.processing.work_dir,
        order_id,
        product_id,
        envelope.debug(),
    ) {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Unable to create product log for {}: {}", product_id, e);
            None
        }
    };

    let keep_log = keep_log_flag || envelope.keep_log().unwrap_or(false);
    let mut reporter: Option<Box<dyn StatusReporter>> = None;

    let succeeded = match run_product(envelope, config, keep_log, location, connect, &mut reporter) {
        Ok(product) => {
            if let Some(client) = reporter.as_deref() {
                let product_file = product.product_file.display().to_string();
                let cksum_file = product.cksum_file.display().to_string();
                match client.mark_scene_complete(product_id, order_id, location, &product_file, &cksum_file, "") {
                    Ok(true) => {}
                    Ok(false) => log::warn!("Failed processing xmlrpc call to mark_scene_complete"),
                    Err(e) => log::warn!("Failed processing xmlrpc call to mark_scene_complete: {}", e),
                }
            }
            true
        }
        Err(e) => {
            log::error!("An exception occurred processing {}: {}", product_id, e);
            if let Some(output) = e.output() {
                log::error!("Output [{}]", output);
            }
            if !set_product_error(reporter.as_deref(), config, order_id, product_id, location) {
                log::error!("Unable to mark {} of order {} as failed", product_id, order_id);
            }
            false
        }
    };

    let elapsed = start.elapsed();
    log::info!("Processing time: {} seconds", elapsed.as_secs());

    let minimum = Duration::from_secs(config.processing.min_request_duration_secs);
    if elapsed < minimum {
        let remaining = minimum - elapsed;
        log::info!("Sleeping an additional {} seconds", remaining.as_secs());
        std::thread::sleep(remaining);
    }

    let product_log = logging::end_product().or(product_log);
    if let Err(e) = archive_logs(config, order_id, product_log.as_deref()) {
        log::debug!("Log archival for {} failed: {}", product_id, e);
    }

    succeeded
}

/// Run every request line from `reader`
pub fn process_requests<R: BufRead>(
    reader: R,
    config: &ProcessingConfig,
    keep_log_flag: bool,
    connect: &Connector,
) -> MapperSummary {
    let location = processing_location();
    let mut summary = MapperSummary::default();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read request line: {}", e);
                break;
            }
        };

        let envelope = match RequestEnvelope::parse_line(&line) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                log::error!("Invalid request line [{}]: {}", line.trim(), e);
                summary.failed += 1;
                continue;
            }
        };

        if process_request(&envelope, config, keep_log_flag, &location, connect) {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
    }

    log::info!(
        "Mapper finished: {} succeeded, {} failed, {} skipped",
        summary.succeeded,
        summary.failed,
        summary.skipped
    );
    summary
}
