//! Logging setup.
//!
//! A single `env_logger` backend writes every record to stderr, to the base
//! mapper log and to the log of the product currently being processed. The
//! product log is swapped for each request so that its contents can be
//! reported back when the product fails.

use crate::types::{EspaError, EspaResult};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Base log written by the on-demand mapper
pub const ONDEMAND_LOG_FILENAME: &str = "espa-ondemand-mapper.log";

static SINK: OnceLock<Arc<LogSink>> = OnceLock::new();

struct ProductLog {
    path: PathBuf,
    file: File,
}

#[derive(Default)]
struct LogSink {
    base: Mutex<Option<File>>,
    product: Mutex<Option<ProductLog>>,
    /// `--debug` given at startup
    debug: AtomicBool,
}

/// `Write` handle given to env_logger; fans records out to every target
struct SinkWriter(Arc<LogSink>);

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;

        if let Ok(mut base) = self.0.base.lock() {
            if let Some(file) = base.as_mut() {
                file.write_all(buf)?;
            }
        }

        if let Ok(mut product) = self.0.product.lock() {
            if let Some(log) = product.as_mut() {
                log.file.write_all(buf)?;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Ok(mut base) = self.0.base.lock() {
            if let Some(file) = base.as_mut() {
                file.flush()?;
            }
        }
        if let Ok(mut product) = self.0.product.lock() {
            if let Some(log) = product.as_mut() {
                log.file.flush()?;
            }
        }
        std::io::stderr().flush()
    }
}

fn sink() -> &'static Arc<LogSink> {
    SINK.get_or_init(|| Arc::new(LogSink::default()))
}

fn base_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Install the logger, optionally appending to a base log file.
///
/// Calling this more than once replaces the base log file and level.
pub fn init(base_log: Option<&Path>, debug: bool) -> EspaResult<()> {
    let sink = sink();
    sink.debug.store(debug, Ordering::Relaxed);

    if let Some(path) = base_log {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut base) = sink.base.lock() {
            *base = Some(file);
        }
    }

    let result = env_logger::Builder::new()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .target(env_logger::Target::Pipe(Box::new(SinkWriter(Arc::clone(sink)))))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<8} {}:{} -- {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or("espa"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init();

    if result.is_err() {
        log::debug!("Logger already installed, keeping existing backend");
    }

    log::set_max_level(base_level(debug));
    Ok(())
}

/// File name of the log kept for one product
pub fn product_log_name(order_id: &str, product_id: &str) -> String {
    format!("espa-{}-{}.log", order_id, product_id)
}

/// Start logging to a fresh per-product log in `dir`.
pub fn begin_product(
    dir: &Path,
    order_id: &str,
    product_id: &str,
    debug: bool,
) -> EspaResult<PathBuf> {
    let path = dir.join(product_log_name(order_id, product_id));
    let file = File::create(&path)?;

    let mut product = sink()
        .product
        .lock()
        .map_err(|_| EspaError::Processing("product log lock poisoned".to_string()))?;
    *product = Some(ProductLog { path: path.clone(), file });
    drop(product);

    log::set_max_level(base_level(debug || sink().debug.load(Ordering::Relaxed)));
    Ok(path)
}

/// Stop writing to the product log and return to the startup level.
pub fn end_product() -> Option<PathBuf> {
    log::set_max_level(base_level(sink().debug.load(Ordering::Relaxed)));
    sink()
        .product
        .lock()
        .ok()
        .and_then(|mut product| product.take())
        .map(|log| log.path)
}

/// Path of the active product log, if any
pub fn product_log_path() -> Option<PathBuf> {
    sink()
        .product
        .lock()
        .ok()
        .and_then(|product| product.as_ref().map(|log| log.path.clone()))
}

/// Contents of the active product log, empty when there is none
pub fn read_product_log() -> String {
    let Some(path) = product_log_path() else {
        return String::new();
    };

    if let Ok(mut product) = sink().product.lock() {
        if let Some(log) = product.as_mut() {
            let _ = log.file.flush();
        }
    }

    std::fs::read_to_string(path).unwrap_or_default()
}
