use espa_processing::config::ProcessingConfig;
use espa_processing::io::status::StatusReporter;
use espa_processing::logging;
use espa_processing::mapper::{self, MapperSummary};
use espa_processing::{EspaError, EspaResult};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The product log is process-wide, so mapper runs must not overlap
static SERIAL: Mutex<()> = Mutex::new(());

/// Records every status call as `method:product:detail`
#[derive(Clone, Default)]
struct RecordingReporter {
    calls: Arc<Mutex<Vec<String>>>,
    /// Status server times out on update_status
    update_fails: bool,
}

impl RecordingReporter {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl StatusReporter for RecordingReporter {
    fn update_status(&self, product_id: &str, _: &str, _: &str, status: &str) -> EspaResult<bool> {
        self.record(format!("update_status:{}:{}", product_id, status));
        if self.update_fails {
            return Err(EspaError::Status("timeout".to_string()));
        }
        Ok(true)
    }

    fn set_scene_error(&self, product_id: &str, _: &str, _: &str, _: &str) -> EspaResult<bool> {
        self.record(format!("set_scene_error:{}", product_id));
        Ok(true)
    }

    fn mark_scene_complete(
        &self,
        product_id: &str,
        _: &str,
        _: &str,
        product_file: &str,
        _: &str,
        _: &str,
    ) -> EspaResult<bool> {
        let name = Path::new(product_file)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        self.record(format!("mark_scene_complete:{}:{}", product_id, name));
        Ok(true)
    }
}

fn test_config(root: &Path) -> ProcessingConfig {
    let mut config = ProcessingConfig::with_distribution_dir(root.join("dist"));
    config.processing.work_dir = root.join("work");
    config.retry.default_sleep_seconds = 0;
    config.retry.max_transfer_attempts = 1;
    std::fs::create_dir_all(&config.processing.work_dir).unwrap();
    config
}

fn write_stats(dir: &Path, stem: &str, mean: f64) {
    std::fs::create_dir_all(dir).unwrap();
    let text = format!(
        "FILENAME={}.img\nMINIMUM=-100.000000\nMAXIMUM=9000.000000\nMEAN={:.6}\nSTDDEV=12.500000\nVALID=yes\n",
        stem, mean
    );
    std::fs::write(dir.join(format!("{}.stats", stem)), text).unwrap();
}

fn run(input: &str, config: &ProcessingConfig, keep_log: bool, reporter: &RecordingReporter) -> MapperSummary {
    let reporter = reporter.clone();
    let connect = move |_url: &str| -> EspaResult<Box<dyn StatusReporter>> { Ok(Box::new(reporter.clone())) };
    mapper::process_requests(Cursor::new(input.to_string()), config, keep_log, &connect)
}

#[test]
fn test_plot_request_completes() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let stats_dir = config.order_stats_dir("order-7");
    write_stats(&stats_dir, "LT50460282002042EDC01_sr_band1", 1200.0);
    write_stats(&stats_dir, "LT50460282002058EDC01_sr_band1", 1400.0);

    let input = concat!(
        "not a request\n",
        r#"1 {"orderid": "order-7", "scene": "plot", "product_type": "plot", "options": {}, "xmlrpcurl": "http://status.example:8080/rpc"}"#,
        "\n"
    );
    let reporter = RecordingReporter::default();
    let summary = run(input, &config, false, &reporter);

    assert_eq!(
        summary,
        MapperSummary {
            skipped: 1,
            succeeded: 1,
            failed: 0
        }
    );
    assert_eq!(
        reporter.calls(),
        vec![
            "update_status:plot:processing".to_string(),
            "mark_scene_complete:plot:order-7_statistics.tar.gz".to_string(),
        ]
    );

    let order_dir = config.order_dir("order-7");
    assert!(order_dir.join("order-7_statistics.tar.gz").is_file());
    assert!(order_dir.join("order-7_statistics.cksum").is_file());
    assert!(!config.processing.work_dir.join("order-7-plot").exists());
    assert!(config
        .log_archive_dir("order-7")
        .join("espa-order-7-plot.log")
        .is_file());
}

#[test]
fn test_failed_request_reports_error() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    // No input staged for this scene
    let input = concat!(
        r#"{"orderid": "order-8", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true}, "xmlrpcurl": "http://status.example:8080/rpc"}"#,
        "\n",
        r#"{"orderid": "order-8", "scene": "LT50460282002042EDC01", "product_type": "landsat"}"#,
        "\n"
    );
    let reporter = RecordingReporter::default();
    let summary = run(input, &config, false, &reporter);

    assert_eq!(summary.failed, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(
        reporter.calls(),
        vec![
            "update_status:LT50460282002042EDC01:processing".to_string(),
            "set_scene_error:LT50460282002042EDC01".to_string(),
        ]
    );
    assert!(!config
        .processing
        .work_dir
        .join("order-8-LT50460282002042EDC01")
        .exists());
}

#[test]
fn test_keep_log_keeps_product_directory() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    let input = r#"{"orderid": "order-9", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true}, "xmlrpcurl": "skip_xmlrpc"}"#;
    let reporter = RecordingReporter::default();
    let summary = run(input, &config, true, &reporter);

    assert_eq!(summary.failed, 1);
    assert!(reporter.calls().is_empty());
    assert!(config
        .processing
        .work_dir
        .join("order-9-LT50460282002042EDC01")
        .join("stage")
        .is_dir());
}

#[test]
fn test_invalid_output_format_is_rejected() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    let input = r#"{"orderid": "order-10", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true, "output_format": "jpeg"}, "xmlrpcurl": "http://status.example:8080/rpc"}"#;
    let reporter = RecordingReporter::default();
    let summary = run(input, &config, false, &reporter);

    assert_eq!(summary.failed, 1);
    assert_eq!(
        reporter.calls(),
        vec![
            "update_status:LT50460282002042EDC01:processing".to_string(),
            "set_scene_error:LT50460282002042EDC01".to_string(),
        ]
    );
    // Rejected before any product directory is created
    assert!(!config
        .processing
        .work_dir
        .join("order-10-LT50460282002042EDC01")
        .exists());
}

#[test]
fn test_keep_log_option_keeps_product_directory() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    let input = r#"{"orderid": "order-11", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true, "keep_log": true}, "xmlrpcurl": "skip_xmlrpc"}"#;
    let reporter = RecordingReporter::default();
    let summary = run(input, &config, false, &reporter);

    assert_eq!(summary.failed, 1);
    assert!(config
        .processing
        .work_dir
        .join("order-11-LT50460282002042EDC01")
        .join("stage")
        .is_dir());
}

#[test]
fn test_short_request_is_padded_to_minimum_duration() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.processing.min_request_duration_secs = 1;

    let input = r#"{"orderid": "order-12", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true}, "xmlrpcurl": "skip_xmlrpc"}"#;
    let reporter = RecordingReporter::default();
    let start = Instant::now();
    let summary = run(input, &config, false, &reporter);

    assert_eq!(summary.failed, 1);
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[test]
fn test_update_status_error_still_sets_scene_error() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    let input = r#"{"orderid": "order-13", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true}, "xmlrpcurl": "http://status.example:8080/rpc"}"#;
    let reporter = RecordingReporter {
        update_fails: true,
        ..RecordingReporter::default()
    };
    let summary = run(input, &config, false, &reporter);

    assert_eq!(summary.failed, 1);
    assert_eq!(
        reporter.calls(),
        vec![
            "update_status:LT50460282002042EDC01:processing".to_string(),
            "set_scene_error:LT50460282002042EDC01".to_string(),
        ]
    );
}

#[test]
fn test_bad_option_value_is_reported_for_the_product() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    logging::init(None, false).unwrap();

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    let input = r#"{"orderid": "order-14", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true, "resample_method": "lanczos"}, "xmlrpcurl": "http://status.example:8080/rpc"}"#;
    let reporter = RecordingReporter::default();
    let summary = run(input, &config, false, &reporter);

    assert_eq!(
        summary,
        MapperSummary {
            skipped: 0,
            succeeded: 0,
            failed: 1
        }
    );
    assert_eq!(
        reporter.calls(),
        vec![
            "update_status:LT50460282002042EDC01:processing".to_string(),
            "set_scene_error:LT50460282002042EDC01".to_string(),
        ]
    );

    let archived = config
        .log_archive_dir("order-14")
        .join("espa-order-14-LT50460282002042EDC01.log");
    let contents = std::fs::read_to_string(archived).unwrap();
    assert!(contents.contains("lanczos"), "{}", contents);
}
