use espa_processing::logging::ONDEMAND_LOG_FILENAME;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn espa(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_espa"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    // The child may exit before reading its input
    let _ = child.stdin.take().unwrap().write_all(stdin.as_bytes());
    child.wait_with_output().unwrap()
}

fn write_config(root: &Path) -> String {
    let work = root.join("work");
    std::fs::create_dir_all(&work).unwrap();
    let path = root.join("processing.conf");
    let text = format!(
        "[processing]\nwork_dir = \"{}\"\ndistribution_dir = \"{}\"\n\n[retry]\nmax_transfer_attempts = 1\ndefault_sleep_seconds = 0\n",
        work.display(),
        root.join("dist").display()
    );
    std::fs::write(&path, text).unwrap();
    path.display().to_string()
}

const VALID_LINE: &str = r#"{"orderid": "o-1", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {"include_sr": true}}"#;

#[test]
fn test_validate_exit_codes() {
    let output = espa(&["validate"], &format!("header line\n{}\n", VALID_LINE));
    assert!(output.status.success());

    let bad = VALID_LINE.replace(r#""include_sr": true"#, r#""include_sr": true, "resample_method": "lanczos""#);
    let output = espa(&["validate"], &format!("{}\n{}\n", VALID_LINE, bad));
    assert!(!output.status.success());
}

#[test]
fn test_run_fails_without_input() {
    let root = tempfile::tempdir().unwrap();
    let config = write_config(root.path());

    let output = espa(
        &[
            "--config",
            &config,
            "run",
            "--order-id",
            "o-2",
            "--product-id",
            "LT50460282002042EDC01",
            "--options",
            r#"{"include_sr": true}"#,
        ],
        "",
    );
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_run_fails_without_config() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("missing.conf").display().to_string();

    let output = espa(
        &["--config", &missing, "run", "--order-id", "o-3", "--product-id", "plot"],
        "",
    );
    assert!(!output.status.success());
}

#[test]
fn test_mapper_exits_zero() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("missing.conf").display().to_string();
    let output = espa(&["--config", &missing, "mapper"], &format!("{}\n", VALID_LINE));
    assert!(output.status.success());

    // Every request fails, the mapper still succeeds
    let config = write_config(root.path());
    let line = VALID_LINE.replace("}}", r#"}, "xmlrpcurl": "skip_xmlrpc"}"#);
    let output = espa(&["--config", &config, "mapper"], &format!("{}\nnot a request\n", line));
    assert!(output.status.success());
    assert!(root.path().join("work").join(ONDEMAND_LOG_FILENAME).is_file());
}
