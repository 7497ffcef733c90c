use espa_processing::config::ProcessingConfig;
use espa_processing::core::distribution;
use espa_processing::core::parameters::ProcessingRequest;
use espa_processing::core::plot;
use espa_processing::core::processor;
use espa_processing::EspaError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::Path;

const MTL: &str = r#"GROUP = L1_METADATA_FILE
  GROUP = PRODUCT_METADATA
    SPACECRAFT_ID = "LANDSAT_5"
    SENSOR_ID = "TM"
    CORNER_UL_LAT_PRODUCT = 47.88188
    CORNER_UL_LON_PRODUCT = -124.25445
    CORNER_UR_LAT_PRODUCT = 47.88637
    CORNER_UR_LON_PRODUCT = -121.13542
    CORNER_LL_LAT_PRODUCT = 45.73412
    CORNER_LL_LON_PRODUCT = -124.18148
    CORNER_LR_LAT_PRODUCT = 45.73833
    CORNER_LR_LON_PRODUCT = -121.19110
  END_GROUP = PRODUCT_METADATA
END_GROUP = L1_METADATA_FILE
END
"#;

fn level1_archive(path: &Path) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in [
        ("LT50460282002042EDC01_MTL.txt", MTL.as_bytes()),
        ("LT50460282002042EDC01_B1.TIF", &[0u8; 16][..]),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

#[test]
fn test_scene_pipeline_stages_and_runs_science() {
    let root = tempfile::tempdir().unwrap();
    let mut config = ProcessingConfig::with_distribution_dir(root.path().join("dist"));
    config.processing.work_dir = root.path().join("work");
    config.retry.default_sleep_seconds = 0;
    // Stand-in converter that always fails
    config
        .applications
        .insert("convert_lpgs_to_espa".to_string(), "false".to_string());
    std::fs::create_dir_all(&config.processing.work_dir).unwrap();

    let input = root.path().join("LT50460282002042EDC01.tar.gz");
    level1_archive(&input);

    let line = format!(
        r#"{{"orderid": "o-1", "scene": "LT50460282002042EDC01", "product_type": "landsat", "options": {{"include_sr": true, "keep_directory": true}}, "download_url": "file://{}"}}"#,
        input.display()
    );
    let request = ProcessingRequest::parse_line(&line).unwrap().unwrap();

    let mut pipeline = processor::get_instance(&request, &config).unwrap();
    let err = pipeline.process().unwrap_err();
    match err {
        EspaError::Command { ref command, .. } => assert!(command.starts_with("false --mtl")),
        other => panic!("expected command failure, got {}", other),
    }

    let work = pipeline.product_directory().join("work");
    assert!(work.join("LT50460282002042EDC01_MTL.txt").is_file());
    assert!(pipeline
        .product_directory()
        .join("stage")
        .join("LT50460282002042EDC01.tar.gz")
        .is_file());

    // keep_directory leaves the tree in place
    pipeline.remove_product_directory().unwrap();
    assert!(pipeline.product_directory().exists());
}

#[test]
fn test_plot_package_round_trip() {
    let stats = tempfile::tempdir().unwrap();
    for (stem, mean) in [
        ("LE70460282002050EDC00_toa_band3", 0.21),
        ("LE70460282002066EDC00_toa_band3", 0.25),
        ("LE70460282002082EDC00_toa_band3", 0.19),
    ] {
        std::fs::write(
            stats.path().join(format!("{}.stats", stem)),
            format!(
                "FILENAME={}.img\nMINIMUM=0.010000\nMAXIMUM=0.900000\nMEAN={:.6}\nSTDDEV=0.050000\nVALID=yes\n",
                stem, mean
            ),
        )
        .unwrap();
    }

    let work = tempfile::tempdir().unwrap();
    let plots = work.path().join("order_statistics");
    let written = plot::generate_plots(stats.path(), &plots).unwrap();
    assert_eq!(written.len(), 2);

    let csv = std::fs::read_to_string(plots.join("landsat_etm_toa_band3_stats.csv")).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 4);
    assert!(rows[1].starts_with("2002-02-19,"));
    assert!(rows[3].starts_with("2002-03-23,"));

    let output = tempfile::tempdir().unwrap();
    let package = distribution::package_product(work.path(), output.path(), "order_statistics").unwrap();
    assert_eq!(distribution::sha256_file(&package.archive).unwrap(), package.digest);
}
