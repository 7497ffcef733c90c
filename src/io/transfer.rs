use crate::config::RetryConfig;
use crate::core::command::{self, ExternalCommand};
use crate::types::{EspaError, EspaResult};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timeout for staging downloads
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Where an input product can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    Local(PathBuf),
    Http(String),
    Scp { host: String, path: String },
}

impl TransferSource {
    pub fn parse(source: &str) -> Self {
        if let Some(path) = source.strip_prefix("file://") {
            return TransferSource::Local(PathBuf::from(path));
        }
        if source.starts_with("http://") || source.starts_with("https://") {
            return TransferSource::Http(source.to_string());
        }
        if let Some((host, path)) = source.split_once(':') {
            if !host.is_empty() && !host.contains('/') && !path.is_empty() {
                return TransferSource::Scp {
                    host: host.to_string(),
                    path: path.to_string(),
                };
            }
        }
        TransferSource::Local(PathBuf::from(source))
    }

    /// Name of the file the source refers to
    pub fn file_name(&self) -> EspaResult<String> {
        let name = match self {
            TransferSource::Local(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
            TransferSource::Http(url) => url
                .split('?')
                .next()
                .and_then(|u| u.rsplit('/').next())
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            TransferSource::Scp { path, .. } => path
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        };
        name.ok_or_else(|| EspaError::Transfer(format!("Cannot determine file name of {:?}", self)))
    }
}

/// Run `operation` until it succeeds or the attempts are used up,
/// sleeping with backoff between failures
pub fn with_retries<T, F>(
    description: &str,
    max_attempts: u32,
    retry: &RetryConfig,
    mut operation: F,
) -> EspaResult<T>
where
    F: FnMut() -> EspaResult<T>,
{
    let mut sleep_seconds = retry.default_sleep_seconds;
    let mut attempt = 1;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts.max(1) => {
                log::warn!(
                    "{} failed on attempt {} of {}: {}",
                    description,
                    attempt,
                    max_attempts,
                    e
                );
                std::thread::sleep(Duration::from_secs(sleep_seconds));
                sleep_seconds = retry.next_sleep(sleep_seconds);
                attempt += 1;
            }
            Err(e) => {
                log::error!("{} failed after {} attempts", description, attempt);
                return Err(e);
            }
        }
    }
}

/// Fetch an input product into `stage_dir`
///
/// # Returns
/// * Local path of the staged file
pub fn stage_input(source: &str, stage_dir: &Path, retry: &RetryConfig) -> EspaResult<PathBuf> {
    let source = TransferSource::parse(source);
    let destination = stage_dir.join(source.file_name()?);

    std::fs::create_dir_all(stage_dir)?;
    log::info!("Staging {:?} to {}", source, destination.display());

    with_retries("Staging input", retry.max_transfer_attempts, retry, || {
        match &source {
            TransferSource::Local(path) => copy_local(path, &destination),
            TransferSource::Http(url) => download_http(url, &destination),
            TransferSource::Scp { host, path } => scp_fetch(host, path, &destination),
        }
    })?;

    Ok(destination)
}

fn copy_local(source: &Path, destination: &Path) -> EspaResult<()> {
    if !source.exists() {
        return Err(EspaError::Transfer(format!(
            "Input {} does not exist",
            source.display()
        )));
    }
    std::fs::copy(source, destination)?;
    Ok(())
}

fn download_http(url: &str, destination: &Path) -> EspaResult<()> {
    log::debug!("Downloading from: {}", url);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .build()
        .map_err(|e| EspaError::Transfer(format!("Failed to create HTTP client: {}", e)))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| EspaError::Transfer(format!("HTTP request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(EspaError::Transfer(format!(
            "HTTP request for {} failed with status: {}",
            url,
            response.status()
        )));
    }

    let mut file = File::create(destination)?;
    let bytes = response
        .copy_to(&mut file)
        .map_err(|e| EspaError::Transfer(format!("Failed to read response body: {}", e)))?;

    log::info!("Downloaded {} bytes to {}", bytes, destination.display());
    Ok(())
}

fn scp_fetch(host: &str, path: &str, destination: &Path) -> EspaResult<()> {
    let cmd = ExternalCommand::new("scp")
        .arg("-q")
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg(format!("{}:{}", host, path))
        .arg(destination.display().to_string());
    command::run(&cmd, None)?;
    Ok(())
}

/// Unpack a staged file into `dest`
///
/// `.tar.gz`/`.tgz` and `.tar` archives are extracted, a lone `.gz` is
/// decompressed and anything else is copied unchanged.
pub fn unpack(archive: &Path, dest: &Path) -> EspaResult<()> {
    std::fs::create_dir_all(dest)?;
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    log::info!("Unpacking {} into {}", archive.display(), dest.display());

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let decoder = GzDecoder::new(File::open(archive)?);
        tar::Archive::new(decoder)
            .unpack(dest)
            .map_err(|e| EspaError::Transfer(format!("Failed to extract {}: {}", name, e)))?;
    } else if name.ends_with(".tar") {
        tar::Archive::new(File::open(archive)?)
            .unpack(dest)
            .map_err(|e| EspaError::Transfer(format!("Failed to extract {}: {}", name, e)))?;
    } else if let Some(stem) = name.strip_suffix(".gz") {
        let mut decoder = GzDecoder::new(File::open(archive)?);
        let mut output = File::create(dest.join(stem))?;
        std::io::copy(&mut decoder, &mut output)?;
    } else {
        let target = dest.join(&name);
        if target != archive {
            std::fs::copy(archive, target)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn no_sleep_retry() -> RetryConfig {
        RetryConfig {
            default_sleep_seconds: 0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!(
            TransferSource::parse("file:///data/LT50460282002042EDC01.tar.gz"),
            TransferSource::Local(PathBuf::from("/data/LT50460282002042EDC01.tar.gz"))
        );
        assert_eq!(
            TransferSource::parse("https://landsat.example/x/scene.tar.gz"),
            TransferSource::Http("https://landsat.example/x/scene.tar.gz".to_string())
        );
        assert_eq!(
            TransferSource::parse("cache01:/data/scene.tar.gz"),
            TransferSource::Scp {
                host: "cache01".to_string(),
                path: "/data/scene.tar.gz".to_string()
            }
        );
        assert_eq!(
            TransferSource::parse("/data/scene.tar.gz"),
            TransferSource::Local(PathBuf::from("/data/scene.tar.gz"))
        );
    }

    #[test]
    fn test_file_names() {
        let http = TransferSource::parse("https://host/a/b/scene.tar.gz?token=1");
        assert_eq!(http.file_name().unwrap(), "scene.tar.gz");
        assert!(TransferSource::parse("https://host/").file_name().is_err());
    }

    #[test]
    fn test_stage_local_and_unpack() {
        let source_dir = tempfile::tempdir().unwrap();
        let stage_dir = tempfile::tempdir().unwrap();

        let archive_path = source_dir.path().join("scene.tar.gz");
        {
            let encoder = GzEncoder::new(File::create(&archive_path).unwrap(), Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"GROUP = L1_METADATA_FILE\nEND_GROUP = L1_METADATA_FILE\nEND\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "scene_MTL.txt", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let staged = stage_input(
            &format!("file://{}", archive_path.display()),
            stage_dir.path(),
            &no_sleep_retry(),
        )
        .unwrap();
        assert!(staged.exists());

        let unpack_dir = stage_dir.path().join("unpacked");
        unpack(&staged, &unpack_dir).unwrap();
        assert!(unpack_dir.join("scene_MTL.txt").exists());
    }

    #[test]
    fn test_unpack_single_gz() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("MOD09GA.hdf.gz");
        {
            let mut encoder = GzEncoder::new(File::create(&gz_path).unwrap(), Compression::default());
            encoder.write_all(b"hdf bytes").unwrap();
            encoder.finish().unwrap();
        }

        let out = dir.path().join("out");
        unpack(&gz_path, &out).unwrap();
        assert_eq!(std::fs::read(out.join("MOD09GA.hdf")).unwrap(), b"hdf bytes");
    }

    #[test]
    fn test_missing_local_input() {
        let stage_dir = tempfile::tempdir().unwrap();
        let result = stage_input("/no/such/scene.tar.gz", stage_dir.path(), &no_sleep_retry());
        assert!(matches!(result, Err(EspaError::Transfer(_))));
    }

    #[test]
    fn test_with_retries_recovers() {
        let mut calls = 0;
        let value = with_retries("flaky", 3, &no_sleep_retry(), || {
            calls += 1;
            if calls < 3 {
                Err(EspaError::Transfer("not yet".to_string()))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_with_retries_gives_up() {
        let mut calls = 0;
        let result: EspaResult<()> = with_retries("broken", 2, &no_sleep_retry(), || {
            calls += 1;
            Err(EspaError::Transfer("down".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
