//! Packaging of finished products and delivery to the distribution tree.

use crate::config::{DistributionMethod, ProcessingConfig};
use crate::core::command::{self, ExternalCommand};
use crate::io::transfer::with_retries;
use crate::types::{EspaError, EspaResult, ProductLocation};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A product archive and its checksum file, ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedProduct {
    pub archive: PathBuf,
    pub cksum: PathBuf,
    /// Hex SHA-256 of the archive
    pub digest: String,
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> EspaResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Files below `dir`, relative to it, in sorted order
fn collect_files(dir: &Path, prefix: &Path, files: &mut Vec<PathBuf>) -> EspaResult<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        let relative = prefix.join(name);
        if path.is_dir() {
            collect_files(&path, &relative, files)?;
        } else {
            files.push(relative);
        }
    }
    Ok(())
}

/// Archive the contents of `source_dir` as `<output_dir>/<name>.tar.gz`
/// and write `<name>.cksum` next to it
pub fn package_product(source_dir: &Path, output_dir: &Path, name: &str) -> EspaResult<PackagedProduct> {
    std::fs::create_dir_all(output_dir)?;

    let mut files = Vec::new();
    collect_files(source_dir, Path::new(""), &mut files)?;
    if files.is_empty() {
        return Err(EspaError::Distribution(format!(
            "Nothing to package in {}",
            source_dir.display()
        )));
    }

    let archive_name = format!("{}.tar.gz", name);
    let archive = output_dir.join(&archive_name);
    log::info!("Packaging {} files into {}", files.len(), archive.display());

    let encoder = GzEncoder::new(File::create(&archive)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for relative in &files {
        builder.append_path_with_name(source_dir.join(relative), relative)?;
    }
    builder.into_inner()?.finish()?;

    let digest = sha256_file(&archive)?;
    let cksum = output_dir.join(format!("{}.cksum", name));
    std::fs::write(&cksum, format!("{}  {}\n", digest, archive_name))?;

    Ok(PackagedProduct { archive, cksum, digest })
}

fn file_name(path: &Path) -> EspaResult<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EspaError::Distribution(format!("Invalid file name {}", path.display())))
}

fn deliver_local(package: &PackagedProduct, destination: &Path) -> EspaResult<ProductLocation> {
    std::fs::create_dir_all(destination)?;

    let product_file = destination.join(file_name(&package.archive)?);
    let cksum_file = destination.join(file_name(&package.cksum)?);
    std::fs::copy(&package.archive, &product_file)?;
    std::fs::copy(&package.cksum, &cksum_file)?;

    let delivered = sha256_file(&product_file)?;
    if delivered != package.digest {
        return Err(EspaError::Distribution(format!(
            "Checksum mismatch for {}: expected {} got {}",
            product_file.display(),
            package.digest,
            delivered
        )));
    }

    Ok(ProductLocation { product_file, cksum_file })
}

fn ssh(host: &str, remote_command: String) -> ExternalCommand {
    ExternalCommand::new("ssh")
        .args(["-q", "-o", "StrictHostKeyChecking=no", host])
        .arg(remote_command)
}

fn scp(source: &Path, host: &str, destination: &Path) -> ExternalCommand {
    ExternalCommand::new("scp")
        .args(["-q", "-o", "StrictHostKeyChecking=no"])
        .arg(source.display().to_string())
        .arg(format!("{}:{}", host, destination.display()))
}

fn deliver_remote(package: &PackagedProduct, host: &str, destination: &Path) -> EspaResult<ProductLocation> {
    command::run(&ssh(host, format!("mkdir -p {}", destination.display())), None)?;

    let product_file = destination.join(file_name(&package.archive)?);
    let cksum_file = destination.join(file_name(&package.cksum)?);
    command::run(&scp(&package.archive, host, &product_file), None)?;
    command::run(&scp(&package.cksum, host, &cksum_file), None)?;

    let output = command::run(&ssh(host, format!("sha256sum {}", product_file.display())), None)?;
    let delivered = output.split_whitespace().next().unwrap_or_default();
    if delivered != package.digest {
        return Err(EspaError::Distribution(format!(
            "Checksum mismatch for {}:{}: expected {} got [{}]",
            host,
            product_file.display(),
            package.digest,
            delivered
        )));
    }

    Ok(ProductLocation { product_file, cksum_file })
}

/// Deliver a packaged product to `<distribution_dir>/orders/<order_id>`
pub fn deliver(
    config: &ProcessingConfig,
    order_id: &str,
    package: &PackagedProduct,
) -> EspaResult<ProductLocation> {
    let destination = config.order_dir(order_id);
    log::info!("Distributing {} to {}", package.archive.display(), destination.display());

    let retry = &config.retry;
    match config.processing.distribution_method {
        DistributionMethod::Local => with_retries("Distribution", retry.max_distribution_attempts, retry, || {
            deliver_local(package, &destination)
        }),
        DistributionMethod::Remote => {
            let host = config.processing.distribution_host.as_deref().ok_or_else(|| {
                EspaError::Config("distribution_host is required for remote distribution".to_string())
            })?;
            with_retries("Distribution", retry.max_distribution_attempts, retry, || {
                deliver_remote(package, host, &destination)
            })
        }
    }
}

/// Copy the `.stats` files of a product to the order statistics directory
///
/// # Returns
/// * Number of files delivered
pub fn deliver_statistics(config: &ProcessingConfig, order_id: &str, stats_dir: &Path) -> EspaResult<usize> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(stats_dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("stats"))
        .collect();
    files.sort();

    let destination = config.order_stats_dir(order_id);
    log::info!("Delivering {} statistics files to {}", files.len(), destination.display());

    let retry = &config.retry;
    with_retries("Statistics distribution", retry.max_distribution_attempts, retry, || {
        match config.processing.distribution_method {
            DistributionMethod::Local => {
                std::fs::create_dir_all(&destination)?;
                for file in &files {
                    std::fs::copy(file, destination.join(file_name(file)?))?;
                }
            }
            DistributionMethod::Remote => {
                let host = config.processing.distribution_host.as_deref().unwrap_or_default();
                command::run(&ssh(host, format!("mkdir -p {}", destination.display())), None)?;
                for file in &files {
                    command::run(&scp(file, host, &destination.join(file_name(file)?)), None)?;
                }
            }
        }
        Ok(())
    })?;

    Ok(files.len())
}
