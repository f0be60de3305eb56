//! mch-certs: downloads the platform certificates for a merchant account.
//!
//! Loads a client config, runs the certificate bootstrap (download, AES-GCM
//! decrypt, X.509 parse, serial check) and writes each certificate as
//! `<output-dir>/<serial>.pem`. The API v3 key is read from the environment
//! variable named in the config.
//!
//! ```text
//! MCH_API_V3_KEY=... mch-certs --config mch.toml --output-dir ./certs
//! ```

#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependency version conflicts from reqwest and RustCrypto"
)]

mod observability;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use mch_guard::{MerchantClient, certs::PlatformCertificate, config::ClientConfig};
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::observability::{LogFormat, init_observability};

/// Download, decrypt and save platform certificates.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Client configuration file (TOML).
    #[arg(short, long, default_value = "mch.toml")]
    config: PathBuf,

    /// Directory the PEM files are written to. Created if missing.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Overall deadline for the download, in seconds.
    #[arg(long, default_value_t = 30)]
    deadline_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_observability(LogFormat::from_env());
    let args = Args::parse();

    let config = ClientConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let client = MerchantClient::from_config(config).context("building merchant client")?;

    let deadline = Instant::now() + Duration::from_secs(args.deadline_secs);
    client.refresh_certificates(Some(deadline)).await.context("downloading certificates")?;

    let snapshot = client.certificates();
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    for certificate in snapshot.iter() {
        let path = write_certificate(&args.output_dir, certificate)?;
        println!("{}", path.display());
    }
    info!(count = snapshot.len(), "certificates saved");
    Ok(())
}

#[instrument(skip_all, fields(serial = certificate.serial_no()))]
fn write_certificate(dir: &Path, certificate: &PlatformCertificate) -> Result<PathBuf> {
    let path = dir.join(format!("{}.pem", certificate.serial_no()));
    fs::write(&path, certificate.pem()).with_context(|| format!("writing {}", path.display()))?;
    info!(
        path = %path.display(),
        effective_time = %certificate.effective_time(),
        expire_time = %certificate.expire_time(),
        "certificate written"
    );
    Ok(path)
}
