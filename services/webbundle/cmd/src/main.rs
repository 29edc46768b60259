//! Web Bundle command-line tool.
//!
//! Inspects bundles, signs their exchanges with a certificate chain, checks
//! those signatures, and adds or verifies integrity-block signatures.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;
use webbundle_integrity::{
    obtain_integrity_block, verify_signed_bundle, web_bundle_id, IntegrityBlockSigner,
};
use webbundle_signing::{CertChain, PrivateKey, Signer, Verifier};
use webbundle_wire::{Bundle, BundleReader};

mod config;
mod logging;

use config::SignerConfig;
use logging::BundleLogFormatter;

/// Inspect, sign and verify Web Bundles
#[derive(Parser, Debug)]
#[command(name = "webbundle", version, about = "Inspect, sign and verify Web Bundles")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the version, URLs and exchanges of a bundle
    Dump {
        /// Bundle file, optionally prefixed by an integrity block
        bundle: PathBuf,
    },

    /// Add payload integrity and sign every exchange the certificate covers
    Sign {
        /// Input bundle
        bundle: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Signer configuration file (YAML, `signer` section)
        #[arg(long)]
        config: Option<PathBuf>,

        /// PEM certificate chain, leaf first
        #[arg(long)]
        cert: Option<PathBuf>,

        /// PEM private key of the leaf certificate
        #[arg(long)]
        key: Option<PathBuf>,

        /// DER OCSP response for the leaf certificate
        #[arg(long)]
        ocsp: Option<PathBuf>,

        /// SCT list for the leaf certificate
        #[arg(long)]
        sct: Option<PathBuf>,

        /// URL where updated signatures can be fetched
        #[arg(long)]
        validity_url: Option<Url>,

        /// Signing time (RFC 3339), defaults to now
        #[arg(long)]
        date: Option<DateTime<Utc>>,

        /// Signature lifetime, e.g. 1day (at most 7days)
        #[arg(long)]
        expiry: Option<humantime::Duration>,

        /// MICE record size in bytes
        #[arg(long)]
        record_size: Option<usize>,
    },

    /// Verify the signatures of a bundle
    Verify {
        /// Bundle file, optionally prefixed by an integrity block
        bundle: PathBuf,

        /// Verification time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Prepend an integrity-block signature
    SignIntegrity {
        /// Input bundle
        bundle: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Ed25519 PKCS#8 PEM private key
        #[arg(long)]
        key: PathBuf,
    },

    /// Print the Web Bundle ID of an Ed25519 key
    WebBundleId {
        /// Ed25519 PKCS#8 PEM private key
        #[arg(long)]
        key: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("webbundle={}", args.log_level).parse()?)
        .add_directive(format!("webbundle_wire={}", args.log_level).parse()?)
        .add_directive(format!("webbundle_signing={}", args.log_level).parse()?)
        .add_directive(format!("webbundle_integrity={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(BundleLogFormatter::new("webbundle".to_string()))
        .init();

    match args.command {
        Command::Dump { bundle } => dump(&bundle),
        Command::Sign {
            bundle,
            output,
            config,
            cert,
            key,
            ocsp,
            sct,
            validity_url,
            date,
            expiry,
            record_size,
        } => {
            let mut signer_config = match config {
                Some(path) => SignerConfig::load_from_file(path)?,
                None => SignerConfig::from_environment(),
            };
            // Flags override the file and the environment
            if cert.is_some() {
                signer_config.cert_file = cert;
            }
            if key.is_some() {
                signer_config.key_file = key;
            }
            if ocsp.is_some() {
                signer_config.ocsp_file = ocsp;
            }
            if sct.is_some() {
                signer_config.sct_file = sct;
            }
            if let Some(url) = validity_url {
                signer_config.validity_url = Some(url.to_string());
            }
            if let Some(expiry) = expiry {
                signer_config.expiry = expiry.to_string();
            }
            if let Some(size) = record_size {
                signer_config.record_size = size;
            }
            sign(&bundle, &output, &signer_config, date.unwrap_or_else(Utc::now))
        }
        Command::Verify { bundle, at } => verify(&bundle, at.unwrap_or_else(Utc::now)),
        Command::SignIntegrity {
            bundle,
            output,
            key,
        } => sign_integrity(&bundle, &output, &key),
        Command::WebBundleId { key } => {
            let signer = load_integrity_signer(&key)?;
            println!("{}", signer.web_bundle_id());
            Ok(())
        }
    }
}

fn read_bytes(path: &Path) -> Result<Bytes> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Bytes::from(data))
}

fn read_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn required<'a>(value: &'a Option<PathBuf>, what: &str) -> Result<&'a Path> {
    match value {
        Some(path) => Ok(path),
        None => bail!("missing {what}: pass it as a flag, in the config file or the environment"),
    }
}

/// Bundle bytes after a leading integrity block, if any
fn strip_integrity_block(input: &Bytes) -> Result<Bytes> {
    let (block, offset) = obtain_integrity_block(input)?;
    if offset > 0 {
        debug!(
            signatures = block.signature_stack.len(),
            "skipping integrity block"
        );
    }
    Ok(input.slice(offset..))
}

fn dump(path: &Path) -> Result<()> {
    let input = read_bytes(path)?;
    let (block, offset) = obtain_integrity_block(&input)?;
    let bundle = Bundle::decode(input.slice(offset..))
        .with_context(|| format!("failed to decode {}", path.display()))?;

    println!("version: {}", bundle.version);
    if let Some(url) = &bundle.primary_url {
        println!("primary url: {url}");
    }
    if let Some(url) = &bundle.manifest_url {
        println!("manifest url: {url}");
    }
    if !block.signature_stack.is_empty() {
        println!("integrity signatures: {}", block.signature_stack.len());
    }
    if let Some(signatures) = &bundle.signatures {
        println!(
            "signatures: {} authorities, {} vouched subsets",
            signatures.authorities.len(),
            signatures.vouched_subsets.len()
        );
    }
    println!("exchanges: {}", bundle.exchanges.len());
    for exchange in &bundle.exchanges {
        let content_type = exchange
            .response
            .headers
            .get("content-type")
            .unwrap_or_default();
        println!(
            "  {} {} {} bytes {}",
            exchange.response.status,
            exchange.request.url,
            exchange.response.body.len(),
            content_type
        );
    }
    Ok(())
}

fn sign(input: &Path, output: &Path, config: &SignerConfig, date: DateTime<Utc>) -> Result<()> {
    let mut bundle = Bundle::decode(read_bytes(input)?)
        .with_context(|| format!("failed to decode {}", input.display()))?;

    let ocsp = config.ocsp_file.as_deref().map(read_bytes).transpose()?;
    let sct = config.sct_file.as_deref().map(read_bytes).transpose()?;
    let chain = CertChain::from_pem(
        &read_string(required(&config.cert_file, "certificate")?)?,
        ocsp,
        sct,
    )?;
    let key = PrivateKey::from_pem(&read_string(required(&config.key_file, "private key")?)?)?;
    let validity_url = match &config.validity_url {
        Some(url) => Url::parse(url).with_context(|| format!("invalid validity url {url:?}"))?,
        None => bail!("missing validity url"),
    };

    let mut signer = Signer::new(
        bundle.version,
        chain,
        key,
        validity_url,
        date,
        config.expiry()?,
    )?;
    let signed = signer.sign_bundle(&mut bundle, config.record_size, &mut rand::rngs::OsRng)?;
    if signed == 0 {
        warn!("certificate does not cover any exchange in the bundle");
    }

    let mut out = BufWriter::new(
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?,
    );
    let written = bundle.write_to(&mut out)?;
    out.flush()
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        exchanges = signed,
        bytes = written,
        "wrote signed bundle to {}",
        output.display()
    );
    Ok(())
}

fn verify(path: &Path, at: DateTime<Utc>) -> Result<()> {
    let input = read_bytes(path)?;
    for key in verify_signed_bundle(&input)? {
        println!("integrity signature ok: {}", web_bundle_id(&key));
    }

    let reader = BundleReader::new(strip_integrity_block(&input)?)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let Some(signatures) = reader.signatures() else {
        println!("bundle has no signatures section");
        return Ok(());
    };

    let verifier = Verifier::new(signatures, at, reader.version())?;
    for rejected in verifier.rejected() {
        println!("vouched subset {} rejected: {}", rejected.index, rejected.reason);
    }

    let mut failures = 0;
    for exchange in reader.exchanges() {
        let exchange = exchange.with_context(|| format!("failed to decode {}", path.display()))?;
        let url = &exchange.request.url;
        match verifier.verify_exchange(&exchange) {
            Ok(Some(verified)) => println!("ok        {url} ({} bytes)", verified.payload.len()),
            Ok(None) => println!("unsigned  {url}"),
            Err(e) => {
                failures += 1;
                println!("FAILED    {url}: {e}");
            }
        }
    }
    if failures > 0 {
        bail!("{failures} exchange(s) failed verification");
    }
    Ok(())
}

fn load_integrity_signer(key: &Path) -> Result<IntegrityBlockSigner> {
    IntegrityBlockSigner::from_pem(&read_string(key)?)
        .with_context(|| format!("failed to load integrity key {}", key.display()))
}

fn sign_integrity(input: &Path, output: &Path, key: &Path) -> Result<()> {
    let signer = load_integrity_signer(key)?;
    let signed = signer.sign(read_bytes(input)?)?;
    std::fs::write(output, &signed)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        web_bundle_id = %signer.web_bundle_id(),
        "wrote integrity-signed bundle to {}",
        output.display()
    );
    println!("{}", signer.web_bundle_id());
    Ok(())
}
