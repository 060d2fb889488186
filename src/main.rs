use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use lettermill::backend::memory::MemoryBackend;
use lettermill::{ImapConfig, ImapServer};
use log::info;
use tokio::sync::watch;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// An IMAP4rev1 server backed by an in-memory mail store.
#[derive(Debug, Parser)]
#[command(name = "lettermill", version, about)]
struct Args {
    /// Interface to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 1143)]
    port: u16,

    /// PEM certificate chain for STARTTLS.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key for STARTTLS.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Allow plaintext login without TLS.
    #[arg(long)]
    insecure_login: bool,

    /// Consecutive BAD responses before disconnecting a client.
    #[arg(long, default_value_t = 5)]
    bad_command_limit: u32,

    /// Seed the demo user and mailbox data.
    #[arg(long)]
    demo_data: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let tls = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => Some(load_tls(cert, key)?),
        _ => None,
    };

    let backend = if args.demo_data {
        MemoryBackend::with_demo_data()
    } else {
        MemoryBackend::new()
    };

    let config = ImapConfig {
        host: args.host,
        port: args.port,
        insecure_login: args.insecure_login,
        bad_command_limit: Some(args.bad_command_limit),
        ..ImapConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    ImapServer::new(backend, config, tls)
        .serve(shutdown_rx)
        .await
        .context("server failed")?;
    Ok(())
}

fn load_tls(cert: &PathBuf, key: &PathBuf) -> anyhow::Result<TlsAcceptor> {
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert).with_context(|| format!("opening {}", cert.display()))?,
    ))
    .collect::<Result<_, _>>()
    .context("reading certificate chain")?;
    if certs.is_empty() {
        bail!("no certificates found in {}", cert.display());
    }
    let key: PrivateKeyDer = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key).with_context(|| format!("opening {}", key.display()))?,
    ))
    .context("reading private key")?
    .context("no private key found")?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS config")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
