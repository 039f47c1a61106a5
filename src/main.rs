use std::sync::atomic::Ordering;

use inbox_sentry::config::Config;
use inbox_sentry::cycle;
use inbox_sentry::mailbox::ImapSession;
use inbox_sentry::responder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  Set EMAIL_ADDRESS and EMAIL_PASSWORD (app password) in the");
            eprintln!("  environment or a .env file.");
            std::process::exit(1);
        }
    };

    eprintln!("📬 Inbox Sentry v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: {}", config.address);
    eprintln!("   IMAP: {}:{}", config.imap_host, config.imap_port);
    eprintln!("   SMTP: {}:{}", config.smtp_host, config.smtp_port);
    eprintln!("   Keywords: {}", config.keywords.join(", "));
    eprintln!("   Poll interval: {}s\n", config.poll_interval_secs);

    // Verify both sessions before entering the schedule; a bad password
    // should fail the process, not every future cycle.
    if let Err(e) = verify_credentials(&config).await {
        eprintln!("Error: startup credential check failed: {e}");
        std::process::exit(1);
    }
    tracing::info!("Credential check passed");

    let (_poll_handle, shutdown) = cycle::spawn_poll_loop(config);

    tokio::signal::ctrl_c().await?;
    shutdown.store(true, Ordering::Relaxed);
    tracing::info!("Inbox Sentry stopped");

    Ok(())
}

/// Open and close an IMAP session and test the SMTP connection.
async fn verify_credentials(config: &Config) -> anyhow::Result<()> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let session = ImapSession::connect(&config)?;
        session.logout();
        responder::verify_smtp(&config)?;
        Ok(())
    })
    .await?
}
