use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dev_phone::api;
use dev_phone::config::{self, Profile};
use dev_phone::lifecycle::{self, Controller};
use dev_phone::provisioner::TeardownReport;
use dev_phone::remote::{Endpoints, HttpTelephonyApi, TelephonyApi};
use dev_phone_core::Session;

#[derive(Parser)]
#[command(name = "dev-phone")]
#[command(about = "A throwaway phone for testing calls and SMS against your own account")]
struct Cli {
    /// Port for the local UI and API (default: $DEV_PHONE_PORT or 1337)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Phone number to bind to this session, in E.164 format
    #[arg(long)]
    phone_number: Option<String>,

    /// Overwrite webhooks already configured on the phone number
    #[arg(long)]
    force: bool,

    /// Remove resources left behind by every dev-phone session before starting
    #[arg(long)]
    clear: bool,

    /// Do not ask for confirmation before --clear
    #[arg(short, long)]
    yes: bool,

    /// Reuse a session name (dev-phone-<12 hex>) so leftovers from a crashed run are replaced
    #[arg(long)]
    session_name: Option<String>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "dev_phone=info,tower_http=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn confirm_clear() -> anyhow::Result<bool> {
    let answer = tokio::task::spawn_blocking(|| -> std::io::Result<String> {
        print!("Remove every dev-phone resource on this account, including other running sessions? [y/N] ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await??;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn log_report(what: &str, report: &TeardownReport) {
    if report.is_clean() {
        tracing::info!(
            removed = report.removed.len(),
            numbers_reset = report.numbers_reset.len(),
            "{} complete",
            what
        );
    } else {
        for (kind, remote_id, error) in &report.failed {
            tracing::warn!(%kind, remote_id, error, "Could not remove resource");
        }
        for (phone_number, error) in &report.numbers_failed {
            tracing::warn!(phone_number, error, "Could not reset webhooks");
        }
        tracing::warn!(
            removed = report.removed.len(),
            failed = report.failed.len() + report.numbers_failed.len(),
            "{} finished with failures; rerun with --clear to retry",
            what
        );
    }
}

async fn drain(controller: &Controller) {
    if let Some(report) = controller.drain().await {
        log_report("Teardown", &report);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let profile = Profile::load()?;
    let api: Arc<dyn TelephonyApi> = Arc::new(HttpTelephonyApi::new(
        &profile,
        Endpoints::default(),
        config::request_timeout(),
    )?);
    let session = match cli.session_name {
        Some(name) => Session::with_name(name)?,
        None => Session::generate(),
    };
    tracing::info!(session = %session, account = %api.account_sid(), "Starting dev phone");
    let controller = Arc::new(Controller::new(api, profile, session, cli.force));

    let shutdown = CancellationToken::new();
    lifecycle::watch_signals(shutdown.clone());

    if cli.clear {
        if cli.yes || confirm_clear().await? {
            let report = controller.clear_all().await?;
            log_report("Clear", &report);
        } else {
            tracing::info!("Skipping clear");
        }
    }

    let started = controller
        .start_unless_cancelled(cli.phone_number.as_deref(), &shutdown)
        .await
        .with_context(|| {
            let session = controller.session();
            format!(
                "session {session} failed to provision; rerun with --session-name {session} or --clear to remove what it created"
            )
        })?;
    if !started {
        return Ok(());
    }
    if shutdown.is_cancelled() {
        drain(&controller).await;
        return Ok(());
    }

    let port = config::resolve_port(cli.port, std::env::var("DEV_PHONE_PORT").ok().as_deref());
    let listener = match tokio::net::TcpListener::bind((cli.host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(port, error = %e, "Could not listen; tearing down");
            drain(&controller).await;
            return Err(e.into());
        }
    };
    controller.mark_serving()?;
    tracing::info!("Dev phone ready at http://{}:{}", cli.host, port);

    let served = axum::serve(listener, api::create_router(controller.clone()))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    drain(&controller).await;
    served?;
    Ok(())
}
