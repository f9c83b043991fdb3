//! `netprobe`: performs one named backend call and prints the normalised response.
//!
//! Startup sequence:
//! 1. Load and validate [`ClientConfig`] from environment variables.
//! 2. Initialise structured JSON logging.
//! 3. Wire the network core with an in-memory session and a UI event log.
//! 4. Seed the connectivity flag from the reachability probe, if configured.
//! 5. Perform the call and print the response as JSON on stdout.

mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use netcore::{
    poll_task, ApiRequest, Attachment, ClientConfig, Collaborators, ConnectivityMonitor, ConnectivityProvider,
    MemoryAuthStore, NetworkManager, TcpProbe, UiEvent, UiEventChannel,
};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "netprobe", version, about = "Perform one encrypted backend call")]
struct Cli {
    /// Operation name, e.g. PRIVACY_POLICY or LOGIN
    operation: String,

    /// Query parameters as a JSON object
    #[arg(long, default_value = "{}")]
    params: String,

    /// Body fields as a JSON object
    #[arg(long, default_value = "{}")]
    body: String,

    /// Access token; the call runs inside an authenticated session when set
    #[arg(long, env = "NETPROBE_TOKEN")]
    token: Option<String>,

    /// File part as FIELD=PATH (repeatable, upload endpoints only)
    #[arg(long = "attach", value_parser = parse_attachment)]
    attachments: Vec<(String, PathBuf)>,

    /// Suppress error toasts
    #[arg(long)]
    skip_toast: bool,

    /// Suppress the error overlay
    #[arg(long)]
    skip_error_screen: bool,
}

fn parse_attachment(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((field, path)) if !field.is_empty() && !path.is_empty() => Ok((field.to_owned(), PathBuf::from(path))),
        _ => Err(format!("expected FIELD=PATH, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = ClientConfig::from_env().map_err(|e| {
        eprintln!("ERROR: netprobe configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;
    info!(version = env!("CARGO_PKG_VERSION"), operation = %cli.operation, "netprobe starting");

    // -----------------------------------------------------------------------
    // 3. Collaborators
    // -----------------------------------------------------------------------
    let auth = MemoryAuthStore::new();
    if let Some(token) = &cli.token {
        auth.login(token.clone(), None);
    }
    let (ui, events) = UiEventChannel::new();
    let ui_log = tokio::spawn(log_ui_events(events));
    let connectivity = ConnectivityMonitor::default();

    // -----------------------------------------------------------------------
    // 4. Reachability
    // -----------------------------------------------------------------------
    let _probe = match &cfg.reachability_probe_addr {
        Some(addr) => {
            let probe = TcpProbe::new(addr.clone(), PROBE_TIMEOUT);
            connectivity.set_online(probe.check().await);
            Some(poll_task(probe, connectivity.clone(), cfg.reachability_interval()))
        }
        None => None,
    };

    let manager = NetworkManager::from_config(
        &cfg,
        Collaborators {
            auth: Arc::new(auth),
            toasts: Arc::new(ui.clone()),
            overlay: Arc::new(ui),
            connectivity,
        },
    )
    .context("failed to build network manager")?;

    // -----------------------------------------------------------------------
    // 5. Call
    // -----------------------------------------------------------------------
    let mut request = ApiRequest::new(cli.operation)
        .params(parse_object(&cli.params, "--params")?)
        .body(parse_object(&cli.body, "--body")?);
    for (field, path) in cli.attachments {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read attachment {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| field.clone());
        request = request.attach(Attachment::new(field, file_name, bytes));
    }
    if cli.skip_toast {
        request = request.skip_toast();
    }
    if cli.skip_error_screen {
        request = request.skip_error_screen();
    }

    let response = manager.call(request).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("failed to serialise response")?
    );

    // Closing the last sender ends the event log.
    drop(manager);
    if let Err(e) = ui_log.await {
        warn!(error = %e, "ui event log task failed");
    }

    Ok(if response.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn parse_object(raw: &str, flag: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))?;
    if !value.is_object() {
        anyhow::bail!("{flag} must be a JSON object");
    }
    Ok(value)
}

async fn log_ui_events(mut events: UnboundedReceiver<UiEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UiEvent::Toast(toast) => info!(kind = ?toast.kind, title = %toast.title, message = %toast.message, "toast"),
            UiEvent::ShowOverlay(overlay) => warn!(
                title = %overlay.title,
                retryable = overlay.retry_envelope.is_some(),
                "error overlay shown"
            ),
            UiEvent::HideOverlay => debug!("error overlay hidden"),
        }
    }
}
