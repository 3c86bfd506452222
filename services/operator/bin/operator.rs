//! Main Entrypoint for the Operator Console
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Opening the operator's session channel and REST client.
//! 3. Running the session controller.
//! 4. Reading console lines until `quit`, end of input or Ctrl+C.

use anyhow::Context;
use clap::Parser;
use sticktator_core::{
    dispatcher::CommandDispatcher,
    identity::OperatorIdentity,
    report::ReportFinalizer,
    services::CommandSink,
    transcript::SpeechCapability,
};
use sticktator_operator::{
    backend::HttpBackend,
    channel::{ChannelCommandSink, SessionChannel},
    config::{Config, DispatchMode},
    console::{self, Console, Input},
    controller::{Controller, OperatorAction, SessionSnapshot},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, watch},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Drive machines by voice command from a terminal")]
struct Cli {
    /// Backend host[:port], overrides BACKEND_HOST.
    #[arg(long)]
    host: Option<String>,
    /// Operator email, overrides OPERATOR_EMAIL.
    #[arg(long)]
    email: Option<String>,
    /// Command transport, `rest` or `channel`; overrides DISPATCH_MODE.
    #[arg(long)]
    mode: Option<DispatchMode>,
    /// Machine to target initially, overrides DEFAULT_MACHINE.
    #[arg(long)]
    machine: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(host) = &self.host {
            overrides.push(("BACKEND_HOST", host.clone()));
        }
        if let Some(email) = &self.email {
            overrides.push(("OPERATOR_EMAIL", email.clone()));
        }
        if let Some(mode) = self.mode {
            let mode = match mode {
                DispatchMode::Rest => "rest",
                DispatchMode::Channel => "channel",
            };
            overrides.push(("DISPATCH_MODE", mode.to_string()));
        }
        if let Some(machine) = &self.machine {
            overrides.push(("DEFAULT_MACHINE", machine.clone()));
        }
        overrides
    }
}

/// Prints what changed every time the controller publishes.
async fn print_snapshots(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut prev: Option<SessionSnapshot> = None;
    loop {
        let next = snapshots.borrow_and_update().clone();
        for line in console::render(prev.as_ref(), &next) {
            println!("{}", line);
        }
        prev = Some(next);
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

async fn list_reports(finalizer: &ReportFinalizer, operator: &OperatorIdentity) {
    match finalizer.history(operator).await {
        Ok(reports) if reports.is_empty() => println!("[reports] none"),
        Ok(reports) => {
            for report in reports {
                println!(
                    "[reports] {}  {}  {}  {}",
                    report.id,
                    report.created_at.format("%Y-%m-%d %H:%M"),
                    report.machine_name,
                    report.description
                );
            }
        }
        Err(e) => println!("[error] {}", e),
    }
}

async fn show_report(finalizer: &ReportFinalizer, operator: &OperatorIdentity, id: &str) {
    match finalizer.detail(operator, id).await {
        Ok(report) => {
            println!("[report] {} on {}", id, report.machine_name);
            println!("  created  {}", report.created_at.to_rfc3339());
            if !report.description.is_empty() {
                println!("  summary  {}", report.description);
            }
            println!("  markdown {}", report.markdown_report_s3_url);
        }
        Err(e) => println!("[error] {}", e),
    }
}

/// Reads console lines and forwards them until the operator leaves.
async fn run_console(
    actions: mpsc::Sender<OperatorAction>,
    finalizer: ReportFinalizer,
    operator: OperatorIdentity,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console = Console::default();
    println!("{}", console::HELP);

    while let Some(line) = lines.next_line().await? {
        match console.interpret(&line) {
            Input::Act(steps) => {
                for step in steps {
                    actions
                        .send(step)
                        .await
                        .context("Session controller stopped")?;
                }
            }
            Input::ListReports => list_reports(&finalizer, &operator).await,
            Input::ShowReport(id) => show_report(&finalizer, &operator, &id).await,
            Input::Help => println!("{}", console::HELP),
            Input::Quit => break,
            Input::Nothing => {}
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let config =
        Config::from_env_with(&cli.overrides()).context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let operator = OperatorIdentity::from_email(&config.operator_email)
        .context("OPERATOR_EMAIL is not usable")?;
    info!(operator = %operator.id, "Configuration loaded. Connecting...");

    // --- 3. Initialize Shared Services ---
    let backend = Arc::new(HttpBackend::new(&config.api_base())?);
    let (channel, events) = SessionChannel::open(
        config.channel_url(&operator.id),
        &operator,
        config.reconnect_delay,
    );
    let sink: Arc<dyn CommandSink> = match config.dispatch_mode {
        DispatchMode::Rest => backend.clone(),
        DispatchMode::Channel => Arc::new(ChannelCommandSink::new(channel.sender())),
    };
    let dispatcher = CommandDispatcher::new(backend.clone(), sink);
    let finalizer = ReportFinalizer::new(backend);

    // --- 4. Start the Session ---
    let (controller, completions) = Controller::new(
        operator.clone(),
        SpeechCapability::Available,
        channel,
        dispatcher,
        finalizer.clone(),
    );
    let controller = controller.with_target(config.default_machine.clone());
    let printer = tokio::spawn(print_snapshots(controller.subscribe()));
    let (actions_tx, actions_rx) = mpsc::channel(32);
    let session = tokio::spawn(controller.run(events, actions_rx, completions));
    info!(
        mode = ?config.dispatch_mode,
        host = %config.backend_host,
        "Session started"
    );

    // --- 5. Console Loop ---
    tokio::select! {
        result = run_console(actions_tx.clone(), finalizer, operator) => {
            if let Err(e) = result {
                warn!(error = ?e, "Console stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal."),
    }

    let _ = actions_tx.send(OperatorAction::Shutdown).await;
    session.await.context("Session controller panicked")?;
    printer.abort();
    info!("Operator session has shut down.");
    Ok(())
}
