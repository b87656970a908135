//! BB84 command line driver.
//!
//! # Usage
//!
//! ```bash
//! # One run against a local engine, 20 qubits, 30% interception
//! bb84 --particles 20 --eve-prob 0.3
//!
//! # Run, then encrypt and decrypt a message with the sifted key
//! bb84 --backend http://engine:5000 --message "hello" --pace-ms 5
//! ```

use std::{sync::Arc, time::Duration};

use bb84_core::{
    GateDecision, MessageAction, MessageId, MessageStage, RunSummary, SecurityGate,
    SessionAction, SessionConfig, insights,
};
use bb84_proto::Bit;
use bb84_runtime::{
    HttpBackend, HttpBackendConfig, Runtime, RuntimeConfig, RuntimeHandle, RuntimeNotice,
    SystemEnv,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// BB84 key exchange driver
#[derive(Parser, Debug)]
#[command(name = "bb84")]
#[command(about = "Run a BB84 key exchange and optionally send a secure message")]
#[command(version)]
struct Args {
    /// Engine base URL
    #[arg(short, long, default_value = "http://localhost:5000")]
    backend: String,

    /// Number of qubits to exchange
    #[arg(short = 'n', long, default_value = "10")]
    particles: u32,

    /// Probability that the eavesdropper intercepts each qubit
    #[arg(long, default_value = "0.3")]
    eve_prob: f64,

    /// Playback pace unit in milliseconds; each record is shown for 30 units
    #[arg(long, default_value = "150")]
    pace_ms: u64,

    /// Run on real quantum hardware instead of the simulator
    #[arg(long)]
    hardware: bool,

    /// Message to encrypt and decrypt once the key is ready
    #[arg(short, long)]
    message: Option<String>,

    /// Interception percentage above which crypto is refused
    #[arg(long, default_value = "20")]
    threshold: f64,

    /// Engine request timeout in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let backend = Arc::new(HttpBackend::new(HttpBackendConfig {
        base_url: args.backend.clone(),
        timeout: Duration::from_secs(args.timeout_secs),
        ..HttpBackendConfig::default()
    })?);

    let mut config = RuntimeConfig::default();
    config.controller.gate = SecurityGate::with_threshold(args.threshold);

    let (runtime, handle, mut notices) =
        Runtime::new(SystemEnv::new(), Arc::clone(&backend), backend, config);
    let task = tokio::spawn(runtime.run());

    let session = SessionConfig {
        particle_count: args.particles,
        interception_probability: args.eve_prob,
        pace: Duration::from_millis(args.pace_ms),
        hardware_mode: args.hardware,
    };
    let generation = handle.start_run(session).await?;
    tracing::info!(%generation, backend = %args.backend, "run started");

    let outcome = tokio::select! {
        outcome = follow(&handle, &mut notices, args.message.as_deref()) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, cancelling run");
            handle.cancel_run().await?;
            Ok(())
        },
    };

    handle.shutdown().await;
    task.await?;
    outcome
}

/// Log notices until the run (and the optional message) settles.
async fn follow(
    handle: &RuntimeHandle,
    notices: &mut mpsc::UnboundedReceiver<RuntimeNotice>,
    message: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pending: Option<MessageId> = None;

    while let Some(notice) = notices.recv().await {
        match notice {
            RuntimeNotice::Session(SessionAction::RecordAppended {
                index, record, metric, ..
            }) => {
                tracing::info!(
                    "#{:<3} sender {} {}  receiver {} {}  interceptor {}  qber {:.2}%",
                    index + 1,
                    record.sender_basis().symbol(),
                    record.sender_bit(),
                    record.receiver_basis().symbol(),
                    record.receiver_bit(),
                    record.interceptor_bit().map_or_else(|| "-".to_string(), |b| b.to_string()),
                    metric,
                );
                for insight in insights(&record) {
                    tracing::debug!("  {}", insight);
                }
            },
            RuntimeNotice::Session(SessionAction::InterceptionSignal { active: true, .. }) => {
                tracing::info!("eavesdropper measuring");
            },
            RuntimeNotice::Session(SessionAction::RunFailed { error, .. }) => {
                tracing::error!("run failed: {}", error);
                return Err(error.into());
            },
            RuntimeNotice::Session(SessionAction::RunCompleted { summary, .. }) => {
                report(&summary);
                let Some(text) = message else {
                    return Ok(());
                };
                match summary.gate {
                    GateDecision::Allowed => {
                        let id = handle.send_message(text).await?;
                        tracing::info!(%id, "message sent");
                        pending = Some(id);
                    },
                    GateDecision::Denied(reason) => {
                        tracing::warn!("message not sent: {}", reason);
                        return Ok(());
                    },
                }
            },
            RuntimeNotice::Message(MessageAction::StageChanged { id, stage })
                if pending == Some(id) =>
            {
                match stage {
                    MessageStage::Pending => {},
                    MessageStage::Encrypted => tracing::info!(%id, "message encrypted"),
                    MessageStage::Delivered | MessageStage::Failed => {
                        let snapshot = handle.snapshot().await?;
                        let record = snapshot.messages.iter().find(|m| m.id() == id);
                        if let Some(text) = record.and_then(|m| m.decrypted_text()) {
                            tracing::info!(%id, "decrypted: {}", text);
                        }
                        if let Some(failure) = record.and_then(|m| m.failure()) {
                            tracing::error!(%id, "message failed: {}", failure);
                            return Err(failure.clone().into());
                        }
                        return Ok(());
                    },
                }
            },
            RuntimeNotice::Stopped => break,
            RuntimeNotice::Session(_) | RuntimeNotice::Message(_) => {},
        }
    }

    Ok(())
}

fn report(summary: &RunSummary) {
    tracing::info!("records played: {}", summary.record_count);
    tracing::info!("qber: {:.2}%", summary.metric);
    tracing::info!("observed bit mismatch: {:.2}%", summary.mismatch_percent);
    tracing::info!("sifted key ({} bits): {}", summary.sifted_key.len(), bits(&summary.sifted_key));
    tracing::info!(
        "eavesdropper key ({} bits): {}",
        summary.interceptor_key.len(),
        bits(&summary.interceptor_key)
    );
    match summary.gate {
        GateDecision::Allowed => tracing::info!("low error rate, channel is secure"),
        GateDecision::Denied(reason) => tracing::warn!("crypto refused: {}", reason),
    }
}

fn bits(key: &[Bit]) -> String {
    key.iter().map(ToString::to_string).collect()
}
