//! mqtt-session - Main Entry Point
//!
//! Runs a reconnecting MQTT session from a TOML configuration file.

use bytes::Bytes;
use clap::{Parser, Subcommand};
use mqtt_session::config::SessionConfig;
use mqtt_session::observability::init_default_logging;
use mqtt_session::session::{PublishOptions, SessionEvent, SessionManager, SessionStatus};
use mqtt_session::transport::mqtt::MqttTransport;
use mqtt_session::transport::QoS;
use std::path::PathBuf;
use std::process;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, Interval};
use tokio::signal;
use tracing::{error, info, warn};

/// Reconnecting MQTT session with buffered publish
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "Reconnecting MQTT session with buffered publish")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_SESSION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the session and log traffic until interrupted
    Run {
        /// Publish a demo payload at this interval
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
        /// Topic for the demo payload
        #[arg(long, default_value = "topic/browser")]
        topic: String,
        /// Demo payload
        #[arg(long, default_value = r#"{ "msg": "Hello, I am browser." }"#)]
        payload: String,
    },
    /// Publish one message and exit
    Publish {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        payload: String,
        /// QoS level (0, 1 or 2); defaults to the configured one
        #[arg(long)]
        qos: Option<u8>,
        #[arg(long)]
        retain: bool,
        /// Give up if the broker is not reachable in time
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize observability system
    init_default_logging();

    info!("Starting mqtt-session v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run {
            interval_secs,
            topic,
            payload,
        } => run_session(config, interval_secs, topic, payload).await,
        Commands::Publish {
            topic,
            payload,
            qos,
            retain,
            timeout_secs,
        } => publish_once(config, topic, payload, qos, retain, timeout_secs).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(SessionConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = ["session.toml", "config/session.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(SessionConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create session.toml".into())
        }
    }
}

/// Pretty-print JSON payloads, fall back to lossy UTF-8
fn render_payload(payload: &Bytes) -> String {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(payload).into_owned()),
        Err(_) => String::from_utf8_lossy(payload).into_owned(),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_session(
    config: SessionConfig,
    interval_secs: Option<u64>,
    topic: String,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = config.session_options()?;
    info!(
        broker = %options.connect.url(),
        client_id = %options.connect.client_id,
        "Session starting"
    );

    let session = SessionManager::new(MqttTransport::new(), options);
    session.on_message(|topic, payload| {
        info!(topic, payload = %render_payload(payload), "Message received");
    });
    session.on_error(|e| warn!(error = %e, "Session error"));

    let mut events = session.events();
    session.open();

    // Set up signal handling for graceful shutdown
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut ticker = interval_secs.map(|secs| interval(Duration::from_secs(secs.max(1))));

    let outcome: Result<(), Box<dyn std::error::Error>> = loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break Ok(());
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break Ok(());
            }
            _ = next_tick(&mut ticker) => {
                let delivered = session.send(topic.clone(), payload.clone(), true);
                info!(topic = %topic, delivered, buffered = session.buffered_len(), "Demo payload sent");
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StatusChanged { from, to }) => {
                    info!("Session status: {} -> {}", from, to);
                }
                Ok(SessionEvent::ReconnectFailed { max_retries }) => {
                    error!(max_retries, "MQTT connection permanently lost, shutting down...");
                    break Err(format!("reconnect budget of {max_retries} retries exhausted").into());
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            }
        }
    };

    info!(stats = %serde_json::to_string(&session.stats())?, "Session statistics");
    session.shutdown().await;
    outcome
}

async fn publish_once(
    config: SessionConfig,
    topic: String,
    payload: String,
    qos: Option<u8>,
    retain: bool,
    timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut publish = PublishOptions::default();
    if let Some(qos) = qos {
        publish = publish.with_qos(QoS::try_from(qos)?);
    }
    if retain {
        publish = publish.retained();
    }

    let session = SessionManager::new(MqttTransport::new(), config.session_options()?);

    // Buffered first, delivered once the session opens
    let outcome = session.send_with(topic.clone(), payload, publish);
    info!(topic = %topic, ?outcome, "Message queued");

    session.open();
    let opened = session
        .wait_for_status(SessionStatus::Open, Duration::from_secs(timeout_secs))
        .await;
    if let Err(e) = opened {
        session.shutdown().await;
        return Err(e.into());
    }

    session.flush_buffer();
    let stats = session.stats();
    info!(sent = stats.messages_sent, "Publish complete");

    session.shutdown().await;
    if stats.messages_sent == 0 {
        return Err(format!("message to {topic} was not delivered").into());
    }
    Ok(())
}

fn handle_config_command(
    config: SessionConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", config.redacted().to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
