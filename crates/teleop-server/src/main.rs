use std::sync::Arc;

use clap::Parser;
use teleop_core::transport::mock::{MockConnector, MockOutcome, MockTransport};
use teleop_core::{CliOverrides, CoreConfig, LivenessStats, Supervisor, TransportConnector};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "teleop-server", about = "Teleoperation control plane server")]
struct Cli {
    /// Signaling room / channel id. Overrides VITE_SORA_CHANNEL_ID.
    #[arg(long)]
    room: Option<String>,

    /// Signaling room password, merged into the connection metadata.
    #[arg(long)]
    password: Option<String>,

    /// Start already latched into emergency stop.
    #[arg(long)]
    estop: bool,

    /// Use the in-process mock transport instead of a real signaling backend.
    /// The real WebRTC/signaling stack is out of scope for this crate, so
    /// this is the only connector available today.
    #[arg(long, default_value_t = true)]
    mock_transport: bool,

    /// Tracing filter directive (e.g. "info", "debug", "teleop_core=trace").
    /// Overrides RUST_LOG when set.
    #[arg(long)]
    log_level: Option<String>,
}

const STATS_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    if !cli.mock_transport {
        eprintln!("no real signaling backend is wired up yet; pass --mock-transport");
        std::process::exit(1);
    }

    let config = match CoreConfig::load(CliOverrides {
        room: cli.room.clone(),
        password: cli.password.clone(),
        estop: cli.estop,
    }) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    info!(
        channel_id = %config.channel_id,
        ctrl_label = %config.ctrl_label,
        state_label = %config.state_label,
        signaling_urls = ?config.signaling_urls,
        "starting teleoperation control plane"
    );

    let cancel = CancellationToken::new();
    let (supervisor, mut session_state_rx) = Supervisor::new(config.estop_at_startup);
    let connector: Arc<dyn TransportConnector> = build_connector(&config);

    let mut tasks =
        supervisor.spawn(connector, config.ctrl_label.clone(), config.state_label.clone(), cancel.clone());

    tasks.push(tokio::spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    changed = session_state_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let phase = session_state_rx.borrow().phase;
                        info!(?phase, "session phase changed");
                    }
                }
            }
        }
    }));

    tasks.push(tokio::spawn({
        let intake = supervisor.intake.clone();
        let liveness = supervisor.liveness.clone();
        let publisher = supervisor.publisher.clone();
        let cancel = cancel.clone();
        async move {
            let mut ticker = interval(STATS_PERIOD);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => log_stats(
                        &intake.stats(),
                        &liveness.stats(),
                        &publisher.stats(),
                        liveness.operator_heartbeat_age_secs(),
                    ),
                }
            }
        }
    }));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping tasks");
    cancel.cancel();

    for task in tasks {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;
    }

    info!("shutdown complete");
}

fn init_tracing(log_level: Option<&str>) {
    let filter = log_level
        .map(|level| tracing_subscriber::EnvFilter::new(level))
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_connector(config: &CoreConfig) -> Arc<dyn TransportConnector> {
    // The real signaling/WebRTC backend lives outside this crate; the mock
    // connector is what stands in for it in this build.
    let transport = MockTransport::new(&[config.ctrl_label.as_str(), config.state_label.as_str()]);
    Arc::new(MockConnector::always(MockOutcome::Connected(transport)))
}

fn log_stats(
    intake_stats: &teleop_core::IntakeStats,
    liveness_stats: &LivenessStats,
    publisher_stats: &teleop_core::PublisherStats,
    operator_hb_age_secs: Option<f64>,
) {
    info!(
        ctrl_accepted = intake_stats.accepted,
        ctrl_dropped = intake_stats.ctrl_drop_count,
        hb_sent = liveness_stats.heartbeats_sent,
        hb_received = liveness_stats.heartbeats_received,
        estop_frames = liveness_stats.estop_frames_received,
        state_published = publisher_stats.published,
        state_send_failures = publisher_stats.send_failures,
        operator_hb_age_secs,
        "stats"
    );
}

async fn wait_for_shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM");
        }
    }
}
