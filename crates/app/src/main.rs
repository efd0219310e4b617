use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use ferrodub_app::PipelineCoordinator;
use ferrodub_audio::AudioConfig;
use ferrodub_foundation::ShutdownHandler;

/// Full-duplex loopback harness over the deterministic adapters: capture
/// frames flow through the coordinated transport into playback while the
/// adaptive control loop runs. Real device adapters plug in through the
/// capture/playback traits.
#[derive(Parser, Debug)]
#[command(name = "ferrodub", version, about)]
struct Cli {
    /// Samples per second per channel.
    #[arg(long, default_value_t = 16_000)]
    sample_rate: u32,

    /// 1 (mono) or 2 (stereo).
    #[arg(long, default_value_t = 1)]
    channels: u16,

    /// Samples per channel per frame.
    #[arg(long, default_value_t = 320)]
    frame_size: usize,

    /// Requested jitter capacity in frames (clamped to the 40-80ms window).
    #[arg(long, default_value_t = 10)]
    buffer_size: usize,

    /// Device identifier; empty selects the platform default.
    #[arg(long, default_value = "")]
    device: String,

    /// End-to-end latency target in milliseconds (10-500).
    #[arg(long, default_value_t = 100)]
    target_latency_ms: u64,

    /// Stop after this many milliseconds; runs until Ctrl-C when omitted.
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Interval between stats reports, in seconds.
    #[arg(long, default_value_t = 5)]
    stats_interval_secs: u64,
}

fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_level).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = AudioConfig {
        device_id: cli.device,
        sample_rate: cli.sample_rate,
        channels: cli.channels,
        frame_size: cli.frame_size,
        buffer_size: cli.buffer_size,
    };
    tracing::info!(
        config = %serde_json::to_string(&config).context("serializing config")?,
        "starting ferrodub loopback"
    );

    let coordinator = PipelineCoordinator::new(config);
    coordinator
        .initialize()
        .await
        .context("initializing pipeline")?;
    coordinator
        .set_target_latency(Duration::from_millis(cli.target_latency_ms))
        .context("setting target latency")?;
    coordinator.start().await.context("starting pipeline")?;

    let shutdown = ShutdownHandler::new().install().await;
    let deadline = cli.duration_ms.map(Duration::from_millis);
    let mut stats_ticker =
        tokio::time::interval(Duration::from_secs(cli.stats_interval_secs.max(1)));
    stats_ticker.tick().await; // the immediate first tick

    let run = async {
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                _ = stats_ticker.tick() => {
                    report(&coordinator);
                }
            }
        }
    };

    match deadline {
        Some(limit) => {
            if tokio::time::timeout(limit, run).await.is_err() {
                tracing::info!(?limit, "run duration elapsed");
            }
        }
        None => run.await,
    }

    coordinator.stop().await.context("stopping pipeline")?;
    report(&coordinator);
    coordinator.close().await.context("closing pipeline")?;

    tracing::info!("ferrodub loopback finished");
    Ok(())
}

fn report(coordinator: &PipelineCoordinator) {
    let metrics = coordinator.metrics();
    let latency = coordinator.latency_stats();
    let sync = coordinator.sync_stats();
    let backpressure = coordinator.backpressure_stats();
    let policy = coordinator.policy_stats();
    let summary = coordinator.metrics_summary();

    tracing::info!(
        capture_latency = ?metrics.capture_latency,
        playback_latency = ?metrics.playback_latency,
        fill_level = %format!("{:.2}", metrics.buffer_fill_level),
        dropped_frames = metrics.dropped_frames,
        underruns = metrics.underruns,
        overruns = metrics.overruns,
        "pipeline health"
    );
    tracing::info!(
        average = ?latency.average_latency,
        p50 = ?latency.p50_latency,
        p95 = ?latency.p95_latency,
        p99 = ?latency.p99_latency,
        violations = latency.latency_violations,
        mode = ?latency.mode,
        "latency window"
    );
    tracing::info!(
        drift_secs = sync.drift_compensation_secs,
        alignment = ?sync.current_alignment,
        buffer_adjustments = sync.buffer_adjustments,
        "synchronizer"
    );
    tracing::info!(
        backpressure_events = backpressure.events_count,
        throttled_for = ?backpressure.throttling_duration,
        actions_applied = policy.actions_applied,
        "control loop"
    );
    tracing::info!(
        uptime = ?summary.uptime,
        modules = summary.total_modules,
        errors = summary.total_errors,
        "metrics summary"
    );
}
