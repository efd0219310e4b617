use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use ferrodub_audio::{
    AudioCapture, AudioConfig, AudioPlayback, CaptureSnapshot, NullPlayback, PcmFrame,
    PlaybackSnapshot, SyntheticCapture,
};
use ferrodub_foundation::{
    AudioError, ErrorInfo, PipelineState, PipelineStateMachine,
};
use ferrodub_sync::{
    Action, AdaptivePolicy, BackpressureController, BackpressureStats, LatencyManager,
    LatencyStats, PolicyStats, StreamSynchronizer, SyncStats,
};
use ferrodub_telemetry::{DeviceMode, LatencyMetrics, MetricsCollector, MetricsSummary};

use crate::cpu::CpuLoadEstimator;
use crate::integration::{AsrLink, TtsLink};

const DEFAULT_TARGET_LATENCY: Duration = Duration::from_millis(100);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const PLAYBACK_MONITOR_PERIOD: Duration = Duration::from_millis(100);
const POLICY_MONITOR_PERIOD: Duration = Duration::from_millis(500);
/// Fill level below which the playback monitor flags a looming underrun.
const LOW_FILL_WARNING: f64 = 0.2;
/// One adaptive-policy buffer step in latency terms.
const BUFFER_STEP: Duration = Duration::from_millis(10);
const MIN_ADJUST_TARGET: Duration = Duration::from_millis(20);
const MAX_ADJUST_TARGET: Duration = Duration::from_millis(200);
/// Drift magnitude that warrants a compensating buffer adjustment.
const SIGNIFICANT_DRIFT_SECS: f64 = 0.005;
const DRIFT_RESET_TARGET: Duration = Duration::from_millis(50);

/// Owns the full-duplex path: the capture and playback adapters, the
/// control-loop components, and the three worker tasks that tie them
/// together (capture forwarder, playback monitor, policy monitor).
///
/// Lifecycle: created -> initialized -> running <-> stopped -> closed.
///
/// Lock order is strictly coordinator -> component; no coordinator lock is
/// held across a component call or an await point.
pub struct PipelineCoordinator {
    config: AudioConfig,
    state: PipelineStateMachine,
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    synchronizer: Arc<StreamSynchronizer>,
    latency_manager: Arc<LatencyManager>,
    metrics: Arc<MetricsCollector>,
    backpressure: Arc<BackpressureController>,
    policy: Arc<AdaptivePolicy>,
    cpu_estimator: Arc<CpuLoadEstimator>,
    asr: RwLock<Option<Arc<AsrLink>>>,
    tts: RwLock<Option<Arc<TtsLink>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineCoordinator {
    /// Coordinator over the deterministic adapters.
    pub fn new(config: AudioConfig) -> Self {
        Self::with_adapters(
            config,
            Arc::new(SyntheticCapture::new()),
            Arc::new(NullPlayback::new()),
        )
    }

    /// Coordinator over caller-provided device adapters.
    pub fn with_adapters(
        config: AudioConfig,
        capture: Arc<dyn AudioCapture>,
        playback: Arc<dyn AudioPlayback>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state: PipelineStateMachine::new(),
            capture,
            playback,
            synchronizer: Arc::new(StreamSynchronizer::new()),
            latency_manager: Arc::new(LatencyManager::new(DEFAULT_TARGET_LATENCY)),
            metrics: Arc::new(MetricsCollector::new()),
            backpressure: Arc::new(BackpressureController::new()),
            policy: Arc::new(AdaptivePolicy::new()),
            cpu_estimator: Arc::new(CpuLoadEstimator::new(POLICY_MONITOR_PERIOD)),
            asr: RwLock::new(None),
            tts: RwLock::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn initialize(&self) -> Result<(), AudioError> {
        if let Err(err) = self.capture.initialize(self.config.clone()).await {
            self.metrics.record_error(
                ErrorInfo::new("Coordinator", "Initialize", "capture initialization failed")
                    .with_source(&err),
            );
            return Err(err);
        }

        if let Err(err) = self.playback.initialize(self.config.clone()).await {
            self.metrics.record_error(
                ErrorInfo::new("Coordinator", "Initialize", "playback initialization failed")
                    .with_source(&err),
            );
            return Err(err);
        }

        self.state.transition(PipelineState::Initialized)
    }

    pub async fn start(&self) -> Result<(), AudioError> {
        match self.state.current() {
            PipelineState::Running => return Err(AudioError::AlreadyRunning),
            PipelineState::Created | PipelineState::Closed => {
                return Err(AudioError::NotInitialized)
            }
            PipelineState::Initialized | PipelineState::Stopped => {}
        }

        self.capture.start().await?;
        if let Err(err) = self.playback.start().await {
            let _ = self.capture.stop().await;
            return Err(err);
        }

        let Some(frame_rx) = self.capture.take_frame_receiver() else {
            let _ = self.playback.stop().await;
            let _ = self.capture.stop().await;
            return Err(AudioError::ChannelClosed("capture egress"));
        };

        self.shutdown_tx.send_replace(false);
        self.state.transition(PipelineState::Running)?;

        let tts_rx = self.tts.read().as_ref().and_then(|tts| tts.take_frame_receiver());
        let asr = self.asr.read().clone();

        let forwarder = tokio::spawn(run_capture_forwarder(
            ForwarderCtx {
                capture: Arc::clone(&self.capture),
                playback: Arc::clone(&self.playback),
                synchronizer: Arc::clone(&self.synchronizer),
                backpressure: Arc::clone(&self.backpressure),
                metrics: Arc::clone(&self.metrics),
                asr,
            },
            self.shutdown_tx.subscribe(),
            frame_rx,
            tts_rx,
        ));

        let playback_monitor = tokio::spawn(run_playback_monitor(
            Arc::clone(&self.playback),
            Arc::clone(&self.metrics),
            self.shutdown_tx.subscribe(),
        ));

        let policy_monitor = tokio::spawn(run_policy_monitor(
            MonitorCtx {
                capture: Arc::clone(&self.capture),
                playback: Arc::clone(&self.playback),
                synchronizer: Arc::clone(&self.synchronizer),
                latency_manager: Arc::clone(&self.latency_manager),
                policy: Arc::clone(&self.policy),
                metrics: Arc::clone(&self.metrics),
                cpu_estimator: Arc::clone(&self.cpu_estimator),
            },
            self.shutdown_tx.subscribe(),
        ));

        *self.tasks.lock() = vec![forwarder, playback_monitor, policy_monitor];
        tracing::info!("pipeline started");
        Ok(())
    }

    /// Idempotent. Signals the workers, waits up to five seconds, then
    /// proceeds regardless and stops the adapters.
    pub async fn stop(&self) -> Result<(), AudioError> {
        if !self.state.is(PipelineState::Running) {
            return Ok(());
        }
        self.state.transition(PipelineState::Stopped)?;
        self.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let deadline = Instant::now() + STOP_TIMEOUT;
        let mut timed_out = false;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                timed_out = true;
            }
        }
        if timed_out {
            tracing::warn!(timeout = ?STOP_TIMEOUT, "workers did not stop in time; proceeding");
            self.metrics.record_error(
                ErrorInfo::new("Coordinator", "Stop", "worker shutdown timed out")
                    .with_source(&AudioError::StopTimeout(STOP_TIMEOUT)),
            );
        }

        if let Err(err) = self.capture.stop().await {
            self.metrics.record_error(
                ErrorInfo::new("Coordinator", "Stop", "capture stop failed").with_source(&err),
            );
        }
        if let Err(err) = self.playback.stop().await {
            self.metrics.record_error(
                ErrorInfo::new("Coordinator", "Stop", "playback stop failed").with_source(&err),
            );
        }

        tracing::info!("pipeline stopped");
        Ok(())
    }

    pub async fn close(&self) -> Result<(), AudioError> {
        if self.state.is(PipelineState::Closed) {
            return Ok(());
        }
        self.stop().await?;
        self.capture.close().await?;
        self.playback.close().await?;
        self.state.transition(PipelineState::Closed)
    }

    /// Attaches a speech-recognition link. Refused while running.
    pub fn connect_asr(&self, asr: Arc<AsrLink>) -> Result<(), AudioError> {
        if self.state.is(PipelineState::Running) {
            return Err(AudioError::AlreadyRunning);
        }
        *self.asr.write() = Some(asr);
        Ok(())
    }

    /// Attaches a speech-synthesis link. Refused while running.
    pub fn connect_tts(&self, tts: Arc<TtsLink>) -> Result<(), AudioError> {
        if self.state.is(PipelineState::Running) {
            return Err(AudioError::AlreadyRunning);
        }
        *self.tts.write() = Some(tts);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.is(PipelineState::Running)
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn set_target_latency(&self, target: Duration) -> Result<(), AudioError> {
        self.latency_manager.set_target_latency(target)
    }

    /// Current pipeline health as one composed snapshot.
    pub fn metrics(&self) -> LatencyMetrics {
        collect_latency_metrics(self.capture.as_ref(), self.playback.as_ref())
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn capture_snapshot(&self) -> CaptureSnapshot {
        self.capture.snapshot()
    }

    pub fn playback_snapshot(&self) -> PlaybackSnapshot {
        self.playback.snapshot()
    }

    pub fn latency_stats(&self) -> LatencyStats {
        self.latency_manager.stats()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.synchronizer.stats()
    }

    pub fn backpressure_stats(&self) -> BackpressureStats {
        self.backpressure.stats()
    }

    pub fn policy_stats(&self) -> PolicyStats {
        self.policy.stats()
    }

    pub fn asr(&self) -> Option<Arc<AsrLink>> {
        self.asr.read().clone()
    }

    pub fn tts(&self) -> Option<Arc<TtsLink>> {
        self.tts.read().clone()
    }

    pub fn is_asr_connected(&self) -> bool {
        self.asr.read().is_some()
    }

    pub fn is_tts_connected(&self) -> bool {
        self.tts.read().is_some()
    }
}

/// One pipeline-health observation composed from the adapter snapshots.
/// `overruns` counts jitter-buffer rejections; capture-side drops (ring
/// overruns and egress-channel drops) surface as `dropped_frames`.
fn collect_latency_metrics(
    capture: &dyn AudioCapture,
    playback: &dyn AudioPlayback,
) -> LatencyMetrics {
    let cap = capture.snapshot();
    let play = playback.snapshot();
    LatencyMetrics {
        capture_latency: cap.latency,
        playback_latency: play.latency,
        buffer_fill_level: play.buffer_fill_level,
        dropped_frames: cap.capture_errors,
        underruns: play.underruns,
        overruns: play.ring_overruns,
        timestamp: Instant::now(),
    }
}

struct ForwarderCtx {
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    synchronizer: Arc<StreamSynchronizer>,
    backpressure: Arc<BackpressureController>,
    metrics: Arc<MetricsCollector>,
    asr: Option<Arc<AsrLink>>,
}

/// Moves captured frames (and synthesized TTS frames) into playback,
/// consulting backpressure and feeding the synchronizer on the way.
async fn run_capture_forwarder(
    ctx: ForwarderCtx,
    mut shutdown: watch::Receiver<bool>,
    mut frame_rx: mpsc::Receiver<PcmFrame>,
    mut tts_rx: Option<mpsc::Receiver<PcmFrame>>,
) {
    tracing::debug!("capture forwarder started");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            maybe_frame = frame_rx.recv() => {
                let Some(frame) = maybe_frame else {
                    tracing::debug!("capture egress closed");
                    break;
                };
                forward_frame(&ctx, frame).await;
            }
            maybe_frame = recv_or_pending(&mut tts_rx), if tts_rx.is_some() => {
                match maybe_frame {
                    Some(frame) => {
                        if let Err(err) = ctx.playback.write_frame(frame) {
                            ctx.metrics.record_error(
                                ErrorInfo::new(
                                    "Coordinator",
                                    "CaptureForwarder",
                                    "failed to write synthesized frame to playback",
                                )
                                .with_source(&err),
                            );
                        }
                    }
                    None => tts_rx = None,
                }
            }
        }
    }
    tracing::debug!("capture forwarder stopped");
}

async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<PcmFrame>>) -> Option<PcmFrame> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn forward_frame(ctx: &ForwarderCtx, frame: PcmFrame) {
    let fill = ctx.playback.buffer_fill_level();
    if ctx.backpressure.should_apply_backpressure(fill) {
        let throttle = ctx.backpressure.throttle_duration();
        if throttle > Duration::ZERO {
            tokio::time::sleep(throttle).await;
            ctx.backpressure.record_throttling(throttle);
            ctx.metrics.record_latency("backpressure", throttle);
        }
    }

    ctx.metrics
        .record_latency("capture", ctx.capture.capture_latency());
    ctx.synchronizer
        .sync_capture_playback(frame.timestamp, Instant::now());

    if let Some(asr) = &ctx.asr {
        if asr.is_running() {
            if let Err(err) = asr.send_frame(frame.clone()) {
                ctx.metrics.record_error(
                    ErrorInfo::new(
                        "Coordinator",
                        "CaptureForwarder",
                        "failed to fan frame out to ASR",
                    )
                    .with_source(&err),
                );
            }
        }
    }

    if let Err(err) = ctx.playback.write_frame(frame) {
        ctx.metrics.record_error(
            ErrorInfo::new(
                "Coordinator",
                "CaptureForwarder",
                "failed to write frame to playback",
            )
            .with_source(&err),
        );
    }
}

/// Samples playback health every 100ms and flags a low jitter buffer.
async fn run_playback_monitor(
    playback: Arc<dyn AudioPlayback>,
    metrics: Arc<MetricsCollector>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("playback monitor started");
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + PLAYBACK_MONITOR_PERIOD,
        PLAYBACK_MONITOR_PERIOD,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                metrics.record_latency("playback", playback.playback_latency());

                let fill = playback.buffer_fill_level();
                if fill < LOW_FILL_WARNING {
                    tracing::warn!(fill, "playback buffer running low");
                    metrics.record_error(ErrorInfo::new(
                        "Coordinator",
                        "PlaybackMonitor",
                        format!("low buffer fill level: {fill:.2}"),
                    ));
                }
            }
        }
    }
    tracing::debug!("playback monitor stopped");
}

struct MonitorCtx {
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    synchronizer: Arc<StreamSynchronizer>,
    latency_manager: Arc<LatencyManager>,
    policy: Arc<AdaptivePolicy>,
    metrics: Arc<MetricsCollector>,
    cpu_estimator: Arc<CpuLoadEstimator>,
}

/// Every 500ms: collects metrics, updates the latency manager, evaluates
/// the adaptive policy, enacts its actions, and drains pending resize
/// requests into the playback jitter buffer.
async fn run_policy_monitor(ctx: MonitorCtx, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("policy monitor started");
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + POLICY_MONITOR_PERIOD,
        POLICY_MONITOR_PERIOD,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let tick_start = Instant::now();
                monitor_tick(&ctx);

                let busy = tick_start.elapsed();
                ctx.cpu_estimator.record_tick(busy);
                ctx.metrics.record_latency("monitor", busy);
            }
        }
    }
    tracing::debug!("policy monitor stopped");
}

fn monitor_tick(ctx: &MonitorCtx) {
    let observed = collect_latency_metrics(ctx.capture.as_ref(), ctx.playback.as_ref());

    ctx.latency_manager
        .update_latency(observed.capture_latency, observed.playback_latency);

    let cpu_load = ctx.cpu_estimator.current();
    if let Err(err) = ctx.latency_manager.update_cpu_load(cpu_load) {
        ctx.metrics.record_error(
            ErrorInfo::new("Coordinator", "Monitor", "cpu load update rejected")
                .with_source(&err),
        );
    }

    let actions = ctx.policy.evaluate(&observed, observed.underruns, cpu_load);
    for action in actions {
        if let Err(err) = apply_action(ctx, action) {
            ctx.metrics.record_error(
                ErrorInfo::new(
                    "Coordinator",
                    "Monitor",
                    format!("failed to apply action {action:?}"),
                )
                .with_source(&err),
            );
        }
    }

    // Enact the synchronizer's accepted resize request on the jitter ring.
    if let Some(target) = ctx.synchronizer.take_resize_request() {
        match ctx.playback.adjust_buffer_size(target) {
            Ok(()) => tracing::debug!(?target, "jitter buffer resized"),
            Err(err) => ctx.metrics.record_error(
                ErrorInfo::new("Coordinator", "Monitor", "jitter buffer resize failed")
                    .with_source(&err),
            ),
        }
    }

    if !ctx.synchronizer.is_aligned() {
        tracing::warn!("capture and playback streams are not aligned");
        ctx.metrics.record_error(ErrorInfo::new(
            "Coordinator",
            "Monitor",
            "streams not aligned",
        ));
    }
}

fn apply_action(ctx: &MonitorCtx, action: Action) -> Result<(), AudioError> {
    match action {
        Action::ReduceBuffer(step) => {
            let current = ctx.capture.capture_latency() + ctx.playback.playback_latency();
            let target = current
                .saturating_sub(BUFFER_STEP * step)
                .max(MIN_ADJUST_TARGET);
            ctx.synchronizer.adjust_buffer_size(target)
        }
        Action::IncreaseBuffer(step) => {
            let current = ctx.capture.capture_latency() + ctx.playback.playback_latency();
            let target = (current + BUFFER_STEP * step).min(MAX_ADJUST_TARGET);
            ctx.synchronizer.adjust_buffer_size(target)
        }
        Action::SwitchToExclusiveMode => switch_mode(ctx, DeviceMode::Exclusive),
        Action::SwitchToSharedMode => switch_mode(ctx, DeviceMode::Shared),
        Action::ApplyDriftCompensation => {
            let drift = ctx.synchronizer.drift_compensation();
            if drift.abs() > SIGNIFICANT_DRIFT_SECS {
                ctx.synchronizer.adjust_buffer_size(DRIFT_RESET_TARGET)
            } else {
                Ok(())
            }
        }
    }
}

fn switch_mode(ctx: &MonitorCtx, requested: DeviceMode) -> Result<(), AudioError> {
    if ctx.latency_manager.current_mode() == requested {
        return Ok(());
    }
    let selected = ctx.latency_manager.select_operation_mode();
    if selected != requested {
        tracing::debug!(?requested, ?selected, "mode selection kept a different mode");
    }
    Ok(())
}
