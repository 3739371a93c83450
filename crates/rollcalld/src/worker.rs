//! Camera stream worker.
//!
//! One task per camera: connect, drain or process frames, recognize faces,
//! write attendance, publish annotated frames. Connection faults back off
//! exponentially up to a fixed number of consecutive attempts.

use crate::config::{CameraConfig, Config};
use crate::engine::AnalysisHandle;
use crate::hub::{Hub, WorkerLauncher};
use crate::protocol::{AttendancePayload, CameraStatus, FramePayload, ServerMessage, StatusPayload};
use chrono::{DateTime, Utc};
use rollcall_core::{Matcher, RecognitionIndex};
use rollcall_hw::annotate::render_jpeg_base64;
use rollcall_hw::frame::normalize_for_analysis;
use rollcall_hw::{CameraError, FaceAnnotation, Frame, FrameSource, SourceOpener};
use rollcall_store::{AttendanceEvent, Ledger, Store};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// How often a streaming worker checks whether the index needs a rebuild.
const INDEX_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Connecting,
    Streaming,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The session was stopped.
    Cancelled,
    /// Reconnect attempts were exhausted.
    Failed,
}

#[derive(Error, Debug)]
enum StreamFault {
    #[error("{0}")]
    Camera(#[from] CameraError),
    #[error("capture task failed: {0}")]
    Task(#[from] JoinError),
    #[error("stream returned no frame")]
    NoFrame,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub frame_skip: u64,
    pub detection_floor: f32,
    pub max_faces_per_frame: usize,
    pub process_width: u32,
    pub process_height: u32,
    pub jpeg_quality: u8,
    pub max_reconnect_attempts: u32,
    /// Unit of the exponential reconnect backoff (`unit * 2^attempt`).
    pub backoff_unit: Duration,
    pub read_retry_delay: Duration,
    pub frame_interval: Duration,
    pub warmup_grabs: usize,
}

impl WorkerSettings {
    /// Delay before the next attempt after `failures` consecutive faults.
    ///
    /// A lone read fault retries after `read_retry_delay`; anything else
    /// waits `backoff_unit * 2^failures`.
    pub fn retry_delay(&self, failures: u32, read_fault: bool) -> Duration {
        if read_fault && failures <= 1 {
            return self.read_retry_delay;
        }
        self.backoff_unit.saturating_mul(2u32.saturating_pow(failures))
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            frame_skip: config.frame_skip,
            detection_floor: config.detection_floor,
            max_faces_per_frame: config.max_faces_per_frame,
            process_width: config.process_width,
            process_height: config.process_height,
            jpeg_quality: config.jpeg_quality,
            max_reconnect_attempts: config.max_reconnect_attempts,
            backoff_unit: Duration::from_secs(1),
            read_retry_delay: Duration::from_millis(config.read_retry_delay_ms),
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            warmup_grabs: config.warmup_grabs,
        }
    }
}

/// Everything a worker shares with the rest of the daemon.
#[derive(Clone)]
pub struct WorkerContext {
    pub index: Arc<RecognitionIndex>,
    pub matcher: Arc<dyn Matcher + Send + Sync>,
    pub ledger: Ledger,
    pub store: Store,
    pub analysis: AnalysisHandle,
    pub opener: Arc<dyn SourceOpener>,
    pub settings: WorkerSettings,
}

/// Launches one [`CameraWorker`] per configured camera.
pub struct CameraLauncher {
    cameras: Vec<CameraConfig>,
    context: WorkerContext,
}

impl CameraLauncher {
    pub fn new(cameras: Vec<CameraConfig>, context: WorkerContext) -> Self {
        Self { cameras, context }
    }
}

impl WorkerLauncher for CameraLauncher {
    fn launch(&self, hub: Arc<Hub>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.cameras
            .iter()
            .map(|camera| {
                let worker = CameraWorker::new(camera.clone(), self.context.clone(), Arc::clone(&hub));
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker.run(cancel).await;
                })
            })
            .collect()
    }
}

pub struct CameraWorker {
    camera: CameraConfig,
    context: WorkerContext,
    hub: Arc<Hub>,
    state: WorkerState,
}

impl CameraWorker {
    pub fn new(camera: CameraConfig, context: WorkerContext, hub: Arc<Hub>) -> Self {
        Self {
            camera,
            context,
            hub,
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn set_state(&mut self, next: WorkerState) {
        if self.state != next {
            tracing::debug!(camera = %self.camera.label, from = ?self.state, to = ?next, "worker state");
            self.state = next;
        }
    }

    /// Run until cancelled or until reconnect attempts are exhausted.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerExit {
        let max_attempts = self.context.settings.max_reconnect_attempts.max(1);
        let mut failures: u32 = 0;
        tracing::info!(camera = %self.camera.label, address = %self.camera.address, "camera worker started");

        let exit = loop {
            if cancel.is_cancelled() {
                break WorkerExit::Cancelled;
            }

            self.set_state(WorkerState::Connecting);
            let (fault, read_fault) = match self.connect(&cancel).await {
                Ok(None) => break WorkerExit::Cancelled,
                Ok(Some(source)) => {
                    self.set_state(WorkerState::Streaming);
                    match self.stream(source, &cancel, &mut failures).await {
                        Ok(()) => break WorkerExit::Cancelled,
                        Err(fault) => (fault, true),
                    }
                }
                Err(fault) => (fault, false),
            };

            self.set_state(WorkerState::Error);
            failures += 1;
            let delay = self.context.settings.retry_delay(failures, read_fault);
            if failures >= max_attempts {
                tracing::error!(
                    camera = %self.camera.label,
                    attempts = failures,
                    error = %fault,
                    "camera failed; giving up"
                );
                self.hub
                    .broadcast(ServerMessage::Status(
                        StatusPayload::new(CameraStatus::CameraFailed, self.hub.is_running())
                            .camera(self.camera.label.clone())
                            .message(format!("Camera {} failed after {failures} attempts", self.camera.label)),
                    ))
                    .await;
                break WorkerExit::Failed;
            }

            tracing::warn!(
                camera = %self.camera.label,
                attempt = failures,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %fault,
                "camera fault; reconnecting"
            );
            if !sleep_or_cancel(delay, &cancel).await {
                break WorkerExit::Cancelled;
            }
        };

        self.set_state(WorkerState::Idle);
        tracing::info!(camera = %self.camera.label, ?exit, "camera worker stopped");
        exit
    }

    /// Open the source and discard warmup frames. `None` when cancelled.
    async fn connect(&self, cancel: &CancellationToken) -> Result<Option<Box<dyn FrameSource>>, StreamFault> {
        let opener = Arc::clone(&self.context.opener);
        let address = self.camera.address.clone();
        let warmup = self.context.settings.warmup_grabs;

        let task = tokio::task::spawn_blocking(move || -> Result<Box<dyn FrameSource>, CameraError> {
            let mut source = opener.open(&address)?;
            for _ in 0..warmup {
                if !source.grab()? {
                    break;
                }
            }
            Ok(source)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            joined = task => {
                let source = joined??;
                tracing::info!(camera = %self.camera.label, "camera connected");
                Ok(Some(source))
            }
        }
    }

    /// Pull frames until cancelled (`Ok`) or the source faults.
    async fn stream(
        &self,
        mut source: Box<dyn FrameSource>,
        cancel: &CancellationToken,
        failures: &mut u32,
    ) -> Result<(), StreamFault> {
        let skip = self.context.settings.frame_skip.max(1);
        let mut count: u64 = 0;
        let mut last_index_check: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if last_index_check.map_or(true, |t| t.elapsed() >= INDEX_CHECK_INTERVAL) {
                last_index_check = Some(Instant::now());
                self.refresh_index();
            }

            let drain = count % skip != 0;
            let job = tokio::task::spawn_blocking(move || {
                let result = if drain { source.grab().map(|_| None) } else { source.read() };
                (source, result)
            });
            let (returned, result) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                joined = job => joined?,
            };
            source = returned;
            count += 1;

            if drain {
                result?;
                continue;
            }

            let frame = result?.ok_or(StreamFault::NoFrame)?;
            *failures = 0;
            self.process(frame).await;

            if !sleep_or_cancel(self.context.settings.frame_interval, cancel).await {
                return Ok(());
            }
        }
    }

    /// Rebuild the shared index in the background when it has gone stale.
    /// At most one rebuild runs at a time across all workers.
    fn refresh_index(&self) {
        if !self.context.index.is_stale() {
            return;
        }
        let index = Arc::clone(&self.context.index);
        let store = self.context.store.clone();
        let camera = self.camera.label.clone();
        tokio::spawn(async move {
            let Some(claim) = index.claim_rebuild() else {
                return;
            };
            match store.load_identities().await {
                Ok(identities) => {
                    if let Err(e) = claim.rebuild(&identities) {
                        tracing::warn!(camera = %camera, error = %e, "index rebuild failed; keeping previous");
                    }
                }
                Err(e) => tracing::warn!(camera = %camera, error = %e, "enrollment snapshot unavailable"),
            }
        });
    }

    async fn process(&self, frame: Frame) {
        let settings = &self.context.settings;
        let timestamp = Utc::now();

        let frame = match normalize_for_analysis(&frame, settings.process_width, settings.process_height) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                tracing::warn!(camera = %self.camera.label, error = %e, "frame normalization failed");
                return;
            }
        };

        let faces = match self.context.analysis.analyze(Arc::clone(&frame)).await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(camera = %self.camera.label, error = %e, "publishing frame without faces");
                Vec::new()
            }
        };

        let stats = self.hub.stats();
        stats.record_frame(faces.len());
        let snapshot = self.context.index.snapshot();
        let mut annotations = Vec::with_capacity(faces.len().min(settings.max_faces_per_frame));

        for face in faces.iter().take(settings.max_faces_per_frame) {
            if face.det_score < settings.detection_floor {
                annotations.push(FaceAnnotation::unknown(face.bbox, 0.0));
                continue;
            }
            let decision = self.context.matcher.identify(&snapshot, &face.embedding);
            match decision.identity_id {
                Some(identity_id) => {
                    stats.record_recognized();
                    let name = decision.name.unwrap_or_else(|| identity_id.clone());
                    annotations.push(FaceAnnotation::recognized(face.bbox, name.clone(), decision.confidence));
                    self.record_attendance(identity_id, name, decision.confidence, timestamp).await;
                }
                None => {
                    stats.record_unknown();
                    tracing::debug!(
                        camera = %self.camera.label,
                        confidence = decision.confidence,
                        "face not recognized"
                    );
                    annotations.push(FaceAnnotation::unknown(face.bbox, decision.confidence));
                }
            }
        }

        let quality = settings.jpeg_quality;
        let render_frame = Arc::clone(&frame);
        let render_faces = annotations.clone();
        let rendered =
            tokio::task::spawn_blocking(move || render_jpeg_base64(&render_frame, &render_faces, quality)).await;

        match rendered {
            Ok(Ok(image)) => {
                self.hub
                    .broadcast(ServerMessage::Frame(FramePayload {
                        camera: self.camera.label.clone(),
                        image,
                        faces: annotations.len(),
                        annotations,
                        timestamp,
                    }))
                    .await;
            }
            Ok(Err(e)) => tracing::warn!(camera = %self.camera.label, error = %e, "frame encode failed"),
            Err(e) => tracing::warn!(camera = %self.camera.label, error = %e, "frame encode task failed"),
        }
    }

    async fn record_attendance(&self, identity_id: String, name: String, confidence: f32, timestamp: DateTime<Utc>) {
        let outcome = self
            .context
            .ledger
            .record_event(AttendanceEvent {
                identity_id: identity_id.clone(),
                kind: self.camera.purpose,
                camera_id: self.camera.id.clone(),
                confidence,
                timestamp,
            })
            .await;

        if !outcome.success {
            tracing::warn!(
                camera = %self.camera.label,
                identity = %identity_id,
                message = %outcome.message,
                "attendance not recorded; continuing"
            );
            return;
        }
        let Some(action) = outcome.action.filter(|_| outcome.is_change()) else {
            return;
        };

        let local = timestamp.with_timezone(&self.context.ledger.offset());
        self.hub
            .broadcast(ServerMessage::Attendance(AttendancePayload {
                identity_id,
                name,
                event: self.camera.purpose,
                camera: self.camera.label.clone(),
                confidence,
                timestamp: local.format("%Y-%m-%d %H:%M:%S").to_string(),
                action,
            }))
            .await;
    }
}

/// Sleep for `delay`. Returns `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::hub::tests::RecordingLauncher;
    use crate::hub::{HubSettings, Outbound};
    use crate::protocol::Role;
    use crate::stats::Stats;
    use rollcall_core::{
        AnalyzerError, BoundingBox, DetectedFace, Embedding, FaceAnalyzer, MatcherConfig, MultiAngleMatcher, Pose,
    };
    use rollcall_store::{EventKind, OutBeforeIn};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    enum Step {
        Frame,
        End,
    }

    struct ScriptedSource {
        steps: VecDeque<Step>,
        /// Keep producing frames once the script runs out.
        endless: bool,
        reads: Arc<AtomicUsize>,
        grabs: Arc<AtomicUsize>,
        sequence: u64,
    }

    impl ScriptedSource {
        fn next(&mut self) -> Option<Frame> {
            let step = self.steps.pop_front().unwrap_or(if self.endless { Step::Frame } else { Step::End });
            match step {
                Step::Frame => {
                    self.sequence += 1;
                    Some(Frame::from_rgb(vec![90; 8 * 8 * 3], 8, 8, self.sequence).unwrap())
                }
                Step::End => None,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn grab(&mut self) -> Result<bool, CameraError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            Ok(self.next().is_some())
        }
        fn read(&mut self) -> Result<Option<Frame>, CameraError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.next())
        }
        fn address(&self) -> &str {
            "fake://camera"
        }
    }

    /// Hands out queued sources, then refuses to connect.
    #[derive(Default)]
    struct ScriptedOpener {
        sources: Mutex<VecDeque<ScriptedSource>>,
        opens: AtomicUsize,
    }

    impl SourceOpener for ScriptedOpener {
        fn open(&self, address: &str) -> Result<Box<dyn FrameSource>, CameraError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.sources.lock().unwrap().pop_front() {
                Some(source) => Ok(Box::new(source)),
                None => Err(CameraError::ConnectFailed(format!("{address}: refused"))),
            }
        }
    }

    /// Every frame shows a known face, a stranger, and a blurry face.
    struct FixedAnalyzer;

    impl FaceAnalyzer for FixedAnalyzer {
        fn analyze(&mut self, _rgb: &[u8], _w: u32, _h: u32) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let face = |score: f32, values: Vec<f32>| DetectedFace {
                bbox: BoundingBox::from_corners([1.0, 1.0, 6.0, 6.0]),
                det_score: score,
                embedding: Embedding::new(values),
            };
            Ok(vec![
                face(0.9, vec![1.0, 0.0, 0.0]),
                face(0.8, vec![0.0, 1.0, 0.0]),
                face(0.2, vec![1.0, 0.0, 0.0]),
            ])
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            frame_skip: 2,
            detection_floor: 0.35,
            max_faces_per_frame: 10,
            process_width: 8,
            process_height: 8,
            jpeg_quality: 60,
            max_reconnect_attempts: 2,
            backoff_unit: Duration::from_millis(1),
            read_retry_delay: Duration::from_millis(1),
            frame_interval: Duration::ZERO,
            warmup_grabs: 0,
        }
    }

    fn source(steps: Vec<Step>, endless: bool) -> (ScriptedSource, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let grabs = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource {
            steps: steps.into(),
            endless,
            reads: Arc::clone(&reads),
            grabs: Arc::clone(&grabs),
            sequence: 0,
        };
        (source, reads, grabs)
    }

    struct Fixture {
        hub: Arc<Hub>,
        ledger: Ledger,
        store: Store,
        context: WorkerContext,
        opener: Arc<ScriptedOpener>,
    }

    async fn fixture(sources: Vec<ScriptedSource>, settings: WorkerSettings) -> Fixture {
        fixture_with_index_age(sources, settings, Duration::from_secs(300)).await
    }

    async fn fixture_with_index_age(
        sources: Vec<ScriptedSource>,
        settings: WorkerSettings,
        index_max_age: Duration,
    ) -> Fixture {
        let store = Store::open_in_memory().await.unwrap();
        store.upsert_identity("E001", "Asha", "Ops", "").await.unwrap();
        store
            .save_pose_embedding("E001", Pose::Front, &Embedding::new(vec![1.0, 0.0, 0.0]), 0.9)
            .await
            .unwrap();

        let index = Arc::new(RecognitionIndex::new(index_max_age));
        index.rebuild(&store.load_identities().await.unwrap()).unwrap();

        let ledger = Ledger::new(
            store.clone(),
            rollcall_store::parse_utc_offset("+05:30").unwrap(),
            OutBeforeIn::TreatAsIn,
        );
        let opener = Arc::new(ScriptedOpener {
            sources: Mutex::new(sources.into()),
            opens: AtomicUsize::new(0),
        });
        let hub = Arc::new(Hub::new(
            HubSettings::default(),
            Arc::new(Stats::default()),
            Box::new(RecordingLauncher::default()),
        ));
        let context = WorkerContext {
            index,
            matcher: Arc::new(MultiAngleMatcher::new(MatcherConfig::default())),
            ledger: ledger.clone(),
            store: store.clone(),
            analysis: spawn_engine(Box::new(FixedAnalyzer)).unwrap(),
            opener: Arc::clone(&opener) as Arc<dyn SourceOpener>,
            settings,
        };
        Fixture {
            hub,
            ledger,
            store,
            context,
            opener,
        }
    }

    fn entry_camera() -> CameraConfig {
        CameraConfig {
            label: "entry".into(),
            id: "entry_camera".into(),
            address: "fake://entry".into(),
            purpose: EventKind::In,
        }
    }

    fn texts(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Text(text) = item {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_processes_every_nth_frame_and_records_attendance() {
        let (src, reads, grabs) = source(vec![Step::Frame, Step::Frame, Step::Frame, Step::Frame, Step::End], false);
        let f = fixture(vec![src], settings()).await;
        let (_viewer, mut rx) = f.hub.connect("asha".into(), Role::User).await;
        texts(&mut rx);

        let worker = CameraWorker::new(entry_camera(), f.context.clone(), Arc::clone(&f.hub));
        let exit = worker.run(CancellationToken::new()).await;
        assert_eq!(exit, WorkerExit::Failed);

        // Frames 1 and 3 processed, 2 and 4 drained, then end of stream.
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        assert_eq!(grabs.load(Ordering::SeqCst), 2);
        let stats = f.hub.stats().snapshot();
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.total_faces, 6);
        assert_eq!(stats.recognized, 2);
        assert_eq!(stats.unknown, 2);

        let record = f.ledger.record_for("E001", f.ledger.today()).await.unwrap().unwrap();
        assert!(record.first_in.is_some());
        assert_eq!(record.in_camera_id.as_deref(), Some("entry_camera"));

        let msgs = texts(&mut rx);
        let kinds: Vec<&str> = msgs.iter().map(|m| m["type"].as_str().unwrap()).collect();
        // The second sighting is a skipped IN and is not broadcast.
        assert_eq!(kinds, ["attendance", "frame", "frame", "status"]);
        assert_eq!(msgs[0]["identity_id"], "E001");
        assert_eq!(msgs[0]["name"], "Asha");
        assert_eq!(msgs[0]["event"], "IN");
        assert_eq!(msgs[0]["action"], "created");
        assert_eq!(msgs[1]["camera"], "entry");
        assert_eq!(msgs[1]["faces"], 3);
        assert_eq!(msgs[1]["annotations"][0]["label"], "Asha");
        assert_eq!(msgs[1]["annotations"][1]["recognized"], false);
        assert_eq!(msgs[3]["camera_status"], "camera_failed");
        assert_eq!(msgs[3]["camera"], "entry");

        assert!(f.hub.frames().frame_age("entry").is_some());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut settings = settings();
        settings.max_reconnect_attempts = 3;
        let f = fixture(Vec::new(), settings).await;
        let worker = CameraWorker::new(entry_camera(), f.context.clone(), Arc::clone(&f.hub));
        assert_eq!(worker.state(), WorkerState::Idle);
        assert_eq!(worker.run(CancellationToken::new()).await, WorkerExit::Failed);
        assert_eq!(f.opener.opens.load(Ordering::SeqCst), 3);
        assert_eq!(f.hub.stats().snapshot().frames_processed, 0);
    }

    #[tokio::test]
    async fn test_read_failure_reconnects_and_resets_attempts() {
        let mut settings = settings();
        settings.frame_skip = 1;
        settings.max_reconnect_attempts = 2;
        let (first, _, _) = source(vec![Step::Frame, Step::End], false);
        let (second, _, _) = source(vec![Step::Frame, Step::End], false);
        let (third, _, _) = source(vec![Step::Frame, Step::End], false);
        let f = fixture(vec![first, second, third], settings).await;

        let worker = CameraWorker::new(entry_camera(), f.context.clone(), Arc::clone(&f.hub));
        assert_eq!(worker.run(CancellationToken::new()).await, WorkerExit::Failed);
        // Each source delivered a frame, so each read failure started a fresh count.
        assert_eq!(f.hub.stats().snapshot().frames_processed, 3);
        assert_eq!(f.opener.opens.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_retry_delay_escalates() {
        let mut settings = settings();
        settings.backoff_unit = Duration::from_secs(1);
        settings.read_retry_delay = Duration::from_millis(500);
        assert_eq!(settings.retry_delay(1, true), Duration::from_millis(500));
        assert_eq!(settings.retry_delay(2, true), Duration::from_secs(4));
        assert_eq!(settings.retry_delay(3, true), Duration::from_secs(8));
        assert_eq!(settings.retry_delay(1, false), Duration::from_secs(2));
        assert_eq!(settings.retry_delay(4, false), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_repeated_read_failures_back_off_exponentially() {
        let mut settings = settings();
        settings.frame_skip = 1;
        settings.max_reconnect_attempts = 5;
        settings.backoff_unit = Duration::from_millis(10);
        settings.read_retry_delay = Duration::from_millis(5);
        // Each source accepts the connection and never delivers a frame.
        let sources = (0..4).map(|_| source(vec![Step::End], false).0).collect();
        let f = fixture(sources, settings).await;

        let started = Instant::now();
        let worker = CameraWorker::new(entry_camera(), f.context.clone(), Arc::clone(&f.hub));
        assert_eq!(worker.run(CancellationToken::new()).await, WorkerExit::Failed);

        // 5 ms, then 40, 80 and 160 ms before the fifth attempt fails to connect.
        assert!(started.elapsed() >= Duration::from_millis(285), "{:?}", started.elapsed());
        assert_eq!(f.opener.opens.load(Ordering::SeqCst), 5);
        assert_eq!(f.hub.stats().snapshot().frames_processed, 0);
    }

    #[tokio::test]
    async fn test_stale_index_picks_up_new_enrollment() {
        let (src, _, _) = source(Vec::new(), true);
        let mut settings = settings();
        settings.frame_interval = Duration::from_millis(5);
        let f = fixture_with_index_age(vec![src], settings, Duration::ZERO).await;
        let cancel = CancellationToken::new();
        let worker = CameraWorker::new(entry_camera(), f.context.clone(), Arc::clone(&f.hub));
        let task = tokio::spawn(worker.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.hub.stats().snapshot().frames_processed < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(f.ledger.record_for("E002", f.ledger.today()).await.unwrap().is_none());

        // The stranger in every frame gets enrolled while the worker streams.
        f.store.upsert_identity("E002", "Ravi", "Ops", "").await.unwrap();
        f.store
            .save_pose_embedding("E002", Pose::Front, &Embedding::new(vec![0.0, 1.0, 0.0]), 0.9)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.ledger.record_for("E002", f.ledger.today()).await.unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.context.index.snapshot().name_of("E002"), Some("Ravi"));

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_stops_streaming_worker() {
        let (src, _, _) = source(Vec::new(), true);
        let f = fixture(vec![src], settings()).await;
        let cancel = CancellationToken::new();
        let worker = CameraWorker::new(entry_camera(), f.context.clone(), Arc::clone(&f.hub));
        let task = tokio::spawn(worker.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.hub.stats().snapshot().frames_processed < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Cancelled);
    }

    #[tokio::test]
    async fn test_launcher_spawns_one_worker_per_camera() {
        let (a, _, _) = source(Vec::new(), true);
        let (b, _, _) = source(Vec::new(), true);
        let f = fixture(vec![a, b], settings()).await;
        let mut exit_camera = entry_camera();
        exit_camera.label = "exit".into();
        exit_camera.id = "exit_camera".into();
        exit_camera.purpose = EventKind::Out;

        let launcher = CameraLauncher::new(vec![entry_camera(), exit_camera], f.context.clone());
        let cancel = CancellationToken::new();
        let handles = launcher.launch(Arc::clone(&f.hub), cancel.clone());
        assert_eq!(handles.len(), 2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !f.hub.frames().has_fresh_frames(Duration::from_secs(5)) || f.hub.frames().snapshot().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        }
        let record = f.ledger.record_for("E001", f.ledger.today()).await.unwrap().unwrap();
        assert!(record.first_in.is_some());
    }
}
