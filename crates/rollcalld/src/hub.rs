//! Realtime broadcast hub.
//!
//! Owns the viewer registry, the single monitoring session, and the
//! last-frame cache. Camera workers publish through it; viewers receive
//! through bounded per-viewer queues drained by their socket tasks.

use crate::protocol::{
    CameraStatus, ClientCommand, FramePayload, Role, ServerMessage, StatsPayload, StatusPayload,
};
use crate::stats::Stats;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Item queued for a viewer's socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Ping,
    Close,
}

/// A connected viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewer {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Viewer {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

struct ViewerEntry {
    viewer: Viewer,
    sender: mpsc::Sender<Outbound>,
}

/// Starts the camera workers for a new monitoring session.
///
/// Workers must stop once `cancel` fires.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, hub: Arc<Hub>, cancel: CancellationToken) -> Vec<JoinHandle<()>>;
}

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    /// A viewer whose queue stays full this long is dropped.
    pub send_timeout: Duration,
    pub viewer_queue: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            viewer_queue: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning { started_by: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    Forbidden { started_by: Option<String> },
}

#[derive(Default)]
struct MonitorState {
    running: bool,
    started_by: Option<String>,
    generation: u64,
    cancel: Option<CancellationToken>,
}

struct CachedFrame {
    payload: FramePayload,
    at: Instant,
}

/// Last frame per camera. Last write wins.
#[derive(Default)]
pub struct FrameCache {
    frames: StdRwLock<HashMap<String, CachedFrame>>,
}

impl FrameCache {
    pub fn store(&self, payload: FramePayload) {
        let mut frames = self.frames.write().unwrap_or_else(PoisonError::into_inner);
        frames.insert(
            payload.camera.clone(),
            CachedFrame {
                payload,
                at: Instant::now(),
            },
        );
    }

    /// Cached frames ordered by camera label.
    pub fn snapshot(&self) -> Vec<FramePayload> {
        let frames = self.frames.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<FramePayload> = frames.values().map(|f| f.payload.clone()).collect();
        out.sort_by(|a, b| a.camera.cmp(&b.camera));
        out
    }

    pub fn frame_age(&self, camera: &str) -> Option<Duration> {
        let frames = self.frames.read().unwrap_or_else(PoisonError::into_inner);
        frames.get(camera).map(|f| f.at.elapsed())
    }

    /// True when at least one frame is cached and every cached frame is
    /// younger than `max_age`.
    pub fn has_fresh_frames(&self, max_age: Duration) -> bool {
        let frames = self.frames.read().unwrap_or_else(PoisonError::into_inner);
        !frames.is_empty() && frames.values().all(|f| f.at.elapsed() < max_age)
    }
}

pub struct Hub {
    viewers: RwLock<HashMap<String, ViewerEntry>>,
    state: StdRwLock<MonitorState>,
    /// Serializes `start()`; also holds the previous session's supervisor.
    start_lock: Mutex<Option<JoinHandle<()>>>,
    frames: FrameCache,
    stats: Arc<Stats>,
    launcher: Box<dyn WorkerLauncher>,
    settings: HubSettings,
}

impl Hub {
    pub fn new(settings: HubSettings, stats: Arc<Stats>, launcher: Box<dyn WorkerLauncher>) -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
            state: StdRwLock::new(MonitorState::default()),
            start_lock: Mutex::new(None),
            frames: FrameCache::default(),
            stats,
            launcher,
            settings,
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn frames(&self) -> &FrameCache {
        &self.frames
    }

    pub fn is_running(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).running
    }

    pub fn started_by(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).started_by.clone()
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    /// Register a viewer and report the monitoring state to it.
    ///
    /// Returns the viewer and the receiving end of its outbound queue.
    pub async fn connect(&self, name: String, role: Role) -> (Viewer, mpsc::Receiver<Outbound>) {
        let viewer = Viewer {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            role,
        };
        let running = self.is_running();

        // The initial state is queued before the viewer becomes visible to
        // broadcasts, so no live message can overtake it.
        let mut viewers = self.viewers.write().await;
        let active_users = viewers.len() + 1;
        let mut status = StatusPayload::new(CameraStatus::Connected, running).started_by(self.started_by());
        status.active_users = Some(active_users);
        status.your_role = Some(viewer.role);
        status.can_stop = Some(viewer.is_admin());
        let mut initial = vec![ServerMessage::Status(status)];
        if running {
            initial.extend(self.replay_messages());
        }

        let (tx, rx) = mpsc::channel(self.settings.viewer_queue.max(initial.len()));
        for message in initial {
            match message.to_json() {
                Ok(text) => {
                    if tx.try_send(Outbound::Text(text)).is_err() {
                        tracing::warn!(viewer = %viewer.id, "viewer queue full during connect");
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode message"),
            }
        }
        viewers.insert(
            viewer.id.clone(),
            ViewerEntry {
                viewer: viewer.clone(),
                sender: tx,
            },
        );
        drop(viewers);
        tracing::info!(viewer = %viewer.id, name = %viewer.name, role = ?viewer.role, active_users, "viewer connected");
        (viewer, rx)
    }

    /// Deregister a viewer. Monitoring continues regardless of who leaves.
    pub async fn disconnect(&self, viewer_id: &str) {
        let removed = self.viewers.write().await.remove(viewer_id);
        if let Some(entry) = removed {
            tracing::info!(viewer = %viewer_id, name = %entry.viewer.name, "viewer disconnected");
        }
    }

    /// Begin a monitoring session unless one is already active.
    pub async fn start(self: &Arc<Self>, viewer: &Viewer) -> StartOutcome {
        let mut supervisor = self.start_lock.lock().await;

        if self.is_running() {
            return StartOutcome::AlreadyRunning {
                started_by: self.started_by(),
            };
        }

        // Let the previous session's workers finish releasing their cameras.
        if let Some(previous) = supervisor.take() {
            let _ = previous.await;
        }

        let cancel = CancellationToken::new();
        let generation = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.generation += 1;
            state.running = true;
            state.started_by = Some(viewer.name.clone());
            state.cancel = Some(cancel.clone());
            state.generation
        };

        let workers = self.launcher.launch(Arc::clone(self), cancel);
        tracing::info!(started_by = %viewer.name, workers = workers.len(), generation, "monitoring started");

        let hub = Arc::clone(self);
        *supervisor = Some(tokio::spawn(async move {
            futures::future::join_all(workers).await;
            hub.session_ended(generation).await;
        }));
        drop(supervisor);

        self.broadcast(ServerMessage::Status(
            StatusPayload::new(CameraStatus::Started, true)
                .message(format!("Cameras started by {}", viewer.name))
                .started_by(Some(viewer.name.clone())),
        ))
        .await;
        StartOutcome::Started
    }

    /// End the session. Only the starter or an admin may stop it; stopping
    /// an idle hub is a no-op.
    pub async fn stop(&self, viewer: &Viewer) -> StopOutcome {
        let (cancel, started_by) = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !state.running {
                return StopOutcome::NotRunning;
            }
            let permitted = viewer.is_admin() || state.started_by.as_deref() == Some(viewer.name.as_str());
            if !permitted {
                return StopOutcome::Forbidden {
                    started_by: state.started_by.clone(),
                };
            }
            state.running = false;
            (state.cancel.take(), state.started_by.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        tracing::info!(stopped_by = %viewer.name, started_by = ?started_by, "monitoring stopped");

        self.broadcast(ServerMessage::Status(
            StatusPayload::new(CameraStatus::Stopped, false).message(format!("Cameras stopped by {}", viewer.name)),
        ))
        .await;
        StopOutcome::Stopped
    }

    /// Called once every worker of session `generation` has exited.
    async fn session_ended(&self, generation: u64) {
        let ended = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.running && state.generation == generation {
                state.running = false;
                state.started_by = None;
                state.cancel = None;
                true
            } else {
                false
            }
        };
        if ended {
            tracing::warn!(generation, "all camera workers exited; monitoring ended");
            self.broadcast(ServerMessage::Status(
                StatusPayload::new(CameraStatus::Stopped, false).message("All cameras stopped"),
            ))
            .await;
        }
    }

    /// Dispatch one inbound command from `viewer`.
    pub async fn handle_command(self: &Arc<Self>, viewer: &Viewer, command: ClientCommand) {
        match command {
            ClientCommand::Start => match self.start(viewer).await {
                StartOutcome::Started => {}
                StartOutcome::AlreadyRunning { started_by } => {
                    tracing::debug!(viewer = %viewer.id, started_by = ?started_by, "start ignored; already running");
                    self.replay_to(&viewer.id).await;
                }
            },
            ClientCommand::Stop => match self.stop(viewer).await {
                StopOutcome::Stopped => {}
                StopOutcome::NotRunning => {
                    self.send_to(
                        &viewer.id,
                        ServerMessage::Status(StatusPayload::new(CameraStatus::Stopped, false)),
                    )
                    .await;
                }
                StopOutcome::Forbidden { started_by } => {
                    tracing::warn!(viewer = %viewer.name, started_by = ?started_by, "unauthorized stop rejected");
                    let owner = started_by.unwrap_or_else(|| "the starter".to_string());
                    self.send_to(
                        &viewer.id,
                        ServerMessage::error(format!("Only {owner} or admin can stop cameras")),
                    )
                    .await;
                }
            },
            ClientCommand::GetCachedFrames => {
                for frame in self.frames.snapshot() {
                    self.send_to(&viewer.id, ServerMessage::Frame(frame)).await;
                }
            }
            ClientCommand::Stats => {
                let payload = self.stats_payload().await;
                self.send_to(&viewer.id, ServerMessage::Stats(payload)).await;
            }
        }
    }

    pub async fn stats_payload(&self) -> StatsPayload {
        let snapshot = self.stats.snapshot();
        StatsPayload {
            frames_processed: snapshot.frames_processed,
            total_faces: snapshot.total_faces,
            recognized: snapshot.recognized,
            unknown: snapshot.unknown,
            active_users: self.viewer_count().await,
            cameras_running: self.is_running(),
            started_by: self.started_by(),
        }
    }

    /// Cached frames followed by an "already running" notice.
    fn replay_messages(&self) -> Vec<ServerMessage> {
        let mut messages: Vec<ServerMessage> = self.frames.snapshot().into_iter().map(ServerMessage::Frame).collect();
        let started_by = self.started_by();
        let message = match &started_by {
            Some(name) => format!("Cameras already running, started by {name}"),
            None => "Cameras already running".to_string(),
        };
        messages.push(ServerMessage::Status(
            StatusPayload::new(CameraStatus::AlreadyRunning, self.is_running())
                .message(message)
                .started_by(started_by),
        ));
        messages
    }

    async fn replay_to(&self, viewer_id: &str) {
        for message in self.replay_messages() {
            self.send_to(viewer_id, message).await;
        }
    }

    /// Deliver to a single viewer. A viewer that cannot accept is dropped.
    pub async fn send_to(&self, viewer_id: &str, message: ServerMessage) {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode message");
                return;
            }
        };
        let sender = self.viewers.read().await.get(viewer_id).map(|e| e.sender.clone());
        let Some(sender) = sender else {
            return;
        };
        if !deliver(&sender, Outbound::Text(text), self.settings.send_timeout).await {
            self.drop_viewers(&[viewer_id.to_string()]).await;
        }
    }

    /// Fan `message` out to every viewer concurrently. Frames are cached
    /// first. Viewers that fail or time out are removed.
    pub async fn broadcast(&self, message: ServerMessage) {
        if let ServerMessage::Frame(frame) = &message {
            self.frames.store(frame.clone());
        }
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode broadcast");
                return;
            }
        };
        self.fan_out(Outbound::Text(text)).await;
    }

    /// Ping every viewer; used by the heartbeat.
    pub async fn ping_all(&self) {
        self.fan_out(Outbound::Ping).await;
    }

    async fn fan_out(&self, item: Outbound) {
        let targets: Vec<(String, mpsc::Sender<Outbound>)> = self
            .viewers
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.sender.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let timeout = self.settings.send_timeout;
        let sends = targets.iter().map(|(id, sender)| {
            let item = item.clone();
            async move { (id, deliver(sender, item, timeout).await) }
        });
        let failed: Vec<String> = futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|(_, delivered)| !delivered)
            .map(|(id, _)| id.clone())
            .collect();

        if !failed.is_empty() {
            self.drop_viewers(&failed).await;
        }
    }

    async fn drop_viewers(&self, ids: &[String]) {
        let mut viewers = self.viewers.write().await;
        for id in ids {
            if let Some(entry) = viewers.remove(id) {
                tracing::warn!(viewer = %id, name = %entry.viewer.name, "viewer dropped after failed send");
            }
        }
    }

    /// Stop the session and close every viewer. Used at shutdown.
    pub async fn shutdown(&self) {
        let cancel = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.running = false;
            state.started_by = None;
            state.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let mut viewers = self.viewers.write().await;
        let count = viewers.len();
        for entry in viewers.values() {
            let _ = entry.sender.try_send(Outbound::Close);
        }
        viewers.clear();
        tracing::info!(count, "closed all viewer connections");
    }
}

async fn deliver(sender: &mpsc::Sender<Outbound>, item: Outbound, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, sender.send(item)).await, Ok(Ok(())))
}
