use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, NaiveTime};
use rollcall_core::{MatcherConfig, Pose};
use rollcall_store::paths::{default_config_path, default_db_path};
use rollcall_store::{parse_utc_offset, EventKind, OutBeforeIn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One camera feed and the attendance event it produces.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    /// Short display label, e.g. "entry".
    pub label: String,
    /// Identifier written to the ledger.
    pub id: String,
    /// Stream URL.
    pub address: String,
    pub purpose: EventKind,
}

/// Daemon configuration: TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub db_path: PathBuf,
    /// Face analysis service endpoint.
    pub analyzer_url: String,
    pub analyzer_timeout_ms: u64,
    /// Minimum multi-angle confidence for a positive match.
    pub recognition_threshold: f32,
    /// Faces with a lower detector score are not matched.
    pub detection_floor: f32,
    pub corroboration_gap: f32,
    pub single_pose_penalty: f32,
    pub neighbors: usize,
    /// Process every Nth frame; the rest are drained.
    pub frame_skip: u64,
    pub max_faces_per_frame: usize,
    pub process_width: u32,
    pub process_height: u32,
    pub jpeg_quality: u8,
    pub max_reconnect_attempts: u32,
    pub read_retry_delay_ms: u64,
    pub frame_interval_ms: u64,
    /// Frames discarded after connecting, while the stream settles.
    pub warmup_grabs: usize,
    pub index_max_age_secs: u64,
    /// Fixed offset defining the ledger's calendar day, e.g. "+05:30".
    pub reporting_utc_offset: String,
    pub out_before_in: OutBeforeIn,
    pub broadcast_send_timeout_ms: u64,
    pub viewer_queue: usize,
    /// Daily stats reset, "HH:MM" in the reporting time zone.
    pub stats_reset_time: String,
    pub cameras: Vec<CameraConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            db_path: default_db_path(),
            analyzer_url: "http://127.0.0.1:8500/analyze".to_string(),
            analyzer_timeout_ms: 5000,
            recognition_threshold: 0.40,
            detection_floor: 0.35,
            corroboration_gap: 0.08,
            single_pose_penalty: 0.6,
            neighbors: 20,
            frame_skip: 4,
            max_faces_per_frame: 10,
            process_width: 640,
            process_height: 480,
            jpeg_quality: 60,
            max_reconnect_attempts: 5,
            read_retry_delay_ms: 500,
            frame_interval_ms: 33,
            warmup_grabs: 20,
            index_max_age_secs: 300,
            reporting_utc_offset: "+05:30".to_string(),
            out_before_in: OutBeforeIn::TreatAsIn,
            broadcast_send_timeout_ms: 2000,
            viewer_queue: 32,
            stats_reset_time: "00:30".to_string(),
            cameras: vec![
                CameraConfig {
                    label: "entry".to_string(),
                    id: "entry_camera".to_string(),
                    address: "http://127.0.0.1:8081/stream".to_string(),
                    purpose: EventKind::In,
                },
                CameraConfig {
                    label: "exit".to_string(),
                    id: "exit_camera".to_string(),
                    address: "http://127.0.0.1:8082/stream".to_string(),
                    purpose: EventKind::Out,
                },
            ],
        }
    }
}

impl Config {
    /// Load `path` (or the default config path), falling back to defaults
    /// when the file does not exist, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            tracing::info!(path = %path.display(), "configuration loaded");
            config
        } else {
            tracing::info!(path = %path.display(), "no configuration file; using defaults");
            Config::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_ANALYZER_URL") {
            self.analyzer_url = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_REPORTING_UTC_OFFSET") {
            self.reporting_utc_offset = v;
        }
        self.recognition_threshold = env_f32("ROLLCALL_RECOGNITION_THRESHOLD", self.recognition_threshold);
        self.detection_floor = env_f32("ROLLCALL_DETECTION_FLOOR", self.detection_floor);
        self.frame_skip = env_u64("ROLLCALL_FRAME_SKIP", self.frame_skip);
        self.max_reconnect_attempts = env_u64("ROLLCALL_MAX_RECONNECT_ATTEMPTS", self.max_reconnect_attempts as u64)
            .try_into()
            .unwrap_or(self.max_reconnect_attempts);
        self.index_max_age_secs = env_u64("ROLLCALL_INDEX_MAX_AGE_SECS", self.index_max_age_secs);
        self.viewer_queue = env_usize("ROLLCALL_VIEWER_QUEUE", self.viewer_queue);
        for camera in &mut self.cameras {
            let key = format!("ROLLCALL_CAMERA_{}_ADDRESS", camera.label.to_ascii_uppercase());
            if let Ok(v) = std::env::var(&key) {
                camera.address = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.reporting_offset()?;
        self.stats_reset_at()?;
        if self.cameras.is_empty() {
            bail!("no cameras configured");
        }
        let mut labels: Vec<&str> = self.cameras.iter().map(|c| c.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() != self.cameras.len() {
            bail!("camera labels must be unique");
        }
        if !(0.0..=1.0).contains(&self.recognition_threshold) {
            bail!("recognition_threshold must be within [0, 1]");
        }
        if self.neighbors < Pose::ALL.len() {
            bail!("neighbors must be at least {} (one per pose)", Pose::ALL.len());
        }
        if self.process_width == 0 || self.process_height == 0 {
            bail!("process_width and process_height must be non-zero");
        }
        Ok(())
    }

    pub fn reporting_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.reporting_utc_offset)
            .with_context(|| format!("invalid reporting_utc_offset: {:?}", self.reporting_utc_offset))
    }

    pub fn stats_reset_at(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.stats_reset_time, "%H:%M")
            .with_context(|| format!("invalid stats_reset_time: {:?}", self.stats_reset_time))
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            threshold: self.recognition_threshold,
            corroboration_gap: self.corroboration_gap,
            single_pose_penalty: self.single_pose_penalty,
            neighbors: self.neighbors,
        }
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_millis(self.analyzer_timeout_ms)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
