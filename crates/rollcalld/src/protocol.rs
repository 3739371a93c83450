//! Viewer wire protocol. JSON text frames in both directions.

use chrono::{DateTime, Utc};
use rollcall_hw::FaceAnnotation;
use rollcall_store::{EventKind, LedgerAction};
use serde::{Deserialize, Serialize};

/// Viewer permission level. Admins may stop a session they did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

/// Inbound command, `{"action": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    Start,
    Stop,
    GetCachedFrames,
    Stats,
}

pub fn parse_command(text: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Connected,
    Started,
    AlreadyRunning,
    Stopped,
    CameraFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusPayload {
    pub camera_status: CameraStatus,
    pub cameras_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_users: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub your_role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_stop: Option<bool>,
}

impl StatusPayload {
    pub fn new(camera_status: CameraStatus, cameras_running: bool) -> Self {
        Self {
            camera_status,
            cameras_running,
            message: None,
            started_by: None,
            camera: None,
            active_users: None,
            your_role: None,
            can_stop: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn started_by(mut self, started_by: Option<String>) -> Self {
        self.started_by = started_by;
        self
    }

    pub fn camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }
}

/// An annotated frame from one camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePayload {
    pub camera: String,
    /// Base64 JPEG.
    pub image: String,
    pub faces: usize,
    pub annotations: Vec<FaceAnnotation>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendancePayload {
    pub identity_id: String,
    pub name: String,
    pub event: EventKind,
    pub camera: String,
    pub confidence: f32,
    /// Wall-clock time in the reporting time zone.
    pub timestamp: String,
    pub action: LedgerAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsPayload {
    pub frames_processed: u64,
    pub total_faces: u64,
    pub recognized: u64,
    pub unknown: u64,
    pub active_users: usize,
    pub cameras_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
}

/// Outbound message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status(StatusPayload),
    Frame(FramePayload),
    Attendance(AttendancePayload),
    Stats(StatsPayload),
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command(r#"{"action":"start"}"#).unwrap(), ClientCommand::Start);
        assert_eq!(parse_command(r#"{"action":"stop"}"#).unwrap(), ClientCommand::Stop);
        assert_eq!(
            parse_command(r#"{"action":"get_cached_frames"}"#).unwrap(),
            ClientCommand::GetCachedFrames
        );
        assert_eq!(parse_command(r#"{"action":"stats","extra":1}"#).unwrap(), ClientCommand::Stats);
        assert!(parse_command(r#"{"action":"reboot"}"#).is_err());
        assert!(parse_command("not json").is_err());
    }

    #[test]
    fn test_status_wire_shape() {
        let msg = ServerMessage::Status(
            StatusPayload::new(CameraStatus::AlreadyRunning, true)
                .message("Cameras already running")
                .started_by(Some("asha".into())),
        );
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "status",
                "camera_status": "already_running",
                "cameras_running": true,
                "message": "Cameras already running",
                "started_by": "asha",
            })
        );
    }

    #[test]
    fn test_attendance_wire_shape() {
        let msg = ServerMessage::Attendance(AttendancePayload {
            identity_id: "E001".into(),
            name: "Asha".into(),
            event: EventKind::Out,
            camera: "exit".into(),
            confidence: 0.5,
            timestamp: "2026-03-02 18:30:00".into(),
            action: LedgerAction::Updated,
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "attendance");
        assert_eq!(value["event"], "OUT");
        assert_eq!(value["action"], "updated");
        assert_eq!(ServerMessage::error("nope").to_json().unwrap(), r#"{"type":"error","message":"nope"}"#);
    }
}
