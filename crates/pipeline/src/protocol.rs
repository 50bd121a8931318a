use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_HOST: &str = "localhost";

/// Wall-clock time in fractional seconds since the unix epoch.
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("encoding failed: {0}")]
    Encode(serde_json::Error),
    #[error("decoding failed: {0}")]
    Decode(serde_json::Error),
}

/// Inertial reading as carried inside a frame message. The sample timestamp
/// is dropped on the wire; the frame's capture timestamp is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuPayload {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    /// Scalar-first quaternion `[w, x, y, z]`.
    pub orientation: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    /// Pinhole estimate for an image of the given size, assuming square
    /// pixels and the principal point at the image centre.
    pub fn from_dimensions(width: u32, height: u32, horizontal_fov_deg: f32) -> Self {
        let half_fov = (horizontal_fov_deg.clamp(1.0, 179.0) / 2.0).to_radians();
        let focal = (width as f32 / 2.0) / half_fov.tan();
        Self {
            fx: focal,
            fy: focal,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePacket {
    /// Capture start, wall-clock seconds.
    pub timestamp: f64,
    /// Encoded image bytes, base64 on the wire.
    #[serde(rename = "frame", with = "base64_payload")]
    pub payload: Vec<u8>,
    pub imu: ImuPayload,
    pub camera_intrinsics: CameraIntrinsics,
}

impl FramePacket {
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

mod base64_payload {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    StartSession,
    EndSession,
    Pause,
    Resume,
    GetStatus,
    Ping,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::StartSession => "start_session",
            ControlCommand::EndSession => "end_session",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::GetStatus => "get_status",
            ControlCommand::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub command: ControlCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_time: Option<f64>,
}

impl ControlMessage {
    pub fn new(command: ControlCommand) -> Self {
        Self {
            command,
            session_id: None,
            client_time: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_client_time(mut self, client_time: f64) -> Self {
        self.client_time = Some(client_time);
        self
    }
}

/// Everything a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Frame(FramePacket),
    Control(ControlMessage),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Server-side session statistics. Any field may be missing; an empty
/// object decodes to all defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub frame_count: u64,
    #[serde(rename = "duration_sec")]
    pub duration_secs: f64,
    pub fps: f64,
    pub avg_latency_ms: f64,
    pub bandwidth_mbps: f64,
    pub total_mb: f64,
    #[serde(rename = "queue_size")]
    pub queue_depth: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMessageKind {
    Status,
    Ack,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SessionStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Connected client count, reported by `get_status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<usize>,
    /// Active session name, reported by `get_status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl ServerMessage {
    pub fn new(kind: ServerMessageKind) -> Self {
        Self {
            kind,
            client_id: None,
            server_time: None,
            session_id: None,
            stats: None,
            error: None,
            frame_count: None,
            command: None,
            client_time: None,
            message: None,
            clients: None,
            session: None,
        }
    }

    pub fn status() -> Self {
        Self::new(ServerMessageKind::Status)
    }

    pub fn ack() -> Self {
        Self::new(ServerMessageKind::Ack)
    }

    pub fn error(text: impl Into<String>) -> Self {
        let mut message = Self::new(ServerMessageKind::Error);
        message.error = Some(text.into());
        message
    }

    /// True for the ack the server sends in reply to a `ping`.
    pub fn is_pong(&self) -> bool {
        self.kind == ServerMessageKind::Ack && self.command.as_deref() == Some("pong")
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_packet() -> FramePacket {
        FramePacket {
            timestamp: 1700000000.25,
            payload: vec![0xFF, 0xD8, 0xFF, 0xD9],
            imu: ImuPayload {
                accel: [0.0, 0.0, -9.8],
                gyro: [0.01, 0.0, 0.0],
                orientation: [1.0, 0.0, 0.0, 0.0],
            },
            camera_intrinsics: CameraIntrinsics::from_dimensions(1280, 720, 60.0),
        }
    }

    #[test]
    fn test_frame_message_has_expected_shape() {
        let json = ClientMessage::Frame(sample_packet()).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "frame");
        assert_eq!(value["frame"], "/9j/2Q==");
        assert_eq!(value["imu"]["orientation"][0], 1.0);
        assert_eq!(value["imu"]["accel"].as_array().unwrap().len(), 3);
        assert_eq!(value["camera_intrinsics"]["width"], 1280);
        assert!(value["imu"].get("timestamp").is_none());

        let ClientMessage::Frame(decoded) = ClientMessage::from_json(&json).unwrap() else {
            panic!("expected a frame message");
        };
        assert_eq!(decoded.payload, sample_packet().payload);
        assert_eq!(decoded.timestamp, sample_packet().timestamp);
        assert_eq!(decoded.camera_intrinsics.height, 720);
    }

    #[test]
    fn test_control_message_omits_missing_fields() {
        let json = ClientMessage::Control(ControlMessage::new(ControlCommand::StartSession))
            .to_json()
            .unwrap();
        assert_eq!(json, r#"{"type":"control","command":"start_session"}"#);

        let ping = ControlMessage::new(ControlCommand::Ping)
            .with_session(Some("session_1".to_owned()))
            .with_client_time(12.5);
        let value: Value =
            serde_json::from_str(&ClientMessage::Control(ping).to_json().unwrap()).unwrap();
        assert_eq!(value["command"], "ping");
        assert_eq!(value["session_id"], "session_1");
        assert_eq!(value["client_time"], 12.5);
    }

    #[test]
    fn test_server_ack_with_stats_parses() {
        let text = r#"{"type":"ack","frame_count":20,"stats":{
            "session_id":"session_42","frame_count":20,"duration_sec":2.0,"fps":10.0,
            "avg_latency_ms":35.5,"bandwidth_mbps":1.2,"total_mb":0.3,"queue_size":1}}"#;
        let message = ServerMessage::from_json(text).unwrap();

        assert_eq!(message.kind, ServerMessageKind::Ack);
        assert_eq!(message.frame_count, Some(20));
        let stats = message.stats.unwrap();
        assert_eq!(stats.session_id.as_deref(), Some("session_42"));
        assert_eq!(stats.queue_depth, 1);
        assert!((stats.avg_latency_ms - 35.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats_object_and_extra_fields_are_accepted() {
        let text = r#"{"type":"status","command":"end_session","stats":{},"message":"Session ended","clients":1,"uptime":9}"#;
        let message = ServerMessage::from_json(text).unwrap();

        assert_eq!(message.kind, ServerMessageKind::Status);
        assert_eq!(message.stats, Some(SessionStats::default()));
        assert_eq!(message.message.as_deref(), Some("Session ended"));
        assert_eq!(message.clients, Some(1));
    }

    #[test]
    fn test_pong_is_recognised() {
        let message =
            ServerMessage::from_json(r#"{"type":"ack","command":"pong","client_time":3.0}"#)
                .unwrap();
        assert!(message.is_pong());
        assert!(!ServerMessage::ack().is_pong());
    }

    #[test]
    fn test_malformed_server_messages_are_rejected() {
        assert!(ServerMessage::from_json("not json").is_err());
        assert!(ServerMessage::from_json(r#"{"type":"frame"}"#).is_err());
        assert!(ServerMessage::from_json(r#"{"client_id":"x"}"#).is_err());
    }

    #[test]
    fn test_intrinsics_follow_image_size() {
        let intrinsics = CameraIntrinsics::from_dimensions(640, 480, 90.0);
        assert_eq!(intrinsics.width, 640);
        assert_eq!(intrinsics.height, 480);
        assert!((intrinsics.cx - 320.0).abs() < 1e-4);
        assert!((intrinsics.cy - 240.0).abs() < 1e-4);
        // 90 degree horizontal fov puts the focal length at half the width
        assert!((intrinsics.fx - 320.0).abs() < 1e-2);
        assert_eq!(intrinsics.fx, intrinsics.fy);
    }
}
