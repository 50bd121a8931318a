pub mod capture;
pub mod protocol;
pub mod sensor;
pub mod session;
pub mod sim;
pub mod stats;
pub mod task;
pub mod transport;

pub use capture::{
    Camera, CaptureConfig, CaptureCounters, CaptureError, CaptureRequest, CaptureSettings,
    CapturedImage, FrameCaptureLoop, FrameSink, Pacing, Resolution, SettingsError,
};
pub use protocol::{
    CameraIntrinsics, ClientMessage, ControlCommand, ControlMessage, DEFAULT_HOST, DEFAULT_PORT,
    FramePacket, ImuPayload, ProtocolError, ServerMessage, ServerMessageKind, SessionStats,
};
pub use sensor::{
    EulerAngles, InertialSample, InertialSensor, SensorChannel, SensorError, SensorListener,
    SensorPlatform, SensorReading, SensorSampler, Subscription, euler_to_quaternion,
};
pub use session::{CaptureState, CaptureStateMachine, SessionController, SessionError, SessionEvent};
pub use stats::{StatsAggregator, StatsSnapshot};
pub use task::ScheduledTask;
pub use transport::{
    ConnectionState, Connector, Link, TransportConfig, TransportCounters, TransportError,
    TransportHandle, TransportSession, WsConnector, reconnect_delay,
};
