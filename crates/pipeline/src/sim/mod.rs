//! In-process stand-ins for the device and the network: a scripted camera,
//! a sensor platform driven by hand and a loopback connector.

mod camera;
mod network;
mod sensors;

pub use camera::ScriptedCamera;
pub use network::{LoopbackConnector, LoopbackPeer};
pub use sensors::ManualSensorPlatform;
