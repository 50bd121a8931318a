mod controller;
mod state;

pub use controller::{ForwardGate, SessionController};
pub use state::{CaptureState, CaptureStateMachine, SessionError, SessionEvent};
