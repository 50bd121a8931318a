use std::fmt;

use crate::capture::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing,
    Paused,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Capturing => "capturing",
            CaptureState::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::Start => "start",
            SessionEvent::Pause => "pause",
            SessionEvent::Resume => "resume",
            SessionEvent::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {event} while {from}")]
    InvalidTransition {
        from: CaptureState,
        event: SessionEvent,
    },
    #[error("settings can only be changed while idle (currently {0})")]
    SettingsLocked(CaptureState),
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
}

/// The idle/capturing/paused lifecycle of a capture session.
#[derive(Debug, Default)]
pub struct CaptureStateMachine {
    state: CaptureState,
}

impl CaptureStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn next(from: CaptureState, event: SessionEvent) -> Option<CaptureState> {
        use CaptureState::*;
        match (from, event) {
            (Idle, SessionEvent::Start) => Some(Capturing),
            (Capturing, SessionEvent::Pause) => Some(Paused),
            (Paused, SessionEvent::Resume) => Some(Capturing),
            (Capturing | Paused, SessionEvent::Stop) => Some(Idle),
            _ => None,
        }
    }

    /// Applies `event` or leaves the state untouched and reports why not.
    pub fn try_transition(&mut self, event: SessionEvent) -> Result<CaptureState, SessionError> {
        let next = Self::next(self.state, event).ok_or(SessionError::InvalidTransition {
            from: self.state,
            event,
        })?;
        log::debug!("Session {} -> {next}", self.state);
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut machine = CaptureStateMachine::new();
        assert_eq!(machine.state(), CaptureState::Idle);
        assert_eq!(machine.try_transition(SessionEvent::Start), Ok(CaptureState::Capturing));
        assert_eq!(machine.try_transition(SessionEvent::Pause), Ok(CaptureState::Paused));
        assert_eq!(machine.try_transition(SessionEvent::Resume), Ok(CaptureState::Capturing));
        assert_eq!(machine.try_transition(SessionEvent::Pause), Ok(CaptureState::Paused));
        assert_eq!(machine.try_transition(SessionEvent::Stop), Ok(CaptureState::Idle));
    }

    #[test]
    fn test_rejected_events_leave_state_alone() {
        let mut machine = CaptureStateMachine::new();
        for event in [SessionEvent::Pause, SessionEvent::Resume, SessionEvent::Stop] {
            assert_eq!(
                machine.try_transition(event),
                Err(SessionError::InvalidTransition {
                    from: CaptureState::Idle,
                    event
                })
            );
        }
        assert_eq!(machine.state(), CaptureState::Idle);

        machine.try_transition(SessionEvent::Start).unwrap();
        assert!(machine.try_transition(SessionEvent::Start).is_err());
        assert!(machine.try_transition(SessionEvent::Resume).is_err());
        assert_eq!(machine.state(), CaptureState::Capturing);
    }

    #[test]
    fn test_error_messages_are_readable() {
        let error = SessionError::InvalidTransition {
            from: CaptureState::Idle,
            event: SessionEvent::Pause,
        };
        assert_eq!(error.to_string(), "cannot pause while idle");
        assert_eq!(
            SessionError::SettingsLocked(CaptureState::Capturing).to_string(),
            "settings can only be changed while idle (currently capturing)"
        );
    }
}
