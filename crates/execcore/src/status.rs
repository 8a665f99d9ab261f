use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state shared by nodes and whole flows.
///
/// Only `Ready` and `Disabled` may be set by clients (submission overrides);
/// every other value is written by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ready,
    Disabled,
    Queued,
    Running,
    Success,
    Failed,
    Killed,
    FailedFinishing,
}

impl Status {
    /// A flow in a terminal state never mutates again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failed | Status::Killed)
    }

    /// Whether a client may request this status at submission time.
    pub fn is_client_settable(&self) -> bool {
        matches!(self, Status::Ready | Status::Disabled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ready => "READY",
            Status::Disabled => "DISABLED",
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
            Status::Killed => "KILLED",
            Status::FailedFinishing => "FAILED_FINISHING",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_screaming_case() {
        assert_eq!(serde_json::to_string(&Status::Ready).unwrap(), "\"READY\"");
        assert_eq!(
            serde_json::to_string(&Status::FailedFinishing).unwrap(),
            "\"FAILED_FINISHING\""
        );
        let parsed: Status = serde_json::from_str("\"KILLED\"").unwrap();
        assert_eq!(parsed, Status::Killed);
    }

    #[test]
    fn terminal_states() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Killed.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::FailedFinishing.is_terminal());
    }
}
