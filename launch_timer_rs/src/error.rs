use thiserror::Error;

/// Timing engine error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{machine}: cannot {action} while {from}")]
    InvalidTransition {
        machine: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn transition(
        machine: &'static str,
        from: impl std::fmt::Debug,
        action: &'static str,
    ) -> Self {
        EngineError::InvalidTransition {
            machine,
            from: format!("{:?}", from).to_lowercase(),
            action,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("JSON: {}", e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        #[derive(Debug)]
        enum Status {
            Idle,
        }
        let err = EngineError::transition("run", Status::Idle, "arm");
        assert_eq!(err.to_string(), "run: cannot arm while idle");
    }
}
