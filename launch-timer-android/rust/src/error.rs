use jni::JNIEnv;
use launch_timer_rs::EngineError;
use thiserror::Error;

/// Errors surfaced to Kotlin as exceptions
#[derive(Error, Debug, Clone)]
pub enum LaunchTimerError {
    #[error("Engine not initialized")]
    NotInitialized,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("JNI error: {0}")]
    JniError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for JNI operations
pub type JResult<T> = Result<T, LaunchTimerError>;

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &LaunchTimerError) -> JResult<()> {
    let exception_class = match error {
        LaunchTimerError::NotInitialized
        | LaunchTimerError::Engine(EngineError::InvalidTransition { .. }) => {
            "java/lang/IllegalStateException"
        }
        LaunchTimerError::Engine(EngineError::PermissionDenied) => "java/lang/SecurityException",
        LaunchTimerError::InvalidParameters(_)
        | LaunchTimerError::Engine(EngineError::Config(_)) => "java/lang/IllegalArgumentException",
        LaunchTimerError::Engine(EngineError::SensorUnavailable(_))
        | LaunchTimerError::Engine(EngineError::Storage(_))
        | LaunchTimerError::Engine(EngineError::Sync(_)) => "java/io/IOException",
        LaunchTimerError::Engine(EngineError::Internal(_))
        | LaunchTimerError::JniError(_)
        | LaunchTimerError::Internal(_) => "java/lang/RuntimeException",
    };

    let message = error.to_string();
    env.throw_new(exception_class, message)
        .map_err(|_| LaunchTimerError::JniError("Failed to throw exception".to_string()))?;

    Ok(())
}
