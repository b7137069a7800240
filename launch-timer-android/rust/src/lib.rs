// Launch Timer Android JNI Library
// Exposes the run & drive timing engine to Kotlin via JNI

pub mod android_jni;
pub mod error;

pub use error::{JResult, LaunchTimerError};
