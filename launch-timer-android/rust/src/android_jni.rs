use crate::error::{throw_java_exception, JResult, LaunchTimerError};
use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jdouble, jint, jlong, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use launch_timer_rs::background::SampleVerdict;
use launch_timer_rs::engine::EngineEvent;
use launch_timer_rs::providers::LogHaptics;
use launch_timer_rs::storage::JsonFileStore;
use launch_timer_rs::sync::{HttpCloudSync, SyncQueue};
use launch_timer_rs::types::STANDARD_GRAVITY;
use launch_timer_rs::{
    BackgroundAccumulator, Engine, EngineConfig, EngineResult, InertialSample, LocationSample,
    SystemClock,
};
use std::sync::{Arc, Mutex, MutexGuard, Once};

// Engine lives behind one lock for the foreground thread. The background
// buffer is shared separately so the location service can record fixes
// while the activity is suspended without touching the engine.
lazy_static::lazy_static! {
    static ref ENGINE: Mutex<Option<Engine>> = Mutex::new(None);
    static ref BACKGROUND: BackgroundAccumulator = BackgroundAccumulator::new();
}

static LOGGER: Once = Once::new();

fn init_logging() {
    LOGGER.call_once(|| {
        #[cfg(target_os = "android")]
        {
            let _ = android_log::init("LaunchTimer");
        }
    });
}

fn lock_engine() -> JResult<MutexGuard<'static, Option<Engine>>> {
    ENGINE
        .lock()
        .map_err(|_| LaunchTimerError::Internal("Failed to acquire engine lock".to_string()))
}

fn with_engine<T>(f: impl FnOnce(&mut Engine) -> EngineResult<T>) -> JResult<T> {
    let mut guard = lock_engine()?;
    let engine = guard.as_mut().ok_or(LaunchTimerError::NotInitialized)?;
    Ok(f(engine)?)
}

fn read_string(env: &mut JNIEnv, value: &JString) -> JResult<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    let text: String = env
        .get_string(value)
        .map_err(|e| LaunchTimerError::JniError(e.to_string()))?
        .into();
    Ok(Some(text))
}

/// Negative values are how Kotlin says "not reported"
fn optional(value: jdouble) -> Option<f64> {
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Event count on success, -1 after throwing
fn event_count(env: &mut JNIEnv, result: JResult<Vec<EngineEvent>>) -> jint {
    match result {
        Ok(events) => {
            for event in &events {
                log::debug!("{:?}", event);
            }
            events.len() as jint
        }
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

fn status_code(env: &mut JNIEnv, result: JResult<()>) -> jint {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            -1
        }
    }
}

fn flag(env: &mut JNIEnv, result: JResult<bool>) -> jboolean {
    match result {
        Ok(true) => JNI_TRUE,
        Ok(false) => JNI_FALSE,
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            JNI_FALSE
        }
    }
}

/// `None` maps to a Java null without an exception
fn java_string(env: &mut JNIEnv, result: JResult<Option<String>>) -> jstring {
    match result {
        Ok(Some(text)) => match env.new_string(&text) {
            Ok(jstr) => jstr.into_raw(),
            Err(_) => {
                let _ = throw_java_exception(
                    env,
                    &LaunchTimerError::JniError("Failed to create Java string".to_string()),
                );
                std::ptr::null_mut()
            }
        },
        Ok(None) => std::ptr::null_mut(),
        Err(e) => {
            let _ = throw_java_exception(env, &e);
            std::ptr::null_mut()
        }
    }
}

/// JNI: Create the engine
/// Parameters: settings JSON (null or empty for defaults), storage directory,
/// upload endpoint (null to keep records local)
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_init(
    mut env: JNIEnv,
    _class: JClass,
    config_json: JString,
    storage_dir: JString,
    sync_endpoint: JString,
) -> jint {
    init_logging();
    let result = init_impl(&mut env, &config_json, &storage_dir, &sync_endpoint);
    status_code(&mut env, result)
}

fn init_impl(
    env: &mut JNIEnv,
    config_json: &JString,
    storage_dir: &JString,
    sync_endpoint: &JString,
) -> JResult<()> {
    let config = match read_string(env, config_json)? {
        Some(json) if !json.trim().is_empty() => EngineConfig::from_json_str(&json)?,
        _ => EngineConfig::default(),
    };
    let dir = read_string(env, storage_dir)?
        .ok_or_else(|| LaunchTimerError::InvalidParameters("storage dir is null".to_string()))?;
    let endpoint = read_string(env, sync_endpoint)?;

    let mut engine = Engine::new(config, Arc::new(SystemClock))?
        .with_store(Box::new(JsonFileStore::new(&dir)?))
        .with_haptics(Box::new(LogHaptics))
        .with_background(BACKGROUND.clone());
    if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
        engine = engine.with_sync(SyncQueue::spawn(HttpCloudSync::new(endpoint))?);
    }

    *lock_engine()? = Some(engine);
    log::info!("engine initialized, records in {}", dir);
    Ok(())
}

/// JNI: Replace engine settings
/// Returns: event count, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_updateConfig(
    mut env: JNIEnv,
    _class: JClass,
    config_json: JString,
) -> jint {
    let result = read_string(&mut env, &config_json).and_then(|json| {
        let json = json
            .ok_or_else(|| LaunchTimerError::InvalidParameters("config is null".to_string()))?;
        let config = EngineConfig::from_json_str(&json)?;
        with_engine(|engine| engine.update_config(config))
    });
    event_count(&mut env, result)
}

/// JNI: Foreground location fix
/// Parameters: latitude, longitude, speed (m/s, negative if unknown),
/// accuracy (m, negative if unknown), timestamp (ms since epoch)
/// Returns: event count, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_pushLocation(
    mut env: JNIEnv,
    _class: JClass,
    latitude: jdouble,
    longitude: jdouble,
    speed: jdouble,
    accuracy: jdouble,
    timestamp: jlong,
) -> jint {
    let sample = LocationSample::new(
        latitude,
        longitude,
        optional(speed),
        optional(accuracy),
        timestamp,
    );
    let result = with_engine(|engine| Ok(engine.on_location(sample)));
    event_count(&mut env, result)
}

/// JNI: Accelerometer sample
/// Parameters: x, y, z (m/s²), timestamp (ms since epoch)
/// Returns: event count, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_pushInertial(
    mut env: JNIEnv,
    _class: JClass,
    x: jdouble,
    y: jdouble,
    z: jdouble,
    timestamp: jlong,
) -> jint {
    let sample = InertialSample::new(
        x / STANDARD_GRAVITY,
        y / STANDARD_GRAVITY,
        z / STANDARD_GRAVITY,
        timestamp,
    );
    let result = with_engine(|engine| Ok(engine.on_inertial(&sample)));
    event_count(&mut env, result)
}

/// JNI: Location fix delivered while the app is suspended. Never takes the engine lock.
/// Returns: true if the fix was accepted into the background buffer
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_pushBackgroundLocation(
    mut env: JNIEnv,
    _class: JClass,
    latitude: jdouble,
    longitude: jdouble,
    speed: jdouble,
    accuracy: jdouble,
    timestamp: jlong,
) -> jboolean {
    let sample = LocationSample::new(
        latitude,
        longitude,
        optional(speed),
        optional(accuracy),
        timestamp,
    );
    let result = BACKGROUND
        .record(&sample)
        .map(|verdict| matches!(verdict, SampleVerdict::Accepted { .. }))
        .map_err(LaunchTimerError::from);
    flag(&mut env, result)
}

/// JNI: Location updates stopped or failed
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_trackingLost(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(|engine| Ok(engine.on_tracking_lost()));
    event_count(&mut env, result)
}

/// JNI: Display tick
/// Returns: true when the displayed elapsed time changed
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_tick(
    mut env: JNIEnv,
    _class: JClass,
) -> jboolean {
    let result = with_engine(|engine| Ok(engine.tick()));
    flag(&mut env, result)
}

/// JNI: Whether the accelerometer should be subscribed right now
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_wantsInertial(
    mut env: JNIEnv,
    _class: JClass,
) -> jboolean {
    let result = with_engine(|engine| Ok(engine.wants_inertial()));
    flag(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_armRun(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::arm_run);
    event_count(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_cancelRun(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::cancel_run);
    event_count(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_stopRun(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::stop_run);
    event_count(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_resetRun(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::reset_run);
    event_count(&mut env, result)
}

/// JNI: Start or resume the drive
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_startDrive(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::start_drive);
    event_count(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_pauseDrive(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::pause_drive);
    event_count(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_stopDrive(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::stop_drive);
    event_count(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_resetDrive(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::reset_drive);
    event_count(&mut env, result)
}

/// JNI: Activity paused
/// Returns: 0 on success, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_enterBackground(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::enter_background);
    status_code(&mut env, result)
}

/// JNI: Activity resumed. Merges everything recorded while suspended.
/// Returns: event count, -1 on error (throws Java exception)
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_enterForeground(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(|engine| Ok(engine.enter_foreground()));
    event_count(&mut env, result)
}

/// JNI: Persist the last completed run (when auto-save is off)
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_saveLastRun(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::save_last_run);
    status_code(&mut env, result)
}

#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_saveLastDrive(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    let result = with_engine(Engine::save_last_drive);
    status_code(&mut env, result)
}

/// JNI: Requeue uploads that failed earlier
/// Returns: number of records requeued
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_syncPass(
    mut env: JNIEnv,
    _class: JClass,
) -> jint {
    match with_engine(|engine| Ok(engine.sync_pass())) {
        Ok(requeued) => requeued as jint,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            -1
        }
    }
}

/// JNI: Live status snapshot as JSON
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_getStatusJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_engine(|engine| Ok(engine.snapshot().to_json()?)).map(Some);
    java_string(&mut env, result)
}

/// JNI: Last completed run as JSON, null if there is none
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_getLastRunJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_engine(|engine| match engine.last_run() {
        Some(run) => Ok(Some(run.to_json()?)),
        None => Ok(None),
    });
    java_string(&mut env, result)
}

/// JNI: Last completed drive as JSON, null if there is none
#[no_mangle]
pub extern "C" fn Java_com_example_launchtimer_JniBinding_getLastDriveJson(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = with_engine(|engine| match engine.last_drive() {
        Some(drive) => Ok(Some(drive.to_json()?)),
        None => Ok(None),
    });
    java_string(&mut env, result)
}
