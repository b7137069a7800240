use launch_timer_rs::clock::{Clock, SystemClock};
use launch_timer_rs::sim::{LaunchProfile, SimEmitter};
use launch_timer_rs::types::{InertialSample, LocationSample};
use tokio::time::{interval, Duration};

/// Simulated GNSS receiver: one fix per profile interval until the profile ends
pub async fn gps_loop(emitter: SimEmitter<LocationSample>, profile: LaunchProfile) {
    let mut interval = interval(Duration::from_millis(profile.gps_interval_ms.max(1) as u64));
    let mut fix_count = 0u64;

    loop {
        interval.tick().await;
        let now = SystemClock.now_ms();
        if now > profile.end_at() {
            log::info!("[gps] profile finished after {} fixes", fix_count);
            break;
        }

        if emitter.emit(profile.location_at(now)) {
            fix_count += 1;
            if fix_count % 50 == 0 {
                log::debug!("[gps] {} fixes", fix_count);
            }
        }
    }
}

/// Simulated accelerometer. Samples are dropped while nobody is subscribed.
pub async fn accel_loop(emitter: SimEmitter<InertialSample>, profile: LaunchProfile) {
    let mut interval = interval(Duration::from_millis(profile.imu_interval_ms.max(1) as u64));
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;
        let now = SystemClock.now_ms();
        if now > profile.end_at() {
            log::info!("[accel] profile finished after {} delivered samples", sample_count);
            break;
        }

        if emitter.emit(profile.inertial_at(now)) {
            sample_count += 1;
            if sample_count % 100 == 0 {
                log::debug!("[accel] {} samples", sample_count);
            }
        }
    }
}
