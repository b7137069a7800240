use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration};

mod sensors;

use launch_timer_rs::clock::{Clock, SystemClock};
use launch_timer_rs::config::EngineConfig;
use launch_timer_rs::engine::{Engine, EngineEvent};
use launch_timer_rs::milestones::MilestoneKey;
use launch_timer_rs::providers::LogHaptics;
use launch_timer_rs::run_timer::{RunEvent, RunStatus, ELAPSED_TICK_MS};
use launch_timer_rs::sensor_hub::SensorHub;
use launch_timer_rs::sim::{LaunchProfile, SimInertialProvider, SimLocationProvider};
use launch_timer_rs::storage::{CompletedRun, JsonFileStore};
use launch_timer_rs::sync::{HttpCloudSync, SyncQueue};
use launch_timer_rs::types::UnitSystem;

#[derive(Parser, Debug)]
#[command(name = "launch_timer")]
#[command(about = "Live launch timer against a simulated car", long_about = None)]
struct Args {
    /// Seconds simulated after the launch
    #[arg(value_name = "SECONDS", default_value = "30")]
    duration: u64,

    /// Engine settings JSON (defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use km/h and metric milestones
    #[arg(long)]
    metric: bool,

    /// Time parked before the launch, milliseconds
    #[arg(long, default_value = "3000")]
    stationary_ms: i64,

    /// Launch acceleration, m/s²
    #[arg(long, default_value = "6.0")]
    accel: f64,

    /// Upload completed runs to this endpoint
    #[arg(long)]
    sync_endpoint: Option<String>,

    /// Output directory
    #[arg(long, default_value = "launch_timer_sessions")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if args.metric {
        config.unit_system = UnitSystem::Metric;
    }
    let units = config.unit_system;

    println!("[{}] Launch Timer Starting", ts_now());
    println!("  Duration: {} seconds after launch", args.duration);
    println!("  Units: {:?}", units);
    println!(
        "  Detection: {:.2} G x{} ({:?})",
        config.launch_detection.threshold_g,
        config.launch_detection.consecutive_samples_required,
        config.launch_detection.strategy
    );
    println!("  Output Dir: {}", args.output_dir.display());

    let store = JsonFileStore::new(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let mut engine = Engine::new(config, Arc::new(SystemClock))?
        .with_store(Box::new(store))
        .with_haptics(Box::new(LogHaptics));
    if let Some(endpoint) = &args.sync_endpoint {
        engine = engine.with_sync(SyncQueue::spawn(HttpCloudSync::new(endpoint.clone()))?);
    }

    let profile = LaunchProfile {
        start_ms: SystemClock.now_ms(),
        stationary_ms: args.stationary_ms,
        accel_mps2: args.accel,
        duration_ms: args.duration as i64 * 1000,
        ..LaunchProfile::default()
    };

    let location = SimLocationProvider::new(false, true);
    let inertial = SimInertialProvider::new(true);
    let _gps_handle = tokio::spawn(sensors::gps_loop(location.emitter(), profile.clone()));
    let _accel_handle = tokio::spawn(sensors::accel_loop(inertial.emitter(), profile.clone()));

    let mut hub = SensorHub::new(engine, location, inertial);
    hub.start_location()?;

    let mut tick = interval(Duration::from_millis(ELAPSED_TICK_MS));
    let mut status_update = interval(Duration::from_secs(2));
    let status_path = args.output_dir.join("live_status.json");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut armed_once = false;

    println!("[{}] Waiting for GPS...", ts_now());

    loop {
        tokio::select! {
            _ = tick.tick() => {
                for event in hub.pump() {
                    report(&event, units);
                }
                hub.tick();

                let status = hub.engine().run().status();
                let half_done = hub
                    .engine()
                    .run()
                    .milestones()
                    .contains(MilestoneKey::HalfDistance);
                let now = SystemClock.now_ms();
                match status {
                    RunStatus::Ready if !armed_once => {
                        armed_once = true;
                        for event in hub.arm_run()? {
                            report(&event, units);
                        }
                    }
                    RunStatus::Running if half_done || now > profile.end_at() => {
                        for event in hub.stop_run()? {
                            report(&event, units);
                        }
                        break;
                    }
                    RunStatus::Idle | RunStatus::Ready | RunStatus::Armed
                        if now > profile.end_at() + 1_000 =>
                    {
                        println!("[{}] Profile ended without a launch", ts_now());
                        break;
                    }
                    _ => {}
                }
            }
            _ = status_update.tick() => {
                let status = hub.engine().snapshot();
                if let Err(e) = status.save(&status_path) {
                    log::warn!("live status write failed: {}", e);
                }
                println!(
                    "[{}] {:?} {:>6.1} {} | elapsed {:>6} ms | {:>6.1} m",
                    ts_now(),
                    status.run_status,
                    status.current_speed_display,
                    units.speed_label(),
                    status.run_elapsed_ms,
                    status.run_distance_m
                );
            }
            _ = &mut ctrl_c => {
                println!("[{}] Interrupted", ts_now());
                if hub.engine().run().status() == RunStatus::Running {
                    hub.stop_run()?;
                }
                break;
            }
        }
    }

    hub.stop_location();
    let _ = hub.engine().snapshot().save(args.output_dir.join("live_status_final.json"));

    if !hub.engine().config().auto_save_enabled && hub.engine().last_run().is_some() {
        hub.engine_mut().save_last_run()?;
    }
    if let Some(run) = hub.engine().last_run() {
        print_summary(run);
        let gpx_path = args.output_dir.join(format!("{}.gpx", run.id));
        std::fs::write(&gpx_path, run.to_gpx_xml())?;
        println!("Route: {}", gpx_path.display());
    }

    if let Some(queue) = hub.engine().sync_queue() {
        if !queue.flush(Duration::from_secs(10)) {
            log::warn!("sync queue did not drain before exit");
        }
        let pending = queue.pending().len();
        if pending > 0 {
            println!("{} uploads pending for the next sync pass", pending);
        }
    }

    Ok(())
}

fn report(event: &EngineEvent, units: UnitSystem) {
    match event {
        EngineEvent::Run(RunEvent::Ready) => println!("[{}] GPS accuracy OK, ready", ts_now()),
        EngineEvent::Run(RunEvent::Armed { .. }) => {
            println!("[{}] Armed, waiting for launch", ts_now())
        }
        EngineEvent::Run(RunEvent::LaunchRejected { speed }) => println!(
            "[{}] Rolling start ignored ({:.1} {})",
            ts_now(),
            units.speed_from_mps(*speed),
            units.speed_label()
        ),
        EngineEvent::Run(RunEvent::Launched { .. }) => println!("[{}] LAUNCH", ts_now()),
        EngineEvent::Run(RunEvent::Milestone { key, milestone }) => println!(
            "[{}] {:<10} {:>7.3} s  @ {:.1} {}",
            ts_now(),
            key.label(units),
            milestone.elapsed_ms / 1000.0,
            units.speed_from_mps(milestone.speed_at_crossing),
            units.speed_label()
        ),
        EngineEvent::Run(RunEvent::Completed { elapsed_ms }) => {
            println!("[{}] Run complete after {} ms", ts_now(), elapsed_ms)
        }
        other => log::debug!("{:?}", other),
    }
}

fn print_summary(run: &CompletedRun) {
    println!("\n=== Run {} ===", run.id);
    println!("Elapsed: {} ms", run.elapsed_ms);
    println!("Distance: {:.1} m", run.distance_m);
    println!(
        "Max speed: {:.1} {}",
        run.unit_system.speed_from_mps(run.max_speed),
        run.unit_system.speed_label()
    );
    for (key, milestone) in run.milestones.iter() {
        println!("  {:<10} {:>8.1} ms", key.label(run.unit_system), milestone.elapsed_ms);
    }
    if !run.drift.is_empty() {
        println!("Wall clock vs GPS:");
        for drift in &run.drift {
            println!("  {:<10} {:+8.1} ms", drift.key.label(run.unit_system), drift.drift_ms);
        }
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
