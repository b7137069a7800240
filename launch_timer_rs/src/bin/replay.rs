use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use launch_timer_rs::clock::{Clock, ManualClock};
use launch_timer_rs::config::EngineConfig;
use launch_timer_rs::engine::{Engine, EngineEvent};
use launch_timer_rs::milestones::MilestoneKey;
use launch_timer_rs::run_timer::{RunEvent, RunStatus, ELAPSED_TICK_MS};
use launch_timer_rs::sim::{LaunchProfile, SensorSample, SessionLog};
use launch_timer_rs::storage::JsonFileStore;
use launch_timer_rs::types::UnitSystem;
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded session log (.json or .json.gz)
    #[arg(long, conflicts_with_all = ["golden_dir", "generate"])]
    log: Option<PathBuf>,

    /// Directory of session logs to batch replay (session_*.json[.gz])
    #[arg(long, conflicts_with = "generate")]
    golden_dir: Option<PathBuf>,

    /// Replay a generated standing-start profile instead of a log
    #[arg(long, default_value_t = false)]
    generate: bool,

    /// Write the generated profile as a session log
    #[arg(long, requires = "generate")]
    save_log: Option<PathBuf>,

    /// Launch acceleration for the generated profile, m/s²
    #[arg(long, default_value = "6.0")]
    accel: f64,

    /// Engine settings JSON. Overrides settings stored in the log.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use km/h and metric milestones
    #[arg(long, default_value_t = false)]
    metric: bool,

    /// Keep running after the half-distance milestone until the log ends
    #[arg(long, default_value_t = false)]
    full: bool,

    /// Where completed run records are written
    #[arg(long, default_value = "replay_output")]
    output_dir: PathBuf,
}

fn engine_config(log: &SessionLog, args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => log.config.clone().unwrap_or_default(),
    };
    if args.metric {
        config.unit_system = UnitSystem::Metric;
    }
    Ok(config)
}

/// Feed every sample through a fresh engine on a manual clock
fn run_once(name: &str, log: &SessionLog, args: &Args) -> anyhow::Result<serde_json::Value> {
    let config = engine_config(log, args)?;
    let units = config.unit_system;
    let Some(first) = log.samples.first() else {
        anyhow::bail!("{} has no samples", name);
    };

    let clock = ManualClock::new(first.timestamp());
    let store = JsonFileStore::new(&args.output_dir)?;
    let mut engine = Engine::new(config, Arc::new(clock.clone()))?.with_store(Box::new(store));

    let mut fixes = 0usize;
    let mut inertial_used = 0usize;
    let mut rejected_launches = 0usize;
    let mut armed_once = false;

    for sample in &log.samples {
        // 100 Hz ticks between samples, as the live display would see them
        let target = sample.timestamp();
        loop {
            let now = clock.now_ms();
            if now + ELAPSED_TICK_MS as i64 > target {
                break;
            }
            clock.advance(ELAPSED_TICK_MS as i64);
            engine.tick();
        }
        clock.set(target.max(clock.now_ms()));

        let events = match sample {
            SensorSample::Location(fix) => {
                fixes += 1;
                engine.on_location(*fix)
            }
            // The accelerometer is only subscribed while armed
            SensorSample::Inertial(accel) if engine.wants_inertial() => {
                inertial_used += 1;
                engine.on_inertial(accel)
            }
            SensorSample::Inertial(_) => Vec::new(),
        };

        for event in &events {
            match event {
                EngineEvent::Run(RunEvent::LaunchRejected { speed }) => {
                    rejected_launches += 1;
                    println!("[{}] rolling start at {:.2} m/s ignored", name, speed);
                }
                EngineEvent::Run(RunEvent::Launched { origin }) => {
                    println!("[{}] launch at {}", name, origin)
                }
                EngineEvent::Run(RunEvent::Milestone { key, milestone }) => println!(
                    "[{}] {:<10} {:>9.2} ms",
                    name,
                    key.label(units),
                    milestone.elapsed_ms
                ),
                _ => {}
            }
        }

        let status = engine.run().status();
        let half_done = engine.run().milestones().contains(MilestoneKey::HalfDistance);
        if status == RunStatus::Ready && !armed_once {
            armed_once = true;
            engine.arm_run()?;
        } else if status == RunStatus::Running && half_done && !args.full {
            break;
        }
    }

    if engine.run().status() == RunStatus::Running {
        engine.stop_run()?;
    }

    let Some(run) = engine.last_run().cloned() else {
        return Ok(json!({
            "log": name,
            "launched": false,
            "fixes": fixes,
            "inertial_used": inertial_used,
            "rejected_launches": rejected_launches,
        }));
    };

    let gpx_path = args.output_dir.join(format!("{}.gpx", run.id));
    std::fs::write(&gpx_path, run.to_gpx_xml())?;

    let milestones: serde_json::Map<String, serde_json::Value> = run
        .milestones
        .iter()
        .map(|(key, m)| (key.label(units).to_string(), json!(m.elapsed_ms)))
        .collect();
    let drift: serde_json::Map<String, serde_json::Value> = run
        .drift
        .iter()
        .map(|d| (d.key.label(units).to_string(), json!(d.drift_ms)))
        .collect();

    Ok(json!({
        "log": name,
        "launched": true,
        "run_id": run.id,
        "origin_ms": run.origin_ms,
        "elapsed_ms": run.elapsed_ms,
        "distance_m": run.distance_m,
        "max_speed": run.max_speed,
        "milestones_ms": milestones,
        "drift_ms": drift,
        "route_points": run.route.len(),
        "fixes": fixes,
        "inertial_used": inertial_used,
        "rejected_launches": rejected_launches,
        "gpx": gpx_path.display().to_string(),
    }))
}

fn is_session_log(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.starts_with("session_") && (name.ends_with(".json") || name.ends_with(".json.gz"))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let mut results = Vec::new();

    if args.generate {
        let log = LaunchProfile {
            accel_mps2: args.accel,
            ..LaunchProfile::default()
        }
        .session_log();
        if let Some(path) = &args.save_log {
            log.save(path)?;
            println!("Saved generated log to {}", path.display());
        }
        results.push(run_once("generated", &log, &args)?);
    } else if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_session_log(path))
            .collect();
        paths.sort();
        for path in paths {
            let name = path.display().to_string();
            match SessionLog::load(&path)
                .map_err(anyhow::Error::from)
                .and_then(|log| run_once(&name, &log, &args))
            {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", name, e),
            }
        }
    } else if let Some(path) = args.log.as_ref() {
        let log = SessionLog::load(path)?;
        results.push(run_once(&path.display().to_string(), &log, &args)?);
    } else {
        anyhow::bail!("Provide --log, --golden-dir or --generate");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
