use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use gamestream_common::{ObjectScope, Placement, PlayerId};
use gamestream_stream::{BackendCall, RecordingBackend, ServerContext, StreamConfig};
use gamestream_tools::{StreamInspector, StreamSummary};
use glam::Vec3;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gamestream-cli", about = "CLI tool for gamestream operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Validate a streaming config file and print the effective settings
    Config {
        /// YAML config file; defaults are printed when omitted
        path: Option<PathBuf>,
    },
    /// Run a deterministic streaming simulation against a recording backend
    Simulate {
        /// Number of connected players
        #[arg(short, long, default_value = "20")]
        players: u32,
        /// Number of vehicles
        #[arg(long, default_value = "200")]
        vehicles: u32,
        /// Number of map objects (global, universal and personal, in turn)
        #[arg(short, long, default_value = "2000")]
        objects: u32,
        /// Number of server ticks to simulate
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// RNG seed for the random walk
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Streaming config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

/// SplitMix64; enough randomness for a reproducible walk.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `[-half, half)`.
    fn spread(&mut self, half: f32) -> f32 {
        let unit = (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32;
        (unit * 2.0 - 1.0) * half
    }

    fn below(&mut self, n: u32) -> u32 {
        (self.next_u64() % u64::from(n.max(1))) as u32
    }
}

#[derive(Serialize)]
struct SimulationReport {
    seed: u64,
    ticks: u64,
    summary: StreamSummary,
    materializations: usize,
    dematerializations: usize,
    object_spawns: usize,
    object_despawns: usize,
    violations: Vec<String>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<StreamConfig> {
    let config = match path {
        Some(path) => StreamConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StreamConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn simulate(
    players: u32,
    vehicles: u32,
    objects: u32,
    ticks: u64,
    seed: u64,
    config: StreamConfig,
) -> anyhow::Result<SimulationReport> {
    let _span = tracing::info_span!("simulate", seed, ticks).entered();
    let half = config.grid_half_extent * 0.5;
    let mut rng = SplitMix64(seed);
    let mut ctx = ServerContext::new(config, RecordingBackend::new());

    let random_placement = |rng: &mut SplitMix64| {
        Placement::at(Vec3::new(rng.spread(half), 0.0, rng.spread(half)))
    };

    let player_ids: Vec<PlayerId> = (0..players)
        .map(|i| {
            let placement = random_placement(&mut rng);
            ctx.world_mut().connect_player(format!("bot{i}"), placement)
        })
        .collect();
    for i in 0..vehicles {
        let placement = random_placement(&mut rng);
        ctx.world_mut().create_vehicle(400 + (i % 212) as u16, placement, i % 4 == 0);
    }
    let mut object_ids = Vec::new();
    for i in 0..objects {
        let scope = match i % 3 {
            0 => ObjectScope::Global,
            1 => ObjectScope::Universal,
            _ if player_ids.is_empty() => ObjectScope::Universal,
            _ => ObjectScope::Personal {
                owner: player_ids[rng.below(players) as usize],
            },
        };
        let placement = random_placement(&mut rng);
        object_ids.push(ctx.world_mut().create_object(1000 + i as i32, scope, placement));
    }

    let start = Instant::now();
    for tick in 0..ticks {
        for &id in &player_ids {
            let Some(player) = ctx.world().player(id) else {
                continue;
            };
            let step = Vec3::new(rng.spread(15.0), 0.0, rng.spread(15.0));
            let placement = player.placement.with_location(player.placement.location + step);
            ctx.world_mut().set_player_placement(id, placement);
        }
        let moving: Vec<_> = ctx
            .world()
            .vehicles()
            .filter(|v| !v.is_static)
            .map(|v| (v.id, v.placement))
            .collect();
        for (id, placement) in moving {
            let step = Vec3::new(rng.spread(25.0), 0.0, rng.spread(25.0));
            ctx.world_mut()
                .set_vehicle_placement(id, placement.with_location(placement.location + step));
        }
        if !object_ids.is_empty() {
            let id = object_ids[rng.below(object_ids.len() as u32) as usize];
            let placement = random_placement(&mut rng);
            ctx.world_mut().move_object(id, placement);
        }

        let now = start + Duration::from_millis(50 * (tick + 1));
        if let Some(stats) = ctx.tick(now)? {
            tracing::debug!(tick, ?stats, "pass");
        }
    }

    let mut violations = StreamInspector::audit(ctx.streamer());
    violations.extend(StreamInspector::audit_pools(ctx.world(), ctx.streamer()));

    let backend = ctx.backend();
    Ok(SimulationReport {
        seed,
        ticks,
        summary: StreamInspector::summary(ctx.streamer()),
        materializations: backend.count(|c| matches!(c, BackendCall::Materialize(_))),
        dematerializations: backend.count(|c| matches!(c, BackendCall::Dematerialize(_))),
        object_spawns: backend.count(|c| matches!(c, BackendCall::SpawnFor(..))),
        object_despawns: backend.count(|c| matches!(c, BackendCall::DespawnFor(..))),
        violations: violations.iter().map(ToString::to_string).collect(),
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("gamestream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("tools: {}", gamestream_tools::crate_info());
            let config = StreamConfig::default();
            println!(
                "defaults: visibility={}m interval={}ms max_objects={} cell={}m grid=±{}m",
                config.visibility_distance,
                config.update_interval_ms,
                config.max_objects,
                config.cell_size,
                config.grid_half_extent
            );
        }
        Commands::Config { path } => {
            let config = load_config(path.as_ref())?;
            print!("{}", config.to_yaml()?);
        }
        Commands::Simulate {
            players,
            vehicles,
            objects,
            ticks,
            seed,
            config,
            json,
        } => {
            let config = load_config(config.as_ref())?;
            let report = simulate(players, vehicles, objects, ticks, seed, config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Simulation: seed={seed}, ticks={ticks}");
                println!("{}", report.summary);
                println!(
                    "Backend: materialize={} dematerialize={} spawn={} despawn={}",
                    report.materializations,
                    report.dematerializations,
                    report.object_spawns,
                    report.object_despawns
                );
                for violation in &report.violations {
                    println!("  violation: {violation}");
                }
            }
            if !report.violations.is_empty() {
                anyhow::bail!("{} invariant violations", report.violations.len());
            }
        }
    }

    Ok(())
}
