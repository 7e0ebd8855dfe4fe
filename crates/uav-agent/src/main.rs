//! UAV agent CLI.
//!
//! Commands:
//! - fly: motion unit only, serving the motion-command RPC
//! - track: planner only, driving a `fly` process over RPC
//! - run: motion unit and planner in one process
//! - simulate: in-process fleet against an in-memory world

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use swarm_kernel::{AgentId, Coordination, Point};
use uav_agent::config::{AgentConfig, PATROL_WAYPOINTS};
use uav_agent::http_world::HttpPositionService;
use uav_agent::motion::{MotionInterface, MotionUnit};
use uav_agent::planner::Planner;
use uav_agent::rpc::{self, RpcClient};
use uav_agent::simulation::{Simulation, SimulationConfig};
use uav_agent::transport::{AdvertTransport, UdpMulticast};
use uav_agent::world::PositionService;

/// Generate a timestamped output path from the given path.
/// e.g., "simulation.json" -> "simulation-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("simulation");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "uav-agent")]
#[command(version)]
#[command(about = "Decentralized UAV target arbitration")]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Per-agent settings; each one overrides the configuration file.
#[derive(Args, Debug, Default)]
struct AgentArgs {
    /// Node id of this vehicle
    #[arg(long = "my-id", env = "UAV_ID")]
    agent_id: Option<AgentId>,

    /// Start position X
    #[arg(long, allow_hyphen_values = true)]
    x: Option<f64>,

    /// Start position Y
    #[arg(long, allow_hyphen_values = true)]
    y: Option<f64>,

    /// Loiter radius
    #[arg(long)]
    radius: Option<f64>,

    /// Cruise speed (distance units per second)
    #[arg(long)]
    speed: Option<f64>,

    /// Tick interval in milliseconds (planner and motion)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Coverage zone limit on the X axis
    #[arg(long = "covered-zone")]
    covered_zone: Option<f64>,

    /// Pursuit range
    #[arg(long = "track-range")]
    track_range: Option<f64>,

    /// Peer coordination: none | broadcast
    #[arg(short = 'p', long)]
    coordination: Option<Coordination>,

    /// Position service base URL
    #[arg(long = "position-service", env = "POSITION_SERVICE_URL")]
    position_service: Option<String>,
}

impl AgentArgs {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(id) = self.agent_id {
            config.agent_id = id;
        }
        if self.x.is_some() || self.y.is_some() {
            let start = config.start_position();
            config.start = Some(Point::new(
                self.x.unwrap_or(start.x),
                self.y.unwrap_or(start.y),
            ));
        }
        if let Some(radius) = self.radius {
            config.kernel.loiter.radius = radius;
        }
        if let Some(speed) = self.speed {
            config.kernel.loiter.speed = speed;
        }
        if let Some(interval) = self.interval {
            config.kernel.tick_interval_ms = interval;
            config.motion_interval_ms = interval;
        }
        if let Some(zone) = self.covered_zone {
            config.kernel.sensor.coverage_zone_x = zone;
        }
        if let Some(range) = self.track_range {
            config.kernel.sensor.pursuit_range = range;
        }
        if let Some(coordination) = self.coordination {
            config.kernel.coordination = coordination;
        }
        if let Some(url) = &self.position_service {
            config.position_service.base_url = url.clone();
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fly the vehicle and serve the motion-command RPC
    Fly {
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Run the planner against a vehicle served by `fly`
    Track {
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Fly and plan in one process
    Run {
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Simulate a fleet in memory
    Simulate {
        /// Number of agents taken from the patrol table
        #[arg(long)]
        agents: Option<usize>,

        /// Number of ticks
        #[arg(long, default_value = "120")]
        ticks: usize,

        /// Probability of losing an advertisement copy
        #[arg(long, default_value = "0.1")]
        loss_rate: f64,

        /// Maximum target displacement per tick and axis
        #[arg(long, default_value = "2.0")]
        target_step: f64,

        /// Peer coordination: none | broadcast
        #[arg(short = 'p', long, default_value = "broadcast")]
        coordination: Coordination,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results
        #[arg(long, default_value = "simulation.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    let work = async {
        match cli.command {
            Commands::Fly { agent } => fly(configure(config, &agent)?).await,
            Commands::Track { agent } => track(configure(config, &agent)?).await,
            Commands::Run { agent } => run(configure(config, &agent)?).await,
            Commands::Simulate {
                agents,
                ticks,
                loss_rate,
                target_step,
                coordination,
                seed,
                output,
            } => {
                let mut sim = SimulationConfig {
                    ticks,
                    loss_rate,
                    target_step,
                    seed,
                    ..SimulationConfig::default()
                };
                if cli.config.is_some() {
                    sim.kernel = config.kernel;
                }
                sim.kernel.coordination = coordination;
                if let Some(count) = agents {
                    anyhow::ensure!(
                        (1..=PATROL_WAYPOINTS.len()).contains(&count),
                        "Agent count must be between 1 and {}",
                        PATROL_WAYPOINTS.len()
                    );
                    sim.agents.truncate(count);
                }
                simulate(sim, &output).await
            }
        }
    };

    tokio::select! {
        result = work => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    Ok(())
}

fn configure(mut config: AgentConfig, args: &AgentArgs) -> Result<AgentConfig> {
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn connect_world(config: &AgentConfig) -> Result<Arc<dyn PositionService>> {
    let world = HttpPositionService::connect(&config.position_service)
        .await
        .context("Position service unavailable")?;
    Ok(Arc::new(world))
}

fn motion_unit(config: &AgentConfig, world: Arc<dyn PositionService>) -> Arc<MotionUnit> {
    Arc::new(MotionUnit::new(
        config.agent_id,
        config.start_position(),
        config.patrol_point(),
        world,
        config.targets.clone(),
        config.kernel.loiter,
    ))
}

async fn planner(
    config: &AgentConfig,
    motion: Arc<dyn MotionInterface>,
    world: Arc<dyn PositionService>,
) -> Result<Planner> {
    let (tx, rx) = mpsc::channel(config.broadcast.queue_capacity.max(1));
    let transport: Option<Arc<dyn AdvertTransport>> = if config.kernel.coordination.is_broadcast() {
        let (udp, _receiver) = UdpMulticast::join(&config.broadcast, tx).await?;
        Some(Arc::new(udp))
    } else {
        None
    };

    let mut planner = Planner::new(
        config.agent_id,
        config.kernel.clone(),
        rx,
        motion,
        world,
        transport,
    );
    planner.start().await?;
    Ok(planner)
}

async fn fly(config: AgentConfig) -> Result<()> {
    let world = connect_world(&config).await?;
    let unit = motion_unit(&config, world);
    unit.init_markers().await?;

    tokio::spawn(rpc::serve(config.rpc.clone(), unit.clone()));
    unit.run(config.motion_interval()).await;
    Ok(())
}

async fn track(config: AgentConfig) -> Result<()> {
    let world = connect_world(&config).await?;
    let motion = Arc::new(RpcClient::new(config.rpc.bind));
    motion.wait_ready(30, Duration::from_secs(1)).await?;

    planner(&config, motion, world).await?.run().await;
    Ok(())
}

async fn run(config: AgentConfig) -> Result<()> {
    let world = connect_world(&config).await?;
    let unit = motion_unit(&config, world.clone());
    unit.init_markers().await?;

    tokio::spawn(rpc::serve(config.rpc.clone(), unit.clone()));
    tokio::spawn(unit.clone().run(config.motion_interval()));

    planner(&config, unit, world).await?.run().await;
    Ok(())
}

async fn simulate(config: SimulationConfig, output: &Path) -> Result<()> {
    let simulation = Simulation::new(config).await?;
    let seed = simulation.seed();
    let result = simulation.run().await?;

    let output_path = timestamped_path(output);
    result.save(&output_path)?;

    println!("\n=== Simulation Complete ===");
    println!("Seed: {}", seed);
    println!("Ticks: {}", result.ticks.len());
    println!("Targets tracked: {}", result.tracked_targets());
    println!("Ticks with duplicate claims: {}", result.duplicate_claim_ticks);
    match result.last_change_tick {
        Some(tick) => println!("Last claim change: tick {}", tick),
        None => println!("Last claim change: none"),
    }
    println!("\nFinal assignments:");
    for (agent, claim) in &result.final_assignments {
        match claim {
            Some(target) => println!("  UAV {:>3} -> target {}", agent, target),
            None => println!("  UAV {:>3} -> patrol", agent),
        }
    }
    println!("\nResults saved to: {}", output_path.display());
    Ok(())
}
