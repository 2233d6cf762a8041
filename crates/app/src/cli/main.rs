//! patchbay CLI
//!
//! Wires a handful of player nodes into a mixer through the graph dispatcher and
//! reports what the mutation queue did.

use clap::Parser;
use patchbay_core::domain::config::PatchbayConfig;
use patchbay_core::{Dispatcher, Graph, Queue};
use patchbay_infra::{MemoryGraph, NodeKind, TapFormat, TapKey, TapRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(about = "Serialized audio graph mutation demo", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the mailbox capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Number of player nodes to wire into the mixer
    #[arg(short, long, default_value_t = 4)]
    players: u32,

    /// Print queue statistics as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).await?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    tracing::info!("🎛️ patchbay starting...");

    if let Some(capacity) = cli.capacity {
        config.queue.capacity = capacity;
    }
    config.queue.validate()?;

    let players = cli.players.min(NodeKind::MIXER_INPUTS);
    let stats = tokio::task::spawn_blocking(move || run_demo(&config, players)).await??;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("applied:   {}", stats.applied);
        println!("failed:    {}", stats.failed);
        println!("discarded: {}", stats.discarded);
        println!("max op:    {:?}", stats.max_duration);
    }

    Ok(())
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<PatchbayConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => PatchbayConfig::default_path()?,
    };
    if !path.exists() {
        return Ok(PatchbayConfig::default());
    }
    Ok(PatchbayConfig::load_from_file(&path).await?)
}

/// Build the graph through the dispatcher; blocking, so it runs off the runtime
fn run_demo(
    config: &PatchbayConfig,
    players: u32,
) -> anyhow::Result<patchbay_core::QueueStatsSnapshot> {
    let graph = Arc::new(MemoryGraph::new());
    let taps = TapRegistry::new();
    let queue = Arc::new(Queue::with_config(&config.queue));
    let dispatcher = Dispatcher::new(
        Some(Arc::clone(&graph) as Arc<dyn Graph>),
        Some(Arc::clone(&queue)),
    );
    dispatcher.start()?;

    let mixer = graph.create_node(NodeKind::Mixer);
    let output = graph.create_node(NodeKind::Output);
    dispatcher.attach(mixer)?;
    dispatcher.attach(output)?;
    dispatcher.connect(mixer, output, 0, 0)?;

    let mut sources = Vec::new();
    for bus in 0..players {
        let player = graph.create_node(NodeKind::Player);
        dispatcher.attach(player)?;
        dispatcher.connect(player, mixer, 0, bus)?;
        sources.push(player);
    }

    // A fire-and-forget mistake: the mixer has no such input. Only acceptance is reported.
    if let Some(&first) = sources.first() {
        dispatcher.connect(first, mixer, 0, NodeKind::MIXER_INPUTS)?;
    }

    // Barrier: everything queued above has been applied once this returns.
    dispatcher.run_sync(|_| Ok(()))?;
    graph.set_running(true);

    let meter = TapKey::new("main-out");
    taps.install(
        meter.clone(),
        mixer,
        0,
        TapFormat {
            sample_rate: 48000.0,
            channel_count: 2,
        },
    )?;
    let tone: Vec<f32> = (0..512)
        .flat_map(|i| {
            let s = (i as f32 * 0.1).sin() * 0.5;
            [s, s]
        })
        .collect();
    let rms = taps.record_buffer(&meter, &tone)?;
    tracing::info!(rms, "Mixer output level");

    tracing::info!(
        attached = graph.attached_count(),
        connections = graph.connections().len(),
        "Graph wired"
    );

    // Tear down: detach the players before releasing them.
    for player in sources {
        dispatcher.disconnect_node_output(player, 0)?;
        dispatcher.detach(player)?;
        graph.release(player)?;
    }
    let _ = dispatcher.run_sync_timeout(|_| Ok(()), Duration::from_millis(100));

    graph.set_running(false);
    taps.clear();
    dispatcher.close();

    Ok(queue.stats())
}
