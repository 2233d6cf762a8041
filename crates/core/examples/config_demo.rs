//! Example demonstrating queue configuration round-trips
//!
//! Run with: cargo run --package patchbay-core --example config_demo

use patchbay_core::domain::config::PatchbayConfig;
use patchbay_core::{Context, Func, Queue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("patchbay_core=debug,info")
        .init();

    println!("=== patchbay Configuration Demo ===\n");

    println!("1. Creating default configuration...");
    let mut config = PatchbayConfig::default();
    config.queue.capacity = 16;
    println!(
        "   ✓ capacity {}, drain window {} ms",
        config.queue.capacity, config.queue.drain_timeout_ms
    );

    println!("\n2. Saving configuration to file...");
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("config.toml");
    config.save_to_file(&config_path).await?;
    println!("   ✓ Configuration saved to {}", config_path.display());

    println!("\n3. Loading configuration from file...");
    let loaded = PatchbayConfig::load_from_file(&config_path).await?;
    println!("   ✓ Loaded queue capacity {}", loaded.queue.capacity);

    println!("\n4. Building a queue from the loaded configuration...");
    let queue = Queue::with_config(&loaded.queue);
    queue.start()?;
    for i in 0..4 {
        queue.enqueue(Func::new(move |_: &Context| {
            println!("   • op {} applied", i);
            Ok(())
        }))?;
    }
    queue.close();
    println!("   ✓ {} ops applied", queue.stats().applied);

    println!("\n=== Demo Complete ===");
    Ok(())
}
