use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use uidgen::clock::{CachedClock, SystemClock, TimeSource};
use uidgen::configure;
use uidgen::generator::{GeneratorConfig, UidGenerator};
use uidgen::logger::setup_logger;
use uidgen::uid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of IDs to generate
    #[arg(long, default_value = "10")]
    count: u64,

    /// Node ID (overrides config)
    #[arg(long)]
    node_id: Option<u64>,

    /// Epoch in milliseconds (overrides config)
    #[arg(long)]
    epoch_ms: Option<u64>,

    /// Fixed random field value instead of a fresh draw per ID
    #[arg(long)]
    fixed_random: Option<u16>,

    /// Read the system clock directly instead of the cached time service
    #[arg(long)]
    no_time_cache: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = configure::load_config().context("Failed to load config")?;
    setup_logger(&config).map_err(|e| anyhow::anyhow!("Failed to set up logger: {e}"))?;

    let node_id = args.node_id.unwrap_or(config.node_id);
    let epoch_ms = args.epoch_ms.unwrap_or(config.epoch_ms);
    let use_cache = config.enable_time_cache && !args.no_time_cache;

    let gen_config = GeneratorConfig::new(epoch_ms, node_id, args.fixed_random)?;

    // The cache must outlive the generator reading it
    let mut time_cache = None;
    let time_source: Arc<dyn TimeSource> = if use_cache {
        let cache = CachedClock::with_refresh_period(std::time::Duration::from_millis(
            config.cache_refresh_ms.max(1),
        ));
        let reader = cache.reader();
        time_cache = Some(cache);
        Arc::new(reader)
    } else {
        Arc::new(SystemClock)
    };

    let generator = UidGenerator::builder()
        .config(gen_config)
        .time_source(time_source)
        .build()?;

    println!("=== uidgen demo (node {}, epoch {}) ===", node_id, epoch_ms);
    println!(
        "{:<40} | {:<26} | {:<15} | {:<10} | {:<8}",
        "u128 (Decimal)", "Base32", "Timestamp (ms)", "Sequence", "Random"
    );
    println!(
        "{:-<40}-+-{:-<26}-+-{:-<15}-+-{:-<10}-+-{:-<8}",
        "", "", "", "", ""
    );

    for _ in 0..args.count {
        let id = generator.generate();
        println!(
            "{:<40} | {:<26} | {:<15} | {:<10} | {:<8}",
            uid::to_str_decimal(id),
            uid::to_str_base32(id),
            uid::timestamp_delta(id),
            uid::sequence(id),
            uid::random_part(id)
        );
    }

    if let Some(mut cache) = time_cache.take() {
        cache.shutdown();
    }

    Ok(())
}
