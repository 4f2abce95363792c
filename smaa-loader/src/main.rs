//! smaa-gen - generate (or fetch from cache) the SMAA lookup textures

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use smaa_loader::{
    loader_from_config, CacheBackend, Config, ImageResource, LoadingManager, ProgressTracker,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SMAA lookup texture generator
#[derive(Parser, Debug)]
#[command(name = "smaa-gen", version, about = "Generate the SMAA search and area textures")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving search.png and area.png
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Ignore the texture cache for this run
    #[arg(long)]
    no_cache: bool,

    /// Use this SQLite file as the texture cache
    #[arg(long)]
    db: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct TextureSummary {
    name: String,
    width: u32,
    height: u32,
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct Summary {
    elapsed_ms: u128,
    cache_disabled: bool,
    textures: Vec<TextureSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "smaa_loader=info,smaa_gen=info".into());
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.cache.backend = CacheBackend::Sqlite;
        config.cache.db_path = Some(db);
    }

    let tracker = LoadingManager::shared();
    let mut loader = loader_from_config(&config)
        .await?
        .with_tracker(tracker.clone() as Arc<dyn ProgressTracker>);
    loader.set_cache_disabled(args.no_cache);

    let started = Instant::now();
    let pair = loader.load().await?;
    let (settled, total) = tracker.progress();
    info!("Loaded {}/{} textures in {:?}", settled, total, started.elapsed());

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;

    let textures = vec![
        write_texture(&pair.search, &args.out)?,
        write_texture(&pair.area, &args.out)?,
    ];

    let summary = Summary {
        elapsed_ms: started.elapsed().as_millis(),
        cache_disabled: loader.cache_disabled(),
        textures,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// Write the decoded pixels of `image` as `<name>.png` under `dir`
fn write_texture(image: &ImageResource, dir: &Path) -> Result<TextureSummary> {
    let pixels = image
        .pixels()
        .ok_or_else(|| anyhow!("{} texture was not decoded", image.name()))?;
    let path = dir.join(format!("{}.png", image.name()));

    std::fs::write(&path, pixels.to_png()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());

    Ok(TextureSummary {
        name: image.name().to_string(),
        width: pixels.width,
        height: pixels.height,
        path,
    })
}
