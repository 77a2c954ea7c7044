use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facebase_core::{codec, recognize, BuildOptions, DatabaseBuilder, DetectionMode, FaceEmbedder};
use facebase_vision::OnnxFaceEmbedder;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;

use annotate::Annotator;
use config::Config;

#[derive(Parser)]
#[command(name = "facebase", about = "Build and query a face descriptor database")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Face database CSV (overrides configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the face database from a directory of reference images
    Build {
        /// One sub-directory per person (default: configured database_dir)
        dir: Option<PathBuf>,
        /// Detector mode: fast or accurate
        #[arg(long)]
        mode: Option<DetectionMode>,
        /// Upsampling steps applied before detection
        #[arg(long)]
        upsampling: Option<u32>,
    },
    /// Recognize the faces in an image
    Recognize {
        image: PathBuf,
        /// Maximum descriptor distance accepted as a match
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Detector mode: fast or accurate
        #[arg(long)]
        mode: Option<DetectionMode>,
        /// Upsampling steps applied before detection
        #[arg(long)]
        upsampling: Option<u32>,
        /// Annotated output image (default: <output_dir>/result_<name>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize the face database
    Inspect,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Build { dir, mode, upsampling } => {
            let root = dir.unwrap_or_else(|| config.database_dir.clone());
            let options = BuildOptions {
                mode: mode.unwrap_or(config.build_mode),
                upsampling: upsampling.unwrap_or(config.upsampling),
            };
            let embedder = load_embedder(&config)?;
            build(&root, &config.db_path, embedder, options)
        }
        Commands::Recognize { image, threshold, mode, upsampling, output, json } => {
            let threshold = threshold.unwrap_or(config.max_distance);
            let mode = mode.unwrap_or(config.query_mode);
            let upsampling = upsampling.unwrap_or(config.upsampling);
            let output = output.unwrap_or_else(|| default_output(&config.output_dir, &image));
            let embedder = load_embedder(&config)?;
            recognize_image(&config.db_path, embedder, &image, threshold, mode, upsampling, &output, json)
        }
        Commands::Inspect => inspect(&config.db_path),
    }
}

fn load_embedder(config: &Config) -> Result<OnnxFaceEmbedder> {
    OnnxFaceEmbedder::load(&config.model_dir)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))
}

fn build(root: &Path, db_path: &Path, embedder: impl FaceEmbedder, options: BuildOptions) -> Result<()> {
    let database = DatabaseBuilder::new(embedder)
        .with_options(options)
        .build(root)
        .with_context(|| format!("failed to build database from {}", root.display()))?;

    match database.descriptor_len() {
        Some(len) => println!("{} faces, descriptor length {len}", database.len()),
        None => println!("No faces were detected in the database images"),
    }

    codec::save(&database, db_path)
        .with_context(|| format!("failed to write {}", db_path.display()))?;
    println!("Saved database to {}", db_path.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn recognize_image(
    db_path: &Path,
    mut embedder: impl FaceEmbedder,
    image_path: &Path,
    threshold: f32,
    mode: DetectionMode,
    upsampling: u32,
    output: &Path,
    json: bool,
) -> Result<()> {
    let database = codec::load(db_path)
        .with_context(|| format!("failed to load database {}", db_path.display()))?;
    tracing::info!(faces = database.len(), "face database loaded");

    let image = image::open(image_path)
        .with_context(|| format!("could not read image at {}", image_path.display()))?;
    let queries = embedder
        .detect_and_embed(&image, mode, upsampling)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("face detection failed on {}", image_path.display()))?;
    let results = recognize(&queries, &database, threshold)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No faces detected in {}", image_path.display());
    } else {
        for result in &results {
            let [l, t, r, b] = result.bounding_box.to_array();
            match result.distance {
                Some(d) => println!("{:<20} ({l}, {t}, {r}, {b})  distance {d:.4}", result.label()),
                None => println!("{:<20} ({l}, {t}, {r}, {b})", result.label()),
            }
        }
    }

    let annotator = Annotator::bundled().context("failed to load the label font")?;
    let mut annotated = image.to_rgb8();
    annotator.draw_results(&mut annotated, &results);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    annotated
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(path = %output.display(), "annotated image saved");
    if !json {
        println!("Result saved to: {}", output.display());
    }
    Ok(())
}

fn inspect(db_path: &Path) -> Result<()> {
    let database = codec::load(db_path)
        .with_context(|| format!("failed to load database {}", db_path.display()))?;

    println!("{}: {} faces", db_path.display(), database.len());
    if let Some(len) = database.descriptor_len() {
        println!("descriptor length: {len}");
    }
    for (name, count) in database.identities() {
        println!("  {name:<20} {count}");
    }
    Ok(())
}

fn default_output(output_dir: &Path, image: &Path) -> PathBuf {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string());
    output_dir.join(format!("result_{name}"))
}
