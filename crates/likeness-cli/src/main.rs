use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::models::{self, ModelIntegrityError, MODELS};
use likeness_core::policy::{DetectorOptions, PROVIDER_TIMEOUT, VERIFY_DISTANCE_THRESHOLD};
use likeness_core::{spawn_engine, verify, EngineHandle, FaceError, Image, ImageOrigin, OnnxProvider};
use likeness_hw::Camera;
use std::path::{Path, PathBuf};

mod live;

#[derive(Parser)]
#[command(name = "likeness", about = "Likeness face verification CLI")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct CameraArgs {
    /// V4L2 device path
    #[arg(short, long, default_value = "/dev/video0")]
    device: String,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 480)]
    height: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the faces in two image files
    Compare {
        /// Reference photo (e.g. an ID picture)
        uploaded: PathBuf,
        /// Photo to check against the reference
        captured: PathBuf,
        /// Model directory (default: $LIKENESS_MODEL_DIR or ~/.local/share/likeness/models)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Verify a live camera capture against an uploaded photo
    Capture {
        /// Reference photo
        #[arg(short, long)]
        uploaded: PathBuf,
        #[command(flatten)]
        camera: CameraArgs,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// List video capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        #[command(flatten)]
        camera: CameraArgs,
        /// Save the captured frame as PNG
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Check model files and checksums
    Models {
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compare {
            uploaded,
            captured,
            model_dir,
        } => {
            let engine = start_engine(model_dir)?;
            compare(&engine, &uploaded, &captured, cli.json).await
        }
        Commands::Capture {
            uploaded,
            camera,
            model_dir,
        } => {
            let engine = start_engine(model_dir)?;
            let options = live::CameraOptions {
                device: camera.device,
                width: camera.width,
                height: camera.height,
            };
            live::run(engine, uploaded, options).await
        }
        Commands::Devices => devices(cli.json),
        Commands::Test { camera, save } => camera_test(&camera, save.as_deref()),
        Commands::Models { model_dir } => check_models(model_dir, cli.json),
    }
}

fn resolve_model_dir(model_dir: Option<PathBuf>) -> PathBuf {
    model_dir.unwrap_or_else(models::default_model_dir)
}

fn start_engine(model_dir: Option<PathBuf>) -> Result<EngineHandle> {
    let dir = resolve_model_dir(model_dir);
    let provider = OnnxProvider::load(&dir, DetectorOptions::default())
        .with_context(|| format!("failed to load models from {}", dir.display()))?;
    Ok(spawn_engine(provider, PROVIDER_TIMEOUT)?)
}

/// Attach the end-user message to a face error, keeping the detail as cause.
fn explain(err: FaceError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn load_image(path: &Path, origin: ImageOrigin) -> Result<Image> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Image::decode(&bytes, origin).map_err(|e| explain(e.into()))
}

async fn compare(engine: &EngineHandle, uploaded: &Path, captured: &Path, json: bool) -> Result<()> {
    let uploaded = load_image(uploaded, ImageOrigin::Uploaded)?;
    let captured = load_image(captured, ImageOrigin::Captured)?;

    let (uploaded, captured) = tokio::join!(engine.detect(uploaded), engine.detect(captured));
    let uploaded = uploaded.map_err(explain)?.ok_or(FaceError::NoFaceDetected {
        origin: ImageOrigin::Uploaded,
        attempts: 1,
    });
    let captured = captured.map_err(explain)?.ok_or(FaceError::NoFaceDetected {
        origin: ImageOrigin::Captured,
        attempts: 1,
    });
    let (uploaded, captured) = (uploaded.map_err(explain)?, captured.map_err(explain)?);

    let result = verify::compare(&uploaded.descriptor, &captured.descriptor).map_err(explain)?;
    tracing::info!(is_match = result.is_match, distance = result.distance, "compare finished");

    if json {
        println!(
            "{}",
            serde_json::json!({
                "isMatch": result.is_match,
                "distance": result.distance,
                "threshold": VERIFY_DISTANCE_THRESHOLD,
            })
        );
    } else if result.is_match {
        println!("Match (distance {:.4}, threshold {VERIFY_DISTANCE_THRESHOLD})", result.distance);
    } else {
        println!("No match (distance {:.4}, threshold {VERIFY_DISTANCE_THRESHOLD})", result.distance);
    }
    Ok(())
}

fn devices(json: bool) -> Result<()> {
    let devices = likeness_hw::list_devices();
    if json {
        let list: Vec<_> = devices
            .iter()
            .map(|d| serde_json::json!({ "path": d.path, "name": d.name, "driver": d.driver, "bus": d.bus }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No video capture devices found");
    }
    for d in &devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

fn camera_test(args: &CameraArgs, save: Option<&Path>) -> Result<()> {
    println!("Running camera diagnostics on {}...", args.device);
    let camera = Camera::open(&args.device, args.width, args.height)
        .map_err(|e| explain(FaceError::CameraUnavailable(e.to_string())))?;
    println!(
        "  negotiated {}x{} {:?}",
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    let frame = camera.capture_frame()?;
    let mean = frame.data.iter().map(|&b| b as f64).sum::<f64>() / frame.data.len().max(1) as f64;
    println!("  frame #{}: {} bytes, mean level {mean:.1}", frame.sequence, frame.data.len());

    if let Some(path) = save {
        frame
            .into_rgb_image()?
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("  saved {}", path.display());
    }
    Ok(())
}

fn check_models(model_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let dir = resolve_model_dir(model_dir);
    let results: Vec<(&str, Result<PathBuf, ModelIntegrityError>)> = MODELS
        .iter()
        .map(|m| (m.name, models::check_model(m, &dir)))
        .collect();

    if json {
        let report: Vec<_> = results
            .iter()
            .map(|(name, r)| match r {
                Ok(_) => serde_json::json!({ "name": name, "ok": true }),
                Err(e) => serde_json::json!({ "name": name, "ok": false, "error": e.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Model directory: {}", dir.display());
        for (model, (_, r)) in MODELS.iter().zip(&results) {
            match r {
                Ok(_) => println!("  {} ({}) ok", model.name, model.size_display),
                Err(e) => println!("  {e}"),
            }
        }
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        bail!("{failed} model file(s) missing or corrupt in {}", dir.display());
    }
    Ok(())
}
