use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facemark::config::{self, Config};
use facemark::coordinator::{Coordinator, PassOutcome};
use facemark::display::FileDisplay;
use facemark::picker::{self, CameraPicker, GalleryPicker, ImageSource, PickRequest, PickedImage};
use facemark::{FaceDetector, YuNetDetector};
use log::{info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "facemark")]
#[command(version, about = "Detect faces in a photo and outline them in yellow")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct DetectArgs {
    /// Where the displayed image is written
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// YuNet ONNX model (overrides config)
    #[arg(long)]
    model: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick a photo from disk and annotate detected faces
    Annotate {
        /// Photo to annotate
        path: PathBuf,

        #[command(flatten)]
        args: DetectArgs,
    },
    /// Take a photo with the configured camera and annotate detected faces
    Capture {
        #[command(flatten)]
        args: DetectArgs,
    },
    /// Read picks from stdin (`gallery <path>`, `camera`, `cancel`), one pass each
    Interactive {
        #[command(flatten)]
        args: DetectArgs,
    },
    /// Print a photo's stored orientation as JSON
    Inspect {
        path: PathBuf,
    },
    /// Open config file in editor
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Annotate { path, args } => {
            let output = args.output.clone().unwrap_or_else(|| annotated_name(&path));
            let picked = pick_blocking(GalleryPicker::new(path)).await?;
            one_shot(&cfg, &args, &output, picked).await
        }
        Commands::Capture { args } => {
            let output = args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from("capture_faces.png"));
            let picked =
                pick_blocking(CameraPicker::new(cfg.camera.clone(), cfg.camera_orientation))
                    .await?;
            one_shot(&cfg, &args, &output, picked).await
        }
        Commands::Interactive { args } => interactive(&cfg, &args).await,
        Commands::Inspect { path } => inspect(&path),
        Commands::Config => open_config(),
    }
}

fn annotated_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    path.with_file_name(format!("{}_faces.png", stem))
}

fn load_detector(cfg: &Config, args: &DetectArgs) -> Result<Arc<dyn FaceDetector>> {
    let model = args.model.as_deref().unwrap_or(&cfg.model);
    info!("Loading face detector: {}", model.display());
    let detector = YuNetDetector::open(model, cfg.score_threshold, cfg.nms_threshold)
        .context("Failed to initialize face detector")?;
    Ok(Arc::new(detector))
}

/// Run a picker off the async threads; camera capture blocks.
async fn pick_blocking<P>(mut picker: P) -> Result<Option<PickedImage>>
where
    P: ImageSource + Send + 'static,
{
    tokio::task::spawn_blocking(move || picker.pick())
        .await
        .context("picker task failed")?
}

async fn one_shot(
    cfg: &Config,
    args: &DetectArgs,
    output: &Path,
    picked: Option<PickedImage>,
) -> Result<()> {
    let Some(picked) = picked else {
        info!("Pick cancelled");
        return Ok(());
    };
    let detector = load_detector(cfg, args)?;
    let display = FileDisplay::new(output)?;
    let mut coordinator = Coordinator::new(detector, display, cfg.detection_timeout());

    coordinator.submit(picked)?;
    match coordinator.settle().await {
        Some(PassOutcome::Displayed { faces, .. }) => {
            info!("✓ {} face(s) outlined in {}", faces, output.display());
        }
        Some(outcome) => {
            warn!("No overlay drawn ({:?}); {} shows the plain photo", outcome, output.display());
        }
        None => {}
    }
    Ok(())
}

async fn interactive(cfg: &Config, args: &DetectArgs) -> Result<()> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("facemark_display.png"));
    let detector = load_detector(cfg, args)?;
    let coordinator = Coordinator::new(
        detector,
        FileDisplay::new(&output)?,
        cfg.detection_timeout(),
    );

    let (tx, rx) = mpsc::channel(4);
    let runner = tokio::spawn(coordinator.run(rx));

    info!("Displaying to {}", output.display());
    info!("Commands: gallery <path> | camera | cancel (Ctrl+D to quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let picked = match PickRequest::parse(&line) {
            Ok(PickRequest::Gallery(path)) => pick_blocking(GalleryPicker::new(path)).await,
            Ok(PickRequest::Camera) => {
                let camera = CameraPicker::new(cfg.camera.clone(), cfg.camera_orientation);
                pick_blocking(camera).await
            }
            Ok(PickRequest::Cancel) => Ok(None),
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        match picked {
            Ok(Some(picked)) => {
                if tx.send(picked).await.is_err() {
                    break;
                }
            }
            Ok(None) => info!("Pick cancelled"),
            Err(e) => warn!("Pick failed: {:#}", e),
        }
    }

    drop(tx);
    runner.await.context("display task failed")?;
    Ok(())
}

#[derive(Serialize)]
struct OrientationReport {
    path: PathBuf,
    width: u32,
    height: u32,
    orientation_tag: u16,
    orientation: Option<facemark::Orientation>,
    upright_width: Option<u32>,
    upright_height: Option<u32>,
    error: Option<String>,
}

fn inspect(path: &Path) -> Result<()> {
    let (image, tag) = picker::open_with_orientation(path)?;
    let (width, height) = (image.width(), image.height());
    let report = match facemark_vision::normalize(tag) {
        Ok(o) => {
            let (uw, uh) = o.upright_dimensions(width, height);
            OrientationReport {
                path: path.to_path_buf(),
                width,
                height,
                orientation_tag: tag,
                orientation: Some(o),
                upright_width: Some(uw),
                upright_height: Some(uh),
                error: None,
            }
        }
        Err(e) => OrientationReport {
            path: path.to_path_buf(),
            width,
            height,
            orientation_tag: tag,
            orientation: None,
            upright_width: None,
            upright_height: None,
            error: Some(e.to_string()),
        },
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_path();
    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
