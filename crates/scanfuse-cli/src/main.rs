//! scanfuse CLI — convert study detection payloads and run detection fusion.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use scanfuse_core::codec::{self, coco, dicos, StudyFormat};
use scanfuse_core::{fusion, Detection, View};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "scanfuse")]
#[command(about = "Fuse multi-algorithm object detections from X-ray scan studies (DICOS / MS-COCO)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a DICOS or COCO detection payload to a detection list (JSON).
    Convert(ConvertArgs),

    /// Fuse a detection list into one consensus detection per object.
    Fuse(FuseArgs),

    /// Print a summary of the detections in a payload.
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Args)]
struct ConvertArgs {
    /// Path to the input payload (format is sniffed).
    #[arg(long)]
    input: PathBuf,

    /// Scan view the payload belongs to.
    #[arg(long, value_enum)]
    view: ViewArg,

    /// Name of the algorithm that produced the payload (ignored for DICOS,
    /// which carries its own).
    #[arg(long, default_value = "unknown")]
    algorithm: String,

    /// Path to write the detection list (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct FuseArgs {
    /// Path to a detection list (JSON, as written by `convert`).
    #[arg(long)]
    input: PathBuf,

    /// Path to write the fused detection list (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct InspectArgs {
    /// Path to a DICOS or COCO payload.
    #[arg(long)]
    input: PathBuf,

    /// Scan view to attribute parsed detections to.
    #[arg(long, value_enum, default_value_t = ViewArg::Top)]
    view: ViewArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ViewArg {
    Top,
    Side,
}

impl ViewArg {
    fn to_core(self) -> View {
        match self {
            Self::Top => View::Top,
            Self::Side => View::Side,
        }
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert(args) => run_convert(&args),
        Commands::Fuse(args) => run_fuse(&args),
        Commands::Inspect(args) => run_inspect(&args),
    }
}

/// Parse a payload of either supported format. An unsupported format is
/// non-fatal and contributes zero detections.
fn parse_payload(bytes: &[u8], view: View, algorithm: &str) -> CliResult<Vec<Detection>> {
    match codec::detect_format(bytes) {
        Some(StudyFormat::Dicos) => Ok(dicos::parse_dicos_detections(bytes, view)?),
        Some(StudyFormat::Coco) => {
            let json = std::str::from_utf8(bytes)
                .map_err(|e| -> CliError { format!("COCO payload is not UTF-8: {e}").into() })?;
            Ok(coco::parse_coco_detections(json, view, algorithm)?)
        }
        None => {
            tracing::warn!("unsupported payload format; contributing no detections");
            Ok(Vec::new())
        }
    }
}

fn run_convert(args: &ConvertArgs) -> CliResult<()> {
    tracing::info!("Reading payload: {}", args.input.display());
    let bytes = std::fs::read(&args.input)?;

    let detections = parse_payload(&bytes, args.view.to_core(), &args.algorithm)?;
    tracing::info!("Parsed {} detections", detections.len());

    let json = serde_json::to_string_pretty(&detections)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Detections written to {}", args.out.display());
    Ok(())
}

fn run_fuse(args: &FuseArgs) -> CliResult<()> {
    let json = std::fs::read_to_string(&args.input)?;
    let raw: Vec<Detection> = serde_json::from_str(&json)?;

    let fused = fusion::fuse_detections(&raw);
    tracing::info!(
        "Fused {} raw detections into {} consensus detections",
        raw.len(),
        fused.len(),
    );

    let out_json = serde_json::to_string_pretty(&fused)?;
    std::fs::write(&args.out, &out_json)?;
    tracing::info!("Fused detections written to {}", args.out.display());
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> CliResult<()> {
    let bytes = std::fs::read(&args.input)?;
    let detections = parse_payload(&bytes, args.view.to_core(), "unknown")?;

    println!("{}: {} detections", args.input.display(), detections.len());
    for det in &detections {
        let shape = match &det.mask {
            scanfuse_core::Mask::None => "box".to_string(),
            scanfuse_core::Mask::Polygon(verts) => format!("polygon[{}]", verts.len()),
            scanfuse_core::Mask::Raster(r) => format!("raster[{}x{}]", r.extent[0], r.extent[1]),
        };
        println!(
            "  {} {} conf={:.0} alg={} box=[{:.1}, {:.1}, {:.1}, {:.1}] shape={}",
            det.view,
            det.class_name,
            det.confidence,
            det.algorithm,
            det.bounding_box.x1,
            det.bounding_box.y1,
            det.bounding_box.x2,
            det.bounding_box.y2,
            shape,
        );
    }
    Ok(())
}
