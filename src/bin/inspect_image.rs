//! inspect_image - run defect detection on a single image file
//!
//! Prints the detection batch as JSON on stdout and optionally writes the
//! annotated render next to it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use inspection_kernel::detect::{
    ChannelOrder, ClassTable, DetectionEngine, EngineOptions, SuppressionMode,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD,
};
use inspection_kernel::TextRenderer;

#[derive(Parser, Debug)]
#[command(name = "inspect_image", about = "Detect defects in one image")]
struct Args {
    /// ONNX model file
    #[arg(long, env = "VRS_MODEL_PATH", value_name = "PATH")]
    model: PathBuf,

    /// Input image
    #[arg(long, value_name = "PATH")]
    image: PathBuf,

    /// Where to write the annotated image
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence: f32,

    #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD)]
    iou: f32,

    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_size: u32,

    /// Suppress overlapping boxes only within the same class
    #[arg(long)]
    per_class: bool,

    /// Model expects BGR channel order
    #[arg(long)]
    bgr: bool,

    /// Comma-separated class labels (defaults to the PCB defect set)
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    #[arg(long, env = "VRS_FONT_PATH", value_name = "PATH")]
    font: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let classes = if args.labels.is_empty() {
        ClassTable::pcb_defaults()
    } else {
        ClassTable::from_labels(args.labels.iter().cloned())
    };
    let options = EngineOptions {
        input_size: args.input_size,
        channel_order: if args.bgr {
            ChannelOrder::Bgr
        } else {
            ChannelOrder::Rgb
        },
        suppression: if args.per_class {
            SuppressionMode::PerClass
        } else {
            SuppressionMode::ClassAgnostic
        },
        classes,
        text: TextRenderer::load(args.font.as_deref()),
    };

    let engine = DetectionEngine::load(&args.model, options)?;
    let (annotated, batch) = engine.detect_file(&args.image, args.confidence, args.iou)?;

    println!("{}", serde_json::to_string_pretty(&batch)?);

    if let Some(output) = &args.output {
        annotated
            .save(output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        log::info!("annotated image written to {}", output.display());
    }
    Ok(())
}
