//! Command-line front end for flow-guided video completion.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use flowfill::flow::{flo, viz, FlowField, FlowSet};
use flowfill::{
    CompletionConfig, CompletionMode, FillStrategy, FlowStage, Frame, Mask, StageObserver,
    VideoCompleter,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Parser)]
#[command(name = "flowfill")]
#[command(about = "Flow-guided video completion (object removal, field-of-view extrapolation)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Complete a video given as a directory of frames.
    Complete(CliCompleteArgs),

    /// Render a Middlebury `.flo` file as a color-wheel PNG.
    FlowViz {
        /// Input `.flo` file.
        #[arg(long)]
        flo: PathBuf,

        /// Output PNG.
        #[arg(long)]
        out: PathBuf,
    },

    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Clone, Args)]
struct CliCompleteArgs {
    /// Directory of input frames (png/jpg), processed in file-name order.
    #[arg(long)]
    frames: PathBuf,

    /// Directory of masks, one per frame; nonzero marks pixels to remove.
    /// Required for object removal.
    #[arg(long)]
    masks: Option<PathBuf>,

    /// Output directory (created if missing).
    #[arg(long)]
    out: PathBuf,

    /// JSON configuration file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Completion mode: object_removal or video_extrapolation.
    #[arg(long)]
    mode: Option<String>,

    /// Propagate gradients and reconstruct color by Poisson blending.
    #[arg(long)]
    seamless: bool,

    /// Edge-guided flow completion.
    #[arg(long)]
    edge_guide: bool,

    /// Use non-local flow to the first, middle and last frames.
    #[arg(long)]
    nonlocal: bool,

    /// Align non-local pairs by a feature homography before flow estimation.
    #[arg(long)]
    homography: bool,

    /// Maximum accumulated flow consistency error in pixels (default: unbounded).
    #[arg(long)]
    consistency_thres: Option<f32>,

    /// Vertical canvas scale for extrapolation.
    #[arg(long)]
    h_scale: Option<f64>,

    /// Horizontal canvas scale for extrapolation.
    #[arg(long)]
    w_scale: Option<f64>,

    /// Iteration cap of the propagate / fill loop.
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Frames handed to the single-image filler per iteration.
    #[arg(long, value_enum)]
    fill_strategy: Option<FillStrategyArg>,

    /// Mask pixels strictly above this gray level are removed.
    #[arg(long, default_value_t = 0)]
    mask_threshold: u8,

    /// Memory budget in MiB; 0 disables the check.
    #[arg(long)]
    max_memory_mib: Option<u64>,

    /// Write raw and completed flow (.flo + PNG) under `<out>/flow`.
    #[arg(long)]
    dump_flow: bool,

    /// Write per-iteration frames with unresolved pixels in green.
    #[arg(long)]
    dump_iterations: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FillStrategyArg {
    AllFrames,
    KeyFrame,
}

impl FillStrategyArg {
    fn to_core(self) -> FillStrategy {
        match self {
            Self::AllFrames => FillStrategy::AllFrames,
            Self::KeyFrame => FillStrategy::KeyFrame,
        }
    }
}

impl CliCompleteArgs {
    fn to_config(&self) -> CliResult<CompletionConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| -> CliError { format!("failed to read config {}: {}", path.display(), e).into() })?;
                serde_json::from_str(&text)?
            }
            None => CompletionConfig::default(),
        };

        if let Some(mode) = &self.mode {
            config.mode = mode.parse::<CompletionMode>()?;
        }
        config.seamless |= self.seamless;
        config.edge_guide |= self.edge_guide;
        config.nonlocal |= self.nonlocal;
        config.homography.enable |= self.homography;
        if self.consistency_thres.is_some() {
            config.propagation.consistency_threshold = self.consistency_thres;
        }
        if let Some(h) = self.h_scale {
            config.extrapolation.h_scale = h;
        }
        if let Some(w) = self.w_scale {
            config.extrapolation.w_scale = w;
        }
        if let Some(n) = self.max_iterations {
            config.convergence.max_iterations = n;
        }
        if let Some(s) = self.fill_strategy {
            config.convergence.fill_strategy = s.to_core();
        }
        if let Some(mib) = self.max_memory_mib {
            config.max_memory_bytes = (mib > 0).then_some(mib << 20);
        }
        Ok(config)
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
        Commands::Complete(args) => run_complete(&args),
        Commands::FlowViz { flo, out } => run_flow_viz(&flo, &out),
        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&CompletionConfig::default())?);
            Ok(())
        }
    }
}

// ── I/O helpers ────────────────────────────────────────────────────────

fn list_images(dir: &Path) -> CliResult<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| -> CliError { format!("failed to list {}: {}", dir.display(), e).into() })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn open_image(path: &Path) -> CliResult<image::DynamicImage> {
    image::open(path).map_err(|e| -> CliError { format!("failed to open image {}: {}", path.display(), e).into() })
}

fn load_frames(dir: &Path) -> CliResult<Vec<Frame>> {
    list_images(dir)?
        .iter()
        .map(|p| -> CliResult<Frame> { Ok(open_image(p)?.to_rgb32f()) })
        .collect()
}

fn load_masks(dir: &Path, threshold: u8) -> CliResult<Vec<Mask>> {
    list_images(dir)?
        .iter()
        .map(|p| -> CliResult<Mask> { Ok(Mask::from_gray(&open_image(p)?.to_luma8(), threshold)) })
        .collect()
}

fn frame_to_rgb8(frame: &Frame) -> image::RgbImage {
    image::RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let p = frame.get_pixel(x, y).0;
        image::Rgb(p.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
    })
}

/// Frame with unresolved pixels painted pure green.
fn frame_with_holes(frame: &Frame, mask: &Mask) -> image::RgbImage {
    let mut img = frame_to_rgb8(frame);
    for (x, y) in mask.iter_set() {
        img.put_pixel(x, y, image::Rgb([0, 255, 0]));
    }
    img
}

fn save_flow(dir: &Path, index: usize, flow: &FlowField) -> CliResult<()> {
    flo::save_flo(&dir.join(format!("{index:05}.flo")), flow)?;
    viz::flow_to_rgb(flow).save(dir.join(format!("{index:05}.png")))?;
    Ok(())
}

// ── Artifact dumping ───────────────────────────────────────────────────

struct ArtifactWriter {
    root: PathBuf,
    flows: bool,
    iterations: bool,
    first_error: Option<CliError>,
}

impl ArtifactWriter {
    fn record(&mut self, result: CliResult<()>) {
        if let Err(e) = result {
            tracing::warn!("failed to write artifact: {}", e);
            self.first_error.get_or_insert(e);
        }
    }

    fn write_flows(&self, stage: FlowStage, flows: &FlowSet) -> CliResult<()> {
        let stage_dir = match stage {
            FlowStage::Raw => "raw",
            FlowStage::Completed => "completed",
        };
        for volume in flows.volumes() {
            let dir = self.root.join("flow").join(stage_dir).join(volume.direction().name());
            std::fs::create_dir_all(&dir)?;
            for (i, field) in volume.fields().iter().enumerate() {
                save_flow(&dir, i, field)?;
            }
        }
        tracing::info!("{} flow written to {}", stage_dir, self.root.join("flow").display());
        Ok(())
    }

    fn write_iteration(&self, iteration: usize, frames: &[Frame], masks: &[Mask]) -> CliResult<()> {
        let dir = self.root.join("iterations").join(format!("{iteration:02}"));
        std::fs::create_dir_all(&dir)?;
        for (t, (frame, mask)) in frames.iter().zip(masks).enumerate() {
            frame_with_holes(frame, mask).save(dir.join(format!("{t:05}.png")))?;
        }
        Ok(())
    }
}

impl StageObserver for ArtifactWriter {
    fn flows(&mut self, stage: FlowStage, flows: &FlowSet) {
        if self.flows {
            let r = self.write_flows(stage, flows);
            self.record(r);
        }
    }

    fn iteration(&mut self, iteration: usize, frames: &[Frame], masks: &[Mask]) {
        if self.iterations {
            let r = self.write_iteration(iteration, frames, masks);
            self.record(r);
        }
    }
}

// ── complete ───────────────────────────────────────────────────────────

fn run_complete(args: &CliCompleteArgs) -> CliResult<()> {
    let config = args.to_config()?;

    tracing::info!("Loading frames: {}", args.frames.display());
    let frames = load_frames(&args.frames)?;
    if let Some(first) = frames.first() {
        tracing::info!("Loaded {} frames of {}x{}", frames.len(), first.width(), first.height());
    }
    let masks = match (&args.masks, config.mode) {
        (Some(dir), CompletionMode::ObjectRemoval) => Some(load_masks(dir, args.mask_threshold)?),
        (Some(_), CompletionMode::VideoExtrapolation) => {
            tracing::warn!("--masks is ignored in video_extrapolation mode");
            None
        }
        (None, _) => None,
    };

    std::fs::create_dir_all(&args.out)?;
    let mut writer = ArtifactWriter {
        root: args.out.clone(),
        flows: args.dump_flow,
        iterations: args.dump_iterations,
        first_error: None,
    };

    let completer = VideoCompleter::new(config);
    let output = completer.run_observed(frames, masks, &mut writer)?;
    if let Some(e) = writer.first_error {
        return Err(e);
    }

    let frame_dir = args.out.join("frames");
    std::fs::create_dir_all(&frame_dir)?;
    for (t, frame) in output.frames.iter().enumerate() {
        frame_to_rgb8(frame).save(frame_dir.join(format!("{t:05}.png")))?;
    }
    tracing::info!("{} frames written to {}", output.frames.len(), frame_dir.display());

    let report = &output.report;
    if report.converged {
        tracing::info!("Converged after {} iterations", report.iterations.len());
    } else {
        tracing::warn!(
            "Not converged: {} pixels still missing after {} iterations",
            report.residual_missing,
            report.iterations.len()
        );
    }

    let report_path = args.out.join("report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(report)?)?;
    tracing::info!("Report written to {}", report_path.display());

    Ok(())
}

// ── flow-viz ───────────────────────────────────────────────────────────

fn run_flow_viz(flo_path: &Path, out: &Path) -> CliResult<()> {
    let flow = flo::load_flo(flo_path)
        .map_err(|e| -> CliError { format!("failed to read {}: {}", flo_path.display(), e).into() })?;
    viz::flow_to_rgb(&flow).save(out)?;
    tracing::info!(
        "{}x{} flow (max magnitude {:.2}) rendered to {}",
        flow.width(),
        flow.height(),
        flow.max_magnitude(),
        out.display()
    );
    Ok(())
}
