use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use watermark_eraser::{
    default_output_path, is_supported_image, load_image, load_mask, save_image, Algorithm,
    BatchEvent, BatchJob, BatchOrchestrator, InpaintStrategy, ProcessOutcome, RemovalSession,
    Settings, WatermarkDetector,
};

#[derive(Parser)]
#[command(
    name = "watermark-eraser",
    about = "Mark watermark regions and erase them by inpainting",
    version,
    after_help = "Set RUST_LOG to override the log filter, e.g. RUST_LOG=watermark_eraser=debug"
)]
struct Cli {
    /// Settings file (default: ~/.watermark-eraser/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List likely watermark regions
    Detect {
        /// Input image
        image: PathBuf,

        /// Write the detected regions as a mask image
        #[arg(long)]
        mask_out: Option<PathBuf>,
    },
    /// Erase marked regions from one image
    Remove(RemoveArgs),
    /// Apply one template mask to many images
    Batch(BatchArgs),
}

#[derive(Args)]
struct StrategyArgs {
    /// auto, basic, navier-stokes, fast-marching or patch-based
    #[arg(short, long)]
    algorithm: Option<Algorithm>,

    /// Inpainting radius in pixels (1-20)
    #[arg(short, long)]
    radius: Option<u32>,
}

#[derive(Args)]
struct RemoveArgs {
    /// Input image
    image: PathBuf,

    /// Output file (default: {name}_cleaned.{ext})
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mask image; white marks pixels to erase
    #[arg(long, conflicts_with = "auto")]
    mask: Option<PathBuf>,

    /// Mark regions found by the detector
    #[arg(long)]
    auto: bool,

    /// Mark a rectangle X,Y,W,H (repeatable)
    #[arg(long, value_parser = parse_rect)]
    rect: Vec<(i32, i32, u32, u32)>,

    #[command(flatten)]
    strategy: StrategyArgs,

    /// Run at reduced resolution for a quick look
    #[arg(long)]
    preview: bool,

    /// JPEG quality (1-100)
    #[arg(long)]
    quality: Option<u8>,
}

#[derive(Args)]
struct BatchArgs {
    /// Input images or directories
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Template mask applied to every image
    #[arg(long)]
    mask: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Worker threads (default: `max_workers` setting)
    #[arg(short, long)]
    workers: Option<usize>,

    #[command(flatten)]
    strategy: StrategyArgs,

    /// Suffix added to output file names
    #[arg(long)]
    suffix: Option<String>,
}

fn parse_rect(s: &str) -> Result<(i32, i32, u32, u32), String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected X,Y,W,H, got {s:?}"));
    };
    let bad = |e: std::num::ParseIntError| format!("{s:?}: {e}");
    Ok((
        x.parse().map_err(bad)?,
        y.parse().map_err(bad)?,
        w.parse().map_err(bad)?,
        h.parse().map_err(bad)?,
    ))
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "watermark_eraser=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let code = match cli.command {
        Command::Detect { image, mask_out } => run_detect(&image, mask_out.as_deref(), cli.quiet),
        Command::Remove(args) => run_remove(&args, &settings, cli.quiet),
        Command::Batch(args) => run_batch(&args, &settings, cli.quiet),
    };
    process::exit(code);
}

fn load_settings(path: Option<&Path>) -> watermark_eraser::Result<Settings> {
    match path.map(Path::to_path_buf).or_else(Settings::default_path) {
        Some(path) => Settings::load(&path),
        None => Ok(Settings::default()),
    }
}

fn strategy_for(args: &StrategyArgs, settings: &Settings) -> InpaintStrategy {
    let base = settings.strategy();
    InpaintStrategy::new(
        args.algorithm.unwrap_or(base.algorithm),
        args.radius.unwrap_or(base.radius),
        base.preview_quality,
    )
}

fn run_detect(image: &Path, mask_out: Option<&Path>, quiet: bool) -> i32 {
    let img = match load_image(image) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("[FAIL] {}: {e}", image.display());
            return 1;
        }
    };

    let mut session = RemovalSession::default();
    session.load_image(img, Some(image.to_path_buf()));
    let regions = match session.auto_mark() {
        Ok(regions) => regions,
        Err(e) => {
            eprintln!("[FAIL] {}: {e}", image.display());
            return 1;
        }
    };

    if !quiet {
        if regions.is_empty() {
            eprintln!("No watermark candidates found");
        }
        for (i, r) in regions.iter().enumerate() {
            println!(
                "{}: x={} y={} w={} h={} ({:.0}% confidence)",
                i + 1,
                r.x,
                r.y,
                r.width,
                r.height,
                r.confidence * 100.0
            );
        }
    }

    if let Some(out) = mask_out {
        let written = session
            .editor()
            .map_err(|e| e.to_string())
            .and_then(|editor| editor.mask().save(out).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("[FAIL] {}: {e}", out.display());
            return 1;
        }
    }
    0
}

fn run_remove(args: &RemoveArgs, settings: &Settings, quiet: bool) -> i32 {
    match remove(args, settings, quiet) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("[FAIL] {}: {e}", args.image.display());
            1
        }
    }
}

fn remove(args: &RemoveArgs, settings: &Settings, quiet: bool) -> watermark_eraser::Result<()> {
    let mut session = RemovalSession::default();
    session.set_strategy(strategy_for(&args.strategy, settings));
    session.load_path(&args.image)?;

    if let Some(mask_path) = &args.mask {
        let mask = load_mask(mask_path, Some(session.image()?.dimensions()))?;
        session.editor_mut()?.apply_mask(&mask);
    }
    for &(x, y, w, h) in &args.rect {
        session.editor_mut()?.fill_rect(x, y, w, h);
    }
    session.editor_mut()?.commit();
    if args.auto {
        let regions = session.auto_mark()?;
        if !quiet {
            eprintln!("Detected {} region(s)", regions.len());
        }
    }

    let outcome = session.process(args.preview)?;
    let ProcessOutcome::Inpainted(done) = outcome else {
        if !quiet {
            eprintln!("[SKIP] {}: nothing marked", args.image.display());
        }
        return Ok(());
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.image));
    let quality = args.quality.or_else(|| Some(settings.get("jpeg_quality", 95)));
    save_image(&done.image, &output, quality)?;

    if !quiet {
        let note = if done.fell_back { ", fell back" } else { "" };
        eprintln!(
            "[OK] {} -> {} ({}{note}, {} ms)",
            args.image.display(),
            output.display(),
            done.method,
            done.elapsed.as_millis()
        );
    }
    Ok(())
}

fn collect_sources(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    for input in inputs {
        if input.is_dir() {
            match std::fs::read_dir(input) {
                Ok(entries) => {
                    let mut found: Vec<PathBuf> = entries
                        .filter_map(std::result::Result::ok)
                        .map(|e| e.path())
                        .filter(|p| p.is_file() && is_supported_image(p))
                        .collect();
                    found.sort();
                    sources.extend(found);
                }
                Err(e) => eprintln!("Warning: cannot read {}: {e}", input.display()),
            }
        } else {
            sources.push(input.clone());
        }
    }
    sources
}

fn run_batch(args: &BatchArgs, settings: &Settings, quiet: bool) -> i32 {
    let template = match load_mask(&args.mask, None) {
        Ok(mask) => mask,
        Err(e) => {
            eprintln!("Error: cannot load mask {}: {e}", args.mask.display());
            return 1;
        }
    };

    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(settings.get("output_dir", String::new())));
    let mut job = BatchJob::new(collect_sources(&args.inputs), output_dir, template);
    job.strategy = strategy_for(&args.strategy, settings);
    job.max_workers = Some(args.workers.unwrap_or_else(|| settings.max_workers()));
    job.suffix = args
        .suffix
        .clone()
        .unwrap_or_else(|| settings.get("output_suffix", "cleaned".to_string()));

    let orchestrator = BatchOrchestrator::default();
    let events = match orchestrator.start(job) {
        Ok(rx) => rx,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let mut failed = 0;
    for event in events {
        match event {
            BatchEvent::Progress { processed, total } => {
                if !quiet {
                    eprint!("\r[{processed}/{total}]");
                }
            }
            BatchEvent::Error(message) => eprintln!("\nError: {message}"),
            BatchEvent::Completed(result) => {
                if !quiet {
                    eprintln!();
                    eprint!("[Summary] Succeeded: {}", result.succeeded);
                    if result.failed > 0 {
                        eprint!(", Failed: {}", result.failed);
                    }
                    if result.stopped {
                        eprint!(", Stopped");
                    }
                    eprintln!(
                        " (Total: {}, {:.1}s)",
                        result.total,
                        result.elapsed.as_secs_f64()
                    );
                }
                for path in &result.failed_paths {
                    eprintln!("[FAIL] {}", path.display());
                }
                failed = result.failed;
            }
        }
    }
    orchestrator.wait();

    i32::from(failed > 0)
}
