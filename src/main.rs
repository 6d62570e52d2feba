use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracelens::forensics::TileGrid;
use tracelens::settings::SettingsManager;
use tracelens::{
    CoordinatorHandle, DisplayBuffer, ForensicPipeline, PresentationTarget, ProcessingParameters,
    RawImage, StatusEvent,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct Size {
    width: u32,
    height: u32,
}

fn parse_pair(value: &str) -> Result<(u32, u32), String> {
    let (a, b) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected <A>x<B>, got '{value}'"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|err| format!("'{part}': {err}"))
    };
    Ok((parse(a)?, parse(b)?))
}

fn parse_size(value: &str) -> Result<Size, String> {
    parse_pair(value).map(|(width, height)| Size { width, height })
}

fn parse_tiles(value: &str) -> Result<TileGrid, String> {
    parse_pair(value).map(|(columns, rows)| TileGrid { columns, rows })
}

/// Compute the noise residual and residual spectrum of an image.
#[derive(Debug, Parser)]
#[command(name = "tracelens", version)]
struct Args {
    /// Image to analyse (PNG, JPEG, WebP or GIF).
    image: PathBuf,
    /// Directory receiving residual.png and spectrum.png.
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    gamma: Option<f32>,
    #[arg(long)]
    gain: Option<f32>,
    #[arg(long, allow_hyphen_values = true)]
    offset: Option<f32>,
    /// Odd blur kernel size used for the residual.
    #[arg(long)]
    blur: Option<u32>,
    /// Contrast clip limit; 0 disables clipping.
    #[arg(long)]
    clip: Option<f32>,
    /// Contrast tile grid, e.g. 8x8.
    #[arg(long, value_parser = parse_tiles)]
    tiles: Option<TileGrid>,
    #[arg(long)]
    max_dimension: Option<u32>,
    #[arg(long)]
    max_pixels: Option<u64>,
    /// Bounding box for the residual view, e.g. 1024x768.
    #[arg(long, value_parser = parse_size)]
    residual_size: Option<Size>,
    #[arg(long)]
    spectrum_size: Option<u32>,
    /// Persist the effective parameters as the new defaults.
    #[arg(long)]
    save: bool,
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn parameters(&self, base: ProcessingParameters) -> ProcessingParameters {
        ProcessingParameters {
            gamma: self.gamma.unwrap_or(base.gamma),
            gain: self.gain.unwrap_or(base.gain),
            offset: self.offset.unwrap_or(base.offset),
            blur_kernel: self.blur.unwrap_or(base.blur_kernel),
            clip_limit: self.clip.unwrap_or(base.clip_limit),
            tile_grid: self.tiles.unwrap_or(base.tile_grid),
            max_dimension: self.max_dimension.unwrap_or(base.max_dimension),
            max_pixels: self.max_pixels.unwrap_or(base.max_pixels),
            ..base
        }
    }

    fn target(&self, base: PresentationTarget) -> PresentationTarget {
        let mut target = base;
        if let Some(size) = self.residual_size {
            target.residual_width = size.width;
            target.residual_height = size.height;
        }
        if let Some(side) = self.spectrum_size {
            target.spectrum_size = side;
        }
        target
    }
}

fn load_image(path: &Path) -> Result<RawImage> {
    let size = fs::metadata(path)
        .with_context(|| format!("cannot read {}", path.display()))?
        .len();
    if size > MAX_FILE_BYTES {
        bail!(
            "{} is {:.1} MiB; files above {} MiB are rejected",
            path.display(),
            size as f64 / (1024.0 * 1024.0),
            MAX_FILE_BYTES / (1024 * 1024)
        );
    }
    let decoded = image::open(path).with_context(|| format!("cannot decode {}", path.display()))?;
    Ok(RawImage::from_rgba(decoded.to_rgba8())?)
}

fn write_view(buffer: DisplayBuffer, path: &Path) -> Result<()> {
    buffer
        .into_gray_image()?
        .save(path)
        .with_context(|| format!("cannot write {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut settings = SettingsManager::load_or_default();
    let params = args.parameters(settings.settings().processing);
    params.validate().context("invalid processing parameters")?;
    let target = args.target(settings.settings().presentation).sanitized();
    let image = load_image(&args.image)?;

    let handle = CoordinatorHandle::spawn(settings.settings().coordinator, params, target, move || {
        ForensicPipeline::new().warmed_up(&params)
    })?;
    let events = handle.events();

    let output = loop {
        match events.recv_blocking() {
            Ok(StatusEvent::EngineReady) => handle.submit_source(image.clone())?,
            Ok(StatusEvent::Conditioned { description, .. }) => println!("image: {description}"),
            Ok(StatusEvent::Completed(report)) => {
                let output = report.outcome.context("forensic pass failed")?;
                println!(
                    "pass {} finished in {:.1} ms",
                    report.pass_id,
                    report.elapsed.as_secs_f64() * 1000.0
                );
                break output;
            }
            Ok(StatusEvent::Rejected(err)) => return Err(err).context("request rejected"),
            Err(_) => return Err(anyhow!("coordinator stopped before finishing the pass")),
        }
    };
    handle.shutdown();

    fs::create_dir_all(&args.out).with_context(|| format!("cannot create {}", args.out.display()))?;
    let residual_path = args.out.join("residual.png");
    let spectrum_path = args.out.join("spectrum.png");
    write_view(output.residual, &residual_path)?;
    write_view(output.spectrum, &spectrum_path)?;
    info!(
        "[cli] wrote {} and {}",
        residual_path.display(),
        spectrum_path.display()
    );

    if args.save {
        settings.set_processing(params);
        settings.set_presentation(target);
        let source = fs::canonicalize(&args.image).unwrap_or_else(|_| args.image.clone());
        settings.set_last_source(Some(source));
        if settings.save().context("cannot save settings")? {
            println!("settings saved to {}", settings.path().display());
        }
    }

    Ok(())
}
