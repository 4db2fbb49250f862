//! # Headless preview
//!
//! Renders a settings file on the software device until the sample budget is
//! integrated, then writes the composited image as a PNG.
//!
//! ```bash
//! cargo run --release --example preview -- --settings lab.toml --mode baked-split-sum-nv
//! ```

use std::path::PathBuf;

use clap::Parser;

use ibl_lab::config::LabSettings;
use ibl_lab::{LabConfig, Renderer, SamplingMode, SoftwareDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliSamplingMode {
    /// Importance sampling accumulated over frames
    Is,
    /// Importance sampling with solid-angle mip bias
    FilteredIs,
    SplitSum,
    SplitSumNv,
    BakedSplitSumNv,
}

impl From<CliSamplingMode> for SamplingMode {
    fn from(mode: CliSamplingMode) -> Self {
        match mode {
            CliSamplingMode::Is => SamplingMode::ImportanceSampling,
            CliSamplingMode::FilteredIs => SamplingMode::FilteredImportanceSampling,
            CliSamplingMode::SplitSum => SamplingMode::SplitSum,
            CliSamplingMode::SplitSumNv => SamplingMode::SplitSumNV,
            CliSamplingMode::BakedSplitSumNv => SamplingMode::BakedSplitSumNV,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "preview", about = "Render an IBL lab settings file to a PNG", version)]
struct Args {
    /// Settings TOML. Missing fields take their defaults.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the sampling mode of the settings file.
    #[arg(long, value_enum)]
    mode: Option<CliSamplingMode>,

    /// Output image path.
    #[arg(long, default_value = "preview.png")]
    output: PathBuf,

    /// Output width in pixels.
    #[arg(long, default_value = "320")]
    width: u32,

    /// Output height in pixels.
    #[arg(long, default_value = "180")]
    height: u32,

    /// Stop after N frames even if the budget is not integrated.
    #[arg(long, default_value = "64")]
    max_frames: u32,

    /// Write the effective settings next to the image.
    #[arg(long)]
    save_settings: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => LabSettings::load(path)?,
        None => LabSettings::default(),
    };
    if let Some(mode) = args.mode {
        settings.sampling.mode = mode.into();
    }
    if args.save_settings {
        settings.save(&args.output.with_extension("toml"))?;
    }

    let config = LabConfig {
        width: args.width,
        height: args.height,
        environment_size: 64,
        specular_size: 64,
        diffuse_size: 32,
        brdf_lut_size: 64,
        shadow_map_size: 512,
    };
    let mut renderer = Renderer::new(SoftwareDevice::new(), config, settings)?;

    for frame in 0..args.max_frames {
        renderer.render_frame()?;
        let (processed, total) = renderer.progress();
        log::info!("Frame {}: {}/{} samples", frame, processed, total);
        if processed >= total {
            break;
        }
    }

    let pixels = renderer.read_output()?;
    let image = image::RgbaImage::from_raw(args.width, args.height, pixels)
        .ok_or("output size does not match the image size")?;
    image.save(&args.output)?;
    log::info!("Wrote {}", args.output.display());
    Ok(())
}
