use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use readerconfig::{parse_format, parse_size, FormatSetting, Size, TargetSetting};

#[derive(Parser, Debug)]
#[command(
    name = "pixeldump",
    author,
    version,
    about = "Capture rendered pixels through the pooled readback pipeline"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Paint a target for a few frames, read it back, and write the pixels to an image.
    Capture(CaptureArgs),
    /// Print the configuration a capture would use, after applying overrides.
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Device to render and read back on: `software` or `gpu`.
    #[arg(
        long,
        value_name = "BACKEND",
        value_parser = parse_backend,
        default_value_t = Backend::Software
    )]
    pub backend: Backend,

    /// Image to write; the extension picks PNG, JPEG, or BMP.
    #[arg(long, short, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Reader and capture settings shared by every subcommand. Flags win over the file.
#[derive(Parser, Debug, Default)]
pub struct SettingsArgs {
    /// Reader configuration TOML file.
    #[arg(long, value_name = "FILE", env = "PIXELDUMP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Capture size (e.g. `640x480`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<Size>,

    /// Solid color painted every frame, as `R,G,B,A` (alpha optional).
    #[arg(long, value_name = "R,G,B[,A]", value_parser = parse_color)]
    pub color: Option<[u8; 4]>,

    /// Number of frames to paint and capture.
    #[arg(long, value_name = "N")]
    pub frames: Option<u32>,

    /// Capture the presentation `surface` or a `texture` through an off-screen target.
    #[arg(long, value_name = "TARGET", value_parser = parse_target)]
    pub target: Option<TargetSetting>,

    /// Host pixel format: `rgba`, `bgra`, `rgb`, `red`, or `alpha`.
    #[arg(long, value_name = "FORMAT", value_parser = parse_format)]
    pub format: Option<FormatSetting>,

    /// Deliver rows bottom-up.
    #[arg(long)]
    pub reverse_rows: bool,

    /// Skip the transfer pool and read every frame with a blocking copy.
    #[arg(long, conflicts_with_all = ["buffers", "depth"])]
    pub direct: bool,

    /// Transfer buffers in the ring (enables the pooled path).
    #[arg(long, value_name = "N")]
    pub buffers: Option<u32>,

    /// Copies issued per captured frame.
    #[arg(long, value_name = "N")]
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Software,
    Gpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Software => f.write_str("software"),
            Backend::Gpu => f.write_str("gpu"),
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_backend(value: &str) -> Result<Backend, String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "software" | "cpu" | "sw" => Ok(Backend::Software),
        "gpu" | "wgpu" => {
            if cfg!(feature = "gpu") {
                Ok(Backend::Gpu)
            } else {
                Err("gpu support is not enabled in this build".to_string())
            }
        }
        other => Err(format!(
            "unknown backend '{other}'; expected software or gpu"
        )),
    }
}

pub fn parse_target(value: &str) -> Result<TargetSetting, String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "surface" | "window" | "default" => Ok(TargetSetting::Surface),
        "texture" | "offscreen" => Ok(TargetSetting::Texture),
        other => Err(format!(
            "unknown capture target '{other}'; expected surface or texture"
        )),
    }
}

pub fn parse_color(value: &str) -> Result<[u8; 4], String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("color must not be empty".to_string());
    }

    let channels = trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| format!("invalid color channel '{}'; expected 0-255", part.trim()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match channels.as_slice() {
        [r, g, b] => Ok([*r, *g, *b, 255]),
        [r, g, b, a] => Ok([*r, *g, *b, *a]),
        _ => Err(format!(
            "color '{trimmed}' must have three or four channels"
        )),
    }
}
