use anyhow::{Context, Result};
use readerconfig::{FormatSetting, ReaderFile, ReaderSection, StrategySetting};
use texreader::{PixelFormat, ReaderConfig};

use crate::cli::SettingsArgs;

/// Loads the configuration file (or the defaults) and applies command-line overrides.
pub fn resolve_settings(args: &SettingsArgs) -> Result<ReaderFile> {
    let mut file = match &args.config {
        Some(path) => ReaderFile::load(path)
            .with_context(|| format!("failed to load reader config {}", path.display()))?,
        None => ReaderFile::default(),
    };

    if let Some(size) = args.size {
        file.capture.size = size;
    }
    if let Some(color) = args.color {
        file.capture.color = color;
    }
    if let Some(frames) = args.frames {
        file.capture.frames = frames;
    }
    if let Some(target) = args.target {
        file.capture.target = target;
    }
    if let Some(format) = args.format {
        file.capture.format = format;
    }
    if args.reverse_rows {
        file.capture.reverse_rows = true;
    }

    if args.direct {
        file.reader.strategy = StrategySetting::Direct;
    }
    if let Some(buffers) = args.buffers {
        file.reader.strategy = StrategySetting::Pooled;
        file.reader.buffer_count = buffers;
    }
    if let Some(depth) = args.depth {
        file.reader.strategy = StrategySetting::Pooled;
        file.reader.pipeline_depth = depth;
    }

    file.validate().context("invalid capture settings")?;
    Ok(file)
}

pub fn reader_config(section: &ReaderSection) -> ReaderConfig {
    match section.strategy {
        StrategySetting::Direct => ReaderConfig::direct(),
        StrategySetting::Pooled => {
            ReaderConfig::pooled(section.buffer_count, section.pipeline_depth)
        }
    }
}

pub fn pixel_format(format: FormatSetting) -> PixelFormat {
    match format {
        FormatSetting::Rgba => PixelFormat::Rgba8,
        FormatSetting::Bgra => PixelFormat::Bgra8,
        FormatSetting::Rgb => PixelFormat::Rgb8,
        FormatSetting::Red => PixelFormat::Red8,
        FormatSetting::Alpha => PixelFormat::Alpha8,
    }
}
