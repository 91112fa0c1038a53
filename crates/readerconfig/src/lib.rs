use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialise configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategySetting {
    Direct,
    Pooled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSetting {
    Surface,
    Texture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatSetting {
    Rgba,
    Bgra,
    Rgb,
    Red,
    Alpha,
}

/// Capture size, written as `WIDTHxHEIGHT` in files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReaderFile {
    pub version: u32,
    #[serde(default)]
    pub reader: ReaderSection,
    #[serde(default)]
    pub capture: CaptureSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReaderSection {
    #[serde(default = "default_strategy")]
    pub strategy: StrategySetting,
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureSection {
    #[serde(default = "default_target")]
    pub target: TargetSetting,
    #[serde(default = "default_size")]
    pub size: Size,
    #[serde(default = "default_format", deserialize_with = "deserialize_format")]
    pub format: FormatSetting,
    #[serde(default)]
    pub reverse_rows: bool,
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default = "default_color")]
    pub color: [u8; 4],
}

impl Default for ReaderFile {
    fn default() -> Self {
        Self {
            version: 1,
            reader: ReaderSection::default(),
            capture: CaptureSection::default(),
        }
    }
}

impl Default for ReaderSection {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            buffer_count: default_buffer_count(),
            pipeline_depth: default_pipeline_depth(),
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            target: default_target(),
            size: default_size(),
            format: default_format(),
            reverse_rows: false,
            frames: default_frames(),
            color: default_color(),
        }
    }
}

fn default_strategy() -> StrategySetting {
    StrategySetting::Pooled
}

fn default_buffer_count() -> u32 {
    2
}

fn default_pipeline_depth() -> u32 {
    2
}

fn default_target() -> TargetSetting {
    TargetSetting::Surface
}

fn default_size() -> Size {
    Size {
        width: 64,
        height: 64,
    }
}

fn default_format() -> FormatSetting {
    FormatSetting::Rgba
}

fn default_frames() -> u32 {
    4
}

fn default_color() -> [u8; 4] {
    [255, 0, 0, 255]
}

impl ReaderFile {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ReaderFile = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.reader.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "reader.buffer_count must be at least 1".into(),
            ));
        }

        if self.reader.pipeline_depth == 0 {
            return Err(ConfigError::Invalid(
                "reader.pipeline_depth must be at least 1".into(),
            ));
        }

        let size = self.capture.size;
        if size.width == 0 || size.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture.size {size} must be greater than zero in both dimensions"
            )));
        }

        if self.capture.frames == 0 {
            return Err(ConfigError::Invalid(
                "capture.frames must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

impl FormatSetting {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            FormatSetting::Rgba | FormatSetting::Bgra => 4,
            FormatSetting::Rgb => 3,
            FormatSetting::Red | FormatSetting::Alpha => 1,
        }
    }
}

pub fn parse_format(raw: &str) -> Result<FormatSetting, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "rgba" | "rgba8" => Ok(FormatSetting::Rgba),
        "bgra" | "bgra8" => Ok(FormatSetting::Bgra),
        "rgb" | "rgb8" => Ok(FormatSetting::Rgb),
        "red" | "r" | "r8" | "red8" => Ok(FormatSetting::Red),
        "alpha" | "a" | "a8" | "alpha8" => Ok(FormatSetting::Alpha),
        other => Err(format!(
            "unknown pixel format '{other}'; expected rgba, bgra, rgb, red, or alpha"
        )),
    }
}

pub fn parse_size(raw: &str) -> Result<Size, String> {
    let (w, h) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{raw}'; expected WIDTHxHEIGHT"))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width in size '{raw}'"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height in size '{raw}'"))?;
    Ok(Size { width, height })
}

impl FromStr for FormatSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_format(s)
    }
}

impl FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Serialize for Size {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_size(&raw).map_err(de::Error::custom)
    }
}

fn deserialize_format<'de, D>(deserializer: D) -> Result<FormatSetting, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_format(&raw).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[reader]
strategy = "pooled"
buffer_count = 3
pipeline_depth = 1

[capture]
target = "texture"
size = "640x480"
format = "BGRA8"
reverse_rows = true
frames = 6
color = [0, 0, 255, 255]
"#;

    #[test]
    fn parses_sample_config() {
        let config = ReaderFile::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.reader.strategy, StrategySetting::Pooled);
        assert_eq!(config.reader.buffer_count, 3);
        assert_eq!(config.reader.pipeline_depth, 1);
        assert_eq!(config.capture.target, TargetSetting::Texture);
        assert_eq!(
            config.capture.size,
            Size {
                width: 640,
                height: 480
            }
        );
        assert_eq!(config.capture.format, FormatSetting::Bgra);
        assert!(config.capture.reverse_rows);
        assert_eq!(config.capture.frames, 6);
        assert_eq!(config.capture.color, [0, 0, 255, 255]);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = ReaderFile::from_toml_str("version = 1").unwrap();
        assert_eq!(config, ReaderFile::default());
    }

    #[test]
    fn rejects_unknown_version() {
        let err = ReaderFile::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_empty_pool_and_size() {
        let err = ReaderFile::from_toml_str(
            r#"
version = 1
[reader]
buffer_count = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ReaderFile::from_toml_str(
            r#"
version = 1
[capture]
size = "0x16"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_values() {
        let err = ReaderFile::from_toml_str(
            r#"
version = 1
[capture]
size = "wide"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = ReaderFile::from_toml_str(
            r#"
version = 1
[capture]
format = "yuv"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serialised_config_reads_back() {
        let config = ReaderFile::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("size = \"640x480\""));
        assert!(text.contains("format = \"bgra\""));
        assert_eq!(ReaderFile::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = ReaderFile::load(&path).unwrap();
        assert_eq!(config.capture.frames, 6);

        let err = ReaderFile::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
