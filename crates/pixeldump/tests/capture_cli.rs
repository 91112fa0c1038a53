use std::fs;
use std::process::Command;

use readerconfig::{FormatSetting, ReaderFile, StrategySetting, TargetSetting};
use tempfile::TempDir;

fn pixeldump() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_pixeldump"));
    command.env_remove("PIXELDUMP_CONFIG");
    command
}

#[test]
fn software_capture_writes_painted_pixels() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("capture.png");

    let status = pixeldump()
        .args([
            "capture",
            "--size",
            "4x4",
            "--color",
            "255,0,0,255",
            "--frames",
            "3",
            "--target",
            "texture",
            "--output",
        ])
        .arg(&output)
        .status()
        .expect("failed to run pixeldump capture");
    assert!(status.success());

    let image = image::open(&output).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (4, 4));
    assert!(image.pixels().all(|px| px.0 == [255, 0, 0, 255]));
}

#[test]
fn direct_capture_reads_the_first_frame() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("direct.bmp");

    let status = pixeldump()
        .args([
            "capture", "--direct", "--frames", "1", "--size", "3x2", "--color", "0,0,255",
            "--format", "rgb", "--output",
        ])
        .arg(&output)
        .status()
        .expect("failed to run pixeldump capture");
    assert!(status.success());

    let image = image::open(&output).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (3, 2));
    assert!(image.pixels().all(|px| px.0 == [0, 0, 255]));
}

#[test]
fn capture_fails_when_the_ring_never_leaves_warmup() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("never.png");

    let result = pixeldump()
        .args([
            "capture", "--buffers", "4", "--depth", "1", "--frames", "2", "--output",
        ])
        .arg(&output)
        .output()
        .expect("failed to run pixeldump capture");
    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("no frame delivered pixels"));
    assert!(!output.exists());
}

#[test]
fn config_command_prints_resolved_settings() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("reader.toml");
    fs::write(
        &config_path,
        r#"
version = 1

[reader]
strategy = "pooled"
buffer_count = 3

[capture]
target = "texture"
size = "32x16"
"#,
    )
    .unwrap();

    let result = pixeldump()
        .arg("config")
        .arg("--config")
        .arg(&config_path)
        .args(["--format", "alpha", "--depth", "4"])
        .output()
        .expect("failed to run pixeldump config");
    assert!(result.status.success());

    let stdout = String::from_utf8(result.stdout).unwrap();
    let resolved = ReaderFile::from_toml_str(&stdout).unwrap();
    assert_eq!(resolved.reader.strategy, StrategySetting::Pooled);
    assert_eq!(resolved.reader.buffer_count, 3);
    assert_eq!(resolved.reader.pipeline_depth, 4);
    assert_eq!(resolved.capture.target, TargetSetting::Texture);
    assert_eq!(resolved.capture.size.width, 32);
    assert_eq!(resolved.capture.format, FormatSetting::Alpha);
}

#[test]
fn config_command_rejects_invalid_files() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("reader.toml");
    fs::write(&config_path, "version = 1\n[reader]\nbuffer_count = 0\n").unwrap();

    let status = pixeldump()
        .arg("config")
        .arg("--config")
        .arg(&config_path)
        .status()
        .expect("failed to run pixeldump config");
    assert!(!status.success());
}
