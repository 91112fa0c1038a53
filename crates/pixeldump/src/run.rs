use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use readerconfig::{CaptureSection, FormatSetting, ReaderFile, TargetSetting};
use texreader::{
    CaptureRequest, CaptureTarget, DeviceError, ReadbackDevice, Rect, SoftwareDevice, TexReader,
};
use tracing_subscriber::EnvFilter;

use crate::bindings::{pixel_format, reader_config, resolve_settings};
use crate::cli::{Backend, CaptureArgs, ConfigArgs};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// A device the CLI can draw into before reading it back.
trait Canvas: ReadbackDevice {
    fn paint(&mut self, target: CaptureTarget, color: [u8; 4]) -> Result<(), DeviceError>;

    /// Called after each frame's capture.
    fn end_frame(&mut self) {}
}

impl Canvas for SoftwareDevice {
    fn paint(&mut self, target: CaptureTarget, color: [u8; 4]) -> Result<(), DeviceError> {
        match target {
            CaptureTarget::Surface => {
                self.fill_surface(color);
                Ok(())
            }
            CaptureTarget::Texture(id) => self.fill_texture(id, color),
        }
    }

    fn end_frame(&mut self) {
        self.finish_frame();
    }
}

#[cfg(feature = "gpu")]
impl Canvas for texreader::gpu::WgpuDevice {
    fn paint(&mut self, target: CaptureTarget, color: [u8; 4]) -> Result<(), DeviceError> {
        match target {
            CaptureTarget::Surface => self.fill_surface(color),
            CaptureTarget::Texture(id) => self.fill_texture(id, color),
        }
    }
}

pub fn capture(args: CaptureArgs) -> Result<()> {
    let file = resolve_settings(&args.settings)?;
    let capture = &file.capture;
    tracing::info!(
        backend = %args.backend,
        strategy = ?file.reader.strategy,
        buffers = file.reader.buffer_count,
        depth = file.reader.pipeline_depth,
        size = %capture.size,
        target = ?capture.target,
        frames = capture.frames,
        "starting capture"
    );

    let pixels = match args.backend {
        Backend::Software => capture_software(&file)?,
        Backend::Gpu => capture_gpu(&file)?,
    };

    write_image(&args.output, capture, pixels)?;
    println!(
        "wrote {} {:?} capture to {}",
        capture.size,
        capture.format,
        args.output.display()
    );
    Ok(())
}

pub fn print_config(args: ConfigArgs) -> Result<()> {
    let file = resolve_settings(&args.settings)?;
    let text = file
        .to_toml_string()
        .context("failed to render configuration")?;
    print!("{text}");
    Ok(())
}

fn capture_software(file: &ReaderFile) -> Result<Vec<u8>> {
    let size = file.capture.size;
    let mut device = SoftwareDevice::new(size.width, size.height);
    let target = match file.capture.target {
        TargetSetting::Surface => CaptureTarget::Surface,
        TargetSetting::Texture => {
            CaptureTarget::Texture(device.register_texture(size.width, size.height))
        }
    };
    let pixels = drive(&mut device, target, file)?;
    tracing::debug!(stats = ?device.stats(), "software device finished");
    Ok(pixels)
}

#[cfg(feature = "gpu")]
fn capture_gpu(file: &ReaderFile) -> Result<Vec<u8>> {
    use texreader::gpu::{GpuContext, HeadlessOptions, WgpuDevice};

    let options = HeadlessOptions {
        allow_fallback: true,
        ..HeadlessOptions::default()
    };
    let context = GpuContext::headless(&options)?;
    tracing::info!(
        adapter = %context.adapter_profile.name,
        backend = ?context.adapter_profile.backend,
        "using GPU adapter"
    );
    let size = file.capture.size;
    let max = context.adapter_profile.max_texture_dimension;
    if size.width > max || size.height > max {
        bail!("GPU max texture dimension is {max}, requested capture is {size}");
    }

    let mut device = WgpuDevice::new(&context);
    let texture = device.create_target_texture(size.width, size.height, "pixeldump target");
    let target = match file.capture.target {
        TargetSetting::Surface => {
            device.set_surface_texture(Some(texture));
            CaptureTarget::Surface
        }
        TargetSetting::Texture => CaptureTarget::Texture(device.register_texture(texture)),
    };
    drive(&mut device, target, file)
}

#[cfg(not(feature = "gpu"))]
fn capture_gpu(_file: &ReaderFile) -> Result<Vec<u8>> {
    bail!("gpu support is not enabled in this build")
}

/// Paints and captures `frames` frames, returning the last pixels the reader delivered.
fn drive<D: Canvas>(device: &mut D, target: CaptureTarget, file: &ReaderFile) -> Result<Vec<u8>> {
    let capture = &file.capture;
    let mut reader = TexReader::for_device(device, reader_config(&file.reader))
        .context("failed to create pixel reader")?;
    let request = CaptureRequest::new(
        target,
        Rect::sized(capture.size.width, capture.size.height),
        pixel_format(capture.format),
    )
    .with_reverse_rows(capture.reverse_rows);
    let mut pixels = vec![0u8; request.byte_len()];

    let mut delivered = 0;
    let mut stale = 0;
    for frame in 0..capture.frames {
        let result = device
            .paint(target, capture.color)
            .context("failed to paint frame")
            .and_then(|()| {
                reader
                    .download(device, &request, &mut pixels)
                    .with_context(|| format!("capture failed on frame {frame}"))
            });
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                reader.shutdown_pool(device);
                return Err(err);
            }
        };
        device.end_frame();
        delivered += report.delivered;
        stale += report.stale;
        tracing::debug!(
            frame,
            issued = report.issued,
            delivered = report.delivered,
            stale = report.stale,
            "captured frame"
        );
    }
    reader.shutdown_pool(device);

    if delivered == 0 {
        bail!(
            "no frame delivered pixels after {} frames ({} stale); \
             capture more frames than there are transfer buffers or pass --direct",
            capture.frames,
            stale
        );
    }
    Ok(pixels)
}

fn write_image(path: &Path, capture: &CaptureSection, pixels: Vec<u8>) -> Result<()> {
    let (width, height) = (capture.size.width, capture.size.height);
    let bytes_per_pixel = u64::from(capture.format.bytes_per_pixel());
    let expected = u64::from(width) * u64::from(height) * bytes_per_pixel;
    if pixels.len() as u64 != expected {
        bail!(
            "captured {} bytes but a {} {:?} image needs {expected}",
            pixels.len(),
            capture.size,
            capture.format
        );
    }
    let image = match capture.format {
        FormatSetting::Rgba => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::from),
        FormatSetting::Bgra => {
            let mut pixels = pixels;
            for pixel in pixels.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
            RgbaImage::from_raw(width, height, pixels).map(DynamicImage::from)
        }
        FormatSetting::Rgb => RgbImage::from_raw(width, height, pixels).map(DynamicImage::from),
        FormatSetting::Red | FormatSetting::Alpha => {
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::from)
        }
    }
    .context("failed to wrap captured pixels in an image")?;

    let format = ImageFormat::from_path(path)
        .with_context(|| format!("unsupported image extension for {}", path.display()))?;
    let image = match format {
        ImageFormat::Jpeg if image.color().has_alpha() => DynamicImage::from(image.to_rgb8()),
        _ => image,
    };
    image
        .save_with_format(path, format)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
