// Primary-display capture for the desktop operator.
use image::imageops::FilterType;
use image::RgbaImage;
use xcap::Monitor;

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{ImageEncoding, ScreenshotOutput};

const JPEG_QUALITY: u8 = 75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayInfo {
    pub logical_width: u32,
    pub logical_height: u32,
    pub scale_factor: f64,
}

impl DisplayInfo {
    pub fn physical_size(&self) -> (u32, u32) {
        (
            (self.logical_width as f64 * self.scale_factor).round() as u32,
            (self.logical_height as f64 * self.scale_factor).round() as u32,
        )
    }
}

/// Captures the primary monitor and returns a JPEG at physical resolution.
pub async fn capture_primary() -> PilotResult<ScreenshotOutput> {
    tokio::task::spawn_blocking(capture_primary_blocking)
        .await
        .map_err(|e| PilotError::Capture(format!("capture thread failed: {e}")))?
}

fn capture_primary_blocking() -> PilotResult<ScreenshotOutput> {
    let monitors = Monitor::all().map_err(|e| PilotError::Capture(format!("list monitors: {e}")))?;
    let monitor = monitors
        .iter()
        .find(|m| m.is_primary())
        .or_else(|| monitors.first())
        .ok_or_else(|| PilotError::Capture("no display found".into()))?;

    let info = DisplayInfo {
        logical_width: monitor.width(),
        logical_height: monitor.height(),
        scale_factor: monitor.scale_factor() as f64,
    };
    let captured = monitor
        .capture_image()
        .map_err(|e| PilotError::Capture(format!("capture failed: {e}")))?;
    let (cw, ch) = (captured.width(), captured.height());
    let raw = RgbaImage::from_raw(cw, ch, captured.into_raw())
        .ok_or_else(|| PilotError::Capture(format!("capture buffer does not match {cw}x{ch}")))?;

    tracing::debug!(
        logical = %format!("{}x{}", info.logical_width, info.logical_height),
        captured = %format!("{}x{}", raw.width(), raw.height()),
        scale = info.scale_factor,
        "primary display captured"
    );

    let frame = to_physical(raw, &info);
    let image_bytes = encode_jpeg(frame)?;
    Ok(ScreenshotOutput {
        image_bytes,
        encoding: ImageEncoding::Jpeg,
        scale_factor: info.scale_factor,
    })
}

/// Upscales a capture taken at logical size to the display's physical size.
/// Captures that already came back at another size are left untouched.
pub fn to_physical(raw: RgbaImage, display: &DisplayInfo) -> RgbaImage {
    let at_logical = raw.width() == display.logical_width && raw.height() == display.logical_height;
    let (pw, ph) = display.physical_size();
    if at_logical && (pw, ph) != raw.dimensions() && pw > 0 && ph > 0 {
        image::imageops::resize(&raw, pw, ph, FilterType::Triangle)
    } else {
        raw
    }
}

pub fn encode_jpeg(frame: RgbaImage) -> PilotResult<Vec<u8>> {
    let rgb = image::DynamicImage::ImageRgba8(frame).to_rgb8();
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(out)
}
