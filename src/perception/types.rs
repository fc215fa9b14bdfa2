use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }
}

/// Raw result of an operator capture.
#[derive(Debug, Clone)]
pub struct ScreenshotOutput {
    pub image_bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    /// Physical pixels per logical point of the captured display.
    pub scale_factor: f64,
}

impl ScreenshotOutput {
    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.image_bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.encoding.mime(), self.base64())
    }

    /// Reads the pixel size from the image header without decoding the frame.
    pub fn context(&self) -> PilotResult<ScreenshotContext> {
        if self.image_bytes.is_empty() {
            return Err(PilotError::Capture("screenshot is empty".into()));
        }
        let (width, height) = image::ImageReader::new(std::io::Cursor::new(&self.image_bytes))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| PilotError::Capture(format!("unreadable screenshot: {e}")))?;
        if width == 0 || height == 0 {
            return Err(PilotError::Capture(format!("degenerate screenshot {width}x{height}")));
        }
        Ok(ScreenshotContext::new(width, height, self.scale_factor))
    }
}

/// Frame geometry of one round's screenshot. Consumed by the coordinate mapper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotContext {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f64,
}

impl ScreenshotContext {
    /// A non-positive or non-finite scale factor is treated as 1.
    pub fn new(width: u32, height: u32, scale_factor: f64) -> Self {
        let scale_factor = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        Self {
            width,
            height,
            scale_factor,
        }
    }
}
