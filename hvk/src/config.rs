use thiserror::Error;

use crate::{device::DeviceConfig, log::VulkanLogLevel};

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.3, 0.6, 1.0];

/// Everything [`Renderer::new`](crate::renderer::Renderer::new) needs besides
/// the window.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub app_name: String,
    /// Enables the validation layer and debug messenger at this level.
    /// `None` enables neither.
    pub validation: Option<VulkanLogLevel>,
    /// RGBA, each channel in `[0, 1]`.
    pub clear_color: [f32; 4],
    pub device: DeviceConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "hvk".to_owned(),
            validation: None,
            clear_color: DEFAULT_CLEAR_COLOR,
            device: DeviceConfig::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseClearColorError {
    #[error("Expected 4 comma separated channels, got {0}")]
    WrongChannelCount(usize),
    #[error("Channel {index} ({text:?}) is not a number")]
    NotANumber { index: usize, text: String },
    #[error("Channel {index} is {value}, which is outside [0, 1]")]
    OutOfRange { index: usize, value: f32 },
}

/// Parse `"r,g,b,a"` into a clear colour. Whitespace around channels is
/// ignored.
pub fn parse_clear_color(s: &str) -> Result<[f32; 4], ParseClearColorError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(ParseClearColorError::WrongChannelCount(parts.len()));
    }

    let mut color = [0.0; 4];
    for (index, (slot, text)) in color.iter_mut().zip(&parts).enumerate() {
        let value: f32 = text.parse().map_err(|_| ParseClearColorError::NotANumber {
            index,
            text: (*text).to_owned(),
        })?;
        if !(0.0..=1.0).contains(&value) {
            return Err(ParseClearColorError::OutOfRange { index, value });
        }
        *slot = value;
    }
    Ok(color)
}
