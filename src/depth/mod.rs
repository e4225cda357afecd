pub mod colormap;

use crate::error::{Error, Result};
use image::{GrayImage, Luma, RgbImage};

/// Gray level written to every pixel when the depth map is flat.
pub const FLAT_FALLBACK: u8 = 128;

/// Raw single-channel depth output, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

/// The two presentations handed back to the host for one image.
#[derive(Debug, Clone)]
pub struct DepthImages {
    pub inferno: RgbImage,
    pub grayscale: GrayImage,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!(
                "Depth map must not be empty ({}x{})",
                width, height
            )));
        }
        if values.len() != width as usize * height as usize {
            return Err(Error::InvalidInput(format!(
                "Depth map of {}x{} needs {} values, got {}",
                width,
                height,
                width as usize * height as usize,
                values.len()
            )));
        }
        Ok(Self { width, height, values })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Minimum and maximum, ignoring NaN.
    pub fn range(&self) -> (f32, f32) {
        self.values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Bilinear resample to `width` x `height`, aligning corner pixels.
    pub fn resized(&self, width: u32, height: u32) -> Result<Self> {
        if (width, height) == (self.width, self.height) {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!(
                "Cannot resize depth map to {}x{}",
                width, height
            )));
        }

        let xs = sample_positions(self.width, width);
        let ys = sample_positions(self.height, height);
        let row = self.width as usize;

        let mut values = Vec::with_capacity(width as usize * height as usize);
        for &(y0, y1, fy) in &ys {
            for &(x0, x1, fx) in &xs {
                let top = lerp(self.values[y0 * row + x0], self.values[y0 * row + x1], fx);
                let bottom = lerp(self.values[y1 * row + x0], self.values[y1 * row + x1], fx);
                values.push(lerp(top, bottom, fy));
            }
        }

        Self::new(width, height, values)
    }

    /// Min-max scales to `0..=255`, truncating to 8 bits.
    ///
    /// Fails with [`Error::DegenerateDepthMap`] when the map is flat and the
    /// scale factor would divide by zero.
    pub fn normalize(&self) -> Result<GrayImage> {
        let (min, max) = self.range();
        let span = max - min;
        if !(span.is_finite() && span > 0.0) {
            return Err(Error::DegenerateDepthMap(min));
        }

        let pixels = self
            .values
            .iter()
            .map(|&v| ((v - min) / span * 255.0) as u8)
            .collect();

        GrayImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| Error::InferenceError("Grayscale buffer size mismatch".to_string()))
    }

    /// Grayscale and inferno presentations of this map. A flat map falls back
    /// to [`FLAT_FALLBACK`] everywhere instead of failing.
    pub fn colorize(&self) -> DepthImages {
        let grayscale = match self.normalize() {
            Ok(gray) => gray,
            Err(e) => {
                tracing::warn!("{}, using mid-gray fallback", e);
                GrayImage::from_pixel(self.width, self.height, Luma([FLAT_FALLBACK]))
            }
        };

        let inferno = colormap::apply_inferno(&grayscale);
        DepthImages { inferno, grayscale }
    }
}

/// For each output index: the two source indices it falls between and the weight of the second.
fn sample_positions(src: u32, dst: u32) -> Vec<(usize, usize, f32)> {
    let last = src as usize - 1;
    let scale = if dst > 1 {
        last as f32 / (dst - 1) as f32
    } else {
        0.0
    };

    (0..dst as usize)
        .map(|i| {
            let pos = i as f32 * scale;
            let lo = (pos.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            (lo, hi, pos - lo as f32)
        })
        .collect()
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
