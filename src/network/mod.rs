pub mod dpt;

pub use dpt::CandleNetworkFactory;

use crate::depth::DepthMap;
use crate::error::Result;
use crate::model::ModelConfig;
use candle_core::Device;
use image::DynamicImage;
use std::path::Path;

/// A depth network ready for inference.
pub trait DepthNetwork: Send {
    /// One forward pass. Returns a map with the same width and height as `image`.
    fn infer(&self, image: &DynamicImage, input_size: u32) -> Result<DepthMap>;
}

/// Builds a network from hyperparameters and a weights file, bound to `device`.
pub trait NetworkFactory: Send + Sync {
    fn build(&self, config: &ModelConfig, weights: &Path, device: &Device) -> Result<Box<dyn DepthNetwork>>;
}
