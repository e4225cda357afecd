//! Depth Anything V2 on candle: a DINOv2 backbone feeding a DPT depth head.

use crate::depth::DepthMap;
use crate::error::{Error, Result};
use crate::model::ModelConfig;
use crate::network::{DepthNetwork, NetworkFactory};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::depth_anything_v2::{DepthAnythingV2, DepthAnythingV2Config};
use candle_transformers::models::dinov2::DinoVisionTransformer;
use image::imageops::FilterType;
use image::DynamicImage;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const PATCH_SIZE: u32 = 14;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub struct CandleNetworkFactory;

impl NetworkFactory for CandleNetworkFactory {
    fn build(&self, config: &ModelConfig, weights: &Path, device: &Device) -> Result<Box<dyn DepthNetwork>> {
        tracing::info!("Loading {} weights from {:?}", config.encoder, weights);

        let tensors = read_checkpoint(weights, device)
            .map_err(|e| Error::WeightLoadError(format!("Failed to read {:?}: {}", weights, e)))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);

        let encoder = config.encoder;
        let backbone = DinoVisionTransformer::new(
            vb.pp("pretrained"),
            encoder.depth(),
            encoder.embed_dim(),
            encoder.num_heads(),
        )
        .map_err(|e| Error::WeightLoadError(format!("Backbone does not match {}: {}", encoder, e)))?;

        let network = DepthAnythingNetwork {
            config: config.clone(),
            backbone: Arc::new(backbone),
            vb,
            device: device.clone(),
        };

        // Assemble the head once so shape mismatches surface as load errors.
        network
            .head(side_for(crate::config::DEFAULT_INPUT_SIZE)?)
            .map_err(|e| Error::WeightLoadError(format!("Depth head does not match {}: {}", encoder, e)))?;

        tracing::info!("Model loaded successfully");
        tracing::info!("  Encoder: {}", encoder);
        tracing::info!("  Features: {}", config.features);
        tracing::info!("  Out channels: {:?}", config.out_channels);

        Ok(Box::new(network))
    }
}

/// Reads every tensor of a `.pth` state dict onto `device`.
fn read_checkpoint(weights: &Path, device: &Device) -> candle_core::Result<HashMap<String, Tensor>> {
    candle_core::pickle::read_all(weights)?
        .into_iter()
        .map(|(name, tensor)| Ok((name, tensor.to_dtype(DType::F32)?.to_device(device)?)))
        .collect()
}

struct DepthAnythingNetwork {
    config: ModelConfig,
    backbone: Arc<DinoVisionTransformer>,
    // In-memory tensors; the head is assembled from these per call because
    // its reshapes depend on the input side.
    vb: VarBuilder<'static>,
    device: Device,
}

impl DepthAnythingNetwork {
    fn head(&self, side: usize) -> candle_core::Result<DepthAnythingV2> {
        let encoder = self.config.encoder;
        let head_config = DepthAnythingV2Config::new(
            self.config.out_channels,
            encoder.embed_dim(),
            self.config.features,
            false,
            false,
            encoder.intermediate_layers(),
            side,
            side / PATCH_SIZE as usize,
        );

        DepthAnythingV2::new(Arc::clone(&self.backbone), head_config, self.vb.clone())
    }

    fn preprocess(&self, image: &DynamicImage, side: usize) -> candle_core::Result<Tensor> {
        let rgb = image
            .resize_exact(side as u32, side as u32, FilterType::CatmullRom)
            .to_rgb8();

        let mean = Tensor::new(&IMAGENET_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, &Device::Cpu)?.reshape((3, 1, 1))?;

        Tensor::from_vec(rgb.into_raw(), (side, side, 3), &Device::Cpu)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(1.0 / 255.0, 0.0)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?
            .unsqueeze(0)?
            .to_device(&self.device)
    }
}

impl DepthNetwork for DepthAnythingNetwork {
    fn infer(&self, image: &DynamicImage, input_size: u32) -> Result<DepthMap> {
        let side = side_for(input_size)?;
        let model = self
            .head(side)
            .map_err(|e| Error::InferenceError(format!("Failed to build depth head: {}", e)))?;

        let input = self
            .preprocess(image, side)
            .map_err(|e| Error::InferenceError(format!("Preprocessing failed: {}", e)))?;

        // Plain tensors carry no gradient tracking, so this is an inference-only pass.
        let output = model
            .forward(&input)
            .map_err(|e| Error::InferenceError(format!("Forward pass failed: {}", e)))?;

        let dims = output.dims().to_vec();
        if dims.len() < 2 {
            return Err(Error::InferenceError(format!("Unexpected output shape {:?}", dims)));
        }
        let (out_h, out_w) = (dims[dims.len() - 2], dims[dims.len() - 1]);

        let values = output
            .flatten_all()
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::InferenceError(format!("Failed to read depth output: {}", e)))?;

        tracing::debug!("Raw depth output {}x{}", out_w, out_h);

        DepthMap::new(out_w as u32, out_h as u32, values)?.resized(image.width(), image.height())
    }
}

/// Square network input side: `input_size` rounded up to a whole number of patches.
fn side_for(input_size: u32) -> Result<usize> {
    input_size
        .div_ceil(PATCH_SIZE)
        .max(1)
        .checked_mul(PATCH_SIZE)
        .map(|side| side as usize)
        .ok_or_else(|| Error::InvalidInput(format!("input_size {} is too large", input_size)))
}
