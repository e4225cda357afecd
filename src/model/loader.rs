use crate::config::{self, DeviceKind};
use crate::depth::DepthMap;
use crate::error::{Error, Result};
use crate::model::{ModelConfig, ModelDownloader, ModelId, ModelRegistry};
use crate::network::{DepthNetwork, NetworkFactory};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A network bound to one device and configuration. Read-only once built.
pub struct LoadedModel {
    config: ModelConfig,
    device: DeviceKind,
    weights: PathBuf,
    network: Box<dyn DepthNetwork>,
}

impl LoadedModel {
    pub fn id(&self) -> ModelId {
        self.config.id
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn weights(&self) -> &Path {
        &self.weights
    }

    /// Depth for `image`, same width and height as the image.
    pub fn infer(&self, image: &DynamicImage, input_size: u32) -> Result<DepthMap> {
        config::check_input_size(input_size)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::InvalidInput("Image is empty".to_string()));
        }

        tracing::debug!(
            "Running {} on {}x{} image (input size {})",
            self.config.id,
            image.width(),
            image.height(),
            input_size
        );

        let depth = self.network.infer(image, input_size)?;

        if (depth.width(), depth.height()) != (image.width(), image.height()) {
            return Err(Error::InferenceError(format!(
                "Network returned {}x{} depth for {}x{} image",
                depth.width(),
                depth.height(),
                image.width(),
                image.height()
            )));
        }

        Ok(depth)
    }
}

pub struct ModelLoader {
    downloader: ModelDownloader,
    factory: Box<dyn NetworkFactory>,
    weights_dir: PathBuf,
}

impl ModelLoader {
    pub fn new(downloader: ModelDownloader, factory: Box<dyn NetworkFactory>, weights_dir: PathBuf) -> Self {
        Self {
            downloader,
            factory,
            weights_dir,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.downloader.registry()
    }

    pub fn weights_dir(&self) -> &Path {
        &self.weights_dir
    }

    pub fn ensure_weights(&self, model_id: &str) -> Result<PathBuf> {
        self.downloader.ensure_weights(model_id, &self.weights_dir)
    }

    /// Resolves, fetches if needed, and builds the network on `device`.
    pub fn load_model(&self, model_id: &str, device: DeviceKind) -> Result<LoadedModel> {
        let config = self.registry().resolve_config(model_id)?.clone();
        let weights = self.ensure_weights(model_id)?;
        let candle_device = device.to_device()?;
        let device = DeviceKind::of(&candle_device);

        tracing::info!("Loading model '{}' on {}", config.id, device);
        let network = self.factory.build(&config, &weights, &candle_device)?;

        Ok(LoadedModel {
            config,
            device,
            weights,
            network,
        })
    }
}
