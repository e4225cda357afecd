//! Fakes for the network and transport seams.

use crate::depth::DepthMap;
use crate::error::{Error, Result};
use crate::model::{ModelConfig, ModelDownloader, ModelId, ModelLoader, ModelRegistry, Transport};
use crate::network::{DepthNetwork, NetworkFactory};
use candle_core::Device;
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier, Mutex};

pub const CORRUPT_WEIGHTS: &[u8] = b"corrupt";

pub struct RecordingTransport {
    body: Vec<u8>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl Transport for RecordingTransport {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        self.calls.lock().unwrap().push(url.to_string());
        sink.write_all(&self.body)?;
        Ok(self.body.len() as u64)
    }
}

/// Writes `prefix` and then drops the connection.
pub struct FailingTransport {
    prefix: Vec<u8>,
}

impl FailingTransport {
    pub fn after(prefix: Vec<u8>) -> Self {
        Self { prefix }
    }
}

impl Transport for FailingTransport {
    fn fetch(&self, _url: &str, sink: &mut dyn Write) -> Result<u64> {
        sink.write_all(&self.prefix)?;
        Err(Error::DownloadFailed("connection reset mid-transfer".to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SyntheticDepth {
    Constant(f32),
    /// Linear along x, `from` at the left edge and `to` at the right.
    Ramp { from: f32, to: f32 },
}

struct SyntheticNetwork {
    depth: SyntheticDepth,
    gate: Option<Arc<Barrier>>,
}

impl DepthNetwork for SyntheticNetwork {
    fn infer(&self, image: &DynamicImage, _input_size: u32) -> Result<DepthMap> {
        if let Some(gate) = &self.gate {
            // Once to announce the pass has started, once more to be let go.
            gate.wait();
            gate.wait();
        }

        let (width, height) = (image.width(), image.height());
        match self.depth {
            SyntheticDepth::Constant(value) => Ok(flat_depth(width, height, value)),
            SyntheticDepth::Ramp { from, to } => {
                let step = if width > 1 { (to - from) / (width - 1) as f32 } else { 0.0 };
                let values = (0..height)
                    .flat_map(|_| (0..width).map(move |x| from + step * x as f32))
                    .collect();
                DepthMap::new(width, height, values)
            }
        }
    }
}

pub struct SyntheticFactory {
    depth: SyntheticDepth,
    builds: Arc<Mutex<Vec<ModelId>>>,
    gate: Option<Arc<Barrier>>,
}

impl SyntheticFactory {
    pub fn new(depth: SyntheticDepth) -> Self {
        Self {
            depth,
            builds: Arc::default(),
            gate: None,
        }
    }

    /// Networks built by this factory block in `infer` on a two-party barrier.
    pub fn gated(self, gate: Arc<Barrier>) -> Self {
        Self {
            gate: Some(gate),
            ..self
        }
    }

    pub fn builds(&self) -> Arc<Mutex<Vec<ModelId>>> {
        Arc::clone(&self.builds)
    }
}

impl NetworkFactory for SyntheticFactory {
    fn build(&self, config: &ModelConfig, weights: &Path, _device: &Device) -> Result<Box<dyn DepthNetwork>> {
        if std::fs::read(weights)? == CORRUPT_WEIGHTS {
            return Err(Error::WeightLoadError(format!("{:?} is not a checkpoint", weights)));
        }
        self.builds.lock().unwrap().push(config.id);
        Ok(Box::new(SyntheticNetwork {
            depth: self.depth,
            gate: self.gate.clone(),
        }))
    }
}

pub fn place_weights(dir: &Path, id: ModelId) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = ModelRegistry::weights_path(dir, id);
    std::fs::write(&path, b"weights").unwrap();
    path
}

pub fn loader(weights_dir: &Path, transport: impl Transport + 'static, factory: impl NetworkFactory + 'static) -> ModelLoader {
    let downloader = ModelDownloader::new(Arc::new(ModelRegistry::builtin()), Box::new(transport));
    ModelLoader::new(downloader, Box::new(factory), weights_dir.to_path_buf())
}

pub fn image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::new_rgb8(width, height)
}

pub fn flat_depth(width: u32, height: u32, value: f32) -> DepthMap {
    DepthMap::new(width, height, vec![value; width as usize * height as usize]).unwrap()
}
