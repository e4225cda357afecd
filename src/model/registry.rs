use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    Vits,
    Vitb,
    Vitl,
    Vitg,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [ModelId::Vits, ModelId::Vitb, ModelId::Vitl, ModelId::Vitg];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Vits => "vits",
            ModelId::Vitb => "vitb",
            ModelId::Vitl => "vitl",
            ModelId::Vitg => "vitg",
        }
    }

    pub fn weights_file_name(&self) -> String {
        format!("depth_anything_v2_{}.pth", self.as_str())
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ModelId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::UnknownModel(s.to_string()))
    }
}

/// ViT backbone size. Fixes the DINOv2 geometry the depth head sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoder {
    Vits,
    Vitb,
    Vitl,
    Vitg,
}

impl Encoder {
    pub fn depth(&self) -> usize {
        match self {
            Encoder::Vits | Encoder::Vitb => 12,
            Encoder::Vitl => 24,
            Encoder::Vitg => 40,
        }
    }

    pub fn embed_dim(&self) -> usize {
        match self {
            Encoder::Vits => 384,
            Encoder::Vitb => 768,
            Encoder::Vitl => 1024,
            Encoder::Vitg => 1536,
        }
    }

    pub fn num_heads(&self) -> usize {
        match self {
            Encoder::Vits => 6,
            Encoder::Vitb => 12,
            Encoder::Vitl => 16,
            Encoder::Vitg => 24,
        }
    }

    /// Backbone blocks whose outputs feed the depth head.
    pub fn intermediate_layers(&self) -> Vec<usize> {
        match self {
            Encoder::Vits | Encoder::Vitb => vec![2, 5, 8, 11],
            Encoder::Vitl => vec![4, 11, 17, 23],
            Encoder::Vitg => vec![9, 19, 29, 39],
        }
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Encoder::Vits => "vits",
            Encoder::Vitb => "vitb",
            Encoder::Vitl => "vitl",
            Encoder::Vitg => "vitg",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: ModelId,
    pub encoder: Encoder,
    pub features: usize,
    pub out_channels: [usize; 4],
    pub url: Option<String>,
}

/// Fixed table of supported models. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<ModelId, ModelConfig>,
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        Self::from_entries(vec![
            ModelConfig {
                id: ModelId::Vits,
                encoder: Encoder::Vits,
                features: 64,
                out_channels: [48, 96, 192, 384],
                url: Some(
                    "https://huggingface.co/depth-anything/Depth-Anything-V2-Small/resolve/main/depth_anything_v2_vits.pth?download=true"
                        .to_string(),
                ),
            },
            ModelConfig {
                id: ModelId::Vitb,
                encoder: Encoder::Vitb,
                features: 128,
                out_channels: [96, 192, 384, 768],
                url: Some(
                    "https://huggingface.co/depth-anything/Depth-Anything-V2-Base/resolve/main/depth_anything_v2_vitb.pth?download=true"
                        .to_string(),
                ),
            },
            ModelConfig {
                id: ModelId::Vitl,
                encoder: Encoder::Vitl,
                features: 256,
                out_channels: [256, 512, 1024, 1024],
                url: Some(
                    "https://huggingface.co/depth-anything/Depth-Anything-V2-Large/resolve/main/depth_anything_v2_vitl.pth?download=true"
                        .to_string(),
                ),
            },
            // Giant weights are not publicly hosted.
            ModelConfig {
                id: ModelId::Vitg,
                encoder: Encoder::Vitg,
                features: 384,
                out_channels: [1536, 1536, 1536, 1536],
                url: None,
            },
        ])
    }

    pub fn from_entries(entries: Vec<ModelConfig>) -> Self {
        let models = entries.into_iter().map(|config| (config.id, config)).collect();
        Self { models }
    }

    /// Returns a copy of this registry with the given download URLs replaced.
    pub fn with_urls<'a>(mut self, urls: impl IntoIterator<Item = (&'a ModelId, &'a String)>) -> Self {
        for (id, url) in urls {
            if let Some(config) = self.models.get_mut(id) {
                tracing::debug!("Using download URL override for {}: {}", id, url);
                config.url = Some(url.clone());
            }
        }
        self
    }

    pub fn resolve_config(&self, model_id: &str) -> Result<&ModelConfig> {
        let id = model_id.parse::<ModelId>()?;
        self.get(id)
    }

    pub fn get(&self, id: ModelId) -> Result<&ModelConfig> {
        self.models
            .get(&id)
            .ok_or_else(|| Error::UnknownModel(id.to_string()))
    }

    pub fn list_models(&self) -> Vec<&ModelConfig> {
        self.models.values().collect()
    }

    pub fn weights_path(weights_dir: &Path, id: ModelId) -> PathBuf {
        weights_dir.join(id.weights_file_name())
    }
}
