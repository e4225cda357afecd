use crate::error::{Error, Result};
use crate::model::ModelId;
use candle_core::Device;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "depthy.toml";
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const MAX_INPUT_SIZE: u32 = 4096;

/// Process-wide settings: where things live on disk and how downloads behave.
#[derive(Debug, Clone)]
pub struct Config {
	pub data_dir: PathBuf,
	pub weights_dir: PathBuf,
	pub download_timeout: Duration,
	pub model_urls: HashMap<ModelId, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
	weights_dir: Option<PathBuf>,
	download_timeout_secs: Option<u64>,
	models: HashMap<String, ModelOverride>,
}

#[derive(Debug, Deserialize)]
struct ModelOverride {
	url: String,
}

impl Config {
	pub fn from_env() -> Result<Self> {
		let data_dir = match std::env::var("DEPTHY_DATA_DIR") {
			Ok(dir) => PathBuf::from(dir),
			Err(_) => ProjectDirs::from("", "", "depthy")
				.ok_or_else(|| Error::ConfigError("Could not determine data directory".to_string()))?
				.data_dir()
				.to_path_buf(),
		};

		let mut config = Self::from_data_dir(&data_dir)?;

		if let Ok(dir) = std::env::var("DEPTHY_WEIGHTS_DIR") {
			config.weights_dir = PathBuf::from(dir);
		}
		if let Ok(secs) = std::env::var("DEPTHY_DOWNLOAD_TIMEOUT_SECS") {
			let secs = secs.parse::<u64>().map_err(|_| {
				Error::ConfigError(format!("DEPTHY_DOWNLOAD_TIMEOUT_SECS is not a number: {}", secs))
			})?;
			config.download_timeout = Duration::from_secs(secs);
		}

		std::fs::create_dir_all(&config.weights_dir)?;
		Ok(config)
	}

	/// Builds the config rooted at `data_dir`, applying `depthy.toml` if present.
	pub fn from_data_dir(data_dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(data_dir)?;

		let config_path = data_dir.join(CONFIG_FILE_NAME);
		let file = if config_path.exists() {
			let content = std::fs::read_to_string(&config_path)?;
			toml::from_str::<FileConfig>(&content)?
		} else {
			FileConfig::default()
		};

		let mut model_urls = HashMap::new();
		for (name, entry) in file.models {
			let id = name
				.parse::<ModelId>()
				.map_err(|_| Error::ConfigError(format!("Unknown model in {}: {}", CONFIG_FILE_NAME, name)))?;
			model_urls.insert(id, entry.url);
		}

		let weights_dir = match file.weights_dir {
			Some(dir) if dir.is_relative() => data_dir.join(dir),
			Some(dir) => dir,
			None => data_dir.join("weights"),
		};

		tracing::debug!("Using data directory {:?}", data_dir);

		Ok(Self {
			data_dir: data_dir.to_path_buf(),
			weights_dir,
			download_timeout: Duration::from_secs(
				file.download_timeout_secs.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
			),
			model_urls,
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
	Cpu,
	Gpu,
}

impl DeviceKind {
	/// The accelerator when this build can use one, otherwise the CPU.
	pub fn preferred() -> Self {
		if candle_core::utils::cuda_is_available() {
			DeviceKind::Gpu
		} else {
			DeviceKind::Cpu
		}
	}

	/// The kind a resolved candle device actually runs on.
	pub fn of(device: &Device) -> Self {
		if device.is_cuda() {
			DeviceKind::Gpu
		} else {
			DeviceKind::Cpu
		}
	}

	pub fn to_device(self) -> Result<Device> {
		match self {
			DeviceKind::Cpu => Ok(Device::Cpu),
			DeviceKind::Gpu if candle_core::utils::cuda_is_available() => Device::new_cuda(0)
				.map_err(|e| Error::ConfigError(format!("Failed to initialize CUDA device: {}", e))),
			DeviceKind::Gpu => {
				tracing::warn!("No CUDA support in this build, falling back to CPU");
				Ok(Device::Cpu)
			}
		}
	}
}

impl fmt::Display for DeviceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeviceKind::Cpu => f.write_str("cpu"),
			DeviceKind::Gpu => f.write_str("gpu"),
		}
	}
}

impl FromStr for DeviceKind {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"cpu" => Ok(DeviceKind::Cpu),
			"gpu" | "cuda" | "cuda:0" => Ok(DeviceKind::Gpu),
			_ => Err(Error::InvalidInput(format!("Unknown device: {}", s))),
		}
	}
}

/// What the depth task should run. Never mutated in place: updates build a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
	pub model: ModelId,
	pub input_size: u32,
	pub device: DeviceKind,
}

impl TaskConfig {
	pub fn new(model: ModelId, input_size: u32, device: DeviceKind) -> Result<Self> {
		Self { model, input_size, device }.validated()
	}

	pub fn with_model(self, model: ModelId) -> Self {
		Self { model, ..self }
	}

	pub fn with_device(self, device: DeviceKind) -> Self {
		Self { device, ..self }
	}

	pub fn with_input_size(self, input_size: u32) -> Result<Self> {
		Self { input_size, ..self }.validated()
	}

	pub fn validated(self) -> Result<Self> {
		check_input_size(self.input_size)?;
		Ok(self)
	}

	/// True when moving from `self` to `other` needs the network rebuilt.
	pub fn requires_reload(&self, other: &TaskConfig) -> bool {
		self.model != other.model || self.device != other.device
	}
}

/// Network input sizes must lie in `1..=MAX_INPUT_SIZE`.
pub fn check_input_size(input_size: u32) -> Result<u32> {
	if input_size == 0 || input_size > MAX_INPUT_SIZE {
		return Err(Error::InvalidInput(format!(
			"input_size must be between 1 and {}, got {}",
			MAX_INPUT_SIZE, input_size
		)));
	}
	Ok(input_size)
}
