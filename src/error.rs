use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Unknown model: {0}")]
	UnknownModel(String),

	#[error("Model '{0}' has no download URL; place its weights file manually")]
	UnsupportedModel(String),

	#[error("Download failed: {0}")]
	DownloadFailed(String),

	#[error("Failed to load weights: {0}")]
	WeightLoadError(String),

	#[error("Depth map is flat (every value is {0})")]
	DegenerateDepthMap(f32),

	#[error("Inference error: {0}")]
	InferenceError(String),

	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("Configuration error: {0}")]
	ConfigError(String),

	#[error("Image error: {0}")]
	Image(#[from] image::ImageError),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Serialization(String),
}

impl Error {
	/// Whether retrying the same call can succeed without changing inputs.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::DownloadFailed(_) | Error::Io(_))
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
