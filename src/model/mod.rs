pub mod downloader;
pub mod loader;
pub mod registry;

pub use downloader::{HttpTransport, ModelDownloader, Transport};
pub use loader::{LoadedModel, ModelLoader};
pub use registry::{Encoder, ModelConfig, ModelId, ModelRegistry};
