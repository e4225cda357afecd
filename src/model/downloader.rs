use crate::error::{Error, Result};
use crate::model::ModelRegistry;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Fetches a remote resource into a sink. Returns the number of bytes written.
pub trait Transport: Send + Sync {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("depthy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        tracing::debug!("GET {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadFailed(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::DownloadFailed(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        response
            .copy_to(sink)
            .map_err(|e| Error::DownloadFailed(format!("Failed to read response: {}", e)))
    }
}

pub struct ModelDownloader {
    registry: Arc<ModelRegistry>,
    transport: Box<dyn Transport>,
}

impl ModelDownloader {
    pub fn new(registry: Arc<ModelRegistry>, transport: Box<dyn Transport>) -> Self {
        Self { registry, transport }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Returns the local weights path for `model_id`, downloading it first if absent.
    ///
    /// An existing file is returned untouched without any network access. A
    /// download is written to a sibling `.part` file and renamed into place, so
    /// a failed transfer never leaves a file at the final path.
    pub fn ensure_weights(&self, model_id: &str, weights_dir: &Path) -> Result<PathBuf> {
        let config = self.registry.resolve_config(model_id)?;
        let path = ModelRegistry::weights_path(weights_dir, config.id);

        if path.is_file() {
            tracing::debug!("Weights for {} already present at {:?}", config.id, path);
            return Ok(path);
        }

        let url = config
            .url
            .as_deref()
            .ok_or_else(|| Error::UnsupportedModel(config.id.to_string()))?;

        fs::create_dir_all(weights_dir)?;

        let partial = path.with_extension("pth.part");
        tracing::info!("Downloading weights for {} from {}", config.id, url);

        let written = match self.download_to(url, &partial) {
            Ok(written) => written,
            Err(e) => {
                discard(&partial);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial, &path) {
            discard(&partial);
            return Err(Error::DownloadFailed(format!(
                "Failed moving download into {:?}: {}",
                path, e
            )));
        }

        tracing::info!("Downloaded {} bytes to {:?}", written, path);
        Ok(path)
    }

    fn download_to(&self, url: &str, partial: &Path) -> Result<u64> {
        let mut file = File::create(partial)
            .map_err(|e| Error::DownloadFailed(format!("Failed to create {:?}: {}", partial, e)))?;

        let written = self.transport.fetch(url, &mut file)?;

        file.sync_all()
            .map_err(|e| Error::DownloadFailed(format!("Failed to flush {:?}: {}", partial, e)))?;

        Ok(written)
    }
}

fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not remove partial download {:?}: {}", partial, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingTransport, RecordingTransport};

    fn downloader(transport: Box<dyn Transport>) -> ModelDownloader {
        ModelDownloader::new(Arc::new(ModelRegistry::builtin()), transport)
    }

    #[test]
    fn second_call_reuses_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let weights_dir = dir.path().join("weights");
        let transport = RecordingTransport::new(b"weights-bytes".to_vec());
        let calls = transport.calls();
        let downloader = downloader(Box::new(transport));

        let first = downloader.ensure_weights("vits", &weights_dir).unwrap();
        let second = downloader.ensure_weights("vits", &weights_dir).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, weights_dir.join("depth_anything_v2_vits.pth"));
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(fs::read(&first).unwrap(), b"weights-bytes");
    }

    #[test]
    fn requests_the_configured_url() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(vec![1, 2, 3]);
        let calls = transport.calls();
        let downloader = downloader(Box::new(transport));

        downloader.ensure_weights("vitb", dir.path()).unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls[0].contains("Depth-Anything-V2-Base"));
    }

    #[test]
    fn failed_transfer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = downloader(Box::new(FailingTransport::after(b"half a file".to_vec())));

        let err = downloader.ensure_weights("vits", dir.path()).unwrap_err();

        assert!(matches!(err, Error::DownloadFailed(_)));
        assert!(!dir.path().join("depth_anything_v2_vits.pth").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn retry_after_failure_downloads_again() {
        let dir = tempfile::tempdir().unwrap();
        let failing = downloader(Box::new(FailingTransport::after(Vec::new())));
        assert!(failing.ensure_weights("vits", dir.path()).is_err());

        let transport = RecordingTransport::new(b"ok".to_vec());
        let calls = transport.calls();
        let working = downloader(Box::new(transport));
        let path = working.ensure_weights("vits", dir.path()).unwrap();

        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(fs::read(path).unwrap(), b"ok");
    }

    #[test]
    fn model_without_url_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(Vec::new());
        let calls = transport.calls();
        let downloader = downloader(Box::new(transport));

        let err = downloader.ensure_weights("vitg", dir.path()).unwrap_err();

        assert!(matches!(err, Error::UnsupportedModel(name) if name == "vitg"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn pre_placed_file_needs_no_url() {
        let dir = tempfile::tempdir().unwrap();
        let placed = dir.path().join("depth_anything_v2_vitg.pth");
        fs::write(&placed, b"giant").unwrap();
        let downloader = downloader(Box::new(FailingTransport::after(Vec::new())));

        assert_eq!(downloader.ensure_weights("vitg", dir.path()).unwrap(), placed);
    }

    #[test]
    fn unknown_model_fails_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let weights_dir = dir.path().join("never-created");
        let downloader = downloader(Box::new(FailingTransport::after(Vec::new())));

        let err = downloader.ensure_weights("vitx", &weights_dir).unwrap_err();

        assert!(matches!(err, Error::UnknownModel(_)));
        assert!(!weights_dir.exists());
    }
}
