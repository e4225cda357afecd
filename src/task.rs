use crate::config::{DeviceKind, TaskConfig};
use crate::depth::DepthImages;
use crate::error::{Error, Result};
use crate::model::{LoadedModel, ModelId, ModelLoader};
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Unconfigured,
    ModelLoading,
    Ready,
    Inferring,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Unconfigured => "unconfigured",
            TaskState::ModelLoading => "model_loading",
            TaskState::Ready => "ready",
            TaskState::Inferring => "inferring",
        };
        f.write_str(name)
    }
}

/// Descriptive metadata for the depth estimation algorithm.
#[derive(Debug, Serialize)]
pub struct AlgorithmInfo {
    pub name: &'static str,
    pub short_description: &'static str,
    pub authors: &'static str,
    pub article: &'static str,
    pub journal: &'static str,
    pub year: u16,
    pub license: &'static str,
    pub version: &'static str,
    pub documentation_link: &'static str,
    pub repository: &'static str,
    pub original_repository: &'static str,
    pub keywords: &'static str,
}

pub const ALGORITHM_INFO: AlgorithmInfo = AlgorithmInfo {
    name: "infer_depth_anything_v2",
    short_description: "Depth Anything V2 is a highly practical solution for robust monocular depth estimation",
    authors: "Lihe Yang, Bingyi Kang, Zilong Huang, Zhen Zhao, Xiaogang Xu, Jiashi Feng, Hengshuang Zhao",
    article: "Depth Anything V2",
    journal: "arXiv:2406.09414",
    year: 2024,
    license: "Apache License 2.0",
    version: "1.1.1",
    documentation_link: "https://arxiv.org/abs/2406.09414",
    repository: "https://github.com/Ikomia-hub/infer_depth_anything_v2",
    original_repository: "https://github.com/LiheYoung/Depth-Anything",
    keywords: "Depth Estimation, HuggingFace, map",
};

/// Point-in-time view of a task, readable without touching the task itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub active_model: Option<ModelId>,
    pub active_device: Option<DeviceKind>,
    pub config: TaskConfig,
    pub reload_pending: bool,
}

/// Owns the loaded model and the configuration it should run with.
///
/// A configuration change that touches the model or device only marks a
/// reload as pending; the previously loaded model stays active until the next
/// [`DepthTask::run`] or an explicit [`DepthTask::reload`].
pub struct DepthTask {
    loader: ModelLoader,
    config: TaskConfig,
    model: Option<LoadedModel>,
    reload_pending: bool,
    state: TaskState,
    status: watch::Sender<TaskStatus>,
}

impl DepthTask {
    pub fn new(loader: ModelLoader, config: TaskConfig) -> Self {
        let status = TaskStatus {
            state: TaskState::Unconfigured,
            active_model: None,
            active_device: None,
            config,
            reload_pending: true,
        };

        Self {
            loader,
            config,
            model: None,
            reload_pending: status.reload_pending,
            state: status.state,
            status: watch::channel(status).0,
        }
    }

    /// Follows every state, model and configuration change of this task.
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            state: self.state,
            active_model: self.active_model(),
            active_device: self.model.as_ref().map(LoadedModel::device),
            config: self.config,
            reload_pending: self.reload_pending,
        }
    }

    pub fn loader(&self) -> &ModelLoader {
        &self.loader
    }

    pub fn config(&self) -> TaskConfig {
        self.config
    }

    pub fn reload_pending(&self) -> bool {
        self.reload_pending
    }

    pub fn active_model(&self) -> Option<ModelId> {
        self.model.as_ref().map(LoadedModel::id)
    }

    /// Loads the configured model up front so the first `run` does not pay for it.
    pub fn init(&mut self) -> Result<()> {
        if self.model.is_none() || self.reload_pending {
            self.reload()?;
        }
        Ok(())
    }

    pub fn set_config(&mut self, config: TaskConfig) -> Result<()> {
        let config = config.validated()?;
        if self.config.requires_reload(&config) {
            tracing::info!(
                "Configuration changed to {} on {}, reload pending",
                config.model,
                config.device
            );
            self.reload_pending = true;
        }
        self.config = config;
        self.publish();
        Ok(())
    }

    pub fn request_reload(&mut self) {
        self.reload_pending = true;
        self.publish();
    }

    pub fn reload(&mut self) -> Result<()> {
        let previous = self.state;
        self.transition(TaskState::ModelLoading);

        match self.loader.load_model(self.config.model.as_str(), self.config.device) {
            Ok(model) => {
                self.model = Some(model);
                self.reload_pending = false;
                self.transition(TaskState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}", self.config.model, e);
                let fallback = if self.model.is_some() { previous } else { TaskState::Unconfigured };
                self.transition(fallback);
                Err(e)
            }
        }
    }

    /// Depth presentations for one image. Nothing is produced on failure.
    pub fn run(&mut self, image: &DynamicImage) -> Result<DepthImages> {
        if self.model.is_none() || self.reload_pending {
            self.reload()?;
        }

        if self.model.is_none() {
            return Err(Error::InferenceError("No model loaded".to_string()));
        }

        self.transition(TaskState::Inferring);
        let result = match &self.model {
            Some(model) => model.infer(image, self.config.input_size),
            None => Err(Error::InferenceError("No model loaded".to_string())),
        };
        self.transition(TaskState::Ready);

        Ok(result?.colorize())
    }

    fn transition(&mut self, next: TaskState) {
        if self.state != next {
            tracing::debug!("Task state: {} -> {}", self.state, next);
            self.state = next;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(self.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceKind;
    use crate::depth::FLAT_FALLBACK;
    use crate::testing::{self, FailingTransport, RecordingTransport, SyntheticDepth, SyntheticFactory};

    fn vits_config() -> TaskConfig {
        TaskConfig::new(ModelId::Vits, 518, DeviceKind::Cpu).unwrap()
    }

    #[test]
    fn algorithm_info_names_both_repositories() {
        let info = serde_json::to_value(&ALGORITHM_INFO).unwrap();
        assert_eq!(info["name"], "infer_depth_anything_v2");
        assert_eq!(info["version"], "1.1.1");
        assert_eq!(info["repository"], "https://github.com/Ikomia-hub/infer_depth_anything_v2");
        assert_eq!(info["original_repository"], "https://github.com/LiheYoung/Depth-Anything");
    }

    #[test]
    fn starts_unconfigured_and_loads_on_init() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        let loader = testing::loader(
            dir.path(),
            RecordingTransport::new(Vec::new()),
            SyntheticFactory::new(SyntheticDepth::Constant(1.0)),
        );
        let mut task = DepthTask::new(loader, vits_config());

        assert_eq!(task.status().state, TaskState::Unconfigured);
        assert_eq!(task.active_model(), None);

        task.init().unwrap();

        assert_eq!(task.status().state, TaskState::Ready);
        assert_eq!(task.active_model(), Some(ModelId::Vits));
        assert!(!task.reload_pending());
    }

    #[test]
    fn model_switch_waits_for_reload() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        testing::place_weights(dir.path(), ModelId::Vitb);
        let factory = SyntheticFactory::new(SyntheticDepth::Ramp { from: 0.0, to: 1.0 });
        let builds = factory.builds();
        let loader = testing::loader(dir.path(), RecordingTransport::new(Vec::new()), factory);
        let mut task = DepthTask::new(loader, vits_config());
        task.init().unwrap();

        task.set_config(task.config().with_model(ModelId::Vitb)).unwrap();

        assert_eq!(task.active_model(), Some(ModelId::Vits));
        assert!(task.reload_pending());

        task.run(&testing::image(4, 4)).unwrap();

        assert_eq!(task.active_model(), Some(ModelId::Vitb));
        assert_eq!(*builds.lock().unwrap(), vec![ModelId::Vits, ModelId::Vitb]);
    }

    #[test]
    fn input_size_change_keeps_model() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        let factory = SyntheticFactory::new(SyntheticDepth::Ramp { from: 0.0, to: 1.0 });
        let builds = factory.builds();
        let loader = testing::loader(dir.path(), RecordingTransport::new(Vec::new()), factory);
        let mut task = DepthTask::new(loader, vits_config());
        task.init().unwrap();

        task.set_config(task.config().with_input_size(700).unwrap()).unwrap();
        task.run(&testing::image(4, 4)).unwrap();

        assert!(!task.reload_pending());
        assert_eq!(builds.lock().unwrap().len(), 1);
    }

    #[test]
    fn explicit_reload_request_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        let factory = SyntheticFactory::new(SyntheticDepth::Constant(3.0));
        let builds = factory.builds();
        let loader = testing::loader(dir.path(), RecordingTransport::new(Vec::new()), factory);
        let mut task = DepthTask::new(loader, vits_config());
        task.init().unwrap();

        task.request_reload();
        task.run(&testing::image(2, 2)).unwrap();

        assert_eq!(builds.lock().unwrap().len(), 2);
    }

    #[test]
    fn run_produces_both_presentations() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        let loader = testing::loader(
            dir.path(),
            RecordingTransport::new(Vec::new()),
            SyntheticFactory::new(SyntheticDepth::Ramp { from: 10.0, to: 110.0 }),
        );
        let mut task = DepthTask::new(loader, vits_config());

        let images = task.run(&testing::image(5, 2)).unwrap();

        assert_eq!(task.status().state, TaskState::Ready);
        assert_eq!(images.grayscale.dimensions(), (5, 2));
        assert_eq!(images.inferno.dimensions(), (5, 2));
        let row: Vec<u8> = (0..5).map(|x| images.grayscale.get_pixel(x, 1)[0]).collect();
        assert_eq!(row, vec![0, 63, 127, 191, 255]);
    }

    #[test]
    fn flat_output_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        let loader = testing::loader(
            dir.path(),
            RecordingTransport::new(Vec::new()),
            SyntheticFactory::new(SyntheticDepth::Constant(7.0)),
        );
        let mut task = DepthTask::new(loader, vits_config());

        let images = task.run(&testing::image(3, 3)).unwrap();

        assert!(images.grayscale.pixels().all(|p| p[0] == FLAT_FALLBACK));
    }

    #[test]
    fn failed_load_produces_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let loader = testing::loader(
            dir.path(),
            FailingTransport::after(b"partial".to_vec()),
            SyntheticFactory::new(SyntheticDepth::Constant(1.0)),
        );
        let mut task = DepthTask::new(loader, vits_config());

        let err = task.run(&testing::image(2, 2)).unwrap_err();

        assert!(matches!(err, Error::DownloadFailed(_)));
        assert_eq!(task.status().state, TaskState::Unconfigured);
        assert!(task.reload_pending());
        assert!(!dir.path().join("depth_anything_v2_vits.pth").exists());
    }

    #[test]
    fn subscribers_see_every_change() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        let loader = testing::loader(
            dir.path(),
            RecordingTransport::new(Vec::new()),
            SyntheticFactory::new(SyntheticDepth::Constant(1.0)),
        );
        let mut task = DepthTask::new(loader, vits_config());
        let status = task.subscribe();

        assert_eq!(status.borrow().state, TaskState::Unconfigured);

        task.init().unwrap();
        assert_eq!(status.borrow().state, TaskState::Ready);
        assert_eq!(status.borrow().active_model, Some(ModelId::Vits));
        assert_eq!(status.borrow().active_device, Some(DeviceKind::Cpu));

        task.set_config(task.config().with_model(ModelId::Vitb)).unwrap();
        assert_eq!(status.borrow().config.model, ModelId::Vitb);
        assert!(status.borrow().reload_pending);
        assert_eq!(*status.borrow(), task.status());
    }

    #[test]
    fn failed_switch_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        testing::place_weights(dir.path(), ModelId::Vits);
        let loader = testing::loader(
            dir.path(),
            FailingTransport::after(Vec::new()),
            SyntheticFactory::new(SyntheticDepth::Constant(1.0)),
        );
        let mut task = DepthTask::new(loader, vits_config());
        task.init().unwrap();

        task.set_config(task.config().with_model(ModelId::Vitg)).unwrap();
        let err = task.run(&testing::image(2, 2)).unwrap_err();

        assert!(matches!(err, Error::UnsupportedModel(_)));
        assert_eq!(task.active_model(), Some(ModelId::Vits));
        assert_eq!(task.status().state, TaskState::Ready);
        assert!(task.reload_pending());
    }
}
