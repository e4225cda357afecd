use crate::config::{DeviceKind, TaskConfig};
use crate::depth::DepthImages;
use crate::error::{Error, Result};
use crate::model::{Encoder, ModelId, ModelRegistry};
use crate::task::{DepthTask, TaskStatus};
use axum::{
	body::Bytes,
	extract::{
		rejection::{JsonRejection, QueryRejection},
		DefaultBodyLimit, Query, State,
	},
	http::{header, StatusCode},
	response::{IntoResponse, Response},
	routing::{get, post, put},
	Json, Router,
};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const MAX_IMAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
	task: Arc<Mutex<DepthTask>>,
	status: watch::Receiver<TaskStatus>,
	registry: Arc<ModelRegistry>,
	weights_dir: PathBuf,
}

impl AppState {
	pub fn new(task: DepthTask) -> Self {
		Self {
			status: task.subscribe(),
			registry: Arc::clone(task.loader().registry()),
			weights_dir: task.loader().weights_dir().to_path_buf(),
			task: Arc::new(Mutex::new(task)),
		}
	}

	/// Runs blocking task work (loading, inference) off the async workers.
	async fn with_task<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&mut DepthTask) -> Result<T> + Send + 'static,
		T: Send + 'static,
	{
		let task = Arc::clone(&self.task);
		tokio::task::spawn_blocking(move || {
			let mut task = task.blocking_lock();
			f(&mut task)
		})
		.await
		.map_err(|e| Error::InferenceError(format!("Depth worker failed: {}", e)))?
	}
}

#[derive(Serialize)]
pub struct HealthResponse {
	pub status: String,
	#[serde(flatten)]
	pub task: TaskStatus,
}

#[derive(Serialize)]
pub struct ModelEntry {
	pub id: ModelId,
	pub encoder: Encoder,
	pub features: usize,
	pub out_channels: [usize; 4],
	pub downloadable: bool,
	pub downloaded: bool,
}

/// Partial update: absent fields keep their current value.
///
/// Model and device arrive as strings so unknown names surface as
/// `UnknownModel`/`InvalidInput` rather than a body rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigUpdate {
	pub model: Option<String>,
	pub input_size: Option<u32>,
	pub device: Option<String>,
}

impl ConfigUpdate {
	fn apply(&self, current: TaskConfig) -> Result<TaskConfig> {
		let mut config = current;
		if let Some(model) = &self.model {
			config = config.with_model(model.parse::<ModelId>()?);
		}
		if let Some(device) = &self.device {
			config = config.with_device(device.parse::<DeviceKind>()?);
		}
		if let Some(input_size) = self.input_size {
			config = config.with_input_size(input_size)?;
		}
		Ok(config)
	}
}

#[derive(Serialize)]
pub struct ConfigResponse {
	pub config: TaskConfig,
	pub reload_pending: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presentation {
	#[default]
	Inferno,
	Grayscale,
}

#[derive(Deserialize)]
pub struct DepthQuery {
	#[serde(default)]
	pub output: Presentation,
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = match self {
			Error::UnknownModel(_) => StatusCode::NOT_FOUND,
			Error::InvalidInput(_) | Error::Image(_) => StatusCode::BAD_REQUEST,
			Error::UnsupportedModel(_) => StatusCode::UNPROCESSABLE_ENTITY,
			Error::DownloadFailed(_) => StatusCode::BAD_GATEWAY,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		};

		let body = Json(serde_json::json!({
			"error": self.to_string(),
			"retryable": self.is_retryable(),
		}));

		(status, body).into_response()
	}
}

fn health(task: TaskStatus) -> HealthResponse {
	HealthResponse {
		status: "ok".to_string(),
		task,
	}
}

/// Served from the published status, so it answers while a load or
/// inference holds the task.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
	let status = *state.status.borrow();
	Json(health(status))
}

async fn models_handler(State(state): State<AppState>) -> Json<Vec<ModelEntry>> {
	let models = state
		.registry
		.list_models()
		.into_iter()
		.map(|config| ModelEntry {
			id: config.id,
			encoder: config.encoder,
			features: config.features,
			out_channels: config.out_channels,
			downloadable: config.url.is_some(),
			downloaded: ModelRegistry::weights_path(&state.weights_dir, config.id).is_file(),
		})
		.collect();

	Json(models)
}

async fn config_handler(
	State(state): State<AppState>,
	payload: std::result::Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<ConfigResponse>> {
	let Json(update) = payload.map_err(|e| Error::InvalidInput(e.body_text()))?;

	let mut task = state.task.lock().await;
	let config = update.apply(task.config())?;
	task.set_config(config)?;

	Ok(Json(ConfigResponse {
		config: task.config(),
		reload_pending: task.reload_pending(),
	}))
}

async fn reload_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
	state
		.with_task(|task| {
			task.request_reload();
			task.reload()?;
			Ok(health(task.status()))
		})
		.await
		.map(Json)
}

async fn depth_handler(
	State(state): State<AppState>,
	query: std::result::Result<Query<DepthQuery>, QueryRejection>,
	body: Bytes,
) -> Result<Response> {
	let Query(query) = query.map_err(|e| Error::InvalidInput(e.body_text()))?;
	if body.is_empty() {
		return Err(Error::InvalidInput("Request body must contain an image".to_string()));
	}

	let png = state
		.with_task(move |task| {
			let image = image::load_from_memory(&body)?;
			let images = task.run(&image)?;
			encode_png(images, query.output)
		})
		.await?;

	Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

fn encode_png(images: DepthImages, presentation: Presentation) -> Result<Vec<u8>> {
	let image = match presentation {
		Presentation::Inferno => DynamicImage::ImageRgb8(images.inferno),
		Presentation::Grayscale => DynamicImage::ImageLuma8(images.grayscale),
	};

	let mut buffer = Vec::new();
	image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
	Ok(buffer)
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/api/health", get(health_handler))
		.route("/api/models", get(models_handler))
		.route("/api/config", put(config_handler))
		.route("/api/reload", post(reload_handler))
		.route("/api/depth", post(depth_handler))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive())
				.layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
		)
		.with_state(state)
}

pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
	let app = create_router(state);
	let addr = format!("{}:{}", host, port);

	tracing::info!("Starting server on {}", addr);

	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

	axum::serve(listener, app)
		.await
		.map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

	Ok(())
}
