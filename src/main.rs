mod cli;
mod config;
mod depth;
mod error;
mod model;
mod network;
mod server;
mod task;
#[cfg(test)]
mod testing;

use clap::Parser;
use cli::{Cli, Commands};
use config::{Config, DeviceKind, TaskConfig};
use model::{HttpTransport, ModelDownloader, ModelLoader, ModelRegistry};
use network::CandleNetworkFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use task::DepthTask;

fn build_loader(config: &Config) -> error::Result<ModelLoader> {
    let registry = Arc::new(ModelRegistry::builtin().with_urls(&config.model_urls));
    let transport = HttpTransport::new(config.download_timeout)?;
    let downloader = ModelDownloader::new(registry, Box::new(transport));

    Ok(ModelLoader::new(
        downloader,
        Box::new(CandleNetworkFactory),
        config.weights_dir.clone(),
    ))
}

fn output_paths(image: &Path, output_dir: Option<PathBuf>) -> (PathBuf, PathBuf) {
    let dir = output_dir.unwrap_or_else(|| {
        image
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    (
        dir.join(format!("{}_depth_inferno.png", stem)),
        dir.join(format!("{}_depth_gray.png", stem)),
    )
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Pull { model } => {
            let loader = build_loader(&config)?;
            let path = loader.ensure_weights(&model)?;

            println!("✓ Weights ready for model: {}", model);
            println!("  Path: {:?}", path);
        }

        Commands::Run {
            model,
            image,
            input_size,
            device,
            output_dir,
        } => {
            let device = device.unwrap_or_else(DeviceKind::preferred);
            let loader = build_loader(&config)?;
            let loaded = loader.load_model(&model, device)?;
            tracing::info!(
                "Using {} encoder with {} features, weights {:?}",
                loaded.config().encoder,
                loaded.config().features,
                loaded.weights()
            );

            let input = image::open(&image)?;
            tracing::info!("Estimating depth for {:?} ({}x{})", image, input.width(), input.height());

            let depth = loaded.infer(&input, input_size)?;
            let images = depth.colorize();

            let (inferno_path, gray_path) = output_paths(&image, output_dir);
            if let Some(dir) = inferno_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            images.inferno.save(&inferno_path)?;
            images.grayscale.save(&gray_path)?;

            println!("✓ Depth estimated with {} on {}", loaded.id(), loaded.device());
            println!("  Inferno: {:?}", inferno_path);
            println!("  Grayscale: {:?}", gray_path);
        }

        Commands::Serve {
            model,
            device,
            input_size,
            port,
            host,
        } => {
            let device = device.unwrap_or_else(DeviceKind::preferred);
            let task_config = TaskConfig::new(model, input_size, device)?;
            let mut task = DepthTask::new(build_loader(&config)?, task_config);
            task.init()?;

            let state = server::AppState::new(task);

            println!("🚀 Depthy server starting...");
            println!("   Model: {} on {}", model, device);
            println!("   Listening on: http://{}:{}", host, port);
            println!("   Health: http://{}:{}/api/health", host, port);
            println!("   Depth: http://{}:{}/api/depth", host, port);

            let runtime = tokio::runtime::Runtime::new()?;
            // The blocking HTTP client must be dropped outside the runtime, so
            // `state` outlives it here.
            runtime.block_on(server::serve(&host, port, state.clone()))?;
            drop(runtime);
            drop(state);
        }

        Commands::List => {
            let registry = ModelRegistry::builtin().with_urls(&config.model_urls);

            println!("Data directory: {:?}", config.data_dir);
            println!("Weights directory: {:?}\n", config.weights_dir);
            println!("Supported models:\n");
            for model in registry.list_models() {
                let weights = ModelRegistry::weights_path(&config.weights_dir, model.id);
                println!("  {}", model.id);
                println!("    Encoder: {}", model.encoder);
                println!("    Features: {}", model.features);
                println!("    Out channels: {:?}", model.out_channels);
                match &model.url {
                    Some(url) => println!("    URL: {}", url),
                    None => println!("    URL: none (place weights manually)"),
                }
                println!(
                    "    Weights: {}",
                    if weights.is_file() {
                        format!("{:?}", weights)
                    } else {
                        "not downloaded".to_string()
                    }
                );
                println!();
            }
        }

        Commands::Info => {
            println!("{}", serde_json::to_string_pretty(&task::ALGORITHM_INFO)?);
        }
    }

    Ok(())
}
