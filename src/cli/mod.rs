use crate::config::{DeviceKind, DEFAULT_INPUT_SIZE};
use crate::model::ModelId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "depthy")]
#[command(version, about = "Monocular depth estimation with Depth Anything V2", long_about = None)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Download model weights if they are not present yet
	Pull {
		/// Model identifier (vits, vitb, vitl, vitg)
		model: String,
	},

	/// Estimate depth for one image and write the inferno and grayscale maps
	Run {
		/// Model identifier (vits, vitb, vitl, vitg)
		model: String,

		/// Input image
		#[arg(long)]
		image: PathBuf,

		/// Network input resolution
		#[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
		input_size: u32,

		/// Device to run on ("cpu" or "gpu"); defaults to the GPU when available
		#[arg(long, value_parser = parse_device)]
		device: Option<DeviceKind>,

		/// Directory for the output images (defaults to the image's directory)
		#[arg(long)]
		output_dir: Option<PathBuf>,
	},

	/// Start the HTTP API server
	Serve {
		/// Model to load at startup
		#[arg(long, value_parser = parse_model, default_value = "vits")]
		model: ModelId,

		/// Device to run on ("cpu" or "gpu"); defaults to the GPU when available
		#[arg(long, value_parser = parse_device)]
		device: Option<DeviceKind>,

		/// Network input resolution
		#[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
		input_size: u32,

		/// Port to listen on
		#[arg(long, default_value = "8080")]
		port: u16,

		/// Host to bind to
		#[arg(long, default_value = "0.0.0.0")]
		host: String,
	},

	/// List supported models and whether their weights are present
	List,

	/// Show algorithm metadata
	Info,
}

fn parse_device(s: &str) -> Result<DeviceKind, String> {
	s.parse().map_err(|e: crate::error::Error| e.to_string())
}

fn parse_model(s: &str) -> Result<ModelId, String> {
	s.parse().map_err(|e: crate::error::Error| e.to_string())
}
