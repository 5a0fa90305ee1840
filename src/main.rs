mod csv_reader;
mod encoding;
mod grid;
mod model;
mod node;
mod pcd_reader;
mod projection;
mod reader;

use clap::Parser;
use grid::tms::TileMapServiceGrid;
use log::error;
use model::geopc::{GeoPointCloudModel, DEFAULT_MEMORY_BUDGET_BYTES};
use model::options::{Options, Partitioning};
use reader::FormatDispatchSource;
use std::path::PathBuf;
use std::process;

/// Creates a hierarchical model of the given name of a multi-file point
/// cloud, designed for efficient out-of-core processing and rendering.
#[derive(Parser)]
#[command(version, about)]
struct Args {
	/// Name of the generated model
	pc_model: String,

	/// Folder with source files inside
	#[arg(short, long)]
	directory: Option<PathBuf>,

	/// Paths to source files
	#[arg(short, long, num_args = 1..)]
	files: Vec<PathBuf>,

	/// Path to the output folder
	#[arg(short, long, default_value = ".")]
	out: PathBuf,

	/// EPSG reference system number of the input data
	#[arg(short, long, default_value_t = projection::SPHERICAL_MERCATOR_EPSG)]
	epsg: u32,

	/// Max points per node
	#[arg(short = 'n', long, default_value_t = 65000)]
	node_points: u32,

	/// Sample the point cloud in parent nodes
	#[arg(short, long)]
	sample: bool,

	/// Global grid level: the world square divides into 4^level tiles
	#[arg(short = 'g', long, default_value_t = 12)]
	grid_level: u32,

	/// Split nodes at the median of their longest axis into a binary tree,
	/// instead of a regular octree the size of a cell
	#[arg(short, long)]
	binary: bool,

	/// Do not sample parent nodes attending to class
	#[arg(short, long)]
	unbalanced_sampling: bool,

	/// Ingestion working-buffer limit in megabytes
	#[arg(short, long, default_value_t = DEFAULT_MEMORY_BUDGET_BYTES / (1024 * 1024))]
	memory_limit_mb: u64,

	/// Point attributes carried into node payloads
	#[arg(short, long, default_values_t = [String::from("intensity")])]
	attributes: Vec<String>,
}

fn main() {
	env_logger::init();
	let args = Args::parse();

	let mut sources = args.files.clone();
	if let Some(dir) = &args.directory {
		match reader::source_paths_from_directory(dir) {
			Ok(mut found) => sources.append(&mut found),
			Err(e) => {
				error!("unable to scan {}: {}", dir.display(), e);
				process::exit(1);
			}
		}
	}
	if sources.is_empty() {
		error!("no input sources found");
		process::exit(1);
	}

	let partitioning = if args.binary {
		Partitioning::LongestAxisBintree
	} else {
		Partitioning::RegularOctree
	};
	let options = Options::new(
		args.node_points,
		args.sample,
		!args.unbalanced_sampling,
		partitioning,
	);

	let mut model = GeoPointCloudModel::new(
		args.pc_model,
		TileMapServiceGrid::new(args.grid_level),
		args.out,
		options,
	);

	let mut rng = rand::thread_rng();
	if let Err(e) = model.store_sources(
		&sources,
		&FormatDispatchSource,
		args.epsg,
		args.memory_limit_mb * 1024 * 1024,
		&args.attributes,
		&mut rng,
	) {
		error!("model generation failed: {}", e);
		process::exit(1);
	}
}
