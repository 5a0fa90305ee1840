use crate::grid;
use crate::grid::cell::GridCell;
use crate::grid::tms::{GridError, TileMapServiceGrid};
use crate::model::attributes::AttributeRanges;
use crate::model::descriptor::{class_entries, CellDescriptor, ModelDescriptor};
use crate::model::options::Options;
use crate::node::PCNode;
use crate::reader::PointSource;
use log::info;
use rand::Rng;
use std::fs;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

pub const MODEL_VERSION: &str = "2.0";

pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ModelError {
	#[error("model io failure: {0}")]
	Io(#[from] io::Error),
	#[error(transparent)]
	Grid(#[from] GridError),
	#[error("unable to write descriptor: {0}")]
	Json(#[from] serde_json::Error),
}

/// Drives the two-phase pipeline: bucket every source into grid cells, then
/// build one cell tree at a time, aggregating discovered classes and
/// attribute ranges into the top-level model descriptor.
pub struct GeoPointCloudModel {
	name: String,
	grid: TileMapServiceGrid,
	parent_directory: PathBuf,
	options: Options,
	point_classes: Vec<u8>,
	cells: Vec<CellDescriptor>,
	attribute_ranges: AttributeRanges,
}

impl GeoPointCloudModel {
	pub fn new(
		name: String,
		grid: TileMapServiceGrid,
		parent_directory: PathBuf,
		options: Options,
	) -> GeoPointCloudModel {
		GeoPointCloudModel {
			name,
			grid,
			parent_directory,
			options,
			point_classes: Vec::new(),
			cells: Vec::new(),
			attribute_ranges: AttributeRanges::new(),
		}
	}

	pub fn model_directory(&self) -> PathBuf {
		self.parent_directory.join(&self.name)
	}

	/// Runs a full conversion over the given sources. A fresh run replaces a
	/// previous model of the same name. Sources that fail to load are
	/// skipped inside ingestion; the run still produces a consistent model
	/// over everything that loaded.
	pub fn store_sources(
		&mut self,
		sources: &[PathBuf],
		source: &dyn PointSource,
		source_epsg: u32,
		memory_budget_bytes: u64,
		included_attributes: &[String],
		rng: &mut impl Rng,
	) -> Result<(), ModelError> {
		let t0 = Instant::now();

		let model_path = self.model_directory();
		if model_path.exists() {
			fs::remove_dir_all(&model_path)?;
		}
		fs::create_dir_all(&model_path)?;

		let mut ranges = AttributeRanges::new();
		let tiles = self.grid.ingest(
			&model_path,
			sources,
			source,
			source_epsg,
			memory_budget_bytes,
			included_attributes,
			&mut ranges,
		)?;
		self.attribute_ranges.merge(ranges);

		let grid = self.grid;
		for cell in grid.cells(&model_path, tiles) {
			self.store_cell(&model_path, cell?, rng)?;
		}

		self.save_model_descriptor(&model_path)?;
		info!("model generated in {:.3} s", t0.elapsed().as_secs_f64());
		Ok(())
	}

	/// Builds and persists one cell's tree, then releases the cell and its
	/// transient accumulation before the next cell is loaded.
	fn store_cell(
		&mut self,
		model_path: &Path,
		cell: GridCell,
		rng: &mut impl Rng,
	) -> Result<(), ModelError> {
		let folder_name = grid::cell_folder_name(cell.index);
		let directory = grid::cell_directory(model_path, cell.index);
		fs::create_dir_all(&directory)?;

		info!(
			"{} points, {} classes",
			cell.n_points(),
			cell.classes().len()
		);
		for class in cell.classes() {
			if !self.point_classes.contains(&class) {
				self.point_classes.push(class);
			}
		}

		let root = PCNode::root(&cell);
		let tree = match root.save_tree(&self.options, &directory, rng)? {
			Some(tree) => tree,
			None => return Ok(()),
		};
		serde_json::to_writer_pretty(File::create(directory.join("cell.json"))?, &tree)?;

		self.cells.push(CellDescriptor {
			directory: folder_name,
			cell_index: [cell.index.0, cell.index.1],
			cell_extent_min: cell.cell_extent_min.to_array(),
			cell_extent_max: cell.cell_extent_max.to_array(),
			pc_bounds_min: cell.pc_bounds.min.to_array(),
			pc_bounds_max: cell.pc_bounds.max.to_array(),
		});

		grid::remove_accumulation(model_path, cell.index)?;
		Ok(())
	}

	fn save_model_descriptor(&self, model_path: &Path) -> Result<(), ModelError> {
		let descriptor = ModelDescriptor {
			model_name: self.name.clone(),
			model_version: MODEL_VERSION.to_string(),
			global_grid: self.grid.descriptor(),
			max_node_points: self.options.max_node_points,
			parent_sampling: self.options.parent_sampling,
			balanced_sampling: self.options.balanced_sampling,
			partitioning_method: self.options.partitioning,
			cells: self.cells.clone(),
			classes: class_entries(&self.point_classes),
			attributes: self.attribute_ranges.clone(),
		};
		serde_json::to_writer_pretty(
			File::create(model_path.join("pc_model.json"))?,
			&descriptor,
		)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::descriptor::NodeDescriptor;
	use crate::model::options::Partitioning;
	use crate::reader::FormatDispatchSource;
	use rand::rngs::StdRng;
	use rand::SeedableRng;
	use std::fmt::Write as _;

	fn intensity() -> Vec<String> {
		vec!["intensity".to_string()]
	}

	/// 10,000 points uniformly filling one level-0 tile: 9,000 of class 2 and
	/// 1,000 of class 5.
	fn write_scenario_csv(path: &Path) {
		let mut rng = StdRng::seed_from_u64(99);
		let mut csv = String::from("x,y,z,classification,intensity\n");
		for i in 0..10_000 {
			let class = if i < 9_000 { 2 } else { 5 };
			let x = rng.gen_range(0.0..1000.0);
			let y = rng.gen_range(0.0..1000.0);
			let z = rng.gen_range(0.0..100.0);
			writeln!(csv, "{},{},{},{},{}", x, y, z, class, i % 256).unwrap();
		}
		fs::write(path, csv).unwrap();
	}

	fn payload_total(node: &NodeDescriptor, dir: &Path) -> usize {
		if let Some(filename) = &node.filename {
			let matrix = crate::encoding::file_to_matrix(&dir.join(filename)).unwrap();
			assert_eq!(matrix.rows(), node.n_points);
			// x, y, z + intensity column
			assert_eq!(matrix.cols(), 4);
			for r in 0..matrix.rows() {
				let row = matrix.row(r);
				for v in &row[0..3] {
					assert!(*v >= -1.0 && *v <= 1.0);
				}
			}
		}
		node.n_points
			+ node
				.children
				.iter()
				.map(|c| payload_total(c, dir))
				.sum::<usize>()
	}

	#[test]
	fn test_end_to_end_single_tile_scenario() {
		let dir = tempfile::tempdir().unwrap();
		let source_path = dir.path().join("scenario.csv");
		write_scenario_csv(&source_path);

		let options = Options::new(1000, true, true, Partitioning::RegularOctree);
		let mut model = GeoPointCloudModel::new(
			"scenario".to_string(),
			TileMapServiceGrid::new(0),
			dir.path().to_path_buf(),
			options,
		);

		let mut rng = StdRng::seed_from_u64(3);
		model
			.store_sources(
				&[source_path],
				&FormatDispatchSource,
				crate::projection::SPHERICAL_MERCATOR_EPSG,
				DEFAULT_MEMORY_BUDGET_BYTES,
				&intensity(),
				&mut rng,
			)
			.unwrap();

		let model_path = model.model_directory();
		let descriptor: ModelDescriptor = serde_json::from_reader(
			File::open(model_path.join("pc_model.json")).unwrap(),
		)
		.unwrap();

		assert_eq!(descriptor.model_name, "scenario");
		assert_eq!(descriptor.model_version, MODEL_VERSION);
		assert_eq!(descriptor.global_grid.r#type, "TileMapServiceGG");
		assert_eq!(descriptor.cells.len(), 1);
		assert_eq!(descriptor.classes.len(), 2);
		assert!(descriptor.attributes.get("intensity").is_some());

		let cell_dir = model_path.join(&descriptor.cells[0].directory);
		let tree: NodeDescriptor =
			serde_json::from_reader(File::open(cell_dir.join("cell.json")).unwrap()).unwrap();

		// balanced, both classes hold >= 500: the root splits its budget
		// evenly; the equal sampled counts tie back to ascending class order
		assert_eq!(tree.n_points, 1000);
		assert_eq!(tree.n_subtree_points, 10_000);
		assert_eq!(tree.sorted_class_count.0, vec![(2, 500), (5, 500)]);

		// exact conservation across the whole tree
		assert_eq!(payload_total(&tree, &cell_dir), 10_000);

		// transient accumulation was reclaimed
		assert!(!grid::points_file_path(&model_path, (0, 0), 0).exists());
		assert!(!grid::attribute_columns_path(&model_path, (0, 0)).exists());
	}

	#[test]
	fn test_store_sources_replaces_previous_model() {
		let dir = tempfile::tempdir().unwrap();
		let source_path = dir.path().join("points.csv");
		fs::write(&source_path, "x,y,z,classification\n1.0,2.0,3.0,2\n").unwrap();

		let stale = dir.path().join("replaced").join("stale.txt");
		fs::create_dir_all(stale.parent().unwrap()).unwrap();
		fs::write(&stale, b"old run").unwrap();

		let mut model = GeoPointCloudModel::new(
			"replaced".to_string(),
			TileMapServiceGrid::new(0),
			dir.path().to_path_buf(),
			Options::default(),
		);
		let mut rng = StdRng::seed_from_u64(1);
		model
			.store_sources(
				&[source_path],
				&FormatDispatchSource,
				crate::projection::SPHERICAL_MERCATOR_EPSG,
				DEFAULT_MEMORY_BUDGET_BYTES,
				&[],
				&mut rng,
			)
			.unwrap();

		assert!(!stale.exists());
		assert!(model.model_directory().join("pc_model.json").exists());
	}

	#[test]
	fn test_classes_keep_first_seen_order() {
		let dir = tempfile::tempdir().unwrap();
		let source_path = dir.path().join("points.csv");
		fs::write(
			&source_path,
			"x,y,z,classification\n1.0,2.0,3.0,9\n2.0,3.0,4.0,2\n3.0,4.0,5.0,9\n",
		)
		.unwrap();

		let mut model = GeoPointCloudModel::new(
			"ordered".to_string(),
			TileMapServiceGrid::new(0),
			dir.path().to_path_buf(),
			Options::default(),
		);
		let mut rng = StdRng::seed_from_u64(1);
		model
			.store_sources(
				&[source_path],
				&FormatDispatchSource,
				crate::projection::SPHERICAL_MERCATOR_EPSG,
				DEFAULT_MEMORY_BUDGET_BYTES,
				&[],
				&mut rng,
			)
			.unwrap();

		let descriptor: ModelDescriptor = serde_json::from_reader(
			File::open(model.model_directory().join("pc_model.json")).unwrap(),
		)
		.unwrap();
		let classes: Vec<u8> = descriptor.classes.iter().map(|c| c.class).collect();
		assert_eq!(classes, vec![2, 9]);
	}
}
