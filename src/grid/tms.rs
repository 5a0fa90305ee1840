use crate::encoding::{self, CodecError, Matrix};
use crate::grid::cell::GridCell;
use crate::grid::{self, TileIndex};
use crate::model::attributes::AttributeRanges;
use crate::model::descriptor::GridDescriptor;
use crate::model::vector3::Vector3;
use crate::projection;
use crate::reader::{PointSource, SourceBatch, SourceOutcome};
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Side length of the spherical-Mercator world square.
/// Reference: https://wiki.osgeo.org/wiki/Tile_Map_Service_Specification
pub const MAP_SIDE_LENGTH_METERS: f64 = 40075016.6784;

#[derive(Debug, Error)]
pub enum GridError {
	#[error("grid io failure: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Codec(#[from] CodecError),
	#[error("malformed cell sidecar: {0}")]
	Json(#[from] serde_json::Error),
	#[error("no accumulated points for cell {0:?}")]
	MissingAccumulation(TileIndex),
}

/// Fixed power-of-two tiling of the spherical-Mercator square. Mapping a
/// world (x, y) to its tile is pure and total; z never affects tiling.
#[derive(Debug, Clone, Copy)]
pub struct TileMapServiceGrid {
	pub level: u32,
	pub side_n_tiles: u64,
	pub tile_side_meters: f64,
}

impl TileMapServiceGrid {
	pub fn new(level: u32) -> TileMapServiceGrid {
		let side_n_tiles = 1u64 << level;
		TileMapServiceGrid {
			level,
			side_n_tiles,
			tile_side_meters: MAP_SIDE_LENGTH_METERS / side_n_tiles as f64,
		}
	}

	pub fn tile_of(&self, x: f64, y: f64) -> TileIndex {
		let half = MAP_SIDE_LENGTH_METERS / 2.0;
		(
			((x + half) / self.tile_side_meters).floor() as i64,
			((y + half) / self.tile_side_meters).floor() as i64,
		)
	}

	/// Exact inverse of `tile_of` up to the tile's upper-edge exclusivity.
	pub fn tile_bounds(&self, index: TileIndex) -> ([f64; 2], [f64; 2]) {
		let half = MAP_SIDE_LENGTH_METERS / 2.0;
		let min = [
			index.0 as f64 * self.tile_side_meters - half,
			index.1 as f64 * self.tile_side_meters - half,
		];
		let max = [min[0] + self.tile_side_meters, min[1] + self.tile_side_meters];
		(min, max)
	}

	pub fn descriptor(&self) -> GridDescriptor {
		GridDescriptor {
			r#type: "TileMapServiceGG".to_string(),
			level: self.level,
			side_n_tiles: self.side_n_tiles,
			tile_size_meters: self.tile_side_meters,
		}
	}

	/// Phase 1: pulls whole source files into a working batch until the batch
	/// would exceed `memory_budget_bytes`, then buckets the batch into
	/// per-tile accumulation files. A source that fails to load or reproject
	/// is skipped with a warning; the rest of the run is unaffected.
	pub fn ingest(
		&self,
		model_path: &Path,
		sources: &[PathBuf],
		source: &dyn PointSource,
		source_epsg: u32,
		memory_budget_bytes: u64,
		included_attributes: &[String],
		ranges: &mut AttributeRanges,
	) -> Result<Vec<TileIndex>, GridError> {
		let mut touched: BTreeSet<TileIndex> = BTreeSet::new();
		let mut next = 0;

		while next < sources.len() {
			let mut batch: Option<SourceBatch> = None;
			let mut batch_bytes = 0u64;

			while (batch.is_none() || batch_bytes < memory_budget_bytes) && next < sources.len() {
				let path = &sources[next];
				next += 1;
				info!("processing source {}", path.display());

				match load_source(source, path, source_epsg, included_attributes, ranges) {
					SourceOutcome::Loaded(loaded) => {
						batch_bytes += loaded.approx_bytes();
						match &mut batch {
							None => batch = Some(loaded),
							Some(acc) => acc.append(loaded),
						}
					}
					SourceOutcome::Failed { path, error } => {
						warn!("skipping source {}: {}", path.display(), error);
					}
				}
			}

			if let Some(batch) = batch {
				self.store_batch(model_path, &batch, &mut touched)?;
			}
		}

		info!("point disk storage completed, {} cells touched", touched.len());
		Ok(touched.into_iter().collect())
	}

	fn store_batch(
		&self,
		model_path: &Path,
		batch: &SourceBatch,
		touched: &mut BTreeSet<TileIndex>,
	) -> Result<(), GridError> {
		let mut by_tile: HashMap<TileIndex, Vec<usize>> = HashMap::new();
		for i in 0..batch.len() {
			by_tile
				.entry(self.tile_of(batch.xs[i], batch.ys[i]))
				.or_default()
				.push(i);
		}

		let n_cols = 4 + batch.attributes.len();
		for (tile, rows) in by_tile {
			fs::create_dir_all(grid::cell_directory(model_path, tile))?;

			let mut matrix = Matrix::with_cols(n_cols);
			let mut row = vec![0.0; n_cols];
			for &i in &rows {
				row[0] = batch.xs[i];
				row[1] = batch.ys[i];
				row[2] = batch.zs[i];
				row[3] = batch.classes[i] as f64;
				for (a, (_, values)) in batch.attributes.iter().enumerate() {
					row[4 + a] = values[i];
				}
				matrix.push_row(&row);
			}

			encoding::matrix_to_file_double(&matrix, &grid::next_points_file_path(model_path, tile))?;

			let columns: Vec<String> = batch.attributes.iter().map(|(n, _)| n.clone()).collect();
			serde_json::to_writer(
				File::create(grid::attribute_columns_path(model_path, tile))?,
				&columns,
			)?;

			touched.insert(tile);
		}

		Ok(())
	}

	/// Phase 2: reloads touched tiles one at a time. Each yielded cell owns
	/// its full point set; the previous cell is dropped before the next one
	/// is loaded, so the working set stays bounded by the largest single cell.
	pub fn cells<'a>(
		&self,
		model_path: &'a Path,
		tiles: Vec<TileIndex>,
	) -> impl Iterator<Item = Result<GridCell, GridError>> + 'a {
		let tms = *self;
		tiles
			.into_iter()
			.map(move |tile| tms.load_cell(model_path, tile))
	}

	fn load_cell(&self, model_path: &Path, tile: TileIndex) -> Result<GridCell, GridError> {
		let columns: Vec<String> =
			serde_json::from_reader(File::open(grid::attribute_columns_path(model_path, tile))?)?;

		let mut accumulated: Option<Matrix> = None;
		let mut n = 0;
		loop {
			let path = grid::points_file_path(model_path, tile, n);
			if !path.exists() {
				break;
			}
			let matrix = encoding::file_to_matrix_double(&path)?;
			match &mut accumulated {
				None => accumulated = Some(matrix),
				Some(acc) => acc.append_rows(&matrix)?,
			}
			n += 1;
		}

		let accumulated = accumulated.ok_or(GridError::MissingAccumulation(tile))?;
		if accumulated.cols() != 4 + columns.len() {
			return Err(CodecError::ColumnMismatch {
				expected: 4 + columns.len(),
				actual: accumulated.cols(),
			}
			.into());
		}

		info!(
			"generating cell {:?}, {} points",
			tile,
			accumulated.rows()
		);

		let mut xyz = Vec::with_capacity(accumulated.rows());
		let mut classes = Vec::with_capacity(accumulated.rows());
		for r in 0..accumulated.rows() {
			let row = accumulated.row(r);
			xyz.push(Vector3::new(row[0], row[1], row[2]));
			classes.push(row[3] as u8);
		}
		let attributes: Vec<(String, Vec<f64>)> = columns
			.iter()
			.enumerate()
			.map(|(a, name)| (name.clone(), accumulated.column(4 + a)))
			.collect();

		let (min_xy, _) = self.tile_bounds(tile);
		Ok(GridCell::new(
			tile,
			xyz,
			classes,
			attributes,
			min_xy,
			self.tile_side_meters,
		))
	}
}

fn load_source(
	source: &dyn PointSource,
	path: &Path,
	source_epsg: u32,
	included_attributes: &[String],
	ranges: &mut AttributeRanges,
) -> SourceOutcome {
	let mut batch = match source.read(path, included_attributes) {
		Ok(batch) => batch,
		Err(error) => {
			return SourceOutcome::Failed {
				path: path.to_path_buf(),
				error,
			}
		}
	};

	let xs = std::mem::take(&mut batch.xs);
	let ys = std::mem::take(&mut batch.ys);
	match projection::convert_crs(xs, ys, source_epsg, projection::SPHERICAL_MERCATOR_EPSG) {
		Ok((xs, ys)) => {
			batch.xs = xs;
			batch.ys = ys;
		}
		Err(error) => {
			return SourceOutcome::Failed {
				path: path.to_path_buf(),
				error: error.into(),
			}
		}
	}

	for (name, values) in &batch.attributes {
		ranges.adjust(name, values);
	}

	SourceOutcome::Loaded(batch)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::reader::FormatDispatchSource;

	fn intensity() -> Vec<String> {
		vec!["intensity".to_string()]
	}

	#[test]
	fn test_tile_of_is_deterministic() {
		let tms = TileMapServiceGrid::new(12);
		let first = tms.tile_of(34567.8, -901234.5);
		for _ in 0..10 {
			assert_eq!(tms.tile_of(34567.8, -901234.5), first);
		}
	}

	#[test]
	fn test_tile_of_origin() {
		let tms = TileMapServiceGrid::new(1);
		assert_eq!(tms.tile_of(1.0, 1.0), (1, 1));
		assert_eq!(tms.tile_of(-1.0, -1.0), (0, 0));
	}

	#[test]
	fn test_tile_bounds_invert_tile_of() {
		let tms = TileMapServiceGrid::new(12);
		for &(x, y) in &[
			(0.0, 0.0),
			(1234.5, -6789.0),
			(-20_000_000.0, 20_000_000.0),
			(19_999_999.0, -3.25),
		] {
			let tile = tms.tile_of(x, y);
			let (min, max) = tms.tile_bounds(tile);
			assert!(min[0] <= x && x < max[0]);
			assert!(min[1] <= y && y < max[1]);
		}
	}

	#[test]
	fn test_tile_side_scales_with_level() {
		let tms = TileMapServiceGrid::new(3);
		assert_eq!(tms.side_n_tiles, 8);
		assert_eq!(tms.tile_side_meters, MAP_SIDE_LENGTH_METERS / 8.0);
	}

	#[test]
	fn test_store_batch_and_reload_cell() {
		let dir = tempfile::tempdir().unwrap();
		let tms = TileMapServiceGrid::new(0);

		let mut batch = SourceBatch::with_attributes(&intensity());
		batch.push(10.0, 20.0, 5.0, 2, &[120.0]);
		batch.push(-10.0, -20.0, 15.0, 5, &[80.0]);
		let mut touched = BTreeSet::new();
		tms.store_batch(dir.path(), &batch, &mut touched).unwrap();

		assert_eq!(touched.len(), 1);
		let tiles: Vec<TileIndex> = touched.into_iter().collect();
		let cells: Vec<_> = tms
			.cells(dir.path(), tiles)
			.collect::<Result<_, _>>()
			.unwrap();
		assert_eq!(cells.len(), 1);
		assert_eq!(cells[0].n_points(), 2);
		assert_eq!(cells[0].classes(), vec![2, 5]);
		assert_eq!(cells[0].attributes()[0].0, "intensity");
	}

	#[test]
	fn test_batches_append_across_budget_boundaries() {
		let dir = tempfile::tempdir().unwrap();
		let tms = TileMapServiceGrid::new(0);

		for n in 0..2 {
			let csv = format!("x,y,z,classification\n{}.0,0.0,0.0,2\n", n);
			fs::write(dir.path().join(format!("part{}.csv", n)), csv).unwrap();
		}
		let sources = crate::reader::source_paths_from_directory(dir.path()).unwrap();

		let model = dir.path().join("model");
		fs::create_dir_all(&model).unwrap();
		let mut ranges = AttributeRanges::new();
		// one-byte budget: every file closes its own batch
		let tiles = tms
			.ingest(
				&model,
				&sources,
				&FormatDispatchSource,
				projection::SPHERICAL_MERCATOR_EPSG,
				1,
				&intensity(),
				&mut ranges,
			)
			.unwrap();

		assert_eq!(tiles.len(), 1);
		assert!(grid::points_file_path(&model, tiles[0], 0).exists());
		assert!(grid::points_file_path(&model, tiles[0], 1).exists());

		let cell = tms
			.cells(&model, tiles)
			.next()
			.unwrap()
			.unwrap();
		assert_eq!(cell.n_points(), 2);
	}

	#[test]
	fn test_ingest_skips_unreadable_sources() {
		let dir = tempfile::tempdir().unwrap();
		let tms = TileMapServiceGrid::new(0);

		fs::write(dir.path().join("good.csv"), "x,y,z\n1.0,2.0,3.0\n").unwrap();
		fs::write(dir.path().join("bad.csv"), "x,y,z\n1.0,broken,3.0\n").unwrap();
		let sources = vec![
			dir.path().join("bad.csv"),
			dir.path().join("missing.csv"),
			dir.path().join("good.csv"),
		];

		let model = dir.path().join("model");
		fs::create_dir_all(&model).unwrap();
		let mut ranges = AttributeRanges::new();
		let tiles = tms
			.ingest(
				&model,
				&sources,
				&FormatDispatchSource,
				projection::SPHERICAL_MERCATOR_EPSG,
				1 << 30,
				&[],
				&mut ranges,
			)
			.unwrap();

		let cell = tms
			.cells(&model, tiles)
			.next()
			.unwrap()
			.unwrap();
		assert_eq!(cell.n_points(), 1);
	}

	#[test]
	fn test_ingest_records_attribute_ranges() {
		let dir = tempfile::tempdir().unwrap();
		let tms = TileMapServiceGrid::new(0);

		fs::write(
			dir.path().join("points.csv"),
			"x,y,z,intensity\n0.0,0.0,0.0,40\n1.0,1.0,1.0,220\n",
		)
		.unwrap();

		let model = dir.path().join("model");
		fs::create_dir_all(&model).unwrap();
		let mut ranges = AttributeRanges::new();
		tms.ingest(
			&model,
			&[dir.path().join("points.csv")],
			&FormatDispatchSource,
			projection::SPHERICAL_MERCATOR_EPSG,
			1 << 30,
			&intensity(),
			&mut ranges,
		)
		.unwrap();

		assert_eq!(ranges.get("intensity"), Some([40.0, 220.0]));
	}
}
