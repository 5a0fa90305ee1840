use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub mod cell;
pub mod tms;

/// (tx, ty) of one cell of the global grid at a fixed level.
pub type TileIndex = (i64, i64);

pub fn cell_folder_name(index: TileIndex) -> String {
	format!("Cell_{}_{}", index.0, index.1)
}

pub fn cell_directory(model_path: &Path, index: TileIndex) -> PathBuf {
	model_path.join(cell_folder_name(index))
}

pub fn points_file_path(model_path: &Path, index: TileIndex, n: usize) -> PathBuf {
	cell_directory(model_path, index).join(format!("points_{}.bytes", n))
}

/// First free accumulation slot, so batches append instead of overwriting.
pub fn next_points_file_path(model_path: &Path, index: TileIndex) -> PathBuf {
	let mut n = 0;
	loop {
		let path = points_file_path(model_path, index, n);
		if !path.exists() {
			return path;
		}
		n += 1;
	}
}

pub fn attribute_columns_path(model_path: &Path, index: TileIndex) -> PathBuf {
	cell_directory(model_path, index).join("attribute_columns.json")
}

/// Deletes a tile's transient accumulation files once its tree is written.
/// The cell directory itself stays: node payloads and cell.json live there.
pub fn remove_accumulation(model_path: &Path, index: TileIndex) -> io::Result<()> {
	let mut n = 0;
	loop {
		let path = points_file_path(model_path, index, n);
		if !path.exists() {
			break;
		}
		fs::remove_file(path)?;
		n += 1;
	}
	let columns = attribute_columns_path(model_path, index);
	if columns.exists() {
		fs::remove_file(columns)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cell_folder_name() {
		assert_eq!(cell_folder_name((2076, 2527)), "Cell_2076_2527");
	}

	#[test]
	fn test_next_points_file_path_probes_free_slot() {
		let dir = tempfile::tempdir().unwrap();
		let index = (3, 4);
		fs::create_dir_all(cell_directory(dir.path(), index)).unwrap();
		assert_eq!(
			next_points_file_path(dir.path(), index),
			points_file_path(dir.path(), index, 0)
		);
		fs::write(points_file_path(dir.path(), index, 0), b"x").unwrap();
		assert_eq!(
			next_points_file_path(dir.path(), index),
			points_file_path(dir.path(), index, 1)
		);
	}
}
