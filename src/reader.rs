use crate::csv_reader;
use crate::pcd_reader;
use crate::projection::ProjectionError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["csv", "pcd"];

/// Column arrays for one loaded source file, all the same length. Attribute
/// columns follow the order they were requested in, padded with zeros where a
/// source does not carry the attribute.
pub struct SourceBatch {
	pub xs: Vec<f64>,
	pub ys: Vec<f64>,
	pub zs: Vec<f64>,
	pub classes: Vec<u8>,
	pub attributes: Vec<(String, Vec<f64>)>,
}

impl SourceBatch {
	pub fn with_attributes(included_attributes: &[String]) -> SourceBatch {
		SourceBatch {
			xs: Vec::new(),
			ys: Vec::new(),
			zs: Vec::new(),
			classes: Vec::new(),
			attributes: included_attributes
				.iter()
				.map(|name| (name.clone(), Vec::new()))
				.collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.xs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.xs.is_empty()
	}

	pub fn push(&mut self, x: f64, y: f64, z: f64, class: u8, attribute_values: &[f64]) {
		assert_eq!(attribute_values.len(), self.attributes.len());
		self.xs.push(x);
		self.ys.push(y);
		self.zs.push(z);
		self.classes.push(class);
		for (column, v) in self.attributes.iter_mut().zip(attribute_values) {
			column.1.push(*v);
		}
	}

	/// Working-buffer size once bucketed: every column is persisted as a
	/// double-precision matrix column, the class included.
	pub fn approx_bytes(&self) -> u64 {
		(self.len() * (4 + self.attributes.len()) * 8) as u64
	}

	pub fn append(&mut self, other: SourceBatch) {
		assert_eq!(self.attributes.len(), other.attributes.len());
		self.xs.extend(other.xs);
		self.ys.extend(other.ys);
		self.zs.extend(other.zs);
		self.classes.extend(other.classes);
		for (column, other_column) in self.attributes.iter_mut().zip(other.attributes) {
			assert_eq!(column.0, other_column.0);
			column.1.extend(other_column.1);
		}
	}
}

#[derive(Debug, Error)]
pub enum SourceError {
	#[error("unable to read source: {0}")]
	Io(#[from] io::Error),
	#[error("malformed csv source: {0}")]
	Csv(#[from] csv::Error),
	#[error("malformed pcd source: {0}")]
	Pcd(String),
	#[error("unsupported source format: {0}")]
	UnsupportedFormat(String),
	#[error(transparent)]
	Projection(#[from] ProjectionError),
}

/// One ingestion attempt: either the batch, or the failure that makes the
/// grid skip this file and move on.
pub enum SourceOutcome {
	Loaded(SourceBatch),
	Failed { path: PathBuf, error: SourceError },
}

/// The source-reader collaborator. A LAS-capable reader plugs in here; the
/// shipped implementation dispatches to the csv and pcd readers by extension.
pub trait PointSource {
	fn read(&self, path: &Path, included_attributes: &[String])
		-> Result<SourceBatch, SourceError>;
}

pub struct FormatDispatchSource;

impl PointSource for FormatDispatchSource {
	fn read(
		&self,
		path: &Path,
		included_attributes: &[String],
	) -> Result<SourceBatch, SourceError> {
		let extension = path
			.extension()
			.and_then(|e| e.to_str())
			.unwrap_or("")
			.to_ascii_lowercase();
		match extension.as_str() {
			"csv" => csv_reader::from_csv(&fs::read(path)?, included_attributes),
			"pcd" => pcd_reader::from_pcd(&fs::read(path)?, included_attributes),
			_ => Err(SourceError::UnsupportedFormat(path.display().to_string())),
		}
	}
}

pub fn source_paths_from_directory(dir: &Path) -> io::Result<Vec<PathBuf>> {
	let mut paths = Vec::new();
	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		let extension = path
			.extension()
			.and_then(|e| e.to_str())
			.unwrap_or("")
			.to_ascii_lowercase();
		if SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
			paths.push(path);
		}
	}
	paths.sort();
	Ok(paths)
}
