use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Row-major numeric matrix, the unit of every binary artifact the model writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
	rows: usize,
	cols: usize,
	data: Vec<f64>,
}

impl Matrix {
	pub fn with_cols(cols: usize) -> Matrix {
		Matrix {
			rows: 0,
			cols,
			data: Vec::new(),
		}
	}

	pub fn rows(&self) -> usize {
		self.rows
	}

	pub fn cols(&self) -> usize {
		self.cols
	}

	pub fn push_row(&mut self, row: &[f64]) {
		assert_eq!(row.len(), self.cols);
		self.data.extend_from_slice(row);
		self.rows += 1;
	}

	pub fn row(&self, r: usize) -> &[f64] {
		&self.data[r * self.cols..(r + 1) * self.cols]
	}

	pub fn column(&self, c: usize) -> Vec<f64> {
		assert!(c < self.cols);
		(0..self.rows).map(|r| self.data[r * self.cols + c]).collect()
	}

	pub fn append_rows(&mut self, other: &Matrix) -> Result<(), CodecError> {
		if other.cols != self.cols {
			return Err(CodecError::ColumnMismatch {
				expected: self.cols,
				actual: other.cols,
			});
		}
		self.data.extend_from_slice(&other.data);
		self.rows += other.rows;
		Ok(())
	}
}

/// Element width shared by the shape header and the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
	Single,
	Double,
}

impl Precision {
	fn byte_width(self) -> usize {
		match self {
			Precision::Single => 4,
			Precision::Double => 8,
		}
	}
}

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("unable to read matrix file: {0}")]
	Io(#[from] std::io::Error),
	#[error("matrix buffer too short for its shape header")]
	TruncatedHeader,
	#[error("matrix header declares an invalid dimension")]
	BadShape,
	#[error("matrix buffer holds {actual} values, shape header says {expected}")]
	ShapeMismatch { expected: usize, actual: usize },
	#[error("expected a {expected}-column matrix, found {actual} columns")]
	ColumnMismatch { expected: usize, actual: usize },
}

/// `[row_count, col_count]` followed by the values in row-major order, all at
/// the same element width, host-native byte order.
pub fn encode(matrix: &Matrix, precision: Precision) -> Vec<u8> {
	let n_values = 2 + matrix.rows * matrix.cols;
	let mut buf = Vec::with_capacity(n_values * precision.byte_width());
	let header = [matrix.rows as f64, matrix.cols as f64];
	for v in header.iter().chain(matrix.data.iter()) {
		match precision {
			Precision::Single => buf
				.write_f32::<NativeEndian>(*v as f32)
				.expect("Unable to write"),
			Precision::Double => buf
				.write_f64::<NativeEndian>(*v)
				.expect("Unable to write"),
		}
	}
	buf
}

pub fn decode(bytes: &[u8], precision: Precision) -> Result<Matrix, CodecError> {
	let width = precision.byte_width();
	let mut cursor = Cursor::new(bytes);
	let rows = read_dimension(&mut cursor, precision)?;
	let cols = read_dimension(&mut cursor, precision)?;

	let expected = rows * cols;
	let actual = (bytes.len() - 2 * width) / width;
	if actual != expected {
		return Err(CodecError::ShapeMismatch { expected, actual });
	}

	let mut data = Vec::with_capacity(expected);
	for _ in 0..expected {
		let v = match precision {
			Precision::Single => cursor
				.read_f32::<NativeEndian>()
				.map_err(|_| CodecError::TruncatedHeader)? as f64,
			Precision::Double => cursor
				.read_f64::<NativeEndian>()
				.map_err(|_| CodecError::TruncatedHeader)?,
		};
		data.push(v);
	}

	Ok(Matrix { rows, cols, data })
}

fn read_dimension(cursor: &mut Cursor<&[u8]>, precision: Precision) -> Result<usize, CodecError> {
	let v = match precision {
		Precision::Single => cursor
			.read_f32::<NativeEndian>()
			.map_err(|_| CodecError::TruncatedHeader)? as f64,
		Precision::Double => cursor
			.read_f64::<NativeEndian>()
			.map_err(|_| CodecError::TruncatedHeader)?,
	};
	if !v.is_finite() || v < 0.0 || v.fract() != 0.0 {
		return Err(CodecError::BadShape);
	}
	Ok(v as usize)
}

pub fn matrix_to_file(matrix: &Matrix, path: &Path) -> std::io::Result<()> {
	fs::write(path, encode(matrix, Precision::Single))
}

pub fn file_to_matrix(path: &Path) -> Result<Matrix, CodecError> {
	decode(&fs::read(path)?, Precision::Single)
}

pub fn matrix_to_file_double(matrix: &Matrix, path: &Path) -> std::io::Result<()> {
	fs::write(path, encode(matrix, Precision::Double))
}

pub fn file_to_matrix_double(path: &Path) -> Result<Matrix, CodecError> {
	decode(&fs::read(path)?, Precision::Double)
}
