use csv::Reader;
use serde::Deserialize;

use crate::reader::{SourceBatch, SourceError};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Intensity {
	Int(u16),
	Float(f32),
}

impl Intensity {
	fn value(&self) -> f64 {
		match self {
			Intensity::Int(v) => f64::from(*v),
			Intensity::Float(v) => f64::from(*v),
		}
	}
}

#[derive(Debug, Deserialize)]
struct Record {
	pub x: f64,
	pub y: f64,
	pub z: f64,
	pub classification: Option<u8>,
	pub intensity: Option<Intensity>,
}

pub fn from_csv(buf: &[u8], included_attributes: &[String]) -> Result<SourceBatch, SourceError> {
	let mut rdr = Reader::from_reader(buf);
	let mut batch = SourceBatch::with_attributes(included_attributes);
	let mut attribute_row = vec![0.0; included_attributes.len()];

	for result in rdr.deserialize() {
		let record: Record = result?;

		for (slot, name) in included_attributes.iter().enumerate() {
			attribute_row[slot] = match name.as_str() {
				"intensity" => record
					.intensity
					.as_ref()
					.map(Intensity::value)
					.unwrap_or(0.0),
				_ => 0.0,
			};
		}

		batch.push(
			record.x,
			record.y,
			record.z,
			record.classification.unwrap_or(0),
			&attribute_row,
		);
	}

	Ok(batch)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn intensity() -> Vec<String> {
		vec!["intensity".to_string()]
	}

	#[test]
	fn test_read_csv() -> Result<(), SourceError> {
		let buffer = b"x,y,z,classification,intensity\n1.0,2.0,3.0,2,120\n4.0,5.0,6.0,5,80\n";
		let batch = from_csv(buffer, &intensity())?;

		assert_eq!(batch.len(), 2);
		assert_eq!(batch.xs, vec![1.0, 4.0]);
		assert_eq!(batch.classes, vec![2, 5]);
		assert_eq!(batch.attributes[0].1, vec![120.0, 80.0]);

		Ok(())
	}

	#[test]
	fn test_read_csv_float_intensity() -> Result<(), SourceError> {
		let buffer = b"x,y,z,intensity\n1.0,2.0,3.0,0.5\n";
		let batch = from_csv(buffer, &intensity())?;

		assert_eq!(batch.attributes[0].1, vec![0.5]);

		Ok(())
	}

	#[test]
	fn test_read_csv_bare_coordinates() -> Result<(), SourceError> {
		let buffer = b"x,y,z\n1.0,2.0,3.0\n";
		let batch = from_csv(buffer, &intensity())?;

		assert_eq!(batch.classes, vec![0]);
		assert_eq!(batch.attributes[0].1, vec![0.0]);

		Ok(())
	}

	#[test]
	fn test_read_csv_malformed_row_fails() {
		let buffer = b"x,y,z\n1.0,not-a-number,3.0\n";
		assert!(from_csv(buffer, &[]).is_err());
	}
}
