use pcd_rs::{DynReader, DynRecord};

use crate::reader::{SourceBatch, SourceError};

/// pcd sources carry no classification, so every point lands in class 0, and
/// requested attributes are zero-filled.
pub fn from_pcd(buf: &[u8], included_attributes: &[String]) -> Result<SourceBatch, SourceError> {
	let reader = DynReader::from_bytes(buf).map_err(|e| SourceError::Pcd(e.to_string()))?;

	let mut batch = SourceBatch::with_attributes(included_attributes);
	let attribute_row = vec![0.0; included_attributes.len()];

	for point in reader {
		let point: DynRecord = point.map_err(|e| SourceError::Pcd(e.to_string()))?;
		let [x, y, z] = point
			.xyz::<f64>()
			.ok_or_else(|| SourceError::Pcd("point without xyz fields".to_string()))?;
		batch.push(x, y, z, 0, &attribute_row);
	}

	Ok(batch)
}
