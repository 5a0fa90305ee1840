use ord_subset::OrdSubsetIterExt;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Observed numeric range of every registered point attribute, accumulated
/// over everything ingested; consumers renormalize attribute values with it.
///
/// An explicit context object: ingestion adjusts the instance it is handed
/// and the orchestrator merges results, so nothing leaks between model runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeRanges {
	ranges: Vec<(String, [f64; 2])>,
}

impl AttributeRanges {
	pub fn new() -> AttributeRanges {
		AttributeRanges { ranges: Vec::new() }
	}

	/// Widens the attribute's range to cover the given values. First sight of
	/// an attribute registers it; registration order is preserved.
	pub fn adjust(&mut self, name: &str, values: &[f64]) {
		let vmin = match values.iter().ord_subset_min() {
			Some(v) => *v,
			None => return,
		};
		let vmax = match values.iter().ord_subset_max() {
			Some(v) => *v,
			None => return,
		};

		match self.ranges.iter_mut().find(|(n, _)| n == name) {
			Some((_, range)) => {
				range[0] = range[0].min(vmin);
				range[1] = range[1].max(vmax);
			}
			None => self.ranges.push((name.to_string(), [vmin, vmax])),
		}
	}

	pub fn merge(&mut self, other: AttributeRanges) {
		for (name, range) in other.ranges {
			self.adjust(&name, &range);
		}
	}

	pub fn get(&self, name: &str) -> Option<[f64; 2]> {
		self.ranges
			.iter()
			.find(|(n, _)| n == name)
			.map(|(_, range)| *range)
	}

	pub fn is_empty(&self) -> bool {
		self.ranges.is_empty()
	}
}

impl Serialize for AttributeRanges {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.ranges.len()))?;
		for (name, range) in &self.ranges {
			map.serialize_entry(name, range)?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for AttributeRanges {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<AttributeRanges, D::Error> {
		struct RangesVisitor;

		impl<'de> Visitor<'de> for RangesVisitor {
			type Value = AttributeRanges;

			fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
				f.write_str("a map of attribute name to [min, max]")
			}

			fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
				let mut ranges = Vec::new();
				while let Some((name, range)) = map.next_entry::<String, [f64; 2]>()? {
					ranges.push((name, range));
				}
				Ok(AttributeRanges { ranges })
			}
		}

		deserializer.deserialize_map(RangesVisitor)
	}
}
