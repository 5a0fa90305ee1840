use crate::model::attributes::AttributeRanges;
use crate::model::options::Partitioning;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const DEFAULT_POINT_SIZE: f64 = 1.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GridDescriptor {
	pub r#type: String,
	pub level: u32,
	pub side_n_tiles: u64,
	pub tile_size_meters: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CellDescriptor {
	pub directory: String,
	pub cell_index: [i64; 2],
	pub cell_extent_min: [f64; 3],
	pub cell_extent_max: [f64; 3],
	pub pc_bounds_min: [f64; 3],
	pub pc_bounds_max: [f64; 3],
}

/// Per-class sampled counts in payload order (ascending population). The
/// payload groups its rows by class in exactly this order, so consumers
/// reconstruct class runs from the counts; JSON key order is significant and
/// must survive serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassCounts(pub Vec<(u8, usize)>);

impl ClassCounts {
	pub fn total(&self) -> usize {
		self.0.iter().map(|(_, n)| n).sum()
	}
}

impl Serialize for ClassCounts {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.0.len()))?;
		for (class, count) in &self.0 {
			map.serialize_entry(class, count)?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for ClassCounts {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<ClassCounts, D::Error> {
		struct CountsVisitor;

		impl<'de> Visitor<'de> for CountsVisitor {
			type Value = ClassCounts;

			fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
				f.write_str("a map of class code to point count")
			}

			fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
				let mut counts = Vec::new();
				while let Some(entry) = map.next_entry::<u8, usize>()? {
					counts.push(entry);
				}
				Ok(ClassCounts(counts))
			}
		}

		deserializer.deserialize_map(CountsVisitor)
	}
}

/// One node of a cell's LOD tree as persisted in cell.json. `min`/`max` are
/// the node's own point bounds in the 0-1 cell frame; `filename` is absent
/// when the node deferred all of its points to its children.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
	pub min: [f64; 3],
	pub max: [f64; 3],
	pub indices: Vec<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub filename: Option<String>,
	pub n_points: usize,
	pub n_subtree_points: usize,
	pub avg_distance: f64,
	pub sorted_class_count: ClassCounts,
	pub children: Vec<NodeDescriptor>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassEntry {
	pub class: u8,
	pub color: [f64; 3],
	pub name: String,
	pub point_size: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ModelDescriptor {
	pub model_name: String,
	pub model_version: String,
	pub global_grid: GridDescriptor,
	pub max_node_points: u32,
	pub parent_sampling: bool,
	pub balanced_sampling: bool,
	pub partitioning_method: Partitioning,
	pub cells: Vec<CellDescriptor>,
	pub classes: Vec<ClassEntry>,
	pub attributes: AttributeRanges,
}

/// Stable visualization entry per discovered class: the color depends only on
/// the class's position in the discovery order.
pub fn class_entries(point_classes: &[u8]) -> Vec<ClassEntry> {
	let n = point_classes.len().max(1);
	point_classes
		.iter()
		.enumerate()
		.map(|(i, &class)| ClassEntry {
			class,
			color: palette_color(i as f64 / n as f64),
			name: class_display_name(class),
			point_size: DEFAULT_POINT_SIZE,
		})
		.collect()
}

fn palette_color(hue01: f64) -> [f64; 3] {
	hsv_to_rgb(hue01 * 360.0, 0.65, 0.95)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> [f64; 3] {
	let c = v * s;
	let hp = h / 60.0;
	let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
	let (r, g, b) = match hp as u32 {
		0 => (c, x, 0.0),
		1 => (x, c, 0.0),
		2 => (0.0, c, x),
		3 => (0.0, x, c),
		4 => (x, 0.0, c),
		_ => (c, 0.0, x),
	};
	let m = v - c;
	[r + m, g + m, b + m]
}

/// ASPRS standard classification names; anything else keeps its numeric code.
fn class_display_name(class: u8) -> String {
	let name = match class {
		0 => "Never Classified",
		1 => "Unclassified",
		2 => "Ground",
		3 => "Low Vegetation",
		4 => "Medium Vegetation",
		5 => "High Vegetation",
		6 => "Building",
		7 => "Low Point (Noise)",
		8 => "Model Key-Point",
		9 => "Water",
		10 => "Rail",
		11 => "Road Surface",
		12 => "Overlap",
		13 => "Wire - Guard",
		14 => "Wire - Conductor",
		15 => "Transmission Tower",
		16 => "Wire-Structure Connector",
		17 => "Bridge Deck",
		18 => "High Noise",
		_ => return format!("Class {}", class),
	};
	name.to_string()
}
