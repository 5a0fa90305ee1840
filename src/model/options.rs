use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Partitioning {
	RegularOctree,
	LongestAxisBintree,
}

/// Resolved tree-build configuration, independent of how it was parsed.
#[derive(Debug, Clone)]
pub struct Options {
	pub max_node_points: u32,
	pub parent_sampling: bool,
	pub balanced_sampling: bool,
	pub partitioning: Partitioning,
}

impl Options {
	pub fn new(
		max_node_points: u32,
		parent_sampling: bool,
		balanced_sampling: bool,
		partitioning: Partitioning,
	) -> Options {
		assert!(max_node_points > 0);
		Options {
			max_node_points,
			parent_sampling,
			balanced_sampling,
			partitioning,
		}
	}
}

impl Default for Options {
	fn default() -> Options {
		Options {
			max_node_points: 65000,
			parent_sampling: true,
			balanced_sampling: true,
			partitioning: Partitioning::RegularOctree,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_partitioning_serializes_as_screaming_snake() {
		assert_eq!(
			serde_json::to_string(&Partitioning::RegularOctree).unwrap(),
			"\"REGULAR_OCTREE\""
		);
		assert_eq!(
			serde_json::to_string(&Partitioning::LongestAxisBintree).unwrap(),
			"\"LONGEST_AXIS_BINTREE\""
		);
	}
}
