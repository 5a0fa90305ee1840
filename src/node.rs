use crate::encoding::{self, Matrix};
use crate::grid::cell::GridCell;
use crate::model::bounds::{find_bounds, Bounds};
use crate::model::descriptor::{ClassCounts, NodeDescriptor};
use crate::model::options::{Options, Partitioning};
use crate::model::vector3::Vector3;
use log::trace;
use ord_subset::OrdSubsetSliceExt;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// A subset of one cell's point indices at one level of its LOD tree,
/// identified by the path of child slots from the root. Nodes exist only
/// while their subtree is being written.
pub struct PCNode<'a> {
	cell: &'a GridCell,
	path: Vec<usize>,
	points_by_class: BTreeMap<u8, Vec<u32>>,
	n_points: usize,
	/// (class, count) ascending by count; ties keep ascending class order.
	sorted_class_count: Vec<(u8, usize)>,
}

impl<'a> PCNode<'a> {
	pub fn root(cell: &GridCell) -> PCNode {
		PCNode::from_parts(cell, vec![0], cell.indices_by_class().clone())
	}

	fn from_parts(
		cell: &'a GridCell,
		path: Vec<usize>,
		mut points_by_class: BTreeMap<u8, Vec<u32>>,
	) -> PCNode<'a> {
		points_by_class.retain(|_, indices| !indices.is_empty());
		let n_points = points_by_class.values().map(Vec::len).sum();

		let mut sorted_class_count: Vec<(u8, usize)> = points_by_class
			.iter()
			.map(|(class, indices)| (*class, indices.len()))
			.collect();
		sorted_class_count.sort_by_key(|(_, count)| *count);

		PCNode {
			cell,
			path,
			points_by_class,
			n_points,
			sorted_class_count,
		}
	}

	pub fn n_points(&self) -> usize {
		self.n_points
	}

	pub fn sorted_class_count(&self) -> &[(u8, usize)] {
		&self.sorted_class_count
	}

	/// Splits this node's points into a subset of at most `budget` points and
	/// the untaken remainder. Classes are served smallest-first so sparse
	/// classes get their fair share before the budget runs out; the last
	/// class absorbs whatever budget is left. Every index ends up on exactly
	/// one side.
	pub fn sample(
		mut self,
		budget: usize,
		balanced: bool,
		rng: &mut impl Rng,
	) -> (PCNode<'a>, Option<PCNode<'a>>) {
		if self.n_points <= budget {
			return (self, None);
		}

		let mut sampled: BTreeMap<u8, Vec<u32>> = BTreeMap::new();
		let mut remaining: BTreeMap<u8, Vec<u32>> = BTreeMap::new();
		let mut remaining_budget = budget;
		let mut remaining_classes = self.sorted_class_count.len();

		for (class, count) in self.sorted_class_count.clone() {
			let indices = self.points_by_class.remove(&class).unwrap_or_default();
			let take = if remaining_classes > 1 {
				let share = if balanced {
					remaining_budget / remaining_classes
				} else {
					budget * count / self.n_points
				};
				share.min(count)
			} else {
				remaining_budget
			};
			remaining_budget -= take.min(remaining_budget);
			remaining_classes -= 1;

			let (selected, rest) = random_split(indices, take, rng);
			sampled.insert(class, selected);
			if !rest.is_empty() {
				remaining.insert(class, rest);
			}
		}

		let n_points = self.n_points;
		let cell = self.cell;
		let path = self.path;

		let sampled = PCNode::from_parts(cell, path.clone(), sampled);
		let remaining = PCNode::from_parts(cell, path, remaining);
		assert_eq!(
			sampled.n_points + remaining.n_points,
			n_points,
			"sampling lost or duplicated points"
		);
		assert!(sampled.n_points <= budget);

		if remaining.n_points == 0 {
			(sampled, None)
		} else {
			(sampled, Some(remaining))
		}
	}

	/// Groups this node's points by their octree bucket at level = path
	/// length. One child per non-empty bucket, slot index following the
	/// ascending bucket-id enumeration.
	pub fn split_octree(self) -> Vec<PCNode<'a>> {
		let level = self.path.len();
		let buckets = self.cell.octree_bucket_indices(level);

		let mut groups: BTreeMap<u64, BTreeMap<u8, Vec<u32>>> = BTreeMap::new();
		for (class, indices) in self.points_by_class {
			for i in indices {
				groups
					.entry(buckets[i as usize])
					.or_default()
					.entry(class)
					.or_default()
					.push(i);
			}
		}
		assert!(
			groups.len() <= 8,
			"octree split produced {} children",
			groups.len()
		);

		groups
			.into_values()
			.enumerate()
			.map(|(slot, by_class)| {
				let mut path = self.path.clone();
				path.push(slot);
				PCNode::from_parts(self.cell, path, by_class)
			})
			.collect()
	}

	/// Splits at the median of the longest axis. Axis and median are chosen
	/// independently per class over this node's own points of that class;
	/// a degenerate `>` split (everything on one side of a repeated median)
	/// falls back to `>=`.
	pub fn split_bintree_longest_axis(self) -> Vec<PCNode<'a>> {
		let points = self.cell.normalized_points();
		let mut upper: BTreeMap<u8, Vec<u32>> = BTreeMap::new();
		let mut lower: BTreeMap<u8, Vec<u32>> = BTreeMap::new();

		for (class, indices) in self.points_by_class {
			let class_points: Vec<Vector3> =
				indices.iter().map(|&i| points[i as usize]).collect();
			let axis = find_bounds(&class_points).longest_axis();
			let mut values: Vec<f64> =
				class_points.iter().map(|p| p.component(axis)).collect();
			let m = median(&mut values);

			let mut division: Vec<bool> =
				class_points.iter().map(|p| p.component(axis) > m).collect();
			let n_upper = division.iter().filter(|up| **up).count();
			if n_upper == 0 || n_upper == division.len() {
				division = class_points
					.iter()
					.map(|p| p.component(axis) >= m)
					.collect();
			}

			for (i, up) in indices.into_iter().zip(division) {
				let half = if up { &mut upper } else { &mut lower };
				half.entry(class).or_default().push(i);
			}
		}

		[upper, lower]
			.into_iter()
			.filter(|half| !half.is_empty())
			.enumerate()
			.map(|(slot, by_class)| {
				let mut path = self.path.clone();
				path.push(slot);
				PCNode::from_parts(self.cell, path, by_class)
			})
			.collect()
	}

	/// Recursive tree writer. With parent sampling on (or once the node fits
	/// the budget) the node persists a sampled payload and recursion
	/// continues on the remainder; otherwise everything is deferred to the
	/// children. Recursion ends when nothing remains, so each of the cell's
	/// points is written exactly once somewhere in the subtree.
	pub fn save_tree(
		self,
		options: &Options,
		out_folder: &Path,
		rng: &mut impl Rng,
	) -> io::Result<Option<NodeDescriptor>> {
		if self.n_points == 0 {
			return Ok(None);
		}

		let n_subtree_points = self.n_points;
		let indices = self.path.clone();
		let own_bounds = self.own_bounds();
		let max_node_points = options.max_node_points as usize;

		let (payload, rest) = if options.parent_sampling || self.n_points < max_node_points {
			let (sampled, remaining) =
				self.sample(max_node_points, options.balanced_sampling, rng);

			let filename = node_file_name(&indices);
			let (matrix, xyz) = sampled.payload(rng);
			encoding::matrix_to_file(&matrix, &out_folder.join(&filename))?;
			trace!("wrote {} with {} points", filename, matrix.rows());

			let payload = Payload {
				filename,
				n_points: sampled.n_points,
				avg_distance: approx_average_distance(&xyz, rng),
				class_counts: ClassCounts(sampled.sorted_class_count.clone()),
			};
			(Some(payload), remaining)
		} else {
			(None, Some(self))
		};

		let mut children = Vec::new();
		if let Some(rest) = rest {
			let parts = match options.partitioning {
				Partitioning::RegularOctree => rest.split_octree(),
				Partitioning::LongestAxisBintree => rest.split_bintree_longest_axis(),
			};
			for part in parts {
				if let Some(child) = part.save_tree(options, out_folder, rng)? {
					children.push(child);
				}
			}
		}

		let descriptor = match payload {
			Some(p) => NodeDescriptor {
				min: to_unit_frame(own_bounds.min),
				max: to_unit_frame(own_bounds.max),
				indices,
				filename: Some(p.filename),
				n_points: p.n_points,
				n_subtree_points,
				avg_distance: p.avg_distance,
				sorted_class_count: p.class_counts,
				children,
			},
			None => NodeDescriptor {
				min: to_unit_frame(own_bounds.min),
				max: to_unit_frame(own_bounds.max),
				indices,
				filename: None,
				n_points: 0,
				n_subtree_points,
				avg_distance: 0.0,
				sorted_class_count: ClassCounts::default(),
				children,
			},
		};
		Ok(Some(descriptor))
	}

	fn own_bounds(&self) -> Bounds {
		let points = self.cell.normalized_points();
		find_bounds(
			self.points_by_class
				.values()
				.flatten()
				.map(|&i| &points[i as usize]),
		)
	}

	/// Payload rows grouped by class in `sorted_class_count` order, shuffled
	/// within each class: consumers slice class runs out of the buffer by the
	/// recorded counts, and partial reads stay spatially unbiased.
	fn payload(&self, rng: &mut impl Rng) -> (Matrix, Vec<Vector3>) {
		let points = self.cell.normalized_points();
		let attributes = self.cell.attributes();

		let mut matrix = Matrix::with_cols(3 + attributes.len());
		let mut xyz = Vec::with_capacity(self.n_points);
		let mut row = vec![0.0; 3 + attributes.len()];
		for (class, _) in &self.sorted_class_count {
			let mut indices = self.points_by_class[class].clone();
			indices.shuffle(rng);
			for i in indices {
				let p = points[i as usize];
				row[0] = p.x;
				row[1] = p.y;
				row[2] = p.z;
				for (a, (_, values)) in attributes.iter().enumerate() {
					row[3 + a] = values[i as usize];
				}
				matrix.push_row(&row);
				xyz.push(p);
			}
		}
		(matrix, xyz)
	}
}

/// What a node that wrote a payload contributes to its descriptor.
struct Payload {
	filename: String,
	n_points: usize,
	avg_distance: f64,
	class_counts: ClassCounts,
}

fn node_file_name(indices: &[usize]) -> String {
	let path: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
	format!("Node-{}.bytes", path.join("_"))
}

/// `take` uniformly random indices without replacement; the complement keeps
/// its original order. `take` past the end selects everything.
fn random_split(indices: Vec<u32>, take: usize, rng: &mut impl Rng) -> (Vec<u32>, Vec<u32>) {
	if indices.len() <= take {
		return (indices, Vec::new());
	}

	let picked = rand::seq::index::sample(rng, indices.len(), take);
	let mut chosen = vec![false; indices.len()];
	let mut selected = Vec::with_capacity(take);
	for i in picked {
		chosen[i] = true;
		selected.push(indices[i]);
	}
	let rest = indices
		.iter()
		.enumerate()
		.filter(|(i, _)| !chosen[*i])
		.map(|(_, v)| *v)
		.collect();
	(selected, rest)
}

fn median(values: &mut [f64]) -> f64 {
	values.ord_subset_sort();
	let n = values.len();
	if n % 2 == 1 {
		values[n / 2]
	} else {
		(values[n / 2 - 1] + values[n / 2]) / 2.0
	}
}

/// Dispersion proxy: mean squared distance between two independent random
/// permutations of the points, not a nearest-neighbor distance.
fn approx_average_distance(xyz: &[Vector3], rng: &mut impl Rng) -> f64 {
	if xyz.len() < 2 {
		return 0.0;
	}
	let mut left: Vec<usize> = (0..xyz.len()).collect();
	let mut right = left.clone();
	left.shuffle(rng);
	right.shuffle(rng);

	let total: f64 = left
		.iter()
		.zip(&right)
		.map(|(&i, &j)| xyz[i].squared_distance(&xyz[j]))
		.sum();
	(total / xyz.len() as f64).sqrt()
}

fn to_unit_frame(v: Vector3) -> [f64; 3] {
	((v + 1.0) * 0.5).to_array()
}
