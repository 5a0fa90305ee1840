use crate::grid::TileIndex;
use crate::model::bounds::{find_bounds, Bounds};
use crate::model::vector3::Vector3;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Tolerance for floating-point overflow of the normalization before clipping.
const NORMALIZATION_EPSILON: f64 = 1e-6;

const BUCKET_CACHE_CAPACITY: usize = 20;

/// One tile's full point set, reloaded from its accumulation files.
///
/// Coordinates are normalized into the cell's cube: xy spans the tile, the
/// height base is the observed minimum height, and the side length equals the
/// tile side, so the extent is a true cube and normalized values land in
/// [-1, 1] on every axis.
pub struct GridCell {
	pub index: TileIndex,
	pub cell_extent_min: Vector3,
	pub cell_extent_max: Vector3,
	pub pc_bounds: Bounds,
	normalized: Vec<Vector3>,
	attributes: Vec<(String, Vec<f64>)>,
	indices_by_class: BTreeMap<u8, Vec<u32>>,
	bucket_cache: RefCell<BucketCache>,
}

impl GridCell {
	pub fn new(
		index: TileIndex,
		xyz: Vec<Vector3>,
		classes: Vec<u8>,
		attributes: Vec<(String, Vec<f64>)>,
		cell_xy_min: [f64; 2],
		cell_side_length: f64,
	) -> GridCell {
		assert_eq!(xyz.len(), classes.len());
		for (_, values) in &attributes {
			assert_eq!(values.len(), xyz.len());
		}

		let pc_bounds = find_bounds(&xyz);
		let h_min = pc_bounds.min.z;
		let cell_extent_min = Vector3::new(cell_xy_min[0], cell_xy_min[1], h_min);
		let cell_extent_max = cell_extent_min + cell_side_length;

		let center = (cell_extent_min + cell_extent_max) * 0.5;
		let half_side = cell_side_length / 2.0;

		let mut normalized = Vec::with_capacity(xyz.len());
		for p in &xyz {
			let n = (*p - center) / half_side;
			assert!(
				n.max_abs_component() <= 1.0 + NORMALIZATION_EPSILON,
				"point {:?} normalizes outside the cell cube of tile {:?}",
				p,
				index
			);
			normalized.push(n.clamp(-1.0, 1.0));
		}

		let mut indices_by_class: BTreeMap<u8, Vec<u32>> = BTreeMap::new();
		for (i, class) in classes.iter().enumerate() {
			indices_by_class.entry(*class).or_default().push(i as u32);
		}

		GridCell {
			index,
			cell_extent_min,
			cell_extent_max,
			pc_bounds,
			normalized,
			attributes,
			indices_by_class,
			bucket_cache: RefCell::new(BucketCache::new()),
		}
	}

	pub fn n_points(&self) -> usize {
		self.normalized.len()
	}

	pub fn normalized_points(&self) -> &[Vector3] {
		&self.normalized
	}

	pub fn attributes(&self) -> &[(String, Vec<f64>)] {
		&self.attributes
	}

	pub fn indices_by_class(&self) -> &BTreeMap<u8, Vec<u32>> {
		&self.indices_by_class
	}

	pub fn classes(&self) -> Vec<u8> {
		self.indices_by_class.keys().copied().collect()
	}

	/// Flat octree bucket id per point at the given level:
	/// `ix + iy * 2^level + iz * 4^level` over the [0, 1]-remapped coordinates.
	///
	/// Bucket ids depend only on (point, level), not on the node being split,
	/// so the whole-cell result is memoized behind a small LRU keyed by level.
	pub fn octree_bucket_indices(&self, level: usize) -> Rc<Vec<u64>> {
		if let Some(hit) = self.bucket_cache.borrow_mut().get(level) {
			return hit;
		}
		let computed = Rc::new(self.compute_bucket_indices(level));
		self.bucket_cache
			.borrow_mut()
			.put(level, Rc::clone(&computed));
		computed
	}

	fn compute_bucket_indices(&self, level: usize) -> Vec<u64> {
		let n_partitions = 1u64 << level;
		let scale = n_partitions as f64;

		self.normalized
			.iter()
			.map(|p| {
				let mut flat = 0u64;
				for (axis, v) in p.to_array().iter().enumerate() {
					let v01 = (v + 1.0) / 2.0;
					let i = ((v01 * scale).floor() as i64).clamp(0, n_partitions as i64 - 1) as u64;
					flat += i * n_partitions.pow(axis as u32);
				}
				assert!(flat < n_partitions.pow(3));
				flat
			})
			.collect()
	}
}

/// Fixed-capacity most-recently-used cache, front = most recent.
struct BucketCache {
	entries: Vec<(usize, Rc<Vec<u64>>)>,
}

impl BucketCache {
	fn new() -> BucketCache {
		BucketCache { entries: Vec::new() }
	}

	fn get(&mut self, level: usize) -> Option<Rc<Vec<u64>>> {
		let pos = self.entries.iter().position(|(l, _)| *l == level)?;
		let entry = self.entries.remove(pos);
		let hit = Rc::clone(&entry.1);
		self.entries.insert(0, entry);
		Some(hit)
	}

	fn put(&mut self, level: usize, value: Rc<Vec<u64>>) {
		self.entries.insert(0, (level, value));
		self.entries.truncate(BUCKET_CACHE_CAPACITY);
	}
}
