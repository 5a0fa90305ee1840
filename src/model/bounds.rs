use crate::model::vector3::Vector3;
use ord_subset::OrdSubsetIterExt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
	pub min: Vector3,
	pub max: Vector3,
}

impl Bounds {
	pub fn new(min: Vector3, max: Vector3) -> Bounds {
		Bounds { min, max }
	}

	pub fn size(&self) -> Vector3 {
		self.max - self.min
	}

	/// Index of the axis with the largest extent; ties pick the lowest axis.
	pub fn longest_axis(&self) -> usize {
		let size = self.size().to_array();
		let mut axis = 0;
		for i in 1..3 {
			if size[i] > size[axis] {
				axis = i;
			}
		}
		axis
	}
}

/// Bounds of a non-empty point set. Panics on an empty iterator: callers
/// never materialize zero-point nodes or cells.
pub fn find_bounds<'a, I>(points: I) -> Bounds
where
	I: IntoIterator<Item = &'a Vector3>,
{
	let points: Vec<&Vector3> = points.into_iter().collect();
	assert!(!points.is_empty(), "bounds of an empty point set");

	let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
	let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
	let zs: Vec<f64> = points.iter().map(|p| p.z).collect();

	Bounds::new(
		Vector3::new(
			*xs.iter().ord_subset_min().unwrap(),
			*ys.iter().ord_subset_min().unwrap(),
			*zs.iter().ord_subset_min().unwrap(),
		),
		Vector3::new(
			*xs.iter().ord_subset_max().unwrap(),
			*ys.iter().ord_subset_max().unwrap(),
			*zs.iter().ord_subset_max().unwrap(),
		),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_find_bounds() {
		let points = vec![
			Vector3::new(1.0, -2.0, 0.5),
			Vector3::new(-1.0, 3.0, 0.0),
			Vector3::new(0.0, 0.0, 2.0),
		];
		let bounds = find_bounds(&points);
		assert_eq!(bounds.min, Vector3::new(-1.0, -2.0, 0.0));
		assert_eq!(bounds.max, Vector3::new(1.0, 3.0, 2.0));
	}

	#[test]
	fn test_longest_axis() {
		let bounds = Bounds::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 5.0, 2.0));
		assert_eq!(bounds.longest_axis(), 1);
	}

	#[test]
	fn test_longest_axis_tie_prefers_lowest() {
		let bounds = Bounds::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 2.0, 1.0));
		assert_eq!(bounds.longest_axis(), 0);
	}
}
