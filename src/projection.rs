use std::f64::consts::PI;
use thiserror::Error;

pub const WGS84_EPSG: u32 = 4326;
pub const SPHERICAL_MERCATOR_EPSG: u32 = 3857;

const EARTH_RADIUS_METERS: f64 = 6378137.0;

#[derive(Debug, Error)]
#[error("no reprojection from EPSG:{from} to EPSG:{to}")]
pub struct ProjectionError {
	pub from: u32,
	pub to: u32,
}

/// Converts coordinate arrays between reference systems: identity when the
/// systems match, closed-form WGS84 lon/lat to spherical Mercator otherwise.
/// Any other pair is unsupported and fails the file being ingested.
pub fn convert_crs(
	xs: Vec<f64>,
	ys: Vec<f64>,
	epsg_in: u32,
	epsg_out: u32,
) -> Result<(Vec<f64>, Vec<f64>), ProjectionError> {
	if epsg_in == epsg_out {
		return Ok((xs, ys));
	}

	match (epsg_in, epsg_out) {
		(WGS84_EPSG, SPHERICAL_MERCATOR_EPSG) => {
			let mx = xs
				.iter()
				.map(|lon| EARTH_RADIUS_METERS * lon.to_radians())
				.collect();
			let my = ys
				.iter()
				.map(|lat| EARTH_RADIUS_METERS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln())
				.collect();
			Ok((mx, my))
		}
		(from, to) => Err(ProjectionError { from, to }),
	}
}
