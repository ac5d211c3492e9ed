use ndarray::Array2;

use super::{RETURNS_PER_LINE, SPOKES, SpokeBearing};

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Precomputed polar to cartesian table in radius-step units.
///
/// The table has one bearing row and one radius column more than a rotation
/// and a line hold. A quad for bearing `b` uses rows `b` and `b + 1`, and a
/// blob ending at the last radius uses column `RETURNS_PER_LINE`; with the
/// extra row and column neither needs a wraparound in the inner loop.
pub struct PolarToCartesianLookup {
    xy: Array2<Point>,
}

impl PolarToCartesianLookup {
    pub fn new() -> Self {
        let xy = Array2::from_shape_fn((SPOKES + 1, RETURNS_PER_LINE + 1), |(arc, radius)| {
            let theta = arc as f32 * 2.0 * std::f32::consts::PI / SPOKES as f32;
            Point {
                x: radius as f32 * theta.cos(),
                y: radius as f32 * theta.sin(),
            }
        });
        PolarToCartesianLookup { xy }
    }

    /// `arc` may be `SPOKES` and `radius` may be `RETURNS_PER_LINE`, one past the
    /// last bearing line and sample.
    pub fn polar_to_cartesian(&self, arc: usize, radius: usize) -> Point {
        self.xy[[arc, radius]]
    }
}

impl Default for PolarToCartesianLookup {
    fn default() -> Self {
        Self::new()
    }
}

pub fn mod_degrees(a: f64) -> f64 {
    a.rem_euclid(360.)
}

pub fn mod_raw(a: i32) -> SpokeBearing {
    a.rem_euclid(SPOKES as i32) as SpokeBearing
}

/// Degrees to the nearest bearing line, not normalized.
pub fn degrees_to_raw(degrees: f64) -> i32 {
    (degrees * SPOKES as f64 / 360.).round() as i32
}

pub fn raw_to_degrees(raw: i32) -> f64 {
    raw as f64 * 360. / SPOKES as f64
}

pub fn radius_step_to_meters(radius: usize, range_meters: u32) -> f64 {
    radius as f64 * range_meters as f64 / RETURNS_PER_LINE as f64
}

/// Returns `None` when the line has no range yet.
pub fn meters_to_radius_step(meters: f64, range_meters: u32) -> Option<usize> {
    if range_meters == 0 || meters < 0. {
        return None;
    }
    Some((meters * RETURNS_PER_LINE as f64 / range_meters as f64).round() as usize)
}
