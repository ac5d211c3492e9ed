use nalgebra::{Point2, Similarity2, Vector2};

use super::render::{RenderGeometry, Vertex};
use crate::config::Settings;

/// Maps overlay vertices, in meters, onto the chart canvas in pixels.
///
/// Screen y grows downwards. A buffer line at bearing 0 lies along +x, so
/// the image is turned a quarter back to put north (or the bow) up.
#[derive(Debug, Clone)]
pub struct ViewportTransform {
    similarity: Similarity2<f64>,
}

impl ViewportTransform {
    pub fn new(
        center: Point2<f64>,
        pixels_per_meter: f64,
        rotation_deg: f64,
        range_calibration: f64,
    ) -> Self {
        let similarity = Similarity2::new(
            Vector2::new(center.x, center.y),
            (rotation_deg - 90.).to_radians(),
            pixels_per_meter * range_calibration,
        );
        ViewportTransform { similarity }
    }

    /// `viewport_rotation_deg` is how far the chart itself is turned.
    pub fn from_settings(
        settings: &Settings,
        center: Point2<f64>,
        pixels_per_meter: f64,
        viewport_rotation_deg: f64,
    ) -> Self {
        // Head up lines are already turned to the bow
        let rotation_deg = if settings.display_mode.is_head_up() {
            0.
        } else {
            viewport_rotation_deg + settings.heading_correction
        };
        ViewportTransform::new(
            center,
            pixels_per_meter,
            rotation_deg,
            settings.range_calibration,
        )
    }

    pub fn to_screen(&self, vertex: &Vertex) -> Point2<f64> {
        self.similarity
            .transform_point(&Point2::new(vertex.x as f64, vertex.y as f64))
    }

    pub fn geometry_to_screen(&self, geometry: &RenderGeometry) -> Vec<Point2<f32>> {
        geometry
            .vertices
            .iter()
            .map(|v| {
                let p = self.to_screen(v);
                Point2::new(p.x as f32, p.y as f32)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplayMode;
    use crate::radar::render::BlobColor;

    fn vertex(x: f32, y: f32) -> Vertex {
        Vertex {
            x,
            y,
            color: BlobColor::Red.color(),
            alpha: 255,
        }
    }

    fn close(p: Point2<f64>, x: f64, y: f64) -> bool {
        (p.x - x).abs() < 1e-6 && (p.y - y).abs() < 1e-6
    }

    #[test]
    fn north_is_up() {
        let t = ViewportTransform::new(Point2::new(400., 300.), 0.5, 0., 1.);
        // 100 m north
        assert!(close(t.to_screen(&vertex(100., 0.)), 400., 250.));
        // 100 m east
        assert!(close(t.to_screen(&vertex(0., 100.)), 450., 300.));
    }

    #[test]
    fn rotation_and_calibration() {
        let settings = Settings {
            heading_correction: 90.,
            range_calibration: 2.,
            ..Settings::default()
        };
        let t = ViewportTransform::from_settings(&settings, Point2::new(0., 0.), 1., 0.);
        // Turned a quarter clockwise: north ends up east, twice as far
        assert!(close(t.to_screen(&vertex(10., 0.)), 20., 0.));
    }

    #[test]
    fn head_up_keeps_calibration() {
        let settings = Settings {
            display_mode: DisplayMode::Standalone,
            heading_correction: 90.,
            range_calibration: 1.5,
            ..Settings::default()
        };
        let t = ViewportTransform::from_settings(&settings, Point2::new(0., 0.), 1., 45.);
        // Bow stays up whatever the chart does, but the scale is still calibrated
        assert!(close(t.to_screen(&vertex(10., 0.)), 0., -15.));
    }
}
