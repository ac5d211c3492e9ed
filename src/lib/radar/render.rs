//! Overlay geometry: runs of equally colored samples become quads.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::scan::{BearingLineView, ScanBuffer, SweepHistory};
use super::transform::{PolarToCartesianLookup, mod_raw};
use super::{RETURNS_PER_LINE, RadarError, RadarUnit, SPOKES, SpokeBearing, Timestamp};
use crate::config::{DisplayOption, Settings};

pub const MAX_TRANSPARENCY: u8 = 10;

// Runs beyond this on a single line are not drawn
pub const MAX_BLOBS_PER_LINE: usize = 100;

// A refresh is pointless when the host stopped sending positions
pub const POSITION_UPDATE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BlobColor {
    None,
    Blue,
    Green,
    Red,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BlobColor {
    pub fn color(&self) -> Color {
        match self {
            BlobColor::None => Color { r: 0, g: 0, b: 0 },
            BlobColor::Blue => Color { r: 0, g: 0, b: 255 },
            BlobColor::Green => Color { r: 0, g: 255, b: 0 },
            BlobColor::Red => Color { r: 255, g: 0, b: 0 },
        }
    }
}

pub fn classify(display_option: DisplayOption, intensity: u8) -> BlobColor {
    match display_option {
        DisplayOption::Monocolor => {
            if intensity > DisplayOption::TARGET_THRESHOLD {
                BlobColor::Red
            } else {
                BlobColor::None
            }
        }
        DisplayOption::MultiColor | DisplayOption::MultiColorWide => {
            let red = if display_option == DisplayOption::MultiColor {
                200
            } else {
                175
            };
            if intensity > red {
                BlobColor::Red
            } else if intensity > 100 {
                BlobColor::Green
            } else if intensity > DisplayOption::TARGET_THRESHOLD {
                BlobColor::Blue
            } else {
                BlobColor::None
            }
        }
    }
}

/// A run of samples `[start_radius, end_radius)` with one color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub start_radius: u16,
    pub end_radius: u16,
    pub color: Color,
    pub alpha: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub color: Color,
    pub alpha: u8,
}

/// Triangles for one rotation, in meters from the radar. Bearing 0 of the
/// buffer (north, or the bow when head up) lies along +x and bearing 90 along
/// +y; the viewport turns this onto the screen.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderGeometry {
    pub vertices: Vec<Vertex>,
    pub lines: usize,
    pub max_range_meters: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct Spectrum {
    /// Samples per intensity value, index 0 holds the total
    pub counts: Vec<u64>,
}

impl Spectrum {
    /// Share of all counted samples with this intensity, in percent.
    pub fn percentage(&self, intensity: u8) -> u64 {
        match self.counts[0] {
            0 => 0,
            total => self.counts[intensity as usize] * 100 / total,
        }
    }
}

pub struct RenderGeometryBuilder {
    lookup: PolarToCartesianLookup,
    display_option: DisplayOption,
    transparency: u8,
    multi_sweep_filter: bool,
    max_age_ms: u64,
}

impl RenderGeometryBuilder {
    pub fn new(settings: &Settings) -> Self {
        let mut builder = RenderGeometryBuilder {
            lookup: PolarToCartesianLookup::new(),
            display_option: DisplayOption::default(),
            transparency: 0,
            multi_sweep_filter: false,
            max_age_ms: 0,
        };
        builder.update_settings(settings);
        builder
    }

    pub fn update_settings(&mut self, settings: &Settings) {
        self.display_option = settings.display_option;
        self.transparency = settings.transparency.min(MAX_TRANSPARENCY);
        self.multi_sweep_filter = settings.multi_sweep_filter;
        self.max_age_ms = settings.max_scan_age.as_millis() as u64;
    }

    fn alpha(&self, peak: u8) -> u8 {
        (peak as u32 * (MAX_TRANSPARENCY - self.transparency) as u32 / MAX_TRANSPARENCY as u32)
            as u8
    }

    /// Split a line in colored runs.
    pub fn blobs_for_line(&self, line: &BearingLineView) -> Vec<Blob> {
        let mut blobs = Vec::new();
        let mut run_start = 0;
        let mut run_color = BlobColor::None;
        let mut run_peak = 0u8;

        // One step past the end flushes the last run
        for r in 0..=RETURNS_PER_LINE {
            let (color, intensity) = if r < RETURNS_PER_LINE {
                let s = line.samples[r];
                let c = if self.multi_sweep_filter
                    && !SweepHistory::from_bits_truncate(line.history[r]).is_persistent()
                {
                    BlobColor::None
                } else {
                    classify(self.display_option, s)
                };
                (c, s)
            } else {
                (BlobColor::None, 0)
            };

            if color != run_color {
                if run_color != BlobColor::None {
                    if blobs.len() == MAX_BLOBS_PER_LINE {
                        break;
                    }
                    blobs.push(Blob {
                        start_radius: run_start as u16,
                        end_radius: r as u16,
                        color: run_color.color(),
                        alpha: self.alpha(run_peak),
                    });
                }
                run_start = r;
                run_color = color;
                run_peak = 0;
            }
            run_peak = run_peak.max(intensity);
        }
        blobs
    }

    /// Blobs of one buffered line, empty when the line is missing or stale.
    pub fn build_bearing_line(
        &self,
        buffer: &ScanBuffer,
        unit: RadarUnit,
        bearing: SpokeBearing,
        now: Timestamp,
    ) -> Result<Vec<Blob>, RadarError> {
        let mut line = BearingLineView::new();
        if !buffer.read_into(unit, bearing, &mut line)? || line.is_stale(now, self.max_age_ms) {
            return Ok(Vec::new());
        }
        Ok(self.blobs_for_line(&line))
    }

    /// Two triangles per blob, scaled from radius steps to meters.
    pub fn build_quads(
        &self,
        bearing: SpokeBearing,
        blobs: &[Blob],
        range_meters: u32,
        vertices: &mut Vec<Vertex>,
    ) {
        let b1 = mod_raw(bearing as i32) as usize;
        let b2 = b1 + 1;
        let scale = range_meters as f32 / RETURNS_PER_LINE as f32;

        for blob in blobs {
            let r1 = blob.start_radius as usize;
            let r2 = blob.end_radius as usize;
            let mut push = |arc: usize, radius: usize| {
                let p = self.lookup.polar_to_cartesian(arc, radius);
                vertices.push(Vertex {
                    x: p.x * scale,
                    y: p.y * scale,
                    color: blob.color,
                    alpha: blob.alpha,
                });
            };
            push(b1, r1);
            push(b1, r2);
            push(b2, r1);

            push(b2, r2);
            push(b2, r1);
            push(b1, r2);
        }
    }

    /// Geometry for all fresh lines of `unit`.
    pub fn build(
        &self,
        buffer: &ScanBuffer,
        unit: RadarUnit,
        now: Timestamp,
    ) -> Result<RenderGeometry, RadarError> {
        let mut geometry = RenderGeometry::default();
        let mut line = BearingLineView::new();

        for bearing in 0..SPOKES as SpokeBearing {
            if !buffer.read_into(unit, bearing, &mut line)? || line.is_stale(now, self.max_age_ms)
            {
                continue;
            }
            geometry.lines += 1;
            geometry.max_range_meters = geometry.max_range_meters.max(line.range_meters);

            let blobs = self.blobs_for_line(&line);
            self.build_quads(bearing, &blobs, line.range_meters, &mut geometry.vertices);
        }
        log::trace!(
            "{}: {} lines, {} vertices",
            unit,
            geometry.lines,
            geometry.vertices.len()
        );
        Ok(geometry)
    }

    /// Histogram of intensities 1..254 over the fresh lines.
    pub fn spectrum(
        &self,
        buffer: &ScanBuffer,
        unit: RadarUnit,
        now: Timestamp,
    ) -> Result<Spectrum, RadarError> {
        let mut counts = vec![0u64; 256];
        let mut line = BearingLineView::new();

        for bearing in 0..SPOKES as SpokeBearing {
            if !buffer.read_into(unit, bearing, &mut line)?
                || line.range_meters == 0
                || line.is_stale(now, self.max_age_ms)
            {
                continue;
            }
            for s in &line.samples[1..RETURNS_PER_LINE - 2] {
                if *s > 0 && *s < 255 {
                    counts[0] += 1;
                    counts[*s as usize] += 1;
                }
            }
        }
        Ok(Spectrum { counts })
    }
}

/// Keeps at most one refresh queued.
#[derive(Debug, Default)]
pub struct RefreshThrottle {
    pending: AtomicBool,
}

impl RefreshThrottle {
    pub fn new() -> Self {
        RefreshThrottle::default()
    }

    /// Returns true when the caller should ask for a refresh.
    /// `position_age` is how long ago the host last sent a position.
    pub fn request(&self, position_age: Option<Duration>) -> bool {
        if position_age.is_some_and(|age| age > POSITION_UPDATE_TIMEOUT) {
            log::trace!("refresh skipped, no recent position update");
            return false;
        }
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// The refresh was drawn.
    pub fn done(&self) {
        self.pending.store(false, Ordering::Release);
    }
}
