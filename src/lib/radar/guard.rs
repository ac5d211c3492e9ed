//! Guard zones: count the returns inside an arc or ring around the radar.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::time::Duration;

use super::scan::{BearingLineView, ScanBuffer};
use super::transform::{degrees_to_raw, mod_degrees, mod_raw, radius_step_to_meters};
use super::{RETURNS_PER_LINE, RadarError, RadarUnit, SPOKES, Timestamp};
use crate::config::DisplayOption;

pub const GUARD_ZONES: usize = 2;

// An alarm re-arms once its zone has been quiet this long
pub const ALARM_SILENCE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum GuardZoneType {
    #[default]
    Off = 0,
    Arc = 1,
    Circle = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardZone {
    #[serde(rename = "type")]
    pub zone_type: GuardZoneType,
    pub inner_range_meters: f64,
    pub outer_range_meters: f64,
    /// Relative to the bow, clockwise
    pub start_bearing_deg: f64,
    pub end_bearing_deg: f64,
    pub multi_sweep_filter: bool,
}

impl GuardZone {
    pub fn clamp(&mut self) {
        let finite_or_zero = |v: f64| if v.is_finite() { v } else { 0. };

        self.inner_range_meters = finite_or_zero(self.inner_range_meters).max(0.);
        self.outer_range_meters = finite_or_zero(self.outer_range_meters).max(0.);
        if self.inner_range_meters > self.outer_range_meters {
            log::warn!(
                "guard zone inner range {} beyond outer range {}, swapped",
                self.inner_range_meters,
                self.outer_range_meters
            );
            std::mem::swap(&mut self.inner_range_meters, &mut self.outer_range_meters);
        }
        self.start_bearing_deg = mod_degrees(finite_or_zero(self.start_bearing_deg));
        self.end_bearing_deg = mod_degrees(finite_or_zero(self.end_bearing_deg));
    }

    /// Buffer lines `[begin, end)` covered by this zone, `end` possibly past
    /// `SPOKES` when the arc crosses north. `None` for a zone that is off.
    pub fn bearing_span(&self, heading_deg: f64) -> Option<(usize, usize)> {
        match self.zone_type {
            GuardZoneType::Off => None,
            GuardZoneType::Circle => Some((0, SPOKES)),
            GuardZoneType::Arc => {
                let begin = mod_raw(degrees_to_raw(self.start_bearing_deg + heading_deg)) as usize;
                let mut end = mod_raw(degrees_to_raw(self.end_bearing_deg + heading_deg)) as usize;
                if begin > end {
                    end += SPOKES;
                }
                Some((begin, end))
            }
        }
    }
}

pub struct GuardZoneEngine {
    threshold: u8,
    max_age_ms: Option<u64>,
}

impl GuardZoneEngine {
    /// `max_age` excludes lines that were not refreshed recently.
    pub fn new(display_option: DisplayOption, max_age: Option<Duration>) -> Self {
        GuardZoneEngine {
            threshold: display_option.target_threshold(),
            max_age_ms: max_age.map(|d| d.as_millis() as u64),
        }
    }

    /// Count the bogeys in both zones of `unit`. `reference_heading_deg` is the
    /// heading the buffer was stabilized with, zero for a head up buffer.
    pub fn scan(
        &self,
        unit: RadarUnit,
        zones: &[GuardZone; GUARD_ZONES],
        buffer: &ScanBuffer,
        reference_heading_deg: f64,
        now: Timestamp,
    ) -> Result<[u32; GUARD_ZONES], RadarError> {
        let mut bogeys = [0u32; GUARD_ZONES];
        let mut line = BearingLineView::new();

        for (z, zone) in zones.iter().enumerate() {
            let Some((begin, end)) = zone.bearing_span(reference_heading_deg) else {
                continue;
            };
            for bearing in begin..end {
                if !buffer.read_into(unit, mod_raw(bearing as i32), &mut line)? {
                    continue;
                }
                if let Some(max_age) = self.max_age_ms {
                    if line.is_stale(now, max_age) {
                        continue;
                    }
                }
                bogeys[z] += self.count_line(zone, &line);
            }
            if bogeys[z] > 0 {
                log::trace!("{}: guard zone {} has {} bogeys", unit, z + 1, bogeys[z]);
            }
        }
        Ok(bogeys)
    }

    fn count_line(&self, zone: &GuardZone, line: &BearingLineView) -> u32 {
        if line.range_meters == 0 {
            return 0;
        }
        // The last slot is the max range marker
        (0..RETURNS_PER_LINE - 1)
            .filter(|r| {
                let meters = radius_step_to_meters(*r, line.range_meters);
                meters >= zone.inner_range_meters && meters < zone.outer_range_meters
            })
            .filter(|r| {
                if zone.multi_sweep_filter {
                    line.history(*r).is_persistent()
                } else {
                    line.samples[*r] > self.threshold
                }
            })
            .count() as u32
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AlarmState {
    latched: bool,
    acknowledged: bool,
    last_intrusion: Option<Timestamp>,
}

/// Turns bogey counts into intrusion events.
#[derive(Debug, Clone, Default)]
pub struct GuardAlarm {
    zones: [AlarmState; GUARD_ZONES],
}

impl GuardAlarm {
    pub fn new() -> Self {
        GuardAlarm::default()
    }

    /// Returns per zone whether a new intrusion alarm starts now.
    pub fn update(
        &mut self,
        bogeys: &[u32; GUARD_ZONES],
        threshold: u32,
        now: Timestamp,
    ) -> [bool; GUARD_ZONES] {
        let mut fired = [false; GUARD_ZONES];
        for (z, state) in self.zones.iter_mut().enumerate() {
            if bogeys[z] > threshold {
                state.last_intrusion = Some(now);
                if !state.latched {
                    state.latched = true;
                    state.acknowledged = false;
                    fired[z] = true;
                }
            } else if state.latched {
                let quiet = state
                    .last_intrusion
                    .is_none_or(|t| now.saturating_sub(t) >= ALARM_SILENCE.as_millis() as u64);
                if quiet {
                    state.latched = false;
                    state.acknowledged = false;
                }
            }
        }
        fired
    }

    pub fn acknowledge(&mut self, zone: usize) -> Result<(), RadarError> {
        let state = self
            .zones
            .get_mut(zone)
            .ok_or(RadarError::NoSuchGuardZone(zone))?;
        state.acknowledged = true;
        Ok(())
    }

    /// The zone alarm went off and nobody acknowledged it yet.
    pub fn is_sounding(&self, zone: usize) -> bool {
        self.zones
            .get(zone)
            .is_some_and(|s| s.latched && !s.acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arc(start: f64, end: f64, inner: f64, outer: f64) -> GuardZone {
        GuardZone {
            zone_type: GuardZoneType::Arc,
            inner_range_meters: inner,
            outer_range_meters: outer,
            start_bearing_deg: start,
            end_bearing_deg: end,
            multi_sweep_filter: false,
        }
    }

    #[test]
    fn arc_across_north() {
        let zone = arc(350., 10., 0., 1000.);
        let (begin, end) = zone.bearing_span(0.).unwrap();
        assert_eq!(begin, 1991);
        assert_eq!(end, 2105);
        // 20 degrees worth of lines
        assert_eq!(end - begin, (20. * SPOKES as f64 / 360.).round() as usize);

        // Heading moves the arc
        let (begin, end) = zone.bearing_span(90.).unwrap();
        assert_eq!(begin, 455);
        assert_eq!(end, 569);

        let circle = GuardZone {
            zone_type: GuardZoneType::Circle,
            ..zone
        };
        assert_eq!(circle.bearing_span(123.), Some((0, SPOKES)));
        assert_eq!(GuardZone::default().bearing_span(0.), None);
    }

    #[test]
    fn clamp_repairs_zone() {
        let mut zone = arc(-10., 370., 900., 100.);
        zone.clamp();
        assert_eq!(zone.start_bearing_deg, 350.);
        assert_eq!(zone.end_bearing_deg, 10.);
        assert_eq!(zone.inner_range_meters, 100.);
        assert_eq!(zone.outer_range_meters, 900.);
    }

    fn line_with_target(radius: usize, value: u8) -> [u8; RETURNS_PER_LINE] {
        let mut samples = [0u8; RETURNS_PER_LINE];
        samples[radius] = value;
        samples[RETURNS_PER_LINE - 1] = 0xff;
        samples
    }

    #[test]
    fn counts_targets_inside_zone() {
        let buffer = ScanBuffer::new(1);
        buffer.set_history_threshold(50);
        let engine = GuardZoneEngine::new(DisplayOption::Monocolor, None);

        // 1024 m range: one radius step is 2 m. Target at 200 m on bearing 0.
        let samples = line_with_target(100, 200);
        buffer.write(RadarUnit::A, 0, &samples, 1024, 10).unwrap();
        // Target at 200 m due south, outside the arc
        buffer.write(RadarUnit::A, 1024, &samples, 1024, 10).unwrap();
        // Weak return, below the threshold
        let weak = line_with_target(100, 40);
        buffer.write(RadarUnit::A, 5, &weak, 1024, 10).unwrap();

        let zones = [
            arc(350., 10., 100., 300.),
            GuardZone {
                zone_type: GuardZoneType::Circle,
                ..arc(0., 0., 0., 200.)
            },
        ];
        let bogeys = engine.scan(RadarUnit::A, &zones, &buffer, 0., 20).unwrap();
        // The ring ends at 200 m exclusive, so the 200 m returns are not in it
        assert_eq!(bogeys, [1, 0]);

        let zones = [
            arc(350., 10., 100., 300.),
            GuardZone {
                zone_type: GuardZoneType::Circle,
                ..arc(0., 0., 0., 201.)
            },
        ];
        let bogeys = engine.scan(RadarUnit::A, &zones, &buffer, 0., 20).unwrap();
        assert_eq!(bogeys, [1, 2]);

        // With a heading of 180 the stabilized arc points south
        let bogeys = engine
            .scan(RadarUnit::A, &zones, &buffer, 180., 20)
            .unwrap();
        assert_eq!(bogeys[0], 1);
    }

    #[test]
    fn multi_sweep_filter_needs_two_sweeps() {
        let buffer = ScanBuffer::new(1);
        buffer.set_history_threshold(50);
        let engine = GuardZoneEngine::new(DisplayOption::Monocolor, None);
        let mut zone = arc(0., 10., 0., 1000.);
        zone.multi_sweep_filter = true;
        let zones = [zone, GuardZone::default()];

        let samples = line_with_target(10, 200);
        buffer.write(RadarUnit::A, 3, &samples, 1000, 10).unwrap();
        assert_eq!(
            engine.scan(RadarUnit::A, &zones, &buffer, 0., 10).unwrap(),
            [0, 0]
        );

        buffer.write(RadarUnit::A, 3, &samples, 1000, 20).unwrap();
        assert_eq!(
            engine.scan(RadarUnit::A, &zones, &buffer, 0., 20).unwrap(),
            [1, 0]
        );
    }

    #[test]
    fn stale_lines_are_ignored() {
        let buffer = ScanBuffer::new(1);
        let engine = GuardZoneEngine::new(DisplayOption::Monocolor, Some(Duration::from_secs(6)));
        let zones = [arc(0., 10., 0., 1000.), GuardZone::default()];

        buffer
            .write(RadarUnit::A, 3, &line_with_target(10, 200), 1000, 1_000)
            .unwrap();
        assert_eq!(
            engine.scan(RadarUnit::A, &zones, &buffer, 0., 2_000).unwrap(),
            [1, 0]
        );
        assert_eq!(
            engine.scan(RadarUnit::A, &zones, &buffer, 0., 10_000).unwrap(),
            [0, 0]
        );
    }

    #[test]
    fn alarm_latches_and_rearms() {
        let mut alarm = GuardAlarm::new();

        assert_eq!(alarm.update(&[3, 0], 2, 0), [true, false]);
        assert!(alarm.is_sounding(0));
        assert_eq!(alarm.update(&[5, 0], 2, 1_000), [false, false]);

        alarm.acknowledge(0).unwrap();
        assert!(!alarm.is_sounding(0));

        // Quiet, but not for long enough
        assert_eq!(alarm.update(&[0, 0], 2, 5_000), [false, false]);
        assert_eq!(alarm.update(&[3, 0], 2, 6_000), [false, false]);

        // Ten seconds of silence re-arms the zone
        assert_eq!(alarm.update(&[0, 0], 2, 16_000), [false, false]);
        assert_eq!(alarm.update(&[3, 0], 2, 17_000), [true, false]);
        assert!(alarm.is_sounding(0));

        assert!(matches!(
            alarm.acknowledge(2),
            Err(RadarError::NoSuchGuardZone(2))
        ));
    }
}
