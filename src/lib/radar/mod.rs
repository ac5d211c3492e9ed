use enum_primitive_derive::Primitive;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use strum::{Display, EnumIter};
use thiserror::Error;

pub mod controls;
pub mod guard;
pub mod range;
pub mod render;
pub mod scan;
pub mod transform;
pub mod viewport;

use crate::config::Settings;
use crate::navdata::NavigationData;
use controls::RadarControls;
use controls::ControlType;
use scan::ScanBuffer;

pub const NAUTICAL_MILE: i32 = 1852; // 1 nautical mile in meters
pub const NAUTICAL_MILE_F64: f64 = 1852.; // 1 nautical mile in meters

// Bearing lines in the scan buffer per rotation. The wire uses twice as many.
pub const SPOKES: usize = 2048;
pub const SPOKES_RAW: u16 = 4096;

// Intensity samples per bearing line
pub const RETURNS_PER_LINE: usize = 512;

// A "native to radar" bearing, in buffer units [0..2048>
pub type SpokeBearing = u16;

// Milliseconds since the start of the session, see RadarSystemState::now()
pub type Timestamp = u64;

#[derive(Error, Debug)]
pub enum RadarError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),
    #[error("Timeout")]
    Timeout,
    #[error("Shutdown")]
    Shutdown,
    #[error("Cannot set value for control '{0}'")]
    CannotSetControlType(ControlType),
    #[error("Cannot set control '{0}' to value {1}")]
    CannotSetControlTypeValue(ControlType, f64),
    #[error("No such radar '{0}'")]
    NoSuchRadar(RadarUnit),
    #[error("No such guard zone {0}")]
    NoSuchGuardZone(usize),
    #[error("Not in master mode, commands are not sent")]
    NotMaster,
    #[error("No command channel to radar '{0}'")]
    NotConnected(RadarUnit),
    #[error("Cannot parse NMEA0183 '{0}'")]
    ParseNmea0183(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Radar unit within one scanner. Only 4G scanners have a second (B) unit.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, Serialize,
)]
pub enum RadarUnit {
    A = 0,
    B = 1,
}

impl RadarUnit {
    pub fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub packets: u32,
    pub broken_packets: u32,
    pub spokes: u32,
    pub broken_spokes: u32,
    pub missing_spokes: u32,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics::default()
    }

    pub fn add(&mut self, other: &Statistics) {
        self.packets += other.packets;
        self.broken_packets += other.broken_packets;
        self.spokes += other.spokes;
        self.broken_spokes += other.broken_spokes;
        self.missing_spokes += other.missing_spokes;
    }

    pub fn is_empty(&self) -> bool {
        *self == Statistics::default()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "packets {} broken {} spokes {} broken {} missing {}",
            self.packets, self.broken_packets, self.spokes, self.broken_spokes, self.missing_spokes
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Primitive, Serialize)]
pub enum Power {
    Off = 0,
    Standby = 1,
    Transmit = 2,
    Preparing = 5,
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, Serialize)]
pub enum LinkState {
    Off,
    Seen,
    Active,
}

// No report within this time means the radar is gone
pub const REPORT_WATCHDOG: Duration = Duration::from_secs(20);
// No spokes within this time means the radar stopped transmitting
pub const DATA_WATCHDOG: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RadarState {
    unit: RadarUnit,
    pub link: LinkState,
    pub scanner_on: bool,
    pub last_seen: Option<Timestamp>,
    pub last_data: Option<Timestamp>,
    pub range_meters: u32,
    pub commanded_range_meters: Option<u32>,
    pub auto_range: bool,
    pub controls: RadarControls,
    statistics: Statistics,
    last_statistics: Statistics,
}

impl RadarState {
    pub fn new(unit: RadarUnit) -> Self {
        RadarState {
            unit,
            link: LinkState::Off,
            scanner_on: false,
            last_seen: None,
            last_data: None,
            range_meters: 0,
            commanded_range_meters: None,
            auto_range: false,
            controls: RadarControls::new(),
            statistics: Statistics::new(),
            last_statistics: Statistics::new(),
        }
    }

    pub fn unit(&self) -> RadarUnit {
        self.unit
    }

    /// Something, anything, came from the radar on the report socket.
    pub fn report_seen(&mut self, now: Timestamp) {
        self.last_seen = Some(now);
        if self.link == LinkState::Off {
            self.transition(LinkState::Seen);
        }
    }

    /// Spokes were decoded.
    pub fn data_seen(&mut self, statistics: &Statistics, now: Timestamp) {
        self.statistics.add(statistics);
        if statistics.spokes > 0 {
            self.last_seen = Some(now);
            self.last_data = Some(now);
            if self.link != LinkState::Active {
                self.transition(LinkState::Active);
            }
        }
    }

    /// Run the watchdogs and close the statistics interval. Returns the
    /// statistics of the interval that just ended.
    pub fn tick(&mut self, now: Timestamp) -> Statistics {
        let expired = |t: Option<Timestamp>, d: Duration| match t {
            Some(t) => now.saturating_sub(t) > d.as_millis() as u64,
            None => true,
        };

        let next = if expired(self.last_seen, REPORT_WATCHDOG) {
            LinkState::Off
        } else if expired(self.last_data, DATA_WATCHDOG) {
            LinkState::Seen
        } else {
            LinkState::Active
        };
        if next != self.link {
            self.transition(next);
        }
        self.scanner_on = self.statistics.spokes > 0;

        self.last_statistics = self.statistics;
        self.statistics = Statistics::new();
        if !self.last_statistics.is_empty() {
            log::debug!("{}: {}", self.unit, self.last_statistics);
        }
        self.last_statistics
    }

    pub fn shutdown(&mut self) {
        self.transition(LinkState::Off);
        self.scanner_on = false;
    }

    pub fn statistics(&self) -> Statistics {
        self.last_statistics
    }

    fn transition(&mut self, next: LinkState) {
        if self.link != next {
            log::info!("{}: radar {} -> {}", self.unit, self.link, next);
            self.link = next;
        }
    }
}

/// Everything the decoder, guard zones and rendering share at run time.
pub struct RadarSystemState {
    epoch: Instant,
    pub scan: ScanBuffer,
    pub navigation: NavigationData,
    pub settings: RwLock<Settings>,
    units: Vec<Mutex<RadarState>>,
}

impl RadarSystemState {
    pub fn new(settings: Settings) -> Self {
        let dual = settings.dual_radar;
        let units = if dual {
            vec![
                Mutex::new(RadarState::new(RadarUnit::A)),
                Mutex::new(RadarState::new(RadarUnit::B)),
            ]
        } else {
            vec![Mutex::new(RadarState::new(RadarUnit::A))]
        };
        let scan = ScanBuffer::new(if dual { 2 } else { 1 });
        scan.set_history_threshold(settings.display_option.target_threshold());

        RadarSystemState {
            epoch: Instant::now(),
            scan,
            navigation: NavigationData::new(),
            settings: RwLock::new(settings),
            units,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.epoch.elapsed().as_millis() as Timestamp
    }

    pub fn units(&self) -> impl Iterator<Item = RadarUnit> + '_ {
        use strum::IntoEnumIterator;
        RadarUnit::iter().take(self.units.len())
    }

    pub fn unit(&self, unit: RadarUnit) -> Result<MutexGuard<'_, RadarState>, RadarError> {
        match self.units.get(unit.index()) {
            // A poisoned lock only means a panic elsewhere; the state itself is still usable
            Some(m) => Ok(m.lock().unwrap_or_else(|e| e.into_inner())),
            None => Err(RadarError::NoSuchRadar(unit)),
        }
    }

    /// `NoSuchRadar` unless `unit` is one of the configured radars.
    pub fn ensure_unit(&self, unit: RadarUnit) -> Result<(), RadarError> {
        if unit.index() < self.units.len() {
            Ok(())
        } else {
            Err(RadarError::NoSuchRadar(unit))
        }
    }

    pub fn settings(&self) -> Settings {
        match self.settings.read() {
            Ok(s) => s.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    pub fn update_settings<F: FnOnce(&mut Settings)>(&self, f: F) -> Settings {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        f(&mut settings);
        settings.clamp();
        self.scan
            .set_history_threshold(settings.display_option.target_threshold());
        settings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_follows_watchdogs() {
        let mut state = RadarState::new(RadarUnit::A);
        assert_eq!(state.link, LinkState::Off);

        state.report_seen(1_000);
        assert_eq!(state.link, LinkState::Seen);

        let stats = Statistics {
            packets: 1,
            spokes: 32,
            ..Statistics::default()
        };
        state.data_seen(&stats, 1_500);
        assert_eq!(state.link, LinkState::Active);

        let closed = state.tick(2_000);
        assert_eq!(closed.spokes, 32);
        assert!(state.scanner_on);
        assert_eq!(state.link, LinkState::Active);

        // Data stops, reports continue
        state.report_seen(7_000);
        state.tick(7_000);
        assert_eq!(state.link, LinkState::Seen);
        assert!(!state.scanner_on);

        // Everything stops
        state.tick(7_000 + REPORT_WATCHDOG.as_millis() as u64 + 1);
        assert_eq!(state.link, LinkState::Off);
    }

    #[test]
    fn statistics_reset_every_tick() {
        let mut state = RadarState::new(RadarUnit::B);
        let stats = Statistics {
            packets: 2,
            broken_packets: 1,
            spokes: 64,
            broken_spokes: 2,
            missing_spokes: 3,
        };
        state.data_seen(&stats, 10);
        state.data_seen(&stats, 20);
        let closed = state.tick(30);
        assert_eq!(closed.packets, 4);
        assert_eq!(closed.missing_spokes, 6);
        assert_eq!(state.statistics(), closed);

        let closed = state.tick(40);
        assert!(closed.is_empty());
    }

    #[test]
    fn single_radar_has_no_unit_b() {
        let system = RadarSystemState::new(Settings::default());
        assert!(system.unit(RadarUnit::A).is_ok());
        match system.unit(RadarUnit::B) {
            Err(RadarError::NoSuchRadar(RadarUnit::B)) => {}
            Err(e) => panic!("Error {e}"),
            Ok(_) => panic!("Unit B should not exist"),
        }
        assert_eq!(system.units().count(), 1);
    }
}
