use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::{DurationSeconds, serde_as};
use std::error::Error;
use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use crate::radar::RadarError;
use crate::radar::guard::GuardZone;
use crate::radar::range::RangeUnits;
use crate::radar::render::MAX_TRANSPARENCY;

pub fn get_project_dirs() -> Option<ProjectDirs> {
    directories::ProjectDirs::from("net", "br24radar", "br24radar")
}

/// Color ladder used to classify intensities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DisplayOption {
    #[default]
    Monocolor = 0,
    MultiColor = 1,
    MultiColorWide = 2,
}

impl DisplayOption {
    /// Intensities at or below this never get a color.
    pub const TARGET_THRESHOLD: u8 = 50;

    /// Weakest intensity that still gets a color. The ladders differ only in
    /// their upper steps, so every option shares the same floor.
    pub fn target_threshold(&self) -> u8 {
        Self::TARGET_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum DisplayMode {
    /// Stabilized overlay on top of the chart
    #[default]
    Overlay = 0,
    /// Head up scope on a black background
    Standalone = 1,
    /// Intensity histogram
    Spectrum = 2,
}

impl DisplayMode {
    pub fn is_head_up(&self) -> bool {
        *self == DisplayMode::Standalone
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UnitSettings {
    pub auto_range: bool,
    pub guard_zones: [GuardZone; 2],
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub range_units: RangeUnits,
    pub display_option: DisplayOption,
    pub display_mode: DisplayMode,
    pub transparency: u8,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_scan_age: Duration,
    pub heading_correction: f64,
    pub range_calibration: f64,
    pub refresh_rate: u8,
    pub dual_radar: bool,
    pub master_mode: bool,
    pub multi_sweep_filter: bool,
    pub guard_alarm_threshold: u32,
    pub units: [UnitSettings; 2],
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            range_units: RangeUnits::NauticalMiles,
            display_option: DisplayOption::Monocolor,
            display_mode: DisplayMode::Overlay,
            transparency: 5,
            max_scan_age: Duration::from_secs(6),
            heading_correction: 0.,
            range_calibration: 1.,
            refresh_rate: 1,
            dual_radar: false,
            master_mode: false,
            multi_sweep_filter: false,
            guard_alarm_threshold: 0,
            units: Default::default(),
        }
    }
}

const MAX_REFRESH_RATE: u8 = 5;
const MAX_SCAN_AGE: Duration = Duration::from_secs(60);

impl Settings {
    /// Bring values from an edited or older settings file back within limits.
    pub fn clamp(&mut self) {
        if self.transparency >= MAX_TRANSPARENCY {
            warn!(
                "transparency {} out of range, using {}",
                self.transparency,
                MAX_TRANSPARENCY - 1
            );
            self.transparency = MAX_TRANSPARENCY - 1;
        }
        if self.refresh_rate < 1 || self.refresh_rate > MAX_REFRESH_RATE {
            let r = self.refresh_rate.clamp(1, MAX_REFRESH_RATE);
            warn!("refresh rate {} out of range, using {}", self.refresh_rate, r);
            self.refresh_rate = r;
        }
        if self.max_scan_age.is_zero() || self.max_scan_age > MAX_SCAN_AGE {
            let d = self.max_scan_age.clamp(Duration::from_secs(1), MAX_SCAN_AGE);
            warn!("max scan age {:?} out of range, using {:?}", self.max_scan_age, d);
            self.max_scan_age = d;
        }
        if !self.heading_correction.is_finite() || self.heading_correction.abs() > 180. {
            let h = if self.heading_correction.is_finite() {
                (self.heading_correction + 180.).rem_euclid(360.) - 180.
            } else {
                0.
            };
            warn!(
                "heading correction {} out of range, using {}",
                self.heading_correction, h
            );
            self.heading_correction = h;
        }
        if !self.range_calibration.is_finite()
            || self.range_calibration < 0.5
            || self.range_calibration > 2.
        {
            let c = if self.range_calibration.is_finite() {
                self.range_calibration.clamp(0.5, 2.)
            } else {
                1.
            };
            warn!(
                "range calibration {} out of range, using {}",
                self.range_calibration, c
            );
            self.range_calibration = c;
        }
        for unit in self.units.iter_mut() {
            for zone in unit.guard_zones.iter_mut() {
                zone.clamp();
            }
        }
    }

    pub fn refresh_interval(&self, tick: Duration) -> Duration {
        tick / self.refresh_rate.max(1) as u32
    }
}

#[derive(Debug, Clone)]
pub struct Persistence {
    pub settings: Settings,
    path: PathBuf,
}

impl Persistence {
    /// Load settings from `path`, or from `settings.json` in the platform
    /// config directory.
    pub fn new(path: Option<PathBuf>) -> Result<Self, RadarError> {
        let path = match path {
            Some(p) => p,
            None => {
                let project_dirs = get_project_dirs()
                    .ok_or(RadarError::Config("Cannot find project directories".into()))?;
                let mut settings_path = project_dirs.config_dir().to_owned();
                fs::create_dir_all(&settings_path).map_err(|e| {
                    RadarError::Config(format!(
                        "Cannot create settings directory '{}': {}",
                        settings_path.display(),
                        e
                    ))
                })?;
                settings_path.push("settings.json");
                settings_path
            }
        };

        let mut this = Persistence {
            settings: Settings::default(),
            path,
        };

        this.load();
        debug!("persistence loaded: {:?}", this);

        Ok(this)
    }

    fn load(&mut self) {
        let file = match File::open(&self.path) {
            Err(e) => {
                warn!(
                    "no config '{}' yet; starting fresh: {}",
                    &self.path.display(),
                    e
                );

                self.save();
                return;
            }
            Ok(f) => f,
        };

        let reader = BufReader::new(file);

        match serde_json::from_reader::<_, Settings>(reader) {
            Ok(mut settings) => {
                settings.clamp();
                self.settings = settings;
                info!("Loaded config from '{}'", &self.path.display());
            }
            Err(e) => {
                warn!(
                    "Config '{}' corrupted; starting fresh: {}",
                    &self.path.display(),
                    e
                );
            }
        };
    }

    fn saver(&self) -> Result<(), Box<dyn Error>> {
        let file = File::create(&self.path)?;

        let mut writer = BufWriter::new(&file);

        serde_json::to_writer_pretty(writer.by_ref(), &self.settings)?;
        writeln!(writer)?;
        writer.flush()?;

        info!("Written config file '{}'", &self.path.display());
        Ok(())
    }

    fn save(&self) {
        if let Err(e) = self.saver() {
            warn!("cannot store config '{}': {}", &self.path.display(), e);
        }
    }

    /// Write `settings` to disk if they differ from what is stored.
    pub fn store(&mut self, settings: &Settings) {
        if self.settings != *settings {
            self.settings = settings.clone();
            self.save();
        }
    }
}
