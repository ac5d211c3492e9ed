use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::Session;
use crate::radar::controls::{ControlType, ControlValue};
use crate::radar::guard::GuardZoneEngine;
use crate::radar::range::AutoRange;
use crate::radar::{RadarError, RadarUnit};
use crate::session::RadarEvent;

/// The once a second housekeeping: watchdogs, statistics, guard zones,
/// auto range and screen refresh.
pub struct Ticker {
    session: Session,
    interval: Duration,
    auto_range: [AutoRange; 2],
    ticks: u64,
}

impl Ticker {
    pub fn new(session: Session, interval: Duration) -> Self {
        Ticker {
            session,
            interval,
            auto_range: Default::default(),
            ticks: 0,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        let settings = self.session.settings();
        let mut refresh = interval(settings.refresh_interval(self.interval));
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::debug!("ticker shutdown");
                    return Ok(());
                },
                _ = tick.tick() => {
                    self.tick().await;

                    let period = self.session.settings().refresh_interval(self.interval);
                    if period != refresh.period() {
                        refresh = interval(period);
                        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                },
                _ = refresh.tick() => {
                    let now = self.session.system().now();
                    self.session.request_refresh(now);
                },
            }
        }
    }

    pub async fn tick(&mut self) {
        self.ticks += 1;
        let system = self.session.system();
        let units: Vec<RadarUnit> = system.units().collect();

        for unit in units {
            if let Err(e) = self.tick_unit(unit).await {
                log::warn!("{}: tick failed: {}", unit, e);
            }
        }
    }

    async fn tick_unit(&mut self, unit: RadarUnit) -> Result<(), RadarError> {
        let system = self.session.system();
        let settings = self.session.settings();
        let now = system.now();

        let (before, after, scanner_on) = {
            let mut state = system.unit(unit)?;
            let before = state.link;
            state.tick(now);
            (before, state.link, state.scanner_on)
        };
        if before != after {
            self.session
                .publish(RadarEvent::StateChanged { unit, link: after });
        }

        // Zones are relative to the bow, the buffer is stabilized with the heading
        let reference_heading = if settings.display_mode.is_head_up() {
            0.
        } else {
            system
                .navigation
                .heading(now)
                .map(|(h, _)| h)
                .unwrap_or(0.)
        };
        let engine = GuardZoneEngine::new(settings.display_option, Some(settings.max_scan_age));
        let unit_settings = &settings.units[unit.index()];
        let bogeys = engine.scan(
            unit,
            &unit_settings.guard_zones,
            &system.scan,
            reference_heading,
            now,
        )?;
        self.session
            .update_guard_zones(unit, bogeys, settings.guard_alarm_threshold, now)?;

        if unit_settings.auto_range && settings.master_mode && scanner_on {
            if let Some(wanted) = self.session.viewport_range(unit) {
                if let Some(range) = self.auto_range[unit.index()].update(wanted, settings.range_units)
                {
                    log::info!("{}: auto range {}", unit, range);
                    let cv = ControlValue::new(ControlType::Range, range.distance() as f64);
                    if let Err(e) = self.session.set_control_value(unit, cv).await {
                        log::warn!("{}: cannot set auto range {}: {}", unit, range, e);
                    }
                }
            }
        }
        Ok(())
    }
}
