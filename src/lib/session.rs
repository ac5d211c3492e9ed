use nalgebra::Point2;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;

use crate::Cli;
use crate::config::{Persistence, Settings};
use crate::radar::controls::{ControlType, ControlValue};
use crate::radar::guard::{GUARD_ZONES, GuardAlarm, GuardZone};
use crate::radar::render::{RefreshThrottle, RenderGeometry, RenderGeometryBuilder, Spectrum};
use crate::radar::viewport::ViewportTransform;
use crate::radar::{LinkState, RadarError, RadarSystemState, RadarUnit, Statistics, Timestamp};

const EVENT_CHANNEL_SIZE: usize = 64;
const CONTROL_CHANNEL_SIZE: usize = 16;
// How long a caller waits for the radar task to take and send a command
const CONTROL_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// What the session tells anyone who subscribed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RadarEvent {
    #[serde(rename_all = "camelCase")]
    RangeChanged { unit: RadarUnit, range_meters: u32 },
    #[serde(rename_all = "camelCase")]
    Intrusion {
        unit: RadarUnit,
        zone: usize,
        bogeys: u32,
    },
    StateChanged { unit: RadarUnit, link: LinkState },
    Refresh,
}

/// A control change on its way to the radar, with a channel for the outcome.
#[derive(Debug)]
pub struct ControlUpdate {
    pub control_value: ControlValue,
    pub reply_tx: oneshot::Sender<Result<(), RadarError>>,
}

#[derive(Debug, Default)]
struct GuardState {
    bogeys: [u32; GUARD_ZONES],
    alarm: GuardAlarm,
}

pub struct SessionInner {
    pub args: Cli,
    system: Arc<RadarSystemState>,
    events: broadcast::Sender<RadarEvent>,
    control_tx: Vec<mpsc::Sender<ControlUpdate>>,
    control_rx: Mutex<Vec<Option<mpsc::Receiver<ControlUpdate>>>>,
    persistence: Mutex<Persistence>,
    guard: Vec<Mutex<GuardState>>,
    viewport_range: Mutex<[Option<f64>; 2]>,
    throttle: RefreshThrottle,
    renderer: Mutex<RenderGeometryBuilder>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

// A poisoned lock only means a panic elsewhere; the data itself is still usable
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Session {
    pub fn new(args: Cli, persistence: Persistence) -> Self {
        let mut settings = persistence.settings.clone();
        if args.dual_radar {
            settings.dual_radar = true;
        }
        let system = Arc::new(RadarSystemState::new(settings.clone()));
        let units = system.units().count();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (control_tx, control_rx): (Vec<_>, Vec<_>) = (0..units)
            .map(|_| {
                let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
                (tx, Some(rx))
            })
            .unzip();

        Session {
            inner: Arc::new(SessionInner {
                args,
                events,
                control_tx,
                control_rx: Mutex::new(control_rx),
                persistence: Mutex::new(persistence),
                guard: (0..units).map(|_| Mutex::new(GuardState::default())).collect(),
                viewport_range: Mutex::new([None; 2]),
                throttle: RefreshThrottle::new(),
                renderer: Mutex::new(RenderGeometryBuilder::new(&settings)),
                system,
            }),
        }
    }

    pub fn args(&self) -> &Cli {
        &self.inner.args
    }

    pub fn system(&self) -> Arc<RadarSystemState> {
        self.inner.system.clone()
    }

    /// Address of the interface that faces the radar.
    pub fn nic_addr(&self) -> Ipv4Addr {
        self.inner.args.interface.unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    /// The receiving end of the control channel of `unit`, once.
    pub fn take_control_receiver(&self, unit: RadarUnit) -> Option<mpsc::Receiver<ControlUpdate>> {
        lock(&self.inner.control_rx)
            .get_mut(unit.index())
            .and_then(|rx| rx.take())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RadarEvent> {
        self.inner.events.subscribe()
    }

    pub fn publish(&self, event: RadarEvent) {
        log::debug!("event {:?}", event);
        // Nobody listening is fine
        let _ = self.inner.events.send(event);
    }

    pub fn settings(&self) -> Settings {
        self.inner.system.settings()
    }

    /// Change settings, clamp them and write them to disk.
    pub fn update_settings<F: FnOnce(&mut Settings)>(&self, f: F) -> Settings {
        let settings = self.inner.system.update_settings(f);
        lock(&self.inner.renderer).update_settings(&settings);
        lock(&self.inner.persistence).store(&settings);
        settings
    }

    pub fn get_range_meters(&self, unit: RadarUnit) -> Result<u32, RadarError> {
        Ok(self.inner.system.unit(unit)?.range_meters)
    }

    /// Command a fixed range; this turns auto range off.
    pub async fn set_range_meters(&self, unit: RadarUnit, meters: u32) -> Result<(), RadarError> {
        self.set_auto_range(unit, false)?;
        self.set_control_value(unit, ControlValue::new(ControlType::Range, meters as f64))
            .await
    }

    pub fn set_auto_range(&self, unit: RadarUnit, auto_range: bool) -> Result<(), RadarError> {
        self.inner.system.unit(unit)?.auto_range = auto_range;
        self.update_settings(|s| s.units[unit.index()].auto_range = auto_range);
        Ok(())
    }

    /// The distance in meters from the radar to the edge of the chart.
    pub fn set_viewport_range(&self, unit: RadarUnit, meters: f64) -> Result<(), RadarError> {
        self.inner.system.ensure_unit(unit)?;
        lock(&self.inner.viewport_range)[unit.index()] = Some(meters);
        Ok(())
    }

    pub fn viewport_range(&self, unit: RadarUnit) -> Option<f64> {
        lock(&self.inner.viewport_range)[unit.index()]
    }

    /// Send a control value to the radar and wait until it went out.
    pub async fn set_control_value(
        &self,
        unit: RadarUnit,
        control_value: ControlValue,
    ) -> Result<(), RadarError> {
        if !self.settings().master_mode {
            return Err(RadarError::NotMaster);
        }
        control_value.validate()?;

        let control_tx = self
            .inner
            .control_tx
            .get(unit.index())
            .ok_or(RadarError::NoSuchRadar(unit))?;

        if control_value.control_type == ControlType::Range {
            self.inner.system.unit(unit)?.commanded_range_meters =
                Some(control_value.as_i32().max(0) as u32);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let update = ControlUpdate {
            control_value,
            reply_tx,
        };
        let reply = timeout(CONTROL_REPLY_TIMEOUT, async {
            control_tx
                .send(update)
                .await
                .map_err(|_| RadarError::NotConnected(unit))?;
            reply_rx.await.map_err(|_| RadarError::NotConnected(unit))
        })
        .await
        .map_err(|_| {
            log::warn!("{}: no answer to {} command", unit, control_value.control_type);
            RadarError::Timeout
        })?;
        reply?
    }

    pub fn get_guard_zone_bogey_counts(&self) -> Vec<(RadarUnit, [u32; GUARD_ZONES])> {
        self.inner
            .system
            .units()
            .zip(self.inner.guard.iter())
            .map(|(unit, g)| (unit, lock(g).bogeys))
            .collect()
    }

    pub fn get_decode_statistics(&self, unit: RadarUnit) -> Result<Statistics, RadarError> {
        Ok(self.inner.system.unit(unit)?.statistics())
    }

    pub fn set_guard_zone(
        &self,
        unit: RadarUnit,
        zone: usize,
        guard_zone: GuardZone,
    ) -> Result<(), RadarError> {
        self.inner.system.ensure_unit(unit)?;
        if zone >= GUARD_ZONES {
            return Err(RadarError::NoSuchGuardZone(zone));
        }
        self.update_settings(|s| s.units[unit.index()].guard_zones[zone] = guard_zone);
        Ok(())
    }

    pub fn acknowledge_alarm(&self, unit: RadarUnit, zone: usize) -> Result<(), RadarError> {
        let guard = self
            .inner
            .guard
            .get(unit.index())
            .ok_or(RadarError::NoSuchRadar(unit))?;
        lock(guard).alarm.acknowledge(zone)
    }

    pub fn is_alarm_sounding(&self, unit: RadarUnit, zone: usize) -> bool {
        self.inner
            .guard
            .get(unit.index())
            .is_some_and(|g| lock(g).alarm.is_sounding(zone))
    }

    /// Store the latest bogey counts and raise an intrusion event for every
    /// zone whose alarm starts now.
    pub(crate) fn update_guard_zones(
        &self,
        unit: RadarUnit,
        bogeys: [u32; GUARD_ZONES],
        threshold: u32,
        now: Timestamp,
    ) -> Result<(), RadarError> {
        let guard = self
            .inner
            .guard
            .get(unit.index())
            .ok_or(RadarError::NoSuchRadar(unit))?;
        let fired = {
            let mut guard = lock(guard);
            guard.bogeys = bogeys;
            guard.alarm.update(&bogeys, threshold, now)
        };
        for (zone, fired) in fired.iter().enumerate() {
            if *fired {
                log::warn!(
                    "{}: guard zone {} intrusion, {} bogeys",
                    unit,
                    zone + 1,
                    bogeys[zone]
                );
                self.publish(RadarEvent::Intrusion {
                    unit,
                    zone,
                    bogeys: bogeys[zone],
                });
            }
        }
        Ok(())
    }

    /// Ask the render context for a new frame, unless one is pending or the
    /// host is too busy to send positions.
    pub(crate) fn request_refresh(&self, now: Timestamp) {
        let position_age = self.inner.system.navigation.position_age(now);
        if self.inner.throttle.request(position_age) {
            self.publish(RadarEvent::Refresh);
        }
    }

    /// Overlay geometry for `unit`; also completes a pending refresh.
    pub fn render_geometry(&self, unit: RadarUnit) -> Result<RenderGeometry, RadarError> {
        let system = &self.inner.system;
        let r = lock(&self.inner.renderer).build(&system.scan, unit, system.now());
        self.inner.throttle.done();
        r
    }

    pub fn spectrum(&self, unit: RadarUnit) -> Result<Spectrum, RadarError> {
        let system = &self.inner.system;
        lock(&self.inner.renderer).spectrum(&system.scan, unit, system.now())
    }

    /// Where the overlay goes on a chart drawn at `pixels_per_meter`, centered
    /// on the radar and turned by `viewport_rotation_deg`.
    pub fn viewport_transform(
        &self,
        center: Point2<f64>,
        pixels_per_meter: f64,
        viewport_rotation_deg: f64,
    ) -> ViewportTransform {
        ViewportTransform::from_settings(
            &self.settings(),
            center,
            pixels_per_meter,
            viewport_rotation_deg,
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::radar::guard::GuardZoneType;
    use clap::Parser;
    use tempfile::TempDir;

    /// A session that does not start anything, with its settings in a scratch dir.
    pub(crate) fn new_fake(settings: Settings) -> (Session, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut persistence = Persistence::new(Some(dir.path().join("settings.json"))).unwrap();
        persistence.store(&settings);
        let session = Session::new(Cli::parse_from(["br24radar"]), persistence);
        (session, dir)
    }

    #[tokio::test]
    async fn slave_sends_no_commands() {
        let (session, _dir) = new_fake(Settings::default());
        let r = session
            .set_control_value(RadarUnit::A, ControlValue::new(ControlType::Gain, 50.))
            .await;
        assert!(matches!(r, Err(RadarError::NotMaster)));
    }

    #[tokio::test]
    async fn master_forwards_commands() {
        let (session, _dir) = new_fake(Settings {
            master_mode: true,
            ..Settings::default()
        });
        let mut control_rx = session.take_control_receiver(RadarUnit::A).unwrap();
        assert!(session.take_control_receiver(RadarUnit::A).is_none());

        let radar = tokio::spawn(async move {
            let update = control_rx.recv().await.unwrap();
            let cv = update.control_value;
            update.reply_tx.send(Ok(())).unwrap();
            cv
        });

        session.set_range_meters(RadarUnit::A, 1852).await.unwrap();
        let cv = radar.await.unwrap();
        assert_eq!(cv, ControlValue::new(ControlType::Range, 1852.));
        assert_eq!(
            session.system().unit(RadarUnit::A).unwrap().commanded_range_meters,
            Some(1852)
        );
        assert!(!session.settings().units[0].auto_range);

        // Out of range values never reach the radar
        let r = session
            .set_control_value(RadarUnit::A, ControlValue::new(ControlType::Gain, 120.))
            .await;
        assert!(matches!(r, Err(RadarError::CannotSetControlTypeValue(..))));

        // Single radar has no unit B
        let r = session
            .set_control_value(RadarUnit::B, ControlValue::new(ControlType::Gain, 20.))
            .await;
        assert!(matches!(r, Err(RadarError::NoSuchRadar(RadarUnit::B))));
    }

    #[tokio::test]
    async fn closed_control_channel() {
        let (session, _dir) = new_fake(Settings {
            master_mode: true,
            ..Settings::default()
        });
        drop(session.take_control_receiver(RadarUnit::A));
        let r = session
            .set_control_value(RadarUnit::A, ControlValue::new(ControlType::Rain, 20.))
            .await;
        assert!(matches!(r, Err(RadarError::NotConnected(RadarUnit::A))));
    }

    #[tokio::test]
    async fn silent_radar_task_times_out() {
        let (session, _dir) = new_fake(Settings {
            master_mode: true,
            ..Settings::default()
        });
        // Taken but never read, like a radar task that is stuck
        let _control_rx = session.take_control_receiver(RadarUnit::A).unwrap();

        let r = session
            .set_control_value(RadarUnit::A, ControlValue::new(ControlType::Rain, 20.))
            .await;
        assert!(matches!(r, Err(RadarError::Timeout)));
    }

    #[test]
    fn guard_zone_intrusion_events() {
        let (session, _dir) = new_fake(Settings::default());
        let mut events = session.subscribe();

        let zone = GuardZone {
            zone_type: GuardZoneType::Circle,
            inner_range_meters: 0.,
            outer_range_meters: 500.,
            ..GuardZone::default()
        };
        session.set_guard_zone(RadarUnit::A, 1, zone).unwrap();
        assert_eq!(session.settings().units[0].guard_zones[1], zone);
        assert!(matches!(
            session.set_guard_zone(RadarUnit::A, 2, zone),
            Err(RadarError::NoSuchGuardZone(2))
        ));

        session
            .update_guard_zones(RadarUnit::A, [0, 3], 0, 1_000)
            .unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            RadarEvent::Intrusion {
                unit: RadarUnit::A,
                zone: 1,
                bogeys: 3
            }
        );
        assert_eq!(
            session.get_guard_zone_bogey_counts(),
            vec![(RadarUnit::A, [0, 3])]
        );
        assert!(session.is_alarm_sounding(RadarUnit::A, 1));
        session.acknowledge_alarm(RadarUnit::A, 1).unwrap();
        assert!(!session.is_alarm_sounding(RadarUnit::A, 1));

        // Still latched, no second event
        session
            .update_guard_zones(RadarUnit::A, [0, 4], 0, 2_000)
            .unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn refresh_is_throttled() {
        let (session, _dir) = new_fake(Settings::default());
        let mut events = session.subscribe();

        session.request_refresh(0);
        session.request_refresh(0);
        assert_eq!(events.try_recv().unwrap(), RadarEvent::Refresh);
        assert!(events.try_recv().is_err());

        let geometry = session.render_geometry(RadarUnit::A).unwrap();
        assert_eq!(geometry.lines, 0);
        session.request_refresh(0);
        assert_eq!(events.try_recv().unwrap(), RadarEvent::Refresh);
    }

    #[test]
    fn settings_are_persisted() {
        let (session, dir) = new_fake(Settings::default());
        session.update_settings(|s| s.transparency = 42);
        assert_eq!(session.settings().transparency, 9);

        let reloaded = Persistence::new(Some(dir.path().join("settings.json"))).unwrap();
        assert_eq!(reloaded.settings.transparency, 9);
    }
}
