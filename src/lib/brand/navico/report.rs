use anyhow::{Error, bail};
use num_traits::FromPrimitive;
use std::io;
use std::mem::transmute;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_graceful_shutdown::SubsystemHandle;

use super::command::Command;
use super::{Model, RadarAddresses};
use crate::Session;
use crate::brand::CommandSender;
use crate::network::create_udp_multicast_listen;
use crate::radar::controls::ControlType;
use crate::radar::{Power, RadarError, RadarUnit};
use crate::session::ControlUpdate;
use crate::util::c_wide_string;

// Every 5 seconds we ask the radar for reports and keep it transmitting
const REPORT_REQUEST_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug)]
#[repr(packed)]
struct RadarReport1_18 {
    _what: u8,
    _command: u8,
    status: u8,
    _u00: [u8; 15], // Lots of unknown
}

impl RadarReport1_18 {
    fn transmute(bytes: &[u8]) -> Result<Self, anyhow::Error> {
        // This is safe as the struct's bits are always all valid representations,
        // or we convert them using a fail safe function
        Ok(unsafe {
            let report: [u8; 18] = bytes.try_into()?; // Hardwired length on purpose to verify length
            transmute(report)
        })
    }
}

const REPORT_01_C4_18: u8 = 0x01;

#[derive(Debug)]
#[repr(packed)]
struct RadarReport2_99 {
    _what: u8,
    _command: u8,
    range: [u8; 4],             // 2..6 = range in decimeters
    _u00: [u8; 1],              // 6
    _mode: u8,                  // 7 = mode
    gain_auto: u8,              // 8
    _u01: [u8; 3],              // 9..12
    gain: u8,                   // 12
    sea_auto: u8,               // 13 = sea_auto, 0 = off, 1 = harbor, 2 = offshore
    _u02: [u8; 3],              // 14..17
    sea: [u8; 4],               // 17..21
    _u03: u8,                   // 21
    rain: u8,                   // 22
    _u04: [u8; 11],             // 23..34
    interference_rejection: u8, // 34
    _u05: [u8; 3],              // 35..38
    target_expansion: u8,       // 38
    _u06: [u8; 3],              // 39..42
    target_boost: u8,           // 42
    _u07: [u8; 56],             // 43..99
}

impl RadarReport2_99 {
    fn transmute(bytes: &[u8]) -> Result<Self, anyhow::Error> {
        // This is safe as the struct's bits are always all valid representations,
        // or we convert them using a fail safe function
        Ok(unsafe {
            let report: [u8; 99] = bytes.try_into()?;
            transmute(report)
        })
    }
}

const REPORT_02_C4_99: u8 = 0x02;

#[derive(Debug)]
#[repr(packed)]
struct RadarReport3_129 {
    _what: u8,
    _command: u8,
    model: u8,      // So far: 01 = 4G and new 3G, 08 = 3G, 0E and 0F = BR24
    _u00: [u8; 31], // Lots of unknown
    hours: [u8; 4], // Hours of operation
    _u01: [u8; 20], // Lots of unknown
    firmware_date: [u8; 32], // Wide chars, assumed UTF16
    firmware_time: [u8; 32], // Wide chars, assumed UTF16
    _u02: [u8; 7],
}

impl RadarReport3_129 {
    fn transmute(bytes: &[u8]) -> Result<Self, anyhow::Error> {
        // This is safe as the struct's bits are always all valid representations,
        // or we convert them using a fail safe function
        Ok(unsafe {
            let report: [u8; 129] = bytes.try_into()?; // Hardwired length on purpose to verify length
            transmute(report)
        })
    }
}

const REPORT_03_C4_129: u8 = 0x03;

#[derive(Debug)]
#[repr(packed)]
struct RadarReport4_66 {
    _what: u8,
    _command: u8,
    _u00: [u8; 4],              // 2..6
    bearing_alignment: [u8; 2], // 6..8, deci-degrees
    _u01: [u8; 2],              // 8..10
    antenna_height: [u8; 2],    // 10..12 = Antenna height, decimeters
    _u02: [u8; 54],             // 12..66
}

impl RadarReport4_66 {
    fn transmute(bytes: &[u8]) -> Result<Self, anyhow::Error> {
        // This is safe as the struct's bits are always all valid representations,
        // or we convert them using a fail safe function
        Ok(unsafe {
            let report: [u8; 66] = bytes.try_into()?;
            transmute(report)
        })
    }
}

const REPORT_04_C4_66: u8 = 0x04;

#[derive(Debug, Copy, Clone)]
#[repr(packed)]
struct RadarReport8_18 {
    // 08 c4  length 18
    _what: u8,                  // 0  0x08
    _command: u8,               // 1  0xC4
    sea_state: u8,              // 2
    interference_rejection: u8, // 3
    scan_speed: u8,             // 4
    sls_auto: u8,               // 5 installation: sidelobe suppression auto
    _field6: u8,                // 6
    _field7: u8,                // 7
    _field8: u8,                // 8
    side_lobe_suppression: u8,  // 9 installation: sidelobe suppression
    _field10: u16,              // 10-11
    noise_rejection: u8,        // 12    noise rejection
    target_sep: u8,             // 13
    _field14: [u8; 4],          // 14..18
}

impl RadarReport8_18 {
    fn transmute(bytes: &[u8]) -> Result<Self, anyhow::Error> {
        // This is safe as the struct's bits are always all valid representations,
        // or we convert them using a fail safe function
        Ok(unsafe {
            let report: [u8; 18] = bytes.try_into()?; // Hardwired length on purpose to verify length
            transmute(report)
        })
    }
}

const REPORT_08_C4_18_OR_21_OR_22: u8 = 0x08;

fn byte_to_percentage(v: u8) -> f64 {
    (v as f64 * 100. / 255.).round()
}

pub(super) struct ReportReceiver {
    session: Session,
    unit: RadarUnit,
    report_addr: SocketAddrV4,
    nic_addr: Ipv4Addr,
    report_buf: Vec<u8>,
    report_socket: Option<UdpSocket>,
    model: Model,
    command_sender: Command,
    control_rx: mpsc::Receiver<ControlUpdate>,
    report_request_timeout: Instant,
    reported_unknown: [bool; 256],
}

impl ReportReceiver {
    pub fn new(
        session: Session,
        unit: RadarUnit,
        addresses: RadarAddresses,
        nic_addr: Ipv4Addr,
        command_sender: Command,
        control_rx: mpsc::Receiver<ControlUpdate>,
    ) -> ReportReceiver {
        ReportReceiver {
            session,
            unit,
            report_addr: addresses.report,
            nic_addr,
            report_buf: Vec::with_capacity(1000),
            report_socket: None,
            model: Model::Unknown,
            command_sender,
            control_rx,
            report_request_timeout: Instant::now(),
            reported_unknown: [false; 256],
        }
    }

    fn start_socket(&mut self) -> io::Result<()> {
        let sock = create_udp_multicast_listen(&self.report_addr, &self.nic_addr)?;
        self.report_socket = Some(sock);
        log::debug!(
            "{} {} via {}: listening for reports",
            self.unit,
            &self.report_addr,
            &self.nic_addr
        );
        Ok(())
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        loop {
            if self.report_socket.is_none() {
                if let Err(e) = self.start_socket() {
                    log::warn!(
                        "{} {} via {}: create multicast failed: {}",
                        self.unit,
                        &self.report_addr,
                        &self.nic_addr,
                        e
                    );
                }
            }
            if self.report_socket.is_some() {
                match self.socket_loop(&subsys).await {
                    Err(RadarError::Shutdown) => {
                        self.shutdown();
                        return Ok(());
                    }
                    Err(e) => {
                        log::warn!("{}: report receive failed: {}", self.unit, e);
                    }
                    Ok(()) => {}
                }
                self.report_socket = None;
            }
            let retry = Instant::now() + Duration::from_millis(1000);
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    self.shutdown();
                    return Ok(());
                },
                r = self.serve_controls_until(retry) => {
                    if let Err(RadarError::Shutdown) = r {
                        self.shutdown();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Without a report socket the command socket may still work, so control
    /// updates are answered while waiting for the next attempt.
    async fn serve_controls_until(&mut self, deadline: Instant) -> Result<(), RadarError> {
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    return Ok(());
                },
                r = self.control_rx.recv() => {
                    match r {
                        Some(cu) => {
                            self.process_control_update(cu).await;
                        }
                        None => {
                            return Err(RadarError::Shutdown);
                        }
                    }
                }
            }
        }
    }

    fn shutdown(&self) {
        if let Ok(mut state) = self.session.system().unit(self.unit) {
            state.shutdown();
        }
    }

    async fn socket_loop(&mut self, subsys: &SubsystemHandle) -> Result<(), RadarError> {
        let Some(sock) = self.report_socket.take() else {
            return Ok(());
        };

        let r = loop {
            self.report_buf.clear();
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    log::debug!("{}: shutdown", self.unit);
                    break Err(RadarError::Shutdown);
                },

                _ = sleep_until(self.report_request_timeout) => {
                    self.report_request_timeout = Instant::now() + REPORT_REQUEST_INTERVAL;
                    self.send_report_requests().await;
                },

                r = sock.recv_buf_from(&mut self.report_buf) => {
                    match r {
                        Ok((_len, _addr)) => {
                            self.report_seen();
                            if let Err(e) = self.process_report() {
                                log::error!("{}: {}", self.unit, e);
                            }
                        }
                        Err(e) => {
                            log::error!("{}: receive error: {}", self.unit, e);
                            break Err(RadarError::Io(e));
                        }
                    }
                },

                r = self.control_rx.recv() => {
                    match r {
                        Some(cu) => {
                            self.process_control_update(cu).await;
                        }
                        None => {
                            // The session is gone
                            break Err(RadarError::Shutdown);
                        }
                    }
                }
            }
        };
        self.report_socket = Some(sock);
        r
    }

    async fn send_report_requests(&mut self) {
        let master_mode = self.session.settings().master_mode;
        let scanner_on = self
            .session
            .system()
            .unit(self.unit)
            .map(|s| s.scanner_on)
            .unwrap_or(false);

        if master_mode && scanner_on {
            if let Err(e) = self.command_sender.send_report_requests().await {
                log::debug!("{}: cannot send report requests: {}", self.unit, e);
            }
        }
    }

    async fn process_control_update(&mut self, cu: ControlUpdate) {
        let r = self.command_sender.set_control(&cu.control_value).await;
        if let Err(e) = &r {
            log::warn!(
                "{}: cannot set {}: {}",
                self.unit,
                cu.control_value.control_type,
                e
            );
        }
        // The caller may have given up waiting
        let _ = cu.reply_tx.send(r);
    }

    fn report_seen(&mut self) {
        let system = self.session.system();
        let now = system.now();
        if let Ok(mut state) = system.unit(self.unit) {
            state.report_seen(now);
        }
    }

    fn set_value(&mut self, control_type: ControlType, value: f64) {
        if let Ok(mut state) = self.session.system().unit(self.unit) {
            state.controls.set_value(control_type, value);
        }
    }

    fn set_value_auto(&mut self, control_type: ControlType, value: f64, auto: u8) {
        if let Ok(mut state) = self.session.system().unit(self.unit) {
            state.controls.set_value_auto(control_type, value, auto > 0);
        }
    }

    fn process_report(&mut self) -> Result<(), Error> {
        let data = &self.report_buf;

        if data.len() < 2 {
            bail!("UDP report len {} dropped", data.len());
        }

        if data[1] != 0xc4 {
            log::trace!("Unknown report {:02X?} dropped", data);
            return Ok(());
        }
        let report_identification = data[0];
        match report_identification {
            REPORT_01_C4_18 => {
                return self.process_report_01();
            }
            REPORT_02_C4_99 => {
                return self.process_report_02();
            }
            REPORT_03_C4_129 => {
                return self.process_report_03();
            }
            REPORT_04_C4_66 => {
                return self.process_report_04();
            }
            REPORT_08_C4_18_OR_21_OR_22 => {
                return self.process_report_08();
            }
            _ => {
                if !self.reported_unknown[report_identification as usize] {
                    self.reported_unknown[report_identification as usize] = true;
                    log::debug!(
                        "{}: Unknown report identification {} len {} data {:02X?} dropped",
                        self.unit,
                        report_identification,
                        data.len(),
                        data
                    );
                }
            }
        }
        Ok(())
    }

    fn process_report_01(&mut self) -> Result<(), Error> {
        let report = RadarReport1_18::transmute(&self.report_buf)?;

        log::trace!("{}: report {:?}", self.unit, report);

        let status = report.status;
        let Some(power) = Power::from_u8(status) else {
            bail!("{}: Unknown radar status {}", self.unit, status);
        };
        log::debug!("{}: radar status {}", self.unit, power);
        self.set_value(ControlType::Power, power as u8 as f64);
        Ok(())
    }

    fn process_report_02(&mut self) -> Result<(), Error> {
        let report = RadarReport2_99::transmute(&self.report_buf)?;

        log::trace!("{}: report {:?}", self.unit, report);

        let range = i32::from_le_bytes(report.range) / 10;
        let sea = u32::from_le_bytes(report.sea).min(u8::MAX as u32) as u8;

        self.set_value(ControlType::Range, range as f64);
        self.set_value_auto(
            ControlType::Gain,
            byte_to_percentage(report.gain),
            report.gain_auto,
        );
        self.set_value_auto(ControlType::Sea, byte_to_percentage(sea), report.sea_auto);
        self.set_value(ControlType::Rain, byte_to_percentage(report.rain));
        self.set_value(
            ControlType::InterferenceRejection,
            report.interference_rejection as f64,
        );
        self.set_value(ControlType::TargetExpansion, report.target_expansion as f64);
        self.set_value(ControlType::TargetBoost, report.target_boost as f64);

        Ok(())
    }

    fn process_report_03(&mut self) -> Result<(), Error> {
        let report = RadarReport3_129::transmute(&self.report_buf)?;

        log::trace!("{}: report {:?}", self.unit, report);

        let model_raw = report.model;
        let hours = i32::from_le_bytes(report.hours);
        let firmware_date = c_wide_string(&report.firmware_date);
        let firmware_time = c_wide_string(&report.firmware_time);
        let model = Model::from(model_raw);
        match model {
            Model::Unknown => {
                if !self.reported_unknown[model_raw as usize] {
                    self.reported_unknown[model_raw as usize] = true;
                    log::error!("{}: Unknown radar model 0x{:02x}", self.unit, model_raw);
                }
            }
            _ => {
                if self.model != model {
                    log::info!("{}: Radar is model {}", self.unit, model);
                    self.model = model;
                }
            }
        }

        let firmware = format!("{} {}", firmware_date, firmware_time);
        if let Ok(mut state) = self.session.system().unit(self.unit) {
            if model != Model::Unknown {
                state.controls.set_model_name(model.to_string());
            }
            state.controls.set_firmware_version(firmware);
            state.controls.operating_hours = Some(hours as f64);
        }

        Ok(())
    }

    fn process_report_04(&mut self) -> Result<(), Error> {
        let report = RadarReport4_66::transmute(&self.report_buf)?;

        log::trace!("{}: report {:?}", self.unit, report);

        let mut bearing_alignment = i16::from_le_bytes(report.bearing_alignment) as f64 / 10.;
        if bearing_alignment > 180. {
            bearing_alignment -= 360.;
        }
        self.set_value(ControlType::BearingAlignment, bearing_alignment);
        self.set_value(
            ControlType::AntennaHeight,
            u16::from_le_bytes(report.antenna_height) as f64 / 10.,
        );

        Ok(())
    }

    fn process_report_08(&mut self) -> Result<(), Error> {
        let data = &self.report_buf;

        if data.len() != 18 && data.len() != 21 && data.len() != 22 {
            bail!("{}: Report 0x08C4 invalid length {}", self.unit, data.len());
        }

        let report = RadarReport8_18::transmute(&data[0..size_of::<RadarReport8_18>()])?;

        log::trace!("{}: report {:?}", self.unit, report);

        self.set_value(ControlType::SeaState, report.sea_state as f64);
        self.set_value(
            ControlType::LocalInterferenceRejection,
            report.interference_rejection as f64,
        );
        self.set_value(ControlType::ScanSpeed, report.scan_speed as f64);
        self.set_value_auto(
            ControlType::SideLobeSuppression,
            byte_to_percentage(report.side_lobe_suppression),
            report.sls_auto,
        );
        self.set_value(ControlType::NoiseRejection, report.noise_rejection as f64);
        if self.model == Model::Gen4 {
            self.set_value(ControlType::TargetSeparation, report.target_sep as f64);
        } else if report.target_sep > 0 {
            log::trace!(
                "{}: Target separation value {} not supported on model {}",
                self.unit,
                report.target_sep,
                self.model
            );
        }

        Ok(())
    }
}
