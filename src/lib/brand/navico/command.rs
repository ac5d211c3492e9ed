use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::net::UdpSocket;

use crate::brand::CommandSender;
use crate::network::create_multicast_send;
use crate::radar::controls::{ControlType, ControlValue};
use crate::radar::range::is_valid_range;
use crate::radar::{RadarError, RadarUnit};

pub const REQUEST_03_REPORT: [u8; 2] = [0x04, 0xc2]; // This causes the radar to report Report 3
pub const REQUEST_MANY2_REPORT: [u8; 2] = [0x01, 0xc2]; // This causes the radar to report Report 02, 03, 04, 07 and 08
const COMMAND_STAY_ON_A: [u8; 2] = [0xa0, 0xc1];

// Value bytes the radar expects when a filter is switched to auto
const AUTO_GAIN_VALUE: u8 = 0xa1;
const AUTO_SEA_VALUE: u32 = 0xd3;

pub struct Command {
    unit: RadarUnit,
    send_command_addr: SocketAddrV4,
    nic_addr: Ipv4Addr,
    sock: Option<UdpSocket>,
    socket_error_reported: bool,
}

impl Command {
    pub fn new(unit: RadarUnit, send_command_addr: SocketAddrV4, nic_addr: Ipv4Addr) -> Self {
        Command {
            unit,
            send_command_addr,
            nic_addr,
            sock: None,
            socket_error_reported: false,
        }
    }

    fn start_socket(&mut self) -> Result<(), RadarError> {
        match create_multicast_send(&self.send_command_addr, &self.nic_addr) {
            Ok(sock) => {
                log::debug!(
                    "{} {} via {}: sending commands",
                    self.unit,
                    &self.send_command_addr,
                    &self.nic_addr
                );
                self.sock = Some(sock);
                self.socket_error_reported = false;

                Ok(())
            }
            Err(e) => {
                if !self.socket_error_reported {
                    log::error!(
                        "{} {} via {}: cannot create command socket: {}",
                        self.unit,
                        &self.send_command_addr,
                        &self.nic_addr,
                        e
                    );
                    self.socket_error_reported = true;
                }
                Err(RadarError::Io(e))
            }
        }
    }

    pub async fn send(&mut self, message: &[u8]) -> Result<(), RadarError> {
        if self.sock.is_none() {
            self.start_socket()?;
        }
        if let Some(sock) = &self.sock {
            if let Err(e) = sock.send(message).await {
                // Start over with a fresh socket next time
                self.sock = None;
                return Err(RadarError::Io(e));
            }
            log::trace!("{}: sent {:02X?}", self.unit, message);
        }

        Ok(())
    }

    fn scale_100_to_byte(a: f64) -> u8 {
        // Map range 0..100 to 0..255
        let mut r = a * 255.0 / 100.0;
        if r > 255.0 {
            r = 255.0;
        } else if r < 0.0 {
            r = 0.0;
        }
        r as u8
    }

    fn mod_deci_degrees(a: i32) -> i32 {
        (a + 7200) % 3600
    }

    /// The datagrams that set `cv`, in sending order.
    pub fn encode(cv: &ControlValue) -> Result<Vec<Vec<u8>>, RadarError> {
        cv.validate()?;

        let value = cv.value;
        let deci_value = (value * 10.0).round() as i32;
        let auto = cv.auto;

        let mut cmd = Vec::with_capacity(11);

        match cv.control_type {
            ControlType::Power => {
                let on = if value >= 1. { 0x01 } else { 0x00 };
                return Ok(vec![vec![0x00, 0xc1, on], vec![0x01, 0xc1, on]]);
            }
            ControlType::Range => {
                let meters = value.round() as i32;
                if !is_valid_range(meters) {
                    return Err(RadarError::CannotSetControlTypeValue(
                        ControlType::Range,
                        value,
                    ));
                }
                let decimeters: i32 = meters * 10;
                log::trace!("range {value} -> {decimeters}");

                cmd.extend_from_slice(&[0x03, 0xc1]);
                cmd.extend_from_slice(&decimeters.to_le_bytes());
            }
            ControlType::BearingAlignment => {
                let value: i16 = Self::mod_deci_degrees(deci_value) as i16;

                cmd.extend_from_slice(&[0x05, 0xc1]);
                cmd.extend_from_slice(&value.to_le_bytes());
            }
            ControlType::Gain => {
                let v = if auto {
                    AUTO_GAIN_VALUE
                } else {
                    Self::scale_100_to_byte(value)
                };
                let auto = auto as u32;

                cmd.extend_from_slice(&[0x06, 0xc1, 0x00, 0x00, 0x00, 0x00]);
                cmd.extend_from_slice(&auto.to_le_bytes());
                cmd.extend_from_slice(&v.to_le_bytes());
            }
            ControlType::Sea => {
                let v: u32 = if auto {
                    AUTO_SEA_VALUE
                } else {
                    Self::scale_100_to_byte(value) as u32
                };
                let auto = auto as u32;

                cmd.extend_from_slice(&[0x06, 0xc1, 0x02]);
                cmd.extend_from_slice(&auto.to_be_bytes());
                cmd.extend_from_slice(&v.to_be_bytes());
            }
            ControlType::Rain => {
                let v = Self::scale_100_to_byte(value);
                cmd.extend_from_slice(&[0x06, 0xc1, 0x04, 0, 0, 0, 0, 0, 0, 0, v]);
            }
            ControlType::SideLobeSuppression => {
                let v = Self::scale_100_to_byte(value);

                cmd.extend_from_slice(&[0x06, 0xc1, 0x05, 0, 0, 0, auto as u8, 0, 0, 0, v]);
            }
            ControlType::InterferenceRejection => {
                cmd.extend_from_slice(&[0x08, 0xc1, cv.as_u8()]);
            }
            ControlType::TargetExpansion => {
                cmd.extend_from_slice(&[0x09, 0xc1, cv.as_u8()]);
            }
            ControlType::TargetBoost => {
                cmd.extend_from_slice(&[0x0a, 0xc1, cv.as_u8()]);
            }
            ControlType::SeaState => {
                cmd.extend_from_slice(&[0x0b, 0xc1, cv.as_u8()]);
            }
            ControlType::LocalInterferenceRejection => {
                cmd.extend_from_slice(&[0x0e, 0xc1, cv.as_u8()]);
            }
            ControlType::ScanSpeed => {
                cmd.extend_from_slice(&[0x0f, 0xc1, cv.as_u8()]);
            }
            ControlType::NoiseRejection => {
                cmd.extend_from_slice(&[0x21, 0xc1, cv.as_u8()]);
            }
            ControlType::TargetSeparation => {
                cmd.extend_from_slice(&[0x22, 0xc1, cv.as_u8()]);
            }
            ControlType::AntennaHeight => {
                let value = deci_value as u16;
                cmd.extend_from_slice(&[0x30, 0xc1, 0x01, 0, 0, 0]);
                cmd.extend_from_slice(&value.to_le_bytes());
                cmd.extend_from_slice(&[0, 0]);
            }
        };

        Ok(vec![cmd])
    }
}

#[async_trait]
impl CommandSender for Command {
    async fn set_control(&mut self, cv: &ControlValue) -> Result<(), RadarError> {
        log::debug!("{}: set_control({:?})", self.unit, cv);

        for cmd in Self::encode(cv)? {
            log::debug!("{}: Send command {:02X?}", self.unit, cmd);
            self.send(&cmd).await?;
        }
        Ok(())
    }

    async fn send_report_requests(&mut self) -> Result<(), RadarError> {
        self.send(&REQUEST_03_REPORT).await?;
        self.send(&REQUEST_MANY2_REPORT).await?;
        self.send(&COMMAND_STAY_ON_A).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(control_type: ControlType, value: f64) -> Vec<Vec<u8>> {
        Command::encode(&ControlValue::new(control_type, value)).unwrap()
    }

    fn encode_auto(control_type: ControlType, value: f64) -> Vec<Vec<u8>> {
        Command::encode(&ControlValue::new_auto(control_type, value)).unwrap()
    }

    #[test]
    fn power() {
        assert_eq!(
            encode(ControlType::Power, 1.),
            vec![vec![0x00, 0xc1, 0x01], vec![0x01, 0xc1, 0x01]]
        );
        assert_eq!(
            encode(ControlType::Power, 0.),
            vec![vec![0x00, 0xc1, 0x00], vec![0x01, 0xc1, 0x00]]
        );
    }

    #[test]
    fn range_in_decimeters() {
        assert_eq!(
            encode(ControlType::Range, 1852.),
            vec![vec![0x03, 0xc1, 0x58, 0x48, 0x00, 0x00]]
        );
        assert!(matches!(
            Command::encode(&ControlValue::new(ControlType::Range, 50.)),
            Err(RadarError::CannotSetControlTypeValue(ControlType::Range, _))
        ));
    }

    #[test]
    fn gain_and_clutter() {
        assert_eq!(
            encode(ControlType::Gain, 100.),
            vec![vec![0x06, 0xc1, 0, 0, 0, 0, 0, 0, 0, 0, 0xff]]
        );
        assert_eq!(
            encode_auto(ControlType::Gain, 0.),
            vec![vec![0x06, 0xc1, 0, 0, 0, 0, 0x01, 0, 0, 0, 0xa1]]
        );
        assert_eq!(
            encode(ControlType::Sea, 50.),
            vec![vec![0x06, 0xc1, 0x02, 0, 0, 0, 0, 0, 0, 0, 127]]
        );
        assert_eq!(
            encode_auto(ControlType::Sea, 0.),
            vec![vec![0x06, 0xc1, 0x02, 0, 0, 0, 0x01, 0, 0, 0, 0xd3]]
        );
        assert_eq!(
            encode(ControlType::Rain, 20.),
            vec![vec![0x06, 0xc1, 0x04, 0, 0, 0, 0, 0, 0, 0, 51]]
        );
    }

    #[test]
    fn single_byte_controls() {
        assert_eq!(
            encode(ControlType::InterferenceRejection, 2.),
            vec![vec![0x08, 0xc1, 2]]
        );
        assert_eq!(
            encode(ControlType::TargetExpansion, 1.),
            vec![vec![0x09, 0xc1, 1]]
        );
        assert_eq!(encode(ControlType::TargetBoost, 2.), vec![vec![0x0a, 0xc1, 2]]);
        assert_eq!(
            encode(ControlType::LocalInterferenceRejection, 3.),
            vec![vec![0x0e, 0xc1, 3]]
        );
        assert_eq!(encode(ControlType::ScanSpeed, 1.), vec![vec![0x0f, 0xc1, 1]]);
    }

    #[test]
    fn bearing_alignment_in_deci_degrees() {
        assert_eq!(
            encode(ControlType::BearingAlignment, -1.5),
            vec![vec![0x05, 0xc1, 0x01, 0x0e]] // 3585
        );
        assert_eq!(
            encode(ControlType::BearingAlignment, 180.),
            vec![vec![0x05, 0xc1, 0x08, 0x07]]
        );
        assert_eq!(
            encode(ControlType::BearingAlignment, 10.),
            vec![vec![0x05, 0xc1, 100, 0]]
        );
    }

    #[test]
    fn invalid_values_are_not_encoded() {
        assert!(Command::encode(&ControlValue::new(ControlType::Gain, 150.)).is_err());
        assert!(Command::encode(&ControlValue::new_auto(ControlType::Rain, 10.)).is_err());
    }
}
