use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use crate::Session;
use crate::radar::RadarUnit;

mod command;
mod data;
mod report;

pub use command::Command;
pub use data::{DecodeResult, ProtocolDecoder};

const SPOKES_PER_FRAME: usize = 32;
const FRAME_HEADER_LENGTH: usize = 8;
const RADAR_LINE_HEADER_LENGTH: usize = 24;

/*
RADAR REPORTS

The radars send various reports. The first 2 bytes indicate what the report type is.
The types seen on a BR24 are:

2nd byte C4:   01 02 03 04 05 07 08
2nd byte F5:   08 0C 0D 0F 10 11 12 13 14

Only the C4 reports carry anything we use.
*/

/// The three multicast groups that one radar unit uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadarAddresses {
    pub spoke_data: SocketAddrV4,
    pub report: SocketAddrV4,
    pub send_command: SocketAddrV4,
}

const UNIT_A_ADDRESSES: RadarAddresses = RadarAddresses {
    spoke_data: SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 8), 6678),
    report: SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 9), 6679),
    send_command: SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 10), 6680),
};

// Only 4G scanners have a second radar
const UNIT_B_ADDRESSES: RadarAddresses = RadarAddresses {
    spoke_data: SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 13), 6657),
    report: SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 15), 6659),
    send_command: SocketAddrV4::new(Ipv4Addr::new(236, 6, 7, 14), 6658),
};

impl RadarAddresses {
    pub fn of(unit: RadarUnit) -> RadarAddresses {
        match unit {
            RadarUnit::A => UNIT_A_ADDRESSES,
            RadarUnit::B => UNIT_B_ADDRESSES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Model {
    Unknown,
    BR24,
    Gen3,
    Gen4,
}

const BR24_MODEL_NAME: &str = "BR24";

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Model::Unknown => "",
            Model::BR24 => BR24_MODEL_NAME,
            Model::Gen3 => "3G",
            Model::Gen4 => "4G",
        };
        write!(f, "{}", s)
    }
}

impl Model {
    pub fn from(model: u8) -> Self {
        match model {
            0x0e => Model::BR24, // Davy's NorthStar BR24 from 2009
            0x0f => Model::BR24,
            0x08 => Model::Gen3,
            0x01 => Model::Gen4,
            _ => Model::Unknown,
        }
    }
}

/// Start the data and report receivers of every configured radar unit.
pub fn start(subsys: &SubsystemHandle, session: &Session) {
    let nic_addr = session.nic_addr();
    let system = session.system();

    for unit in system.units() {
        let addresses = RadarAddresses::of(unit);
        log::info!(
            "{}: data {} reports {} commands {} via {}",
            unit,
            addresses.spoke_data,
            addresses.report,
            addresses.send_command,
            nic_addr
        );

        let data_receiver = data::DataReceiver::new(session.clone(), unit, addresses, nic_addr);
        subsys.start(SubsystemBuilder::new(format!("{} data", unit), |s| {
            data_receiver.run(s)
        }));

        match session.take_control_receiver(unit) {
            Some(control_rx) => {
                let command = Command::new(unit, addresses.send_command, nic_addr);
                let report_receiver = report::ReportReceiver::new(
                    session.clone(),
                    unit,
                    addresses,
                    nic_addr,
                    command,
                    control_rx,
                );
                subsys.start(SubsystemBuilder::new(format!("{} reports", unit), |s| {
                    report_receiver.run(s)
                }));
            }
            None => {
                log::error!("{}: report receiver already started", unit);
            }
        }
    }
}
