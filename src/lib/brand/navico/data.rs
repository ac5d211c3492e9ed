use bincode::deserialize;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::{io, time::Duration};
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tokio_graceful_shutdown::SubsystemHandle;

use crate::Session;
use crate::network::create_udp_multicast_listen;
use crate::radar::transform::{degrees_to_raw, mod_raw};
use crate::radar::{
    RETURNS_PER_LINE, RadarError, RadarSystemState, RadarUnit, SPOKES_RAW, SpokeBearing,
    Statistics,
};
use crate::session::RadarEvent;
use crate::util::PrintableSpoke;

use super::{FRAME_HEADER_LENGTH, RADAR_LINE_HEADER_LENGTH, RadarAddresses, SPOKES_PER_FRAME};

/*
 Heading on radar. Observed in field:
 - Hakan: BR24, no RI: 0x9234 = negative, with recognisable 1234 in hex?
 - Marcus: 3G, RI, true heading: 0x45be
 - Kees: 4G, RI, mag heading: 0x07d6 = 2006 = 176,6 deg
 - Kees: 4G, RI, no heading: 0x8000 = -1 = negative
 Known values for heading value:
*/
const HEADING_TRUE_FLAG: u16 = 0x4000;
const HEADING_MASK: u16 = SPOKES_RAW - 1;
fn is_heading_true(x: u16) -> bool {
    (x & HEADING_TRUE_FLAG) != 0
}
fn is_valid_heading_value(x: u16) -> bool {
    (x & !(HEADING_TRUE_FLAG | HEADING_MASK)) == 0
}
fn extract_heading_value(x: u16) -> Option<u16> {
    match is_valid_heading_value(x) && is_heading_true(x) {
        true => Some(x & HEADING_MASK),
        false => None,
    }
}

const SCAN_NUMBER_MASK: u16 = SPOKES_RAW - 1;

// BR24 radars put this at offset 4 of every line header
const BR24_MARK: [u8; 4] = [0x00, 0x44, 0x0d, 0x0e];

#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(packed)]
struct Br24Header {
    header_len: u8,       // 1 bytes
    status: u8,           // 1 bytes
    scan_number: [u8; 2], // 2 bytes, 0..4095
    _mark: [u8; 4],       // 4 bytes, on BR24 this is always 0x00, 0x44, 0x0d, 0x0e
    angle: [u8; 2],       // 2 bytes
    heading: [u8; 2],     // 2 bytes heading with RI-10/11. See bitmask explanation above.
    range: [u8; 4],       // 4 bytes, only the low 3 are used
    _u01: [u8; 2],        // 2 bytes blank
    _u02: [u8; 2],        // 2 bytes
    _u03: [u8; 4],        // 4 bytes blank
} /* total size = 24 */

#[derive(Deserialize, Debug, Clone, Copy)]
#[repr(packed)]
struct Br4gHeader {
    header_len: u8,       // 1 bytes
    status: u8,           // 1 bytes
    scan_number: [u8; 2], // 2 bytes, 0..4095
    _mark: [u8; 2],       // 2 bytes
    large_range: [u8; 2], // 2 bytes, on 4G and up
    angle: [u8; 2],       // 2 bytes
    heading: [u8; 2],     // 2 bytes heading with RI-10/11. See bitmask explanation above.
    small_range: [u8; 2], // 2 bytes or -1
    _rotation: [u8; 2],   // 2 bytes or -1
    _u01: [u8; 4],        // 4 bytes signed integer, always -1
    _u02: [u8; 4], // 4 bytes signed integer, mostly -1 (0x80 in last byte) or 0xa0 in last byte
} /* total size = 24 */

const BR4G_LARGE_RANGE_STEP: u32 = 348;
const BR4G_RANGE_FACTOR: f64 = std::f64::consts::SQRT_2 / 10.0; // sqrt(2) / 10 m

const RADAR_LINE_LENGTH: usize = RADAR_LINE_HEADER_LENGTH + RETURNS_PER_LINE;
const MAX_FRAME_LENGTH: usize = FRAME_HEADER_LENGTH + SPOKES_PER_FRAME * RADAR_LINE_LENGTH;

/// The two line layouts that can appear in a frame.
#[derive(Debug, Clone, Copy)]
enum LineFormat {
    Br24(Br24Header),
    Br4g(Br4gHeader),
}

/// What a valid line header tells us.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LineHeader {
    scan_number: u16,
    angle: u16,
    heading: Option<u16>,
    range: u32,
}

impl LineFormat {
    fn parse(header_slice: &[u8]) -> Result<LineFormat, bincode::Error> {
        if header_slice[4..8] == BR24_MARK {
            Ok(LineFormat::Br24(deserialize::<Br24Header>(header_slice)?))
        } else {
            Ok(LineFormat::Br4g(deserialize::<Br4gHeader>(header_slice)?))
        }
    }

    fn validate(&self) -> Option<LineHeader> {
        let (header_len, status) = match self {
            LineFormat::Br24(h) => (h.header_len, h.status),
            LineFormat::Br4g(h) => (h.header_len, h.status),
        };
        if header_len != (RADAR_LINE_HEADER_LENGTH as u8) {
            log::warn!("Spoke with illegal header length ({}) ignored", header_len);
            return None;
        }
        if status != 0x02 && status != 0x12 {
            log::warn!("Spoke with illegal status (0x{:x}) ignored", status);
            return None;
        }

        match self {
            LineFormat::Br24(header) => {
                const BR24_RANGE_FACTOR: f64 = 10.0 / std::f64::consts::SQRT_2; // 10 m / sqrt(2)
                let range = ((u32::from_le_bytes(header.range) & 0xffffff) as f64
                    * BR24_RANGE_FACTOR) as u32;

                Some(LineHeader {
                    scan_number: u16::from_le_bytes(header.scan_number) & SCAN_NUMBER_MASK,
                    angle: u16::from_le_bytes(header.angle),
                    heading: extract_heading_value(u16::from_le_bytes(header.heading)),
                    range,
                })
            }
            LineFormat::Br4g(header) => {
                let large_range = u16::from_le_bytes(header.large_range);
                let small_range = u16::from_le_bytes(header.small_range);

                // 0x80 in the large field means the small field holds the range
                let range_raw = if large_range == 0x80 {
                    if small_range == 0xffff {
                        0
                    } else {
                        small_range as u32
                    }
                } else {
                    (large_range as u32) * BR4G_LARGE_RANGE_STEP
                };
                let range = (range_raw as f64 * BR4G_RANGE_FACTOR) as u32;

                Some(LineHeader {
                    scan_number: u16::from_le_bytes(header.scan_number) & SCAN_NUMBER_MASK,
                    angle: u16::from_le_bytes(header.angle),
                    heading: extract_heading_value(u16::from_le_bytes(header.heading)),
                    range,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeResult {
    pub statistics: Statistics,
    /// The range of the lines in this packet, when it differs from before
    pub range_changed: Option<u32>,
    /// Heading in degrees that the lines were stabilized with
    pub heading: Option<f64>,
}

/// Turns frames of one radar unit into bearing lines in the scan buffer.
pub struct ProtocolDecoder {
    unit: RadarUnit,
    prev_scan_number: Option<u16>,
    prev_range: u32,
    samples: [u8; RETURNS_PER_LINE],
}

impl ProtocolDecoder {
    pub fn new(unit: RadarUnit) -> Self {
        ProtocolDecoder {
            unit,
            prev_scan_number: None,
            prev_range: 0,
            samples: [0; RETURNS_PER_LINE],
        }
    }

    pub fn decode_packet(&mut self, data: &[u8], system: &RadarSystemState) -> DecodeResult {
        let mut result = DecodeResult::default();
        result.statistics.packets = 1;

        if data.len() < FRAME_HEADER_LENGTH + RADAR_LINE_LENGTH {
            log::warn!(
                "{}: UDP data frame with even less than one spoke, len {} dropped",
                self.unit,
                data.len()
            );
            result.statistics.broken_packets = 1;
            return result;
        }
        if (data.len() - FRAME_HEADER_LENGTH) % RADAR_LINE_LENGTH != 0 {
            log::warn!(
                "{}: UDP data frame with partial spoke, len {} dropped",
                self.unit,
                data.len()
            );
            result.statistics.broken_packets = 1;
            return result;
        }
        let spokes_in_frame = (data.len() - FRAME_HEADER_LENGTH) / RADAR_LINE_LENGTH;
        if spokes_in_frame > SPOKES_PER_FRAME {
            log::warn!(
                "{}: UDP data frame with {} spokes dropped",
                self.unit,
                spokes_in_frame
            );
            result.statistics.broken_packets = 1;
            return result;
        }

        log::trace!(
            "{}: Received UDP frame with {} spokes",
            self.unit,
            spokes_in_frame
        );

        let now = system.now();
        let head_up = system.settings().display_mode.is_head_up();

        let mut offset: usize = FRAME_HEADER_LENGTH;
        for scanline in 0..spokes_in_frame {
            let header_slice = &data[offset..offset + RADAR_LINE_HEADER_LENGTH];
            let spoke_slice = &data[offset + RADAR_LINE_HEADER_LENGTH..offset + RADAR_LINE_LENGTH];
            offset += RADAR_LINE_LENGTH;

            let header = match LineFormat::parse(header_slice) {
                Ok(format) => {
                    log::trace!("Received {:04} header {:?}", scanline, format);
                    format.validate()
                }
                Err(e) => {
                    log::warn!("Illegible spoke: {} header {:02X?}", e, &header_slice);
                    None
                }
            };
            let Some(header) = header else {
                result.statistics.broken_spokes += 1;
                continue;
            };

            self.track_sequence(header.scan_number, &mut result.statistics);

            if let Some(heading) = header.heading {
                let degrees = heading as f64 * 360. / SPOKES_RAW as f64;
                system.navigation.set_radar_heading(degrees, now);
            }
            result.heading = if head_up {
                None
            } else {
                system.navigation.heading(now).map(|(h, _)| h)
            };

            let bearing: SpokeBearing = mod_raw(
                (header.angle / 2) as i32 + result.heading.map(degrees_to_raw).unwrap_or(0),
            );
            log::trace!(
                "range {} angle {} bearing {} {}",
                header.range,
                header.angle,
                bearing,
                PrintableSpoke::new(spoke_slice)
            );

            self.samples.copy_from_slice(spoke_slice);
            // The outer ring marks the edge of the picture
            self.samples[RETURNS_PER_LINE - 1] = 0xff;

            if let Err(e) = system
                .scan
                .write(self.unit, bearing, &self.samples, header.range, now)
            {
                log::warn!("{}: cannot store spoke: {}", self.unit, e);
                result.statistics.broken_spokes += 1;
                continue;
            }
            result.statistics.spokes += 1;

            if header.range != self.prev_range && header.range != 0 {
                log::debug!(
                    "{}: range {} -> {} m",
                    self.unit,
                    self.prev_range,
                    header.range
                );
                self.prev_range = header.range;
                result.range_changed = Some(header.range);
            }
        }

        result
    }

    fn track_sequence(&mut self, scan_number: u16, statistics: &mut Statistics) {
        if let Some(prev) = self.prev_scan_number {
            if (prev + 1) % SPOKES_RAW != scan_number {
                let missing = (scan_number + SPOKES_RAW - prev - 1) % SPOKES_RAW;
                statistics.missing_spokes += missing as u32;
                log::trace!(
                    "{}: Spoke {} is not consecutive to previous {}, {} missing",
                    self.unit,
                    scan_number,
                    prev,
                    missing
                );
            }
        }
        self.prev_scan_number = Some(scan_number);
    }
}

pub(super) struct DataReceiver {
    session: Session,
    unit: RadarUnit,
    spoke_data_addr: SocketAddrV4,
    nic_addr: Ipv4Addr,
    sock: Option<UdpSocket>,
    decoder: ProtocolDecoder,
}

impl DataReceiver {
    pub fn new(
        session: Session,
        unit: RadarUnit,
        addresses: RadarAddresses,
        nic_addr: Ipv4Addr,
    ) -> DataReceiver {
        DataReceiver {
            session,
            unit,
            spoke_data_addr: addresses.spoke_data,
            nic_addr,
            sock: None,
            decoder: ProtocolDecoder::new(unit),
        }
    }

    async fn start_socket(&mut self) -> io::Result<()> {
        let sock = create_udp_multicast_listen(&self.spoke_data_addr, &self.nic_addr)?;
        self.sock = Some(sock);
        log::debug!(
            "{} {} via {}: listening for spoke data",
            self.unit,
            &self.spoke_data_addr,
            &self.nic_addr
        );
        Ok(())
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        loop {
            if self.sock.is_none() {
                if let Err(e) = self.start_socket().await {
                    log::warn!(
                        "{} {} via {}: create multicast failed: {}",
                        self.unit,
                        &self.spoke_data_addr,
                        &self.nic_addr,
                        e
                    );
                }
            }
            if self.sock.is_some() {
                match self.socket_loop(&subsys).await {
                    Err(RadarError::Shutdown) => {
                        return Ok(());
                    }
                    Err(e) => {
                        log::warn!("{}: spoke data receive failed: {}", self.unit, e);
                    }
                    Ok(()) => {}
                }
                self.sock = None;
            }
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                _ = sleep(Duration::from_millis(1000)) => {}
            }
        }
    }

    async fn socket_loop(&mut self, subsys: &SubsystemHandle) -> Result<(), RadarError> {
        let Some(sock) = self.sock.take() else {
            return Ok(());
        };
        // Anything beyond a full frame must still be seen, so that it can be rejected
        let mut buf = Vec::with_capacity(MAX_FRAME_LENGTH + RADAR_LINE_LENGTH);

        let r = loop {
            buf.clear();
            tokio::select! {
                _ = subsys.on_shutdown_requested() => {
                    break Err(RadarError::Shutdown);
                },
                r = sock.recv_buf_from(&mut buf) => {
                    match r {
                        Ok(_) => {
                            self.process_frame(&buf);
                        },
                        Err(e) => {
                            break Err(RadarError::Io(e));
                        }
                    }
                },
            }
        };
        self.sock = Some(sock);
        r
    }

    fn process_frame(&mut self, data: &[u8]) {
        let system = self.session.system();
        let result = self.decoder.decode_packet(data, &system);

        let now = system.now();
        match system.unit(self.unit) {
            Ok(mut state) => {
                state.data_seen(&result.statistics, now);
                if let Some(range) = result.range_changed {
                    state.range_meters = range;
                }
            }
            Err(e) => {
                log::warn!("{}: {}", self.unit, e);
                return;
            }
        }
        if let Some(range_meters) = result.range_changed {
            self.session.publish(RadarEvent::RangeChanged {
                unit: self.unit,
                range_meters,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DisplayMode, Settings};
    use crate::radar::LinkState;
    use crate::radar::render::{BlobColor, RenderGeometryBuilder};
    use crate::session::tests::new_fake;

    fn frame(lines: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![0u8; FRAME_HEADER_LENGTH];
        for line in lines {
            data.extend_from_slice(line);
        }
        data
    }

    fn br4g_line(scan_number: u16, angle: u16, small_range: u16, heading: u16) -> Vec<u8> {
        let mut line = vec![0u8; RADAR_LINE_LENGTH];
        line[0] = RADAR_LINE_HEADER_LENGTH as u8;
        line[1] = 0x02;
        line[2..4].copy_from_slice(&scan_number.to_le_bytes());
        line[6..8].copy_from_slice(&0x80u16.to_le_bytes());
        line[8..10].copy_from_slice(&angle.to_le_bytes());
        line[10..12].copy_from_slice(&heading.to_le_bytes());
        line[12..14].copy_from_slice(&small_range.to_le_bytes());
        line
    }

    fn br24_line(scan_number: u16, angle: u16, range: u32) -> Vec<u8> {
        let mut line = vec![0u8; RADAR_LINE_LENGTH];
        line[0] = RADAR_LINE_HEADER_LENGTH as u8;
        line[1] = 0x12;
        line[2..4].copy_from_slice(&scan_number.to_le_bytes());
        line[4..8].copy_from_slice(&BR24_MARK);
        line[8..10].copy_from_slice(&angle.to_le_bytes());
        line[10..12].copy_from_slice(&0x8000u16.to_le_bytes());
        line[12..16].copy_from_slice(&range.to_le_bytes());
        line
    }

    #[test]
    fn full_frame_lands_in_scan_buffer() {
        let system = RadarSystemState::new(Settings::default());
        let mut decoder = ProtocolDecoder::new(RadarUnit::A);

        let lines: Vec<Vec<u8>> = (0..32u16)
            .map(|i| {
                let mut line = br4g_line(i, i * 2, 7072, 0x8000);
                line[RADAR_LINE_HEADER_LENGTH + 100] = 0xff;
                line
            })
            .collect();

        let result = decoder.decode_packet(&frame(&lines), &system);
        assert_eq!(result.statistics.packets, 1);
        assert_eq!(result.statistics.broken_packets, 0);
        assert_eq!(result.statistics.spokes, 32);
        assert_eq!(result.statistics.missing_spokes, 0);
        assert_eq!(result.range_changed, Some(1000));

        let builder = RenderGeometryBuilder::new(&system.settings());
        for bearing in 0..32 {
            let line = system.scan.read(RadarUnit::A, bearing).unwrap().unwrap();
            assert_eq!(line.range_meters, 1000);
            assert_eq!(line.samples[RETURNS_PER_LINE - 1], 0xff);

            let blobs = builder.blobs_for_line(&line);
            assert_eq!(blobs[0].start_radius, 100);
            assert_eq!(blobs[0].end_radius, 101);
            assert_eq!(blobs[0].color, BlobColor::Red.color());
        }
        assert!(system.scan.read(RadarUnit::A, 32).unwrap().is_none());

        // Same range again is not news
        let result = decoder.decode_packet(&frame(&lines[0..1]), &system);
        assert_eq!(result.range_changed, None);
    }

    #[test]
    fn range_change_reaches_the_session() {
        let (session, _dir) = new_fake(Settings::default());
        let mut events = session.subscribe();
        let mut receiver = DataReceiver::new(
            session.clone(),
            RadarUnit::A,
            RadarAddresses::of(RadarUnit::A),
            Ipv4Addr::LOCALHOST,
        );
        assert_eq!(session.get_range_meters(RadarUnit::A).unwrap(), 0);

        receiver.process_frame(&frame(&[br4g_line(0, 0, 7072, 0)]));
        assert_eq!(session.get_range_meters(RadarUnit::A).unwrap(), 1000);
        assert_eq!(
            events.try_recv().unwrap(),
            RadarEvent::RangeChanged {
                unit: RadarUnit::A,
                range_meters: 1000
            }
        );
        assert_eq!(
            session.system().unit(RadarUnit::A).unwrap().link,
            LinkState::Active
        );

        // Same range, no event
        receiver.process_frame(&frame(&[br4g_line(1, 2, 7072, 0)]));
        assert!(events.try_recv().is_err());

        // No range does not overwrite the last known one
        receiver.process_frame(&frame(&[br4g_line(2, 4, 0xffff, 0)]));
        assert_eq!(session.get_range_meters(RadarUnit::A).unwrap(), 1000);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn missing_spokes_are_counted() {
        let system = RadarSystemState::new(Settings::default());
        let mut decoder = ProtocolDecoder::new(RadarUnit::A);

        let lines = vec![
            br4g_line(0, 0, 4000, 0),
            br4g_line(1, 2, 4000, 0),
            br4g_line(3, 6, 4000, 0),
        ];
        let result = decoder.decode_packet(&frame(&lines), &system);
        assert_eq!(result.statistics.spokes, 3);
        assert_eq!(result.statistics.missing_spokes, 1);

        // Wrap around the 4096 sequence space
        let lines = vec![br4g_line(4095, 0, 4000, 0), br4g_line(1, 2, 4000, 0)];
        let result = decoder.decode_packet(&frame(&lines), &system);
        assert_eq!(result.statistics.missing_spokes, 4091 + 1);
    }

    #[test]
    fn br24_range() {
        let system = RadarSystemState::new(Settings::default());
        let mut decoder = ProtocolDecoder::new(RadarUnit::A);

        let result = decoder.decode_packet(&frame(&[br24_line(7, 200, 1000)]), &system);
        assert_eq!(result.statistics.spokes, 1);
        assert_eq!(result.range_changed, Some(7071));
        let line = system.scan.read(RadarUnit::A, 100).unwrap().unwrap();
        assert_eq!(line.range_meters, 7071);
    }

    #[test]
    fn br4g_range_variants() {
        let no_range = LineFormat::parse(&br4g_line(0, 0, 0xffff, 0)[..24])
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(no_range.range, 0);

        // Both fields are scaled the same way
        let small = LineFormat::parse(&br4g_line(0, 0, 1024, 0)[..24])
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(small.range, 144);

        let mut line = br4g_line(0, 0, 1024, 0);
        line[6..8].copy_from_slice(&3000u16.to_le_bytes());
        let header = LineFormat::parse(&line[..24]).unwrap().validate().unwrap();
        assert_eq!(header.range, 147643);

        let mut line = br4g_line(0, 0, 0xffff, 0);
        line[6..8].copy_from_slice(&10u16.to_le_bytes());
        let header = LineFormat::parse(&line[..24]).unwrap().validate().unwrap();
        assert_eq!(header.range, 492);
    }

    #[test]
    fn broken_packets_are_dropped() {
        let system = RadarSystemState::new(Settings::default());
        let mut decoder = ProtocolDecoder::new(RadarUnit::A);

        let short = vec![0u8; FRAME_HEADER_LENGTH + 100];
        let result = decoder.decode_packet(&short, &system);
        assert_eq!(result.statistics.broken_packets, 1);
        assert_eq!(result.statistics.spokes, 0);

        let mut partial = frame(&[br4g_line(0, 0, 4000, 0)]);
        partial.extend_from_slice(&[0u8; 10]);
        let result = decoder.decode_packet(&partial, &system);
        assert_eq!(result.statistics.broken_packets, 1);
        assert_eq!(result.statistics.spokes, 0);

        let lines: Vec<Vec<u8>> = (0..33u16).map(|i| br4g_line(i, i * 2, 4000, 0)).collect();
        let result = decoder.decode_packet(&frame(&lines), &system);
        assert_eq!(result.statistics.broken_packets, 1);
        assert_eq!(result.statistics.spokes, 0);
    }

    #[test]
    fn broken_spokes_are_skipped() {
        let system = RadarSystemState::new(Settings::default());
        let mut decoder = ProtocolDecoder::new(RadarUnit::A);

        let mut bad_status = br4g_line(1, 2, 4000, 0);
        bad_status[1] = 0x05;
        let mut bad_length = br4g_line(2, 4, 4000, 0);
        bad_length[0] = 20;
        let lines = vec![br4g_line(0, 0, 4000, 0), bad_status, bad_length];

        let result = decoder.decode_packet(&frame(&lines), &system);
        assert_eq!(result.statistics.broken_packets, 0);
        assert_eq!(result.statistics.spokes, 1);
        assert_eq!(result.statistics.broken_spokes, 2);
        assert!(system.scan.read(RadarUnit::A, 1).unwrap().is_none());
    }

    #[test]
    fn radar_heading_stabilizes_lines() {
        let system = RadarSystemState::new(Settings::default());
        let mut decoder = ProtocolDecoder::new(RadarUnit::A);

        // True heading of 1024/4096 of a circle
        let line = br4g_line(0, 20, 4000, HEADING_TRUE_FLAG | 1024);
        let result = decoder.decode_packet(&frame(&[line.clone()]), &system);
        assert_eq!(result.heading, Some(90.));
        assert!(system.scan.read(RadarUnit::A, 10 + 512).unwrap().is_some());

        // Head up keeps the lines relative to the bow
        let system = RadarSystemState::new(Settings {
            display_mode: DisplayMode::Standalone,
            ..Settings::default()
        });
        let mut decoder = ProtocolDecoder::new(RadarUnit::A);
        let result = decoder.decode_packet(&frame(&[line]), &system);
        assert_eq!(result.heading, None);
        assert!(system.scan.read(RadarUnit::A, 10).unwrap().is_some());
    }

    #[test]
    fn heading_flags() {
        assert_eq!(extract_heading_value(0x45be), Some(0x05be));
        assert_eq!(extract_heading_value(0x07d6), None);
        assert_eq!(extract_heading_value(0x8000), None);
        assert_eq!(extract_heading_value(0x9234), None);
    }
}
