//! Heading, variation, course and position from NMEA 0183 over UDP, and
//! from the radar itself when the scanner has a heading sensor attached.

use atomic_float::AtomicF64;
use enum_primitive_derive::Primitive;
use nmea_parser::*;
use num_traits::FromPrimitive;
use std::{
    io::ErrorKind,
    net::SocketAddrV4,
    sync::Arc,
    sync::atomic::{AtomicU8, AtomicU64, Ordering},
    time::Duration,
};
use strum::Display;
use tokio::{net::UdpSocket, time::sleep};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::network::create_udp_listen;
use crate::radar::transform::mod_degrees;
use crate::radar::{RadarError, RadarSystemState, Timestamp};

pub const HEADING_TIMEOUT: Duration = Duration::from_secs(10);
pub const VARIATION_TIMEOUT: Duration = Duration::from_secs(600);
pub const POSITION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Primitive)]
pub enum HeadingSource {
    None = 0,
    Radar = 1,
    Hdt = 2,
    Hdm = 3,
    Cog = 4,
}

/// A value with the time it was last set. NaN means never set.
struct Fix {
    value: AtomicF64,
    timestamp: AtomicU64,
}

impl Fix {
    fn new() -> Self {
        Fix {
            value: AtomicF64::new(f64::NAN),
            timestamp: AtomicU64::new(0),
        }
    }

    fn set(&self, value: Option<f64>, now: Timestamp) {
        match value {
            Some(v) if v.is_finite() => {
                self.value.store(v, Ordering::Release);
                self.timestamp.store(now, Ordering::Release);
            }
            _ => {}
        }
    }

    fn get(&self, now: Timestamp, timeout: Duration) -> Option<f64> {
        let v = self.value.load(Ordering::Acquire);
        if v.is_nan() {
            return None;
        }
        let t = self.timestamp.load(Ordering::Acquire);
        if now.saturating_sub(t) > timeout.as_millis() as u64 {
            return None;
        }
        Some(v)
    }

    fn age(&self, now: Timestamp) -> Option<Duration> {
        if self.value.load(Ordering::Acquire).is_nan() {
            return None;
        }
        Some(Duration::from_millis(
            now.saturating_sub(self.timestamp.load(Ordering::Acquire)),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub lat: f64,
    pub lon: f64,
}

pub struct NavigationData {
    radar_heading: Fix,
    heading_true: Fix,
    heading_magnetic: Fix,
    variation: Fix,
    cog: Fix,
    latitude: Fix,
    longitude: Fix,
    source: AtomicU8,
}

impl NavigationData {
    pub fn new() -> Self {
        NavigationData {
            radar_heading: Fix::new(),
            heading_true: Fix::new(),
            heading_magnetic: Fix::new(),
            variation: Fix::new(),
            cog: Fix::new(),
            latitude: Fix::new(),
            longitude: Fix::new(),
            source: AtomicU8::new(HeadingSource::None as u8),
        }
    }

    pub fn set_radar_heading(&self, heading: f64, now: Timestamp) {
        self.radar_heading.set(Some(heading), now);
    }

    pub fn set_heading_true(&self, heading: Option<f64>, now: Timestamp) {
        self.heading_true.set(heading, now);
    }

    pub fn set_heading_magnetic(&self, heading: Option<f64>, now: Timestamp) {
        self.heading_magnetic.set(heading, now);
    }

    /// East is positive.
    pub fn set_variation(&self, variation: Option<f64>, now: Timestamp) {
        self.variation.set(variation, now);
    }

    pub fn set_cog(&self, cog: Option<f64>, now: Timestamp) {
        self.cog.set(cog, now);
    }

    pub fn set_position(&self, lat: Option<f64>, lon: Option<f64>, now: Timestamp) {
        if let (Some(lat), Some(lon)) = (lat, lon) {
            self.latitude.set(Some(lat), now);
            self.longitude.set(Some(lon), now);
        }
    }

    pub fn position(&self, now: Timestamp) -> Option<GeoPosition> {
        match (
            self.latitude.get(now, POSITION_TIMEOUT),
            self.longitude.get(now, POSITION_TIMEOUT),
        ) {
            (Some(lat), Some(lon)) => Some(GeoPosition { lat, lon }),
            _ => None,
        }
    }

    /// How long ago the last position came in.
    pub fn position_age(&self, now: Timestamp) -> Option<Duration> {
        self.latitude.age(now)
    }

    /// Best available true heading. The radar's own heading sensor wins over
    /// HDT, which wins over HDM with variation, which wins over COG.
    pub fn heading(&self, now: Timestamp) -> Option<(f64, HeadingSource)> {
        let found = if let Some(h) = self.radar_heading.get(now, HEADING_TIMEOUT) {
            Some((h, HeadingSource::Radar))
        } else if let Some(h) = self.heading_true.get(now, HEADING_TIMEOUT) {
            Some((h, HeadingSource::Hdt))
        } else if let (Some(h), Some(v)) = (
            self.heading_magnetic.get(now, HEADING_TIMEOUT),
            self.variation.get(now, VARIATION_TIMEOUT),
        ) {
            Some((mod_degrees(h + v), HeadingSource::Hdm))
        } else {
            self.cog
                .get(now, HEADING_TIMEOUT)
                .map(|c| (c, HeadingSource::Cog))
        };

        let source = found.map(|(_, s)| s).unwrap_or(HeadingSource::None);
        let previous = self.source.swap(source as u8, Ordering::AcqRel);
        if previous != source as u8 {
            let previous = HeadingSource::from_u8(previous).unwrap_or(HeadingSource::None);
            if source == HeadingSource::None {
                log::warn!("Heading source {} lost", previous);
            } else {
                log::info!("Heading source {} -> {}", previous, source);
            }
        }
        found.map(|(h, s)| (mod_degrees(h), s))
    }

    pub fn heading_source(&self) -> HeadingSource {
        HeadingSource::from_u8(self.source.load(Ordering::Acquire)).unwrap_or(HeadingSource::None)
    }
}

impl Default for NavigationData {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a sentence in its fields after checking the checksum, if present.
fn nmea_fields(s: &str) -> Result<Vec<&str>, RadarError> {
    let s = s.trim();
    let body = s
        .strip_prefix('$')
        .or_else(|| s.strip_prefix('!'))
        .ok_or_else(|| RadarError::ParseNmea0183(format!("{s}: no start delimiter")))?;
    let body = match body.split_once('*') {
        Some((body, checksum)) => {
            let expected = u8::from_str_radix(checksum, 16)
                .map_err(|_| RadarError::ParseNmea0183(format!("{s}: bad checksum field")))?;
            let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
            if actual != expected {
                return Err(RadarError::ParseNmea0183(format!(
                    "{s}: checksum {actual:02X} != {expected:02X}"
                )));
            }
            body
        }
        None => body,
    };
    Ok(body.split(',').collect())
}

fn sentence_type<'a>(fields: &[&'a str]) -> &'a str {
    fields
        .first()
        .and_then(|f| f.get(2..))
        .unwrap_or_default()
}

fn signed_angle(value: &str, direction: &str) -> Option<f64> {
    let v: f64 = value.parse().ok()?;
    match direction {
        "E" => Some(v),
        "W" => Some(-v),
        _ => None,
    }
}

pub struct NmeaReceiver {
    system: Arc<RadarSystemState>,
    addr: SocketAddrV4,
    parser: NmeaParser,
}

impl NmeaReceiver {
    pub fn new(system: Arc<RadarSystemState>, addr: SocketAddrV4) -> Self {
        NmeaReceiver {
            system,
            addr,
            parser: NmeaParser::new(),
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), RadarError> {
        log::debug!("NMEA0183 receiver on {} (re)start", self.addr);
        loop {
            let socket = tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                r = async { create_udp_listen(&self.addr) } => r,
            };
            match socket {
                Ok(socket) => {
                    log::info!("Listening to NMEA0183 data on {}", self.addr);
                    match self.receive_loop(&socket, &subsys).await {
                        Ok(()) | Err(RadarError::Shutdown) => {
                            log::debug!("NMEA0183 receive_loop shutdown");
                            return Ok(());
                        }
                        Err(e) => {
                            log::warn!("NMEA0183 receive_loop restart on {}", e);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Cannot listen for NMEA0183 on {}: {}", self.addr, e);
                }
            }
            tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                _ = sleep(Duration::from_millis(1000)) => {}
            }
        }
    }

    // Loop until we get an error, then just return the error
    // or Ok if we are to shutdown.
    async fn receive_loop(
        &mut self,
        socket: &UdpSocket,
        subsys: &SubsystemHandle,
    ) -> Result<(), RadarError> {
        let mut buf = [0; 2000];
        loop {
            tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => {
                    return Ok(());
                },
                r = socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, _)) => {
                            self.process_udp_buf(&buf[..len]);
                        }
                        Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                        Err(e) => {
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    fn process_udp_buf(&mut self, buf: &[u8]) {
        if let Ok(data) = std::str::from_utf8(buf) {
            for line in data.lines().filter(|l| !l.trim().is_empty()) {
                if let Err(e) = self.parse_nmea0183(line) {
                    log::warn!("{}", e);
                }
            }
        }
    }

    pub fn parse_nmea0183(&mut self, s: &str) -> Result<(), RadarError> {
        let now = self.system.now();
        let nav = &self.system.navigation;
        log::trace!("NMEA0183 <- {}", s);

        let fields = nmea_fields(s)?;
        match sentence_type(&fields) {
            "HDM" => {
                nav.set_heading_magnetic(fields.get(1).and_then(|h| h.parse().ok()), now);
                return Ok(());
            }
            "HDG" => {
                let heading: Option<f64> = fields.get(1).and_then(|h| h.parse().ok());
                let deviation = match (fields.get(2), fields.get(3)) {
                    (Some(d), Some(e)) => signed_angle(d, e),
                    _ => None,
                };
                let variation = match (fields.get(4), fields.get(5)) {
                    (Some(v), Some(e)) => signed_angle(v, e),
                    _ => None,
                };
                nav.set_heading_magnetic(heading.map(|h| h + deviation.unwrap_or(0.)), now);
                nav.set_variation(variation, now);
                return Ok(());
            }
            _ => {}
        }

        match self.parser.parse_sentence(s.trim()) {
            Ok(ParsedMessage::Rmc(rmc)) => {
                // A receiver without a fix repeats its last values
                if rmc.status_active == Some(false) {
                    return Ok(());
                }
                nav.set_position(rmc.latitude, rmc.longitude, now);
                nav.set_cog(rmc.bearing, now);
                if rmc.variation.is_some() {
                    nav.set_variation(rmc.variation, now);
                }
            }
            Ok(ParsedMessage::Gll(gll)) => {
                nav.set_position(gll.latitude, gll.longitude, now);
            }
            Ok(ParsedMessage::Hdt(hdt)) => {
                nav.set_heading_true(hdt.heading_true, now);
            }
            Ok(ParsedMessage::Vtg(vtg)) => {
                nav.set_cog(vtg.cog_true, now);
            }

            Err(e) => match e {
                ParseError::UnsupportedSentenceType(_) => {}
                ParseError::CorruptedSentence(e2) => {
                    return Err(RadarError::ParseNmea0183(format!("{s}: {e2}")));
                }
                ParseError::InvalidSentence(e2) => {
                    return Err(RadarError::ParseNmea0183(format!("{s}: {e2}")));
                }
            },
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn with_checksum(body: &str) -> String {
        let c = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${body}*{c:02X}")
    }

    #[test]
    fn heading_priority() {
        let nav = NavigationData::new();
        assert_eq!(nav.heading(0), None);

        nav.set_cog(Some(10.), 0);
        assert_eq!(nav.heading(0), Some((10., HeadingSource::Cog)));

        nav.set_heading_magnetic(Some(350.), 0);
        // Magnetic heading is useless without variation
        assert_eq!(nav.heading(0).unwrap().1, HeadingSource::Cog);
        nav.set_variation(Some(15.), 0);
        assert_eq!(nav.heading(0), Some((5., HeadingSource::Hdm)));

        nav.set_heading_true(Some(20.), 0);
        assert_eq!(nav.heading(0), Some((20., HeadingSource::Hdt)));

        nav.set_radar_heading(30., 0);
        assert_eq!(nav.heading(0), Some((30., HeadingSource::Radar)));
        assert_eq!(nav.heading_source(), HeadingSource::Radar);
    }

    #[test]
    fn sources_expire() {
        let nav = NavigationData::new();
        nav.set_heading_true(Some(20.), 1_000);
        nav.set_heading_magnetic(Some(100.), 1_000);
        nav.set_variation(Some(-2.), 1_000);
        nav.set_position(Some(53.), Some(5.), 1_000);

        let later = 1_000 + HEADING_TIMEOUT.as_millis() as u64 + 1;
        assert_eq!(nav.heading(later), None);
        assert_eq!(nav.heading_source(), HeadingSource::None);
        assert!(nav.position(later).is_some());
        assert_eq!(nav.position_age(later), Some(Duration::from_millis(later - 1_000)));

        // Variation outlives the heading
        nav.set_heading_magnetic(Some(100.), later);
        assert_eq!(nav.heading(later), Some((98., HeadingSource::Hdm)));

        let much_later = 1_000 + POSITION_TIMEOUT.as_millis() as u64 + 1;
        assert!(nav.position(much_later).is_none());
    }

    #[test]
    fn checksum_is_verified() {
        let good = with_checksum("IIHDM,123.4,M");
        assert_eq!(nmea_fields(&good).unwrap(), vec!["IIHDM", "123.4", "M"]);
        assert!(nmea_fields("$IIHDM,123.4,M*00").is_err());
        assert!(nmea_fields("IIHDM,123.4,M").is_err());
    }

    #[test]
    fn parse_sentences() {
        let system = Arc::new(RadarSystemState::new(Settings::default()));
        let mut receiver =
            NmeaReceiver::new(system.clone(), "127.0.0.1:10110".parse().unwrap());
        let now = system.now();

        receiver
            .parse_nmea0183(&with_checksum("HCHDG,101.5,,,2.5,W"))
            .unwrap();
        assert_eq!(
            system.navigation.heading(now),
            Some((99., HeadingSource::Hdm))
        );

        receiver
            .parse_nmea0183(&with_checksum("IIHDT,45.0,T"))
            .unwrap();
        assert_eq!(
            system.navigation.heading(now),
            Some((45., HeadingSource::Hdt))
        );

        receiver
            .parse_nmea0183("$GPRMC,092750.000,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,,,A*43")
            .unwrap();
        let position = system.navigation.position(system.now()).unwrap();
        assert!((position.lat - 53.361336).abs() < 1e-5);
        assert!((position.lon + 6.505620).abs() < 1e-5);

        // Unknown sentences are fine, garbage is not
        receiver
            .parse_nmea0183(&with_checksum("IIMTW,12.1,C"))
            .unwrap();
        assert!(receiver.parse_nmea0183("$IIHDT,45.0,T*00").is_err());
    }

    #[test]
    fn rmc_course_and_variation() {
        let system = Arc::new(RadarSystemState::new(Settings::default()));
        let mut receiver =
            NmeaReceiver::new(system.clone(), "127.0.0.1:10110".parse().unwrap());

        // No fix: nothing is taken over
        receiver
            .parse_nmea0183(&with_checksum(
                "GPRMC,092750.000,V,5321.6802,N,00630.3372,W,0.02,31.66,280511,2.5,W",
            ))
            .unwrap();
        let now = system.now();
        assert_eq!(system.navigation.heading(now), None);
        assert!(system.navigation.position(now).is_none());

        receiver
            .parse_nmea0183(&with_checksum(
                "GPRMC,092750.000,A,5321.6802,N,00630.3372,W,0.02,31.66,280511,2.5,W",
            ))
            .unwrap();
        let now = system.now();
        assert_eq!(
            system.navigation.heading(now),
            Some((31.66, HeadingSource::Cog))
        );
        assert!(system.navigation.position(now).is_some());

        // The variation from RMC turns a magnetic heading into a true one
        receiver
            .parse_nmea0183(&with_checksum("HCHDM,100.0,M"))
            .unwrap();
        assert_eq!(
            system.navigation.heading(system.now()),
            Some((97.5, HeadingSource::Hdm))
        );
    }
}
