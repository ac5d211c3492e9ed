//
// The BR24 and 4G accept any range in decimeters, but the displays only
// offer a fixed list. Which list depends on the units the user works in.
//

use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::LazyLock;

use super::{NAUTICAL_MILE, NAUTICAL_MILE_F64};

// The radar only accepts ranges strictly between these two
pub const MIN_RANGE: i32 = 50;
pub const MAX_RANGE: i32 = 64000;

pub fn is_valid_range(meters: i32) -> bool {
    meters > MIN_RANGE && meters < MAX_RANGE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RangeUnits {
    #[default]
    NauticalMiles = 0,
    StatuteMiles = 1,
    Kilometers = 2,
    Meters = 3,
}

impl RangeUnits {
    pub fn ranges(&self) -> &'static Ranges {
        match self {
            RangeUnits::NauticalMiles | RangeUnits::StatuteMiles => &NAUTICAL_RANGES,
            RangeUnits::Kilometers | RangeUnits::Meters => &METRIC_RANGES,
        }
    }
}

pub static METRIC_RANGES: LazyLock<Ranges> = LazyLock::new(|| {
    Ranges::new(vec![
        50, 75, 100, 250, 500, 750, 1000, 1500, 2000, 3000, 4000, 6000, 8000, 12000, 16000, 24000,
        36000, 48000,
    ])
});

pub static NAUTICAL_RANGES: LazyLock<Ranges> = LazyLock::new(|| {
    Ranges::new(vec![
        50,
        75,
        200,
        NAUTICAL_MILE / 4,
        NAUTICAL_MILE / 2,
        NAUTICAL_MILE * 3 / 4,
        NAUTICAL_MILE,
        NAUTICAL_MILE * 2,
        NAUTICAL_MILE * 3,
        NAUTICAL_MILE * 4,
        NAUTICAL_MILE * 6,
        NAUTICAL_MILE * 8,
        NAUTICAL_MILE * 12,
        NAUTICAL_MILE * 16,
        NAUTICAL_MILE * 24,
        NAUTICAL_MILE * 36,
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Range {
    distance: i32,
}

impl Range {
    pub fn new(distance: i32) -> Self {
        Range { distance }
    }

    pub fn distance(&self) -> i32 {
        self.distance
    }

    fn near(a: i32, b: i32) -> bool {
        a >= b - 1 && a <= b + 1 || (b == 0 && a == 99)
    }

    fn metric(v: i32) -> bool {
        Self::near(v % 100, 0) || Self::near(v, 25) || Self::near(v, 50) || Self::near(v, 75)
    }

    pub fn is_metric(&self) -> bool {
        Self::metric(self.distance)
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let v = self.distance;
        if Range::metric(v) {
            if v >= 1000 {
                if v % 1000 == 0 {
                    write!(f, "{} km", v / 1000)
                } else {
                    write!(f, "{} km", v as f64 / 1000.0)
                }
            } else {
                write!(f, "{} m", v)
            }
        } else if v >= NAUTICAL_MILE {
            if v % NAUTICAL_MILE == 0 {
                write!(f, "{} nm", v / NAUTICAL_MILE)
            } else {
                write!(f, "{} nm", v as f64 / NAUTICAL_MILE_F64)
            }
        } else if v % (NAUTICAL_MILE / 2) == 0 {
            write!(f, "{}/2 nm", v / (NAUTICAL_MILE / 2))
        } else if v % (NAUTICAL_MILE / 4) == 0 {
            write!(f, "{}/4 nm", v / (NAUTICAL_MILE / 4))
        } else {
            write!(f, "{} m", v)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ranges {
    all: Vec<Range>,
}

impl Ranges {
    pub fn new(distances: Vec<i32>) -> Self {
        let mut all: Vec<Range> = distances.into_iter().map(Range::new).collect();
        all.sort();
        Ranges { all }
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.all.iter()
    }

    /// The smallest range the radar accepts that shows at least `wanted` meters,
    /// or the largest one it accepts.
    pub fn at_least(&self, wanted: f64) -> Option<Range> {
        let mut valid = self.all.iter().filter(|r| is_valid_range(r.distance));
        valid
            .clone()
            .find(|r| r.distance as f64 >= wanted)
            .or(valid.next_back())
            .copied()
    }
}

/// Follows the distance the chart shows and picks a radar range to match.
#[derive(Debug, Clone, Default)]
pub struct AutoRange {
    previous_wanted: f64,
}

impl AutoRange {
    pub fn new() -> Self {
        AutoRange::default()
    }

    /// Returns the range to command when `wanted` moved more than 1% away from
    /// the last wanted range that was acted upon.
    pub fn update(&mut self, wanted: f64, units: RangeUnits) -> Option<Range> {
        if wanted <= 0. {
            return None;
        }
        if wanted > 1.01 * self.previous_wanted || wanted < 0.99 * self.previous_wanted {
            self.previous_wanted = wanted;
            let range = units.ranges().at_least(wanted);
            log::debug!("auto range: wanted {:.0} m -> {:?}", wanted, range);
            return range;
        }
        None
    }
}
