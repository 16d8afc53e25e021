use std::convert::TryFrom;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const KBPS: u64 = 1_000;
const MBPS: u64 = 1_000_000;
const GBPS: u64 = 1_000_000_000;

pub const MAX: Bandwidth = Bandwidth { val: u64::MAX };
pub const ZERO: Bandwidth = Bandwidth { val: 0 };

pub trait BandwidthTrait {
    fn bps(self) -> Bandwidth;
    fn kbps(self) -> Bandwidth;
    fn mbps(self) -> Bandwidth;
    fn gbps(self) -> Bandwidth;
}

/// A data rate, stored in bits per second.
///
/// In configuration files a rate is either an integer (bits per second) or a
/// string with a unit suffix: `"25Mbps"`, `"1.5Gbit"`, `"800k"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "BandwidthRepr", into = "String")]
pub struct Bandwidth {
    val: u64,
}

impl Bandwidth {
    #[inline]
    pub fn val(&self) -> u64 {
        self.val
    }

    #[inline]
    pub fn checked_add(self, rhs: Bandwidth) -> Option<Bandwidth> {
        self.val.checked_add(rhs.val).map(|val| Bandwidth { val })
    }

    #[inline]
    pub fn saturating_add(self, rhs: Bandwidth) -> Bandwidth {
        Bandwidth {
            val: self.val.saturating_add(rhs.val),
        }
    }
}

impl std::fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // lossless: pick the largest unit that divides the value
        let v = self.val;
        if v != 0 && v % GBPS == 0 {
            write!(f, "{}Gbps", v / GBPS)
        } else if v != 0 && v % MBPS == 0 {
            write!(f, "{}Mbps", v / MBPS)
        } else if v != 0 && v % KBPS == 0 {
            write!(f, "{}Kbps", v / KBPS)
        } else {
            write!(f, "{}bps", v)
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseBandwidthError {
    #[error("empty bandwidth string")]
    Empty,
    #[error("invalid number in bandwidth: {0}")]
    Number(String),
    #[error("unknown bandwidth unit: {0}")]
    Unit(String),
    #[error("bandwidth out of range: {0}")]
    Range(String),
}

impl FromStr for Bandwidth {
    type Err = ParseBandwidthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseBandwidthError::Empty);
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or_else(|| s.len());
        let (num, unit) = s.split_at(split);
        let num: f64 = num
            .parse()
            .map_err(|_| ParseBandwidthError::Number(s.to_owned()))?;

        let scale = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "bps" | "bit" => 1,
            "k" | "kbps" | "kbit" => KBPS,
            "m" | "mbps" | "mbit" => MBPS,
            "g" | "gbps" | "gbit" => GBPS,
            other => return Err(ParseBandwidthError::Unit(other.to_owned())),
        };

        let val = (num * scale as f64).round();
        if !val.is_finite() || val > u64::MAX as f64 {
            return Err(ParseBandwidthError::Range(s.to_owned()));
        }
        Ok(Bandwidth { val: val as u64 })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BandwidthRepr {
    Bits(u64),
    Text(String),
}

impl TryFrom<BandwidthRepr> for Bandwidth {
    type Error = ParseBandwidthError;

    fn try_from(repr: BandwidthRepr) -> Result<Self, Self::Error> {
        match repr {
            BandwidthRepr::Bits(val) => Ok(Bandwidth { val }),
            BandwidthRepr::Text(s) => s.parse(),
        }
    }
}

impl From<Bandwidth> for String {
    fn from(bw: Bandwidth) -> String {
        bw.to_string()
    }
}

impl std::iter::Sum for Bandwidth {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ZERO, Bandwidth::saturating_add)
    }
}

impl<'a> std::iter::Sum<&'a Bandwidth> for Bandwidth {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

macro_rules! impl_bandwidth_trait_for {
    ($($ty:ty),+ $(,)?) => (
        $(impl BandwidthTrait for $ty {
            fn bps(self) -> Bandwidth {
                Bandwidth { val: self as u64 }
            }
            fn kbps(self) -> Bandwidth {
                Bandwidth { val: (self as f64 * KBPS as f64) as u64 }
            }
            fn mbps(self) -> Bandwidth {
                Bandwidth { val: (self as f64 * MBPS as f64) as u64 }
            }
            fn gbps(self) -> Bandwidth {
                Bandwidth { val: (self as f64 * GBPS as f64) as u64 }
            }
        })+
    )
}

impl_bandwidth_trait_for!(u8, u16, u32, u64, i32, i64, usize, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn units() {
        assert_eq!(50.mbps().val(), 50_000_000);
        assert_eq!(1.5f64.gbps(), 1500.mbps());
        assert_eq!(800.kbps().saturating_add(200.kbps()), 1.mbps());
        assert_eq!(format!("{}", 25.mbps()), "25Mbps");
        assert_eq!(format!("{}", 1500.kbps()), "1500Kbps");
        assert_eq!(format!("{}", 2.gbps()), "2Gbps");
        assert_eq!(format!("{}", 7.bps()), "7bps");
        assert_eq!(format!("{}", ZERO), "0bps");
    }

    #[test]
    fn parse() {
        assert_eq!("50Mbps".parse::<Bandwidth>().unwrap(), 50.mbps());
        assert_eq!("1.5 gbit".parse::<Bandwidth>().unwrap(), 1500.mbps());
        assert_eq!("800k".parse::<Bandwidth>().unwrap(), 800.kbps());
        assert_eq!("1000".parse::<Bandwidth>().unwrap(), 1.kbps());
        assert_eq!(
            "10furlongs".parse::<Bandwidth>(),
            Err(ParseBandwidthError::Unit("furlongs".to_owned()))
        );
        assert!("-5Mbps".parse::<Bandwidth>().is_err());
        assert_eq!("".parse::<Bandwidth>(), Err(ParseBandwidthError::Empty));
    }

    #[test]
    fn sum_saturates() {
        let s: Bandwidth = vec![MAX, 1.mbps()].into_iter().sum();
        assert_eq!(s, MAX);
        let s: Bandwidth = [50.mbps(), 50.mbps()].iter().sum();
        assert_eq!(s, 100.mbps());
        assert_eq!(MAX.checked_add(1.bps()), None);
    }
}
