//! Polling interval of the component

use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// How often the component is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateInterval {
    Every(Duration),
    /// Only updated on explicit request
    Never,
}

impl Default for UpdateInterval {
    fn default() -> Self {
        UpdateInterval::Every(DEFAULT_UPDATE_INTERVAL)
    }
}

impl UpdateInterval {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            UpdateInterval::Every(d) => Some(*d),
            UpdateInterval::Never => None,
        }
    }
}

impl fmt::Display for UpdateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateInterval::Every(d) if d.subsec_nanos() == 0 => write!(f, "{}s", d.as_secs()),
            UpdateInterval::Every(d) if d.subsec_nanos() % 1_000_000 == 0 => {
                write!(f, "{}ms", d.as_millis())
            }
            UpdateInterval::Every(d) => write!(f, "{}us", d.as_micros()),
            UpdateInterval::Never => f.write_str("never"),
        }
    }
}

impl std::str::FromStr for UpdateInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("never") {
            return Ok(UpdateInterval::Never);
        }
        let duration = parse_time_period(s)?;
        if duration.is_zero() {
            return Err("update interval must be greater than zero, use 'never' to disable polling".to_string());
        }
        Ok(UpdateInterval::Every(duration))
    }
}

/// Parse `500ms`, `60s`, `5min`, `1h`, `1d`, `100us` or `HH:MM:SS` / `MM:SS` / `SS`
fn parse_time_period(s: &str) -> Result<Duration, String> {
    if s.contains(':') {
        return parse_clock(s);
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid time period '{s}'"))?;

    let seconds = match unit.trim() {
        "" | "s" | "sec" | "seconds" => value,
        "ms" => value / 1e3,
        "us" => value / 1e6,
        "min" | "minutes" => value * 60.0,
        "h" | "hours" => value * 3600.0,
        "d" | "days" => value * 86400.0,
        other => return Err(format!("unknown time unit '{other}' in '{s}'")),
    };

    Duration::try_from_secs_f64(seconds).map_err(|_| format!("time period '{s}' is out of range"))
}

fn parse_clock(s: &str) -> Result<Duration, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let parse = |part: &str, what: &str| -> Result<u64, String> {
        part.parse().map_err(|_| format!("invalid {what} in '{s}'"))
    };
    let (hours, mins, secs) = match parts[..] {
        [mins, secs] => (0, parse(mins, "minutes")?, parse(secs, "seconds")?),
        [hours, mins, secs] => (
            parse(hours, "hours")?,
            parse(mins, "minutes")?,
            parse(secs, "seconds")?,
        ),
        _ => return Err(format!("invalid time period '{s}'")),
    };
    hours
        .checked_mul(3600)
        .and_then(|total| total.checked_add(mins.checked_mul(60)?))
        .and_then(|total| total.checked_add(secs))
        .map(Duration::from_secs)
        .ok_or_else(|| format!("time period '{s}' is out of range"))
}

impl<'de> Deserialize<'de> for UpdateInterval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(0) => Err(de::Error::custom("update interval must be greater than zero")),
            Raw::Seconds(secs) => Ok(UpdateInterval::Every(Duration::from_secs(secs))),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!("60s".parse::<UpdateInterval>(), Ok(UpdateInterval::Every(Duration::from_secs(60))));
        assert_eq!("500ms".parse::<UpdateInterval>(), Ok(UpdateInterval::Every(Duration::from_millis(500))));
        assert_eq!("5min".parse::<UpdateInterval>(), Ok(UpdateInterval::Every(Duration::from_secs(300))));
        assert_eq!("1h".parse::<UpdateInterval>(), Ok(UpdateInterval::Every(Duration::from_secs(3600))));
        assert_eq!("1.5s".parse::<UpdateInterval>(), Ok(UpdateInterval::Every(Duration::from_millis(1500))));
        assert_eq!("never".parse::<UpdateInterval>(), Ok(UpdateInterval::Never));
    }

    #[test]
    fn test_clock_format() {
        assert_eq!("1:30".parse::<UpdateInterval>(), Ok(UpdateInterval::Every(Duration::from_secs(90))));
        assert_eq!("01:00:00".parse::<UpdateInterval>(), Ok(UpdateInterval::Every(Duration::from_secs(3600))));
    }

    #[test]
    fn test_clock_overflow_is_an_error() {
        assert_eq!(
            "5124095576030432:00:00".parse::<UpdateInterval>(),
            Err("time period '5124095576030432:00:00' is out of range".to_string())
        );
        assert!("1:18446744073709551615".parse::<UpdateInterval>().is_err());
    }

    #[test]
    fn test_invalid() {
        assert!("fast".parse::<UpdateInterval>().is_err());
        assert!("10 parsecs".parse::<UpdateInterval>().is_err());
        assert!("0s".parse::<UpdateInterval>().is_err());
    }

    #[test]
    fn test_deserialize_integer_as_seconds() {
        let interval: UpdateInterval = serde_yaml::from_str("30").unwrap();
        assert_eq!(interval, UpdateInterval::Every(Duration::from_secs(30)));
    }

    #[test]
    fn test_display() {
        assert_eq!(UpdateInterval::default().to_string(), "60s");
        assert_eq!(UpdateInterval::Every(Duration::from_millis(250)).to_string(), "250ms");
    }
}
