use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Client build version as sent in the Hello handshake.
///
/// Encoded on the wire as `year * 25000 + month * 1800 + day * 50 + revision`.
/// Config files spell it `"year.month.day[.revision]"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionInfo {
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub revision: i32,
}

impl VersionInfo {
    pub const fn new(year: i32, month: i32, day: i32, revision: i32) -> Self {
        Self {
            year,
            month,
            day,
            revision,
        }
    }

    pub fn encode(&self) -> i32 {
        self.year * 25000 + self.month * 1800 + self.day * 50 + self.revision
    }

    pub fn decode(encoded: i32) -> Self {
        let year = encoded / 25000;
        let rem = encoded % 25000;
        let month = rem / 1800;
        let rem = rem % 1800;
        Self {
            year,
            month,
            day: rem / 50,
            revision: rem % 50,
        }
    }
}

/// The build this implementation speaks by default.
pub const DEFAULT_VERSION: VersionInfo = VersionInfo::new(2021, 4, 14, 0);

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.year, self.month, self.day)?;
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        Ok(())
    }
}

impl FromStr for VersionInfo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<i32> = s
            .split('.')
            .map(|part| part.parse::<i32>().map_err(|e| format!("{part}: {e}")))
            .collect::<Result<_, _>>()?;
        match parts.as_slice() {
            [year, month, day] => Ok(Self::new(*year, *month, *day, 0)),
            [year, month, day, revision] => Ok(Self::new(*year, *month, *day, *revision)),
            _ => Err(format!("expected year.month.day[.revision], got {s}")),
        }
    }
}

impl TryFrom<String> for VersionInfo {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionInfo> for String {
    fn from(version: VersionInfo) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let v = VersionInfo::new(2021, 4, 14, 0);
        assert_eq!(v.encode(), 50_532_900);
        assert_eq!(VersionInfo::decode(50_532_900), v);
    }

    #[test]
    fn test_revision_survives() {
        let v = VersionInfo::new(2020, 12, 9, 3);
        assert_eq!(VersionInfo::decode(v.encode()), v);
    }

    #[test]
    fn test_parse_and_display() {
        let v: VersionInfo = "2021.6.30.1".parse().unwrap();
        assert_eq!(v, VersionInfo::new(2021, 6, 30, 1));
        assert_eq!(v.to_string(), "2021.6.30.1");
        assert_eq!("2021.4.14".parse::<VersionInfo>().unwrap().to_string(), "2021.4.14");
        assert!("2021.x.1".parse::<VersionInfo>().is_err());
        assert!("2021".parse::<VersionInfo>().is_err());
    }
}
