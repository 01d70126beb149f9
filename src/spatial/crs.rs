use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TileBankError;

/// A coordinate reference system, either by EPSG code or as free text
/// (WKT or a PROJ string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    Epsg(u32),
    Wkt(String),
}

impl Crs {
    pub const WGS84: Crs = Crs::Epsg(4326);

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Wkt(_) => None,
        }
    }

    pub fn wkt(&self) -> Option<&str> {
        match self {
            Crs::Epsg(_) => None,
            Crs::Wkt(text) => Some(text),
        }
    }
}

impl FromStr for Crs {
    type Err = TileBankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TileBankError::UnsupportedCrs("empty CRS definition".into()));
        }
        if s.len() > 5 && s[..5].eq_ignore_ascii_case("epsg:") {
            let code = s[5..]
                .trim()
                .parse::<u32>()
                .map_err(|_| TileBankError::UnsupportedCrs(s.to_string()))?;
            return Ok(Crs::Epsg(code));
        }
        Ok(Crs::Wkt(s.to_string()))
    }
}

impl TryFrom<String> for Crs {
    type Error = TileBankError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Wkt(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg_case_insensitive() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Epsg(4326));
        assert_eq!("epsg:32633".parse::<Crs>().unwrap(), Crs::Epsg(32633));
        assert!("EPSG:abc".parse::<Crs>().is_err());
        assert!("  ".parse::<Crs>().is_err());
    }

    #[test]
    fn test_parse_text() {
        let crs: Crs = "+proj=utm +zone=33 +datum=WGS84".parse().unwrap();
        assert_eq!(crs.wkt(), Some("+proj=utm +zone=33 +datum=WGS84"));
        assert_eq!(crs.epsg(), None);
    }

    #[test]
    fn test_display_roundtrip() {
        for crs in [Crs::Epsg(3857), Crs::Wkt("+proj=longlat +datum=WGS84".into())] {
            assert_eq!(crs.to_string().parse::<Crs>().unwrap(), crs);
        }
    }
}
