use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::error::EdenError;

/// A coordinate reference system, either a known EPSG code or a PROJ.4 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    Epsg(u32),
    Proj(String),
}

impl Crs {
    /// WGS84 longitude/latitude in degrees, the working convention.
    pub const WGS84: Crs = Crs::Epsg(4326);

    /// Parse `"EPSG:<code>"` or a PROJ.4 string starting with `+proj=`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let upper = text.to_ascii_uppercase();
        if let Some(code) = upper.strip_prefix("EPSG:") {
            let code: u32 = code.trim().parse()
                .map_err(|_| EdenError::config(text, "EPSG code is not a number"))?;
            if epsg_proj4(code).is_none() {
                bail!(EdenError::config(text, "unsupported EPSG code; supply a PROJ.4 string instead"));
            }
            return Ok(Crs::Epsg(code));
        }
        if text.starts_with("+proj=") {
            return Ok(Crs::Proj(text.to_string()));
        }
        bail!(EdenError::config(text, "expected \"EPSG:<code>\" or a \"+proj=...\" string"))
    }

    /// Read a CRS from the WKT text of a `.prj` sidecar file.
    pub fn from_prj(text: &str) -> Result<Self> {
        super::wkt::prj_to_crs(text)
    }

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Proj(_) => None,
        }
    }

    /// PROJ.4 definition understood by `proj4rs`.
    pub fn proj4(&self) -> Result<String> {
        match self {
            Crs::Epsg(code) => epsg_proj4(*code)
                .ok_or_else(|| EdenError::config(self.to_string(), "unsupported EPSG code").into()),
            Crs::Proj(text) => Ok(text.clone()),
        }
    }

    /// True for longitude/latitude systems (coordinates in degrees).
    pub fn is_geographic(&self) -> bool {
        self.proj4()
            .map(|p| p.split_whitespace().any(|t| t == "+proj=longlat" || t == "+proj=latlong"))
            .unwrap_or(false)
    }

    /// Two CRSs are equivalent when their PROJ.4 parameter sets match,
    /// ignoring bookkeeping tokens and token order.
    pub fn equivalent(&self, other: &Crs) -> bool {
        if self == other {
            return true;
        }
        match (self.proj4(), other.proj4()) {
            (Ok(a), Ok(b)) => canonical_tokens(&a) == canonical_tokens(&b),
            _ => false,
        }
    }
}

impl Default for Crs {
    fn default() -> Self { Crs::WGS84 }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{code}"),
            Crs::Proj(text) => f.write_str(text),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> { Crs::parse(&value) }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self { crs.to_string() }
}

fn canonical_tokens(proj: &str) -> Vec<&str> {
    let mut tokens = proj.split_whitespace()
        .filter(|t| !matches!(*t, "+no_defs" | "+type=crs" | "+wktext"))
        .collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens
}

/// PROJ.4 strings for the EPSG codes this pipeline meets in practice.
fn epsg_proj4(code: u32) -> Option<String> {
    let def = match code {
        4326 => "+proj=longlat +datum=WGS84 +no_defs +type=crs".to_string(),
        4269 => "+proj=longlat +datum=NAD83 +no_defs +type=crs".to_string(),
        // NAD27 without grid shift
        4267 => "+proj=longlat +ellps=clrk66 +no_defs +type=crs".to_string(),
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs +type=crs".to_string(),
        // CONUS Albers equal area (NAD83)
        5070 => "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs +type=crs".to_string(),
        // ESRI North America Albers equal area
        102008 => "+proj=aea +lat_0=40 +lon_0=-96 +lat_1=20 +lat_2=60 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs +type=crs".to_string(),
        32601..=32660 => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs +type=crs", code - 32600),
        32701..=32760 => format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs +type=crs", code - 32700),
        26901..=26923 => format!("+proj=utm +zone={} +datum=NAD83 +units=m +no_defs +type=crs", code - 26900),
        _ => return None,
    };
    Some(def)
}

#[cfg(test)]
mod tests {
    use super::Crs;

    #[test]
    fn parse_accepts_epsg_and_proj_strings() {
        assert_eq!(Crs::parse("EPSG:4326").unwrap(), Crs::WGS84);
        assert_eq!(Crs::parse(" epsg:5070 ").unwrap(), Crs::Epsg(5070));
        assert!(matches!(Crs::parse("+proj=longlat +datum=WGS84").unwrap(), Crs::Proj(_)));
        assert!(Crs::parse("EPSG:999999").is_err());
        assert!(Crs::parse("WGS84").is_err());
    }

    #[test]
    fn utm_zones_are_generated() {
        let def = Crs::Epsg(32613).proj4().unwrap();
        assert!(def.contains("+zone=13"));
        assert!(!def.contains("+south"));
        assert!(Crs::Epsg(32733).proj4().unwrap().contains("+south"));
    }

    #[test]
    fn geographic_detection() {
        assert!(Crs::WGS84.is_geographic());
        assert!(Crs::Epsg(4269).is_geographic());
        assert!(!Crs::Epsg(5070).is_geographic());
    }

    #[test]
    fn equivalence_ignores_token_order() {
        let a = Crs::Proj("+proj=longlat +datum=WGS84 +no_defs".into());
        let b = Crs::Proj("+datum=WGS84 +proj=longlat".into());
        assert!(a.equivalent(&b));
        assert!(a.equivalent(&Crs::WGS84));
        assert!(!a.equivalent(&Crs::Epsg(4269)));
    }

    #[test]
    fn serde_round_trips_through_strings() {
        let json = serde_json::to_string(&Crs::Epsg(5070)).unwrap();
        assert_eq!(json, "\"EPSG:5070\"");
        let back: Crs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Crs::Epsg(5070));
    }
}
