use anyhow::{Result, bail};
use regex::Regex;

use super::Crs;
use crate::error::EdenError;

/// Convert ESRI/OGC WKT (the content of a `.prj` file) to a `Crs`.
pub(super) fn prj_to_crs(text: &str) -> Result<Crs> {
    let text = text.trim();

    // A trailing AUTHORITY belongs to the outermost node.
    let authority = Regex::new(r#"AUTHORITY\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]\s*\]\s*$"#)?;
    if let Some(code) = authority.captures(text).and_then(|c| c[1].parse::<u32>().ok()) {
        if let Ok(crs) = Crs::parse(&format!("EPSG:{code}")) {
            return Ok(crs);
        }
    }

    let datum = datum_params(text)?;
    if text.starts_with("GEOGCS[") || text.starts_with("GEOGCRS[") {
        return Ok(Crs::Proj(format!("+proj=longlat {datum} +no_defs")));
    }
    if !(text.starts_with("PROJCS[") || text.starts_with("PROJCRS[")) {
        bail!(EdenError::config("prj", "unrecognised WKT; expected GEOGCS or PROJCS"));
    }

    let projection = Regex::new(r#"PROJECTION\[\s*"([^"]+)""#)?
        .captures(text)
        .map(|c| c[1].to_ascii_lowercase())
        .ok_or_else(|| EdenError::config("prj", "PROJCS without PROJECTION"))?;

    let params = Params::parse(text)?;
    let lat_0 = params.any(&["latitude_of_origin", "latitude_of_center"]).unwrap_or(0.0);
    let lon_0 = params.any(&["central_meridian", "longitude_of_center", "longitude_of_origin"]).unwrap_or(0.0);
    let x_0 = params.any(&["false_easting"]).unwrap_or(0.0);
    let y_0 = params.any(&["false_northing"]).unwrap_or(0.0);
    let k_0 = params.any(&["scale_factor"]).unwrap_or(1.0);

    let body = match projection.as_str() {
        "albers" | "albers_conic_equal_area" => {
            let lat_1 = params.require("standard_parallel_1")?;
            let lat_2 = params.require("standard_parallel_2")?;
            format!("+proj=aea +lat_0={lat_0} +lon_0={lon_0} +lat_1={lat_1} +lat_2={lat_2} +x_0={x_0} +y_0={y_0}")
        }
        "lambert_conformal_conic" | "lambert_conformal_conic_2sp" => {
            let lat_1 = params.require("standard_parallel_1")?;
            let lat_2 = params.any(&["standard_parallel_2"]).unwrap_or(lat_1);
            format!("+proj=lcc +lat_0={lat_0} +lon_0={lon_0} +lat_1={lat_1} +lat_2={lat_2} +x_0={x_0} +y_0={y_0}")
        }
        "lambert_conformal_conic_1sp" => {
            format!("+proj=lcc +lat_0={lat_0} +lon_0={lon_0} +lat_1={lat_0} +k_0={k_0} +x_0={x_0} +y_0={y_0}")
        }
        "transverse_mercator" => {
            format!("+proj=tmerc +lat_0={lat_0} +lon_0={lon_0} +k_0={k_0} +x_0={x_0} +y_0={y_0}")
        }
        "mercator" | "mercator_1sp" | "mercator_2sp" | "mercator_auxiliary_sphere" => {
            let lat_ts = params.any(&["standard_parallel_1"]).unwrap_or(0.0);
            format!("+proj=merc +lon_0={lon_0} +lat_ts={lat_ts} +k={k_0} +x_0={x_0} +y_0={y_0}")
        }
        other => bail!(EdenError::config("prj", format!("unsupported projection {other:?}"))),
    };

    let units = match linear_unit(text)? {
        Some(factor) if (factor - 1.0).abs() > 1e-12 => format!("+to_meter={factor}"),
        _ => "+units=m".to_string(),
    };

    Ok(Crs::Proj(format!("{body} {datum} {units} +no_defs")))
}

/// Datum or ellipsoid parameters from the GEOGCS part.
fn datum_params(text: &str) -> Result<String> {
    let datum = Regex::new(r#"DATUM\[\s*"([^"]+)""#)?
        .captures(text)
        .map(|c| c[1].to_ascii_uppercase().replace([' ', '-'], "_"))
        .unwrap_or_default();

    if datum.contains("NORTH_AMERICAN_DATUM_1983") || datum.contains("NAD83") || datum.contains("NAD_1983") {
        return Ok("+datum=NAD83".into());
    }
    if datum.contains("WGS_1984") || datum.contains("WGS84") || datum.contains("WORLD_GEODETIC_SYSTEM_1984") {
        return Ok("+datum=WGS84".into());
    }

    let spheroid = Regex::new(r#"(?:SPHEROID|ELLIPSOID)\[\s*"[^"]*"\s*,\s*([-+0-9.eE]+)\s*,\s*([-+0-9.eE]+)"#)?;
    match spheroid.captures(text) {
        Some(c) => {
            let a: f64 = c[1].parse()?;
            let rf: f64 = c[2].parse()?;
            if rf == 0.0 { Ok(format!("+a={a} +b={a}")) } else { Ok(format!("+a={a} +rf={rf}")) }
        }
        None => bail!(EdenError::config("prj", "WKT names neither a known datum nor a spheroid")),
    }
}

/// Metres per unit of the last `UNIT` node, which in a PROJCS is the linear unit.
fn linear_unit(text: &str) -> Result<Option<f64>> {
    let unit = Regex::new(r#"UNIT\[\s*"[^"]*"\s*,\s*([-+0-9.eE]+)"#)?;
    Ok(unit.captures_iter(text).last().and_then(|c| c[1].parse().ok()))
}

struct Params(Vec<(String, f64)>);

impl Params {
    fn parse(text: &str) -> Result<Self> {
        let param = Regex::new(r#"PARAMETER\[\s*"([^"]+)"\s*,\s*([-+0-9.eE]+)\s*\]"#)?;
        Ok(Self(param.captures_iter(text)
            .filter_map(|c| Some((c[1].to_ascii_lowercase(), c[2].parse().ok()?)))
            .collect()))
    }

    fn any(&self, names: &[&str]) -> Option<f64> {
        names.iter().find_map(|name| {
            self.0.iter().find(|(key, _)| key == name).map(|(_, value)| *value)
        })
    }

    fn require(&self, name: &str) -> Result<f64> {
        self.any(&[name])
            .ok_or_else(|| EdenError::config("prj", format!("missing PARAMETER {name}")).into())
    }
}
