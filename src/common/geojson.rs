use anyhow::{Context, Result, anyhow, bail};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{Map, Value, json};

/// A GeoJSON feature: geometry plus flat properties.
pub(crate) type GeoFeature = (MultiPolygon<f64>, Map<String, Value>);

/// Write features as a GeoJSON FeatureCollection of MultiPolygons.
/// The CRS, when given, is recorded as a named `crs` member.
pub(crate) fn write_to_geojson_bytes(features: &[GeoFeature], crs: Option<&str>) -> Result<Vec<u8>> {
    fn ring(ls: &LineString<f64>) -> Value {
        Value::Array(ls.coords().map(|c| json!([c.x, c.y])).collect())
    }

    let features = features.iter().map(|(mp, properties)| {
        let polygons = mp.0.iter()
            .map(|polygon| {
                let mut rings = vec![ring(polygon.exterior())];
                rings.extend(polygon.interiors().iter().map(ring));
                Value::Array(rings)
            })
            .collect::<Vec<_>>();

        json!({
            "type": "Feature",
            "properties": properties,
            "geometry": {
                "type": "MultiPolygon",
                "coordinates": polygons,
            },
        })
    }).collect::<Vec<_>>();

    let mut feature_collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if let Some(name) = crs {
        feature_collection["crs"] = json!({"type": "name", "properties": {"name": name}});
    }

    serde_json::to_vec_pretty(&feature_collection).context("Failed to serialize GeoJSON to bytes")
}

/// Read features and the named CRS (if any) from a GeoJSON FeatureCollection.
/// Polygon and MultiPolygon geometries are accepted.
pub(crate) fn read_from_geojson_bytes(bytes: &[u8]) -> Result<(Vec<GeoFeature>, Option<String>)> {
    let value: Value = serde_json::from_slice(bytes).context("Failed to parse GeoJSON bytes")?;
    let features = value["features"].as_array()
        .ok_or_else(|| anyhow!("GeoJSON is not a FeatureCollection"))?;
    let crs = value["crs"]["properties"]["name"].as_str().map(str::to_string);

    let features = features.iter().enumerate().map(|(i, feature)| {
        let properties = feature["properties"].as_object().cloned().unwrap_or_default();
        let geometry = &feature["geometry"];
        let coords = geometry["coordinates"].as_array()
            .ok_or_else(|| anyhow!("feature {i}: missing coordinates"))?;
        let mp = match geometry["type"].as_str() {
            Some("MultiPolygon") => MultiPolygon(
                coords.iter().map(parse_polygon).collect::<Result<_>>()?
            ),
            Some("Polygon") => MultiPolygon(vec![parse_polygon(&geometry["coordinates"])?]),
            other => bail!("feature {i}: unsupported geometry type {other:?}"),
        };
        Ok((mp, properties))
    }).collect::<Result<Vec<_>>>()?;

    Ok((features, crs))
}

/// Parse `[exterior, hole, hole, ...]` ring arrays into a polygon.
fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value.as_array()
        .ok_or_else(|| anyhow!("Invalid Polygon: expected an array of rings"))?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings.next()
        .ok_or_else(|| anyhow!("Invalid Polygon: missing exterior ring"))??;
    Ok(Polygon::new(exterior, rings.collect::<Result<_>>()?))
}

/// Parse a ring from `[[x, y], [x, y], ...]`, closing it if needed.
fn parse_ring(value: &Value) -> Result<LineString<f64>> {
    let mut points = value.as_array()
        .ok_or_else(|| anyhow!("Invalid ring: expected an array of positions"))?
        .iter()
        .map(|pos| {
            let x = pos[0].as_f64().ok_or_else(|| anyhow!("Invalid coordinate: x must be a number"))?;
            let y = pos[1].as_f64().ok_or_else(|| anyhow!("Invalid coordinate: y must be a number"))?;
            Ok(Coord { x, y })
        })
        .collect::<Result<Vec<_>>>()?;

    if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
        if first != last { points.push(first) }
    }
    Ok(LineString(points))
}
