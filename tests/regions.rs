// Integration tests for the region registry:
//   code normalization, dissolve area, unmatched uids, canonical GeoJSON

use eden::{
    AttrValue, CodeValue, Crs, EdenError, MemBoundaries, PipelineConfig, RegionSet, RegionSpec,
    normalize_code, prepare_regions,
};
use geo::{MultiPolygon, polygon};

const ALBERS: Crs = Crs::Epsg(5070);

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)]])
}

fn spec(uid: &str, code: CodeValue) -> RegionSpec {
    RegionSpec { uid: uid.into(), scheme: "EPA_US".into(), level: 3, code, name: None }
}

/// Everything planar in an equal-area CRS so areas are exact.
fn albers_config(regions: Vec<RegionSpec>, dissolve: bool) -> PipelineConfig {
    let mut config = PipelineConfig { regions, working_crs: ALBERS, area_crs: ALBERS, ..PipelineConfig::default() };
    config.registry.dissolve = dissolve;
    config
}

#[test]
fn code_spellings_normalize_alike() {
    assert_eq!(normalize_code("07"), normalize_code("7"));
    assert_eq!(normalize_code(&CodeValue::Int(7).to_string()), "7");
    assert_eq!(CodeValue::Text(" 07 ".into()).normalized(), "7");
    assert_eq!(normalize_code("56h"), "56h");
    assert_ne!(normalize_code("56h"), normalize_code("56"));
}

#[test]
fn numeric_and_padded_codes_match_the_same_feature() {
    let source = MemBoundaries::new("l3", "EPA_US", 3, ALBERS)
        .with_feature(rect(0.0, 0.0, 1000.0, 1000.0), [("US_L3CODE", AttrValue::Number(7.0))]);
    let config = albers_config(vec![spec("us_l3_07", CodeValue::Text("07".into()))], true);

    let set = prepare_regions(&[&source], &config).unwrap();
    let region = set.get("us_l3_07").unwrap();
    assert_eq!(region.code, "7");
    assert!((region.area_km2 - 1.0).abs() < 1e-9);
}

#[test]
fn dissolved_region_area_is_the_union() {
    // Two 10 km squares overlapping by half.
    let source = MemBoundaries::new("l3", "EPA_US", 3, ALBERS)
        .with_feature(rect(0.0, 0.0, 10_000.0, 10_000.0), [("US_L3CODE", AttrValue::from("12"))])
        .with_feature(rect(5_000.0, 0.0, 15_000.0, 10_000.0), [("US_L3CODE", AttrValue::from("12"))]);
    let config = albers_config(vec![spec("twelve", CodeValue::Int(12))], true);

    let set = prepare_regions(&[&source], &config).unwrap();
    let region = set.get("twelve").unwrap();
    assert!(region.dissolved);
    assert_eq!(region.geometry.0.len(), 1);
    assert!((region.area_km2 - 150.0).abs() < 1e-6, "area {}", region.area_km2);
    assert_eq!((region.bbox.xmin, region.bbox.xmax), (0.0, 15_000.0));
}

#[test]
fn unmatched_uids_are_a_hard_error() {
    let source = MemBoundaries::new("l3", "EPA_US", 3, ALBERS)
        .with_feature(rect(0.0, 0.0, 1000.0, 1000.0), [("US_L3CODE", AttrValue::from("1"))]);
    let config = albers_config(vec![spec("one", CodeValue::Int(1)), spec("two", CodeValue::Int(2))], true);

    let err = prepare_regions(&[&source], &config).unwrap_err();
    match err.downcast_ref::<EdenError>() {
        Some(EdenError::UnmatchedRegions { uids }) => assert_eq!(uids, &["two".to_string()]),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn canonical_geojson_round_trips_uids() {
    let source = MemBoundaries::new("l3", "EPA_US", 3, ALBERS)
        .with_feature(rect(0.0, 0.0, 1000.0, 1000.0), [("US_L3CODE", AttrValue::from("2"))])
        .with_feature(rect(2000.0, 0.0, 3000.0, 1000.0), [("US_L3CODE", AttrValue::from("1"))]);
    let config = albers_config(vec![spec("b", CodeValue::Int(2)), spec("a", CodeValue::Int(1))], true);
    let set = prepare_regions(&[&source], &config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = set.write(dir.path(), config.output.format).unwrap();
    let geojson = dir.path().join("regions.geojson");
    assert!(written.contains(&geojson));

    let reread = RegionSet::read_geojson(&geojson).unwrap();
    assert_eq!(reread.uids(), ["a", "b"]);
}
