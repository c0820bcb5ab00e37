use std::{fs::File, io::{self, BufReader, Read, Seek}, time::Duration};

use anyhow::{Context, Result, bail};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::{
    GeoTransform, PixelWindow, RasterDescriptor, RasterLayer, RasterLocation, WindowCache,
    geotiff::GeoTiff, grid::coverage_fraction,
};
use crate::{
    config::WindowConfig,
    crs::{Bbox, Crs, DENSIFY_POINTS, Transformer},
    error::EdenError,
};

/// Pixels of one raster clipped to a region's bounding box, on the raster's native grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedRaster {
    pub source: String,
    pub variable: String,
    /// Native CRS of the pixels.
    pub crs: Crs,
    /// CRS the window was requested in (the region geometry CRS).
    pub request_crs: Crs,
    pub bands: Vec<String>,
    /// Georeferencing of `data[.., 0, 0]`.
    pub transform: GeoTransform,
    /// `(band, row, col)`.
    pub data: Array3<f64>,
    pub nodata: Option<f64>,
    /// Fraction of the requested bbox inside the raster extent.
    pub coverage: f64,
    /// Position of the clip within the source raster.
    pub window: PixelWindow,
}

impl ClippedRaster {
    #[inline] pub fn height(&self) -> usize { self.data.dim().1 }

    #[inline] pub fn width(&self) -> usize { self.data.dim().2 }

    /// True for values that are neither NaN nor the nodata value.
    #[inline]
    pub fn is_valid(&self, value: f64) -> bool {
        !value.is_nan() && self.nodata.is_none_or(|nd| value != nd)
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| self.is_valid(v)).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// The requested bbox does not intersect the raster extent.
    NoOverlap,
    /// The read did not finish within the configured timeout.
    Timeout,
}

/// A raster that could not supply pixels for a region.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageGap {
    pub source: String,
    pub variable: String,
    pub bands: Vec<String>,
    pub reason: GapReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Clipped(ClippedRaster),
    Gap(CoverageGap),
}

/// Grid facts needed to compute a window before reading any pixels.
struct GridInfo {
    transform: GeoTransform,
    width: usize,
    height: usize,
    bands: usize,
    nodata: Option<f64>,
}

/// Reads raster windows, consulting the on-disk cache when one is configured.
#[derive(Debug, Clone)]
pub struct WindowProvider {
    cache: Option<WindowCache>,
    timeout: Duration,
}

impl WindowProvider {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            cache: config.cache_dir.clone().map(WindowCache::new),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn cache(&self) -> Option<&WindowCache> { self.cache.as_ref() }

    /// Clip `layer` to `bbox` (expressed in `target_crs`).
    /// Coverage gaps are returned as `WindowOutcome::Gap`; errors are configuration
    /// or I/O problems that should abort this region/raster unit.
    pub fn read_window(&self, layer: &RasterLayer, bbox: &Bbox, target_crs: &Crs) -> Result<WindowOutcome> {
        let descriptor = layer.descriptor();
        let id = descriptor.identity();

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(descriptor, bbox, target_crs) {
                log::debug!("[cache] hit {id} {bbox}");
                return Ok(WindowOutcome::Clipped(hit));
            }
        }

        let raster_crs = layer.crs()?;
        let requested = Transformer::new(target_crs, raster_crs)?
            .transform_bounds(bbox, DENSIFY_POINTS)
            .with_context(|| format!("Failed to transform {bbox} from {target_crs} to {raster_crs} for {id}"))?;

        let result = match &descriptor.location {
            RasterLocation::Memory(raster) => {
                let grid = GridInfo {
                    transform: raster.transform,
                    width: raster.width(),
                    height: raster.height(),
                    bands: raster.bands(),
                    nodata: raster.nodata,
                };
                clip(descriptor, &requested, target_crs, raster_crs, grid, |w| Ok(raster.window(w)))
            }
            RasterLocation::Local { path } => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open raster {}", path.display()))?;
                clip_geotiff(descriptor, &requested, target_crs, raster_crs, BufReader::new(file))
                    .with_context(|| format!("Failed to read {}", path.display()))
            }
            RasterLocation::Remote { url } => self.read_remote(descriptor, url, &requested, target_crs, raster_crs),
        };

        let outcome = self.timeout_as_gap(descriptor, result)?;
        if let (Some(cache), WindowOutcome::Clipped(clipped)) = (&self.cache, &outcome) {
            if let Err(err) = cache.put(descriptor, bbox, target_crs, clipped) {
                log::warn!("[cache] failed to store {id}: {err:#}");
            }
        }
        Ok(outcome)
    }

    /// A read that timed out becomes a `Timeout` gap; other errors pass through.
    fn timeout_as_gap(&self, descriptor: &RasterDescriptor, result: Result<WindowOutcome>) -> Result<WindowOutcome> {
        match result {
            Err(err) if is_timeout(&err) => {
                log::warn!("[window] {}: read timed out after {:?}", descriptor.identity(), self.timeout);
                Ok(WindowOutcome::Gap(CoverageGap {
                    source: descriptor.source.clone(),
                    variable: descriptor.variable.clone(),
                    bands: descriptor.bands.clone(),
                    reason: GapReason::Timeout,
                    detail: format!("{err:#}"),
                }))
            }
            other => other,
        }
    }

    #[cfg(feature = "remote")]
    fn read_remote(&self, descriptor: &RasterDescriptor, url: &str, requested: &Bbox, target_crs: &Crs, raster_crs: &Crs) -> Result<WindowOutcome> {
        let reader = super::remote::HttpRangeReader::open(url, self.timeout)?;
        clip_geotiff(descriptor, requested, target_crs, raster_crs, reader)
            .with_context(|| format!("Failed to read {url}"))
    }

    #[cfg(not(feature = "remote"))]
    fn read_remote(&self, descriptor: &RasterDescriptor, url: &str, _: &Bbox, _: &Crs, _: &Crs) -> Result<WindowOutcome> {
        bail!(EdenError::config(
            descriptor.identity(),
            format!("remote raster {url} requires the `remote` feature"),
        ))
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<io::Error>().is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
    })
}

fn clip_geotiff<R: Read + Seek>(descriptor: &RasterDescriptor, requested: &Bbox, target_crs: &Crs, raster_crs: &Crs, reader: R) -> Result<WindowOutcome> {
    let mut tiff = GeoTiff::open(reader)?;
    let grid = GridInfo {
        transform: tiff.transform(),
        width: tiff.width(),
        height: tiff.height(),
        bands: tiff.bands(),
        nodata: tiff.nodata(),
    };
    clip(descriptor, requested, target_crs, raster_crs, grid, |w| tiff.read_window(w))
}

fn clip<F>(descriptor: &RasterDescriptor, requested: &Bbox, target_crs: &Crs, raster_crs: &Crs, grid: GridInfo, read: F) -> Result<WindowOutcome>
where
    F: FnOnce(&PixelWindow) -> Result<Array3<f64>>,
{
    let id = descriptor.identity();
    if grid.bands != descriptor.bands.len() {
        bail!(EdenError::config(
            id,
            format!("descriptor lists {} bands but raster has {}", descriptor.bands.len(), grid.bands),
        ));
    }
    if let Some(resolution) = descriptor.resolution {
        let native = grid.transform.pixel_width;
        if (resolution - native).abs() > 1e-6 * resolution.max(native) {
            log::warn!("[window] {id}: descriptor resolution {resolution} differs from file pixel size {native}");
        }
    }

    let extent = grid.transform.extent(grid.width, grid.height);
    let coverage = coverage_fraction(requested, &extent);
    let Some(window) = grid.transform.window_for(requested, grid.width, grid.height) else {
        log::debug!("[window] {id}: {requested} outside raster extent {extent}");
        return Ok(WindowOutcome::Gap(CoverageGap {
            source: descriptor.source.clone(),
            variable: descriptor.variable.clone(),
            bands: descriptor.bands.clone(),
            reason: GapReason::NoOverlap,
            detail: format!("bbox {requested} does not intersect raster extent {extent}"),
        }));
    };

    let data = read(&window)?;
    let clipped = ClippedRaster {
        source: descriptor.source.clone(),
        variable: descriptor.variable.clone(),
        crs: raster_crs.clone(),
        request_crs: target_crs.clone(),
        bands: descriptor.bands.clone(),
        transform: grid.transform.window_transform(&window),
        data,
        nodata: descriptor.nodata.or(grid.nodata),
        coverage,
        window,
    };
    if clipped.valid_count() == 0 {
        log::warn!("[window] {id}: window {window:?} holds only nodata");
    }
    Ok(WindowOutcome::Clipped(clipped))
}

#[cfg(test)]
mod tests {
    use std::{io::{self, Cursor, Read, Seek, SeekFrom}, sync::Arc};

    use anyhow::Context;
    use ndarray::Array3;
    use tiff::{decoder::Decoder, tags::Tag};

    use super::{GapReason, WindowOutcome, WindowProvider, clip_geotiff};
    use crate::{
        config::WindowConfig,
        crs::{Bbox, Crs},
        raster::{GeoTransform, MemRaster, RasterDescriptor, RasterLayer, RasterLocation, ValueKind},
    };

    fn layer(raster: MemRaster, bands: &[&str]) -> RasterLayer {
        RasterLayer::new(RasterDescriptor {
            source: "test".into(),
            variable: "v".into(),
            location: RasterLocation::Memory(Arc::new(raster)),
            crs: Some(Crs::WGS84),
            resolution: None,
            nodata: None,
            bands: bands.iter().map(|b| b.to_string()).collect(),
            kind: ValueKind::Continuous,
        }).unwrap()
    }

    fn ramp() -> MemRaster {
        let data = Array3::from_shape_fn((1, 10, 10), |(_, r, c)| (r * 10 + c) as f64);
        MemRaster::new(GeoTransform::new(0.0, 10.0, 1.0, 1.0), data, Some(-1.0)).unwrap()
    }

    #[test]
    fn clip_snaps_to_native_grid() {
        let provider = WindowProvider::new(&WindowConfig::default());
        let outcome = provider.read_window(&layer(ramp(), &["b1"]), &Bbox::new(2.5, 6.2, 4.1, 7.9), &Crs::WGS84).unwrap();
        let WindowOutcome::Clipped(clip) = outcome else { panic!("expected pixels") };
        assert_eq!((clip.window.col_off, clip.window.row_off, clip.width(), clip.height()), (2, 2, 3, 2));
        assert_eq!(clip.data[[0, 0, 0]], 22.0);
        assert_eq!((clip.transform.origin_x, clip.transform.origin_y), (2.0, 8.0));
        assert_eq!(clip.coverage, 1.0);
        assert_eq!(clip.nodata, Some(-1.0));
    }

    #[test]
    fn partial_overlap_reports_coverage_and_disjoint_is_gap() {
        let provider = WindowProvider::new(&WindowConfig::default());
        let l = layer(ramp(), &["b1"]);
        let WindowOutcome::Clipped(clip) = provider.read_window(&l, &Bbox::new(8.0, 0.0, 12.0, 2.0), &Crs::WGS84).unwrap() else {
            panic!("expected pixels")
        };
        assert_eq!(clip.coverage, 0.5);
        assert_eq!(clip.width(), 2);

        let WindowOutcome::Gap(gap) = provider.read_window(&l, &Bbox::new(20.0, 20.0, 21.0, 21.0), &Crs::WGS84).unwrap() else {
            panic!("expected gap")
        };
        assert_eq!(gap.reason, GapReason::NoOverlap);
        assert_eq!(gap.bands, vec!["b1".to_string()]);
    }

    #[test]
    fn band_count_mismatch_is_config_error() {
        let provider = WindowProvider::new(&WindowConfig::default());
        let mut d = layer(ramp(), &["b1"]).descriptor().clone();
        d.bands.push("b2".into());
        // Bypass descriptor validation to reach the read-time check.
        let l = RasterLayer::Continuous(d);
        let err = provider.read_window(&l, &Bbox::new(1.0, 1.0, 2.0, 2.0), &Crs::WGS84).unwrap_err();
        assert!(err.downcast_ref::<crate::EdenError>().is_some_and(|e| e.is_config()));
    }

    #[test]
    fn bbox_is_transformed_into_raster_crs() {
        let provider = WindowProvider::new(&WindowConfig::default());
        // Raster in Web Mercator metres around the origin.
        let data = Array3::from_elem((1, 20, 20), 1.0);
        let raster = MemRaster::new(GeoTransform::new(-100_000.0, 100_000.0, 10_000.0, 10_000.0), data, None).unwrap();
        let mut d = layer(raster, &["b1"]).descriptor().clone();
        d.crs = Some(Crs::Epsg(3857));
        let l = RasterLayer::new(d).unwrap();

        let WindowOutcome::Clipped(clip) = provider.read_window(&l, &Bbox::new(-0.1, -0.1, 0.1, 0.1), &Crs::WGS84).unwrap() else {
            panic!("expected pixels")
        };
        assert_eq!(clip.crs, Crs::Epsg(3857));
        assert_eq!(clip.request_crs, Crs::WGS84);
        // 0.1 degrees is ~11.1 km, so the window spans two pixels each side of the origin.
        assert_eq!((clip.width(), clip.height()), (4, 4));
        assert_eq!((clip.window.col_off, clip.window.row_off), (8, 8));
    }

    /// Serves the TIFF directory but fails any read that touches strip data.
    struct StalledStrips {
        inner: Cursor<Vec<u8>>,
        strips: Vec<(u64, u64)>,
        kind: io::ErrorKind,
    }

    impl StalledStrips {
        fn new(bytes: Vec<u8>, kind: io::ErrorKind) -> Self {
            let mut decoder = Decoder::new(Cursor::new(bytes.clone())).unwrap();
            let offsets = decoder.get_tag_u64_vec(Tag::StripOffsets).unwrap();
            let counts = decoder.get_tag_u64_vec(Tag::StripByteCounts).unwrap();
            let strips = offsets.iter().zip(&counts).map(|(&o, &n)| (o, o + n)).collect();
            Self { inner: Cursor::new(bytes), strips, kind }
        }
    }

    impl Read for StalledStrips {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let (start, end) = (self.inner.position(), self.inner.position() + buf.len() as u64);
            if self.strips.iter().any(|&(s, e)| start < e && end > s) {
                return Err(io::Error::new(self.kind, "range request stalled"));
            }
            self.inner.read(buf)
        }
    }

    impl Seek for StalledStrips {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { self.inner.seek(pos) }
    }

    fn stalled_read(kind: io::ErrorKind) -> anyhow::Result<WindowOutcome> {
        let data = (0..16).map(|v| v as f32).collect::<Vec<_>>();
        let bytes = crate::raster::geotiff::tests::gray_f32_tiff(4, 4, (0.0, 4.0), 1.0, None, 2, &data);
        let mut d = layer(ramp(), &["b1"]).descriptor().clone();
        d.location = RasterLocation::Remote { url: "https://example.org/ramp.tif".into() };
        clip_geotiff(&d, &Bbox::new(1.0, 1.0, 3.0, 3.0), &Crs::WGS84, &Crs::WGS84, StalledStrips::new(bytes, kind))
            .context("Failed to read https://example.org/ramp.tif")
    }

    #[test]
    fn timed_out_read_becomes_timeout_gap() {
        let provider = WindowProvider::new(&WindowConfig::default());
        let d = layer(ramp(), &["b1"]).descriptor().clone();

        let WindowOutcome::Gap(gap) = provider.timeout_as_gap(&d, stalled_read(io::ErrorKind::TimedOut)).unwrap() else {
            panic!("expected a timeout gap")
        };
        assert_eq!(gap.reason, GapReason::Timeout);
        assert_eq!(gap.bands, vec!["b1".to_string()]);
        assert!(gap.detail.contains("stalled"));

        // Other I/O failures still abort the unit.
        assert!(provider.timeout_as_gap(&d, stalled_read(io::ErrorKind::ConnectionReset)).is_err());
    }
}
