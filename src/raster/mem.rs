use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use ndarray::{Array3, s};

use super::{GeoTransform, PixelWindow, geotiff::GeoTiff};
use crate::crs::Bbox;

/// A raster held in memory as `(band, row, col)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemRaster {
    pub transform: GeoTransform,
    pub data: Array3<f64>,
    pub nodata: Option<f64>,
}

impl MemRaster {
    pub fn new(transform: GeoTransform, data: Array3<f64>, nodata: Option<f64>) -> Result<Self> {
        ensure!(
            transform.pixel_width > 0.0 && transform.pixel_height > 0.0,
            "raster pixel size must be positive (north-up), got {} x {}",
            transform.pixel_width, transform.pixel_height
        );
        Ok(Self { transform, data, nodata })
    }

    /// Decode a whole GeoTIFF file.
    pub fn from_geotiff(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open raster {}", path.display()))?;
        let mut tiff = GeoTiff::open(BufReader::new(file))
            .with_context(|| format!("Failed to read GeoTIFF header of {}", path.display()))?;
        let window = PixelWindow::full(tiff.width(), tiff.height());
        let data = tiff.read_window(&window)
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        Self::new(tiff.transform(), data, tiff.nodata())
    }

    #[inline] pub fn bands(&self) -> usize { self.data.dim().0 }

    #[inline] pub fn height(&self) -> usize { self.data.dim().1 }

    #[inline] pub fn width(&self) -> usize { self.data.dim().2 }

    pub fn extent(&self) -> Bbox {
        self.transform.extent(self.width(), self.height())
    }

    /// Copy of the pixels inside `window`.
    pub(crate) fn window(&self, window: &PixelWindow) -> Array3<f64> {
        self.data
            .slice(s![.., window.row_off..window.row_end(), window.col_off..window.col_end()])
            .to_owned()
    }
}
