//! GeoTIFF decoding: georeferencing tags plus chunk-wise pixel reads.

use std::{
    io::{Read, Seek},
    panic::{AssertUnwindSafe, catch_unwind},
};

use anyhow::{Result, anyhow, bail, ensure};
use ndarray::Array3;
use tiff::{
    TiffError,
    decoder::{Decoder, DecodingResult, Limits},
    tags::Tag,
};

use super::{GeoTransform, PixelWindow};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GDAL_NODATA: u16 = 42113;

/// Keep I/O errors (timeouts in particular) visible in the error chain.
fn tiff_err(err: TiffError) -> anyhow::Error {
    match err {
        TiffError::IoError(io) => anyhow::Error::from(io),
        other => anyhow!("TIFF decoding failed: {other}"),
    }
}

/// An open GeoTIFF with its georeferencing parsed.
pub(crate) struct GeoTiff<R: Read + Seek> {
    decoder: Decoder<R>,
    width: usize,
    height: usize,
    samples: usize,
    chunk: (usize, usize),
    transform: GeoTransform,
    nodata: Option<f64>,
}

impl<R: Read + Seek> GeoTiff<R> {
    /// Read the header and GeoTIFF tags; no pixel data is decoded.
    pub(crate) fn open(reader: R) -> Result<Self> {
        let mut decoder = Decoder::new(reader).map_err(tiff_err)?.with_limits(Limits::unlimited());
        let (width, height) = decoder.dimensions().map_err(tiff_err)?;

        let samples = match decoder.find_tag(Tag::SamplesPerPixel).map_err(tiff_err)? {
            Some(value) => value.into_u16().map_err(tiff_err)? as usize,
            None => 1,
        };
        if let Some(value) = decoder.find_tag(Tag::PlanarConfiguration).map_err(tiff_err)? {
            ensure!(value.into_u16().map_err(tiff_err)? == 1, "band-separate (planar) TIFF layout is not supported");
        }

        let transform = read_transform(&mut decoder)?;
        ensure!(
            transform.pixel_width > 0.0 && transform.pixel_height > 0.0,
            "only north-up GeoTIFFs are supported (pixel size {} x {})",
            transform.pixel_width, transform.pixel_height
        );
        let nodata = read_nodata(&mut decoder)?;
        let (cw, ch) = decoder.chunk_dimensions();

        Ok(Self {
            decoder,
            width: width as usize,
            height: height as usize,
            samples,
            chunk: (cw.max(1) as usize, ch.max(1) as usize),
            transform,
            nodata,
        })
    }

    #[inline] pub(crate) fn width(&self) -> usize { self.width }

    #[inline] pub(crate) fn height(&self) -> usize { self.height }

    #[inline] pub(crate) fn bands(&self) -> usize { self.samples }

    #[inline] pub(crate) fn transform(&self) -> GeoTransform { self.transform }

    #[inline] pub(crate) fn nodata(&self) -> Option<f64> { self.nodata }

    /// Decode the strips or tiles intersecting `window` into `(band, row, col)`.
    pub(crate) fn read_window(&mut self, window: &PixelWindow) -> Result<Array3<f64>> {
        ensure!(
            window.col_end() <= self.width && window.row_end() <= self.height,
            "window {window:?} exceeds raster size {}x{}", self.width, self.height
        );
        let mut out = Array3::from_elem((self.samples, window.height, window.width), f64::NAN);
        if window.is_empty() {
            return Ok(out);
        }

        let (cw, ch) = self.chunk;
        let across = self.width.div_ceil(cw);

        for cy in window.row_off / ch..=(window.row_end() - 1) / ch {
            for cx in window.col_off / cw..=(window.col_end() - 1) / cw {
                let index = (cy * across + cx) as u32;
                let (dw, dh) = self.decoder.chunk_data_dimensions(index);
                let (dw, dh) = (dw as usize, dh as usize);

                let decoder = &mut self.decoder;
                let decoded = catch_unwind(AssertUnwindSafe(|| decoder.read_chunk(index)))
                    .map_err(|_| anyhow!("TIFF decoder panicked on chunk {index}"))?
                    .map_err(tiff_err)?;
                let values = to_f64(decoded)?;

                // Edge chunks may come back padded to the full chunk size.
                let stride = if values.len() == dw * dh * self.samples {
                    dw
                } else if values.len() == cw * ch * self.samples {
                    cw
                } else {
                    bail!("chunk {index} has {} samples, expected {}", values.len(), dw * dh * self.samples);
                };

                let (x0, y0) = (cx * cw, cy * ch);
                for row in y0.max(window.row_off)..(y0 + dh).min(window.row_end()) {
                    for col in x0.max(window.col_off)..(x0 + dw).min(window.col_end()) {
                        let base = ((row - y0) * stride + (col - x0)) * self.samples;
                        for band in 0..self.samples {
                            out[[band, row - window.row_off, col - window.col_off]] = values[base + band];
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn find_f64s<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<Vec<f64>>> {
    decoder.find_tag(Tag::from_u16_exhaustive(code)).map_err(tiff_err)?
        .map(|value| value.into_f64_vec().map_err(tiff_err))
        .transpose()
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(scale) = find_f64s(decoder, MODEL_PIXEL_SCALE)? {
        let tie = find_f64s(decoder, MODEL_TIEPOINT)?
            .ok_or_else(|| anyhow!("ModelPixelScale present without ModelTiepoint"))?;
        ensure!(scale.len() >= 2 && tie.len() >= 6, "malformed ModelPixelScale/ModelTiepoint tags");
        let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
        return Ok(GeoTransform::new(x - i * scale[0], y + j * scale[1], scale[0], scale[1]));
    }
    if let Some(m) = find_f64s(decoder, MODEL_TRANSFORMATION)? {
        ensure!(m.len() >= 16, "malformed ModelTransformation tag");
        ensure!(m[1] == 0.0 && m[4] == 0.0, "rotated GeoTIFFs are not supported");
        return Ok(GeoTransform::new(m[3], m[7], m[0], -m[5]));
    }
    bail!("GeoTIFF has no georeferencing (ModelPixelScale + ModelTiepoint or ModelTransformation)")
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    let Some(value) = decoder.find_tag(Tag::from_u16_exhaustive(GDAL_NODATA)).map_err(tiff_err)? else {
        return Ok(None);
    };
    let text = value.into_string().map_err(tiff_err)?;
    let text = text.trim_matches(char::from(0)).trim();
    match text.parse::<f64>() {
        Ok(nodata) => Ok(Some(nodata)),
        Err(_) => {
            log::warn!("[window] ignoring unparseable GDAL_NODATA value {text:?}");
            Ok(None)
        }
    }
}

fn to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    Ok(match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => bail!("unsupported TIFF sample type"),
    })
}
