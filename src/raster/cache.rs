//! On-disk cache of clipped windows.
//!
//! Layout of a `.clip` file, all integers little-endian:
//! `ECLP`, u32 version, u64 header length, JSON header (source, variable,
//! crs, request crs, bands), 4 x f64 transform, 4 x u64 window, f64 coverage,
//! u8 nodata flag + f64 nodata, 3 x u64 shape, f64 payload in `(band, row, col)`
//! order, then the SHA-256 of everything before it.

use std::{
    fs,
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ClippedRaster, GeoTransform, PixelWindow, RasterDescriptor};
use crate::{
    common::{sha256_hex, write_atomic},
    crs::{Bbox, Crs},
};

const MAGIC: &[u8; 4] = b"ECLP";
const VERSION: u32 = 1;
const DIGEST_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct Header {
    source: String,
    variable: String,
    crs: Crs,
    request_crs: Crs,
    bands: Vec<String>,
}

/// Content-addressed store of `ClippedRaster`s under one root directory.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCache {
    root: PathBuf,
}

impl WindowCache {
    pub fn new(root: PathBuf) -> Self { Self { root } }

    #[inline] pub fn root(&self) -> &Path { &self.root }

    /// Cache key of a request; `None` for rasters without a stable location.
    ///
    /// Covers every descriptor field that changes the stored clip, so editing
    /// the raster CRS or the nodata override misses instead of serving stale pixels.
    pub fn key(descriptor: &RasterDescriptor, bbox: &Bbox, target_crs: &Crs) -> Option<String> {
        let location = descriptor.location_key()?;
        let (bbox_key, crs, bands) = (bbox.key(), target_crs.to_string(), descriptor.bands.join("\u{1f}"));
        let raster_crs = descriptor.crs.as_ref().map(Crs::to_string).unwrap_or_default();
        let nodata = descriptor.nodata.map(|v| format!("{:016x}", v.to_bits())).unwrap_or_default();
        let material = [
            location.as_str(),
            descriptor.variable.as_str(),
            bbox_key.as_str(),
            crs.as_str(),
            bands.as_str(),
            raster_crs.as_str(),
            nodata.as_str(),
        ].join("\n");
        Some(sha256_hex(material.as_bytes()))
    }

    pub fn path_for(&self, descriptor: &RasterDescriptor, key: &str) -> PathBuf {
        self.root.join(sanitize(&descriptor.source)).join(format!("{key}.clip"))
    }

    /// A cached window, or `None` on a miss. Corrupt entries are removed.
    pub fn get(&self, descriptor: &RasterDescriptor, bbox: &Bbox, target_crs: &Crs) -> Option<ClippedRaster> {
        let key = Self::key(descriptor, bbox, target_crs)?;
        let path = self.path_for(descriptor, &key);
        let bytes = fs::read(&path).ok()?;

        match decode(&bytes) {
            Ok(clip) if clip.source == descriptor.source && clip.variable == descriptor.variable => Some(clip),
            Ok(_) => {
                log::warn!("[cache] {} belongs to another raster; refetching", path.display());
                None
            }
            Err(err) => {
                log::warn!("[cache] discarding corrupt entry {}: {err:#}", path.display());
                if let Err(err) = fs::remove_file(&path) {
                    log::warn!("[cache] failed to remove {}: {err}", path.display());
                }
                None
            }
        }
    }

    /// Store a window; a no-op for rasters without a stable location.
    pub fn put(&self, descriptor: &RasterDescriptor, bbox: &Bbox, target_crs: &Crs, clip: &ClippedRaster) -> Result<()> {
        let Some(key) = Self::key(descriptor, bbox, target_crs) else { return Ok(()) };
        let path = self.path_for(descriptor, &key);
        write_atomic(&path, &encode(clip)?)?;
        log::debug!("[cache] stored {}", path.display());
        Ok(())
    }
}

/// Keep cache directory names portable.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

pub(crate) fn encode(clip: &ClippedRaster) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(&Header {
        source: clip.source.clone(),
        variable: clip.variable.clone(),
        crs: clip.crs.clone(),
        request_crs: clip.request_crs.clone(),
        bands: clip.bands.clone(),
    })?;

    let mut out = Vec::with_capacity(128 + header.len() + clip.data.len() * 8);
    out.write_all(MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;
    out.write_all(&(header.len() as u64).to_le_bytes())?;
    out.write_all(&header)?;

    let t = &clip.transform;
    for v in [t.origin_x, t.origin_y, t.pixel_width, t.pixel_height] {
        out.write_all(&v.to_le_bytes())?;
    }
    let w = &clip.window;
    for v in [w.col_off, w.row_off, w.width, w.height] {
        out.write_all(&(v as u64).to_le_bytes())?;
    }
    out.write_all(&clip.coverage.to_le_bytes())?;
    out.write_all(&[u8::from(clip.nodata.is_some())])?;
    out.write_all(&clip.nodata.unwrap_or(0.0).to_le_bytes())?;

    let (bands, rows, cols) = clip.data.dim();
    for v in [bands, rows, cols] {
        out.write_all(&(v as u64).to_le_bytes())?;
    }
    // Standard layout iteration is (band, row, col) regardless of memory order.
    for v in clip.data.iter() {
        out.write_all(&v.to_le_bytes())?;
    }

    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    Ok(out)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<ClippedRaster> {
    ensure!(bytes.len() > MAGIC.len() + DIGEST_LEN, "truncated cache entry ({} bytes)", bytes.len());
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    ensure!(Sha256::digest(body).as_slice() == digest, "checksum mismatch");

    let mut reader = Cursor::new(body);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).context("Failed to read magic bytes")?;
    ensure!(&magic == MAGIC, "invalid magic: expected 'ECLP'");
    let version = read_u32(&mut reader)?;
    ensure!(version == VERSION, "unsupported cache version {version}");

    let header_len = read_u64(&mut reader)? as usize;
    ensure!(header_len <= body.len(), "header length {header_len} exceeds entry size");
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).context("Failed to read header")?;
    let header: Header = serde_json::from_slice(&header).context("Failed to parse header")?;

    let transform = GeoTransform::new(
        read_f64(&mut reader)?, read_f64(&mut reader)?, read_f64(&mut reader)?, read_f64(&mut reader)?,
    );
    let window = PixelWindow {
        col_off: read_u64(&mut reader)? as usize,
        row_off: read_u64(&mut reader)? as usize,
        width: read_u64(&mut reader)? as usize,
        height: read_u64(&mut reader)? as usize,
    };
    let coverage = read_f64(&mut reader)?;
    let mut flag = [0u8; 1];
    reader.read_exact(&mut flag).context("Failed to read nodata flag")?;
    let nodata_value = read_f64(&mut reader)?;
    let nodata = (flag[0] != 0).then_some(nodata_value);

    let shape = (
        read_u64(&mut reader)? as usize,
        read_u64(&mut reader)? as usize,
        read_u64(&mut reader)? as usize,
    );
    ensure!(shape.0 == header.bands.len(), "payload has {} bands, header lists {}", shape.0, header.bands.len());
    let count = shape.0.checked_mul(shape.1).and_then(|n| n.checked_mul(shape.2))
        .context("payload shape overflows")?;
    let remaining = body.len() - reader.position() as usize;
    ensure!(remaining == count * 8, "payload is {remaining} bytes, expected {}", count * 8);

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_f64(&mut reader)?);
    }
    let data = Array3::from_shape_vec(shape, values).context("payload shape mismatch")?;

    Ok(ClippedRaster {
        source: header.source,
        variable: header.variable,
        crs: header.crs,
        request_crs: header.request_crs,
        bands: header.bands,
        transform,
        data,
        nodata,
        coverage,
        window,
    })
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut b4 = [0u8; 4];
    reader.read_exact(&mut b4).context("Failed to read u32")?;
    Ok(u32::from_le_bytes(b4))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut b8 = [0u8; 8];
    reader.read_exact(&mut b8).context("Failed to read u64")?;
    Ok(u64::from_le_bytes(b8))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut b8 = [0u8; 8];
    reader.read_exact(&mut b8).context("Failed to read f64")?;
    Ok(f64::from_le_bytes(b8))
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::{WindowCache, decode, encode};
    use crate::{
        crs::{Bbox, Crs},
        raster::{ClippedRaster, GeoTransform, PixelWindow, RasterDescriptor, RasterLocation, ValueKind},
    };

    fn descriptor() -> RasterDescriptor {
        RasterDescriptor {
            source: "prism/v2".into(),
            variable: "ppt".into(),
            location: RasterLocation::Local { path: "/data/ppt.tif".into() },
            crs: Some(Crs::Epsg(4269)),
            resolution: None,
            nodata: None,
            bands: vec!["jan".into(), "feb".into()],
            kind: ValueKind::Continuous,
        }
    }

    fn clip() -> ClippedRaster {
        ClippedRaster {
            source: "prism/v2".into(),
            variable: "ppt".into(),
            crs: Crs::Epsg(4269),
            request_crs: Crs::WGS84,
            bands: vec!["jan".into(), "feb".into()],
            transform: GeoTransform::new(-104.1, 41.3, 0.1, 0.1),
            data: Array3::from_shape_fn((2, 3, 4), |(b, r, c)| if r == 1 && c == 1 { f64::NAN } else { (b * 12 + r * 4 + c) as f64 / 3.0 }),
            nodata: Some(-9999.0),
            coverage: 0.7,
            window: PixelWindow { col_off: 5, row_off: 6, width: 4, height: 3 },
        }
    }

    fn same(a: &ClippedRaster, b: &ClippedRaster) -> bool {
        let data_eq = a.data.iter().zip(b.data.iter()).all(|(x, y)| x.to_bits() == y.to_bits());
        data_eq && a.data.dim() == b.data.dim()
            && (a.source.as_str(), a.variable.as_str(), &a.crs, &a.request_crs, &a.bands)
                == (b.source.as_str(), b.variable.as_str(), &b.crs, &b.request_crs, &b.bands)
            && a.transform == b.transform && a.window == b.window
            && a.coverage.to_bits() == b.coverage.to_bits() && a.nodata == b.nodata
    }

    #[test]
    fn decode_restores_exact_bits() {
        let original = clip();
        let bytes = encode(&original).unwrap();
        assert!(same(&decode(&bytes).unwrap(), &original));
        // Deterministic encoding.
        assert_eq!(bytes, encode(&decode(&bytes).unwrap()).unwrap());
    }

    #[test]
    fn flipped_byte_is_detected() {
        let mut bytes = encode(&clip()).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        assert!(decode(&bytes).is_err());
        assert!(decode(&bytes[..10]).is_err());
    }

    #[test]
    fn key_depends_on_every_request_component() {
        let d = descriptor();
        let bbox = Bbox::new(-104.0, 41.0, -103.5, 41.2);
        let k = WindowCache::key(&d, &bbox, &Crs::WGS84).unwrap();
        assert_eq!(k.len(), 64);
        assert_eq!(Some(k.clone()), WindowCache::key(&d, &bbox, &Crs::WGS84));
        assert_ne!(Some(k.clone()), WindowCache::key(&d, &Bbox::new(-104.0, 41.0, -103.5, 41.2000001), &Crs::WGS84));
        assert_ne!(Some(k.clone()), WindowCache::key(&d, &bbox, &Crs::Epsg(5070)));
        let mut other = d.clone();
        other.bands.reverse();
        assert_ne!(Some(k), WindowCache::key(&other, &bbox, &Crs::WGS84));
    }

    #[test]
    fn key_follows_nodata_and_raster_crs_overrides() {
        let d = descriptor();
        let bbox = Bbox::new(-104.0, 41.0, -103.5, 41.2);
        let k = WindowCache::key(&d, &bbox, &Crs::WGS84).unwrap();

        let mut nodata = d.clone();
        nodata.nodata = Some(-1.0);
        let with_nodata = WindowCache::key(&nodata, &bbox, &Crs::WGS84).unwrap();
        assert_ne!(k, with_nodata);
        nodata.nodata = Some(-2.0);
        assert_ne!(with_nodata, WindowCache::key(&nodata, &bbox, &Crs::WGS84).unwrap());

        let mut crs = d.clone();
        crs.crs = Some(Crs::WGS84);
        assert_ne!(k, WindowCache::key(&crs, &bbox, &Crs::WGS84).unwrap());
    }

    #[test]
    fn corrupt_entry_is_removed_and_missed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WindowCache::new(dir.path().to_path_buf());
        let d = descriptor();
        let bbox = Bbox::new(-104.0, 41.0, -103.5, 41.2);

        assert!(cache.get(&d, &bbox, &Crs::WGS84).is_none());
        cache.put(&d, &bbox, &Crs::WGS84, &clip()).unwrap();
        assert!(same(&cache.get(&d, &bbox, &Crs::WGS84).unwrap(), &clip()));

        let key = WindowCache::key(&d, &bbox, &Crs::WGS84).unwrap();
        let path = cache.path_for(&d, &key);
        assert!(path.starts_with(dir.path().join("prism_v2")));
        std::fs::write(&path, b"garbage").unwrap();
        assert!(cache.get(&d, &bbox, &Crs::WGS84).is_none());
        assert!(!path.exists());
    }
}
