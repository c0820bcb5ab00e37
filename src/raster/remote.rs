use std::{
    io::{self, Read, Seek, SeekFrom},
    time::Duration,
};

use ahash::AHashMap;
use anyhow::{Context, Result, anyhow, bail};
use reqwest::{
    StatusCode,
    blocking::Client,
    header::{CONTENT_RANGE, RANGE},
    redirect::Policy,
};

const BLOCK_SIZE: u64 = 256 * 1024;

/// Timeouts become `io::ErrorKind::TimedOut` so callers can tell them apart.
fn to_io(err: reqwest::Error) -> io::Error {
    let kind = if err.is_timeout() { io::ErrorKind::TimedOut } else { io::ErrorKind::Other };
    io::Error::new(kind, err)
}

/// `Read + Seek` over a remote file using HTTP range requests, fetched in
/// fixed-size blocks that are kept for the lifetime of the reader.
pub(crate) struct HttpRangeReader {
    client: Client,
    url: String,
    len: u64,
    pos: u64,
    blocks: AHashMap<u64, Vec<u8>>,
}

impl HttpRangeReader {
    /// Probe the file length with a one-byte range GET.
    pub(crate) fn open(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("eden/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::limited(10))
            .timeout(timeout)
            .build()?;

        let resp = client.get(url).header(RANGE, "bytes=0-0").send()
            .map_err(to_io)
            .with_context(|| format!("GET {url}"))?;
        if resp.status() != StatusCode::PARTIAL_CONTENT {
            bail!("GET {url} returned {} (range requests required)", resp.status());
        }
        let len = resp.headers().get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| anyhow!("GET {url}: missing or unparseable Content-Range"))?;

        Ok(Self { client, url: url.to_string(), len, pos: 0, blocks: AHashMap::new() })
    }

    fn block(&mut self, index: u64) -> io::Result<&[u8]> {
        if !self.blocks.contains_key(&index) {
            let start = index * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(self.len) - 1;
            log::debug!("[window] GET {} bytes={start}-{end}", self.url);

            let resp = self.client.get(&self.url)
                .header(RANGE, format!("bytes={start}-{end}"))
                .send()
                .map_err(to_io)?;
            if resp.status() != StatusCode::PARTIAL_CONTENT {
                return Err(io::Error::other(format!("GET {} returned {}", self.url, resp.status())));
            }
            let bytes = resp.bytes().map_err(to_io)?;
            if bytes.len() as u64 != end - start + 1 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short range response from {}", self.url),
                ));
            }
            self.blocks.insert(index, bytes.to_vec());
        }
        Ok(&self.blocks[&index])
    }
}

impl Read for HttpRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let pos = self.pos;
        let block = self.block(pos / BLOCK_SIZE)?;
        let offset = (pos % BLOCK_SIZE) as usize;
        let n = buf.len().min(block.len() - offset);
        buf[..n].copy_from_slice(&block[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for HttpRangeReader {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of remote file")
        })?;
        self.pos = target;
        Ok(target)
    }
}
