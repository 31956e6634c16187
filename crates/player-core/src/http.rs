//! HTTP range reader used for streaming playback.
//!
//! Buffered range fetcher over HTTP that presents `Read + Seek` to the
//! container prober. Fetches run in fixed-size blocks, the last block stays
//! cached in memory, and a shared interrupt flag makes blocked transfers
//! return early. Transfer counters live behind an `Arc` so the demuxer can
//! keep reporting them after the reader moves into the prober.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use player_types::SourceStats;
use symphonia::core::io::MediaSource;
use ureq::ResponseExt;

/// Configuration for HTTP range fetching.
#[derive(Clone, Debug)]
pub struct HttpReaderConfig {
    /// Bytes per fetched block.
    pub block_size: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpReaderConfig {
    fn default() -> Self {
        Self {
            block_size: 512 * 1024,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Transfer counters shared between the reader and its owner.
#[derive(Debug, Default)]
pub struct HttpTelemetry {
    total_bytes: AtomicU64,
    fetched_bytes: AtomicU64,
    requests: AtomicU64,
    cache_hit_bytes: AtomicU64,
    /// Last non-success HTTP status, 0 while none seen.
    http_error: AtomicU32,
    /// URL the transport landed on after redirects, when it differs from
    /// the one requested. Only the first divergence is kept.
    effective_url: Mutex<Option<String>>,
}

impl HttpTelemetry {
    pub fn stats(&self) -> SourceStats {
        let total = self.total_bytes.load(Ordering::Relaxed);
        SourceStats {
            total_bytes: (total > 0).then_some(total),
            fetched_bytes: self.fetched_bytes.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            cache_hit_bytes: self.cache_hit_bytes.load(Ordering::Relaxed),
        }
    }

    /// HTTP status of the last failed request, for error classification.
    pub fn last_http_error(&self) -> Option<u16> {
        match self.http_error.load(Ordering::Relaxed) {
            0 => None,
            code => Some(code as u16),
        }
    }

    fn record_effective_url(&self, requested: &str, landed: &str) {
        if landed == requested {
            return;
        }
        let mut g = self.effective_url.lock().unwrap();
        if g.is_none() {
            *g = Some(landed.to_string());
        }
    }

    /// Post-redirect URL, when one was observed.
    pub fn effective_url(&self) -> Option<String> {
        self.effective_url.lock().unwrap().clone()
    }
}

/// HTTP range reader with a single-block in-memory cache.
pub struct HttpReader {
    url: String,
    config: HttpReaderConfig,
    pos: u64,
    len: Option<u64>,
    buf: Vec<u8>,
    buf_start: u64,
    interrupt: Arc<AtomicBool>,
    telemetry: Arc<HttpTelemetry>,
}

impl HttpReader {
    pub fn new(url: String, config: HttpReaderConfig, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            url,
            config,
            pos: 0,
            len: None,
            buf: Vec::new(),
            buf_start: 0,
            interrupt,
            telemetry: Arc::new(HttpTelemetry::default()),
        }
    }

    /// Counter handle that stays valid after the reader is moved away.
    pub fn telemetry(&self) -> Arc<HttpTelemetry> {
        self.telemetry.clone()
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Ensure the total length is known by issuing a range probe.
    fn ensure_len(&mut self) -> io::Result<u64> {
        if let Some(len) = self.len {
            return Ok(len);
        }
        let (data, len) = self.fetch_range(0, 0)?;
        let len = len
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "content length unavailable"))?;
        self.buf_start = 0;
        self.buf = data;
        self.len = Some(len);
        self.telemetry.total_bytes.store(len, Ordering::Relaxed);
        Ok(len)
    }

    /// Fetch a byte range from the remote server.
    fn fetch_range(&mut self, start: u64, end: u64) -> io::Result<(Vec<u8>, Option<u64>)> {
        let range = format!("bytes={start}-{end}");
        let begun = std::time::Instant::now();
        self.telemetry.requests.fetch_add(1, Ordering::Relaxed);
        let resp = ureq::get(&self.url)
            .config()
            .timeout_per_call(Some(self.config.timeout))
            .build()
            .header("Range", &range)
            .call()
            .map_err(|e| {
                if let ureq::Error::StatusCode(code) = &e {
                    self.telemetry
                        .http_error
                        .store(u32::from(*code), Ordering::Relaxed);
                }
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("http range request failed: {e}"),
                )
            })?;
        let elapsed = begun.elapsed();

        self.telemetry
            .record_effective_url(&self.url, &resp.get_uri().to_string());
        let status = resp.status();
        let content_range = resp
            .headers()
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = resp
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let mut buf = Vec::new();
        let (_, body) = resp.into_parts();
        body.into_reader()
            .read_to_end(&mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("http read failed: {e}")))?;
        self.telemetry
            .fetched_bytes
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        if elapsed > Duration::from_millis(250) {
            let kbps = if elapsed.as_millis() > 0 {
                (buf.len() as u128 * 1000 / elapsed.as_millis()) / 1024
            } else {
                0
            };
            tracing::warn!(
                took_ms = elapsed.as_millis(),
                bytes = buf.len(),
                kbps = kbps as u64,
                range = range.as_str(),
                "http range fetch slow"
            );
        }

        let len = match status {
            ureq::http::StatusCode::PARTIAL_CONTENT => content_range
                .as_deref()
                .and_then(parse_content_range_total)
                .or(content_length),
            ureq::http::StatusCode::OK => content_length,
            _ => None,
        };

        Ok((buf, len))
    }

    /// Fill the block cache starting at the current position.
    fn refill(&mut self) -> io::Result<()> {
        if self.is_interrupted() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "read interrupted",
            ));
        }

        let start = self.pos;
        let mut end = start
            .saturating_add(self.config.block_size as u64)
            .saturating_sub(1);
        if let Some(len) = self.len {
            if len > 0 {
                end = end.min(len.saturating_sub(1));
            }
        }

        let (buf, len) = self.fetch_range(start, end)?;
        if let Some(total) = len {
            self.len = Some(total);
            self.telemetry.total_bytes.store(total, Ordering::Relaxed);
        }
        self.buf = buf;
        self.buf_start = start;
        Ok(())
    }
}

impl Read for HttpReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.is_interrupted() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "read interrupted",
            ));
        }
        if out.is_empty() {
            return Ok(0);
        }
        if let Some(len) = self.len {
            if self.pos >= len {
                return Ok(0);
            }
        }

        let mut from_cache = true;
        if self.buf.is_empty()
            || self.pos < self.buf_start
            || self.pos >= self.buf_start.saturating_add(self.buf.len() as u64)
        {
            self.refill()?;
            from_cache = false;
        }

        if self.buf.is_empty() {
            return Ok(0);
        }

        let offset = (self.pos.saturating_sub(self.buf_start)) as usize;
        if offset >= self.buf.len() {
            return Ok(0);
        }

        let available = self.buf.len().saturating_sub(offset);
        let to_copy = available.min(out.len());
        out[..to_copy].copy_from_slice(&self.buf[offset..offset + to_copy]);
        self.pos = self.pos.saturating_add(to_copy as u64);
        if from_cache {
            self.telemetry
                .cache_hit_bytes
                .fetch_add(to_copy as u64, Ordering::Relaxed);
        }
        Ok(to_copy)
    }
}

impl Seek for HttpReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(x) => x,
            SeekFrom::Current(d) => add_signed(self.pos, d),
            SeekFrom::End(d) => {
                let len = self.ensure_len()?;
                add_signed(len, d)
            }
        };
        self.pos = target;
        Ok(self.pos)
    }
}

impl MediaSource for HttpReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
}

/// Extract the total length from a Content-Range header.
fn parse_content_range_total(header: &str) -> Option<u64> {
    // Format: "bytes start-end/total"
    let (_, total) = header.split_once('/')?;
    total.parse::<u64>().ok()
}

/// Add a signed delta to an unsigned base with saturation.
fn add_signed(base: u64, delta: i64) -> u64 {
    if delta >= 0 {
        base.saturating_add(delta as u64)
    } else {
        let neg = delta.checked_abs().unwrap_or(i64::MAX) as u64;
        base.saturating_sub(neg)
    }
}
