//! Exporter pipeline: lazy, streaming transforms opened per resource.
//!
//! # Contract
//! [`Exporter::open`] receives a reader already positioned at the start of
//! the resource and returns a fresh [`ExportHandle`].  The handle yields
//! exactly `decompressed_length` bytes through [`ExportHandle::next_byte`] (or
//! the block form [`ExportHandle::read_block`]); `has_more()` turns false
//! immediately after the last one.  A decoder that runs dry early is
//! [`ExportError::Truncated`], never silently short.
//!
//! Handles are single-use and bound to one resource.  The core never buffers
//! a whole payload; codecs that cannot stream (LZMA, raw LZ4 blocks) buffer
//! internally.
//!
//! # Reference exporters
//! The concrete algorithms are collaborators wrapped from their crates:
//!
//! | name        | crate      | streaming |
//! |-------------|------------|-----------|
//! | `stored`    | -          | yes |
//! | `zlib`      | flate2     | yes |
//! | `deflate`   | flate2     | yes |
//! | `zstd`      | zstd       | yes |
//! | `lz4`       | lz4_flex   | yes (frame format) |
//! | `lz4-block` | lz4_flex   | no |
//! | `brotli`    | brotli     | yes |
//! | `lzma`      | lzma-rs    | no |
//! | `xor`       | -          | yes |

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use thiserror::Error;

use crate::io_stream::Cipher;

/// Internal refill size of [`StreamHandle`].
const HANDLE_BUFFER: usize = 8 * 1024;
const ZSTD_LEVEL:    i32   = 3;
const BROTLI_QUALITY: u32  = 9;
/// Largest output a buffering codec will allocate for one resource.
const MAX_BUFFERED:   u64  = 1 << 30;
/// Each LZ4 block byte expands to at most this many output bytes.
const LZ4_MAX_RATIO:  u64  = 255;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Exporter '{exporter}' cannot {operation}")]
    Unsupported { exporter: String, operation: &'static str },
    #[error("Stream ended after {produced} of {expected} bytes")]
    Truncated { produced: u64, expected: u64 },
    #[error("Read past the end of an exhausted handle")]
    Exhausted,
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ExportError> for io::Error {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Io(inner) => inner,
            ExportError::Truncated { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

// ── Traits ───────────────────────────────────────────────────────────────────

/// Stateful cursor over one resource's transformed bytes.
pub trait ExportHandle {
    fn has_more(&self) -> bool;

    fn next_byte(&mut self) -> Result<u8, ExportError>;

    /// Pull up to `out.len()` bytes.  Returns 0 only once exhausted.
    fn read_block(&mut self, out: &mut [u8]) -> Result<usize, ExportError> {
        let mut n = 0;
        while n < out.len() && self.has_more() {
            out[n] = self.next_byte()?;
            n += 1;
        }
        Ok(n)
    }
}

/// A transform applied on demand to a resource's byte range.
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    fn open<'a>(
        &self,
        source:              Box<dyn Read + 'a>,
        compressed_length:   u64,
        decompressed_length: u64,
    ) -> Result<Box<dyn ExportHandle + 'a>, ExportError>;

    /// Inverse transform, used when a replaced resource has to be stored in
    /// the container's native encoding.
    fn encode(&self, _data: &[u8]) -> Result<Vec<u8>, ExportError> {
        Err(ExportError::Unsupported { exporter: self.name().to_owned(), operation: "encode" })
    }
}

// ── StreamHandle ─────────────────────────────────────────────────────────────

/// Handle over any decoder exposed as `Read`.  Produces exactly `expected`
/// bytes.
pub struct StreamHandle<'a> {
    inner:    Box<dyn Read + 'a>,
    expected: u64,
    produced: u64,
    buf:      Vec<u8>,
    at:       usize,
    filled:   usize,
}

impl<'a> StreamHandle<'a> {
    pub fn new(inner: Box<dyn Read + 'a>, expected: u64) -> Self {
        let cap = (expected.min(HANDLE_BUFFER as u64) as usize).max(1);
        Self { inner, expected, produced: 0, buf: vec![0u8; cap], at: 0, filled: 0 }
    }

    pub fn produced(&self) -> u64 { self.produced }

    fn refill(&mut self) -> Result<(), ExportError> {
        let want = (self.buf.len() as u64).min(self.expected - self.produced) as usize;
        let n = loop {
            match self.inner.read(&mut self.buf[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            return Err(ExportError::Truncated { produced: self.produced, expected: self.expected });
        }
        self.at = 0;
        self.filled = n;
        Ok(())
    }
}

impl ExportHandle for StreamHandle<'_> {
    fn has_more(&self) -> bool {
        self.produced < self.expected
    }

    fn next_byte(&mut self) -> Result<u8, ExportError> {
        if !self.has_more() {
            return Err(ExportError::Exhausted);
        }
        if self.at == self.filled {
            self.refill()?;
        }
        let b = self.buf[self.at];
        self.at += 1;
        self.produced += 1;
        Ok(b)
    }

    fn read_block(&mut self, out: &mut [u8]) -> Result<usize, ExportError> {
        if out.is_empty() || !self.has_more() {
            return Ok(0);
        }
        if self.at == self.filled {
            self.refill()?;
        }
        let n = (self.filled - self.at).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.at..self.at + n]);
        self.at += n;
        self.produced += n as u64;
        Ok(n)
    }
}

// ── ExportReader ─────────────────────────────────────────────────────────────

/// Adapts a handle to `std::io::Read`, e.g. for `io::copy` into a sink.
pub struct ExportReader<'a> {
    handle: Box<dyn ExportHandle + 'a>,
}

impl<'a> ExportReader<'a> {
    pub fn new(handle: Box<dyn ExportHandle + 'a>) -> Self {
        Self { handle }
    }

    pub fn has_more(&self) -> bool {
        self.handle.has_more()
    }
}

impl Read for ExportReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        Ok(self.handle.read_block(out)?)
    }
}

// ── Reference exporters ──────────────────────────────────────────────────────

/// Payload stored verbatim.
pub struct Stored;
impl Exporter for Stored {
    fn name(&self) -> &str { "stored" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        Ok(Box::new(StreamHandle::new(Box::new(source.take(comp)), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> { Ok(data.to_vec()) }
}

/// zlib-wrapped DEFLATE (RFC 1950).
pub struct Zlib;
impl Exporter for Zlib {
    fn name(&self) -> &str { "zlib" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let dec = flate2::read::ZlibDecoder::new(source.take(comp));
        Ok(Box::new(StreamHandle::new(Box::new(dec), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data)?;
        Ok(enc.finish()?)
    }
}

/// Raw DEFLATE (RFC 1951), no header.
pub struct Deflate;
impl Exporter for Deflate {
    fn name(&self) -> &str { "deflate" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let dec = flate2::read::DeflateDecoder::new(source.take(comp));
        Ok(Box::new(StreamHandle::new(Box::new(dec), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data)?;
        Ok(enc.finish()?)
    }
}

pub struct Zstd;
impl Exporter for Zstd {
    fn name(&self) -> &str { "zstd" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let dec = zstd::stream::read::Decoder::new(source.take(comp))
            .map_err(|e| ExportError::Codec(e.to_string()))?;
        Ok(Box::new(StreamHandle::new(Box::new(dec), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| ExportError::Codec(e.to_string()))
    }
}

/// LZ4 frame format.
pub struct Lz4Frame;
impl Exporter for Lz4Frame {
    fn name(&self) -> &str { "lz4" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let dec = lz4_flex::frame::FrameDecoder::new(source.take(comp));
        Ok(Box::new(StreamHandle::new(Box::new(dec), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        let mut enc = lz4_flex::frame::FrameEncoder::new(Vec::new());
        enc.write_all(data)?;
        enc.finish().map_err(|e| ExportError::Codec(e.to_string()))
    }
}

/// Raw LZ4 block; the decompressed size comes from the directory.
pub struct Lz4Block;
impl Exporter for Lz4Block {
    fn name(&self) -> &str { "lz4-block" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let ceiling = comp.saturating_mul(LZ4_MAX_RATIO).saturating_add(16).min(MAX_BUFFERED);
        if decomp > ceiling {
            return Err(ExportError::Codec(format!(
                "declared size {decomp} is impossible for a {comp}-byte LZ4 block"
            )));
        }
        let packed = read_bounded(source, comp)?;
        let raw = lz4_flex::block::decompress(&packed, decomp as usize)
            .map_err(|e| ExportError::Codec(e.to_string()))?;
        Ok(Box::new(StreamHandle::new(Box::new(Cursor::new(raw)), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        Ok(lz4_flex::block::compress(data))
    }
}

pub struct Brotli;
impl Exporter for Brotli {
    fn name(&self) -> &str { "brotli" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let dec = brotli::Decompressor::new(source.take(comp), 4096);
        Ok(Box::new(StreamHandle::new(Box::new(dec), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, BROTLI_QUALITY, 22);
            w.write_all(data)?;
        }
        Ok(out)
    }
}

/// LZMA-alone stream.  lzma-rs decodes into a sink, so this one buffers.
pub struct Lzma;
impl Exporter for Lzma {
    fn name(&self) -> &str { "lzma" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let packed = read_bounded(source, comp)?;
        let mut raw = Vec::new();
        lzma_rs::lzma_decompress(&mut Cursor::new(packed), &mut raw)
            .map_err(|e| ExportError::Codec(e.to_string()))?;
        Ok(Box::new(StreamHandle::new(Box::new(Cursor::new(raw)), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut Cursor::new(data), &mut out)?;
        Ok(out)
    }
}

/// XOR-obfuscated payload.  The keystream restarts at the resource start.
pub struct Xor {
    cipher: Cipher,
}

impl Xor {
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }
}

impl Exporter for Xor {
    fn name(&self) -> &str { "xor" }
    fn open<'a>(&self, source: Box<dyn Read + 'a>, comp: u64, decomp: u64)
        -> Result<Box<dyn ExportHandle + 'a>, ExportError>
    {
        let reader = CipherRead { inner: source.take(comp), cipher: self.cipher.clone(), pos: 0 };
        Ok(Box::new(StreamHandle::new(Box::new(reader), decomp)))
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, ExportError> {
        let mut out = data.to_vec();
        self.cipher.apply(0, &mut out);
        Ok(out)
    }
}

struct CipherRead<R> {
    inner:  R,
    cipher: Cipher,
    pos:    u64,
}

impl<R: Read> Read for CipherRead<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(out)?;
        self.cipher.apply(self.pos, &mut out[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

fn read_bounded(source: Box<dyn Read + '_>, comp: u64) -> Result<Vec<u8>, ExportError> {
    let mut packed = Vec::new();
    source.take(comp).read_to_end(&mut packed)?;
    if (packed.len() as u64) < comp {
        return Err(ExportError::Truncated { produced: packed.len() as u64, expected: comp });
    }
    Ok(packed)
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a reference exporter by name.  `None` for unknown names; the
/// caller decides whether that is fatal.
pub fn by_name(name: &str) -> Option<Arc<dyn Exporter>> {
    let e: Arc<dyn Exporter> = match name.to_lowercase().as_str() {
        "stored" | "none" => Arc::new(Stored),
        "zlib"            => Arc::new(Zlib),
        "deflate"         => Arc::new(Deflate),
        "zstd"            => Arc::new(Zstd),
        "lz4"             => Arc::new(Lz4Frame),
        "lz4-block"       => Arc::new(Lz4Block),
        "brotli"          => Arc::new(Brotli),
        "lzma"            => Arc::new(Lzma),
        _                 => return None,
    };
    Some(e)
}

/// Drain a handle into `sink`, returning the byte count.  Handle errors
/// keep their variant, so a short payload stays [`ExportError::Truncated`].
pub fn copy_to<W: Write + ?Sized>(mut handle: Box<dyn ExportHandle + '_>, sink: &mut W) -> Result<u64, ExportError> {
    let mut buf = [0u8; HANDLE_BUFFER];
    let mut total = 0u64;
    loop {
        let n = handle.read_block(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_bytes<'a>(e: &dyn Exporter, packed: &'a [u8], decomp: u64) -> Box<dyn ExportHandle + 'a> {
        e.open(Box::new(packed), packed.len() as u64, decomp).unwrap()
    }

    #[test]
    fn stored_yields_exactly_n_bytes() {
        let data = b"0123456789";
        let mut h = open_bytes(&Stored, data, 10);
        let mut got = Vec::new();
        while h.has_more() {
            got.push(h.next_byte().unwrap());
        }
        assert_eq!(got, data);
        assert!(!h.has_more());
        assert!(matches!(h.next_byte(), Err(ExportError::Exhausted)));
    }

    #[test]
    fn short_source_is_truncated_error() {
        let mut h = open_bytes(&Stored, b"abc", 5);
        let mut out = [0u8; 8];
        assert_eq!(h.read_block(&mut out).unwrap(), 3);
        assert!(matches!(h.read_block(&mut out), Err(ExportError::Truncated { produced: 3, expected: 5 })));

        let mut sink = Vec::new();
        let err = copy_to(open_bytes(&Stored, b"abc", 1 << 40), &mut sink).unwrap_err();
        assert!(matches!(err, ExportError::Truncated { produced: 3, .. }));
        assert_eq!(sink, b"abc");
    }

    #[test]
    fn every_codec_round_trips() {
        let data: Vec<u8> = b"lorem ipsum dolor sit amet ".iter().cycle().take(5000).copied().collect();
        for name in ["stored", "zlib", "deflate", "zstd", "lz4", "lz4-block", "brotli", "lzma"] {
            let e = by_name(name).unwrap();
            let packed = e.encode(&data).unwrap();
            let h = open_bytes(e.as_ref(), &packed, data.len() as u64);
            let mut out = Vec::new();
            let n = copy_to(h, &mut out).unwrap();
            assert_eq!(n, data.len() as u64, "{name}");
            assert_eq!(out, data, "{name}");
        }
    }

    #[test]
    fn handle_stops_at_declared_length() {
        // The decoder could produce more; the handle must not.
        let packed = Zlib.encode(b"abcdefgh").unwrap();
        let mut h = open_bytes(&Zlib, &packed, 4);
        let mut got = Vec::new();
        while h.has_more() {
            got.push(h.next_byte().unwrap());
        }
        assert_eq!(got, b"abcd");
    }

    #[test]
    fn lz4_block_refuses_impossible_sizes() {
        let packed = Lz4Block.encode(b"tiny").unwrap();
        let opened = Lz4Block.open(Box::new(packed.as_slice()), packed.len() as u64, 1 << 62);
        assert!(matches!(opened, Err(ExportError::Codec(_))));

        // Highly compressible input stays within the ratio ceiling.
        let zeros = vec![0u8; 64 * 1024];
        let packed = Lz4Block.encode(&zeros).unwrap();
        let mut out = Vec::new();
        copy_to(open_bytes(&Lz4Block, &packed, zeros.len() as u64), &mut out).unwrap();
        assert_eq!(out, zeros);
    }

    #[test]
    fn xor_keystream_starts_at_resource() {
        let x = Xor::new(Cipher::repeating(vec![0x10, 0x20]));
        let packed = x.encode(b"hello").unwrap();
        assert_ne!(packed, b"hello");
        let mut out = Vec::new();
        copy_to(open_bytes(&x, &packed, 5), &mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn unknown_name() {
        assert!(by_name("rar").is_none());
        assert_eq!(by_name("NONE").unwrap().name(), "stored");
    }

    #[test]
    fn reopening_starts_fresh() {
        let data = b"fresh";
        let mut first = open_bytes(&Stored, data, 5);
        first.next_byte().unwrap();
        let mut second = open_bytes(&Stored, data, 5);
        assert_eq!(second.next_byte().unwrap(), b'f');
    }
}
