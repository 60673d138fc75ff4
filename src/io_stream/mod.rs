//! Buffered random-access reader used by every descriptor.
//!
//! [`ArchiveReader`] wraps any `Read + Seek` source with a read-ahead buffer
//! of configurable size: a few dozen bytes while probing headers, tens of
//! kilobytes for full directory walks.  It implements `Read` and `Seek`
//! itself, so fixed-width integers in either byte order come straight from
//! `byteorder::ReadBytesExt`:
//!
//! ```
//! use std::io::Cursor;
//! use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
//! use arcprobe::io_stream::ArchiveReader;
//!
//! let mut r = ArchiveReader::new(Cursor::new(vec![1, 0, 0, 0, 0, 2]), 16)?;
//! assert_eq!(r.read_u32::<LittleEndian>()?, 1);
//! assert_eq!(r.read_u16::<BigEndian>()?, 2);
//! assert!(r.read_u8().is_err()); // end of stream is an error, never zero-fill
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! # Obfuscation
//! An optional [`Cipher`] is applied to every byte on its way out, keyed by
//! absolute position.  Format code above this layer always sees plaintext.

pub mod cipher;

pub use cipher::Cipher;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::resource::{Endian, FieldKind, PointerRecord, Width};

/// Any seekable byte source.  Descriptors see every container through
/// [`SourceReader`], so files and in-memory buffers are interchangeable.
pub trait Source: Read + Seek {}
impl<T: Read + Seek> Source for T {}

pub type SourceReader = ArchiveReader<Box<dyn Source>>;

/// Read-ahead used while probing: enough for a header and a few fields.
pub const DEFAULT_PROBE_BUFFER: usize = 64;
/// Read-ahead used for full directory reads.
pub const DEFAULT_READ_BUFFER:  usize = 64 * 1024;

pub struct ArchiveReader<R: Read + Seek> {
    inner:     R,
    /// Raw (still ciphered) bytes starting at `buf_start`.
    buf:       Box<[u8]>,
    buf_start: u64,
    buf_len:   usize,
    /// Where `inner` is currently positioned, to avoid redundant seeks.
    inner_pos: u64,
    pos:       u64,
    len:       u64,
    cipher:    Cipher,
}

impl ArchiveReader<File> {
    /// Open a file with a read-ahead buffer of `capacity` bytes.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> io::Result<Self> {
        Self::new(File::open(path)?, capacity)
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn new(mut inner: R, capacity: usize) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            buf:       vec![0u8; capacity.max(1)].into_boxed_slice(),
            buf_start: 0,
            buf_len:   0,
            inner_pos: 0,
            pos:       0,
            len,
            cipher:    Cipher::None,
        })
    }

    // ── State ────────────────────────────────────────────────────────────────

    #[inline] pub fn position(&self) -> u64 { self.pos }
    #[inline] pub fn length(&self) -> u64 { self.len }
    #[inline] pub fn remaining(&self) -> u64 { self.len.saturating_sub(self.pos) }
    pub fn capacity(&self) -> usize { self.buf.len() }
    pub fn cipher(&self) -> &Cipher { &self.cipher }

    /// Install a transform for all subsequent reads.
    pub fn set_cipher(&mut self, cipher: Cipher) {
        self.cipher = cipher;
    }

    pub fn into_inner(self) -> R { self.inner }

    // ── Navigation ───────────────────────────────────────────────────────────

    /// Absolute seek that refuses to leave the stream.
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset > self.len {
            return Err(eof(format!("seek to {offset} past end ({})", self.len)));
        }
        self.pos = offset;
        Ok(())
    }

    pub fn rewind_to_start(&mut self) {
        self.pos = 0;
    }

    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        let target = self.pos.checked_add(n)
            .ok_or_else(|| eof("skip overflows".to_string()))?;
        self.seek_to(target)
    }

    /// Skip forward to the next multiple of `multiple` (absolute).
    pub fn pad_to(&mut self, multiple: u64) -> io::Result<()> {
        if multiple <= 1 {
            return Ok(());
        }
        let rem = self.pos % multiple;
        if rem != 0 {
            self.skip(multiple - rem)?;
        }
        Ok(())
    }

    // ── Typed reads ──────────────────────────────────────────────────────────

    /// Read exactly `n` bytes.  Fails before allocating when fewer remain.
    pub fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        if n as u64 > self.remaining() {
            return Err(eof(format!("{n} bytes requested, {} remain", self.remaining())));
        }
        let mut out = vec![0u8; n];
        self.read_exact(&mut out)?;
        Ok(out)
    }

    /// Fixed-length string field; anything after the first NUL is padding.
    pub fn read_string(&mut self, n: usize) -> io::Result<String> {
        let raw = self.read_bytes(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// NUL-terminated string of any length; the terminator is consumed.
    pub fn read_null_string(&mut self) -> io::Result<String> {
        self.read_null_string_bounded(usize::MAX)
    }

    /// NUL-terminated string of at most `max` bytes (terminator excluded).
    pub fn read_null_string_bounded(&mut self, max: usize) -> io::Result<String> {
        let mut raw = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            if raw.len() == max {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unterminated string longer than {max} bytes"),
                ));
            }
            raw.push(b);
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Unsigned integer of the given width and byte order, widened to `u64`.
    pub fn read_field(&mut self, width: Width, endian: Endian) -> io::Result<u64> {
        Ok(match (width, endian) {
            (Width::U8, _)                 => self.read_u8()? as u64,
            (Width::U16, Endian::Little)   => self.read_u16::<LittleEndian>()? as u64,
            (Width::U16, Endian::Big)      => self.read_u16::<BigEndian>()? as u64,
            (Width::U32, Endian::Little)   => self.read_u32::<LittleEndian>()? as u64,
            (Width::U32, Endian::Big)      => self.read_u32::<BigEndian>()? as u64,
            (Width::U64, Endian::Little)   => self.read_u64::<LittleEndian>()?,
            (Width::U64, Endian::Big)      => self.read_u64::<BigEndian>()?,
        })
    }

    /// Read a numeric field and capture where it came from.
    pub fn read_pointer(
        &mut self,
        kind:   FieldKind,
        width:  Width,
        endian: Endian,
    ) -> io::Result<(u64, PointerRecord)> {
        let position = self.pos;
        let value = self.read_field(width, endian)?;
        Ok((value, PointerRecord::new(kind, position, width, endian)))
    }

    // ── Buffer management ────────────────────────────────────────────────────

    fn buffered(&self) -> Option<(usize, usize)> {
        if self.pos >= self.buf_start && self.pos < self.buf_start + self.buf_len as u64 {
            let at = (self.pos - self.buf_start) as usize;
            Some((at, self.buf_len - at))
        } else {
            None
        }
    }

    fn position_inner(&mut self) -> io::Result<()> {
        if self.inner_pos != self.pos {
            self.inner.seek(SeekFrom::Start(self.pos))?;
            self.inner_pos = self.pos;
        }
        Ok(())
    }

    fn fill(&mut self) -> io::Result<usize> {
        self.position_inner()?;
        let want = (self.buf.len() as u64).min(self.remaining()) as usize;
        let mut filled = 0;
        while filled < want {
            match self.inner.read(&mut self.buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.inner_pos += filled as u64;
        self.buf_start = self.pos;
        self.buf_len = filled;
        Ok(filled)
    }
}

impl<R: Read + Seek> Read for ArchiveReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        let start = self.pos;

        let n = match self.buffered() {
            Some((at, avail)) => {
                let n = avail.min(out.len());
                out[..n].copy_from_slice(&self.buf[at..at + n]);
                n
            }
            // Large reads bypass the buffer entirely.
            None if out.len() >= self.buf.len() => {
                self.position_inner()?;
                let want = (out.len() as u64).min(self.remaining()) as usize;
                let n = self.inner.read(&mut out[..want])?;
                self.inner_pos += n as u64;
                n
            }
            None => {
                let filled = self.fill()?;
                let n = filled.min(out.len());
                out[..n].copy_from_slice(&self.buf[..n]);
                n
            }
        };

        self.cipher.apply(start, &mut out[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for ArchiveReader<R> {
    fn seek(&mut self, to: SeekFrom) -> io::Result<u64> {
        let target = match to {
            SeekFrom::Start(p)   => Some(p),
            SeekFrom::End(d)     => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        let target = target.ok_or_else(|| io::Error::new(
            io::ErrorKind::InvalidInput, "seek to a negative or overflowing position",
        ))?;
        self.pos = target;
        Ok(target)
    }
}

fn eof(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg)
}
