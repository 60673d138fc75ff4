//! Write-back patcher: rebuild a container with some members replaced or
//! renamed, leaving every other byte as the original had it.
//!
//! # Passes
//! 1. **Stream.**  Walk resources in original offset order and copy into a
//!    temporary file next to the destination: every inter-payload range
//!    verbatim, unchanged payloads verbatim, replaced payloads from their
//!    replacement (encoded through the resource's exporter unless stored).
//!    Each copied range becomes a segment of the position map.
//! 2. **Patch.**  Translate every recorded [`PointerRecord`], [`Anchor`] and
//!    [`NameSlot`] position through the layout and overwrite exactly the
//!    field's bytes with the new value.
//! 3. **Commit.**  Flush, sync and atomically rename over the destination.
//!    Any failure before this point drops the temporary file, so the
//!    destination is never left half-written.
//!
//! [`Anchor`]: crate::resource::Anchor
//! [`NameSlot`]: crate::resource::NameSlot

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::archive::Archive;
use crate::exporter::ExportError;
use crate::progress::Progress;
use crate::resource::{Endian, FieldKind, PointerRecord, Resource, Width};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("'{descriptor}' does not support {operation}")]
    Unsupported { descriptor: &'static str, operation: &'static str },
    #[error("No resource at index {0}")]
    NoSuchResource(usize),
    #[error("Resource '{name}' records no pointer fields and cannot be replaced")]
    NotReplaceable { name: String },
    #[error("Resource '{name}' at {offset} overlaps a payload that is being rewritten")]
    Overlap { name: String, offset: u64 },
    #[error("Value {value} does not fit the {width:?} field at {position}")]
    FieldOverflow { value: u64, width: Width, position: u64 },
    #[error("Name '{name}' exceeds its {capacity}-byte slot")]
    NameTooLong { name: String, capacity: usize },
    #[error("Field at {position} lies inside a replaced payload")]
    Dangling { position: u64 },
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Write cancelled")]
    Cancelled,
}

/// Summary of a successful rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub resources:      usize,
    pub replaced:       usize,
    pub patched_fields: usize,
    pub bytes_written:  u64,
}

// ── Layout ───────────────────────────────────────────────────────────────────

/// One contiguous range of the new file and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    orig:     u64,
    new:      u64,
    len:      u64,
    /// Copied byte-for-byte, so interior positions translate too.
    verbatim: bool,
}

/// Original → new position map built while streaming.
#[derive(Debug, Default)]
struct Layout {
    segments:  Vec<Segment>,
    orig_size: u64,
    new_size:  u64,
}

impl Layout {
    fn push(&mut self, orig: u64, len: u64, verbatim: bool) -> u64 {
        let new = self.new_size;
        self.segments.push(Segment { orig, new, len, verbatim });
        self.new_size += len;
        new
    }

    /// Segments that can contain `pos`.  Segments are pushed in ascending
    /// original order and verbatim ones tile the original file, so only the
    /// last one starting before `pos` and those starting at `pos` qualify.
    fn candidates(&self, pos: u64) -> &[Segment] {
        let lo = self.segments.partition_point(|s| s.orig < pos);
        let hi = self.segments.partition_point(|s| s.orig <= pos);
        &self.segments[lo.saturating_sub(1)..hi]
    }

    /// New position of an original byte position.  Interior positions of
    /// rewritten payloads have no counterpart; their start does.
    fn translate(&self, pos: u64) -> Option<u64> {
        if pos == self.orig_size {
            return Some(self.new_size);
        }
        self.candidates(pos).iter().find_map(|s| {
            if s.verbatim && pos >= s.orig && pos < s.orig + s.len {
                Some(s.new + (pos - s.orig))
            } else if !s.verbatim && pos == s.orig {
                Some(s.new)
            } else {
                None
            }
        })
    }

    /// Translate a field location; the whole field must survive verbatim.
    fn translate_field(&self, ptr: &PointerRecord) -> Result<u64, WriteError> {
        self.translate_span(ptr.position, ptr.width.bytes() as u64)
    }

    fn translate_span(&self, position: u64, len: u64) -> Result<u64, WriteError> {
        let last = position + len.max(1) - 1;
        let inside = |p: u64| {
            self.candidates(p).iter().any(|s| s.verbatim && p >= s.orig && p < s.orig + s.len)
        };
        match self.translate(position) {
            Some(new) if inside(position) && inside(last) => Ok(new),
            _ => Err(WriteError::Dangling { position }),
        }
    }
}

/// Where one resource ended up.
#[derive(Debug, Clone, Copy)]
struct Placement {
    offset:              u64,
    length:              u64,
    decompressed_length: u64,
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Rebuild `archive` into `dest`.
pub fn rewrite(
    archive:  &Archive,
    dest:     &Path,
    progress: &mut dyn Progress,
) -> Result<WriteReport, WriteError> {
    let resources = archive.resources();
    for r in resources.iter().filter(|r| r.is_replaced()) {
        if !r.is_replaceable() {
            return Err(WriteError::NotReplaceable { name: r.name().to_owned() });
        }
    }

    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _                                    => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    let mut src = File::open(archive.path())?;

    progress.set_maximum(resources.len() as u64);
    let (layout, placements) = {
        let mut out = BufWriter::new(tmp.as_file_mut());
        let streamed = stream(&mut src, archive.size(), resources, &mut out, progress)?;
        out.flush()?;
        streamed
    };

    let file = tmp.as_file_mut();
    let mut patched_fields = 0;
    for (r, placed) in resources.iter().zip(&placements) {
        for ptr in r.pointers() {
            let value = match ptr.kind {
                FieldKind::Offset             => relative(placed.offset, ptr)?,
                FieldKind::Length             => placed.length,
                FieldKind::DecompressedLength => placed.decompressed_length,
            };
            write_field(file, layout.translate_field(ptr)?, ptr, value)?;
            patched_fields += 1;
        }
        if r.is_renamed() {
            if let Some(slot) = r.name_slot() {
                let at = layout.translate_span(slot.position, slot.capacity as u64)?;
                write_name(file, at, r.name(), slot.capacity)?;
                patched_fields += 1;
            }
        }
    }
    for anchor in archive.anchors() {
        let target = layout.translate(anchor.target)
            .ok_or(WriteError::Dangling { position: anchor.target })?;
        let value = relative(target, &anchor.pointer)?;
        write_field(file, layout.translate_field(&anchor.pointer)?, &anchor.pointer, value)?;
        patched_fields += 1;
    }

    file.sync_all()?;
    tmp.persist(dest).map_err(|e| WriteError::Io(e.error))?;

    let report = WriteReport {
        resources:      resources.len(),
        replaced:       resources.iter().filter(|r| r.is_replaced()).count(),
        patched_fields,
        bytes_written:  layout.new_size,
    };
    log::debug!(
        "rewrote {} -> {}: {} replaced, {} field(s) patched, {} bytes",
        archive.path().display(), dest.display(),
        report.replaced, report.patched_fields, report.bytes_written,
    );
    Ok(report)
}

// ── Pass 1: stream ───────────────────────────────────────────────────────────

fn stream<W: Write>(
    src:       &mut File,
    orig_size: u64,
    resources: &[Resource],
    out:       &mut W,
    progress:  &mut dyn Progress,
) -> Result<(Layout, Vec<Placement>), WriteError> {
    let mut order: Vec<usize> = (0..resources.len()).collect();
    order.sort_by_key(|&i| (resources[i].offset(), i));

    let mut layout = Layout { orig_size, ..Layout::default() };
    let mut placements = vec![None; resources.len()];
    let mut cursor = 0u64;
    // End of the most recent replaced payload, in original positions.
    let mut rewritten_until = 0u64;

    for (done, &i) in order.iter().enumerate() {
        progress.set_value(done as u64);
        if progress.is_cancelled() {
            return Err(WriteError::Cancelled);
        }
        let r = &resources[i];

        if r.offset() < cursor {
            // Shares bytes with an earlier payload: only an untouched alias
            // of verbatim bytes can follow it.
            if r.is_replaced() || r.offset() < rewritten_until {
                return Err(WriteError::Overlap { name: r.name().to_owned(), offset: r.offset() });
            }
            let offset = layout.translate(r.offset())
                .ok_or_else(|| WriteError::Overlap { name: r.name().to_owned(), offset: r.offset() })?;
            if r.end() > cursor {
                let tail = r.end() - cursor;
                copy_range(src, cursor, tail, out)?;
                layout.push(cursor, tail, true);
                cursor = r.end();
            }
            placements[i] = Some(Placement {
                offset,
                length:              r.length(),
                decompressed_length: r.decompressed_length(),
            });
            continue;
        }

        if r.offset() > cursor {
            let gap = r.offset() - cursor;
            copy_range(src, cursor, gap, out)?;
            layout.push(cursor, gap, true);
        }

        let placed = match r.replacement() {
            None => {
                copy_range(src, r.offset(), r.length(), out)?;
                let offset = layout.push(r.offset(), r.length(), true);
                Placement { offset, length: r.length(), decompressed_length: r.decompressed_length() }
            }
            Some(replacement) => {
                let raw = replacement.load()?;
                let encoded = match r.exporter() {
                    Some(e) if e.name() != "stored" => e.encode(&raw)?,
                    _                               => raw.clone(),
                };
                out.write_all(&encoded)?;
                let offset = layout.push(r.offset(), encoded.len() as u64, false);
                rewritten_until = r.end();
                log::trace!("{}: {} -> {} bytes at {offset}", r.name(), r.length(), encoded.len());
                Placement { offset, length: encoded.len() as u64, decompressed_length: raw.len() as u64 }
            }
        };
        placements[i] = Some(placed);
        cursor = r.end();
    }

    if cursor < orig_size {
        copy_range(src, cursor, orig_size - cursor, out)?;
        layout.push(cursor, orig_size - cursor, true);
    }
    progress.set_value(resources.len() as u64);

    let placements = placements.into_iter().flatten().collect();
    Ok((layout, placements))
}

fn copy_range<W: Write>(src: &mut File, from: u64, len: u64, out: &mut W) -> io::Result<()> {
    src.seek(SeekFrom::Start(from))?;
    let copied = io::copy(&mut Read::take(&mut *src, len), out)?;
    if copied < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("container shrank: {copied} of {len} bytes at {from}"),
        ));
    }
    Ok(())
}

// ── Pass 2: patch ────────────────────────────────────────────────────────────

fn relative(absolute: u64, ptr: &PointerRecord) -> Result<u64, WriteError> {
    absolute.checked_sub(ptr.base).ok_or(WriteError::FieldOverflow {
        value:    absolute,
        width:    ptr.width,
        position: ptr.position,
    })
}

fn write_field<W: Write + Seek>(out: &mut W, at: u64, ptr: &PointerRecord, value: u64) -> Result<(), WriteError> {
    if value > ptr.width.max_value() {
        return Err(WriteError::FieldOverflow { value, width: ptr.width, position: ptr.position });
    }
    out.seek(SeekFrom::Start(at))?;
    match (ptr.width, ptr.endian) {
        (Width::U8, _)               => out.write_u8(value as u8)?,
        (Width::U16, Endian::Little) => out.write_u16::<LittleEndian>(value as u16)?,
        (Width::U16, Endian::Big)    => out.write_u16::<BigEndian>(value as u16)?,
        (Width::U32, Endian::Little) => out.write_u32::<LittleEndian>(value as u32)?,
        (Width::U32, Endian::Big)    => out.write_u32::<BigEndian>(value as u32)?,
        (Width::U64, Endian::Little) => out.write_u64::<LittleEndian>(value)?,
        (Width::U64, Endian::Big)    => out.write_u64::<BigEndian>(value)?,
    }
    Ok(())
}

fn write_name<W: Write + Seek>(out: &mut W, at: u64, name: &str, capacity: usize) -> Result<(), WriteError> {
    let bytes = name.as_bytes();
    if bytes.len() > capacity {
        return Err(WriteError::NameTooLong { name: name.to_owned(), capacity });
    }
    let mut slot = vec![0u8; capacity];
    slot[..bytes.len()].copy_from_slice(bytes);
    out.seek(SeekFrom::Start(at))?;
    out.write_all(&slot)?;
    Ok(())
}
