//! Format descriptors and the confidence-scoring contract.
//!
//! A descriptor is a stateless `'static` pair of behaviours behind one trait:
//! a cheap [`Descriptor::score`] probe and a full [`Descriptor::read`].
//! Scoring is speculative by nature; most descriptors are pointed at files
//! that are not theirs.  So `score` adds points to a [`Rating`] predicate by
//! predicate and simply returns `Err` at the first predicate that cannot
//! hold.  [`rate`] keeps whatever was accumulated up to that point.
//!
//! ```ignore
//! fn score(&self, probe: &mut Probe, rating: &mut Rating) -> Result<(), ProbeError> {
//!     rating.extension(probe, &["pak"]);
//!     let magic = probe.reader().read_bytes(4)?;
//!     rating.require("magic", magic == b"PACK", weight::MAGIC)?;
//!     let dir = probe.reader().read_u32::<LittleEndian>()? as u64;
//!     probe.check_offset(dir)?;
//!     rating.add("directory offset", weight::FIELD);
//!     Ok(())
//! }
//! ```

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::archive::Archive;
use crate::guard::{self, GuardError, Limits};
use crate::io_stream::{ArchiveReader, Cipher, Source, SourceReader};
use crate::patch::{self, WriteError, WriteReport};
use crate::progress::Progress;
use crate::resource::{Anchor, Endian, FieldKind, PointerRecord, Resource, Width};

/// Standard predicate weights.  Extension is the single most valuable hint
/// after a magic number, so structurally identical formats still lean
/// towards the expected descriptor.
pub mod weight {
    pub const EXTENSION: u32 = 25;
    pub const MAGIC:     u32 = 50;
    pub const FIELD:     u32 = 5;
}

// ── Identity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub read:    bool,
    pub write:   bool,
    pub replace: bool,
    pub rename:  bool,
}

impl Capabilities {
    pub const READ_ONLY: Self = Self { read: true, write: false, replace: false, rename: false };

    /// Whether the write-back patcher may be used at all.
    pub fn can_rewrite(&self) -> bool {
        self.write || self.replace
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorInfo {
    /// Stable identifier, also used on the command line.
    pub id:           &'static str,
    pub name:         &'static str,
    pub games:        &'static [&'static str],
    pub extensions:   &'static [&'static str],
    pub capabilities: Capabilities,
    pub enabled:      bool,
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Why a scoring chain stopped.  Never escapes [`rate`].
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Structural mismatch: {0}")]
    Guard(#[from] GuardError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Predicate failed: {0}")]
    Mismatch(&'static str),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Structural mismatch: {0}")]
    Guard(#[from] GuardError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed directory: {0}")]
    Malformed(String),
    #[error("Resource '{name}' ({offset}+{length}) lies outside the {size}-byte container")]
    OutOfBounds { name: String, offset: u64, length: u64, size: u64 },
    #[error("Read cancelled")]
    Cancelled,
}

// ── Rating ───────────────────────────────────────────────────────────────────

/// Accumulated score of one descriptor against one probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rating {
    total:     u32,
    breakdown: Vec<(&'static str, u32)>,
}

impl Rating {
    pub fn total(&self) -> u32 { self.total }

    /// `(predicate, points)` in the order they were awarded.
    pub fn breakdown(&self) -> &[(&'static str, u32)] { &self.breakdown }

    pub fn add(&mut self, reason: &'static str, points: u32) {
        self.total = self.total.saturating_add(points);
        self.breakdown.push((reason, points));
    }

    /// Award `points` if `cond` holds; the chain continues either way.
    pub fn check(&mut self, reason: &'static str, cond: bool, points: u32) -> bool {
        if cond {
            self.add(reason, points);
        }
        cond
    }

    /// Award `points` if `cond` holds, otherwise end the chain.
    pub fn require(&mut self, reason: &'static str, cond: bool, points: u32) -> Result<(), ProbeError> {
        if !cond {
            return Err(ProbeError::Mismatch(reason));
        }
        self.add(reason, points);
        Ok(())
    }

    pub fn extension(&mut self, probe: &Probe, extensions: &[&str]) -> bool {
        self.check("extension", probe.has_extension(extensions), weight::EXTENSION)
    }
}

// ── Probe ────────────────────────────────────────────────────────────────────

/// What a descriptor may look at while scoring: the name, the size and a
/// small-buffered reader over the head of the file.
pub struct Probe {
    path:      PathBuf,
    extension: String,
    reader:    SourceReader,
    limits:    Limits,
}

impl Probe {
    pub fn open<P: AsRef<Path>>(path: P, buffer: usize, limits: Limits) -> io::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_source(path, Box::new(file), buffer, limits)
    }

    /// Probe an in-memory buffer; `name` supplies the extension.
    pub fn from_bytes<P: AsRef<Path>>(name: P, bytes: Vec<u8>) -> io::Result<Self> {
        Self::from_source(name, Box::new(Cursor::new(bytes)), crate::io_stream::DEFAULT_PROBE_BUFFER, Limits::default())
    }

    pub fn from_source<P: AsRef<Path>>(
        path:   P,
        source: Box<dyn Source>,
        buffer: usize,
        limits: Limits,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let extension = extension_of(&path);
        Ok(Self { path, extension, reader: ArchiveReader::new(source, buffer)?, limits })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn size(&self) -> u64 { self.reader.length() }
    pub fn limits(&self) -> &Limits { &self.limits }
    pub fn reader(&mut self) -> &mut SourceReader { &mut self.reader }

    /// Lower-cased extension without the dot.
    pub fn extension(&self) -> &str { &self.extension }

    pub fn has_extension(&self, extensions: &[&str]) -> bool {
        extensions.iter().any(|e| e.eq_ignore_ascii_case(&self.extension))
    }

    pub fn check_offset(&self, offset: u64) -> Result<u64, GuardError> {
        guard::check_offset(offset, self.size())
    }

    pub fn check_length(&self, length: u64) -> Result<u64, GuardError> {
        guard::check_length(length, self.size())
    }

    pub fn check_region(&self, offset: u64, length: u64) -> Result<(), GuardError> {
        guard::check_region(offset, length, self.size())
    }

    pub fn check_num_files(&self, count: u64) -> Result<u64, GuardError> {
        self.limits.check_num_files(count)
    }

    /// Every descriptor starts from offset 0 with no cipher installed.
    fn reset(&mut self) {
        self.reader.rewind_to_start();
        self.reader.set_cipher(Cipher::None);
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

// ── ReadContext ──────────────────────────────────────────────────────────────

/// Per-read state handed to [`Descriptor::read`].  Everything a read needs
/// lives here rather than in the descriptor, which stays stateless.
pub struct ReadContext<'p> {
    path:     PathBuf,
    reader:   SourceReader,
    limits:   Limits,
    progress: &'p mut dyn Progress,
    anchors:  Vec<Anchor>,
}

impl<'p> ReadContext<'p> {
    pub fn open<P: AsRef<Path>>(
        path:     P,
        buffer:   usize,
        limits:   Limits,
        progress: &'p mut dyn Progress,
    ) -> io::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_source(path, Box::new(file), buffer, limits, progress)
    }

    pub fn from_source<P: AsRef<Path>>(
        path:     P,
        source:   Box<dyn Source>,
        buffer:   usize,
        limits:   Limits,
        progress: &'p mut dyn Progress,
    ) -> io::Result<Self> {
        Ok(Self {
            path:    path.as_ref().to_owned(),
            reader:  ArchiveReader::new(source, buffer)?,
            limits,
            progress,
            anchors: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn size(&self) -> u64 { self.reader.length() }
    pub fn limits(&self) -> &Limits { &self.limits }
    pub fn reader(&mut self) -> &mut SourceReader { &mut self.reader }
    pub fn anchors(&self) -> &[Anchor] { &self.anchors }

    pub(crate) fn take_anchors(&mut self) -> Vec<Anchor> {
        std::mem::take(&mut self.anchors)
    }

    /// New resource bound to this container.
    pub fn resource(&self, name: impl Into<String>, offset: u64, length: u64) -> Resource {
        Resource::new(&self.path, name, offset, length)
    }

    /// Record an archive-level pointer to the region starting at `target`.
    pub fn add_anchor(&mut self, target: u64, pointer: PointerRecord) {
        self.anchors.push(Anchor { target, pointer });
    }

    // ── Progress ─────────────────────────────────────────────────────────────

    pub fn set_maximum(&mut self, total: u64) {
        self.progress.set_maximum(total);
    }

    /// Advance progress and honour cancellation.
    pub fn checkpoint(&mut self, current: u64) -> Result<(), ParseError> {
        self.progress.set_value(current);
        if self.progress.is_cancelled() {
            return Err(ParseError::Cancelled);
        }
        Ok(())
    }

    // ── Guard rails bound to this container ──────────────────────────────────

    pub fn check_offset(&self, offset: u64) -> Result<u64, GuardError> {
        guard::check_offset(offset, self.size())
    }

    pub fn check_length(&self, length: u64) -> Result<u64, GuardError> {
        guard::check_length(length, self.size())
    }

    pub fn check_region(&self, offset: u64, length: u64) -> Result<(), GuardError> {
        guard::check_region(offset, length, self.size())
    }

    pub fn check_num_files(&self, count: u64) -> Result<u64, GuardError> {
        self.limits.check_num_files(count)
    }

    pub fn check_filename_length(&self, length: usize) -> Result<usize, GuardError> {
        self.limits.check_filename_length(length)
    }

    // ── Read-and-validate combinators ────────────────────────────────────────

    /// Read an offset field, validate it and capture its location.
    pub fn read_offset(&mut self, width: Width, endian: Endian) -> Result<(u64, PointerRecord), ParseError> {
        let (value, ptr) = self.reader.read_pointer(FieldKind::Offset, width, endian)?;
        Ok((self.check_offset(value)?, ptr))
    }

    /// Read a length field, validate it and capture its location.
    pub fn read_length(&mut self, width: Width, endian: Endian) -> Result<(u64, PointerRecord), ParseError> {
        let (value, ptr) = self.reader.read_pointer(FieldKind::Length, width, endian)?;
        Ok((self.check_length(value)?, ptr))
    }

    /// Read a NUL-terminated name bounded by the filename limit.  An empty
    /// name is returned as-is; several formats use it as a terminator.
    pub fn read_null_name(&mut self) -> Result<String, ParseError> {
        let max = self.limits.max_filename_length;
        let name = self.reader.read_null_string_bounded(max)?;
        if !name.is_empty() {
            self.check_filename_length(name.len())?;
        }
        Ok(name)
    }

    /// Read a fixed-width, NUL-padded name.  Returns the name and the slot
    /// position for renaming.
    pub fn read_fixed_name(&mut self, capacity: usize) -> Result<(String, u64), ParseError> {
        let position = self.reader.position();
        let name = self.reader.read_string(capacity)?;
        if !name.is_empty() {
            self.check_filename_length(name.len())?;
        }
        Ok((name, position))
    }

    fn reset(&mut self) {
        self.reader.rewind_to_start();
        self.reader.set_cipher(Cipher::None);
        self.anchors.clear();
    }
}

// ── Descriptor trait ─────────────────────────────────────────────────────────

pub trait Descriptor: Send + Sync {
    fn info(&self) -> &DescriptorInfo;

    /// Add points to `rating` predicate by predicate; return `Err` as soon
    /// as the file can no longer be this format.
    fn score(&self, probe: &mut Probe, rating: &mut Rating) -> Result<(), ProbeError>;

    /// Walk the directory and describe every member.
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Vec<Resource>, ParseError>;

    /// Serialize `archive` (with any replacements) to `dest`.
    fn write(
        &self,
        archive:  &Archive,
        dest:     &Path,
        progress: &mut dyn Progress,
    ) -> Result<WriteReport, WriteError> {
        if !self.info().capabilities.can_rewrite() {
            return Err(WriteError::Unsupported { descriptor: self.info().id, operation: "write" });
        }
        patch::rewrite(archive, dest, progress)
    }

    /// Cosmetic hint for a viewer.
    fn preview_hint(&self, resource: &Resource) -> Option<&'static str> {
        preview_hint_for(resource.name())
    }
}

/// Viewer hint derived from a member's extension.
pub fn preview_hint_for(name: &str) -> Option<&'static str> {
    let ext = extension_of(Path::new(name));
    match ext.as_str() {
        "bmp" | "png" | "tga" | "pcx" | "jpg" | "jpeg" | "dds" | "lmp" | "shp" | "cps" => Some("image"),
        "wav" | "ogg" | "mp3" | "voc" | "adl" | "aud" | "mid"                        => Some("audio"),
        "txt" | "cfg" | "ini" | "xml" | "json" | "rc" | "lst"                         => Some("text"),
        "mdl" | "md2" | "md3" | "obj"                                                 => Some("model"),
        _                                                                             => None,
    }
}

// ── Core wrappers ────────────────────────────────────────────────────────────

/// Score `descriptor` against `probe`.  Never fails: a broken predicate
/// chain keeps its partial sum.
pub fn rate(descriptor: &dyn Descriptor, probe: &mut Probe) -> Rating {
    probe.reset();
    let mut rating = Rating::default();
    if let Err(e) = descriptor.score(probe, &mut rating) {
        log::trace!(
            "{}: scoring stopped at {} points ({e})",
            descriptor.info().id,
            rating.total()
        );
    }
    rating
}

/// Run a full read and enforce the resource bounds invariant.  Failures
/// are logged and returned; nothing is propagated as a panic.
pub fn read_checked(
    descriptor: &dyn Descriptor,
    ctx:        &mut ReadContext<'_>,
) -> Result<Vec<Resource>, ParseError> {
    ctx.reset();
    let id = descriptor.info().id;
    let size = ctx.size();

    let resources = descriptor.read(ctx).map_err(|e| {
        log::warn!("{id}: failed to read {}: {e}", ctx.path().display());
        e
    })?;

    for r in &resources {
        if guard::check_region(r.offset(), r.length(), size).is_err() {
            let e = ParseError::OutOfBounds {
                name:   r.name().to_owned(),
                offset: r.offset(),
                length: r.length(),
                size,
            };
            log::warn!("{id}: {e}");
            return Err(e);
        }
    }

    log::debug!("{id}: {} resource(s) in {}", resources.len(), ctx.path().display());
    Ok(resources)
}

/// Shared handle type used by the registry and archives.
pub type DescriptorRef = Arc<dyn Descriptor>;
