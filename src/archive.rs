//! High-level [`Archive`] session: the primary embedding surface.
//!
//! ```no_run
//! use arcprobe::archive::{Archive, EngineOptions};
//! use arcprobe::formats::builtin_registry;
//! use arcprobe::resource::Replacement;
//!
//! let registry = builtin_registry();
//! let mut ar = Archive::open("pak0.pak", &registry, &EngineOptions::default())?;
//! println!("{} via {}", ar.path().display(), ar.descriptor().info().name);
//!
//! let i = ar.find("gfx/palette.lmp").expect("member");
//! let palette = ar.read_resource(i)?;
//!
//! ar.replace(i, Replacement::Bytes(palette.iter().map(|b| 255 - b).collect()))?;
//! ar.write_to("pak0-inverted.pak")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! An `Archive` is the explicit session context: it owns the resource list
//! and the archive-level anchors, and is handed to the descriptor's `write`.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::descriptor::{self, DescriptorRef, ParseError, Probe, ReadContext};
use crate::exporter::{self, ExportError, ExportHandle, ExportReader, Exporter, StreamHandle, Stored};
use crate::guard::Limits;
use crate::io_stream::{DEFAULT_PROBE_BUFFER, DEFAULT_READ_BUFFER};
use crate::patch::{WriteError, WriteReport};
use crate::progress::{NoProgress, Progress};
use crate::registry::Registry;
use crate::resource::{Anchor, ManifestEntry, Replacement, Resource};

/// Upper bound on the buffer reserved up front by [`Archive::read_resource`].
/// Declared sizes come from the container and are not trusted beyond this.
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

// ── EngineOptions ────────────────────────────────────────────────────────────

/// Configuration for [`Archive::open`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Read-ahead while scoring.
    pub probe_buffer: usize,
    /// Read-ahead while walking a directory.
    pub read_buffer:  usize,
    /// Lowest score that counts as a match.  The default equals the
    /// extension weight, so a bare extension match is enough.
    pub min_score:    u32,
    pub limits:       Limits,
    /// When the best candidate fails to read, try the next viable one.
    pub fallback:     bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            probe_buffer: DEFAULT_PROBE_BUFFER,
            read_buffer:  DEFAULT_READ_BUFFER,
            min_score:    descriptor::weight::EXTENSION,
            limits:       Limits::default(),
            fallback:     true,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("{} is not a recognized container", path.display())]
    Unrecognized { path: PathBuf },
    #[error("{descriptor} could not read {}: {source}", path.display())]
    Failed {
        descriptor: &'static str,
        path:       PathBuf,
        #[source]
        source:     ParseError,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No resource at index {0}")]
    NoSuchResource(usize),
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Extraction cancelled")]
    Cancelled,
}

// ── Archive ──────────────────────────────────────────────────────────────────

pub struct Archive {
    path:       PathBuf,
    size:       u64,
    descriptor: DescriptorRef,
    resources:  Vec<Resource>,
    anchors:    Vec<Anchor>,
}

impl Archive {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Identify `path` against `registry` and read it with the best match.
    pub fn open<P: AsRef<Path>>(path: P, registry: &Registry, opts: &EngineOptions) -> Result<Self, OpenError> {
        Self::open_with_progress(path, registry, opts, &mut NoProgress)
    }

    pub fn open_with_progress<P: AsRef<Path>>(
        path:     P,
        registry: &Registry,
        opts:     &EngineOptions,
        progress: &mut dyn Progress,
    ) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let mut probe = Probe::open(path, opts.probe_buffer, opts.limits)?;
        let mut candidates = registry.viable(&mut probe, opts.min_score);
        if !opts.fallback {
            candidates.truncate(1);
        }

        let mut last = None;
        for candidate in candidates {
            log::debug!("{}: trying {} (score {})", path.display(), candidate.id(), candidate.score);
            match Self::open_with(path, candidate.descriptor, opts, progress) {
                Ok(archive) => return Ok(archive),
                Err(OpenError::Failed { source: ParseError::Cancelled, descriptor, path }) => {
                    return Err(OpenError::Failed { descriptor, path, source: ParseError::Cancelled });
                }
                Err(e @ OpenError::Failed { .. }) => {
                    log::warn!("{e}; trying the next candidate");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| OpenError::Unrecognized { path: path.to_owned() }))
    }

    /// Read `path` with a specific descriptor, skipping identification.
    pub fn open_with<P: AsRef<Path>>(
        path:       P,
        descriptor: DescriptorRef,
        opts:       &EngineOptions,
        progress:   &mut dyn Progress,
    ) -> Result<Self, OpenError> {
        let path = path.as_ref().to_owned();
        let mut ctx = ReadContext::open(&path, opts.read_buffer, opts.limits, progress)?;
        let size = ctx.size();
        let resources = descriptor::read_checked(descriptor.as_ref(), &mut ctx)
            .map_err(|source| OpenError::Failed {
                descriptor: descriptor.info().id,
                path:       path.clone(),
                source,
            })?;
        let anchors = ctx.take_anchors();
        Ok(Self { path, size, descriptor, resources, anchors })
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }
    pub fn size(&self) -> u64 { self.size }
    pub fn descriptor(&self) -> &DescriptorRef { &self.descriptor }
    pub fn resources(&self) -> &[Resource] { &self.resources }
    pub fn anchors(&self) -> &[Anchor] { &self.anchors }
    pub fn len(&self) -> usize { self.resources.len() }
    pub fn is_empty(&self) -> bool { self.resources.is_empty() }

    pub fn resource(&self, index: usize) -> Result<&Resource, ExtractError> {
        self.resources.get(index).ok_or(ExtractError::NoSuchResource(index))
    }

    /// Index of the first resource called `name`.  Separators and ASCII
    /// case are not significant.
    pub fn find(&self, name: &str) -> Option<usize> {
        let want = normalize(name);
        self.resources.iter().position(|r| normalize(r.name()) == want)
    }

    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.resources.iter().map(ManifestEntry::from).collect()
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// Fresh export handle over one resource.  Replaced resources yield
    /// their replacement.
    pub fn open_resource(&self, index: usize) -> Result<Box<dyn ExportHandle>, ExtractError> {
        let r = self.resource(index)?;
        if let Some(replacement) = r.replacement() {
            let data = replacement.load()?;
            let len = data.len() as u64;
            return Ok(Box::new(StreamHandle::new(Box::new(Cursor::new(data)), len)));
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(r.offset()))?;
        let source: Box<dyn Read> = Box::new(BufReader::new(file));
        let handle = match r.exporter() {
            Some(e) => e.open(source, r.length(), r.decompressed_length())?,
            None    => Stored.open(source, r.length(), r.decompressed_length())?,
        };
        Ok(handle)
    }

    /// Stream one resource into `sink`.
    pub fn extract_to<W: Write + ?Sized>(&self, index: usize, sink: &mut W) -> Result<u64, ExtractError> {
        Ok(exporter::copy_to(self.open_resource(index)?, sink)?)
    }

    pub fn read_resource(&self, index: usize) -> Result<Vec<u8>, ExtractError> {
        let declared = self.resource(index)?.decompressed_length();
        let mut out = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
        self.extract_to(index, &mut out)?;
        Ok(out)
    }

    /// Extract one resource into a new file at `target`.  A failed export
    /// removes the partial file.
    pub fn extract_to_path<P: AsRef<Path>>(&self, index: usize, target: P) -> Result<u64, ExtractError> {
        self.resource(index)?;
        let target = target.as_ref();
        let mut out = io::BufWriter::new(File::create(target)?);
        let written = self.extract_to(index, &mut out).and_then(|n| {
            out.flush()?;
            Ok(n)
        });
        if written.is_err() {
            drop(out);
            if let Err(e) = std::fs::remove_file(target) {
                log::warn!("could not remove partial {}: {e}", target.display());
            }
        }
        written
    }

    /// CRC-32 of the exported contents.
    pub fn checksum(&self, index: usize) -> Result<u32, ExtractError> {
        let mut reader = ExportReader::new(self.open_resource(index)?);
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Extract every resource under `dest`, creating directories as
    /// needed.  Member names never escape `dest`.
    pub fn extract_all<P: AsRef<Path>>(&self, dest: P, progress: &mut dyn Progress) -> Result<usize, ExtractError> {
        let dest = dest.as_ref();
        std::fs::create_dir_all(dest)?;
        progress.set_maximum(self.resources.len() as u64);
        for (i, r) in self.resources.iter().enumerate() {
            progress.set_value(i as u64);
            if progress.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let target = dest.join(safe_relative_path(r.name(), i));
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.extract_to_path(i, &target)?;
        }
        progress.set_value(self.resources.len() as u64);
        Ok(self.resources.len())
    }

    // ── Modify ───────────────────────────────────────────────────────────────

    /// Stage new contents for a resource.  Nothing touches disk until
    /// [`Archive::write_to`].
    pub fn replace(&mut self, index: usize, replacement: Replacement) -> Result<(), WriteError> {
        let info = self.descriptor.info();
        if !info.capabilities.replace {
            return Err(WriteError::Unsupported { descriptor: info.id, operation: "replace" });
        }
        let r = self.resources.get_mut(index).ok_or(WriteError::NoSuchResource(index))?;
        if !r.is_replaceable() {
            return Err(WriteError::NotReplaceable { name: r.name().to_owned() });
        }
        r.set_replacement(replacement);
        Ok(())
    }

    pub fn rename(&mut self, index: usize, name: &str) -> Result<(), WriteError> {
        let info = self.descriptor.info();
        if !info.capabilities.rename {
            return Err(WriteError::Unsupported { descriptor: info.id, operation: "rename" });
        }
        let r = self.resources.get_mut(index).ok_or(WriteError::NoSuchResource(index))?;
        let slot = match r.name_slot() {
            Some(slot) => slot,
            None => return Err(WriteError::Unsupported { descriptor: info.id, operation: "rename" }),
        };
        if name.len() > slot.capacity {
            return Err(WriteError::NameTooLong { name: name.to_owned(), capacity: slot.capacity });
        }
        r.set_name(name.to_owned());
        Ok(())
    }

    /// Serialize the current state, replacements and renames included.
    pub fn write_to<P: AsRef<Path>>(&self, dest: P) -> Result<WriteReport, WriteError> {
        self.write_with_progress(dest, &mut NoProgress)
    }

    pub fn write_with_progress<P: AsRef<Path>>(&self, dest: P, progress: &mut dyn Progress) -> Result<WriteReport, WriteError> {
        self.descriptor.write(self, dest.as_ref(), progress)
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("descriptor", &self.descriptor.info().id)
            .field("resources", &self.resources.len())
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_ascii_lowercase()
}

/// Relative path for a member name with every component that could leave
/// the destination removed.
fn safe_relative_path(name: &str, index: usize) -> PathBuf {
    let unified = name.replace('\\', "/");
    let path: PathBuf = Path::new(&unified)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _                       => None,
        })
        .filter(|part| !part.to_string_lossy().contains(':'))
        .collect();
    if path.as_os_str().is_empty() {
        PathBuf::from(format!("{index:05}.bin"))
    } else {
        path
    }
}
