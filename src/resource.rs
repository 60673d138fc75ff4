//! Lazy description of one extractable member.
//!
//! A [`Resource`] never holds payload bytes.  It names a byte range inside
//! the container plus the transform needed to turn those bytes into the
//! member's contents.  Descriptors that support rewriting additionally
//! capture, for every numeric field they read, *where* in the original file
//! that field lives ([`PointerRecord`]).  The patcher later overwrites just
//! those bytes.
//!
//! # Endianness
//! Pointer fields record their own endianness; nothing is assumed globally.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::exporter::Exporter;

// ── Field geometry ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Endian {
    Little,
    Big,
}

/// Width of a stored numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Width::U8  => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }

    /// Largest value representable in this width.
    #[inline]
    pub fn max_value(self) -> u64 {
        match self {
            Width::U8  => u8::MAX as u64,
            Width::U16 => u16::MAX as u64,
            Width::U32 => u32::MAX as u64,
            Width::U64 => u64::MAX,
        }
    }
}

/// What a pointer field means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldKind {
    Offset,
    Length,
    DecompressedLength,
}

/// Location of one numeric field in the *original* container.
///
/// Captured at the moment the descriptor reads the field and never changed
/// afterwards, so it always describes the original byte layout even after
/// the owning resource is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointerRecord {
    pub kind:     FieldKind,
    pub position: u64,
    pub width:    Width,
    pub endian:   Endian,
    /// Origin subtracted from offsets before storing.  Must lie before every
    /// payload, it is not translated on rewrite.
    pub base:     u64,
}

impl PointerRecord {
    pub fn new(kind: FieldKind, position: u64, width: Width, endian: Endian) -> Self {
        Self { kind, position, width, endian, base: 0 }
    }

    pub fn relative_to(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// Byte range covered by the field.
    pub fn range(&self) -> std::ops::Range<u64> {
        self.position..self.position + self.width.bytes() as u64
    }
}

/// Archive-level pointer to a region that is not a resource, e.g. a
/// directory stored after the payloads.  On rewrite the field receives the
/// translated position of `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Anchor {
    pub target:  u64,
    pub pointer: PointerRecord,
}

/// Fixed-capacity, NUL-padded name field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NameSlot {
    pub position: u64,
    pub capacity: usize,
}

// ── Replacement ──────────────────────────────────────────────────────────────

/// New contents for a replaced resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl Replacement {
    pub fn load(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Replacement::Bytes(b) => Ok(b.clone()),
            Replacement::File(p)  => std::fs::read(p),
        }
    }
}

// ── Resource ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Resource {
    path:                PathBuf,
    name:                String,
    offset:              u64,
    length:              u64,
    decompressed_length: Option<u64>,
    exporter:            Option<Arc<dyn Exporter>>,
    properties:          BTreeMap<String, String>,
    pointers:            Vec<PointerRecord>,
    name_slot:           Option<NameSlot>,
    replacement:         Option<Replacement>,
    renamed:             bool,
}

impl Resource {
    pub fn new<P: AsRef<Path>>(path: P, name: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            path:                path.as_ref().to_owned(),
            name:                name.into(),
            offset,
            length,
            decompressed_length: None,
            exporter:            None,
            properties:          BTreeMap::new(),
            pointers:            Vec::new(),
            name_slot:           None,
            replacement:         None,
            renamed:             false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_decompressed_length(mut self, len: u64) -> Self {
        self.decompressed_length = Some(len);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }

    pub fn with_name_slot(mut self, position: u64, capacity: usize) -> Self {
        self.name_slot = Some(NameSlot { position, capacity });
        self
    }

    pub fn with_pointer(mut self, pointer: PointerRecord) -> Self {
        self.pointers.push(pointer);
        self
    }

    /// Record where a numeric field of this resource is stored.  Call this
    /// at the moment the field is read from the container.
    pub fn record_pointer(&mut self, kind: FieldKind, position: u64, width: Width, endian: Endian) {
        self.pointers.push(PointerRecord::new(kind, position, width, endian));
    }

    pub fn record_relative_pointer(
        &mut self,
        kind:     FieldKind,
        position: u64,
        width:    Width,
        endian:   Endian,
        base:     u64,
    ) {
        self.pointers.push(PointerRecord::new(kind, position, width, endian).relative_to(base));
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }
    pub fn name(&self) -> &str { &self.name }
    pub fn offset(&self) -> u64 { self.offset }
    pub fn length(&self) -> u64 { self.length }

    /// Falls back to the stored length when the directory records none.
    pub fn decompressed_length(&self) -> u64 {
        self.decompressed_length.unwrap_or(self.length)
    }

    pub fn has_explicit_decompressed_length(&self) -> bool {
        self.decompressed_length.is_some()
    }

    pub fn exporter(&self) -> Option<&Arc<dyn Exporter>> { self.exporter.as_ref() }
    pub fn properties(&self) -> &BTreeMap<String, String> { &self.properties }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn pointers(&self) -> &[PointerRecord] { &self.pointers }
    pub fn name_slot(&self) -> Option<NameSlot> { self.name_slot }
    pub fn replacement(&self) -> Option<&Replacement> { self.replacement.as_ref() }

    /// True once the descriptor captured at least one pointer field.
    pub fn is_replaceable(&self) -> bool { !self.pointers.is_empty() }
    pub fn is_renameable(&self) -> bool { self.name_slot.is_some() }
    pub fn is_replaced(&self) -> bool { self.replacement.is_some() }
    pub fn is_renamed(&self) -> bool { self.renamed }

    /// Name of the transform, `"stored"` when there is none.
    pub fn exporter_name(&self) -> &str {
        self.exporter.as_ref().map(|e| e.name()).unwrap_or("stored")
    }

    /// End of the payload region in the container.
    pub fn end(&self) -> u64 { self.offset.saturating_add(self.length) }

    // ── Mutation (sizing and replace paths only) ─────────────────────────────

    pub(crate) fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    pub(crate) fn set_replacement(&mut self, replacement: Replacement) {
        self.replacement = Some(replacement);
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
        self.renamed = true;
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("decompressed_length", &self.decompressed_length())
            .field("exporter", &self.exporter_name())
            .field("pointers", &self.pointers.len())
            .field("replaced", &self.is_replaced())
            .finish()
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────────

/// Serializable summary of a resource, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub name:                String,
    pub offset:              u64,
    pub length:              u64,
    pub decompressed_length: u64,
    pub exporter:            String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties:          BTreeMap<String, String>,
}

impl From<&Resource> for ManifestEntry {
    fn from(r: &Resource) -> Self {
        ManifestEntry {
            name:                r.name.clone(),
            offset:              r.offset,
            length:              r.length,
            decompressed_length: r.decompressed_length(),
            exporter:            r.exporter_name().to_owned(),
            properties:          r.properties.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompressed_length_defaults_to_length() {
        let r = Resource::new("a.pak", "x", 10, 20);
        assert_eq!(r.decompressed_length(), 20);
        assert!(!r.has_explicit_decompressed_length());
        let r = r.with_decompressed_length(64);
        assert_eq!(r.decompressed_length(), 64);
    }

    #[test]
    fn pointers_make_resource_replaceable() {
        let mut r = Resource::new("a.pak", "x", 10, 20);
        assert!(!r.is_replaceable());
        r.record_pointer(FieldKind::Offset, 4, Width::U32, Endian::Little);
        r.record_pointer(FieldKind::Length, 8, Width::U32, Endian::Little);
        assert!(r.is_replaceable());
        assert_eq!(r.pointers()[1].range(), 8..12);
        assert_eq!(r.pointers()[0].base, 0);
    }

    #[test]
    fn manifest_entry_carries_properties() {
        let r = Resource::new("a.pak", "pic.tga", 0, 4)
            .with_property("width", 32)
            .with_property("height", 16);
        let m = ManifestEntry::from(&r);
        assert_eq!(m.exporter, "stored");
        assert_eq!(m.properties.get("width").map(String::as_str), Some("32"));
        assert_eq!(r.property("height"), Some("16"));
    }

    #[test]
    fn width_limits() {
        assert_eq!(Width::U16.bytes(), 2);
        assert_eq!(Width::U8.max_value(), 255);
        assert_eq!(Width::U64.max_value(), u64::MAX);
    }
}
