//! CRI `AFS` archives (Dreamcast, PS2 and GameCube era titles).
//!
//! ```text
//! header      "AFS\0"  count:u32
//! table       count x (offset:u32  size:u32)
//! name ptr    name_table:u32  name_table_size:u32
//! name entry  name:[u8; 32]  year month day hour minute second:u16  size:u32   (48 bytes)
//! ```
//!
//! The name-table pointer normally follows the table directly.  Some
//! writers instead store it in the 8 bytes just before the first payload;
//! both places are tried.  Archives without a name table get synthesized
//! `00000.bin`-style names and cannot be renamed.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::descriptor::{
    weight, Capabilities, Descriptor, DescriptorInfo, ParseError, Probe, ProbeError, Rating, ReadContext,
};
use crate::guard;
use crate::resource::{Endian, FieldKind, PointerRecord, Resource, Width};

pub const MAGIC:           &[u8; 4] = b"AFS\0";
pub const NAME_SIZE:       usize    = 32;
pub const NAME_ENTRY_SIZE: u64      = 48;

static INFO: DescriptorInfo = DescriptorInfo {
    id:           "afs",
    name:         "CRI AFS",
    games:        &["Shenmue", "Jet Set Radio", "Sonic Adventure 2", "Soulcalibur II"],
    extensions:   &["afs"],
    capabilities: Capabilities { read: true, write: false, replace: true, rename: true },
    enabled:      true,
};

pub struct Afs;

impl Descriptor for Afs {
    fn info(&self) -> &DescriptorInfo { &INFO }

    fn score(&self, probe: &mut Probe, rating: &mut Rating) -> Result<(), ProbeError> {
        rating.extension(probe, INFO.extensions);
        let magic = probe.reader().read_bytes(4)?;
        rating.require("magic", magic == MAGIC, weight::MAGIC)?;

        let count = probe.reader().read_u32::<LittleEndian>()? as u64;
        probe.check_num_files(count)?;
        rating.add("file count", weight::FIELD);

        let offset = probe.reader().read_u32::<LittleEndian>()? as u64;
        let size = probe.reader().read_u32::<LittleEndian>()? as u64;
        guard::check_region(offset, size, probe.size())?;
        rating.check("first entry after table", offset >= 8 + count * 8, weight::FIELD);
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Vec<Resource>, ParseError> {
        let magic = ctx.reader().read_bytes(4)?;
        if magic != MAGIC {
            return Err(ParseError::Malformed("missing AFS magic".into()));
        }
        let count = ctx.reader().read_u32::<LittleEndian>()? as u64;
        ctx.check_num_files(count)?;
        ctx.set_maximum(count);

        let mut table = Vec::with_capacity(count as usize);
        for i in 0..count {
            ctx.checkpoint(i)?;
            let (offset, offset_ptr) = ctx.reader().read_pointer(FieldKind::Offset, Width::U32, Endian::Little)?;
            let (length, length_ptr) = ctx.reader().read_pointer(FieldKind::Length, Width::U32, Endian::Little)?;
            ctx.check_region(offset, length)?;
            table.push((offset, length, offset_ptr, length_ptr));
        }

        let table_end = ctx.reader().position();
        let first_payload = table.iter().map(|e| e.0).filter(|&o| o > 0).min();
        let located = match locate_name_table(ctx, table_end, count)? {
            Some(found) => Some(found),
            None => match first_payload {
                Some(first) if first >= table_end + 8 => locate_name_table(ctx, first - 8, count)?,
                _ => None,
            },
        };
        let names = match located {
            Some((at, pointer)) => {
                ctx.add_anchor(at, pointer);
                read_names(ctx, at, count)?
            }
            None => {
                log::debug!("{}: no name table, using synthesized names", ctx.path().display());
                Vec::new()
            }
        };

        let resources = table
            .into_iter()
            .enumerate()
            .map(|(i, (offset, length, offset_ptr, length_ptr))| {
                let r = ctx.resource(format!("{i:05}.bin"), offset, length)
                    .with_pointer(offset_ptr)
                    .with_pointer(length_ptr);
                match names.get(i) {
                    Some(entry) => entry.apply(r),
                    None        => r,
                }
            })
            .collect();
        Ok(resources)
    }
}

/// One row of the name table.
struct NameEntry {
    name:      String,
    slot:      u64,
    /// Copy of the payload size, kept in step on rewrite.
    size_ptr:  PointerRecord,
    timestamp: String,
}

impl NameEntry {
    fn apply(&self, r: Resource) -> Resource {
        let r = r
            .with_name_slot(self.slot, NAME_SIZE)
            .with_pointer(self.size_ptr)
            .with_property("timestamp", &self.timestamp);
        if self.name.is_empty() {
            r
        } else {
            r.with_name(&self.name)
        }
    }
}

/// Read a `(name_table, size)` pair at `at` and accept it if it describes
/// a plausible table for `count` entries.
fn locate_name_table(
    ctx:   &mut ReadContext<'_>,
    at:    u64,
    count: u64,
) -> Result<Option<(u64, PointerRecord)>, ParseError> {
    if at + 8 > ctx.size() {
        return Ok(None);
    }
    ctx.reader().seek_to(at)?;
    let (table, pointer) = ctx.reader().read_pointer(FieldKind::Offset, Width::U32, Endian::Little)?;
    let size = ctx.reader().read_u32::<LittleEndian>()? as u64;
    let plausible = table != 0
        && size >= count * NAME_ENTRY_SIZE
        && guard::check_region(table, count * NAME_ENTRY_SIZE, ctx.size()).is_ok();
    Ok(plausible.then_some((table, pointer)))
}

fn read_names(ctx: &mut ReadContext<'_>, table: u64, count: u64) -> Result<Vec<NameEntry>, ParseError> {
    ctx.reader().seek_to(table)?;
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (name, slot) = ctx.read_fixed_name(NAME_SIZE)?;
        let mut stamp = [0u16; 6];
        for part in stamp.iter_mut() {
            *part = ctx.reader().read_u16::<LittleEndian>()?;
        }
        let (_, size_ptr) = ctx.reader().read_pointer(FieldKind::Length, Width::U32, Endian::Little)?;
        let [year, month, day, hour, minute, second] = stamp;
        names.push(NameEntry {
            name,
            slot,
            size_ptr,
            timestamp: format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
        });
    }
    Ok(names)
}
