//! Doom-engine `IWAD` / `PWAD` files.
//!
//! ```text
//! header  "IWAD"|"PWAD"  numlumps:u32  infotableofs:u32
//! lump    filepos:u32  size:u32  name:[u8; 8]          (16 bytes, at infotableofs)
//! ```
//!
//! Marker lumps (`F_START`, `E1M1`, ...) have size 0 and are kept as
//! zero-length resources so the directory round-trips unchanged.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::descriptor::{
    weight, Capabilities, Descriptor, DescriptorInfo, ParseError, Probe, ProbeError, Rating, ReadContext,
};
use crate::guard;
use crate::resource::{Endian, FieldKind, Resource, Width};

pub const IWAD:       &[u8; 4] = b"IWAD";
pub const PWAD:       &[u8; 4] = b"PWAD";
pub const ENTRY_SIZE: u64      = 16;
pub const NAME_SIZE:  usize    = 8;

static INFO: DescriptorInfo = DescriptorInfo {
    id:           "doom_wad",
    name:         "Doom WAD",
    games:        &["Doom", "Doom II", "Heretic", "Hexen", "Strife"],
    extensions:   &["wad"],
    capabilities: Capabilities { read: true, write: false, replace: true, rename: true },
    enabled:      true,
};

pub struct DoomWad;

impl Descriptor for DoomWad {
    fn info(&self) -> &DescriptorInfo { &INFO }

    fn score(&self, probe: &mut Probe, rating: &mut Rating) -> Result<(), ProbeError> {
        rating.extension(probe, INFO.extensions);
        let magic = probe.reader().read_bytes(4)?;
        rating.require("magic", magic == IWAD || magic == PWAD, weight::MAGIC)?;

        let count = probe.reader().read_u32::<LittleEndian>()? as u64;
        probe.check_num_files(count)?;
        rating.add("lump count", weight::FIELD);

        let table = probe.reader().read_u32::<LittleEndian>()? as u64;
        guard::check_region(table, count * ENTRY_SIZE, probe.size())?;
        rating.add("directory in bounds", weight::FIELD);
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Vec<Resource>, ParseError> {
        let magic = ctx.reader().read_string(4)?;
        if magic.as_bytes() != IWAD && magic.as_bytes() != PWAD {
            return Err(ParseError::Malformed(format!("unknown WAD identification {magic:?}")));
        }
        let count = ctx.reader().read_u32::<LittleEndian>()? as u64;
        ctx.check_num_files(count)?;
        let (table, table_ptr) = ctx.reader().read_pointer(FieldKind::Offset, Width::U32, Endian::Little)?;
        ctx.check_region(table, count * ENTRY_SIZE)?;
        ctx.add_anchor(table, table_ptr);
        ctx.set_maximum(count);

        ctx.reader().seek_to(table)?;
        let mut resources = Vec::with_capacity(count as usize);
        for i in 0..count {
            ctx.checkpoint(i)?;
            let (offset, offset_ptr) = ctx.reader().read_pointer(FieldKind::Offset, Width::U32, Endian::Little)?;
            let (length, length_ptr) = ctx.reader().read_pointer(FieldKind::Length, Width::U32, Endian::Little)?;
            let (name, slot) = ctx.read_fixed_name(NAME_SIZE)?;
            ctx.check_region(offset, length)?;

            resources.push(
                ctx.resource(name, offset, length)
                    .with_property("wad", &magic)
                    .with_pointer(offset_ptr)
                    .with_pointer(length_ptr)
                    .with_name_slot(slot, NAME_SIZE),
            );
        }
        Ok(resources)
    }

    fn preview_hint(&self, resource: &Resource) -> Option<&'static str> {
        match resource.name() {
            "PLAYPAL" | "COLORMAP" => Some("palette"),
            "ENDOOM"               => Some("text"),
            n if n.starts_with("DS") || n.starts_with("DP") => Some("audio"),
            n if resource.length() == 0 && (n.ends_with("_START") || n.ends_with("_END")) => None,
            _ => crate::descriptor::preview_hint_for(resource.name()),
        }
    }
}
