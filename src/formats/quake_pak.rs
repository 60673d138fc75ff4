//! Quake / Quake II `PACK` archives.
//!
//! ```text
//! header  "PACK"  dir_offset:u32  dir_length:u32
//! entry   name:[u8; 56]  offset:u32  length:u32     (64 bytes, at dir_offset)
//! ```
//!
//! The directory normally sits after the payloads, so `dir_offset` is
//! recorded as an anchor and follows the directory on rewrite.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::descriptor::{
    weight, Capabilities, Descriptor, DescriptorInfo, ParseError, Probe, ProbeError, Rating, ReadContext,
};
use crate::guard;
use crate::resource::{Endian, FieldKind, Resource, Width};

pub const MAGIC:      &[u8; 4] = b"PACK";
pub const ENTRY_SIZE: u64      = 64;
pub const NAME_SIZE:  usize    = 56;

static INFO: DescriptorInfo = DescriptorInfo {
    id:           "quake_pak",
    name:         "Quake PAK",
    games:        &["Quake", "Quake II", "Half-Life", "Hexen II"],
    extensions:   &["pak"],
    capabilities: Capabilities { read: true, write: false, replace: true, rename: true },
    enabled:      true,
};

pub struct QuakePak;

impl Descriptor for QuakePak {
    fn info(&self) -> &DescriptorInfo { &INFO }

    fn score(&self, probe: &mut Probe, rating: &mut Rating) -> Result<(), ProbeError> {
        rating.extension(probe, INFO.extensions);
        let magic = probe.reader().read_bytes(4)?;
        rating.require("magic", magic == MAGIC, weight::MAGIC)?;

        let dir_offset = probe.reader().read_u32::<LittleEndian>()? as u64;
        let dir_length = probe.reader().read_u32::<LittleEndian>()? as u64;
        guard::check_region(dir_offset, dir_length, probe.size())?;
        rating.add("directory in bounds", weight::FIELD);
        rating.check("whole entries", dir_length % ENTRY_SIZE == 0, weight::FIELD);
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Vec<Resource>, ParseError> {
        let magic = ctx.reader().read_bytes(4)?;
        if magic != MAGIC {
            return Err(ParseError::Malformed("missing PACK magic".into()));
        }
        let (dir_offset, dir_ptr) = ctx.reader().read_pointer(FieldKind::Offset, Width::U32, Endian::Little)?;
        let dir_length = ctx.reader().read_u32::<LittleEndian>()? as u64;
        ctx.check_region(dir_offset, dir_length)?;
        if dir_length % ENTRY_SIZE != 0 {
            return Err(ParseError::Malformed(format!("directory length {dir_length} is not a multiple of 64")));
        }
        let count = ctx.check_num_files(dir_length / ENTRY_SIZE)?;
        ctx.add_anchor(dir_offset, dir_ptr);
        ctx.set_maximum(count);

        ctx.reader().seek_to(dir_offset)?;
        let mut resources = Vec::with_capacity(count as usize);
        for i in 0..count {
            ctx.checkpoint(i)?;
            let (name, slot) = ctx.read_fixed_name(NAME_SIZE)?;
            let (offset, offset_ptr) = ctx.reader().read_pointer(FieldKind::Offset, Width::U32, Endian::Little)?;
            let (length, length_ptr) = ctx.reader().read_pointer(FieldKind::Length, Width::U32, Endian::Little)?;
            ctx.check_region(offset, length)?;

            resources.push(
                ctx.resource(name, offset, length)
                    .with_pointer(offset_ptr)
                    .with_pointer(length_ptr)
                    .with_name_slot(slot, NAME_SIZE),
            );
        }
        Ok(resources)
    }
}
