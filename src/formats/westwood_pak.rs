//! Westwood Studios PAK (Dune II, Command & Conquer, Lands of Lore).
//!
//! There is no magic number and no length field:
//!
//! ```text
//! entry       offset:u32  name:NUL-terminated
//! terminator  offset:u32 == file size (C&C) or 0 (Dune II), empty name
//! ```
//!
//! The directory ends at the terminator or once the read position reaches
//! the first payload.  Lengths come from gap inference.  A terminator that
//! stores the file size is kept as an anchor to the end of the file.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::descriptor::{
    weight, Capabilities, Descriptor, DescriptorInfo, ParseError, Probe, ProbeError, Rating, ReadContext,
};
use crate::resource::{Endian, FieldKind, Resource, Width};
use crate::sizing;

/// A name that looks like an 8.3 file name is strong evidence here.
const NAME_WEIGHT: u32 = 10;

static INFO: DescriptorInfo = DescriptorInfo {
    id:           "westwood_pak",
    name:         "Westwood PAK",
    games:        &["Dune II", "Command & Conquer", "Lands of Lore", "The Legend of Kyrandia"],
    extensions:   &["pak"],
    capabilities: Capabilities { read: true, write: false, replace: true, rename: false },
    enabled:      true,
};

pub struct WestwoodPak;

impl Descriptor for WestwoodPak {
    fn info(&self) -> &DescriptorInfo { &INFO }

    fn score(&self, probe: &mut Probe, rating: &mut Rating) -> Result<(), ProbeError> {
        rating.extension(probe, INFO.extensions);

        let first = probe.reader().read_u32::<LittleEndian>()? as u64;
        probe.check_offset(first)?;
        // At least one offset, a one-byte name and its terminator.
        rating.require("first offset", first >= 6, weight::FIELD)?;

        let max = probe.limits().max_filename_length;
        let name = probe.reader().read_null_string_bounded(max)?;
        rating.require("file name", plausible_name(&name), NAME_WEIGHT)?;

        if probe.reader().position() + 4 <= first {
            let second = probe.reader().read_u32::<LittleEndian>()? as u64;
            rating.check("ascending offsets", second >= first && second <= probe.size(), weight::FIELD);
        }
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Vec<Resource>, ParseError> {
        let size = ctx.size();
        let mut resources: Vec<Resource> = Vec::new();
        let mut first_payload = size;

        loop {
            if ctx.reader().position() >= first_payload {
                break;
            }
            let (offset, ptr) = ctx.reader().read_pointer(FieldKind::Offset, Width::U32, Endian::Little)?;
            if offset == size {
                ctx.add_anchor(size, ptr);
                break;
            }
            if offset == 0 {
                break;
            }
            ctx.check_offset(offset)?;
            let name = ctx.read_null_name()?;
            if name.is_empty() {
                break;
            }
            ctx.check_num_files(resources.len() as u64 + 1)?;
            ctx.checkpoint(resources.len() as u64)?;

            first_payload = first_payload.min(offset);
            resources.push(ctx.resource(name, offset, 0).with_pointer(ptr));
        }

        if resources.is_empty() {
            return Err(ParseError::Malformed("empty directory".into()));
        }
        if first_payload < ctx.reader().position() {
            return Err(ParseError::Malformed(format!(
                "payload at {first_payload} overlaps the directory ending at {}",
                ctx.reader().position(),
            )));
        }
        sizing::calculate_gap_lengths(&mut resources, size);
        Ok(resources)
    }
}

fn plausible_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_graphic())
        && name.contains('.')
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::descriptor::rate;

    /// C&C layout: directory with a file-size terminator, then payloads.
    pub(crate) fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let dir_len: usize = entries.iter().map(|(n, _)| 4 + n.len() + 1).sum::<usize>() + 4;
        let total = dir_len + entries.iter().map(|(_, d)| d.len()).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        let mut at = dir_len;
        for (name, data) in entries {
            out.extend((at as u32).to_le_bytes());
            out.extend(name.as_bytes());
            out.push(0);
            at += data.len();
        }
        out.extend((total as u32).to_le_bytes());
        for (_, data) in entries {
            out.extend(*data);
        }
        out
    }

    #[test]
    fn scores_without_magic() {
        let data = build(&[("MOUSE.SHP", b"0123"), ("TITLE.CPS", b"4567")]);
        let mut probe = Probe::from_bytes("setup.pak", data.clone()).unwrap();
        assert_eq!(rate(&WestwoodPak, &mut probe).total(), weight::EXTENSION + 2 * weight::FIELD + NAME_WEIGHT);

        // Below the default threshold without the extension.
        let mut probe = Probe::from_bytes("setup.bin", data).unwrap();
        assert!(rate(&WestwoodPak, &mut probe).total() < weight::EXTENSION);
    }

    #[test]
    fn names_must_look_like_files() {
        assert!(plausible_name("MOUSE.SHP"));
        assert!(!plausible_name("PACK"));
        assert!(!plausible_name("A B.C"));
        assert!(!plausible_name(""));
    }
}
