//! Built-in descriptors.
//!
//! | id             | magic        | directory            | rewrite          |
//! |----------------|--------------|----------------------|------------------|
//! | `quake_pak`    | `PACK`       | after payloads       | replace, rename  |
//! | `doom_wad`     | `IWAD`/`PWAD`| after payloads       | replace, rename  |
//! | `afs`          | `AFS\0`      | header + name table  | replace, rename  |
//! | `westwood_pak` | none         | header, offsets only | replace          |
//!
//! Registration order is the tie-break order.  Formats with a magic number
//! come first so that a magic-less format never wins a tie against them.

pub mod afs;
pub mod doom_wad;
pub mod quake_pak;
pub mod westwood_pak;

use crate::registry::Registry;

/// Registry holding every built-in descriptor, in tie-break order.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(quake_pak::QuakePak)
        .register(doom_wad::DoomWad)
        .register(afs::Afs)
        .register(westwood_pak::WestwoodPak);
    registry
}
