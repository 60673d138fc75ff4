//! `arcprobe`: identify game and application container files and extract,
//! replace or rename their members lazily.
//!
//! | Layer        | Module        |
//! |--------------|---------------|
//! | Guard rails  | [`guard`]     |
//! | Reader       | [`io_stream`] |
//! | Members      | [`resource`], [`sizing`] |
//! | Transforms   | [`exporter`]  |
//! | Formats      | [`descriptor`], [`registry`], [`formats`] |
//! | Session      | [`archive`], [`patch`], [`progress`] |

pub mod guard;
pub mod io_stream;
pub mod resource;
pub mod exporter;
pub mod sizing;
pub mod progress;
pub mod descriptor;
pub mod registry;
pub mod patch;
pub mod archive;
pub mod formats;

pub use archive::{Archive, EngineOptions, ExtractError, OpenError};
pub use descriptor::{Descriptor, DescriptorInfo, ParseError, Probe, ReadContext};
pub use formats::builtin_registry;
pub use patch::{WriteError, WriteReport};
pub use registry::Registry;
pub use resource::{ManifestEntry, Replacement, Resource};
