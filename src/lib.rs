//! **Bin**ary **post**-processing for freshly built executables and modules.
//!
//! Supports:
//! * Embedding icons, version information, manifests and raw data as Windows resources
//! * Converting non-ICO icon sources (with the `images` feature)
//! * Copying resources between executables
//! * Rewriting Mach-O dependent library paths and adding run paths
//!
//! See [`PostProcessor`] for the complete pipeline, or use the building blocks directly.
//!
//! # Examples
//!
//! ### Icon embedding
//! ```
//! use binpost::{add_resources_to_file, IconIdCounter, IconSet, IconSpec};
//!
//! let specs = ["app.ico".parse::<IconSpec>()?, "tray.ico#1".parse()?];
//! let mut counter = IconIdCounter::new();
//!
//! // read and convert all icon sources into one group icon
//! let icons = IconSet::collect(&specs, None, "build/icons".as_ref(), &mut counter)?;
//!
//! // write the group icon and the icon images in a single update
//! add_resources_to_file(BINARY_PATH, icons.records())?;
//! ```
//!
//! ### Load path rewriting
//! ```
//! use binpost::{patch_file, LoadPathMapping};
//!
//! let mapping = LoadPathMapping::new()
//!     .map("libpython3.11.dylib", "/opt/python/lib/libpython3.11.dylib")
//!     .with_run_path("/opt/python/lib");
//!
//! let report = patch_file(BINARY_PATH, &mapping)?;
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(doc)))]

pub(crate) mod errors;
pub(crate) mod icon;
pub(crate) mod macho;
pub(crate) mod manifest;
pub(crate) mod pe;
pub(crate) mod pipeline;
pub(crate) mod resource;
pub(crate) mod util;
pub(crate) mod version;
pub(crate) mod writer;

pub mod constants;
pub mod types;

pub use crate::{
    errors::*, icon::*, macho::*, manifest::*, pe::*, pipeline::*, resource::*, version::*,
    writer::*,
};
