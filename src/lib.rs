//! collpack - build and publish mod collections
//!
//! Packs a curated set of installed mods into a portable collection:
//! a manifest, bundled files and binary patches of local edits.

pub mod archive;
pub mod collection;
pub mod config;
pub mod error;
pub mod games;
pub mod hash;
pub mod patch;
pub mod paths;
