//! `layerfs` is a library for layered virtual file systems.
//!
//! A writable overlay layer is placed on top of an optional read-only base layer. Reads fall
//! through from the overlay to the base, writes only ever touch the overlay. On top of that the
//! crate offers filtered views, merging the overlay into another layer, diffing two layers and
//! materializing the combined result onto the local disk.
//!
//! Layers are anything implementing [`StorageBackend`]. [`MemoryBackend`] and [`NativeBackend`]
//! are provided.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod backend;
mod config;
mod defaults;
mod error;
mod glob;
mod implementations;
mod materialize;
mod merge;
mod overlay;
mod path;
mod query;
mod stat;
mod streaming;
mod traverse;
mod view;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use backend::*;
pub use config::*;
pub use defaults::*;
pub use error::*;
pub use glob::*;
pub use implementations::*;
pub use materialize::*;
pub use merge::*;
pub use overlay::*;
pub use path::*;
pub use query::*;
pub use stat::*;
pub use streaming::*;
pub use traverse::*;
pub use view::*;
