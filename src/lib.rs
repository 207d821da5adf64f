//! gltf-squash
//!
//! An optimiser for glTF 2.0 scenes. It removes entities that are invalid,
//! unused or duplicated, keeping every cross reference intact while the flat
//! entity collections shrink, and re-encodes material textures as KTX2 files
//! with a full mip chain.
//!
//! High-level modules
//! - `data_structures`: entity records, typed identities and the entity store
//! - `graph`: enumerating and rewriting references between entities
//! - `prune`: the invalid, unused and duplicate sweeps and their cascade
//! - `dedup`: structural equality of images, textures and materials
//! - `resources`: document I/O, raster operations and the KTX2 writer
//! - `convert`: planning, running and applying texture conversions
//! - `scheduler`: the worker pool conversions run on
//! - `optimiser`: the whole pass from input file to output file
//!

pub mod convert;
pub mod data_structures;
pub mod dedup;
pub mod error;
pub mod graph;
pub mod optimiser;
pub mod prune;
pub mod resources;
pub mod scheduler;

pub use optimiser::{Optimiser, Options};
