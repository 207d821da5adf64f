//! Scene graph data: entity records and the store that owns them.
//!
//! - `ids` holds typed identities and the compaction records removals produce
//! - `slots` lists the texture slots of a material and their policies
//! - `entities` contains the image, texture, material, mesh and node records
//! - `store` owns the flat entity collections

pub mod entities;
pub mod ids;
pub mod slots;
pub mod store;
