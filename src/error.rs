//! Error types of the optimiser.
//!
//! [`DocumentError`] is fatal for a run, [`GraphError`] is returned before a
//! graph mutation takes place, and [`ConvertError`] only ever fails a single
//! texture.

use std::{collections::TryReserveError, io, path::PathBuf};

use thiserror::Error;

use crate::data_structures::ids::{EntityRef, NodeId};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Failed to read '{path}'")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed writing output file '{path}'")]
    Write { path: PathBuf, source: io::Error },

    #[error("Invalid JSON")]
    Json(#[from] serde_json::Error),

    #[error("Invalid GLB container: {0}")]
    Glb(String),

    /// The document parsed but violates the GLTF schema or references an
    /// entity that does not exist.
    #[error("Invalid GLTF: {0}")]
    Invalid(String),

    #[error("Legacy GLTF (asset version {0})")]
    Legacy(String),

    #[error("{feature} is not supported (input file uses {extension})")]
    Unsupported {
        feature: &'static str,
        extension: &'static str,
    },

    #[error("Invalid output file detected")]
    Integrity(#[from] GraphError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("{0} does not name a live entity")]
    NotLive(EntityRef),

    #[error("{0} is read-only")]
    ReadOnly(NodeId),

    #[error("{referrer} references missing {target}")]
    Dangling { referrer: EntityRef, target: EntityRef },
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unable to load image '{path}'")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Unable to open image '{path}'")]
    Open { path: PathBuf, source: io::Error },

    #[error("Unexpected channel count {channels} when splitting texture '{path}'")]
    ChannelCount { path: PathBuf, channels: u8 },

    #[error("No container format for {channels} channel texture '{path}'")]
    Format { path: PathBuf, channels: u8 },

    #[error("Out of memory")]
    OutOfMemory(#[from] TryReserveError),

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Failed generating mip {level} of '{path}'")]
    Mip { path: PathBuf, level: u32 },

    #[error("Failed writing ktx texture '{path}'")]
    Write { path: PathBuf, source: io::Error },

    #[error("Conversion task failed: {0}")]
    Task(String),
}
