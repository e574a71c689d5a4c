//! Reader and writer for KHM skeletal mesh model files.
//!
//! A KHM file holds a bone hierarchy, helper nodes, one skinned mesh with collision
//! shapes, and optionally a baked animation plus an animation bone mask. The crate
//! decodes files into a [`Model`], encodes models back to bytes, and converts between
//! the file's Y-up axes and the authoring tool's Z-up axes on the way.
//!
//! The codec is IO-free apart from the [`Model::load`] and [`Model::save`] helpers.

#![forbid(unsafe_code)]

mod binary;
pub mod builder;
mod encode;
mod error;
pub mod geometry;
pub mod ids;
mod model;
mod version;

#[cfg(feature = "json")]
mod json;

pub use encode::{EncodeOptions, MAX_NAME_BYTES, NamePolicy, fit_name};
pub use error::*;
pub use model::*;
pub use version::*;



#[cfg(test)]
mod builder_tests;
