// src/lib.rs

//! Quadgen systemd generator
//!
//! Compiles declarative container unit files (`.container`, `.volume`,
//! `.network`, `.image`, `.build`, `.kube`, `.pod`) into plain systemd
//! `.service` units running podman.
//!
//! # Architecture
//!
//! - Byte-faithful unit files: comments and ordering survive the
//!   parse/serialize round trip, so drop-in merging never loses text
//! - Resource names flow between units: a `.volume` referencing a
//!   `.build` image resolves through names registered in order
//! - Batch semantics: one bad unit is dropped with a logged error, the
//!   rest of the batch still generates

pub mod convert;
mod error;
pub mod generator;
pub mod kmsg;
pub mod loader;
pub mod paths;
pub mod ranges;
pub mod signature;
pub mod split;
pub mod unitfile;

pub use error::{Error, Result};
pub use generator::Generator;
pub use ranges::{Range, Ranges};
pub use unitfile::UnitFile;
