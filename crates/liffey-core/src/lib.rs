#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

//! Core of the liffey dev-time module server.
//!
//! Serves a source tree to a browser-like client without a bundling pass:
//! every requested module is resolved, loaded and run through an ordered
//! chain of source-transforming stages on demand, with import specifiers
//! rewritten to browser-addressable URLs along the way.

pub mod config;
pub mod error;
pub mod fs_probe;
pub mod packages;
pub mod pipeline;
pub mod resolver;
pub mod rewrite;
pub mod transform;
pub mod utils;

pub use config::{load_config_file, ConfigFile, Mode, ResolvedConfig};
pub use error::Error;
pub use pipeline::{
    CombinedMap, LoadOutput, PartialResolvedId, Pipeline, Stage, StageCtx, StageEnforce,
    StageError, StageTransformResult,
};
pub use resolver::ResolveStage;
pub use rewrite::RewriteStage;
pub use transform::{transform_request, TransformOutput};
