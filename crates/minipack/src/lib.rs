//! minipack: a minimal JavaScript module bundler
//!
//! Starting from an entry module, [`Bundler`] discovers every module reachable
//! through static imports, gives each one a sequential id, and renders them
//! into a single file through a template. Plugins extend a build by
//! subscribing to named extension points in the [`HookRegistry`].

pub mod analyzer;
pub mod asset;
pub mod bundler;
pub mod config;
pub mod emit;
pub mod error;
pub mod fs;
pub mod graph;
pub mod hooks;
pub mod plugin;
pub mod template;
pub mod transform;
pub mod types;

pub use asset::{Asset, AssetId};
pub use bundler::{BuildOptions, BuildOutput, Bundler};
pub use config::Config;
pub use emit::{AFTER_EMIT, BuildContext, EMIT_FILE, EmitSummary};
pub use error::{BundleError, BundleResult};
pub use graph::DedupeMode;
pub use hooks::{HookError, HookKind, HookRegistry};
pub use plugin::{ChangeOutputPath, Plugin};
