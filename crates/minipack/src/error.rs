//! Error types for the bundler
//!
//! Every failure aborts the build. Variants carry the file path, specifier or
//! hook name needed to diagnose the problem; collaborator failures (loaders,
//! analyzers, renderers, plugin handlers) are kept as the error source.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::hooks::HookError;

/// Boxed error produced by pluggable collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for bundler operations
pub type BundleResult<T> = Result<T, BundleError>;

#[derive(Error, Debug)]
pub enum BundleError {
    /// The source file of an asset could not be read
    #[error("failed to read asset {}", path.display())]
    AssetRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A loader in the transform pipeline failed
    #[error("loader '{loader}' of rule '{rule}' failed on {}", path.display())]
    Transform {
        path: PathBuf,
        rule: String,
        loader: String,
        #[source]
        source: BoxError,
    },

    /// The source analyzer rejected a module
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// The bundle template could not be loaded or rendered
    #[error("{message}")]
    Render {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The rendered bundle could not be written
    #[error("failed to write bundle to {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Hook declaration, subscription or handler failure
    #[error(transparent)]
    Hook(#[from] HookError),

    /// A dependency failed to build; names the import that led to it
    #[error("cannot bundle '{specifier}' imported from {}", importer.display())]
    Import {
        specifier: String,
        importer: PathBuf,
        #[source]
        source: Box<BundleError>,
    },

    /// Invalid or incomplete configuration
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl BundleError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Innermost error once `Import` context wrappers are peeled off
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Import { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
