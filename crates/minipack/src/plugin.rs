//! Plugins subscribe to extension points before the build starts
//!
//! The bundler never knows what a plugin does; it only hands each one the
//! [`HookRegistry`] in registration order.

use std::{fmt, path::PathBuf};

use log::debug;

use crate::{
    emit::{BuildContext, EMIT_FILE},
    hooks::{HookError, HookRegistry},
};

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Subscribe handlers to any declared extension point
    fn apply(&self, hooks: &mut HookRegistry) -> Result<(), HookError>;
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Plugin").field(&self.name()).finish()
    }
}

/// Apply every plugin in slice order, stopping at the first failure
pub fn apply_plugins(
    plugins: &[Box<dyn Plugin>],
    hooks: &mut HookRegistry,
) -> Result<(), HookError> {
    for plugin in plugins {
        debug!("Applying plugin '{}'", plugin.name());
        plugin.apply(hooks)?;
    }
    Ok(())
}

/// Redirects the bundle to a fixed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutputPath {
    path: PathBuf,
}

impl ChangeOutputPath {
    pub const NAME: &'static str = "change-output-path";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Plugin for ChangeOutputPath {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, hooks: &mut HookRegistry) -> Result<(), HookError> {
        let path = self.path.clone();
        hooks.tap(EMIT_FILE, Self::NAME, move |context: &mut BuildContext| {
            context.set_output_path(path.clone());
            Ok(())
        })
    }
}
