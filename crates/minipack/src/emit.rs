//! Rendering and writing the bundle
//!
//! Emission fires [`EMIT_FILE`] with a fresh [`BuildContext`] after rendering
//! and before writing, so plugins can redirect the output. The last call to
//! [`BuildContext::set_output_path`] wins.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    asset::Asset,
    error::{BundleError, BundleResult},
    fs::FileSystem,
    hooks::{HookError, HookKind, HookRegistry},
    template::{RenderModule, TemplateRenderer},
};

/// Sync point fired once per build before the bundle is written
pub const EMIT_FILE: &str = "emitFile";

/// Async parallel point fired once the bundle is on disk
pub const AFTER_EMIT: &str = "afterEmit";

pub const DEFAULT_OUTPUT_PATH: &str = "./dist/bundle.js";

/// Mutable state handed to [`EMIT_FILE`] handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    output_path: PathBuf,
}

impl BuildContext {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        self.output_path = path.into();
        debug!("Output path changed to {}", self.output_path.display());
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// What was written; the argument of [`AFTER_EMIT`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitSummary {
    pub output_path: PathBuf,
    pub bytes: usize,
    pub modules: usize,
}

/// Declare the extension points owned by the emitter
pub fn register_emit_hooks(hooks: &mut HookRegistry) -> Result<(), HookError> {
    hooks.register::<BuildContext>(EMIT_FILE, HookKind::Sync, &["context"])?;
    hooks.register::<EmitSummary>(AFTER_EMIT, HookKind::AsyncParallel, &["summary"])?;
    Ok(())
}

pub struct Emitter<'a> {
    fs: &'a dyn FileSystem,
    renderer: &'a dyn TemplateRenderer,
    hooks: &'a HookRegistry,
}

impl fmt::Debug for Emitter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("hooks", self.hooks)
            .finish_non_exhaustive()
    }
}

impl<'a> Emitter<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        renderer: &'a dyn TemplateRenderer,
        hooks: &'a HookRegistry,
    ) -> Self {
        Self {
            fs,
            renderer,
            hooks,
        }
    }

    pub fn emit(
        &self,
        assets: &[Asset],
        template: &str,
        default_output_path: &Path,
    ) -> BundleResult<EmitSummary> {
        let modules: Vec<RenderModule<'_>> = assets.iter().map(RenderModule::from).collect();
        let code = self
            .renderer
            .render(template, &modules)
            .map_err(|err| BundleError::Render {
                message: "failed to render bundle template".to_owned(),
                source: Some(err.into()),
            })?;

        let mut context = BuildContext::new(default_output_path);
        self.hooks.call(EMIT_FILE, &mut context)?;

        let output_path = context.output_path;
        self.fs
            .write(&output_path, &code)
            .map_err(|source| BundleError::Write {
                path: output_path.clone(),
                source,
            })?;
        info!(
            "Wrote {} modules ({} bytes) to {}",
            modules.len(),
            code.len(),
            output_path.display()
        );

        Ok(EmitSummary {
            output_path,
            bytes: code.len(),
            modules: modules.len(),
        })
    }
}
