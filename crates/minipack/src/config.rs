//! `minipack.toml` configuration
//!
//! ```toml
//! entry = "src/main.js"
//! output = "dist/bundle.js"
//! dedupe = "by-path"
//!
//! [[rules]]
//! test = "\\.json$"
//! loaders = ["json"]
//!
//! [[plugins]]
//! name = "change-output-path"
//! path = "dist/app.js"
//! ```
//!
//! Relative paths in a loaded file resolve against the file's directory.

use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::{
    bundler::{BuildOptions, Bundler},
    error::{BundleError, BundleResult},
    fs::{FileSystem, OsFileSystem},
    graph::DedupeMode,
    plugin::{ChangeOutputPath, Plugin},
    transform::{Loader, TransformRule},
};

pub const CONFIG_FILE: &str = "minipack.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    pub entry: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// Runtime template; the built-in one when unset
    pub template: Option<PathBuf>,
    pub dedupe: DedupeMode,
    pub rules: Vec<RuleConfig>,
    pub plugins: Vec<PluginConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Regex matched against the file path
    pub test: String,
    pub loaders: Vec<LoaderKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoaderKind {
    Json,
    Text,
}

impl LoaderKind {
    pub fn loader(self) -> Loader {
        match self {
            Self::Json => Loader::json(),
            Self::Text => Loader::text(),
        }
    }
}

/// Built-in plugins, selected by `name`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case", deny_unknown_fields)]
pub enum PluginConfig {
    ChangeOutputPath { path: PathBuf },
}

impl PluginConfig {
    pub fn plugin(&self) -> Box<dyn Plugin> {
        match self {
            Self::ChangeOutputPath { path } => Box::new(ChangeOutputPath::new(path.clone())),
        }
    }
}

impl Config {
    /// Read and parse a config file
    pub fn load(path: &Path) -> BundleResult<Self> {
        Self::load_from(&OsFileSystem, path)
    }

    pub fn load_from(fs: &dyn FileSystem, path: &Path) -> BundleResult<Self> {
        let content = fs.read_to_string(path).map_err(|err| {
            BundleError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|err| {
            BundleError::config(format!("{}: {}", path.display(), err.to_string().trim_end()))
        })?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> BundleResult<Self> {
        toml::from_str(content).map_err(|err| BundleError::config(err.to_string().trim_end()))
    }

    /// Make relative paths relative to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        let paths = [&mut self.entry, &mut self.output, &mut self.template]
            .into_iter()
            .flatten()
            .chain(self.plugins.iter_mut().map(|plugin| match plugin {
                PluginConfig::ChangeOutputPath { path } => path,
            }));
        for path in paths {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Compile the rules and build options without plugins
    pub fn build_options(&self) -> BundleResult<BuildOptions> {
        let entry = self
            .entry
            .clone()
            .ok_or_else(|| BundleError::config("no entry module configured"))?;

        let mut options = BuildOptions::new(entry);
        if let Some(output) = &self.output {
            options.output.clone_from(output);
        }
        options.template.clone_from(&self.template);
        options.dedupe = self.dedupe;
        options.rules = self
            .rules
            .iter()
            .map(RuleConfig::compile)
            .collect::<BundleResult<_>>()?;
        Ok(options)
    }

    pub fn into_bundler(self) -> BundleResult<Bundler> {
        let mut bundler = Bundler::new(self.build_options()?)?;
        for plugin in &self.plugins {
            bundler = bundler.with_plugin(plugin.plugin());
        }
        Ok(bundler)
    }
}

impl RuleConfig {
    pub fn compile(&self) -> BundleResult<TransformRule> {
        let test = Regex::new(&self.test).map_err(|err| {
            BundleError::config(format!("invalid rule pattern `{}`: {err}", self.test))
        })?;
        if self.loaders.is_empty() {
            return Err(BundleError::config(format!(
                "rule `{}` has no loaders",
                self.test
            )));
        }
        Ok(TransformRule::new(
            test,
            self.loaders.iter().map(|kind| kind.loader()).collect(),
        ))
    }
}
