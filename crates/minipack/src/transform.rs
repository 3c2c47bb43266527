//! Content rewriting applied to raw sources before analysis
//!
//! A [`TransformRule`] pairs a path predicate with a list of [`Loader`]s. For
//! every rule matching a file, the loaders run last-to-first, each one
//! receiving the previous loader's output.

use std::{fmt, path::Path, sync::Arc};

use anyhow::Context;
use log::debug;
use regex::Regex;

use crate::error::{BundleError, BundleResult};

pub type LoaderFn = dyn Fn(&str) -> anyhow::Result<String> + Send + Sync;

/// A named content-rewrite function
#[derive(Clone)]
pub struct Loader {
    name: String,
    run: Arc<LoaderFn>,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Loader").field(&self.name).finish()
    }
}

impl Loader {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Turns a JSON document into a module whose default export is its value
    pub fn json() -> Self {
        Self::new("json", |source| {
            let value: serde_json::Value =
                serde_json::from_str(source).context("invalid JSON document")?;
            Ok(format!("export default {value};\n"))
        })
    }

    /// Turns any file into a module whose default export is its text
    pub fn text() -> Self {
        Self::new("text", |source| {
            Ok(format!(
                "export default {};\n",
                serde_json::Value::from(source)
            ))
        })
    }
}

/// Loaders applied to every file whose path matches `test`
#[derive(Debug, Clone)]
pub struct TransformRule {
    test: Regex,
    loaders: Vec<Loader>,
}

impl TransformRule {
    pub fn new(test: Regex, loaders: Vec<Loader>) -> Self {
        Self { test, loaders }
    }

    /// Rule name used in diagnostics: the predicate pattern
    pub fn name(&self) -> &str {
        self.test.as_str()
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.test.is_match(&path.to_string_lossy())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    rules: Vec<TransformRule>,
}

impl TransformPipeline {
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self { rules }
    }

    /// Run every matching rule over `source`
    pub fn apply(&self, path: &Path, source: String) -> BundleResult<String> {
        let mut source = source;
        for rule in self.rules.iter().filter(|rule| rule.matches(path)) {
            for loader in rule.loaders.iter().rev() {
                debug!(
                    "Applying loader '{}' of rule '{}' to {}",
                    loader.name,
                    rule.name(),
                    path.display()
                );
                source = (loader.run)(&source).map_err(|err| BundleError::Transform {
                    path: path.to_path_buf(),
                    rule: rule.name().to_owned(),
                    loader: loader.name.clone(),
                    source: err.into(),
                })?;
            }
        }
        Ok(source)
    }
}
