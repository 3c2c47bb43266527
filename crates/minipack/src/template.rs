//! Bundle rendering
//!
//! The emitter hands the projected module list to a [`TemplateRenderer`].
//! [`PlaceholderRenderer`] substitutes `{{ name }}` placeholders:
//!
//! - `{{ modules }}`: the `id: [factory, mapping]` table consumed by the runtime
//! - `{{ entry }}`: id of the entry module
//! - `{{ data }}`: the module list as JSON
//!
//! Unknown placeholders are errors, and a template that embeds no module code
//! at all is rejected.

use std::{fmt::Write as _, sync::LazyLock};

use anyhow::{Context, anyhow, bail};
use regex::{Captures, Regex};
use serde::Serialize;

use crate::{
    asset::{Asset, AssetId},
    types::FxIndexMap,
};

/// Runtime used when no template is configured
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/bundle.js");

/// Public fields of an asset; the file path stays out of the bundle
#[derive(Debug, Clone, Serialize)]
pub struct RenderModule<'a> {
    pub id: AssetId,
    pub code: &'a str,
    pub mapping: &'a FxIndexMap<String, AssetId>,
}

impl<'a> From<&'a Asset> for RenderModule<'a> {
    fn from(asset: &'a Asset) -> Self {
        Self {
            id: asset.id,
            code: &asset.code,
            mapping: &asset.mapping,
        }
    }
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, modules: &[RenderModule<'_>]) -> anyhow::Result<String>;
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, modules: &[RenderModule<'_>]) -> anyhow::Result<String> {
        if modules.is_empty() {
            bail!("no modules to render");
        }

        let mut embeds_code = false;
        let mut failure = None;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let value = match &caps[1] {
                "modules" => {
                    embeds_code = true;
                    module_table(modules)
                }
                "data" => {
                    embeds_code = true;
                    serde_json::to_string_pretty(modules).context("serializing module data")
                }
                "entry" => Ok(AssetId::ENTRY.to_string()),
                unknown => Err(anyhow!("unknown placeholder `{{{{ {unknown} }}}}`")),
            };
            value.unwrap_or_else(|err| {
                failure.get_or_insert(err);
                String::new()
            })
        });
        let rendered = rendered.into_owned();

        if let Some(err) = failure {
            return Err(err);
        }
        if !embeds_code {
            bail!("template references neither `{{{{ modules }}}}` nor `{{{{ data }}}}`");
        }
        Ok(rendered)
    }
}

/// Render the `id: [factory, mapping]` entries of the runtime's module table
pub fn module_table(modules: &[RenderModule<'_>]) -> anyhow::Result<String> {
    let mut table = String::new();
    for module in modules {
        let mapping = serde_json::to_string(module.mapping)
            .with_context(|| format!("serializing mapping of module {}", module.id))?;
        let _ = write!(
            table,
            "  {}: [\n    function (require, module, exports) {{\n{}\n    }},\n    {},\n  ],\n",
            module.id,
            module.code.trim_end(),
            mapping
        );
    }
    // The template supplies the newline after the placeholder
    table.truncate(table.trim_end().len());
    Ok(table)
}
