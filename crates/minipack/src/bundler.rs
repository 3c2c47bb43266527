//! Build entry point
//!
//! A build runs once: plugins subscribe, the graph is traversed, the bundle is
//! rendered and written, and `afterEmit` handlers settle before
//! [`Bundler::run`] returns.

use std::{borrow::Cow, fmt, path::PathBuf};

use log::info;

use crate::{
    analyzer::{EsmAnalyzer, SourceAnalyzer},
    asset::{Asset, AssetBuilder},
    emit::{AFTER_EMIT, DEFAULT_OUTPUT_PATH, EmitSummary, Emitter, register_emit_hooks},
    error::{BundleError, BundleResult},
    fs::{FileSystem, OsFileSystem},
    graph::{DedupeMode, GraphBuilder},
    hooks::HookRegistry,
    plugin::{Plugin, apply_plugins},
    template::{DEFAULT_TEMPLATE, PlaceholderRenderer, TemplateRenderer},
    transform::{TransformPipeline, TransformRule},
};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub entry: PathBuf,
    /// Output path before `emitFile` handlers run
    pub output: PathBuf,
    /// Template read through the bundler's file system; built-in when `None`
    pub template: Option<PathBuf>,
    pub dedupe: DedupeMode,
    pub rules: Vec<TransformRule>,
}

impl BuildOptions {
    pub fn new(entry: impl Into<PathBuf>) -> Self {
        Self {
            entry: entry.into(),
            output: PathBuf::from(DEFAULT_OUTPUT_PATH),
            template: None,
            dedupe: DedupeMode::default(),
            rules: Vec::new(),
        }
    }
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Every asset in id order
    pub assets: Vec<Asset>,
    pub summary: EmitSummary,
}

pub struct Bundler {
    options: BuildOptions,
    hooks: HookRegistry,
    plugins: Vec<Box<dyn Plugin>>,
    fs: Box<dyn FileSystem>,
    analyzer: Box<dyn SourceAnalyzer>,
    renderer: Box<dyn TemplateRenderer>,
}

impl fmt::Debug for Bundler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundler")
            .field("options", &self.options)
            .field("hooks", &self.hooks)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

impl Bundler {
    /// Create a bundler with the emitter's extension points declared
    pub fn new(options: BuildOptions) -> BundleResult<Self> {
        let mut hooks = HookRegistry::new();
        register_emit_hooks(&mut hooks)?;

        Ok(Self {
            options,
            hooks,
            plugins: Vec::new(),
            fs: Box::new(OsFileSystem),
            analyzer: Box::new(EsmAnalyzer),
            renderer: Box::new(PlaceholderRenderer),
        })
    }

    #[must_use]
    pub fn with_file_system(mut self, fs: impl FileSystem + 'static) -> Self {
        self.fs = Box::new(fs);
        self
    }

    #[must_use]
    pub fn with_analyzer(mut self, analyzer: impl SourceAnalyzer + 'static) -> Self {
        self.analyzer = Box::new(analyzer);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: impl TemplateRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Plugins are applied in the order they were added, when the build starts
    #[must_use]
    pub fn with_plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Registry for declaring extra points or subscribing directly
    ///
    /// Direct subscriptions run before those of plugins.
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Run the build, blocking on `afterEmit` handlers
    pub fn run(self) -> BundleResult<BuildOutput> {
        futures::executor::block_on(self.run_async())
    }

    pub async fn run_async(self) -> BundleResult<BuildOutput> {
        let Self {
            options,
            mut hooks,
            plugins,
            fs,
            analyzer,
            renderer,
        } = self;

        apply_plugins(&plugins, &mut hooks)?;

        let pipeline = TransformPipeline::new(options.rules);
        let assets = AssetBuilder::new(fs.as_ref(), &pipeline, analyzer.as_ref());
        let graph = GraphBuilder::new(assets, options.dedupe).build_graph(&options.entry)?;

        let template = match &options.template {
            Some(path) => Cow::Owned(fs.read_to_string(path).map_err(|err| {
                BundleError::Render {
                    message: format!("failed to read template {}", path.display()),
                    source: Some(err.into()),
                }
            })?),
            None => Cow::Borrowed(DEFAULT_TEMPLATE),
        };

        let summary = Emitter::new(fs.as_ref(), renderer.as_ref(), &hooks).emit(
            &graph,
            &template,
            &options.output,
        )?;

        hooks.promise(AFTER_EMIT, summary.clone()).await?;
        info!(
            "Bundled {} into {}",
            options.entry.display(),
            summary.output_path.display()
        );

        Ok(BuildOutput {
            assets: graph,
            summary,
        })
    }
}
