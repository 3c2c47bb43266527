//! Assets: one processed source file each
//!
//! The [`AssetBuilder`] turns a path into an [`Asset`]: read, transform,
//! analyze, then stamp a fresh id from its own [`IdAllocator`]. Ids are never
//! reused within a build, even when the same path is built twice.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::debug;
use serde::Serialize;

use crate::{
    analyzer::SourceAnalyzer,
    error::{BundleError, BundleResult},
    fs::FileSystem,
    transform::TransformPipeline,
    types::FxIndexMap,
};

/// Unique identifier for an asset within one build
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AssetId(u32);

impl AssetId {
    pub const ENTRY: Self = Self(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out sequential ids for a single build
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> AssetId {
        let id = AssetId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    /// Absolute, normalized path of the source file
    pub file_path: PathBuf,
    /// Transformed code embedded in the bundle
    pub code: String,
    /// Raw import specifiers in source order
    pub deps: Vec<String>,
    /// Specifier to the id of the asset it resolved to
    pub mapping: FxIndexMap<String, AssetId>,
}

impl Asset {
    /// Directory that relative specifiers of this asset resolve against
    pub fn dir(&self) -> &Path {
        self.file_path.parent().unwrap_or_else(|| Path::new("/"))
    }
}

pub struct AssetBuilder<'a> {
    fs: &'a dyn FileSystem,
    pipeline: &'a TransformPipeline,
    analyzer: &'a dyn SourceAnalyzer,
    ids: IdAllocator,
}

impl fmt::Debug for AssetBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetBuilder")
            .field("pipeline", &self.pipeline)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl<'a> AssetBuilder<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        pipeline: &'a TransformPipeline,
        analyzer: &'a dyn SourceAnalyzer,
    ) -> Self {
        Self {
            fs,
            pipeline,
            analyzer,
            ids: IdAllocator::new(),
        }
    }

    /// Build a new asset for `file_path`, allocating the next id
    pub fn build_asset(&mut self, file_path: &Path) -> BundleResult<Asset> {
        let source = self
            .fs
            .read_to_string(file_path)
            .map_err(|source| BundleError::AssetRead {
                path: file_path.to_path_buf(),
                source,
            })?;

        let source = self.pipeline.apply(file_path, source)?;

        let analysis = self
            .analyzer
            .analyze(&source, file_path)
            .map_err(|err| BundleError::Parse {
                path: file_path.to_path_buf(),
                source: err.into(),
            })?;

        let id = self.ids.next_id();
        debug!(
            "Built asset {id} for {} with {} dependencies",
            file_path.display(),
            analysis.imports.len()
        );

        Ok(Asset {
            id,
            file_path: file_path.to_path_buf(),
            code: analysis.code,
            deps: analysis.imports,
            mapping: FxIndexMap::default(),
        })
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }
}
