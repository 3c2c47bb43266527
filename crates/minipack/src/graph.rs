//! Breadth-first dependency graph construction
//!
//! Starting from the entry asset, every specifier in an asset's `deps` is
//! resolved against that asset's directory, built into a child asset and
//! recorded in the parent's `mapping`. Assets come back in the order they were
//! enqueued, which is also id order.
//!
//! By default a file imported from several places is built once per import
//! ([`DedupeMode::Rebuild`]). Each copy gets its own id, so shared dependencies
//! appear several times in the bundle. [`DedupeMode::ByPath`] consults a
//! resolved-path table first and reuses the existing id instead.

use std::path::{Component, Path, PathBuf};

use log::{debug, info, trace};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::{
    asset::{Asset, AssetBuilder, AssetId},
    error::{BundleError, BundleResult},
};

/// How the traversal treats a path that has already been built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupeMode {
    /// Build every import separately, with a fresh id each time
    #[default]
    Rebuild,
    /// Build each resolved path once and share its id
    ByPath,
}

#[derive(Debug)]
pub struct GraphBuilder<'a> {
    assets: AssetBuilder<'a>,
    mode: DedupeMode,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(assets: AssetBuilder<'a>, mode: DedupeMode) -> Self {
        Self { assets, mode }
    }

    /// Build the graph rooted at `entry`; the entry asset has id 0
    pub fn build_graph(mut self, entry: &Path) -> BundleResult<Vec<Asset>> {
        let entry = absolute_path(entry).map_err(|source| BundleError::AssetRead {
            path: entry.to_path_buf(),
            source,
        })?;
        info!("Building dependency graph from {}", entry.display());

        let root = self.assets.build_asset(&entry)?;
        let mut by_path = FxHashMap::default();
        by_path.insert(root.file_path.clone(), root.id);

        let mut queue = vec![root];
        // Index of the asset that first enqueued each entry of `queue`
        let mut parents: Vec<Option<usize>> = vec![None];

        let mut head = 0;
        while head < queue.len() {
            for dep_index in 0..queue[head].deps.len() {
                let specifier = queue[head].deps[dep_index].clone();
                let resolved = resolve_specifier(&queue[head], &specifier);
                trace!(
                    "Resolved '{specifier}' from {} to {}",
                    queue[head].file_path.display(),
                    resolved.display()
                );

                let existing = match self.mode {
                    DedupeMode::ByPath => by_path.get(&resolved).copied(),
                    DedupeMode::Rebuild => ancestor_with_path(&queue, &parents, head, &resolved),
                };

                let child_id = if let Some(id) = existing {
                    debug!("Reusing asset {id} for '{specifier}'");
                    id
                } else {
                    let child = self.assets.build_asset(&resolved).map_err(|source| {
                        BundleError::Import {
                            specifier: specifier.clone(),
                            importer: queue[head].file_path.clone(),
                            source: Box::new(source),
                        }
                    })?;
                    let id = child.id;
                    debug_assert_eq!(id.index(), queue.len());
                    by_path.entry(resolved).or_insert(id);
                    queue.push(child);
                    parents.push(Some(head));
                    id
                };

                queue[head].mapping.insert(specifier, child_id);
            }
            head += 1;
        }

        info!("Dependency graph complete: {} assets", queue.len());
        Ok(queue)
    }
}

/// Id of the asset on `head`'s import chain (itself included) built from `path`
fn ancestor_with_path(
    queue: &[Asset],
    parents: &[Option<usize>],
    head: usize,
    path: &Path,
) -> Option<AssetId> {
    let mut cursor = Some(head);
    while let Some(index) = cursor {
        if queue[index].file_path == path {
            return Some(queue[index].id);
        }
        cursor = parents[index];
    }
    None
}

/// Resolve `specifier` against the directory of `importer`
pub fn resolve_specifier(importer: &Asset, specifier: &str) -> PathBuf {
    normalize_path(&importer.dir().join(specifier))
}

/// Make `path` absolute against the working directory and normalize it
pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    Ok(normalize_path(&std::path::absolute(path)?))
}

/// Lexically remove `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        analyzer::{Analysis, SourceAnalyzer},
        fs::MemoryFileSystem,
        transform::TransformPipeline,
    };

    /// Each `dep:<specifier>` line is an import
    struct StubAnalyzer;

    impl SourceAnalyzer for StubAnalyzer {
        fn analyze(&self, source: &str, path: &Path) -> anyhow::Result<Analysis> {
            if source.contains("syntax error") {
                return Err(anyhow!("cannot parse {}", path.display()));
            }
            Ok(Analysis {
                imports: source
                    .lines()
                    .filter_map(|line| line.strip_prefix("dep:"))
                    .map(str::to_owned)
                    .collect(),
                code: format!("// {}", path.display()),
            })
        }
    }

    fn build(fs: &MemoryFileSystem, mode: DedupeMode) -> BundleResult<Vec<Asset>> {
        let pipeline = TransformPipeline::default();
        let assets = AssetBuilder::new(fs, &pipeline, &StubAnalyzer);
        GraphBuilder::new(assets, mode).build_graph(Path::new("/project/src/main.js"))
    }

    fn mapping(asset: &Asset) -> Vec<(&str, u32)> {
        asset
            .mapping
            .iter()
            .map(|(specifier, id)| (specifier.as_str(), id.as_u32()))
            .collect()
    }

    fn assert_graph_invariants(assets: &[Asset]) {
        for (index, asset) in assets.iter().enumerate() {
            assert_eq!(asset.id.index(), index, "ids must be contiguous");
            for id in asset.mapping.values() {
                assert!(id.index() < assets.len(), "mapping points at {id}");
            }
        }
    }

    #[test]
    fn test_entry_with_single_import() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/main.js", "dep:./a.js")
            .with_file("/project/src/a.js", "");

        let assets = build(&fs, DedupeMode::Rebuild).unwrap();

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].id, AssetId::ENTRY);
        assert_eq!(assets[0].file_path, Path::new("/project/src/main.js"));
        assert_eq!(assets[0].deps, vec!["./a.js"]);
        assert_eq!(mapping(&assets[0]), vec![("./a.js", 1)]);
        assert_eq!(assets[1].file_path, Path::new("/project/src/a.js"));
        assert!(assets[1].deps.is_empty());
        assert!(assets[1].mapping.is_empty());
    }

    #[test]
    fn test_traversal_is_breadth_first_and_relative_to_importer() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/main.js", "dep:./lib/a.js\ndep:./b.js")
            .with_file("/project/src/lib/a.js", "dep:../c.js")
            .with_file("/project/src/b.js", "")
            .with_file("/project/src/c.js", "");

        let assets = build(&fs, DedupeMode::Rebuild).unwrap();

        let paths: Vec<_> = assets.iter().map(|a| a.file_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/project/src/main.js"),
                PathBuf::from("/project/src/lib/a.js"),
                PathBuf::from("/project/src/b.js"),
                PathBuf::from("/project/src/c.js"),
            ]
        );
        assert_eq!(mapping(&assets[0]), vec![("./lib/a.js", 1), ("./b.js", 2)]);
        assert_eq!(mapping(&assets[1]), vec![("../c.js", 3)]);
        assert_graph_invariants(&assets);
    }

    #[test]
    fn test_shared_dependency_is_rebuilt_per_importer() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/main.js", "dep:./a.js\ndep:./b.js")
            .with_file("/project/src/a.js", "dep:./shared.js")
            .with_file("/project/src/b.js", "dep:./shared.js")
            .with_file("/project/src/shared.js", "");

        let assets = build(&fs, DedupeMode::Rebuild).unwrap();

        assert_eq!(assets.len(), 5);
        assert_eq!(mapping(&assets[1]), vec![("./shared.js", 3)]);
        assert_eq!(mapping(&assets[2]), vec![("./shared.js", 4)]);
        assert_eq!(assets[3].file_path, assets[4].file_path);
        assert_graph_invariants(&assets);
    }

    #[test]
    fn test_repeated_specifier_last_write_wins() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/main.js", "dep:./a.js\ndep:./a.js")
            .with_file("/project/src/a.js", "");

        let assets = build(&fs, DedupeMode::Rebuild).unwrap();

        assert_eq!(assets.len(), 3);
        assert_eq!(assets[0].deps, vec!["./a.js", "./a.js"]);
        assert_eq!(mapping(&assets[0]), vec![("./a.js", 2)]);
        assert_eq!(assets[1].file_path, assets[2].file_path);
        assert_graph_invariants(&assets);
    }

    #[test]
    fn test_by_path_mode_shares_ids() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/main.js", "dep:./a.js\ndep:./b.js\ndep:./a.js")
            .with_file("/project/src/a.js", "dep:./shared.js")
            .with_file("/project/src/b.js", "dep:./shared.js\ndep:./main.js")
            .with_file("/project/src/shared.js", "");

        let assets = build(&fs, DedupeMode::ByPath).unwrap();

        assert_eq!(assets.len(), 4);
        assert_eq!(mapping(&assets[0]), vec![("./a.js", 1), ("./b.js", 2)]);
        assert_eq!(mapping(&assets[1]), vec![("./shared.js", 3)]);
        assert_eq!(mapping(&assets[2]), vec![("./shared.js", 3), ("./main.js", 0)]);
        assert_graph_invariants(&assets);
    }

    #[test]
    fn test_cycles_terminate_in_rebuild_mode() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/main.js", "dep:./a.js")
            .with_file("/project/src/a.js", "dep:./b.js")
            .with_file("/project/src/b.js", "dep:./a.js\ndep:./main.js\ndep:./b.js");

        let assets = build(&fs, DedupeMode::Rebuild).unwrap();

        assert_eq!(assets.len(), 3);
        assert_eq!(
            mapping(&assets[2]),
            vec![("./a.js", 1), ("./main.js", 0), ("./b.js", 2)]
        );
        assert_graph_invariants(&assets);
    }

    #[test]
    fn test_missing_dependency_names_import_site() {
        let fs = MemoryFileSystem::new()
            .with_file("/project/src/main.js", "dep:./a.js")
            .with_file("/project/src/a.js", "dep:./gone.js");

        let err = build(&fs, DedupeMode::Rebuild).unwrap_err();

        match &err {
            BundleError::Import {
                specifier,
                importer,
                ..
            } => {
                assert_eq!(specifier, "./gone.js");
                assert_eq!(importer, Path::new("/project/src/a.js"));
            }
            other => panic!("expected import error, got {other:?}"),
        }
        assert!(matches!(
            err.root_cause(),
            BundleError::AssetRead { path, .. } if path == Path::new("/project/src/gone.js")
        ));
    }

    #[test]
    fn test_unreadable_entry_is_asset_read_error() {
        let fs = MemoryFileSystem::new();
        let err = build(&fs, DedupeMode::Rebuild).unwrap_err();
        assert!(matches!(err, BundleError::AssetRead { .. }));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/b/./c/../d.js")),
            PathBuf::from("/a/b/d.js")
        );
        assert_eq!(
            normalize_path(Path::new("/a/../../b.js")),
            PathBuf::from("/b.js")
        );
    }
}
