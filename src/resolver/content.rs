//! Visibility-aware content resolver.
//!
//! Walks a feature's constituents, recording enabled public features and
//! classifying externally-visible archives. Public features terminate the
//! descent; every other visibility is traversed transparently.
use super::Resolver;
use crate::catalog::{Constituent, Surface, Visibility};
use crate::repository::VersionRange;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

/// Which externally-visible archive classifications the caller wants
/// collected. Narrowed along the walk by each constituent's own
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentMask {
    pub api: bool,
    pub spi: bool,
}

impl ContentMask {
    pub const ALL: ContentMask = ContentMask { api: true, spi: true };
    pub const NONE: ContentMask = ContentMask { api: false, spi: false };

    /// The mask active below a constituent with the given classification.
    /// An unclassified constituent propagates the mask unchanged; an API or
    /// SPI constituent restricts the subtree to that classification.
    fn narrowed(self, surface: Surface) -> ContentMask {
        match surface {
            Surface::None => self,
            Surface::Api => ContentMask { api: self.api, spi: false },
            Surface::Spi => ContentMask { api: false, spi: self.spi },
        }
    }
}

/// Auxiliary attributes kept per collected archive, retained from the first
/// path that reached it.
#[derive(Debug, Clone)]
pub struct ArchiveAttributes {
    pub symbolic_name: Option<String>,
    pub min_runtime: Option<String>,
}

/// Result of one content-resolution walk.
#[derive(Debug, Default)]
pub struct ResolvedContent {
    /// Public features reachable through non-public intermediates. Sorted.
    pub enabled_features: BTreeSet<String>,
    /// API-classified archives keyed by resolved file. Sorted by path.
    pub api_archives: BTreeMap<PathBuf, ArchiveAttributes>,
    /// SPI-classified archives keyed by resolved file. Sorted by path.
    pub spi_archives: BTreeMap<PathBuf, ArchiveAttributes>,
    /// The root feature's own archive constituents, in declaration order,
    /// deduplicated by resolved file. Classification is ignored here.
    pub direct_archives: Vec<(PathBuf, ArchiveAttributes)>,
}

impl Resolver<'_> {
    /// Resolves the content of `symbolic_name`. Dangling references are
    /// skipped; revisited features are walked once per root.
    pub fn resolve_content(&mut self, symbolic_name: &str, mask: ContentMask) -> ResolvedContent {
        let mut content = ResolvedContent::default();
        let catalogs = self.catalogs;
        let Some(root) = catalogs.lookup(symbolic_name) else {
            return content;
        };
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(symbolic_name.to_string());
        self.walk(root.constituents.as_slice(), mask, true, &mut content, &mut visited);
        content
    }

    fn walk(
        &mut self,
        constituents: &[Constituent],
        mask: ContentMask,
        at_root: bool,
        content: &mut ResolvedContent,
        visited: &mut HashSet<String>,
    ) {
        let catalogs = self.catalogs;
        for constituent in constituents {
            match constituent {
                Constituent::Archive {
                    location,
                    symbolic_name,
                    version_range,
                    surface,
                    min_runtime,
                    ..
                } => {
                    let range = version_range
                        .as_deref()
                        .and_then(|raw| VersionRange::parse(raw).ok());
                    let Some(path) = self.repository.resolve(
                        location.as_deref(),
                        symbolic_name.as_deref(),
                        range.as_ref(),
                    ) else {
                        tracing::debug!(
                            symbolic_name = symbolic_name.as_deref().unwrap_or(""),
                            location = location.as_deref().unwrap_or(""),
                            "archive constituent did not resolve"
                        );
                        continue;
                    };
                    let attributes = ArchiveAttributes {
                        symbolic_name: symbolic_name.clone(),
                        min_runtime: min_runtime.clone(),
                    };
                    if at_root && !content.direct_archives.iter().any(|(seen, _)| *seen == path) {
                        content.direct_archives.push((path.clone(), attributes.clone()));
                    }
                    let target = match surface {
                        Surface::Api if mask.api => &mut content.api_archives,
                        Surface::Spi if mask.spi => &mut content.spi_archives,
                        _ => continue,
                    };
                    // First observation wins for auxiliary attributes.
                    target.entry(path).or_insert(attributes);
                }
                Constituent::Feature {
                    symbolic_name,
                    surface,
                    ..
                } => {
                    let Some(dependency) = catalogs.lookup(symbolic_name) else {
                        tracing::debug!(%symbolic_name, "dangling feature reference skipped");
                        continue;
                    };
                    if dependency.visibility == Visibility::Public {
                        // Enabled, not descended into: a public feature gets
                        // its own top-level projection.
                        content.enabled_features.insert(symbolic_name.clone());
                        continue;
                    }
                    if !visited.insert(symbolic_name.clone()) {
                        continue;
                    }
                    let narrowed = mask.narrowed(*surface);
                    self.walk(
                        dependency.constituents.as_slice(),
                        narrowed,
                        false,
                        content,
                        visited,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogSet, FeatureDefinition};
    use crate::repository::{Repository, MODULE_DIR};
    use std::fs;
    use std::path::Path;

    fn write_archive(root: &Path, file: &str) {
        fs::write(
            root.join(MODULE_DIR).join(file),
            format!("Module-SymbolicName: test.{file}\nModule-Version: 1.0\n"),
        )
        .expect("write archive");
    }

    fn catalog_from(manifests: &[&str]) -> Catalog {
        let mut catalog = Catalog::default();
        for manifest in manifests {
            let definition: FeatureDefinition =
                serde_json::from_str(manifest).expect("manifest parses");
            catalog
                .features
                .insert(definition.symbolic_name.clone(), definition);
        }
        catalog
    }

    fn enabled(content: &ResolvedContent) -> Vec<&str> {
        content.enabled_features.iter().map(String::as_str).collect()
    }

    #[test]
    fn public_features_terminate_the_walk() {
        // a(public) -> b(private) -> {c(public), d(protected) -> e(public)}
        // c's own children must not leak into a's closure.
        let catalogs = CatalogSet::new(
            catalog_from(&[
                r#"{"symbolicName": "a", "visibility": "public", "constituents": [
                    {"type": "feature", "symbolicName": "b"}]}"#,
                r#"{"symbolicName": "b", "visibility": "private", "constituents": [
                    {"type": "feature", "symbolicName": "c"},
                    {"type": "feature", "symbolicName": "d"}]}"#,
                r#"{"symbolicName": "c", "visibility": "public", "constituents": [
                    {"type": "feature", "symbolicName": "hidden"}]}"#,
                r#"{"symbolicName": "d", "visibility": "protected", "constituents": [
                    {"type": "feature", "symbolicName": "e"}]}"#,
                r#"{"symbolicName": "e", "visibility": "public"}"#,
                r#"{"symbolicName": "hidden", "visibility": "public"}"#,
            ]),
            None,
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));

        let content = resolver.resolve_content("a", ContentMask::ALL);
        assert_eq!(enabled(&content), vec!["c", "e"]);
    }

    #[test]
    fn mask_narrows_along_classified_feature_refs() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        write_archive(dir.path(), "api.mod");
        write_archive(dir.path(), "spi.mod");

        let catalogs = CatalogSet::new(
            catalog_from(&[
                r#"{"symbolicName": "root", "visibility": "public", "constituents": [
                    {"type": "feature", "symbolicName": "inner", "surface": "api"}]}"#,
                r#"{"symbolicName": "inner", "visibility": "private", "constituents": [
                    {"type": "archive", "location": "lib/api.mod", "surface": "api"},
                    {"type": "archive", "location": "lib/spi.mod", "surface": "spi"}]}"#,
            ]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));

        // The SPI archive sits below an API-classified feature ref, so it
        // contributes nothing even though the caller asked for both.
        let content = resolver.resolve_content("root", ContentMask::ALL);
        assert_eq!(content.api_archives.len(), 1);
        assert!(content.spi_archives.is_empty());

        // A caller asking only for SPI gets nothing at all down that path.
        let spi_only = resolver.resolve_content("root", ContentMask { api: false, spi: true });
        assert!(spi_only.api_archives.is_empty());
        assert!(spi_only.spi_archives.is_empty());
    }

    #[test]
    fn root_direct_archives_are_collected_regardless_of_surface() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        write_archive(dir.path(), "plain.mod");
        write_archive(dir.path(), "api.mod");

        let catalogs = CatalogSet::new(
            catalog_from(&[
                r#"{"symbolicName": "root", "visibility": "public", "constituents": [
                    {"type": "archive", "location": "lib/plain.mod"},
                    {"type": "archive", "location": "lib/api.mod", "surface": "api"}]}"#,
            ]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));

        let content = resolver.resolve_content("root", ContentMask::NONE);
        let direct: Vec<String> = content
            .direct_archives
            .iter()
            .map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(direct, vec!["plain.mod", "api.mod"]);
        // NONE mask: nothing classified.
        assert!(content.api_archives.is_empty());
        assert!(content.spi_archives.is_empty());
    }

    #[test]
    fn duplicate_paths_keep_first_observed_attributes() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        write_archive(dir.path(), "shared.mod");

        let catalogs = CatalogSet::new(
            catalog_from(&[
                r#"{"symbolicName": "root", "visibility": "public", "constituents": [
                    {"type": "feature", "symbolicName": "first"},
                    {"type": "feature", "symbolicName": "second"}]}"#,
                r#"{"symbolicName": "first", "visibility": "private", "constituents": [
                    {"type": "archive", "location": "lib/shared.mod", "surface": "api", "minRuntime": "11"}]}"#,
                r#"{"symbolicName": "second", "visibility": "private", "constituents": [
                    {"type": "archive", "location": "lib/shared.mod", "surface": "api", "minRuntime": "17"}]}"#,
            ]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));

        let content = resolver.resolve_content("root", ContentMask::ALL);
        assert_eq!(content.api_archives.len(), 1);
        let attributes = content.api_archives.values().next().expect("one entry");
        assert_eq!(attributes.min_runtime.as_deref(), Some("11"));
    }

    #[test]
    fn dangling_and_cyclic_references_are_tolerated() {
        let catalogs = CatalogSet::new(
            catalog_from(&[
                r#"{"symbolicName": "a", "visibility": "public", "constituents": [
                    {"type": "feature", "symbolicName": "gone"},
                    {"type": "feature", "symbolicName": "b"}]}"#,
                r#"{"symbolicName": "b", "visibility": "private", "constituents": [
                    {"type": "feature", "symbolicName": "a2"}]}"#,
                r#"{"symbolicName": "a2", "visibility": "private", "constituents": [
                    {"type": "feature", "symbolicName": "b"},
                    {"type": "feature", "symbolicName": "pub"}]}"#,
                r#"{"symbolicName": "pub", "visibility": "public"}"#,
            ]),
            None,
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));

        let content = resolver.resolve_content("a", ContentMask::ALL);
        assert_eq!(enabled(&content), vec!["pub"]);
    }
}
