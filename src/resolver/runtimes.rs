//! Execution-environment resolver: which runtime releases a feature supports.
//!
//! Compatibility is best-effort metadata. Archives whose descriptors cannot
//! be read, dangling feature references, and archives the repository cannot
//! resolve all contribute no constraint rather than failing the run.
use super::Resolver;
use crate::catalog::Constituent;
use crate::repository::{VersionRange, CAPABILITY_HEADER};
use crate::versions::{compatible_releases, full_ladder, parse_capability_header, ReleaseId};
use std::path::{Path, PathBuf};

impl Resolver<'_> {
    /// Ordered set of runtime releases compatible with `symbolic_name` and
    /// everything it transitively pulls in. Memoized per feature and per
    /// archive for the lifetime of the run.
    ///
    /// An empty final intersection is reported as the full, unrestricted
    /// ladder. A feature whose constituents genuinely conflict therefore
    /// claims to run everywhere; this mirrors the long-standing behavior of
    /// the platform provisioner and is deliberately left unchanged.
    pub fn compatible_versions(&mut self, symbolic_name: &str) -> Vec<ReleaseId> {
        if let Some(hit) = self.feature_versions.get(symbolic_name) {
            return hit.clone();
        }
        if !self.versions_in_progress.insert(symbolic_name.to_string()) {
            // Cycle: the re-entered feature contributes no constraint.
            return full_ladder();
        }

        let mut result = full_ladder();
        let catalogs = self.catalogs;
        if let Some(feature) = catalogs.lookup(symbolic_name) {
            for constituent in &feature.constituents {
                match constituent {
                    Constituent::Archive {
                        location,
                        symbolic_name: archive_name,
                        version_range,
                        ..
                    } => {
                        let range = version_range
                            .as_deref()
                            .and_then(|raw| VersionRange::parse(raw).ok());
                        let Some(path) = self.repository.resolve(
                            location.as_deref(),
                            archive_name.as_deref(),
                            range.as_ref(),
                        ) else {
                            continue;
                        };
                        let archive_set = self.archive_compatibility(&path);
                        result.retain(|id| archive_set.contains(id));
                    }
                    Constituent::Feature {
                        symbolic_name: dependency,
                        ..
                    } => {
                        if catalogs.lookup(dependency).is_none() {
                            // Dangling reference: contributes nothing.
                            continue;
                        }
                        let dependency_set = self.compatible_versions(dependency);
                        result.retain(|id| dependency_set.contains(id));
                    }
                }
            }
        }

        if result.is_empty() {
            tracing::debug!(
                feature = symbolic_name,
                "empty runtime intersection, falling back to full ladder"
            );
            result = full_ladder();
        }

        self.versions_in_progress.remove(symbolic_name);
        self.feature_versions
            .insert(symbolic_name.to_string(), result.clone());
        result
    }

    /// Releases compatible with one archive's capability requirements,
    /// memoized per resolved file.
    fn archive_compatibility(&mut self, path: &Path) -> Vec<ReleaseId> {
        if let Some(hit) = self.archive_versions.get(path) {
            return hit.clone();
        }
        let result = self.read_archive_compatibility(path);
        self.archive_versions
            .insert(PathBuf::from(path), result.clone());
        result
    }

    fn read_archive_compatibility(&mut self, path: &Path) -> Vec<ReleaseId> {
        let header = match self.repository.descriptor(path) {
            Ok(descriptor) => descriptor.get(CAPABILITY_HEADER).map(str::to_string),
            Err(err) => {
                // Unreadable descriptor: the archive imposes no constraint.
                tracing::warn!(
                    archive = %path.display(),
                    error = %err,
                    "descriptor unreadable, assuming full runtime compatibility"
                );
                return full_ladder();
            }
        };
        let Some(header) = header else {
            return full_ladder();
        };
        match parse_capability_header(&header) {
            Ok(requirements) => compatible_releases(&requirements),
            Err(err) => {
                tracing::warn!(
                    archive = %path.display(),
                    error = %err,
                    "unparseable capability header, assuming full runtime compatibility"
                );
                full_ladder()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, CatalogSet, FeatureDefinition};
    use crate::repository::{Repository, MODULE_DIR};
    use crate::resolver::Resolver;
    use crate::versions::{full_ladder, release_label};
    use std::fs;
    use std::path::Path;

    fn feature_manifest(symbolic_name: &str, archives: &[&str], features: &[&str]) -> String {
        let mut constituents: Vec<String> = archives
            .iter()
            .map(|location| {
                format!(r#"{{"type": "archive", "location": "lib/{location}"}}"#)
            })
            .collect();
        constituents.extend(features.iter().map(|name| {
            format!(r#"{{"type": "feature", "symbolicName": "{name}"}}"#)
        }));
        format!(
            r#"{{"symbolicName": "{symbolic_name}", "visibility": "private", "constituents": [{}]}}"#,
            constituents.join(", ")
        )
    }

    fn write_archive(root: &Path, file: &str, requirement: Option<&str>) {
        let mut content = format!("Module-SymbolicName: test.{file}\nModule-Version: 1.0\n");
        if let Some(version) = requirement {
            content.push_str(&format!(
                "Require-Capability: runtime.ee; filter:=\"(&(runtime.ee=CoreRuntime)(version={version}))\"\n"
            ));
        }
        fs::write(root.join(MODULE_DIR).join(file), content).expect("write archive");
    }

    fn catalog_from(manifests: &[String]) -> Catalog {
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

    fn labels(ids: Vec<usize>) -> Vec<&'static str> {
        ids.into_iter().map(release_label).collect()
    }

    #[test]
    fn intersects_archive_requirements() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        write_archive(dir.path(), "x.mod", Some("8"));
        write_archive(dir.path(), "y.mod", Some("17"));

        let catalogs = CatalogSet::new(
            catalog_from(&[
                feature_manifest("base", &["x.mod"], &[]),
                feature_manifest("both", &["x.mod", "y.mod"], &[]),
            ]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));

        assert_eq!(labels(resolver.compatible_versions("base")), vec!["8", "11", "17", "21"]);
        assert_eq!(labels(resolver.compatible_versions("both")), vec!["17", "21"]);
    }

    #[test]
    fn nested_feature_constraints_propagate() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        write_archive(dir.path(), "strict.mod", Some("21"));

        let catalogs = CatalogSet::new(
            catalog_from(&[
                feature_manifest("inner", &["strict.mod"], &[]),
                feature_manifest("outer", &[], &["inner"]),
            ]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));
        assert_eq!(labels(resolver.compatible_versions("outer")), vec!["21"]);
    }

    #[test]
    fn disjoint_requirements_fall_back_to_full_ladder() {
        // Locks in the documented fallback: a feature whose archives require
        // strictly disjoint releases reports the full ladder, not the empty
        // set.
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        fs::write(
            dir.path().join(MODULE_DIR).join("only8.mod"),
            "Module-SymbolicName: test.only8\nModule-Version: 1.0\n\
             Require-Capability: runtime.ee; filter:=\"(&(version=8)(!(version=11)))\"\n",
        )
        .expect("write archive");
        fs::write(
            dir.path().join(MODULE_DIR).join("only17.mod"),
            "Module-SymbolicName: test.only17\nModule-Version: 1.0\n\
             Require-Capability: runtime.ee; filter:=\"(&(version=17)(!(version=21)))\"\n",
        )
        .expect("write archive");

        let catalogs = CatalogSet::new(
            catalog_from(&[feature_manifest(
                "conflicted",
                &["only8.mod", "only17.mod"],
                &[],
            )]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));
        assert_eq!(resolver.compatible_versions("conflicted"), full_ladder());
    }

    #[test]
    fn removing_a_constituent_never_shrinks_the_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        write_archive(dir.path(), "x.mod", Some("8"));
        write_archive(dir.path(), "y.mod", Some("17"));

        let catalogs = CatalogSet::new(
            catalog_from(&[
                feature_manifest("with-both", &["x.mod", "y.mod"], &[]),
                feature_manifest("without-y", &["x.mod"], &[]),
            ]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));

        let with_both = resolver.compatible_versions("with-both");
        let without_y = resolver.compatible_versions("without-y");
        assert!(with_both.iter().all(|id| without_y.contains(id)));
    }

    #[test]
    fn unreadable_archive_and_dangling_feature_contribute_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(MODULE_DIR)).expect("mkdir");
        // Archive file exists but has no descriptor headers.
        fs::write(dir.path().join(MODULE_DIR).join("empty.mod"), "\n").expect("write archive");

        let catalogs = CatalogSet::new(
            catalog_from(&[feature_manifest("tolerant", &["empty.mod"], &["no.such.feature"])]),
            None,
        );
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));
        assert_eq!(resolver.compatible_versions("tolerant"), full_ladder());
    }

    #[test]
    fn cyclic_references_terminate() {
        let catalogs = CatalogSet::new(
            catalog_from(&[
                feature_manifest("a", &[], &["b"]),
                feature_manifest("b", &[], &["a"]),
            ]),
            None,
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let mut resolver = Resolver::new(&catalogs, Repository::new(vec![dir.path().to_path_buf()]));
        assert_eq!(resolver.compatible_versions("a"), full_ladder());
    }
}
