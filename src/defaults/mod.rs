//! Default-configuration tree merger.
//!
//! Scans every feature's component archives for default-configuration
//! fragments and groups the parsed top-level elements by the set of features
//! that reach the contributing archive.
mod parser;

pub use parser::{ConfigElement, ADD_IF_MISSING_ATTR, REQUIRE_EXISTING_ATTR};

use crate::catalog::Constituent;
use crate::repository::{VersionRange, DEFAULT_CONFIG_HEADER};
use crate::resolver::Resolver;
use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;

/// One merged output entry: a top-level configuration element plus every
/// feature through which its archive is reachable.
#[derive(Debug)]
pub struct ConfigSection {
    pub providing_features: BTreeSet<String>,
    pub element: ConfigElement,
}

impl ConfigSection {
    /// Sorted, comma-joined provider list as serialized in the output.
    pub fn providing_features_attr(&self) -> String {
        self.providing_features
            .iter()
            .map(String::as_str)
            .collect::<Vec<&str>>()
            .join(",")
    }
}

/// Builds the merged default-configuration sections for the whole projected
/// catalog. Output order: first-contributing-feature iteration order, then
/// archive declaration order within that feature.
///
/// A fragment that fails to parse is logged against its archive and the
/// sweep continues; any such failure makes the overall result an error once
/// every archive has been visited.
pub fn build_default_config_sections(resolver: &mut Resolver<'_>) -> Result<Vec<ConfigSection>> {
    let mut order: Vec<PathBuf> = Vec::new();
    let mut providers: HashMap<PathBuf, BTreeSet<String>> = HashMap::new();

    let catalogs = resolver.catalogs;
    for (feature_name, feature) in &catalogs.projected().features {
        for constituent in &feature.constituents {
            let Constituent::Archive {
                location,
                symbolic_name,
                version_range,
                ..
            } = constituent
            else {
                continue;
            };
            let range = version_range
                .as_deref()
                .and_then(|raw| VersionRange::parse(raw).ok());
            let Some(path) = resolver.repository.resolve(
                location.as_deref(),
                symbolic_name.as_deref(),
                range.as_ref(),
            ) else {
                continue;
            };
            providers
                .entry(path.clone())
                .or_insert_with(|| {
                    order.push(path);
                    BTreeSet::new()
                })
                .insert(feature_name.clone());
        }
    }

    let mut sections = Vec::new();
    let mut failures: Vec<String> = Vec::new();
    for path in &order {
        let Some(providing_features) = providers.get(path) else {
            continue;
        };
        let fragment_ref = match resolver.repository.descriptor(path) {
            Ok(descriptor) => descriptor.get(DEFAULT_CONFIG_HEADER).map(str::to_string),
            // Unreadable descriptors were already reported by the version
            // resolver; they simply contribute no configuration.
            Err(_) => None,
        };
        let Some(fragment_ref) = fragment_ref else {
            continue;
        };
        let fragment_path = match path.parent() {
            Some(parent) => parent.join(&fragment_ref),
            None => PathBuf::from(&fragment_ref),
        };
        let parsed = fs::read_to_string(&fragment_path)
            .map_err(anyhow::Error::from)
            .and_then(|content| parser::parse_fragment(&content));
        match parsed {
            Ok(elements) => {
                for element in elements {
                    sections.push(ConfigSection {
                        providing_features: providing_features.clone(),
                        element,
                    });
                }
            }
            Err(err) => {
                tracing::error!(
                    archive = %path.display(),
                    fragment = %fragment_path.display(),
                    error = %err,
                    "default-configuration fragment failed to parse"
                );
                failures.push(format!("{}: {err:#}", path.display()));
            }
        }
    }

    if failures.is_empty() {
        Ok(sections)
    } else {
        Err(anyhow!(
            "default configuration failed for {} archive(s): {}",
            failures.len(),
            failures.join("; ")
        ))
    }
}
