//! Feature projection builder: combines content resolution, runtime
//! compatibility, and the configuration-schema scan into the per-feature
//! output record.
//!
//! The projection shape follows the feature's visibility class; each shape
//! exposes a different subset of the descriptive fields.
use crate::catalog::{Constituent, FeatureDefinition, Locale, Visibility};
use crate::repository::CONFIG_ELEMENTS_HEADER;
use crate::resolver::{ArchiveAttributes, ContentMask, ResolvedContent, Resolver};
use crate::versions::release_label;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Run-wide switches that shape every projection.
pub struct ProjectionOptions {
    pub locale: Option<Locale>,
    /// Build-maturity switch: beta-marked schema elements are excluded from
    /// GA output.
    pub include_beta: bool,
    /// External switch for runtime-version output.
    pub runtime_versions: bool,
}

/// Output record shape, one per visibility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Feature,
    ProtectedFeature,
    PrivateFeature,
    AutoFeature,
    KernelFeature,
}

impl Shape {
    pub fn for_visibility(visibility: Visibility) -> Shape {
        match visibility {
            Visibility::Public => Shape::Feature,
            Visibility::Protected => Shape::ProtectedFeature,
            Visibility::Private => Shape::PrivateFeature,
            Visibility::Automatic => Shape::AutoFeature,
            Visibility::Kernel => Shape::KernelFeature,
        }
    }

    pub fn element_name(self) -> &'static str {
        match self {
            Shape::Feature => "feature",
            Shape::ProtectedFeature => "protectedFeature",
            Shape::PrivateFeature => "privateFeature",
            Shape::AutoFeature => "autoFeature",
            Shape::KernelFeature => "kernelFeature",
        }
    }
}

/// One classified archive in the output, with its display location.
#[derive(Debug, Clone)]
pub struct ArchiveRef {
    pub location: String,
    pub symbolic_name: Option<String>,
    pub min_runtime: Option<String>,
}

/// One included-feature reference, with the target's short name when the
/// target exists and is public.
#[derive(Debug, Clone)]
pub struct IncludeRef {
    pub symbolic_name: String,
    pub short_name: Option<String>,
    pub tolerates: Vec<String>,
}

/// The final read-only per-feature record. Built fresh each run.
#[derive(Debug)]
pub struct FeatureProjection {
    pub shape: Shape,
    pub symbolic_name: String,
    pub short_name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub singleton: bool,
    pub superseded: bool,
    pub superseded_by: Vec<String>,
    pub provision_capability: Vec<String>,
    pub enables: Vec<String>,
    pub api_archives: Vec<ArchiveRef>,
    pub spi_archives: Vec<ArchiveRef>,
    pub config_elements: Vec<String>,
    pub includes: Vec<IncludeRef>,
    pub compatible_runtimes: Vec<String>,
}

/// One element name discovered by the configuration-schema scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaElement {
    pub name: String,
    pub beta: bool,
    pub parent_alias: Option<String>,
}

pub fn build_projection(
    resolver: &mut Resolver<'_>,
    feature: &FeatureDefinition,
    options: &ProjectionOptions,
) -> FeatureProjection {
    let shape = Shape::for_visibility(feature.visibility);
    let locale = options.locale.as_ref();

    // API/SPI sets are only computed for non-private features.
    let content = match shape {
        Shape::PrivateFeature => ResolvedContent::default(),
        _ => resolver.resolve_content(&feature.symbolic_name, ContentMask::ALL),
    };

    let config_elements = match shape {
        Shape::Feature | Shape::ProtectedFeature | Shape::AutoFeature => {
            let scanned = scan_schema_elements(resolver, &content);
            top_level_element_names(&scanned, options.include_beta)
                .into_iter()
                .collect()
        }
        _ => Vec::new(),
    };

    let compatible_runtimes = if options.runtime_versions {
        resolver
            .compatible_versions(&feature.symbolic_name)
            .into_iter()
            .map(|id| release_label(id).to_string())
            .collect()
    } else {
        Vec::new()
    };

    let descriptive = matches!(
        shape,
        Shape::Feature | Shape::ProtectedFeature | Shape::AutoFeature
    );

    FeatureProjection {
        shape,
        symbolic_name: feature.symbolic_name.clone(),
        short_name: match shape {
            Shape::Feature => feature.short_name.clone(),
            _ => None,
        },
        display_name: descriptive
            .then(|| feature.display_name(locale).map(str::to_string))
            .flatten(),
        description: descriptive
            .then(|| feature.display_description(locale).map(str::to_string))
            .flatten(),
        category: descriptive.then(|| feature.category.clone()).flatten(),
        singleton: feature.singleton,
        superseded: feature.superseded,
        superseded_by: match shape {
            Shape::Feature => feature.superseded_by.clone(),
            _ => Vec::new(),
        },
        provision_capability: match shape {
            Shape::AutoFeature => feature.provision_capability.clone(),
            _ => Vec::new(),
        },
        enables: content.enabled_features.iter().cloned().collect(),
        api_archives: archive_refs(resolver, &content.api_archives),
        spi_archives: archive_refs(resolver, &content.spi_archives),
        config_elements,
        includes: match shape {
            Shape::Feature => include_refs(resolver, feature),
            _ => Vec::new(),
        },
        compatible_runtimes,
    }
}

fn archive_refs(
    resolver: &Resolver<'_>,
    archives: &BTreeMap<PathBuf, ArchiveAttributes>,
) -> Vec<ArchiveRef> {
    archives
        .iter()
        .map(|(path, attributes)| ArchiveRef {
            location: resolver.repository.display_location(path),
            symbolic_name: attributes.symbolic_name.clone(),
            min_runtime: attributes.min_runtime.clone(),
        })
        .collect()
}

fn include_refs(resolver: &Resolver<'_>, feature: &FeatureDefinition) -> Vec<IncludeRef> {
    let mut includes = Vec::new();
    for constituent in &feature.constituents {
        let Constituent::Feature {
            symbolic_name,
            tolerates,
            ..
        } = constituent
        else {
            continue;
        };
        let target = resolver.catalogs.lookup(symbolic_name);
        // The short name is resolved only for existing public targets.
        let short_name = target
            .filter(|target| target.visibility == Visibility::Public)
            .and_then(|target| target.short_name.clone());
        includes.push(IncludeRef {
            symbolic_name: symbolic_name.clone(),
            short_name,
            tolerates: tolerates.clone(),
        });
    }
    includes.sort_by(|a, b| a.symbolic_name.cmp(&b.symbolic_name));
    includes
}

/// Reads `Config-Elements` headers from the feature's direct component
/// archives. Items are comma separated; `;beta=true` and `;parent=<alias>`
/// annotate an item.
fn scan_schema_elements(resolver: &mut Resolver<'_>, content: &ResolvedContent) -> Vec<SchemaElement> {
    let mut elements = Vec::new();
    for (path, _) in &content.direct_archives {
        let Ok(descriptor) = resolver.repository.descriptor(path) else {
            continue;
        };
        let Some(header) = descriptor.get(CONFIG_ELEMENTS_HEADER) else {
            continue;
        };
        elements.extend(parse_config_elements(header));
    }
    elements
}

fn parse_config_elements(header: &str) -> Vec<SchemaElement> {
    let mut elements = Vec::new();
    for item in header.split(',') {
        let mut parts = item.split(';').map(str::trim);
        let Some(name) = parts.next().filter(|name| !name.is_empty()) else {
            continue;
        };
        let mut element = SchemaElement {
            name: name.to_string(),
            beta: false,
            parent_alias: None,
        };
        for part in parts {
            match part.split_once('=') {
                Some(("beta", value)) => element.beta = value.trim() == "true",
                Some(("parent", value)) => element.parent_alias = Some(value.trim().to_string()),
                _ => {}
            }
        }
        elements.push(element);
    }
    elements
}

/// Top-level element names after policy filtering: beta elements are dropped
/// on GA builds, and child-only elements (those with a parent alias) never
/// appear in the top-level list.
fn top_level_element_names(elements: &[SchemaElement], include_beta: bool) -> BTreeSet<String> {
    elements
        .iter()
        .filter(|element| include_beta || !element.beta)
        .filter(|element| element.parent_alias.is_none())
        .map(|element| element.name.clone())
        .collect()
}
