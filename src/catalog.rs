//! Feature catalog: manifest types, the catalog loader, and the
//! product-extension registry.
//!
//! The catalog is immutable for the duration of a run. Features are keyed by
//! symbolic name in a `BTreeMap` so every downstream iteration is
//! deterministic regardless of manifest discovery order.
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under an install root holding feature manifests.
pub const FEATURE_DIR: &str = "features";

/// Registry file at the install root mapping extension names to locations.
pub const EXTENSION_REGISTRY: &str = "extensions.json";

/// Visibility class of a feature. Drives both the projection shape and
/// whether traversal descends through the feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Protected,
    Private,
    Automatic,
    Kernel,
}

/// Externally-visible-surface classification of a constituent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    #[default]
    None,
    Api,
    Spi,
}

/// A typed pointer from a feature to another feature or to a component
/// archive.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Constituent {
    #[serde(rename_all = "camelCase")]
    Feature {
        symbolic_name: String,
        #[serde(default)]
        tolerates: Vec<String>,
        #[serde(default)]
        repository_type: Option<String>,
        #[serde(default)]
        surface: Surface,
    },
    #[serde(rename_all = "camelCase")]
    Archive {
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        symbolic_name: Option<String>,
        #[serde(default)]
        version_range: Option<String>,
        #[serde(default)]
        repository_type: Option<String>,
        #[serde(default)]
        surface: Surface,
        #[serde(default)]
        min_runtime: Option<String>,
    },
}

/// Locale-specific overrides for the descriptive header fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalizedHeaders {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One feature manifest, loaded once per run and immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDefinition {
    pub symbolic_name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    pub visibility: Visibility,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub superseded: bool,
    #[serde(default)]
    pub superseded_by: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub provision_capability: Vec<String>,
    #[serde(default)]
    pub constituents: Vec<Constituent>,
    #[serde(default)]
    pub l10n: BTreeMap<String, LocalizedHeaders>,
}

impl FeatureDefinition {
    /// Header `name`, with locale override and language-only fallback.
    pub fn display_name(&self, locale: Option<&Locale>) -> Option<&str> {
        self.localized(locale, |headers| headers.name.as_deref())
            .or(self.name.as_deref())
    }

    pub fn display_description(&self, locale: Option<&Locale>) -> Option<&str> {
        self.localized(locale, |headers| headers.description.as_deref())
            .or(self.description.as_deref())
    }

    fn localized<'a>(
        &'a self,
        locale: Option<&Locale>,
        field: impl Fn(&'a LocalizedHeaders) -> Option<&'a str>,
    ) -> Option<&'a str> {
        let locale = locale?;
        if let Some(headers) = self.l10n.get(&locale.tag()) {
            if let Some(value) = field(headers) {
                return Some(value);
            }
        }
        self.l10n.get(&locale.language).and_then(field)
    }
}

/// Parsed `lang[_territory]` locale tag.
#[derive(Debug, Clone)]
pub struct Locale {
    pub language: String,
    pub territory: Option<String>,
}

impl Locale {
    pub fn parse(input: &str) -> Result<Locale> {
        let pattern = Regex::new(r"^([a-z]{2,3})(?:_([A-Za-z0-9]{2,8}))?$")
            .map_err(|err| anyhow!("locale pattern: {err}"))?;
        let caps = pattern
            .captures(input)
            .ok_or_else(|| anyhow!("invalid locale '{input}', expected lang[_territory]"))?;
        Ok(Locale {
            language: caps[1].to_string(),
            territory: caps.get(2).map(|m| m.as_str().to_string()),
        })
    }

    pub fn tag(&self) -> String {
        match &self.territory {
            Some(territory) => format!("{}_{territory}", self.language),
            None => self.language.clone(),
        }
    }
}

/// Immutable feature catalog keyed by symbolic name.
#[derive(Debug, Default)]
pub struct Catalog {
    pub features: BTreeMap<String, FeatureDefinition>,
}

impl Catalog {
    /// Loads every `*.json` manifest under `root/features`. A missing
    /// directory is an empty catalog; an unreadable manifest is fatal.
    pub fn load(root: &Path) -> Result<Catalog> {
        let dir = root.join(FEATURE_DIR);
        let mut features = BTreeMap::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => {
                tracing::warn!(dir = %dir.display(), "feature directory missing, catalog is empty");
                return Ok(Catalog { features });
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("read feature manifest {}", path.display()))?;
            let definition: FeatureDefinition = serde_json::from_str(&content)
                .with_context(|| format!("parse feature manifest {}", path.display()))?;
            features.insert(definition.symbolic_name.clone(), definition);
        }
        tracing::debug!(count = features.len(), dir = %dir.display(), "catalog loaded");
        Ok(Catalog { features })
    }

    pub fn get(&self, symbolic_name: &str) -> Option<&FeatureDefinition> {
        self.features.get(symbolic_name)
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// The catalog(s) in play for one run: the core catalog, plus the selected
/// product extension's catalog when one was requested. Lookups consult the
/// extension first so it can shadow core names; projections cover the
/// extension's features when one is selected, the core's otherwise.
#[derive(Debug)]
pub struct CatalogSet {
    core: Catalog,
    extension: Option<Catalog>,
}

impl CatalogSet {
    pub fn new(core: Catalog, extension: Option<Catalog>) -> Self {
        CatalogSet { core, extension }
    }

    pub fn lookup(&self, symbolic_name: &str) -> Option<&FeatureDefinition> {
        self.extension
            .as_ref()
            .and_then(|catalog| catalog.get(symbolic_name))
            .or_else(|| self.core.get(symbolic_name))
    }

    /// The catalog whose features this run projects.
    pub fn projected(&self) -> &Catalog {
        self.extension.as_ref().unwrap_or(&self.core)
    }
}

/// Product-extension resolution failures, each with its own process exit
/// code.
#[derive(Debug)]
pub enum ExtensionError {
    NotFound(String),
    NotDefined(String),
    NoFeaturesFound(String),
}

impl fmt::Display for ExtensionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionError::NotFound(name) => {
                write!(f, "product extension '{name}' is not registered")
            }
            ExtensionError::NotDefined(name) => {
                write!(f, "product extension '{name}' has no location defined")
            }
            ExtensionError::NoFeaturesFound(name) => {
                write!(f, "product extension '{name}' contributes no features")
            }
        }
    }
}

impl std::error::Error for ExtensionError {}

#[derive(Debug, Deserialize)]
struct ExtensionEntry {
    #[serde(default)]
    location: Option<String>,
}

/// Resolves a registered product extension to its install root.
pub fn extension_root(install_root: &Path, name: &str) -> Result<PathBuf> {
    let registry_path = install_root.join(EXTENSION_REGISTRY);
    let entries: BTreeMap<String, ExtensionEntry> = match fs::read_to_string(&registry_path) {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("parse extension registry {}", registry_path.display()))?,
        Err(_) => BTreeMap::new(),
    };
    let entry = entries
        .get(name)
        .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
    let location = entry
        .location
        .as_deref()
        .filter(|location| !location.is_empty())
        .ok_or_else(|| ExtensionError::NotDefined(name.to_string()))?;
    Ok(install_root.join(location))
}

/// Loads the catalog set for a run, including the product extension when one
/// was requested.
pub fn load_catalogs(install_root: &Path, product_extension: Option<&str>) -> Result<CatalogSet> {
    let core = Catalog::load(install_root)?;
    let extension = match product_extension {
        None => None,
        Some(name) => {
            let root = extension_root(install_root, name)?;
            let catalog = Catalog::load(&root)?;
            if catalog.is_empty() {
                return Err(ExtensionError::NoFeaturesFound(name.to_string()).into());
            }
            Some(catalog)
        }
    };
    Ok(CatalogSet::new(core, extension))
}
