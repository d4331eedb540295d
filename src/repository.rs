//! Component-archive repository: maps a symbolic name + version range to a
//! concrete file and reads descriptor header blocks.
//!
//! Descriptors are read at most once per run; both successful reads and
//! failures are cached so a corrupt archive is reported consistently.
use anyhow::{anyhow, bail, Context, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory under each install root that holds component archives.
pub const MODULE_DIR: &str = "lib";

pub const SYMBOLIC_NAME_HEADER: &str = "Module-SymbolicName";
pub const VERSION_HEADER: &str = "Module-Version";
pub const CAPABILITY_HEADER: &str = "Require-Capability";
pub const DEFAULT_CONFIG_HEADER: &str = "Default-Config";
pub const CONFIG_ELEMENTS_HEADER: &str = "Config-Elements";

/// Dotted numeric version, compared segment-wise. Missing segments are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(Vec<u64>);

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        let segments = input
            .trim()
            .split('.')
            .map(|segment| {
                segment
                    .parse::<u64>()
                    .map_err(|_| anyhow!("invalid version segment '{segment}' in '{input}'"))
            })
            .collect::<Result<Vec<u64>>>()?;
        if segments.is_empty() {
            bail!("empty version");
        }
        Ok(Version(segments))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let left = self.0.get(i).copied().unwrap_or(0);
            let right = other.0.get(i).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Interval form `[1.0,2.0)` / `(1.0,2.0]`, or a bare minimum `1.0`
/// meaning `[1.0,∞)`.
#[derive(Debug, Clone)]
pub struct VersionRange {
    min: Version,
    min_inclusive: bool,
    max: Option<Version>,
    max_inclusive: bool,
}

impl VersionRange {
    pub fn parse(input: &str) -> Result<VersionRange> {
        let input = input.trim();
        let first = input.chars().next().ok_or_else(|| anyhow!("empty version range"))?;
        if first != '[' && first != '(' {
            return Ok(VersionRange {
                min: input.parse()?,
                min_inclusive: true,
                max: None,
                max_inclusive: false,
            });
        }
        let last = input
            .chars()
            .last()
            .filter(|ch| *ch == ']' || *ch == ')')
            .ok_or_else(|| anyhow!("unterminated version range '{input}'"))?;
        let body = &input[1..input.len() - 1];
        let (min, max) = body
            .split_once(',')
            .ok_or_else(|| anyhow!("version range '{input}' has no comma"))?;
        Ok(VersionRange {
            min: min.parse()?,
            min_inclusive: first == '[',
            max: Some(max.parse()?),
            max_inclusive: last == ']',
        })
    }

    pub fn contains(&self, version: &Version) -> bool {
        let above_min = match version.cmp(&self.min) {
            Ordering::Greater => true,
            Ordering::Equal => self.min_inclusive,
            Ordering::Less => false,
        };
        if !above_min {
            return false;
        }
        match &self.max {
            None => true,
            Some(max) => match version.cmp(max) {
                Ordering::Less => true,
                Ordering::Equal => self.max_inclusive,
                Ordering::Greater => false,
            },
        }
    }
}

/// Parsed descriptor header block of a component archive.
#[derive(Debug, Clone)]
pub struct ArchiveDescriptor {
    headers: BTreeMap<String, String>,
}

impl ArchiveDescriptor {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn symbolic_name(&self) -> Option<&str> {
        self.get(SYMBOLIC_NAME_HEADER)
    }

    pub fn version(&self) -> Option<Version> {
        self.get(VERSION_HEADER).and_then(|raw| raw.parse().ok())
    }
}

/// Reads the leading `Key: value` block of an archive, terminated by a blank
/// line or end of file. Lines starting with whitespace continue the previous
/// header value.
fn read_descriptor(path: &Path) -> Result<ArchiveDescriptor> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("read archive descriptor {}", path.display()))?;
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;
    for line in content.lines() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let key = current
                .as_ref()
                .ok_or_else(|| anyhow!("{}: continuation before any header", path.display()))?;
            if let Some(value) = headers.get_mut(key) {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("{}: malformed header line '{line}'", path.display()))?;
        let key = key.trim().to_string();
        headers.insert(key.clone(), value.trim().to_string());
        current = Some(key);
    }
    if headers.is_empty() {
        bail!("{}: no descriptor headers", path.display());
    }
    Ok(ArchiveDescriptor { headers })
}

/// Resolves constituent references to concrete archive files across one or
/// more install roots (the selected product extension's root first).
pub struct Repository {
    roots: Vec<PathBuf>,
    descriptors: HashMap<PathBuf, Result<ArchiveDescriptor, String>>,
}

impl Repository {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Repository {
            roots,
            descriptors: HashMap::new(),
        }
    }

    /// The cached descriptor for `path`, reading it on first access.
    pub fn descriptor(&mut self, path: &Path) -> Result<&ArchiveDescriptor> {
        let entry = self
            .descriptors
            .entry(path.to_path_buf())
            .or_insert_with(|| read_descriptor(path).map_err(|err| format!("{err:#}")));
        match entry {
            Ok(descriptor) => Ok(descriptor),
            Err(message) => Err(anyhow!("{message}")),
        }
    }

    /// Resolves a constituent reference to a file. The declared location wins
    /// when it exists under any root; otherwise the module directories are
    /// scanned for the highest version of the symbolic name within the range.
    pub fn resolve(
        &mut self,
        location: Option<&str>,
        symbolic_name: Option<&str>,
        range: Option<&VersionRange>,
    ) -> Option<PathBuf> {
        if let Some(location) = location {
            for root in &self.roots {
                let candidate = root.join(location);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        let symbolic_name = symbolic_name?;
        let mut best: Option<(Version, PathBuf)> = None;
        for candidate in self.module_files() {
            let Ok(descriptor) = self.descriptor(&candidate) else {
                continue;
            };
            if descriptor.symbolic_name() != Some(symbolic_name) {
                continue;
            }
            let Some(version) = descriptor.version() else {
                continue;
            };
            if let Some(range) = range {
                if !range.contains(&version) {
                    continue;
                }
            }
            let better = match &best {
                Some((best_version, _)) => version > *best_version,
                None => true,
            };
            if better {
                best = Some((version, candidate));
            }
        }
        best.map(|(_, path)| path)
    }

    /// Renders an archive path relative to its install root for output.
    pub fn display_location(&self, path: &Path) -> String {
        for root in &self.roots {
            if let Ok(relative) = path.strip_prefix(root) {
                return relative.display().to_string();
            }
        }
        path.display().to_string()
    }

    fn module_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in &self.roots {
            let dir = root.join(MODULE_DIR);
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }
}
