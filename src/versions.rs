//! Runtime-release ladder and capability-requirement matching.
//!
//! The ladder is static configuration data: each release lists the ordered
//! alias chain of versions it satisfies, so a requirement pinned to an older
//! version matches every newer release.
use anyhow::{anyhow, bail, Result};
use regex::Regex;
use std::collections::BTreeMap;

/// The only capability namespace the tool interprets.
pub const EE_NAMESPACE: &str = "runtime.ee";

/// Platform name every ladder entry answers to in filter matching.
pub const PLATFORM_NAME: &str = "CoreRuntime";

/// One supported platform-runtime release.
pub struct RuntimeRelease {
    /// Canonical label used in output documents.
    pub label: &'static str,
    /// Versions this release satisfies, oldest first. Includes the release's
    /// own version as the final entry.
    pub aliases: &'static [&'static str],
}

/// Supported releases, oldest first. Newer releases are backward compatible
/// and declare every older alias.
pub const LADDER: &[RuntimeRelease] = &[
    RuntimeRelease {
        label: "7",
        aliases: &["6", "7"],
    },
    RuntimeRelease {
        label: "8",
        aliases: &["6", "7", "8"],
    },
    RuntimeRelease {
        label: "11",
        aliases: &["6", "7", "8", "11"],
    },
    RuntimeRelease {
        label: "17",
        aliases: &["6", "7", "8", "11", "17"],
    },
    RuntimeRelease {
        label: "21",
        aliases: &["6", "7", "8", "11", "17", "21"],
    },
];

/// Index into [`LADDER`].
pub type ReleaseId = usize;

/// Every release, in ladder order. The maximal compatible set.
pub fn full_ladder() -> Vec<ReleaseId> {
    (0..LADDER.len()).collect()
}

pub fn release_label(id: ReleaseId) -> &'static str {
    LADDER.get(id).map(|release| release.label).unwrap_or("")
}

fn release_properties(release: &RuntimeRelease) -> BTreeMap<&'static str, Vec<&'static str>> {
    let mut props = BTreeMap::new();
    props.insert(EE_NAMESPACE, vec![PLATFORM_NAME]);
    props.insert("version", release.aliases.to_vec());
    props
}

/// One clause of a `Require-Capability` header: a namespace plus a filter
/// predicate over the provider's property set.
#[derive(Debug)]
pub struct CapabilityRequirement {
    pub namespace: String,
    pub filter: Option<Filter>,
}

impl CapabilityRequirement {
    /// Whether this requirement is in the interpreted namespace.
    pub fn is_execution_environment(&self) -> bool {
        self.namespace == EE_NAMESPACE
    }

    pub fn matches_release(&self, release: &RuntimeRelease) -> bool {
        match &self.filter {
            Some(filter) => filter.matches(&release_properties(release)),
            // A bare namespace requirement constrains nothing.
            None => true,
        }
    }
}

/// Releases compatible with all interpreted requirements, in ladder order.
/// Requirements in other namespaces are ignored; no interpreted requirement
/// means the full ladder.
pub fn compatible_releases(requirements: &[CapabilityRequirement]) -> Vec<ReleaseId> {
    let interpreted: Vec<&CapabilityRequirement> = requirements
        .iter()
        .filter(|req| req.is_execution_environment())
        .collect();
    if interpreted.is_empty() {
        return full_ladder();
    }
    LADDER
        .iter()
        .enumerate()
        .filter(|(_, release)| interpreted.iter().all(|req| req.matches_release(release)))
        .map(|(id, _)| id)
        .collect()
}

/// Parses a `Require-Capability` header value. Clauses are comma separated;
/// each clause is `namespace` optionally followed by `; filter:="..."`.
/// Unrecognized directives within a clause are ignored.
pub fn parse_capability_header(value: &str) -> Result<Vec<CapabilityRequirement>> {
    let filter_directive = Regex::new(r#"filter\s*:?=\s*"([^"]*)""#)
        .map_err(|err| anyhow!("filter directive pattern: {err}"))?;
    let mut requirements = Vec::new();
    for clause in split_clauses(value) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let (namespace, rest) = match clause.split_once(';') {
            Some((namespace, rest)) => (namespace.trim(), rest),
            None => (clause, ""),
        };
        let filter = match filter_directive.captures(rest) {
            Some(caps) => Some(Filter::parse(&caps[1])?),
            None => None,
        };
        requirements.push(CapabilityRequirement {
            namespace: namespace.to_string(),
            filter,
        });
    }
    Ok(requirements)
}

/// Splits a header value on commas that sit outside quoted directive values.
fn split_clauses(value: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in value.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                clauses.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    clauses.push(current);
    clauses
}

/// LDAP-style filter predicate over a multi-valued property set.
/// Supported forms: `(key=value)`, `(&...)`, `(|...)`, `(!...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn parse(input: &str) -> Result<Filter> {
        let mut cursor = FilterCursor {
            chars: input.chars().collect(),
            pos: 0,
        };
        let filter = cursor.parse_filter()?;
        cursor.skip_whitespace();
        if !cursor.at_end() {
            bail!("trailing input after filter: {input}");
        }
        Ok(filter)
    }

    /// Evaluates against a property set where each key may carry several
    /// values (the alias chain). An equality term matches if any value does.
    pub fn matches(&self, props: &BTreeMap<&str, Vec<&str>>) -> bool {
        match self {
            Filter::Eq(key, value) => props
                .get(key.as_str())
                .is_some_and(|values| values.iter().any(|candidate| *candidate == value.as_str())),
            Filter::And(terms) => terms.iter().all(|term| term.matches(props)),
            Filter::Or(terms) => terms.iter().any(|term| term.matches(props)),
            Filter::Not(term) => !term.matches(props),
        }
    }
}

struct FilterCursor {
    chars: Vec<char>,
    pos: usize,
}

impl FilterCursor {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.advance() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => bail!("expected '{expected}' at position {}, found '{ch}'", self.pos),
            None => bail!("expected '{expected}', found end of filter"),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        self.skip_whitespace();
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_operands()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_operands()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_equality()?,
            None => bail!("unterminated filter"),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_operands(&mut self) -> Result<Vec<Filter>> {
        let mut operands = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('(') => operands.push(self.parse_filter()?),
                _ => break,
            }
        }
        if operands.is_empty() {
            bail!("composite filter with no operands");
        }
        Ok(operands)
    }

    fn parse_equality(&mut self) -> Result<Filter> {
        let mut key = String::new();
        while let Some(ch) = self.peek() {
            if ch == '=' || ch == ')' {
                break;
            }
            key.push(ch);
            self.pos += 1;
        }
        self.expect('=')?;
        let mut value = String::new();
        while let Some(ch) = self.peek() {
            if ch == ')' {
                break;
            }
            value.push(ch);
            self.pos += 1;
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            bail!("equality term with empty key");
        }
        Ok(Filter::Eq(key, value.trim().to_string()))
    }
}
