//! Path-scoped access rules and their evaluation.
//!
//! A rule grants (or withholds) read and write access to the subtree rooted
//! at its path. Read rules additionally make the directory exactly one level
//! above their path visible, so a client can browse down into the granted
//! subtree without seeing anything higher up. Write rules never reach above
//! their own path.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::path::{Relation, SharePath};

/// Name of the principal used for unauthenticated access.
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    Write,
}

/// A read/write grant scoped to a path and its descendants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPathRule", into = "RawPathRule")]
pub struct PathRule {
    path: SharePath,
    read: bool,
    write: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawPathRule {
    path: String,
    #[serde(default)]
    read: bool,
    #[serde(default)]
    write: bool,
}

impl PathRule {
    /// Build a rule. The path must already be canonical and write access
    /// requires read access.
    pub fn new(path: &str, read: bool, write: bool) -> Result<Self, ConfigError> {
        if path.is_empty() {
            return Err(ConfigError::EmptyRulePath);
        }
        if !SharePath::is_canonical(path) {
            return Err(ConfigError::UncleanRulePath(path.to_string()));
        }
        if write && !read {
            return Err(ConfigError::WriteWithoutRead(path.to_string()));
        }
        Ok(Self {
            path: SharePath::parse(path),
            read,
            write,
        })
    }

    pub fn path(&self) -> &SharePath {
        &self.path
    }

    pub fn read(&self) -> bool {
        self.read
    }

    pub fn write(&self) -> bool {
        self.write
    }

    pub fn allows(&self, access: AccessLevel) -> bool {
        match access {
            AccessLevel::Read => self.read,
            AccessLevel::Write => self.write,
        }
    }

    /// Whether this rule has a say on `access` to `path`. Only a rule that
    /// grants read exposes its parent directory.
    fn applies_to(&self, path: &SharePath, access: AccessLevel) -> bool {
        match self.path.locate(path) {
            Relation::Within(_) => true,
            Relation::Parent => access == AccessLevel::Read && self.read,
            Relation::Unrelated => false,
        }
    }
}

impl TryFrom<RawPathRule> for PathRule {
    type Error = ConfigError;

    fn try_from(raw: RawPathRule) -> Result<Self, Self::Error> {
        PathRule::new(&raw.path, raw.read, raw.write)
    }
}

impl From<PathRule> for RawPathRule {
    fn from(rule: PathRule) -> Self {
        RawPathRule {
            path: rule.path.to_string(),
            read: rule.read,
            write: rule.write,
        }
    }
}

/// Outcome of evaluating one rule list for one path and access level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
    /// No rule in the list covers the path.
    NotApplicable,
}

impl Decision {
    /// Fall through to `next` only when this list had nothing to say.
    pub fn or_else(self, next: impl FnOnce() -> Decision) -> Decision {
        match self {
            Decision::NotApplicable => next(),
            decided => decided,
        }
    }

    /// Default-deny view of the decision.
    pub fn is_allowed(self) -> bool {
        self == Decision::Allowed
    }
}

/// Validated list of rules with unique paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PathRule>", into = "Vec<PathRule>")]
pub struct RuleSet {
    rules: Vec<PathRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<PathRule>) -> Result<Self, ConfigError> {
        for (i, rule) in rules.iter().enumerate() {
            if rules[..i].iter().any(|other| other.path == rule.path) {
                return Err(ConfigError::DuplicateRule(rule.path.to_string()));
            }
        }
        Ok(Self { rules })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate this list alone.
    ///
    /// Among the applicable rules the one with the longest path wins. Rule
    /// paths are unique, so rules at or above `path` never tie with each
    /// other; rules exposing `path` as their parent are one level deeper than
    /// any of those, and they all grant read.
    pub fn decide(&self, path: &SharePath, access: AccessLevel) -> Decision {
        let winner = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(path, access))
            .max_by_key(|rule| rule.path.depth());
        match winner {
            None => Decision::NotApplicable,
            Some(rule) if rule.allows(access) => Decision::Allowed,
            Some(_) => Decision::Denied,
        }
    }
}

impl TryFrom<Vec<PathRule>> for RuleSet {
    type Error = ConfigError;

    fn try_from(rules: Vec<PathRule>) -> Result<Self, Self::Error> {
        RuleSet::new(rules)
    }
}

impl From<RuleSet> for Vec<PathRule> {
    fn from(set: RuleSet) -> Self {
        set.rules
    }
}

/// An authenticated caller. Built by whoever verified the identity and never
/// modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    name: String,
    admin: bool,
    rules: RuleSet,
}

/// How a principal is to be authorized.
#[derive(Clone, Copy, Debug)]
pub enum Clearance<'a> {
    /// Skip evaluation entirely.
    Administrator,
    /// Evaluate these rules, then the defaults.
    Restricted(&'a RuleSet),
}

impl Principal {
    pub fn user(name: impl Into<String>, rules: RuleSet) -> Self {
        Self {
            name: name.into(),
            admin: false,
            rules,
        }
    }

    pub fn administrator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: true,
            rules: RuleSet::empty(),
        }
    }

    pub fn anonymous(rules: RuleSet) -> Self {
        Self::user(ANONYMOUS_USER, rules)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_administrator(&self) -> bool {
        self.admin
    }

    pub fn is_anonymous(&self) -> bool {
        self.name == ANONYMOUS_USER
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn clearance(&self) -> Clearance<'_> {
        if self.admin {
            Clearance::Administrator
        } else {
            Clearance::Restricted(&self.rules)
        }
    }
}

/// Process-wide evaluation context: the default rules shared by every
/// non-administrator.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    defaults: RuleSet,
}

impl AccessPolicy {
    pub fn new(defaults: RuleSet) -> Self {
        Self { defaults }
    }

    /// Personal rules first, defaults only where the personal rules are
    /// silent. Administrators never reach this point: see [`Clearance`].
    pub fn evaluate(&self, rules: &RuleSet, path: &SharePath, access: AccessLevel) -> Decision {
        rules
            .decide(path, access)
            .or_else(|| self.defaults.decide(path, access))
    }

    pub fn permits(&self, principal: &Principal, path: &SharePath, access: AccessLevel) -> bool {
        match principal.clearance() {
            Clearance::Administrator => true,
            Clearance::Restricted(rules) => self.evaluate(rules, path, access).is_allowed(),
        }
    }
}
