//! Canonical share paths.
//!
//! Every path handed to the storage layer is reduced to an absolute, clean
//! form before it is evaluated or resolved: `.` segments and empty segments
//! are dropped and `..` pops one segment, clamped at the root. A `SharePath`
//! therefore can never point outside the tree it is resolved against.

use std::fmt;
use std::path::{Path, PathBuf};

/// Absolute, canonical path inside a share.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharePath {
    segments: Vec<String>,
}

/// Position of a queried path relative to the subtree rooted at another path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// At or below the subtree root, `n` segments deeper.
    Within(usize),
    /// Exactly one level above the subtree root.
    Parent,
    Unrelated,
}

impl SharePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Canonicalise an arbitrary caller-supplied path. Relative input is
    /// treated as relative to the root.
    pub fn parse(raw: &str) -> Self {
        let mut path = Self::root();
        path.push_raw(raw);
        path
    }

    /// True when `raw` is already written in canonical form.
    pub fn is_canonical(raw: &str) -> bool {
        raw.starts_with('/') && Self::parse(raw).to_string() == raw
    }

    fn push_raw(&mut self, raw: &str) {
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    self.segments.pop();
                }
                name => self.segments.push(name.to_string()),
            }
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<SharePath> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Append `name`, which goes through the same canonicalisation.
    pub fn join(&self, name: &str) -> SharePath {
        let mut path = self.clone();
        path.push_raw(name);
        path
    }

    pub fn starts_with(&self, base: &SharePath) -> bool {
        self.segments.starts_with(&base.segments)
    }

    /// Where `query` lies relative to the subtree rooted at `self`.
    pub fn locate(&self, query: &SharePath) -> Relation {
        if query.starts_with(self) {
            Relation::Within(query.depth() - self.depth())
        } else if self.depth() == query.depth() + 1 && self.starts_with(query) {
            Relation::Parent
        } else {
            Relation::Unrelated
        }
    }

    /// `self` expressed relative to `base` (`a/b`), `None` when `self` is
    /// not inside `base`. The empty string means `self == base`.
    pub fn relative_to(&self, base: &SharePath) -> Option<String> {
        self.segments
            .strip_prefix(base.segments.as_slice())
            .map(|rest| rest.join("/"))
    }

    /// Resolve against a host directory.
    pub fn to_host_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.segments);
        path
    }
}

impl fmt::Display for SharePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for SharePath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_resolves_dots_and_separators() {
        assert_eq!(SharePath::parse("/a/b/../c").to_string(), "/a/c");
        assert_eq!(SharePath::parse("a//b/./c/").to_string(), "/a/b/c");
        assert_eq!(SharePath::parse("/test/foo/../foo/bar").to_string(), "/test/foo/bar");
        assert_eq!(SharePath::parse(".").to_string(), "/");
        assert_eq!(SharePath::parse("").to_string(), "/");
    }

    #[test]
    fn parent_traversal_clamps_at_root() {
        assert!(SharePath::parse("/..").is_root());
        assert!(SharePath::parse("/../..").is_root());
        assert_eq!(SharePath::parse("/../../etc/passwd").to_string(), "/etc/passwd");
    }

    #[test]
    fn canonical_check() {
        assert!(SharePath::is_canonical("/"));
        assert!(SharePath::is_canonical("/shared/reports"));
        assert!(!SharePath::is_canonical("/shared/reports/"));
        assert!(!SharePath::is_canonical("shared"));
        assert!(!SharePath::is_canonical("/shared/../x"));
        assert!(!SharePath::is_canonical("//x"));
    }

    #[test]
    fn locate_relations() {
        let rule = SharePath::parse("/a/b/c");
        assert_eq!(rule.locate(&SharePath::parse("/a/b/c")), Relation::Within(0));
        assert_eq!(rule.locate(&SharePath::parse("/a/b/c/d/e")), Relation::Within(2));
        assert_eq!(rule.locate(&SharePath::parse("/a/b")), Relation::Parent);
        assert_eq!(rule.locate(&SharePath::parse("/a")), Relation::Unrelated);
        assert_eq!(rule.locate(&SharePath::parse("/a/b/x")), Relation::Unrelated);
        assert_eq!(rule.locate(&SharePath::parse("/a/b/cc")), Relation::Unrelated);
    }

    #[test]
    fn root_rule_covers_everything() {
        let root = SharePath::root();
        assert_eq!(root.locate(&SharePath::root()), Relation::Within(0));
        assert_eq!(root.locate(&SharePath::parse("/x/y")), Relation::Within(2));
    }

    #[test]
    fn relative_and_host_paths() {
        let base = SharePath::parse("/shared");
        let file = base.join("reports").join("q1.csv");
        assert_eq!(file.relative_to(&base).as_deref(), Some("reports/q1.csv"));
        assert_eq!(base.relative_to(&base).as_deref(), Some(""));
        assert_eq!(base.relative_to(&file), None);
        assert_eq!(
            file.to_host_path(Path::new("/srv")),
            PathBuf::from("/srv/shared/reports/q1.csv")
        );
        assert_eq!(file.file_name(), Some("q1.csv"));
        assert_eq!(file.parent().unwrap().to_string(), "/shared/reports");
        assert_eq!(SharePath::root().parent(), None);
    }
}
