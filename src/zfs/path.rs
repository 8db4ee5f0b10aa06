//! Dataset path algebra.
//!
//! A [`DatasetPath`] is an ordered sequence of non-empty name components,
//! joined by `/` in its string form. Paths are plain value objects; the
//! mutating operations (`extend`, `trim_prefix`, ...) are used on copies
//! obtained via `clone`.

use std::fmt;

use thiserror::Error;

/// Characters that must not appear anywhere in a dataset path.
pub const FORBIDDEN_CHARACTERS: &str = "@#|\t<>*";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetPathError {
    #[error("dataset path {0:?} contains forbidden characters (any of {FORBIDDEN_CHARACTERS:?})")]
    ForbiddenCharacters(String),
    #[error("dataset path {0:?} must not end with a '/'")]
    TrailingSlash(String),
    #[error("dataset path {0:?} contains an empty component")]
    EmptyComponent(String),
}

/// Hierarchical dataset name as an ordered component sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetPath {
    comps: Vec<String>,
}

impl DatasetPath {
    /// The zero-length path. Valid as a sentinel, rejected wherever a
    /// filesystem argument is required.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a `/`-separated dataset name. The empty string parses to the
    /// zero-length path.
    pub fn parse(s: &str) -> Result<Self, DatasetPathError> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        // Space is a legal dataset name character; the volume manager
        // forbids the version delimiters and shell-glob metacharacters.
        if s.contains(|c| FORBIDDEN_CHARACTERS.contains(c)) {
            return Err(DatasetPathError::ForbiddenCharacters(s.to_string()));
        }
        if s.ends_with('/') {
            return Err(DatasetPathError::TrailingSlash(s.to_string()));
        }
        let comps: Vec<String> = s.split('/').map(str::to_string).collect();
        if comps.iter().any(String::is_empty) {
            return Err(DatasetPathError::EmptyComponent(s.to_string()));
        }
        Ok(Self { comps })
    }

    pub fn is_empty(&self) -> bool {
        self.comps.is_empty()
    }

    /// Number of components.
    pub fn length(&self) -> usize {
        self.comps.len()
    }

    /// The pool (first) component.
    pub fn pool(&self) -> Option<&str> {
        self.comps.first().map(String::as_str)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.comps.iter().map(String::as_str)
    }

    /// Whether `prefix` is a (non-strict) prefix of `self`.
    pub fn has_prefix(&self, prefix: &DatasetPath) -> bool {
        if prefix.comps.len() > self.comps.len() {
            return false;
        }
        self.comps
            .iter()
            .zip(prefix.comps.iter())
            .all(|(a, b)| a == b)
    }

    /// Append all components of `other`.
    pub fn extend(&mut self, other: &DatasetPath) {
        self.comps.extend(other.comps.iter().cloned());
    }

    /// Remove `prefix` from the front. No-op if `prefix` does not match.
    pub fn trim_prefix(&mut self, prefix: &DatasetPath) {
        if !self.has_prefix(prefix) {
            return;
        }
        self.comps.drain(..prefix.comps.len());
    }

    /// Remove the first `n` components (all of them if `n` exceeds the
    /// length).
    pub fn trim_n_components(&mut self, n: usize) {
        self.comps.drain(..n.min(self.comps.len()));
    }
}

impl fmt::Display for DatasetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.comps.join("/"))
    }
}

impl std::str::FromStr for DatasetPath {
    type Err = DatasetPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Forest walk
// =============================================================================

/// Transient forest of dataset paths, walked top-down during placeholder
/// materialisation. Built per request and discarded.
#[derive(Debug, Default)]
pub struct DatasetPathForest {
    roots: Vec<ForestNode>,
}

#[derive(Debug)]
struct ForestNode {
    component: String,
    children: Vec<ForestNode>,
}

impl DatasetPathForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a path; shared prefixes merge into a single branch. Adding the
    /// zero-length path is a no-op.
    pub fn add(&mut self, path: &DatasetPath) {
        let mut nodes = &mut self.roots;
        for comp in path.components() {
            let pos = match nodes.iter().position(|n| n.component == comp) {
                Some(pos) => pos,
                None => {
                    nodes.push(ForestNode {
                        component: comp.to_string(),
                        children: Vec::new(),
                    });
                    nodes.len() - 1
                }
            };
            nodes = &mut nodes[pos].children;
        }
    }

    /// Visit every stored path prefix, parents strictly before children.
    /// The visitor's return value decides whether the child subtree is
    /// descended into.
    pub fn walk_top_down(&self, mut visit: impl FnMut(&DatasetPath) -> bool) {
        let mut current = DatasetPath::root();
        for root in &self.roots {
            Self::walk_node(root, &mut current, &mut visit);
        }
    }

    fn walk_node(
        node: &ForestNode,
        current: &mut DatasetPath,
        visit: &mut impl FnMut(&DatasetPath) -> bool,
    ) {
        current.comps.push(node.component.clone());
        if visit(current) {
            for child in &node.children {
                Self::walk_node(child, current, visit);
            }
        }
        current.comps.pop();
    }
}
