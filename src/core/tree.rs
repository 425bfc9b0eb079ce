//! Active-state trees and transition resolution.
//!
//! A [`StateTree`] records every active path of one model. Keys are state
//! name segments in declaration order; an empty subtree marks an active leaf.
//! [`resolve`] computes the exit plan, the enter plan and the resulting tree
//! for a destination without touching the current tree, so a failed
//! resolution never leaves a model half way between two configurations.

use crate::error::MachineError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Read-only view of the declared state hierarchy needed by [`resolve`].
///
/// Names passed in and returned are fully qualified except for
/// [`children`](Topology::children) and [`initial`](Topology::initial), which
/// return single segments relative to `name`.
pub trait Topology {
    /// Separator joining name segments.
    fn separator(&self) -> &str;

    /// Whether a state with this qualified name is declared.
    fn contains(&self, name: &str) -> bool;

    /// Child segments in declaration order.
    fn children(&self, name: &str) -> Vec<String>;

    /// Whether entering `name` activates all of its children.
    fn is_parallel(&self, name: &str) -> bool;

    /// Child segments entered by default when `name` is entered without an
    /// explicit sub-path. Parallel states return every child.
    fn initial(&self, name: &str) -> Vec<String>;
}

/// Nested representation of every active path of a model.
///
/// # Example
///
/// ```rust
/// use canopy::core::StateTree;
///
/// let tree = StateTree::from_names(["C_1_a", "C_2_a"], "_");
/// assert_eq!(tree.leaves("_"), vec!["C_1_a", "C_2_a"]);
/// assert_eq!(tree.get("C").map(|c| c.len()), Some(2));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTree {
    branches: Vec<(String, StateTree)>,
}

impl StateTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty tree is an active leaf when nested inside another tree.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Number of direct branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn get(&self, key: &str) -> Option<&StateTree> {
        self.branches
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, tree)| tree)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut StateTree> {
        self.branches
            .iter_mut()
            .find(|(name, _)| name == key)
            .map(|(_, tree)| tree)
    }

    /// Direct branches in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateTree)> {
        self.branches.iter().map(|(name, tree)| (name.as_str(), tree))
    }

    /// Insert a branch. An existing key keeps its position and has its
    /// subtree replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: StateTree) {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.branches.push((key, value)),
        }
    }

    /// Get the branch for `key`, inserting an empty one if missing.
    pub fn entry(&mut self, key: &str) -> &mut StateTree {
        let index = match self.branches.iter().position(|(name, _)| name == key) {
            Some(index) => index,
            None => {
                self.branches.push((key.to_string(), StateTree::new()));
                self.branches.len() - 1
            }
        };
        &mut self.branches[index].1
    }

    /// Ensure every segment of `path` is present.
    pub fn insert_path(&mut self, path: &[String]) {
        let mut cursor = self;
        for segment in path {
            cursor = cursor.entry(segment);
        }
    }

    pub fn clear(&mut self) {
        self.branches.clear();
    }

    /// Subtree reached by walking `path` from the root.
    pub fn subtree(&self, path: &[String]) -> Option<&StateTree> {
        path.iter()
            .try_fold(self, |tree, segment| tree.get(segment))
    }

    pub fn subtree_mut(&mut self, path: &[String]) -> Option<&mut StateTree> {
        let mut cursor = self;
        for segment in path {
            cursor = cursor.get_mut(segment)?;
        }
        Some(cursor)
    }

    /// Whether `path` is active, as a leaf or as a composite.
    pub fn contains(&self, path: &[String]) -> bool {
        !path.is_empty() && self.subtree(path).is_some()
    }

    /// Merge another tree into this one, keeping existing branch order.
    pub fn merge(&mut self, other: StateTree) {
        for (key, value) in other.branches {
            self.entry(&key).merge(value);
        }
    }

    /// Rebuild a tree from qualified leaf names.
    pub fn from_names<I, S>(names: I, separator: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = StateTree::new();
        for name in names {
            let path: Vec<String> = name
                .as_ref()
                .split(separator)
                .map(str::to_string)
                .collect();
            tree.insert_path(&path);
        }
        tree
    }

    /// Active leaf paths in declaration order.
    pub fn leaf_paths(&self) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        for (key, sub) in &self.branches {
            if sub.is_empty() {
                paths.push(vec![key.clone()]);
            } else {
                for mut rest in sub.leaf_paths() {
                    rest.insert(0, key.clone());
                    paths.push(rest);
                }
            }
        }
        paths
    }

    /// Flatten the tree into qualified leaf names.
    pub fn leaves(&self, separator: &str) -> Vec<String> {
        self.leaf_paths()
            .iter()
            .map(|path| path.join(separator))
            .collect()
    }

    /// Every active path, deepest level first.
    ///
    /// Paths are collected breadth first with siblings reversed and the
    /// whole list is reversed afterwards, so each level appears in
    /// declaration order and every descendant precedes its ancestors.
    pub fn resolve_order(&self) -> Vec<Vec<String>> {
        let mut collected: Vec<Vec<String>> = Vec::new();
        let mut queue: VecDeque<(Vec<String>, &StateTree)> = VecDeque::new();
        let mut prefix: Vec<String> = Vec::new();
        let mut tree = self;
        loop {
            for (key, sub) in tree.branches.iter().rev() {
                let mut path = prefix.clone();
                path.push(key.clone());
                if !sub.is_empty() {
                    queue.push_back((path.clone(), sub));
                }
                collected.push(path);
            }
            match queue.pop_front() {
                Some((next_prefix, next_tree)) => {
                    prefix = next_prefix;
                    tree = next_tree;
                }
                None => break,
            }
        }
        collected.reverse();
        collected
    }
}

/// Exit plan, enter plan and resulting tree of one transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Qualified names to exit, leaf to root.
    pub exit: Vec<String>,
    /// Qualified names to enter, root to leaf.
    pub enter: Vec<String>,
    /// Tree after the transition committed.
    pub tree: StateTree,
}

/// Compute how to move from `current` to the state named `dest`.
///
/// The longest prefix of `dest` that is already active is kept. When all of
/// `dest` is active the transition is reflexive and the last segment is
/// exited and entered again. Within a parallel scope only the targeted region
/// is exited; every other region stays untouched.
pub fn resolve<T: Topology + ?Sized>(
    current: &StateTree,
    dest: &str,
    topology: &T,
) -> Result<Resolution, MachineError> {
    if !topology.contains(dest) {
        return Err(MachineError::InvalidDestination(dest.to_string()));
    }
    let separator = topology.separator();
    let mut remaining: VecDeque<String> = dest.split(separator).map(str::to_string).collect();

    let mut root: Vec<String> = Vec::new();
    let mut cursor = current;
    while let Some(segment) = remaining.front() {
        match cursor.get(segment) {
            Some(sub) => {
                cursor = sub;
                if let Some(segment) = remaining.pop_front() {
                    root.push(segment);
                }
            }
            None => break,
        }
    }
    if remaining.is_empty() {
        if let Some(last) = root.pop() {
            remaining.push_back(last);
        }
    }
    let Some(first) = remaining.pop_front() else {
        return Err(MachineError::InvalidDestination(dest.to_string()));
    };

    let scoped = current.subtree(&root).cloned().unwrap_or_default();
    let narrowed = scoped.len() > 1 && scoped.get(&first).is_some();
    let exit_scope = if narrowed {
        let mut single = StateTree::new();
        single.insert(first.clone(), scoped.get(&first).cloned().unwrap_or_default());
        single
    } else {
        scoped
    };

    let exit = exit_scope
        .resolve_order()
        .into_iter()
        .map(|rel| qualify(&root, &rel, separator))
        .collect();

    let (branch, enter) = expand(&root, first, remaining.into_iter().collect(), topology)?;

    let mut tree = current.clone();
    match tree.subtree_mut(&root) {
        Some(scope) => {
            if !narrowed {
                scope.clear();
            }
            for (key, value) in branch.branches {
                scope.insert(key, value);
            }
        }
        None => return Err(MachineError::InvalidDestination(dest.to_string())),
    }

    Ok(Resolution { exit, enter, tree })
}

/// Tree a model starts in when attached with the given initial state names.
pub fn initial_tree<T: Topology + ?Sized>(
    names: &[String],
    topology: &T,
) -> Result<StateTree, MachineError> {
    let mut tree = StateTree::new();
    for name in names {
        if !topology.contains(name) {
            return Err(MachineError::InvalidDestination(name.clone()));
        }
        let mut segments = name.split(topology.separator()).map(str::to_string);
        let Some(first) = segments.next() else {
            continue;
        };
        let (branch, _) = expand(&[], first, segments.collect(), topology)?;
        tree.merge(branch);
    }
    Ok(tree)
}

/// Enter `first` below `root`, following `explicit` and then each state's
/// defaults, breadth first.
fn expand<T: Topology + ?Sized>(
    root: &[String],
    first: String,
    explicit: Vec<String>,
    topology: &T,
) -> Result<(StateTree, Vec<String>), MachineError> {
    let separator = topology.separator();
    let mut branch = StateTree::new();
    let mut enter = Vec::new();
    let mut queue: VecDeque<(Vec<String>, Vec<String>)> = VecDeque::new();
    queue.push_back((vec![first], explicit));

    while let Some((rel, explicit)) = queue.pop_front() {
        let name = qualify(root, &rel, separator);
        if !topology.contains(&name) {
            return Err(MachineError::InvalidDestination(name));
        }
        branch.insert_path(&rel);

        match explicit.split_first() {
            Some((next, rest)) if topology.is_parallel(&name) => {
                for child in topology.children(&name) {
                    let follow = if &child == next { rest.to_vec() } else { Vec::new() };
                    queue.push_back((extend(&rel, child), follow));
                }
            }
            Some((next, rest)) => queue.push_back((extend(&rel, next.clone()), rest.to_vec())),
            None => {
                for child in topology.initial(&name) {
                    queue.push_back((extend(&rel, child), Vec::new()));
                }
            }
        }
        enter.push(name);
    }

    Ok((branch, enter))
}

fn qualify(root: &[String], rel: &[String], separator: &str) -> String {
    root.iter()
        .chain(rel.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

fn extend(path: &[String], segment: String) -> Vec<String> {
    let mut next = path.to_vec();
    next.push(segment);
    next
}
