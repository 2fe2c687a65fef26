//! Dependency Graph
//!
//! Directed edges from a dependent key to the keys its value was derived
//! from, with a reverse index for cascading invalidation.

use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// dependent -> dependencies
    forward: HashMap<String, HashSet<String>>,
    /// dependency -> dependents
    reverse: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` was derived from `dependency`.
    ///
    /// Self-edges are ignored. Returns false if the edge already existed.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> bool {
        if dependent == dependency {
            return false;
        }
        let added = self
            .forward
            .entry(dependent.to_string())
            .or_default()
            .insert(dependency.to_string());
        self.reverse
            .entry(dependency.to_string())
            .or_default()
            .insert(dependent.to_string());
        added
    }

    pub fn remove_dependency(&mut self, dependent: &str, dependency: &str) -> bool {
        let removed = detach(&mut self.forward, dependent, dependency);
        detach(&mut self.reverse, dependency, dependent);
        removed
    }

    pub fn dependencies_of(&self, key: &str) -> Vec<String> {
        sorted(self.forward.get(key))
    }

    // == Transitive Dependents ==
    /// Every key that depends on `key` directly or indirectly, in
    /// breadth-first order. `key` itself is never included, even when a cycle
    /// leads back to it.
    pub fn transitive_dependents(&self, key: &str) -> Vec<String> {
        let mut visited = HashSet::from([key.to_string()]);
        let mut queue = VecDeque::from([key.to_string()]);
        let mut out = Vec::new();

        while let Some(current) = queue.pop_front() {
            for dependent in sorted(self.reverse.get(&current)) {
                if visited.insert(dependent.clone()) {
                    out.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }
}

fn detach(map: &mut HashMap<String, HashSet<String>>, from: &str, to: &str) -> bool {
    let Some(set) = map.get_mut(from) else {
        return false;
    };
    let removed = set.remove(to);
    if set.is_empty() {
        map.remove(from);
    }
    removed
}

fn sorted(set: Option<&HashSet<String>>) -> Vec<String> {
    let mut keys: Vec<String> = set.into_iter().flatten().cloned().collect();
    keys.sort();
    keys
}
