//! Plugin dependency resolution: Kahn's topological sort with DFS cycle
//! extraction, and the version-requirement matcher used to qualify
//! `requires` entries.

use std::collections::HashMap;

use crate::PluginError;

/// Dependency graph keyed by plugin name. An edge from a plugin to a
/// dependency means the dependency must load first.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    deps: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plugin(&mut self, name: &str) {
        if !self.nodes.iter().any(|node| node == name) {
            self.nodes.push(name.to_string());
            self.deps.entry(name.to_string()).or_default();
        }
    }

    pub fn add_dependency(&mut self, plugin: &str, dependency: &str) {
        self.add_plugin(plugin);
        self.deps
            .entry(plugin.to_string())
            .or_default()
            .push(dependency.to_string());
    }

    /// Kahn's algorithm. The returned order puts every dependency before
    /// every dependent; ties fall back to registration order, so resolution
    /// is deterministic.
    pub fn resolve(&self) -> Result<Vec<String>, PluginError> {
        for (plugin, deps) in &self.deps {
            for dep in deps {
                if !self.deps.contains_key(dep) {
                    return Err(PluginError::MissingDependency(dep.clone(), plugin.clone()));
                }
            }
        }

        let mut remaining: Vec<&String> = self.nodes.iter().collect();
        let mut unresolved: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|node| (node.as_str(), self.deps[node].len()))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while !remaining.is_empty() {
            let Some(at) = remaining
                .iter()
                .position(|node| unresolved[node.as_str()] == 0)
            else {
                break; // everything left waits on something: a cycle
            };
            let node = remaining.remove(at);
            order.push(node.clone());

            for other in &remaining {
                let depends_on_node = self.deps[*other].iter().filter(|dep| *dep == node).count();
                if depends_on_node > 0 {
                    *unresolved.get_mut(other.as_str()).expect("node is known") -=
                        depends_on_node;
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(PluginError::CircularDependency(self.find_cycle()));
        }
        Ok(order)
    }

    /// DFS over the recursion stack to name one offending cycle.
    fn find_cycle(&self) -> String {
        let mut visited = Vec::new();
        let mut stack = Vec::new();

        for node in &self.nodes {
            if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut stack) {
                return cycle.join(" -> ");
            }
        }
        "unknown cycle".to_string()
    }

    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        visited: &mut Vec<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(at) = stack.iter().position(|seen| *seen == node) {
            let mut cycle: Vec<String> = stack[at..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if visited.contains(&node) {
            return None;
        }
        visited.push(node);
        stack.push(node);
        if let Some(deps) = self.deps.get(node) {
            for dep in deps {
                if let Some(cycle) = self.dfs_cycle(dep, visited, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        None
    }
}

/// A `major.minor.patch` version of non-negative integers, ordered
/// lexicographically by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn parse(text: &str) -> Option<Version> {
        let mut parts = text.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Version {
            major,
            minor,
            patch,
        })
    }
}

/// Match a concrete version against a requirement: exact, `^` (same major,
/// at least the required version), `~` (same major.minor, at least the
/// required patch), `>=` or `>`.
pub fn matches_requirement(version: &str, requirement: &str) -> bool {
    let requirement = requirement.trim();
    if version == requirement {
        return true;
    }
    let Some(version) = Version::parse(version) else {
        return false;
    };

    if let Some(required) = requirement.strip_prefix("^") {
        return match Version::parse(required) {
            Some(required) => version.major == required.major && version >= required,
            None => false,
        };
    }
    if let Some(required) = requirement.strip_prefix("~") {
        return match Version::parse(required) {
            Some(required) => {
                version.major == required.major
                    && version.minor == required.minor
                    && version.patch >= required.patch
            }
            None => false,
        };
    }
    if let Some(required) = requirement.strip_prefix(">=") {
        return matches!(Version::parse(required), Some(required) if version >= required);
    }
    if let Some(required) = requirement.strip_prefix(">") {
        return matches!(Version::parse(required), Some(required) if version > required);
    }

    matches!(Version::parse(requirement), Some(required) if version == required)
}
