use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::{Capability, ContainerRole, ProfileId, RuntimeKind};

/// One container in a profile's composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBlueprint {
    pub name: String,
    pub image: String,
    pub role: ContainerRole,
    pub runtime_kind: RuntimeKind,
    /// Port the runtime's HTTP server listens on inside the container.
    pub runtime_port: u16,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub memory_bytes: Option<i64>,
    #[serde(default)]
    pub cpu_quota: Option<i64>,
    pub capabilities: Vec<Capability>,
    /// Names of containers that must be started before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Immutable configuration template a sandbox is created from.
///
/// Validated once at load time; orchestration code may then rely on
/// `primary()`, `container_for()` and `start_order()` never failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    /// Ordered container specs; order is the tie-break for `start_order`.
    pub containers: Vec<ContainerBlueprint>,
    /// Sessions idle longer than this are reaped.
    pub idle_timeout_secs: u64,
    /// Explicit capability → container-name routing. Capabilities absent
    /// here route to the first container declaring them.
    #[serde(default)]
    pub primary_for: HashMap<Capability, String>,
}

impl Profile {
    /// Union of capabilities across all containers.
    pub fn capabilities(&self) -> BTreeSet<Capability> {
        self.containers
            .iter()
            .flat_map(|c| c.capabilities.iter().copied())
            .collect()
    }

    pub fn supports(&self, cap: Capability) -> bool {
        self.containers.iter().any(|c| c.capabilities.contains(&cap))
    }

    /// The container that serves `cap`: the `primary_for` designation if
    /// present, otherwise the first container declaring the capability.
    pub fn container_for(&self, cap: Capability) -> Option<&ContainerBlueprint> {
        if let Some(name) = self.primary_for.get(&cap) {
            if let Some(c) = self.containers.iter().find(|c| &c.name == name) {
                return Some(c);
            }
        }
        self.containers.iter().find(|c| c.capabilities.contains(&cap))
    }

    /// The primary container: the one with `role: primary`.
    pub fn primary(&self) -> &ContainerBlueprint {
        self.containers
            .iter()
            .find(|c| c.role == ContainerRole::Primary)
            .unwrap_or(&self.containers[0])
    }

    pub fn container(&self, name: &str) -> Option<&ContainerBlueprint> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Containers in dependency start order (dependencies first).
    /// Declaration order breaks ties between independent containers.
    pub fn start_order(&self) -> Result<Vec<&ContainerBlueprint>, DomainError> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for (i, c) in self.containers.iter().enumerate() {
            nodes.insert(c.name.as_str(), graph.add_node(i));
        }
        for c in &self.containers {
            for dep in &c.depends_on {
                let from = nodes.get(dep.as_str()).ok_or_else(|| {
                    DomainError::UnknownContainer {
                        profile: self.id.to_string(),
                        container: dep.clone(),
                    }
                })?;
                graph.add_edge(*from, nodes[c.name.as_str()], ());
            }
        }
        let order = toposort(&graph, None).map_err(|_| DomainError::DependencyCycle {
            profile: self.id.to_string(),
        })?;
        let mut indices: Vec<usize> = order.into_iter().map(|n| graph[n]).collect();
        // toposort is stable only up to the edge set; restore declaration
        // order among containers at the same dependency depth.
        indices.sort_by_key(|&i| (depth(&self.containers, i), i));
        Ok(indices.into_iter().map(|i| &self.containers[i]).collect())
    }

    /// Structural validation run once at profile load.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.containers.is_empty() {
            return Err(DomainError::InvalidProfile {
                profile: self.id.to_string(),
                message: "profile declares no containers".into(),
            });
        }

        let mut seen = BTreeSet::new();
        for c in &self.containers {
            if !seen.insert(c.name.as_str()) {
                return Err(DomainError::InvalidProfile {
                    profile: self.id.to_string(),
                    message: format!("duplicate container name '{}'", c.name),
                });
            }
            if c.capabilities.is_empty() {
                return Err(DomainError::InvalidProfile {
                    profile: self.id.to_string(),
                    message: format!("container '{}' declares no capabilities", c.name),
                });
            }
        }

        let primaries = self
            .containers
            .iter()
            .filter(|c| c.role == ContainerRole::Primary)
            .count();
        if primaries != 1 {
            return Err(DomainError::InvalidProfile {
                profile: self.id.to_string(),
                message: format!("expected exactly one primary container, found {primaries}"),
            });
        }

        for (cap, name) in &self.primary_for {
            let c = self.container(name).ok_or_else(|| DomainError::UnknownContainer {
                profile: self.id.to_string(),
                container: name.clone(),
            })?;
            if !c.capabilities.contains(cap) {
                return Err(DomainError::InvalidProfile {
                    profile: self.id.to_string(),
                    message: format!(
                        "container '{name}' is primary for '{cap}' but does not declare it"
                    ),
                });
            }
        }

        // Checks depends_on targets and cycles.
        self.start_order()?;
        Ok(())
    }
}

fn depth(containers: &[ContainerBlueprint], i: usize) -> usize {
    let mut d = 0;
    let mut frontier = vec![i];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for idx in frontier {
            for dep in &containers[idx].depends_on {
                if let Some(j) = containers.iter().position(|c| &c.name == dep) {
                    next.push(j);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        d += 1;
        frontier = next;
        if d > containers.len() {
            break; // cycle; toposort reports it separately
        }
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, role: ContainerRole, caps: &[Capability]) -> ContainerBlueprint {
        ContainerBlueprint {
            name: name.to_string(),
            image: format!("bay/{name}:latest"),
            role,
            runtime_kind: RuntimeKind::Ship,
            runtime_port: 8080,
            env: HashMap::new(),
            memory_bytes: None,
            cpu_quota: None,
            capabilities: caps.to_vec(),
            depends_on: vec![],
        }
    }

    fn profile(containers: Vec<ContainerBlueprint>) -> Profile {
        Profile {
            id: ProfileId::new("test"),
            name: "test".into(),
            containers,
            idle_timeout_secs: 300,
            primary_for: HashMap::new(),
        }
    }

    #[test]
    fn single_container_profile_validates() {
        let p = profile(vec![container(
            "main",
            ContainerRole::Primary,
            &[Capability::Python, Capability::Shell, Capability::Filesystem],
        )]);
        p.validate().unwrap();
        assert_eq!(p.primary().name, "main");
        assert!(p.supports(Capability::Python));
        assert!(!p.supports(Capability::Browser));
    }

    #[test]
    fn capability_routing_prefers_primary_for() {
        let mut p = profile(vec![
            container("a", ContainerRole::Primary, &[Capability::Shell]),
            container("b", ContainerRole::Sidecar, &[Capability::Shell]),
        ]);
        assert_eq!(p.container_for(Capability::Shell).unwrap().name, "a");
        p.primary_for.insert(Capability::Shell, "b".into());
        assert_eq!(p.container_for(Capability::Shell).unwrap().name, "b");
    }

    #[test]
    fn start_order_honours_depends_on() {
        let mut browser = container("browser", ContainerRole::Sidecar, &[Capability::Browser]);
        browser.depends_on = vec!["ship".into()];
        let p = profile(vec![
            browser,
            container("ship", ContainerRole::Primary, &[Capability::Python]),
        ]);
        let order: Vec<&str> = p.start_order().unwrap().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(order, vec!["ship", "browser"]);
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let mut a = container("a", ContainerRole::Primary, &[Capability::Python]);
        let mut b = container("b", ContainerRole::Sidecar, &[Capability::Shell]);
        a.depends_on = vec!["b".into()];
        b.depends_on = vec!["a".into()];
        let p = profile(vec![a, b]);
        assert!(matches!(p.validate(), Err(DomainError::DependencyCycle { .. })));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut a = container("a", ContainerRole::Primary, &[Capability::Python]);
        a.depends_on = vec!["ghost".into()];
        let p = profile(vec![a]);
        assert!(matches!(p.validate(), Err(DomainError::UnknownContainer { .. })));
    }

    #[test]
    fn two_primaries_rejected() {
        let p = profile(vec![
            container("a", ContainerRole::Primary, &[Capability::Python]),
            container("b", ContainerRole::Primary, &[Capability::Shell]),
        ]);
        assert!(p.validate().is_err());
    }
}
