use std::collections::HashMap;
use std::path::Path;

use bay_domain::{
    Capability, ContainerBlueprint, ContainerRole, Profile, ProfileId, RuntimeKind,
};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawContainer, RawProfile, RawProfilesFile};

/// Immutable, validated profile catalog resolved at startup.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    profiles: HashMap<ProfileId, Profile>,
}

impl ProfileCatalog {
    /// Load and validate every profile in a YAML catalog file.
    pub fn load(path: &Path, default_idle_timeout_secs: u64) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw: RawProfilesFile =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
                path: path.display().to_string(),
                source: e,
            })?;

        let mut profiles = HashMap::new();
        for raw_profile in raw.profiles {
            let profile = convert_profile(raw_profile, default_idle_timeout_secs, path)?;
            debug!(profile = %profile.id, "loaded profile");
            if profiles.insert(profile.id.clone(), profile).is_some() {
                return Err(ConfigError::Conversion {
                    path: path.display().to_string(),
                    message: "duplicate profile id".into(),
                });
            }
        }
        Ok(Self { profiles })
    }

    /// The built-in catalog used when no file is configured: a
    /// single-container Python sandbox and a Python-plus-browser pair.
    pub fn builtin(default_idle_timeout_secs: u64) -> Self {
        let ship = ContainerBlueprint {
            name: "ship".into(),
            image: "bay/ship:latest".into(),
            role: ContainerRole::Primary,
            runtime_kind: RuntimeKind::Ship,
            runtime_port: 8080,
            env: HashMap::new(),
            memory_bytes: None,
            cpu_quota: None,
            capabilities: vec![Capability::Python, Capability::Shell, Capability::Filesystem],
            depends_on: vec![],
        };
        let browser = ContainerBlueprint {
            name: "browser".into(),
            image: "bay/helmsman:latest".into(),
            role: ContainerRole::Sidecar,
            runtime_kind: RuntimeKind::Browser,
            runtime_port: 8081,
            env: HashMap::new(),
            memory_bytes: None,
            cpu_quota: None,
            capabilities: vec![Capability::Browser],
            depends_on: vec!["ship".into()],
        };

        let python_default = Profile {
            id: ProfileId::new("python-default"),
            name: "Python sandbox".into(),
            containers: vec![ship.clone()],
            idle_timeout_secs: default_idle_timeout_secs,
            primary_for: HashMap::new(),
        };
        let python_browser = Profile {
            id: ProfileId::new("python-browser"),
            name: "Python sandbox with browser automation".into(),
            containers: vec![ship, browser],
            idle_timeout_secs: default_idle_timeout_secs,
            primary_for: HashMap::new(),
        };

        let mut profiles = HashMap::new();
        for p in [python_default, python_browser] {
            profiles.insert(p.id.clone(), p);
        }
        Self { profiles }
    }

    pub fn get(&self, id: &ProfileId) -> Option<&Profile> {
        self.profiles.get(id)
    }

    pub fn list(&self) -> Vec<&Profile> {
        let mut out: Vec<&Profile> = self.profiles.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

fn convert_profile(
    raw: RawProfile,
    default_idle_timeout_secs: u64,
    path: &Path,
) -> Result<Profile, ConfigError> {
    let containers = raw
        .containers
        .into_iter()
        .map(|c| convert_container(c, path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut primary_for = HashMap::new();
    for (cap, container) in raw.primary_for {
        let cap = parse_capability(&cap, path)?;
        primary_for.insert(cap, container);
    }

    let profile = Profile {
        id: ProfileId::new(raw.id),
        name: raw.name,
        containers,
        idle_timeout_secs: raw.idle_timeout_secs.unwrap_or(default_idle_timeout_secs),
        primary_for,
    };
    profile.validate()?;
    Ok(profile)
}

fn convert_container(raw: RawContainer, path: &Path) -> Result<ContainerBlueprint, ConfigError> {
    let role = match raw.role.as_str() {
        "primary" => ContainerRole::Primary,
        "sidecar" => ContainerRole::Sidecar,
        other => {
            return Err(ConfigError::Conversion {
                path: path.display().to_string(),
                message: format!("unknown container role '{other}'"),
            });
        }
    };
    let runtime_kind = match raw.runtime.as_str() {
        "ship" => RuntimeKind::Ship,
        "browser" => RuntimeKind::Browser,
        other => {
            return Err(ConfigError::Conversion {
                path: path.display().to_string(),
                message: format!("unknown runtime kind '{other}'"),
            });
        }
    };
    let capabilities = raw
        .capabilities
        .iter()
        .map(|c| parse_capability(c, path))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ContainerBlueprint {
        name: raw.name,
        image: raw.image,
        role,
        runtime_kind,
        runtime_port: raw.port,
        env: raw.env,
        memory_bytes: raw.memory_bytes,
        cpu_quota: raw.cpu_quota,
        capabilities,
        depends_on: raw.depends_on,
    })
}

fn parse_capability(s: &str, path: &Path) -> Result<Capability, ConfigError> {
    Capability::parse(s).ok_or_else(|| ConfigError::Conversion {
        path: path.display().to_string(),
        message: format!("unknown capability '{s}'"),
    })
}
