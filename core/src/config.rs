use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, StratumError};

/// Default image tag
pub const DEFAULT_TAG: &str = "latest";

/// Image role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Interactive image with a privileged user and shell ergonomics
    Development,
    /// Minimal non-root image
    Runtime,
}

impl Role {
    /// Built-in defaults for this role.
    pub fn defaults(self) -> RoleDefaults {
        match self {
            Role::Development => RoleDefaults {
                user: "vscode",
                uid: 1000,
                gid: 1000,
                shell: "/bin/bash",
                workdir: None,
                max_layers: 100,
                privileged: true,
                interactive: true,
            },
            Role::Runtime => RoleDefaults {
                user: "app",
                uid: 1000,
                gid: 1000,
                shell: "/sbin/nologin",
                workdir: Some("/app"),
                max_layers: 50,
                privileged: false,
                interactive: false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Development => "development",
            Role::Runtime => "runtime",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Role::Development),
            "runtime" => Ok(Role::Runtime),
            _ => Err(format!(
                "unknown role: '{}' (supported: development, runtime)",
                s
            )),
        }
    }
}

/// Per-role defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleDefaults {
    pub user: &'static str,
    pub uid: u32,
    pub gid: u32,
    pub shell: &'static str,
    /// `None` means the user's home directory
    pub workdir: Option<&'static str>,
    pub max_layers: usize,
    /// Whether the user gets a privilege-escalation grant
    pub privileged: bool,
    /// Whether interactive shell files are synthesized
    pub interactive: bool,
}

/// Caller-supplied image options.
///
/// Precedence: role defaults, then these options, then `extra_config`,
/// which is merged into the runtime configuration last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageOptions {
    /// Image repository name
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_tag")]
    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,

    /// Working directory (runtime role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_layers: Option<usize>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    /// Creation time in Unix seconds (default: epoch, for reproducibility)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,

    /// Additional runtime-config fields, merged last
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_config: serde_json::Map<String, serde_json::Value>,
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            tag: default_tag(),
            user: None,
            uid: None,
            gid: None,
            workdir: None,
            max_layers: None,
            env: BTreeMap::new(),
            entrypoint: None,
            cmd: None,
            created: None,
            extra_config: serde_json::Map::new(),
        }
    }
}

impl ImageOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_max_layers(mut self, max_layers: usize) -> Self {
        self.max_layers = Some(max_layers);
        self
    }

    /// `name:tag`, without validation.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// Apply role defaults and validate against role invariants.
    pub fn resolve(&self, role: Role) -> Result<EffectiveOptions> {
        let defaults = role.defaults();

        if self.name.trim().is_empty() {
            return Err(StratumError::invalid_role(role, "image name must not be empty"));
        }
        if self.tag.trim().is_empty() {
            return Err(StratumError::invalid_role(role, "image tag must not be empty"));
        }

        let user_name = self.user.clone().unwrap_or_else(|| defaults.user.to_string());
        validate_user_name(role, &user_name)?;

        let uid = self.uid.unwrap_or(defaults.uid);
        let gid = self.gid.unwrap_or(defaults.gid);
        if uid == 0 || gid == 0 {
            return Err(StratumError::invalid_role(
                role,
                format!("user '{}' must not map to uid/gid 0", user_name),
            ));
        }

        let home = match role {
            Role::Development => format!("/home/{}", user_name),
            Role::Runtime => String::new(),
        };

        let workdir = match (role, &self.workdir) {
            (Role::Development, Some(_)) => {
                return Err(StratumError::invalid_role(
                    role,
                    "workdir is only recognized for the runtime role",
                ));
            }
            (Role::Development, None) => home.clone(),
            (Role::Runtime, Some(dir)) => dir.clone(),
            (Role::Runtime, None) => defaults.workdir.unwrap_or("/app").to_string(),
        };
        validate_dir(role, "workdir", &workdir)?;

        let max_layers = self.max_layers.unwrap_or(defaults.max_layers);
        if max_layers < 2 {
            return Err(StratumError::invalid_role(
                role,
                format!("maxLayers must be at least 2, got {}", max_layers),
            ));
        }

        let home = if home.is_empty() { workdir.clone() } else { home };
        validate_dir(role, "home", &home)?;

        Ok(EffectiveOptions {
            name: self.name.clone(),
            tag: self.tag.clone(),
            role,
            user: UserSpec {
                name: user_name,
                uid,
                gid,
                home,
                shell: defaults.shell.to_string(),
            },
            workdir,
            max_layers,
            privileged: defaults.privileged,
            interactive: defaults.interactive,
            env: self.env.clone(),
            entrypoint: self.entrypoint.clone(),
            cmd: self.cmd.clone(),
            created: self.created.unwrap_or(0),
            extra_config: self.extra_config.clone(),
        })
    }
}

/// Identity of the image's non-root user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

/// Options after role defaults and validation.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOptions {
    pub name: String,
    pub tag: String,
    pub role: Role,
    pub user: UserSpec,
    pub workdir: String,
    pub max_layers: usize,
    pub privileged: bool,
    pub interactive: bool,
    pub env: BTreeMap<String, String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub created: i64,
    pub extra_config: serde_json::Map<String, serde_json::Value>,
}

impl EffectiveOptions {
    /// `name:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Check that `dir` is an absolute directory in canonical form: no `.` or
/// `..` components, no empty components and no trailing slash. `what` names
/// the setting in errors.
pub fn validate_dir(role: Role, what: &str, dir: &str) -> Result<()> {
    if dir.is_empty() {
        return Err(StratumError::invalid_role(
            role,
            format!("a {} is required", what),
        ));
    }
    if !dir.starts_with('/') {
        return Err(StratumError::invalid_role(
            role,
            format!("{} '{}' must be an absolute path", what, dir),
        ));
    }
    if dir == "/" {
        return Err(StratumError::invalid_role(
            role,
            format!("{} must not be the filesystem root", what),
        ));
    }
    if dir[1..]
        .split('/')
        .any(|c| c.is_empty() || c == "." || c == "..")
    {
        return Err(StratumError::invalid_role(
            role,
            format!("{} '{}' must be a canonical path", what, dir),
        ));
    }
    Ok(())
}

fn validate_user_name(role: Role, name: &str) -> Result<()> {
    if name == "root" {
        return Err(StratumError::invalid_role(role, "user must not be root"));
    }

    let valid = !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase() || c == '_')
            .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if !valid {
        return Err(StratumError::invalid_role(
            role,
            format!("invalid user name '{}'", name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("runtime".parse::<Role>().unwrap(), Role::Runtime);
        assert_eq!("development".parse::<Role>().unwrap(), Role::Development);
        assert_eq!("dev".parse::<Role>().unwrap(), Role::Development);
        assert!("prod".parse::<Role>().is_err());
        assert_eq!(Role::Runtime.to_string(), "runtime");
    }

    #[test]
    fn test_role_budgets() {
        assert!(Role::Development.defaults().max_layers > Role::Runtime.defaults().max_layers);
        assert!(Role::Development.defaults().privileged);
        assert!(!Role::Runtime.defaults().privileged);
    }

    #[test]
    fn test_runtime_defaults() {
        let opts = ImageOptions::new("x").resolve(Role::Runtime).unwrap();
        assert_eq!(opts.tag, "latest");
        assert_eq!(opts.user.name, "app");
        assert_eq!(opts.workdir, "/app");
        assert_eq!(opts.user.home, "/app");
        assert_eq!(opts.max_layers, 50);
        assert_eq!(opts.created, 0);
        assert_eq!(opts.reference(), "x:latest");
    }

    #[test]
    fn test_development_defaults() {
        let opts = ImageOptions::new("dev").resolve(Role::Development).unwrap();
        assert_eq!(opts.user.name, "vscode");
        assert_eq!(opts.user.home, "/home/vscode");
        assert_eq!(opts.workdir, "/home/vscode");
        assert_eq!(opts.user.shell, "/bin/bash");
        assert!(opts.privileged);
    }

    #[test]
    fn test_root_user_rejected() {
        let err = ImageOptions::new("x")
            .with_user("root")
            .resolve(Role::Runtime)
            .unwrap_err();
        assert!(matches!(err, StratumError::InvalidRoleConfig { .. }));

        let mut opts = ImageOptions::new("x");
        opts.uid = Some(0);
        assert!(opts.resolve(Role::Development).is_err());
    }

    #[test]
    fn test_workdir_rules() {
        assert!(ImageOptions::new("x")
            .with_workdir("")
            .resolve(Role::Runtime)
            .is_err());
        assert!(ImageOptions::new("x")
            .with_workdir("relative/dir")
            .resolve(Role::Runtime)
            .is_err());
        assert!(ImageOptions::new("x")
            .with_workdir("/srv")
            .resolve(Role::Development)
            .is_err());

        let opts = ImageOptions::new("x")
            .with_workdir("/srv/app")
            .resolve(Role::Runtime)
            .unwrap();
        assert_eq!(opts.workdir, "/srv/app");
    }

    #[test]
    fn test_workdir_must_be_canonical() {
        for dir in ["/root/", "/tmp/", "/app/../root", "/srv/./app", "//srv", "/srv//app"] {
            let err = ImageOptions::new("x")
                .with_workdir(dir)
                .resolve(Role::Runtime)
                .unwrap_err();
            assert!(matches!(err, StratumError::InvalidRoleConfig { .. }), "{dir}");
        }
    }

    #[test]
    fn test_validate_dir() {
        assert!(validate_dir(Role::Development, "home", "/home/vscode").is_ok());
        assert!(validate_dir(Role::Development, "home", "/home/vscode/").is_err());
        assert!(validate_dir(Role::Development, "home", "/home/..").is_err());
        assert!(validate_dir(Role::Runtime, "workdir", "/").is_err());
        assert!(validate_dir(Role::Runtime, "workdir", "").is_err());
    }

    #[test]
    fn test_invalid_user_names() {
        for bad in ["", "App", "1app", "a b", "app$"] {
            assert!(
                ImageOptions::new("x").with_user(bad).resolve(Role::Runtime).is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(ImageOptions::new("x")
            .with_user("svc_app-1")
            .resolve(Role::Runtime)
            .is_ok());
    }

    #[test]
    fn test_max_layers_minimum() {
        assert!(ImageOptions::new("x")
            .with_max_layers(1)
            .resolve(Role::Runtime)
            .is_err());
        assert!(ImageOptions::new("x")
            .with_max_layers(2)
            .resolve(Role::Runtime)
            .is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(ImageOptions::default().resolve(Role::Runtime).is_err());
    }

    #[test]
    fn test_options_from_yaml() {
        let yaml = r#"
name: registry.example.com/api
workdir: /srv
extraConfig:
  Labels:
    team: platform
"#;
        let opts: ImageOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(opts.tag, "latest");
        assert_eq!(opts.workdir.as_deref(), Some("/srv"));
        assert!(opts.extra_config.contains_key("Labels"));
    }

    #[test]
    fn test_options_reject_unknown_keys() {
        let yaml = "name: x\nprivileged: true\n";
        let result: std::result::Result<ImageOptions, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }
}
