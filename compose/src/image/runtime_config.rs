//! Runtime configuration of an assembled image.
//!
//! Precedence: role defaults, then image options, then `extraConfig`, which
//! is merged into the OCI `config` object last (objects merge recursively,
//! everything else is replaced).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use stratum_core::error::{Result, StratumError};
use stratum_core::{validate_dir, Artifact, EffectiveOptions, Role, UserSpec};

use super::layout::{ScaffoldLayout, CERT_BUNDLE_PATH};

/// Directories appended to the store `bin` directories in `PATH`.
pub const SYSTEM_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

pub const DEFAULT_LANG: &str = "C.UTF-8";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub user: String,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl RuntimeConfig {
    pub fn new(options: &EffectiveOptions, artifacts: &[Artifact], has_trust_bundle: bool) -> Result<Self> {
        let env = build_env(options, artifacts, has_trust_bundle);

        let cmd = match (&options.cmd, options.role) {
            (Some(cmd), _) => Some(cmd.clone()),
            (None, Role::Development) if options.entrypoint.is_none() => {
                Some(vec![options.user.shell.clone(), "-l".to_string()])
            }
            (None, _) => None,
        };

        let mut config = Self {
            user: options.user.name.clone(),
            working_dir: options.workdir.clone(),
            env,
            entrypoint: options.entrypoint.clone(),
            cmd,
            extra: options.extra_config.clone(),
        };
        config.adopt_merged(options)?;
        Ok(config)
    }

    /// The OCI image `config` object.
    pub fn to_oci(&self) -> Value {
        let env: Vec<String> = self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let mut config = json!({
            "User": self.user,
            "WorkingDir": self.working_dir,
            "Env": env,
        });
        if let Some(entrypoint) = &self.entrypoint {
            config["Entrypoint"] = json!(entrypoint);
        }
        if let Some(cmd) = &self.cmd {
            config["Cmd"] = json!(cmd);
        }

        merge_json(&mut config, &Value::Object(self.extra.clone()));
        config
    }

    /// Validate the fields `extraConfig` may have replaced and adopt them,
    /// so the spec describes the config that is written.
    fn adopt_merged(&mut self, options: &EffectiveOptions) -> Result<()> {
        let role = options.role;
        let merged = self.to_oci();

        let user = merged_string(&merged, "User", role)?;
        check_user(&options.user, role, &user)?;

        let working_dir = merged_string(&merged, "WorkingDir", role)?;
        validate_dir(role, "WorkingDir", &working_dir)?;

        self.user = user;
        self.working_dir = working_dir;
        Ok(())
    }
}

fn merged_string(merged: &Value, key: &str, role: Role) -> Result<String> {
    match merged.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        None => Ok(String::new()),
        Some(_) => Err(StratumError::invalid_role(
            role,
            format!("extraConfig.{} must be a string", key),
        )),
    }
}

/// The image must run as the synthesized user, by name or uid, with an
/// optional non-root group.
fn check_user(user: &UserSpec, role: Role, value: &str) -> Result<()> {
    let (name, group) = match value.split_once(':') {
        Some((name, group)) => (name, Some(group)),
        None => (value, None),
    };

    if name != user.name && name != user.uid.to_string() {
        return Err(StratumError::invalid_role(
            role,
            format!(
                "image must run as '{}' (uid {}), not '{}'",
                user.name,
                user.uid,
                if value.is_empty() { "root" } else { value }
            ),
        ));
    }

    if let Some(group) = group {
        let allowed = match group.parse::<u32>() {
            Ok(gid) => gid != 0,
            Err(_) => group == user.name,
        };
        if !allowed {
            return Err(StratumError::invalid_role(
                role,
                format!("group '{}' is not allowed for '{}'", group, user.name),
            ));
        }
    }
    Ok(())
}

/// Environment for the image: store `bin` directories on `PATH` in artifact
/// order, identity variables, then caller env on top.
pub fn build_env(
    options: &EffectiveOptions,
    artifacts: &[Artifact],
    has_trust_bundle: bool,
) -> BTreeMap<String, String> {
    let layout = ScaffoldLayout::default();
    let mut path: Vec<String> = artifacts
        .iter()
        .map(|a| format!("{}/bin", layout.store_path(&a.store_name())))
        .collect();
    path.push(SYSTEM_PATH.to_string());

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), path.join(":"));
    env.insert("HOME".to_string(), options.user.home.clone());
    env.insert("USER".to_string(), options.user.name.clone());
    env.insert("LANG".to_string(), DEFAULT_LANG.to_string());
    if has_trust_bundle {
        env.insert("SSL_CERT_FILE".to_string(), CERT_BUNDLE_PATH.to_string());
    }

    for (key, value) in &options.env {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// Merge `overlay` into `base`. Objects merge key by key; any other value
/// in `overlay` replaces the one in `base`.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
