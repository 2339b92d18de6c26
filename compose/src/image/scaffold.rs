//! Filesystem scaffold synthesis.
//!
//! The scaffold is the root-owned skeleton every image needs besides its
//! artifacts: user and group databases, shell bootstrap, role-specific
//! privilege files, the CA trust bundle and a handful of directories. It is
//! described as data (path to content, mode and ownership) and only
//! materialised by the image writer.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use stratum_core::error::{Result, StratumError};
use stratum_core::{Artifact, AttrValue, EffectiveOptions, Fingerprint};

use super::layout::{
    ScaffoldLayout, BASHRC_PATH, CERT_BUNDLE_PATH, CERT_FILE_ATTR, GROUP_PATH, GSHADOW_PATH,
    NSSWITCH_PATH, PAM_SUDO_PATH, PASSWD_PATH, PROFILE_PATH, SHADOW_PATH, SUDOERS_PATH,
};

/// Where a scaffold file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum FileContent {
    /// Synthesized text
    Inline { text: String },
    /// A file inside a realised artifact, copied by value
    FromArtifact {
        artifact: String,
        fingerprint: Fingerprint,
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File { content: FileContent },
}

/// One path in the scaffold with explicit ownership and permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaffoldEntry {
    #[serde(flatten)]
    pub kind: EntryKind,
    #[serde(serialize_with = "octal")]
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl ScaffoldEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Inline text of a synthesized file.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::File {
                content: FileContent::Inline { text },
            } => Some(text),
            _ => None,
        }
    }
}

fn octal<S: Serializer>(mode: &u32, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:04o}", mode))
}

/// Ordered map of absolute path to entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FilesystemScaffold {
    entries: BTreeMap<String, ScaffoldEntry>,
}

impl FilesystemScaffold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a directory, creating missing parents as root 0755.
    pub fn insert_dir(&mut self, path: &str, mode: u32, uid: u32, gid: u32) {
        self.ensure_parents(path);
        self.entries.insert(
            path.to_string(),
            ScaffoldEntry {
                kind: EntryKind::Directory,
                mode,
                uid,
                gid,
            },
        );
    }

    /// Add or replace a file, creating missing parents as root 0755.
    pub fn insert_file(&mut self, path: &str, content: FileContent, mode: u32, uid: u32, gid: u32) {
        self.ensure_parents(path);
        self.entries.insert(
            path.to_string(),
            ScaffoldEntry {
                kind: EntryKind::File { content },
                mode,
                uid,
                gid,
            },
        );
    }

    fn insert_text(&mut self, path: &str, text: String, mode: u32) {
        self.insert_file(path, FileContent::Inline { text }, mode, 0, 0);
    }

    fn ensure_parents(&mut self, path: &str) {
        let mut parent = path;
        while let Some((head, _)) = parent.rsplit_once('/') {
            if head.is_empty() {
                break;
            }
            if !self.entries.contains_key(head) {
                self.entries.insert(
                    head.to_string(),
                    ScaffoldEntry {
                        kind: EntryKind::Directory,
                        mode: 0o755,
                        uid: 0,
                        gid: 0,
                    },
                );
            }
            parent = head;
        }
    }

    pub fn get(&self, path: &str) -> Option<&ScaffoldEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Entries in path order; parents always precede their children.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScaffoldEntry)> {
        self.entries.iter().map(|(p, e)| (p.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `sha256:<hex>` over every path, kind, mode, owner and content reference.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, entry) in &self.entries {
            let mut line = format!("{} {:o} {} {} ", path, entry.mode, entry.uid, entry.gid);
            match &entry.kind {
                EntryKind::Directory => line.push_str("dir"),
                EntryKind::File {
                    content: FileContent::Inline { text },
                } => {
                    let _ = write!(line, "inline {}", hex::encode(Sha256::digest(text.as_bytes())));
                }
                EntryKind::File {
                    content:
                        FileContent::FromArtifact {
                            fingerprint, path, ..
                        },
                } => {
                    let _ = write!(line, "artifact {} {}", fingerprint, path);
                }
            }
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// CA bundle exposed by an artifact through its `ssl-cert-file` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustBundle {
    pub artifact: String,
    pub fingerprint: Fingerprint,
    /// Path relative to the artifact root
    pub path: String,
}

/// Find the trust bundle. The first artifact in order that exposes one wins.
pub fn find_trust_bundle(artifacts: &[Artifact]) -> Result<Option<TrustBundle>> {
    let mut found: Option<TrustBundle> = None;

    for artifact in artifacts {
        let Some(value) = artifact.attr(CERT_FILE_ATTR) else {
            continue;
        };
        let path = match value {
            AttrValue::Text(path) => path.trim_start_matches('/'),
            AttrValue::Artifact { .. } => {
                return Err(StratumError::ConfigError(format!(
                    "'{}' of '{}' must be a path inside the artifact",
                    CERT_FILE_ATTR,
                    artifact.name()
                )));
            }
        };
        if path.is_empty() || path.split('/').any(|c| c == ".." || c == ".") {
            return Err(StratumError::ConfigError(format!(
                "'{}' of '{}' is not a valid relative path: '{}'",
                CERT_FILE_ATTR,
                artifact.name(),
                path
            )));
        }

        match &found {
            Some(first) => {
                tracing::debug!(
                    used = %first.artifact,
                    ignored = %artifact.name(),
                    "Multiple artifacts expose a trust bundle"
                );
            }
            None => {
                found = Some(TrustBundle {
                    artifact: artifact.def.name.clone(),
                    fingerprint: artifact.fingerprint.clone(),
                    path: path.to_string(),
                });
            }
        }
    }

    Ok(found)
}

/// Synthesizes the scaffold for one image.
pub struct ScaffoldBuilder<'a> {
    options: &'a EffectiveOptions,
    env: &'a BTreeMap<String, String>,
    trust_bundle: Option<&'a TrustBundle>,
    layout: ScaffoldLayout,
}

impl<'a> ScaffoldBuilder<'a> {
    pub fn new(options: &'a EffectiveOptions, env: &'a BTreeMap<String, String>) -> Self {
        Self {
            options,
            env,
            trust_bundle: None,
            layout: ScaffoldLayout::default(),
        }
    }

    pub fn with_trust_bundle(mut self, bundle: Option<&'a TrustBundle>) -> Self {
        self.trust_bundle = bundle;
        self
    }

    pub fn with_layout(mut self, layout: ScaffoldLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn build(&self) -> Result<FilesystemScaffold> {
        let mut scaffold = FilesystemScaffold::new();

        self.create_directories(&mut scaffold)?;
        self.create_identity_files(&mut scaffold);
        self.create_profile(&mut scaffold);

        if self.options.privileged {
            self.create_privilege_files(&mut scaffold);
        }
        if self.options.interactive {
            self.create_interactive_files(&mut scaffold);
        }
        if let Some(bundle) = self.trust_bundle {
            scaffold.insert_file(
                CERT_BUNDLE_PATH,
                FileContent::FromArtifact {
                    artifact: bundle.artifact.clone(),
                    fingerprint: bundle.fingerprint.clone(),
                    path: bundle.path.clone(),
                },
                0o444,
                0,
                0,
            );
        }

        tracing::debug!(
            image = %self.options.reference(),
            role = %self.options.role,
            entries = scaffold.len(),
            "Synthesized filesystem scaffold"
        );
        Ok(scaffold)
    }

    fn create_directories(&self, scaffold: &mut FilesystemScaffold) -> Result<()> {
        for dir in self.layout.required_dirs() {
            scaffold.insert_dir(dir, 0o755, 0, 0);
        }
        scaffold.insert_dir(self.layout.tmp_dir, 0o1777, 0, 0);
        scaffold.insert_dir(self.layout.root_home, 0o700, 0, 0);

        let user = &self.options.user;
        for dir in [&user.home, &self.options.workdir] {
            if self.is_reserved(dir) {
                return Err(StratumError::invalid_role(
                    self.options.role,
                    format!("'{}' is a system directory and cannot belong to '{}'", dir, user.name),
                ));
            }
            scaffold.insert_dir(dir, 0o755, user.uid, user.gid);
        }
        Ok(())
    }

    fn is_reserved(&self, dir: &str) -> bool {
        let store_prefix = format!("{}/", self.layout.store_dir);
        self.layout.required_dirs().contains(&dir)
            || dir == self.layout.tmp_dir
            || dir == self.layout.root_home
            || dir.starts_with(&store_prefix)
            || dir.starts_with("/etc/")
    }

    fn create_identity_files(&self, scaffold: &mut FilesystemScaffold) {
        let user = &self.options.user;

        let passwd = format!(
            "root:x:0:0:root:{}:/bin/sh\n{}:x:{}:{}:{}:{}:{}\n",
            self.layout.root_home, user.name, user.uid, user.gid, user.name, user.home, user.shell
        );
        scaffold.insert_text(PASSWD_PATH, passwd, 0o644);

        let group = format!("root:x:0:\n{}:x:{}:\n", user.name, user.gid);
        scaffold.insert_text(GROUP_PATH, group, 0o644);

        // Locked passwords; nothing logs in with a password
        let shadow = format!("root:!:1:0:99999:7:::\n{}:!:1:0:99999:7:::\n", user.name);
        scaffold.insert_text(SHADOW_PATH, shadow, 0o600);

        let gshadow = format!("root:!::\n{}:!::\n", user.name);
        scaffold.insert_text(GSHADOW_PATH, gshadow, 0o600);

        let nsswitch = "passwd: files\ngroup: files\nshadow: files\nhosts: files dns\n";
        scaffold.insert_text(NSSWITCH_PATH, nsswitch.to_string(), 0o644);
    }

    fn create_profile(&self, scaffold: &mut FilesystemScaffold) {
        let mut profile = String::from("# Generated by stratum\n");
        for (key, value) in self.env {
            let _ = writeln!(profile, "export {}={}", key, shell_quote(value));
        }
        profile.push_str(
            "if [ -d /etc/profile.d ]; then\n  \
             for script in /etc/profile.d/*.sh; do\n    \
             [ -r \"$script\" ] && . \"$script\"\n  \
             done\n  \
             unset script\n\
             fi\n",
        );
        if self.options.interactive {
            profile.push_str("if [ -n \"$BASH_VERSION\" ] && [ -r /etc/bashrc ]; then\n  . /etc/bashrc\nfi\n");
        }
        scaffold.insert_text(PROFILE_PATH, profile, 0o644);
    }

    fn create_privilege_files(&self, scaffold: &mut FilesystemScaffold) {
        let mut sudoers = String::from("Defaults env_reset\n");
        if let Some(path) = self.env.get("PATH") {
            let _ = writeln!(sudoers, "Defaults secure_path=\"{}\"", path);
        }
        sudoers.push_str("root ALL=(ALL:ALL) ALL\n");
        let _ = writeln!(sudoers, "{} ALL=(ALL:ALL) NOPASSWD: ALL", self.options.user.name);
        scaffold.insert_text(SUDOERS_PATH, sudoers, 0o440);

        let pam = "auth       sufficient pam_rootok.so\n\
                   auth       required   pam_permit.so\n\
                   account    required   pam_permit.so\n\
                   session    required   pam_permit.so\n";
        scaffold.insert_text(PAM_SUDO_PATH, pam.to_string(), 0o644);
    }

    fn create_interactive_files(&self, scaffold: &mut FilesystemScaffold) {
        let bashrc = "[ -z \"$PS1\" ] && return\n\
                      PS1='\\u@\\h:\\w\\$ '\n\
                      HISTCONTROL=ignoredups\n\
                      shopt -s checkwinsize\n";
        scaffold.insert_text(BASHRC_PATH, bashrc.to_string(), 0o644);

        let user = &self.options.user;
        scaffold.insert_file(
            &format!("{}/.bashrc", user.home),
            FileContent::Inline {
                text: format!("[ -r {} ] && . {}\n", BASHRC_PATH, BASHRC_PATH),
            },
            0o644,
            user.uid,
            user.gid,
        );
    }
}

/// Single-quote a value for POSIX shells.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
