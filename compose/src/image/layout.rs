//! Image filesystem layout constants.
//!
//! Well-known paths inside an assembled image.

/// Root of the artifact store inside the image.
pub const STORE_DIR: &str = "/store";

/// User database.
pub const PASSWD_PATH: &str = "/etc/passwd";

/// Group database.
pub const GROUP_PATH: &str = "/etc/group";

/// Shadow password database.
pub const SHADOW_PATH: &str = "/etc/shadow";

/// Shadow group database.
pub const GSHADOW_PATH: &str = "/etc/gshadow";

/// Privilege escalation grants (development role only).
pub const SUDOERS_PATH: &str = "/etc/sudoers";

/// PAM stack for sudo (development role only).
pub const PAM_SUDO_PATH: &str = "/etc/pam.d/sudo";

/// Name service switch configuration.
pub const NSSWITCH_PATH: &str = "/etc/nsswitch.conf";

/// Login shell environment bootstrap.
pub const PROFILE_PATH: &str = "/etc/profile";

/// System-wide interactive bash configuration (development role only).
pub const BASHRC_PATH: &str = "/etc/bashrc";

/// CA trust bundle.
pub const CERT_BUNDLE_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Passthrough key naming the trust bundle inside an artifact, relative to
/// the artifact root.
pub const CERT_FILE_ATTR: &str = "ssl-cert-file";

/// Image filesystem layout.
#[derive(Debug, Clone)]
pub struct ScaffoldLayout {
    /// Artifact store root.
    pub store_dir: &'static str,

    /// System configuration directory.
    pub etc_dir: &'static str,

    /// World-writable scratch directory (sticky).
    pub tmp_dir: &'static str,

    /// Home of the superuser.
    pub root_home: &'static str,
}

impl Default for ScaffoldLayout {
    fn default() -> Self {
        Self {
            store_dir: STORE_DIR,
            etc_dir: "/etc",
            tmp_dir: "/tmp",
            root_home: "/root",
        }
    }
}

impl ScaffoldLayout {
    /// Get the standard image layout.
    pub fn standard() -> Self {
        Self::default()
    }

    /// Directories every image carries regardless of role, owned by root
    /// with mode 0755.
    pub fn required_dirs(&self) -> Vec<&str> {
        vec![
            self.store_dir,
            self.etc_dir,
            "/etc/ssl",
            "/etc/ssl/certs",
            "/usr",
            "/usr/bin",
            "/var",
            "/var/tmp",
            "/run",
        ]
    }

    /// In-image directory of one artifact.
    pub fn store_path(&self, store_name: &str) -> String {
        format!("{}/{}", self.store_dir, store_name)
    }
}
