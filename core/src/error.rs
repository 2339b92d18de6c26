use thiserror::Error;

/// Stratum error types
#[derive(Error, Debug)]
pub enum StratumError {
    /// Unknown artifact, set, source or image name
    #[error("Not found: {kind} '{name}'")]
    NotFound { kind: &'static str, name: String },

    /// A package set transitively references itself
    #[error("Cyclic package set: {}", .chain.join(" -> "))]
    CyclicSet { chain: Vec<String> },

    /// Two occurrences of one artifact name resolve to different fingerprints
    #[error("Set conflict in '{set}': '{name}' resolves to both {first} and {second}")]
    SetConflict {
        set: String,
        name: String,
        first: String,
        second: String,
    },

    /// Overlay chain cannot be ordered deterministically
    #[error("Rule conflict in '{rule}': {message}")]
    RuleConflict { rule: String, message: String },

    /// A rule targets an artifact absent from the catalog-so-far
    #[error("Rule '{rule}' targets missing artifact '{target}'")]
    MissingTarget { rule: String, target: String },

    /// A rule dropped or changed a passthrough attribute it did not declare
    #[error("Rule '{rule}' changed passthrough attribute '{key}' of '{artifact}' without declaring an override")]
    PassthroughViolation {
        rule: String,
        artifact: String,
        key: String,
    },

    /// Artifact dependency graph contains a cycle
    #[error("Dependency cycle: {}", .chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    /// The same artifact name was defined twice in one catalog
    #[error("Duplicate artifact definition: {0}")]
    DuplicateArtifact(String),

    /// Caller configuration conflicts with role invariants
    #[error("Invalid {role} configuration: {message}")]
    InvalidRoleConfig { role: String, message: String },

    /// External build collaborator failure, surfaced as-is
    #[error("Build failed for '{artifact}': {message}")]
    BuildError { artifact: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StratumError {
    /// Shorthand for an unknown artifact name.
    pub fn artifact_not_found(name: impl Into<String>) -> Self {
        StratumError::NotFound {
            kind: "artifact",
            name: name.into(),
        }
    }

    /// Shorthand for an unknown package set name.
    pub fn set_not_found(name: impl Into<String>) -> Self {
        StratumError::NotFound {
            kind: "set",
            name: name.into(),
        }
    }

    /// Shorthand for a role validation failure.
    pub fn invalid_role(role: impl std::fmt::Display, message: impl Into<String>) -> Self {
        StratumError::InvalidRoleConfig {
            role: role.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        StratumError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for StratumError {
    fn from(err: serde_yaml::Error) -> Self {
        StratumError::SerializationError(err.to_string())
    }
}

/// Result type alias for Stratum operations
pub type Result<T> = std::result::Result<T, StratumError>;
