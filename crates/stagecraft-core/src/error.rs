use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    // ── Manifest discovery ──
    #[error("manifest not found at {path}")]
    ManifestNotFound { path: PathBuf },

    #[error("failed to read manifest at {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest at {path}")]
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(
        "no lockfile found in {dir}; expected one of: {}",
        expected.join(", ")
    )]
    ManifestMissing { dir: PathBuf, expected: Vec<String> },

    // ── Pipeline validation ──
    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("stage name must not be empty")]
    EmptyStageName,

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{stage}' promotes from unknown stage '{from}'")]
    UnknownStage { stage: String, from: String },

    #[error("stage '{stage}' promotes from '{from}', which does not run before it")]
    ForwardPromotion { stage: String, from: String },

    #[error("stage '{stage}' promotes {path:?} from '{from}', which does not expose it")]
    UnexposedPath {
        stage: String,
        from: String,
        path: String,
    },

    #[error("stage '{stage}' references user '{user}' that it never creates")]
    UnknownUser { stage: String, user: String },

    #[error("stage '{stage}' references group '{group}' that it never creates")]
    UnknownGroup { stage: String, group: String },

    #[error("stage '{stage}' declares identity {name} with privileged id 0")]
    PrivilegedIdentity { stage: String, name: String },

    #[error("terminal stage '{stage}' has no entrypoint")]
    MissingEntrypoint { stage: String },

    #[error("terminal stage '{stage}' must switch to an unprivileged user")]
    PrivilegedRuntime { stage: String },

    #[error("terminal stage '{stage}' runs a {step} before switching to an unprivileged user")]
    PopulatedBeforeUserSwitch { stage: String, step: String },

    #[error("stage '{stage}' entrypoint is wrapped in a shell: {}", entrypoint.join(" "))]
    ShellEntrypoint {
        stage: String,
        entrypoint: Vec<String>,
    },

    #[error("stage '{stage}' declares an empty command")]
    EmptyCommand { stage: String },
}
