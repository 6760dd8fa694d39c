use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::{CommandLine, Identity, relative_path};

/// Name of the optional configuration file at the project root.
pub const CONFIG_FILE: &str = "stagecraft.toml";

/// stagecraft.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagecraftConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub deps: DepsConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Image name (defaults to the manifest's package name)
    pub name: Option<String>,
    /// Base environment shared by every stage
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// Working directory inside each stage
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Dependency manifest file name
    #[serde(default = "default_manifest")]
    pub manifest: String,
}

/// One supported lockfile format and the locked install it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockfileVariant {
    pub name: String,
    pub file: String,
    /// Tooling bootstrap run before the install, e.g. fetching the package
    /// manager itself. Failures here say nothing about the lockfile.
    #[serde(default)]
    pub setup: Vec<CommandLine>,
    pub install: Vec<CommandLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepsConfig {
    /// Lockfile variants in priority order. The first one present wins.
    #[serde(default = "default_lockfiles")]
    pub lockfiles: Vec<LockfileVariant>,
    /// Commands run after the locked install, regardless of variant.
    #[serde(default = "default_post_install")]
    pub post_install: Vec<CommandLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Application build command
    #[serde(default = "default_build_command")]
    pub command: CommandLine,
    /// Set `telemetry_env=1` for the build and runtime stages
    #[serde(default = "default_true")]
    pub disable_telemetry: bool,
    #[serde(default = "default_telemetry_env")]
    pub telemetry_env: String,
    /// Extra environment for the build stage
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Public static assets produced (or kept) by the build
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    /// Pruned, self-contained runtime bundle
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: String,
    /// Compiled static chunks served by the bundle
    #[serde(default = "default_bundle_static_dir")]
    pub bundle_static_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_id")]
    pub uid: u32,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_id")]
    pub gid: u32,
    /// Exec-form entrypoint, relative to the workdir
    #[serde(default = "default_entrypoint")]
    pub entrypoint: Vec<String>,
    /// Environment baked into the final image
    #[serde(default = "default_runtime_env")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Where the final image archive and config are written
    #[serde(default = "default_output_dir")]
    pub dir: String,
    /// Scratch space for per-stage roots
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: None,
            base_image: default_base_image(),
            workdir: default_workdir(),
            manifest: default_manifest(),
        }
    }
}

impl Default for DepsConfig {
    fn default() -> Self {
        Self {
            lockfiles: default_lockfiles(),
            post_install: default_post_install(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            disable_telemetry: true,
            telemetry_env: default_telemetry_env(),
            env: BTreeMap::new(),
            static_dir: default_static_dir(),
            bundle_dir: default_bundle_dir(),
            bundle_static_dir: default_bundle_static_dir(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            uid: default_id(),
            group: default_group(),
            gid: default_id(),
            entrypoint: default_entrypoint(),
            env: default_runtime_env(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            work_dir: default_work_dir(),
        }
    }
}

impl StagecraftConfig {
    /// Load from stagecraft.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        let config: Self = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })?
        } else {
            tracing::debug!("no {CONFIG_FILE} found, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        for path in [
            &self.project.manifest,
            &self.build.static_dir,
            &self.build.bundle_dir,
            &self.build.bundle_static_dir,
            &self.cache.dir,
            &self.output.dir,
            &self.output.work_dir,
        ] {
            relative_path(path)?;
        }
        if !self.project.workdir.starts_with('/') {
            return Err(invalid("project.workdir", "must be absolute"));
        }
        if self.deps.lockfiles.is_empty() {
            return Err(invalid("deps.lockfiles", "at least one variant is required"));
        }
        for variant in &self.deps.lockfiles {
            relative_path(&variant.file)?;
            if variant.install.is_empty() {
                return Err(invalid(
                    &format!("deps.lockfiles.{}.install", variant.name),
                    "must not be empty",
                ));
            }
        }
        if self.runtime.uid == 0 {
            return Err(invalid("runtime.uid", "must not be 0"));
        }
        if self.runtime.gid == 0 {
            return Err(invalid("runtime.gid", "must not be 0"));
        }
        if self.runtime.entrypoint.is_empty() {
            return Err(invalid("runtime.entrypoint", "must not be empty"));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    pub fn identity(&self) -> Identity {
        Identity {
            user: self.user.clone(),
            uid: self.uid,
            group: self.group.clone(),
            gid: self.gid,
        }
    }
}

fn invalid(field: &str, reason: &str) -> crate::Error {
    crate::Error::InvalidConfig {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

fn default_base_image() -> String {
    "node:20-alpine".to_owned()
}

fn default_workdir() -> String {
    "/app".to_owned()
}

fn default_manifest() -> String {
    "package.json".to_owned()
}

fn default_lockfiles() -> Vec<LockfileVariant> {
    vec![
        LockfileVariant {
            name: "yarn".to_owned(),
            file: "yarn.lock".to_owned(),
            setup: Vec::new(),
            install: vec![CommandLine::new("yarn", ["install", "--frozen-lockfile"])],
        },
        LockfileVariant {
            name: "npm".to_owned(),
            file: "package-lock.json".to_owned(),
            setup: Vec::new(),
            install: vec![CommandLine::new("npm", ["ci"])],
        },
        LockfileVariant {
            name: "pnpm".to_owned(),
            file: "pnpm-lock.yaml".to_owned(),
            setup: vec![CommandLine::new("yarn", ["global", "add", "pnpm"])],
            install: vec![CommandLine::new("pnpm", ["install", "--frozen-lockfile"])],
        },
    ]
}

fn default_post_install() -> Vec<CommandLine> {
    vec![CommandLine::new("npm", ["install", "sharp"])]
}

fn default_build_command() -> CommandLine {
    CommandLine::new("npm", ["run", "build"])
}

fn default_true() -> bool {
    true
}

fn default_telemetry_env() -> String {
    "NEXT_TELEMETRY_DISABLED".to_owned()
}

fn default_static_dir() -> String {
    "public".to_owned()
}

fn default_bundle_dir() -> String {
    ".next/standalone".to_owned()
}

fn default_bundle_static_dir() -> String {
    ".next/static".to_owned()
}

fn default_user() -> String {
    "nextjs".to_owned()
}

fn default_group() -> String {
    "nodejs".to_owned()
}

fn default_id() -> u32 {
    1001
}

fn default_entrypoint() -> Vec<String> {
    vec!["node".to_owned(), "server.js".to_owned()]
}

fn default_runtime_env() -> BTreeMap<String, String> {
    BTreeMap::from([("NODE_ENV".to_owned(), "production".to_owned())])
}

fn default_cache_dir() -> String {
    ".stagecraft/cache".to_owned()
}

fn default_output_dir() -> String {
    ".stagecraft/image".to_owned()
}

fn default_work_dir() -> String {
    ".stagecraft/work".to_owned()
}
