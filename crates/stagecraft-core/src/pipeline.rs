//! Pipeline data model.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage starts from an
//! empty root, sees only what its [`Step`]s copy in (from the build context or
//! by [`Promotion`] from an earlier stage), and exposes a set of output paths
//! that later stages may promote.
//!
//! In-stage paths are written the way a container build writes them: relative
//! paths resolve against the stage's `workdir`, absolute paths against the
//! stage root. [`stage_path`] turns either form into a root-relative path.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A program and its arguments, executed without a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What a command is for. Decides how a non-zero exit is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandRole {
    /// Locked dependency install. Failure means lockfile and manifest disagree.
    Install,
    /// Post-install hook.
    Hook,
    /// The application build.
    Build,
    /// Anything else.
    Setup,
}

/// A fixed, non-root user/group pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: String,
    pub uid: u32,
    pub group: String,
    pub gid: u32,
}

/// Ownership applied to a promoted artifact at copy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user: String,
    pub group: String,
}

/// An explicit copy of a path exposed by an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Source stage name.
    pub from: String,
    /// Path inside the source stage.
    pub source: String,
    /// Path inside the destination stage.
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Copy paths from the build context into the workdir. Empty means the
    /// whole context.
    Context { paths: Vec<String> },
    Promote(Promotion),
    Run {
        command: CommandLine,
        role: CommandRole,
    },
    CreateIdentity(Identity),
    SwitchUser { user: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Base environment identifier, e.g. an image reference.
    pub base: String,
    pub workdir: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Paths later stages may promote.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
}

impl Stage {
    pub fn new(name: &str, base: &str, workdir: &str) -> Self {
        Self {
            name: name.to_owned(),
            base: base.to_owned(),
            workdir: workdir.to_owned(),
            env: BTreeMap::new(),
            steps: Vec::new(),
            outputs: Vec::new(),
            entrypoint: None,
        }
    }

    /// Identities this stage creates, in declaration order.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.steps.iter().filter_map(|step| match step {
            Step::CreateIdentity(identity) => Some(identity),
            _ => None,
        })
    }

    /// Promotions this stage declares, in declaration order.
    pub fn promotions(&self) -> impl Iterator<Item = &Promotion> {
        self.steps.iter().filter_map(|step| match step {
            Step::Promote(promotion) => Some(promotion),
            _ => None,
        })
    }

    /// The identity the stage runs as once all steps have been applied.
    /// `None` means the privileged default.
    pub fn final_user(&self) -> Option<&Identity> {
        let mut current = None;
        for step in &self.steps {
            if let Step::SwitchUser { user } = step {
                current = self.identities().find(|id| &id.user == user);
            }
        }
        current
    }

    /// Root-relative form of an in-stage path.
    pub fn path(&self, path: &str) -> Result<PathBuf> {
        stage_path(&self.workdir, path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// The stage whose root becomes the final image.
    pub fn terminal(&self) -> Option<&Stage> {
        self.stages.last()
    }

    /// Checks every structural invariant before anything executes.
    pub fn validate(&self) -> Result<()> {
        let Some(terminal) = self.terminal() else {
            return Err(Error::EmptyPipeline);
        };

        for (index, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(Error::EmptyStageName);
            }
            if self.stages[..index].iter().any(|s| s.name == stage.name) {
                return Err(Error::DuplicateStage(stage.name.clone()));
            }
            stage.path(&stage.workdir)?;
            for output in &stage.outputs {
                stage.path(output)?;
            }
            self.validate_steps(index, stage)?;
        }

        validate_terminal(terminal)
    }

    fn validate_steps(&self, index: usize, stage: &Stage) -> Result<()> {
        let mut created: Vec<&Identity> = Vec::new();

        for step in &stage.steps {
            match step {
                Step::Context { paths } => {
                    for path in paths {
                        relative_path(path)?;
                    }
                }
                Step::Promote(promotion) => {
                    let position = self
                        .stages
                        .iter()
                        .position(|s| s.name == promotion.from)
                        .ok_or_else(|| Error::UnknownStage {
                            stage: stage.name.clone(),
                            from: promotion.from.clone(),
                        })?;
                    if position >= index {
                        return Err(Error::ForwardPromotion {
                            stage: stage.name.clone(),
                            from: promotion.from.clone(),
                        });
                    }
                    let source_stage = &self.stages[position];
                    let source = source_stage.path(&promotion.source)?;
                    let exposed = source_stage
                        .outputs
                        .iter()
                        .map(|o| source_stage.path(o))
                        .collect::<Result<Vec<_>>>()?;
                    if !exposed.iter().any(|o| source.starts_with(o)) {
                        return Err(Error::UnexposedPath {
                            stage: stage.name.clone(),
                            from: promotion.from.clone(),
                            path: promotion.source.clone(),
                        });
                    }
                    stage.path(&promotion.destination)?;
                    if let Some(owner) = &promotion.owner {
                        if !created.iter().any(|id| id.user == owner.user) {
                            return Err(Error::UnknownUser {
                                stage: stage.name.clone(),
                                user: owner.user.clone(),
                            });
                        }
                        if !created.iter().any(|id| id.group == owner.group) {
                            return Err(Error::UnknownGroup {
                                stage: stage.name.clone(),
                                group: owner.group.clone(),
                            });
                        }
                    }
                }
                Step::Run { command, .. } => {
                    if command.program.trim().is_empty() {
                        return Err(Error::EmptyCommand {
                            stage: stage.name.clone(),
                        });
                    }
                }
                Step::CreateIdentity(identity) => {
                    if identity.uid == 0 || identity.gid == 0 {
                        return Err(Error::PrivilegedIdentity {
                            stage: stage.name.clone(),
                            name: format!("{}:{}", identity.user, identity.group),
                        });
                    }
                    created.push(identity);
                }
                Step::SwitchUser { user } => {
                    if !created.iter().any(|id| &id.user == user) {
                        return Err(Error::UnknownUser {
                            stage: stage.name.clone(),
                            user: user.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

const SHELLS: &[&str] = &["sh", "ash", "bash", "dash", "zsh", "ksh", "mksh"];

/// Launchers that exec their first non-option argument.
const LAUNCHERS: &[&str] = &["env", "busybox"];

/// Whether `entrypoint` ends up running a shell as PID 1, looking through
/// `env` and `busybox` launchers (`/usr/bin/env sh -c ...`, `busybox ash ...`).
fn is_shell_wrapped(entrypoint: &[String]) -> bool {
    let mut args = entrypoint.iter().map(String::as_str);
    let mut program = args.next();
    while let Some(name) = program.map(program_name) {
        if SHELLS.contains(&name) {
            return true;
        }
        if !LAUNCHERS.contains(&name) {
            return false;
        }
        // Skip launcher options and `VAR=value` assignments.
        program = args.find(|a| !a.starts_with('-') && !a.contains('='));
    }
    false
}

fn program_name(arg: &str) -> &str {
    match arg.rsplit_once('/') {
        Some((_, name)) => name,
        None => arg,
    }
}

fn validate_terminal(stage: &Stage) -> Result<()> {
    let Some(entrypoint) = stage.entrypoint.as_ref().filter(|e| !e.is_empty()) else {
        return Err(Error::MissingEntrypoint {
            stage: stage.name.clone(),
        });
    };
    if is_shell_wrapped(entrypoint) {
        return Err(Error::ShellEntrypoint {
            stage: stage.name.clone(),
            entrypoint: entrypoint.clone(),
        });
    }
    if stage.final_user().is_none() {
        return Err(Error::PrivilegedRuntime {
            stage: stage.name.clone(),
        });
    }
    // Nothing may land in the final root while the stage is still privileged.
    for step in &stage.steps {
        let populating = match step {
            Step::SwitchUser { .. } => break,
            Step::CreateIdentity(_) => continue,
            Step::Context { .. } => "context copy",
            Step::Promote(_) => "promotion",
            Step::Run { .. } => "command",
        };
        return Err(Error::PopulatedBeforeUserSwitch {
            stage: stage.name.clone(),
            step: populating.to_owned(),
        });
    }
    Ok(())
}

/// Resolves an in-stage path against `workdir` into a root-relative path.
///
/// `"node_modules"` with workdir `/app` becomes `app/node_modules`;
/// `"/srv/data"` becomes `srv/data`; `"."` becomes the workdir itself.
pub fn stage_path(workdir: &str, path: &str) -> Result<PathBuf> {
    let workdir = normalize(workdir)?;
    if path.starts_with('/') {
        normalize(path)
    } else {
        Ok(workdir.join(normalize(path)?))
    }
}

/// Validates a path that must stay inside the directory it is joined to.
pub fn relative_path(path: &str) -> Result<PathBuf> {
    if Path::new(path).is_absolute() {
        return Err(Error::InvalidPath {
            path: path.to_owned(),
            reason: "must be relative",
        });
    }
    normalize(path)
}

fn normalize(path: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::InvalidPath {
                    path: path.to_owned(),
                    reason: "must not contain `..`",
                });
            }
            Component::Prefix(_) => {
                return Err(Error::InvalidPath {
                    path: path.to_owned(),
                    reason: "must not carry a drive prefix",
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_path_resolves_relative_against_workdir() {
        assert_eq!(
            stage_path("/app", "node_modules").unwrap(),
            PathBuf::from("app/node_modules")
        );
        assert_eq!(stage_path("/app", ".").unwrap(), PathBuf::from("app"));
        assert_eq!(stage_path("/app", "./.next/static").unwrap(), PathBuf::from("app/.next/static"));
    }

    #[test]
    fn stage_path_absolute_ignores_workdir() {
        assert_eq!(stage_path("/app", "/srv/data").unwrap(), PathBuf::from("srv/data"));
        assert_eq!(stage_path("/app", "/").unwrap(), PathBuf::new());
    }

    #[test]
    fn stage_path_rejects_parent_components() {
        assert!(matches!(
            stage_path("/app", "../etc/passwd"),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn relative_path_rejects_absolute() {
        assert!(relative_path("/etc").is_err());
        assert_eq!(relative_path("src/app").unwrap(), PathBuf::from("src/app"));
    }

    #[test]
    fn command_line_displays_program_and_args() {
        let cmd = CommandLine::new("yarn", ["install", "--frozen-lockfile"]);
        assert_eq!(cmd.to_string(), "yarn install --frozen-lockfile");
    }
}
