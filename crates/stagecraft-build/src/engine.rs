//! Pipeline execution.
//!
//! Stages run strictly in declaration order. Each stage gets a fresh root,
//! has its promotions resolved up front, and is either restored from the
//! stage cache or executed step by step. The terminal stage's root is then
//! exported as the runtime image. Any failure aborts the run and leaves no
//! image behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use stagecraft_core::{
    CommandLine, CommandRole, Identity, Manifest, Pipeline, Stage, StagecraftConfig, Step,
    standard_pipeline,
};

use crate::cache::{CacheKey, StageCache};
use crate::context::BuildContext;
use crate::digest::digest_tree;
use crate::error::PipelineError;
use crate::executor::{CommandExecutor, Invocation, RealExecutor};
use crate::image::{self, ImageArtifact};
use crate::ownership::Ownership;
use crate::promote::{self, ResolvedPromotion};
use crate::stage::StageRoot;

/// Where a run reads from and writes to.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub context: BuildContext,
    /// Parent of every stage root.
    pub work_dir: PathBuf,
    /// Receives `image.tar` and `image.json`.
    pub output_dir: PathBuf,
    pub cache: Option<StageCache>,
    /// mtime stamped on every archive entry.
    pub timestamp: u64,
}

impl RunOptions {
    pub fn new(context: BuildContext, work_dir: &Path, output_dir: &Path) -> Self {
        Self {
            context,
            work_dir: work_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            cache: None,
            timestamp: image::source_date_epoch(),
        }
    }

    /// Options for `project_dir` laid out as `config` describes. The cache,
    /// work and output directories are excluded from the build context.
    pub fn from_config(project_dir: &Path, config: &StagecraftConfig, use_cache: bool) -> Self {
        let context = BuildContext::new(project_dir)
            .exclude(&config.cache.dir)
            .exclude(&config.output.dir)
            .exclude(&config.output.work_dir);
        let options = Self::new(
            context,
            &project_dir.join(&config.output.work_dir),
            &project_dir.join(&config.output.dir),
        );
        if use_cache && config.cache.enabled {
            options.with_cache(StageCache::new(&project_dir.join(&config.cache.dir)))
        } else {
            options
        }
    }

    pub fn with_cache(mut self, cache: StageCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

/// Per-stage summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub key: CacheKey,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub stages: Vec<StageReport>,
    pub image: ImageArtifact,
}

/// Executes pipelines, parameterized over the executor for testability.
pub struct PipelineRunner<E: CommandExecutor = RealExecutor> {
    executor: E,
    options: RunOptions,
}

impl PipelineRunner<RealExecutor> {
    pub fn new(options: RunOptions) -> Self {
        Self {
            executor: RealExecutor,
            options,
        }
    }
}

impl<E: CommandExecutor> PipelineRunner<E> {
    pub fn with_executor(executor: E, options: RunOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs every stage of `pipeline` and exports the terminal stage.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<BuildOutcome, PipelineError> {
        pipeline.validate()?;
        image::clear(&self.options.output_dir)?;

        let mut roots: HashMap<String, StageRoot> = HashMap::new();
        let mut reports = Vec::with_capacity(pipeline.stages.len());

        for stage in &pipeline.stages {
            let resolved = promote::resolve_all(stage, &pipeline.stages, &roots)?;
            let key = self.cache_key(stage, &resolved)?;
            tracing::info!(stage = %stage.name, base = %stage.base, key = key.short(), "stage started");

            let mut root = StageRoot::create(&self.options.work_dir, &stage.name).map_err(|e| {
                PipelineError::StageRoot {
                    stage: stage.name.clone(),
                    path: self.options.work_dir.join(&stage.name),
                    source: e,
                }
            })?;

            let cached = match &self.options.cache {
                Some(cache) => cache.restore(&key, &mut root)?,
                None => false,
            };
            if cached {
                tracing::info!(stage = %stage.name, key = key.short(), "cache hit");
            } else {
                if self.options.cache.is_some() {
                    tracing::info!(stage = %stage.name, key = key.short(), "cache miss");
                }
                self.execute(stage, &resolved, &mut root).await?;
                if let Some(cache) = &self.options.cache {
                    cache.store(&key, &root)?;
                }
            }

            reports.push(StageReport {
                name: stage.name.clone(),
                key,
                cached,
            });
            roots.insert(stage.name.clone(), root);
        }

        let terminal = pipeline
            .terminal()
            .ok_or(stagecraft_core::Error::EmptyPipeline)?;
        let root = roots
            .get(&terminal.name)
            .ok_or(stagecraft_core::Error::EmptyPipeline)?;
        let image = image::export_image(
            terminal,
            root,
            &self.options.output_dir,
            self.options.timestamp,
        )?;

        Ok(BuildOutcome {
            stages: reports,
            image,
        })
    }

    /// Key over the stage definition plus the content of every input, in
    /// step order.
    fn cache_key(
        &self,
        stage: &Stage,
        resolved: &[ResolvedPromotion<'_>],
    ) -> Result<CacheKey, PipelineError> {
        let mut inputs = Vec::new();
        let mut promotions = resolved.iter();
        for step in &stage.steps {
            match step {
                Step::Context { paths } => {
                    let digest = self.options.context.digest(paths).map_err(|e| {
                        PipelineError::Context {
                            stage: stage.name.clone(),
                            source: e,
                        }
                    })?;
                    inputs.push(digest);
                }
                Step::Promote(promotion) => {
                    let Some(resolved) = promotions.next() else {
                        return Err(PipelineError::PromotionFailure {
                            stage: stage.name.clone(),
                            from: promotion.from.clone(),
                            path: promotion.source.clone(),
                        });
                    };
                    let digest =
                        digest_tree(&resolved.source).map_err(|e| PipelineError::PromotionCopy {
                            stage: stage.name.clone(),
                            from: promotion.from.clone(),
                            path: promotion.source.clone(),
                            source: e,
                        })?;
                    inputs.push(digest);
                }
                _ => {}
            }
        }
        Ok(CacheKey::compute(stage, &inputs)?)
    }

    async fn execute(
        &self,
        stage: &Stage,
        resolved: &[ResolvedPromotion<'_>],
        root: &mut StageRoot,
    ) -> Result<(), PipelineError> {
        let io_error = |path: &Path, e: std::io::Error| PipelineError::StageRoot {
            stage: stage.name.clone(),
            path: path.to_path_buf(),
            source: e,
        };

        let workdir = root.resolve(&stage.path(".")?);
        std::fs::create_dir_all(&workdir).map_err(|e| io_error(&workdir, e))?;

        let mut current: Option<&Identity> = None;
        let mut promotions = resolved.iter().enumerate();

        for step in &stage.steps {
            let owner = match current {
                Some(identity) => Ownership::from(identity),
                None => Ownership::root(),
            };
            match step {
                Step::Context { paths } => {
                    let written = self
                        .options
                        .context
                        .copy_into(paths, &workdir)
                        .map_err(|e| PipelineError::Context {
                            stage: stage.name.clone(),
                            source: e,
                        })?;
                    let rootfs = root.rootfs();
                    let relative = written
                        .iter()
                        .map(|path| path.strip_prefix(&rootfs).map(Path::to_path_buf))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| io_error(&rootfs, std::io::Error::other(e)))?;
                    root.ledger.claim_unowned(&relative, &owner);
                    tracing::debug!(stage = %stage.name, files = written.len(), "copied build context");
                }
                Step::Promote(promotion) => {
                    let Some((sequence, resolved)) = promotions.next() else {
                        return Err(PipelineError::PromotionFailure {
                            stage: stage.name.clone(),
                            from: promotion.from.clone(),
                            path: promotion.source.clone(),
                        });
                    };
                    let owner = match promote::declared_owner(stage, promotion)? {
                        Some(declared) => declared,
                        None => owner,
                    };
                    promote::apply(resolved, root, &owner, sequence)?;
                }
                Step::Run { command, role } => {
                    let mut env = root.sandbox_env();
                    env.extend(stage.env.clone());
                    let invocation = Invocation {
                        stage: stage.name.clone(),
                        command: command.clone(),
                        cwd: workdir.clone(),
                        env,
                        identity: current.cloned(),
                    };
                    tracing::info!(stage = %stage.name, command = %command, "running");
                    self.executor
                        .run(&invocation)
                        .await
                        .map_err(|source| command_error(stage, command, *role, source))?;

                    let rootfs = root.rootfs();
                    let entries =
                        crate::tree::list_entries(&rootfs).map_err(|e| io_error(&rootfs, e))?;
                    root.ledger.claim_unowned(&entries, &owner);
                }
                Step::CreateIdentity(identity) => {
                    tracing::debug!(
                        stage = %stage.name,
                        user = %identity.user,
                        uid = identity.uid,
                        group = %identity.group,
                        gid = identity.gid,
                        "created identity"
                    );
                }
                Step::SwitchUser { user } => {
                    current = stage.identities().find(|id| &id.user == user);
                    if current.is_none() {
                        return Err(stagecraft_core::Error::UnknownUser {
                            stage: stage.name.clone(),
                            user: user.clone(),
                        }
                        .into());
                    }
                    tracing::debug!(stage = %stage.name, user = %user, "switched user");
                }
            }
        }
        Ok(())
    }
}

/// Discovers the manifest in `project_dir`, derives the standard pipeline
/// from `config` and runs it.
pub async fn build_project<E: CommandExecutor>(
    executor: E,
    project_dir: &Path,
    config: &StagecraftConfig,
    use_cache: bool,
) -> Result<BuildOutcome, PipelineError> {
    let manifest = Manifest::discover(project_dir, config)?;
    tracing::info!(
        manifest = %manifest.file,
        lockfile = %manifest.lockfile.name,
        "detected package manager"
    );
    let pipeline = standard_pipeline(config, &manifest);
    let options = RunOptions::from_config(project_dir, config, use_cache);
    PipelineRunner::with_executor(executor, options)
        .run(&pipeline)
        .await
}

/// Maps a failed command to the error its role calls for.
fn command_error(
    stage: &Stage,
    command: &CommandLine,
    role: CommandRole,
    source: crate::executor::ExecError,
) -> PipelineError {
    let stage = stage.name.clone();
    let command = command.to_string();
    // A missing program is a tooling problem whatever the command was for.
    if matches!(source, crate::executor::ExecError::NotFound { .. }) {
        return PipelineError::CommandFailed {
            stage,
            command,
            source,
        };
    }
    match role {
        CommandRole::Install => PipelineError::ResolutionMismatch {
            stage,
            command,
            source,
        },
        CommandRole::Build => PipelineError::BuildFailure {
            stage,
            command,
            source,
        },
        CommandRole::Hook | CommandRole::Setup => PipelineError::CommandFailed {
            stage,
            command,
            source,
        },
    }
}
