use std::path::PathBuf;

use crate::cache::CacheError;
use crate::context::ContextError;
use crate::executor::ExecError;
use crate::image::ExportError;

/// Every way a pipeline run can fail. All of them abort the run; no partial
/// image is ever written.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid pipeline definition, or manifest/lockfile discovery failure.
    #[error(transparent)]
    Definition(#[from] stagecraft_core::Error),

    #[error("stage '{stage}': locked install `{command}` failed; lockfile and manifest disagree")]
    ResolutionMismatch {
        stage: String,
        command: String,
        source: ExecError,
    },

    #[error("stage '{stage}': build command `{command}` failed")]
    BuildFailure {
        stage: String,
        command: String,
        source: ExecError,
    },

    #[error("stage '{stage}': command `{command}` failed")]
    CommandFailed {
        stage: String,
        command: String,
        source: ExecError,
    },

    #[error("stage '{stage}': promoted path {path:?} does not exist in stage '{from}'")]
    PromotionFailure {
        stage: String,
        from: String,
        path: String,
    },

    #[error("stage '{stage}': failed to promote {path:?} from '{from}'")]
    PromotionCopy {
        stage: String,
        from: String,
        path: String,
        source: std::io::Error,
    },

    #[error("stage '{stage}': failed to prepare stage root at {path}")]
    StageRoot {
        stage: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("stage '{stage}': failed to copy build context")]
    Context {
        stage: String,
        source: ContextError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl PipelineError {
    /// Short machine-readable kind, used in logs and CLI summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Definition(stagecraft_core::Error::ManifestMissing { .. }) => "manifest_missing",
            Self::Definition(_) => "definition",
            Self::ResolutionMismatch { .. } => "resolution_mismatch",
            Self::BuildFailure { .. } => "build_failure",
            Self::CommandFailed { .. } => "command_failed",
            Self::PromotionFailure { .. } | Self::PromotionCopy { .. } => "promotion_failure",
            Self::StageRoot { .. } | Self::Context { .. } => "io",
            Self::Cache(_) => "cache",
            Self::Export(_) => "export",
        }
    }
}
