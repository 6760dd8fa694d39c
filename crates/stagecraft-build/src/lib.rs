//! Pipeline execution, image export, and Dockerfile rendering for stagecraft.
//!
//! # Build pipeline
//!
//! ```text
//! stagecraft build
//!   1. Discover   ── manifest + first lockfile variant present
//!   2. Plan       ── standard_pipeline(): deps → builder → runner
//!   3. Validate   ── Pipeline::validate(), nothing runs on error
//!   4. Per stage  ── fresh root, resolve promotions, cache key
//!                    hit: restore root + ownership ledger
//!                    miss: execute steps, store root
//!   5. Export     ── terminal root → image.tar + image.json
//! ```
//!
//! # Isolation
//!
//! A stage sees only what its steps copy in: build-context files (minus
//! `.git`, `.stagecraft` and `.stagecraftignore` entries) and paths promoted
//! from earlier stages. Commands run with the stage's declared environment
//! plus a small host passthrough (`PATH`, `HOME`, `TMPDIR`, `LANG`).
//!
//! # Ownership
//!
//! Ownership is tracked in a per-stage ledger rather than applied on the
//! host, and written into the exported archive. Every entry of the runtime
//! image belongs to the runtime identity; a privileged entry aborts export.

pub mod cache;
pub mod context;
pub mod digest;
pub mod dockerfile;
pub mod doctor;
pub mod eject;
pub mod engine;
pub mod error;
pub mod executor;
pub mod image;
pub mod ownership;
mod promote;
pub mod stage;
mod tree;

pub use cache::{CacheKey, StageCache};
pub use context::BuildContext;
pub use dockerfile::DockerfileGenerator;
pub use doctor::{CheckResult, DoctorReport, run_doctor};
pub use engine::{BuildOutcome, PipelineRunner, RunOptions, StageReport, build_project};
pub use error::PipelineError;
pub use executor::{CommandExecutor, ExecError, Invocation, RealExecutor};
pub use image::{ImageArtifact, ImageConfig};
