mod build;
mod clean;
mod dockerfile;
mod doctor;
mod eject;
mod init;
mod plan;

use std::path::Path;

use stagecraft_core::{Manifest, Pipeline, StagecraftConfig, standard_pipeline};

pub use build::build;
pub use clean::clean;
pub use dockerfile::dockerfile;
pub use doctor::doctor;
pub use eject::eject;
pub use init::init_project;
pub use plan::plan;

/// Everything a command needs to know about the project in the current directory.
pub(crate) struct Project {
    pub config: StagecraftConfig,
    pub manifest: Manifest,
    pub pipeline: Pipeline,
}

/// Loads configuration, discovers the manifest and derives the validated
/// standard pipeline for `project_dir`.
pub(crate) fn load_project(project_dir: &Path) -> anyhow::Result<Project> {
    let config = StagecraftConfig::load(project_dir)?;
    let manifest = Manifest::discover(project_dir, &config)?;
    let pipeline = standard_pipeline(&config, &manifest);
    pipeline.validate()?;
    Ok(Project {
        config,
        manifest,
        pipeline,
    })
}
