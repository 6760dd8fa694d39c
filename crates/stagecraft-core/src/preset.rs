//! The standard three-stage web application pipeline.
//!
//! ```text
//! deps     manifest + lockfile ──► locked install ──► post-install hooks
//!            exposes node_modules
//! builder  node_modules (from deps) + full source ──► build
//!            exposes public, .next/standalone, .next/static
//! runner   create identity ──► USER ──► promote static assets, bundle
//!            entrypoint: node server.js
//! ```

use crate::config::StagecraftConfig;
use crate::manifest::Manifest;
use crate::pipeline::{CommandRole, Owner, Pipeline, Promotion, Stage, Step};

pub const DEPS_STAGE: &str = "deps";
pub const BUILD_STAGE: &str = "builder";
pub const RUNTIME_STAGE: &str = "runner";

/// Directory the locked install populates, relative to the workdir.
pub const DEPENDENCY_DIR: &str = "node_modules";

pub fn standard_pipeline(config: &StagecraftConfig, manifest: &Manifest) -> Pipeline {
    Pipeline {
        stages: vec![
            deps_stage(config, manifest),
            build_stage(config),
            runtime_stage(config),
        ],
    }
}

fn deps_stage(config: &StagecraftConfig, manifest: &Manifest) -> Stage {
    let mut stage = Stage::new(
        DEPS_STAGE,
        &config.project.base_image,
        &config.project.workdir,
    );
    stage.steps.push(Step::Context {
        paths: manifest.inputs(),
    });
    stage
        .steps
        .extend(manifest.lockfile.setup.iter().map(|command| Step::Run {
            command: command.clone(),
            role: CommandRole::Setup,
        }));
    stage
        .steps
        .extend(manifest.lockfile.install.iter().map(|command| Step::Run {
            command: command.clone(),
            role: CommandRole::Install,
        }));
    stage
        .steps
        .extend(config.deps.post_install.iter().map(|command| Step::Run {
            command: command.clone(),
            role: CommandRole::Hook,
        }));
    stage.outputs.push(DEPENDENCY_DIR.to_owned());
    stage
}

fn build_stage(config: &StagecraftConfig) -> Stage {
    let mut stage = Stage::new(
        BUILD_STAGE,
        &config.project.base_image,
        &config.project.workdir,
    );
    stage.env.extend(config.build.env.clone());
    if config.build.disable_telemetry {
        stage
            .env
            .insert(config.build.telemetry_env.clone(), "1".to_owned());
    }
    stage.steps.push(Step::Promote(Promotion {
        from: DEPS_STAGE.to_owned(),
        source: DEPENDENCY_DIR.to_owned(),
        destination: DEPENDENCY_DIR.to_owned(),
        owner: None,
    }));
    stage.steps.push(Step::Context { paths: Vec::new() });
    stage.steps.push(Step::Run {
        command: config.build.command.clone(),
        role: CommandRole::Build,
    });
    stage.outputs = vec![
        config.build.static_dir.clone(),
        config.build.bundle_dir.clone(),
        config.build.bundle_static_dir.clone(),
    ];
    stage
}

fn runtime_stage(config: &StagecraftConfig) -> Stage {
    let identity = config.runtime.identity();
    let owner = Owner {
        user: identity.user.clone(),
        group: identity.group.clone(),
    };
    let promote = |source: &str, destination: &str| {
        Step::Promote(Promotion {
            from: BUILD_STAGE.to_owned(),
            source: source.to_owned(),
            destination: destination.to_owned(),
            owner: Some(owner.clone()),
        })
    };

    let mut stage = Stage::new(
        RUNTIME_STAGE,
        &config.project.base_image,
        &config.project.workdir,
    );
    stage.env.extend(config.runtime.env.clone());
    if config.build.disable_telemetry {
        stage
            .env
            .insert(config.build.telemetry_env.clone(), "1".to_owned());
    }
    stage.steps.push(Step::CreateIdentity(identity.clone()));
    stage.steps.push(Step::SwitchUser {
        user: identity.user,
    });
    stage.steps.push(promote(
        &config.build.static_dir,
        &config.build.static_dir,
    ));
    stage.steps.push(promote(&config.build.bundle_dir, "."));
    stage.steps.push(promote(
        &config.build.bundle_static_dir,
        &config.build.bundle_static_dir,
    ));
    stage.entrypoint = Some(config.runtime.entrypoint.clone());
    stage
}
