use std::path::Path;

use stagecraft_build::{RealExecutor, build_project};
use stagecraft_core::{Manifest, StagecraftConfig};

pub async fn build(no_cache: bool) -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let config = StagecraftConfig::load(project_dir)?;

    let outcome = match build_project(RealExecutor, project_dir, &config, !no_cache).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(kind = e.kind(), "build failed");
            return Err(e.into());
        }
    };

    println!();
    for stage in &outcome.stages {
        let status = if stage.cached { "cached" } else { "built" };
        println!("  {:<10} {status:<7} {}", stage.name, stage.key.short());
    }
    let manifest = Manifest::discover(project_dir, &config)?;
    println!();
    println!("Image:   {}", manifest.image_name(&config, project_dir));
    println!("Archive: {}", outcome.image.archive.display());
    println!("Config:  {}", outcome.image.config.display());
    println!("Digest:  {}", outcome.image.digest);
    Ok(())
}
