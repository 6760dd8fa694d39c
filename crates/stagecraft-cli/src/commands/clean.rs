use std::path::Path;

use stagecraft_core::StagecraftConfig;

/// Removes stage roots, the exported image and the stage cache. An ejected
/// Dockerfile is left in place.
pub async fn clean() -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let config = StagecraftConfig::load(project_dir)?;

    let mut removed = 0;
    for dir in [&config.output.work_dir, &config.output.dir, &config.cache.dir] {
        let path = project_dir.join(dir);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
            println!("Removed {dir}");
            removed += 1;
        }
    }

    if removed == 0 {
        println!("Nothing to clean.");
    }
    Ok(())
}
