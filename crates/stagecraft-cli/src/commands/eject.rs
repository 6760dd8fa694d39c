use std::path::Path;

use stagecraft_build::dockerfile::DockerfileGenerator;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let pipeline = super::load_project(project_dir)?.pipeline;

    let dockerfile = DockerfileGenerator::new(&pipeline).render();
    stagecraft_build::eject::eject(project_dir, &dockerfile)?;

    println!("Ejected Dockerfile to .stagecraft/Dockerfile");
    println!("You can now edit it directly and build it with any container builder.");
    Ok(())
}
