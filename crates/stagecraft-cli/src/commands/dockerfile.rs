use std::path::Path;

use stagecraft_build::dockerfile::DockerfileGenerator;
use stagecraft_build::eject::{is_ejected, load_ejected_dockerfile};

/// Prints the ejected Dockerfile if there is one, otherwise the generated one.
pub async fn dockerfile() -> anyhow::Result<()> {
    let project_dir = Path::new(".");

    if is_ejected(project_dir) {
        eprintln!("Using ejected .stagecraft/Dockerfile");
        print!("{}", load_ejected_dockerfile(project_dir)?);
        return Ok(());
    }

    let pipeline = super::load_project(project_dir)?.pipeline;
    print!("{}", DockerfileGenerator::new(&pipeline).render());
    Ok(())
}
