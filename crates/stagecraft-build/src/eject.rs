use std::path::{Path, PathBuf};

const EJECT_DIR: &str = ".stagecraft";
const EJECTED_DOCKERFILE: &str = "Dockerfile";

/// Path of the ejected Dockerfile for `project_dir`.
pub fn ejected_path(project_dir: &Path) -> PathBuf {
    project_dir.join(EJECT_DIR).join(EJECTED_DOCKERFILE)
}

/// Writes the rendered Dockerfile into `.stagecraft/Dockerfile` so it can be
/// edited and used with any container builder.
pub fn eject(project_dir: &Path, dockerfile_content: &str) -> Result<PathBuf, EjectError> {
    let eject_dir = project_dir.join(EJECT_DIR);
    std::fs::create_dir_all(&eject_dir).map_err(|e| EjectError::CreateDir {
        path: eject_dir.clone(),
        source: e,
    })?;

    let dockerfile_path = ejected_path(project_dir);
    if dockerfile_path.exists() {
        return Err(EjectError::AlreadyEjected(dockerfile_path));
    }

    std::fs::write(&dockerfile_path, dockerfile_content).map_err(|e| EjectError::Write {
        path: dockerfile_path.clone(),
        source: e,
    })?;

    Ok(dockerfile_path)
}

pub fn is_ejected(project_dir: &Path) -> bool {
    ejected_path(project_dir).is_file()
}

pub fn load_ejected_dockerfile(project_dir: &Path) -> Result<String, EjectError> {
    let path = ejected_path(project_dir);
    std::fs::read_to_string(&path).map_err(|e| EjectError::Read { path, source: e })
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Dockerfile already ejected at {0}; edit it directly or delete it to re-eject")]
    AlreadyEjected(PathBuf),
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read ejected Dockerfile at {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
