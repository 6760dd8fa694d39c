use std::fmt;
use std::path::Path;

use stagecraft_core::{CONFIG_FILE, Manifest, StagecraftConfig};

use crate::executor::CommandExecutor;

// ── Doctor types ──

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub config_file: CheckResult,
    pub manifest: CheckResult,
    pub lockfile: CheckResult,
    pub tools: Vec<ToolCheck>,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.config_file.passed
            && self.manifest.passed
            && self.lockfile.passed
            && self.tools.iter().all(|t| t.result.passed)
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stagecraft doctor")?;
        row(f, CONFIG_FILE, &self.config_file)?;
        row(f, "manifest", &self.manifest)?;
        row(f, "lockfile", &self.lockfile)?;
        for tool in &self.tools {
            row(f, &tool.name, &tool.result)?;
        }
        Ok(())
    }
}

fn row(f: &mut fmt::Formatter<'_>, label: &str, result: &CheckResult) -> fmt::Result {
    writeln!(f, "  [{}] {label:<16} {}", result.icon(), result.detail)
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCheck {
    pub name: String,
    pub result: CheckResult,
}

/// Checks that `project_dir` can be built: configuration, manifest, lockfile,
/// and every program the build will invoke.
pub async fn run_doctor<E: CommandExecutor>(executor: &E, project_dir: &Path) -> DoctorReport {
    let mut report = DoctorReport::default();

    // 1. Configuration
    let config = match StagecraftConfig::load(project_dir) {
        Ok(config) => {
            report.config_file = if project_dir.join(CONFIG_FILE).is_file() {
                CheckResult::ok("Found")
            } else {
                CheckResult::ok("Not found, using defaults")
            };
            config
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&e.to_string());
            StagecraftConfig::default()
        }
    };

    // 2. Manifest and lockfile
    let manifest = match Manifest::discover(project_dir, &config) {
        Ok(manifest) => {
            // arch-lint: allow(no-silent-result-drop) reason="name and version are optional package.json fields, shown for information only"
            let name = manifest.name.as_deref().unwrap_or("unnamed");
            // arch-lint: allow(no-silent-result-drop) reason="name and version are optional package.json fields, shown for information only"
            let version = manifest.version.as_deref().unwrap_or("0.0.0");
            report.manifest = CheckResult::ok(&format!("{} ({name}@{version})", manifest.file));
            report.lockfile = CheckResult::ok(&format!(
                "{} ({})",
                manifest.lockfile.file, manifest.lockfile.name
            ));
            Some(manifest)
        }
        Err(e @ stagecraft_core::Error::ManifestMissing { .. }) => {
            report.manifest = CheckResult::ok(&config.project.manifest);
            report.lockfile = CheckResult::fail(&e.to_string());
            None
        }
        Err(e) => {
            report.manifest = CheckResult::fail(&e.to_string());
            report.lockfile = CheckResult::fail("not checked");
            None
        }
    };

    // 3. Tools
    for program in required_programs(&config, manifest.as_ref()) {
        let result = match executor.probe(&program).await {
            Ok(version) if version.is_empty() => CheckResult::ok("Found"),
            Ok(version) => CheckResult::ok(&version),
            Err(e) => CheckResult::fail(&e.to_string()),
        };
        report.tools.push(ToolCheck {
            name: program,
            result,
        });
    }

    report
}

/// Programs the build invokes, in first-use order.
fn required_programs(config: &StagecraftConfig, manifest: Option<&Manifest>) -> Vec<String> {
    let (setup, install) = match manifest {
        Some(m) => (m.lockfile.setup.as_slice(), m.lockfile.install.as_slice()),
        None => (&[][..], &[][..]),
    };
    let mut programs: Vec<String> = Vec::new();
    for command in setup
        .iter()
        .chain(install)
        .chain(&config.deps.post_install)
        .chain(std::iter::once(&config.build.command))
    {
        if !programs.contains(&command.program) {
            programs.push(command.program.clone());
        }
    }
    programs
}
