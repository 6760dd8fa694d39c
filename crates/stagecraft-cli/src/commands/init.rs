use std::path::Path;

use stagecraft_build::context::IGNORE_FILE;
use stagecraft_core::CONFIG_FILE;

const CONFIG_TEMPLATE: &str = r#"[project]
# name = "my-app"
# base_image = "node:20-alpine"
# workdir = "/app"

[deps]
# Evaluated top-down; the first lockfile present selects the install.
# post_install = [{ program = "npm", args = ["install", "sharp"] }]

[build]
# command = { program = "npm", args = ["run", "build"] }
# disable_telemetry = true

[runtime]
# user = "nextjs"
# uid = 1001
# group = "nodejs"
# gid = 1001
# entrypoint = ["node", "server.js"]

[cache]
# enabled = true
"#;

const IGNORE_TEMPLATE: &str = "node_modules\n.next\n.env*.local\n";

/// Initialize stagecraft in an existing web project.
pub async fn init_project() -> anyhow::Result<()> {
    if !Path::new("package.json").exists() {
        anyhow::bail!("package.json not found. Run this command from a project root.");
    }

    let mut created = Vec::new();

    for (path, content) in [(CONFIG_FILE, CONFIG_TEMPLATE), (IGNORE_FILE, IGNORE_TEMPLATE)] {
        if Path::new(path).exists() {
            eprintln!("{path} already exists, skipping");
        } else {
            std::fs::write(path, content)?;
            created.push(path);
        }
    }

    if created.is_empty() {
        println!("Nothing to create, already initialized.");
    } else {
        for f in &created {
            println!("Created {f}");
        }
    }

    println!();
    println!("Next steps:");
    println!();
    println!("  1. Enable standalone output in next.config.js:");
    println!("     output: 'standalone'");
    println!();
    println!("  2. Check your setup:");
    println!("     stagecraft doctor");
    println!();
    println!("  3. Build the runtime image:");
    println!("     stagecraft build");

    Ok(())
}
