use std::path::Path;

use stagecraft_core::Step;

pub async fn plan(json: bool) -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let project = super::load_project(project_dir)?;
    let pipeline = &project.pipeline;

    if json {
        println!("{}", serde_json::to_string_pretty(pipeline)?);
        return Ok(());
    }

    println!(
        "Image {} ({} via {})",
        project.manifest.image_name(&project.config, project_dir),
        project.manifest.file,
        project.manifest.lockfile.file
    );
    println!();

    for (index, stage) in pipeline.stages.iter().enumerate() {
        println!(
            "{n}. {name} (from {base}, workdir {workdir})",
            n = index + 1,
            name = stage.name,
            base = stage.base,
            workdir = stage.workdir
        );
        for (key, value) in &stage.env {
            println!("     env      {key}={value}");
        }
        for step in &stage.steps {
            println!("     {}", describe(step));
        }
        if !stage.outputs.is_empty() {
            println!("     exposes  {}", stage.outputs.join(", "));
        }
        if let Some(entrypoint) = &stage.entrypoint {
            println!("     entry    {}", entrypoint.join(" "));
        }
    }
    Ok(())
}

fn describe(step: &Step) -> String {
    match step {
        Step::Context { paths } if paths.is_empty() => "context  (all files)".to_owned(),
        Step::Context { paths } => format!("context  {}", paths.join(" ")),
        Step::Promote(p) => {
            let owner = match &p.owner {
                Some(o) => format!(" as {}:{}", o.user, o.group),
                None => String::new(),
            };
            format!("promote  {}:{} -> {}{owner}", p.from, p.source, p.destination)
        }
        Step::Run { command, .. } => format!("run      {command}"),
        Step::CreateIdentity(id) => {
            format!("identity {}:{} ({}:{})", id.user, id.group, id.uid, id.gid)
        }
        Step::SwitchUser { user } => format!("user     {user}"),
    }
}
