use stagecraft_core::{Pipeline, Stage, Step};

/// Renders a pipeline as an equivalent multi-stage Dockerfile.
///
/// Stage names become build-stage aliases, promotions become
/// `COPY --from=<stage>`, and the terminal stage ends in an exec-form
/// `ENTRYPOINT`. No `EXPOSE` is ever emitted.
pub struct DockerfileGenerator<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# Generated by stagecraft. Edit stagecraft.toml, or eject.\n");
        for (index, stage) in self.pipeline.stages.iter().enumerate() {
            out.push('\n');
            out.push_str(&format!(
                "# === Stage {n}: {name} ===\n",
                n = index + 1,
                name = stage.name
            ));
            self.render_stage(stage, &mut out);
        }
        out
    }

    fn render_stage(&self, stage: &Stage, out: &mut String) {
        out.push_str(&format!("FROM {} AS {}\n", stage.base, stage.name));
        out.push_str(&format!("WORKDIR {}\n", stage.workdir));
        for (key, value) in &stage.env {
            out.push_str(&format!("ENV {key}={}\n", env_value(value)));
        }

        for step in &stage.steps {
            match step {
                Step::Context { paths } if paths.is_empty() => out.push_str("COPY . .\n"),
                Step::Context { paths } => {
                    out.push_str(&format!("COPY {} ./\n", paths.join(" ")));
                }
                Step::Promote(promotion) => {
                    let source_workdir = self
                        .pipeline
                        .stage(&promotion.from)
                        .map_or("/", |s| s.workdir.as_str());
                    let chown = match &promotion.owner {
                        Some(o) => format!(" --chown={}:{}", o.user, o.group),
                        None => String::new(),
                    };
                    out.push_str(&format!(
                        "COPY --from={from}{chown} {src} {dst}\n",
                        from = promotion.from,
                        src = absolute(source_workdir, &promotion.source),
                        dst = destination(&promotion.destination),
                    ));
                }
                Step::Run { command, .. } => out.push_str(&format!("RUN {command}\n")),
                Step::CreateIdentity(identity) => {
                    out.push_str(&format!(
                        "RUN addgroup --system --gid {gid} {group}\n",
                        gid = identity.gid,
                        group = identity.group
                    ));
                    out.push_str(&format!(
                        "RUN adduser --system --uid {uid} --ingroup {group} {user}\n",
                        uid = identity.uid,
                        group = identity.group,
                        user = identity.user
                    ));
                }
                Step::SwitchUser { user } => out.push_str(&format!("USER {user}\n")),
            }
        }

        if let Some(entrypoint) = &stage.entrypoint {
            let args: Vec<String> = entrypoint.iter().map(|a| format!("{a:?}")).collect();
            out.push_str(&format!("ENTRYPOINT [{}]\n", args.join(", ")));
        }
    }
}

/// In-stage path as an absolute path inside `workdir`'s stage.
fn absolute(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_owned();
    }
    let relative = path.trim_start_matches("./");
    let workdir = workdir.trim_end_matches('/');
    if relative.is_empty() || relative == "." {
        if workdir.is_empty() { "/".to_owned() } else { workdir.to_owned() }
    } else {
        format!("{workdir}/{relative}")
    }
}

fn destination(path: &str) -> String {
    if path.starts_with('/') {
        return path.to_owned();
    }
    let relative = path.trim_start_matches("./");
    if relative.is_empty() || relative == "." {
        "./".to_owned()
    } else {
        format!("./{relative}")
    }
}

fn env_value(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("{value:?}")
    } else {
        value.to_owned()
    }
}
