use stagecraft_core::{
    CommandLine, CommandRole, Error, Identity, Owner, Pipeline, Promotion, Stage, Step,
};

fn identity() -> Identity {
    Identity {
        user: "app".to_owned(),
        uid: 1001,
        group: "app".to_owned(),
        gid: 1001,
    }
}

fn producer() -> Stage {
    let mut stage = Stage::new("build", "node:20-alpine", "/app");
    stage.steps.push(Step::Context { paths: Vec::new() });
    stage.steps.push(Step::Run {
        command: CommandLine::new("npm", ["run", "build"]),
        role: CommandRole::Build,
    });
    stage.outputs.push("dist".to_owned());
    stage
}

fn consumer(source: &str) -> Stage {
    let mut stage = Stage::new("run", "node:20-alpine", "/app");
    stage.steps.push(Step::CreateIdentity(identity()));
    stage.steps.push(Step::SwitchUser {
        user: "app".to_owned(),
    });
    stage.steps.push(Step::Promote(Promotion {
        from: "build".to_owned(),
        source: source.to_owned(),
        destination: ".".to_owned(),
        owner: Some(Owner {
            user: "app".to_owned(),
            group: "app".to_owned(),
        }),
    }));
    stage.entrypoint = Some(vec!["node".to_owned(), "index.js".to_owned()]);
    stage
}

fn pipeline(stages: Vec<Stage>) -> Pipeline {
    Pipeline { stages }
}

#[test]
fn valid_two_stage_pipeline() {
    let p = pipeline(vec![producer(), consumer("dist")]);
    p.validate().unwrap();
    assert_eq!(p.terminal().unwrap().name, "run");
    assert_eq!(p.terminal().unwrap().final_user(), Some(&identity()));
}

#[test]
fn nested_path_under_output_is_promotable() {
    pipeline(vec![producer(), consumer("dist/assets")])
        .validate()
        .unwrap();
}

#[test]
fn empty_pipeline_is_rejected() {
    assert!(matches!(
        pipeline(vec![]).validate(),
        Err(Error::EmptyPipeline)
    ));
}

#[test]
fn duplicate_stage_names_are_rejected() {
    let mut second = consumer("dist");
    second.name = "build".to_owned();
    let result = pipeline(vec![producer(), second]).validate();
    assert!(matches!(result, Err(Error::DuplicateStage(name)) if name == "build"));
}

#[test]
fn promotion_from_unknown_stage_is_rejected() {
    let mut stage = consumer("dist");
    if let Step::Promote(p) = &mut stage.steps[2] {
        p.from = "ghost".to_owned();
    }
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::UnknownStage { .. })));
}

#[test]
fn promotion_from_later_stage_is_rejected() {
    let mut first = consumer("dist");
    first.name = "early".to_owned();
    first.entrypoint = None;
    let mut last = producer();
    last.steps.push(Step::CreateIdentity(identity()));
    last.steps.push(Step::SwitchUser {
        user: "app".to_owned(),
    });
    last.entrypoint = Some(vec!["node".to_owned(), "index.js".to_owned()]);

    let result = pipeline(vec![first, last]).validate();
    assert!(matches!(result, Err(Error::ForwardPromotion { .. })));
}

#[test]
fn promotion_from_self_is_rejected() {
    let mut stage = consumer("dist");
    stage.outputs.push("dist".to_owned());
    if let Step::Promote(p) = &mut stage.steps[2] {
        p.from = "run".to_owned();
    }
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::ForwardPromotion { .. })));
}

#[test]
fn promotion_of_unexposed_path_is_rejected() {
    let result = pipeline(vec![producer(), consumer("src")]).validate();
    assert!(matches!(
        result,
        Err(Error::UnexposedPath { ref path, .. }) if path == "src"
    ));
}

#[test]
fn promotion_of_sibling_with_shared_prefix_is_rejected() {
    let result = pipeline(vec![producer(), consumer("dist-old")]).validate();
    assert!(matches!(result, Err(Error::UnexposedPath { .. })));
}

#[test]
fn owner_must_be_created_in_stage() {
    let mut stage = consumer("dist");
    stage.steps.remove(0);
    stage.steps.remove(0);
    stage.steps.push(Step::CreateIdentity(identity()));
    stage.steps.push(Step::SwitchUser {
        user: "app".to_owned(),
    });
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::UnknownUser { .. })));
}

#[test]
fn owner_group_must_exist() {
    let mut stage = consumer("dist");
    if let Step::Promote(p) = &mut stage.steps[2] {
        p.owner = Some(Owner {
            user: "app".to_owned(),
            group: "wheel".to_owned(),
        });
    }
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::UnknownGroup { .. })));
}

#[test]
fn switch_to_unknown_user_is_rejected() {
    let mut stage = consumer("dist");
    stage.steps[1] = Step::SwitchUser {
        user: "nobody".to_owned(),
    };
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::UnknownUser { ref user, .. }) if user == "nobody"));
}

#[test]
fn privileged_identity_is_rejected() {
    let mut stage = consumer("dist");
    stage.steps[0] = Step::CreateIdentity(Identity {
        uid: 0,
        ..identity()
    });
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::PrivilegedIdentity { .. })));
}

#[test]
fn terminal_stage_needs_entrypoint() {
    let mut stage = consumer("dist");
    stage.entrypoint = None;
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::MissingEntrypoint { .. })));

    let mut stage = consumer("dist");
    stage.entrypoint = Some(Vec::new());
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::MissingEntrypoint { .. })));
}

#[test]
fn terminal_stage_must_not_run_as_root() {
    let mut stage = consumer("dist");
    stage.steps.remove(1);
    stage.steps[1] = Step::Promote(Promotion {
        from: "build".to_owned(),
        source: "dist".to_owned(),
        destination: ".".to_owned(),
        owner: None,
    });
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::PrivilegedRuntime { .. })));
}

#[test]
fn shell_wrapped_entrypoint_is_rejected() {
    let mut stage = consumer("dist");
    stage.entrypoint = Some(vec![
        "/bin/sh".to_owned(),
        "-c".to_owned(),
        "node index.js".to_owned(),
    ]);
    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(result, Err(Error::ShellEntrypoint { .. })));
}

#[test]
fn shell_launchers_and_flag_clusters_are_rejected() {
    let wrapped = [
        vec!["ash", "-c", "node index.js"],
        vec!["/bin/ash", "server.sh"],
        vec!["bash", "-lc", "node index.js"],
        vec!["/usr/bin/env", "sh", "-c", "node index.js"],
        vec!["env", "-i", "NODE_ENV=production", "/bin/sh", "-c", "node index.js"],
        vec!["busybox", "sh", "-c", "node index.js"],
    ];
    for entrypoint in wrapped {
        let mut stage = consumer("dist");
        stage.entrypoint = Some(entrypoint.iter().map(|a| a.to_string()).collect());
        let result = pipeline(vec![producer(), stage]).validate();
        assert!(
            matches!(result, Err(Error::ShellEntrypoint { .. })),
            "{entrypoint:?} accepted"
        );
    }
}

#[test]
fn env_launched_program_is_accepted() {
    let mut stage = consumer("dist");
    stage.entrypoint = Some(vec![
        "/usr/bin/env".to_owned(),
        "node".to_owned(),
        "index.js".to_owned(),
    ]);
    pipeline(vec![producer(), stage]).validate().unwrap();
}

#[test]
fn terminal_stage_must_switch_user_before_populating() {
    let mut stage = consumer("dist");
    let switch = stage.steps.remove(1);
    stage.steps.push(Step::Run {
        command: CommandLine::new("node", ["prepare.js"]),
        role: CommandRole::Setup,
    });
    stage.steps.push(switch);

    let result = pipeline(vec![producer(), stage]).validate();
    assert!(matches!(
        result,
        Err(Error::PopulatedBeforeUserSwitch { ref step, .. }) if step == "promotion"
    ));
}

#[test]
fn commands_after_user_switch_are_accepted() {
    let mut stage = consumer("dist");
    stage.steps.push(Step::Run {
        command: CommandLine::new("node", ["prepare.js"]),
        role: CommandRole::Setup,
    });
    pipeline(vec![producer(), stage]).validate().unwrap();
}

#[test]
fn escaping_paths_are_rejected() {
    let result = pipeline(vec![producer(), consumer("dist/../../etc")]).validate();
    assert!(matches!(result, Err(Error::InvalidPath { .. })));

    let mut stage = producer();
    stage.steps[0] = Step::Context {
        paths: vec!["../secrets".to_owned()],
    };
    let result = pipeline(vec![stage, consumer("dist")]).validate();
    assert!(matches!(result, Err(Error::InvalidPath { .. })));
}

#[test]
fn empty_command_is_rejected() {
    let mut stage = producer();
    stage.steps[1] = Step::Run {
        command: CommandLine::new("", Vec::<String>::new()),
        role: CommandRole::Setup,
    };
    let result = pipeline(vec![stage, consumer("dist")]).validate();
    assert!(matches!(result, Err(Error::EmptyCommand { .. })));
}

#[test]
fn step_serialization_is_tagged() {
    let json = serde_json::to_string(&Step::SwitchUser {
        user: "app".to_owned(),
    })
    .unwrap();
    assert_eq!(json, r#"{"kind":"switch_user","user":"app"}"#);
}
