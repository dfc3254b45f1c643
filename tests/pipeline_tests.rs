use broker::config::{Content, load_file, load_str};
use broker::pipeline::LoadError;
use broker::{Context, Executor, Incoming, PluginRegistry};
use serde_json::json;
use std::fs;
use std::path::Path;

fn run(yaml: &str, incoming: Incoming) -> (bool, Context) {
    let registry = PluginRegistry::with_builtins().unwrap();
    let config = load_str("api.yml", yaml, Path::new("."), &registry).unwrap();
    let executor = Executor::new(&registry);
    let mut seed = Context::new();
    if let Some(init) = &config.init {
        executor.run_init(init, &mut seed);
    }
    let mut ctx = Context::from_seed(&seed, incoming);
    let outcome = executor.run_request(&config, &mut ctx);
    (outcome, ctx)
}

#[test]
fn test_match_and_register() {
    let yaml = r#"
- pipe:
    - match:
        string: AAAAAA
        regexp: "^(?P<first>A)A+$"
      register: m
    - log:
        msg: "=R.m.named.first"
"#;
    let (outcome, ctx) = run(yaml, Incoming::default());
    assert!(outcome);
    assert_eq!(
        ctx.registered_value()["m"],
        json!({"matches": ["AAAAAA", "A"], "named": {"first": "A"}, "result": true})
    );
}

#[test]
fn test_failed_match_stops_pipe() {
    let yaml = r#"
- pipe:
    - match: {string: AAAAAA, value: BBB}
    - variable: {reached: true}
"#;
    let (outcome, ctx) = run(yaml, Incoming::default());
    assert!(!outcome);
    assert_eq!(ctx.var("reached"), None);
}

#[test]
fn test_init_seed_is_shared() {
    let yaml = r#"
- init:
    - variable: {secret: s3cr3t}
    - default:
        header: {name: x-token}
- pipe:
    - header: {}
      register: token
    - match:
        string: "=R.token.value"
        value: "=V.secret"
"#;
    let good = Incoming::new("POST", "/hook").with_header("X-Token", "s3cr3t");
    assert!(run(yaml, good).0);

    let bad = Incoming::new("POST", "/hook").with_header("X-Token", "nope");
    assert!(!run(yaml, bad).0);
}

#[test]
fn test_query_and_body() {
    let yaml = r#"
- pipe:
    - when: "=In.Method == \"POST\""
      body: {type: json, mime: application/json}
      register: body
    - match:
        string: "=R.body.payload.ref ?? \"\""
        regexp: "^refs/heads/"
    - match:
        string: "=In.Query.env[0]"
        value: prod
"#;
    let incoming = Incoming::new("POST", "/deploy")
        .with_query_string("env=prod")
        .with_header("Content-Type", "application/json")
        .with_body(br#"{"ref": "refs/heads/main"}"#.to_vec());
    let (outcome, ctx) = run(yaml, incoming);
    assert!(outcome);
    assert_eq!(ctx.registered_value()["body"]["payload"]["ref"], json!("refs/heads/main"));
}

#[test]
fn test_include_is_spliced_in_place() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("parts")).unwrap();
    fs::write(
        dir.path().join("api.yml"),
        r#"
- pipe:
    - log: {msg: one}
    - include: parts/steps.yml
    - variable:
        - order: "=V.order + \",after\""
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("parts/steps.yml"),
        r#"
- variable:
    - order: first
- pipe:
    - include: inner.yml
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("parts/inner.yml"),
        "- variable:\n    - order: \"=V.order + \\\",inner\\\"\"\n",
    )
    .unwrap();

    let registry = PluginRegistry::with_builtins().unwrap();
    let config = load_file(dir.path().join("api.yml"), &registry).unwrap();
    let steps = &config.pipes[0].steps;
    assert_eq!(steps.len(), 4);
    assert!(steps[1].position.to_string().contains("steps.yml"));
    assert!(steps[3].position.to_string().starts_with(&dir.path().join("api.yml").display().to_string()));
    assert!(steps[3].position.to_string().ends_with(":/0/pipe/2"));

    let Content::Pipe(inner) = &steps[2].directives.as_ref().unwrap().content else {
        panic!("expected a sub-pipe");
    };
    assert_eq!(inner.len(), 1);
    assert!(inner[0].position.to_string().contains("inner.yml"));

    let executor = Executor::new(&registry);
    let mut ctx = Context::new();
    assert!(executor.run_request(&config, &mut ctx));
    assert_eq!(ctx.var("order"), Some(&json!("first,inner,after")));
}

#[test]
fn test_include_cycle() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.yml"), "- include: b.yml\n").unwrap();
    fs::write(dir.path().join("b.yml"), "- include: a.yml\n").unwrap();

    let registry = PluginRegistry::with_builtins().unwrap();
    assert!(matches!(
        load_file(dir.path().join("a.yml"), &registry),
        Err(LoadError::IncludeCycle { .. })
    ));
}

#[test]
fn test_same_file_included_twice() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("api.yml"),
        "- pipe:\n    - include: common.yml\n    - include: common.yml\n",
    )
    .unwrap();
    fs::write(dir.path().join("common.yml"), "- log: {msg: hi}\n").unwrap();

    let registry = PluginRegistry::with_builtins().unwrap();
    let config = load_file(dir.path().join("api.yml"), &registry).unwrap();
    assert_eq!(config.pipes[0].steps.len(), 2);
}
