use std::sync::Arc;

use kestrel_scripting::config::ScriptingConfig;
use kestrel_scripting::context::CompilationContext;
use kestrel_scripting::diagnostics::MemorySink;
use kestrel_scripting::extractor::TypeExtractor;
use kestrel_scripting::host::EntityHost;
use kestrel_scripting::{App, EcsHost};

fn shipped_config() -> ScriptingConfig {
    let mut config = ScriptingConfig::load("assets/config.json").expect("assets/config.json should parse");
    config.scripts.hot_reload = false;
    config
}

#[test]
fn shipped_scripts_compile() {
    let host = EcsHost::new();
    let sink = MemorySink::new();
    let mut ctx = CompilationContext::with_rhai(vec![host.api_module()], Arc::new(sink.clone()));
    for (file, expected) in [("assets/scripts/spinner.rhai", "Spinner"), ("assets/scripts/greeter.rhai", "Greeter")] {
        let source = std::fs::read_to_string(file).expect("read shipped script");
        let extracted = TypeExtractor::compile(&mut ctx, &source).expect("shipped script should compile");
        assert_eq!(extracted.behaviour.name(), expected);
    }
    assert!(sink.errors().is_empty());
}

#[test]
fn shipped_config_attaches_every_entity() {
    let app = App::new(shipped_config(), Arc::new(MemorySink::new()));
    assert_eq!(app.groups().len(), 2);
    assert_eq!(app.registry().identities(), vec!["greeter".to_string(), "spinner".to_string()]);
    assert_eq!(app.registry().users("spinner"), 2);

    let player = app.host().find_entity("Player").expect("player spawned");
    let turret = app.host().find_entity("Turret").expect("turret spawned");
    assert_eq!(app.host().count_of(player, "Spinner"), 1);
    assert_eq!(app.host().count_of(player, "Greeter"), 1);
    assert_eq!(app.host().count_of(turret, "Spinner"), 1);
    assert!(app.groups().iter().all(|group| group.unresolved().is_empty()));
}

#[test]
fn stepping_runs_the_behaviours() {
    let mut app = App::new(shipped_config(), Arc::new(MemorySink::new()));
    let report = app.step(4.0);
    assert_eq!(report.recompiled, 0);
    assert!(report.logs.contains(&"hello from Player".to_string()), "{:?}", report.logs);
    assert!(report.logs.contains(&"Player completed turn 1".to_string()), "{:?}", report.logs);
    assert!(report.logs.contains(&"Turret completed turn 1".to_string()), "{:?}", report.logs);

    let report = app.step(0.1);
    assert!(!report.logs.iter().any(|line| line.starts_with("hello")), "ready runs once");
}

#[test]
fn despawning_detaches_and_releases() {
    let mut app = App::new(shipped_config(), Arc::new(MemorySink::new()));
    let turret = app.host().find_entity("Turret").expect("turret spawned");
    assert!(app.despawn(turret));
    assert_eq!(app.groups().len(), 1);
    assert_eq!(app.registry().users("spinner"), 1);

    let spinner = app.registry().get("spinner").expect("spinner entry");
    assert!(!spinner.borrow().is_attached(turret));
    assert_eq!(spinner.borrow().attached_entities().len(), 1);
}
