use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use kestrel_scripting::context::CompilationContext;
use kestrel_scripting::diagnostics::MemorySink;
use kestrel_scripting::events::ScriptEvent;
use kestrel_scripting::script::ScriptState;
use kestrel_scripting::{EcsHost, ScriptGroup, ScriptOptions, ScriptRegistry, TeardownPolicy};
use tempfile::TempDir;

struct World {
    dir: TempDir,
    host: EcsHost,
    registry: ScriptRegistry,
    sink: MemorySink,
}

fn world() -> World {
    let dir = tempfile::tempdir().expect("temp dir");
    let sink = MemorySink::new();
    let mut host = EcsHost::with_sink(Arc::new(sink.clone()));
    let ctx = CompilationContext::with_rhai(vec![host.api_module()], Arc::new(sink.clone()));
    host.share_modules(ctx.modules());
    let options = ScriptOptions { hot_reload: false, ..Default::default() };
    let registry = ScriptRegistry::new(ctx, dir.path(), "rhai", options);
    World { dir, host, registry, sink }
}

fn write(dir: &Path, name: &str, source: &str) {
    fs::write(dir.join(name), source).expect("write script");
}

#[test]
fn identities_resolve_under_the_root_with_the_extension() {
    let w = world();
    assert_eq!(w.registry.resolve_path("mover"), w.dir.path().join("mover.rhai"));
    assert_eq!(w.registry.resolve_path("ai/brain.lua"), w.dir.path().join("ai/brain.lua"));
    let absolute = w.dir.path().join("elsewhere.rhai");
    assert_eq!(w.registry.resolve_path(absolute.to_str().expect("utf8 path")), absolute);
}

#[test]
fn groups_naming_the_same_identity_share_one_script() {
    let mut w = world();
    write(w.dir.path(), "mover.rhai", "class Mover : Behaviour { let speed = 1.0; }");
    let a = w.host.spawn_named("A");
    let b = w.host.spawn_named("B");
    let group_a = ScriptGroup::new(a, ["mover"], &mut w.registry, &mut w.host);
    let group_b = ScriptGroup::new(b, ["mover"], &mut w.registry, &mut w.host);

    let first = group_a.scripts().next().expect("script");
    let second = group_b.scripts().next().expect("script");
    assert!(Rc::ptr_eq(first, second));
    assert_eq!(w.registry.len(), 1);
    assert_eq!(w.registry.users("mover"), 2);
    assert_eq!(first.borrow().attached_entities(), vec![a, b]);
}

#[test]
fn a_shared_script_recompiles_once_per_change() {
    let mut w = world();
    write(w.dir.path(), "mover.rhai", "class Mover : Behaviour {}");
    let a = w.host.spawn_named("A");
    let b = w.host.spawn_named("B");
    let group_a = ScriptGroup::new(a, ["mover"], &mut w.registry, &mut w.host);
    let group_b = ScriptGroup::new(b, ["mover"], &mut w.registry, &mut w.host);

    write(w.dir.path(), "mover.rhai", "class Mover : Behaviour { let speed = 3; }");
    group_a.scripts().next().expect("script").borrow().request_reload();

    assert_eq!(group_a.poll(&mut w.registry, &mut w.host), 1);
    assert_eq!(group_b.poll(&mut w.registry, &mut w.host), 0);
    for entity in [a, b] {
        assert_eq!(w.host.count_of(entity, "Mover"), 1);
        let speed = w.host.behaviour_field(entity, "Mover", "speed").and_then(|v| v.as_int().ok());
        assert_eq!(speed, Some(3));
    }
}

#[test]
fn scripts_that_fail_to_load_are_left_out_of_the_group() {
    let mut w = world();
    write(w.dir.path(), "good.rhai", "class Good : Behaviour {}");
    write(w.dir.path(), "broken.rhai", "class Broken : Behaviour { let = ; }");
    let e = w.host.spawn_named("E");
    let group = ScriptGroup::new(e, ["good", "missing", "broken"], &mut w.registry, &mut w.host);

    assert_eq!(group.identities().collect::<Vec<_>>(), vec!["good"]);
    assert_eq!(group.unresolved(), ["missing".to_string(), "broken".to_string()]);
    assert_eq!(w.registry.identities(), vec!["good".to_string()]);
    let errors = w.sink.errors();
    assert!(errors.iter().any(|line| line.contains("'missing' could not be loaded")));
    assert!(errors.iter().any(|line| line.contains("'broken' could not be loaded")));
}

#[test]
fn default_teardown_keeps_instances_on_the_entity() {
    let mut w = world();
    write(w.dir.path(), "mover.rhai", "class Mover : Behaviour {}");
    let e = w.host.spawn_named("E");
    let group = ScriptGroup::new(e, ["mover"], &mut w.registry, &mut w.host);
    group.teardown(&mut w.registry, &mut w.host, TeardownPolicy::default());

    assert_eq!(w.host.count_of(e, "Mover"), 1);
    let script = w.registry.get("mover").expect("entry is retained");
    assert_eq!(script.borrow().state(), ScriptState::Discarded);
    assert!(script.borrow().is_attached(e));
}

#[test]
fn detaching_teardown_removes_only_that_entity() {
    let mut w = world();
    write(w.dir.path(), "mover.rhai", "class Mover : Behaviour {}");
    let a = w.host.spawn_named("A");
    let b = w.host.spawn_named("B");
    let group_a = ScriptGroup::new(a, ["mover"], &mut w.registry, &mut w.host);
    let _group_b = ScriptGroup::new(b, ["mover"], &mut w.registry, &mut w.host);
    group_a.teardown(&mut w.registry, &mut w.host, TeardownPolicy::DetachEntity);

    assert_eq!(w.host.count_of(a, "Mover"), 0);
    assert_eq!(w.host.count_of(b, "Mover"), 1);
    let script = w.registry.get("mover").expect("entry");
    assert_eq!(script.borrow().attached_entities(), vec![b]);
    assert_ne!(script.borrow().state(), ScriptState::Discarded, "B still uses the script");
    assert_eq!(w.registry.users("mover"), 1);
}

#[test]
fn resolving_a_released_script_brings_it_back() {
    let mut w = world();
    write(w.dir.path(), "mover.rhai", "class Mover : Behaviour {}");
    let first = w.registry.resolve("mover").expect("resolve");
    assert!(w.registry.release("mover"));
    assert_eq!(first.borrow().state(), ScriptState::Discarded);

    let again = w.registry.resolve("mover").expect("resolve again");
    assert!(Rc::ptr_eq(&first, &again));
    assert_eq!(again.borrow().state(), ScriptState::Compiled);
    assert_eq!(again.borrow().generation(), 1, "resuming does not recompile");
    assert!(!w.registry.release("unknown"));
}

#[test]
fn poll_all_and_events_cover_every_entry() {
    let mut w = world();
    write(w.dir.path(), "a.rhai", "class A : Behaviour {}");
    write(w.dir.path(), "b.rhai", "class B : Behaviour {}");
    let a = w.registry.resolve("a").expect("a");
    let b = w.registry.resolve("b").expect("b");
    let events = w.registry.drain_events();
    assert_eq!(events.iter().filter(|event| matches!(event, ScriptEvent::Compiled { .. })).count(), 2);

    a.borrow().request_reload();
    b.borrow().request_reload();
    assert_eq!(w.registry.poll_all(&mut w.host), 2);
    let scripts: Vec<String> = w.registry.drain_events().iter().map(|event| event.script().to_string()).collect();
    assert_eq!(scripts, vec!["a".to_string(), "b".to_string()]);
    assert!(w.registry.drain_events().is_empty());
}

#[test]
fn every_spelling_of_one_source_shares_a_script() {
    let mut w = world();
    write(w.dir.path(), "mover.rhai", "class Mover : Behaviour {}");
    let absolute = w.dir.path().join("mover.rhai");
    let absolute = absolute.to_str().expect("utf8 path").to_string();
    let e = w.host.spawn_named("E");
    let group = ScriptGroup::new(e, ["mover", "mover.rhai", absolute.as_str()], &mut w.registry, &mut w.host);

    assert_eq!(w.registry.len(), 1);
    assert_eq!(w.host.count_of(e, "Mover"), 1);
    assert_eq!(group.identities().collect::<Vec<_>>(), vec!["mover"]);
    assert_eq!(w.registry.identities(), vec!["mover".to_string()]);
    assert_eq!(w.registry.users("mover.rhai"), 1);

    let other = w.host.spawn_named("Other");
    let shared = w.registry.resolve(&absolute).expect("resolve by path");
    shared.borrow_mut().attach(other, &mut w.host).expect("attach");
    assert!(Rc::ptr_eq(&shared, group.scripts().next().expect("script")));
    assert_eq!(w.registry.users("mover"), 2);

    group.teardown(&mut w.registry, &mut w.host, TeardownPolicy::DetachEntity);
    assert_eq!(w.host.count_of(e, "Mover"), 0);
    assert_eq!(w.host.count_of(other, "Mover"), 1);
    assert!(w.registry.release("mover.rhai"), "last user releases through any spelling");
}
