use std::sync::Arc;

use anyhow::Result;
use bevy_ecs::prelude::Entity;

use crate::cli::CliOverrides;
use crate::config::ScriptingConfig;
use crate::context::CompilationContext;
use crate::diagnostics::{ConsoleSink, DiagnosticSink};
use crate::events::ScriptEvent;
use crate::host::EcsHost;
use crate::registry::{ScriptGroup, ScriptRegistry, TeardownPolicy};
use crate::time::TickClock;

#[derive(Debug, Default)]
pub struct StepReport {
    pub recompiled: usize,
    pub logs: Vec<String>,
    pub events: Vec<ScriptEvent>,
}

/// Demo host: a world of named entities, one script group per entity, driven by a tick loop.
pub struct App {
    config: ScriptingConfig,
    host: EcsHost,
    registry: ScriptRegistry,
    groups: Vec<ScriptGroup>,
}

impl App {
    pub fn new(config: ScriptingConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        let mut host = EcsHost::with_sink(Arc::clone(&sink));
        let context = CompilationContext::with_rhai(vec![host.api_module()], sink);
        host.share_modules(context.modules());
        let registry = ScriptRegistry::from_config(context, &config.scripts);
        let mut app = Self { config, host, registry, groups: Vec::new() };
        for entity in app.config.entities.clone() {
            app.spawn(&entity.name, &entity.scripts);
        }
        app
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    pub fn host(&self) -> &EcsHost {
        &self.host
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ScriptRegistry {
        &mut self.registry
    }

    pub fn groups(&self) -> &[ScriptGroup] {
        &self.groups
    }

    pub fn spawn(&mut self, name: &str, scripts: &[String]) -> Entity {
        let entity = self.host.spawn_named(name);
        let group = ScriptGroup::new(entity, scripts, &mut self.registry, &mut self.host);
        self.groups.push(group);
        entity
    }

    /// Detaches the entity from its scripts and removes it from the world.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if let Some(index) = self.groups.iter().position(|group| group.entity() == entity) {
            let group = self.groups.remove(index);
            group.teardown(&mut self.registry, &mut self.host, TeardownPolicy::DetachEntity);
        }
        self.host.despawn(entity)
    }

    pub fn step(&mut self, dt: f32) -> StepReport {
        let mut recompiled = 0;
        for group in &self.groups {
            recompiled += group.poll(&mut self.registry, &mut self.host);
        }
        self.host.tick(dt);
        StepReport { recompiled, logs: self.host.take_logs(), events: self.registry.drain_events() }
    }
}

pub fn run(config: ScriptingConfig) -> Result<()> {
    let ticks = config.host.ticks;
    let mut clock = TickClock::new(config.host.tick_interval());
    let mut app = App::new(config, Arc::new(ConsoleSink::default()));
    println!(
        "[app] {} entities, {} scripts loaded from {}",
        app.groups().len(),
        app.registry().len(),
        app.config().scripts.root.display()
    );
    while ticks == 0 || clock.ticks() < ticks {
        clock.wait_next();
        let report = app.step(clock.delta_seconds());
        for event in &report.events {
            println!("[script] {event}");
        }
        for line in &report.logs {
            println!("[behaviour] {line}");
        }
    }
    Ok(())
}

pub fn run_with_overrides(cli: CliOverrides) -> Result<()> {
    let mut config = ScriptingConfig::load_or_default(cli.config_path());
    let overrides = cli.into_config_overrides();
    if !overrides.is_empty() {
        println!("[config] CLI overrides applied: {}", overrides.applied_fields().join(", "));
    }
    config.apply_overrides(&overrides);
    run(config)
}
