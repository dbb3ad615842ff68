use std::sync::{Arc, Mutex, PoisonError};

use bevy_ecs::prelude::{Component, Entity, World};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Scope, FLOAT};

use crate::compiler::{BehaviourType, HostModule, ModuleSet};
use crate::diagnostics::{ConsoleSink, DiagnosticSink};
use crate::error::HostEntityError;

pub const HOST_MODULE_NAME: &str = "kestrel.host";

/// Handle to one behaviour instance living on a host entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BehaviourInstanceRef {
    pub entity: Entity,
    pub id: u64,
}

/// The three host operations the scripting core depends on.
pub trait EntityHost {
    fn find_entity(&self, name: &str) -> Option<Entity>;

    fn add_behaviour(
        &mut self,
        entity: Entity,
        ty: &Arc<BehaviourType>,
    ) -> Result<BehaviourInstanceRef, HostEntityError>;

    fn destroy_behaviour(&mut self, instance: BehaviourInstanceRef) -> Result<(), HostEntityError>;
}

#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct EntityName(pub String);

pub struct BehaviourInstance {
    id: u64,
    ty: Arc<BehaviourType>,
    this: Dynamic,
    ready: bool,
}

impl BehaviourInstance {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn behaviour_type(&self) -> &Arc<BehaviourType> {
        &self.ty
    }
}

#[derive(Component, Default)]
pub struct Behaviours {
    instances: Vec<BehaviourInstance>,
}

impl Behaviours {
    pub fn iter(&self) -> impl Iterator<Item = &BehaviourInstance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviourSummary {
    pub id: u64,
    pub type_name: String,
    pub assembly: u64,
}

type LogBuffer = Arc<Mutex<Vec<String>>>;

/// Host entity model on a `bevy_ecs` world, running behaviour hooks each tick.
///
/// Behaviours run on the host's own engine. Modules from a shared [`ModuleSet`] are installed
/// into it before instances are created or ticked, so everything the compiler referenced is
/// callable at run time.
pub struct EcsHost {
    pub world: World,
    engine: Engine,
    logs: LogBuffer,
    module: HostModule,
    shared: Option<ModuleSet>,
    installed: usize,
    sink: Arc<dyn DiagnosticSink>,
    next_instance: u64,
}

impl Default for EcsHost {
    fn default() -> Self {
        Self::new()
    }
}

impl EcsHost {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(ConsoleSink::new("behaviour")))
    }

    /// Hook failures are reported to `sink`.
    pub fn with_sink(sink: Arc<dyn DiagnosticSink>) -> Self {
        let logs: LogBuffer = Arc::default();
        let module = host_api_module(Arc::clone(&logs));
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        module.install(&mut engine);
        Self {
            world: World::new(),
            engine,
            logs,
            module,
            shared: None,
            installed: 0,
            sink,
            next_instance: 1,
        }
    }

    /// Runs behaviours against every module in `modules`, including ones added later.
    pub fn share_modules(&mut self, modules: &ModuleSet) {
        self.shared = Some(modules.clone());
        self.installed = 0;
        self.sync_modules();
    }

    /// API module scripts compile against.
    pub fn api_module(&self) -> HostModule {
        self.module.clone()
    }

    pub fn spawn_named(&mut self, name: impl Into<String>) -> Entity {
        self.world.spawn((EntityName(name.into()), Behaviours::default())).id()
    }

    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.world.despawn(entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.world.entities().contains(entity)
    }

    pub fn name_of(&self, entity: Entity) -> Option<&str> {
        self.world.get::<EntityName>(entity).map(|name| name.0.as_str())
    }

    pub fn behaviours_on(&self, entity: Entity) -> Vec<BehaviourSummary> {
        self.world
            .get::<Behaviours>(entity)
            .map(|behaviours| {
                behaviours
                    .iter()
                    .map(|instance| BehaviourSummary {
                        id: instance.id,
                        type_name: instance.ty.name().to_string(),
                        assembly: instance.ty.assembly_id(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_of(&self, entity: Entity, type_name: &str) -> usize {
        self.behaviours_on(entity).iter().filter(|summary| summary.type_name == type_name).count()
    }

    /// Reads a field of the first instance of `type_name` on `entity`.
    pub fn behaviour_field(&self, entity: Entity, type_name: &str, field: &str) -> Option<Dynamic> {
        let behaviours = self.world.get::<Behaviours>(entity)?;
        let instance = behaviours.iter().find(|instance| instance.ty.name() == type_name)?;
        let fields = instance.this.read_lock::<Map>()?;
        fields.get(field).cloned()
    }

    pub fn take_logs(&mut self) -> Vec<String> {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *logs)
    }

    /// Runs `ready` once per instance and `process` on every tick.
    pub fn tick(&mut self, dt: f32) {
        self.sync_modules();
        let targets: Vec<(Entity, String)> = self
            .world
            .iter_entities()
            .filter(|entity| entity.contains::<Behaviours>())
            .map(|entity| {
                let name = entity.get::<EntityName>().map(|name| name.0.clone()).unwrap_or_default();
                (entity.id(), name)
            })
            .collect();
        for (entity, name) in targets {
            let Some(mut behaviours) = self.world.get_mut::<Behaviours>(entity) else {
                continue;
            };
            for instance in behaviours.instances.iter_mut() {
                if !instance.ready {
                    instance.ready = true;
                    run_hook(&self.engine, self.sink.as_ref(), instance, "ready", (name.clone(),));
                }
                run_hook(&self.engine, self.sink.as_ref(), instance, "process", (name.clone(), dt as FLOAT));
            }
        }
    }

    fn sync_modules(&mut self) {
        let Some(modules) = self.shared.as_ref().map(ModuleSet::snapshot) else {
            return;
        };
        for module in modules.iter().skip(self.installed) {
            if module.name() != self.module.name() {
                module.install(&mut self.engine);
            }
        }
        self.installed = modules.len();
    }

    fn instantiate(
        &mut self,
        entity: Entity,
        ty: &Arc<BehaviourType>,
    ) -> Result<BehaviourInstance, HostEntityError> {
        let mut scope = Scope::new();
        self.engine.run_ast_with_scope(&mut scope, ty.ast()).map_err(|err| {
            HostEntityError::InstantiationRefused {
                entity,
                type_name: ty.name().to_string(),
                reason: err.to_string(),
            }
        })?;
        let mut fields = Map::new();
        for (name, _, value) in scope.iter() {
            fields.insert(name.into(), value);
        }
        let id = self.next_instance;
        self.next_instance += 1;
        Ok(BehaviourInstance { id, ty: Arc::clone(ty), this: Dynamic::from_map(fields), ready: false })
    }
}

impl EntityHost for EcsHost {
    fn find_entity(&self, name: &str) -> Option<Entity> {
        self.world
            .iter_entities()
            .find(|entity| entity.get::<EntityName>().is_some_and(|entity_name| entity_name.0 == name))
            .map(|entity| entity.id())
    }

    fn add_behaviour(
        &mut self,
        entity: Entity,
        ty: &Arc<BehaviourType>,
    ) -> Result<BehaviourInstanceRef, HostEntityError> {
        if !self.contains(entity) {
            return Err(HostEntityError::EntityNotFound(entity));
        }
        self.sync_modules();
        let instance = self.instantiate(entity, ty)?;
        let id = instance.id;
        if let Some(mut behaviours) = self.world.get_mut::<Behaviours>(entity) {
            behaviours.instances.push(instance);
        } else {
            self.world.entity_mut(entity).insert(Behaviours { instances: vec![instance] });
        }
        Ok(BehaviourInstanceRef { entity, id })
    }

    fn destroy_behaviour(&mut self, instance: BehaviourInstanceRef) -> Result<(), HostEntityError> {
        if !self.contains(instance.entity) {
            return Err(HostEntityError::EntityNotFound(instance.entity));
        }
        if let Some(mut behaviours) = self.world.get_mut::<Behaviours>(instance.entity) {
            behaviours.instances.retain(|existing| existing.id != instance.id);
        }
        Ok(())
    }
}

fn run_hook(
    engine: &Engine,
    sink: &dyn DiagnosticSink,
    instance: &mut BehaviourInstance,
    hook: &str,
    args: impl rhai::FuncArgs,
) {
    let mut scope = Scope::new();
    let options = CallFnOptions::new().eval_ast(false).bind_this_ptr(&mut instance.this);
    if let Err(err) = engine.call_fn_with_options::<Dynamic>(options, &mut scope, instance.ty.ast(), hook, args) {
        if !matches!(err.as_ref(), EvalAltResult::ErrorFunctionNotFound(..)) {
            sink.log_error(&format!("{}::{hook} failed: {err}", instance.ty.name()));
        }
    }
}

fn host_api_module(logs: LogBuffer) -> HostModule {
    HostModule::new(HOST_MODULE_NAME, move |engine: &mut Engine| {
        let logs = Arc::clone(&logs);
        engine.register_fn("log", move |message: &str| {
            logs.lock().unwrap_or_else(PoisonError::into_inner).push(message.to_string());
        });
        engine.register_fn("lerp", |a: FLOAT, b: FLOAT, t: FLOAT| a + (b - a) * t);
    })
}
