use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bevy_ecs::prelude::Entity;

use crate::compiler::BehaviourType;
use crate::context::CompilationContext;
use crate::diagnostics::DiagnosticSink;
use crate::error::ScriptError;
use crate::events::{EventBus, ScriptEvent};
use crate::extractor::TypeExtractor;
use crate::host::{BehaviourInstanceRef, EntityHost};
use crate::watch::{ChangeWatch, DirtySignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptOptions {
    pub hot_reload: bool,
    pub watch_poll: Duration,
    pub skip_unchanged: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self { hot_reload: true, watch_poll: Duration::from_millis(300), skip_unchanged: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Compiled,
    /// A change was signalled and the next poll will recompile.
    Dirty,
    /// The last recompile failed; nothing is attached until a later one succeeds.
    Failed,
    Discarded,
}

#[derive(Debug, Clone, Copy)]
struct Attachment {
    entity: Entity,
    instance: BehaviourInstanceRef,
}

/// A hot-reloadable behaviour backed by one source file.
///
/// Change notifications only raise the dirty signal. The recompile itself happens in
/// [`DynamicScript::update`], which the owning groups call from the tick loop: every instance is
/// detached, the source is compiled again and the new type is attached to the same entities in
/// the same order. If the compile fails the entities are remembered but carry nothing until a
/// later compile succeeds.
pub struct DynamicScript {
    identity: String,
    path: PathBuf,
    options: ScriptOptions,
    sink: Arc<dyn DiagnosticSink>,
    compiled: Option<Arc<BehaviourType>>,
    digest: Option<blake3::Hash>,
    attachments: Vec<Attachment>,
    suspended: Vec<Entity>,
    generation: u64,
    signal: DirtySignal,
    watch: Option<ChangeWatch>,
    discarded: bool,
    events: EventBus,
}

impl DynamicScript {
    /// Reads and compiles the source. A script that fails its first compile is never constructed.
    pub fn load(
        identity: impl Into<String>,
        path: impl Into<PathBuf>,
        ctx: &mut CompilationContext,
        options: ScriptOptions,
    ) -> Result<Self, ScriptError> {
        let identity = identity.into();
        let path = path.into();
        let started = Instant::now();
        let source = read_source(&path)?;
        let extracted = TypeExtractor::compile(ctx, &source)?;
        let elapsed = started.elapsed();
        let behaviour = extracted.behaviour;
        ctx.sink().log_info(&format!(
            "compiled '{identity}' as {} in {} ms",
            behaviour.name(),
            elapsed.as_millis()
        ));

        let mut script = Self {
            identity,
            path,
            options,
            sink: Arc::clone(ctx.sink()),
            compiled: None,
            digest: Some(blake3::hash(source.as_bytes())),
            attachments: Vec::new(),
            suspended: Vec::new(),
            generation: 1,
            signal: DirtySignal::new(),
            watch: None,
            discarded: false,
            events: EventBus::default(),
        };
        script.events.push(ScriptEvent::Compiled {
            script: script.identity.clone(),
            type_name: behaviour.name().to_string(),
            generation: script.generation,
            elapsed,
        });
        script.compiled = Some(behaviour);
        script.start_watch();
        Ok(script)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compiled_type(&self) -> Option<&Arc<BehaviourType>> {
        self.compiled.as_ref()
    }

    pub fn type_name(&self) -> Option<&str> {
        self.compiled.as_deref().map(BehaviourType::name)
    }

    /// Number of successful compiles so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ScriptState {
        if self.discarded {
            ScriptState::Discarded
        } else if self.signal.is_raised() {
            ScriptState::Dirty
        } else if self.compiled.is_none() {
            ScriptState::Failed
        } else {
            ScriptState::Compiled
        }
    }

    pub fn dirty_signal(&self) -> &DirtySignal {
        &self.signal
    }

    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(ChangeWatch::is_watching)
    }

    pub fn attached_entities(&self) -> Vec<Entity> {
        self.attachments.iter().map(|attachment| attachment.entity).collect()
    }

    pub fn is_attached(&self, entity: Entity) -> bool {
        self.attachments.iter().any(|attachment| attachment.entity == entity)
    }

    pub fn instance_on(&self, entity: Entity) -> Option<BehaviourInstanceRef> {
        self.attachments.iter().find(|attachment| attachment.entity == entity).map(|a| a.instance)
    }

    /// Entities waiting for a successful compile before they get an instance.
    pub fn suspended_entities(&self) -> &[Entity] {
        &self.suspended
    }

    /// Takes the pending lifecycle events. Undrained events are capped, oldest dropped first.
    pub fn drain_events(&mut self) -> Vec<ScriptEvent> {
        self.events.drain()
    }

    /// Queues a recompile for the next poll, as a change notification would.
    pub fn request_reload(&self) {
        self.signal.raise();
    }

    /// Attaches a fresh instance to `entity` unless it already carries one from this script.
    pub fn attach(&mut self, entity: Entity, host: &mut dyn EntityHost) -> Result<(), ScriptError> {
        if self.is_attached(entity) {
            return Ok(());
        }
        let Some(ty) = self.compiled.clone() else {
            if !self.suspended.contains(&entity) {
                self.suspended.push(entity);
            }
            return Ok(());
        };
        match host.add_behaviour(entity, &ty) {
            Ok(instance) => {
                self.attachments.push(Attachment { entity, instance });
                self.events.push(ScriptEvent::Attached { script: self.identity.clone(), entity });
                Ok(())
            }
            Err(err) => {
                self.sink.log_error(&format!("'{}' could not attach {}: {err}", self.identity, ty.name()));
                Err(err.into())
            }
        }
    }

    /// Removes `entity` and destroys its instance. Returns false if it was not tracked.
    pub fn detach(&mut self, entity: Entity, host: &mut dyn EntityHost) -> bool {
        let was_suspended = self.suspended.contains(&entity);
        self.suspended.retain(|suspended| *suspended != entity);
        let Some(index) = self.attachments.iter().position(|attachment| attachment.entity == entity) else {
            return was_suspended;
        };
        let attachment = self.attachments.remove(index);
        self.destroy_instance(attachment, host);
        self.events.push(ScriptEvent::Detached { script: self.identity.clone(), entity });
        true
    }

    pub fn detach_all(&mut self, host: &mut dyn EntityHost) -> usize {
        let entities = self.attached_entities();
        self.suspended.clear();
        for entity in &entities {
            self.detach(*entity, host);
        }
        entities.len()
    }

    /// Attaches the suspended entities to the current type. Returns how many got an instance.
    pub fn reattach(&mut self, host: &mut dyn EntityHost) -> usize {
        if self.compiled.is_none() {
            return 0;
        }
        let pending = std::mem::take(&mut self.suspended);
        pending.into_iter().filter(|entity| self.attach(*entity, host).is_ok()).count()
    }

    /// Polls the dirty signal and recompiles at most once. Returns true if a recompile ran.
    pub fn update(&mut self, ctx: &mut CompilationContext, host: &mut dyn EntityHost) -> bool {
        if self.discarded || !self.signal.take() {
            return false;
        }
        // Failures are logged and leave the script detached.
        let _ = self.recompile(ctx, host);
        true
    }

    /// Detaches every instance, recompiles and reattaches the same entities in the same order.
    pub fn recompile(
        &mut self,
        ctx: &mut CompilationContext,
        host: &mut dyn EntityHost,
    ) -> Result<(), ScriptError> {
        let started = Instant::now();
        let source = read_source(&self.path);
        if let (Ok(text), true) = (&source, self.options.skip_unchanged && self.compiled.is_some()) {
            if self.digest == Some(blake3::hash(text.as_bytes())) {
                self.events.push(ScriptEvent::RecompileSkipped { script: self.identity.clone() });
                return Ok(());
            }
        }

        let mut entities = self.attached_entities();
        entities.extend(self.suspended.drain(..));
        for attachment in std::mem::take(&mut self.attachments) {
            self.destroy_instance(attachment, host);
        }
        self.compiled = None;
        self.digest = None;

        let compiled = source.and_then(|text| {
            let extracted = TypeExtractor::compile(ctx, &text)?;
            Ok((extracted.behaviour, blake3::hash(text.as_bytes())))
        });
        let (behaviour, digest) = match compiled {
            Ok(compiled) => compiled,
            Err(err) => {
                self.sink.log_error(&format!(
                    "'{}' failed to recompile, {} entit{} left without behaviour: {err}",
                    self.identity,
                    entities.len(),
                    if entities.len() == 1 { "y" } else { "ies" }
                ));
                self.events.push(ScriptEvent::RecompileFailed {
                    script: self.identity.clone(),
                    error: err.to_string(),
                    suspended: entities.len(),
                });
                self.suspended = entities;
                return Err(err);
            }
        };

        self.generation += 1;
        self.digest = Some(digest);
        self.compiled = Some(Arc::clone(&behaviour));
        let mut reattached = 0;
        for entity in entities {
            match host.add_behaviour(entity, &behaviour) {
                Ok(instance) => {
                    self.attachments.push(Attachment { entity, instance });
                    reattached += 1;
                }
                Err(err) => {
                    self.sink.log_error(&format!(
                        "'{}' could not reattach {}: {err}",
                        self.identity,
                        behaviour.name()
                    ));
                }
            }
        }
        let elapsed = started.elapsed();
        self.sink.log_info(&format!(
            "recompiled '{}' as {} (generation {}) in {} ms, {reattached} reattached",
            self.identity,
            behaviour.name(),
            self.generation,
            elapsed.as_millis()
        ));
        self.events.push(ScriptEvent::Recompiled {
            script: self.identity.clone(),
            type_name: behaviour.name().to_string(),
            generation: self.generation,
            reattached,
            elapsed,
        });
        Ok(())
    }

    /// Stops watching the source. Attachments are left as they are.
    pub fn discard(&mut self) {
        if self.discarded {
            return;
        }
        if let Some(mut watch) = self.watch.take() {
            watch.stop();
        }
        self.discarded = true;
        self.events.push(ScriptEvent::Discarded { script: self.identity.clone() });
    }

    /// Brings a discarded script back into service.
    pub fn resume(&mut self) {
        if !self.discarded {
            return;
        }
        self.discarded = false;
        self.start_watch();
    }

    fn start_watch(&mut self) {
        if !self.options.hot_reload || self.watch.is_some() {
            return;
        }
        match ChangeWatch::new(&self.path, self.signal.clone(), self.options.watch_poll) {
            Ok(watch) => self.watch = Some(watch),
            Err(err) => {
                self.sink.log_warning(&format!("hot reload disabled for '{}': {err:#}", self.identity));
            }
        }
    }

    fn destroy_instance(&self, attachment: Attachment, host: &mut dyn EntityHost) {
        if let Err(err) = host.destroy_behaviour(attachment.instance) {
            self.sink.log_error(&format!("'{}' could not detach from entity: {err}", self.identity));
        }
    }
}

fn read_source(path: &Path) -> Result<String, ScriptError> {
    fs::read_to_string(path).map_err(|source| ScriptError::Io { path: path.to_path_buf(), source })
}
