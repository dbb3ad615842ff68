use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bevy_ecs::prelude::Entity;

use crate::config::ScriptConfig;
use crate::context::CompilationContext;
use crate::error::ScriptError;
use crate::events::ScriptEvent;
use crate::host::EntityHost;
use crate::script::{DynamicScript, ScriptOptions};
use crate::watch::normalize_watch_path;

pub type SharedScript = Rc<RefCell<DynamicScript>>;

struct RegistryEntry {
    identity: String,
    script: SharedScript,
    users: usize,
}

/// Process-wide map from script source to its one [`DynamicScript`].
///
/// Identities are resolved to a normalized source path first, so `mover`, `mover.rhai` and the
/// absolute path of that file all name the same script. The identity that loaded a script is the
/// one it reports. Owns the compilation context every script compiles through. Entries are kept for the lifetime
/// of the registry; when the last user releases a script it stops watching its source, and
/// resolving it again resumes watching.
pub struct ScriptRegistry {
    context: CompilationContext,
    root: PathBuf,
    extension: String,
    options: ScriptOptions,
    entries: HashMap<PathBuf, RegistryEntry>,
}

impl ScriptRegistry {
    pub fn new(
        context: CompilationContext,
        root: impl Into<PathBuf>,
        extension: impl Into<String>,
        options: ScriptOptions,
    ) -> Self {
        Self { context, root: root.into(), extension: extension.into(), options, entries: HashMap::new() }
    }

    pub fn from_config(mut context: CompilationContext, config: &ScriptConfig) -> Self {
        context.set_log_warnings(config.log_warnings);
        Self::new(context, &config.root, &config.extension, config.options())
    }

    pub fn context(&self) -> &CompilationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut CompilationContext {
        &mut self.context
    }

    pub fn options(&self) -> ScriptOptions {
        self.options
    }

    /// Absolute identities are used as-is; others resolve under the script root and gain the
    /// configured extension when they have none.
    pub fn resolve_path(&self, identity: &str) -> PathBuf {
        let candidate = Path::new(identity);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        let path = self.root.join(candidate);
        if path.extension().is_none() && !self.extension.is_empty() {
            path.with_extension(&self.extension)
        } else {
            path
        }
    }

    fn entry_key(&self, identity: &str) -> PathBuf {
        normalize_watch_path(&self.resolve_path(identity))
    }

    /// Returns the script for `identity`, compiling it on first use. Counts one user.
    pub fn resolve(&mut self, identity: &str) -> Result<SharedScript, ScriptError> {
        let key = self.entry_key(identity);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.users += 1;
            entry.script.borrow_mut().resume();
            return Ok(Rc::clone(&entry.script));
        }
        let script = DynamicScript::load(identity, key.clone(), &mut self.context, self.options)?;
        let script = Rc::new(RefCell::new(script));
        let entry = RegistryEntry { identity: identity.to_string(), script: Rc::clone(&script), users: 1 };
        self.entries.insert(key, entry);
        Ok(script)
    }

    pub fn get(&self, identity: &str) -> Option<SharedScript> {
        self.entries.get(&self.entry_key(identity)).map(|entry| Rc::clone(&entry.script))
    }

    pub fn users(&self, identity: &str) -> usize {
        self.entries.get(&self.entry_key(identity)).map_or(0, |entry| entry.users)
    }

    /// Drops one user. The script is discarded when none remain; returns true in that case.
    pub fn release(&mut self, identity: &str) -> bool {
        let key = self.entry_key(identity);
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        entry.users = entry.users.saturating_sub(1);
        if entry.users > 0 {
            return false;
        }
        entry.script.borrow_mut().discard();
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities the scripts were loaded under, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.entries.values().map(|entry| entry.identity.clone()).collect();
        identities.sort();
        identities
    }

    fn sorted_scripts(&self) -> Vec<SharedScript> {
        let mut entries: Vec<&RegistryEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        entries.into_iter().map(|entry| Rc::clone(&entry.script)).collect()
    }

    pub fn update_script(&mut self, script: &SharedScript, host: &mut dyn EntityHost) -> bool {
        script.borrow_mut().update(&mut self.context, host)
    }

    /// Polls every registered script once. Returns how many recompiled.
    pub fn poll_all(&mut self, host: &mut dyn EntityHost) -> usize {
        let scripts = self.sorted_scripts();
        scripts.iter().filter(|script| self.update_script(script, host)).count()
    }

    /// Takes every script's pending events, ordered by identity. Call once per tick.
    pub fn drain_events(&mut self) -> Vec<ScriptEvent> {
        self.sorted_scripts().iter().flat_map(|script| script.borrow_mut().drain_events()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownPolicy {
    /// Leave the entity's instances in place; other groups may still share the scripts.
    #[default]
    KeepAttachments,
    /// Detach the entity from every script, for when the entity itself goes away.
    DetachEntity,
}

/// The scripts configured on one host entity.
pub struct ScriptGroup {
    entity: Entity,
    scripts: Vec<(String, SharedScript)>,
    unresolved: Vec<String>,
}

impl ScriptGroup {
    /// Resolves every identity and attaches `entity` to each. Scripts that fail to load are
    /// logged and left out.
    pub fn new<I, S>(
        entity: Entity,
        identities: I,
        registry: &mut ScriptRegistry,
        host: &mut dyn EntityHost,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scripts: Vec<(String, SharedScript)> = Vec::new();
        let mut unresolved = Vec::new();
        for identity in identities {
            let identity = identity.as_ref();
            match registry.resolve(identity) {
                Ok(script) if scripts.iter().any(|(_, known)| Rc::ptr_eq(known, &script)) => {
                    // Another spelling of a script already in the group.
                    registry.release(identity);
                }
                Ok(script) => {
                    // Host refusals are logged by the script; the group still polls it.
                    let _ = script.borrow_mut().attach(entity, host);
                    scripts.push((identity.to_string(), script));
                }
                Err(err) => {
                    registry.context().sink().log_error(&format!("'{identity}' could not be loaded: {err}"));
                    unresolved.push(identity.to_string());
                }
            }
        }
        Self { entity, scripts, unresolved }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn scripts(&self) -> impl Iterator<Item = &SharedScript> {
        self.scripts.iter().map(|(_, script)| script)
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.scripts.iter().map(|(identity, _)| identity.as_str())
    }

    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    /// Called once per tick. Returns how many scripts recompiled.
    pub fn poll(&self, registry: &mut ScriptRegistry, host: &mut dyn EntityHost) -> usize {
        self.scripts().filter(|script| registry.update_script(script, host)).count()
    }

    pub fn teardown(self, registry: &mut ScriptRegistry, host: &mut dyn EntityHost, policy: TeardownPolicy) {
        for (identity, script) in &self.scripts {
            if policy == TeardownPolicy::DetachEntity {
                script.borrow_mut().detach(self.entity, host);
            }
            registry.release(identity);
        }
    }
}
