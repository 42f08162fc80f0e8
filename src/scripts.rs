use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use bevy_ecs::prelude::Entity;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope, AST};

use crate::ecs::EcsWorld;
use crate::events::GameEvent;
use crate::ragdoll::RagdollSetup;

/// Script function returning the ragdoll setup for a numeric index.
pub const SETUP_FUNCTION: &str = "getRagdollSetup";

const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 64;

pub struct ScriptHost {
    engine: Engine,
    ast: Option<AST>,
    scope: Scope<'static>,
    script_path: Option<PathBuf>,
    source_name: String,
    last_modified: Option<SystemTime>,
    error: Option<String>,
    messages: Arc<Mutex<Vec<String>>>,
}

impl ScriptHost {
    /// Host backed by a script file; compiled lazily and recompiled when the file changes.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let source_name = path.display().to_string();
        Self::with_parts(Some(path), source_name)
    }

    pub fn from_source(name: &str, source: &str) -> Result<Self> {
        let mut host = Self::with_parts(None, name.to_string());
        let ast = host.engine.compile(source).with_context(|| format!("Compiling Rhai script '{name}'"))?;
        host.ast = Some(ast);
        Ok(host)
    }

    fn with_parts(script_path: Option<PathBuf>, source_name: String) -> Self {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        // Setup maps nest deeper than the debug-build default allows.
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH);
        register_api(&mut engine, Arc::clone(&messages));
        Self {
            engine,
            ast: None,
            scope: Scope::new(),
            script_path,
            source_name,
            last_modified: None,
            error: None,
            messages,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn force_reload(&mut self) -> Result<()> {
        self.load_script()
    }

    /// Recompiles the script when its file is newer than the compiled copy.
    /// Returns whether a reload happened.
    pub fn reload_if_needed(&mut self) -> Result<bool> {
        let Some(path) = self.script_path.as_ref() else {
            return Ok(false);
        };
        let metadata = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) => {
                let err = anyhow!("Script file not accessible: {err}");
                self.error = Some(err.to_string());
                return Err(err);
            }
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if self.ast.is_none() || self.last_modified.map_or(true, |prev| modified > prev) {
            if let Err(err) = self.load_script() {
                self.error = Some(err.to_string());
                return Err(err);
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn load_script(&mut self) -> Result<()> {
        let Some(path) = self.script_path.as_ref() else {
            return Ok(());
        };
        let source = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let ast = self.engine.compile(source).with_context(|| "Compiling Rhai script")?;
        self.scope = Scope::new();
        self.last_modified = fs::metadata(path).ok().and_then(|meta| meta.modified().ok());
        self.error = None;
        self.ast = Some(ast);
        log::debug!(target: "script", "compiled {}", self.source_name);
        Ok(())
    }

    fn compiled(&mut self) -> Result<&AST> {
        self.reload_if_needed()?;
        self.ast.as_ref().ok_or_else(|| anyhow!("Script '{}' is not compiled", self.source_name))
    }

    /// Calls `getRagdollSetup(index)` and parses the returned map.
    pub fn ragdoll_setup(&mut self, index: i64) -> Result<RagdollSetup> {
        let result = self.call_setup_function(index);
        match &result {
            Ok(_) => self.error = None,
            Err(err) => self.error = Some(format!("{err:#}")),
        }
        result
    }

    fn call_setup_function(&mut self, index: i64) -> Result<RagdollSetup> {
        let ast = self.compiled()?.clone();
        let value = self
            .engine
            .call_fn::<Dynamic>(&mut self.scope, &ast, SETUP_FUNCTION, (index as rhai::INT,))
            .map_err(|err| match err.as_ref() {
                EvalAltResult::ErrorFunctionNotFound(..) => {
                    anyhow!("Script '{}' does not define {SETUP_FUNCTION}", self.source_name)
                }
                _ => anyhow!("{SETUP_FUNCTION}({index}) failed: {err}"),
            })?;
        let type_name = value.type_name();
        let map = value
            .try_cast::<Map>()
            .ok_or_else(|| anyhow!("{SETUP_FUNCTION}({index}) returned {type_name}, expected a map"))?;
        let setup = RagdollSetup::from_script_map(&map)
            .with_context(|| format!("Parsing ragdoll setup {index} from '{}'", self.source_name))?;
        log::debug!(
            target: "script",
            "ragdoll setup {index}: {} bodies, {} joints",
            setup.body_count(),
            setup.joint_count()
        );
        Ok(setup)
    }

    /// Loads setup `index` from the script and applies it to `entity`.
    pub fn create_ragdoll(&mut self, ecs: &mut EcsWorld, entity: Entity, index: i64) -> Result<()> {
        let setup = match self.ragdoll_setup(index) {
            Ok(setup) => setup,
            Err(err) => {
                ecs.push_event(GameEvent::RagdollFailed { entity, reason: format!("{err:#}") });
                return Err(err);
            }
        };
        ecs.create_ragdoll(entity, &setup).with_context(|| format!("Creating ragdoll {index}"))
    }

    /// Invokes a hit callback as `name(entity, bone, other)`; `other` is -1 for world geometry.
    /// Returns `Ok(false)` when the script does not define the callback.
    pub fn call_hit_callback(&mut self, name: &str, entity: Entity, bone: u32, other: Option<Entity>) -> Result<bool> {
        let ast = self.compiled()?.clone();
        let args = (entity_to_bits(entity), bone as rhai::INT, other.map_or(-1, entity_to_bits));
        match self.engine.call_fn::<Dynamic>(&mut self.scope, &ast, name, args) {
            Ok(_) => Ok(true),
            Err(err) => {
                if matches!(err.as_ref(), EvalAltResult::ErrorFunctionNotFound(..)) {
                    log::warn!(target: "script", "hit callback '{name}' is not defined in {}", self.source_name);
                    Ok(false)
                } else {
                    self.error = Some(err.to_string());
                    Err(anyhow!("Hit callback '{name}' failed: {err}"))
                }
            }
        }
    }

    /// Drains the world's events, runs hit callbacks, and returns the events together
    /// with any messages the script logged.
    pub fn dispatch_events(&mut self, ecs: &mut EcsWorld) -> Vec<GameEvent> {
        let mut events = ecs.drain_events();
        for event in &events {
            if let GameEvent::RagdollHit { entity, bone, other, callback } = event {
                if let Err(err) = self.call_hit_callback(callback, *entity, *bone, *other) {
                    log::warn!(target: "script", "{err:#}");
                }
            }
        }
        events.extend(self.take_messages().into_iter().map(|message| GameEvent::ScriptMessage { message }));
        events
    }

    pub fn take_messages(&mut self) -> Vec<String> {
        match self.messages.lock() {
            Ok(mut messages) => std::mem::take(&mut *messages),
            Err(_) => Vec::new(),
        }
    }
}

pub fn entity_to_bits(entity: Entity) -> rhai::INT {
    entity.to_bits() as rhai::INT
}

pub fn entity_from_bits(bits: rhai::INT) -> Option<Entity> {
    if bits < 0 {
        None
    } else {
        Entity::try_from_bits(bits as u64).ok()
    }
}

fn register_api(engine: &mut Engine, messages: Arc<Mutex<Vec<String>>>) {
    engine.register_fn("log", move |message: &str| {
        log::info!(target: "script", "{message}");
        if let Ok(mut messages) = messages.lock() {
            messages.push(message.to_string());
        }
    });
}
