//! Per location application contexts
//!
//! A context binds a location to its application library and to the entry
//! point wrapped in its filters. Locations are registered while the
//! configuration is read. The context itself is built by the first request
//! that reaches the location and then lives until the process exits.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use http::StatusCode;

use crate::conf::{LocationConf, ModuleConf};
use crate::filter;
use crate::runtime::{Library, Procedure, Runtime, Value};

/// an immutable string table handed to interpreted code
pub type Parameters = HashMap<String, String>;

lazy_static! {
    // held while a context is built, never while it is read
    static ref BUILD_LOCK: Mutex<()> = Mutex::new(());
}

/// the application bound to one location
pub struct LocationContext {
    path: String,
    parameters: Arc<Parameters>,
    library: Option<Arc<dyn Library>>,
    cleanup: Option<Procedure>,
    // set once the filters are wrapped around the entry point
    procedure: OnceLock<Procedure>,
}

impl LocationContext {
    pub(crate) fn new(path: &str, parameters: Parameters) -> Self {
        LocationContext {
            path: path.to_owned(),
            parameters: Arc::new(parameters),
            library: None,
            cleanup: None,
            procedure: OnceLock::new(),
        }
    }

    /// the location name
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn parameters(&self) -> &Arc<Parameters> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn library(&self) -> Option<&Arc<dyn Library>> {
        self.library.as_ref()
    }

    /// the entry point with its filters, `None` when the location failed
    pub fn procedure(&self) -> Option<&Procedure> {
        self.procedure.get()
    }

    pub fn cleanup(&self) -> Option<&Procedure> {
        self.cleanup.as_ref()
    }

    /// whether requests can be dispatched to this context
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.procedure.get().is_some()
    }
}

impl fmt::Debug for LocationContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<nginx-context {}>", self.path)
    }
}

/// where a registered location stands
#[derive(Debug, Clone)]
pub enum ContextState {
    /// no request reached the location yet
    Unregistered,
    Building,
    Ready(Arc<LocationContext>),
    /// built without a callable entry point, answers 404 from now on
    Failed(Arc<LocationContext>),
}

struct LocationSlot {
    conf: LocationConf,
    context: OnceLock<Arc<LocationContext>>,
    building: AtomicBool,
}

/// every location of the process, keyed by location name
#[derive(Default)]
pub struct ContextCache {
    slots: BTreeMap<String, LocationSlot>,
}

impl ContextCache {
    pub fn new() -> Self {
        ContextCache::default()
    }

    /// register every location of the module configuration
    pub fn from_conf(conf: &ModuleConf) -> Self {
        let mut cache = ContextCache::new();
        for loc in conf.locations.values() {
            cache.register(loc.clone());
        }
        cache
    }

    /// register a location, a second registration of the same name is ignored
    pub fn register(&mut self, conf: LocationConf) {
        if self.slots.contains_key(&conf.path) {
            debug!("location {} is already registered", conf.path);
            return;
        }
        self.slots.insert(
            conf.path.clone(),
            LocationSlot {
                conf,
                context: OnceLock::new(),
                building: AtomicBool::new(false),
            },
        );
    }

    pub fn conf(&self, path: &str) -> Option<&LocationConf> {
        self.slots.get(path).map(|s| &s.conf)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// `None` for a location that was never registered
    pub fn state(&self, path: &str) -> Option<ContextState> {
        let slot = self.slots.get(path)?;
        let state = match slot.context.get() {
            Some(ctx) if ctx.is_bound() => ContextState::Ready(ctx.clone()),
            Some(ctx) => ContextState::Failed(ctx.clone()),
            None if slot.building.load(Ordering::Acquire) => ContextState::Building,
            None => ContextState::Unregistered,
        };
        Some(state)
    }

    /// the context of `path`, built on first use
    ///
    /// Failed and unknown locations answer 404.
    pub fn get_or_build(
        &self,
        path: &str,
        runtime: &dyn Runtime,
    ) -> Result<Arc<LocationContext>, StatusCode> {
        let slot = match self.slots.get(path) {
            Some(slot) => slot,
            None => {
                warn!("unknown context node {}", path);
                return Err(StatusCode::NOT_FOUND);
            }
        };

        let ctx = match slot.context.get() {
            Some(ctx) => ctx.clone(),
            None => {
                debug!("creating a context of {}", path);
                let _guard = BUILD_LOCK.lock();
                slot.context
                    .get_or_init(|| {
                        slot.building.store(true, Ordering::Release);
                        let ctx = build(&slot.conf, runtime);
                        slot.building.store(false, Ordering::Release);
                        ctx
                    })
                    .clone()
            }
        };

        if ctx.is_bound() {
            Ok(ctx)
        } else {
            Err(StatusCode::NOT_FOUND)
        }
    }

    /// call the cleanup procedure of every built context
    ///
    /// a failing cleanup is logged and does not stop the others
    pub fn cleanup(&self) {
        for (path, slot) in self.slots.iter() {
            let ctx = match slot.context.get() {
                Some(ctx) => ctx,
                None => continue,
            };
            if let Some(proc) = ctx.cleanup() {
                debug!("calling cleanup procedure of {}", path);
                if let Err(e) = proc.apply(&[Value::Context(ctx.clone())]) {
                    error!("failed to call cleanup procedure of {}: {}", path, e);
                }
            }
        }
    }
}

fn find_procedure(library: &dyn Library, name: &str) -> Option<Procedure> {
    let p = library.find_binding(name);
    if p.is_none() {
        warn!("procedure '{}' not found in {}", name, library.name());
    }
    p
}

fn build(conf: &LocationConf, runtime: &dyn Runtime) -> Arc<LocationContext> {
    let parameters = conf.parameters.iter().cloned().collect();
    let mut ctx = LocationContext::new(&conf.path, parameters);

    let name = conf.library.as_deref().unwrap_or("");
    let library = match runtime.find_library(name) {
        Some(lib) => lib,
        None => {
            error!("web application library '{}' not found", name);
            return Arc::new(ctx);
        }
    };

    ctx.cleanup = conf
        .cleanup
        .as_deref()
        .and_then(|name| find_procedure(&*library, name));
    ctx.library = Some(library.clone());
    let ctx = Arc::new(ctx);

    if let Some(init) = conf.init.as_deref() {
        if let Some(p) = find_procedure(&*library, init) {
            debug!("calling init procedure '{}'", init);
            if let Err(e) = p.apply(&[Value::Context(ctx.clone())]) {
                error!("failed to call init procedure '{}': {}", init, e);
            }
        }
    }

    match library.find_binding(&conf.procedure) {
        Some(terminal) => {
            let p = filter::build(terminal, &conf.filters, &*library, runtime);
            let _ = ctx.procedure.set(p);
        }
        None => error!("web application procedure '{}' not found", conf.procedure),
    }
    ctx
}
