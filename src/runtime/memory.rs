//! A runtime whose libraries are plain binding tables
//!
//! Libraries are created on first definition and never loaded from disk, so
//! this is how Rust written applications are mounted, and what the tests run
//! against.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{check_arity, Library, Procedure, Runtime, Value, DISPATCH_LIBRARY, DISPATCH_PROCEDURE};
use crate::error::Condition;

pub struct MemoryLibrary {
    name: String,
    bindings: RwLock<HashMap<String, Procedure>>,
}

impl MemoryLibrary {
    pub fn new(name: &str) -> Self {
        MemoryLibrary {
            name: name.to_owned(),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// bind `name`, replacing any previous binding
    pub fn define(&self, name: &str, value: Procedure) {
        self.bindings.write().insert(name.to_owned(), value);
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Library for MemoryLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_binding(&self, name: &str) -> Option<Procedure> {
        self.bindings.read().get(name).cloned()
    }
}

#[derive(Default)]
pub struct MemoryRuntime {
    libraries: RwLock<HashMap<String, Arc<MemoryLibrary>>>,
    load_path: Mutex<Vec<PathBuf>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        MemoryRuntime::default()
    }

    /// a runtime that already carries the standard dispatcher
    pub fn with_dispatcher() -> Self {
        let rt = MemoryRuntime::new();
        rt.define(DISPATCH_LIBRARY, DISPATCH_PROCEDURE, dispatcher());
        rt
    }

    /// the library called `name`, created empty when missing
    pub fn library(&self, name: &str) -> Arc<MemoryLibrary> {
        if let Some(lib) = self.libraries.read().get(name) {
            return lib.clone();
        }
        self.libraries
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryLibrary::new(name)))
            .clone()
    }
}

impl Runtime for MemoryRuntime {
    fn find_library(&self, name: &str) -> Option<Arc<dyn Library>> {
        let libs = self.libraries.read();
        libs.get(name).map(|lib| lib.clone() as Arc<dyn Library>)
    }

    fn define(&self, library: &str, name: &str, value: Procedure) {
        self.library(library).define(name, value);
    }

    fn load_path(&self) -> Vec<PathBuf> {
        self.load_path.lock().clone()
    }

    fn set_load_path(&self, paths: Vec<PathBuf>) {
        *self.load_path.lock() = paths;
    }
}

/// the plain dispatcher: apply the bound procedure to the request and the
/// response and return whatever it returns
pub fn dispatcher() -> Procedure {
    Procedure::new(DISPATCH_PROCEDURE, |args: &[Value]| {
        check_arity(DISPATCH_PROCEDURE, 3, args)?;
        match args[0] {
            Value::Procedure(ref p) => p.apply(&args[1..]),
            ref v => Err(Condition::wrong_type(
                DISPATCH_PROCEDURE,
                "procedure",
                v.type_name(),
            )),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libraries_are_created_on_define() {
        let rt = MemoryRuntime::new();
        assert!(rt.find_library("(app)").is_none());
        rt.define("(app)", "run", Procedure::new("run", |_: &[Value]| Ok(Value::Int(200))));
        let lib = rt.find_library("(app)").unwrap();
        assert_eq!(lib.name(), "(app)");
        assert!(lib.find_binding("run").is_some());
        assert!(lib.find_binding("walk").is_none());
        assert_eq!(rt.library("(app)").len(), 1);
    }

    #[test]
    fn dispatcher_applies_procedure() {
        let d = dispatcher();
        let target = Procedure::new("t", |args: &[Value]| Ok(Value::Int(args.len() as i64)));
        let ret = d
            .apply(&[Value::Procedure(target), Value::Bool(true), Value::Bool(false)])
            .unwrap();
        assert_eq!(ret, Value::Int(2));
        assert_eq!(
            d.apply(&[Value::Int(1), Value::Int(2), Value::Int(3)]),
            Err(Condition::wrong_type(DISPATCH_PROCEDURE, "procedure", "integer"))
        );
        assert!(d.apply(&[]).is_err());
    }

    #[test]
    fn define_from_many_threads() {
        let rt = Arc::new(MemoryRuntime::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rt = rt.clone();
                std::thread::spawn(move || {
                    let name = format!("p{}", i);
                    rt.define("(app)", &name, Procedure::new(&name, |_: &[Value]| Ok(Value::Int(0))));
                    rt.set_load_path(vec![PathBuf::from(name)]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(rt.library("(app)").len(), 8);
        assert_eq!(rt.load_path().len(), 1);
    }
}
