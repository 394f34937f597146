//! The boundary with the embedded Scheme runtime
//!
//! Interpreted code only ever sees [`Value`]s. The facades, contexts and ports
//! are passed as opaque handles, and the accessors in [`crate::bindings`] are
//! the only way to look inside them.
pub mod memory;

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;

use crate::body::{BodyReader, BodyWriter};
use crate::context::{LocationContext, Parameters};
use crate::error::Condition;
use crate::filter::FilterContext;
use crate::server::{RequestView, ResponseView};

/// library holding the request dispatcher
pub const DISPATCH_LIBRARY: &str = "(sagittarius nginx)";
/// the dispatcher, called with the bound procedure, request and response
pub const DISPATCH_PROCEDURE: &str = "nginx-dispatch-request";
/// library receiving the accessors of [`crate::bindings`]
pub const INTERNAL_LIBRARY: &str = "(sagittarius nginx internal)";

/// a value crossing the runtime boundary
#[derive(Clone)]
pub enum Value {
    Unspecified,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Bytes),
    List(Vec<Value>),
    /// an immutable string hashtable
    Table(Arc<Parameters>),
    Procedure(Procedure),
    Condition(Condition),
    Context(Arc<LocationContext>),
    FilterContext(Arc<FilterContext>),
    Request(Rc<RequestView>),
    Response(Rc<ResponseView>),
    InputPort(Rc<RefCell<BodyReader>>),
    OutputPort(Rc<RefCell<BodyWriter>>),
}

impl Value {
    /// the name used in type violations
    pub fn type_name(&self) -> &'static str {
        match *self {
            Value::Unspecified => "unspecified",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytevector",
            Value::List(_) => "list",
            Value::Table(_) => "hashtable",
            Value::Procedure(_) => "procedure",
            Value::Condition(_) => "condition",
            Value::Context(_) => "nginx-context",
            Value::FilterContext(_) => "nginx-filter-context",
            Value::Request(_) => "nginx-request",
            Value::Response(_) => "nginx-response",
            Value::InputPort(_) => "nginx-request-port",
            Value::OutputPort(_) => "nginx-response-port",
        }
    }

    /// `#f` for `None`
    pub fn from_opt<T: Into<Value>>(v: Option<T>) -> Value {
        v.map_or(Value::Bool(false), Into::into)
    }

    /// a list of two element lists
    pub fn pairs(pairs: &[(String, String)]) -> Value {
        Value::List(
            pairs
                .iter()
                .map(|(k, v)| Value::List(vec![Value::Str(k.clone()), Value::Str(v.clone())]))
                .collect(),
        )
    }

    #[inline]
    pub fn is_false(&self) -> bool {
        match *self {
            Value::Bool(false) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::Str(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl PartialEq for Value {
    /// data compares by content, handles by identity
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unspecified, Value::Unspecified) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Procedure(a), Value::Procedure(b)) => a.ptr_eq(b),
            (Value::Condition(a), Value::Condition(b)) => a == b,
            (Value::Context(a), Value::Context(b)) => Arc::ptr_eq(a, b),
            (Value::FilterContext(a), Value::FilterContext(b)) => Arc::ptr_eq(a, b),
            (Value::Request(a), Value::Request(b)) => Rc::ptr_eq(a, b),
            (Value::Response(a), Value::Response(b)) => Rc::ptr_eq(a, b),
            (Value::InputPort(a), Value::InputPort(b)) => Rc::ptr_eq(a, b),
            (Value::OutputPort(a), Value::OutputPort(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Unspecified => write!(f, "#<unspecified>"),
            Value::Bool(true) => write!(f, "#t"),
            Value::Bool(false) => write!(f, "#f"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(ref s) => write!(f, "{:?}", s),
            Value::Bytes(ref b) => write!(f, "#vu8({} bytes)", b.len()),
            Value::List(ref l) => f.debug_list().entries(l.iter()).finish(),
            Value::Table(ref t) => write!(f, "#<hashtable {}>", t.len()),
            Value::Procedure(ref p) => write!(f, "#<procedure {}>", p.name()),
            Value::Condition(ref c) => write!(f, "#<condition {}>", c),
            Value::Context(ref c) => write!(f, "#<nginx-context {}>", c.path()),
            Value::FilterContext(ref c) => write!(f, "#<nginx-filter-context {}>", c.name()),
            Value::Request(ref r) => write!(f, "#<nginx-request {:?}>", r),
            Value::Response(_) => write!(f, "#<nginx-response>"),
            Value::InputPort(_) => write!(f, "#<nginx-request-port>"),
            Value::OutputPort(_) => write!(f, "#<nginx-response-port>"),
        }
    }
}

/// something the runtime can call
pub trait Apply: Send + Sync {
    fn apply(&self, args: &[Value]) -> Result<Value, Condition>;
}

impl<F> Apply for F
where
    F: Fn(&[Value]) -> Result<Value, Condition>,
    F: Send + Sync,
{
    fn apply(&self, args: &[Value]) -> Result<Value, Condition> {
        self(args)
    }
}

/// a named callable handle
#[derive(Clone)]
pub struct Procedure {
    name: Arc<str>,
    inner: Arc<dyn Apply>,
}

impl Procedure {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Condition> + Send + Sync + 'static,
    {
        Procedure::from_apply(name, f)
    }

    pub fn from_apply<A: Apply + 'static>(name: &str, a: A) -> Self {
        Procedure {
            name: Arc::from(name),
            inner: Arc::new(a),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn apply(&self, args: &[Value]) -> Result<Value, Condition> {
        self.inner.apply(args)
    }

    /// whether both handles refer to the same procedure
    #[inline]
    pub fn ptr_eq(&self, other: &Procedure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#<procedure {}>", self.name)
    }
}

/// check the argument count of a host procedure
#[inline]
pub fn check_arity(who: &str, required: usize, args: &[Value]) -> Result<(), Condition> {
    if args.len() != required {
        return Err(Condition::wrong_arity(who, required, args.len()));
    }
    Ok(())
}

/// a loaded library
pub trait Library: Send + Sync {
    fn name(&self) -> &str;

    /// the procedure bound to `name`, `None` when unbound or not callable
    fn find_binding(&self, name: &str) -> Option<Procedure>;
}

/// the embedded runtime of the worker process
pub trait Runtime: Send + Sync {
    /// find an already loaded library, or load it from the load path
    fn find_library(&self, name: &str) -> Option<Arc<dyn Library>>;

    /// insert a binding, creating the library when needed
    fn define(&self, library: &str, name: &str, value: Procedure);

    fn load_path(&self) -> Vec<PathBuf>;

    fn set_load_path(&self, paths: Vec<PathBuf>);

    /// prepend a directory to the load path
    fn add_load_path(&self, path: &Path) {
        let mut paths = self.load_path();
        paths.insert(0, path.to_path_buf());
        self.set_load_path(paths);
    }
}

/// prepends load paths for the duration of a call and restores the saved
/// load path when dropped
pub struct LoadPathGuard<'a> {
    runtime: &'a dyn Runtime,
    saved: Vec<PathBuf>,
}

impl<'a> LoadPathGuard<'a> {
    pub fn new(runtime: &'a dyn Runtime, paths: &[PathBuf]) -> Self {
        let saved = runtime.load_path();
        for p in paths {
            debug!("load path: {}", p.display());
            runtime.add_load_path(p);
        }
        LoadPathGuard { runtime, saved }
    }
}

impl<'a> Drop for LoadPathGuard<'a> {
    fn drop(&mut self) {
        let saved = std::mem::replace(&mut self.saved, Vec::new());
        self.runtime.set_load_path(saved);
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryRuntime;
    use super::*;

    #[test]
    fn procedure_identity() {
        let p = Procedure::new("id", |args: &[Value]| Ok(args[0].clone()));
        let q = p.clone();
        let r = Procedure::new("id", |args: &[Value]| Ok(args[0].clone()));
        assert!(p.ptr_eq(&q));
        assert!(!p.ptr_eq(&r));
        assert_eq!(p.apply(&[Value::Int(3)]).unwrap(), Value::Int(3));
        assert_eq!(Value::Procedure(p), Value::Procedure(q));
    }

    #[test]
    fn arity() {
        assert!(check_arity("f", 2, &[Value::Int(1), Value::Int(2)]).is_ok());
        assert_eq!(
            check_arity("f", 2, &[Value::Int(1)]),
            Err(Condition::wrong_arity("f", 2, 1))
        );
    }

    #[test]
    fn load_path_guard_restores() {
        let rt = MemoryRuntime::new();
        rt.set_load_path(vec![PathBuf::from("/base")]);
        {
            let _g = LoadPathGuard::new(&rt, &[PathBuf::from("/a"), PathBuf::from("/b")]);
            assert_eq!(
                rt.load_path(),
                vec![PathBuf::from("/b"), PathBuf::from("/a"), PathBuf::from("/base")]
            );
        }
        assert_eq!(rt.load_path(), vec![PathBuf::from("/base")]);
    }

    #[test]
    fn value_helpers() {
        assert!(Value::from_opt::<String>(None).is_false());
        assert_eq!(Value::from_opt(Some("x")), Value::Str("x".into()));
        let v = Value::pairs(&[("a".into(), "1".into())]);
        assert_eq!(
            v,
            Value::List(vec![Value::List(vec![Value::from("a"), Value::from("1")])])
        );
    }
}
