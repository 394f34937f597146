//! Runs Scheme web applications inside nginx
//!
//! The module owns one context per configured location, builds the filter
//! chain in front of each application, and bridges the host's request and
//! response records to the values the embedded runtime sees. A small `may`
//! based host in [`server::HostServer`] serves the same module without nginx.
extern crate bytes;
pub extern crate http;
extern crate httparse;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate may;
extern crate parking_lot;
extern crate tempfile;
extern crate time;

pub mod bindings;
pub mod body;
mod buffer;
pub mod conf;
pub mod context;
mod date;
pub mod error;
pub mod filter;
pub mod host;
pub mod runtime;
pub mod server;

pub use crate::conf::{FilterSpec, LocationConf, ModuleConf};
pub use crate::context::{ContextCache, LocationContext};
pub use crate::error::{Condition, ConfError};
pub use crate::runtime::{Library, Procedure, Runtime, Value};
pub use crate::server::{HostServer, Module};
