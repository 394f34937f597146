//! The request handler of the module and the development host
mod request;
mod response;
mod server_impl;

use std::convert::TryFrom;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use http::StatusCode;

use crate::bindings;
use crate::body::BodyWriter;
use crate::conf::ModuleConf;
use crate::context::ContextCache;
use crate::host::{Handled, Host, PostHandler, RequestRef};
use crate::runtime::{LoadPathGuard, Procedure, Runtime, Value, DISPATCH_LIBRARY, DISPATCH_PROCEDURE};

pub use self::request::{PeerCertificate, RequestView, WELL_KNOWN_FIELDS};
pub use self::response::ResponseView;
pub use self::server_impl::{buffer_body, serve, HostServer};

/// one module instance per worker process
///
/// Owns the configuration and the context of every location, and runs
/// requests through the dispatcher of the embedded runtime.
pub struct Module {
    runtime: Arc<dyn Runtime>,
    conf: ModuleConf,
    contexts: ContextCache,
    // resolved by the first request, never changes afterwards
    dispatcher: OnceLock<Procedure>,
}

impl Module {
    pub fn new(runtime: Arc<dyn Runtime>, conf: ModuleConf) -> Self {
        let contexts = ContextCache::from_conf(&conf);
        Module {
            runtime,
            conf,
            contexts,
            dispatcher: OnceLock::new(),
        }
    }

    #[inline]
    pub fn conf(&self) -> &ModuleConf {
        &self.conf
    }

    #[inline]
    pub fn contexts(&self) -> &ContextCache {
        &self.contexts
    }

    #[inline]
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// worker process start, installs the internal library
    pub fn init_process(&self) {
        debug!("initialising worker process");
        bindings::install(&*self.runtime);
    }

    /// worker process exit, runs the cleanup procedure of every context
    pub fn exit_process(&self) {
        debug!("exiting worker process");
        self.contexts.cleanup();
    }

    /// the content handler
    ///
    /// Requests with a body are answered once the host has read it, the
    /// handler then returns `Handled::Done` and the continuation finalizes
    /// the request.
    pub fn handle(self: &Arc<Self>, host: Rc<dyn Host>, r: &RequestRef) -> Handled {
        let (has_body, length) = {
            let raw = r.borrow();
            debug!("handling request for {}", raw);
            (raw.has_body(), raw.headers_in.content_length_n)
        };
        if !has_body {
            return Handled::Status(self.call(&*host, r));
        }

        debug!("reading client body {}", length);
        let module = self.clone();
        let h = host.clone();
        let post: PostHandler = Box::new(move |r: &RequestRef| {
            let status = module.call(&*h, r);
            h.finalize_request(r, status);
        });
        match host.read_client_request_body(r, post) {
            Ok(()) => Handled::Done,
            Err(status) => Handled::Status(status),
        }
    }

    fn dispatcher(&self) -> Option<Procedure> {
        if let Some(d) = self.dispatcher.get() {
            return Some(d.clone());
        }
        debug!("initialising '{}' library", DISPATCH_LIBRARY);
        let lib = match self.runtime.find_library(DISPATCH_LIBRARY) {
            Some(lib) => lib,
            None => {
                error!("failed to find '{}' library", DISPATCH_LIBRARY);
                return None;
            }
        };
        match lib.find_binding(DISPATCH_PROCEDURE) {
            Some(d) => Some(self.dispatcher.get_or_init(|| d).clone()),
            None => {
                error!("failed to retrieve {}", DISPATCH_PROCEDURE);
                None
            }
        }
    }

    /// run the application of the request's location and hand its
    /// response to the host
    pub fn call(&self, host: &dyn Host, r: &RequestRef) -> StatusCode {
        let path = r.borrow().location.clone();
        let conf = match self.contexts.conf(&path) {
            Some(conf) => conf,
            None => {
                warn!("no configuration for location '{}'", path);
                return StatusCode::NOT_FOUND;
            }
        };
        let _load_path = LoadPathGuard::new(&*self.runtime, &conf.load_paths);

        let dispatch = match self.dispatcher() {
            Some(d) => d,
            None => return StatusCode::INTERNAL_SERVER_ERROR,
        };
        let ctx = match self.contexts.get_or_build(&path, &*self.runtime) {
            Ok(ctx) => ctx,
            Err(status) => return status,
        };
        let proc = match ctx.procedure() {
            Some(p) => p.clone(),
            None => return StatusCode::NOT_FOUND,
        };

        let out = BodyWriter::with_limit(self.conf.buffer_size, self.conf.buffer_limit);
        let req = Rc::new(RequestView::new(r.clone(), ctx));
        let res = Rc::new(ResponseView::new(r.clone(), out));
        let ret = dispatch.apply(&[
            Value::Procedure(proc),
            Value::Request(req),
            Value::Response(res.clone()),
        ]);
        let ret = match ret {
            Ok(v) => v,
            Err(e) => {
                error!("failed to execute {}: {}", DISPATCH_PROCEDURE, e);
                let _ = host.discard_request_body(r);
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        };

        // whatever the application did not read
        if let Err(status) = host.discard_request_body(r) {
            return status;
        }

        let status = match ret
            .as_int()
            .and_then(|i| u16::try_from(i).ok())
            .and_then(|i| StatusCode::from_u16(i).ok())
        {
            Some(status) => status,
            None => {
                error!("application returned {:?}, not a status", ret);
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        };

        let out = res.output_port().borrow_mut().take_chain();
        {
            let mut raw = r.borrow_mut();
            debug!(
                "returned status is {}, content-type is '{}'",
                status,
                String::from_utf8_lossy(&raw.headers_out.content_type)
            );
            raw.headers_out.status = status.as_u16();
            raw.headers_out.content_length_n = out.size() as i64;
            raw.header_only = out.size() == 0;
        }

        if let Err(e) = host.send_header(r) {
            error!("failed to send header: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        if !out.is_empty() {
            if let Err(e) = host.output_filter(r, out) {
                error!("failed to send body: {}", e);
            }
        }
        status
    }
}
