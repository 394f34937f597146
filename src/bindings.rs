//! The accessors installed into `(sagittarius nginx internal)`
//!
//! Each binding checks its argument count and the kind of every argument
//! before touching it, and raises the matching violation otherwise.
use std::convert::TryFrom;

use http::StatusCode;

use crate::error::Condition;
use crate::runtime::{check_arity, Procedure, Runtime, Value, INTERNAL_LIBRARY};
use crate::server::WELL_KNOWN_FIELDS;

// extract a typed argument or raise a wrong type violation
macro_rules! arg {
    ($who:expr, $args:expr, $i:expr, $variant:ident, $expected:expr) => {
        match $args[$i] {
            Value::$variant(ref v) => v,
            ref v => return Err(Condition::wrong_type($who, $expected, v.type_name())),
        }
    };
}

// define a fixed arity procedure
macro_rules! define {
    ($rt:expr, $name:expr, $arity:expr, |$args:ident| $body:expr) => {{
        let name: &'static str = $name;
        $rt.define(
            INTERNAL_LIBRARY,
            name,
            Procedure::new(name, move |$args: &[Value]| {
                check_arity(name, $arity, $args)?;
                $body
            }),
        );
    }};
}

macro_rules! predicate {
    ($rt:expr, $name:expr, $variant:ident) => {
        define!($rt, $name, 1, |args| Ok(Value::Bool(match args[0] {
            Value::$variant(_) => true,
            _ => false,
        })))
    };
}

macro_rules! getter {
    ($rt:expr, $name:expr, $variant:ident, $expected:expr, |$v:ident| $body:expr) => {
        define!($rt, $name, 1, |args| {
            let $v = arg!($name, args, 0, $variant, $expected);
            Ok($body)
        })
    };
}

fn status_arg(who: &str, v: &Value) -> Result<StatusCode, Condition> {
    v.as_int()
        .and_then(|i| u16::try_from(i).ok())
        .and_then(|i| StatusCode::from_u16(i).ok())
        .ok_or_else(|| Condition::wrong_type(who, "http status", v.type_name()))
}

/// install every accessor into the runtime
pub fn install(rt: &dyn Runtime) {
    debug!("initialising '{}' library", INTERNAL_LIBRARY);
    install_context(rt);
    install_request(rt);
    install_response(rt);
    install_error(rt);
}

fn install_context(rt: &dyn Runtime) {
    const CTX: &str = "nginx-context";
    const FCTX: &str = "nginx-filter-context";

    predicate!(rt, "nginx-context?", Context);
    getter!(rt, "nginx-context-path", Context, CTX, |c| Value::from(c.path()));
    getter!(rt, "nginx-context-parameters", Context, CTX, |c| {
        Value::Table(c.parameters().clone())
    });
    define!(rt, "nginx-context-parameter-ref", 2, |args| {
        let who = "nginx-context-parameter-ref";
        let c = arg!(who, args, 0, Context, CTX);
        let key = arg!(who, args, 1, Str, "string");
        Ok(Value::from_opt(c.parameter(key)))
    });

    predicate!(rt, "nginx-filter-context?", FilterContext);
    getter!(rt, "nginx-filter-context-name", FilterContext, FCTX, |c| {
        Value::from(c.name())
    });
    define!(rt, "nginx-filter-context-parameter-ref", 2, |args| {
        let who = "nginx-filter-context-parameter-ref";
        let c = arg!(who, args, 0, FilterContext, FCTX);
        let key = arg!(who, args, 1, Str, "string");
        Ok(Value::from_opt(c.parameter(key)))
    });
}

fn install_request(rt: &dyn Runtime) {
    const REQ: &str = "nginx-request";

    predicate!(rt, "nginx-request?", Request);
    getter!(rt, "nginx-request-method", Request, REQ, |r| Value::from(r.method()));
    getter!(rt, "nginx-request-uri", Request, REQ, |r| Value::from(r.uri()));
    getter!(rt, "nginx-request-headers", Request, REQ, |r| Value::pairs(&r.headers()));
    getter!(rt, "nginx-request-cookies", Request, REQ, |r| r.cookies());
    define!(rt, "nginx-request-cookies-set!", 2, |args| {
        let r = arg!("nginx-request-cookies-set!", args, 0, Request, REQ);
        r.set_cookies(args[1].clone())?;
        Ok(Value::Unspecified)
    });
    getter!(rt, "nginx-request-query-string", Request, REQ, |r| {
        Value::from(r.query_string())
    });
    getter!(rt, "nginx-request-original-uri", Request, REQ, |r| {
        Value::from(r.original_uri())
    });
    getter!(rt, "nginx-request-request-line", Request, REQ, |r| {
        Value::from(r.request_line())
    });
    getter!(rt, "nginx-request-schema", Request, REQ, |r| Value::from(r.schema()));
    getter!(rt, "nginx-request-input-port", Request, REQ, |r| {
        Value::InputPort(r.input_port())
    });
    getter!(rt, "nginx-request-context", Request, REQ, |r| {
        Value::Context(r.context().clone())
    });
    getter!(rt, "nginx-request-peer-certificate", Request, REQ, |r| {
        Value::from_opt(r.peer_certificate())
    });

    for &field in WELL_KNOWN_FIELDS.iter() {
        let name = format!("nginx-request-{}", field);
        let who = name.clone();
        rt.define(
            INTERNAL_LIBRARY,
            &name,
            Procedure::new(&name, move |args: &[Value]| {
                check_arity(&who, 1, args)?;
                let r = arg!(&who, args, 0, Request, REQ);
                Ok(Value::from_opt(r.header_field(field)))
            }),
        );
    }
}

fn install_response(rt: &dyn Runtime) {
    const RES: &str = "nginx-response";

    predicate!(rt, "nginx-response?", Response);
    getter!(rt, "nginx-response-content-type", Response, RES, |r| {
        Value::from(r.content_type())
    });
    define!(rt, "nginx-response-content-type-set!", 2, |args| {
        let who = "nginx-response-content-type-set!";
        let r = arg!(who, args, 0, Response, RES);
        let ct = arg!(who, args, 1, Str, "string");
        r.set_content_type(ct);
        Ok(Value::Unspecified)
    });
    getter!(rt, "nginx-response-headers", Response, RES, |r| Value::pairs(&r.headers()));
    getter!(rt, "nginx-response-output-port", Response, RES, |r| {
        Value::OutputPort(r.output_port())
    });
    define!(rt, "nginx-response-header-add!", 3, |args| {
        let who = "nginx-response-header-add!";
        let r = arg!(who, args, 0, Response, RES);
        let name = arg!(who, args, 1, Str, "string");
        let value = arg!(who, args, 2, Str, "string");
        r.add_header(name, value);
        Ok(Value::Unspecified)
    });
    define!(rt, "nginx-response-header-set!", 3, |args| {
        let who = "nginx-response-header-set!";
        let r = arg!(who, args, 0, Response, RES);
        let name = arg!(who, args, 1, Str, "string");
        let value = arg!(who, args, 2, Str, "string");
        r.set_header(name, value);
        Ok(Value::Unspecified)
    });
    define!(rt, "nginx-response-header-remove!", 2, |args| {
        let who = "nginx-response-header-remove!";
        let r = arg!(who, args, 0, Response, RES);
        let name = arg!(who, args, 1, Str, "string");
        r.remove_header(name);
        Ok(Value::Unspecified)
    });
}

fn install_error(rt: &dyn Runtime) {
    define!(rt, "make-nginx-error", 1, |args| {
        let status = status_arg("make-nginx-error", &args[0])?;
        let reason = status.canonical_reason().unwrap_or("");
        Ok(Value::Condition(Condition::nginx("nginx", reason, status)))
    });
    define!(rt, "nginx-error?", 1, |args| {
        Ok(Value::Bool(match args[0] {
            Value::Condition(ref c) => c.status().is_some(),
            _ => false,
        }))
    });
    define!(rt, "&nginx-error-status", 1, |args| {
        let who = "&nginx-error-status";
        let c = arg!(who, args, 0, Condition, "&nginx-error");
        match c.status() {
            Some(s) => Ok(Value::Int(i64::from(s.as_u16()))),
            None => Err(Condition::wrong_type(who, "&nginx-error", "condition")),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::sync::Arc;

    use super::*;
    use crate::body::{BodyWriter, BUFFER_SIZE};
    use crate::context::LocationContext;
    use crate::host::NativeRequest;
    use crate::runtime::memory::MemoryRuntime;
    use crate::runtime::Library;
    use crate::server::{RequestView, ResponseView};

    fn installed() -> MemoryRuntime {
        let rt = MemoryRuntime::new();
        install(&rt);
        rt
    }

    fn call(rt: &MemoryRuntime, name: &str, args: &[Value]) -> Result<Value, Condition> {
        let lib = rt.library(INTERNAL_LIBRARY);
        let p = lib.find_binding(name).unwrap_or_else(|| panic!("{} unbound", name));
        p.apply(args)
    }

    fn views() -> (Value, Value) {
        let mut raw = NativeRequest::new("/app", "GET", "/app/item?id=7");
        raw.headers_in.push("User-Agent", "test");
        raw.headers_in.push("Cookie", "sid=1");
        let raw = raw.into_ref();
        let mut params = crate::context::Parameters::new();
        params.insert("root".to_owned(), "/srv".to_owned());
        let ctx = Arc::new(LocationContext::new("/app", params));
        let req = RequestView::new(raw.clone(), ctx);
        let res = ResponseView::new(raw, BodyWriter::new(BUFFER_SIZE));
        (Value::Request(Rc::new(req)), Value::Response(Rc::new(res)))
    }

    #[test]
    fn request_accessors() {
        let rt = installed();
        let (req, res) = views();
        assert_eq!(call(&rt, "nginx-request?", &[req.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(call(&rt, "nginx-request?", &[res.clone()]).unwrap(), Value::Bool(false));
        assert_eq!(call(&rt, "nginx-request-method", &[req.clone()]).unwrap(), Value::from("GET"));
        assert_eq!(
            call(&rt, "nginx-request-query-string", &[req.clone()]).unwrap(),
            Value::from("id=7")
        );
        assert_eq!(
            call(&rt, "nginx-request-user-agent", &[req.clone()]).unwrap(),
            Value::from("test")
        );
        assert!(call(&rt, "nginx-request-referer", &[req.clone()]).unwrap().is_false());
        assert!(call(&rt, "nginx-request-peer-certificate", &[req.clone()])
            .unwrap()
            .is_false());
        let ctx = call(&rt, "nginx-request-context", &[req.clone()]).unwrap();
        assert_eq!(
            call(&rt, "nginx-context-parameter-ref", &[ctx.clone(), Value::from("root")]).unwrap(),
            Value::from("/srv")
        );
        assert!(
            call(&rt, "nginx-context-parameter-ref", &[ctx, Value::from("nope")])
                .unwrap()
                .is_false()
        );
        // the port is the same object on every call
        assert_eq!(
            call(&rt, "nginx-request-input-port", &[req.clone()]).unwrap(),
            call(&rt, "nginx-request-input-port", &[req]).unwrap()
        );
    }

    #[test]
    fn cookies_through_bindings() {
        let rt = installed();
        let (req, _) = views();
        let raw = call(&rt, "nginx-request-cookies", &[req.clone()]).unwrap();
        assert_eq!(raw, Value::List(vec![Value::from("sid=1")]));
        let parsed = Value::List(vec![Value::List(vec![Value::from("sid"), Value::from("1")])]);
        call(&rt, "nginx-request-cookies-set!", &[req.clone(), parsed.clone()]).unwrap();
        assert_eq!(call(&rt, "nginx-request-cookies", &[req.clone()]).unwrap(), parsed);
        assert!(call(&rt, "nginx-request-cookies-set!", &[req, parsed]).is_err());
    }

    #[test]
    fn response_accessors() {
        let rt = installed();
        let (_, res) = views();
        call(&rt, "nginx-response-content-type-set!", &[res.clone(), Value::from("text/plain")])
            .unwrap();
        call(
            &rt,
            "nginx-response-header-add!",
            &[res.clone(), Value::from("X-A"), Value::from("1")],
        )
        .unwrap();
        call(
            &rt,
            "nginx-response-header-set!",
            &[res.clone(), Value::from("Etag"), Value::from("e")],
        )
        .unwrap();
        assert_eq!(
            call(&rt, "nginx-response-headers", &[res.clone()]).unwrap(),
            Value::pairs(&[("ETag".into(), "e".into()), ("X-A".into(), "1".into())])
        );
        call(&rt, "nginx-response-header-remove!", &[res.clone(), Value::from("x-a")]).unwrap();
        assert_eq!(
            call(&rt, "nginx-response-content-type", &[res.clone()]).unwrap(),
            Value::from("text/plain")
        );
        match call(&rt, "nginx-response-output-port", &[res]).unwrap() {
            Value::OutputPort(p) => assert!(p.borrow().chain().is_empty()),
            v => panic!("unexpected {:?}", v),
        }
    }

    #[test]
    fn violations() {
        let rt = installed();
        let (req, res) = views();
        assert_eq!(
            call(&rt, "nginx-request-uri", &[]),
            Err(Condition::wrong_arity("nginx-request-uri", 1, 0))
        );
        assert_eq!(
            call(&rt, "nginx-request-uri", &[res.clone()]),
            Err(Condition::wrong_type("nginx-request-uri", "nginx-request", "nginx-response"))
        );
        assert_eq!(
            call(&rt, "nginx-response-header-add!", &[res, Value::Int(1), Value::from("v")]),
            Err(Condition::wrong_type("nginx-response-header-add!", "string", "integer"))
        );
        assert_eq!(
            call(&rt, "nginx-request-host", &[Value::Int(1)]),
            Err(Condition::wrong_type("nginx-request-host", "nginx-request", "integer"))
        );
        assert!(call(&rt, "nginx-context-path", &[req]).is_err());
    }

    #[test]
    fn nginx_error() {
        let rt = installed();
        let e = call(&rt, "make-nginx-error", &[Value::Int(503)]).unwrap();
        assert_eq!(call(&rt, "nginx-error?", &[e.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(call(&rt, "&nginx-error-status", &[e]).unwrap(), Value::Int(503));
        assert!(call(&rt, "make-nginx-error", &[Value::Int(42)]).is_err());
        let other = Value::Condition(Condition::Error("x".into()));
        assert_eq!(call(&rt, "nginx-error?", &[other.clone()]).unwrap(), Value::Bool(false));
        assert!(call(&rt, "&nginx-error-status", &[other]).is_err());
        assert_eq!(call(&rt, "nginx-error?", &[Value::Int(1)]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn every_field_is_bound() {
        let rt = installed();
        let lib = rt.library(INTERNAL_LIBRARY);
        for f in WELL_KNOWN_FIELDS.iter() {
            assert!(lib.find_binding(&format!("nginx-request-{}", f)).is_some());
        }
    }
}
