//! The request as interpreted code sees it
//!
//! Every accessor decodes the host's bytes on first use and caches the
//! result, so repeated calls within one request are cheap and return the
//! same value.
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;

use crate::body::BodyReader;
use crate::context::LocationContext;
use crate::error::Condition;
use crate::host::{decode, RequestRef};
use crate::runtime::Value;

/// the inbound header fields the host keeps a direct reference to
pub const WELL_KNOWN_FIELDS: [&str; 29] = [
    "host",
    "connection",
    "if-modified-since",
    "if-unmodified-since",
    "if-match",
    "if-none-match",
    "user-agent",
    "referer",
    "content-length",
    "content-range",
    "content-type",
    "range",
    "if-range",
    "transfer-encoding",
    "te",
    "expect",
    "upgrade",
    "accept-encoding",
    "via",
    "authorization",
    "keep-alive",
    "x-forwarded-for",
    "x-real-ip",
    "accept",
    "accept-language",
    "depth",
    "destination",
    "overwrite",
    "date",
];

/// the client certificate, looked up at most once
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCertificate {
    Unset,
    /// plain connection, or no certificate presented
    Absent,
    /// DER encoded
    Present(Bytes),
}

pub struct RequestView {
    raw: RequestRef,
    context: Arc<LocationContext>,
    method: OnceCell<String>,
    uri: OnceCell<String>,
    headers: OnceCell<Rc<Vec<(String, String)>>>,
    cookies: OnceCell<Rc<Vec<String>>>,
    // the parsed form a higher layer stored, accepted once
    injected_cookies: OnceCell<Value>,
    query_string: OnceCell<String>,
    original_uri: OnceCell<String>,
    request_line: OnceCell<String>,
    schema: OnceCell<String>,
    body: Rc<RefCell<BodyReader>>,
    peer_certificate: RefCell<PeerCertificate>,
}

impl RequestView {
    pub fn new(raw: RequestRef, context: Arc<LocationContext>) -> Self {
        let body = raw.borrow().request_body.clone();
        RequestView {
            raw,
            context,
            method: OnceCell::new(),
            uri: OnceCell::new(),
            headers: OnceCell::new(),
            cookies: OnceCell::new(),
            injected_cookies: OnceCell::new(),
            query_string: OnceCell::new(),
            original_uri: OnceCell::new(),
            request_line: OnceCell::new(),
            schema: OnceCell::new(),
            body: Rc::new(RefCell::new(BodyReader::new(body))),
            peer_certificate: RefCell::new(PeerCertificate::Unset),
        }
    }

    pub fn context(&self) -> &Arc<LocationContext> {
        &self.context
    }

    pub fn method(&self) -> &str {
        self.method
            .get_or_init(|| decode(&self.raw.borrow().method_name))
    }

    pub fn uri(&self) -> &str {
        self.uri.get_or_init(|| decode(&self.raw.borrow().uri))
    }

    /// every header in arrival order
    pub fn headers(&self) -> Rc<Vec<(String, String)>> {
        self.headers
            .get_or_init(|| {
                let raw = self.raw.borrow();
                let headers = raw
                    .headers_in
                    .headers
                    .iter()
                    .map(|e| (decode(&e.key), decode(&e.value)))
                    .collect();
                Rc::new(headers)
            })
            .clone()
    }

    /// the raw `Cookie` values
    pub fn raw_cookies(&self) -> Rc<Vec<String>> {
        self.cookies
            .get_or_init(|| {
                let raw = self.raw.borrow();
                let cookies = raw.headers_in.cookies.iter().map(|e| decode(&e.value));
                Rc::new(cookies.collect())
            })
            .clone()
    }

    /// the injected cookies if any, the raw values otherwise
    pub fn cookies(&self) -> Value {
        match self.injected_cookies.get() {
            Some(v) => v.clone(),
            None => Value::List(
                self.raw_cookies()
                    .iter()
                    .map(|c| Value::Str(c.clone()))
                    .collect(),
            ),
        }
    }

    /// store the parsed cookies, allowed once per request
    pub fn set_cookies(&self, cookies: Value) -> Result<(), Condition> {
        match cookies {
            Value::List(_) => {}
            ref v => {
                return Err(Condition::wrong_type(
                    "nginx-request-cookies-set!",
                    "list",
                    v.type_name(),
                ))
            }
        }
        self.injected_cookies
            .set(cookies)
            .map_err(|_| Condition::Error("Invalid usage of cookies slot".to_owned()))
    }

    pub fn query_string(&self) -> &str {
        self.query_string
            .get_or_init(|| decode(&self.raw.borrow().args))
    }

    /// the uri as the client sent it, query included
    pub fn original_uri(&self) -> &str {
        self.original_uri
            .get_or_init(|| decode(&self.raw.borrow().unparsed_uri))
    }

    pub fn request_line(&self) -> &str {
        self.request_line
            .get_or_init(|| decode(&self.raw.borrow().request_line))
    }

    pub fn schema(&self) -> &str {
        self.schema.get_or_init(|| decode(&self.raw.borrow().schema))
    }

    /// the request body port, shared by every call
    pub fn input_port(&self) -> Rc<RefCell<BodyReader>> {
        self.body.clone()
    }

    /// the first value of an inbound header, `name` in lower case
    pub fn header_field(&self, name: &str) -> Option<String> {
        let raw = self.raw.borrow();
        raw.headers_in.find(name).map(|e| decode(&e.value))
    }

    pub fn peer_certificate(&self) -> Option<Bytes> {
        let unset = *self.peer_certificate.borrow() == PeerCertificate::Unset;
        if unset {
            let cert = self
                .raw
                .borrow()
                .connection
                .ssl
                .as_ref()
                .and_then(|ssl| ssl.peer_certificate());
            *self.peer_certificate.borrow_mut() = match cert {
                Some(der) => PeerCertificate::Present(der),
                None => PeerCertificate::Absent,
            };
        }
        match *self.peer_certificate.borrow() {
            PeerCertificate::Present(ref der) => Some(der.clone()),
            _ => None,
        }
    }

    /// the cached certificate state, without computing it
    pub fn peer_certificate_state(&self) -> PeerCertificate {
        self.peer_certificate.borrow().clone()
    }
}

impl fmt::Debug for RequestView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.raw.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{NativeRequest, SslConnection};

    fn view(raw: NativeRequest) -> RequestView {
        let ctx = LocationContext::new("/app", Default::default());
        RequestView::new(raw.into_ref(), Arc::new(ctx))
    }

    fn request() -> NativeRequest {
        let mut r = NativeRequest::new("/app", "POST", "/app/x?q=1");
        r.headers_in.push("Host", "example.com");
        r.headers_in.push("Cookie", "a=1; b=2");
        r.headers_in.push("X-Custom", "v");
        r.headers_in.push("Cookie", "c=3");
        r
    }

    #[test]
    fn lazy_fields() {
        let v = view(request());
        assert_eq!(v.method(), "POST");
        assert_eq!(v.uri(), "/app/x");
        assert_eq!(v.query_string(), "q=1");
        assert_eq!(v.original_uri(), "/app/x?q=1");
        assert_eq!(v.request_line(), "POST /app/x?q=1 HTTP/1.1");
        assert_eq!(v.schema(), "http");
        assert_eq!(v.header_field("host").as_deref(), Some("example.com"));
        assert!(v.header_field("referer").is_none());
        assert_eq!(v.context().path(), "/app");
    }

    #[test]
    fn headers_keep_order_and_cache() {
        let v = view(request());
        let h = v.headers();
        let names: Vec<&str> = h.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["Host", "Cookie", "X-Custom", "Cookie"]);
        // later host side changes are not seen
        v.raw.borrow_mut().headers_in.push("Late", "1");
        assert!(Rc::ptr_eq(&h, &v.headers()));
    }

    #[test]
    fn cookies_raw_then_injected_once() {
        let v = view(request());
        assert_eq!(
            v.cookies(),
            Value::List(vec![Value::from("a=1; b=2"), Value::from("c=3")])
        );
        let parsed = Value::List(vec![Value::from("a")]);
        v.set_cookies(parsed.clone()).unwrap();
        assert_eq!(v.cookies(), parsed);
        assert_eq!(
            v.set_cookies(Value::List(vec![])),
            Err(Condition::Error("Invalid usage of cookies slot".to_owned()))
        );
        assert_eq!(v.cookies(), parsed);
    }

    #[test]
    fn cookies_reject_non_list() {
        let v = view(request());
        assert_eq!(
            v.set_cookies(Value::from("a=1")),
            Err(Condition::wrong_type("nginx-request-cookies-set!", "list", "string"))
        );
        // the failed attempt does not use up the injection
        assert!(v.set_cookies(Value::List(vec![])).is_ok());
    }

    #[test]
    fn peer_certificate_states() {
        let v = view(request());
        assert_eq!(v.peer_certificate_state(), PeerCertificate::Unset);
        assert!(v.peer_certificate().is_none());
        assert_eq!(v.peer_certificate_state(), PeerCertificate::Absent);

        let mut r = request();
        r.connection.ssl = Some(SslConnection::new(None));
        let v = view(r);
        assert!(v.peer_certificate().is_none());
        assert_eq!(v.peer_certificate_state(), PeerCertificate::Absent);

        let mut r = request();
        let der = Bytes::from_static(b"\x30\x82\x01\x0a");
        r.connection.ssl = Some(SslConnection::new(Some(der.clone())));
        let v = view(r);
        assert_eq!(v.peer_certificate(), Some(der.clone()));
        // the connection changing afterwards does not matter
        v.raw.borrow_mut().connection.ssl = None;
        assert_eq!(v.peer_certificate(), Some(der));
    }
}
