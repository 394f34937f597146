//! The response as interpreted code builds it
//!
//! Headers go straight into the host's outgoing header records. A few of
//! them live in dedicated slots, the rest in the generic list.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::body::BodyWriter;
use crate::host::{decode, RequestRef, Slot, TableElt};

const DEFAULT_CONTENT_TYPE: &[u8] = b"application/octet-stream";

// managed by the host, writes are dropped
#[inline]
fn is_host_managed(name: &str) -> bool {
    name.eq_ignore_ascii_case("server") || name.eq_ignore_ascii_case("content-length")
}

pub struct ResponseView {
    raw: RequestRef,
    // snapshot for `headers`, dropped by every mutation
    headers: RefCell<Option<Rc<Vec<(String, String)>>>>,
    out: Rc<RefCell<BodyWriter>>,
}

impl ResponseView {
    /// the content type is reset to `application/octet-stream`
    pub fn new(raw: RequestRef, out: BodyWriter) -> Self {
        raw.borrow_mut().headers_out.content_type = Bytes::from_static(DEFAULT_CONTENT_TYPE);
        ResponseView {
            raw,
            headers: RefCell::new(None),
            out: Rc::new(RefCell::new(out)),
        }
    }

    pub fn content_type(&self) -> String {
        decode(&self.raw.borrow().headers_out.content_type)
    }

    pub fn set_content_type(&self, content_type: &str) {
        self.raw.borrow_mut().headers_out.content_type =
            Bytes::copy_from_slice(content_type.as_bytes());
    }

    /// the output port, shared by every call
    pub fn output_port(&self) -> Rc<RefCell<BodyWriter>> {
        self.out.clone()
    }

    /// the dedicated slots in their fixed order, then the generic list
    pub fn headers(&self) -> Rc<Vec<(String, String)>> {
        if let Some(ref h) = *self.headers.borrow() {
            return h.clone();
        }
        let raw = self.raw.borrow();
        let out = &raw.headers_out;
        let mut headers = Vec::new();
        for slot in Slot::ALL.iter() {
            if let Some(e) = out.slot(*slot) {
                headers.push((decode(&e.key), decode(&e.value)));
            }
        }
        let date = out.slot(Slot::Date).is_some();
        for e in out.headers.iter() {
            // the generic copy of the date slot
            if date && &e.lowcase_key[..] == b"date" {
                continue;
            }
            headers.push((decode(&e.key), decode(&e.value)));
        }
        let headers = Rc::new(headers);
        *self.headers.borrow_mut() = Some(headers.clone());
        headers
    }

    pub fn add_header(&self, name: &str, value: &str) {
        if is_host_managed(name) {
            debug!("header {} is managed by the server, ignored", name);
            return;
        }
        self.invalidate();
        let mut raw = self.raw.borrow_mut();
        let out = &mut raw.headers_out;
        match Slot::from_name(name) {
            Some(Slot::Date) => {
                let e = Slot::Date.element(value);
                if out.slot(Slot::Date).is_none() {
                    out.headers.push(e.clone());
                } else {
                    for m in out.headers.iter_mut().filter(|m| &m.lowcase_key[..] == b"date") {
                        m.value = e.value.clone();
                    }
                }
                *out.slot_mut(Slot::Date) = Some(e);
            }
            Some(slot) => *out.slot_mut(slot) = Some(slot.element(value)),
            None => {
                out.headers.push(TableElt::new(name, value));
            }
        }
    }

    /// replace every value of `name` with `value`
    pub fn set_header(&self, name: &str, value: &str) {
        self.remove_header(name);
        self.add_header(name, value);
    }

    pub fn remove_header(&self, name: &str) {
        if is_host_managed(name) {
            debug!("header {} is managed by the server, ignored", name);
            return;
        }
        self.invalidate();
        let mut raw = self.raw.borrow_mut();
        let out = &mut raw.headers_out;
        match Slot::from_name(name) {
            Some(slot) => {
                *out.slot_mut(slot) = None;
                if slot == Slot::Date {
                    out.headers.retain(|e| &e.lowcase_key[..] != b"date");
                }
            }
            None => {
                let key = name.to_ascii_lowercase();
                out.headers.retain(|e| &e.lowcase_key[..] != key.as_bytes());
            }
        }
    }

    #[inline]
    fn invalidate(&self) {
        self.headers.borrow_mut().take();
    }
}

impl fmt::Debug for ResponseView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<nginx-response {:?}>", self.out.borrow())
    }
}
