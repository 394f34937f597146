//! The host side of the bridge
//!
//! These are the records the web server owns for a request: the parsed
//! request line and headers, the buffered body, the TLS session and the
//! outgoing headers. The facades in `server` wrap them, and the `Host` trait
//! is how the module hands control back to the server.
mod list;

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::Rc;

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::StatusCode;
use tempfile::NamedTempFile;

use crate::body::BufferChain;

pub use self::list::PartList;

/// the native request shared by the request and response facades
pub type RequestRef = Rc<RefCell<NativeRequest>>;

/// continuation the host runs once the request body is read
pub type PostHandler = Box<dyn FnOnce(&RequestRef)>;

/// decode host bytes into text
#[inline]
pub fn decode(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

/// one header entry
#[derive(Debug, Clone, PartialEq)]
pub struct TableElt {
    pub key: Bytes,
    pub value: Bytes,
    pub lowcase_key: Bytes,
}

impl TableElt {
    pub fn new<K: AsRef<[u8]>, V: AsRef<[u8]>>(key: K, value: V) -> Self {
        let key = Bytes::copy_from_slice(key.as_ref());
        let lowcase_key = Bytes::from(key.to_ascii_lowercase());
        TableElt {
            key,
            value: Bytes::copy_from_slice(value.as_ref()),
            lowcase_key,
        }
    }
}

/// the incoming headers
#[derive(Debug)]
pub struct HeadersIn {
    pub headers: PartList<TableElt>,
    /// the `Cookie` entries, in arrival order
    pub cookies: Vec<TableElt>,
    /// -1 when there is no `Content-Length`
    pub content_length_n: i64,
    pub chunked: bool,
}

impl Default for HeadersIn {
    fn default() -> Self {
        HeadersIn {
            headers: PartList::new(),
            cookies: Vec::new(),
            content_length_n: -1,
            chunked: false,
        }
    }
}

impl HeadersIn {
    /// record a header the way the host's header parser does
    pub fn push<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        let e = TableElt::new(key, value);
        match &e.lowcase_key[..] {
            b"cookie" => self.cookies.push(e.clone()),
            b"content-length" => {
                self.content_length_n = std::str::from_utf8(&e.value)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(-1);
            }
            b"transfer-encoding" => {
                self.chunked = e.value.to_ascii_lowercase().ends_with(b"chunked");
            }
            _ => {}
        }
        self.headers.push(e);
    }

    /// the first header with the given lower case name
    pub fn find(&self, lowcase_key: &str) -> Option<&TableElt> {
        self.headers
            .iter()
            .find(|e| &e.lowcase_key[..] == lowcase_key.as_bytes())
    }
}

/// the buffered request body
///
/// `bufs` holds the leading part in memory, `temp_file` the rest once the
/// host's in memory threshold was exceeded.
#[derive(Debug, Default)]
pub struct RequestBody {
    pub bufs: BufferChain,
    pub temp_file: Option<NamedTempFile>,
}

/// the TLS session of a connection
#[derive(Debug, Clone, Default)]
pub struct SslConnection {
    peer_certificate: Option<Bytes>,
}

impl SslConnection {
    /// `peer_certificate` is the DER encoding of the client certificate
    pub fn new(peer_certificate: Option<Bytes>) -> Self {
        SslConnection { peer_certificate }
    }

    /// the client certificate, DER encoded, if the client presented one
    pub fn peer_certificate(&self) -> Option<Bytes> {
        self.peer_certificate.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Connection {
    pub ssl: Option<SslConnection>,
}

/// outgoing headers the host keeps outside the generic list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Server,
    Date,
    ContentEncoding,
    Location,
    Refresh,
    LastModified,
    ContentRange,
    AcceptRanges,
    WwwAuthenticate,
    Expires,
    Etag,
}

impl Slot {
    /// every slot, in the order they are reported
    pub const ALL: [Slot; 11] = [
        Slot::Server,
        Slot::Date,
        Slot::ContentEncoding,
        Slot::Location,
        Slot::Refresh,
        Slot::LastModified,
        Slot::ContentRange,
        Slot::AcceptRanges,
        Slot::WwwAuthenticate,
        Slot::Expires,
        Slot::Etag,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Slot::Server => "Server",
            Slot::Date => "Date",
            Slot::ContentEncoding => "Content-Encoding",
            Slot::Location => "Location",
            Slot::Refresh => "Refresh",
            Slot::LastModified => "Last-Modified",
            Slot::ContentRange => "Content-Range",
            Slot::AcceptRanges => "Accept-Ranges",
            Slot::WwwAuthenticate => "WWW-Authenticate",
            Slot::Expires => "Expires",
            Slot::Etag => "ETag",
        }
    }

    /// match a header name case insensitively
    pub fn from_name(name: &str) -> Option<Slot> {
        let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
        let slot = if name == header::SERVER {
            Slot::Server
        } else if name == header::DATE {
            Slot::Date
        } else if name == header::CONTENT_ENCODING {
            Slot::ContentEncoding
        } else if name == header::LOCATION {
            Slot::Location
        } else if name == header::REFRESH {
            Slot::Refresh
        } else if name == header::LAST_MODIFIED {
            Slot::LastModified
        } else if name == header::CONTENT_RANGE {
            Slot::ContentRange
        } else if name == header::ACCEPT_RANGES {
            Slot::AcceptRanges
        } else if name == header::WWW_AUTHENTICATE {
            Slot::WwwAuthenticate
        } else if name == header::EXPIRES {
            Slot::Expires
        } else if name == header::ETAG {
            Slot::Etag
        } else {
            return None;
        };
        Some(slot)
    }

    pub fn element(self, value: &str) -> TableElt {
        TableElt::new(self.key(), value)
    }
}

/// the outgoing headers
#[derive(Debug)]
pub struct HeadersOut {
    pub status: u16,
    pub content_type: Bytes,
    /// -1 until the body size is known
    pub content_length_n: i64,
    pub headers: PartList<TableElt>,
    slots: [Option<TableElt>; 11],
}

impl Default for HeadersOut {
    fn default() -> Self {
        HeadersOut {
            status: 0,
            content_type: Bytes::new(),
            content_length_n: -1,
            headers: PartList::new(),
            slots: Default::default(),
        }
    }
}

impl HeadersOut {
    #[inline]
    pub fn slot(&self, s: Slot) -> Option<&TableElt> {
        self.slots[s as usize].as_ref()
    }

    #[inline]
    pub fn slot_mut(&mut self, s: Slot) -> &mut Option<TableElt> {
        &mut self.slots[s as usize]
    }
}

/// the request record owned by the host
#[derive(Debug)]
pub struct NativeRequest {
    /// name of the location block that matched
    pub location: String,
    pub method_name: Bytes,
    /// path without the query string
    pub uri: Bytes,
    /// query string without the leading `?`
    pub args: Bytes,
    pub unparsed_uri: Bytes,
    pub request_line: Bytes,
    pub schema: Bytes,
    pub headers_in: HeadersIn,
    pub request_body: Option<Rc<RequestBody>>,
    pub connection: Connection,
    pub headers_out: HeadersOut,
    pub header_only: bool,
}

impl NativeRequest {
    /// a plain http request for `location`, `unparsed_uri` may carry a query
    pub fn new(location: &str, method: &str, unparsed_uri: &str) -> Self {
        let (uri, args) = match unparsed_uri.find('?') {
            Some(i) => (&unparsed_uri[..i], &unparsed_uri[i + 1..]),
            None => (unparsed_uri, ""),
        };
        let request_line = format!("{} {} HTTP/1.1", method, unparsed_uri);
        NativeRequest {
            location: location.to_owned(),
            method_name: Bytes::copy_from_slice(method.as_bytes()),
            uri: Bytes::copy_from_slice(uri.as_bytes()),
            args: Bytes::copy_from_slice(args.as_bytes()),
            unparsed_uri: Bytes::copy_from_slice(unparsed_uri.as_bytes()),
            request_line: Bytes::from(request_line),
            schema: Bytes::from_static(b"http"),
            headers_in: HeadersIn::default(),
            request_body: None,
            connection: Connection::default(),
            headers_out: HeadersOut::default(),
            header_only: false,
        }
    }

    /// whether the handler has to ask the host for the body first
    pub fn has_body(&self) -> bool {
        self.headers_in.content_length_n > 0 || self.headers_in.chunked
    }

    pub fn into_ref(self) -> RequestRef {
        Rc::new(RefCell::new(self))
    }
}

impl fmt::Display for NativeRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            String::from_utf8_lossy(&self.method_name),
            String::from_utf8_lossy(&self.uri)
        )
    }
}

/// what the handler tells the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// finalize the request with this status
    Status(StatusCode),
    /// the request is finalized later, from the body read continuation
    Done,
}

/// the services the module needs from the web server
pub trait Host {
    /// read the whole request body into `request_body`, then run `post`
    ///
    /// an error status means the body could not be read and `post` is never
    /// called
    fn read_client_request_body(&self, r: &RequestRef, post: PostHandler)
        -> Result<(), StatusCode>;

    /// drop whatever is left of the request body so the connection can be reused
    fn discard_request_body(&self, r: &RequestRef) -> Result<(), StatusCode>;

    /// send the status line and headers from `headers_out`
    fn send_header(&self, r: &RequestRef) -> io::Result<()>;

    /// send the response body
    fn output_filter(&self, r: &RequestRef, out: BufferChain) -> io::Result<()>;

    /// complete a request whose handling was deferred
    fn finalize_request(&self, r: &RequestRef, status: StatusCode);
}
