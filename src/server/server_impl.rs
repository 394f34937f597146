//! A development host on top of `MAY`
//!
//! Serves the configured locations over plain HTTP/1.1 without nginx. It
//! does what the module expects from its host: parse the request into the
//! native records, buffer the request body in memory and spill the rest to a
//! temporary file, serialize the outgoing headers and send the buffer chain.
//! Run it with a single `may` worker, the embedded runtime is not meant to
//! be entered from several threads at once.
use std::cell::{Cell, RefCell};
use std::fmt::Write as FmtWrite;
use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::rc::Rc;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use http::{StatusCode, Version};
use may::coroutine;
use may::net::TcpListener;
use tempfile::NamedTempFile;

use super::Module;
use crate::body::{BufferChain, ChainBuf, ChunkedReader};
use crate::buffer::BufferIo;
use crate::conf::ModuleConf;
use crate::date;
use crate::host::{Handled, Host, NativeRequest, PostHandler, RequestBody, RequestRef, Slot};

macro_rules! t {
    ($e: expr) => (match $e {
        Ok(val) => val,
        Err(ref err) if err.kind() == io::ErrorKind::ConnectionReset ||
                        err.kind() == io::ErrorKind::UnexpectedEof => {
            return;
        }
        Err(err) => {
            error!("call = {:?}\nerr = {:?}", stringify!($e), err);
            return;
        }
    })
}

macro_rules! t_c {
    ($e: expr) => (match $e {
        Ok(val) => val,
        Err(err) => {
            error!("call = {:?}\nerr = {:?}", stringify!($e), err);
            continue;
        }
    })
}

/// the longest configured location that prefixes `path`
fn find_location<'a>(conf: &'a ModuleConf, path: &str) -> Option<&'a str> {
    conf.locations
        .keys()
        .filter(|loc| path.starts_with(loc.as_str()))
        .max_by_key(|loc| loc.len())
        .map(String::as_str)
}

/// parse a request head out of `buf`, `None` when more data is needed
pub(crate) fn decode(buf: &mut BytesMut, conf: &ModuleConf) -> io::Result<Option<NativeRequest>> {
    let (req, amt) = {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut r = httparse::Request::new(&mut headers);
        let status = r.parse(buf).map_err(|e| {
            let msg = format!("failed to parse http request: {:?}", e);
            io::Error::new(io::ErrorKind::InvalidData, msg)
        })?;
        let amt = match status {
            httparse::Status::Complete(amt) => amt,
            httparse::Status::Partial => return Ok(None),
        };

        let method = r.method.unwrap_or("GET");
        let target = r.path.unwrap_or("/");
        let path = target.split('?').next().unwrap_or(target);
        let location = find_location(conf, path).unwrap_or("");
        let mut req = NativeRequest::new(location, method, target);
        if r.version == Some(0) {
            req.request_line = format!("{} {} HTTP/1.0", method, target).into();
        }
        for h in r.headers.iter() {
            req.headers_in.push(h.name, h.value);
        }
        (req, amt)
    };
    buf.advance(amt);
    Ok(Some(req))
}

// collects a request body, in memory first, then in a temp file
struct BodySink<'a> {
    conf: &'a ModuleConf,
    bufs: BufferChain,
    in_memory: usize,
    temp_file: Option<NamedTempFile>,
}

impl<'a> BodySink<'a> {
    fn new(conf: &'a ModuleConf) -> Self {
        BodySink {
            conf,
            bufs: BufferChain::new(),
            in_memory: 0,
            temp_file: None,
        }
    }

    fn temp_file(&mut self) -> io::Result<&mut NamedTempFile> {
        if self.temp_file.is_none() {
            let tmp = match self.conf.temp_dir {
                Some(ref dir) => NamedTempFile::new_in(dir)?,
                None => NamedTempFile::new()?,
            };
            debug!("request body spills to {}", tmp.path().display());
            self.temp_file = Some(tmp);
        }
        match self.temp_file {
            Some(ref mut tmp) => Ok(tmp),
            None => Err(io::Error::new(io::ErrorKind::Other, "no temp file")),
        }
    }

    fn finish(mut self) -> io::Result<RequestBody> {
        match self.temp_file {
            Some(ref mut tmp) => tmp.flush()?,
            None => {
                if let Some(buf) = self.bufs.last_mut() {
                    buf.set_last(true);
                }
            }
        }
        Ok(RequestBody {
            bufs: self.bufs,
            temp_file: self.temp_file,
        })
    }
}

impl<'a> Write for BodySink<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.conf.client_body_buffer_size.saturating_sub(self.in_memory);
        if room == 0 || self.temp_file.is_some() {
            return self.temp_file()?.write(buf);
        }
        let n = buf.len().min(room);
        self.bufs.push(ChainBuf::from_vec(buf[..n].to_vec(), false));
        self.in_memory += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// the host for one connection
struct Connection<S: Read + Write> {
    io: Rc<RefCell<BufferIo<S>>>,
    module: Arc<Module>,
    keep_alive: Cell<bool>,
    header_sent: Cell<bool>,
}

impl<S: Read + Write> Connection<S> {
    fn new(io: Rc<RefCell<BufferIo<S>>>, module: Arc<Module>, r: &NativeRequest) -> Self {
        let close = r
            .headers_in
            .find("connection")
            .map(|e| e.value.eq_ignore_ascii_case(b"close"))
            .unwrap_or(false);
        let http10 = r.request_line.ends_with(b"HTTP/1.0");
        Connection {
            io,
            module,
            keep_alive: Cell::new(!close && !http10),
            header_sent: Cell::new(false),
        }
    }

    fn read_body(&self, r: &RequestRef) -> io::Result<RequestBody> {
        let (length, chunked) = {
            let raw = r.borrow();
            (raw.headers_in.content_length_n, raw.headers_in.chunked)
        };
        let mut io = self.io.borrow_mut();
        let mut sink = BodySink::new(self.module.conf());
        if chunked {
            io::copy(&mut ChunkedReader::new(&mut *io), &mut sink)?;
        } else {
            let length = length.max(0) as u64;
            let n = io::copy(&mut (&mut *io).take(length), &mut sink)?;
            if n != length {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "early eof"));
            }
        }
        sink.finish()
    }

    fn write_head(&self, w: &mut dyn Write, r: &NativeRequest) -> io::Result<()> {
        let out = &r.headers_out;
        let status = StatusCode::from_u16(out.status).unwrap_or(StatusCode::OK);
        let mut head = String::with_capacity(256);
        let _ = write!(head, "{:?} {}\r\n", Version::HTTP_11, status);

        let server = out
            .slot(Slot::Server)
            .map(|e| String::from_utf8_lossy(&e.value).into_owned())
            .unwrap_or_else(|| self.module.conf().server.clone());
        let _ = write!(head, "Server: {}\r\n", server);
        match out.slot(Slot::Date) {
            Some(e) => {
                let _ = write!(head, "Date: {}\r\n", String::from_utf8_lossy(&e.value));
            }
            None => {
                let _ = write!(head, "Date: {}\r\n", date::now());
            }
        }
        if !out.content_type.is_empty() {
            let _ = write!(head, "Content-Type: {}\r\n", String::from_utf8_lossy(&out.content_type));
        }
        if out.content_length_n >= 0 {
            let _ = write!(head, "Content-Length: {}\r\n", out.content_length_n);
        }
        for slot in Slot::ALL.iter().skip(2) {
            if let Some(e) = out.slot(*slot) {
                let _ = write!(head, "{}: {}\r\n", slot.key(), String::from_utf8_lossy(&e.value));
            }
        }
        for e in out.headers.iter() {
            // already written from the slot
            if &e.lowcase_key[..] == b"date" {
                continue;
            }
            let _ = write!(
                head,
                "{}: {}\r\n",
                String::from_utf8_lossy(&e.key),
                String::from_utf8_lossy(&e.value)
            );
        }
        if !self.keep_alive.get() {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");
        w.write_all(head.as_bytes())
    }

    // an error page without a body
    fn send_error(&self, r: &RequestRef, status: StatusCode) -> io::Result<()> {
        {
            let mut raw = r.borrow_mut();
            let out = &mut raw.headers_out;
            out.status = status.as_u16();
            out.content_type.clear();
            out.content_length_n = 0;
        }
        if status.is_server_error() || status == StatusCode::BAD_REQUEST {
            self.keep_alive.set(false);
        }
        self.send_header(r)?;
        self.io.borrow_mut().flush()
    }
}

impl<S: Read + Write> Host for Connection<S> {
    fn read_client_request_body(&self, r: &RequestRef, post: PostHandler) -> Result<(), StatusCode> {
        match self.read_body(r) {
            Ok(body) => {
                r.borrow_mut().request_body = Some(Rc::new(body));
                post(r);
                Ok(())
            }
            Err(e) => {
                error!("failed to read request body: {}", e);
                self.keep_alive.set(false);
                Err(StatusCode::BAD_REQUEST)
            }
        }
    }

    fn discard_request_body(&self, _r: &RequestRef) -> Result<(), StatusCode> {
        // bodies are always read up front
        Ok(())
    }

    fn send_header(&self, r: &RequestRef) -> io::Result<()> {
        let raw = r.borrow();
        let mut io = self.io.borrow_mut();
        self.write_head(&mut *io, &raw)?;
        self.header_sent.set(true);
        Ok(())
    }

    fn output_filter(&self, r: &RequestRef, out: BufferChain) -> io::Result<()> {
        let head = &r.borrow().method_name[..] == b"HEAD";
        let mut io = self.io.borrow_mut();
        if !head {
            for buf in &out {
                io.write_all(buf.as_slice())?;
            }
        }
        io.flush()
    }

    fn finalize_request(&self, r: &RequestRef, status: StatusCode) {
        if self.header_sent.get() {
            let _ = self.io.borrow_mut().flush();
            return;
        }
        debug!("finalizing {} with {}", r.borrow(), status);
        if let Err(e) = self.send_error(r, status) {
            error!("failed to send response: {}", e);
            self.keep_alive.set(false);
        }
    }
}

/// serves the module over HTTP for development and tests
pub struct HostServer(pub Arc<Module>);

impl HostServer {
    pub fn new(module: Arc<Module>) -> Self {
        HostServer(module)
    }

    /// Spawns the http service, binding to the given address
    /// return a coroutine that you can cancel it when need to stop the service
    pub fn start<L: ToSocketAddrs>(self, addr: L) -> io::Result<coroutine::JoinHandle<()>> {
        let listener = TcpListener::bind(addr)?;
        let module = self.0;
        module.init_process();
        go!(
            coroutine::Builder::new().name("TcpServer".to_owned()),
            move || {
                for stream in listener.incoming() {
                    let stream = t_c!(stream);
                    let module = module.clone();
                    go!(move || serve(stream, module));
                }
            }
        )
    }
}

/// run the module on one connection until it closes
pub fn serve<S: Read + Write + 'static>(stream: S, module: Arc<Module>) {
    let io = Rc::new(RefCell::new(BufferIo::new(stream)));
    loop {
        let req = t!(decode(io.borrow_mut().get_reader_buf(), module.conf()));
        let req = match req {
            Some(req) => req,
            None => {
                // need more data
                if t!(io.borrow_mut().bump_read()) == 0 {
                    return;
                }
                continue;
            }
        };
        let host = Rc::new(Connection::new(io.clone(), module.clone(), &req));
        let r = req.into_ref();
        match module.handle(host.clone(), &r) {
            Handled::Status(status) => host.finalize_request(&r, status),
            Handled::Done => {}
        }
        if !host.keep_alive.get() {
            return;
        }
    }
}

/// buffer a request body the way the host does for a socket
///
/// for hosts embedding the module without a connection of their own
pub fn buffer_body<R: Read>(mut rdr: R, conf: &ModuleConf) -> io::Result<RequestBody> {
    let mut sink = BodySink::new(conf);
    io::copy(&mut rdr, &mut sink)?;
    sink.finish()
}
