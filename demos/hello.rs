extern crate env_logger;
extern crate may;
extern crate ngx_scheme;

use std::io::Write;
use std::sync::Arc;

use ngx_scheme::runtime::memory::MemoryRuntime;
use ngx_scheme::{HostServer, Module, ModuleConf, Procedure, Value};

fn hello(args: &[Value]) -> Result<Value, ngx_scheme::Condition> {
    if let Value::Response(ref res) = args[1] {
        res.set_content_type("text/plain");
        let out = res.output_port();
        let _ = out.borrow_mut().write_all(b"hello world");
    }
    Ok(Value::Int(200))
}

fn main() {
    env_logger::init();
    may::config().set_workers(1);

    let rt = MemoryRuntime::with_dispatcher();
    rt.library("(hello)").define("hello", Procedure::new("hello", hello));

    let mut conf = ModuleConf::new(".");
    conf.location("/", &["sagittarius", "hello"], &[&["library", "(hello)"]])
        .unwrap();

    let module = Arc::new(Module::new(Arc::new(rt), conf));
    let server = HostServer::new(module).start("127.0.0.1:8080").unwrap();
    server.wait();
}
