//! Module and location configuration
//!
//! The host tokenises its configuration file, the functions here take the
//! resulting argument lists, directive name first.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::body::BUFFER_SIZE;
use crate::error::ConfError;

/// name of the block directive opening a location configuration
pub const BLOCK: &str = "sagittarius";

/// a filter as declared by `filter` and `filter_parameter`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub name: String,
    /// empty until the `filter` directive for this name is seen
    pub procedure: String,
    pub order: i64,
    /// library holding `procedure`, the location's library when `None`
    pub library: Option<String>,
    pub parameters: Vec<(String, String)>,
}

impl FilterSpec {
    fn new(name: &str) -> Self {
        FilterSpec {
            name: name.to_owned(),
            procedure: String::new(),
            order: 0,
            library: None,
            parameters: Vec::new(),
        }
    }
}

/// the configuration of one location block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationConf {
    pub path: String,
    pub load_paths: Vec<PathBuf>,
    pub library: Option<String>,
    /// the entry point
    pub procedure: String,
    pub init: Option<String>,
    pub cleanup: Option<String>,
    pub parameters: Vec<(String, String)>,
    pub filters: Vec<FilterSpec>,
    pub thread_pool_name: Option<String>,
}

fn arguments(directive: &'static str, expected: &'static str, args: &[&str]) -> ConfError {
    ConfError::Arguments {
        directive,
        expected,
        got: args.len().saturating_sub(1),
    }
}

fn optional(s: Option<&&str>) -> Option<String> {
    s.filter(|s| !s.is_empty()).map(|s| s.to_string())
}

impl LocationConf {
    /// open a block: `sagittarius entry-point [init] [cleanup]`
    pub fn block(path: &str, args: &[&str]) -> Result<Self, ConfError> {
        if args.len() < 2 || args.len() > 4 {
            return Err(arguments(BLOCK, "1 to 3 arguments", args));
        }
        debug!("invocation procedure name {}", args[1]);
        Ok(LocationConf {
            path: path.to_owned(),
            procedure: args[1].to_owned(),
            init: optional(args.get(2)),
            cleanup: optional(args.get(3)),
            ..Default::default()
        })
    }

    /// handle one directive inside the block
    ///
    /// relative `load_path` entries are resolved against `prefix`, unknown
    /// directives are logged and ignored
    pub fn directive(&mut self, prefix: &Path, args: &[&str]) -> Result<(), ConfError> {
        let name = match args.first() {
            Some(name) => *name,
            None => return Ok(()),
        };
        match name {
            "load_path" => {
                if args.len() < 2 {
                    return Err(arguments("load_path", "at least one argument", args));
                }
                for p in &args[1..] {
                    let p = prefix.join(p);
                    debug!("'load_path' {}", p.display());
                    self.load_paths.push(p);
                }
            }
            "library" => {
                if args.len() != 2 {
                    return Err(arguments("library", "one argument", args));
                }
                self.library = Some(args[1].to_owned());
            }
            "parameter" => {
                if args.len() != 3 {
                    return Err(arguments("parameter", "2 elements (var and val)", args));
                }
                self.parameters
                    .push((args[1].to_owned(), args[2].to_owned()));
            }
            "filter" => {
                if args.len() < 4 || args.len() > 5 {
                    return Err(arguments(
                        "filter",
                        "name, entry_point, order and an optional library",
                        args,
                    ));
                }
                let order = args[3]
                    .parse()
                    .map_err(|_| ConfError::InvalidOrder(args[3].to_owned()))?;
                let f = self.filter_mut(args[1]);
                f.procedure = args[2].to_owned();
                f.order = order;
                f.library = args.get(4).map(|s| s.to_string());
            }
            "filter_parameter" => {
                if args.len() != 4 {
                    return Err(arguments(
                        "filter_parameter",
                        "3 elements (name, key and value)",
                        args,
                    ));
                }
                self.filter_mut(args[1])
                    .parameters
                    .push((args[2].to_owned(), args[3].to_owned()));
            }
            "thread_pool_name" => {
                if args.len() != 2 {
                    return Err(arguments("thread_pool_name", "1 element (pool_name)", args));
                }
                self.thread_pool_name = Some(args[1].to_owned());
            }
            _ => error!("unknown directive {}", name),
        }
        Ok(())
    }

    /// close the block
    pub fn finish(self) -> Result<Self, ConfError> {
        match self.library {
            Some(ref l) if !l.is_empty() => Ok(self),
            _ => {
                error!("'library' must be specified in {}", self.path);
                Err(ConfError::MissingLibrary)
            }
        }
    }

    /// `filter` and `filter_parameter` may come in either order
    fn filter_mut(&mut self, name: &str) -> &mut FilterSpec {
        let i = match self.filters.iter().position(|f| f.name == name) {
            Some(i) => i,
            None => {
                self.filters.push(FilterSpec::new(name));
                self.filters.len() - 1
            }
        };
        &mut self.filters[i]
    }
}

/// settings shared by every location of the module
#[derive(Debug, Clone)]
pub struct ModuleConf {
    /// the server prefix, relative load paths are resolved against it
    pub prefix: PathBuf,
    /// capacity of one response buffer
    pub buffer_size: usize,
    /// maximum number of buffers a single response may allocate
    pub buffer_limit: Option<usize>,
    /// request body bytes kept in memory before spilling to a temp file
    pub client_body_buffer_size: usize,
    /// value of the `Server` header
    pub server: String,
    /// where spilled request bodies go, the system temp dir when `None`
    pub temp_dir: Option<PathBuf>,
    pub locations: BTreeMap<String, LocationConf>,
}

impl Default for ModuleConf {
    fn default() -> Self {
        ModuleConf {
            prefix: PathBuf::from("/"),
            buffer_size: BUFFER_SIZE,
            buffer_limit: None,
            client_body_buffer_size: 2 * BUFFER_SIZE,
            server: "nginx".to_owned(),
            temp_dir: None,
            locations: BTreeMap::new(),
        }
    }
}

impl ModuleConf {
    pub fn new<P: Into<PathBuf>>(prefix: P) -> Self {
        ModuleConf {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// parse a whole location block
    ///
    /// `block` is the block directive, `directives` the statements inside it
    pub fn location(
        &mut self,
        path: &str,
        block: &[&str],
        directives: &[&[&str]],
    ) -> Result<&LocationConf, ConfError> {
        if self.locations.contains_key(path) {
            return Err(ConfError::DuplicatedLocation(path.to_owned()));
        }
        debug!("handling configuration of {}", path);
        let mut conf = LocationConf::block(path, block)?;
        for args in directives {
            conf.directive(&self.prefix, args)?;
        }
        let conf = conf.finish()?;
        Ok(self.locations.entry(path.to_owned()).or_insert(conf))
    }

    /// drop references to thread pools the host does not know
    pub fn check_thread_pools(&mut self, known: &[&str]) {
        for (path, loc) in self.locations.iter_mut() {
            let unknown = match loc.thread_pool_name {
                Some(ref name) => !known.contains(&name.as_str()),
                None => false,
            };
            if unknown {
                warn!(
                    "thread pool {:?} of {} is not defined, ignored",
                    loc.thread_pool_name, path
                );
                loc.thread_pool_name = None;
            } else if let Some(ref name) = loc.thread_pool_name {
                debug!("thread pool {} is used by {}", name, path);
            }
        }
    }
}
