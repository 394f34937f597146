//! Wrapping filters around the entry point of a location
use std::fmt;
use std::sync::Arc;

use crate::conf::FilterSpec;
use crate::context::Parameters;
use crate::runtime::{check_arity, Library, Procedure, Runtime, Value};

const FILTER_CHAIN: &str = "filter-chain";

/// what a filter sees of its own configuration
pub struct FilterContext {
    name: String,
    // None when the filter declared no parameters
    parameters: Option<Arc<Parameters>>,
}

impl FilterContext {
    pub fn new(spec: &FilterSpec) -> Self {
        let parameters = if spec.parameters.is_empty() {
            None
        } else {
            Some(Arc::new(spec.parameters.iter().cloned().collect()))
        };
        FilterContext {
            name: spec.name.clone(),
            parameters,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> Option<&Arc<Parameters>> {
        self.parameters.as_ref()
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .as_ref()
            .and_then(|p| p.get(key))
            .map(String::as_str)
    }
}

impl fmt::Debug for FilterContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<nginx-filter-context {}>", self.name)
    }
}

// (lambda (request response) (filter context request response next))
fn combine(spec: &FilterSpec, filter: Procedure, next: Procedure) -> Procedure {
    let ctx = Arc::new(FilterContext::new(spec));
    Procedure::new(FILTER_CHAIN, move |args: &[Value]| {
        check_arity(FILTER_CHAIN, 2, args)?;
        filter.apply(&[
            Value::FilterContext(ctx.clone()),
            args[0].clone(),
            args[1].clone(),
            Value::Procedure(next.clone()),
        ])
    })
}

fn resolve(spec: &FilterSpec, library: &dyn Library, runtime: &dyn Runtime) -> Option<Procedure> {
    let found = match spec.library {
        Some(ref name) if name != library.name() => match runtime.find_library(name) {
            Some(lib) => lib.find_binding(&spec.procedure),
            None => {
                error!("web filter library {} not found", name);
                return None;
            }
        },
        _ => library.find_binding(&spec.procedure),
    };
    if found.is_none() {
        error!(
            "filter procedure '{}' of {} not found, skipped",
            spec.procedure, spec.name
        );
    }
    found
}

/// wrap `terminal` in the filters of `specs`
///
/// The filter with the highest order is called first, equal orders keep
/// their declaration order. Filters without a procedure, or whose procedure
/// can't be resolved, are left out of the chain.
pub fn build(
    terminal: Procedure,
    specs: &[FilterSpec],
    library: &dyn Library,
    runtime: &dyn Runtime,
) -> Procedure {
    let mut sorted: Vec<&FilterSpec> = specs.iter().collect();
    sorted.sort_by(|a, b| b.order.cmp(&a.order));

    sorted.into_iter().rfold(terminal, |next, spec| {
        if spec.procedure.is_empty() {
            return next;
        }
        match resolve(spec, library, runtime) {
            Some(filter) => {
                debug!("combining filter {} (order {})", spec.name, spec.order);
                combine(spec, filter, next)
            }
            None => next,
        }
    })
}
