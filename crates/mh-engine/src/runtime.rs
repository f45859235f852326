//! Shared runtime context
//!
//! A [`Runtime`] pairs a class graph with [`RuntimeOptions`]. Lookups and
//! every handle they produce keep the runtime alive.

use std::sync::Arc;

use tracing::debug;

use crate::access::{Lookup, LookupModes};
use crate::class_graph::ClassGraph;
use crate::config::RuntimeOptions;
use crate::types::ClassId;

/// Class graph plus options shared by lookups and handles
pub struct Runtime {
    graph: Arc<dyn ClassGraph>,
    options: RuntimeOptions,
}

impl Runtime {
    /// Create a runtime with default options
    pub fn new(graph: Arc<dyn ClassGraph>) -> Arc<Self> {
        Self::with_options(graph, RuntimeOptions::default())
    }

    /// Create a runtime with explicit options
    pub fn with_options(graph: Arc<dyn ClassGraph>, options: RuntimeOptions) -> Arc<Self> {
        debug!(?options, "creating method handle runtime");
        Arc::new(Self { graph, options })
    }

    /// The class graph
    pub fn graph(&self) -> &dyn ClassGraph {
        self.graph.as_ref()
    }

    /// Runtime options
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Full-privilege lookup on behalf of `caller`
    pub fn lookup(self: &Arc<Self>, caller: ClassId) -> Lookup {
        Lookup::new(Arc::clone(self), caller, LookupModes::all())
    }

    /// Lookup that only sees public members of public classes
    pub fn public_lookup(self: &Arc<Self>) -> Lookup {
        let object = self.graph.well_known().object;
        Lookup::new(Arc::clone(self), object, LookupModes::PUBLIC)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
