//! One-time class initialization
//!
//! [`InitTable`] records, per class, whether its static initializer has run.
//! The first thread to request initialization runs it; other threads block
//! on a condition variable until it finishes. A request from the thread that
//! is already running the initializer returns immediately, so initializers
//! may touch their own class. A failed or panicking initializer is remembered
//! and reported to every later request.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{InvokeError, InvokeResult};
use crate::types::ClassId;

/// Initialization state of one class
#[derive(Debug, Clone, PartialEq)]
enum InitState {
    /// Initializer has not started
    Pending,
    /// Initializer is running on the given thread
    Running(ThreadId),
    /// Initializer completed
    Done,
    /// Initializer failed
    Failed(InvokeError),
}

/// Per-class init-once cell
#[derive(Debug)]
struct InitCell {
    state: Mutex<InitState>,
    finished: Condvar,
}

impl InitCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Pending),
            finished: Condvar::new(),
        }
    }
}

/// Marks the cell failed if the initializer unwinds before reporting back
struct RunningGuard<'a> {
    cell: &'a InitCell,
    class_name: &'a str,
    armed: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(class = self.class_name, "class initializer panicked");
        *self.cell.state.lock() = InitState::Failed(InvokeError::InitializerFailed {
            class: self.class_name.to_string(),
            cause: Box::new(InvokeError::Thrown("initializer panicked".to_string())),
        });
        self.cell.finished.notify_all();
    }
}

/// Process-wide initialization table keyed by class identity
#[derive(Debug, Default)]
pub struct InitTable {
    cells: DashMap<ClassId, Arc<InitCell>>,
}

impl InitTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Check if the class's initializer completed successfully
    pub fn is_initialized(&self, id: ClassId) -> bool {
        self.cells
            .get(&id)
            .map(|cell| *cell.state.lock() == InitState::Done)
            .unwrap_or(false)
    }

    /// Run `init` for the class unless it already ran
    ///
    /// Blocks while another thread is running the initializer.
    pub fn run_once<F>(&self, id: ClassId, class_name: &str, init: F) -> InvokeResult<()>
    where
        F: FnOnce() -> InvokeResult<()>,
    {
        // The map guard must not be held while the initializer runs
        let cell = self
            .cells
            .entry(id)
            .or_insert_with(|| Arc::new(InitCell::new()))
            .clone();

        let me = thread::current().id();
        {
            let mut state = cell.state.lock();
            loop {
                let owner = match &*state {
                    InitState::Done => return Ok(()),
                    InitState::Failed(err) => return Err(err.clone()),
                    InitState::Running(owner) => *owner,
                    InitState::Pending => break,
                };
                if owner == me {
                    return Ok(());
                }
                debug!(class = class_name, "waiting for class initialization");
                cell.finished.wait(&mut state);
            }
            *state = InitState::Running(me);
        }

        debug!(class = class_name, "running class initializer");
        let mut guard = RunningGuard {
            cell: &cell,
            class_name,
            armed: true,
        };
        let result = init().map_err(|err| match err {
            InvokeError::InitializerFailed { .. } => err,
            other => InvokeError::InitializerFailed {
                class: class_name.to_string(),
                cause: Box::new(other),
            },
        });

        guard.armed = false;

        let mut state = cell.state.lock();
        match &result {
            Ok(()) => {
                debug!(class = class_name, "class initialized");
                *state = InitState::Done;
            }
            Err(err) => {
                debug!(class = class_name, error = %err, "class initializer failed");
                *state = InitState::Failed(err.clone());
            }
        }
        cell.finished.notify_all();
        result
    }
}
