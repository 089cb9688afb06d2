//! The bridge context: the capability table plus the one active session.
//!
//! The compiler is stateful across compiles, so two pipeline runs must never
//! interleave against the same session. The context makes that constraint a
//! type-level fact: the session sits behind a mutex, and [`BridgeContext::execute`]
//! is the single point where requests enter the pipeline.

use std::sync::{Arc, Mutex};

use crate::api::ToolchainApi;
use crate::pipeline::{ExecuteFailure, ExecuteOutput};
use crate::session::{ConnectError, Session, SessionConfig};

/// The capability table and the active session it serves.
///
/// The table is read-only after load and shared freely; the session is
/// serialized behind the lock. Dropping the context tears the session down
/// before the table, since every session handle holds its own `Arc` to the
/// table.
pub struct BridgeContext {
    // Field order is teardown order: the session goes down while the table
    // is still alive (every handle also holds its own `Arc` to the table).
    session: Mutex<Session>,
    api: Arc<dyn ToolchainApi>,
}

impl BridgeContext {
    /// Wrap an already-connected session.
    pub fn new(api: Arc<dyn ToolchainApi>, session: Session) -> Self {
        Self {
            api,
            session: Mutex::new(session),
        }
    }

    /// Connect a session against `api` and wrap it.
    pub fn connect(
        api: Arc<dyn ToolchainApi>,
        config: &SessionConfig,
    ) -> Result<Self, ConnectError> {
        let session = Session::connect(&api, config)?;
        Ok(Self::new(api, session))
    }

    pub fn api(&self) -> &Arc<dyn ToolchainApi> {
        &self.api
    }

    /// Run one request through the pipeline, serialized against all others.
    pub fn execute(&self, label: &str, source: &str) -> Result<ExecuteOutput, ExecuteFailure> {
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        session.execute(label, source)
    }
}
