//! Dynamic capability bridge to the Skiff workflow toolchain.
//!
//! This crate provides:
//! - Capability table: one-time symbol resolution over the dlopen'd toolchain
//! - RAII wrappers for every opaque toolchain handle
//! - Session construction with atomic unwind on failure
//! - The per-request compile/diagnose/execute/serialize pipeline
//! - Diagnostics rendering to caller-supplied sinks
//!
//! The notebook transport that delivers requests, and the toolchain's own
//! compiler and VM internals, are deliberately outside this crate.

pub mod api;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod handles;
pub mod pipeline;
pub mod session;

pub use api::{ApiVersion, DlToolchain, SUPPORTED_ABI, ToolchainApi};
pub use context::BridgeContext;
pub use diagnostics::{DiagnosticSlot, SourceContext, SourceDiagnostics};
pub use error::{Error, Result};
pub use handles::{
    CompileOutcome, Compiler, DataIndex, Executor, PackageIndex, ResultValue, RunOutput, Workflow,
};
pub use pipeline::{ExecuteFailure, ExecuteOutput, FailureCategory};
pub use session::{ConnectError, IndexStage, Session, SessionConfig};
