//! Capability table for the dynamically loaded Skiff toolchain.
//!
//! The toolchain ships as a shared library (`libskiff_cli.so`) whose entry
//! points are resolved once at load time into a [`DlToolchain`]. Everything
//! above this module talks to the toolchain through the [`ToolchainApi`]
//! trait, which keeps the handle-ownership rules testable against a mock
//! implementation.

mod dl;
pub mod raw;

use std::fmt;
use std::path::Path;
use std::ptr::NonNull;
use std::str::FromStr;

pub use dl::DlToolchain;

use crate::diagnostics::DiagnosticSlot;
use crate::error::{Error, Result};
use raw::{
    RawCompiler, RawDataIndex, RawExecutor, RawPackageIndex, RawSourceDiagnostics, RawValue,
    RawWorkflow,
};

/// The toolchain ABI version this bridge was built against.
///
/// [`DlToolchain::open`] refuses a library with a different major version and
/// warns on minor drift.
pub const SUPPORTED_ABI: ApiVersion = ApiVersion {
    major: 3,
    minor: 0,
    patch: 0,
};

/// A dotted `major.minor.patch` toolchain version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ApiVersion {
    /// Whether a loaded toolchain with this version can be driven by the bridge.
    pub fn is_compatible_with(&self, supported: &ApiVersion) -> bool {
        self.major == supported.major
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = || -> Result<u32> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| Error::MalformedVersion(s.to_string()))
        };
        Ok(Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The resolved set of toolchain entry points, as typed operations.
///
/// Handles cross this interface as [`NonNull`] tokens over the opaque raw
/// types; they are only meaningful when passed back to the same
/// implementation that produced them. The RAII wrappers in
/// [`handles`](crate::handles) enforce that every token is freed exactly
/// once, so implementations may assume tokens are live and never reused
/// after the matching `free_*` call.
///
/// Constructor failures are returned as [`Error::Toolchain`] with the
/// toolchain's own rendered message; the underlying error handle never
/// escapes the implementation.
pub trait ToolchainApi: Send + Sync {
    /// The ABI version the loaded toolchain implements.
    fn version(&self) -> Result<ApiVersion>;

    /// Force ANSI colour in toolchain-rendered diagnostics.
    fn set_force_colour(&self, enable: bool);

    fn new_package_index(&self, endpoint: &str) -> Result<NonNull<RawPackageIndex>>;
    fn free_package_index(&self, raw: NonNull<RawPackageIndex>);

    fn new_data_index(&self, endpoint: &str) -> Result<NonNull<RawDataIndex>>;
    fn free_data_index(&self, raw: NonNull<RawDataIndex>);

    /// Build a compiler over the two indices. The indices remain owned by the
    /// caller; the toolchain retains its own references internally.
    fn new_compiler(
        &self,
        pindex: NonNull<RawPackageIndex>,
        dindex: NonNull<RawDataIndex>,
    ) -> Result<NonNull<RawCompiler>>;
    fn free_compiler(&self, raw: NonNull<RawCompiler>);

    /// Compile one snippet. Always yields a diagnostics bundle; the workflow
    /// is present only when compilation produced an executable result.
    ///
    /// `what` is a label describing the snippet's origin (a cell, a file).
    fn compile(
        &self,
        compiler: NonNull<RawCompiler>,
        what: &str,
        source: &str,
    ) -> Result<(NonNull<RawSourceDiagnostics>, Option<NonNull<RawWorkflow>>)>;

    fn diag_has(&self, diag: NonNull<RawSourceDiagnostics>, slot: DiagnosticSlot) -> bool;

    /// Render one diagnostics slot to text. An empty slot renders as the
    /// empty string. `context` carries the original `(label, source)` pair
    /// and is ignored for the internal slot.
    fn diag_render(
        &self,
        diag: NonNull<RawSourceDiagnostics>,
        slot: DiagnosticSlot,
        context: Option<(&str, &str)>,
    ) -> Result<String>;
    fn free_diagnostics(&self, raw: NonNull<RawSourceDiagnostics>);

    /// Annotate the workflow with the identity that receives its final result.
    fn workflow_set_user(&self, workflow: NonNull<RawWorkflow>, user: &str) -> Result<()>;

    /// Disassemble the workflow into its textual display form.
    fn workflow_disassemble(&self, workflow: NonNull<RawWorkflow>) -> Result<String>;
    fn free_workflow(&self, raw: NonNull<RawWorkflow>);

    /// Connect an executor to the remote instance. The indices remain owned
    /// by the caller, as in [`ToolchainApi::new_compiler`].
    fn new_executor(
        &self,
        exec_endpoint: &str,
        trust_store_dir: &Path,
        pindex: NonNull<RawPackageIndex>,
        dindex: NonNull<RawDataIndex>,
    ) -> Result<NonNull<RawExecutor>>;
    fn free_executor(&self, raw: NonNull<RawExecutor>);

    /// Run a workflow remotely. Returns the captured print output and the
    /// workflow's return value. The workflow itself remains owned by the
    /// caller and must still be freed.
    fn run(
        &self,
        executor: NonNull<RawExecutor>,
        workflow: NonNull<RawWorkflow>,
    ) -> Result<(String, NonNull<RawValue>)>;

    /// Materialize a value's remote references (e.g. a dataset) under `data_dir`.
    fn process_value(
        &self,
        executor: NonNull<RawExecutor>,
        value: NonNull<RawValue>,
        data_dir: &Path,
    ) -> Result<()>;

    fn value_needs_processing(&self, value: NonNull<RawValue>) -> bool;

    /// Render the value for display, resolving dataset references against `data_dir`.
    fn value_serialize(&self, value: NonNull<RawValue>, data_dir: &Path) -> Result<String>;
    fn free_value(&self, raw: NonNull<RawValue>);
}
