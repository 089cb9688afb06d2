//! RAII wrappers over the toolchain's opaque handles.
//!
//! Every wrapper owns exactly one raw handle and frees it in `Drop`, so each
//! handle is destroyed on exactly one code path. None of the wrappers are
//! `Clone`: the toolchain defines no duplication semantics for its handles.
//!
//! Each wrapper also holds an `Arc` of the capability table it was produced
//! by, which keeps the loaded library mapped for as long as the handle lives.

use std::fmt;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::api::ToolchainApi;
use crate::api::raw::{
    RawCompiler, RawDataIndex, RawExecutor, RawPackageIndex, RawValue, RawWorkflow,
};
use crate::diagnostics::SourceDiagnostics;
use crate::error::Result;

// SAFETY of the `Send` impls below: the raw handles wrap toolchain-internal
// state that is not tied to the creating thread (the index handles are
// reference-counted, the rest are single-owner). All mutation goes through
// `&mut self` or the session lock, so no concurrent access can occur.

/// The remote instance's package index.
///
/// Internally reference-counted by the toolchain: handing it to a compiler or
/// executor constructor leaves the toolchain holding its own reference, so
/// this wrapper may be dropped immediately afterwards.
pub struct PackageIndex {
    api: Arc<dyn ToolchainApi>,
    raw: NonNull<RawPackageIndex>,
}

unsafe impl Send for PackageIndex {}

impl PackageIndex {
    /// Fetch the package index from the remote API endpoint.
    pub fn fetch(api: &Arc<dyn ToolchainApi>, endpoint: &str) -> Result<Self> {
        let raw = api.new_package_index(endpoint)?;
        Ok(Self {
            api: Arc::clone(api),
            raw,
        })
    }

    pub(crate) fn raw(&self) -> NonNull<RawPackageIndex> {
        self.raw
    }
}

impl Drop for PackageIndex {
    fn drop(&mut self) {
        self.api.free_package_index(self.raw);
    }
}

/// The remote instance's dataset index. Reference-counted like [`PackageIndex`].
pub struct DataIndex {
    api: Arc<dyn ToolchainApi>,
    raw: NonNull<RawDataIndex>,
}

unsafe impl Send for DataIndex {}

impl DataIndex {
    /// Fetch the dataset index from the remote API endpoint.
    pub fn fetch(api: &Arc<dyn ToolchainApi>, endpoint: &str) -> Result<Self> {
        let raw = api.new_data_index(endpoint)?;
        Ok(Self {
            api: Arc::clone(api),
            raw,
        })
    }

    pub(crate) fn raw(&self) -> NonNull<RawDataIndex> {
        self.raw
    }
}

impl Drop for DataIndex {
    fn drop(&mut self) {
        self.api.free_data_index(self.raw);
    }
}

/// The product of compiling one snippet: the diagnostics bundle that is
/// always produced, and the workflow when compilation yielded one.
///
/// Note that both may be "present but uninteresting": a bundle can be fully
/// empty, and a workflow can be absent even without an internal error when
/// the source itself was faulty.
pub struct CompileOutcome {
    pub diagnostics: SourceDiagnostics,
    pub workflow: Option<Workflow>,
}

/// A SkiffScript compiler.
///
/// Stateful: successive compiles accumulate definitions, which is why
/// [`Compiler::compile`] takes `&mut self` and a compiler must never be
/// shared between concurrently running pipelines.
pub struct Compiler {
    api: Arc<dyn ToolchainApi>,
    raw: NonNull<RawCompiler>,
}

unsafe impl Send for Compiler {}

impl Compiler {
    /// Build a compiler over the two indices.
    pub fn new(
        api: &Arc<dyn ToolchainApi>,
        pindex: &PackageIndex,
        dindex: &DataIndex,
    ) -> Result<Self> {
        let raw = api.new_compiler(pindex.raw(), dindex.raw())?;
        Ok(Self {
            api: Arc::clone(api),
            raw,
        })
    }

    /// Compile one snippet, labelled `what` for diagnostics.
    pub fn compile(&mut self, what: &str, source: &str) -> Result<CompileOutcome> {
        let (diag, workflow) = self.api.compile(self.raw, what, source)?;
        Ok(CompileOutcome {
            diagnostics: SourceDiagnostics::from_raw(Arc::clone(&self.api), diag),
            workflow: workflow.map(|raw| Workflow {
                api: Arc::clone(&self.api),
                raw,
            }),
        })
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        self.api.free_compiler(self.raw);
    }
}

/// A compiled workflow. Single-use: consumed by [`Executor::run`].
pub struct Workflow {
    api: Arc<dyn ToolchainApi>,
    raw: NonNull<RawWorkflow>,
}

unsafe impl Send for Workflow {}

impl Workflow {
    /// Annotate the workflow with the identity that receives its final result.
    pub fn set_user(&mut self, user: &str) -> Result<()> {
        self.api.workflow_set_user(self.raw, user)
    }

    /// Disassemble into the textual display form.
    pub fn disassemble(&self) -> Result<String> {
        self.api.workflow_disassemble(self.raw)
    }
}

impl Drop for Workflow {
    fn drop(&mut self) {
        self.api.free_workflow(self.raw);
    }
}

/// Captured output of one workflow run.
pub struct RunOutput {
    /// Everything the workflow printed while running. May be empty.
    pub prints: String,
    /// The workflow's return value.
    pub value: ResultValue,
}

/// A remote executor connected to a running Skiff instance.
pub struct Executor {
    api: Arc<dyn ToolchainApi>,
    raw: NonNull<RawExecutor>,
}

unsafe impl Send for Executor {}

impl Executor {
    /// Connect to the remote execution endpoint.
    pub fn connect(
        api: &Arc<dyn ToolchainApi>,
        exec_endpoint: &str,
        trust_store_dir: &Path,
        pindex: &PackageIndex,
        dindex: &DataIndex,
    ) -> Result<Self> {
        let raw = api.new_executor(exec_endpoint, trust_store_dir, pindex.raw(), dindex.raw())?;
        Ok(Self {
            api: Arc::clone(api),
            raw,
        })
    }

    /// Run a workflow on the remote instance.
    ///
    /// Consumes the workflow: it is freed before this returns, on success and
    /// on failure alike.
    pub fn run(&self, workflow: Workflow) -> Result<RunOutput> {
        let (prints, value) = self.api.run(self.raw, workflow.raw)?;
        Ok(RunOutput {
            prints,
            value: ResultValue {
                api: Arc::clone(&self.api),
                raw: value,
            },
        })
        // `workflow` dropped here (and on the error path above).
    }

    /// Materialize the value's remote references under `data_dir`.
    pub fn process(&self, value: &ResultValue, data_dir: &Path) -> Result<()> {
        self.api.process_value(self.raw, value.raw, data_dir)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.api.free_executor(self.raw);
    }
}

/// The return value of one executed workflow.
pub struct ResultValue {
    api: Arc<dyn ToolchainApi>,
    raw: NonNull<RawValue>,
}

unsafe impl Send for ResultValue {}

impl ResultValue {
    /// Whether the value references remote state that must be materialized
    /// before it can be displayed (e.g. a dataset reference).
    pub fn needs_processing(&self) -> bool {
        self.api.value_needs_processing(self.raw)
    }

    /// Render the value for display and destroy it.
    pub fn into_display(self, data_dir: &Path) -> Result<String> {
        self.api.value_serialize(self.raw, data_dir)
        // `self` dropped here; the raw value is freed exactly once.
    }
}

impl Drop for ResultValue {
    fn drop(&mut self) {
        self.api.free_value(self.raw);
    }
}

impl fmt::Debug for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultValue")
            .field("needs_processing", &self.needs_processing())
            .finish()
    }
}
