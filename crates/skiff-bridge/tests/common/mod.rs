//! A scriptable in-memory toolchain used to verify the bridge's handle
//! ownership rules.
//!
//! Every handle the mock gives out is tracked in a live set keyed by an id;
//! freeing a handle that is not live, or freeing it under the wrong kind,
//! panics the test. Freed ids stay allocated (parked in a graveyard) so a
//! double free is detected deterministically instead of reading freed memory.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use skiff_bridge::api::raw::{
    RawCompiler, RawDataIndex, RawExecutor, RawPackageIndex, RawSourceDiagnostics, RawValue,
    RawWorkflow,
};
use skiff_bridge::error::{Error, Result};
use skiff_bridge::{ApiVersion, DiagnosticSlot, SUPPORTED_ABI, SessionConfig, ToolchainApi};

/// The kind of a mock handle, for mismatched-free detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    PackageIndex,
    DataIndex,
    Compiler,
    Executor,
    Diagnostics,
    Workflow,
    Value,
}

/// What one call to `compile` should produce.
#[derive(Debug, Clone, Copy)]
pub struct DiagScript {
    pub warnings: bool,
    pub errors: bool,
    pub internal: bool,
    /// Whether a workflow handle accompanies the bundle.
    pub workflow: bool,
}

impl DiagScript {
    pub fn clean() -> Self {
        Self {
            warnings: false,
            errors: false,
            internal: false,
            workflow: true,
        }
    }

    pub fn warnings_only() -> Self {
        Self {
            warnings: true,
            ..Self::clean()
        }
    }

    pub fn source_errors() -> Self {
        Self {
            warnings: false,
            errors: true,
            internal: false,
            workflow: false,
        }
    }

    pub fn internal_error() -> Self {
        Self {
            warnings: false,
            errors: false,
            internal: true,
            workflow: false,
        }
    }
}

#[derive(Default)]
pub struct MockState {
    next_id: usize,
    live: HashMap<usize, Kind>,
    graveyard: Vec<Box<usize>>,
    /// Every toolchain call, in order, named after the C entry point.
    pub calls: Vec<String>,

    pub fail_package_index: bool,
    pub fail_data_index: bool,
    pub fail_compiler: bool,
    pub fail_executor: bool,
    pub fail_disassemble: bool,
    pub fail_run: bool,
    pub fail_process: bool,

    /// Scripts consumed by successive `compile` calls; empty means clean.
    pub compile_script: VecDeque<DiagScript>,
    diag_scripts: HashMap<usize, DiagScript>,

    pub run_prints: String,
    pub needs_processing: bool,
    pub value_text: String,
}

impl MockState {
    fn alloc<T>(&mut self, kind: Kind) -> NonNull<T> {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, kind);
        NonNull::new(Box::into_raw(Box::new(id)).cast::<T>()).expect("boxed id is never null")
    }

    fn release<T>(&mut self, raw: NonNull<T>, kind: Kind) {
        let id = id_of(raw);
        match self.live.remove(&id) {
            Some(found) if found == kind => {
                self.graveyard
                    .push(unsafe { Box::from_raw(raw.cast::<usize>().as_ptr()) });
            }
            Some(found) => panic!("handle {id} freed as {kind:?} but allocated as {found:?}"),
            None => panic!("handle {id} freed twice, or never allocated"),
        }
    }
}

fn id_of<T>(raw: NonNull<T>) -> usize {
    unsafe { *raw.cast::<usize>().as_ref() }
}

/// The scriptable toolchain double.
#[derive(Default)]
pub struct MockToolchain {
    state: Mutex<MockState>,
}

impl MockToolchain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                value_text: String::from("()"),
                ..MockState::default()
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of handles given out and not yet freed.
    pub fn live_handles(&self) -> usize {
        self.state().live.len()
    }

    /// Number of live handles of one kind.
    pub fn live_of(&self, kind: Kind) -> usize {
        self.state().live.values().filter(|k| **k == kind).count()
    }

    pub fn assert_balanced(&self) {
        let state = self.state();
        assert!(
            state.live.is_empty(),
            "leaked handles: {:?}",
            state.live
        );
    }

    /// Index of the first occurrence of `call`, panicking when absent.
    pub fn call_position(&self, call: &str) -> usize {
        let calls = self.calls();
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("no `{call}` call was made; calls: {calls:?}"))
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }
}

impl ToolchainApi for MockToolchain {
    fn version(&self) -> Result<ApiVersion> {
        self.state().calls.push("version".into());
        Ok(SUPPORTED_ABI)
    }

    fn set_force_colour(&self, _enable: bool) {
        self.state().calls.push("set_force_colour".into());
    }

    fn new_package_index(&self, _endpoint: &str) -> Result<NonNull<RawPackageIndex>> {
        let mut state = self.state();
        state.calls.push("pindex_new_remote".into());
        if state.fail_package_index {
            return Err(Error::Toolchain("package index unavailable".into()));
        }
        Ok(state.alloc(Kind::PackageIndex))
    }

    fn free_package_index(&self, raw: NonNull<RawPackageIndex>) {
        let mut state = self.state();
        state.calls.push("pindex_free".into());
        state.release(raw, Kind::PackageIndex);
    }

    fn new_data_index(&self, _endpoint: &str) -> Result<NonNull<RawDataIndex>> {
        let mut state = self.state();
        state.calls.push("dindex_new_remote".into());
        if state.fail_data_index {
            return Err(Error::Toolchain("data index unavailable".into()));
        }
        Ok(state.alloc(Kind::DataIndex))
    }

    fn free_data_index(&self, raw: NonNull<RawDataIndex>) {
        let mut state = self.state();
        state.calls.push("dindex_free".into());
        state.release(raw, Kind::DataIndex);
    }

    fn new_compiler(
        &self,
        pindex: NonNull<RawPackageIndex>,
        dindex: NonNull<RawDataIndex>,
    ) -> Result<NonNull<RawCompiler>> {
        let mut state = self.state();
        state.calls.push("compiler_new".into());
        // Constructors must only ever see live indices.
        assert_eq!(state.live.get(&id_of(pindex)), Some(&Kind::PackageIndex));
        assert_eq!(state.live.get(&id_of(dindex)), Some(&Kind::DataIndex));
        if state.fail_compiler {
            return Err(Error::Toolchain("compiler refused the indices".into()));
        }
        Ok(state.alloc(Kind::Compiler))
    }

    fn free_compiler(&self, raw: NonNull<RawCompiler>) {
        let mut state = self.state();
        state.calls.push("compiler_free".into());
        state.release(raw, Kind::Compiler);
    }

    fn compile(
        &self,
        compiler: NonNull<RawCompiler>,
        _what: &str,
        _source: &str,
    ) -> Result<(NonNull<RawSourceDiagnostics>, Option<NonNull<RawWorkflow>>)> {
        let mut state = self.state();
        state.calls.push("compiler_compile".into());
        assert_eq!(state.live.get(&id_of(compiler)), Some(&Kind::Compiler));

        let script = state.compile_script.pop_front().unwrap_or(DiagScript::clean());
        let diag: NonNull<RawSourceDiagnostics> = state.alloc(Kind::Diagnostics);
        state.diag_scripts.insert(id_of(diag), script);
        let workflow = script.workflow.then(|| state.alloc(Kind::Workflow));
        Ok((diag, workflow))
    }

    fn diag_has(&self, diag: NonNull<RawSourceDiagnostics>, slot: DiagnosticSlot) -> bool {
        let state = self.state();
        let script = state.diag_scripts[&id_of(diag)];
        match slot {
            DiagnosticSlot::Warnings => script.warnings,
            DiagnosticSlot::Errors => script.errors,
            DiagnosticSlot::Internal => script.internal,
        }
    }

    fn diag_render(
        &self,
        diag: NonNull<RawSourceDiagnostics>,
        slot: DiagnosticSlot,
        context: Option<(&str, &str)>,
    ) -> Result<String> {
        let state = self.state();
        let script = state.diag_scripts[&id_of(diag)];
        let label = context.map(|(label, _)| label).unwrap_or("<unknown>");
        Ok(match slot {
            DiagnosticSlot::Warnings if script.warnings => {
                format!("{label}: warning: unused variable `x`")
            }
            DiagnosticSlot::Errors if script.errors => {
                format!("{label}: error: undefined function `foo()`")
            }
            DiagnosticSlot::Internal if script.internal => {
                String::from("package index desynchronized from instance")
            }
            _ => String::new(),
        })
    }

    fn free_diagnostics(&self, raw: NonNull<RawSourceDiagnostics>) {
        let mut state = self.state();
        state.calls.push("sdiag_free".into());
        state.diag_scripts.remove(&id_of(raw));
        state.release(raw, Kind::Diagnostics);
    }

    fn workflow_set_user(&self, workflow: NonNull<RawWorkflow>, _user: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push("workflow_set_user".into());
        assert_eq!(state.live.get(&id_of(workflow)), Some(&Kind::Workflow));
        Ok(())
    }

    fn workflow_disassemble(&self, workflow: NonNull<RawWorkflow>) -> Result<String> {
        let mut state = self.state();
        state.calls.push("workflow_disassemble".into());
        assert_eq!(state.live.get(&id_of(workflow)), Some(&Kind::Workflow));
        if state.fail_disassemble {
            return Err(Error::Toolchain("disassembler choked on the workflow".into()));
        }
        Ok(String::from("   0: call print\n   1: return"))
    }

    fn free_workflow(&self, raw: NonNull<RawWorkflow>) {
        let mut state = self.state();
        state.calls.push("workflow_free".into());
        state.release(raw, Kind::Workflow);
    }

    fn new_executor(
        &self,
        _exec_endpoint: &str,
        _trust_store_dir: &Path,
        pindex: NonNull<RawPackageIndex>,
        dindex: NonNull<RawDataIndex>,
    ) -> Result<NonNull<RawExecutor>> {
        let mut state = self.state();
        state.calls.push("exec_new".into());
        assert_eq!(state.live.get(&id_of(pindex)), Some(&Kind::PackageIndex));
        assert_eq!(state.live.get(&id_of(dindex)), Some(&Kind::DataIndex));
        if state.fail_executor {
            return Err(Error::Toolchain("driver endpoint unreachable".into()));
        }
        Ok(state.alloc(Kind::Executor))
    }

    fn free_executor(&self, raw: NonNull<RawExecutor>) {
        let mut state = self.state();
        state.calls.push("exec_free".into());
        state.release(raw, Kind::Executor);
    }

    fn run(
        &self,
        executor: NonNull<RawExecutor>,
        workflow: NonNull<RawWorkflow>,
    ) -> Result<(String, NonNull<RawValue>)> {
        let mut state = self.state();
        state.calls.push("exec_run".into());
        assert_eq!(state.live.get(&id_of(executor)), Some(&Kind::Executor));
        assert_eq!(state.live.get(&id_of(workflow)), Some(&Kind::Workflow));
        if state.fail_run {
            return Err(Error::Toolchain("workflow execution failed remotely".into()));
        }
        let prints = state.run_prints.clone();
        Ok((prints, state.alloc(Kind::Value)))
    }

    fn process_value(
        &self,
        executor: NonNull<RawExecutor>,
        value: NonNull<RawValue>,
        _data_dir: &Path,
    ) -> Result<()> {
        let mut state = self.state();
        state.calls.push("exec_process".into());
        assert_eq!(state.live.get(&id_of(executor)), Some(&Kind::Executor));
        assert_eq!(state.live.get(&id_of(value)), Some(&Kind::Value));
        if state.fail_process {
            return Err(Error::Toolchain("dataset download failed".into()));
        }
        Ok(())
    }

    fn value_needs_processing(&self, value: NonNull<RawValue>) -> bool {
        let state = self.state();
        assert_eq!(state.live.get(&id_of(value)), Some(&Kind::Value));
        state.needs_processing
    }

    fn value_serialize(&self, value: NonNull<RawValue>, _data_dir: &Path) -> Result<String> {
        let mut state = self.state();
        state.calls.push("value_serialize".into());
        assert_eq!(state.live.get(&id_of(value)), Some(&Kind::Value));
        Ok(state.value_text.clone())
    }

    fn free_value(&self, raw: NonNull<RawValue>) {
        let mut state = self.state();
        state.calls.push("value_free".into());
        state.release(raw, Kind::Value);
    }
}

/// This mock as a capability table.
pub fn api_of(mock: &Arc<MockToolchain>) -> Arc<dyn ToolchainApi> {
    Arc::clone(mock) as Arc<dyn ToolchainApi>
}

/// A session configuration pointing at nothing in particular; the mock
/// ignores endpoints entirely.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        api_endpoint: String::from("http://instance:50051"),
        exec_endpoint: String::from("grpc://instance:50053"),
        trust_store_dir: "/etc/skiff/certs".into(),
        data_dir: "/tmp/skiff-data".into(),
        result_user: Some(String::from("notebook")),
    }
}
