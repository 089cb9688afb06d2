//! Loader and adapter for the real, dynamically loaded toolchain.
//!
//! [`DlToolchain::open`] maps the shared library, resolves every declared
//! entry point exactly once, and verifies the ABI version. The resolved
//! function pointers live next to the owning [`Library`], so they stay valid
//! for the adapter's whole lifetime.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;
use std::ptr::{self, NonNull};

use libloading::{Library, Symbol};

use super::raw::*;
use super::{ApiVersion, SUPPORTED_ABI, ToolchainApi};
use crate::diagnostics::DiagnosticSlot;
use crate::error::{Error, Result};

/// Resolves one symbol from the library, failing the whole load on absence.
macro_rules! resolve {
    ($lib:expr, $name:ident: $ty:ty) => {{
        let symbol: Symbol<$ty> = unsafe { $lib.get(concat!(stringify!($name), "\0").as_bytes()) }
            .map_err(|source| Error::MissingSymbol {
                name: stringify!($name),
                source,
            })?;
        *symbol
    }};
}

/// Releases a toolchain-allocated C string on drop.
///
/// The toolchain allocates serialization buffers with `malloc`; they must go
/// back through `libc::free`, even if UTF-8 validation bails early.
struct CBufGuard(*mut c_char);

impl Drop for CBufGuard {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { libc::free(self.0.cast()) };
        }
    }
}

/// Copies a toolchain-allocated C string into an owned `String` and frees the
/// original. A null pointer reads as the empty string.
///
/// # Safety
/// `ptr` must be null or a `malloc`-allocated, NUL-terminated string that is
/// not used again by the caller.
unsafe fn take_c_string(ptr: *mut c_char) -> Result<String> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    let guard = CBufGuard(ptr);
    let text = unsafe { CStr::from_ptr(guard.0) }.to_str()?.to_owned();
    Ok(text)
}

fn path_to_c(path: &Path) -> Result<CString> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))?;
    Ok(CString::new(text)?)
}

/// The full set of resolved entry points.
struct SymbolTable {
    version: VersionFn,
    set_force_colour: SetForceColourFn,

    error_free: ErrorFreeFn,
    error_serialize: ErrorSerializeFn,

    sdiag_free: SdiagFreeFn,
    sdiag_has_warnings: SdiagHasFn,
    sdiag_has_errors: SdiagHasFn,
    sdiag_has_internal: SdiagHasFn,
    sdiag_serialize_warnings: SdiagSerializeSourceFn,
    sdiag_serialize_errors: SdiagSerializeSourceFn,
    sdiag_serialize_internal: SdiagSerializeInternalFn,

    pindex_new_remote: PindexNewRemoteFn,
    pindex_free: PindexFreeFn,
    dindex_new_remote: DindexNewRemoteFn,
    dindex_free: DindexFreeFn,

    workflow_free: WorkflowFreeFn,
    workflow_disassemble: WorkflowDisassembleFn,
    workflow_set_user: WorkflowSetUserFn,

    compiler_new: CompilerNewFn,
    compiler_free: CompilerFreeFn,
    compiler_compile: CompilerCompileFn,

    value_free: ValueFreeFn,
    value_needs_processing: ValueNeedsProcessingFn,
    value_serialize: ValueSerializeFn,

    exec_new: ExecNewFn,
    exec_free: ExecFreeFn,
    exec_run: ExecRunFn,
    exec_process: ExecProcessFn,
}

impl SymbolTable {
    fn load(library: &Library) -> Result<Self> {
        Ok(Self {
            version: resolve!(library, version: VersionFn),
            set_force_colour: resolve!(library, set_force_colour: SetForceColourFn),

            error_free: resolve!(library, error_free: ErrorFreeFn),
            error_serialize: resolve!(library, error_serialize: ErrorSerializeFn),

            sdiag_free: resolve!(library, sdiag_free: SdiagFreeFn),
            sdiag_has_warnings: resolve!(library, sdiag_has_warnings: SdiagHasFn),
            sdiag_has_errors: resolve!(library, sdiag_has_errors: SdiagHasFn),
            sdiag_has_internal: resolve!(library, sdiag_has_internal: SdiagHasFn),
            sdiag_serialize_warnings: resolve!(library, sdiag_serialize_warnings: SdiagSerializeSourceFn),
            sdiag_serialize_errors: resolve!(library, sdiag_serialize_errors: SdiagSerializeSourceFn),
            sdiag_serialize_internal: resolve!(library, sdiag_serialize_internal: SdiagSerializeInternalFn),

            pindex_new_remote: resolve!(library, pindex_new_remote: PindexNewRemoteFn),
            pindex_free: resolve!(library, pindex_free: PindexFreeFn),
            dindex_new_remote: resolve!(library, dindex_new_remote: DindexNewRemoteFn),
            dindex_free: resolve!(library, dindex_free: DindexFreeFn),

            workflow_free: resolve!(library, workflow_free: WorkflowFreeFn),
            workflow_disassemble: resolve!(library, workflow_disassemble: WorkflowDisassembleFn),
            workflow_set_user: resolve!(library, workflow_set_user: WorkflowSetUserFn),

            compiler_new: resolve!(library, compiler_new: CompilerNewFn),
            compiler_free: resolve!(library, compiler_free: CompilerFreeFn),
            compiler_compile: resolve!(library, compiler_compile: CompilerCompileFn),

            value_free: resolve!(library, value_free: ValueFreeFn),
            value_needs_processing: resolve!(library, value_needs_processing: ValueNeedsProcessingFn),
            value_serialize: resolve!(library, value_serialize: ValueSerializeFn),

            exec_new: resolve!(library, exec_new: ExecNewFn),
            exec_free: resolve!(library, exec_free: ExecFreeFn),
            exec_run: resolve!(library, exec_run: ExecRunFn),
            exec_process: resolve!(library, exec_process: ExecProcessFn),
        })
    }
}

/// Queries the toolchain's version string and parses it.
fn query_version(version: VersionFn) -> Result<ApiVersion> {
    let raw = unsafe { version() };
    if raw.is_null() {
        return Err(Error::MalformedVersion(String::from("<null>")));
    }
    // Static string owned by the toolchain; not freed.
    unsafe { CStr::from_ptr(raw) }.to_str()?.parse()
}

/// The real toolchain, loaded from a shared library.
///
/// Every handle produced through this adapter keeps an `Arc` to it, so the
/// underlying library cannot be unmapped while any handle is outstanding.
pub struct DlToolchain {
    symbols: SymbolTable,
    // Queried and validated once in `open`.
    abi: ApiVersion,
    // Must outlive every resolved function pointer; dropped last.
    _library: Library,
}

impl DlToolchain {
    /// Load the toolchain library at `path` and resolve the capability table.
    ///
    /// Fails atomically: if any required symbol is missing or the ABI major
    /// version differs from [`SUPPORTED_ABI`], the library is unmapped and no
    /// partially usable table is returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "loading toolchain library");

        let library = unsafe { Library::new(path) }?;
        let symbols = SymbolTable::load(&library)?;

        let found = query_version(symbols.version)?;
        if !found.is_compatible_with(&SUPPORTED_ABI) {
            return Err(Error::VersionMismatch {
                found,
                supported: SUPPORTED_ABI,
            });
        }
        if found.minor != SUPPORTED_ABI.minor {
            tracing::warn!(
                %found,
                supported = %SUPPORTED_ABI,
                "toolchain minor version differs from the one this bridge was built against"
            );
        }

        tracing::debug!(version = %found, "toolchain library loaded");
        Ok(Self {
            symbols,
            abi: found,
            _library: library,
        })
    }

    /// The ABI version queried and validated by [`DlToolchain::open`].
    pub fn abi_version(&self) -> ApiVersion {
        self.abi
    }

    /// Renders and frees a toolchain error handle, yielding its message.
    fn consume_error(&self, err: NonNull<RawError>) -> String {
        let mut buffer: *mut c_char = ptr::null_mut();
        unsafe { (self.symbols.error_serialize)(err.as_ptr(), &mut buffer) };
        let message = unsafe { take_c_string(buffer) }
            .unwrap_or_else(|_| String::from("<non-UTF-8 toolchain error message>"));
        unsafe { (self.symbols.error_free)(err.as_ptr()) };
        message
    }

    /// Maps a constructor's returned error pointer. Null means success.
    fn check(&self, err: *mut RawError) -> Result<()> {
        match NonNull::new(err) {
            None => Ok(()),
            Some(err) => Err(Error::Toolchain(self.consume_error(err))),
        }
    }
}

impl std::fmt::Debug for DlToolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlToolchain").field("abi", &self.abi).finish()
    }
}

impl ToolchainApi for DlToolchain {
    fn version(&self) -> Result<ApiVersion> {
        Ok(self.abi)
    }

    fn set_force_colour(&self, enable: bool) {
        unsafe { (self.symbols.set_force_colour)(enable) };
    }

    fn new_package_index(&self, endpoint: &str) -> Result<NonNull<RawPackageIndex>> {
        let endpoint = CString::new(endpoint)?;
        let mut raw: *mut RawPackageIndex = ptr::null_mut();
        let err = unsafe { (self.symbols.pindex_new_remote)(endpoint.as_ptr(), &mut raw) };
        self.check(err)?;
        NonNull::new(raw).ok_or_else(|| {
            Error::Toolchain(String::from("pindex_new_remote returned neither index nor error"))
        })
    }

    fn free_package_index(&self, raw: NonNull<RawPackageIndex>) {
        unsafe { (self.symbols.pindex_free)(raw.as_ptr()) };
    }

    fn new_data_index(&self, endpoint: &str) -> Result<NonNull<RawDataIndex>> {
        let endpoint = CString::new(endpoint)?;
        let mut raw: *mut RawDataIndex = ptr::null_mut();
        let err = unsafe { (self.symbols.dindex_new_remote)(endpoint.as_ptr(), &mut raw) };
        self.check(err)?;
        NonNull::new(raw).ok_or_else(|| {
            Error::Toolchain(String::from("dindex_new_remote returned neither index nor error"))
        })
    }

    fn free_data_index(&self, raw: NonNull<RawDataIndex>) {
        unsafe { (self.symbols.dindex_free)(raw.as_ptr()) };
    }

    fn new_compiler(
        &self,
        pindex: NonNull<RawPackageIndex>,
        dindex: NonNull<RawDataIndex>,
    ) -> Result<NonNull<RawCompiler>> {
        let mut raw: *mut RawCompiler = ptr::null_mut();
        let err =
            unsafe { (self.symbols.compiler_new)(pindex.as_ptr(), dindex.as_ptr(), &mut raw) };
        self.check(err)?;
        NonNull::new(raw).ok_or_else(|| {
            Error::Toolchain(String::from("compiler_new returned neither compiler nor error"))
        })
    }

    fn free_compiler(&self, raw: NonNull<RawCompiler>) {
        unsafe { (self.symbols.compiler_free)(raw.as_ptr()) };
    }

    fn compile(
        &self,
        compiler: NonNull<RawCompiler>,
        what: &str,
        source: &str,
    ) -> Result<(NonNull<RawSourceDiagnostics>, Option<NonNull<RawWorkflow>>)> {
        let what = CString::new(what)?;
        let source = CString::new(source)?;
        let mut workflow: *mut RawWorkflow = ptr::null_mut();
        let diag = unsafe {
            (self.symbols.compiler_compile)(
                compiler.as_ptr(),
                what.as_ptr(),
                source.as_ptr(),
                &mut workflow,
            )
        };
        match NonNull::new(diag) {
            Some(diag) => Ok((diag, NonNull::new(workflow))),
            None => {
                // Contract violation; don't leak a workflow that came with it.
                if let Some(workflow) = NonNull::new(workflow) {
                    unsafe { (self.symbols.workflow_free)(workflow.as_ptr()) };
                }
                Err(Error::Toolchain(String::from(
                    "compiler_compile returned no diagnostics bundle",
                )))
            }
        }
    }

    fn diag_has(&self, diag: NonNull<RawSourceDiagnostics>, slot: DiagnosticSlot) -> bool {
        let query = match slot {
            DiagnosticSlot::Warnings => self.symbols.sdiag_has_warnings,
            DiagnosticSlot::Errors => self.symbols.sdiag_has_errors,
            DiagnosticSlot::Internal => self.symbols.sdiag_has_internal,
        };
        unsafe { query(diag.as_ptr()) }
    }

    fn diag_render(
        &self,
        diag: NonNull<RawSourceDiagnostics>,
        slot: DiagnosticSlot,
        context: Option<(&str, &str)>,
    ) -> Result<String> {
        let mut buffer: *mut c_char = ptr::null_mut();
        match slot {
            DiagnosticSlot::Internal => unsafe {
                (self.symbols.sdiag_serialize_internal)(diag.as_ptr(), &mut buffer);
            },
            DiagnosticSlot::Warnings | DiagnosticSlot::Errors => {
                let (label, source) = context.unwrap_or(("<unknown>", ""));
                let label = CString::new(label)?;
                let source = CString::new(source)?;
                let serialize = match slot {
                    DiagnosticSlot::Warnings => self.symbols.sdiag_serialize_warnings,
                    _ => self.symbols.sdiag_serialize_errors,
                };
                unsafe {
                    serialize(diag.as_ptr(), label.as_ptr(), source.as_ptr(), &mut buffer);
                }
            }
        }
        unsafe { take_c_string(buffer) }
    }

    fn free_diagnostics(&self, raw: NonNull<RawSourceDiagnostics>) {
        unsafe { (self.symbols.sdiag_free)(raw.as_ptr()) };
    }

    fn workflow_set_user(&self, workflow: NonNull<RawWorkflow>, user: &str) -> Result<()> {
        let user = CString::new(user)?;
        unsafe { (self.symbols.workflow_set_user)(workflow.as_ptr(), user.as_ptr()) };
        Ok(())
    }

    fn workflow_disassemble(&self, workflow: NonNull<RawWorkflow>) -> Result<String> {
        let mut buffer: *mut c_char = ptr::null_mut();
        let err = unsafe { (self.symbols.workflow_disassemble)(workflow.as_ptr(), &mut buffer) };
        self.check(err)?;
        unsafe { take_c_string(buffer) }
    }

    fn free_workflow(&self, raw: NonNull<RawWorkflow>) {
        unsafe { (self.symbols.workflow_free)(raw.as_ptr()) };
    }

    fn new_executor(
        &self,
        exec_endpoint: &str,
        trust_store_dir: &Path,
        pindex: NonNull<RawPackageIndex>,
        dindex: NonNull<RawDataIndex>,
    ) -> Result<NonNull<RawExecutor>> {
        let endpoint = CString::new(exec_endpoint)?;
        let trust_store = path_to_c(trust_store_dir)?;
        let mut raw: *mut RawExecutor = ptr::null_mut();
        let err = unsafe {
            (self.symbols.exec_new)(
                endpoint.as_ptr(),
                trust_store.as_ptr(),
                pindex.as_ptr(),
                dindex.as_ptr(),
                &mut raw,
            )
        };
        self.check(err)?;
        NonNull::new(raw).ok_or_else(|| {
            Error::Toolchain(String::from("exec_new returned neither executor nor error"))
        })
    }

    fn free_executor(&self, raw: NonNull<RawExecutor>) {
        unsafe { (self.symbols.exec_free)(raw.as_ptr()) };
    }

    fn run(
        &self,
        executor: NonNull<RawExecutor>,
        workflow: NonNull<RawWorkflow>,
    ) -> Result<(String, NonNull<RawValue>)> {
        let mut prints: *mut c_char = ptr::null_mut();
        let mut value: *mut RawValue = ptr::null_mut();
        let err = unsafe {
            (self.symbols.exec_run)(executor.as_ptr(), workflow.as_ptr(), &mut prints, &mut value)
        };
        self.check(err)?;
        let value = NonNull::new(value);
        let prints = match unsafe { take_c_string(prints) } {
            Ok(text) => text,
            Err(error) => {
                if let Some(value) = value {
                    unsafe { (self.symbols.value_free)(value.as_ptr()) };
                }
                return Err(error);
            }
        };
        match value {
            Some(value) => Ok((prints, value)),
            None => Err(Error::Toolchain(String::from(
                "exec_run returned neither value nor error",
            ))),
        }
    }

    fn process_value(
        &self,
        executor: NonNull<RawExecutor>,
        value: NonNull<RawValue>,
        data_dir: &Path,
    ) -> Result<()> {
        let data_dir = path_to_c(data_dir)?;
        let err = unsafe {
            (self.symbols.exec_process)(executor.as_ptr(), value.as_ptr(), data_dir.as_ptr())
        };
        self.check(err)
    }

    fn value_needs_processing(&self, value: NonNull<RawValue>) -> bool {
        unsafe { (self.symbols.value_needs_processing)(value.as_ptr()) }
    }

    fn value_serialize(&self, value: NonNull<RawValue>, data_dir: &Path) -> Result<String> {
        let data_dir = path_to_c(data_dir)?;
        let mut buffer: *mut c_char = ptr::null_mut();
        let err = unsafe {
            (self.symbols.value_serialize)(value.as_ptr(), data_dir.as_ptr(), &mut buffer)
        };
        self.check(err)?;
        unsafe { take_c_string(buffer) }
    }

    fn free_value(&self, raw: NonNull<RawValue>) {
        unsafe { (self.symbols.value_free)(raw.as_ptr()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_library_fails_cleanly() {
        let err = DlToolchain::open("/nonexistent/libskiff_cli.so").unwrap_err();
        assert!(matches!(err, Error::LibraryLoad(_)), "got {err:?}");
    }

    #[test]
    fn open_non_library_file_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_library.so");
        std::fs::write(&path, b"definitely not an ELF").unwrap();
        let err = DlToolchain::open(&path).unwrap_err();
        assert!(matches!(err, Error::LibraryLoad(_)), "got {err:?}");
    }

    /// A real shared object without the Skiff entry points: resolution must
    /// fail with the missing symbol's name and drop the library again.
    #[test]
    #[cfg(target_os = "linux")]
    fn open_library_without_entry_points_reports_missing_symbol() {
        let err = DlToolchain::open("libc.so.6").unwrap_err();
        match err {
            Error::MissingSymbol { name, .. } => assert_eq!(name, "version"),
            other => panic!("expected MissingSymbol, got {other:?}"),
        }
    }

    #[test]
    fn path_to_c_round_trips_plain_paths() {
        let c = path_to_c(Path::new("/tmp/skiff-data")).unwrap();
        assert_eq!(c.to_str().unwrap(), "/tmp/skiff-data");
    }
}
