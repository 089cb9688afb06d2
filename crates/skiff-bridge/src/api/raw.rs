//! Raw FFI surface of the Skiff toolchain library.
//!
//! This module defines the opaque handle types and the function pointer
//! signatures of every entry point the bridge resolves at load time. The
//! toolchain gives no guarantees about the layout behind any of these
//! pointers; they are only meaningful as arguments to the matching calls.

use std::os::raw::c_char;

macro_rules! opaque {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(C)]
        pub struct $name {
            _private: [u8; 0],
        }
    };
}

opaque! {
    /// A toolchain error carrying a renderable message.
    RawError
}
opaque! {
    /// The three-slot diagnostics bundle produced by compilation:
    /// source warnings, source errors, and a non-source internal error.
    RawSourceDiagnostics
}
opaque! {
    /// An index of the packages available on the remote instance.
    ///
    /// Internally reference-counted by the toolchain; freeing the bridge's
    /// reference after handing it to a constructor is safe.
    RawPackageIndex
}
opaque! {
    /// An index of the datasets available on the remote instance.
    ///
    /// Reference-counted like [`RawPackageIndex`].
    RawDataIndex
}
opaque! {
    /// A compiled, executable workflow. Single-use.
    RawWorkflow
}
opaque! {
    /// A SkiffScript compiler. Stateful across successive compiles.
    RawCompiler
}
opaque! {
    /// The return value of one executed workflow.
    RawValue
}
opaque! {
    /// A remote executor connected to a running instance.
    RawExecutor
}

// Entry point signatures, ABI v3.
//
// Conventions: constructors write their product through an out-pointer and
// return a `*mut RawError` that is null on success. Serializers write a
// `malloc`-allocated C string through an out-pointer; the caller releases it
// with `libc::free`. `version` returns a static string that must NOT be freed.

pub type VersionFn = unsafe extern "C" fn() -> *const c_char;
pub type SetForceColourFn = unsafe extern "C" fn(bool);

pub type ErrorFreeFn = unsafe extern "C" fn(*mut RawError);
pub type ErrorSerializeFn = unsafe extern "C" fn(*mut RawError, *mut *mut c_char);

pub type SdiagFreeFn = unsafe extern "C" fn(*mut RawSourceDiagnostics);
pub type SdiagHasFn = unsafe extern "C" fn(*mut RawSourceDiagnostics) -> bool;
/// Renders source warnings/errors with the originating `(label, source)` pair.
pub type SdiagSerializeSourceFn =
    unsafe extern "C" fn(*mut RawSourceDiagnostics, *const c_char, *const c_char, *mut *mut c_char);
pub type SdiagSerializeInternalFn =
    unsafe extern "C" fn(*mut RawSourceDiagnostics, *mut *mut c_char);

pub type PindexNewRemoteFn =
    unsafe extern "C" fn(*const c_char, *mut *mut RawPackageIndex) -> *mut RawError;
pub type PindexFreeFn = unsafe extern "C" fn(*mut RawPackageIndex);
pub type DindexNewRemoteFn =
    unsafe extern "C" fn(*const c_char, *mut *mut RawDataIndex) -> *mut RawError;
pub type DindexFreeFn = unsafe extern "C" fn(*mut RawDataIndex);

pub type WorkflowFreeFn = unsafe extern "C" fn(*mut RawWorkflow);
pub type WorkflowDisassembleFn =
    unsafe extern "C" fn(*mut RawWorkflow, *mut *mut c_char) -> *mut RawError;
pub type WorkflowSetUserFn = unsafe extern "C" fn(*mut RawWorkflow, *const c_char);

pub type CompilerNewFn = unsafe extern "C" fn(
    *mut RawPackageIndex,
    *mut RawDataIndex,
    *mut *mut RawCompiler,
) -> *mut RawError;
pub type CompilerFreeFn = unsafe extern "C" fn(*mut RawCompiler);
/// Always returns a diagnostics bundle; the workflow out-pointer stays null
/// when compilation produced no executable result.
pub type CompilerCompileFn = unsafe extern "C" fn(
    *mut RawCompiler,
    *const c_char,
    *const c_char,
    *mut *mut RawWorkflow,
) -> *mut RawSourceDiagnostics;

pub type ValueFreeFn = unsafe extern "C" fn(*mut RawValue);
pub type ValueNeedsProcessingFn = unsafe extern "C" fn(*mut RawValue) -> bool;
pub type ValueSerializeFn =
    unsafe extern "C" fn(*mut RawValue, *const c_char, *mut *mut c_char) -> *mut RawError;

pub type ExecNewFn = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    *mut RawPackageIndex,
    *mut RawDataIndex,
    *mut *mut RawExecutor,
) -> *mut RawError;
pub type ExecFreeFn = unsafe extern "C" fn(*mut RawExecutor);
pub type ExecRunFn = unsafe extern "C" fn(
    *mut RawExecutor,
    *mut RawWorkflow,
    *mut *mut c_char,
    *mut *mut RawValue,
) -> *mut RawError;
pub type ExecProcessFn =
    unsafe extern "C" fn(*mut RawExecutor, *mut RawValue, *const c_char) -> *mut RawError;
