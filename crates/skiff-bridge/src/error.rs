//! Error types for skiff-bridge.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiVersion;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the bridge itself.
///
/// These are distinct from source diagnostics: a snippet that fails to
/// compile is reported through [`SourceDiagnostics`](crate::SourceDiagnostics),
/// never through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// The toolchain library could not be mapped into the process.
    #[error("failed to load toolchain library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// A required entry point was absent from the loaded library.
    #[error("toolchain library is missing required symbol `{name}`: {source}")]
    MissingSymbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// The toolchain reported a version string that is not `major.minor.patch`.
    #[error("toolchain reported malformed version string `{0}`")]
    MalformedVersion(String),

    /// The loaded toolchain implements a different ABI than this bridge.
    #[error("toolchain ABI version {found} is incompatible with supported version {supported}")]
    VersionMismatch {
        found: ApiVersion,
        supported: ApiVersion,
    },

    /// The toolchain returned an error handle; its rendered message is carried here.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// A path had to cross the C boundary but is not valid UTF-8.
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    /// The toolchain returned text that is not valid UTF-8.
    #[error("toolchain returned a non-UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Caller-supplied text contains an interior NUL and cannot cross the C boundary.
    #[error("string contains an interior NUL byte: {0}")]
    InteriorNul(#[from] std::ffi::NulError),
}
