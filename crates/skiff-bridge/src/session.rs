//! Per-connection session: one compiler, one executor, and the fixed
//! construction sequence that produces them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::api::ToolchainApi;
use crate::error::Error;
use crate::handles::{Compiler, DataIndex, Executor, PackageIndex};

/// Which index was being fetched when construction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStage {
    Package,
    Data,
}

impl std::fmt::Display for IndexStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Package => f.write_str("package"),
            Self::Data => f.write_str("data"),
        }
    }
}

/// A failure during session construction.
///
/// By the time one of these surfaces, every handle created by the earlier
/// stages has already been freed, in reverse creation order.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to fetch the {stage} index: {source}")]
    Index {
        stage: IndexStage,
        #[source]
        source: Error,
    },

    #[error("failed to create the compiler: {0}")]
    Compiler(#[source] Error),

    #[error("failed to connect the executor: {0}")]
    Executor(#[source] Error),
}

/// Everything needed to construct a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote API endpoint the package and dataset indices are read from.
    pub api_endpoint: String,
    /// Remote endpoint workflows are executed against.
    pub exec_endpoint: String,
    /// Directory holding the certificates that authenticate us to the instance.
    pub trust_store_dir: PathBuf,
    /// Local directory where processed results are materialized.
    pub data_dir: PathBuf,
    /// Identity annotated onto every workflow as the result receiver.
    pub result_user: Option<String>,
}

/// A connected session: one stateful compiler and one remote executor.
///
/// Either fully constructed or not constructed at all: any failure during
/// [`Session::connect`] unwinds the handles created so far. Sessions move but
/// cannot be copied.
pub struct Session {
    // Field order is teardown order: the executor is released before the
    // compiler, the reverse of how they were acquired.
    pub(crate) executor: Executor,
    pub(crate) compiler: Compiler,
    pub(crate) data_dir: PathBuf,
    pub(crate) result_user: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("data_dir", &self.data_dir)
            .field("result_user", &self.result_user)
            .finish()
    }
}

impl Session {
    /// Run the four-stage construction sequence against the given toolchain.
    ///
    /// Order: package index, dataset index, compiler, executor. The two index
    /// handles are only held for the duration of this call; the compiler and
    /// executor keep their own references internally, so the bridge-side
    /// handles are released as soon as both constructors have succeeded.
    pub fn connect(
        api: &Arc<dyn ToolchainApi>,
        config: &SessionConfig,
    ) -> Result<Self, ConnectError> {
        tracing::info!(
            api = %config.api_endpoint,
            exec = %config.exec_endpoint,
            "connecting session"
        );

        let pindex =
            PackageIndex::fetch(api, &config.api_endpoint).map_err(|source| ConnectError::Index {
                stage: IndexStage::Package,
                source,
            })?;
        let dindex =
            DataIndex::fetch(api, &config.api_endpoint).map_err(|source| ConnectError::Index {
                stage: IndexStage::Data,
                source,
            })?;

        let compiler = Compiler::new(api, &pindex, &dindex).map_err(ConnectError::Compiler)?;
        let executor = Executor::connect(
            api,
            &config.exec_endpoint,
            &config.trust_store_dir,
            &pindex,
            &dindex,
        )
        .map_err(ConnectError::Executor)?;

        tracing::debug!("session connected; releasing index handles");
        Ok(Self {
            executor,
            compiler,
            data_dir: config.data_dir.clone(),
            result_user: config.result_user.clone(),
        })
        // `dindex` and `pindex` drop here, on success and on every `?` above.
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn result_user(&self) -> Option<&str> {
        self.result_user.as_deref()
    }
}
