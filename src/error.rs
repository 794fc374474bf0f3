use thiserror::Error;

use crate::app::AppId;
use crate::plugin::PluginError;

/// Loader-level outcomes surfaced to callers.
///
/// Per-plugin failures during a query fan-out are not errors at this level;
/// they are recorded as [`crate::event::PluginEvent`]s and the fan-out
/// continues. Only cancellation and single-target action failures reach the
/// caller directly.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("cancelled")]
    Cancelled,

    #[error("an operation is already in progress for '{0}'")]
    AlreadyInProgress(AppId),

    #[error("no plugin manages '{0}'")]
    Unmanaged(AppId),

    #[error("{op} of '{app}' failed in plugin '{plugin}': {source}")]
    Action {
        op: &'static str,
        app: AppId,
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoaderError::Cancelled)
    }
}
