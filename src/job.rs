use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::app::{App, AppId};
use crate::plugin::PluginError;
use crate::settings::Settings;

/// Shared cancellation flag for one logical request. One token is cloned into
/// every plugin sub-call; triggering it is observed by all of them. A caller
/// timeout is just the caller cancelling the token.
#[derive(Debug, Clone, Default)]
pub struct Cancellable {
    flag: Arc<AtomicBool>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// For use at suspension points inside plugin operations.
    pub fn check(&self) -> Result<(), PluginError> {
        if self.is_cancelled() {
            Err(PluginError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Coarse progress notification pushed by plugins during long actions.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub app: Option<AppId>,
    pub plugin: String,
    pub percent: u8,
}

/// Per-request context handed to every plugin call: the shared cancellation
/// token, an optional progress observer, and the persisted settings consumed
/// by the refresh and download families.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub cancellable: Cancellable,
    progress: Option<Sender<ProgressUpdate>>,
    pub settings: Settings,
}

impl JobContext {
    pub fn new() -> Self {
        Self {
            cancellable: Cancellable::new(),
            progress: None,
            settings: Settings::default(),
        }
    }

    pub fn with_cancellable(mut self, cancellable: Cancellable) -> Self {
        self.cancellable = cancellable;
        self
    }

    pub fn with_progress(mut self, sender: Sender<ProgressUpdate>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn check_cancelled(&self) -> Result<(), PluginError> {
        self.cancellable.check()
    }

    /// Update the record's progress value and notify the observer, if any.
    /// A closed observer channel is not an error; the update is dropped.
    pub fn report_progress(&self, plugin: &str, app: Option<&App>, percent: u8) {
        if let Some(app) = app {
            app.set_progress(percent);
        }
        if let Some(sender) = &self.progress {
            let _ = sender.send(ProgressUpdate {
                app: app.map(|a| a.id().clone()),
                plugin: plugin.to_string(),
                percent,
            });
        }
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}
