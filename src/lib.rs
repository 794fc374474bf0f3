//! Plugin-loader core for a software center.
//!
//! Backends (package managers, app stores, repository formats) implement the
//! [`plugin::Plugin`] trait. The [`loader::PluginLoader`] fans each logical
//! request out to every eligible plugin, tolerates individual failures,
//! merges the partial results into one deduplicated [`applist::AppList`],
//! and routes install/remove/update actions to the one plugin that manages
//! a given record.

pub mod app;
pub mod applist;
pub mod cli;
pub mod error;
pub mod event;
pub mod job;
pub mod loader;
pub mod output;
pub mod plugin;
mod refine;
pub mod registry;
pub mod settings;

pub use app::{App, AppId, AppKind, AppState, QuirkSet, RefineFlags};
pub use applist::AppList;
pub use error::LoaderError;
pub use event::PluginEvent;
pub use job::{Cancellable, JobContext, ProgressUpdate};
pub use loader::PluginLoader;
pub use plugin::{Capability, Plugin, PluginError};
pub use settings::Settings;
