pub mod dummy;

use std::fmt;
use std::ops::BitOr;
use std::path::Path;

use thiserror::Error;

use crate::app::{App, RefineFlags};
use crate::applist::AppList;
use crate::job::JobContext;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PluginError::Cancelled)
    }
}

pub type PluginResult = Result<(), PluginError>;

/// Which operations a plugin implements, computed once at construction.
/// The loader uses this for eligibility instead of probing methods; a default
/// trait method body is only reached if a plugin claims a capability it does
/// not actually override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capability(u64);

impl Capability {
    pub const NONE: Capability = Capability(0);

    pub const SEARCH: Capability = Capability(1 << 0);
    pub const SEARCH_BY_FILE: Capability = Capability(1 << 1);
    pub const SEARCH_BY_PROVIDES: Capability = Capability(1 << 2);
    pub const LIST_INSTALLED: Capability = Capability(1 << 3);
    pub const LIST_UPDATES: Capability = Capability(1 << 4);
    pub const LIST_UPDATES_HISTORICAL: Capability = Capability(1 << 5);
    pub const LIST_SOURCES: Capability = Capability(1 << 6);
    pub const LIST_DISTRO_UPGRADES: Capability = Capability(1 << 7);
    pub const LIST_CATEGORIES: Capability = Capability(1 << 8);
    pub const LIST_CATEGORY_APPS: Capability = Capability(1 << 9);
    pub const LIST_RECENT: Capability = Capability(1 << 10);
    pub const LIST_POPULAR: Capability = Capability(1 << 11);
    pub const LIST_FEATURED: Capability = Capability(1 << 12);
    pub const LIST_ALTERNATES: Capability = Capability(1 << 13);
    pub const LIST_LANGPACKS: Capability = Capability(1 << 14);
    pub const FILE_TO_APP: Capability = Capability(1 << 15);
    pub const URL_TO_APP: Capability = Capability(1 << 16);

    pub const ADOPT: Capability = Capability(1 << 17);
    pub const REFINE: Capability = Capability(1 << 18);
    pub const REFINE_WILDCARD: Capability = Capability(1 << 19);
    pub const REFRESH: Capability = Capability(1 << 20);

    pub const INSTALL: Capability = Capability(1 << 21);
    pub const REMOVE: Capability = Capability(1 << 22);
    pub const UPDATE_APP: Capability = Capability(1 << 23);
    pub const DOWNLOAD_APP: Capability = Capability(1 << 24);
    pub const DOWNLOAD: Capability = Capability(1 << 25);
    pub const UPDATE: Capability = Capability(1 << 26);
    pub const UPGRADE_DOWNLOAD: Capability = Capability(1 << 27);
    pub const UPGRADE_TRIGGER: Capability = Capability(1 << 28);
    pub const UPDATE_CANCEL: Capability = Capability(1 << 29);
    pub const SET_RATING: Capability = Capability(1 << 30);
    pub const LAUNCH: Capability = Capability(1 << 31);
    pub const ADD_SHORTCUT: Capability = Capability(1 << 32);
    pub const REMOVE_SHORTCUT: Capability = Capability(1 << 33);
    pub const INSTALL_REPO: Capability = Capability(1 << 34);
    pub const REMOVE_REPO: Capability = Capability(1 << 35);
    pub const ENABLE_REPO: Capability = Capability(1 << 36);
    pub const DISABLE_REPO: Capability = Capability(1 << 37);

    pub fn contains(&self, other: Capability) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Capability {
    type Output = Capability;
    fn bitor(self, rhs: Capability) -> Capability {
        Capability(self.0 | rhs.0)
    }
}

/// A node in the category tree, e.g. Games or Internet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One backend (package manager, app store, repository format).
///
/// Every operation is independently implementable; the default bodies report
/// "not relevant" by succeeding without touching their outputs. Query
/// operations append records to the passed-in list; zero appends is success,
/// not an error. Mutating actions operate on exactly one record (or a list
/// for `download`/`update`), are only ever called by the loader on the
/// record's management plugin, and must leave the record in a terminal
/// lifecycle state on completion.
///
/// Long-running operations should report progress through the job context
/// and observe its cancellation token at suspension points.
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tie-break rank for fan-out order and merge precedence. Lower runs
    /// first.
    fn priority(&self) -> i32 {
        0
    }

    /// Decided once at construction, before setup. A disabled plugin never
    /// receives `setup` or any dispatch.
    fn enabled(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capability;

    /// Fallible one-time initialization. The loader guarantees nothing else
    /// runs concurrently. Not called when disabled; on failure the plugin is
    /// inert for the rest of the process lifetime.
    fn setup(&self, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Offered an unclaimed record; claim it with
    /// [`App::set_management_plugin`] if recognized. Must be idempotent and
    /// side-effect-free when the record is not recognized.
    fn adopt(&self, app: &App) {}

    fn search(&self, values: &[String], list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn search_by_file(&self, paths: &[String], list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn search_by_provides(&self, tags: &[String], list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_installed(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_updates(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Updates that were just applied, e.g. after an offline update run.
    fn list_updates_historical(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_sources(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_distro_upgrades(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_categories(&self, categories: &mut Vec<Category>, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_category_apps(&self, category: &Category, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Apps with upstream releases within the last `age_secs` seconds.
    fn list_recent(&self, age_secs: u64, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_popular(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_featured(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Other packagings of the same application, e.g. a flatpak build of a
    /// distro package.
    fn list_alternates(&self, app: &App, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn list_langpacks(&self, locale: &str, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// At most one plugin is expected to recognize a given file.
    fn file_to_app(&self, path: &Path, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// At most one plugin is expected to recognize a given URL scheme.
    fn url_to_app(&self, url: &str, list: &mut AppList, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Fill in `flags` for the records in `list` that are missing them, in
    /// one batched pass. Must check each record's refined mask and must not
    /// clear fields that are already populated.
    fn refine(&self, list: &AppList, flags: RefineFlags, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Produce concrete records matching the wildcard `app` into `list`.
    /// New records only; the wildcard itself is never mutated.
    fn refine_wildcard(
        &self,
        app: &App,
        list: &mut AppList,
        flags: RefineFlags,
        job: &JobContext,
    ) -> PluginResult {
        Ok(())
    }

    /// Refresh backend metadata if older than `cache_age_secs`.
    fn refresh(&self, cache_age_secs: u64, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn install(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn remove(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn update_app(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn download_app(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Batched download of this plugin's share of a pending update set.
    fn download(&self, apps: &[App], job: &JobContext) -> PluginResult {
        Ok(())
    }

    /// Batched (typically offline) update of this plugin's share of a set.
    fn update(&self, apps: &[App], job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn upgrade_download(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn upgrade_trigger(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn update_cancel(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn set_rating(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn launch(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn add_shortcut(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn remove_shortcut(&self, app: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn install_repo(&self, repo: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn remove_repo(&self, repo: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn enable_repo(&self, repo: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }

    fn disable_repo(&self, repo: &App, job: &JobContext) -> PluginResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_contains() {
        let caps = Capability::SEARCH | Capability::REFINE | Capability::INSTALL;
        assert!(caps.contains(Capability::SEARCH));
        assert!(caps.contains(Capability::SEARCH | Capability::INSTALL));
        assert!(!caps.contains(Capability::REMOVE));
        assert!(Capability::NONE.is_empty());
    }

    #[test]
    fn test_default_methods_are_not_relevant() {
        struct Inert;
        impl Plugin for Inert {
            fn name(&self) -> &'static str {
                "inert"
            }
            fn capabilities(&self) -> Capability {
                Capability::NONE
            }
        }

        let plugin = Inert;
        let job = JobContext::new();
        let mut list = AppList::new();
        assert!(plugin.search(&["x".into()], &mut list, &job).is_ok());
        assert!(plugin.list_installed(&mut list, &job).is_ok());
        assert!(list.is_empty());
    }
}
