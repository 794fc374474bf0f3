use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Stable unique id of an application record, conventionally `origin::component`,
/// e.g. `dummy::chiron` or `flatpak::org.gimp.GIMP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    Unknown,
    Desktop,
    Runtime,
    Repository,
    OsUpgrade,
    Generic,
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppKind::Unknown => write!(f, "unknown"),
            AppKind::Desktop => write!(f, "desktop"),
            AppKind::Runtime => write!(f, "runtime"),
            AppKind::Repository => write!(f, "repository"),
            AppKind::OsUpgrade => write!(f, "os-upgrade"),
            AppKind::Generic => write!(f, "generic"),
        }
    }
}

/// Lifecycle state of a record. Transitions are monotonic within one action:
/// transient states (`Installing`, `Removing`) remember the state they came
/// from so a failed action can recover it instead of skipping ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    Unknown,
    Available,
    Installing,
    Installed,
    Updatable,
    Removing,
    Unavailable,
}

impl AppState {
    pub fn is_transient(&self) -> bool {
        matches!(self, AppState::Installing | AppState::Removing)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Unknown => write!(f, "unknown"),
            AppState::Available => write!(f, "available"),
            AppState::Installing => write!(f, "installing"),
            AppState::Installed => write!(f, "installed"),
            AppState::Updatable => write!(f, "updatable"),
            AppState::Removing => write!(f, "removing"),
            AppState::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Orthogonal behaviour flags on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuirkSet(u32);

impl QuirkSet {
    pub const NONE: QuirkSet = QuirkSet(0);
    /// The record stands in for its related apps; actions are redirected.
    pub const IS_PROXY: QuirkSet = QuirkSet(1 << 0);
    /// Template record to be expanded into concrete matches, never acted on.
    pub const IS_WILDCARD: QuirkSet = QuirkSet(1 << 1);
    /// The record comes from a configured, trusted origin.
    pub const PROVENANCE: QuirkSet = QuirkSet(1 << 2);
    /// Cannot be removed by the user.
    pub const COMPULSORY: QuirkSet = QuirkSet(1 << 3);
    /// Applying the action needs a reboot to finish.
    pub const NEEDS_REBOOT: QuirkSet = QuirkSet(1 << 4);

    pub fn contains(&self, other: QuirkSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: QuirkSet) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: QuirkSet) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for QuirkSet {
    type Output = QuirkSet;
    fn bitor(self, rhs: QuirkSet) -> QuirkSet {
        QuirkSet(self.0 | rhs.0)
    }
}

/// Which optional metadata fields a refine request wants, and which a record
/// already has. Plugins prune their work against the record's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefineFlags(u32);

impl RefineFlags {
    pub const NONE: RefineFlags = RefineFlags(0);
    pub const LICENSE: RefineFlags = RefineFlags(1 << 0);
    pub const DESCRIPTION: RefineFlags = RefineFlags(1 << 1);
    pub const RATING: RefineFlags = RefineFlags(1 << 2);
    pub const SIZE: RefineFlags = RefineFlags(1 << 3);
    pub const VERSION: RefineFlags = RefineFlags(1 << 4);
    pub const ORIGIN: RefineFlags = RefineFlags(1 << 5);
    pub const CATEGORIES: RefineFlags = RefineFlags(1 << 6);

    pub fn contains(&self, other: RefineFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: RefineFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: RefineFlags) {
        self.0 |= other.0;
    }

    /// Flags in `self` that are not in `other`.
    pub fn difference(&self, other: RefineFlags) -> RefineFlags {
        RefineFlags(self.0 & !other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RefineFlags {
    type Output = RefineFlags;
    fn bitor(self, rhs: RefineFlags) -> RefineFlags {
        RefineFlags(self.0 | rhs.0)
    }
}

/// Optional metadata, populated by refine.
#[derive(Debug, Clone, Default)]
struct AppFields {
    name: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    version: Option<String>,
    license: Option<String>,
    origin: Option<String>,
    rating: Option<u8>,
    size_download: Option<u64>,
    size_installed: Option<u64>,
    categories: Vec<String>,
}

#[derive(Debug)]
struct StateCell {
    current: AppState,
    recover: Option<AppState>,
}

#[derive(Debug)]
struct AppInner {
    id: AppId,
    kind: AppKind,
    state: Mutex<StateCell>,
    quirks: Mutex<QuirkSet>,
    refined: Mutex<RefineFlags>,
    progress: AtomicU8,
    management_plugin: Mutex<Option<String>>,
    related: Mutex<Vec<App>>,
    fields: Mutex<AppFields>,
}

/// A shared handle to one application record. Clones are cheap and refer to
/// the same record, so the same app can sit in several collections while an
/// action thread updates its state and progress.
#[derive(Debug, Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    pub fn new(id: impl Into<AppId>, kind: AppKind) -> Self {
        Self {
            inner: Arc::new(AppInner {
                id: id.into(),
                kind,
                state: Mutex::new(StateCell {
                    current: AppState::Unknown,
                    recover: None,
                }),
                quirks: Mutex::new(QuirkSet::NONE),
                refined: Mutex::new(RefineFlags::NONE),
                progress: AtomicU8::new(0),
                management_plugin: Mutex::new(None),
                related: Mutex::new(Vec::new()),
                fields: Mutex::new(AppFields::default()),
            }),
        }
    }

    /// A wildcard record to be expanded by refine, never acted on directly.
    pub fn new_wildcard(id: impl Into<AppId>) -> Self {
        let app = Self::new(id, AppKind::Unknown);
        app.add_quirk(QuirkSet::IS_WILDCARD);
        app
    }

    pub fn id(&self) -> &AppId {
        &self.inner.id
    }

    pub fn kind(&self) -> AppKind {
        self.inner.kind
    }

    /// Two handles to the same underlying record.
    pub fn same_record(&self, other: &App) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn state(&self) -> AppState {
        self.inner.state.lock().unwrap().current
    }

    /// Set the lifecycle state. Entering a transient state remembers the
    /// previous state; reaching a terminal state clears the recovery point.
    pub fn set_state(&self, state: AppState) {
        let mut cell = self.inner.state.lock().unwrap();
        if state == cell.current {
            return;
        }
        if state.is_transient() {
            if cell.recover.is_none() {
                cell.recover = Some(cell.current);
            }
        } else {
            cell.recover = None;
        }
        cell.current = state;
    }

    /// Undo a transient state after a failed or cancelled action.
    pub fn recover_state(&self) {
        let mut cell = self.inner.state.lock().unwrap();
        if let Some(prev) = cell.recover.take() {
            cell.current = prev;
        }
    }

    pub fn progress(&self) -> u8 {
        self.inner.progress.load(Ordering::Relaxed)
    }

    pub fn set_progress(&self, percent: u8) {
        self.inner.progress.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn quirks(&self) -> QuirkSet {
        *self.inner.quirks.lock().unwrap()
    }

    pub fn has_quirk(&self, quirk: QuirkSet) -> bool {
        self.quirks().contains(quirk)
    }

    pub fn add_quirk(&self, quirk: QuirkSet) {
        self.inner.quirks.lock().unwrap().insert(quirk);
    }

    pub fn remove_quirk(&self, quirk: QuirkSet) {
        self.inner.quirks.lock().unwrap().remove(quirk);
    }

    pub fn refined(&self) -> RefineFlags {
        *self.inner.refined.lock().unwrap()
    }

    pub fn add_refined(&self, flags: RefineFlags) {
        self.inner.refined.lock().unwrap().insert(flags);
    }

    /// Requested fields this record is still missing.
    pub fn missing_refine_flags(&self, requested: RefineFlags) -> RefineFlags {
        requested.difference(self.refined())
    }

    pub fn management_plugin(&self) -> Option<String> {
        self.inner.management_plugin.lock().unwrap().clone()
    }

    /// Record which plugin manages this app. First writer wins; the loader's
    /// claim registry is the authority and this is the record's non-owning
    /// back-reference.
    pub fn set_management_plugin(&self, plugin: &str) {
        let mut slot = self.inner.management_plugin.lock().unwrap();
        if slot.is_none() {
            *slot = Some(plugin.to_string());
        }
    }

    pub fn add_related(&self, app: App) {
        let mut related = self.inner.related.lock().unwrap();
        if !related.iter().any(|a| a.id() == app.id()) {
            related.push(app);
        }
    }

    pub fn related(&self) -> Vec<App> {
        self.inner.related.lock().unwrap().clone()
    }

    pub fn name(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let mut fields = self.inner.fields.lock().unwrap();
        if fields.name.is_none() {
            fields.name = Some(name.into());
        }
    }

    pub fn summary(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().summary.clone()
    }

    pub fn set_summary(&self, summary: impl Into<String>) {
        let mut fields = self.inner.fields.lock().unwrap();
        if fields.summary.is_none() {
            fields.summary = Some(summary.into());
        }
    }

    pub fn description(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().description.clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        {
            let mut fields = self.inner.fields.lock().unwrap();
            if fields.description.is_none() {
                fields.description = Some(description.into());
            }
        }
        self.add_refined(RefineFlags::DESCRIPTION);
    }

    pub fn version(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().version.clone()
    }

    pub fn set_version(&self, version: impl Into<String>) {
        {
            let mut fields = self.inner.fields.lock().unwrap();
            if fields.version.is_none() {
                fields.version = Some(version.into());
            }
        }
        self.add_refined(RefineFlags::VERSION);
    }

    pub fn license(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().license.clone()
    }

    pub fn set_license(&self, license: impl Into<String>) {
        {
            let mut fields = self.inner.fields.lock().unwrap();
            if fields.license.is_none() {
                fields.license = Some(license.into());
            }
        }
        self.add_refined(RefineFlags::LICENSE);
    }

    pub fn origin(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().origin.clone()
    }

    pub fn set_origin(&self, origin: impl Into<String>) {
        {
            let mut fields = self.inner.fields.lock().unwrap();
            if fields.origin.is_none() {
                fields.origin = Some(origin.into());
            }
        }
        self.add_refined(RefineFlags::ORIGIN);
    }

    pub fn rating(&self) -> Option<u8> {
        self.inner.fields.lock().unwrap().rating
    }

    pub fn set_rating(&self, rating: u8) {
        {
            let mut fields = self.inner.fields.lock().unwrap();
            if fields.rating.is_none() {
                fields.rating = Some(rating.min(100));
            }
        }
        self.add_refined(RefineFlags::RATING);
    }

    pub fn size_download(&self) -> Option<u64> {
        self.inner.fields.lock().unwrap().size_download
    }

    pub fn size_installed(&self) -> Option<u64> {
        self.inner.fields.lock().unwrap().size_installed
    }

    pub fn set_sizes(&self, download: u64, installed: u64) {
        {
            let mut fields = self.inner.fields.lock().unwrap();
            if fields.size_download.is_none() {
                fields.size_download = Some(download);
            }
            if fields.size_installed.is_none() {
                fields.size_installed = Some(installed);
            }
        }
        self.add_refined(RefineFlags::SIZE);
    }

    pub fn categories(&self) -> Vec<String> {
        self.inner.fields.lock().unwrap().categories.clone()
    }

    pub fn set_categories(&self, categories: Vec<String>) {
        {
            let mut fields = self.inner.fields.lock().unwrap();
            if fields.categories.is_empty() {
                fields.categories = categories;
            }
        }
        self.add_refined(RefineFlags::CATEGORIES);
    }

    /// Non-destructive union with another record of the same id: fields that
    /// are set here win, unset fields are taken from `other`. The state only
    /// merges from `Unknown` to a known state, and masks are unioned.
    pub fn merge(&self, other: &App) {
        debug_assert_eq!(self.id(), other.id());
        if self.same_record(other) {
            return;
        }

        {
            let theirs = other.inner.fields.lock().unwrap().clone();
            let mut ours = self.inner.fields.lock().unwrap();
            if ours.name.is_none() {
                ours.name = theirs.name;
            }
            if ours.summary.is_none() {
                ours.summary = theirs.summary;
            }
            if ours.description.is_none() {
                ours.description = theirs.description;
            }
            if ours.version.is_none() {
                ours.version = theirs.version;
            }
            if ours.license.is_none() {
                ours.license = theirs.license;
            }
            if ours.origin.is_none() {
                ours.origin = theirs.origin;
            }
            if ours.rating.is_none() {
                ours.rating = theirs.rating;
            }
            if ours.size_download.is_none() {
                ours.size_download = theirs.size_download;
            }
            if ours.size_installed.is_none() {
                ours.size_installed = theirs.size_installed;
            }
            if ours.categories.is_empty() {
                ours.categories = theirs.categories;
            }
        }

        if self.state() == AppState::Unknown {
            let their_state = other.state();
            if their_state != AppState::Unknown {
                self.set_state(their_state);
            }
        }
        self.add_quirk(other.quirks());
        self.add_refined(other.refined());
        if let Some(plugin) = other.management_plugin() {
            self.set_management_plugin(&plugin);
        }
        let mut seen: HashSet<AppId> =
            self.related().iter().map(|a| a.id().clone()).collect();
        for rel in other.related() {
            if seen.insert(rel.id().clone()) {
                self.add_related(rel);
            }
        }
    }

    /// Plain copy of the record for serialization and display.
    pub fn snapshot(&self) -> AppSnapshot {
        AppSnapshot {
            id: self.id().clone(),
            kind: self.kind(),
            state: self.state(),
            name: self.name(),
            summary: self.summary(),
            description: self.description(),
            version: self.version(),
            license: self.license(),
            origin: self.origin(),
            rating: self.rating(),
            size_download: self.size_download(),
            size_installed: self.size_installed(),
            categories: self.categories(),
            progress: self.progress(),
            management_plugin: self.management_plugin(),
        }
    }
}

/// Immutable copy of a record, for output formatting.
#[derive(Debug, Clone, Serialize)]
pub struct AppSnapshot {
    pub id: AppId,
    pub kind: AppKind,
    pub state: AppState,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub license: Option<String>,
    pub origin: Option<String>,
    pub rating: Option<u8>,
    pub size_download: Option<u64>,
    pub size_installed: Option<u64>,
    pub categories: Vec<String>,
    pub progress: u8,
    pub management_plugin: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_id_from_owned_and_borrowed() {
        let owned = App::new(format!("{}::{}", "dummy", "chiron"), AppKind::Desktop);
        let borrowed = App::new("dummy::chiron", AppKind::Desktop);
        assert_eq!(owned.id(), borrowed.id());
    }

    #[test]
    fn test_state_recovery_on_failed_install() {
        let app = App::new("dummy::chiron", AppKind::Desktop);
        app.set_state(AppState::Available);
        app.set_state(AppState::Installing);
        assert_eq!(app.state(), AppState::Installing);
        app.recover_state();
        assert_eq!(app.state(), AppState::Available);
    }

    #[test]
    fn test_terminal_state_clears_recovery() {
        let app = App::new("dummy::chiron", AppKind::Desktop);
        app.set_state(AppState::Available);
        app.set_state(AppState::Installing);
        app.set_state(AppState::Installed);
        app.recover_state();
        assert_eq!(app.state(), AppState::Installed);
    }

    #[test]
    fn test_management_plugin_first_writer_wins() {
        let app = App::new("dummy::chiron", AppKind::Desktop);
        app.set_management_plugin("dummy");
        app.set_management_plugin("other");
        assert_eq!(app.management_plugin().as_deref(), Some("dummy"));
    }

    #[test]
    fn test_merge_is_non_destructive() {
        let a = App::new("x", AppKind::Desktop);
        a.set_license("GPL-2.0+");
        let b = App::new("x", AppKind::Desktop);
        b.set_rating(80);
        b.set_license("MIT");

        a.merge(&b);
        assert_eq!(a.license().as_deref(), Some("GPL-2.0+"));
        assert_eq!(a.rating(), Some(80));
        assert!(a.refined().contains(RefineFlags::LICENSE | RefineFlags::RATING));
    }

    #[test]
    fn test_merge_state_only_from_unknown() {
        let a = App::new("x", AppKind::Desktop);
        let b = App::new("x", AppKind::Desktop);
        b.set_state(AppState::Installed);
        a.merge(&b);
        assert_eq!(a.state(), AppState::Installed);

        let c = App::new("x", AppKind::Desktop);
        c.set_state(AppState::Available);
        a.merge(&c);
        assert_eq!(a.state(), AppState::Installed);
    }

    #[test]
    fn test_quirk_set_ops() {
        let app = App::new("x", AppKind::Desktop);
        assert!(!app.has_quirk(QuirkSet::IS_PROXY));
        app.add_quirk(QuirkSet::IS_PROXY | QuirkSet::PROVENANCE);
        assert!(app.has_quirk(QuirkSet::IS_PROXY));
        assert!(app.has_quirk(QuirkSet::PROVENANCE));
        app.remove_quirk(QuirkSet::PROVENANCE);
        assert!(!app.has_quirk(QuirkSet::PROVENANCE));
        assert!(app.has_quirk(QuirkSet::IS_PROXY));
    }

    #[test]
    fn test_missing_refine_flags() {
        let app = App::new("x", AppKind::Desktop);
        app.set_license("MIT");
        let missing = app.missing_refine_flags(RefineFlags::LICENSE | RefineFlags::SIZE);
        assert!(!missing.contains(RefineFlags::LICENSE));
        assert!(missing.contains(RefineFlags::SIZE));
    }

    #[test]
    fn test_progress_clamped() {
        let app = App::new("x", AppKind::Desktop);
        app.set_progress(250);
        assert_eq!(app.progress(), 100);
    }

    #[test]
    fn test_related_dedup() {
        let parent = App::new("proxy", AppKind::Desktop);
        parent.add_related(App::new("a", AppKind::Desktop));
        parent.add_related(App::new("a", AppKind::Desktop));
        parent.add_related(App::new("b", AppKind::Desktop));
        assert_eq!(parent.related().len(), 2);
    }
}
