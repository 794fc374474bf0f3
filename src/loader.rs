use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use rayon::prelude::*;

use crate::app::{App, AppId, AppState, QuirkSet, RefineFlags};
use crate::applist::AppList;
use crate::error::LoaderError;
use crate::event::PluginEvent;
use crate::job::JobContext;
use crate::plugin::{Capability, Category, Plugin, PluginError, PluginResult};
use crate::refine;
use crate::registry::ClaimRegistry;

struct PluginEntry {
    plugin: Box<dyn Plugin>,
    setup_ok: bool,
}

/// Diagnostic view of one registered plugin, for `doctor`-style output.
#[derive(Debug, Clone)]
pub struct PluginStatus {
    pub name: &'static str,
    pub priority: i32,
    pub enabled: bool,
    pub setup_ok: bool,
}

/// Discovers nothing by itself: plugins are registered, set up once, then
/// every logical request fans out to the eligible plugins in priority order,
/// joins the sub-calls, and merges their partial results deterministically.
///
/// One plugin failing a query sub-call never aborts its siblings; the
/// failure is recorded as an event. Mutating actions go to exactly one
/// plugin, the record's management plugin, and fail loudly.
pub struct PluginLoader {
    plugins: Vec<PluginEntry>,
    registry: ClaimRegistry,
    events: Mutex<Vec<PluginEvent>>,
    inflight: Mutex<HashSet<AppId>>,
    did_setup: bool,
}

impl PluginLoader {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            registry: ClaimRegistry::new(),
            events: Mutex::new(Vec::new()),
            inflight: Mutex::new(HashSet::new()),
            did_setup: false,
        }
    }

    /// Register a plugin. Only possible before `setup`.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        debug_assert!(!self.did_setup, "register after setup");
        self.plugins.push(PluginEntry {
            plugin,
            setup_ok: false,
        });
    }

    /// Run every enabled plugin's one-time setup. The `&mut` borrow is the
    /// exclusive setup phase: no dispatch can run concurrently with it.
    ///
    /// A plugin whose setup fails is recorded as an event and stays inert
    /// for the process lifetime; this is not an overall failure.
    pub fn setup(&mut self, job: &JobContext) -> Result<(), LoaderError> {
        // Deterministic fan-out and merge order.
        self.plugins.sort_by(|a, b| {
            a.plugin
                .priority()
                .cmp(&b.plugin.priority())
                .then_with(|| a.plugin.name().cmp(b.plugin.name()))
        });

        for entry in &mut self.plugins {
            if job.cancellable.is_cancelled() {
                return Err(LoaderError::Cancelled);
            }
            if !entry.plugin.enabled() {
                continue;
            }
            match entry.plugin.setup(job) {
                Ok(()) => entry.setup_ok = true,
                Err(PluginError::Cancelled) => return Err(LoaderError::Cancelled),
                Err(err) => {
                    self.events.lock().unwrap().push(PluginEvent::new(
                        entry.plugin.name(),
                        "setup",
                        err.to_string(),
                    ));
                }
            }
        }
        self.did_setup = true;
        Ok(())
    }

    pub fn status(&self) -> Vec<PluginStatus> {
        self.plugins
            .iter()
            .map(|entry| PluginStatus {
                name: entry.plugin.name(),
                priority: entry.plugin.priority(),
                enabled: entry.plugin.enabled(),
                setup_ok: entry.setup_ok,
            })
            .collect()
    }

    /// Recoverable per-plugin failures recorded since the last drain.
    pub fn take_events(&self) -> Vec<PluginEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub(crate) fn record_event(&self, event: PluginEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Enabled, set-up plugins implementing `cap`, in priority order.
    pub(crate) fn eligible(&self, cap: Capability) -> Vec<&dyn Plugin> {
        self.plugins
            .iter()
            .filter(|entry| {
                entry.setup_ok
                    && entry.plugin.enabled()
                    && entry.plugin.capabilities().contains(cap)
            })
            .map(|entry| entry.plugin.as_ref())
            .collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|entry| entry.setup_ok && entry.plugin.name() == name)
            .map(|entry| entry.plugin.as_ref())
    }

    /// Fan a query out to every eligible plugin on its own worker, join, and
    /// merge the partial lists in priority order. Per-plugin failures become
    /// events; a triggered cancellable becomes `Cancelled`.
    pub(crate) fn fan_out<F>(
        &self,
        op: &'static str,
        cap: Capability,
        job: &JobContext,
        f: F,
    ) -> Result<AppList, LoaderError>
    where
        F: Fn(&dyn Plugin, &mut AppList, &JobContext) -> PluginResult + Sync,
    {
        let eligible = self.eligible(cap);

        // collect() keeps input order, so the merge below follows plugin
        // priority regardless of which worker finished first.
        let partials: Vec<(&'static str, Result<AppList, PluginError>)> = eligible
            .par_iter()
            .map(|plugin| {
                // Sub-calls not yet started when cancellation lands are
                // skipped rather than dispatched.
                if job.cancellable.is_cancelled() {
                    return (plugin.name(), Err(PluginError::Cancelled));
                }
                let mut list = AppList::new();
                let result = f(*plugin, &mut list, job);
                (plugin.name(), result.map(|()| list))
            })
            .collect();

        if job.cancellable.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }

        let mut merged = AppList::new();
        for (name, partial) in partials {
            match partial {
                Ok(list) => merged.merge(list),
                Err(PluginError::Cancelled) => return Err(LoaderError::Cancelled),
                Err(err) => {
                    self.record_event(PluginEvent::new(name, op, err.to_string()));
                }
            }
        }

        self.adopt_pass(&merged);
        Ok(merged)
    }

    /// Offer every unclaimed record to the adopt-capable plugins in priority
    /// order; the first claim wins and the rest are not asked.
    pub(crate) fn adopt_pass(&self, list: &AppList) {
        let adopters = self.eligible(Capability::ADOPT);
        for app in list {
            if let Some(owner) = app.management_plugin() {
                // Claimed at creation time by the emitting plugin; keep the
                // registry as the single source of truth.
                self.registry.claim(app.id(), &owner);
                continue;
            }
            for plugin in &adopters {
                plugin.adopt(app);
                if let Some(owner) = app.management_plugin() {
                    self.registry.claim(app.id(), &owner);
                    break;
                }
            }
        }
    }

    pub fn search(&self, values: &[String], job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("search", Capability::SEARCH, job, |p, list, job| {
            p.search(values, list, job)
        })
    }

    pub fn search_by_file(&self, paths: &[String], job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("search-by-file", Capability::SEARCH_BY_FILE, job, |p, list, job| {
            p.search_by_file(paths, list, job)
        })
    }

    pub fn search_by_provides(&self, tags: &[String], job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out(
            "search-by-provides",
            Capability::SEARCH_BY_PROVIDES,
            job,
            |p, list, job| p.search_by_provides(tags, list, job),
        )
    }

    pub fn list_installed(&self, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("list-installed", Capability::LIST_INSTALLED, job, |p, list, job| {
            p.list_installed(list, job)
        })
    }

    pub fn list_updates(&self, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("list-updates", Capability::LIST_UPDATES, job, |p, list, job| {
            p.list_updates(list, job)
        })
    }

    pub fn list_updates_historical(&self, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out(
            "list-updates-historical",
            Capability::LIST_UPDATES_HISTORICAL,
            job,
            |p, list, job| p.list_updates_historical(list, job),
        )
    }

    pub fn list_sources(&self, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("list-sources", Capability::LIST_SOURCES, job, |p, list, job| {
            p.list_sources(list, job)
        })
    }

    pub fn list_distro_upgrades(&self, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out(
            "list-distro-upgrades",
            Capability::LIST_DISTRO_UPGRADES,
            job,
            |p, list, job| p.list_distro_upgrades(list, job),
        )
    }

    pub fn list_recent(&self, age_secs: u64, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("list-recent", Capability::LIST_RECENT, job, |p, list, job| {
            p.list_recent(age_secs, list, job)
        })
    }

    pub fn list_popular(&self, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("list-popular", Capability::LIST_POPULAR, job, |p, list, job| {
            p.list_popular(list, job)
        })
    }

    pub fn list_featured(&self, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("list-featured", Capability::LIST_FEATURED, job, |p, list, job| {
            p.list_featured(list, job)
        })
    }

    pub fn list_alternates(&self, app: &App, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("list-alternates", Capability::LIST_ALTERNATES, job, |p, list, job| {
            p.list_alternates(app, list, job)
        })
    }

    /// Language packs for `locale`, defaulting to the configured one.
    pub fn list_langpacks(
        &self,
        locale: Option<&str>,
        job: &JobContext,
    ) -> Result<AppList, LoaderError> {
        let locale = locale.unwrap_or(&job.settings.locale).to_string();
        self.fan_out("list-langpacks", Capability::LIST_LANGPACKS, job, |p, list, job| {
            p.list_langpacks(&locale, list, job)
        })
    }

    /// Category tree, deduplicated by category id across plugins.
    pub fn list_categories(&self, job: &JobContext) -> Result<Vec<Category>, LoaderError> {
        let eligible = self.eligible(Capability::LIST_CATEGORIES);
        let partials: Vec<(&'static str, Result<Vec<Category>, PluginError>)> = eligible
            .par_iter()
            .map(|plugin| {
                if job.cancellable.is_cancelled() {
                    return (plugin.name(), Err(PluginError::Cancelled));
                }
                let mut categories = Vec::new();
                let result = plugin.list_categories(&mut categories, job);
                (plugin.name(), result.map(|()| categories))
            })
            .collect();

        if job.cancellable.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }

        let mut merged: Vec<Category> = Vec::new();
        let mut seen = HashSet::new();
        for (name, partial) in partials {
            match partial {
                Ok(categories) => {
                    for category in categories {
                        if seen.insert(category.id.clone()) {
                            merged.push(category);
                        }
                    }
                }
                Err(PluginError::Cancelled) => return Err(LoaderError::Cancelled),
                Err(err) => {
                    self.record_event(PluginEvent::new(name, "list-categories", err.to_string()));
                }
            }
        }
        Ok(merged)
    }

    pub fn list_category_apps(
        &self,
        category: &Category,
        job: &JobContext,
    ) -> Result<AppList, LoaderError> {
        self.fan_out(
            "list-category-apps",
            Capability::LIST_CATEGORY_APPS,
            job,
            |p, list, job| p.list_category_apps(category, list, job),
        )
    }

    /// Resolve a local file. Zero plugins recognizing it is an empty list,
    /// not an error.
    pub fn file_to_app(&self, path: &Path, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("file-to-app", Capability::FILE_TO_APP, job, |p, list, job| {
            p.file_to_app(path, list, job)
        })
    }

    /// Resolve a URL such as `dummy://chiron`. Zero claims is an empty list.
    pub fn url_to_app(&self, url: &str, job: &JobContext) -> Result<AppList, LoaderError> {
        self.fan_out("url-to-app", Capability::URL_TO_APP, job, |p, list, job| {
            p.url_to_app(url, list, job)
        })
    }

    /// Batched metadata refine; see [`crate::refine`].
    pub fn refine(
        &self,
        list: &mut AppList,
        flags: RefineFlags,
        job: &JobContext,
    ) -> Result<(), LoaderError> {
        refine::run(self, list, flags, job)
    }

    /// Ask every refresh-capable plugin to bring its metadata up to date.
    /// `cache_age_secs` defaults to the configured threshold.
    pub fn refresh(&self, cache_age_secs: Option<u64>, job: &JobContext) -> Result<(), LoaderError> {
        let age = cache_age_secs.unwrap_or(job.settings.cache_age_secs);
        let eligible = self.eligible(Capability::REFRESH);
        let results: Vec<(&'static str, PluginResult)> = eligible
            .par_iter()
            .map(|plugin| {
                if job.cancellable.is_cancelled() {
                    return (plugin.name(), Err(PluginError::Cancelled));
                }
                (plugin.name(), plugin.refresh(age, job))
            })
            .collect();

        if job.cancellable.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }
        for (name, result) in results {
            match result {
                Ok(()) => {}
                Err(PluginError::Cancelled) => return Err(LoaderError::Cancelled),
                Err(err) => self.record_event(PluginEvent::new(name, "refresh", err.to_string())),
            }
        }
        Ok(())
    }

    /// Resolve the one plugin allowed to act on `app`.
    fn management_plugin_for(&self, app: &App) -> Result<&dyn Plugin, LoaderError> {
        let owner = app
            .management_plugin()
            .or_else(|| self.registry.owner(app.id()))
            .ok_or_else(|| LoaderError::Unmanaged(app.id().clone()))?;
        self.find(&owner)
            .ok_or_else(|| LoaderError::Unmanaged(app.id().clone()))
    }

    /// Mark `ids` as having an action in flight, rejecting if any already
    /// does. The guard releases them on drop.
    fn begin_flight(&self, ids: &[AppId]) -> Result<FlightGuard<'_>, LoaderError> {
        let mut inflight = self.inflight.lock().unwrap();
        for id in ids {
            if inflight.contains(id) {
                return Err(LoaderError::AlreadyInProgress(id.clone()));
            }
        }
        for id in ids {
            inflight.insert(id.clone());
        }
        Ok(FlightGuard {
            loader: self,
            ids: ids.to_vec(),
        })
    }

    /// Single-target mutating action: route to the management plugin under
    /// the single-flight guard, optionally entering a transient state that
    /// is recovered on failure or cancellation.
    fn act<F>(
        &self,
        op: &'static str,
        app: &App,
        transient: Option<AppState>,
        job: &JobContext,
        f: F,
    ) -> Result<(), LoaderError>
    where
        F: FnOnce(&dyn Plugin, &JobContext) -> PluginResult,
    {
        let plugin = self.management_plugin_for(app)?;
        let _guard = self.begin_flight(std::slice::from_ref(app.id()))?;
        if job.cancellable.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }
        if let Some(state) = transient {
            app.set_state(state);
        }
        match f(plugin, job) {
            Ok(()) => Ok(()),
            Err(PluginError::Cancelled) => {
                if transient.is_some() {
                    app.recover_state();
                }
                Err(LoaderError::Cancelled)
            }
            Err(err) => {
                if transient.is_some() {
                    app.recover_state();
                }
                Err(LoaderError::Action {
                    op,
                    app: app.id().clone(),
                    plugin: plugin.name().to_string(),
                    source: err,
                })
            }
        }
    }

    pub fn install(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("install", app, Some(AppState::Installing), job, |p, job| {
            p.install(app, job)
        })
    }

    pub fn remove(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("remove", app, Some(AppState::Removing), job, |p, job| {
            p.remove(app, job)
        })
    }

    /// Live-update one app. A proxy record is not updated itself; the action
    /// is redirected to each related entry's own management plugin.
    pub fn update_app(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        if app.has_quirk(QuirkSet::IS_PROXY) {
            for related in app.related() {
                self.update_app(&related, job)?;
            }
            return Ok(());
        }
        self.act("update", app, Some(AppState::Installing), job, |p, job| {
            p.update_app(app, job)
        })
    }

    pub fn download_app(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("download", app, None, job, |p, job| p.download_app(app, job))
    }

    pub fn upgrade_download(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("upgrade-download", app, None, job, |p, job| {
            p.upgrade_download(app, job)
        })
    }

    pub fn upgrade_trigger(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("upgrade-trigger", app, None, job, |p, job| {
            p.upgrade_trigger(app, job)
        })
    }

    pub fn update_cancel(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("update-cancel", app, None, job, |p, job| p.update_cancel(app, job))
    }

    pub fn set_rating(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("set-rating", app, None, job, |p, job| p.set_rating(app, job))
    }

    pub fn launch(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("launch", app, None, job, |p, job| p.launch(app, job))
    }

    pub fn add_shortcut(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("add-shortcut", app, None, job, |p, job| p.add_shortcut(app, job))
    }

    pub fn remove_shortcut(&self, app: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("remove-shortcut", app, None, job, |p, job| {
            p.remove_shortcut(app, job)
        })
    }

    pub fn install_repo(&self, repo: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("install-repo", repo, Some(AppState::Installing), job, |p, job| {
            p.install_repo(repo, job)
        })
    }

    pub fn remove_repo(&self, repo: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("remove-repo", repo, Some(AppState::Removing), job, |p, job| {
            p.remove_repo(repo, job)
        })
    }

    pub fn enable_repo(&self, repo: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("enable-repo", repo, None, job, |p, job| p.enable_repo(repo, job))
    }

    pub fn disable_repo(&self, repo: &App, job: &JobContext) -> Result<(), LoaderError> {
        self.act("disable-repo", repo, None, job, |p, job| p.disable_repo(repo, job))
    }

    /// Batched action over many records: group by management plugin, one
    /// call per plugin, all ids held in-flight for the duration.
    fn act_batched<F>(
        &self,
        op: &'static str,
        apps: &[App],
        job: &JobContext,
        f: F,
    ) -> Result<(), LoaderError>
    where
        F: Fn(&dyn Plugin, &[App], &JobContext) -> PluginResult,
    {
        let mut groups: HashMap<String, Vec<App>> = HashMap::new();
        for app in apps {
            let owner = app
                .management_plugin()
                .or_else(|| self.registry.owner(app.id()))
                .ok_or_else(|| LoaderError::Unmanaged(app.id().clone()))?;
            // Same eligibility rule as the single-target path: an owner that
            // never set up, or is not registered at all, cannot act.
            if self.find(&owner).is_none() {
                return Err(LoaderError::Unmanaged(app.id().clone()));
            }
            groups.entry(owner).or_default().push(app.clone());
        }

        let ids: Vec<AppId> = apps.iter().map(|app| app.id().clone()).collect();
        let _guard = self.begin_flight(&ids)?;

        // Priority order over the groups, for the same determinism as the
        // query path.
        for entry in &self.plugins {
            if !entry.setup_ok {
                continue;
            }
            let Some(group) = groups.get(entry.plugin.name()) else {
                continue;
            };
            if job.cancellable.is_cancelled() {
                return Err(LoaderError::Cancelled);
            }
            match f(entry.plugin.as_ref(), group, job) {
                Ok(()) => {}
                Err(PluginError::Cancelled) => return Err(LoaderError::Cancelled),
                Err(err) => {
                    return Err(LoaderError::Action {
                        op,
                        app: group[0].id().clone(),
                        plugin: entry.plugin.name().to_string(),
                        source: err,
                    })
                }
            }
        }
        Ok(())
    }

    /// Download many pending apps, one batched call per owning plugin.
    pub fn download(&self, apps: &[App], job: &JobContext) -> Result<(), LoaderError> {
        self.act_batched("download", apps, job, |p, group, job| p.download(group, job))
    }

    /// Schedule many apps for (typically offline) update.
    pub fn update(&self, apps: &[App], job: &JobContext) -> Result<(), LoaderError> {
        self.act_batched("update", apps, job, |p, group, job| p.update(group, job))
    }

    pub fn registry(&self) -> &ClaimRegistry {
        &self.registry
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

struct FlightGuard<'a> {
    loader: &'a PluginLoader,
    ids: Vec<AppId>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.loader.inflight.lock().unwrap();
        for id in &self.ids {
            inflight.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppKind;

    struct NamedPlugin {
        name: &'static str,
        priority: i32,
    }

    impl Plugin for NamedPlugin {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn capabilities(&self) -> Capability {
            Capability::SEARCH
        }
        fn search(&self, _values: &[String], list: &mut AppList, _job: &JobContext) -> PluginResult {
            let app = App::new(format!("{}::hit", self.name), AppKind::Desktop);
            app.set_management_plugin(self.name);
            list.add(app);
            Ok(())
        }
    }

    #[test]
    fn test_setup_orders_by_priority_then_name() {
        let mut loader = PluginLoader::new();
        loader.register(Box::new(NamedPlugin { name: "zeta", priority: 0 }));
        loader.register(Box::new(NamedPlugin { name: "alpha", priority: 1 }));
        loader.register(Box::new(NamedPlugin { name: "beta", priority: 0 }));
        loader.setup(&JobContext::new()).unwrap();

        let names: Vec<&str> = loader.status().iter().map(|s| s.name).collect();
        assert_eq!(names, ["beta", "zeta", "alpha"]);
    }

    #[test]
    fn test_query_before_setup_is_empty() {
        let mut loader = PluginLoader::new();
        loader.register(Box::new(NamedPlugin { name: "only", priority: 0 }));
        let job = JobContext::new();
        let list = loader.search(&["x".into()], &job).unwrap();
        assert!(list.is_empty());
        loader.setup(&job).unwrap();
        let list = loader.search(&["x".into()], &job).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_unmanaged_action_rejected() {
        let mut loader = PluginLoader::new();
        loader.setup(&JobContext::new()).unwrap();
        let app = App::new("nobody::owns-me", AppKind::Desktop);
        let err = loader.install(&app, &JobContext::new()).unwrap_err();
        assert!(matches!(err, LoaderError::Unmanaged(_)));
    }

    #[test]
    fn test_flight_guard_releases_on_drop() {
        let loader = PluginLoader::new();
        let id = AppId::from("x");
        {
            let _guard = loader.begin_flight(std::slice::from_ref(&id)).unwrap();
            assert!(matches!(
                loader.begin_flight(std::slice::from_ref(&id)),
                Err(LoaderError::AlreadyInProgress(_))
            ));
        }
        assert!(loader.begin_flight(std::slice::from_ref(&id)).is_ok());
    }
}
