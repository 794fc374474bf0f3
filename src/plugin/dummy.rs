use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::app::{App, AppKind, AppState, QuirkSet, RefineFlags};
use crate::applist::AppList;
use crate::job::JobContext;
use crate::plugin::{Capability, Plugin, PluginError, PluginResult};

const ORIGIN: &str = "dummy";

/// Deterministic in-memory backend used by the CLI and the test suite.
///
/// It manages a tiny fixed catalog. Two magic search terms exercise the
/// loader's failure paths: "hang" blocks until cancelled and "fail" returns
/// an error.
pub struct DummyPlugin {
    installed: Mutex<HashSet<String>>,
    enabled: bool,
}

impl DummyPlugin {
    pub fn new() -> Self {
        let mut installed = HashSet::new();
        installed.insert("zeus".to_string());
        Self {
            installed: Mutex::new(installed),
            // Decided once at construction, like the capability mask.
            enabled: std::env::var_os("APPDEPOT_DUMMY_DISABLE").is_none(),
        }
    }

    fn qualified(component: &str) -> String {
        format!("{}::{}", ORIGIN, component)
    }

    fn catalog() -> &'static [(&'static str, &'static str, &'static str)] {
        // component, name, summary
        &[
            ("chiron", "Chiron", "A teaching application"),
            ("zeus", "Zeus", "A weather application"),
            ("mate-spell", "Spell", "A spelling application"),
        ]
    }

    fn make_app(&self, component: &str, name: &str, summary: &str) -> App {
        let app = App::new(Self::qualified(component), AppKind::Desktop);
        app.set_name(name);
        app.set_summary(summary);
        app.set_origin(ORIGIN);
        app.set_management_plugin(self.name());
        if self.installed.lock().unwrap().contains(component) {
            app.set_state(AppState::Installed);
        } else {
            app.set_state(AppState::Available);
        }
        app
    }

    /// Simulate a slow backend: sleep in small slices, reporting progress
    /// and observing the cancellation token.
    fn delay(&self, app: Option<&App>, total_ms: u64, job: &JobContext) -> PluginResult {
        let slices = 10;
        for step in 0..=slices {
            job.check_cancelled()?;
            job.report_progress(self.name(), app, (step * 100 / slices) as u8);
            if step < slices {
                thread::sleep(Duration::from_millis(total_ms / slices as u64));
            }
        }
        Ok(())
    }

    fn component_of(id: &str) -> Option<&str> {
        id.strip_prefix("dummy::")
    }
}

impl Default for DummyPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for DummyPlugin {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn capabilities(&self) -> Capability {
        Capability::SEARCH
            | Capability::LIST_INSTALLED
            | Capability::LIST_UPDATES
            | Capability::LIST_SOURCES
            | Capability::LIST_POPULAR
            | Capability::ADOPT
            | Capability::REFINE
            | Capability::REFINE_WILDCARD
            | Capability::URL_TO_APP
            | Capability::REFRESH
            | Capability::INSTALL
            | Capability::REMOVE
            | Capability::UPDATE_APP
            | Capability::LAUNCH
    }

    fn adopt(&self, app: &App) {
        if Self::component_of(app.id().as_str()).is_some() {
            app.set_management_plugin(self.name());
        }
    }

    fn search(&self, values: &[String], list: &mut AppList, job: &JobContext) -> PluginResult {
        for value in values {
            if value == "hang" {
                // Block until the caller cancels.
                loop {
                    job.check_cancelled()?;
                    thread::sleep(Duration::from_millis(10));
                }
            }
            if value == "fail" {
                return Err(PluginError::Failed("search was requested to fail".into()));
            }
        }

        let matcher = SkimMatcherV2::default();
        for (component, name, summary) in Self::catalog() {
            job.check_cancelled()?;
            let hit = values.iter().any(|value| {
                matcher.fuzzy_match(name, value).is_some()
                    || matcher.fuzzy_match(component, value).is_some()
            });
            if hit {
                list.add(self.make_app(component, name, summary));
            }
        }
        Ok(())
    }

    fn list_installed(&self, list: &mut AppList, _job: &JobContext) -> PluginResult {
        for (component, name, summary) in Self::catalog() {
            if self.installed.lock().unwrap().contains(*component) {
                list.add(self.make_app(component, name, summary));
            }
        }
        Ok(())
    }

    fn list_updates(&self, list: &mut AppList, job: &JobContext) -> PluginResult {
        job.check_cancelled()?;

        let update = self.make_app("mate-spell", "Spell", "A spelling application");
        update.set_state(AppState::Updatable);
        update.set_version("3.02.70");
        list.add(update);

        // A proxy row standing in for several related updates.
        let proxy = App::new(Self::qualified("proxy"), AppKind::Desktop);
        proxy.set_name("Proxy");
        proxy.set_summary("A proxy app");
        proxy.set_origin(ORIGIN);
        proxy.add_quirk(QuirkSet::IS_PROXY);
        proxy.set_state(AppState::Updatable);
        proxy.set_management_plugin(self.name());
        for component in ["proxy-maia", "proxy-lyra"] {
            let related = App::new(Self::qualified(component), AppKind::Desktop);
            related.set_state(AppState::Updatable);
            related.set_origin(ORIGIN);
            related.set_management_plugin(self.name());
            proxy.add_related(related);
        }
        list.add(proxy);
        Ok(())
    }

    fn list_sources(&self, list: &mut AppList, _job: &JobContext) -> PluginResult {
        let repo = App::new(Self::qualified("repo"), AppKind::Repository);
        repo.set_name("Dummy Repo");
        repo.set_summary("Sample software source");
        repo.set_origin(ORIGIN);
        repo.set_state(AppState::Installed);
        repo.set_management_plugin(self.name());
        repo.add_quirk(QuirkSet::PROVENANCE);
        list.add(repo);
        Ok(())
    }

    fn list_popular(&self, list: &mut AppList, _job: &JobContext) -> PluginResult {
        list.add(self.make_app("chiron", "Chiron", "A teaching application"));
        list.add(self.make_app("zeus", "Zeus", "A weather application"));
        Ok(())
    }

    fn url_to_app(&self, url: &str, list: &mut AppList, _job: &JobContext) -> PluginResult {
        let Some(component) = url.strip_prefix("dummy://") else {
            return Ok(());
        };
        if component.is_empty() {
            return Ok(());
        }
        let app = App::new(Self::qualified(component), AppKind::Desktop);
        app.set_name(component);
        app.set_origin(ORIGIN);
        app.set_state(AppState::Available);
        app.set_management_plugin(self.name());
        list.add(app);
        Ok(())
    }

    fn refine(&self, list: &AppList, flags: RefineFlags, job: &JobContext) -> PluginResult {
        // One batched pass over the whole collection; per record only the
        // still-missing fields are touched.
        for app in list {
            job.check_cancelled()?;
            if Self::component_of(app.id().as_str()).is_none() {
                continue;
            }
            let missing = app.missing_refine_flags(flags);
            if missing.is_empty() {
                continue;
            }
            if missing.contains(RefineFlags::LICENSE) {
                app.set_license("GPL-2.0+");
            }
            if missing.contains(RefineFlags::DESCRIPTION) {
                app.set_description("A verbose description for a sample application.");
            }
            if missing.contains(RefineFlags::SIZE) {
                app.set_sizes(350 * 1024, 4 * 1024 * 1024);
            }
            if missing.contains(RefineFlags::VERSION) {
                app.set_version("1.2.3");
            }
            if missing.contains(RefineFlags::ORIGIN) {
                app.set_origin(ORIGIN);
            }
            if missing.contains(RefineFlags::RATING) {
                app.set_rating(75);
            }
            if missing.contains(RefineFlags::CATEGORIES) {
                app.set_categories(vec!["Utility".to_string()]);
            }
        }
        Ok(())
    }

    fn refine_wildcard(
        &self,
        app: &App,
        list: &mut AppList,
        _flags: RefineFlags,
        job: &JobContext,
    ) -> PluginResult {
        job.check_cancelled()?;
        let wanted = app.id().as_str();
        for (component, name, summary) in Self::catalog() {
            if *component == wanted {
                // A fresh concrete record; the wildcard is never mutated.
                list.add(self.make_app(component, name, summary));
            }
        }
        Ok(())
    }

    fn refresh(&self, _cache_age_secs: u64, job: &JobContext) -> PluginResult {
        self.delay(None, 50, job)
    }

    fn install(&self, app: &App, job: &JobContext) -> PluginResult {
        let Some(component) = Self::component_of(app.id().as_str()) else {
            return Err(PluginError::NotFound(app.id().to_string()));
        };
        self.delay(Some(app), 100, job)?;
        self.installed.lock().unwrap().insert(component.to_string());
        app.set_state(AppState::Installed);
        Ok(())
    }

    fn remove(&self, app: &App, job: &JobContext) -> PluginResult {
        let Some(component) = Self::component_of(app.id().as_str()) else {
            return Err(PluginError::NotFound(app.id().to_string()));
        };
        self.delay(Some(app), 100, job)?;
        self.installed.lock().unwrap().remove(component);
        app.set_state(AppState::Available);
        Ok(())
    }

    fn update_app(&self, app: &App, job: &JobContext) -> PluginResult {
        self.delay(Some(app), 100, job)?;
        app.set_state(AppState::Installed);
        Ok(())
    }

    fn launch(&self, app: &App, _job: &JobContext) -> PluginResult {
        if Self::component_of(app.id().as_str()).is_some() {
            Ok(())
        } else {
            Err(PluginError::NotFound(app.id().to_string()))
        }
    }
}
