//! End-to-end loader behaviour with in-memory fake plugins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use appdepot::app::{App, AppKind, AppState, QuirkSet, RefineFlags};
use appdepot::applist::AppList;
use appdepot::job::{Cancellable, JobContext};
use appdepot::loader::PluginLoader;
use appdepot::plugin::{Capability, Plugin, PluginError, PluginResult};
use appdepot::LoaderError;

/// A configurable backend for exercising fan-out, adoption, refine and
/// action routing without touching any real package manager.
struct FakePlugin {
    name: &'static str,
    priority: i32,
    caps: Capability,
    enabled: bool,
    fail_setup: bool,
    fail_search: bool,
    search_hits: Vec<(&'static str, Option<&'static str>)>,
    adopt_prefix: Option<&'static str>,
    adopt_calls: Arc<AtomicUsize>,
    refine_calls: Arc<AtomicUsize>,
    search_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    download_calls: Arc<AtomicUsize>,
    install_barrier: Option<Arc<Barrier>>,
    hang_search: Option<Arc<Barrier>>,
    fail_install: bool,
}

impl FakePlugin {
    fn new(name: &'static str, priority: i32, caps: Capability) -> Self {
        Self {
            name,
            priority,
            caps,
            enabled: true,
            fail_setup: false,
            fail_search: false,
            search_hits: Vec::new(),
            adopt_prefix: None,
            adopt_calls: Arc::new(AtomicUsize::new(0)),
            refine_calls: Arc::new(AtomicUsize::new(0)),
            search_calls: Arc::new(AtomicUsize::new(0)),
            update_calls: Arc::new(AtomicUsize::new(0)),
            download_calls: Arc::new(AtomicUsize::new(0)),
            install_barrier: None,
            hang_search: None,
            fail_install: false,
        }
    }

    fn with_hits(mut self, hits: &[(&'static str, Option<&'static str>)]) -> Self {
        self.search_hits = hits.to_vec();
        self
    }
}

impl Plugin for FakePlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn capabilities(&self) -> Capability {
        self.caps
    }

    fn setup(&self, _job: &JobContext) -> PluginResult {
        if self.fail_setup {
            return Err(PluginError::Failed("init failed".into()));
        }
        Ok(())
    }

    fn adopt(&self, app: &App) {
        self.adopt_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(prefix) = self.adopt_prefix {
            if app.id().as_str().starts_with(prefix) {
                app.set_management_plugin(self.name);
            }
        }
    }

    fn search(&self, _values: &[String], list: &mut AppList, job: &JobContext) -> PluginResult {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.hang_search {
            // Announce entry, then block until the caller cancels.
            barrier.wait();
            loop {
                job.check_cancelled()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if self.fail_search {
            return Err(PluginError::Failed("backend unavailable".into()));
        }
        for (id, license) in &self.search_hits {
            let app = App::new(*id, AppKind::Desktop);
            app.set_state(AppState::Available);
            app.set_management_plugin(self.name);
            if let Some(license) = license {
                app.set_license(*license);
            }
            list.add(app);
        }
        Ok(())
    }

    fn refine(&self, list: &AppList, flags: RefineFlags, _job: &JobContext) -> PluginResult {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        for app in list.iter() {
            let missing = app.missing_refine_flags(flags);
            if missing.contains(RefineFlags::LICENSE) {
                app.set_license("GPL-2.0+");
            }
            if missing.contains(RefineFlags::RATING) {
                app.set_rating(75);
            }
        }
        Ok(())
    }

    fn refine_wildcard(
        &self,
        app: &App,
        list: &mut AppList,
        _flags: RefineFlags,
        _job: &JobContext,
    ) -> PluginResult {
        let concrete = App::new(
            format!("{}::{}", self.name, app.id().as_str()),
            AppKind::Desktop,
        );
        concrete.set_state(AppState::Available);
        concrete.set_management_plugin(self.name);
        list.add(concrete);
        Ok(())
    }

    fn install(&self, app: &App, job: &JobContext) -> PluginResult {
        if let Some(barrier) = &self.install_barrier {
            // First rendezvous announces the action is in flight, second one
            // lets it finish.
            barrier.wait();
            barrier.wait();
        }
        job.check_cancelled()?;
        if self.fail_install {
            return Err(PluginError::Failed("no space left".into()));
        }
        app.set_state(AppState::Installed);
        Ok(())
    }

    fn update_app(&self, app: &App, _job: &JobContext) -> PluginResult {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        app.set_state(AppState::Installed);
        Ok(())
    }

    fn download(&self, _apps: &[App], _job: &JobContext) -> PluginResult {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn setup_loader(plugins: Vec<FakePlugin>) -> PluginLoader {
    let mut loader = PluginLoader::new();
    for plugin in plugins {
        loader.register(Box::new(plugin));
    }
    loader.setup(&JobContext::new()).unwrap();
    loader
}

#[test]
fn search_merges_and_dedups_across_plugins() {
    let high = FakePlugin::new("high", 0, Capability::SEARCH)
        .with_hits(&[("shared::app", Some("GPL-2.0+")), ("high::only", None)]);
    let low = FakePlugin::new("low", 10, Capability::SEARCH)
        .with_hits(&[("shared::app", Some("MIT")), ("low::only", None)]);
    let loader = setup_loader(vec![low, high]);

    let job = JobContext::new();
    let list = loader.search(&["app".into()], &job).unwrap();

    assert_eq!(list.len(), 3);
    let shared = list.lookup(&"shared::app".into()).unwrap();
    // Higher-priority plugin's value wins the collision.
    assert_eq!(shared.license().as_deref(), Some("GPL-2.0+"));
    assert_eq!(shared.management_plugin().as_deref(), Some("high"));
}

#[test]
fn merge_is_a_non_destructive_union() {
    let licensed = FakePlugin::new("licensed", 0, Capability::SEARCH)
        .with_hits(&[("shared::app", Some("Apache-2.0"))]);
    let mut rated = FakePlugin::new("rated", 1, Capability::SEARCH);
    rated.search_hits = vec![("shared::app", None)];
    let loader = setup_loader(vec![licensed, rated]);

    let job = JobContext::new();
    let list = loader.search(&["app".into()], &job).unwrap();
    let app = list.lookup(&"shared::app".into()).unwrap();
    app.set_rating(50);

    assert_eq!(app.license().as_deref(), Some("Apache-2.0"));
    assert_eq!(app.rating(), Some(50));
    assert!(app
        .refined()
        .contains(RefineFlags::LICENSE | RefineFlags::RATING));
}

#[test]
fn adoption_stops_at_the_first_claim() {
    // Unclaimed at creation: the searcher does not set a management plugin.
    struct OrphanSearcher;
    impl Plugin for OrphanSearcher {
        fn name(&self) -> &'static str {
            "orphan-searcher"
        }
        fn capabilities(&self) -> Capability {
            Capability::SEARCH
        }
        fn search(&self, _v: &[String], list: &mut AppList, _j: &JobContext) -> PluginResult {
            list.add(App::new("orphan::app", AppKind::Desktop));
            Ok(())
        }
    }

    let mut first = FakePlugin::new("first", 1, Capability::ADOPT);
    first.adopt_prefix = Some("orphan::");
    let first_calls = first.adopt_calls.clone();
    let mut second = FakePlugin::new("second", 2, Capability::ADOPT);
    second.adopt_prefix = Some("orphan::");
    let second_calls = second.adopt_calls.clone();

    let mut loader = PluginLoader::new();
    loader.register(Box::new(OrphanSearcher));
    loader.register(Box::new(first));
    loader.register(Box::new(second));
    loader.setup(&JobContext::new()).unwrap();

    let job = JobContext::new();
    let list = loader.search(&["app".into()], &job).unwrap();
    let app = list.lookup(&"orphan::app".into()).unwrap();

    assert_eq!(app.management_plugin().as_deref(), Some("first"));
    assert_eq!(loader.registry().owner(app.id()).as_deref(), Some("first"));
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    // The claim was made before the lower-priority adopter was asked.
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn refine_is_one_call_per_plugin_regardless_of_size() {
    let refiner = FakePlugin::new("refiner", 0, Capability::REFINE);
    let calls = refiner.refine_calls.clone();
    let loader = setup_loader(vec![refiner]);

    let mut list: AppList = (0..50)
        .map(|i| App::new(format!("pkg::app-{}", i), AppKind::Desktop))
        .collect();
    let job = JobContext::new();
    loader
        .refine(&mut list, RefineFlags::LICENSE | RefineFlags::RATING, &job)
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for app in list.iter() {
        assert_eq!(app.license().as_deref(), Some("GPL-2.0+"));
        assert_eq!(app.rating(), Some(75));
    }
}

#[test]
fn refine_of_refined_collection_does_no_work() {
    let refiner = FakePlugin::new("refiner", 0, Capability::REFINE);
    let calls = refiner.refine_calls.clone();
    let loader = setup_loader(vec![refiner]);

    let mut list = AppList::new();
    list.add(App::new("pkg::one", AppKind::Desktop));
    let job = JobContext::new();
    loader.refine(&mut list, RefineFlags::LICENSE, &job).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Everything requested is present now, so no plugin is called again.
    loader.refine(&mut list, RefineFlags::LICENSE, &job).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn wildcard_records_are_expanded_and_dropped() {
    let expander = FakePlugin::new(
        "expander",
        0,
        Capability::REFINE_WILDCARD | Capability::ADOPT,
    );
    let loader = setup_loader(vec![expander]);

    let mut list = AppList::new();
    list.add(App::new_wildcard("gimp"));
    list.add(App::new("pkg::plain", AppKind::Desktop));

    let job = JobContext::new();
    loader.refine(&mut list, RefineFlags::NONE, &job).unwrap();

    assert_eq!(list.len(), 2);
    assert!(list.lookup(&"expander::gimp".into()).is_some());
    assert!(list.lookup(&"gimp".into()).is_none());
    assert!(list.wildcards().is_empty());
}

#[test]
fn one_failing_plugin_does_not_abort_the_fan_out() {
    let mut plugins = Vec::new();
    for (i, name) in ["p0", "p1", "p2", "p3"].iter().enumerate() {
        let mut plugin = FakePlugin::new(name, i as i32, Capability::SEARCH);
        plugin.search_hits = vec![match i {
            0 => ("p0::hit", None),
            1 => ("p1::hit", None),
            2 => ("p2::hit", None),
            _ => ("p3::hit", None),
        }];
        plugins.push(plugin);
    }
    let mut broken = FakePlugin::new("broken", 99, Capability::SEARCH);
    broken.fail_search = true;
    plugins.push(broken);
    let loader = setup_loader(plugins);

    let job = JobContext::new();
    let list = loader.search(&["hit".into()], &job).unwrap();
    assert_eq!(list.len(), 4);

    let events = loader.take_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plugin, "broken");
    assert_eq!(events[0].op, "search");
    assert!(events[0].message.contains("backend unavailable"));
    // Draining is destructive.
    assert!(loader.take_events().is_empty());
}

#[test]
fn cancelled_fan_out_is_distinguishable_from_failure() {
    let mut plugin = FakePlugin::new("p", 0, Capability::SEARCH);
    plugin.search_hits = vec![("p::hit", None)];
    let loader = setup_loader(vec![plugin]);

    let cancellable = Cancellable::new();
    cancellable.cancel();
    let job = JobContext::new().with_cancellable(cancellable);

    let err = loader.search(&["hit".into()], &job).unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn setup_failure_leaves_the_plugin_inert() {
    let mut broken = FakePlugin::new("broken", 0, Capability::SEARCH);
    broken.fail_setup = true;
    broken.search_hits = vec![("broken::hit", None)];
    let broken_searches = broken.search_calls.clone();
    let mut healthy = FakePlugin::new("healthy", 1, Capability::SEARCH);
    healthy.search_hits = vec![("healthy::hit", None)];

    let loader = setup_loader(vec![broken, healthy]);
    let events = loader.take_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].op, "setup");

    let job = JobContext::new();
    let list = loader.search(&["hit".into()], &job).unwrap();
    assert_eq!(list.len(), 1);
    assert!(list.lookup(&"healthy::hit".into()).is_some());
    assert_eq!(broken_searches.load(Ordering::SeqCst), 0);
}

#[test]
fn disabled_plugin_is_never_dispatched() {
    let mut disabled = FakePlugin::new("disabled", 0, Capability::SEARCH);
    disabled.enabled = false;
    disabled.search_hits = vec![("disabled::hit", None)];
    let disabled_searches = disabled.search_calls.clone();

    let loader = setup_loader(vec![disabled]);
    let status = loader.status();
    assert!(!status[0].enabled);
    assert!(!status[0].setup_ok);

    let job = JobContext::new();
    let list = loader.search(&["hit".into()], &job).unwrap();
    assert!(list.is_empty());
    assert_eq!(disabled_searches.load(Ordering::SeqCst), 0);
}

#[test]
fn duplicate_action_on_the_same_record_is_rejected() {
    let mut plugin = FakePlugin::new("p", 0, Capability::INSTALL);
    let barrier = Arc::new(Barrier::new(2));
    plugin.install_barrier = Some(barrier.clone());
    let loader = setup_loader(vec![plugin]);

    let app = App::new("p::app", AppKind::Desktop);
    app.set_state(AppState::Available);
    app.set_management_plugin("p");

    std::thread::scope(|scope| {
        let first = scope.spawn(|| loader.install(&app, &JobContext::new()));
        // The first install is parked inside the plugin, holding the flight.
        barrier.wait();
        let second = loader.install(&app, &JobContext::new());
        assert!(matches!(second, Err(LoaderError::AlreadyInProgress(_))));
        barrier.wait();
        first.join().unwrap().unwrap();
    });

    assert_eq!(app.state(), AppState::Installed);
}

#[test]
fn failed_install_recovers_the_previous_state() {
    let mut plugin = FakePlugin::new("p", 0, Capability::INSTALL);
    plugin.fail_install = true;
    let loader = setup_loader(vec![plugin]);

    let app = App::new("p::app", AppKind::Desktop);
    app.set_state(AppState::Available);
    app.set_management_plugin("p");

    let err = loader.install(&app, &JobContext::new()).unwrap_err();
    assert!(matches!(err, LoaderError::Action { op: "install", .. }));
    assert!(err.to_string().contains("no space left"));
    assert_eq!(app.state(), AppState::Available);
}

#[test]
fn cancelled_install_recovers_the_previous_state() {
    let plugin = FakePlugin::new("p", 0, Capability::INSTALL);
    let loader = setup_loader(vec![plugin]);

    let app = App::new("p::app", AppKind::Desktop);
    app.set_state(AppState::Available);
    app.set_management_plugin("p");

    let cancellable = Cancellable::new();
    let job = JobContext::new().with_cancellable(cancellable.clone());
    cancellable.cancel();

    let err = loader.install(&app, &job).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(app.state(), AppState::Available);
}

#[test]
fn proxy_update_is_redirected_to_related_records() {
    let plugin = FakePlugin::new("p", 0, Capability::UPDATE_APP);
    let updates = plugin.update_calls.clone();
    let loader = setup_loader(vec![plugin]);

    let proxy = App::new("p::proxy", AppKind::Generic);
    proxy.add_quirk(QuirkSet::IS_PROXY);
    for id in ["p::member-a", "p::member-b"] {
        let member = App::new(id, AppKind::Desktop);
        member.set_state(AppState::Updatable);
        member.set_management_plugin("p");
        proxy.add_related(member);
    }

    loader.update_app(&proxy, &JobContext::new()).unwrap();
    assert_eq!(updates.load(Ordering::SeqCst), 2);
    for member in proxy.related() {
        assert_eq!(member.state(), AppState::Installed);
    }
}

#[test]
fn cancellation_mid_flight_skips_unstarted_sub_calls() {
    let barrier = Arc::new(Barrier::new(2));
    let mut hanging = FakePlugin::new("hanging", 0, Capability::SEARCH);
    hanging.hang_search = Some(barrier.clone());
    let mut idle = FakePlugin::new("idle", 1, Capability::SEARCH);
    idle.search_hits = vec![("idle::hit", None)];
    let idle_calls = idle.search_calls.clone();
    let loader = setup_loader(vec![hanging, idle]);

    let cancellable = Cancellable::new();
    let job = JobContext::new().with_cancellable(cancellable.clone());

    // One worker thread serializes the sub-calls: the hanging plugin is
    // entered first, the idle one has not started when cancellation lands.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap();
    std::thread::scope(|scope| {
        let worker = scope.spawn(|| pool.install(|| loader.search(&["hit".into()], &job)));
        barrier.wait();
        cancellable.cancel();
        let err = worker.join().unwrap().unwrap_err();
        assert!(err.is_cancelled());
    });

    assert_eq!(idle_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn batched_action_rejects_an_inert_owner() {
    let mut broken = FakePlugin::new("broken", 0, Capability::DOWNLOAD);
    broken.fail_setup = true;
    let downloads = broken.download_calls.clone();
    let loader = setup_loader(vec![broken]);

    let app = App::new("broken::app", AppKind::Desktop);
    app.set_state(AppState::Updatable);
    app.set_management_plugin("broken");

    let err = loader
        .download(std::slice::from_ref(&app), &JobContext::new())
        .unwrap_err();
    assert!(matches!(err, LoaderError::Unmanaged(_)));
    assert_eq!(downloads.load(Ordering::SeqCst), 0);
}

#[test]
fn batched_action_rejects_an_unknown_owner() {
    let plugin = FakePlugin::new("p", 0, Capability::DOWNLOAD);
    let loader = setup_loader(vec![plugin]);

    let app = App::new("ghost::app", AppKind::Desktop);
    app.set_management_plugin("ghost");

    let err = loader
        .download(std::slice::from_ref(&app), &JobContext::new())
        .unwrap_err();
    assert!(matches!(err, LoaderError::Unmanaged(_)));
}

#[test]
fn batched_action_is_one_call_per_owning_plugin() {
    let left = FakePlugin::new("left", 0, Capability::DOWNLOAD);
    let left_downloads = left.download_calls.clone();
    let right = FakePlugin::new("right", 1, Capability::DOWNLOAD);
    let right_downloads = right.download_calls.clone();
    let loader = setup_loader(vec![left, right]);

    let mut apps = Vec::new();
    for (owner, component) in [
        ("left", "a"),
        ("left", "b"),
        ("right", "c"),
    ] {
        let app = App::new(format!("{}::{}", owner, component), AppKind::Desktop);
        app.set_state(AppState::Updatable);
        app.set_management_plugin(owner);
        apps.push(app);
    }

    loader.download(&apps, &JobContext::new()).unwrap();
    assert_eq!(left_downloads.load(Ordering::SeqCst), 1);
    assert_eq!(right_downloads.load(Ordering::SeqCst), 1);
}

#[test]
fn action_on_an_unclaimed_record_fails_loudly() {
    let plugin = FakePlugin::new("p", 0, Capability::INSTALL);
    let loader = setup_loader(vec![plugin]);

    let app = App::new("nobody::app", AppKind::Desktop);
    let err = loader.install(&app, &JobContext::new()).unwrap_err();
    assert!(matches!(err, LoaderError::Unmanaged(_)));
}
