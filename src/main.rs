use std::collections::HashMap;
use std::sync::mpsc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;

use appdepot::app::{App, AppId, AppSnapshot, AppState, RefineFlags};
use appdepot::applist::AppList;
use appdepot::cli::{Cli, Command};
use appdepot::job::{JobContext, ProgressUpdate};
use appdepot::loader::PluginLoader;
use appdepot::output::{Formatter, OutputFormat};
use appdepot::plugin::dummy::DummyPlugin;
use appdepot::settings::Settings;

fn full_refine_flags() -> RefineFlags {
    RefineFlags::LICENSE
        | RefineFlags::DESCRIPTION
        | RefineFlags::RATING
        | RefineFlags::SIZE
        | RefineFlags::VERSION
        | RefineFlags::ORIGIN
        | RefineFlags::CATEGORIES
}

fn print_stats(apps: &[AppSnapshot], format: OutputFormat) -> Result<()> {
    let mut counts: HashMap<AppState, usize> = HashMap::new();
    for app in apps {
        *counts.entry(app.state).or_insert(0) += 1;
    }

    if format == OutputFormat::Json {
        let stats_obj: HashMap<String, usize> = counts
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let json = serde_json::to_string_pretty(&stats_obj)?;
        eprintln!("{}", json);
    } else {
        let states = [
            AppState::Installed,
            AppState::Updatable,
            AppState::Available,
            AppState::Unavailable,
            AppState::Unknown,
        ];
        let parts: Vec<String> = states
            .iter()
            .map(|s| format!("{} {}", counts.get(s).unwrap_or(&0), s))
            .collect();
        let total: usize = counts.values().sum();
        eprintln!("Stats: {} ({} total)", parts.join(", "), total);
    }

    Ok(())
}

fn print_events(loader: &PluginLoader) {
    for event in loader.take_events() {
        eprintln!(
            "appdepot: warning: plugin '{}' {} failed: {}",
            event.plugin, event.op, event.message
        );
    }
}

fn snapshots(list: &AppList) -> Vec<AppSnapshot> {
    list.iter().map(|app| app.snapshot()).collect()
}

/// Find a record by exact id, looking at installed apps first and then at
/// search results for the id's component part.
fn resolve_app(loader: &PluginLoader, id: &str, job: &JobContext) -> Result<Option<App>> {
    let target = AppId::from(id);
    let installed = loader.list_installed(job)?;
    if let Some(app) = installed.lookup(&target) {
        return Ok(Some(app.clone()));
    }
    let component = id.rsplit("::").next().unwrap_or(id).to_string();
    let results = loader.search(&[component], job)?;
    Ok(results.lookup(&target).cloned())
}

/// Run a mutating action with live progress echoed to stderr.
fn with_progress<F>(job: &JobContext, f: F) -> Result<(), appdepot::LoaderError>
where
    F: FnOnce(&JobContext) -> Result<(), appdepot::LoaderError>,
{
    let (tx, rx) = mpsc::channel::<ProgressUpdate>();
    let printer = std::thread::spawn(move || {
        for update in rx {
            match &update.app {
                Some(id) => eprint!("\r{}: {:>3}%", id, update.percent),
                None => eprint!("\r{:>3}%", update.percent),
            }
        }
        eprintln!();
    });
    let result = {
        let job = job.clone().with_progress(tx);
        f(&job)
    };
    let _ = printer.join();
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "appdepot", &mut std::io::stdout());
        return Ok(());
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow::anyhow!("failed to load settings: {}", e))?,
        None => Settings::load(),
    };

    let mut loader = PluginLoader::new();
    loader.register(Box::new(DummyPlugin::new()));

    let job = JobContext::new().with_settings(settings);
    loader.setup(&job)?;

    let formatter = Formatter::new(cli.format, cli.no_color);

    match cli.command {
        Command::Installed => {
            let mut list = loader.list_installed(&job)?;
            loader.refine(&mut list, full_refine_flags(), &job)?;
            let apps = snapshots(&list);
            formatter.format_list(&apps, &mut std::io::stdout())?;
            if cli.stats {
                print_stats(&apps, cli.format)?;
            }
        }
        Command::Updates => {
            let list = loader.list_updates(&job)?;
            let apps = snapshots(&list);
            formatter.format_list(&apps, &mut std::io::stdout())?;
            if cli.stats {
                print_stats(&apps, cli.format)?;
            }
        }
        Command::Sources => {
            let list = loader.list_sources(&job)?;
            formatter.format_list(&snapshots(&list), &mut std::io::stdout())?;
        }
        Command::Popular => {
            let list = loader.list_popular(&job)?;
            formatter.format_list(&snapshots(&list), &mut std::io::stdout())?;
        }
        Command::Search { terms } => {
            let mut list = loader.search(&terms, &job)?;
            loader.refine(&mut list, full_refine_flags(), &job)?;
            let apps = snapshots(&list);
            formatter.format_list(&apps, &mut std::io::stdout())?;
            if cli.stats {
                print_stats(&apps, cli.format)?;
            }
        }
        Command::Url { url } => {
            let list = loader.url_to_app(&url, &job)?;
            if list.is_empty() {
                eprintln!("No application found for '{}'", url);
                std::process::exit(1);
            }
            formatter.format_list(&snapshots(&list), &mut std::io::stdout())?;
        }
        Command::Info { id } => match resolve_app(&loader, &id, &job)? {
            Some(app) => {
                let mut list = AppList::new();
                list.add(app.clone());
                loader.refine(&mut list, full_refine_flags(), &job)?;
                formatter.format_info(&app.snapshot(), &mut std::io::stdout())?;
            }
            None => {
                eprintln!("Application '{}' not found", id);
                std::process::exit(1);
            }
        },
        Command::Install { id } => match resolve_app(&loader, &id, &job)? {
            Some(app) => {
                with_progress(&job, |job| loader.install(&app, job))?;
                eprintln!("Installed '{}' ({})", id, app.state());
            }
            None => {
                eprintln!("Application '{}' not found", id);
                std::process::exit(1);
            }
        },
        Command::Remove { id } => match resolve_app(&loader, &id, &job)? {
            Some(app) => {
                with_progress(&job, |job| loader.remove(&app, job))?;
                eprintln!("Removed '{}' ({})", id, app.state());
            }
            None => {
                eprintln!("Application '{}' not found", id);
                std::process::exit(1);
            }
        },
        Command::Refresh { cache_age } => {
            loader.refresh(cache_age, &job)?;
            eprintln!("Metadata refreshed");
        }
        Command::Doctor => {
            println!("appdepot doctor\n");
            println!("Plugins:");
            for status in loader.status() {
                let mark = if status.enabled && status.setup_ok {
                    '\u{2713}'
                } else {
                    '\u{2717}'
                };
                let note = if !status.enabled {
                    "disabled"
                } else if !status.setup_ok {
                    "setup failed"
                } else {
                    "ok"
                };
                println!(
                    "  {} {:<14} priority {:>3}  {}",
                    mark, status.name, status.priority, note
                );
            }
            println!("\nClaims: {}", loader.registry().len());
        }
        Command::Completions { .. } => unreachable!(),
    }

    print_events(&loader);

    Ok(())
}
