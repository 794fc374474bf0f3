use comfy_table::{Cell, ContentArrangement, Table};
use owo_colors::OwoColorize;

use crate::app::{AppSnapshot, AppState};

pub fn format_table(
    apps: &[AppSnapshot],
    w: &mut dyn std::io::Write,
    no_color: bool,
) -> anyhow::Result<()> {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Id", "Name", "State", "Origin", "Summary"]);

    for app in apps {
        let state_str = app.state.to_string();
        let state_display = if no_color {
            state_str
        } else {
            match app.state {
                AppState::Installed => state_str.green().to_string(),
                AppState::Available => state_str.blue().to_string(),
                AppState::Updatable => state_str.yellow().to_string(),
                AppState::Installing | AppState::Removing => state_str.cyan().to_string(),
                AppState::Unavailable => state_str.red().to_string(),
                AppState::Unknown => state_str.white().to_string(),
            }
        };

        table.add_row(vec![
            Cell::new(app.id.as_str()),
            Cell::new(app.name.as_deref().unwrap_or("")),
            Cell::new(state_display),
            Cell::new(app.origin.as_deref().unwrap_or("")),
            Cell::new(app.summary.as_deref().unwrap_or("")),
        ]);
    }

    writeln!(w, "{}", table)?;
    Ok(())
}
