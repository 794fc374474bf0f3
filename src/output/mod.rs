pub mod json;
pub mod names;
pub mod table;
pub mod tsv;

use crate::app::AppSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Tsv,
    Names,
}

pub struct Formatter {
    format: OutputFormat,
    no_color: bool,
}

impl Formatter {
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        Self { format, no_color }
    }

    pub fn format_list(
        &self,
        apps: &[AppSnapshot],
        w: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Table => table::format_table(apps, w, self.no_color),
            OutputFormat::Json => json::format_json_list(apps, w),
            OutputFormat::Tsv => tsv::format_tsv(apps, w),
            OutputFormat::Names => names::format_names(apps, w),
        }
    }

    pub fn format_info(
        &self,
        app: &AppSnapshot,
        w: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => json::format_json_single(app, w),
            _ => {
                writeln!(w, "Id:          {}", app.id)?;
                writeln!(w, "Name:        {}", app.name.as_deref().unwrap_or("-"))?;
                writeln!(w, "Kind:        {}", app.kind)?;
                writeln!(w, "State:       {}", app.state)?;
                writeln!(w, "Version:     {}", app.version.as_deref().unwrap_or("-"))?;
                writeln!(w, "License:     {}", app.license.as_deref().unwrap_or("-"))?;
                writeln!(w, "Origin:      {}", app.origin.as_deref().unwrap_or("-"))?;
                writeln!(
                    w,
                    "Managed by:  {}",
                    app.management_plugin.as_deref().unwrap_or("-")
                )?;
                writeln!(
                    w,
                    "Summary:     {}",
                    app.summary.as_deref().unwrap_or("-")
                )?;
                writeln!(
                    w,
                    "Description: {}",
                    app.description.as_deref().unwrap_or("-")
                )?;
                Ok(())
            }
        }
    }
}
