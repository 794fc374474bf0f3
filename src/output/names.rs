use crate::app::AppSnapshot;

/// One record per line: the display name, falling back to the id.
pub fn format_names(apps: &[AppSnapshot], w: &mut dyn std::io::Write) -> anyhow::Result<()> {
    for app in apps {
        match &app.name {
            Some(name) => writeln!(w, "{}", name)?,
            None => writeln!(w, "{}", app.id)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, AppKind};

    #[test]
    fn test_names_prefers_display_name() {
        let named = App::new("dummy::chiron", AppKind::Desktop);
        named.set_name("Chiron");
        let bare = App::new("dummy::zeus", AppKind::Desktop);

        let mut buf = Vec::new();
        format_names(&[named.snapshot(), bare.snapshot()], &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines, ["Chiron", "dummy::zeus"]);
    }
}
