use crate::app::AppSnapshot;

pub fn format_tsv(apps: &[AppSnapshot], w: &mut dyn std::io::Write) -> anyhow::Result<()> {
    for app in apps {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            app.id,
            app.name.as_deref().unwrap_or(""),
            app.state,
            app.origin.as_deref().unwrap_or(""),
            app.summary.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{App, AppKind, AppState};

    #[test]
    fn test_tsv_fields() {
        let app = App::new("dummy::chiron", AppKind::Desktop);
        app.set_name("Chiron");
        app.set_state(AppState::Available);
        let mut buf = Vec::new();
        format_tsv(&[app.snapshot()], &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        let fields: Vec<&str> = output.trim_end().split('\t').collect();
        assert_eq!(fields[0], "dummy::chiron");
        assert_eq!(fields[1], "Chiron");
        assert_eq!(fields[2], "available");
    }

    #[test]
    fn test_tsv_empty() {
        let mut buf = Vec::new();
        format_tsv(&[], &mut buf).unwrap();
        assert!(buf.is_empty());
    }
}
