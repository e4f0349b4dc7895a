use tera::{Context, Tera};

use crate::cron::EntrySnapshot;
use crate::{Error, Result};

const INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>CronHPA jobs</title>
</head>
<body>
<table border="1">
  <thead>
    <tr><th>CronHPA</th><th>Namespace</th><th>Id</th><th>Job</th><th>Pre</th><th>Next</th></tr>
  </thead>
  <tbody>
  {%- for entry in entries %}
    <tr>
      <td>{{ entry.cronhpa }}</td>
      <td>{{ entry.namespace }}</td>
      <td>{{ entry.id }}</td>
      <td>{{ entry.name }}</td>
      <td>{% if entry.prev %}{{ entry.prev }}{% else %}-{% endif %}</td>
      <td>{% if entry.next %}{{ entry.next }}{% else %}-{% endif %}</td>
    </tr>
  {%- endfor %}
  </tbody>
</table>
</body>
</html>
"#;

/// Renders the engine entries as an HTML table.
pub fn render_index(entries: &[EntrySnapshot]) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("index.html", INDEX)
        .map_err(|e| Error::Internal(format!("Failed to parse template: {}", e)))?;

    let mut context = Context::new();
    context.insert("entries", entries);

    tera.render("index.html", &context)
        .map_err(|e| Error::Internal(format!("Failed to render template: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(prev: Option<&str>) -> EntrySnapshot {
        EntrySnapshot {
            id: "4f1c".to_string(),
            name: "scale-up".to_string(),
            cronhpa: "web".to_string(),
            namespace: "default".to_string(),
            schedule: "0 0 8 * * *".to_string(),
            prev: prev.map(str::to_string),
            next: Some("2024-01-02T08:00:00+00:00".to_string()),
        }
    }

    #[test]
    fn test_renders_one_row_per_entry() {
        let page = render_index(&[entry(None), entry(Some("2024-01-01T08:00:00+00:00"))]).unwrap();
        assert_eq!(page.matches("<td>scale-up</td>").count(), 2);
        assert!(page.contains("<td>-</td>"));
        assert!(page.contains("2024-01-01T08:00:00+00:00"));
    }

    #[test]
    fn test_empty_table() {
        let page = render_index(&[]).unwrap();
        assert!(page.contains("<th>CronHPA</th>"));
        assert!(!page.contains("<td>"));
    }
}
