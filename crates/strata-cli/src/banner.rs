use std::path::Path;

use strata_db::{MigrationStatus, SchemaDialect, TableDescription};

const WIDTH: usize = 72;

fn shorten_home(path: &Path) -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => path.to_string_lossy().replace(&home, "~"),
        _ => path.to_string_lossy().to_string(),
    }
}

fn top(title: &str) -> String {
    let dashes = WIDTH.saturating_sub(title.chars().count() + 7);
    format!("╭─── {title} {}╮", "─".repeat(dashes))
}

fn bottom() -> String {
    format!("╰{}╯", "─".repeat(WIDTH - 2))
}

fn row(text: &str) -> String {
    let inner = WIDTH - 4;
    let mut text: String = text.chars().take(inner).collect();
    let pad = inner - text.chars().count();
    text.push_str(&" ".repeat(pad));
    format!("│ {text} │")
}

/// Boxed summary of the database followed by one line per migration.
pub fn render_status(database: &Path, dialect: SchemaDialect, statuses: &[MigrationStatus]) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let applied = statuses.iter().filter(|s| s.is_applied()).count();
    let pending = statuses.len() - applied;

    let mut lines = vec![
        top(&format!("Strata v{version}")),
        row(&format!("Database    {}", shorten_home(database))),
        row(&format!("Dialect     {dialect}")),
        row(&format!("Applied     {applied}")),
        row(&format!("Pending     {pending}")),
        row(""),
    ];

    if statuses.is_empty() {
        lines.push(row("no migrations"));
    }
    for status in statuses {
        let state = if status.is_applied() { "up" } else { "down" };
        let name = status.name.as_deref().unwrap_or("** NO FILE **");
        let applied_at = status
            .applied_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        lines.push(row(&format!(
            "{state:<5} {:<15} {name:<28} {applied_at}",
            status.version
        )));
    }

    lines.push(bottom());
    lines.join("\n")
}

pub fn render_table(table: &TableDescription) -> String {
    let mut lines = vec![top(&table.name)];
    for column in &table.columns {
        let mut flags = Vec::new();
        if column.primary_key {
            flags.push("primary key".to_string());
        }
        flags.push(if column.not_null { "not null" } else { "null" }.to_string());
        if let Some(default) = &column.default {
            flags.push(format!("default {default}"));
        }
        lines.push(row(&format!(
            "{:<20} {:<12} {}",
            column.name,
            column.declared_type,
            flags.join(", ")
        )));
    }
    for fk in &table.foreign_keys {
        let target = match &fk.to {
            Some(column) => format!("{}.{column}", fk.table),
            None => fk.table.clone(),
        };
        lines.push(row(&format!(
            "fk {} -> {target} (on delete {}, on update {})",
            fk.from, fk.on_delete, fk.on_update
        )));
    }
    for index in &table.indexes {
        lines.push(row(&format!("index {index}")));
    }
    lines.push(bottom());
    lines.join("\n")
}
