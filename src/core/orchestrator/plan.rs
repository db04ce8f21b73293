use std::fmt::Write;

use crate::core::remote::{PlanTable, TransformationPlan};

/// Markdown for the chat: numbered steps, their progress, then any tabular reports.
pub fn render_plan(plan: &TransformationPlan) -> String {
    let mut out = String::from("## Transformation plan\n\n");
    if plan.steps.is_empty() {
        out.push_str("The plan has no steps yet.\n");
        return out;
    }

    for (i, step) in plan.steps.iter().enumerate() {
        let _ = write!(out, "{}. **{}**", i + 1, step.name.trim());
        if let Some(status) = step.status.as_deref().filter(|s| !s.is_empty()) {
            let _ = write!(out, " ({})", status.to_ascii_lowercase().replace('_', " "));
        }
        out.push('\n');
        if let Some(desc) = step.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            let _ = writeln!(out, "   {}", desc);
        }
        for update in &step.progress_updates {
            // Table payloads are rendered separately below.
            let is_table = update
                .description
                .as_deref()
                .is_some_and(|d| d.trim_start().starts_with('{'));
            if is_table {
                continue;
            }
            let _ = write!(out, "   - {}", update.name.trim());
            if let Some(desc) = update.description.as_deref().filter(|d| !d.is_empty()) {
                let _ = write!(out, ": {}", desc.trim());
            }
            out.push('\n');
        }
    }

    for table in plan.tables() {
        out.push('\n');
        render_table(&mut out, &table);
    }
    out
}

fn render_table(out: &mut String, table: &PlanTable) {
    let _ = writeln!(out, "### {}\n", table.name);
    if table.column_names.is_empty() {
        return;
    }
    let _ = writeln!(out, "| {} |", table.column_names.join(" | "));
    let _ = writeln!(
        out,
        "|{}",
        table.column_names.iter().map(|_| "---|").collect::<String>()
    );
    for row in &table.rows {
        let cells: Vec<&str> = table
            .column_names
            .iter()
            .map(|c| row.get(c).map(String::as_str).unwrap_or(""))
            .collect();
        let _ = writeln!(out, "| {} |", cells.join(" | "));
    }
}
