use std::str::FromStr;

use passk_core::{AggregateRow, ModelSummary, Result};

/// Marker for cells where the group has fewer than `k` samples.
pub const UNDEFINED: &str = "null";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format '{}' (table, json, csv)", other)),
        }
    }
}

pub fn render(
    rows: &[AggregateRow],
    ks: &[u32],
    format: OutputFormat,
    precision: u32,
) -> Result<String> {
    let rows: Vec<AggregateRow> = rows.iter().map(|r| r.rounded(precision)).collect();

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&rows)?),
        OutputFormat::Csv => Ok(render_csv(&rows, ks, precision)),
        OutputFormat::Table => Ok(render_table(&rows, ks, precision)),
    }
}

fn header(ks: &[u32]) -> Vec<String> {
    let mut cols: Vec<String> = ["problem", "model_family", "model_name", "strategy", "n", "c"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    cols.extend(ks.iter().map(|k| format!("pass@{}", k)));
    cols
}

fn cells(row: &AggregateRow, ks: &[u32], precision: usize, undefined: &str) -> Vec<String> {
    let mut cols = vec![
        row.key.problem.clone(),
        row.key.model_family.clone(),
        row.key.model_name.clone(),
        row.key.strategy.clone(),
        row.n.to_string(),
        row.c.to_string(),
    ];
    cols.extend(ks.iter().map(|&k| match row.get(k) {
        Some(v) => format!("{:.*}", precision, v),
        None => undefined.to_string(),
    }));
    cols
}

fn render_table(rows: &[AggregateRow], ks: &[u32], precision: u32) -> String {
    let header = header(ks);
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| cells(row, ks, precision as usize, UNDEFINED))
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for line in &body {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.len());
        }
    }

    let total_width = widths.iter().sum::<usize>() + 2 * widths.len();

    let format_line = |cols: &[String]| -> String {
        cols.iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_line(&header), "-".repeat(total_width)];
    lines.extend(body.iter().map(|line| format_line(line)));
    lines.join("\n") + "\n"
}

fn csv_field(s: &str) -> String {
    match s.contains(&[',', '"', '\n'][..]) {
        true => format!("\"{}\"", s.replace('"', "\"\"")),
        false => s.to_string(),
    }
}

fn render_csv(rows: &[AggregateRow], ks: &[u32], precision: u32) -> String {
    let mut out = header(ks).join(",");
    out.push('\n');
    for row in rows {
        let line: Vec<String> = cells(row, ks, precision as usize, "")
            .iter()
            .map(|c| csv_field(c))
            .collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// Per-model means, one line per (model_family, model_name, strategy).
pub fn render_summary(summaries: &[ModelSummary], precision: u32) -> String {
    let mut out = format!("Summary (mean across problems):\n{:-<60}\n", "");

    for summary in summaries {
        let means = summary
            .means
            .iter()
            .map(|cell| match cell.mean {
                Some(m) => format!(
                    "pass@{}={:.*} ({}/{})",
                    cell.k, precision as usize, m, cell.contributing, summary.problems
                ),
                None => format!("pass@{}={}", cell.k, UNDEFINED),
            })
            .collect::<Vec<_>>()
            .join("  ");

        out.push_str(&format!(
            "  {}/{} [{}]  {}\n",
            summary.model_family, summary.model_name, summary.strategy, means
        ));
    }
    out
}
