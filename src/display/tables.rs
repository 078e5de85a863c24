//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::analysis::OrthogonalityReport;
use crate::engine::{BulkSummary, ConsistencyReport, IndexStats};
use crate::indexing::IndexSummary;
use crate::query::SearchResult;

/// Longest content preview shown in a search table cell.
const PREVIEW_CHARS: usize = 80;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        Self {
            table: styled_table(),
        }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        self.table.set_header(bold_cells(headers));
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

fn styled_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn bold_cells(headers: Vec<&str>) -> Vec<Cell> {
    headers
        .into_iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
        .collect()
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS - 3).collect();
    format!("{cut}...")
}

/// Metric/value table for `stats`.
pub fn create_stats_table(stats: &IndexStats) -> String {
    let mut table = styled_table();
    table.set_header(bold_cells(vec!["Metric", "Value"]));

    table.add_row(vec!["Live records".to_string(), stats.live_count.to_string()]);
    table.add_row(vec![
        "Tombstoned records".to_string(),
        stats.tombstoned_count.to_string(),
    ]);
    table.add_row(vec![
        "Pending inserts".to_string(),
        stats.pending_count.to_string(),
    ]);
    table.add_row(vec![
        "Excluded index rows".to_string(),
        stats.excluded_count.to_string(),
    ]);
    table.add_row(vec!["Dimension".to_string(), stats.dimension.to_string()]);
    table.add_row(vec!["Threshold".to_string(), format!("{:.4}", stats.threshold)]);

    let (mode, color) = if stats.admission_enabled {
        ("orthogonal", Color::Green)
    } else {
        ("admit all", Color::Yellow)
    };
    table.add_row(vec![
        Cell::new("Admission"),
        Cell::new(mode).fg(color).add_attribute(Attribute::Bold),
    ]);

    table.to_string()
}

/// Ranked search hits.
pub fn create_search_table(results: &[SearchResult]) -> String {
    let mut table = styled_table();
    table.set_header(bold_cells(vec!["#", "Score", "Source", "Lines", "Content"]));

    for (rank, hit) in results.iter().enumerate() {
        let lines = hit
            .line_range
            .map(|(start, end)| format!("{start}-{end}"))
            .unwrap_or_default();
        table.add_row(vec![
            (rank + 1).to_string(),
            hit.score.to_string(),
            hit.source_path.clone(),
            lines,
            preview(&hit.content),
        ]);
    }

    table.to_string()
}

/// Per-file indexing results with a total row.
pub fn create_summary_table(bulk: &BulkSummary) -> String {
    let mut table = styled_table();
    table.set_header(bold_cells(vec![
        "File", "Inserted", "Updated", "Removed", "Unchanged", "Duplicates", "Failures",
    ]));

    let row = |label: Cell, s: &IndexSummary, bold: bool| {
        let cell = |n: usize| {
            let c = Cell::new(n);
            if bold { c.add_attribute(Attribute::Bold) } else { c }
        };
        vec![
            label,
            cell(s.inserted),
            cell(s.updated),
            cell(s.removed),
            cell(s.unchanged),
            cell(s.rejected_as_duplicate),
            cell(s.embed_failures),
        ]
    };

    for (path, summary) in &bulk.files {
        table.add_row(row(Cell::new(path.display()), summary, false));
    }
    table.add_row(row(
        Cell::new("TOTAL").add_attribute(Attribute::Bold),
        &bulk.total,
        true,
    ));

    table.to_string()
}

pub fn create_analysis_table(report: &OrthogonalityReport) -> String {
    let mut table = styled_table();
    table.set_header(bold_cells(vec!["Metric", "Value"]));

    table.add_row(vec!["Records sampled".to_string(), report.sample_size.to_string()]);
    table.add_row(vec!["Pairs compared".to_string(), report.pair_count.to_string()]);
    table.add_row(vec![
        "Mean similarity".to_string(),
        format!("{:.4}", report.mean_similarity),
    ]);
    table.add_row(vec![
        "Std deviation".to_string(),
        format!("{:.4}", report.std_similarity),
    ]);
    table.add_row(vec![
        "Min / max".to_string(),
        format!("{:.4} / {:.4}", report.min_similarity, report.max_similarity),
    ]);
    if let Some(pair) = &report.most_similar_pair {
        table.add_row(vec![
            "Most similar pair".to_string(),
            format!("{} ~ {}", pair.first, pair.second),
        ]);
    }
    table.add_row(vec![
        format!("Above {:.2}", report.threshold),
        report.above_threshold.to_string(),
    ]);
    table.add_row(vec![
        format!("0.50 to {:.2}", report.threshold),
        report.moderate.to_string(),
    ]);
    table.add_row(vec!["Below 0.50".to_string(), report.low.to_string()]);
    table.add_row(vec![
        Cell::new("Orthogonality"),
        Cell::new(format!(
            "{:.4} ({})",
            report.orthogonality_score, report.interpretation
        ))
        .add_attribute(Attribute::Bold),
    ]);

    table.to_string()
}

pub fn create_verify_table(report: &ConsistencyReport) -> String {
    let mut table = styled_table();
    table.set_header(bold_cells(vec!["Check", "Result"]));

    table.add_row(vec!["Live in store".to_string(), report.store_live.to_string()]);
    table.add_row(vec!["Live in index".to_string(), report.index_live.to_string()]);

    let ids = |ids: &[crate::types::RecordId]| {
        if ids.is_empty() {
            "none".to_string()
        } else {
            ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        }
    };
    table.add_row(vec![
        "Missing from index".to_string(),
        ids(&report.missing_from_index),
    ]);
    table.add_row(vec![
        "Missing from store".to_string(),
        ids(&report.missing_from_store),
    ]);

    let (status, color) = if report.is_consistent() {
        ("✓ consistent", Color::Green)
    } else {
        ("✗ inconsistent, run rebuild", Color::Red)
    };
    table.add_row(vec![
        Cell::new("Status"),
        Cell::new(status).fg(color).add_attribute(Attribute::Bold),
    ]);

    table.to_string()
}
