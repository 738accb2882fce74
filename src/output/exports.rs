use anyhow::Result;
use std::io::Write;

use crate::config::OutputFormat;
use crate::models::ConsolidatedRow;

const CSV_HEADER: [&str; 18] = [
    "Team",
    "Team Rank",
    "Feature Id",
    "Feature Title",
    "Feature Type",
    "Feature State",
    "Feature Url",
    "Work Item Id",
    "Work Item Title",
    "Work Item Type",
    "Merge Request Title",
    "Merge Request Url",
    "Author",
    "Project",
    "Platform",
    "Merged At",
    "Source Branch",
    "Target Branch",
];

/// Writes the consolidated rows as machine-readable output.
///
/// - CSV: one row per merge request, ready for a spreadsheet
/// - JSON: the rows as an array
pub fn export_rows(
    rows: &[ConsolidatedRow],
    format: OutputFormat,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Summary => {
            anyhow::bail!("Summary output is printed to the terminal, not exported")
        }
        OutputFormat::Json => export_json(rows, pretty, output),
        OutputFormat::Csv => export_csv(rows, output),
    }
}

fn export_json(rows: &[ConsolidatedRow], pretty: bool, output: &mut dyn Write) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(rows)?
    } else {
        serde_json::to_string(rows)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}

fn export_csv(rows: &[ConsolidatedRow], output: &mut dyn Write) -> Result<()> {
    writeln!(output, "{}", CSV_HEADER.join(","))?;

    for row in rows {
        let fields = [
            row.team.clone(),
            row.team_rank.map(|r| r.to_string()).unwrap_or_default(),
            row.feature_id.to_string(),
            row.feature_title.clone(),
            row.feature_type.clone(),
            row.feature_state.clone(),
            row.feature_url.clone(),
            row.work_item_id.to_string(),
            row.work_item_title.clone(),
            row.work_item_type.clone(),
            row.merge_request_title.clone(),
            row.merge_request_url.clone(),
            row.author.clone(),
            row.project.clone(),
            row.platform.to_string(),
            row.merged_at
                .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            row.source_branch.clone(),
            row.target_branch.clone(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        writeln!(output, "{}", line.join(","))?;
    }

    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
