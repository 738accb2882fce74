use std::fmt::Write;

use comfy_table::Cell;
use indexmap::IndexMap;

use crate::models::ConsolidatedRow;
use crate::pipeline::RunReport;
use crate::release_branch;

use super::styling::{accent, muted, notice, strong, success};
use super::tables::{create_table, cyan_header, outcome_cell, rank_cell};

const MAX_SKIPPED_SHOWN: usize = 20;

/// Prints a human-readable summary of a reconciliation run to stdout.
///
/// Displays:
/// - Overview: dataset key, row and skip counts
/// - Stages: whether each stage was cached or computed, with item counts
/// - Teams: rows per team in report order
/// - Release Notes: one line per merge request, grouped by feature
/// - Skipped: what was left out and why
pub fn print_summary(report: &RunReport) {
    println!("{}", render_summary(report));
}

/// Prints the release branches of each project, newest first.
pub fn print_branches(project: &str, branches: &[String]) {
    println!("{}", render_branches(project, branches));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", strong(emoji), strong(title).underlined());
}

fn render_summary(report: &RunReport) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Overview");
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n",
        muted("Dataset:"),
        accent(&report.dataset),
        muted("Report rows:"),
        notice(report.rows.len()),
        muted("Skipped:"),
        notice(report.skipped.len()),
    );

    add_section_header(&mut output, "🧱", "Stages");
    let mut stages = create_table();
    stages.set_header(cyan_header(&["Stage", "Source", "Items"]));
    for stage in &report.stages {
        stages.add_row(vec![
            Cell::new(stage.stage.name()),
            outcome_cell(stage.outcome),
            Cell::new(stage.count),
        ]);
    }
    let _ = writeln!(output, "{stages}\n");

    if report.rows.is_empty() {
        let _ = writeln!(output, "{}", notice("No reconciled changes found."));
    } else {
        render_teams(&mut output, &report.rows);
        render_release_notes(&mut output, &report.rows);
    }

    if !report.skipped.is_empty() {
        add_section_header(&mut output, "⚠️", "Skipped");
        let mut skipped = create_table();
        skipped.set_header(cyan_header(&["Stage", "Subject", "Code", "Reason"]));
        for item in report.skipped.iter().take(MAX_SKIPPED_SHOWN) {
            skipped.add_row(vec![
                Cell::new(item.stage.name()),
                Cell::new(&item.subject),
                Cell::new(&item.code),
                Cell::new(&item.reason),
            ]);
        }
        let _ = writeln!(output, "{skipped}");
        if report.skipped.len() > MAX_SKIPPED_SHOWN {
            let _ = writeln!(
                output,
                "  {}",
                muted(format!(
                    "... and {} more",
                    report.skipped.len() - MAX_SKIPPED_SHOWN
                ))
            );
        }
    }

    output
}

fn render_teams(output: &mut String, rows: &[ConsolidatedRow]) {
    // Rows arrive in report order, so first appearance keeps the team ranking.
    let mut teams: IndexMap<&str, (Option<u32>, usize)> = IndexMap::new();
    for row in rows {
        teams.entry(row.team.as_str()).or_insert((row.team_rank, 0)).1 += 1;
    }

    add_section_header(output, "👥", "Teams");
    let mut table = create_table();
    table.set_header(cyan_header(&["Rank", "Team", "Changes"]));
    for (team, (rank, count)) in teams {
        table.add_row(vec![rank_cell(rank), Cell::new(team), Cell::new(count)]);
    }
    let _ = writeln!(output, "{table}\n");
}

fn render_release_notes(output: &mut String, rows: &[ConsolidatedRow]) {
    add_section_header(output, "📝", "Release Notes");

    let mut current_feature = None;
    for row in rows {
        if current_feature != Some(row.feature_id) {
            current_feature = Some(row.feature_id);
            let _ = writeln!(
                output,
                "  {} {} {}",
                success(format!("[{}]", row.team)),
                strong(format!("{} {}:", row.feature_type, row.feature_id)),
                row.feature_title
            );
        }
        let _ = writeln!(
            output,
            "    {} {} {}",
            muted(format!("#{}", row.work_item_id)),
            row.merge_request_title,
            muted(format!("({}, {})", row.author, row.merge_request_url))
        );
    }
    output.push('\n');
}

fn render_branches(project: &str, branches: &[String]) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "🌿", &format!("Release branches of {project}"));

    let sorted = release_branch::sort_descending(branches);
    if sorted.is_empty() {
        let _ = writeln!(output, "  {}", notice("No release branches found."));
        return output;
    }

    for branch in &sorted {
        let date = release_branch::parse_date(branch)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let marker = if release_branch::is_latest(branch, branches) {
            success("latest").to_string()
        } else {
            String::new()
        };
        let _ = writeln!(output, "  {} {} {marker}", accent(branch), muted(date));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Stage;
    use crate::models::Platform;
    use crate::pipeline::{SkippedItem, StageOutcome, StageReport};

    fn row(team: &str, rank: Option<u32>, feature_id: u64, work_item_id: u64) -> ConsolidatedRow {
        ConsolidatedRow {
            team: team.to_string(),
            team_rank: rank,
            feature_id,
            feature_title: format!("Feature {feature_id}"),
            feature_type: "Feature".to_string(),
            feature_state: "Active".to_string(),
            feature_url: String::new(),
            work_item_id,
            work_item_title: format!("Task {work_item_id}"),
            work_item_type: "Task".to_string(),
            merge_request_title: format!("Change {work_item_id}"),
            merge_request_url: format!("https://gl/mr/{work_item_id}"),
            author: "Jane Doe".to_string(),
            project: "group/app".to_string(),
            platform: Platform::GitLab,
            merged_at: None,
            source_branch: format!("VSTS{work_item_id}"),
            target_branch: "main".to_string(),
        }
    }

    fn report(rows: Vec<ConsolidatedRow>, skipped: Vec<SkippedItem>) -> RunReport {
        RunReport {
            dataset: "0123456789abcdef".to_string(),
            stages: vec![
                StageReport {
                    stage: Stage::RawPullRequests,
                    outcome: StageOutcome::Cached,
                    count: 3,
                },
                StageReport {
                    stage: Stage::Consolidated,
                    outcome: StageOutcome::Computed,
                    count: rows.len(),
                },
            ],
            rows,
            skipped,
        }
    }

    #[test]
    fn test_render_summary_empty_report() {
        let output = render_summary(&report(vec![], vec![]));

        assert!(output.contains("0123456789abcdef"));
        assert!(output.contains("raw_pull_requests"));
        assert!(output.contains("cached"));
        assert!(output.contains("No reconciled changes found."));
        assert!(!output.contains("Skipped\n"));
    }

    #[test]
    fn test_render_summary_groups_by_feature() {
        let rows = vec![
            row("Payments", Some(1), 10, 100),
            row("Payments", Some(1), 10, 101),
            row("Search", None, 20, 200),
        ];

        let output = render_summary(&report(rows, vec![]));

        assert!(output.contains("Teams"));
        assert_eq!(output.matches("Feature 10:").count(), 1);
        assert!(output.contains("#100"));
        assert!(output.contains("#101"));
        assert!(output.contains("https://gl/mr/200"));
        let payments = output.find("[Payments]").unwrap();
        let search = output.find("[Search]").unwrap();
        assert!(payments < search);
    }

    #[test]
    fn test_render_summary_truncates_skipped() {
        let skipped = (0..25)
            .map(|i| SkippedItem {
                stage: Stage::WorkItems,
                subject: format!("https://gl/mr/{i}"),
                code: "WorkItem.NoTicket".to_string(),
                reason: "Branch names no work item".to_string(),
            })
            .collect();

        let output = render_summary(&report(vec![], skipped));

        assert!(output.contains("WorkItem.NoTicket"));
        assert!(output.contains("... and 5 more"));
    }

    #[test]
    fn test_render_branches_marks_latest() {
        let branches = vec![
            "release/20240101".to_string(),
            "main".to_string(),
            "release/20240301".to_string(),
        ];

        let output = render_branches("group/app", &branches);

        let newest = output.find("release/20240301").unwrap();
        let oldest = output.find("release/20240101").unwrap();
        assert!(newest < oldest);
        assert!(output.contains("2024-03-01"));
        assert!(output.contains("latest"));
        assert!(!output.contains("main"));
    }

    #[test]
    fn test_render_branches_without_releases() {
        let output = render_branches("group/app", &["main".to_string()]);
        assert!(output.contains("No release branches found."));
    }
}
