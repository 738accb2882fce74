use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    ConsolidatedRow, MergeRequest, ResolvedWorkItem, TeamDirectory, TeamRanking, UserDirectory,
};

/// A merge request and the work item id its branch refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLink {
    pub work_item_id: u64,
    pub merge_request: MergeRequest,
}

/// Lookups applied while joining changes with resolved work items.
pub struct Directories<'a> {
    pub users: &'a UserDirectory,
    pub teams: &'a TeamDirectory,
    pub ranking: &'a TeamRanking,
}

/// Joins every linked merge request with its resolved work item.
///
/// Links whose work item did not resolve produce no row; they were already
/// reported by the stage that dropped them. The team comes from the governing
/// item, or the leaf item when the governing item has none.
pub fn consolidate(
    links: &[ChangeLink],
    resolved: &[ResolvedWorkItem],
    directories: &Directories<'_>,
) -> Vec<ConsolidatedRow> {
    let by_id: HashMap<u64, &ResolvedWorkItem> =
        resolved.iter().map(|r| (r.item.id, r)).collect();

    let mut rows: Vec<ConsolidatedRow> = links
        .iter()
        .filter_map(|link| {
            let resolved = by_id.get(&link.work_item_id)?;
            Some(row(link, resolved, directories))
        })
        .collect();

    sort_rows(&mut rows);
    rows
}

fn row(link: &ChangeLink, resolved: &ResolvedWorkItem, directories: &Directories<'_>) -> ConsolidatedRow {
    let ResolvedWorkItem { item, governing } = resolved;
    let mr = &link.merge_request;

    let original_team = if governing.team.trim().is_empty() {
        &item.team
    } else {
        &governing.team
    };
    let team = directories.teams.display_name(original_team).to_owned();
    let team_rank = directories.ranking.rank(&team);

    let author = directories
        .users
        .lookup(&mr.author)
        .map_or_else(|| mr.author.name.clone(), |u| u.display_name.clone());

    ConsolidatedRow {
        team,
        team_rank,
        feature_id: governing.id,
        feature_title: governing.title.clone(),
        feature_type: governing.work_item_type.clone(),
        feature_state: governing.state.clone(),
        feature_url: governing.url.clone(),
        work_item_id: item.id,
        work_item_title: item.title.clone(),
        work_item_type: item.work_item_type.clone(),
        merge_request_title: mr.title.clone(),
        merge_request_url: mr.url.clone(),
        author,
        project: mr.project_path.clone(),
        platform: mr.platform,
        merged_at: mr.merged_at,
        source_branch: mr.source_branch.clone(),
        target_branch: mr.target_branch.clone(),
    }
}

/// Ranked teams first (lowest rank first), then team, feature, work item and
/// merge request so the order never depends on fetch order.
pub fn sort_rows(rows: &mut [ConsolidatedRow]) {
    rows.sort_by(|a, b| {
        (a.team_rank.is_none(), a.team_rank)
            .cmp(&(b.team_rank.is_none(), b.team_rank))
            .then_with(|| a.team.cmp(&b.team))
            .then_with(|| a.feature_title.cmp(&b.feature_title))
            .then_with(|| a.work_item_id.cmp(&b.work_item_id))
            .then_with(|| a.merge_request_url.cmp(&b.merge_request_url))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, MergeState, Platform, TeamMapping, TeamSortRule, UserMapping, WorkItem};
    use chrono::{TimeZone, Utc};

    fn work_item(id: u64, kind: &str, team: &str, title: &str) -> WorkItem {
        WorkItem {
            id,
            title: title.to_string(),
            work_item_type: kind.to_string(),
            state: "Closed".to_string(),
            url: format!("https://dev.azure.com/org/proj/_workitems/edit/{id}"),
            team: team.to_string(),
            parent_id: None,
        }
    }

    fn link(work_item_id: u64, url: &str) -> ChangeLink {
        ChangeLink {
            work_item_id,
            merge_request: MergeRequest {
                title: format!("Change for {work_item_id}"),
                description: None,
                source_branch: format!("VSTS{work_item_id}-x"),
                target_branch: "main".into(),
                created_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
                merged_at: Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap()),
                state: MergeState::Merged,
                author: Author {
                    id: "jdoe".into(),
                    name: "jane".into(),
                },
                url: url.to_string(),
                platform: Platform::GitLab,
                project_path: "group/app".into(),
            },
        }
    }

    fn resolved(item: WorkItem, governing: WorkItem) -> ResolvedWorkItem {
        ResolvedWorkItem { item, governing }
    }

    #[test]
    fn test_rows_ordered_by_rank_then_team_with_unranked_last() {
        let users = UserDirectory::new(vec![UserMapping {
            author: "jdoe".into(),
            display_name: "Jane Doe".into(),
        }]);
        let teams = TeamDirectory::new(&[TeamMapping {
            original: "Proj\\Pay".into(),
            display: "Payments".into(),
        }]);
        let ranking = TeamRanking::new(&[
            TeamSortRule {
                team: "Search".into(),
                rank: 2,
            },
            TeamSortRule {
                team: "Payments".into(),
                rank: 1,
            },
        ]);
        let directories = Directories {
            users: &users,
            teams: &teams,
            ranking: &ranking,
        };

        let resolved = vec![
            resolved(work_item(1, "Task", "Zeta", "t1"), work_item(10, "Feature", "Zeta", "F")),
            resolved(work_item(2, "Task", "Search", "t2"), work_item(20, "Epic", "Search", "E")),
            resolved(work_item(3, "Bug", "Alpha", "t3"), work_item(30, "User Story", "Alpha", "S")),
            resolved(work_item(4, "Task", "x", "t4"), work_item(40, "Feature", "Proj\\Pay", "P")),
        ];
        let links = vec![
            link(1, "https://gl/mr/1"),
            link(2, "https://gl/mr/2"),
            link(3, "https://gl/mr/3"),
            link(4, "https://gl/mr/4"),
        ];

        let rows = consolidate(&links, &resolved, &directories);

        let teams: Vec<_> = rows.iter().map(|r| r.team.as_str()).collect();
        assert_eq!(teams, vec!["Payments", "Search", "Alpha", "Zeta"]);
        assert_eq!(rows[0].team_rank, Some(1));
        assert_eq!(rows[2].team_rank, None);
        assert_eq!(rows[0].feature_id, 40);
        assert_eq!(rows[0].work_item_id, 4);
        assert_eq!(rows[0].author, "Jane Doe");
    }

    #[test]
    fn test_team_falls_back_to_leaf_item() {
        let (users, teams, ranking) = Default::default();
        let directories = Directories {
            users: &users,
            teams: &teams,
            ranking: &ranking,
        };
        let resolved = vec![resolved(
            work_item(1, "Task", "Core", "t1"),
            work_item(10, "Feature", "", "F"),
        )];

        let rows = consolidate(&[link(1, "https://gl/mr/1")], &resolved, &directories);

        assert_eq!(rows[0].team, "Core");
        assert_eq!(rows[0].author, "jane");
    }

    #[test]
    fn test_unresolved_links_produce_no_rows() {
        let (users, teams, ranking) = Default::default();
        let directories = Directories {
            users: &users,
            teams: &teams,
            ranking: &ranking,
        };

        let rows = consolidate(&[link(99, "https://gl/mr/99")], &[], &directories);

        assert!(rows.is_empty());
    }

    #[test]
    fn test_same_feature_orders_by_work_item_then_url() {
        let (users, teams, ranking) = Default::default();
        let directories = Directories {
            users: &users,
            teams: &teams,
            ranking: &ranking,
        };
        let feature = work_item(10, "Feature", "Core", "F");
        let resolved = vec![
            resolved(work_item(2, "Task", "Core", "b"), feature.clone()),
            resolved(work_item(1, "Task", "Core", "a"), feature),
        ];
        let links = vec![
            link(2, "https://gl/mr/5"),
            link(1, "https://gl/mr/9"),
            link(1, "https://gl/mr/7"),
        ];

        let rows = consolidate(&links, &resolved, &directories);

        let urls: Vec<_> = rows.iter().map(|r| r.merge_request_url.as_str()).collect();
        assert_eq!(urls, vec!["https://gl/mr/7", "https://gl/mr/9", "https://gl/mr/5"]);
    }
}
