use log::{debug, warn};

use crate::error::HierarchyError;
use crate::models::WorkItem;
use crate::providers::WorkItemSource;

/// Maximum number of work items examined in one walk, the starting item included.
pub const MAX_HIERARCHY_DEPTH: usize = 10;

/// Climbs from `item` to the nearest User Story, Feature or Epic (inclusive).
///
/// The walk is iterative and keeps a bounded trail of visited ids: a revisited id
/// or a trail that fills up ends the walk with [`HierarchyError::MaxDepthExceeded`].
/// Fetch failures are returned as-is; retrying is the source's business.
///
/// # Errors
///
/// - [`HierarchyError::NoGoverningAncestor`] when the chain ends without a match
/// - [`HierarchyError::MaxDepthExceeded`] on cycles or chains deeper than
///   [`MAX_HIERARCHY_DEPTH`]
/// - [`HierarchyError::Fetch`] when a parent cannot be fetched
pub async fn resolve_governing_ancestor(
    item: &WorkItem,
    source: &dyn WorkItemSource,
) -> Result<WorkItem, HierarchyError> {
    let mut trail: Vec<u64> = Vec::with_capacity(MAX_HIERARCHY_DEPTH);
    let mut current = item.clone();

    loop {
        trail.push(current.id);

        if current.is_user_story_or_above() {
            debug!(
                "Work item {} governed by {} {} ({} levels)",
                item.id,
                current.work_item_type,
                current.id,
                trail.len()
            );
            return Ok(current);
        }

        let Some(parent_id) = current.parent_id else {
            return Err(HierarchyError::NoGoverningAncestor { id: item.id });
        };

        if trail.contains(&parent_id) || trail.len() >= MAX_HIERARCHY_DEPTH {
            warn!("Work item {} hierarchy stopped at {:?}", item.id, trail);
            return Err(HierarchyError::MaxDepthExceeded {
                id: item.id,
                depth: MAX_HIERARCHY_DEPTH,
                trail,
            });
        }

        current = source.fetch_work_item(parent_id).await?;
    }
}
