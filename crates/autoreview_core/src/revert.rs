use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::warn;

pub const REVERT_TAGS: &[&str] = &["mw-manual-revert", "mw-reverted", "mw-rollback", "mw-undo"];

/// Revision ids MediaWiki records in the parameters of a revert change tag.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevertTagParams {
    oldest_reverted_rev_id: Option<i64>,
    newest_reverted_rev_id: Option<i64>,
    original_revision_id: Option<i64>,
}

pub fn has_revert_tag(change_tags: &[String]) -> bool {
    change_tags
        .iter()
        .any(|tag| REVERT_TAGS.contains(&tag.as_str()))
}

/// Candidate revision ids restored by a revert, deduplicated and sorted.
/// Parameters that are not JSON objects are logged and skipped.
pub fn parse_reverted_revision_ids(change_tag_params: &[String]) -> Vec<i64> {
    let mut ids = BTreeSet::new();
    for raw in change_tag_params {
        let params = match serde_json::from_str::<RevertTagParams>(raw) {
            Ok(params) => params,
            Err(error) => {
                warn!(param = %raw, %error, "skipping malformed change tag parameter");
                continue;
            }
        };
        ids.extend(
            [
                params.oldest_reverted_rev_id,
                params.newest_reverted_rev_id,
                params.original_revision_id,
            ]
            .into_iter()
            .flatten()
            .filter(|id| *id > 0),
        );
    }
    ids.into_iter().collect()
}
