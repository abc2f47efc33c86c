use anyhow::Result;
use tracing::{debug, warn};

use super::CheckId;
use crate::broken_wikicode::find_broken_wikicode;
use crate::context::CheckContext;
use crate::model::{CheckResult, CheckStatus, Decision};

fn html_unavailable(check: CheckId) -> CheckResult {
    check.result(
        CheckStatus::Skip,
        "Could not fetch rendered HTML for analysis.",
    )
}

/// Rendered HTML of `revid`, with empty pages treated as unavailable.
fn fetch_html(context: &CheckContext<'_>, revid: i64) -> Option<String> {
    match context.rendered_html(revid) {
        Ok(html) if !html.is_empty() => Some(html),
        Ok(_) => None,
        Err(error) => {
            warn!(revid, %error, "rendered HTML unavailable");
            None
        }
    }
}

pub(super) fn broken_wikicode(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::BrokenWikicode;
    let Some(current) = fetch_html(context, context.revision.revid) else {
        return Ok(html_unavailable(check));
    };
    let parent = match context.parent_id() {
        Some(parent_id) => match fetch_html(context, parent_id) {
            Some(html) => Some(html),
            None => return Ok(html_unavailable(check)),
        },
        None => None,
    };
    match find_broken_wikicode(&current, parent.as_deref(), context.language()) {
        Some(details) => {
            debug!(revid = context.revision.revid, %details, "broken wikicode");
            Ok(check
                .result(CheckStatus::Fail, details.clone())
                .stop_with(Decision::blocked(&details)))
        }
        None => Ok(check.result(
            CheckStatus::Ok,
            "No broken wikicode indicators detected.",
        )),
    }
}

pub(super) fn new_render_errors(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::NewRenderErrors;
    let no_new_errors = || {
        check.result(
            CheckStatus::Ok,
            "The edit does not introduce new rendering errors.",
        )
    };
    let Some(parent_id) = context.parent_id() else {
        return Ok(no_new_errors());
    };
    let (Some(current), Some(parent)) = (
        fetch_html(context, context.revision.revid),
        fetch_html(context, parent_id),
    ) else {
        return Ok(html_unavailable(check));
    };
    let current_errors = context.render_error_count(context.revision.revid, &current);
    let parent_errors = context.render_error_count(parent_id, &parent);
    if current_errors > parent_errors {
        debug!(
            revid = context.revision.revid,
            current_errors, parent_errors, "new render errors"
        );
        return Ok(check
            .result(
                CheckStatus::Fail,
                "The edit introduces new rendering errors.",
            )
            .stop_with(Decision::blocked(
                "The edit introduces new rendering errors.",
            )));
    }
    Ok(no_new_errors())
}
