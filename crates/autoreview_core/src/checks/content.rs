use anyhow::Result;
use tracing::{debug, info, warn};

use super::CheckId;
use crate::context::CheckContext;
use crate::isbn::find_invalid_isbns;
use crate::lookup::LookupResult;
use crate::model::{CheckResult, CheckStatus, Decision};
use crate::references::{diff_references, reference_domains};
use crate::revert::{has_revert_tag, parse_reverted_revision_ids};
use crate::similarity::find_superseded_addition;

const SHOWN_NEW_DOMAINS: usize = 3;

fn wikitext_unavailable(check: CheckId) -> CheckResult {
    check.result(CheckStatus::Skip, "Could not fetch wikitext for analysis.")
}

pub(super) fn article_to_redirect(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::ArticleToRedirectConversion;
    let not_conversion =
        || check.result(CheckStatus::Ok, "This is not an article-to-redirect conversion.");

    let current = match context.current_wikitext() {
        Ok(text) => text,
        Err(error) => {
            warn!(revid = context.revision.revid, %error, "wikitext unavailable");
            return Ok(wikitext_unavailable(check));
        }
    };
    if !context.redirects.is_redirect(&current) {
        return Ok(not_conversion());
    }
    let Some(parent) = context.parent_wikitext() else {
        return Ok(not_conversion());
    };
    let parent = match parent {
        Ok(text) => text,
        Err(error) => {
            warn!(revid = context.revision.revid, %error, "parent wikitext unavailable");
            return Ok(wikitext_unavailable(check));
        }
    };
    if parent.is_empty() || context.redirects.is_redirect(&parent) {
        return Ok(not_conversion());
    }
    Ok(check
        .result(
            CheckStatus::Fail,
            "Converting articles to redirects requires autoreview rights.",
        )
        .stop_with(Decision::blocked(
            "Article-to-redirect conversions require autoreview rights.",
        )))
}

pub(super) fn blocking_categories(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::BlockingCategories;
    let lookup = &context.policy.blocking_categories;
    if lookup.is_empty() {
        return Ok(check.result(
            CheckStatus::Ok,
            "The previous version is not in blocking categories.",
        ));
    }
    let (revision_categories, unavailable) = match context.categories(context.revision.revid) {
        Ok(categories) => (categories, false),
        Err(error) => {
            warn!(revid = context.revision.revid, %error, "categories unavailable");
            (Vec::new(), true)
        }
    };
    let hits = lookup.matches(
        revision_categories
            .iter()
            .chain(&context.page.categories)
            .map(String::as_str),
    );
    if !hits.is_empty() {
        let listed = hits.into_iter().collect::<Vec<_>>().join(", ");
        return Ok(check
            .result(
                CheckStatus::Fail,
                format!("The previous version belongs to blocking categories: {listed}."),
            )
            .stop_with(Decision::blocked(
                "The previous version belongs to blocking categories.",
            )));
    }
    if unavailable {
        return Ok(check.result(
            CheckStatus::Skip,
            "Could not fetch the revision categories for analysis.",
        ));
    }
    Ok(check.result(
        CheckStatus::Ok,
        "The previous version is not in blocking categories.",
    ))
}

pub(super) fn invalid_isbn(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::InvalidIsbn;
    let Ok(wikitext) = context.current_wikitext() else {
        return Ok(wikitext_unavailable(check));
    };
    let invalid = find_invalid_isbns(&wikitext);
    if invalid.is_empty() {
        return Ok(check.result(CheckStatus::Ok, "No invalid ISBNs detected."));
    }
    Ok(check
        .result(
            CheckStatus::Fail,
            format!("The edit contains invalid ISBN(s): {}.", invalid.join(", ")),
        )
        .stop_with(Decision::blocked(
            "The edit contains ISBN(s) with invalid checksums.",
        )))
}

pub(super) fn reference_only_edit(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::ReferenceOnlyEdit;
    let beyond_references = || check.result(CheckStatus::Skip, "Edit modifies content beyond references.");

    let Some(parent) = context.parent_wikitext() else {
        return Ok(beyond_references());
    };
    let (Ok(parent), Ok(current)) = (parent, context.current_wikitext()) else {
        return Ok(wikitext_unavailable(check));
    };
    let diff = diff_references(&parent, &current);
    if !diff.is_reference_only {
        return Ok(if diff.has_removals {
            check.result(CheckStatus::Skip, "No new or modified references detected.")
        } else {
            beyond_references()
        });
    }

    let reference_count = diff.added_or_modified.len();
    let domains = reference_domains(&diff.added_or_modified);
    if domains.is_empty() {
        info!(
            revid = context.revision.revid,
            "reference-only edit without URLs"
        );
        return Ok(check
            .result(
                CheckStatus::Ok,
                format!("Edit only modifies references ({reference_count} reference(s) added/modified)."),
            )
            .stop_with(Decision::approve(
                "Edit only adds or modifies references without external URLs.",
            )));
    }

    let mut new_domains = Vec::new();
    for domain in &domains {
        match context.client.has_domain_been_used(domain) {
            Ok(true) => {}
            Ok(false) => {
                debug!(%domain, revid = context.revision.revid, "domain not used before");
                new_domains.push(domain.as_str());
            }
            Err(error) => {
                warn!(%domain, %error, "domain usage lookup failed");
                return Ok(check.result(
                    CheckStatus::NotOk,
                    format!("Could not verify prior usage of domain {domain}."),
                ));
            }
        }
    }

    if !new_domains.is_empty() {
        let mut listed = new_domains
            .iter()
            .take(SHOWN_NEW_DOMAINS)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        if new_domains.len() > SHOWN_NEW_DOMAINS {
            listed.push_str("...");
        }
        return Ok(check
            .result(
                CheckStatus::NotOk,
                format!("Edit adds references with new domain(s): {listed}"),
            )
            .stop_with(Decision::manual(&format!(
                "Reference-only edit contains {} previously unused domain(s).",
                new_domains.len()
            ))));
    }

    info!(
        revid = context.revision.revid,
        domains = domains.len(),
        "reference-only edit with known domains"
    );
    Ok(check
        .result(
            CheckStatus::Ok,
            format!(
                "Edit only modifies references ({reference_count} reference(s) with {} known domain(s)).",
                domains.len()
            ),
        )
        .stop_with(Decision::approve(
            "Edit only adds or modifies references with known domains.",
        )))
}

pub(super) fn superseded_additions(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::SupersededAdditions;
    let still_relevant = || {
        check.result(
            CheckStatus::NotOk,
            "The additions from this revision are still relevant.",
        )
    };
    let unverified = || {
        CheckResult::new(
            check.as_str(),
            "Superseded additions check",
            CheckStatus::NotOk,
            "Could not verify if additions were superseded.",
        )
    };

    let reference = match reference_wikitext(context) {
        Ok(Some(text)) => text,
        Ok(None) => return Ok(still_relevant()),
        Err(error) => {
            warn!(revid = context.revision.revid, %error, "comparison wikitext unavailable");
            return Ok(unverified());
        }
    };
    let parent = match context.parent_wikitext() {
        Some(Ok(text)) => text,
        Some(Err(error)) => {
            warn!(revid = context.revision.revid, %error, "parent wikitext unavailable");
            return Ok(unverified());
        }
        None => String::new(),
    };
    let current = match context.current_wikitext() {
        Ok(text) if text.is_empty() => return Ok(still_relevant()),
        Ok(text) => text,
        Err(error) => {
            warn!(revid = context.revision.revid, %error, "pending wikitext unavailable");
            return Ok(unverified());
        }
    };

    let threshold = context.policy.superseded_similarity_threshold;
    match find_superseded_addition(&parent, &current, &reference, threshold) {
        Some(superseded) => {
            info!(
                revid = context.revision.revid,
                ratio = superseded.ratio,
                threshold,
                "addition superseded by later edits"
            );
            Ok(check
                .result(
                    CheckStatus::Ok,
                    "The additions from this revision have been superseded or removed in the latest version.",
                )
                .stop_with(Decision::approve("similarity below threshold")))
        }
        None => Ok(still_relevant()),
    }
}

/// Text the additions are compared against: the stable revision, or the
/// page's newest revision when the stable text is empty. `None` when there is
/// nothing newer than the evaluated revision to compare with.
fn reference_wikitext(context: &CheckContext<'_>) -> LookupResult<Option<String>> {
    match context.wikitext(context.page.stable_revid) {
        Ok(text) if !text.is_empty() => return Ok(Some(text)),
        Ok(_) => {}
        Err(error) => {
            debug!(stable = context.page.stable_revid, %error, "stable wikitext unavailable");
        }
    }
    let latest = context.latest_revision_id();
    if latest == context.revision.revid {
        return Ok(None);
    }
    let text = context.wikitext(latest)?;
    Ok((!text.is_empty()).then_some(text))
}

pub(super) fn revert_detection(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::RevertDetection;
    let revision = context.revision;
    if !has_revert_tag(&revision.change_tags) {
        return Ok(check.result(CheckStatus::Skip, "No revert tags found"));
    }
    let reverted = parse_reverted_revision_ids(&revision.change_tag_params);
    if reverted.is_empty() {
        return Ok(check.result(
            CheckStatus::Skip,
            "No reverted revision IDs found in change tags",
        ));
    }
    let reviewed = match context
        .client
        .reviewed_content_hashes(&context.page.title, &reverted)
    {
        Ok(reviewed) => reviewed,
        Err(error) => {
            warn!(revid = revision.revid, %error, "content hash lookup failed");
            return Ok(check.result(
                CheckStatus::NotOk,
                "Could not look up previously reviewed content.",
            ));
        }
    };
    match reviewed.first() {
        Some(content) => Ok(check
            .result(
                CheckStatus::Ok,
                format!(
                    "Revert to previously reviewed content (SHA1: {})",
                    content.sha1
                ),
            )
            .stop_with(Decision::approve(
                "This edit reverts to content that was previously reviewed and approved.",
            ))),
        None => Ok(check.result(
            CheckStatus::NotOk,
            "Revert detected but no previously reviewed content found",
        )),
    }
}
