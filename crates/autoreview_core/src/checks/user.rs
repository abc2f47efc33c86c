use anyhow::Result;
use tracing::{debug, warn};

use super::CheckId;
use crate::context::CheckContext;
use crate::model::{CheckResult, CheckStatus, Decision};

pub(super) fn bot_user(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::BotUser;
    let is_bot = context.revision.metadata.rc_bot
        || context
            .profile
            .is_some_and(|profile| profile.is_bot || profile.is_former_bot);
    if is_bot {
        debug!(user = %context.revision.user_name, "bot edit");
        return Ok(check
            .result(
                CheckStatus::Ok,
                "The edit could be auto-approved because the user is a bot.",
            )
            .stop_with(Decision::approve("The user is recognized as a bot.")));
    }
    Ok(check.result(CheckStatus::NotOk, "The user is not marked as a bot."))
}

pub(super) fn auto_approved_group(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::AutoApprovedGroup;
    let auto_groups = &context.policy.auto_groups;
    if !auto_groups.is_empty() {
        let profile_groups = context
            .profile
            .map(|profile| profile.usergroups.as_slice())
            .unwrap_or_default();
        let matched = auto_groups.matches(
            context
                .revision
                .metadata
                .user_groups
                .iter()
                .chain(profile_groups)
                .map(String::as_str),
        );
        if matched.is_empty() {
            return Ok(check.result(
                CheckStatus::NotOk,
                "The user does not belong to auto-approved groups.",
            ));
        }
        let listed = matched.into_iter().collect::<Vec<_>>().join(", ");
        return Ok(check
            .result(
                CheckStatus::Ok,
                format!("The user belongs to groups: {listed}."),
            )
            .stop_with(Decision::approve(
                "The user belongs to groups that are auto-approved.",
            )));
    }

    match context.profile {
        Some(profile) if profile.is_autoreviewed => Ok(check
            .result(
                CheckStatus::Ok,
                "The user has default auto-approval rights: Autoreviewed.",
            )
            .stop_with(Decision::approve(
                "The user has autoreview rights that allow auto-approval.",
            ))),
        Some(profile) if profile.is_autopatrolled => Ok(check.result(
            CheckStatus::NotOk,
            "The user does not have autoreview rights.",
        )),
        _ => Ok(check.result(
            CheckStatus::NotOk,
            "The user does not have default auto-approval rights.",
        )),
    }
}

pub(super) fn blocked_user(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::BlockedUser;
    let revision = context.revision;
    match context
        .client
        .is_user_blocked_after_edit(&revision.user_name, revision.timestamp)
    {
        Ok(true) => Ok(CheckResult::new(
            check.as_str(),
            "User blocked after edit",
            CheckStatus::Fail,
            "User was blocked after making this edit.",
        )
        .stop_with(Decision::blocked(
            "User was blocked after making this edit.",
        ))),
        Ok(false) => Ok(check.result(
            CheckStatus::Ok,
            "User has not been blocked since making this edit.",
        )),
        Err(error) => {
            warn!(user = %revision.user_name, %error, "block lookup failed");
            Ok(CheckResult::new(
                check.as_str(),
                "Block check failed",
                CheckStatus::Fail,
                "Could not verify user block status.",
            )
            .stop_with(Decision::blocked("Unable to verify user was not blocked.")))
        }
    }
}

pub(super) fn manual_unapproval(context: &CheckContext<'_>) -> Result<CheckResult> {
    let check = CheckId::ManualUnapproval;
    match context
        .client
        .has_manual_unapproval(&context.page.title, context.revision.revid)
    {
        Ok(true) => Ok(check
            .result(
                CheckStatus::Fail,
                "This revision was manually un-approved by a human reviewer and should not be auto-approved.",
            )
            .stop_with(Decision::blocked(
                "Revision was manually un-approved by a human reviewer.",
            ))),
        Ok(false) => Ok(check.result(
            CheckStatus::Ok,
            "This revision has not been manually un-approved.",
        )),
        Err(error) => {
            warn!(revid = context.revision.revid, %error, "review log lookup failed");
            Ok(check
                .result(CheckStatus::Fail, "Could not verify review log status.")
                .stop_with(Decision::blocked(
                    "Unable to verify the revision was not manually un-approved.",
                )))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::checks::{Check, CheckId};
    use crate::config::ReviewPolicy;
    use crate::categories::NameLookup;
    use crate::context::CheckContext;
    use crate::model::{CheckStatus, DecisionStatus, EditorProfile, WikiId};
    use crate::store::MemoryContentStore;
    use crate::testing::{MockClient, page_with, pending};

    fn run(
        check: CheckId,
        client: &MockClient,
        profile: Option<&EditorProfile>,
        policy: &ReviewPolicy,
        configure: impl FnOnce(&mut crate::model::Revision),
    ) -> crate::model::CheckResult {
        let mut revision = pending(101, 100, "Text");
        configure(&mut revision);
        let page = page_with(vec![revision]);
        let store = MemoryContentStore::new();
        let context = CheckContext::new(
            &page,
            &page.revisions[1],
            client,
            &store,
            profile,
            policy,
            &["#REDIRECT".to_string()],
        )
        .expect("context");
        check.evaluate(&context).expect("evaluate")
    }

    fn profile(configure: impl FnOnce(&mut EditorProfile)) -> EditorProfile {
        let mut profile = EditorProfile::empty(WikiId::default(), "Editor", Utc::now());
        configure(&mut profile);
        profile
    }

    #[test]
    fn bot_flag_from_metadata_or_profile_approves() {
        let client = MockClient::default();
        let policy = ReviewPolicy::default();
        let result = run(CheckId::BotUser, &client, None, &policy, |revision| {
            revision.metadata.rc_bot = true;
        });
        assert!(result.should_stop);
        assert_eq!(
            result.decision.map(|decision| decision.status),
            Some(DecisionStatus::Approve)
        );

        let former = profile(|profile| profile.is_former_bot = true);
        let result = run(CheckId::BotUser, &client, Some(&former), &policy, |_| {});
        assert!(result.should_stop);

        let result = run(CheckId::BotUser, &client, None, &policy, |_| {});
        assert_eq!(result.status, CheckStatus::NotOk);
        assert!(!result.should_stop);
    }

    #[test]
    fn configured_groups_match_case_insensitively_and_sorted() {
        let client = MockClient::default();
        let policy = ReviewPolicy {
            auto_groups: NameLookup::new(["Sysop", "Editor"]),
            ..ReviewPolicy::default()
        };
        let user = profile(|profile| profile.usergroups = vec!["sysop".to_string()]);
        let result = run(
            CheckId::AutoApprovedGroup,
            &client,
            Some(&user),
            &policy,
            |revision| revision.metadata.user_groups = vec!["EDITOR".to_string()],
        );
        assert_eq!(result.message, "The user belongs to groups: Editor, Sysop.");
        assert!(result.should_stop);

        let result = run(CheckId::AutoApprovedGroup, &client, None, &policy, |_| {});
        assert_eq!(result.status, CheckStatus::NotOk);
    }

    #[test]
    fn without_group_list_autoreviewed_profile_approves() {
        let client = MockClient::default();
        let policy = ReviewPolicy::default();
        let reviewer = profile(|profile| profile.is_autoreviewed = true);
        let result = run(
            CheckId::AutoApprovedGroup,
            &client,
            Some(&reviewer),
            &policy,
            |_| {},
        );
        assert!(result.should_stop);

        let patroller = profile(|profile| profile.is_autopatrolled = true);
        let result = run(
            CheckId::AutoApprovedGroup,
            &client,
            Some(&patroller),
            &policy,
            |_| {},
        );
        assert_eq!(result.message, "The user does not have autoreview rights.");
        assert!(!result.should_stop);
    }

    #[test]
    fn block_lookup_failure_blocks() {
        let policy = ReviewPolicy::default();
        let client = MockClient {
            block_log_down: true,
            ..MockClient::default()
        };
        let result = run(CheckId::BlockedUser, &client, None, &policy, |_| {});
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.message, "Could not verify user block status.");
        assert_eq!(
            result.decision.map(|decision| decision.status),
            Some(DecisionStatus::Blocked)
        );

        let mut client = MockClient::default();
        client.blocked_users.insert("Editor".to_string());
        let result = run(CheckId::BlockedUser, &client, None, &policy, |_| {});
        assert!(result.should_stop);
        assert_eq!(result.check_title, "User blocked after edit");
    }

    #[test]
    fn unapproved_revision_is_blocked() {
        let policy = ReviewPolicy::default();
        let mut client = MockClient::default();
        client.unapproved.insert(101);
        let result = run(CheckId::ManualUnapproval, &client, None, &policy, |_| {});
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.should_stop);

        let client = MockClient::default();
        let result = run(CheckId::ManualUnapproval, &client, None, &policy, |_| {});
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(!result.should_stop);
    }
}
