use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checks::{Check, CheckId};
use crate::client::ReviewClient;
use crate::config::ReviewPolicy;
use crate::context::CheckContext;
use crate::model::{
    CheckResult, CheckStatus, Decision, DecisionStatus, EditorProfile, PendingPage, Revision,
};
use crate::redirect::fallback_aliases;
use crate::store::ContentStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    pub id: String,
    pub title: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub trace: Vec<TraceEntry>,
    pub decision: Decision,
    pub total_duration_ms: f64,
}

/// A rule evaluated after every non-stopping check result. It can end the
/// run with a decision that no single check owns.
pub struct PostCheckRule {
    pub name: &'static str,
    pub apply: fn(&CheckResult, &CheckContext<'_>) -> Option<Decision>,
}

pub const POST_CHECK_RULES: &[PostCheckRule] = &[PostCheckRule {
    name: "autopatrol-after-redirect",
    apply: autopatrol_after_redirect,
}];

fn autopatrol_after_redirect(result: &CheckResult, context: &CheckContext<'_>) -> Option<Decision> {
    let applies = result.check_id == CheckId::ArticleToRedirectConversion.as_str()
        && result.status == CheckStatus::Ok
        && context.profile.is_some_and(|profile| profile.is_autopatrolled);
    applies.then(|| Decision::approve("The user has autopatrol rights that allow auto-approval."))
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Run `checks` in ascending priority (stable for equal priorities) until one
/// stops the pipeline. Errors from a check abort the run.
pub fn run_pipeline(checks: &[&dyn Check], context: &CheckContext<'_>) -> Result<PipelineReport> {
    let started = Instant::now();
    let mut ordered = checks.to_vec();
    ordered.sort_by_key(|check| check.priority());

    let mut trace = Vec::with_capacity(ordered.len());
    for check in ordered {
        let check_started = Instant::now();
        let result = check
            .evaluate(context)
            .with_context(|| format!("check {} failed", check.id()))?;
        debug!(
            check = check.id(),
            revid = context.revision.revid,
            status = result.status.as_str(),
            "check finished"
        );
        trace.push(TraceEntry {
            id: result.check_id.clone(),
            title: result.check_title.clone(),
            status: result.status,
            message: result.message.clone(),
            duration_ms: elapsed_ms(check_started),
        });

        if result.should_stop {
            let decision = result
                .decision
                .unwrap_or_else(|| Decision::manual("The check stopped without a decision."));
            return Ok(PipelineReport {
                trace,
                decision,
                total_duration_ms: elapsed_ms(started),
            });
        }
        if let Some((rule, decision)) = POST_CHECK_RULES
            .iter()
            .find_map(|rule| (rule.apply)(&result, context).map(|decision| (rule, decision)))
        {
            debug!(rule = rule.name, revid = context.revision.revid, "post-check rule fired");
            return Ok(PipelineReport {
                trace,
                decision,
                total_duration_ms: elapsed_ms(started),
            });
        }
    }
    Ok(PipelineReport {
        trace,
        decision: Decision::dry_run_default(),
        total_duration_ms: elapsed_ms(started),
    })
}

/// Run the configured catalog selection.
pub fn run_checks(enabled: &[CheckId], context: &CheckContext<'_>) -> Result<PipelineReport> {
    let selected = CheckId::selection(enabled);
    let checks = selected
        .iter()
        .map(|check| check as &dyn Check)
        .collect::<Vec<_>>();
    run_pipeline(&checks, context)
}

pub fn run_single_check(check_id: &str, context: &CheckContext<'_>) -> Result<CheckResult> {
    let Ok(check) = CheckId::parse(check_id) else {
        bail!("check with id `{check_id}` not found");
    };
    check.evaluate(context)
}

/// Aliases in effect: configured, then the wiki's own, then the built-in table.
pub fn resolve_redirect_aliases(
    policy: &ReviewPolicy,
    client: &dyn ReviewClient,
    language: &str,
) -> Vec<String> {
    if !policy.redirect_aliases.is_empty() {
        return policy.redirect_aliases.clone();
    }
    match client.redirect_aliases() {
        Ok(aliases) if !aliases.is_empty() => aliases,
        Ok(_) => fallback_aliases(language),
        Err(error) => {
            warn!(%error, "redirect aliases unavailable, using built-in list");
            fallback_aliases(language)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevisionEvaluation {
    pub revid: i64,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PipelineReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RevisionEvaluation {
    /// Evaluation failures surface as an `error` decision.
    pub fn decision_status(&self) -> DecisionStatus {
        self.report
            .as_ref()
            .map_or(DecisionStatus::Error, |report| report.decision.status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageEvaluation {
    pub title: String,
    pub page_id: i64,
    pub revisions: Vec<RevisionEvaluation>,
}

/// Evaluates the pending revisions of pages against one wiki's policy.
pub struct PageEvaluator<'a> {
    pub client: &'a dyn ReviewClient,
    pub store: &'a dyn ContentStore,
    pub policy: &'a ReviewPolicy,
    pub redirect_aliases: Vec<String>,
    /// Run only this check instead of the configured selection.
    pub only: Option<CheckId>,
}

impl<'a> PageEvaluator<'a> {
    pub fn new(
        client: &'a dyn ReviewClient,
        store: &'a dyn ContentStore,
        policy: &'a ReviewPolicy,
        language: &str,
    ) -> Self {
        Self {
            client,
            store,
            policy,
            redirect_aliases: resolve_redirect_aliases(policy, client, language),
            only: None,
        }
    }

    /// Cached profile while fresh, otherwise one rebuilt from the revision's groups.
    fn editor_profile(&self, page: &PendingPage, revision: &Revision) -> EditorProfile {
        let now = Utc::now();
        match self.store.editor_profile(&page.wiki, &revision.user_name) {
            Ok(Some(profile)) if !profile.is_expired(now) => return profile,
            Ok(_) => {}
            Err(error) => warn!(
                user = %revision.user_name,
                error = %format!("{error:#}"),
                "editor profile lookup failed"
            ),
        }
        let profile =
            EditorProfile::from_groups(page.wiki.clone(), &revision.user_name, &revision.metadata, now);
        if let Err(error) = self.store.save_editor_profile(&profile) {
            warn!(user = %revision.user_name, error = %format!("{error:#}"), "editor profile not saved");
        }
        profile
    }

    pub fn evaluate_revision(&self, page: &PendingPage, revision: &Revision) -> Result<PipelineReport> {
        let profile = self.editor_profile(page, revision);
        let context = CheckContext::new(
            page,
            revision,
            self.client,
            self.store,
            Some(&profile),
            self.policy,
            &self.redirect_aliases,
        )?;
        match self.only {
            Some(check) => run_pipeline(&[&check], &context),
            None => run_checks(&self.policy.enabled_checks, &context),
        }
    }

    /// Evaluate every pending revision. A failing revision is recorded and
    /// the next one is still evaluated.
    pub fn evaluate_page(&self, page: &PendingPage) -> PageEvaluation {
        let revisions = page
            .pending_revisions()
            .into_iter()
            .map(|revision| {
                let (report, error) = match self.evaluate_revision(page, revision) {
                    Ok(report) => {
                        info!(
                            page = %page.title,
                            revid = revision.revid,
                            decision = report.decision.status.as_str(),
                            "revision evaluated"
                        );
                        (Some(report), None)
                    }
                    Err(error) => {
                        warn!(
                            page = %page.title,
                            revid = revision.revid,
                            error = %format!("{error:#}"),
                            "revision evaluation failed"
                        );
                        (None, Some(format!("{error:#}")))
                    }
                };
                RevisionEvaluation {
                    revid: revision.revid,
                    user_name: revision.user_name.clone(),
                    report,
                    error,
                }
            })
            .collect();
        PageEvaluation {
            title: page.title.clone(),
            page_id: page.page_id,
            revisions,
        }
    }

    /// Pages are independent and evaluated on up to `workers` scoped threads.
    /// Results keep the input order.
    pub fn evaluate_pages(&self, pages: &[PendingPage], workers: usize) -> Vec<PageEvaluation> {
        let workers = workers.clamp(1, pages.len().max(1));
        if workers == 1 {
            return pages.iter().map(|page| self.evaluate_page(page)).collect();
        }
        let next = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(pages.len()));
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(page) = pages.get(index) else {
                            break;
                        };
                        let evaluation = self.evaluate_page(page);
                        push_indexed(&results, index, evaluation);
                    }
                });
            }
        });
        into_input_order(results)
    }
}

fn push_indexed<T>(results: &Mutex<Vec<(usize, T)>>, index: usize, value: T) {
    results
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((index, value));
}

fn into_input_order<T>(results: Mutex<Vec<(usize, T)>>) -> Vec<T> {
    let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::{Result, bail};
    use chrono::Utc;

    use super::{
        PageEvaluator, into_input_order, push_indexed, run_checks, run_pipeline, run_single_check,
    };
    use crate::checks::{Check, CheckId};
    use crate::client::OresScores;
    use crate::config::{OresThresholds, ReviewPolicy};
    use crate::context::CheckContext;
    use crate::model::{
        CheckResult, CheckStatus, Decision, DecisionStatus, EditorProfile, PendingPage, WikiId,
    };
    use crate::store::{ContentStore, MemoryContentStore};
    use crate::testing::{MockClient, page_with, pending};

    struct Fixed {
        id: &'static str,
        priority: u32,
        decision: Option<Decision>,
    }

    impl Check for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn evaluate(&self, _context: &CheckContext<'_>) -> Result<CheckResult> {
            let result = CheckResult::new(self.id, self.id, CheckStatus::Ok, "fixed");
            Ok(match &self.decision {
                Some(decision) => result.stop_with(decision.clone()),
                None => result,
            })
        }
    }

    struct Failing;

    impl Check for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        fn priority(&self) -> u32 {
            0
        }

        fn evaluate(&self, _context: &CheckContext<'_>) -> Result<CheckResult> {
            bail!("unexpected response shape")
        }
    }

    fn with_context<T>(
        page: &PendingPage,
        client: &MockClient,
        profile: Option<&EditorProfile>,
        policy: &ReviewPolicy,
        run: impl FnOnce(&CheckContext<'_>) -> T,
    ) -> T {
        let store = MemoryContentStore::new();
        let revision = page.revisions.last().expect("revision");
        let context = CheckContext::new(
            page,
            revision,
            client,
            &store,
            profile,
            policy,
            &["#REDIRECT".to_string()],
        )
        .expect("context");
        run(&context)
    }

    fn profile(configure: impl FnOnce(&mut EditorProfile)) -> EditorProfile {
        let mut profile = EditorProfile::empty(WikiId::default(), "Editor", Utc::now());
        configure(&mut profile);
        profile
    }

    #[test]
    fn lower_priority_stop_wins_and_hides_later_checks() {
        let page = page_with(vec![pending(101, 100, "Text")]);
        let approve = Fixed {
            id: "a",
            priority: 1,
            decision: Some(Decision::approve("A")),
        };
        let block = Fixed {
            id: "b",
            priority: 2,
            decision: Some(Decision::blocked("B")),
        };
        let report = with_context(
            &page,
            &MockClient::default(),
            None,
            &ReviewPolicy::default(),
            |context| run_pipeline(&[&block, &approve], context),
        )
        .expect("run");
        assert_eq!(report.decision.status, DecisionStatus::Approve);
        assert_eq!(report.trace.len(), 1);
        assert_eq!(report.trace[0].id, "a");
    }

    #[test]
    fn no_stop_yields_dry_run_manual_decision() {
        let page = page_with(vec![pending(101, 100, "Text")]);
        let first = Fixed {
            id: "first",
            priority: 3,
            decision: None,
        };
        let second = Fixed {
            id: "second",
            priority: 3,
            decision: None,
        };
        let report = with_context(
            &page,
            &MockClient::default(),
            None,
            &ReviewPolicy::default(),
            |context| run_pipeline(&[&first, &second], context),
        )
        .expect("run");
        assert_eq!(report.decision, Decision::dry_run_default());
        let ids = report.trace.iter().map(|entry| entry.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn check_errors_abort_the_run() {
        let page = page_with(vec![pending(101, 100, "Text")]);
        let error = with_context(
            &page,
            &MockClient::default(),
            None,
            &ReviewPolicy::default(),
            |context| run_pipeline(&[&Failing], context),
        )
        .expect_err("failing check");
        assert!(format!("{error:#}").contains("unexpected response shape"));
    }

    #[test]
    fn repeated_runs_are_identical() {
        let page = page_with(vec![pending(101, 100, "Plain text")]);
        let mut client = MockClient::default();
        client.wikitext.insert(100, "Plain".to_string());
        let policy = ReviewPolicy::default();
        let enabled = [CheckId::BotUser, CheckId::InvalidIsbn, CheckId::ArticleToRedirectConversion];
        let runs = (0..2)
            .map(|_| {
                with_context(&page, &client, None, &policy, |context| {
                    run_checks(&enabled, context)
                })
                .expect("run")
            })
            .collect::<Vec<_>>();
        let strip = |report: &super::PipelineReport| {
            report
                .trace
                .iter()
                .map(|entry| (entry.id.clone(), entry.status, entry.message.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&runs[0]), strip(&runs[1]));
        assert_eq!(runs[0].decision, runs[1].decision);
    }

    #[test]
    fn scenario_bot_user_stops_first() {
        let page = page_with(vec![pending(101, 100, "Text")]);
        let bot = profile(|profile| profile.is_bot = true);
        let report = with_context(
            &page,
            &MockClient::default(),
            Some(&bot),
            &ReviewPolicy::default(),
            |context| run_checks(&[CheckId::BotUser], context),
        )
        .expect("run");
        assert_eq!(report.trace.len(), 1);
        assert_eq!(report.trace[0].id, "bot-user");
        assert_eq!(report.decision.status, DecisionStatus::Approve);

        let report = with_context(
            &page,
            &MockClient::default(),
            Some(&bot),
            &ReviewPolicy::default(),
            |context| run_checks(&[CheckId::BotUser, CheckId::ManualUnapproval], context),
        )
        .expect("run");
        assert_eq!(report.trace.len(), 2);
        assert!(report.trace.iter().all(|entry| entry.status == CheckStatus::Ok));
        assert_eq!(report.decision.status, DecisionStatus::Approve);
    }

    #[test]
    fn scenario_article_to_redirect_without_rights_is_blocked() {
        let page = page_with(vec![pending(101, 100, "#REDIRECT [[Target]]")]);
        let mut client = MockClient::default();
        client.wikitext.insert(100, "Article body.".to_string());
        client.html.insert(100, "<p>Article body.</p>".to_string());
        client.html.insert(101, "<p>Redirect to Target</p>".to_string());
        let user = profile(|_| {});
        let report = with_context(&page, &client, Some(&user), &ReviewPolicy::default(), |context| {
            run_checks(&[], context)
        })
        .expect("run");
        assert_eq!(report.decision.status, DecisionStatus::Blocked);
        assert!(report.decision.reason.contains("autoreview rights"));
        assert_eq!(
            report.trace.last().map(|entry| entry.id.as_str()),
            Some("article-to-redirect-conversion")
        );
    }

    #[test]
    fn autopatrolled_user_is_approved_after_redirect_check() {
        let page = page_with(vec![pending(101, 100, "Ordinary article text.")]);
        let mut client = MockClient::default();
        client.wikitext.insert(100, "Ordinary text.".to_string());
        let patroller = profile(|profile| profile.is_autopatrolled = true);
        let report = with_context(&page, &client, Some(&patroller), &ReviewPolicy::default(), |context| {
            run_checks(
                &[
                    CheckId::AutoApprovedGroup,
                    CheckId::ArticleToRedirectConversion,
                    CheckId::InvalidIsbn,
                ],
                context,
            )
        })
        .expect("run");
        assert_eq!(report.trace.len(), 2);
        assert_eq!(
            report.decision.reason,
            "The user has autopatrol rights that allow auto-approval."
        );
    }

    #[test]
    fn scenario_invalid_isbn_is_blocked() {
        let page = page_with(vec![pending(
            101,
            100,
            "Book. {{cite book |title=X |isbn=978-0-306-40615-8}}",
        )]);
        let mut client = MockClient::default();
        client.wikitext.insert(100, "Book.".to_string());
        let report = with_context(&page, &client, None, &ReviewPolicy::default(), |context| {
            run_checks(&[CheckId::ArticleToRedirectConversion, CheckId::InvalidIsbn], context)
        })
        .expect("run");
        assert_eq!(report.decision.status, DecisionStatus::Blocked);
        assert!(report.trace[1].message.contains("978-0-306-40615-8"));
    }

    #[test]
    fn scenario_reference_with_unused_domain_needs_manual_review() {
        let page = page_with(vec![pending(
            101,
            100,
            "Article content.<ref>http://newdomain.com/x</ref>",
        )]);
        let mut client = MockClient::default();
        client.wikitext.insert(100, "Article content.".to_string());
        let user = profile(|_| {});
        let report = with_context(&page, &client, Some(&user), &ReviewPolicy::default(), |context| {
            run_checks(&[], context)
        })
        .expect("run");
        assert_eq!(report.decision.status, DecisionStatus::Manual);
        let last = report.trace.last().expect("trace");
        assert_eq!(last.id, "reference-only-edit");
        assert!(last.message.contains("newdomain.com"));
    }

    #[test]
    fn scenario_damaging_score_is_blocked() {
        let page = page_with(vec![pending(101, 100, "Text")]);
        let client = MockClient {
            ores: Some(OresScores {
                damaging: Some(0.85),
                goodfaith: None,
            }),
            ..MockClient::default()
        };
        let policy = ReviewPolicy {
            ores: OresThresholds {
                damaging: 0.7,
                ..OresThresholds::default()
            },
            ..ReviewPolicy::default()
        };
        let report = with_context(&page, &client, None, &policy, |context| {
            run_checks(&[CheckId::BotUser, CheckId::OresScores], context)
        })
        .expect("run");
        assert_eq!(report.decision.status, DecisionStatus::Blocked);
        let message = &report.trace[1].message;
        assert!(message.contains("0.850") && message.contains("0.700"));
    }

    #[test]
    fn single_check_by_id() {
        let page = page_with(vec![pending(101, 100, "Text")]);
        let client = MockClient::default();
        let policy = ReviewPolicy::default();
        with_context(&page, &client, None, &policy, |context| {
            let result = run_single_check("bot-user", context).expect("known check");
            assert_eq!(result.status, CheckStatus::NotOk);
            assert!(run_single_check("nope", context).is_err());
        });
    }

    #[test]
    fn results_survive_a_poisoned_collector() {
        let results = Mutex::new(Vec::new());
        push_indexed(&results, 1, "second");
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = results.lock().expect("lock");
            panic!("worker panicked while holding the lock");
        }));
        assert!(poisoned.is_err());
        assert!(results.is_poisoned());
        push_indexed(&results, 0, "first");
        assert_eq!(into_input_order(results), vec!["first", "second"]);
    }

    #[test]
    fn page_evaluation_uses_cached_profiles_and_keeps_page_order() {
        let mut first = page_with(vec![pending(101, 100, "Text"), pending(102, 101, "More")]);
        first.title = "First".to_string();
        let mut second = page_with(vec![pending(201, 100, "Other")]);
        second.title = "Second".to_string();
        second.revisions[1].user_name = "HelperBot".to_string();
        second.revisions[1].metadata.rc_bot = true;

        let client = MockClient {
            aliases: vec!["#REDIRECT".to_string()],
            ..MockClient::default()
        };
        let store = MemoryContentStore::new();
        let policy = ReviewPolicy {
            enabled_checks: vec![CheckId::BotUser],
            ..ReviewPolicy::default()
        };
        let evaluator = PageEvaluator::new(&client, &store, &policy, "en");
        let results = evaluator.evaluate_pages(&[first, second], 4);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "First");
        assert_eq!(
            results[0]
                .revisions
                .iter()
                .map(|revision| revision.revid)
                .collect::<Vec<_>>(),
            vec![101, 102]
        );
        assert_eq!(results[0].revisions[0].decision_status(), DecisionStatus::Manual);
        assert_eq!(results[1].revisions[0].decision_status(), DecisionStatus::Approve);
        assert!(
            store
                .editor_profile(&WikiId::default(), "Editor")
                .expect("profile lookup")
                .is_some()
        );
    }
}
