//! Fixed catalog of autoreview checks.

mod content;
mod ores;
mod render;
mod user;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::context::CheckContext;
use crate::model::{CheckResult, CheckStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckId {
    BrokenWikicode,
    ManualUnapproval,
    BotUser,
    BlockedUser,
    AutoApprovedGroup,
    ArticleToRedirectConversion,
    BlockingCategories,
    NewRenderErrors,
    InvalidIsbn,
    ReferenceOnlyEdit,
    SupersededAdditions,
    OresScores,
    RevertDetection,
}

impl CheckId {
    pub const ALL: [CheckId; 13] = [
        Self::BrokenWikicode,
        Self::ManualUnapproval,
        Self::BotUser,
        Self::BlockedUser,
        Self::AutoApprovedGroup,
        Self::ArticleToRedirectConversion,
        Self::BlockingCategories,
        Self::NewRenderErrors,
        Self::InvalidIsbn,
        Self::ReferenceOnlyEdit,
        Self::SupersededAdditions,
        Self::OresScores,
        Self::RevertDetection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BrokenWikicode => "broken-wikicode",
            Self::ManualUnapproval => "manual-unapproval",
            Self::BotUser => "bot-user",
            Self::BlockedUser => "blocked-user",
            Self::AutoApprovedGroup => "auto-approved-group",
            Self::ArticleToRedirectConversion => "article-to-redirect-conversion",
            Self::BlockingCategories => "blocking-categories",
            Self::NewRenderErrors => "new-render-errors",
            Self::InvalidIsbn => "invalid-isbn",
            Self::ReferenceOnlyEdit => "reference-only-edit",
            Self::SupersededAdditions => "superseded-additions",
            Self::OresScores => "ores-scores",
            Self::RevertDetection => "revert-detection",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match Self::ALL
            .into_iter()
            .find(|check| check.as_str() == normalized)
        {
            Some(check) => Ok(check),
            None => bail!("unknown check id `{value}`"),
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::BrokenWikicode => "Broken wikicode indicators",
            Self::ManualUnapproval => "Manual un-approval check",
            Self::BotUser => "Bot user",
            Self::BlockedUser => "User block status",
            Self::AutoApprovedGroup => "Auto-approved groups",
            Self::ArticleToRedirectConversion => "Article-to-redirect conversion",
            Self::BlockingCategories => "Blocking categories",
            Self::NewRenderErrors => "New render errors",
            Self::InvalidIsbn => "ISBN checksum validation",
            Self::ReferenceOnlyEdit => "Reference-only edit detection",
            Self::SupersededAdditions => "Superseded additions",
            Self::OresScores => "ORES edit quality scores",
            Self::RevertDetection => "Revert to reviewed version",
        }
    }

    /// Lower runs first.
    pub fn priority(self) -> u32 {
        match self {
            Self::BrokenWikicode => 0,
            Self::ManualUnapproval => 1,
            Self::BotUser => 2,
            Self::BlockedUser => 3,
            Self::AutoApprovedGroup => 4,
            Self::ArticleToRedirectConversion => 5,
            Self::BlockingCategories => 6,
            Self::NewRenderErrors => 7,
            Self::InvalidIsbn => 8,
            Self::ReferenceOnlyEdit => 9,
            Self::SupersededAdditions => 10,
            Self::OresScores => 11,
            Self::RevertDetection => 12,
        }
    }

    /// Revert detection is a plugin and only runs when listed explicitly.
    pub fn is_default(self) -> bool {
        self != Self::RevertDetection
    }

    pub fn default_catalog() -> Vec<CheckId> {
        Self::ALL
            .into_iter()
            .filter(|check| check.is_default())
            .collect()
    }

    /// The checks to run: the configured ones in priority order, or the
    /// default catalog when none are configured.
    pub fn selection(enabled: &[CheckId]) -> Vec<CheckId> {
        if enabled.is_empty() {
            return Self::default_catalog();
        }
        let mut selected = Vec::with_capacity(enabled.len());
        for check in enabled {
            if !selected.contains(check) {
                selected.push(*check);
            }
        }
        selected.sort_by_key(|check| check.priority());
        selected
    }

    fn result(self, status: CheckStatus, message: impl Into<String>) -> CheckResult {
        CheckResult::new(self.as_str(), self.title(), status, message)
    }
}

/// One pipeline step. Foreseeable failures are turned into results by the
/// check itself; an `Err` aborts the evaluation of the revision.
pub trait Check: Sync {
    fn id(&self) -> &str;
    fn priority(&self) -> u32;
    fn evaluate(&self, context: &CheckContext<'_>) -> Result<CheckResult>;
}

impl Check for CheckId {
    fn id(&self) -> &str {
        self.as_str()
    }

    fn priority(&self) -> u32 {
        CheckId::priority(*self)
    }

    fn evaluate(&self, context: &CheckContext<'_>) -> Result<CheckResult> {
        match self {
            Self::BrokenWikicode => render::broken_wikicode(context),
            Self::ManualUnapproval => user::manual_unapproval(context),
            Self::BotUser => user::bot_user(context),
            Self::BlockedUser => user::blocked_user(context),
            Self::AutoApprovedGroup => user::auto_approved_group(context),
            Self::ArticleToRedirectConversion => content::article_to_redirect(context),
            Self::BlockingCategories => content::blocking_categories(context),
            Self::NewRenderErrors => render::new_render_errors(context),
            Self::InvalidIsbn => content::invalid_isbn(context),
            Self::ReferenceOnlyEdit => content::reference_only_edit(context),
            Self::SupersededAdditions => content::superseded_additions(context),
            Self::OresScores => ores::ores_scores(context),
            Self::RevertDetection => content::revert_detection(context),
        }
    }
}
