use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lookup::LookupResult;
use crate::model::{PendingPage, WikiId};

/// A reverted-to revision whose content hash matches a reviewed revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewedContent {
    pub sha1: String,
    pub max_reviewed_id: i64,
    pub max_reviewable_id: i64,
    pub page_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OresModels {
    pub damaging: bool,
    pub goodfaith: bool,
}

impl OresModels {
    pub fn is_empty(self) -> bool {
        !self.damaging && !self.goodfaith
    }

    /// Value of the `models` query parameter, e.g. `damaging|goodfaith`.
    pub fn query_value(self) -> String {
        let mut models = Vec::with_capacity(2);
        if self.damaging {
            models.push("damaging");
        }
        if self.goodfaith {
            models.push("goodfaith");
        }
        models.join("|")
    }
}

/// ORES probabilities of the `true` class. `None` for models not requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OresScores {
    pub damaging: Option<f64>,
    pub goodfaith: Option<f64>,
}

impl OresScores {
    pub fn is_empty(&self) -> bool {
        self.damaging.is_none() && self.goodfaith.is_none()
    }
}

/// External capabilities the checks depend on. Every lookup reports failure
/// explicitly so each check chooses its own fail-safe behavior.
pub trait ReviewClient: Sync {
    /// Whether the most recent review-log action for `revid` un-approved it.
    fn has_manual_unapproval(&self, page_title: &str, revid: i64) -> LookupResult<bool>;

    fn is_user_blocked_after_edit(
        &self,
        username: &str,
        edit_timestamp: DateTime<Utc>,
    ) -> LookupResult<bool>;

    fn rendered_html(&self, revid: i64) -> LookupResult<String>;

    fn wikitext(&self, revid: i64) -> LookupResult<String>;

    /// Whether any article-space page already links to `domain`.
    fn has_domain_been_used(&self, domain: &str) -> LookupResult<bool>;

    fn reviewed_content_hashes(
        &self,
        page_title: &str,
        revids: &[i64],
    ) -> LookupResult<Vec<ReviewedContent>>;

    fn ores_scores(&self, wiki: &WikiId, revid: i64, models: OresModels)
    -> LookupResult<OresScores>;

    fn is_living_person(&self, page: &PendingPage) -> LookupResult<bool>;

    /// Localized aliases of the `redirect` magic word.
    fn redirect_aliases(&self) -> LookupResult<Vec<String>>;
}
