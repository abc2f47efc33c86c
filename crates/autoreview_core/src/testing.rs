//! Fixtures shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use crate::client::{OresModels, OresScores, ReviewClient, ReviewedContent};
use crate::lookup::{LookupError, LookupResult};
use crate::model::{PendingPage, Revision, WikiId};

#[derive(Default)]
pub struct MockClient {
    pub unapproved: BTreeSet<i64>,
    pub review_log_down: bool,
    pub blocked_users: BTreeSet<String>,
    pub block_log_down: bool,
    pub html: BTreeMap<i64, String>,
    pub wikitext: BTreeMap<i64, String>,
    pub used_domains: BTreeSet<String>,
    pub domain_usage_down: bool,
    pub reviewed: BTreeMap<i64, ReviewedContent>,
    pub ores: Option<OresScores>,
    pub living: Option<bool>,
    pub aliases: Vec<String>,
    pub requests: AtomicUsize,
}

impl MockClient {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

fn down<T>(resource: &str) -> LookupResult<T> {
    Err(LookupError::unavailable(resource, "service down"))
}

impl ReviewClient for MockClient {
    fn has_manual_unapproval(&self, _page_title: &str, revid: i64) -> LookupResult<bool> {
        self.count();
        if self.review_log_down {
            return down("review log");
        }
        Ok(self.unapproved.contains(&revid))
    }

    fn is_user_blocked_after_edit(
        &self,
        username: &str,
        _edit_timestamp: DateTime<Utc>,
    ) -> LookupResult<bool> {
        self.count();
        if self.block_log_down {
            return down("block log");
        }
        Ok(self.blocked_users.contains(username))
    }

    fn rendered_html(&self, revid: i64) -> LookupResult<String> {
        self.count();
        match self.html.get(&revid) {
            Some(html) => Ok(html.clone()),
            None => down("rendered HTML"),
        }
    }

    fn wikitext(&self, revid: i64) -> LookupResult<String> {
        self.count();
        match self.wikitext.get(&revid) {
            Some(text) => Ok(text.clone()),
            None => down("wikitext"),
        }
    }

    fn has_domain_been_used(&self, domain: &str) -> LookupResult<bool> {
        self.count();
        if self.domain_usage_down {
            return down("external link usage");
        }
        Ok(self.used_domains.contains(domain))
    }

    fn reviewed_content_hashes(
        &self,
        _page_title: &str,
        revids: &[i64],
    ) -> LookupResult<Vec<ReviewedContent>> {
        self.count();
        Ok(revids
            .iter()
            .filter_map(|id| self.reviewed.get(id).cloned())
            .collect())
    }

    fn ores_scores(
        &self,
        _wiki: &WikiId,
        _revid: i64,
        models: OresModels,
    ) -> LookupResult<OresScores> {
        self.count();
        match self.ores {
            Some(scores) => Ok(OresScores {
                damaging: scores.damaging.filter(|_| models.damaging),
                goodfaith: scores.goodfaith.filter(|_| models.goodfaith),
            }),
            None => down("ORES"),
        }
    }

    fn is_living_person(&self, _page: &PendingPage) -> LookupResult<bool> {
        self.count();
        match self.living {
            Some(living) => Ok(living),
            None => down("Wikidata"),
        }
    }

    fn redirect_aliases(&self) -> LookupResult<Vec<String>> {
        self.count();
        if self.aliases.is_empty() {
            return down("siteinfo");
        }
        Ok(self.aliases.clone())
    }
}

pub fn timestamp(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap()
}

/// Page with a stable revision 100 followed by the given pending revisions.
pub fn page_with(revisions: Vec<Revision>) -> PendingPage {
    let mut all = vec![Revision::new(100, Some(99), "Stable", timestamp(0))];
    all.extend(revisions);
    PendingPage {
        wiki: WikiId::default(),
        page_id: 7,
        title: "Example".to_string(),
        stable_revid: 100,
        categories: Vec::new(),
        wikidata_id: None,
        revisions: all,
    }
}

pub fn pending(revid: i64, parent: i64, wikitext: &str) -> Revision {
    Revision::new(revid, Some(parent), "Editor", timestamp(revid as u32 % 60)).with_wikitext(wikitext)
}
