use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const PROFILE_FRESHNESS_MINUTES: i64 = 120;

const AUTOREVIEWED_GROUPS: &[&str] = &[
    "autoreview",
    "autoreviewer",
    "editor",
    "reviewer",
    "sysop",
    "bot",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WikiId {
    pub code: String,
    pub family: String,
}

impl WikiId {
    pub fn new(code: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            family: family.into(),
        }
    }

    /// ORES context name, e.g. `fiwiki` for Finnish Wikipedia.
    pub fn ores_context(&self) -> String {
        let family_prefix = self.family.chars().take(4).collect::<String>();
        format!("{}{}", self.code, family_prefix)
    }
}

impl Default for WikiId {
    fn default() -> Self {
        Self::new("en", "wikipedia")
    }
}

/// Attributes reported for the edit by the analytics source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    #[serde(default)]
    pub user_groups: Vec<String>,
    #[serde(default)]
    pub user_former_groups: Vec<String>,
    #[serde(default)]
    pub rc_bot: bool,
    #[serde(default)]
    pub user_blocked: bool,
}

/// Immutable core of a pending revision. Lazily fetched content lives in the
/// content store and is merged in by `CheckContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub revid: i64,
    pub parent_id: Option<i64>,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sha1: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub change_tags: Vec<String>,
    #[serde(default)]
    pub change_tag_params: Vec<String>,
    #[serde(default)]
    pub wikitext: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub metadata: RevisionMetadata,
}

impl Revision {
    pub fn new(revid: i64, parent_id: Option<i64>, user_name: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            revid,
            parent_id,
            user_name: user_name.to_string(),
            timestamp,
            sha1: String::new(),
            comment: String::new(),
            change_tags: Vec::new(),
            change_tag_params: Vec::new(),
            wikitext: None,
            categories: Vec::new(),
            metadata: RevisionMetadata::default(),
        }
    }

    pub fn with_wikitext(mut self, wikitext: &str) -> Self {
        self.wikitext = Some(wikitext.to_string());
        self
    }

    pub fn has_parent(&self) -> bool {
        self.parent_id.is_some_and(|id| id > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPage {
    pub wiki: WikiId,
    pub page_id: i64,
    pub title: String,
    pub stable_revid: i64,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub wikidata_id: Option<String>,
    #[serde(default)]
    pub revisions: Vec<Revision>,
}

impl PendingPage {
    pub fn revision(&self, revid: i64) -> Option<&Revision> {
        self.revisions.iter().find(|revision| revision.revid == revid)
    }

    /// Revisions awaiting review, oldest first.
    pub fn pending_revisions(&self) -> Vec<&Revision> {
        let mut pending = self
            .revisions
            .iter()
            .filter(|revision| revision.revid != self.stable_revid)
            .collect::<Vec<_>>();
        pending.sort_by(|left, right| {
            left.timestamp
                .cmp(&right.timestamp)
                .then(left.revid.cmp(&right.revid))
        });
        pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorProfile {
    pub wiki: WikiId,
    pub username: String,
    #[serde(default)]
    pub usergroups: Vec<String>,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_former_bot: bool,
    #[serde(default)]
    pub is_autopatrolled: bool,
    #[serde(default)]
    pub is_autoreviewed: bool,
    pub fetched_at: DateTime<Utc>,
}

impl EditorProfile {
    pub fn empty(wiki: WikiId, username: &str, fetched_at: DateTime<Utc>) -> Self {
        Self {
            wiki,
            username: username.to_string(),
            usergroups: Vec::new(),
            is_blocked: false,
            is_bot: false,
            is_former_bot: false,
            is_autopatrolled: false,
            is_autoreviewed: false,
            fetched_at,
        }
    }

    /// Derive the profile flags from the user's current and former groups.
    pub fn from_groups(
        wiki: WikiId,
        username: &str,
        metadata: &RevisionMetadata,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let groups = metadata
            .user_groups
            .iter()
            .filter(|group| !group.is_empty())
            .cloned()
            .collect::<BTreeSet<_>>();
        let former = metadata
            .user_former_groups
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>();
        Self {
            wiki,
            username: username.to_string(),
            is_bot: groups.contains("bot") || metadata.rc_bot,
            is_former_bot: former.contains("bot"),
            is_autopatrolled: groups.contains("autopatrolled"),
            is_autoreviewed: AUTOREVIEWED_GROUPS
                .iter()
                .any(|group| groups.contains(*group)),
            is_blocked: metadata.user_blocked,
            usergroups: groups.into_iter().collect(),
            fetched_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.fetched_at < now - Duration::minutes(PROFILE_FRESHNESS_MINUTES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    NotOk,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotOk => "not_ok",
            Self::Fail => "fail",
            Self::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Approve,
    Blocked,
    Manual,
    Error,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Blocked => "blocked",
            Self::Manual => "manual",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub status: DecisionStatus,
    pub label: String,
    pub reason: String,
}

impl Decision {
    pub fn approve(reason: &str) -> Self {
        Self {
            status: DecisionStatus::Approve,
            label: "Would be auto-approved".to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn blocked(reason: &str) -> Self {
        Self {
            status: DecisionStatus::Blocked,
            label: "Cannot be auto-approved".to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn manual(reason: &str) -> Self {
        Self {
            status: DecisionStatus::Manual,
            label: "Requires human review".to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn dry_run_default() -> Self {
        Self::manual("In dry-run mode the edit would not be approved automatically.")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub check_title: String,
    pub status: CheckStatus,
    pub message: String,
    pub decision: Option<Decision>,
    pub should_stop: bool,
}

impl CheckResult {
    pub fn new(check_id: &str, check_title: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            check_id: check_id.to_string(),
            check_title: check_title.to_string(),
            status,
            message: message.into(),
            decision: None,
            should_stop: false,
        }
    }

    /// Attach a final decision and halt the pipeline.
    pub fn stop_with(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self.should_stop = true;
        self
    }
}
