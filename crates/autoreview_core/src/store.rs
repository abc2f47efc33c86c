use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::client::OresScores;
use crate::model::{EditorProfile, WikiId};

const STORE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS fetched_content (
    revid INTEGER PRIMARY KEY,
    wikitext TEXT,
    content_hash TEXT,
    rendered_html TEXT,
    categories_json TEXT,
    render_error_count INTEGER,
    ores_fetched INTEGER NOT NULL DEFAULT 0,
    ores_damaging REAL,
    ores_goodfaith REAL
);

CREATE TABLE IF NOT EXISTS editor_profiles (
    wiki_code TEXT NOT NULL,
    wiki_family TEXT NOT NULL,
    username TEXT NOT NULL,
    usergroups_json TEXT NOT NULL,
    is_blocked INTEGER NOT NULL,
    is_bot INTEGER NOT NULL,
    is_former_bot INTEGER NOT NULL,
    is_autopatrolled INTEGER NOT NULL,
    is_autoreviewed INTEGER NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (wiki_code, wiki_family, username)
);
"#;

/// Lazily fetched data for one revision. Every field is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchedContent {
    pub wikitext: Option<String>,
    pub content_hash: Option<String>,
    pub rendered_html: Option<String>,
    pub categories: Option<Vec<String>>,
    pub render_error_count: Option<usize>,
    pub ores_scores: Option<OresScores>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentField {
    Wikitext(String),
    RenderedHtml(String),
    Categories(Vec<String>),
    RenderErrorCount(usize),
    OresScores(OresScores),
}

impl ContentField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wikitext(_) => "wikitext",
            Self::RenderedHtml(_) => "rendered_html",
            Self::Categories(_) => "categories",
            Self::RenderErrorCount(_) => "render_error_count",
            Self::OresScores(_) => "ores_scores",
        }
    }
}

/// Append-only cache of fetched revision content plus editor profiles.
pub trait ContentStore: Send + Sync {
    fn fetched(&self, revid: i64) -> Result<FetchedContent>;

    /// Store `field` for `revid` unless a value is already present.
    /// Returns whether the value was written.
    fn record(&self, revid: i64, field: ContentField) -> Result<bool>;

    fn editor_profile(&self, wiki: &WikiId, username: &str) -> Result<Option<EditorProfile>>;

    fn save_editor_profile(&self, profile: &EditorProfile) -> Result<()>;
}

/// SHA-256 prefix used to recognize identical content.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn apply_field(content: &mut FetchedContent, field: ContentField) -> bool {
    match field {
        ContentField::Wikitext(value) if content.wikitext.is_none() => {
            content.content_hash = Some(content_hash(&value));
            content.wikitext = Some(value);
            true
        }
        ContentField::RenderedHtml(value) if content.rendered_html.is_none() => {
            content.rendered_html = Some(value);
            true
        }
        ContentField::Categories(value) if content.categories.is_none() => {
            content.categories = Some(value);
            true
        }
        ContentField::RenderErrorCount(value) if content.render_error_count.is_none() => {
            content.render_error_count = Some(value);
            true
        }
        ContentField::OresScores(value) if content.ores_scores.is_none() => {
            content.ores_scores = Some(value);
            true
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    content: Mutex<HashMap<i64, FetchedContent>>,
    profiles: Mutex<HashMap<(WikiId, String), EditorProfile>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow::anyhow!("content store lock poisoned"))
}

impl ContentStore for MemoryContentStore {
    fn fetched(&self, revid: i64) -> Result<FetchedContent> {
        Ok(lock(&self.content)?.get(&revid).cloned().unwrap_or_default())
    }

    fn record(&self, revid: i64, field: ContentField) -> Result<bool> {
        let mut content = lock(&self.content)?;
        Ok(apply_field(content.entry(revid).or_default(), field))
    }

    fn editor_profile(&self, wiki: &WikiId, username: &str) -> Result<Option<EditorProfile>> {
        Ok(lock(&self.profiles)?
            .get(&(wiki.clone(), username.to_string()))
            .cloned())
    }

    fn save_editor_profile(&self, profile: &EditorProfile) -> Result<()> {
        lock(&self.profiles)?.insert(
            (profile.wiki.clone(), profile.username.clone()),
            profile.clone(),
        );
        Ok(())
    }
}

/// SQLite-backed store. The connection is serialized behind a mutex so the
/// store can be shared by concurrent page evaluations.
pub struct SqliteContentStore {
    connection: Mutex<Connection>,
}

impl SqliteContentStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create database parent directory {}",
                    parent.display()
                )
            })?;
        }
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(STORE_SCHEMA_SQL)
            .context("failed to initialize content store schema")?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

impl ContentStore for SqliteContentStore {
    fn fetched(&self, revid: i64) -> Result<FetchedContent> {
        let connection = lock(&self.connection)?;
        let row = connection
            .query_row(
                "SELECT wikitext, content_hash, rendered_html, categories_json, render_error_count,
                        ores_fetched, ores_damaging, ores_goodfaith
                 FROM fetched_content WHERE revid = ?1",
                [revid],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<f64>>(6)?,
                        row.get::<_, Option<f64>>(7)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load fetched content for revision {revid}"))?;

        let Some((wikitext, hash, html, categories, errors, ores_fetched, damaging, goodfaith)) =
            row
        else {
            return Ok(FetchedContent::default());
        };
        let categories = match categories {
            Some(json) => Some(
                serde_json::from_str::<Vec<String>>(&json)
                    .with_context(|| format!("corrupt categories for revision {revid}"))?,
            ),
            None => None,
        };
        Ok(FetchedContent {
            wikitext,
            content_hash: hash,
            rendered_html: html,
            categories,
            render_error_count: errors.and_then(|count| usize::try_from(count).ok()),
            ores_scores: (ores_fetched != 0).then_some(OresScores {
                damaging,
                goodfaith,
            }),
        })
    }

    fn record(&self, revid: i64, field: ContentField) -> Result<bool> {
        let connection = lock(&self.connection)?;
        connection
            .execute(
                "INSERT OR IGNORE INTO fetched_content (revid) VALUES (?1)",
                [revid],
            )
            .with_context(|| format!("failed to create content row for revision {revid}"))?;
        let name = field.name();
        let changed = match field {
            ContentField::Wikitext(value) => connection.execute(
                "UPDATE fetched_content SET wikitext = ?2, content_hash = ?3
                 WHERE revid = ?1 AND wikitext IS NULL",
                params![revid, value, content_hash(&value)],
            ),
            ContentField::RenderedHtml(value) => connection.execute(
                "UPDATE fetched_content SET rendered_html = ?2
                 WHERE revid = ?1 AND rendered_html IS NULL",
                params![revid, value],
            ),
            ContentField::Categories(value) => {
                let json = serde_json::to_string(&value)
                    .context("failed to serialize revision categories")?;
                connection.execute(
                    "UPDATE fetched_content SET categories_json = ?2
                     WHERE revid = ?1 AND categories_json IS NULL",
                    params![revid, json],
                )
            }
            ContentField::RenderErrorCount(value) => connection.execute(
                "UPDATE fetched_content SET render_error_count = ?2
                 WHERE revid = ?1 AND render_error_count IS NULL",
                params![revid, i64::try_from(value).unwrap_or(i64::MAX)],
            ),
            ContentField::OresScores(value) => connection.execute(
                "UPDATE fetched_content SET ores_fetched = 1, ores_damaging = ?2, ores_goodfaith = ?3
                 WHERE revid = ?1 AND ores_fetched = 0",
                params![revid, value.damaging, value.goodfaith],
            ),
        }
        .with_context(|| format!("failed to store {name} for revision {revid}"))?;
        Ok(changed > 0)
    }

    fn editor_profile(&self, wiki: &WikiId, username: &str) -> Result<Option<EditorProfile>> {
        let connection = lock(&self.connection)?;
        let row = connection
            .query_row(
                "SELECT usergroups_json, is_blocked, is_bot, is_former_bot, is_autopatrolled,
                        is_autoreviewed, fetched_at
                 FROM editor_profiles
                 WHERE wiki_code = ?1 AND wiki_family = ?2 AND username = ?3",
                params![wiki.code, wiki.family, username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load editor profile for {username}"))?;
        let Some((groups, blocked, bot, former_bot, autopatrolled, autoreviewed, fetched_at)) = row
        else {
            return Ok(None);
        };
        let usergroups = serde_json::from_str::<Vec<String>>(&groups)
            .with_context(|| format!("corrupt usergroups for {username}"))?;
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .with_context(|| format!("corrupt fetched_at for {username}"))?
            .with_timezone(&Utc);
        Ok(Some(EditorProfile {
            wiki: wiki.clone(),
            username: username.to_string(),
            usergroups,
            is_blocked: blocked,
            is_bot: bot,
            is_former_bot: former_bot,
            is_autopatrolled: autopatrolled,
            is_autoreviewed: autoreviewed,
            fetched_at,
        }))
    }

    fn save_editor_profile(&self, profile: &EditorProfile) -> Result<()> {
        let groups =
            serde_json::to_string(&profile.usergroups).context("failed to serialize usergroups")?;
        let connection = lock(&self.connection)?;
        connection
            .execute(
                "INSERT INTO editor_profiles (
                    wiki_code, wiki_family, username, usergroups_json, is_blocked, is_bot,
                    is_former_bot, is_autopatrolled, is_autoreviewed, fetched_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(wiki_code, wiki_family, username) DO UPDATE SET
                    usergroups_json = excluded.usergroups_json,
                    is_blocked = excluded.is_blocked,
                    is_bot = excluded.is_bot,
                    is_former_bot = excluded.is_former_bot,
                    is_autopatrolled = excluded.is_autopatrolled,
                    is_autoreviewed = excluded.is_autoreviewed,
                    fetched_at = excluded.fetched_at",
                params![
                    profile.wiki.code,
                    profile.wiki.family,
                    profile.username,
                    groups,
                    profile.is_blocked,
                    profile.is_bot,
                    profile.is_former_bot,
                    profile.is_autopatrolled,
                    profile.is_autoreviewed,
                    profile.fetched_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to save editor profile for {}", profile.username))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::{
        ContentField, ContentStore, MemoryContentStore, SqliteContentStore, content_hash,
    };
    use crate::client::OresScores;
    use crate::model::{EditorProfile, WikiId};

    fn exercise_set_once(store: &dyn ContentStore) {
        assert!(store
            .record(5, ContentField::Wikitext("first".to_string()))
            .expect("record"));
        assert!(!store
            .record(5, ContentField::Wikitext("second".to_string()))
            .expect("record"));
        assert!(store
            .record(5, ContentField::Categories(vec!["A".to_string()]))
            .expect("record"));
        assert!(store
            .record(
                5,
                ContentField::OresScores(OresScores {
                    damaging: Some(0.25),
                    goodfaith: None,
                })
            )
            .expect("record"));
        assert!(!store
            .record(
                5,
                ContentField::OresScores(OresScores {
                    damaging: Some(0.9),
                    goodfaith: Some(0.1),
                })
            )
            .expect("record"));

        let fetched = store.fetched(5).expect("fetched");
        assert_eq!(fetched.wikitext.as_deref(), Some("first"));
        assert_eq!(fetched.content_hash, Some(content_hash("first")));
        assert_eq!(fetched.categories, Some(vec!["A".to_string()]));
        assert_eq!(
            fetched.ores_scores,
            Some(OresScores {
                damaging: Some(0.25),
                goodfaith: None,
            })
        );
        assert_eq!(fetched.rendered_html, None);
        assert_eq!(store.fetched(99).expect("fetched"), Default::default());
    }

    fn exercise_profiles(store: &dyn ContentStore) {
        let wiki = WikiId::new("fi", "wikipedia");
        let fetched_at = Utc.with_ymd_and_hms(2025, 5, 1, 8, 30, 0).unwrap();
        let mut profile = EditorProfile::empty(wiki.clone(), "Alice", fetched_at);
        profile.usergroups = vec!["autopatrolled".to_string()];
        profile.is_autopatrolled = true;
        store.save_editor_profile(&profile).expect("save");
        assert_eq!(
            store.editor_profile(&wiki, "Alice").expect("load"),
            Some(profile.clone())
        );
        profile.is_blocked = true;
        store.save_editor_profile(&profile).expect("update");
        assert!(
            store
                .editor_profile(&wiki, "Alice")
                .expect("load")
                .expect("present")
                .is_blocked
        );
        assert_eq!(
            store
                .editor_profile(&WikiId::new("de", "wikipedia"), "Alice")
                .expect("load"),
            None
        );
    }

    #[test]
    fn content_hash_is_sha256_prefix() {
        assert_eq!(content_hash("abc"), "ba7816bf8f01cfea");
    }

    #[test]
    fn memory_store_fields_are_set_once() {
        let store = MemoryContentStore::new();
        exercise_set_once(&store);
        exercise_profiles(&store);
    }

    #[test]
    fn sqlite_store_fields_are_set_once() {
        let store = SqliteContentStore::open_in_memory().expect("open");
        exercise_set_once(&store);
        exercise_profiles(&store);
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("data").join("autoreview.db");
        {
            let store = SqliteContentStore::open(&db_path).expect("open");
            store
                .record(7, ContentField::RenderErrorCount(3))
                .expect("record");
        }
        let store = SqliteContentStore::open(&db_path).expect("reopen");
        assert_eq!(store.fetched(7).expect("fetched").render_error_count, Some(3));
    }
}
