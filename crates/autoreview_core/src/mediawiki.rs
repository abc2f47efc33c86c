use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, Utc};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::{BlockCacheKey, BlockHistoryCache};
use crate::client::{OresModels, OresScores, ReviewClient, ReviewedContent};
use crate::config::{
    AutoreviewConfig, DEFAULT_HTTP_RETRIES, DEFAULT_HTTP_RETRY_DELAY_MS, DEFAULT_RATE_LIMIT_MS,
};
use crate::living_person::{has_living_category, is_living_entity, living_categories_from_sitelinks};
use crate::lookup::{LookupError, LookupResult};
use crate::model::{PendingPage, Revision, WikiId};
use crate::ores::{parse_scores, scores_url};
use crate::redirect::aliases_from_siteinfo;
use crate::revert::has_revert_tag;

pub const DEFAULT_WIKIDATA_API_URL: &str = "https://www.wikidata.org/w/api.php";

const LIVING_PEOPLE_CATEGORY: &str = "Category:Living_people";
const UNAPPROVE_ACTIONS: &[&str] = &["unapprove", "unapprove2"];
const TITLE_BATCH: usize = 50;
const REVERT_HISTORY_LIMIT: &str = "50";

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub wiki: WikiId,
    pub api_url: String,
    pub ores_url: String,
    pub wikidata_api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &AutoreviewConfig) -> Self {
        Self {
            wiki: config.wiki_id(),
            api_url: config.api_url(),
            ores_url: config.ores_url(),
            wikidata_api_url: DEFAULT_WIKIDATA_API_URL.to_string(),
            user_agent: config.user_agent(),
            timeout_ms: config.http_timeout_ms(),
            rate_limit_ms: config.http.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS),
            max_retries: config.http.retries.unwrap_or(DEFAULT_HTTP_RETRIES),
            retry_delay_ms: config
                .http
                .retry_delay_ms
                .unwrap_or(DEFAULT_HTTP_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug, Default)]
struct RequestState {
    last_request_at: Option<Instant>,
    request_count: usize,
}

/// Action API, ORES and Wikidata access for one wiki. Shared by worker
/// threads; request spacing is enforced across all of them.
pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    state: Mutex<RequestState>,
    block_cache: Arc<dyn BlockHistoryCache>,
    living_categories: Mutex<Option<BTreeMap<String, String>>>,
}

/// Entry of `list=oldreviewedpages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldReviewedPage {
    #[serde(rename = "pageid")]
    pub page_id: i64,
    pub title: String,
    #[serde(rename = "revid")]
    pub latest_revid: i64,
    pub stable_revid: i64,
    #[serde(default)]
    pub pending_since: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig, block_cache: Arc<dyn BlockHistoryCache>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            state: Mutex::new(RequestState::default()),
            block_cache,
            living_categories: Mutex::new(None),
        })
    }

    pub fn wiki(&self) -> &WikiId {
        &self.config.wiki
    }

    pub fn request_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .request_count
    }

    fn api_get(&self, params: &[(&str, String)]) -> Result<Value> {
        self.request_json_get(&self.config.api_url, params)
    }

    fn request_json_get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let base_url =
            Url::parse(endpoint).with_context(|| format!("invalid API URL: {endpoint}"))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }
        self.send_with_retries(base_url, &pairs)
    }

    fn send_with_retries(&self, url: Url, pairs: &[(String, String)]) -> Result<Value> {
        let max_retries = self.config.max_retries;
        for attempt in 0..=max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("request to {} failed with HTTP {status}", url.host_str().unwrap_or("API"));
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .or_else(|| error.get("message"))
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call API");
                }
            }
        }

        bail!("API request failed after all retries")
    }

    fn apply_rate_limit(&self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = state.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        state.last_request_at = Some(Instant::now());
        state.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        debug!(attempt, delay_ms = base + jitter, "retrying request");
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn review_log(&self, page_title: &str) -> Result<Vec<LogEvent>> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("list", "logevents".to_string()),
            ("letype", "review".to_string()),
            ("letitle", page_title.to_string()),
            ("lelimit", "50".to_string()),
            ("leprop", "ids|type|details|timestamp|user".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode review log response")?;
        Ok(parsed.query.logevents)
    }

    fn fetch_block_history(&self, username: &str, year: i32) -> Result<bool> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("list", "logevents".to_string()),
            ("letype", "block".to_string()),
            ("letitle", format!("User:{username}")),
            ("lestart", format!("{year}-01-01T00:00:00Z")),
            ("ledir", "newer".to_string()),
            ("lelimit", "1".to_string()),
            ("leprop", "type|timestamp".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode block log response")?;
        Ok(first_event_is_block(&parsed.query.logevents))
    }

    fn fetch_rendered_html(&self, revid: i64) -> Result<String> {
        let response = self.api_get(&[
            ("action", "parse".to_string()),
            ("oldid", revid.to_string()),
            ("prop", "text".to_string()),
            ("disablelimitreport", "1".to_string()),
        ])?;
        rendered_text(&response).with_context(|| format!("no rendered HTML for revision {revid}"))
    }

    fn fetch_wikitext(&self, revid: i64) -> Result<String> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("prop", "revisions".to_string()),
            ("revids", revid.to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode revision content response")?;
        parsed
            .query
            .pages
            .into_iter()
            .flat_map(|page| page.revisions)
            .find_map(|revision| revision.slots.and_then(|slots| slots.main).map(|slot| slot.content))
            .with_context(|| format!("no content for revision {revid}"))
    }

    fn fetch_domain_usage(&self, domain: &str) -> Result<bool> {
        for protocol in ["https", "http"] {
            let response = self.api_get(&[
                ("action", "query".to_string()),
                ("list", "exturlusage".to_string()),
                ("euquery", domain.to_string()),
                ("euprotocol", protocol.to_string()),
                ("eunamespace", "0".to_string()),
                ("eulimit", "1".to_string()),
                ("euprop", "title".to_string()),
            ])?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode exturlusage response")?;
            if !parsed.query.exturlusage.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fetch_reviewed_content(&self, page_title: &str, revids: &[i64]) -> Result<Vec<ReviewedContent>> {
        if revids.is_empty() {
            return Ok(Vec::new());
        }
        let revid_list = revids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("prop", "revisions|flagged".to_string()),
            ("revids", revid_list),
            ("rvprop", "ids|sha1".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode revision hash response")?;
        let mut reviewed = approved_revids(&self.review_log(page_title)?);
        reviewed.extend(
            parsed
                .query
                .pages
                .iter()
                .filter_map(|page| page.flagged.as_ref().map(|flagged| flagged.stable_revid)),
        );
        Ok(reviewed_content(&parsed.query.pages, &reviewed))
    }

    fn fetch_ores_scores(&self, wiki: &WikiId, revid: i64, models: OresModels) -> Result<OresScores> {
        let url = scores_url(&self.config.ores_url, wiki, revid, models);
        let url = Url::parse(&url).with_context(|| format!("invalid ORES URL: {url}"))?;
        let response = self.send_with_retries(url, &[])?;
        Ok(parse_scores(&response, wiki, revid, models))
    }

    /// Localized "Living people" category for `language`, loaded once from Wikidata.
    fn living_category(&self, language: &str) -> Result<Option<String>> {
        let mut cached = self
            .living_categories
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cached.is_none() {
            let response = self.request_json_get(
                &self.config.wikidata_api_url,
                &[
                    ("action", "wbgetentities".to_string()),
                    ("sites", "enwiki".to_string()),
                    ("titles", LIVING_PEOPLE_CATEGORY.to_string()),
                    ("props", "sitelinks".to_string()),
                ],
            )?;
            let categories = living_categories_from_sitelinks(&response);
            info!(translations = categories.len(), "loaded living people categories");
            *cached = Some(categories);
        }
        Ok(cached
            .as_ref()
            .and_then(|categories| categories.get(language).cloned()))
    }

    fn page_categories(&self, title: &str) -> Result<Vec<String>> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "categories".to_string()),
            ("cllimit", "max".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode categories response")?;
        Ok(parsed
            .query
            .pages
            .into_iter()
            .flat_map(|page| page.categories)
            .map(|category| strip_namespace(&category.title))
            .collect())
    }

    fn wikidata_item(&self, title: &str) -> Result<Option<String>> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "pageprops".to_string()),
            ("ppprop", "wikibase_item".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode pageprops response")?;
        Ok(parsed
            .query
            .pages
            .into_iter()
            .find_map(|page| page.pageprops.and_then(|props| props.wikibase_item)))
    }

    fn living_by_wikidata(&self, item: &str) -> Result<bool> {
        let response = self.request_json_get(
            &self.config.wikidata_api_url,
            &[
                ("action", "wbgetentities".to_string()),
                ("ids", item.to_string()),
                ("props", "claims".to_string()),
            ],
        )?;
        let entity = &response["entities"][item];
        Ok(is_living_entity(entity, Utc::now().year()))
    }

    fn fetch_living_person(&self, page: &PendingPage) -> Result<bool> {
        if let Some(category) = self.living_category(&page.wiki.code)? {
            let categories = if page.categories.is_empty() {
                self.page_categories(&page.title)?
            } else {
                page.categories.clone()
            };
            if has_living_category(categories.iter().map(String::as_str), &category) {
                return Ok(true);
            }
        }
        let item = match &page.wikidata_id {
            Some(item) => Some(item.clone()),
            None => self.wikidata_item(&page.title)?,
        };
        match item {
            Some(item) => self.living_by_wikidata(&item),
            None => Ok(false),
        }
    }

    fn fetch_redirect_aliases(&self) -> Result<Vec<String>> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("meta", "siteinfo".to_string()),
            ("siprop", "magicwords".to_string()),
        ])?;
        aliases_from_siteinfo(&response).context("siteinfo has no redirect magic word")
    }

    /// Pages with changes awaiting review in the article namespace, oldest first.
    pub fn fetch_pending_titles(&self, limit: usize) -> Result<Vec<OldReviewedPage>> {
        let mut pages = Vec::new();
        let mut continue_token: Option<String> = None;
        while pages.len() < limit {
            let batch = (limit - pages.len()).min(500);
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "oldreviewedpages".to_string()),
                ("ornamespace", "0".to_string()),
                ("ordir", "newer".to_string()),
                ("orlimit", batch.to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("orstart", token.clone()));
            }

            let response = self.api_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode oldreviewedpages response")?;
            pages.extend(parsed.query.oldreviewedpages);
            continue_token = parsed.continuation.and_then(|cont| cont.orstart);
            if continue_token.is_none() {
                break;
            }
        }
        pages.truncate(limit);
        Ok(pages)
    }

    /// Page state with its stable revision and every newer revision. `None`
    /// when the page is missing or has no reviewed version.
    pub fn fetch_pending_page(&self, title: &str) -> Result<Option<PendingPage>> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "info|flagged|categories|pageprops".to_string()),
            ("cllimit", "max".to_string()),
            ("ppprop", "wikibase_item".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode page info for {title}"))?;
        let Some(info) = parsed.query.pages.into_iter().next() else {
            return Ok(None);
        };
        let (Some(page_id), Some(flagged)) = (info.pageid, info.flagged.as_ref()) else {
            debug!(title, "page is missing or not under review");
            return Ok(None);
        };

        let mut page = PendingPage {
            wiki: self.config.wiki.clone(),
            page_id,
            title: info.title.clone(),
            stable_revid: flagged.stable_revid,
            categories: info
                .categories
                .iter()
                .map(|category| strip_namespace(&category.title))
                .collect(),
            wikidata_id: info.pageprops.and_then(|props| props.wikibase_item),
            revisions: self.fetch_revisions_since(&info.title, flagged.stable_revid)?,
        };
        self.attach_user_info(&mut page)?;
        self.attach_revert_params(&mut page)?;
        Ok(Some(page))
    }

    fn fetch_revisions_since(&self, title: &str, stable_revid: i64) -> Result<Vec<Revision>> {
        let mut revisions = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                (
                    "rvprop",
                    "ids|timestamp|user|sha1|comment|tags".to_string(),
                ),
                ("rvstartid", stable_revid.to_string()),
                ("rvdir", "newer".to_string()),
                ("rvlimit", "max".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("rvcontinue", token.clone()));
            }

            let response = self.api_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .with_context(|| format!("failed to decode revisions of {title}"))?;
            for page in parsed.query.pages {
                for item in page.revisions {
                    revisions.push(item.into_revision()?);
                }
            }
            continue_token = parsed.continuation.and_then(|cont| cont.rvcontinue);
            if continue_token.is_none() {
                break;
            }
        }
        Ok(revisions)
    }

    fn attach_user_info(&self, page: &mut PendingPage) -> Result<()> {
        let usernames = page
            .pending_revisions()
            .into_iter()
            .map(|revision| revision.user_name.clone())
            .filter(|name| !name.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let mut users = BTreeMap::new();
        for batch in usernames.chunks(TITLE_BATCH) {
            let response = self.api_get(&[
                ("action", "query".to_string()),
                ("list", "users".to_string()),
                ("ususers", batch.join("|")),
                ("usprop", "groups|blockinfo".to_string()),
            ])?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode users response")?;
            users.extend(parsed.query.users.into_iter().map(|user| (user.name.clone(), user)));
        }
        for user in users.values_mut() {
            match self.rights_log(&user.name) {
                Ok(events) => user.former_groups = former_groups(&events, &user.groups),
                Err(error) => {
                    warn!(user = %user.name, error = %format!("{error:#}"), "rights log lookup failed")
                }
            }
        }
        apply_user_info(page, &users);
        Ok(())
    }

    fn rights_log(&self, username: &str) -> Result<Vec<LogEvent>> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("list", "logevents".to_string()),
            ("letype", "rights".to_string()),
            ("letitle", format!("User:{username}")),
            ("lelimit", "max".to_string()),
            ("leprop", "type|details".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode rights log response")?;
        Ok(parsed.query.logevents)
    }

    /// Revert-tagged revisions get an `originalRevisionId` parameter naming
    /// the newest earlier revision with identical content.
    fn attach_revert_params(&self, page: &mut PendingPage) -> Result<()> {
        if !page
            .revisions
            .iter()
            .any(|revision| has_revert_tag(&revision.change_tags))
        {
            return Ok(());
        }
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("pageids", page.page_id.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "ids|sha1".to_string()),
            ("rvstartid", page.stable_revid.to_string()),
            ("rvdir", "older".to_string()),
            ("rvlimit", REVERT_HISTORY_LIMIT.to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode revision history response")?;
        let mut history = parsed
            .query
            .pages
            .into_iter()
            .flat_map(|page| page.revisions)
            .filter_map(|item| Some((item.revid?, item.sha1?)))
            .collect::<Vec<_>>();
        history.extend(
            page.revisions
                .iter()
                .filter(|revision| !revision.sha1.is_empty())
                .map(|revision| (revision.revid, revision.sha1.clone())),
        );
        attach_original_revisions(page, &history);
        Ok(())
    }
}

impl ReviewClient for MediaWikiClient {
    fn has_manual_unapproval(&self, page_title: &str, revid: i64) -> LookupResult<bool> {
        let events = self
            .review_log(page_title)
            .map_err(|error| LookupError::from_anyhow("review log", &error))?;
        let unapproved = latest_action_is_unapproval(&events, revid);
        if unapproved {
            info!(revid, page = page_title, "revision was manually un-approved");
        }
        Ok(unapproved)
    }

    fn is_user_blocked_after_edit(
        &self,
        username: &str,
        edit_timestamp: DateTime<Utc>,
    ) -> LookupResult<bool> {
        let key = BlockCacheKey::new(&self.config.wiki, username, edit_timestamp.year());
        if let Some(blocked) = self.block_cache.get(&key) {
            return Ok(blocked);
        }
        let blocked = self
            .fetch_block_history(username, key.year)
            .map_err(|error| LookupError::from_anyhow("block log", &error))?;
        self.block_cache.insert(key, blocked);
        Ok(blocked)
    }

    fn rendered_html(&self, revid: i64) -> LookupResult<String> {
        self.fetch_rendered_html(revid)
            .map_err(|error| LookupError::from_anyhow("rendered HTML", &error))
    }

    fn wikitext(&self, revid: i64) -> LookupResult<String> {
        self.fetch_wikitext(revid)
            .map_err(|error| LookupError::from_anyhow("revision content", &error))
    }

    fn has_domain_been_used(&self, domain: &str) -> LookupResult<bool> {
        self.fetch_domain_usage(domain)
            .map_err(|error| LookupError::from_anyhow("external link usage", &error))
    }

    fn reviewed_content_hashes(
        &self,
        page_title: &str,
        revids: &[i64],
    ) -> LookupResult<Vec<ReviewedContent>> {
        self.fetch_reviewed_content(page_title, revids)
            .map_err(|error| LookupError::from_anyhow("revision hashes", &error))
    }

    fn ores_scores(
        &self,
        wiki: &WikiId,
        revid: i64,
        models: OresModels,
    ) -> LookupResult<OresScores> {
        self.fetch_ores_scores(wiki, revid, models)
            .map_err(|error| LookupError::from_anyhow("ORES", &error))
    }

    fn is_living_person(&self, page: &PendingPage) -> LookupResult<bool> {
        self.fetch_living_person(page)
            .map_err(|error| LookupError::from_anyhow("Wikidata", &error))
    }

    fn redirect_aliases(&self) -> LookupResult<Vec<String>> {
        self.fetch_redirect_aliases()
            .map_err(|error| LookupError::from_anyhow("siteinfo", &error))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn strip_namespace(title: &str) -> String {
    title
        .split_once(':')
        .map_or(title, |(_, name)| name)
        .to_string()
}

/// Review log revision id: legacy entries keep it under `"0"`.
fn event_revid(event: &LogEvent) -> Option<i64> {
    event
        .params
        .get("0")
        .or_else(|| event.params.get("revid"))
        .and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
        })
}

/// Log events arrive newest first; only the latest action on `revid` counts.
fn latest_action_is_unapproval(events: &[LogEvent], revid: i64) -> bool {
    events
        .iter()
        .find(|event| event_revid(event) == Some(revid))
        .is_some_and(|event| UNAPPROVE_ACTIONS.contains(&event.action.as_str()))
}

fn first_event_is_block(events: &[LogEvent]) -> bool {
    events.first().is_some_and(|event| event.action == "block")
}

fn approved_revids(events: &[LogEvent]) -> BTreeSet<i64> {
    events
        .iter()
        .filter(|event| event.action.starts_with("approve"))
        .filter_map(event_revid)
        .collect()
}

fn rendered_text(response: &Value) -> Option<String> {
    let text = &response["parse"]["text"];
    text.as_str()
        .or_else(|| text["*"].as_str())
        .map(str::to_string)
}

/// Group revisions by content hash and keep the hashes with a reviewed revision.
fn reviewed_content(pages: &[PageItem], reviewed: &BTreeSet<i64>) -> Vec<ReviewedContent> {
    let mut by_hash: BTreeMap<(i64, String), (i64, Option<i64>)> = BTreeMap::new();
    for page in pages {
        let Some(page_id) = page.pageid else {
            continue;
        };
        for revision in &page.revisions {
            let (Some(revid), Some(sha1)) = (revision.revid, revision.sha1.clone()) else {
                continue;
            };
            let entry = by_hash.entry((page_id, sha1)).or_insert((revid, None));
            entry.0 = entry.0.max(revid);
            if reviewed.contains(&revid) {
                entry.1 = Some(entry.1.map_or(revid, |known| known.max(revid)));
            }
        }
    }
    by_hash
        .into_iter()
        .filter_map(|((page_id, sha1), (max_reviewable_id, max_reviewed_id))| {
            Some(ReviewedContent {
                sha1,
                max_reviewed_id: max_reviewed_id?,
                max_reviewable_id,
                page_id,
            })
        })
        .collect()
}

fn apply_user_info(page: &mut PendingPage, users: &BTreeMap<String, UserItem>) {
    for revision in &mut page.revisions {
        let Some(user) = users.get(&revision.user_name) else {
            continue;
        };
        revision.metadata.user_groups = user.groups.clone();
        revision.metadata.user_former_groups = user.former_groups.clone();
        revision.metadata.user_blocked = user.blockid.is_some();
    }
}

/// Groups a rights change took away from the user and that the user does
/// not hold now.
fn former_groups(events: &[LogEvent], current: &[String]) -> Vec<String> {
    let group_list = |value: &Value| -> BTreeSet<String> {
        value
            .as_array()
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let mut removed = BTreeSet::new();
    for event in events {
        let old = group_list(&event.params["oldgroups"]);
        let new = group_list(&event.params["newgroups"]);
        removed.extend(old.difference(&new).cloned());
    }
    removed
        .into_iter()
        .filter(|group| !current.contains(group))
        .collect()
}

fn attach_original_revisions(page: &mut PendingPage, history: &[(i64, String)]) {
    for revision in &mut page.revisions {
        if !has_revert_tag(&revision.change_tags) || revision.sha1.is_empty() {
            continue;
        }
        let parent = revision.parent_id.unwrap_or_default();
        let original = history
            .iter()
            .filter(|(revid, sha1)| *revid < parent && *sha1 == revision.sha1)
            .map(|(revid, _)| *revid)
            .max();
        match original {
            Some(original) => revision
                .change_tag_params
                .push(json!({ "originalRevisionId": original }).to_string()),
            None => warn!(
                revid = revision.revid,
                "revert tag without matching earlier content"
            ),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageItem>,
    #[serde(default)]
    logevents: Vec<LogEvent>,
    #[serde(default)]
    exturlusage: Vec<Value>,
    #[serde(default)]
    oldreviewedpages: Vec<OldReviewedPage>,
    #[serde(default)]
    users: Vec<UserItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    rvcontinue: Option<String>,
    orstart: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogEvent {
    #[serde(default)]
    action: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    pageid: Option<i64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
    #[serde(default)]
    categories: Vec<CategoryItem>,
    pageprops: Option<PageProps>,
    flagged: Option<FlaggedInfo>,
}

#[derive(Debug, Deserialize)]
struct CategoryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    wikibase_item: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlaggedInfo {
    stable_revid: i64,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    revid: Option<i64>,
    parentid: Option<i64>,
    user: Option<String>,
    timestamp: Option<String>,
    sha1: Option<String>,
    comment: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    slots: Option<RevisionSlots>,
}

impl RevisionItem {
    fn into_revision(self) -> Result<Revision> {
        let revid = self.revid.context("revision without id")?;
        let timestamp = self
            .timestamp
            .as_deref()
            .with_context(|| format!("revision {revid} has no timestamp"))?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .with_context(|| format!("invalid timestamp on revision {revid}: {timestamp}"))?
            .with_timezone(&Utc);
        let parent_id = self.parentid.filter(|id| *id > 0);
        let mut revision = Revision::new(
            revid,
            parent_id,
            self.user.as_deref().unwrap_or_default(),
            timestamp,
        );
        revision.sha1 = self.sha1.unwrap_or_default();
        revision.comment = self.comment.unwrap_or_default();
        revision.change_tags = self.tags;
        Ok(revision)
    }
}

#[derive(Debug, Deserialize)]
struct RevisionSlots {
    main: Option<RevisionSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UserItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    groups: Vec<String>,
    blockid: Option<i64>,
    #[serde(skip)]
    former_groups: Vec<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;
    use serde_json::json;

    use super::{
        LogEvent, QueryResponse, UserItem, apply_user_info, approved_revids,
        attach_original_revisions, first_event_is_block, former_groups, latest_action_is_unapproval,
        rendered_text, reviewed_content,
    };
    use crate::model::{EditorProfile, PendingPage, WikiId};
    use crate::revert::parse_reverted_revision_ids;

    fn events(value: serde_json::Value) -> Vec<LogEvent> {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "query": { "logevents": value }
        }))
        .expect("log events");
        parsed.query.logevents
    }

    #[test]
    fn only_the_latest_review_action_for_a_revision_counts() {
        let log = events(json!([
            { "action": "approve", "params": { "0": 205, "1": 200 } },
            { "action": "unapprove", "params": { "0": 204 } },
            { "action": "approve", "params": { "0": 204 } },
        ]));
        assert!(latest_action_is_unapproval(&log, 204));
        assert!(!latest_action_is_unapproval(&log, 205));
        assert!(!latest_action_is_unapproval(&log, 999));

        let reapproved = events(json!([
            { "action": "approve2", "params": { "0": "204" } },
            { "action": "unapprove2", "params": { "0": "204" } },
        ]));
        assert!(!latest_action_is_unapproval(&reapproved, 204));
        assert_eq!(approved_revids(&reapproved), BTreeSet::from([204]));
    }

    #[test]
    fn block_history_uses_the_first_event() {
        assert!(first_event_is_block(&events(json!([{ "action": "block" }]))));
        assert!(!first_event_is_block(&events(json!([{ "action": "unblock" }]))));
        assert!(!first_event_is_block(&events(json!([]))));
    }

    #[test]
    fn parse_text_accepts_both_format_versions() {
        assert_eq!(
            rendered_text(&json!({ "parse": { "text": "<p>Hi</p>" } })).as_deref(),
            Some("<p>Hi</p>")
        );
        assert_eq!(
            rendered_text(&json!({ "parse": { "text": { "*": "<p>Old</p>" } } })).as_deref(),
            Some("<p>Old</p>")
        );
        assert_eq!(rendered_text(&json!({ "parse": {} })), None);
    }

    #[test]
    fn reviewed_hashes_need_a_reviewed_revision() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "query": { "pages": [{
                "pageid": 7,
                "title": "Example",
                "revisions": [
                    { "revid": 90, "sha1": "aaa" },
                    { "revid": 95, "sha1": "aaa" },
                    { "revid": 97, "sha1": "bbb" }
                ]
            }]}
        }))
        .expect("pages");
        let reviewed = reviewed_content(&parsed.query.pages, &BTreeSet::from([90]));
        assert_eq!(reviewed.len(), 1);
        assert_eq!(reviewed[0].sha1, "aaa");
        assert_eq!(reviewed[0].max_reviewed_id, 90);
        assert_eq!(reviewed[0].max_reviewable_id, 95);
        assert_eq!(reviewed[0].page_id, 7);
    }

    fn pending_page() -> PendingPage {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "query": { "pages": [{
                "pageid": 7,
                "title": "Example",
                "revisions": [
                    { "revid": 100, "parentid": 99, "user": "Reviewer", "timestamp": "2024-03-01T10:00:00Z", "sha1": "aaa", "tags": [] },
                    { "revid": 101, "parentid": 100, "user": "Vandal", "timestamp": "2024-03-02T10:00:00Z", "sha1": "bbb", "tags": [] },
                    { "revid": 102, "parentid": 101, "user": "Fixer", "timestamp": "2024-03-02T11:00:00Z", "sha1": "aaa", "tags": ["mw-manual-revert"] }
                ]
            }]}
        }))
        .expect("revisions");
        let revisions = parsed
            .query
            .pages
            .into_iter()
            .flat_map(|page| page.revisions)
            .map(|item| item.into_revision().expect("revision"))
            .collect();
        PendingPage {
            wiki: Default::default(),
            page_id: 7,
            title: "Example".to_string(),
            stable_revid: 100,
            categories: Vec::new(),
            wikidata_id: None,
            revisions,
        }
    }

    #[test]
    fn revisions_decode_with_parents_and_tags() {
        let page = pending_page();
        let pending = page.pending_revisions();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].user_name, "Vandal");
        assert_eq!(pending[1].parent_id, Some(101));
        assert_eq!(pending[1].change_tags, vec!["mw-manual-revert"]);
    }

    #[test]
    fn manual_revert_points_at_the_restored_revision() {
        let mut page = pending_page();
        let history = vec![(95, "aaa".to_string()), (100, "aaa".to_string())];
        attach_original_revisions(&mut page, &history);
        let revert = page.revision(102).expect("revert");
        assert_eq!(parse_reverted_revision_ids(&revert.change_tag_params), vec![100]);
        assert!(page.revision(101).expect("edit").change_tag_params.is_empty());
    }

    #[test]
    fn user_groups_and_blocks_fill_revision_metadata() {
        let mut page = pending_page();
        let users = [
            UserItem {
                name: "Vandal".to_string(),
                groups: vec!["*".to_string(), "user".to_string()],
                blockid: Some(12),
                former_groups: Vec::new(),
            },
            UserItem {
                name: "Fixer".to_string(),
                groups: vec!["bot".to_string()],
                blockid: None,
                former_groups: vec!["rollbacker".to_string()],
            },
        ]
        .into_iter()
        .map(|user| (user.name.clone(), user))
        .collect::<BTreeMap<_, _>>();
        apply_user_info(&mut page, &users);
        let vandal = &page.revision(101).expect("edit").metadata;
        assert!(vandal.user_blocked);
        assert_eq!(vandal.user_groups, vec!["*", "user"]);
        let fixer = &page.revision(102).expect("revert").metadata;
        assert!(!fixer.user_blocked);
        assert_eq!(fixer.user_groups, vec!["bot"]);
        assert_eq!(fixer.user_former_groups, vec!["rollbacker"]);
        assert!(page.revision(100).expect("stable").metadata.user_groups.is_empty());
    }

    #[test]
    fn rights_log_yields_removed_groups_not_held_now() {
        let log = events(json!([
            {
                "type": "rights",
                "action": "rights",
                "params": { "oldgroups": ["bot", "rollbacker"], "newgroups": ["rollbacker"] }
            },
            {
                "type": "rights",
                "action": "rights",
                "params": { "oldgroups": ["sysop"], "newgroups": [] }
            },
            {
                "type": "rights",
                "action": "rights",
                "params": { "oldgroups": [], "newgroups": ["bot", "sysop"] }
            }
        ]));
        assert_eq!(
            former_groups(&log, &["rollbacker".to_string(), "sysop".to_string()]),
            vec!["bot"]
        );
        assert!(former_groups(&log, &["bot".to_string(), "sysop".to_string()]).is_empty());
        assert!(former_groups(&[], &[]).is_empty());
    }

    #[test]
    fn former_bot_flag_comes_from_the_rights_log() {
        let log = events(json!([
            { "action": "rights", "params": { "oldgroups": ["bot"], "newgroups": [] } }
        ]));
        let mut page = pending_page();
        let users = BTreeMap::from([(
            "Vandal".to_string(),
            UserItem {
                name: "Vandal".to_string(),
                groups: vec!["user".to_string()],
                blockid: None,
                former_groups: former_groups(&log, &["user".to_string()]),
            },
        )]);
        apply_user_info(&mut page, &users);
        let metadata = &page.revision(101).expect("edit").metadata;
        let profile = EditorProfile::from_groups(WikiId::default(), "Vandal", metadata, Utc::now());
        assert!(profile.is_former_bot);
        assert!(!profile.is_bot);
    }

    #[test]
    fn oldreviewedpages_entries_decode() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "query": { "oldreviewedpages": [{
                "pageid": 7, "ns": 0, "title": "Example", "revid": 102,
                "stable_revid": 100, "pending_since": "2024-03-02T10:00:00Z", "flagged_level": 0
            }]},
            "continue": { "orstart": "2024-03-03T00:00:00Z", "continue": "-||" }
        }))
        .expect("pending list");
        let entry = &parsed.query.oldreviewedpages[0];
        assert_eq!(entry.latest_revid, 102);
        assert_eq!(entry.stable_revid, 100);
        assert_eq!(
            parsed.continuation.and_then(|cont| cont.orstart).as_deref(),
            Some("2024-03-03T00:00:00Z")
        );
    }
}
