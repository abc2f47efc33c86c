use anyhow::Result;
use tracing::warn;

use crate::categories::parse_categories;
use crate::client::{OresModels, OresScores, ReviewClient};
use crate::config::ReviewPolicy;
use crate::html::count_error_elements;
use crate::lookup::LookupResult;
use crate::model::{EditorProfile, PendingPage, Revision};
use crate::redirect::RedirectMatcher;
use crate::store::{ContentField, ContentStore, FetchedContent};

/// Read-only inputs of one pipeline run. Content accessors merge the
/// immutable revision core with the fetched-content store, falling back to
/// the client and recording what it returns.
pub struct CheckContext<'a> {
    pub page: &'a PendingPage,
    pub revision: &'a Revision,
    pub client: &'a dyn ReviewClient,
    pub store: &'a dyn ContentStore,
    pub profile: Option<&'a EditorProfile>,
    pub policy: &'a ReviewPolicy,
    pub redirects: RedirectMatcher,
}

impl<'a> CheckContext<'a> {
    pub fn new(
        page: &'a PendingPage,
        revision: &'a Revision,
        client: &'a dyn ReviewClient,
        store: &'a dyn ContentStore,
        profile: Option<&'a EditorProfile>,
        policy: &'a ReviewPolicy,
        redirect_aliases: &[String],
    ) -> Result<Self> {
        Ok(Self {
            page,
            revision,
            client,
            store,
            profile,
            policy,
            redirects: RedirectMatcher::new(redirect_aliases)?,
        })
    }

    pub fn language(&self) -> &str {
        &self.page.wiki.code
    }

    pub fn parent_id(&self) -> Option<i64> {
        self.revision.parent_id.filter(|id| *id > 0)
    }

    /// Newest revision known on the page, i.e. the page's current text.
    pub fn latest_revision_id(&self) -> i64 {
        self.page
            .revisions
            .iter()
            .map(|revision| revision.revid)
            .max()
            .unwrap_or(self.page.stable_revid)
            .max(self.page.stable_revid)
    }

    fn fetched(&self, revid: i64) -> FetchedContent {
        match self.store.fetched(revid) {
            Ok(content) => content,
            Err(error) => {
                warn!(revid, error = %format!("{error:#}"), "content store read failed");
                FetchedContent::default()
            }
        }
    }

    fn remember(&self, revid: i64, field: ContentField) {
        let name = field.name();
        if let Err(error) = self.store.record(revid, field) {
            warn!(revid, field = name, error = %format!("{error:#}"), "content store write failed");
        }
    }

    pub fn wikitext(&self, revid: i64) -> LookupResult<String> {
        if let Some(text) = self
            .page
            .revision(revid)
            .and_then(|revision| revision.wikitext.clone())
        {
            return Ok(text);
        }
        if let Some(text) = self.fetched(revid).wikitext {
            return Ok(text);
        }
        let text = self.client.wikitext(revid)?;
        self.remember(revid, ContentField::Wikitext(text.clone()));
        Ok(text)
    }

    pub fn current_wikitext(&self) -> LookupResult<String> {
        self.wikitext(self.revision.revid)
    }

    /// `None` for revisions that create the page.
    pub fn parent_wikitext(&self) -> Option<LookupResult<String>> {
        self.parent_id().map(|id| self.wikitext(id))
    }

    pub fn rendered_html(&self, revid: i64) -> LookupResult<String> {
        if let Some(html) = self.fetched(revid).rendered_html {
            return Ok(html);
        }
        let html = self.client.rendered_html(revid)?;
        if !html.is_empty() {
            self.remember(revid, ContentField::RenderedHtml(html.clone()));
        }
        Ok(html)
    }

    /// Count of `class="error"` elements, computed once per revision.
    pub fn render_error_count(&self, revid: i64, html: &str) -> usize {
        if let Some(count) = self.fetched(revid).render_error_count {
            return count;
        }
        let count = count_error_elements(html);
        self.remember(revid, ContentField::RenderErrorCount(count));
        count
    }

    /// Categories of a revision: known upfront, cached, or parsed from its wikitext.
    pub fn categories(&self, revid: i64) -> LookupResult<Vec<String>> {
        if let Some(revision) = self.page.revision(revid)
            && !revision.categories.is_empty()
        {
            return Ok(revision.categories.clone());
        }
        if let Some(categories) = self.fetched(revid).categories {
            return Ok(categories);
        }
        let categories = parse_categories(&self.wikitext(revid)?, self.language());
        self.remember(revid, ContentField::Categories(categories.clone()));
        Ok(categories)
    }

    /// ORES scores are requested at most once per revision.
    pub fn ores_scores(&self, models: OresModels) -> LookupResult<OresScores> {
        let revid = self.revision.revid;
        if let Some(scores) = self.fetched(revid).ores_scores {
            return Ok(scores);
        }
        let scores = self.client.ores_scores(&self.page.wiki, revid, models)?;
        self.remember(revid, ContentField::OresScores(scores));
        Ok(scores)
    }

    /// Living-person status; a failed lookup counts as not living.
    pub fn is_living_person(&self) -> bool {
        match self.client.is_living_person(self.page) {
            Ok(living) => living,
            Err(error) => {
                warn!(
                    page = %self.page.title,
                    %error,
                    "living person lookup failed, assuming not a living person"
                );
                false
            }
        }
    }
}
