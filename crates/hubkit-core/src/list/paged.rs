// Paginated list resources.
//
// Page geometry comes from the `Link` response header: `last` fixes
// the page count, a `prev` without `last` means the current page is
// the final one, and a first page without any links is the only page.
// The `page` query parameter of the linked URLs doubles as the
// template for addressing other pages.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use hubkit_api::{ApiRequest, ApiResponse, CancellationToken};
use serde_json::{Value, json};
use url::Url;

use crate::error::Error;
use crate::list::TrackedList;
use crate::list::entity_list::ItemInit;
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::Freshness;

/// One page of a [`PagedList`].
///
/// Handed-out pages are snapshots: refreshing one reconciles it in
/// place (and re-registers it as the cached copy), but pages held by
/// other callers are never mutated behind their backs.
pub struct Page<T> {
    list: Weak<PagedList<T>>,
    number: usize,
    entries: TrackedList<T>,
    freshness: Mutex<Freshness>,
}

impl<T> Page<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn new(list: Weak<PagedList<T>>, number: usize) -> Self {
        Self {
            list,
            number,
            entries: TrackedList::new(),
            freshness: Mutex::new(Freshness::default()),
        }
    }

    /// Zero-based page index.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn entries(&self) -> &TrackedList<T> {
        &self.entries
    }

    /// Conditionally re-fetch this page and reconcile its items.
    pub async fn refresh(self: &Arc<Self>, cancellation: &CancellationToken) -> Result<(), Error> {
        let list = self.list.upgrade().ok_or(Error::SessionClosed)?;
        list.refresh_page(self, cancellation).await
    }

    fn snapshot(&self, list: Weak<PagedList<T>>) -> Arc<Self> {
        Arc::new(Self {
            list,
            number: self.number,
            entries: TrackedList::from_items(self.entries.snapshot()),
            freshness: Mutex::new(self.freshness()),
        })
    }

    fn freshness(&self) -> Freshness {
        self.freshness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_freshness(&self, freshness: Freshness) {
        *self
            .freshness
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = freshness;
    }
}

/// A paginated list resource, e.g. the public event feed.
///
/// Creation fetches the first page, which also discovers the page
/// count and the URL template for the rest. Whenever a changed page
/// response arrives the page vector is rebuilt at the freshly
/// discovered count, so the geometry always reflects the server's
/// latest answer.
pub struct PagedList<T> {
    session: SessionRef,
    url: Url,
    /// URL whose `page` query parameter is rewritten to address other
    /// pages. Taken from the first `last`/`prev` link seen.
    template: Mutex<Option<Url>>,
    pages: Mutex<Vec<Option<Arc<Page<T>>>>>,
    gate: tokio::sync::Mutex<()>,
    init: ItemInit<T>,
}

impl<T> PagedList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create the list and fetch its first page.
    pub(crate) async fn create(
        session: &Arc<SessionInner>,
        url: Url,
        init: ItemInit<T>,
        cancellation: &CancellationToken,
    ) -> Result<Arc<Self>, Error> {
        let list = Arc::new(Self {
            session: SessionRef::new(session),
            url,
            template: Mutex::new(None),
            pages: Mutex::new(Vec::new()),
            gate: tokio::sync::Mutex::new(()),
            init,
        });
        let first = Arc::new(Page::new(Arc::downgrade(&list), 0));
        list.refresh_page(&first, cancellation).await?;
        Ok(list)
    }

    /// Number of pages the server most recently reported.
    pub fn page_count(&self) -> usize {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Fetch a page by zero-based index.
    ///
    /// A cached page is returned as a snapshot; `refresh` forces a
    /// conditional re-fetch of it first. Uncached pages are always
    /// fetched. Indexes at or past [`page_count`](Self::page_count)
    /// are rejected.
    pub async fn page(
        self: &Arc<Self>,
        index: usize,
        refresh: bool,
        cancellation: &CancellationToken,
    ) -> Result<Arc<Page<T>>, Error> {
        let (count, cached) = {
            let pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
            (pages.len(), pages.get(index).cloned().flatten())
        };
        if index >= count {
            return Err(Error::PageOutOfRange { index, count });
        }

        match cached {
            Some(existing) => {
                let snapshot = existing.snapshot(Arc::downgrade(self));
                if refresh {
                    self.refresh_page(&snapshot, cancellation).await?;
                }
                Ok(snapshot)
            }
            None => {
                let page = Arc::new(Page::new(Arc::downgrade(self), index));
                self.refresh_page(&page, cancellation).await?;
                Ok(page)
            }
        }
    }

    pub(crate) async fn refresh_page(
        &self,
        page: &Arc<Page<T>>,
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        let _gate = tokio::select! {
            guard = self.gate.lock() => guard,
            () = cancellation.cancelled() => return Err(hubkit_api::Error::Cancelled.into()),
        };

        let session = self.session.upgrade()?;
        let url = self.page_url(page.number);
        let freshness = page.freshness();
        let request = ApiRequest::conditional(url, freshness.etag, freshness.last_modified);

        let response = session.client.get(&request, cancellation).await?;
        if !response.changed {
            return Ok(());
        }

        let count = self.discover_page_count(page.number, &response)?;
        page.set_freshness(Freshness {
            etag: response.etag.clone(),
            last_modified: response.last_modified,
        });

        let body = response
            .body
            .as_ref()
            .ok_or_else(|| Error::data("page response had an empty body", &Value::Null))?;
        let fragments = body
            .as_array()
            .ok_or_else(|| Error::data("expected a JSON array", body))?;
        let mut items = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            items.push((self.init)(&session, fragment)?);
        }
        page.entries.reconcile(items);

        // Rebuild the page vector at the latest geometry; the page we
        // just refreshed becomes the cached copy of its slot.
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        *pages = vec![None; count];
        if let Some(slot) = pages.get_mut(page.number) {
            *slot = Some(Arc::clone(page));
        }
        Ok(())
    }

    fn page_url(&self, number: usize) -> Url {
        let template = self
            .template
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match template {
            // Pages are 1-based on the wire.
            Some(template) => with_page_param(&template, number + 1),
            None => self.url.clone(),
        }
    }

    /// Derive the page count from a changed response's links, keeping
    /// the URL template current.
    fn discover_page_count(&self, number: usize, response: &ApiResponse) -> Result<usize, Error> {
        if let Some(last) = response.links.get("last") {
            let count = page_param(last).ok_or_else(|| {
                Error::data("`last` link lacks a page parameter", &json!(last.as_str()))
            })?;
            self.set_template(last.clone());
            return Ok(count);
        }
        if let Some(prev) = response.links.get("prev") {
            // No `last` but a `prev`: this page is the final one.
            self.set_template(prev.clone());
            return Ok(number + 1);
        }
        if response.links.is_empty() && number == 0 {
            // Everything fits on a single page.
            return Ok(1);
        }
        Err(Error::Data {
            message: "pagination links carry neither `last` nor `prev`".into(),
            fragment: json!(response.links.keys().collect::<Vec<_>>()),
        })
    }

    fn set_template(&self, template: Url) {
        *self
            .template
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(template);
    }
}

/// The numeric `page` query parameter of a URL.
fn page_param(url: &Url) -> Option<usize> {
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

/// Rewrite the `page` query parameter, leaving everything else intact.
fn with_page_param(url: &Url, page: usize) -> Url {
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut result = url.clone();
    {
        let mut query = result.query_pairs_mut();
        query.clear();
        for (key, value) in &others {
            query.append_pair(key, value);
        }
        query.append_pair("page", &page.to_string());
    }
    result
}
