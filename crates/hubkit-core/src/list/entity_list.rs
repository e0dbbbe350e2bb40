// Unpaginated server-backed collections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hubkit_api::{ApiRequest, CancellationToken};
use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::list::TrackedList;
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::Freshness;

/// Builds one list item from its JSON fragment, canonicalizing through
/// the session's caches.
pub(crate) type ItemInit<T> =
    Box<dyn Fn(&Arc<SessionInner>, &Value) -> Result<T, Error> + Send + Sync>;

/// A list resource without pagination, e.g. a user's repositories.
///
/// The contents live in a [`TrackedList`]: refreshing reconciles the
/// existing items against the server's current ordering instead of
/// rebuilding the collection, so subscribers see minimal changes and
/// item identity is preserved.
pub struct EntityList<T> {
    session: SessionRef,
    url: Url,
    entries: TrackedList<T>,
    freshness: Mutex<Freshness>,
    /// Same single-flight discipline as entity refreshes: raised on
    /// request, lowered on completion, checked behind the gate.
    wanted: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    init: ItemInit<T>,
}

impl<T> EntityList<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create the list and populate it with an initial fetch.
    pub(crate) async fn create(
        session: &Arc<SessionInner>,
        url: Url,
        init: ItemInit<T>,
        cancellation: &CancellationToken,
    ) -> Result<Arc<Self>, Error> {
        let list = Arc::new(Self {
            session: SessionRef::new(session),
            url,
            entries: TrackedList::new(),
            freshness: Mutex::new(Freshness::default()),
            wanted: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            init,
        });
        list.refresh(cancellation).await?;
        Ok(list)
    }

    /// The reconciling collection behind this list.
    pub fn entries(&self) -> &TrackedList<T> {
        &self.entries
    }

    /// Re-fetch the resource and reconcile. Concurrent callers share
    /// one request; a 304 leaves the collection untouched.
    pub async fn refresh(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        self.wanted.store(true, Ordering::SeqCst);

        let _gate = tokio::select! {
            guard = self.gate.lock() => guard,
            () = cancellation.cancelled() => return Err(hubkit_api::Error::Cancelled.into()),
        };

        if !self.wanted.load(Ordering::SeqCst) {
            return Ok(());
        }

        let session = self.session.upgrade()?;
        let freshness = self
            .freshness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let request =
            ApiRequest::conditional(self.url.clone(), freshness.etag, freshness.last_modified);

        let response = session.client.get(&request, cancellation).await?;
        if response.changed {
            {
                let mut freshness = self
                    .freshness
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                freshness.etag = response.etag.clone();
                freshness.last_modified = response.last_modified;
            }
            let body = response
                .body
                .as_ref()
                .ok_or_else(|| Error::data("list response had an empty body", &Value::Null))?;
            let fragments = body
                .as_array()
                .ok_or_else(|| Error::data("expected a JSON array", body))?;

            let mut items = Vec::with_capacity(fragments.len());
            for fragment in fragments {
                items.push((self.init)(&session, fragment)?);
            }
            self.entries.reconcile(items);
        }

        self.wanted.store(false, Ordering::SeqCst);
        Ok(())
    }
}
