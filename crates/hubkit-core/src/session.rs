// Session: the root object of the model.
//
// A `Session` is a cheap-clone handle over the HTTP client and the
// per-kind identity caches. Entities hold a `SessionRef` (a weak
// handle) back to it, so dropping the last `Session` clone releases
// the whole object graph instead of leaking cycles.

use std::sync::{Arc, Weak};

use hubkit_api::{ApiClient, ApiConfig, ApiRequest, CancellationToken};
use serde_json::Value;

use crate::error::Error;
use crate::list::PagedList;
use crate::model::{Commit, Event, Issue, IssueComment, Label, Milestone, Repository, User};
use crate::store::cache::EntityCache;
use crate::store::refresh::Refreshable;

/// A connection to one GitHub instance plus the identity caches that
/// make entity lookups canonical within it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) client: ApiClient,
    pub(crate) caches: Caches,
}

/// One identity cache per entity kind, keyed by natural key.
/// Composite keys are tuples of the owning entity's key components.
pub(crate) struct Caches {
    pub(crate) users: EntityCache<String, User>,
    pub(crate) repositories: EntityCache<(String, String), Repository>,
    pub(crate) issues: EntityCache<(String, String, u64), Issue>,
    pub(crate) labels: EntityCache<(String, String, String), Label>,
    pub(crate) milestones: EntityCache<(String, String, u64), Milestone>,
    pub(crate) commits: EntityCache<(String, String, String), Commit>,
    pub(crate) comments: EntityCache<(String, String, i64), IssueComment>,
}

impl Caches {
    fn new() -> Self {
        Self {
            users: EntityCache::new(),
            repositories: EntityCache::new(),
            issues: EntityCache::new(),
            labels: EntityCache::new(),
            milestones: EntityCache::new(),
            commits: EntityCache::new(),
            comments: EntityCache::new(),
        }
    }
}

/// Weak handle from an entity back to its owning session.
#[derive(Clone)]
pub(crate) struct SessionRef(Weak<SessionInner>);

impl SessionRef {
    pub(crate) fn new(inner: &Arc<SessionInner>) -> Self {
        Self(Arc::downgrade(inner))
    }

    pub(crate) fn upgrade(&self) -> Result<Arc<SessionInner>, Error> {
        self.0.upgrade().ok_or(Error::SessionClosed)
    }
}

impl Session {
    /// Open a session against the configured API.
    pub fn new(config: ApiConfig) -> Result<Self, Error> {
        let client = ApiClient::new(config)?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                client,
                caches: Caches::new(),
            }),
        })
    }

    /// An unauthenticated session against the public GitHub API.
    pub fn anonymous() -> Result<Self, Error> {
        Self::new(ApiConfig::default())
    }

    /// The user the session's token belongs to, fetched eagerly.
    pub async fn authenticated_user(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<Arc<User>, Error> {
        let request = ApiRequest::new(self.inner.client.url("user")?);
        let response = self.inner.client.get(&request, cancellation).await?;
        let body = response
            .body
            .as_ref()
            .ok_or_else(|| Error::data("user response had an empty body", &Value::Null))?;
        let user = User::from_json(&self.inner, body)?;
        user.bag().set_freshness(response.etag, response.last_modified);
        Ok(user)
    }

    /// Fetch a user by login.
    pub async fn user(
        &self,
        login: &str,
        cancellation: &CancellationToken,
    ) -> Result<Arc<User>, Error> {
        let user = User::get_or_create(&self.inner, login)?;
        user.refresh(cancellation).await?;
        Ok(user)
    }

    /// A lazy handle to a repository; no request is made until a
    /// property is read or the repository is refreshed.
    pub fn repository(&self, owner: &str, name: &str) -> Result<Arc<Repository>, Error> {
        let owner = User::get_or_create(&self.inner, owner)?;
        Repository::get_or_create(&self.inner, &owner, name)
    }

    /// The public event feed, as a paginated list. Creation fetches
    /// the first page and discovers the page count.
    pub async fn public_events(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<Arc<PagedList<Event>>, Error> {
        let url = self.inner.client.url("events")?;
        PagedList::create(&self.inner, url, Box::new(Event::from_json), cancellation).await
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }
}
