// Commits.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hubkit_api::CancellationToken;
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use crate::error::Error;
use crate::mapping::{self, FieldDescriptor, ScalarKind};
use crate::model::{Repository, User, web_url};
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::{PropertyBag, PropertyValue};
use crate::store::refresh::{self, Refreshable};

mod fields {
    pub(super) const MESSAGE: &str = "message";
    pub(super) const AUTHOR: &str = "author";
    pub(super) const COMMITTER: &str = "committer";
    pub(super) const AUTHORED_AT: &str = "authored_at";
    pub(super) const COMMITTED_AT: &str = "committed_at";
}

static FIELDS: &[FieldDescriptor<Commit>] = &[
    FieldDescriptor::scalar(fields::MESSAGE, "commit.message", ScalarKind::Str),
    FieldDescriptor::entity(fields::AUTHOR, "author", Commit::user_from),
    FieldDescriptor::entity(fields::COMMITTER, "committer", Commit::user_from),
    FieldDescriptor::scalar(fields::AUTHORED_AT, "commit.author.date", ScalarKind::Time),
    FieldDescriptor::scalar(fields::COMMITTED_AT, "commit.committer.date", ScalarKind::Time),
];

/// A commit, keyed by repository and SHA.
pub struct Commit {
    me: Weak<Commit>,
    session: SessionRef,
    repository: Arc<Repository>,
    sha: String,
    props: PropertyBag,
}

impl Commit {
    pub(crate) fn get_or_create(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        sha: &str,
    ) -> Result<Arc<Self>, Error> {
        if sha.is_empty() {
            return Err(Error::InvalidArgument("a commit SHA must not be empty"));
        }
        let key = (
            repository.owner().login().to_owned(),
            repository.name().to_owned(),
            sha.to_owned(),
        );
        Ok(session.caches.commits.get_or_create(key, || {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                session: SessionRef::new(session),
                repository: Arc::clone(repository),
                sha: sha.to_owned(),
                props: PropertyBag::new(),
            })
        }))
    }

    /// Canonicalize from the compact shape a push event carries: just
    /// a SHA and a flat message.
    pub(crate) fn from_push(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        sha: &str,
        message: Option<String>,
    ) -> Result<Arc<Self>, Error> {
        let commit = Self::get_or_create(session, repository, sha)?;
        if let Some(message) = message {
            commit.props.set(fields::MESSAGE, PropertyValue::Str(message));
        }
        Ok(commit)
    }

    // ── Properties ──────────────────────────────────────────────────

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn message(&self) -> Option<String> {
        self.prop(fields::MESSAGE)?.into_str()
    }

    pub fn author(&self) -> Option<Arc<User>> {
        self.prop(fields::AUTHOR)?.into_user()
    }

    pub fn committer(&self) -> Option<Arc<User>> {
        self.prop(fields::COMMITTER)?.into_user()
    }

    pub fn authored_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::AUTHORED_AT)?.into_time()
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::COMMITTED_AT)?.into_time()
    }

    pub fn html_url(&self) -> Url {
        web_url(&[
            self.repository.owner().login(),
            self.repository.name(),
            "commit",
            &self.sha,
        ])
    }

    // ── Behavior ────────────────────────────────────────────────────

    pub async fn refresh(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        refresh::refresh_entity(self, cancellation).await
    }

    pub fn changes(&self) -> broadcast::Receiver<&'static str> {
        self.props.subscribe()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn prop(&self, name: &'static str) -> Option<PropertyValue> {
        let value = self.props.get(name);
        if value.is_none() {
            if let Some(me) = self.me.upgrade() {
                refresh::spawn_refresh(me);
            }
        }
        value
    }

    fn user_from(&self, fragment: &Value) -> Result<PropertyValue, Error> {
        let session = self.session.upgrade()?;
        Ok(PropertyValue::User(User::from_json(&session, fragment)?))
    }
}

impl Refreshable for Commit {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.props
    }

    fn resource_path(&self) -> String {
        format!(
            "repos/{}/{}/commits/{}",
            self.repository.owner().login(),
            self.repository.name(),
            self.sha
        )
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self, &self.props, FIELDS, data)
    }
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.repository == other.repository && self.sha == other.sha
    }
}

impl Eq for Commit {}

impl fmt::Debug for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit")
            .field("repository", &self.repository.full_name())
            .field("sha", &self.sha)
            .finish_non_exhaustive()
    }
}
