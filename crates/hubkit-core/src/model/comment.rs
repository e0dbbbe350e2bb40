// Issue comments.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hubkit_api::CancellationToken;
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use crate::error::Error;
use crate::mapping::{self, FieldDescriptor, ScalarKind};
use crate::model::{Repository, User};
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::{PropertyBag, PropertyValue};
use crate::store::refresh::{self, Refreshable};

mod fields {
    pub(super) const BODY: &str = "body";
    pub(super) const USER: &str = "user";
    pub(super) const HTML_URL: &str = "html_url";
    pub(super) const CREATED_AT: &str = "created_at";
    pub(super) const UPDATED_AT: &str = "updated_at";
}

static FIELDS: &[FieldDescriptor<IssueComment>] = &[
    FieldDescriptor::scalar(fields::BODY, "body", ScalarKind::Str),
    FieldDescriptor::entity(fields::USER, "user", IssueComment::user_from),
    FieldDescriptor::scalar(fields::HTML_URL, "html_url", ScalarKind::Url),
    FieldDescriptor::scalar(fields::CREATED_AT, "created_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::UPDATED_AT, "updated_at", ScalarKind::Time),
];

/// A comment on an issue, keyed by repository and comment id.
/// Comment ids are repository-scoped, not issue-scoped.
pub struct IssueComment {
    me: Weak<IssueComment>,
    session: SessionRef,
    repository: Arc<Repository>,
    id: i64,
    props: PropertyBag,
}

impl IssueComment {
    pub(crate) fn get_or_create(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        id: i64,
    ) -> Result<Arc<Self>, Error> {
        if id < 0 {
            return Err(Error::InvalidArgument("a comment id must not be negative"));
        }
        let key = (
            repository.owner().login().to_owned(),
            repository.name().to_owned(),
            id,
        );
        Ok(session.caches.comments.get_or_create(key, || {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                session: SessionRef::new(session),
                repository: Arc::clone(repository),
                id,
                props: PropertyBag::new(),
            })
        }))
    }

    pub(crate) fn from_json(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        data: &Value,
    ) -> Result<Arc<Self>, Error> {
        let id = mapping::required_i64(data, "id")?;
        let comment = Self::get_or_create(session, repository, id)
            .map_err(|_| Error::data("comment fragment has a negative id", data))?;
        comment.apply(data)?;
        Ok(comment)
    }

    // ── Properties ──────────────────────────────────────────────────

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn body(&self) -> Option<String> {
        self.prop(fields::BODY)?.into_str()
    }

    pub fn user(&self) -> Option<Arc<User>> {
        self.prop(fields::USER)?.into_user()
    }

    pub fn html_url(&self) -> Option<Url> {
        self.prop(fields::HTML_URL)?.into_url()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::CREATED_AT)?.into_time()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::UPDATED_AT)?.into_time()
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

impl Refreshable for IssueComment {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.props
    }

    fn resource_path(&self) -> String {
        format!(
            "repos/{}/{}/issues/comments/{}",
            self.repository.owner().login(),
            self.repository.name(),
            self.id
        )
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self, &self.props, FIELDS, data)
    }
}

impl PartialEq for IssueComment {
    fn eq(&self, other: &Self) -> bool {
        self.repository == other.repository && self.id == other.id
    }
}

impl Eq for IssueComment {}

impl fmt::Debug for IssueComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssueComment")
            .field("repository", &self.repository.full_name())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
