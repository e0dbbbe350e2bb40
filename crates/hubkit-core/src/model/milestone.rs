// Milestones.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hubkit_api::CancellationToken;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::mapping::{self, FieldDescriptor, ScalarKind};
use crate::model::{Repository, User};
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::{PropertyBag, PropertyValue};
use crate::store::refresh::{self, Refreshable};

mod fields {
    pub(super) const ID: &str = "id";
    pub(super) const TITLE: &str = "title";
    pub(super) const DESCRIPTION: &str = "description";
    pub(super) const STATE: &str = "state";
    pub(super) const CREATOR: &str = "creator";
    pub(super) const OPEN_ISSUES: &str = "open_issues";
    pub(super) const CLOSED_ISSUES: &str = "closed_issues";
    pub(super) const CREATED_AT: &str = "created_at";
    pub(super) const UPDATED_AT: &str = "updated_at";
    pub(super) const CLOSED_AT: &str = "closed_at";
    pub(super) const DUE_ON: &str = "due_on";
}

static FIELDS: &[FieldDescriptor<Milestone>] = &[
    FieldDescriptor::scalar(fields::ID, "id", ScalarKind::I64),
    FieldDescriptor::scalar(fields::TITLE, "title", ScalarKind::Str),
    FieldDescriptor::scalar(fields::DESCRIPTION, "description", ScalarKind::Str),
    FieldDescriptor::scalar(fields::STATE, "state", ScalarKind::Str),
    FieldDescriptor::entity(fields::CREATOR, "creator", Milestone::creator_from),
    FieldDescriptor::scalar(fields::OPEN_ISSUES, "open_issues", ScalarKind::I64),
    FieldDescriptor::scalar(fields::CLOSED_ISSUES, "closed_issues", ScalarKind::I64),
    FieldDescriptor::scalar(fields::CREATED_AT, "created_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::UPDATED_AT, "updated_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::CLOSED_AT, "closed_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::DUE_ON, "due_on", ScalarKind::Time),
];

/// A milestone, keyed by repository and its 1-based number.
pub struct Milestone {
    me: Weak<Milestone>,
    session: SessionRef,
    repository: Arc<Repository>,
    number: u64,
    props: PropertyBag,
}

impl Milestone {
    pub(crate) fn get_or_create(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        number: u64,
    ) -> Result<Arc<Self>, Error> {
        if number < 1 {
            return Err(Error::InvalidArgument("a milestone number must be positive"));
        }
        let key = (
            repository.owner().login().to_owned(),
            repository.name().to_owned(),
            number,
        );
        Ok(session.caches.milestones.get_or_create(key, || {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                session: SessionRef::new(session),
                repository: Arc::clone(repository),
                number,
                props: PropertyBag::new(),
            })
        }))
    }

    pub(crate) fn from_json(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        data: &Value,
    ) -> Result<Arc<Self>, Error> {
        let number = mapping::required_u64(data, "number")?;
        let milestone = Self::get_or_create(session, repository, number)
            .map_err(|_| Error::data("milestone fragment has a non-positive number", data))?;
        milestone.apply(data)?;
        Ok(milestone)
    }

    // ── Properties ──────────────────────────────────────────────────

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn id(&self) -> Option<i64> {
        self.prop(fields::ID)?.into_int()
    }

    pub fn title(&self) -> Option<String> {
        self.prop(fields::TITLE)?.into_str()
    }

    pub fn description(&self) -> Option<String> {
        self.prop(fields::DESCRIPTION)?.into_str()
    }

    /// `open` or `closed`.
    pub fn state(&self) -> Option<String> {
        self.prop(fields::STATE)?.into_str()
    }

    pub fn creator(&self) -> Option<Arc<User>> {
        self.prop(fields::CREATOR)?.into_user()
    }

    pub fn open_issues(&self) -> Option<i64> {
        self.prop(fields::OPEN_ISSUES)?.into_int()
    }

    pub fn closed_issues(&self) -> Option<i64> {
        self.prop(fields::CLOSED_ISSUES)?.into_int()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::CREATED_AT)?.into_time()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::UPDATED_AT)?.into_time()
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::CLOSED_AT)?.into_time()
    }

    pub fn due_on(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::DUE_ON)?.into_time()
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

    fn creator_from(&self, fragment: &Value) -> Result<PropertyValue, Error> {
        let session = self.session.upgrade()?;
        Ok(PropertyValue::User(User::from_json(&session, fragment)?))
    }
}

impl Refreshable for Milestone {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.props
    }

    fn resource_path(&self) -> String {
        format!(
            "repos/{}/{}/milestones/{}",
            self.repository.owner().login(),
            self.repository.name(),
            self.number
        )
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self, &self.props, FIELDS, data)
    }
}

impl PartialEq for Milestone {
    fn eq(&self, other: &Self) -> bool {
        self.repository == other.repository && self.number == other.number
    }
}

impl Eq for Milestone {}

impl fmt::Debug for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Milestone")
            .field("repository", &self.repository.full_name())
            .field("number", &self.number)
            .finish_non_exhaustive()
    }
}
