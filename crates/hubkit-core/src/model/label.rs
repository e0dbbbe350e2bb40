// Issue labels.

use std::fmt;
use std::sync::{Arc, Weak};

use hubkit_api::CancellationToken;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::mapping::{self, FieldDescriptor, ScalarKind};
use crate::model::Repository;
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::{PropertyBag, PropertyValue};
use crate::store::refresh::{self, Refreshable};

mod fields {
    pub(super) const ID: &str = "id";
    pub(super) const COLOR: &str = "color";
    pub(super) const DEFAULT: &str = "default";
}

static FIELDS: &[FieldDescriptor<Label>] = &[
    FieldDescriptor::scalar(fields::ID, "id", ScalarKind::I64),
    FieldDescriptor::scalar(fields::COLOR, "color", ScalarKind::Str),
    FieldDescriptor::scalar(fields::DEFAULT, "default", ScalarKind::Bool),
];

/// A label, keyed by repository and name.
pub struct Label {
    me: Weak<Label>,
    session: SessionRef,
    repository: Arc<Repository>,
    name: String,
    props: PropertyBag,
}

impl Label {
    pub(crate) fn get_or_create(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        name: &str,
    ) -> Result<Arc<Self>, Error> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("a label name must not be empty"));
        }
        let key = (
            repository.owner().login().to_owned(),
            repository.name().to_owned(),
            name.to_owned(),
        );
        Ok(session.caches.labels.get_or_create(key, || {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                session: SessionRef::new(session),
                repository: Arc::clone(repository),
                name: name.to_owned(),
                props: PropertyBag::new(),
            })
        }))
    }

    pub(crate) fn from_json(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        data: &Value,
    ) -> Result<Arc<Self>, Error> {
        let name = mapping::required_str(data, "name")?;
        let label = Self::get_or_create(session, repository, name)
            .map_err(|_| Error::data("label fragment has an empty name", data))?;
        label.apply(data)?;
        Ok(label)
    }

    // ── Properties ──────────────────────────────────────────────────

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<i64> {
        self.prop(fields::ID)?.into_int()
    }

    /// Six-digit hex color, without the leading `#`.
    pub fn color(&self) -> Option<String> {
        self.prop(fields::COLOR)?.into_str()
    }

    pub fn default(&self) -> Option<bool> {
        self.prop(fields::DEFAULT)?.into_bool()
    }

    // ── Behavior ────────────────────────────────────────────────────

    pub async fn refresh(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        refresh::refresh_entity(self, cancellation).await
    }

    pub fn changes(&self) -> broadcast::Receiver<&'static str> {
        self.props.subscribe()
    }

    fn prop(&self, name: &'static str) -> Option<PropertyValue> {
        let value = self.props.get(name);
        if value.is_none() {
            if let Some(me) = self.me.upgrade() {
                refresh::spawn_refresh(me);
            }
        }
        value
    }
}

impl Refreshable for Label {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.props
    }

    fn resource_path(&self) -> String {
        format!(
            "repos/{}/{}/labels/{}",
            self.repository.owner().login(),
            self.repository.name(),
            self.name
        )
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self, &self.props, FIELDS, data)
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.repository == other.repository && self.name == other.name
    }
}

impl Eq for Label {}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Label")
            .field("repository", &self.repository.full_name())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
