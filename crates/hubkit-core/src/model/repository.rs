// Repositories.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hubkit_api::CancellationToken;
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use crate::error::Error;
use crate::mapping::{self, FieldDescriptor, ScalarKind};
use crate::model::{Commit, Issue, Label, Milestone, User, web_url};
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::{PropertyBag, PropertyValue};
use crate::store::refresh::{self, Refreshable};

mod fields {
    pub(super) const ID: &str = "id";
    pub(super) const DESCRIPTION: &str = "description";
    pub(super) const HOMEPAGE: &str = "homepage";
    pub(super) const LANGUAGE: &str = "language";
    pub(super) const PRIVATE: &str = "private";
    pub(super) const FORK: &str = "fork";
    pub(super) const DEFAULT_BRANCH: &str = "default_branch";
    pub(super) const SIZE: &str = "size";
    pub(super) const HAS_ISSUES: &str = "has_issues";
    pub(super) const HAS_WIKI: &str = "has_wiki";
    pub(super) const HAS_PAGES: &str = "has_pages";
    pub(super) const HAS_DOWNLOADS: &str = "has_downloads";
    pub(super) const STARGAZERS_COUNT: &str = "stargazers_count";
    pub(super) const WATCHERS_COUNT: &str = "watchers_count";
    pub(super) const FORKS_COUNT: &str = "forks_count";
    pub(super) const OPEN_ISSUES_COUNT: &str = "open_issues_count";
    pub(super) const CREATED_AT: &str = "created_at";
    pub(super) const UPDATED_AT: &str = "updated_at";
    pub(super) const PUSHED_AT: &str = "pushed_at";
    pub(super) const OWNER: &str = "owner";
}

static FIELDS: &[FieldDescriptor<Repository>] = &[
    FieldDescriptor::scalar(fields::ID, "id", ScalarKind::I64),
    FieldDescriptor::scalar(fields::DESCRIPTION, "description", ScalarKind::Str),
    FieldDescriptor::scalar(fields::HOMEPAGE, "homepage", ScalarKind::Str),
    FieldDescriptor::scalar(fields::LANGUAGE, "language", ScalarKind::Str),
    FieldDescriptor::scalar(fields::PRIVATE, "private", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::FORK, "fork", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::DEFAULT_BRANCH, "default_branch", ScalarKind::Str),
    FieldDescriptor::scalar(fields::SIZE, "size", ScalarKind::I64),
    FieldDescriptor::scalar(fields::HAS_ISSUES, "has_issues", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::HAS_WIKI, "has_wiki", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::HAS_PAGES, "has_pages", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::HAS_DOWNLOADS, "has_downloads", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::STARGAZERS_COUNT, "stargazers_count", ScalarKind::I64),
    FieldDescriptor::scalar(fields::WATCHERS_COUNT, "watchers_count", ScalarKind::I64),
    FieldDescriptor::scalar(fields::FORKS_COUNT, "forks_count", ScalarKind::I64),
    FieldDescriptor::scalar(fields::OPEN_ISSUES_COUNT, "open_issues_count", ScalarKind::I64),
    FieldDescriptor::scalar(fields::CREATED_AT, "created_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::UPDATED_AT, "updated_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::PUSHED_AT, "pushed_at", ScalarKind::Time),
    // The owner is part of the key; nested owner data still gets
    // applied onto the canonical user.
    FieldDescriptor::inline(fields::OWNER, "owner", Repository::absorb_owner),
];

/// A repository, keyed by its owner's login and its name.
pub struct Repository {
    me: Weak<Repository>,
    session: SessionRef,
    owner: Arc<User>,
    name: String,
    props: PropertyBag,
}

impl Repository {
    pub(crate) fn get_or_create(
        session: &Arc<SessionInner>,
        owner: &Arc<User>,
        name: &str,
    ) -> Result<Arc<Self>, Error> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("a repository name must not be empty"));
        }
        let key = (owner.login().to_owned(), name.to_owned());
        Ok(session.caches.repositories.get_or_create(key, || {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                session: SessionRef::new(session),
                owner: Arc::clone(owner),
                name: name.to_owned(),
                props: PropertyBag::new(),
            })
        }))
    }

    /// Canonicalize a repository from a full response fragment
    /// (one that carries an `owner` object and a `name`).
    pub(crate) fn from_json(session: &Arc<SessionInner>, data: &Value) -> Result<Arc<Self>, Error> {
        let owner = data
            .get("owner")
            .filter(|fragment| !fragment.is_null())
            .ok_or_else(|| Error::data("repository fragment lacks an owner", data))?;
        let owner = User::from_json(session, owner)?;
        let name = mapping::required_str(data, "name")?;
        let repository = Self::get_or_create(session, &owner, name)
            .map_err(|_| Error::data("repository fragment has an empty name", data))?;
        repository.apply(data)?;
        Ok(repository)
    }

    /// Canonicalize from the compact `owner/name` form events use.
    pub(crate) fn from_full_name(
        session: &Arc<SessionInner>,
        full_name: &str,
    ) -> Result<Arc<Self>, Error> {
        let Some((owner, name)) = full_name.split_once('/') else {
            return Err(Error::data(
                format!("`{full_name}` is not an owner/name pair"),
                &Value::String(full_name.to_owned()),
            ));
        };
        let owner = User::get_or_create(session, owner)
            .map_err(|_| Error::data("repository full name has an empty owner", &Value::String(full_name.to_owned())))?;
        Self::get_or_create(session, &owner, name)
            .map_err(|_| Error::data("repository full name has an empty name", &Value::String(full_name.to_owned())))
    }

    // ── Properties ──────────────────────────────────────────────────

    pub fn owner(&self) -> &Arc<User> {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner.login(), self.name)
    }

    pub fn id(&self) -> Option<i64> {
        self.prop(fields::ID)?.into_int()
    }

    pub fn description(&self) -> Option<String> {
        self.prop(fields::DESCRIPTION)?.into_str()
    }

    pub fn homepage(&self) -> Option<String> {
        self.prop(fields::HOMEPAGE)?.into_str()
    }

    pub fn language(&self) -> Option<String> {
        self.prop(fields::LANGUAGE)?.into_str()
    }

    pub fn private(&self) -> Option<bool> {
        self.prop(fields::PRIVATE)?.into_bool()
    }

    pub fn fork(&self) -> Option<bool> {
        self.prop(fields::FORK)?.into_bool()
    }

    pub fn default_branch(&self) -> Option<String> {
        self.prop(fields::DEFAULT_BRANCH)?.into_str()
    }

    /// Size in kilobytes, as the API reports it.
    pub fn size(&self) -> Option<i64> {
        self.prop(fields::SIZE)?.into_int()
    }

    pub fn has_issues(&self) -> Option<bool> {
        self.prop(fields::HAS_ISSUES)?.into_bool()
    }

    pub fn has_wiki(&self) -> Option<bool> {
        self.prop(fields::HAS_WIKI)?.into_bool()
    }

    pub fn has_pages(&self) -> Option<bool> {
        self.prop(fields::HAS_PAGES)?.into_bool()
    }

    pub fn has_downloads(&self) -> Option<bool> {
        self.prop(fields::HAS_DOWNLOADS)?.into_bool()
    }

    pub fn stargazers_count(&self) -> Option<i64> {
        self.prop(fields::STARGAZERS_COUNT)?.into_int()
    }

    pub fn watchers_count(&self) -> Option<i64> {
        self.prop(fields::WATCHERS_COUNT)?.into_int()
    }

    pub fn forks_count(&self) -> Option<i64> {
        self.prop(fields::FORKS_COUNT)?.into_int()
    }

    pub fn open_issues_count(&self) -> Option<i64> {
        self.prop(fields::OPEN_ISSUES_COUNT)?.into_int()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::CREATED_AT)?.into_time()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::UPDATED_AT)?.into_time()
    }

    pub fn pushed_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::PUSHED_AT)?.into_time()
    }

    pub fn html_url(&self) -> Url {
        web_url(&[self.owner.login(), &self.name])
    }

    // ── Behavior ────────────────────────────────────────────────────

    pub async fn refresh(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        refresh::refresh_entity(self, cancellation).await
    }

    pub fn changes(&self) -> broadcast::Receiver<&'static str> {
        self.props.subscribe()
    }

    /// A lazy handle to an issue of this repository.
    pub fn issue(self: &Arc<Self>, number: u64) -> Result<Arc<Issue>, Error> {
        let session = self.session.upgrade()?;
        Issue::get_or_create(&session, self, number)
    }

    /// Fetch an issue of this repository.
    pub async fn fetch_issue(
        self: &Arc<Self>,
        number: u64,
        cancellation: &CancellationToken,
    ) -> Result<Arc<Issue>, Error> {
        let issue = self.issue(number)?;
        issue.refresh(cancellation).await?;
        Ok(issue)
    }

    /// A lazy handle to a commit of this repository.
    pub fn commit(self: &Arc<Self>, sha: &str) -> Result<Arc<Commit>, Error> {
        let session = self.session.upgrade()?;
        Commit::get_or_create(&session, self, sha)
    }

    /// A lazy handle to a label of this repository.
    pub fn label(self: &Arc<Self>, name: &str) -> Result<Arc<Label>, Error> {
        let session = self.session.upgrade()?;
        Label::get_or_create(&session, self, name)
    }

    /// A lazy handle to a milestone of this repository.
    pub fn milestone(self: &Arc<Self>, number: u64) -> Result<Arc<Milestone>, Error> {
        let session = self.session.upgrade()?;
        Milestone::get_or_create(&session, self, number)
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

    fn absorb_owner(&self, fragment: &Value) -> Result<(), Error> {
        let session = self.session.upgrade()?;
        User::from_json(&session, fragment)?;
        Ok(())
    }

    pub(crate) fn absorb_id(&self, id: i64) {
        self.props.set(fields::ID, PropertyValue::Int(id));
    }
}

impl Refreshable for Repository {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.props
    }

    fn resource_path(&self) -> String {
        format!("repos/{}/{}", self.owner.login(), self.name)
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self, &self.props, FIELDS, data)
    }
}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.owner.login() == other.owner.login() && self.name == other.name
    }
}

impl Eq for Repository {}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("owner", &self.owner.login())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::session::Session;

    #[test]
    fn from_json_canonicalizes_owner_and_repository() {
        let session = Session::anonymous().unwrap();
        let data = json!({
            "id": 1296269,
            "name": "Hello-World",
            "owner": { "login": "octocat", "id": 583231 },
            "fork": false,
            "language": "Rust"
        });

        let repository = Repository::from_json(session.inner(), &data).unwrap();
        let owner = User::get_or_create(session.inner(), "octocat").unwrap();

        assert!(Arc::ptr_eq(repository.owner(), &owner));
        assert_eq!(repository.full_name(), "octocat/Hello-World");
        assert_eq!(repository.id(), Some(1_296_269));
        assert_eq!(repository.language().as_deref(), Some("Rust"));
        // The nested fragment populated the canonical user too.
        assert_eq!(owner.id(), Some(583_231));
    }

    #[test]
    fn from_full_name_splits_the_pair() {
        let session = Session::anonymous().unwrap();

        let repository = Repository::from_full_name(session.inner(), "octocat/Hello-World").unwrap();

        assert_eq!(repository.owner().login(), "octocat");
        assert_eq!(repository.name(), "Hello-World");
    }

    #[test]
    fn malformed_full_name_is_a_data_error() {
        let session = Session::anonymous().unwrap();

        let result = Repository::from_full_name(session.inner(), "no-slash-here");

        assert!(matches!(result, Err(Error::Data { .. })));
    }

    #[test]
    fn empty_name_is_rejected() {
        let session = Session::anonymous().unwrap();
        let owner = User::get_or_create(session.inner(), "octocat").unwrap();

        let result = Repository::get_or_create(session.inner(), &owner, "");

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
