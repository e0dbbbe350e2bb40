// GitHub user accounts.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hubkit_api::CancellationToken;
use serde_json::Value;
use tokio::sync::{OnceCell, broadcast};
use url::Url;

use crate::error::Error;
use crate::list::EntityList;
use crate::mapping::{self, FieldDescriptor, ScalarKind};
use crate::model::{Repository, web_url};
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::{PropertyBag, PropertyValue};
use crate::store::refresh::{self, Refreshable};

mod fields {
    pub(super) const ID: &str = "id";
    pub(super) const NAME: &str = "name";
    pub(super) const COMPANY: &str = "company";
    pub(super) const LOCATION: &str = "location";
    pub(super) const EMAIL: &str = "email";
    pub(super) const HIREABLE: &str = "hireable";
    pub(super) const BIO: &str = "bio";
    pub(super) const AVATAR_URL: &str = "avatar_url";
    pub(super) const CREATED_AT: &str = "created_at";
    pub(super) const UPDATED_AT: &str = "updated_at";
}

static FIELDS: &[FieldDescriptor<User>] = &[
    FieldDescriptor::scalar(fields::ID, "id", ScalarKind::I64),
    FieldDescriptor::scalar(fields::NAME, "name", ScalarKind::Str),
    FieldDescriptor::scalar(fields::COMPANY, "company", ScalarKind::Str),
    FieldDescriptor::scalar(fields::LOCATION, "location", ScalarKind::Str),
    FieldDescriptor::scalar(fields::EMAIL, "email", ScalarKind::Str),
    FieldDescriptor::scalar(fields::HIREABLE, "hireable", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::BIO, "bio", ScalarKind::Str),
    FieldDescriptor::scalar(fields::AVATAR_URL, "avatar_url", ScalarKind::Url),
    FieldDescriptor::scalar(fields::CREATED_AT, "created_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::UPDATED_AT, "updated_at", ScalarKind::Time),
];

/// A user account, canonical per session and keyed by login.
///
/// Property getters return `None` until a representation has been
/// applied; the first such read schedules a background refresh, so an
/// unpopulated entity fills itself in shortly after being observed.
pub struct User {
    me: Weak<User>,
    session: SessionRef,
    login: String,
    props: PropertyBag,
    repositories: OnceCell<Arc<EntityList<Arc<Repository>>>>,
    followers: OnceCell<Arc<EntityList<Arc<User>>>>,
    following: OnceCell<Arc<EntityList<Arc<User>>>>,
}

impl User {
    /// The canonical instance for `login`, created on first use.
    pub(crate) fn get_or_create(
        session: &Arc<SessionInner>,
        login: &str,
    ) -> Result<Arc<Self>, Error> {
        if login.is_empty() {
            return Err(Error::InvalidArgument("a user login must not be empty"));
        }
        Ok(session.caches.users.get_or_create(login.to_owned(), || {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                session: SessionRef::new(session),
                login: login.to_owned(),
                props: PropertyBag::new(),
                repositories: OnceCell::new(),
                followers: OnceCell::new(),
                following: OnceCell::new(),
            })
        }))
    }

    /// Canonicalize a user from a response fragment and apply it.
    pub(crate) fn from_json(session: &Arc<SessionInner>, data: &Value) -> Result<Arc<Self>, Error> {
        let login = mapping::required_str(data, "login")?;
        let user = Self::get_or_create(session, login)
            .map_err(|_| Error::data("user fragment has an empty login", data))?;
        user.apply(data)?;
        Ok(user)
    }

    // ── Properties ──────────────────────────────────────────────────

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn id(&self) -> Option<i64> {
        self.prop(fields::ID)?.into_int()
    }

    pub fn name(&self) -> Option<String> {
        self.prop(fields::NAME)?.into_str()
    }

    pub fn company(&self) -> Option<String> {
        self.prop(fields::COMPANY)?.into_str()
    }

    pub fn location(&self) -> Option<String> {
        self.prop(fields::LOCATION)?.into_str()
    }

    pub fn email(&self) -> Option<String> {
        self.prop(fields::EMAIL)?.into_str()
    }

    pub fn hireable(&self) -> Option<bool> {
        self.prop(fields::HIREABLE)?.into_bool()
    }

    pub fn bio(&self) -> Option<String> {
        self.prop(fields::BIO)?.into_str()
    }

    pub fn avatar_url(&self) -> Option<Url> {
        self.prop(fields::AVATAR_URL)?.into_url()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::CREATED_AT)?.into_time()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.prop(fields::UPDATED_AT)?.into_time()
    }

    /// The user's profile page.
    pub fn html_url(&self) -> Url {
        web_url(&[&self.login])
    }

    // ── Behavior ────────────────────────────────────────────────────

    /// Conditionally re-fetch this user's representation.
    pub async fn refresh(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        refresh::refresh_entity(self, cancellation).await
    }

    /// Property-change notifications, by property name.
    pub fn changes(&self) -> broadcast::Receiver<&'static str> {
        self.props.subscribe()
    }

    /// The repositories owned by this user.
    ///
    /// Created (and fetched) on first call; `refresh` forces a
    /// conditional re-fetch on later calls.
    pub async fn repositories(
        &self,
        refresh: bool,
        cancellation: &CancellationToken,
    ) -> Result<Arc<EntityList<Arc<Repository>>>, Error> {
        let mut created = false;
        let list = self
            .repositories
            .get_or_try_init(|| {
                created = true;
                async {
                    let session = self.session.upgrade()?;
                    let url = session.client.url(&format!("users/{}/repos", self.login))?;
                    EntityList::create(&session, url, Box::new(Repository::from_json), cancellation)
                        .await
                }
            })
            .await?;
        if refresh && !created {
            list.refresh(cancellation).await?;
        }
        Ok(Arc::clone(list))
    }

    /// The users following this user.
    pub async fn followers(
        &self,
        refresh: bool,
        cancellation: &CancellationToken,
    ) -> Result<Arc<EntityList<Arc<User>>>, Error> {
        self.user_list(
            &self.followers,
            format!("users/{}/followers", self.login),
            refresh,
            cancellation,
        )
        .await
    }

    /// The users this user follows.
    pub async fn following(
        &self,
        refresh: bool,
        cancellation: &CancellationToken,
    ) -> Result<Arc<EntityList<Arc<User>>>, Error> {
        self.user_list(
            &self.following,
            format!("users/{}/following", self.login),
            refresh,
            cancellation,
        )
        .await
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn user_list(
        &self,
        cell: &OnceCell<Arc<EntityList<Arc<User>>>>,
        path: String,
        refresh: bool,
        cancellation: &CancellationToken,
    ) -> Result<Arc<EntityList<Arc<User>>>, Error> {
        let mut created = false;
        let list = cell
            .get_or_try_init(|| {
                created = true;
                async {
                    let session = self.session.upgrade()?;
                    let url = session.client.url(&path)?;
                    EntityList::create(&session, url, Box::new(User::from_json), cancellation).await
                }
            })
            .await?;
        if refresh && !created {
            list.refresh(cancellation).await?;
        }
        Ok(Arc::clone(list))
    }

    /// Read a property; a never-populated one schedules a background
    /// refresh. An explicit `Null` is populated and does not.
    fn prop(&self, name: &'static str) -> Option<PropertyValue> {
        let value = self.props.get(name);
        if value.is_none() {
            if let Some(me) = self.me.upgrade() {
                refresh::spawn_refresh(me);
            }
        }
        value
    }

    /// Compact event fragments carry the numeric id without the rest
    /// of the profile.
    pub(crate) fn absorb_id(&self, id: i64) {
        self.props.set(fields::ID, PropertyValue::Int(id));
    }

    pub(crate) fn absorb_avatar_url(&self, avatar_url: Url) {
        self.props.set(fields::AVATAR_URL, PropertyValue::Url(avatar_url));
    }
}

impl Refreshable for User {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.props
    }

    fn resource_path(&self) -> String {
        format!("users/{}", self.login)
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self, &self.props, FIELDS, data)
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.login == other.login
    }
}

impl Eq for User {}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("login", &self.login)
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

    fn session() -> Session {
        Session::anonymous().unwrap()
    }

    #[test]
    fn empty_login_is_rejected() {
        let session = session();

        let result = User::get_or_create(session.inner(), "");

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn same_login_is_the_same_instance() {
        let session = session();

        let first = User::get_or_create(session.inner(), "octocat").unwrap();
        let second = User::get_or_create(session.inner(), "octocat").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn from_json_applies_properties() {
        let session = session();
        let data = json!({
            "login": "octocat",
            "id": 583231,
            "name": "The Octocat",
            "email": null,
            "created_at": "2011-01-25T18:44:36Z"
        });

        let user = User::from_json(session.inner(), &data).unwrap();

        assert_eq!(user.login(), "octocat");
        assert_eq!(user.id(), Some(583231));
        assert_eq!(user.name().as_deref(), Some("The Octocat"));
        // Explicitly null, so populated-but-empty: no refresh needed.
        assert_eq!(user.email(), None);
        assert!(user.created_at().is_some());
    }

    #[test]
    fn from_json_without_login_is_a_data_error() {
        let session = session();

        let result = User::from_json(session.inner(), &json!({ "id": 1 }));

        assert!(matches!(result, Err(Error::Data { .. })));
    }

    #[test]
    fn html_url_points_at_the_profile() {
        let session = session();
        let user = User::get_or_create(session.inner(), "octocat").unwrap();

        assert_eq!(user.html_url().as_str(), "https://github.com/octocat");
    }
}
