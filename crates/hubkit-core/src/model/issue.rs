// Issues and the pull-request view over them.
//
// The API serves pull requests as issues with a `pull_request` marker
// plus a richer representation under `/pulls/{n}`. Rather than a
// parallel entity, `PullRequest` is a view wrapping the canonical
// `Issue`: both resources feed the same property bag, while the pull
// endpoint keeps its own freshness tokens.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hubkit_api::CancellationToken;
use serde_json::Value;
use tokio::sync::{OnceCell, broadcast};
use url::Url;

use crate::error::Error;
use crate::list::{EntityList, TrackedList};
use crate::mapping::{self, FieldDescriptor, ScalarKind};
use crate::model::{IssueComment, Label, Milestone, Repository, User, web_url};
use crate::session::{SessionInner, SessionRef};
use crate::store::properties::{PropertyBag, PropertyValue};
use crate::store::refresh::{self, Refreshable};

mod fields {
    pub(super) const ID: &str = "id";
    pub(super) const TITLE: &str = "title";
    pub(super) const BODY: &str = "body";
    pub(super) const STATE: &str = "state";
    pub(super) const LOCKED: &str = "locked";
    pub(super) const COMMENTS: &str = "comments";
    pub(super) const USER: &str = "user";
    pub(super) const ASSIGNEE: &str = "assignee";
    pub(super) const MILESTONE: &str = "milestone";
    pub(super) const CLOSED_BY: &str = "closed_by";
    pub(super) const CREATED_AT: &str = "created_at";
    pub(super) const UPDATED_AT: &str = "updated_at";
    pub(super) const CLOSED_AT: &str = "closed_at";
    pub(super) const LABELS: &str = "labels";
    pub(super) const PULL_REQUEST: &str = "pull_request";
    pub(super) const MERGED_AT: &str = "merged_at";
}

static FIELDS: &[FieldDescriptor<Issue>] = &[
    FieldDescriptor::scalar(fields::ID, "id", ScalarKind::I64),
    FieldDescriptor::scalar(fields::TITLE, "title", ScalarKind::Str),
    FieldDescriptor::scalar(fields::BODY, "body", ScalarKind::Str),
    FieldDescriptor::scalar(fields::STATE, "state", ScalarKind::Str),
    FieldDescriptor::scalar(fields::LOCKED, "locked", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::COMMENTS, "comments", ScalarKind::I64),
    FieldDescriptor::entity(fields::USER, "user", Issue::user_from),
    FieldDescriptor::entity(fields::ASSIGNEE, "assignee", Issue::user_from),
    FieldDescriptor::entity(fields::MILESTONE, "milestone", Issue::milestone_from),
    FieldDescriptor::entity(fields::CLOSED_BY, "closed_by", Issue::user_from),
    FieldDescriptor::scalar(fields::CREATED_AT, "created_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::UPDATED_AT, "updated_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::CLOSED_AT, "closed_at", ScalarKind::Time),
    FieldDescriptor::inline(fields::LABELS, "labels", Issue::reconcile_labels),
    FieldDescriptor::inline(fields::PULL_REQUEST, "pull_request", Issue::mark_pull_request),
];

/// Fields of the `/pulls/{n}` representation. Shared properties land
/// in the same bag as the issue's; `merged_at` only exists here.
static PR_FIELDS: &[FieldDescriptor<Issue>] = &[
    FieldDescriptor::scalar(fields::ID, "id", ScalarKind::I64),
    FieldDescriptor::scalar(fields::TITLE, "title", ScalarKind::Str),
    FieldDescriptor::scalar(fields::BODY, "body", ScalarKind::Str),
    FieldDescriptor::scalar(fields::STATE, "state", ScalarKind::Str),
    FieldDescriptor::scalar(fields::LOCKED, "locked", ScalarKind::Bool),
    FieldDescriptor::scalar(fields::COMMENTS, "comments", ScalarKind::I64),
    FieldDescriptor::entity(fields::USER, "user", Issue::user_from),
    FieldDescriptor::entity(fields::ASSIGNEE, "assignee", Issue::user_from),
    FieldDescriptor::entity(fields::MILESTONE, "milestone", Issue::milestone_from),
    FieldDescriptor::scalar(fields::CREATED_AT, "created_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::UPDATED_AT, "updated_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::CLOSED_AT, "closed_at", ScalarKind::Time),
    FieldDescriptor::scalar(fields::MERGED_AT, "merged_at", ScalarKind::Time),
    FieldDescriptor::inline(fields::LABELS, "labels", Issue::reconcile_labels),
];

/// An issue, keyed by repository and its 1-based number.
pub struct Issue {
    me: Weak<Issue>,
    session: SessionRef,
    repository: Arc<Repository>,
    number: u64,
    props: PropertyBag,
    /// Freshness and single-flight state of the `/pulls/{n}` resource;
    /// the property values themselves live in `props`.
    pull_props: PropertyBag,
    labels: TrackedList<Arc<Label>>,
    comments: OnceCell<Arc<EntityList<Arc<IssueComment>>>>,
}

impl Issue {
    pub(crate) fn get_or_create(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        number: u64,
    ) -> Result<Arc<Self>, Error> {
        if number < 1 {
            return Err(Error::InvalidArgument("an issue number must be positive"));
        }
        let key = (
            repository.owner().login().to_owned(),
            repository.name().to_owned(),
            number,
        );
        Ok(session.caches.issues.get_or_create(key, || {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                session: SessionRef::new(session),
                repository: Arc::clone(repository),
                number,
                props: PropertyBag::new(),
                pull_props: PropertyBag::new(),
                labels: TrackedList::new(),
                comments: OnceCell::new(),
            })
        }))
    }

    pub(crate) fn from_json(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        data: &Value,
    ) -> Result<Arc<Self>, Error> {
        let number = mapping::required_u64(data, "number")?;
        let issue = Self::get_or_create(session, repository, number)
            .map_err(|_| Error::data("issue fragment has a non-positive number", data))?;
        issue.apply(data)?;
        Ok(issue)
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

    pub fn body(&self) -> Option<String> {
        self.prop(fields::BODY)?.into_str()
    }

    /// `open` or `closed`.
    pub fn state(&self) -> Option<String> {
        self.prop(fields::STATE)?.into_str()
    }

    pub fn locked(&self) -> Option<bool> {
        self.prop(fields::LOCKED)?.into_bool()
    }

    /// Number of comments, as reported by the server.
    pub fn comments_count(&self) -> Option<i64> {
        self.prop(fields::COMMENTS)?.into_int()
    }

    pub fn user(&self) -> Option<Arc<User>> {
        self.prop(fields::USER)?.into_user()
    }

    pub fn assignee(&self) -> Option<Arc<User>> {
        self.prop(fields::ASSIGNEE)?.into_user()
    }

    pub fn milestone(&self) -> Option<Arc<Milestone>> {
        self.prop(fields::MILESTONE)?.into_milestone()
    }

    pub fn closed_by(&self) -> Option<Arc<User>> {
        self.prop(fields::CLOSED_BY)?.into_user()
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

    /// The labels attached to this issue, reconciled on every refresh.
    pub fn labels(&self) -> &TrackedList<Arc<Label>> {
        &self.labels
    }

    /// Whether the server has marked this issue as a pull request.
    /// `false` until a representation carrying the marker arrives.
    pub fn is_pull_request(&self) -> bool {
        matches!(
            self.props.get(fields::PULL_REQUEST),
            Some(PropertyValue::Bool(true))
        )
    }

    pub fn html_url(&self) -> Url {
        web_url(&[
            self.repository.owner().login(),
            self.repository.name(),
            "issues",
            &self.number.to_string(),
        ])
    }

    // ── Behavior ────────────────────────────────────────────────────

    pub async fn refresh(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        refresh::refresh_entity(self, cancellation).await
    }

    pub fn changes(&self) -> broadcast::Receiver<&'static str> {
        self.props.subscribe()
    }

    /// View this issue as a pull request.
    pub fn as_pull_request(self: &Arc<Self>) -> Result<PullRequest, Error> {
        if self.is_pull_request() {
            Ok(PullRequest {
                issue: Arc::clone(self),
            })
        } else {
            Err(Error::NotAPullRequest {
                number: self.number,
            })
        }
    }

    /// The comments on this issue.
    ///
    /// Created (and fetched) on first call; `refresh` forces a
    /// conditional re-fetch on later calls.
    pub async fn comments(
        &self,
        refresh: bool,
        cancellation: &CancellationToken,
    ) -> Result<Arc<EntityList<Arc<IssueComment>>>, Error> {
        let mut created = false;
        let list = self
            .comments
            .get_or_try_init(|| {
                created = true;
                async {
                    let session = self.session.upgrade()?;
                    let url = session.client.url(&format!(
                        "repos/{}/{}/issues/{}/comments",
                        self.repository.owner().login(),
                        self.repository.name(),
                        self.number
                    ))?;
                    let repository = Arc::clone(&self.repository);
                    EntityList::create(
                        &session,
                        url,
                        Box::new(move |session, fragment| {
                            IssueComment::from_json(session, &repository, fragment)
                        }),
                        cancellation,
                    )
                    .await
                }
            })
            .await?;
        if refresh && !created {
            list.refresh(cancellation).await?;
        }
        Ok(Arc::clone(list))
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

    fn milestone_from(&self, fragment: &Value) -> Result<PropertyValue, Error> {
        let session = self.session.upgrade()?;
        Ok(PropertyValue::Milestone(Milestone::from_json(
            &session,
            &self.repository,
            fragment,
        )?))
    }

    fn reconcile_labels(&self, fragment: &Value) -> Result<(), Error> {
        let session = self.session.upgrade()?;
        let fragments = fragment
            .as_array()
            .ok_or_else(|| Error::data("issue labels are not an array", fragment))?;
        let mut labels = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            labels.push(Label::from_json(&session, &self.repository, fragment)?);
        }
        self.labels.reconcile(labels);
        Ok(())
    }

    fn mark_pull_request(&self, fragment: &Value) -> Result<(), Error> {
        if !fragment.is_object() {
            return Err(Error::data("pull request marker is not an object", fragment));
        }
        self.props
            .set(fields::PULL_REQUEST, PropertyValue::Bool(true));
        Ok(())
    }
}

impl Refreshable for Issue {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.props
    }

    fn resource_path(&self) -> String {
        format!(
            "repos/{}/{}/issues/{}",
            self.repository.owner().login(),
            self.repository.name(),
            self.number
        )
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self, &self.props, FIELDS, data)
    }
}

impl PartialEq for Issue {
    fn eq(&self, other: &Self) -> bool {
        self.repository == other.repository && self.number == other.number
    }
}

impl Eq for Issue {}

impl fmt::Debug for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issue")
            .field("repository", &self.repository.full_name())
            .field("number", &self.number)
            .finish_non_exhaustive()
    }
}

// ── Pull requests ───────────────────────────────────────────────────

/// A pull request: a cheap-clone view over the canonical [`Issue`].
///
/// All shared properties read through to the issue's bag, so data
/// arriving via either resource is visible on both. Refreshing the
/// view hits `/pulls/{n}`, with freshness tokens tracked separately
/// from the issue endpoint's.
#[derive(Clone)]
pub struct PullRequest {
    issue: Arc<Issue>,
}

impl PullRequest {
    pub(crate) fn from_json(
        session: &Arc<SessionInner>,
        repository: &Arc<Repository>,
        data: &Value,
    ) -> Result<Self, Error> {
        let number = mapping::required_u64(data, "number")?;
        let issue = Issue::get_or_create(session, repository, number)
            .map_err(|_| Error::data("pull request fragment has a non-positive number", data))?;
        issue.mark_pull_request(data)?;
        mapping::apply_fields(issue.as_ref(), &issue.props, PR_FIELDS, data)?;
        Ok(Self { issue })
    }

    /// The issue behind this pull request.
    pub fn issue(&self) -> &Arc<Issue> {
        &self.issue
    }

    // ── Properties (delegated) ──────────────────────────────────────

    pub fn repository(&self) -> &Arc<Repository> {
        self.issue.repository()
    }

    pub fn number(&self) -> u64 {
        self.issue.number()
    }

    pub fn id(&self) -> Option<i64> {
        self.issue.id()
    }

    pub fn title(&self) -> Option<String> {
        self.issue.title()
    }

    pub fn body(&self) -> Option<String> {
        self.issue.body()
    }

    pub fn state(&self) -> Option<String> {
        self.issue.state()
    }

    pub fn locked(&self) -> Option<bool> {
        self.issue.locked()
    }

    pub fn comments_count(&self) -> Option<i64> {
        self.issue.comments_count()
    }

    pub fn user(&self) -> Option<Arc<User>> {
        self.issue.user()
    }

    pub fn assignee(&self) -> Option<Arc<User>> {
        self.issue.assignee()
    }

    pub fn milestone(&self) -> Option<Arc<Milestone>> {
        self.issue.milestone()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.issue.created_at()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.issue.updated_at()
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.issue.closed_at()
    }

    pub fn labels(&self) -> &TrackedList<Arc<Label>> {
        self.issue.labels()
    }

    /// When the pull request was merged. Only the pull endpoint serves
    /// this, so an unpopulated read schedules a pull refresh.
    pub fn merged_at(&self) -> Option<DateTime<Utc>> {
        let value = self.issue.props.get(fields::MERGED_AT);
        if value.is_none() {
            refresh::spawn_refresh(Arc::new(self.clone()));
        }
        value?.into_time()
    }

    pub fn html_url(&self) -> Url {
        web_url(&[
            self.repository().owner().login(),
            self.repository().name(),
            "pull",
            &self.number().to_string(),
        ])
    }

    // ── Behavior ────────────────────────────────────────────────────

    /// Conditionally re-fetch the `/pulls/{n}` representation.
    pub async fn refresh(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        refresh::refresh_entity(self, cancellation).await
    }

    pub fn changes(&self) -> broadcast::Receiver<&'static str> {
        self.issue.changes()
    }
}

impl Refreshable for PullRequest {
    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.issue.session.upgrade()
    }

    fn bag(&self) -> &PropertyBag {
        &self.issue.pull_props
    }

    fn resource_path(&self) -> String {
        format!(
            "repos/{}/{}/pulls/{}",
            self.repository().owner().login(),
            self.repository().name(),
            self.number()
        )
    }

    fn apply(&self, data: &Value) -> Result<(), Error> {
        mapping::apply_fields(self.issue.as_ref(), &self.issue.props, PR_FIELDS, data)
    }
}

impl PartialEq for PullRequest {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.issue, &other.issue)
    }
}

impl Eq for PullRequest {}

impl fmt::Debug for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullRequest")
            .field("repository", &self.repository().full_name())
            .field("number", &self.number())
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

    fn repository(session: &Session) -> Arc<Repository> {
        let owner = User::get_or_create(session.inner(), "octocat").unwrap();
        Repository::get_or_create(session.inner(), &owner, "Hello-World").unwrap()
    }

    #[test]
    fn zero_number_is_rejected() {
        let session = Session::anonymous().unwrap();
        let repository = repository(&session);

        let result = Issue::get_or_create(session.inner(), &repository, 0);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn from_json_maps_nested_entities_and_labels() {
        let session = Session::anonymous().unwrap();
        let repository = repository(&session);
        let data = json!({
            "number": 1347,
            "id": 1,
            "title": "Found a bug",
            "state": "open",
            "locked": false,
            "comments": 2,
            "user": { "login": "octocat", "id": 583231 },
            "assignee": null,
            "milestone": { "number": 1, "title": "v1.0" },
            "labels": [
                { "name": "bug", "color": "d73a4a" },
                { "name": "help wanted", "color": "008672" }
            ]
        });

        let issue = Issue::from_json(session.inner(), &repository, &data).unwrap();

        assert_eq!(issue.number(), 1347);
        assert_eq!(issue.title().as_deref(), Some("Found a bug"));
        assert_eq!(issue.state().as_deref(), Some("open"));
        // Explicitly null assignee reads as absent without being unset.
        assert_eq!(issue.assignee(), None);
        let milestone = issue.milestone().unwrap();
        assert_eq!(milestone.number(), 1);
        assert_eq!(issue.labels().len(), 2);
        assert_eq!(issue.labels().get(0).unwrap().name(), "bug");
        assert!(!issue.is_pull_request());
    }

    #[test]
    fn label_removal_reconciles_with_one_notification() {
        let session = Session::anonymous().unwrap();
        let repository = repository(&session);
        let issue = Issue::from_json(
            session.inner(),
            &repository,
            &json!({
                "number": 1,
                "labels": [
                    { "name": "a" }, { "name": "b" }, { "name": "c" }
                ]
            }),
        )
        .unwrap();
        let mut changes = issue.labels().subscribe();

        issue
            .apply(&json!({
                "number": 1,
                "labels": [ { "name": "a" }, { "name": "c" } ]
            }))
            .unwrap();

        assert_eq!(issue.labels().len(), 2);
        let change = changes.try_recv().unwrap();
        assert!(matches!(
            change,
            crate::list::ListChange::Removed { index: 1, .. }
        ));
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn pull_request_marker_gates_the_view() {
        let session = Session::anonymous().unwrap();
        let repository = repository(&session);

        let plain = Issue::from_json(session.inner(), &repository, &json!({ "number": 2 })).unwrap();
        assert!(matches!(
            plain.as_pull_request(),
            Err(Error::NotAPullRequest { number: 2 })
        ));

        let marked = Issue::from_json(
            session.inner(),
            &repository,
            &json!({ "number": 3, "pull_request": { "url": "https://api.github.com/..." } }),
        )
        .unwrap();
        assert!(marked.is_pull_request());
        assert!(marked.as_pull_request().is_ok());
    }

    #[test]
    fn pull_request_view_shares_the_issue_bag() {
        let session = Session::anonymous().unwrap();
        let repository = repository(&session);
        let data = json!({
            "number": 4,
            "title": "Amazing new feature",
            "state": "closed",
            "merged_at": "2011-01-26T19:01:12Z"
        });

        let pull = PullRequest::from_json(session.inner(), &repository, &data).unwrap();
        let issue = Issue::get_or_create(session.inner(), &repository, 4).unwrap();

        assert!(Arc::ptr_eq(pull.issue(), &issue));
        assert!(issue.is_pull_request());
        assert_eq!(issue.title().as_deref(), Some("Amazing new feature"));
        assert!(pull.merged_at().is_some());
    }
}
