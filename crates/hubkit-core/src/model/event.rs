// The public event feed.
//
// Events are immutable value records, not cached entities: two fetches
// of the same feed item produce equal `Event` values (compared by id),
// while the actor, repository, commits, and issues they mention are
// canonicalized through the session's caches like everywhere else.
// The compact wire shapes are deserialized with serde; the nested full
// entity fragments go through the regular `from_json` constructors.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::model::{Commit, Issue, PullRequest, Repository, User};
use crate::session::SessionInner;

/// One entry of an event feed.
#[derive(Clone)]
pub struct Event {
    id: i64,
    event_type: String,
    actor: Option<Arc<User>>,
    repository: Option<Arc<Repository>>,
    public: Option<bool>,
    created_at: Option<DateTime<Utc>>,
    payload: EventPayload,
}

/// Typed payload, discriminated by the event's `type` field. Event
/// kinds without a dedicated shape fall back to [`EventPayload::Other`].
#[derive(Clone)]
pub enum EventPayload {
    Push(PushPayload),
    Issue(IssueEventPayload),
    PullRequest(PullRequestEventPayload),
    Other,
}

/// Payload of a `PushEvent`.
#[derive(Clone)]
pub struct PushPayload {
    pub push_id: i64,
    /// Commits in the push.
    pub size: i64,
    /// Commits new to the repository.
    pub distinct_size: i64,
    /// The pushed ref, e.g. `refs/heads/main`.
    pub git_ref: String,
    pub head: String,
    pub before: String,
    pub commits: Vec<Arc<Commit>>,
}

/// Payload of an `IssuesEvent`.
#[derive(Clone)]
pub struct IssueEventPayload {
    /// What happened: `opened`, `closed`, `reopened`, ...
    pub action: String,
    pub issue: Arc<Issue>,
}

/// Payload of a `PullRequestEvent`.
#[derive(Clone)]
pub struct PullRequestEventPayload {
    pub action: String,
    pub pull_request: PullRequest,
}

// ── Wire shapes ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireEvent {
    id: WireId,
    #[serde(rename = "type")]
    event_type: String,
    actor: Option<WireActor>,
    repo: Option<WireRepo>,
    public: Option<bool>,
    created_at: Option<DateTime<Utc>>,
    payload: Option<Value>,
}

/// Feed ids arrive as decimal strings; older payloads carry numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

/// The compact actor shape: `id` and `login` required, plus an avatar.
#[derive(Deserialize)]
struct WireActor {
    id: i64,
    login: String,
    avatar_url: Option<Url>,
}

/// The compact repo shape: `id` and a full `owner/name` pair.
#[derive(Deserialize)]
struct WireRepo {
    id: i64,
    name: String,
}

#[derive(Deserialize)]
struct WirePushPayload {
    push_id: i64,
    size: i64,
    distinct_size: i64,
    #[serde(rename = "ref")]
    git_ref: String,
    head: String,
    before: String,
    #[serde(default)]
    commits: Vec<WirePushCommit>,
}

#[derive(Deserialize)]
struct WirePushCommit {
    sha: String,
    message: Option<String>,
}

#[derive(Deserialize)]
struct WireIssuePayload {
    action: String,
    issue: Value,
}

#[derive(Deserialize)]
struct WirePullRequestPayload {
    action: String,
    pull_request: Value,
}

impl Event {
    /// Build an event from one feed entry, canonicalizing every entity
    /// it mentions.
    pub(crate) fn from_json(session: &Arc<SessionInner>, data: &Value) -> Result<Self, Error> {
        let wire = WireEvent::deserialize(data)
            .map_err(|err| Error::data(format!("malformed event: {err}"), data))?;

        let id = wire.id.value().ok_or_else(|| Error::data("event id is not an integer", data))?;
        let actor = match wire.actor {
            Some(actor) => Some(actor.canonicalize(session)?),
            None => None,
        };
        let repository = match wire.repo {
            Some(repo) => Some(repo.canonicalize(session)?),
            None => None,
        };

        let payload = match wire.event_type.as_str() {
            "PushEvent" => EventPayload::Push(push_payload(
                session,
                repository.as_ref(),
                payload_of(wire.payload.as_ref(), data)?,
            )?),
            "IssuesEvent" => EventPayload::Issue(issue_payload(
                session,
                repository.as_ref(),
                payload_of(wire.payload.as_ref(), data)?,
            )?),
            "PullRequestEvent" => EventPayload::PullRequest(pull_request_payload(
                session,
                repository.as_ref(),
                payload_of(wire.payload.as_ref(), data)?,
            )?),
            _ => EventPayload::Other,
        };

        Ok(Self {
            id,
            event_type: wire.event_type,
            actor,
            repository,
            public: wire.public,
            created_at: wire.created_at,
            payload,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// The wire discriminator, e.g. `PushEvent` or `WatchEvent`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn actor(&self) -> Option<&Arc<User>> {
        self.actor.as_ref()
    }

    pub fn repository(&self) -> Option<&Arc<Repository>> {
        self.repository.as_ref()
    }

    pub fn public(&self) -> Option<bool> {
        self.public
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("type", &self.event_type)
            .finish_non_exhaustive()
    }
}

impl WireId {
    fn value(&self) -> Option<i64> {
        match self {
            Self::Number(id) => Some(*id),
            Self::Text(raw) => raw.parse().ok(),
        }
    }
}

impl WireActor {
    fn canonicalize(self, session: &Arc<SessionInner>) -> Result<Arc<User>, Error> {
        let user = User::get_or_create(session, &self.login)
            .map_err(|_| Error::data("event actor has an empty login", &Value::String(self.login.clone())))?;
        user.absorb_id(self.id);
        if let Some(avatar) = self.avatar_url {
            user.absorb_avatar_url(avatar);
        }
        Ok(user)
    }
}

impl WireRepo {
    fn canonicalize(self, session: &Arc<SessionInner>) -> Result<Arc<Repository>, Error> {
        let repository = Repository::from_full_name(session, &self.name)?;
        repository.absorb_id(self.id);
        Ok(repository)
    }
}

fn payload_of<'a>(payload: Option<&'a Value>, data: &Value) -> Result<&'a Value, Error> {
    payload
        .filter(|fragment| !fragment.is_null())
        .ok_or_else(|| Error::data("typed event has no payload", data))
}

fn push_payload(
    session: &Arc<SessionInner>,
    repository: Option<&Arc<Repository>>,
    payload: &Value,
) -> Result<PushPayload, Error> {
    let repository =
        repository.ok_or_else(|| Error::data("push event without a repository", payload))?;
    let wire = WirePushPayload::deserialize(payload)
        .map_err(|err| Error::data(format!("malformed push payload: {err}"), payload))?;

    let mut commits = Vec::with_capacity(wire.commits.len());
    for fragment in wire.commits {
        let commit = Commit::from_push(session, repository, &fragment.sha, fragment.message)
            .map_err(|_| Error::data("push commit has an empty sha", payload))?;
        commits.push(commit);
    }

    Ok(PushPayload {
        push_id: wire.push_id,
        size: wire.size,
        distinct_size: wire.distinct_size,
        git_ref: wire.git_ref,
        head: wire.head,
        before: wire.before,
        commits,
    })
}

fn issue_payload(
    session: &Arc<SessionInner>,
    repository: Option<&Arc<Repository>>,
    payload: &Value,
) -> Result<IssueEventPayload, Error> {
    let repository =
        repository.ok_or_else(|| Error::data("issue event without a repository", payload))?;
    let wire = WireIssuePayload::deserialize(payload)
        .map_err(|err| Error::data(format!("malformed issue payload: {err}"), payload))?;

    Ok(IssueEventPayload {
        issue: Issue::from_json(session, repository, &wire.issue)?,
        action: wire.action,
    })
}

fn pull_request_payload(
    session: &Arc<SessionInner>,
    repository: Option<&Arc<Repository>>,
    payload: &Value,
) -> Result<PullRequestEventPayload, Error> {
    let repository =
        repository.ok_or_else(|| Error::data("pull request event without a repository", payload))?;
    let wire = WirePullRequestPayload::deserialize(payload)
        .map_err(|err| Error::data(format!("malformed pull request payload: {err}"), payload))?;

    Ok(PullRequestEventPayload {
        pull_request: PullRequest::from_json(session, repository, &wire.pull_request)?,
        action: wire.action,
    })
}
