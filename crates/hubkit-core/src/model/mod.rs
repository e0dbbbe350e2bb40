// The typed object model.
//
// Entities (user, repository, issue, ...) are canonical within a
// session and populate themselves lazily; events are plain values
// that canonicalize the entities they mention.

mod comment;
mod commit;
mod event;
mod issue;
mod label;
mod milestone;
mod repository;
mod user;

pub use comment::IssueComment;
pub use commit::Commit;
pub use event::{Event, EventPayload, IssueEventPayload, PullRequestEventPayload, PushPayload};
pub use issue::{Issue, PullRequest};
pub use label::Label;
pub use milestone::Milestone;
pub use repository::Repository;
pub use user::User;

/// Root of the browser-facing site, for deriving `html_url`s.
const WEB_URL: &str = "https://github.com/";

/// Build a `github.com` page URL from path segments.
fn web_url(segments: &[&str]) -> url::Url {
    let mut url = url::Url::parse(WEB_URL).expect("web root URL must parse");
    {
        let mut path = url
            .path_segments_mut()
            .expect("web root URL cannot be a base");
        for segment in segments {
            path.push(segment);
        }
    }
    url
}
