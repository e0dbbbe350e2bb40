#![allow(clippy::unwrap_used)]
// End-to-end tests for the object model against a wiremock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hubkit_core::list::ListChange;
use hubkit_core::model::EventPayload;
use hubkit_core::{ApiConfig, CancellationToken, Error, Session};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Session) {
    let server = MockServer::start().await;
    let config = ApiConfig::new()
        .with_api_url(Url::parse(&server.uri()).unwrap())
        .with_retry_backoff(Duration::from_millis(1));
    let session = Session::new(config).unwrap();
    (server, session)
}

fn octocat_body() -> serde_json::Value {
    json!({
        "login": "octocat",
        "id": 583231,
        "name": "The Octocat",
        "company": "GitHub",
        "location": "San Francisco",
        "email": "octocat@github.com",
        "hireable": null,
        "bio": null,
        "avatar_url": "https://avatars.githubusercontent.com/u/583231?v=4",
        "created_at": "2011-01-25T18:44:36Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
}

// ── Users ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fetching_a_user_populates_its_properties() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(octocat_body()))
        .expect(1)
        .mount(&server)
        .await;

    let user = session
        .user("octocat", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(user.login(), "octocat");
    assert_eq!(user.id(), Some(583_231));
    assert_eq!(user.name().as_deref(), Some("The Octocat"));
    assert_eq!(user.email().as_deref(), Some("octocat@github.com"));
    // Explicitly null: populated, reads as absent.
    assert_eq!(user.hireable(), None);
    assert_eq!(user.html_url().as_str(), "https://github.com/octocat");
}

#[tokio::test]
async fn authenticated_user_lands_in_the_same_cache() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(octocat_body()))
        .mount(&server)
        .await;

    let me = session
        .authenticated_user(&CancellationToken::new())
        .await
        .unwrap();
    let looked_up = session.repository("octocat", "x").unwrap();

    assert!(Arc::ptr_eq(&me, looked_up.owner()));
}

// ── Conditional refresh ─────────────────────────────────────────────

#[tokio::test]
async fn refresh_revalidates_and_304_changes_nothing() {
    let (server, session) = setup().await;

    // Revalidations carry the stored ETag and are answered 304.
    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(octocat_body()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let user = session.user("octocat", &cancellation).await.unwrap();
    let mut changes = user.changes();

    user.refresh(&cancellation).await.unwrap();
    assert_eq!(user.name().as_deref(), Some("The Octocat"));
    assert!(changes.try_recv().is_err(), "304 must not touch properties");

    // The second revalidation still carries the same token, proving a
    // 304 leaves the stored freshness untouched.
    user.refresh(&cancellation).await.unwrap();
}

#[tokio::test]
async fn concurrent_refreshes_collapse_into_one_request() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_json(octocat_body()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let user = session.repository("octocat", "x").unwrap().owner().clone();

    let (first, second, third) = tokio::join!(
        user.refresh(&cancellation),
        user.refresh(&cancellation),
        user.refresh(&cancellation),
    );

    first.unwrap();
    second.unwrap();
    third.unwrap();
    assert_eq!(user.id(), Some(583_231));
}

// ── Lazy population ─────────────────────────────────────────────────

#[tokio::test]
async fn reading_an_unpopulated_property_fills_it_in_the_background() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1296269,
            "name": "Hello-World",
            "owner": { "login": "octocat" },
            "language": "Rust"
        })))
        .mount(&server)
        .await;

    let repository = session.repository("octocat", "Hello-World").unwrap();
    assert_eq!(repository.id(), None);

    let mut populated = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if repository.id().is_some() {
            populated = true;
            break;
        }
    }

    assert!(populated, "background refresh never landed");
    assert_eq!(repository.language().as_deref(), Some("Rust"));
}

// ── Reconciling collections ─────────────────────────────────────────

#[tokio::test]
async fn repository_list_reconciles_with_minimal_changes() {
    let (server, session) = setup().await;

    let repo = |name: &str| json!({ "name": name, "owner": { "login": "octocat" } });

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .and(header("If-None-Match", "\"list-v1\""))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"list-v2\"")
                .set_body_json(json!([repo("a"), repo("c"), repo("d"), repo("e")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"list-v1\"")
                .set_body_json(json!([repo("a"), repo("b"), repo("c"), repo("d")])),
        )
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let user = session.repository("octocat", "x").unwrap().owner().clone();

    let list = user.repositories(false, &cancellation).await.unwrap();
    let kept = list.entries().get(2).unwrap();
    let mut changes = list.entries().subscribe();

    list.refresh(&cancellation).await.unwrap();

    let names: Vec<String> = list
        .entries()
        .snapshot()
        .iter()
        .map(|repository| repository.name().to_owned())
        .collect();
    assert_eq!(names, ["a", "c", "d", "e"]);

    // Surviving items keep their identity.
    assert!(Arc::ptr_eq(&kept, &list.entries().get(1).unwrap()));

    // One removal, one insertion; no reset.
    assert!(matches!(
        changes.try_recv().unwrap(),
        ListChange::Removed { index: 1, .. }
    ));
    assert!(matches!(
        changes.try_recv().unwrap(),
        ListChange::Inserted { index: 3, .. }
    ));
    assert!(changes.try_recv().is_err());
}

// ── Issues and pull requests ────────────────────────────────────────

#[tokio::test]
async fn issue_round_trip_with_pull_request_view() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/issues/1347"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 1347,
            "title": "Amazing new feature",
            "state": "closed",
            "user": { "login": "hubot" },
            "labels": [{ "name": "enhancement", "color": "a2eeef" }],
            "pull_request": { "url": "unused" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/pulls/1347"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 1347,
            "state": "closed",
            "merged_at": "2011-01-26T19:01:12Z"
        })))
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let repository = session.repository("octocat", "Hello-World").unwrap();
    let issue = repository.fetch_issue(1347, &cancellation).await.unwrap();

    assert_eq!(issue.title().as_deref(), Some("Amazing new feature"));
    assert_eq!(issue.labels().len(), 1);
    assert!(issue.is_pull_request());

    let pull = issue.as_pull_request().unwrap();
    pull.refresh(&cancellation).await.unwrap();

    assert!(pull.merged_at().is_some());
    // Both resources feed the same bag.
    assert_eq!(pull.title().as_deref(), Some("Amazing new feature"));
}

// ── Pagination ──────────────────────────────────────────────────────

fn watch_event(id: u64) -> serde_json::Value {
    json!({
        "id": id.to_string(),
        "type": "WatchEvent",
        "repo": { "id": 1, "name": "octocat/Hello-World" },
        "payload": { "action": "started" }
    })
}

#[tokio::test]
async fn first_page_discovers_the_page_count() {
    let (server, session) = setup().await;

    let link = format!(
        "<{0}/events?page=2>; rel=\"next\", <{0}/events?page=3>; rel=\"last\"",
        server.uri()
    );
    let middle_link = format!(
        "<{0}/events?page=1>; rel=\"prev\", <{0}/events?page=3>; rel=\"last\"",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", middle_link.as_str())
                .set_body_json(json!([watch_event(3), watch_event(4)])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", link.as_str())
                .set_body_json(json!([watch_event(1), watch_event(2)])),
        )
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let events = session.public_events(&cancellation).await.unwrap();

    assert_eq!(events.page_count(), 3);

    let first = events.page(0, false, &cancellation).await.unwrap();
    assert_eq!(first.entries().len(), 2);
    assert!(matches!(
        first.entries().get(0).unwrap().payload(),
        EventPayload::Other
    ));

    // Addressed by rewriting the template's `page` parameter.
    let second = events.page(1, false, &cancellation).await.unwrap();
    assert_eq!(second.entries().get(0).unwrap().id(), 3);

    let out_of_range = events.page(3, false, &cancellation).await;
    assert!(matches!(
        out_of_range,
        Err(Error::PageOutOfRange { index: 3, count: 3 })
    ));
}

#[tokio::test]
async fn a_first_page_without_links_is_the_only_page() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([watch_event(1)])))
        .mount(&server)
        .await;

    let events = session
        .public_events(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(events.page_count(), 1);
}

#[tokio::test]
async fn a_prev_only_page_marks_the_end_of_the_feed() {
    let (server, session) = setup().await;

    let first_link = format!("<{0}/events?page=2>; rel=\"last\"", server.uri());
    let last_link = format!("<{0}/events?page=1>; rel=\"prev\"", server.uri());
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", last_link.as_str())
                .set_body_json(json!([watch_event(9)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", first_link.as_str())
                .set_body_json(json!([watch_event(1)])),
        )
        .mount(&server)
        .await;

    let cancellation = CancellationToken::new();
    let events = session.public_events(&cancellation).await.unwrap();
    assert_eq!(events.page_count(), 2);

    let last = events.page(1, false, &cancellation).await.unwrap();
    assert_eq!(last.entries().get(0).unwrap().id(), 9);
    // `prev` without `last`: the fetched page is the final one.
    assert_eq!(events.page_count(), 2);
}

#[tokio::test]
async fn links_without_last_or_prev_are_a_data_error() {
    let (server, session) = setup().await;

    // A `Link` header that offers only `next` leaves the page count
    // underivable.
    let link = format!("<{0}/events?page=2>; rel=\"next\"", server.uri());
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", link.as_str())
                .set_body_json(json!([watch_event(1)])),
        )
        .mount(&server)
        .await;

    let result = session.public_events(&CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Data { .. })));
}

// ── Error surface ───────────────────────────────────────────────────

#[tokio::test]
async fn bad_credentials_surface_as_an_authorization_error() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })),
        )
        .mount(&server)
        .await;

    let result = session.authenticated_user(&CancellationToken::new()).await;

    match result {
        Err(Error::Api(hubkit_api::Error::Authorization { status, .. })) => {
            assert_eq!(status, 401);
        }
        other => panic!("expected an authorization error, got: {other:?}"),
    }
}

#[tokio::test]
async fn corrupt_payloads_surface_as_data_errors() {
    let (server, session) = setup().await;

    // A user representation without a login cannot be canonicalized.
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .mount(&server)
        .await;

    let result = session.authenticated_user(&CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Data { .. })));
}
