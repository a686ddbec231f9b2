use httpmock::{
    Method::{GET, POST},
    MockServer,
};
use issue_triage_bot::auth::AuthProvider;
use issue_triage_bot::config::{Credentials, HttpConfig};
use issue_triage_bot::github::GitHubClient;
use issue_triage_bot::types::RepoRef;
use serde_json::json;
use std::sync::Arc;

fn client(server: &MockServer) -> GitHubClient {
    let http = HttpConfig::with_api_url(server.base_url());
    let auth = AuthProvider::new(http.clone(), Credentials::Token("t0k".into())).unwrap();
    GitHubClient::new(http, Arc::new(auth)).unwrap()
}

fn repo() -> RepoRef {
    "o/r".parse().unwrap()
}

#[tokio::test]
async fn selects_open_unlabelled_issues_across_pages() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let next = format!(
        "<{}/repositories/99/issues?state=open&per_page=100&page=2>; rel=\"next\", <{}/repositories/99/issues?state=open&per_page=100&page=2>; rel=\"last\"",
        server.base_url(),
        server.base_url()
    );
    let first = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/o/r/issues")
                .query_param("state", "open")
                .query_param("per_page", "100")
                .header("authorization", "Bearer t0k")
                .header("x-github-api-version", "2022-11-28");
            then.status(200).header("link", next.as_str()).json_body(json!([
                {"number": 1, "title": "fresh", "labels": []},
                {"number": 2, "title": "done", "labels": [{"name": "bot-processed"}]},
                {"number": 3, "title": "a pr", "labels": [], "pull_request": {"url": "x"}}
            ]));
        })
        .await;
    let second = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repositories/99/issues")
                .query_param("page", "2");
            then.status(200).json_body(json!([
                {"number": 4, "title": "also fresh", "body": "details", "labels": [{"name": "bug"}]}
            ]));
        })
        .await;

    let issues = client(&server)
        .list_unprocessed_issues(&repo(), "bot-processed")
        .await?;
    let numbers: Vec<u64> = issues.iter().map(|i| i.number).collect();
    assert_eq!(numbers, vec![1, 4]);
    first.assert_async().await;
    second.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn listing_failure_surfaces_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/o/r/issues");
            then.status(404).json_body(json!({"message": "Not Found"}));
        })
        .await;
    let err = client(&server)
        .list_unprocessed_issues(&repo(), "bot-processed")
        .await
        .unwrap_err();
    assert!(err.is_status(404), "{err}");
    assert!(err.to_string().contains("Not Found"));
}

#[tokio::test]
async fn missing_labels_are_skipped() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/o/r/labels/wontfix");
            then.status(404).json_body(json!({"message": "Not Found"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/o/r/labels/bug");
            then.status(200).json_body(json!({"name": "bug"}));
        })
        .await;
    let apply = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/repos/o/r/issues/5/labels")
                .json_body(json!({"labels": ["bug"]}));
            then.status(200).json_body(json!([{"name": "bug"}]));
        })
        .await;

    let gh = client(&server);
    assert!(!gh.add_label(&repo(), 5, "wontfix").await?);
    assert!(gh.add_label(&repo(), 5, "bug").await?);
    apply.assert_hits_async(1).await;
    Ok(())
}

#[tokio::test]
async fn ensure_label_creates_only_when_absent() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/o/r/labels/bot-processed");
            then.status(404).json_body(json!({"message": "Not Found"}));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/repos/o/r/labels")
                .body_contains("\"name\":\"bot-processed\"");
            then.status(201).json_body(json!({"name": "bot-processed"}));
        })
        .await;
    client(&server)
        .ensure_label(&repo(), "bot-processed", "ededed", "Handled")
        .await?;
    create.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn base_branch_falls_back_to_default() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/o/r/branches/main");
            then.status(404).json_body(json!({"message": "Branch not found"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/o/r");
            then.status(200).json_body(json!({"default_branch": "trunk"}));
        })
        .await;
    assert_eq!(
        client(&server).resolve_base_branch(&repo(), "main").await?,
        "trunk"
    );
    Ok(())
}

#[tokio::test]
async fn existing_branch_ref_is_tolerated_and_pr_opens() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/repos/o/r/branches/main");
            then.status(200).json_body(json!({"name": "main", "commit": {"sha": "abc123"}}));
        })
        .await;
    let refs = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/repos/o/r/git/refs")
                .json_body(json!({"ref": "refs/heads/fix/issue-7", "sha": "abc123"}));
            then.status(422)
                .json_body(json!({"message": "Reference already exists"}));
        })
        .await;
    let pulls = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/repos/o/r/pulls")
                .body_contains("\"head\":\"fix/issue-7\"")
                .body_contains("\"base\":\"main\"");
            then.status(201)
                .json_body(json!({"number": 12, "html_url": "https://github.com/o/r/pull/12"}));
        })
        .await;

    let gh = client(&server);
    gh.create_branch(&repo(), "fix/issue-7", "main").await?;
    let pr = gh
        .create_pull_request(&repo(), "Fix: thing (#7)", "body", "fix/issue-7", "main")
        .await?;
    assert_eq!(pr.number, 12);
    assert_eq!(pr.html_url, "https://github.com/o/r/pull/12");
    refs.assert_async().await;
    pulls.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn token_status_reports_limits_and_rejects_bad_tokens() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rate_limit");
            then.status(200)
                .header("x-ratelimit-remaining", "4990")
                .header("github-authentication-token-expiration", "2030-01-02 03:04:05 UTC")
                .json_body(json!({"resources": {"core": {"limit": 5000, "remaining": 4990}}}));
        })
        .await;
    let status = client(&server).token_status().await?;
    assert_eq!(status.limit, Some(5000));
    assert_eq!(status.rate.remaining, Some(4990));
    assert_eq!(
        status.expires_at.map(|t| t.to_rfc3339()),
        Some("2030-01-02T03:04:05+00:00".to_string())
    );

    let denied = MockServer::start_async().await;
    denied
        .mock_async(|when, then| {
            when.method(GET).path("/rate_limit");
            then.status(401).json_body(json!({"message": "Bad credentials"}));
        })
        .await;
    let err = client(&denied).token_status().await.unwrap_err();
    assert!(matches!(err, issue_triage_bot::error::Error::Auth(_)), "{err}");
    Ok(())
}
