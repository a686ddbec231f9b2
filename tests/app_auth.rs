use chrono::{Duration, Utc};
use httpmock::{
    Method::{GET, POST},
    MockServer,
};
use issue_triage_bot::auth::{app_jwt, AppClaims, AuthProvider, TokenKind};
use issue_triage_bot::config::{AppCredentials, Credentials, HttpConfig};
use issue_triage_bot::github::GitHubClient;
use issue_triage_bot::types::RepoRef;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn app_credentials(installation_id: u64) -> Credentials {
    Credentials::App(AppCredentials {
        app_id: 42,
        private_key_path: fixture("app-key.pem"),
        installation_id,
    })
}

#[test]
fn jwt_is_rs256_and_short_lived() -> anyhow::Result<()> {
    let key = EncodingKey::from_rsa_pem(&std::fs::read(fixture("app-key.pem"))?)?;
    let now = Utc::now();
    let token = app_jwt(42, &key, now)?;

    let public = DecodingKey::from_rsa_pem(&std::fs::read(fixture("app-key.pub.pem"))?)?;
    let decoded = jsonwebtoken::decode::<AppClaims>(&token, &public, &Validation::new(Algorithm::RS256))?;
    assert_eq!(decoded.header.alg, Algorithm::RS256);
    assert_eq!(decoded.claims.iss, "42");
    assert_eq!(decoded.claims.iat, now.timestamp() - 60);
    assert_eq!(decoded.claims.exp - decoded.claims.iat, 600);
    Ok(())
}

#[tokio::test]
async fn installation_token_is_minted_once_and_reused() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let expires = (Utc::now() + Duration::hours(1)).to_rfc3339();
    let exchange = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/app/installations/7/access_tokens")
                .header_exists("authorization");
            then.status(201)
                .json_body(json!({"token": "ghs_install", "expires_at": expires}));
        })
        .await;
    let issues = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/repos/o/r/issues")
                .header("authorization", "Bearer ghs_install");
            then.status(200).json_body(json!([]));
        })
        .await;

    let http = HttpConfig::with_api_url(server.base_url());
    let auth = Arc::new(AuthProvider::new(http.clone(), app_credentials(7))?);
    assert!(auth.is_app());
    let first = auth.access_token().await?;
    assert_eq!(first.kind, TokenKind::Installation);
    assert_eq!(first.token, "ghs_install");

    let gh = GitHubClient::new(http, auth.clone())?;
    let repo: RepoRef = "o/r".parse().unwrap();
    assert!(gh.list_unprocessed_issues(&repo, "bot-processed").await?.is_empty());
    assert!(gh.list_unprocessed_issues(&repo, "bot-processed").await?.is_empty());

    exchange.assert_hits_async(1).await;
    issues.assert_hits_async(2).await;
    Ok(())
}

#[tokio::test]
async fn token_near_expiry_is_reminted() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let expires = (Utc::now() + Duration::minutes(2)).to_rfc3339();
    let exchange = server
        .mock_async(|when, then| {
            when.method(POST).path("/app/installations/7/access_tokens");
            then.status(201)
                .json_body(json!({"token": "ghs_short", "expires_at": expires}));
        })
        .await;

    let auth = AuthProvider::new(HttpConfig::with_api_url(server.base_url()), app_credentials(7))?;
    auth.bearer().await?;
    auth.bearer().await?;
    exchange.assert_hits_async(2).await;
    Ok(())
}

#[tokio::test]
async fn rejected_exchange_is_an_auth_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/app/installations/7/access_tokens");
            then.status(401)
                .json_body(json!({"message": "A JSON web token could not be decoded"}));
        })
        .await;
    let auth = AuthProvider::new(HttpConfig::with_api_url(server.base_url()), app_credentials(7))
        .unwrap();
    let err = auth.bearer().await.unwrap_err();
    assert!(
        matches!(err, issue_triage_bot::error::Error::Auth(_)),
        "{err}"
    );
}

#[tokio::test]
async fn installations_are_listed_with_repository_preview() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/app/installations");
            then.status(200).json_body(json!([
                {"id": 7, "account": {"login": "octo", "type": "Organization"}, "target_type": "Organization"}
            ]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/app/installations/7/access_tokens");
            then.status(201).json_body(json!({"token": "ghs_preview"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/installation/repositories")
                .header("authorization", "Bearer ghs_preview");
            then.status(200).json_body(json!({
                "total_count": 12,
                "repositories": [{"full_name": "octo/one"}, {"full_name": "octo/two"}]
            }));
        })
        .await;

    // The installation id is irrelevant when enumerating installations.
    let auth = AuthProvider::new(HttpConfig::with_api_url(server.base_url()), app_credentials(0))?;
    let installs = auth.list_installations().await?;
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].id, 7);
    assert_eq!(installs[0].account.as_ref().map(|a| a.login.as_str()), Some("octo"));
    assert_eq!(installs[0].repositories, vec!["octo/one", "octo/two"]);
    assert_eq!(installs[0].total_repositories, 12);
    Ok(())
}

#[tokio::test]
async fn personal_tokens_cannot_list_installations() {
    let auth = AuthProvider::new(
        HttpConfig::with_api_url("http://127.0.0.1:9"),
        Credentials::Token("pat".into()),
    )
    .unwrap();
    assert!(!auth.is_app());
    assert!(auth.list_installations().await.is_err());
}
