//! Auth0 Management API client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::auth::{Identity, PermissionResolver, UserMetadata};
use crate::config::DirectoryConfig;
use crate::directory::{
    AppMetadata, ClientCredentials, DirectoryError, DirectoryFuture, DirectoryResult,
    ManagementTokenCache, UserDirectory, UserPatch,
};
use crate::types::{PROVIDER_PREFIX, UserId};

/// Database connection new users are created in.
pub const DEFAULT_CONNECTION: &str = "Username-Password-Authentication";

/// Suffix appended to generated passwords to satisfy the password policy.
const GENERATED_PASSWORD_SUFFIX: &str = "Aa12$%";

/// User as returned by the Management API and `/tokeninfo`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Auth0User {
    user_id: String,
    nickname: String,
    picture: String,
    email: String,
    email_verified: bool,
    blocked: bool,
    last_ip: Option<String>,
    last_login: Option<DateTime<Utc>>,
    logins_count: u64,
    user_metadata: Option<UserMetadata>,
    app_metadata: Option<AppMetadata>,
}

impl From<Auth0User> for Identity {
    fn from(user: Auth0User) -> Self {
        Self {
            id: UserId::from_subject(&user.user_id),
            nickname: user.nickname,
            picture: user.picture,
            email: user.email,
            email_verified: user.email_verified,
            last_ip: user.last_ip,
            last_login: user.last_login,
            logins_count: user.logins_count,
            blocked: user.blocked,
            permissions: user.app_metadata.map(|m| m.permissions).unwrap_or_default(),
            user_metadata: user.user_metadata.unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct CreateUserBody<'a> {
    connection: &'static str,
    email: &'a str,
    email_verified: bool,
    password: &'a str,
    app_metadata: AppMetadata,
}

#[derive(Serialize)]
struct TokenInfoBody<'a> {
    id_token: &'a str,
}

/// [`UserDirectory`] backed by the Auth0 Management API.
pub struct Auth0Directory {
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<ManagementTokenCache>,
    permissions: PermissionResolver,
}

impl Auth0Directory {
    /// Build the client. `permissions` seeds the records of newly created users.
    pub fn new(config: &DirectoryConfig, permissions: PermissionResolver) -> DirectoryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let tokens = ManagementTokenCache::new(
            format!("{}/oauth/token", base_url),
            ClientCredentials::new(&config.client_id, &config.client_secret, &config.audience),
            client.clone(),
        );

        Ok(Self {
            base_url,
            client,
            tokens: Arc::new(tokens),
            permissions,
        })
    }

    /// The shared management token cache.
    pub fn token_cache(&self) -> &Arc<ManagementTokenCache> {
        &self.tokens
    }

    fn users_url(&self) -> String {
        format!("{}/api/v2/users", self.base_url)
    }

    fn user_url(&self, id: &UserId) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(directory_user_id(id).as_bytes()).collect();
        format!("{}/api/v2/users/{}", self.base_url, encoded)
    }

    /// Send an authorized request, refreshing the management token once on 401.
    async fn send<F>(&self, url: &str, build: F) -> DirectoryResult<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.tokens.token().await?;
        let response = execute(build(&self.client).header(http::header::AUTHORIZATION, &token)).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check_response(url, response).await;
        }

        warn!("Management token rejected for {}, refreshing", url);
        let token = self.tokens.refresh(Some(&token)).await?;
        let response = execute(build(&self.client).header(http::header::AUTHORIZATION, &token)).await?;
        check_response(url, response).await
    }

    async fn fetch_user(&self, id: &UserId) -> DirectoryResult<Identity> {
        let url = self.user_url(id);
        let response = self.send(&url, |c| c.get(&url)).await?;
        decode_user(response).await
    }
}

impl UserDirectory for Auth0Directory {
    fn find_by_token<'a>(&'a self, token: &'a str) -> DirectoryFuture<'a, Identity> {
        Box::pin(async move {
            let url = format!("{}/tokeninfo", self.base_url);
            let response = execute(self.client.post(&url).json(&TokenInfoBody { id_token: token })).await?;
            let response = check_token_info(&url, response).await?;
            decode_user(response).await
        })
    }

    fn find_by_id<'a>(&'a self, id: &'a UserId) -> DirectoryFuture<'a, Identity> {
        Box::pin(self.fetch_user(id))
    }

    fn find_all(&self) -> DirectoryFuture<'_, Vec<Identity>> {
        Box::pin(async move {
            let url = self.users_url();
            let response = self.send(&url, |c| c.get(&url)).await?;
            let users: Vec<Auth0User> = response
                .json()
                .await
                .map_err(|e| DirectoryError::Unavailable(format!("Invalid users response: {}", e)))?;
            Ok(users.into_iter().map(Identity::from).collect())
        })
    }

    fn create<'a>(&'a self, email: &'a str, password: Option<&'a str>) -> DirectoryFuture<'a, Identity> {
        Box::pin(async move {
            if email.is_empty() {
                return Err(DirectoryError::InvalidRequest("email is required".to_string()));
            }

            let generated;
            let password = match password.filter(|p| !p.is_empty()) {
                Some(p) => p,
                None => {
                    generated = generate_password();
                    generated.as_str()
                }
            };

            let mut seed = Identity::default();
            self.permissions.resolve_active(&mut seed);

            let body = CreateUserBody {
                connection: DEFAULT_CONNECTION,
                email,
                email_verified: true,
                password,
                app_metadata: AppMetadata {
                    permissions: seed.permissions,
                },
            };

            let url = self.users_url();
            let response = self.send(&url, |c| c.post(&url).json(&body)).await?;
            let identity = decode_user(response).await?;
            debug!("Created directory user {}", identity.id);
            Ok(identity)
        })
    }

    fn update<'a>(&'a self, id: &'a UserId, patch: &'a UserPatch) -> DirectoryFuture<'a, Identity> {
        Box::pin(async move {
            if id.is_empty() {
                return Err(DirectoryError::InvalidRequest("user id is required".to_string()));
            }
            let url = self.user_url(id);
            let response = self.send(&url, |c| c.patch(&url).json(patch)).await?;
            decode_user(response).await
        })
    }

    fn delete_by_id<'a>(&'a self, id: &'a UserId) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            if id.is_empty() {
                return Err(DirectoryError::InvalidRequest("user id is required".to_string()));
            }
            let url = self.user_url(id);
            self.send(&url, |c| c.delete(&url)).await?;
            Ok(())
        })
    }
}

/// Directory user id for a gateway id, restoring the provider prefix.
fn directory_user_id(id: &UserId) -> String {
    if id.as_str().contains('|') {
        id.to_string()
    } else {
        format!("{}{}", PROVIDER_PREFIX, id)
    }
}

fn generate_password() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", &random[..12], GENERATED_PASSWORD_SUFFIX)
}

async fn execute(request: RequestBuilder) -> DirectoryResult<Response> {
    request
        .send()
        .await
        .map_err(|e| DirectoryError::Unavailable(e.to_string()))
}

async fn decode_user(response: Response) -> DirectoryResult<Identity> {
    let user: Auth0User = response
        .json()
        .await
        .map_err(|e| DirectoryError::Unavailable(format!("Invalid user response: {}", e)))?;
    Ok(user.into())
}

/// Map a directory status code onto [`DirectoryError`].
async fn check_response(url: &str, response: Response) -> DirectoryResult<Response> {
    let status = response.status();
    match status {
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(response),
        StatusCode::NOT_FOUND => Err(DirectoryError::NotFound),
        StatusCode::UNAUTHORIZED => {
            error!(url, "Directory rejected the management credential");
            Err(DirectoryError::Unauthorized)
        }
        StatusCode::FORBIDDEN => Err(DirectoryError::Forbidden),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            let body = response.text().await.unwrap_or_default();
            warn!(url, %status, "Directory rejected request: {}", body);
            Err(DirectoryError::Rejected(rejection_message(&body)))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            error!(url, %status, "Unexpected directory response: {}", body);
            Err(DirectoryError::Unavailable(format!("HTTP {}", status)))
        }
    }
}

/// Status mapping for `/tokeninfo`, where a client error means the caller's
/// token was refused rather than our management credential.
async fn check_token_info(url: &str, response: Response) -> DirectoryResult<Response> {
    let status = response.status();
    if status.is_client_error() {
        debug!(url, %status, "Directory refused the bearer token");
        return Err(DirectoryError::Unauthorized);
    }
    check_response(url, response).await
}

/// Pull a readable message out of an Auth0 error body.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("errorCode"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};

    /// Stub of the Management API.
    #[derive(Default)]
    struct Stub {
        token_calls: AtomicUsize,
        /// Reject the first N management calls with 401.
        reject_first: AtomicUsize,
        last_body: std::sync::Mutex<Option<Value>>,
    }

    type StubState = Arc<Stub>;

    impl Auth0Directory {
        fn for_base_url(base_url: &str) -> Self {
            use crate::config::RoleConfig;
            use crate::types::TenantId;

            let config = DirectoryConfig::new(base_url, "client", "secret");
            let permissions = PermissionResolver::new(TenantId::new("t1"), RoleConfig::default());
            Self::new(&config, permissions).unwrap()
        }
    }

    fn auth0_user(id: &str) -> Value {
        json!({
            "user_id": format!("auth0|{}", id),
            "nickname": "alice",
            "picture": "https://img/a.png",
            "email": "a@x.com",
            "email_verified": true,
            "blocked": false,
            "last_ip": "10.0.0.1",
            "last_login": "2024-01-02T03:04:05Z",
            "logins_count": 7,
            "user_metadata": { "companyName": "Acme" },
            "app_metadata": { "permissions": { "t1": { "role": "admin", "groups": ["ops"] } } }
        })
    }

    async fn issue_token(State(stub): State<StubState>) -> Json<Value> {
        let n = stub.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({ "access_token": format!("tok{}", n), "token_type": "Bearer" }))
    }

    fn authorized(stub: &Stub, headers: &HeaderMap) -> bool {
        let rejecting = stub
            .reject_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        !rejecting && headers.get("authorization").is_some()
    }

    async fn get_user(
        State(stub): State<StubState>,
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        if !authorized(&stub, &headers) {
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
        match id.as_str() {
            "auth0|u1" => Json(auth0_user("u1")).into_response(),
            "auth0|boom" => axum::http::StatusCode::BAD_GATEWAY.into_response(),
            _ => axum::http::StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn patch_user(
        State(stub): State<StubState>,
        Path(_id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        if !authorized(&stub, &headers) {
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
        *stub.last_body.lock().unwrap() = Some(body);
        Json(auth0_user("u1")).into_response()
    }

    async fn delete_user(State(stub): State<StubState>, headers: HeaderMap) -> axum::http::StatusCode {
        if !authorized(&stub, &headers) {
            return axum::http::StatusCode::UNAUTHORIZED;
        }
        axum::http::StatusCode::NO_CONTENT
    }

    async fn list_users(State(stub): State<StubState>, headers: HeaderMap) -> axum::response::Response {
        if !authorized(&stub, &headers) {
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
        Json(json!([auth0_user("u1"), auth0_user("u2")])).into_response()
    }

    async fn create_user(
        State(stub): State<StubState>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        if !authorized(&stub, &headers) {
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
        if body["email"] == "taken@x.com" {
            return (
                axum::http::StatusCode::CONFLICT,
                Json(json!({ "statusCode": 409, "errorCode": "auth0_idp_error", "message": "The user already exists." })),
            )
                .into_response();
        }
        *stub.last_body.lock().unwrap() = Some(body);
        (axum::http::StatusCode::CREATED, Json(auth0_user("new"))).into_response()
    }

    async fn token_info(Json(body): Json<Value>) -> axum::response::Response {
        if body["id_token"] == "good" {
            Json(auth0_user("u1")).into_response()
        } else if body["id_token"] == "garbled" {
            axum::http::StatusCode::BAD_REQUEST.into_response()
        } else {
            axum::http::StatusCode::UNAUTHORIZED.into_response()
        }
    }

    async fn spawn_stub(stub: StubState) -> String {
        let app = Router::new()
            .route("/oauth/token", post(issue_token))
            .route("/tokeninfo", post(token_info))
            .route("/api/v2/users", get(list_users).post(create_user))
            .route(
                "/api/v2/users/{id}",
                get(get_user).patch(patch_user).delete(delete_user),
            )
            .with_state(stub);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_auth0_user_conversion() {
        let user: Auth0User = serde_json::from_value(auth0_user("u1")).unwrap();
        let identity = Identity::from(user);

        assert_eq!(identity.id.as_str(), "u1");
        assert_eq!(identity.nickname, "alice");
        assert!(identity.email_verified);
        assert_eq!(identity.logins_count, 7);
        assert_eq!(identity.last_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(identity.user_metadata.company_name.as_deref(), Some("Acme"));
        assert_eq!(identity.permissions.get("t1").unwrap().role.as_str(), "admin");
    }

    #[test]
    fn test_auth0_user_tolerates_null_metadata() {
        let user: Auth0User =
            serde_json::from_value(json!({ "user_id": "auth0|u3", "app_metadata": null })).unwrap();
        let identity = Identity::from(user);
        assert!(identity.permissions.is_empty());
        assert!(!identity.email_verified);
    }

    #[test]
    fn test_directory_user_id_restores_prefix() {
        assert_eq!(directory_user_id(&UserId::new("u1")), "auth0|u1");
        assert_eq!(directory_user_id(&UserId::new("google-oauth2|9")), "google-oauth2|9");
    }

    #[test]
    fn test_generated_password_shape() {
        let password = generate_password();
        assert_eq!(password.len(), 12 + GENERATED_PASSWORD_SUFFIX.len());
        assert!(password.ends_with(GENERATED_PASSWORD_SUFFIX));
        assert_ne!(password, generate_password());
    }

    #[test]
    fn test_rejection_message() {
        assert_eq!(rejection_message(r#"{"message":"bad email"}"#), "bad email");
        assert_eq!(rejection_message("plain"), "plain");
    }

    #[tokio::test]
    async fn test_find_by_id_caches_management_token() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await);

        let first = directory.find_by_id(&UserId::new("u1")).await.unwrap();
        let second = directory.find_by_id(&UserId::new("u1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.id.as_str(), "u1");
        assert_eq!(stub.token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refreshes_token_once_on_401() {
        let stub = Arc::new(Stub::default());
        stub.reject_first.store(1, Ordering::SeqCst);
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await);

        let identity = directory.find_by_id(&UserId::new("u1")).await.unwrap();

        assert_eq!(identity.id.as_str(), "u1");
        assert_eq!(stub.token_calls.load(Ordering::SeqCst), 2);
        assert_eq!(directory.token_cache().fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_persistent_401_is_unauthorized() {
        let stub = Arc::new(Stub::default());
        stub.reject_first.store(5, Ordering::SeqCst);
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await);

        let err = directory.find_by_id(&UserId::new("u1")).await.unwrap_err();

        assert_eq!(err, DirectoryError::Unauthorized);
        assert_eq!(stub.token_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_token_fetch() {
        let stub = Arc::new(Stub::default());
        let directory = Arc::new(Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                directory.find_by_id(&UserId::new("u1")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(stub.token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub).await);

        assert_eq!(
            directory.find_by_id(&UserId::new("missing")).await.unwrap_err(),
            DirectoryError::NotFound
        );
        assert!(matches!(
            directory.find_by_id(&UserId::new("boom")).await.unwrap_err(),
            DirectoryError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_find_all() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub).await);

        let users = directory.find_all().await.unwrap();
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_create_seeds_default_permissions() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await);

        let identity = directory.create("b@x.com", None).await.unwrap();
        assert_eq!(identity.id.as_str(), "new");

        let body = stub.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["connection"], DEFAULT_CONNECTION);
        assert_eq!(body["email"], "b@x.com");
        assert_eq!(body["email_verified"], true);
        assert!(body["password"].as_str().unwrap().ends_with(GENERATED_PASSWORD_SUFFIX));
        assert_eq!(body["app_metadata"]["permissions"]["t1"]["role"], "unauthorized");
    }

    #[tokio::test]
    async fn test_create_conflict_is_rejected() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub).await);

        let err = directory.create("taken@x.com", Some("pw")).await.unwrap_err();
        assert_eq!(err, DirectoryError::Rejected("The user already exists.".to_string()));
    }

    #[tokio::test]
    async fn test_create_requires_email() {
        let directory = Auth0Directory::for_base_url("http://127.0.0.1:1");
        assert!(matches!(
            directory.create("", None).await,
            Err(DirectoryError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_update_sends_patch() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await);

        let patch = UserPatch {
            blocked: Some(true),
            user_metadata: Some(UserMetadata {
                company_name: Some("Acme".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        directory.update(&UserId::new("u1"), &patch).await.unwrap();

        let body = stub.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(
            body,
            json!({ "blocked": true, "user_metadata": { "companyName": "Acme" } })
        );
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub).await);

        assert!(directory.delete_by_id(&UserId::new("u1")).await.is_ok());
        assert!(matches!(
            directory.delete_by_id(&UserId::default()).await,
            Err(DirectoryError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_token_uses_tokeninfo() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await);

        let identity = directory.find_by_token("good").await.unwrap();
        assert_eq!(identity.id.as_str(), "u1");
        assert_eq!(
            directory.find_by_token("bad").await.unwrap_err(),
            DirectoryError::Unauthorized
        );
        assert_eq!(stub.token_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refused_bearer_token_is_unauthorized() {
        let stub = Arc::new(Stub::default());
        let directory = Auth0Directory::for_base_url(&spawn_stub(stub.clone()).await);

        for token in ["bad", "garbled"] {
            assert_eq!(
                directory.find_by_token(token).await.unwrap_err(),
                DirectoryError::Unauthorized,
                "{}",
                token
            );
        }
        assert_eq!(directory.token_cache().fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_directory_is_unavailable() {
        let directory = Auth0Directory::for_base_url("http://127.0.0.1:1");
        assert!(matches!(
            directory.find_by_id(&UserId::new("u1")).await,
            Err(DirectoryError::Unavailable(_))
        ));
    }
}
