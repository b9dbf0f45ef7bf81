//! Guard chain: the authenticated stage and the role stages layered after it.
//!
//! Routes apply [`authenticated`] first and optionally one of [`consultant`],
//! [`supervisor`] or [`admin`]. Every stage either forwards the request or
//! answers it with an [`ApiError`]; nothing is retried.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::auth::context::RequestContext;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::identity::Identity;
use crate::auth::permissions::PermissionResolver;
use crate::auth::resolver::IdentityResolver;
use crate::auth::token::{TokenCodec, extract_bearer};
use crate::error::ApiError;

/// Role requirement of a guard stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleGuard {
    /// Supervisor or admin. Open question: whether the consultant role
    /// itself should pass is undecided; until then this stage runs the
    /// supervisor check.
    Consultant,
    /// Supervisor or admin
    Supervisor,
    /// Admin only
    Admin,
}

impl RoleGuard {
    /// Whether the identity's active-tenant role satisfies this guard.
    pub fn accepts(self, permissions: &PermissionResolver, identity: &Identity) -> bool {
        match self {
            Self::Consultant | Self::Supervisor => permissions.is_supervisor(identity),
            Self::Admin => permissions.is_admin(identity),
        }
    }

    /// Role match and a verified email, or `Unauthorized`.
    pub fn check(self, permissions: &PermissionResolver, identity: &Identity) -> AuthResult<()> {
        if identity.email_verified && self.accepts(permissions, identity) {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }
}

/// Everything the guard stages need, shared by all requests.
pub struct AuthGate {
    codec: TokenCodec,
    identities: IdentityResolver,
    permissions: PermissionResolver,
}

impl AuthGate {
    pub fn new(codec: TokenCodec, identities: IdentityResolver, permissions: PermissionResolver) -> Self {
        Self {
            codec,
            identities,
            permissions,
        }
    }

    pub fn permissions(&self) -> &PermissionResolver {
        &self.permissions
    }

    /// Run extraction, validation and identity resolution for one request.
    ///
    /// The active tenant's permission record is resolved into the identity
    /// before the context is built, so the attached identity always carries it.
    pub async fn authenticate(&self, authorization: Option<&str>) -> AuthResult<RequestContext> {
        let raw = extract_bearer(authorization)?
            .ok_or_else(|| AuthError::InvalidToken("missing bearer token".to_string()))?;

        let token = self.codec.parse(raw)?;
        let mut identity = self.identities.resolve_from_token(&token).await?;
        self.permissions.resolve_active(&mut identity);

        Ok(RequestContext::new(token, identity))
    }

    pub fn authorize(&self, guard: RoleGuard, context: &RequestContext) -> AuthResult<()> {
        guard.check(&self.permissions, context.identity())
    }
}

fn log_rejection(stage: &str, err: &AuthError) {
    match err {
        AuthError::DirectoryUnavailable(_) => warn!(stage, "Request rejected: {}", err),
        _ => debug!(stage, "Request rejected: {}", err),
    }
}

/// Authenticated stage: attaches the [`RequestContext`] or rejects with 401.
pub async fn authenticated(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = match request.headers().get(AUTHORIZATION) {
        Some(value) => Some(value.to_str().map_err(|_| AuthError::MalformedHeader)?),
        None => None,
    };

    let context = gate.authenticate(header).await.inspect_err(|e| log_rejection("authenticated", e))?;

    debug!("Authenticated {}", context.identity().id);
    context.attach(request.extensions_mut());
    Ok(next.run(request).await)
}

async fn require(gate: &AuthGate, guard: RoleGuard, request: Request, next: Next) -> Result<Response, ApiError> {
    let stage = format!("{:?}", guard);
    let context = RequestContext::from_extensions(request.extensions())
        .inspect_err(|e| log_rejection(&stage, e))?;
    gate.authorize(guard, &context)
        .inspect_err(|e| log_rejection(&stage, e))?;
    Ok(next.run(request).await)
}

pub async fn consultant(State(gate): State<Arc<AuthGate>>, request: Request, next: Next) -> Result<Response, ApiError> {
    require(&gate, RoleGuard::Consultant, request, next).await
}

pub async fn supervisor(State(gate): State<Arc<AuthGate>>, request: Request, next: Next) -> Result<Response, ApiError> {
    require(&gate, RoleGuard::Supervisor, request, next).await
}

pub async fn admin(State(gate): State<Arc<AuthGate>>, request: Request, next: Next) -> Result<Response, ApiError> {
    require(&gate, RoleGuard::Admin, request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::tests::{SECRET, mint};
    use crate::config::RoleConfig;
    use crate::types::{RoleName, TenantId};
    use axum::Router;
    use axum::body::Body;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use serde_json::json;
    use tower::ServiceExt;

    fn permissions() -> PermissionResolver {
        let roles = RoleConfig {
            default_unauthorized: RoleName::new("guest"),
            ..RoleConfig::default()
        };
        PermissionResolver::new(TenantId::new("t1"), roles)
    }

    fn gate() -> Arc<AuthGate> {
        Arc::new(AuthGate::new(
            TokenCodec::hs256(SECRET),
            IdentityResolver::from_claims(),
            permissions(),
        ))
    }

    fn verified(role: &str) -> Identity {
        let mut identity = Identity {
            id: crate::types::UserId::new("u1"),
            email_verified: true,
            ..Default::default()
        };
        permissions().update_role(&mut identity, role);
        identity
    }

    async fn whoami(context: RequestContext) -> String {
        context.identity().id.to_string()
    }

    fn app(role: Option<RoleGuard>) -> Router {
        let gate = gate();
        let mut route = get(whoami);
        route = match role {
            Some(RoleGuard::Consultant) => route.route_layer(from_fn_with_state(gate.clone(), consultant)),
            Some(RoleGuard::Supervisor) => route.route_layer(from_fn_with_state(gate.clone(), supervisor)),
            Some(RoleGuard::Admin) => route.route_layer(from_fn_with_state(gate.clone(), admin)),
            None => route,
        };
        Router::new().route(
            "/",
            route.route_layer(from_fn_with_state(gate, authenticated)),
        )
    }

    async fn call(app: Router, authorization: Option<&str>) -> http::StatusCode {
        let mut request = http::Request::builder().uri("/");
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_consultant_guard_runs_supervisor_check() {
        let permissions = permissions();
        for role in ["supervisor", "admin"] {
            assert!(RoleGuard::Consultant.check(&permissions, &verified(role)).is_ok(), "{}", role);
        }
        for role in ["consultant", "participant"] {
            assert_eq!(
                RoleGuard::Consultant.check(&permissions, &verified(role)),
                Err(AuthError::Unauthorized),
                "{}",
                role
            );
        }
        assert!(permissions.is_consultant(&verified("consultant")));
    }

    #[test]
    fn test_supervisor_guard_rejects_consultant() {
        let permissions = permissions();
        assert!(RoleGuard::Supervisor.check(&permissions, &verified("supervisor")).is_ok());
        assert!(RoleGuard::Supervisor.check(&permissions, &verified("admin")).is_ok());
        assert_eq!(
            RoleGuard::Supervisor.check(&permissions, &verified("consultant")),
            Err(AuthError::Unauthorized)
        );
    }

    #[test]
    fn test_admin_guard_rejects_supervisor() {
        let permissions = permissions();
        let err = RoleGuard::Admin
            .check(&permissions, &verified("supervisor"))
            .unwrap_err();
        assert_eq!(err, AuthError::Unauthorized);
        assert_eq!(err.status_code(), http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_guards_require_verified_email() {
        let permissions = permissions();
        let mut identity = verified("admin");
        identity.email_verified = false;
        for guard in [RoleGuard::Consultant, RoleGuard::Supervisor, RoleGuard::Admin] {
            assert!(guard.check(&permissions, &identity).is_err());
        }
    }

    #[tokio::test]
    async fn test_authenticate_resolves_default_permission() {
        let gate = gate();
        let token = mint(&json!({ "sub": "auth0|u1", "nickname": "alice", "email": "a@x.com" }));
        let header = format!("Bearer {}", token);

        let context = gate.authenticate(Some(&header)).await.unwrap();
        let mut identity = context.identity().clone();
        let record = gate.permissions().resolve(&mut identity, &TenantId::new("t1"));

        assert_eq!(identity.id.as_str(), "u1");
        assert_eq!(record.role.as_str(), "guest");
        assert!(record.groups.is_empty());
        assert_eq!(&identity, context.identity());
    }

    #[tokio::test]
    async fn test_update_role_then_admin_guard() {
        let gate = gate();
        let token = mint(&json!({ "sub": "auth0|u1", "email_verified": true }));
        let context = gate.authenticate(Some(&format!("Bearer {}", token))).await.unwrap();

        let mut identity = context.identity().clone();
        gate.permissions().update_role(&mut identity, "admin");
        assert!(RoleGuard::Admin.check(gate.permissions(), &identity).is_ok());

        identity.email_verified = false;
        assert_eq!(
            RoleGuard::Admin.check(gate.permissions(), &identity),
            Err(AuthError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_authenticate_without_header_is_invalid_token() {
        assert!(matches!(
            gate().authenticate(None).await,
            Err(AuthError::InvalidToken(_))
        ));
        assert_eq!(
            gate().authenticate(Some("Basic abc")).await.unwrap_err(),
            AuthError::MalformedHeader
        );
    }

    #[tokio::test]
    async fn test_authenticated_stage_forwards_with_context() {
        let token = mint(&json!({ "sub": "auth0|u7" }));
        let response = app(None)
            .oneshot(
                http::Request::builder()
                    .uri("/")
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"u7");
    }

    #[tokio::test]
    async fn test_authenticated_stage_rejects_missing_header() {
        assert_eq!(call(app(None), None).await, http::StatusCode::UNAUTHORIZED);
        assert_eq!(call(app(None), Some("Bearer not-a-jwt")).await, http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_stage_without_authenticated_stage_is_unauthorized() {
        let app = Router::new().route(
            "/",
            get(|| async { "open" }).route_layer(from_fn_with_state(gate(), supervisor)),
        );
        let token = mint(&json!({ "sub": "u1" }));
        assert_eq!(
            call(app, Some(&format!("Bearer {}", token))).await,
            http::StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_unverified_default_user_is_rejected_by_role_stage() {
        let token = mint(&json!({ "sub": "u1", "email_verified": true }));
        let header = format!("Bearer {}", token);

        assert_eq!(call(app(None), Some(&header)).await, http::StatusCode::OK);
        assert_eq!(
            call(app(Some(RoleGuard::Consultant)), Some(&header)).await,
            http::StatusCode::UNAUTHORIZED
        );
    }
}
