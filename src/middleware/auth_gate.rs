/// Request authentication gate.
///
/// The decision logic lives in [`authorize`], which returns a plain value;
/// the actix middleware below only extracts tokens, applies the decision
/// and attaches the rotation payload or clears the refresh cookie. That
/// keeps the whole state machine testable without inspecting headers.
///
/// Per-request states: Unauthenticated -> AccessValid | SilentlyRotated |
/// Rejected.
use actix_web::{
    cookie::{time::Duration as CookieDuration, Cookie},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    web, Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::{AccessClaims, BaseClaims, TokenError};
use crate::error::{bounded, AppError, AuthError};
use crate::startup::AppState;

pub const REFRESH_COOKIE: &str = "refresh_token";
pub const ROTATED_TOKEN_HEADER: &str = "new-access-token";
pub const ROTATED_EXPIRY_HEADER: &str = "new-access-expires-at";

/// Replacement access credential minted during silent rotation. The caller
/// attaches it to the outgoing response; expiry is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatedAccess {
    pub token: String,
    pub expires_at_ms: i64,
}

/// Successful gate outcome. Rejections are the `Err` side.
#[derive(Debug, Clone)]
pub enum Passage {
    Valid(AccessClaims),
    Rotated {
        claims: AccessClaims,
        rotation: RotatedAccess,
    },
}

impl Passage {
    pub fn claims(&self) -> &AccessClaims {
        match self {
            Passage::Valid(claims) => claims,
            Passage::Rotated { claims, .. } => claims,
        }
    }
}

/// Decide what happens to a request presenting these tokens.
///
/// 1. A revoked refresh token rejects outright, whatever else is present.
/// 2. A valid access token passes.
/// 3. A missing or expired access token falls back to the refresh token:
///    identity fields are re-read from the store (claims minted off a
///    days-old refresh token must not resurrect a stale role) and a fresh
///    access token is minted.
/// 4. Any other access-token defect rejects with no refresh fallback.
pub async fn authorize(
    state: &AppState,
    access: Option<&str>,
    refresh: Option<&str>,
) -> Result<Passage, AppError> {
    if let Some(refresh_token) = refresh {
        if state.revocations.is_revoked(refresh_token) {
            return Err(AppError::Auth(AuthError::Revoked));
        }
    }

    // A missing access token takes the same path as an expired one.
    let access_result = match access {
        Some(token) => state.codec.verify_access(token),
        None => Err(TokenError::Expired),
    };

    match access_result {
        Ok(claims) => Ok(Passage::Valid(claims)),
        Err(TokenError::Expired) => {
            let refresh_token = refresh.ok_or(AppError::Auth(AuthError::Expired))?;
            let refresh_claims = state
                .codec
                .verify_refresh(refresh_token)
                .map_err(|_| AppError::Auth(AuthError::Expired))?;

            let fields = bounded(
                state.store_timeout,
                "identity lookup",
                state.identities.auth_fields(refresh_claims.user_id),
            )
            .await?;
            let (uuid, role) = fields.ok_or(AppError::Auth(AuthError::InvalidCredential))?;

            let (token, claims) = state.codec.mint_access(BaseClaims {
                user_id: refresh_claims.user_id,
                uuid,
                role,
            })?;
            let rotation = RotatedAccess {
                expires_at_ms: claims.expires_at().timestamp_millis(),
                token,
            };
            tracing::debug!(user_id = claims.user_id, "access token silently rotated");
            Ok(Passage::Rotated { claims, rotation })
        }
        Err(TokenError::Malformed) => Err(AppError::Auth(AuthError::Malformed)),
        Err(TokenError::BadSignature) => Err(AppError::Auth(AuthError::BadSignature)),
    }
}

/// Expired cookie that instructs the client to drop its refresh token.
pub fn clear_refresh_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, "");
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_max_age(CookieDuration::ZERO);
    cookie
}

/// Rejections always clear the client refresh cookie; storage failures do
/// not, they are not a verdict about the session.
fn rejection_response(err: &AppError) -> HttpResponse {
    err.log();
    let (status, code, message) = err.http_parts();
    let mut builder = HttpResponse::build(status);
    if matches!(err, AppError::Auth(_)) {
        builder.cookie(clear_refresh_cookie());
    }
    builder.json(crate::error::ErrorResponse::new(
        message,
        code,
        status.as_u16(),
    ))
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

/// Middleware guarding protected routes.
pub struct AuthGate;

impl<S, B> Transform<S, ServiceRequest> for AuthGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthGateMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthGateMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthGateMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
                let err = AppError::Internal("auth gate mounted without app state".to_string());
                let response = rejection_response(&err);
                return Err(
                    actix_web::error::InternalError::from_response(err.to_string(), response)
                        .into(),
                );
            };

            let access = bearer_token(&req);
            let refresh = req
                .cookie(REFRESH_COOKIE)
                .map(|cookie| cookie.value().to_string());

            match authorize(&state, access.as_deref(), refresh.as_deref()).await {
                Ok(Passage::Valid(claims)) => {
                    req.extensions_mut().insert(claims);
                    service.call(req).await
                }
                Ok(Passage::Rotated { claims, rotation }) => {
                    req.extensions_mut().insert(claims);
                    let mut res = service.call(req).await?;
                    let headers = res.headers_mut();
                    if let Ok(value) = HeaderValue::from_str(&rotation.token) {
                        headers.insert(HeaderName::from_static(ROTATED_TOKEN_HEADER), value);
                    }
                    if let Ok(value) = HeaderValue::from_str(&rotation.expires_at_ms.to_string()) {
                        headers.insert(HeaderName::from_static(ROTATED_EXPIRY_HEADER), value);
                    }
                    Ok(res)
                }
                Err(err) => {
                    let response = rejection_response(&err);
                    Err(
                        actix_web::error::InternalError::from_response(err.to_string(), response)
                            .into(),
                    )
                }
            }
        })
    }
}
