/// Identity routes: registration, login, logout and the current-identity
/// snapshot.
use actix_web::{
    cookie::{time::Duration as CookieDuration, Cookie},
    web, HttpRequest, HttpResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AccessClaims;
use crate::error::{AppError, AuthError, ValidationError};
use crate::identity::{TokenPair, UserProfile};
use crate::middleware::{clear_refresh_cookie, REFRESH_COOKIE};
use crate::startup::AppState;
use crate::validators::{is_valid_email, is_valid_username};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub verification_code: String,
}

#[derive(Deserialize)]
pub struct EmailLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginParams {
    pub flag: Option<String>,
    pub code: Option<String>,
}

/// Token pair returned on every successful login. The access expiry is
/// epoch milliseconds; the refresh token is additionally set as an
/// HttpOnly cookie.
#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: i64,
}

fn refresh_cookie(pair: &TokenPair) -> Cookie<'static> {
    let remaining = (pair.refresh_expires_at - Utc::now()).num_seconds().max(0);
    Cookie::build(REFRESH_COOKIE, pair.refresh_token.clone())
        .path("/")
        .http_only(true)
        .max_age(CookieDuration::seconds(remaining))
        .finish()
}

fn login_body(user: &crate::identity::User, pair: &TokenPair) -> LoginResponse {
    LoginResponse {
        user: UserProfile::from(user),
        access_token: pair.access_token.clone(),
        refresh_token: pair.refresh_token.clone(),
        access_token_expires_at: pair.access_expires_at.timestamp_millis(),
    }
}

/// POST /user/register
///
/// Registration consumes the verification record previously written for
/// the address. The record is single use and checked fail-closed.
pub async fn register(
    form: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    let username = is_valid_username(&form.username)?;

    let record = state
        .verifications
        .take(&email)
        .await?
        .ok_or(AppError::Validation(ValidationError::InvalidFormat(
            "verification code",
        )))?;
    record.verify(&email, &form.verification_code)?;

    let (user, pair) = state
        .credentials
        .register(&username, &email, &form.password)
        .await?;

    Ok(HttpResponse::Created()
        .cookie(refresh_cookie(&pair))
        .json(login_body(&user, &pair)))
}

/// POST /user/login?flag=email|federated
///
/// The default flag is email. Federated logins carry the provider's
/// authorization code in the query string.
pub async fn login(
    params: web::Query<LoginParams>,
    body: Option<web::Json<EmailLoginRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let (user, pair) = match params.flag.as_deref() {
        Some("federated") => {
            let code = params
                .code
                .as_deref()
                .ok_or(AppError::Validation(ValidationError::EmptyField("code")))?;
            let provider = state
                .federated
                .as_ref()
                .ok_or(AppError::Validation(ValidationError::InvalidFormat("flag")))?;
            let assertion = provider.exchange(code).await?;
            state.credentials.federated_login(assertion).await?
        }
        None | Some("email") => {
            let body = body.ok_or(AppError::Validation(ValidationError::EmptyField(
                "credentials",
            )))?;
            let email = is_valid_email(&body.email)?;
            state.credentials.email_login(&email, &body.password).await?
        }
        Some(_) => {
            return Err(AppError::Validation(ValidationError::InvalidFormat("flag")));
        }
    };

    Ok(HttpResponse::Ok()
        .cookie(refresh_cookie(&pair))
        .json(login_body(&user, &pair)))
}

/// POST /user/logout (protected)
///
/// Revokes the presented refresh token and clears the session entry and
/// cookie. Idempotent: a request without a refresh cookie still clears.
pub async fn logout(
    claims: web::ReqData<AccessClaims>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    if let Some(cookie) = req.cookie(REFRESH_COOKIE) {
        state.credentials.logout(claims.uuid, cookie.value()).await?;
    }

    Ok(HttpResponse::Ok()
        .cookie(clear_refresh_cookie())
        .finish())
}

/// GET /user/info (protected)
pub async fn current_user(
    claims: web::ReqData<AccessClaims>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state
        .identities
        .find_by_id(claims.user_id)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidCredential))?;

    Ok(HttpResponse::Ok().json(UserProfile::from(&user)))
}
