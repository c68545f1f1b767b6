/// Admin-gated identity listing.
use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::identity::UserProfile;
use crate::startup::AppState;

/// GET /admin/users
pub async fn list_users(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let users = state.identities.list().await?;
    let profiles: Vec<UserProfile> = users.iter().map(UserProfile::from).collect();
    Ok(HttpResponse::Ok().json(profiles))
}
