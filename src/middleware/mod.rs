mod admin;
mod auth_gate;

pub use admin::AdminGate;
pub use auth_gate::{
    authorize, clear_refresh_cookie, AuthGate, Passage, RotatedAccess, REFRESH_COOKIE,
    ROTATED_EXPIRY_HEADER, ROTATED_TOKEN_HEADER,
};
