mod admin;
mod health_check;
mod user;

pub use admin::list_users;
pub use health_check::health_check;
pub use user::{current_user, login, logout, register};
