/// Token and credential primitives: claim payloads, the signing codec and
/// password hashing.
mod claims;
mod codec;
mod password;

pub use claims::{AccessClaims, BaseClaims, Capability, RefreshClaims, Role};
pub use codec::{TokenCodec, TokenError};
pub use password::{hash_password, verify_password};
