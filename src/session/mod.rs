/// Session-control stores: the per-identity session registry and the
/// durable+cached revocation store.
mod registry;
mod revocation;

pub use registry::{MemorySessionRegistry, RedisSessionRegistry, SessionRegistry};
pub use revocation::{
    MemoryRevocationLog, PostgresRevocationLog, RevocationLog, RevocationStore,
};
