/// Identity data, persistence and the credential service.
mod federated;
mod model;
mod service;
mod store;

pub use federated::{FederatedProvider, HttpFederatedProvider, RemoteAssertion};
pub use model::{NewUser, RegisterOrigin, User, UserProfile};
pub use service::{CredentialService, TokenPair};
pub use store::{IdentityStore, MemoryIdentityStore, PostgresIdentityStore};
