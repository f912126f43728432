mod credential_store;
mod credentials;
mod error;
mod lifecycle;
mod oauth;
mod renewal;
mod single_flight;
pub mod token;
mod transport;

pub use credential_store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use credentials::{
    CredentialPair, LoginCredentials, RegisterCredentials, RegisterResponse,
    ResetPasswordCredentials, User, UserId,
};
pub use error::AuthError;
pub use lifecycle::{SessionBuilder, SessionError, SessionLifecycle, SessionPhase, SessionState};
pub use oauth::{OAuthBridge, OAuthProvider, ProviderLogin, ProviderToken};
pub use renewal::{RejectionHook, RenewalCoordinator, RenewalEvent};
pub use single_flight::SingleFlight;
pub use transport::{AuthTransport, HttpAuthTransport};
