//! Identity and session handling for the vault API.
//! Keep the public surface thin and split implementation across sub-modules.

mod access;
mod principal;
mod provider;
mod session;
mod token;

pub use access::{can_access, ensure_owner};
pub use principal::Identity;
pub use provider::{validate_credential, AuthProvider};
pub use session::{bind_session, SessionBinder};
pub use token::{decode_key, encode_key, generate_key, TokenError, TokenService};
