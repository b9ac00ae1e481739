//! Identity: OAuth 2.0 Authorization Code flow with PKCE (RFC 7636)
//!
//! - PKCE verifier/challenge and CSRF state generation
//! - Loopback callback server for the authorization code
//! - Identity token with decoded claims
//! - Token storage (file and in-memory)
//! - Session state machine with single-flight refresh

mod callback;
mod pkce;
mod session;
mod storage;
mod token;

pub use callback::{CallbackServer, start_callback_server};
pub use pkce::{PkcePair, challenge_for, generate_pkce, generate_state};
pub use session::{LoginOptions, LoginStatus, OAuthSession};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{IdentityToken, TokenClaims, mask_token};
