//! Authentication: bearer tokens, device claim tokens, and the request
//! extractor for authenticated HTTP routes.

pub mod claim;
pub mod extractor;
pub mod token;

pub use claim::ClaimTokens;
pub use extractor::AuthUser;
pub use token::{TokenClaims, TokenService, extract_bearer};
