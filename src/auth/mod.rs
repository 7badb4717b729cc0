//! OAuth client-credentials auth for the astrology data provider.

pub mod oauth;
pub mod token_cache;

pub use oauth::{OAuthClientCredentials, OAuthToken};
pub use token_cache::{CachedToken, TokenCache};
