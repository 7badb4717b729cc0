pub mod astrology;
pub mod auth;
pub mod clock;
pub mod env;
mod error;
pub mod gateway;
pub mod geocode;
pub mod prompt;
pub mod providers;
pub mod types;
pub mod utils;

pub use astrology::AstrologyDataClient;
pub use auth::{OAuthClientCredentials, TokenCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use env::Env;
pub use error::{AstroError, Result};
pub use gateway::{ChatGateway, GatewayConfig, GatewayError};
pub use geocode::{Coordinates, HttpGeocoder, PlaceResolver};
pub use prompt::{RequestKind, classify};
pub use providers::{ClaudeProvider, CompletionProvider, ProviderKind, TogetherProvider};
pub use types::{ChatCompletionResponse, ChatRequest, CompletionResult, Message, Role, Usage};
