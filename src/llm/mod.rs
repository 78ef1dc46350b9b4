pub mod client;
pub mod media;
pub mod openrouter;

pub use openrouter::OpenRouterClient;
