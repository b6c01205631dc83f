// cityarray-proto: Wire frames and WebSocket link shared by signs and the hub

pub mod error;
pub mod link;
pub mod wire;

pub use error::Error;
pub use link::{Endpoint, ReconnectConfig, SignLink, backoff_seed, calculate_backoff, sign_url};
pub use wire::{SignCommand, SignEvent};
