pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::StratusConfig;
pub use error::{Result, StratusError};
pub use events::DomainEvent;
pub use types::*;
