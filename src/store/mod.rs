//! Player records and identity persistence

pub mod identity;
pub mod players;
pub mod repository;

pub use identity::{FileIdentityStore, IdentityStore, StoreError};
pub use players::PlayerStore;
pub use repository::{MemoryPlayerRepository, PlayerRepository};
