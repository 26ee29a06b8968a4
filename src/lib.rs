//! Mental poker core: commutative (Shamir three-pass) card encryption, a
//! shuffled card holder, a wire codec, and a peer-to-peer protocol engine
//! wired together into a [`Deck`](deck::Deck) that an application layer
//! (cribbage, a terminal UI, whatever) drives over a single ordered
//! bidirectional stream.
//!
//! Out of scope, per the design this crate implements: game rules, UI
//! rendering, argument parsing beyond the thin demo binary in `src/bin`.

pub mod card;
pub mod card_holder;
pub mod cipher;
pub mod config;
pub mod deck;
pub mod error;
pub mod protocol;
pub mod wire;

pub use card::CardFace;
pub use config::DeckConfig;
pub use deck::Deck;
pub use error::{PokerError, Result};
