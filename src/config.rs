//! Tunable knobs for a [`Deck`](crate::deck::Deck) that the spec pins to a
//! literal default but that a real deployment (or a test) may want to
//! override: the handshake deadline, the internal channel capacities, and
//! the modulus width.

use std::time::Duration;

/// Configuration for one [`Deck`](crate::deck::Deck) instance.
///
/// The literal defaults match the spec: a 500 ms handshake deadline and a
/// 1024-bit shared prime. Tests shrink `prime_bits` so the Miller-Rabin
/// search doesn't dominate runtime; production code should leave it at
/// [`Self::default`].
#[derive(Debug, Clone, Copy)]
pub struct DeckConfig {
    /// How long `Deck::start` waits for the handshake to reach `READY`
    /// before returning `HandshakeTimeout` (spec.md §4.6).
    pub handshake_timeout: Duration,
    /// Bound on the internal request-serializer channel that every public
    /// `Deck` operation and every protocol handler callback enqueues onto.
    pub command_channel_capacity: usize,
    /// Bound on the inbound `APP_MESSAGE` channel drained by `Deck::receive`.
    /// Deliberately small: backpressure here is intentional, not a bug.
    pub inbound_channel_capacity: usize,
    /// Bit width of the shared prime generated by `Deck::start`.
    pub prime_bits: u64,
}

impl Default for DeckConfig {
    fn default() -> Self {
        DeckConfig {
            handshake_timeout: Duration::from_millis(500),
            command_channel_capacity: 64,
            inbound_channel_capacity: 64,
            prime_bits: crate::cipher::PRIME_BITS,
        }
    }
}
