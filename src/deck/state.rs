/// Lifecycle a [`super::Deck`] moves through exactly once per direction
/// (spec.md §3/§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckState {
    /// No handshake has started in either direction.
    Uninit,
    /// `Start` was called locally; waiting for `END_DECK`.
    Initiating,
    /// `START_DECK` arrived from the peer; `END_DECK` has been sent.
    Responding,
    /// Handshake complete in both directions; `Draw` is available.
    Ready,
    /// `Quit` was requested; the deck no longer accepts new operations.
    Quit,
}
