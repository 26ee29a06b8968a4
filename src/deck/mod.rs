//! The per-connection deck: a single request-serializer task owns all
//! mutable state (key, holder, handshake state, pending-reveal registry)
//! so every public operation is effectively atomic with respect to every
//! other one (spec.md §4.6).

mod state;

pub use state::DeckState;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{instrument, warn};

use crate::card::CardFace;
use crate::card_holder::CardHolder;
use crate::cipher::{self, Key};
use crate::config::DeckConfig;
use crate::error::{PokerError, Result};
use crate::protocol::{AsyncDuplex, Protocol, ProtocolHandler};

const LOG_TARGET: &str = "mental_poker::deck";

enum DeckCommand {
    Start {
        faces: Vec<CardFace>,
        reply: oneshot::Sender<Result<()>>,
    },
    Draw {
        index: u64,
        reply: oneshot::Sender<Result<oneshot::Receiver<Result<CardFace>>>>,
    },
    Size {
        reply: oneshot::Sender<u64>,
    },
    SendAppMessage {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Quit {
        reply: oneshot::Sender<()>,
    },
    HandleQuit,
    HandleStartDeck {
        deck: Vec<BigUint>,
        prime: BigUint,
    },
    HandleEndDeck {
        deck: Vec<BigUint>,
    },
    HandleDecryptCard {
        index: u64,
    },
    HandleDecryptedCard {
        index: u64,
        value: BigUint,
    },
    HandleAppMessage {
        payload: Vec<u8>,
    },
}

/// A handle to a deck of cards shared with exactly one peer. Cloning is
/// cheap (it clones an `mpsc::Sender`); all clones talk to the same
/// request-serializer task.
#[derive(Clone)]
pub struct Deck {
    commands: mpsc::Sender<DeckCommand>,
    inbound: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    ready: watch::Receiver<bool>,
    config: DeckConfig,
}

impl Deck {
    /// Builds a deck bound to `conn` with the default [`DeckConfig`] and
    /// spawns its request-serializer, protocol reader, and protocol
    /// dispatcher tasks. `shutdown` stops the underlying [`Protocol`];
    /// call [`Deck::quit`] to drive it instead of signalling the channel
    /// directly.
    pub fn new(conn: Box<dyn AsyncDuplex>, shutdown: watch::Receiver<bool>) -> Self {
        Self::with_config(conn, shutdown, DeckConfig::default())
    }

    /// Like [`Deck::new`] but with an explicit [`DeckConfig`] — used by
    /// tests to shrink the prime width and by the demo binary to expose
    /// the handshake deadline as a CLI flag.
    pub fn with_config(
        conn: Box<dyn AsyncDuplex>,
        shutdown: watch::Receiver<bool>,
        config: DeckConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_channel_capacity);
        let (ready_tx, ready_rx) = watch::channel(false);

        let handler: Arc<dyn ProtocolHandler> = Arc::new(DeckHandler {
            commands: command_tx.clone(),
        });
        let protocol = Arc::new(Protocol::new(conn, handler, shutdown));

        let server = DeckServer {
            state: DeckState::Uninit,
            key: None,
            holder: None,
            pending: HashMap::new(),
            protocol,
            ready_tx,
            app_tx: inbound_tx,
            prime_bits: config.prime_bits,
        };
        tokio::spawn(server.run(command_rx));

        Deck {
            commands: command_tx,
            inbound: Arc::new(Mutex::new(inbound_rx)),
            ready: ready_rx,
            config,
        }
    }

    /// Generates a fresh key and prime, shuffles `faces` into a holder,
    /// and sends `START_DECK` to the peer. Waits up to the configured
    /// handshake timeout for the handshake to reach `READY`.
    #[instrument(skip(self, faces), target = LOG_TARGET)]
    pub async fn start(&self, faces: Vec<CardFace>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(DeckCommand::Start {
            faces,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| PokerError::Quit)??;

        let mut ready = self.ready.clone();
        if *ready.borrow() {
            return Ok(());
        }
        tokio::time::timeout(self.config.handshake_timeout, ready.changed())
            .await
            .map_err(|_| PokerError::HandshakeTimeout)?
            .map_err(|_| PokerError::Quit)?;
        Ok(())
    }

    /// Reveals the card at `index`: registers a one-shot waiter, asks the
    /// peer to decrypt their layer, and suspends until the answer arrives.
    #[instrument(skip(self), target = LOG_TARGET)]
    pub async fn draw(&self, index: u64) -> Result<CardFace> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(DeckCommand::Draw {
            index,
            reply: reply_tx,
        })
        .await?;
        let waiter = reply_rx.await.map_err(|_| PokerError::Quit)??;
        waiter.await.map_err(|_| PokerError::Quit)?
    }

    /// Returns the deck size, or `0` before `Start`/`HandleStartDeck` has
    /// established a holder.
    pub async fn size(&self) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(DeckCommand::Size { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| PokerError::Quit)
    }

    /// Sends an application-layer message to the peer, outside the card
    /// protocol proper (spec.md §4.4's `APP_MESSAGE`).
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(DeckCommand::SendAppMessage {
            payload,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| PokerError::Quit)?
    }

    /// Receives the next inbound application-layer message, in
    /// wire-arrival order. Only one caller should hold this at a time; a
    /// second concurrent call waits behind the first (single-consumer).
    pub async fn receive(&self) -> Result<Vec<u8>> {
        let mut rx = self.inbound.lock().await;
        rx.recv().await.ok_or(PokerError::Quit)
    }

    /// The `Stream`-shaped form of [`Deck::receive`] (spec.md §6.2's
    /// `Receive() -> Stream<[u8]>`): yields each inbound `APP_MESSAGE`
    /// payload in arrival order and ends when the deck quits. Still a
    /// single logical consumer — cloned `Deck` handles share the same
    /// underlying channel, so only one stream (or `receive()` caller)
    /// should be driven at a time.
    pub fn receive_stream(&self) -> impl futures::Stream<Item = Vec<u8>> {
        futures::stream::unfold(self.inbound.clone(), |inbound| async move {
            let next = {
                let mut rx = inbound.lock().await;
                rx.recv().await
            };
            next.map(|payload| (payload, inbound))
        })
    }

    /// Ends the session: stops the protocol's background tasks and the
    /// request-serializer. Any outstanding `draw` is abandoned.
    pub async fn quit(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.commands.send(DeckCommand::Quit { reply: reply_tx }).await;
        let _ = reply_rx.await;
        Ok(())
    }

    async fn send_command(&self, command: DeckCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| PokerError::Quit)
    }
}

/// Forwards [`ProtocolHandler`] callbacks onto the deck's command channel
/// so the request-serializer task remains the sole mutator of deck state,
/// exactly as for locally-initiated operations (spec.md §4.6).
struct DeckHandler {
    commands: mpsc::Sender<DeckCommand>,
}

#[async_trait]
impl ProtocolHandler for DeckHandler {
    async fn handle_quit(&self) {
        let _ = self.commands.send(DeckCommand::HandleQuit).await;
    }

    async fn handle_start_deck(&self, deck: Vec<BigUint>, prime: BigUint) {
        let _ = self
            .commands
            .send(DeckCommand::HandleStartDeck { deck, prime })
            .await;
    }

    async fn handle_end_deck(&self, deck: Vec<BigUint>) {
        let _ = self.commands.send(DeckCommand::HandleEndDeck { deck }).await;
    }

    async fn handle_decrypt_card(&self, index: u64) {
        let _ = self
            .commands
            .send(DeckCommand::HandleDecryptCard { index })
            .await;
    }

    async fn handle_decrypted_card(&self, index: u64, value: BigUint) {
        let _ = self
            .commands
            .send(DeckCommand::HandleDecryptedCard { index, value })
            .await;
    }

    async fn handle_app_message(&self, payload: Vec<u8>) {
        // Backpressure is intentional here: if nothing is enqueued to
        // forward it, this blocks the request-serializer loop, which in
        // turn blocks every other deck operation until `receive` drains.
        let _ = self
            .commands
            .send(DeckCommand::HandleAppMessage { payload })
            .await;
    }
}

/// Owns every piece of mutable deck state. Reachable only through
/// `DeckCommand`s processed one at a time by [`DeckServer::run`] — this is
/// the single point of serialization the rest of the module relies on.
struct DeckServer {
    state: DeckState,
    key: Option<Key>,
    holder: Option<CardHolder>,
    pending: HashMap<u64, oneshot::Sender<Result<CardFace>>>,
    protocol: Arc<Protocol>,
    ready_tx: watch::Sender<bool>,
    app_tx: mpsc::Sender<Vec<u8>>,
    prime_bits: u64,
}

impl DeckServer {
    async fn run(mut self, mut commands: mpsc::Receiver<DeckCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                DeckCommand::Start { faces, reply } => {
                    let result = self.handle_start(faces).await;
                    let _ = reply.send(result);
                }
                DeckCommand::Draw { index, reply } => {
                    let result = self.handle_draw(index).await;
                    let _ = reply.send(result);
                }
                DeckCommand::Size { reply } => {
                    let size = self.holder.as_ref().map(|h| h.size()).unwrap_or(0);
                    let _ = reply.send(size);
                }
                DeckCommand::SendAppMessage { payload, reply } => {
                    let result = self.protocol.send_app_message(payload).await;
                    let _ = reply.send(result);
                }
                DeckCommand::Quit { reply } => {
                    self.handle_quit().await;
                    let _ = reply.send(());
                    break;
                }
                DeckCommand::HandleQuit => {
                    self.handle_quit().await;
                    break;
                }
                DeckCommand::HandleStartDeck { deck, prime } => {
                    if let Err(err) = self.handle_start_deck(deck, prime).await {
                        warn!(target: LOG_TARGET, error = %err, "rejecting START_DECK");
                    }
                }
                DeckCommand::HandleEndDeck { deck } => {
                    if let Err(err) = self.handle_end_deck(deck) {
                        warn!(target: LOG_TARGET, error = %err, "rejecting END_DECK");
                    }
                }
                DeckCommand::HandleDecryptCard { index } => {
                    self.handle_decrypt_card(index).await;
                }
                DeckCommand::HandleDecryptedCard { index, value } => {
                    self.handle_decrypted_card(index, value);
                }
                DeckCommand::HandleAppMessage { payload } => {
                    let _ = self.app_tx.send(payload).await;
                }
            }
        }
    }

    async fn handle_start(&mut self, faces: Vec<CardFace>) -> Result<()> {
        if self.state != DeckState::Uninit {
            return Err(PokerError::AlreadyStarted);
        }
        let prime = cipher::random_prime(self.prime_bits)?;
        let key = cipher::generate_key_from_prime(&prime)?;
        let mut holder = CardHolder::new_holder(key.clone(), faces)?;
        let (mine, all_present) = holder.get_all_mine()?;
        if !all_present {
            return Err(PokerError::NotDecryptable);
        }
        let mine: Vec<BigUint> = mine.into_iter().map(|v| v.expect("checked above")).collect();

        self.protocol.send_start_deck(prime, mine).await?;
        self.key = Some(key);
        self.holder = Some(holder);
        self.state = DeckState::Initiating;
        Ok(())
    }

    async fn handle_draw(&mut self, index: u64) -> Result<oneshot::Receiver<Result<CardFace>>> {
        if self.state != DeckState::Ready {
            return Err(PokerError::NotReady);
        }
        let size = self.holder.as_ref().map(|h| h.size()).unwrap_or(0);
        if index >= size {
            return Err(PokerError::OutOfBounds { index, size });
        }
        if self.pending.contains_key(&index) {
            return Err(PokerError::DrawInProgress);
        }
        self.protocol.send_decrypt_card(index).await?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(index, tx);
        Ok(rx)
    }

    async fn handle_start_deck(&mut self, deck: Vec<BigUint>, prime: BigUint) -> Result<()> {
        if self.state != DeckState::Uninit {
            return Err(PokerError::AlreadyStarted);
        }
        let key = cipher::generate_key_from_prime(&prime)?;
        let mut holder = CardHolder::holder_from_encrypted(key.clone(), deck)?;
        self.state = DeckState::Responding;
        let (both, all_present) = holder.get_all_both()?;
        if !all_present {
            return Err(PokerError::NotDecryptable);
        }
        let both: Vec<BigUint> = both.into_iter().map(|v| v.expect("checked above")).collect();

        self.protocol.send_end_deck(both).await?;
        self.key = Some(key);
        self.holder = Some(holder);
        self.state = DeckState::Ready;
        let _ = self.ready_tx.send(true);
        Ok(())
    }

    fn handle_end_deck(&mut self, deck: Vec<BigUint>) -> Result<()> {
        if self.state != DeckState::Initiating {
            return Err(PokerError::InvalidArgument(
                "END_DECK received outside the INITIATING state".into(),
            ));
        }
        let holder = self.holder.as_mut().ok_or(PokerError::NotReady)?;
        holder.set_both_encrypted(deck)?;
        self.state = DeckState::Ready;
        let _ = self.ready_tx.send(true);
        Ok(())
    }

    async fn handle_decrypt_card(&mut self, index: u64) {
        let Some(holder) = self.holder.as_mut() else {
            warn!(target: LOG_TARGET, index, "DECRYPT_CARD before a holder exists");
            return;
        };
        match holder.get_theirs(index) {
            Ok(theirs) => {
                if let Err(err) = self.protocol.send_decrypted_card(index, theirs).await {
                    warn!(target: LOG_TARGET, index, error = %err, "failed to send ONE_CIPHER_CARD");
                }
            }
            Err(err) => {
                warn!(target: LOG_TARGET, index, error = %err, "cannot reveal requested card");
            }
        }
    }

    fn handle_decrypted_card(&mut self, index: u64, value: BigUint) {
        if let Some(holder) = self.holder.as_mut() {
            if let Err(err) = holder.set_mine(index, value) {
                warn!(target: LOG_TARGET, index, error = %err, "ONE_CIPHER_CARD conflicted with a prior value");
            }
        }
        if let Some(waiter) = self.pending.remove(&index) {
            let result = match self.holder.as_mut() {
                Some(holder) => holder.get(index),
                None => Err(PokerError::NotReady),
            };
            let _ = waiter.send(result);
        }
    }

    async fn handle_quit(&mut self) {
        self.state = DeckState::Quit;
        let _ = self.protocol.send_quit().await;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardFace;
    use tokio::io::duplex;

    fn faces(labels: &[&str]) -> Vec<CardFace> {
        labels.iter().map(|s| CardFace::from(*s)).collect()
    }

    /// Tests use a far smaller prime than the spec's 1024-bit default so
    /// the Miller-Rabin safe-prime search doesn't dominate test runtime.
    fn test_config() -> DeckConfig {
        DeckConfig {
            prime_bits: 48,
            ..DeckConfig::default()
        }
    }

    async fn connected_pair() -> (Deck, Deck) {
        let (a, b) = duplex(1 << 20);
        let (_tx_a, rx_a) = watch::channel(false);
        let (_tx_b, rx_b) = watch::channel(false);
        (
            Deck::with_config(Box::new(a), rx_a, test_config()),
            Deck::with_config(Box::new(b), rx_b, test_config()),
        )
    }

    #[tokio::test]
    async fn full_handshake_and_draw_round_trip() {
        let (initiator, responder) = connected_pair().await;

        let local_faces = faces(&["2C", "3C", "4C", "5C"]);
        // The responder never calls `start`; it reacts to the incoming
        // START_DECK automatically through its request-serializer task.
        initiator.start(local_faces.clone()).await.unwrap();

        assert_eq!(initiator.size().await.unwrap(), 4);
        assert_eq!(responder.size().await.unwrap(), 4);

        let mut revealed = Vec::new();
        for i in 0..4u64 {
            revealed.push(initiator.draw(i).await.unwrap());
        }
        let mut expected = local_faces;
        expected.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        let mut got = revealed;
        got.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn repeated_draws_of_the_same_index_agree() {
        let (initiator, _responder) = connected_pair().await;
        initiator.start(faces(&["2C", "3C", "4C", "5C"])).await.unwrap();

        let first = initiator.draw(0).await.unwrap();
        let second = initiator.draw(0).await.unwrap();
        let third = initiator.draw(0).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn draw_before_start_is_not_ready() {
        let (initiator, _responder) = connected_pair().await;
        assert!(matches!(initiator.draw(0).await, Err(PokerError::NotReady)));
    }

    #[tokio::test]
    async fn out_of_bounds_draw_is_reported() {
        let (initiator, _responder) = connected_pair().await;
        initiator.start(faces(&["AS", "KS"])).await.unwrap();
        assert!(matches!(
            initiator.draw(99).await,
            Err(PokerError::OutOfBounds { index: 99, size: 2 })
        ));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (initiator, _responder) = connected_pair().await;
        initiator.start(faces(&["AS", "KS"])).await.unwrap();
        assert!(matches!(
            initiator.start(faces(&["QS"])).await,
            Err(PokerError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn app_messages_arrive_in_order() {
        let (a, b) = connected_pair().await;
        a.send(b"first".to_vec()).await.unwrap();
        a.send(b"second".to_vec()).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), b"first".to_vec());
        assert_eq!(b.receive().await.unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn receive_stream_yields_messages_in_order_and_ends_on_quit() {
        use futures::StreamExt;

        let (a, b) = connected_pair().await;
        a.send(b"one".to_vec()).await.unwrap();
        a.send(b"two".to_vec()).await.unwrap();

        let mut stream = Box::pin(b.receive_stream());
        assert_eq!(stream.next().await, Some(b"one".to_vec()));
        assert_eq!(stream.next().await, Some(b"two".to_vec()));

        a.quit().await.unwrap();
        b.quit().await.unwrap();
        assert_eq!(stream.next().await, None);
    }
}
