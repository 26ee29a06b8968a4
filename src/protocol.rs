//! The peer-to-peer protocol engine: a reader task that decodes frames off
//! the wire, a dispatcher task that invokes handler callbacks, and send
//! helpers that serialize writes behind a single-writer lock (spec.md §4.5).

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use num_bigint::BigUint;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{instrument, warn};

use crate::error::Result;
use crate::wire::{Message, MessageCodec, MessageType};

const LOG_TARGET: &str = "mental_poker::protocol";

/// An owned, boxable bidirectional stream (a TCP socket, an in-memory
/// duplex pipe for tests, anything `AsyncRead + AsyncWrite`).
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncDuplex for T {}

type FramedDuplex = Framed<Box<dyn AsyncDuplex>, MessageCodec>;
type DuplexSink = SplitSink<FramedDuplex, Message>;

/// Callbacks invoked by the dispatcher task as frames arrive, in
/// wire-arrival order. Implementations should not block for long —
/// `handle_app_message` blocking on a slow consumer is the one
/// intentional exception (backpressure, per spec.md §4.6).
#[async_trait]
pub trait ProtocolHandler: Send + Sync + 'static {
    async fn handle_quit(&self);
    async fn handle_start_deck(&self, deck: Vec<BigUint>, prime: BigUint);
    async fn handle_end_deck(&self, deck: Vec<BigUint>);
    async fn handle_decrypt_card(&self, index: u64);
    async fn handle_decrypted_card(&self, index: u64, value: BigUint);
    async fn handle_app_message(&self, payload: Vec<u8>);
}

/// Agent implementing the send and receive sides of the deck protocol
/// over one connection. Construction spawns the reader and dispatcher
/// tasks; signal the `shutdown` channel passed to [`Protocol::new`] to
/// stop them, then call [`Protocol::join`].
pub struct Protocol {
    write: Arc<Mutex<DuplexSink>>,
    reader_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl Protocol {
    /// Creates a `Protocol` over `conn`, dispatching decoded frames to
    /// `handler` until EOF or until `shutdown` fires.
    pub fn new(
        conn: Box<dyn AsyncDuplex>,
        handler: Arc<dyn ProtocolHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let framed = Framed::new(conn, MessageCodec::default());
        let (sink, mut stream) = framed.split();
        let write = Arc::new(Mutex::new(sink));

        let (tx, mut rx) = mpsc::channel::<Message>(256);

        let reader_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(message)) => {
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                warn!(target: LOG_TARGET, error = %err, "dropping malformed frame");
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        let dispatcher_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                dispatch(&handler, message).await;
            }
        });

        Protocol {
            write,
            reader_task,
            dispatcher_task,
        }
    }

    pub async fn send_quit(&self) -> Result<()> {
        self.send(Message::quit()).await
    }

    pub async fn send_start_deck(&self, prime: BigUint, mine: Vec<BigUint>) -> Result<()> {
        self.send(Message::start_deck(prime, mine)).await
    }

    pub async fn send_end_deck(&self, both: Vec<BigUint>) -> Result<()> {
        self.send(Message::end_deck(both)).await
    }

    pub async fn send_decrypt_card(&self, index: u64) -> Result<()> {
        self.send(Message::decrypt_card(index)).await
    }

    pub async fn send_decrypted_card(&self, index: u64, value: BigUint) -> Result<()> {
        self.send(Message::one_cipher_card(index, value)).await
    }

    pub async fn send_app_message(&self, payload: Vec<u8>) -> Result<()> {
        self.send(Message::app_message(payload)).await
    }

    #[instrument(skip(self, message), target = LOG_TARGET)]
    async fn send(&self, message: Message) -> Result<()> {
        let mut sink = self.write.lock().await;
        sink.send(message).await
    }

    /// Waits for both background tasks to exit (used by tests and by
    /// `Deck::quit` to join cleanly).
    pub async fn join(self) {
        let _ = self.reader_task.await;
        let _ = self.dispatcher_task.await;
    }
}

async fn dispatch(handler: &Arc<dyn ProtocolHandler>, message: Message) {
    match message.kind {
        MessageType::Quit => handler.handle_quit().await,
        MessageType::StartDeck => {
            let prime = message.value.unwrap_or_default();
            handler.handle_start_deck(message.deck, prime).await
        }
        MessageType::EndDeck => handler.handle_end_deck(message.deck).await,
        MessageType::DecryptCard => handler.handle_decrypt_card(message.index).await,
        MessageType::OneCipherCard => {
            if let Some(value) = message.value {
                handler.handle_decrypted_card(message.index, value).await
            } else {
                warn!(target: LOG_TARGET, "ONE_CIPHER_CARD with no value, dropping");
            }
        }
        MessageType::AppMessage => handler.handle_app_message(message.payload).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::duplex;

    struct RecordingHandler {
        last_decrypt_card: AtomicU64,
        quits: AtomicU64,
    }

    #[async_trait]
    impl ProtocolHandler for RecordingHandler {
        async fn handle_quit(&self) {
            self.quits.fetch_add(1, Ordering::SeqCst);
        }
        async fn handle_start_deck(&self, _deck: Vec<BigUint>, _prime: BigUint) {}
        async fn handle_end_deck(&self, _deck: Vec<BigUint>) {}
        async fn handle_decrypt_card(&self, index: u64) {
            self.last_decrypt_card.store(index, Ordering::SeqCst);
        }
        async fn handle_decrypted_card(&self, _index: u64, _value: BigUint) {}
        async fn handle_app_message(&self, _payload: Vec<u8>) {}
    }

    #[tokio::test]
    async fn decrypt_card_round_trips_over_a_duplex_stream() {
        let (a, b) = duplex(4096);
        let (_tx_a, rx_a) = watch::channel(false);
        let (_tx_b, rx_b) = watch::channel(false);

        let handler_a = Arc::new(RecordingHandler {
            last_decrypt_card: AtomicU64::new(u64::MAX),
            quits: AtomicU64::new(0),
        });
        let handler_b = Arc::new(RecordingHandler {
            last_decrypt_card: AtomicU64::new(u64::MAX),
            quits: AtomicU64::new(0),
        });

        let proto_a = Protocol::new(Box::new(a), handler_a.clone(), rx_a);
        let proto_b = Protocol::new(Box::new(b), handler_b.clone(), rx_b);

        proto_a.send_decrypt_card(3).await.unwrap();

        // give the async tasks a chance to run
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(handler_b.last_decrypt_card.load(Ordering::SeqCst), 3);
        drop(proto_a);
        drop(proto_b);
    }
}
