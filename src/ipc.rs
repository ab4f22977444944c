//! Channel to the orchestrator.
//!
//! Inbound coordination messages arrive on a single bounded
//! `mpsc::Receiver`, consumed by exactly one task so arrival order is
//! processing order. Outbound messages go through an [`OrchestratorLink`].
//! [`stdio`] wires both to newline-delimited JSON on stdin/stdout.

use crate::error::Error;
use crate::message::{CoordinationMessage, OutboundMessage};
use crate::shard::ShardTag;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

/// How long a flush waits for the writer before giving up
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub(crate) enum Outbound {
    Message(OutboundMessage),
    Flush(oneshot::Sender<()>),
}

/// Sending half of the orchestrator channel.
///
/// A detached link (process not under an orchestrator) accepts and discards
/// everything.
#[derive(Debug, Clone)]
pub struct OrchestratorLink {
    tx: Option<mpsc::UnboundedSender<Outbound>>,
}

impl OrchestratorLink {
    /// Create a link and the receiver a transport drains
    pub fn channel() -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, OutboundReceiver { rx })
    }

    /// A link that goes nowhere
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a message for the orchestrator. Never blocks.
    pub fn send(&self, message: OutboundMessage) -> Result<(), Error> {
        match &self.tx {
            Some(tx) => tx
                .send(Outbound::Message(message))
                .map_err(|_| Error::ChannelClosed),
            None => Ok(()),
        }
    }

    /// Wait until everything queued so far has been written out.
    pub async fn flush(&self) -> Result<(), Error> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(Outbound::Flush(ack_tx))
            .map_err(|_| Error::ChannelClosed)?;
        match timeout(FLUSH_TIMEOUT, ack_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => Err(Error::Handler("flush timed out".to_string())),
        }
    }
}

/// Receiving half of an [`OrchestratorLink`]
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl OutboundReceiver {
    /// Next message, acknowledging any flush requests on the way
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        loop {
            match self.rx.recv().await? {
                Outbound::Message(message) => return Some(message),
                Outbound::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    /// Drain whatever is queued right now without waiting
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(outbound) = self.rx.try_recv() {
            match outbound {
                Outbound::Message(message) => messages.push(message),
                Outbound::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        messages
    }

    pub(crate) async fn recv_raw(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }
}

/// Connect the runtime to the orchestrator over stdin/stdout.
///
/// Returns the inbound receiver to hand to the runtime, the outbound link,
/// and the reader/writer tasks.
pub fn stdio(
    buffer: usize,
    tag: ShardTag,
) -> (
    mpsc::Receiver<CoordinationMessage>,
    OrchestratorLink,
    JoinHandle<Result<(), Error>>,
    JoinHandle<Result<(), Error>>,
) {
    let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
    let (link, outbound_rx) = OrchestratorLink::channel();
    let reader = spawn_reader(tokio::io::stdin(), inbound_tx, tag);
    let writer = spawn_writer(tokio::io::stdout(), outbound_rx);
    (inbound_rx, link, reader, writer)
}

/// Decode newline-delimited JSON messages from `reader` into `tx`.
///
/// Lines that fail to decode are logged and skipped. Ends on EOF or when the
/// receiver is dropped; dropping `tx` closes the inbound channel.
pub fn spawn_reader<R>(
    reader: R,
    tx: mpsc::Sender<CoordinationMessage>,
    tag: ShardTag,
) -> JoinHandle<Result<(), Error>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message = match serde_json::from_str::<CoordinationMessage>(line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("{}Skipping undecodable coordination message: {}", tag, e);
                    continue;
                }
            };
            trace!("{}Received {}", tag, message.kind());
            if tx.send(message).await.is_err() {
                debug!("{}Inbound receiver dropped, stopping reader", tag);
                break;
            }
        }
        debug!("{}Coordination input closed", tag);
        Ok(())
    })
}

/// Encode outbound messages as newline-delimited JSON onto `writer`
pub fn spawn_writer<W>(writer: W, mut rx: OutboundReceiver) -> JoinHandle<Result<(), Error>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(outbound) = rx.recv_raw().await {
            match outbound {
                Outbound::Message(message) => {
                    let mut line = serde_json::to_vec(&message)?;
                    line.push(b'\n');
                    writer.write_all(&line).await?;
                }
                Outbound::Flush(ack) => {
                    writer.flush().await?;
                    let _ = ack.send(());
                }
            }
        }
        writer.flush().await?;
        Ok(())
    })
}
