use std::pin::Pin;

use anyhow::Context;
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    future, Sink, SinkExt, Stream, StreamExt,
};
use tokio_tungstenite::tungstenite::Message;

use super::protocol::Inbound;

type BoxSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
type BoxStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// A bidirectional text message channel.
pub struct Transport {
    pub(super) sink: BoxSink,
    pub(super) stream: BoxStream,
}

impl Transport {
    pub fn new<S, St>(sink: S, stream: St) -> Self
    where
        S: Sink<String, Error = anyhow::Error> + Send + 'static,
        St: Stream<Item = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Opens a WebSocket connection to `url`.
    pub async fn websocket(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        log::debug!("connected to {url}");

        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(anyhow::Error::from)
            .with(|text: String| future::ready(Ok::<_, anyhow::Error>(Message::Text(text))));
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });
        Ok(Self::new(sink, stream))
    }
}

/// The service side of an [`in_memory`] transport.
pub struct MemoryPeer {
    outgoing: UnboundedReceiver<String>,
    incoming: UnboundedSender<anyhow::Result<String>>,
}

impl MemoryPeer {
    /// Delivers a raw text message to the client.
    pub fn send_text<T: Into<String>>(&self, text: T) -> anyhow::Result<()> {
        self.incoming
            .unbounded_send(Ok(text.into()))
            .context("client transport is gone")
    }

    /// Makes the client's inbound stream fail, as a broken connection would.
    pub fn fail(&self, reason: &str) -> anyhow::Result<()> {
        self.incoming
            .unbounded_send(Err(anyhow::anyhow!("{reason}")))
            .context("client transport is gone")
    }

    /// Receives the next message the client sent, or [`None`] once the client closed the
    /// transport.
    pub async fn recv(&mut self) -> Option<String> {
        self.outgoing.next().await
    }

    /// Returns every message the client sent so far without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outgoing.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Ends the client's inbound stream, as a peer closing the connection would.
    pub fn hang_up(&self) {
        self.incoming.close_channel();
    }
}

/// Creates a transport connected to an in-process [`MemoryPeer`].
pub fn in_memory() -> (Transport, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded();
    let (in_tx, in_rx) = mpsc::unbounded();
    let transport = Transport::new(out_tx.sink_map_err(anyhow::Error::from), in_rx);
    let peer = MemoryPeer {
        outgoing: out_rx,
        incoming: in_tx,
    };
    (transport, peer)
}

/// Logs inbound messages the client does not understand. Used by the actor.
pub(super) fn parse(text: &str) -> Option<Inbound> {
    let msg = Inbound::parse(text)?;
    if msg == Inbound::Unknown {
        log::debug!("ignoring unknown message: {text}");
    }
    Some(msg)
}
