// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stream multiplexing: one background worker per websocket connection.
//!
//! The worker is the only reader of its socket. It decodes binary frames into
//! envelopes and hands them to the caller through a bounded channel; the send
//! suspends while the channel is full, so a slow caller slows the reads down.
//! Malformed frames are dropped and counted. Server pings are answered by
//! tungstenite itself and a client ping is sent every keep-alive interval.
//!
//! When the worker stops (caller close, server close, receiver gone or read
//! failure) it closes the output channel and then the websocket, and reports
//! why through [`StreamEnd`]. Dropping the [`EnvelopeStream`] counts as the
//! receiver going away, even while the connection is idle.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dropsonde_events::{decode_frame, Envelope};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::TrafficSocket;
use crate::error::ConsumerError;
use crate::telemetry::FrameCounters;

/// Why a stream stopped producing envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The caller closed the stream.
    Closed,
    /// The server closed the connection or the socket reached EOF.
    Finished,
    /// Every receiver of the output channel went away.
    ReceiverDropped,
    /// Reading (or pinging) failed after the stream was established.
    Failed(ConsumerError),
}

impl StreamEnd {
    /// The error carried by [`StreamEnd::Failed`], if any.
    pub fn error(&self) -> Option<&ConsumerError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Cloneable handle that stops a stream.
///
/// Closing is idempotent and may race with an in-flight read or send.
#[derive(Debug, Clone, Default)]
pub struct StreamCloser {
    token: CancellationToken,
}

impl StreamCloser {
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Receiving side of a live stream.
///
/// Envelopes arrive in the order the server sent them. Once [`recv`] returns
/// `None`, [`finish`] reports the termination cause.
///
/// [`recv`]: EnvelopeStream::recv
/// [`finish`]: EnvelopeStream::finish
#[derive(Debug)]
pub struct EnvelopeStream {
    receiver: mpsc::Receiver<Envelope>,
    closer: StreamCloser,
    worker: JoinHandle<StreamEnd>,
    capacity: usize,
}

impl EnvelopeStream {
    /// Starts the worker for an established socket.
    pub(crate) fn spawn(
        socket: TrafficSocket,
        keep_alive: Duration,
        capacity: usize,
        counters: Arc<FrameCounters>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let closer = StreamCloser::default();
        let worker = tokio::spawn(run_worker(
            socket,
            sender,
            closer.token.clone(),
            keep_alive,
            counters,
        ));
        Self::from_parts(receiver, closer, worker, capacity)
    }

    pub(crate) fn from_parts(
        receiver: mpsc::Receiver<Envelope>,
        closer: StreamCloser,
        worker: JoinHandle<StreamEnd>,
        capacity: usize,
    ) -> Self {
        Self {
            receiver,
            closer,
            worker,
            capacity,
        }
    }

    /// Waits for the next envelope; `None` once the stream has terminated.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Stops the stream. Buffered envelopes may still be received.
    pub fn close(&self) {
        self.closer.close();
    }

    /// Returns a handle that can stop the stream from another task.
    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    /// Waits for the worker to stop and returns why it stopped.
    ///
    /// Envelopes not yet received are discarded; a worker that is still
    /// running therefore ends with [`StreamEnd::ReceiverDropped`].
    pub async fn finish(self) -> StreamEnd {
        let Self {
            receiver, worker, ..
        } = self;
        drop(receiver);
        join_worker(worker).await
    }

    /// Receives everything until the stream terminates.
    pub async fn drain(mut self) -> (Vec<Envelope>, StreamEnd) {
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.receiver.recv().await {
            envelopes.push(envelope);
        }
        let end = self.finish().await;
        (envelopes, end)
    }

    /// Derived view yielding only log message envelopes, in order.
    ///
    /// The view closes exactly when this stream closes and reports the same
    /// [`StreamEnd`]. Closing the view closes the underlying stream.
    pub fn logs_only(self) -> EnvelopeStream {
        let Self {
            mut receiver,
            closer,
            worker,
            capacity,
        } = self;
        let (sender, filtered) = mpsc::channel(capacity);
        let forwarder = tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = sender.closed() => break,
                    next = receiver.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                if !envelope.is_log_message() {
                    continue;
                }
                if sender.send(envelope).await.is_err() {
                    break;
                }
            }
            drop(sender);
            drop(receiver);
            join_worker(worker).await
        });
        Self::from_parts(filtered, closer, forwarder, capacity)
    }
}

impl Stream for EnvelopeStream {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

async fn join_worker(worker: JoinHandle<StreamEnd>) -> StreamEnd {
    match worker.await {
        Ok(end) => end,
        Err(err) => StreamEnd::Failed(ConsumerError::Transport(format!(
            "stream worker stopped unexpectedly: {err}"
        ))),
    }
}

/// Reads frames until the stream terminates, then closes the channel and the socket.
async fn run_worker(
    mut socket: TrafficSocket,
    sender: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    keep_alive: Duration,
    counters: Arc<FrameCounters>,
) -> StreamEnd {
    let mut ticker = interval_at(Instant::now() + keep_alive, keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break StreamEnd::Closed,
            _ = sender.closed() => break StreamEnd::ReceiverDropped,
            _ = ticker.tick() => {
                if let Err(err) = socket.send(WsMessage::Ping(Vec::new())).await {
                    break StreamEnd::Failed(ConsumerError::Transport(err.to_string()));
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Binary(bytes))) => match decode_frame(&bytes) {
                    Ok(envelope) => {
                        counters.record_decoded();
                        tokio::select! {
                            _ = shutdown.cancelled() => break StreamEnd::Closed,
                            sent = sender.send(envelope) => {
                                if sent.is_err() {
                                    break StreamEnd::ReceiverDropped;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        counters.record_dropped();
                        debug!(error = %err, len = bytes.len(), "dropping malformed frame");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => break StreamEnd::Finished,
                // Pings are queued for a pong by tungstenite; text, pong and
                // raw frames carry no envelopes.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    break StreamEnd::Failed(ConsumerError::Transport(err.to_string()));
                }
            }
        }
    };

    drop(sender);
    if let Err(err) = socket.close(None).await {
        debug!(error = %err, "websocket already closed");
    }
    debug!(?end, "stream worker stopped");
    end
}
