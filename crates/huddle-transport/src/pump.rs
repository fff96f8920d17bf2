//! Connection pumps.
//!
//! Every session runs two loops. The outbound pump drains the client's queue
//! into the socket and keeps the peer alive with pings; the inbound pump
//! reads client frames and hands them to the hub. [`Session`] wires the two
//! together with the hub for the lifetime of one connection.

use crate::traits::{FrameReader, FrameWriter, Inbound, TransportError};
use bytes::Bytes;
use huddle_core::{Client, HubHandle, Message};
use huddle_protocol::codec;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Heartbeat, deadline, and queue settings for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpSettings {
    /// How long to wait for any frame from the peer.
    pub pong_wait: Duration,
    /// How often to ping the peer. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Deadline for a single write.
    pub write_wait: Duration,
    /// Capacity of the outbound queue, in frames.
    pub outbound_capacity: usize,
    /// Number of history messages replayed on join.
    pub history_limit: usize,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self::with_pong_wait(Duration::from_secs(60))
    }
}

impl PumpSettings {
    /// Default settings with the given peer timeout; pings go out at 9/10 of it.
    #[must_use]
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            outbound_capacity: 256,
            history_limit: 50,
        }
    }
}

/// Frame counters for one session.
#[derive(Debug, Default)]
pub struct PumpCounters {
    received: AtomicU64,
    sent: AtomicU64,
    malformed: AtomicU64,
}

impl PumpCounters {
    /// Take a snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// What happened over the life of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Chat messages accepted from the client.
    pub received: u64,
    /// Frames written to the client (history included).
    pub sent: u64,
    /// Client frames skipped because they did not decode.
    pub malformed: u64,
}

async fn write_within<F>(deadline: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    timeout(deadline, write)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Write queued frames to the connection until the queue is closed.
///
/// Sends a ping every `ping_period`. When the queue is closed and drained a
/// close frame is written and the pump returns.
///
/// # Errors
///
/// Returns an error if any write fails or misses its deadline.
pub async fn outbound_pump<W: FrameWriter>(
    mut writer: W,
    mut queue: mpsc::Receiver<Bytes>,
    settings: PumpSettings,
    counters: &PumpCounters,
) -> Result<(), TransportError> {
    let mut heartbeat = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => {
                    write_within(settings.write_wait, writer.send_text(frame)).await?;
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    trace!("Outbound queue closed");
                    return write_within(settings.write_wait, writer.close()).await;
                }
            },
            _ = heartbeat.tick() => {
                trace!("Sending ping");
                write_within(settings.write_wait, writer.send_ping()).await?;
            }
        }
    }
}

/// Read client frames and broadcast them to the connection's room.
///
/// Every read is bounded by `pong_wait`, so any frame from the peer
/// (pongs included) keeps the connection alive. Frames that do not decode
/// are skipped.
///
/// # Errors
///
/// Returns an error on read failure, read timeout, or if the hub is gone.
/// A close frame or the end of the stream returns `Ok`.
pub async fn inbound_pump<R: FrameReader + ?Sized>(
    reader: &mut R,
    hub: &HubHandle,
    room: &str,
    username: &str,
    settings: &PumpSettings,
    counters: &PumpCounters,
) -> Result<(), TransportError> {
    loop {
        let next = timeout(settings.pong_wait, reader.recv())
            .await
            .map_err(|_| TransportError::Timeout)??;

        match next {
            None | Some(Inbound::Close) => return Ok(()),
            Some(Inbound::Ping | Inbound::Pong) => trace!("Peer is alive"),
            Some(Inbound::Data(data)) => match codec::decode_client(&data) {
                Ok(frame) => {
                    counters.received.fetch_add(1, Ordering::Relaxed);
                    hub.broadcast(frame.into_message(room, username)).await?;
                }
                Err(e) => {
                    counters.malformed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        room = %room,
                        username = %username,
                        error = %e,
                        "Skipping malformed frame"
                    );
                }
            },
        }
    }
}

/// One client connection joined to a room.
#[derive(Debug)]
pub struct Session {
    hub: HubHandle,
    room: String,
    username: String,
    settings: PumpSettings,
}

impl Session {
    /// Create a session for an already validated room and username.
    #[must_use]
    pub fn new(
        hub: HubHandle,
        room: impl Into<String>,
        username: impl Into<String>,
        settings: PumpSettings,
    ) -> Self {
        Self {
            hub,
            room: room.into(),
            username: username.into(),
            settings,
        }
    }

    /// Run the session until either side of the connection ends.
    ///
    /// Replays room history, starts the outbound pump, registers with the hub
    /// and announces the join, then pumps frames in both directions. History
    /// never takes the last queue slot, so the join notice always fits. On
    /// the way out the client is unregistered, the outbound queue is drained
    /// and closed, and the leave is announced.
    pub async fn run<R, W>(self, mut reader: R, writer: W) -> SessionStats
    where
        R: FrameReader,
        W: FrameWriter + 'static,
    {
        let Self {
            hub,
            room,
            username,
            settings,
        } = self;
        let counters = Arc::new(PumpCounters::default());

        let (client, queue) =
            Client::new(room.as_str(), username.as_str(), settings.outbound_capacity);
        let id = client.id();

        // Leave room in the queue for the join notice.
        let replay_limit = settings
            .history_limit
            .min(settings.outbound_capacity.saturating_sub(1));
        let history = hub.history(&room, replay_limit).await;
        let mut replayed = 0usize;
        for message in &history {
            let frame = match codec::encode(message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(room = %room, error = %e, "Skipping history message");
                    continue;
                }
            };
            if client.try_deliver(frame).is_err() {
                debug!(room = %room, client = id, "Outbound queue full, history truncated");
                break;
            }
            replayed += 1;
        }

        let mut outbound = tokio::spawn({
            let counters = Arc::clone(&counters);
            async move { outbound_pump(writer, queue, settings, &counters).await }
        });

        if let Err(e) = hub.register(client).await {
            warn!(room = %room, client = id, error = %e, "Failed to register client");
            outbound.abort();
            return counters.snapshot();
        }
        if let Err(e) = hub
            .broadcast(Message::join(room.as_str(), username.as_str()))
            .await
        {
            warn!(room = %room, client = id, error = %e, "Failed to announce join");
        }
        info!(
            room = %room,
            client = id,
            username = %username,
            history = replayed,
            "Session started"
        );

        let outbound_finished = tokio::select! {
            result = inbound_pump(&mut reader, &hub, &room, &username, &settings, &counters) => {
                if let Err(e) = result {
                    debug!(room = %room, client = id, error = %e, "Inbound pump stopped");
                }
                false
            }
            result = &mut outbound => {
                match result {
                    Ok(Ok(())) => {
                        debug!(room = %room, client = id, "Outbound queue closed by hub");
                    }
                    Ok(Err(e)) => {
                        debug!(room = %room, client = id, error = %e, "Outbound pump stopped");
                    }
                    Err(e) => {
                        warn!(room = %room, client = id, error = %e, "Outbound pump panicked");
                    }
                }
                true
            }
        };

        if let Err(e) = hub.unregister(id, room.as_str()).await {
            warn!(room = %room, client = id, error = %e, "Failed to unregister client");
        }

        if !outbound_finished {
            match timeout(settings.write_wait, &mut outbound).await {
                Ok(Ok(Err(e))) => {
                    debug!(room = %room, client = id, error = %e, "Failed to close connection");
                }
                Ok(_) => {}
                Err(_) => {
                    debug!(room = %room, client = id, "Outbound drain timed out");
                    outbound.abort();
                }
            }
        }

        if let Err(e) = hub
            .broadcast(Message::leave(room.as_str(), username.as_str()))
            .await
        {
            warn!(room = %room, client = id, error = %e, "Failed to announce leave");
        }

        let stats = counters.snapshot();
        info!(
            room = %room,
            client = id,
            username = %username,
            received = stats.received,
            sent = stats.sent,
            "Session ended"
        );
        stats
    }
}
