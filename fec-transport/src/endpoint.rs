//! UDP endpoint: socket lifecycle, the receive/bundle/deliver pipeline, and
//! outbound sends.
//!
//! ```text
//!  socket ──recv_from──▶ receive task ──fragments──▶ bundler task
//!                                                         │
//!                             handler ◀── delivery task ◀─┘ messages
//! ```
//!
//! The queues between tasks are bounded. The receive task never waits on the
//! bundler: when the fragment queue is full the fragment is dropped and
//! counted, exactly as if the network had lost it.

use {
    crate::{
        bundler::Bundler,
        config::TransportConfig,
        erasure::ErasureCodec,
        error::{Result, TransportError},
        fragment::{Fragment, SenderId},
        message::{Message, MessageHandler},
    },
    log::{debug, info, trace, warn},
    parking_lot::{Mutex, RwLock},
    std::{fmt, net::SocketAddr, sync::Arc, time::Duration},
    tokio::{
        net::{lookup_host, ToSocketAddrs, UdpSocket},
        sync::mpsc::{self, error::TrySendError},
        task::JoinHandle,
        time::{timeout_at, Instant},
    },
    tokio_util::sync::CancellationToken,
    trv1_monitoring::TransportMetrics,
};

/// A bound transport endpoint.
///
/// Sends erasure-coded messages to any destination and delivers every message
/// it reassembles to the handler given to [`Endpoint::start`].
pub struct Endpoint {
    /// Taken by `stop`, closing the socket once the receive task lets go.
    socket: RwLock<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    sender_id: SenderId,
    codec: Arc<ErasureCodec>,
    max_message_size: usize,
    shutdown_grace: Duration,
    metrics: Arc<TransportMetrics>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Endpoint {
    /// Bind the socket and spawn the receive, bundler and delivery tasks.
    ///
    /// `handler` runs once per message, in completion order, on tokio's
    /// blocking pool. Calls do not overlap; messages queue up behind a slow
    /// handler while the socket keeps being read.
    pub async fn start(
        config: TransportConfig,
        handler: MessageHandler,
        metrics: Arc<TransportMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let codec = Arc::new(ErasureCodec::new(
            config.required_shards,
            config.total_shards,
        )?);

        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let sender_id = stamped_sender_id(config.sender_id, local_addr);
        info!(
            "{}: transport listening as {}, {} of {} shards, {:?} latency budget",
            local_addr,
            sender_id,
            config.required_shards,
            config.total_shards,
            config.latency_budget()
        );

        let cancel = CancellationToken::new();
        let (fragment_tx, fragment_rx) = mpsc::channel(config.channel_buffer_size);
        let (message_tx, message_rx) = mpsc::channel(config.channel_buffer_size);
        let label = local_addr.to_string();

        let receiver = tokio::spawn(receive_loop(
            label.clone(),
            socket.clone(),
            config.buffer_size,
            fragment_tx,
            metrics.clone(),
            cancel.clone(),
        ));
        let bundler = Bundler::new(label.clone(), codec.clone(), &config, metrics.clone());
        let bundler = tokio::spawn(bundler.run(
            fragment_rx,
            message_tx,
            config.eviction_interval(),
            cancel.clone(),
        ));
        let delivery = tokio::spawn(delivery_loop(
            label,
            message_rx,
            handler,
            metrics.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            socket: RwLock::new(Some(socket)),
            local_addr,
            sender_id,
            codec,
            max_message_size: config.max_message_size,
            shutdown_grace: config.shutdown_grace(),
            metrics,
            cancel,
            tasks: Mutex::new(vec![receiver, bundler, delivery]),
        })
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The identity stamped into outgoing fragments.
    pub fn sender_id(&self) -> SenderId {
        self.sender_id
    }

    pub fn metrics(&self) -> &Arc<TransportMetrics> {
        &self.metrics
    }

    /// Erasure-code `payload` and send one datagram per shard to
    /// `destination`. Returns the logical id the message was sent under.
    ///
    /// Succeeds once at least `required_shards` datagrams were handed to the
    /// socket; delivery is not acknowledged.
    pub async fn send(&self, payload: &[u8], destination: impl ToSocketAddrs) -> Result<u32> {
        let Some(socket) = self.socket.read().clone() else {
            return Err(TransportError::Stopped);
        };
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        if payload.len() > self.max_message_size {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }

        let destination = self.resolve(destination).await?;
        let shards = self.codec.encode_payload(payload)?;
        let logical_id: u32 = rand::random();
        let total = shards.len();
        let required = self.codec.required();

        let mut failed = 0usize;
        for (index, shard) in shards.into_iter().enumerate() {
            let fragment = Fragment {
                sender: self.sender_id,
                logical_id,
                // total shards never exceed 256
                index: index as u8,
                shard,
            };
            match socket.send_to(&fragment.to_datagram(), destination).await {
                Ok(_) => self.metrics.datagrams_sent.inc(),
                Err(err) => {
                    debug!(
                        "{}: shard {} of {:#010x} to {} failed: {}",
                        self.local_addr, index, logical_id, destination, err
                    );
                    failed += 1;
                    self.metrics.send_failures.inc();
                }
            }
        }

        if total - failed < required {
            warn!(
                "{}: message {:#010x} to {} unrecoverable, {} of {} shards failed",
                self.local_addr, logical_id, destination, failed, total
            );
            return Err(TransportError::SendFailed {
                failed,
                total,
                required,
            });
        }
        trace!(
            "{}: sent {} bytes as {:#010x} to {}",
            self.local_addr,
            payload.len(),
            logical_id,
            destination
        );
        self.metrics.messages_sent.inc();
        Ok(logical_id)
    }

    /// First resolved address in the socket's address family.
    async fn resolve(&self, destination: impl ToSocketAddrs) -> Result<SocketAddr> {
        let want_ipv4 = self.local_addr.is_ipv4();
        lookup_host(destination)
            .await
            .map_err(|err| TransportError::Resolve(err.to_string()))?
            .find(|addr| addr.is_ipv4() == want_ipv4)
            .ok_or_else(|| {
                TransportError::Resolve(format!(
                    "no {} address for destination",
                    if want_ipv4 { "IPv4" } else { "IPv6" }
                ))
            })
    }

    /// Stop all tasks, waiting up to the shutdown grace period before
    /// aborting them, and release the socket. Partially received messages
    /// are discarded and no handler call starts after this returns. Later
    /// sends fail with [`TransportError::Stopped`].
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.socket.write().take();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        let deadline = Instant::now() + self.shutdown_grace;
        for mut task in tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                warn!(
                    "{}: task still running after {:?}, aborting",
                    self.local_addr, self.shutdown_grace
                );
                task.abort();
            }
        }
        info!("{}: transport stopped", self.local_addr);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_addr", &self.local_addr)
            .field("sender_id", &self.sender_id)
            .field("codec", &self.codec)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The configured sender id, or one derived from the bound address.
fn stamped_sender_id(configured: Option<SenderId>, local_addr: SocketAddr) -> SenderId {
    if let Some(sender_id) = configured {
        return sender_id;
    }
    if local_addr.ip().is_unspecified() {
        warn!(
            "{}: no sender id configured, stamping the unspecified address",
            local_addr
        );
    }
    SenderId::from(local_addr)
}

async fn receive_loop(
    label: String,
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    fragments: mpsc::Sender<Fragment>,
    metrics: Arc<TransportMetrics>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let (len, from) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(err) => {
                    warn!("{}: read error: {}", label, err);
                    metrics.read_errors.inc();
                    continue;
                }
            },
        };
        metrics.datagrams_received.inc();

        let fragment = match Fragment::from_datagram(&buf[..len]) {
            Ok(fragment) => fragment,
            Err(TransportError::ChecksumMismatch) => {
                trace!("{}: bad checksum on {} bytes from {}", label, len, from);
                metrics.checksum_failures.inc();
                continue;
            }
            Err(err) => {
                debug!("{}: dropping datagram from {}: {}", label, from, err);
                metrics.malformed_fragments.inc();
                continue;
            }
        };

        match fragments.try_send(fragment) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!("{}: fragment queue full, dropping", label);
                metrics.fragments_dropped.inc();
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
    debug!("{}: receive loop exited", label);
}

async fn delivery_loop(
    label: String,
    mut messages: mpsc::Receiver<Message>,
    handler: MessageHandler,
    metrics: Arc<TransportMetrics>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        trace!(
            "{}: delivering {:#010x} from {}",
            label,
            message.logical_id,
            message.sender
        );
        let handler = handler.clone();
        match tokio::task::spawn_blocking(move || handler(message)).await {
            Ok(()) => metrics.messages_delivered.inc(),
            Err(err) => warn!("{}: message handler failed: {}", label, err),
        }
    }
    debug!("{}: delivery loop exited", label);
}
