//! Client facade.
//!
//! A [`Client`] owns at most one [`Connection`] at a time and drives
//! it through its lifecycle:
//!
//! ```text
//!  Disconnected ──connect()──► Connecting ──handshake ok──► Connected
//!       ▲                                                     │
//!       └────── close notification / close() ◄── Closing ◄────┘
//! ```
//!
//! The stored connection sits behind a short-held lock that is never
//! kept across an `.await`.  A successful bootstrap stores it unless
//! shutdown has begun.  The close listener or a confirmed `close()`
//! clears it, each only if it still holds the same connection, and
//! `shutdown()` takes whatever is there.
//!
//! The client either creates its own tokio runtime or borrows one.
//! That choice is fixed at construction and decides whether
//! [`shutdown`](Client::shutdown) stops the runtime.  `shutdown`
//! must be called before the client is dropped.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::Configuration;
use crate::connection::Connection;
use crate::error::ClientError;
use crate::protocol::frame::{ChannelId, Flush, Frame, Outbound, PROTOCOL_HEADER};
use crate::protocol::handler::FrameHandlerFactory;
use crate::protocol::response::{ChannelResponse, Connected, ConnectionResponse, Response};

/// Reply code sent with a connection close when none is given.
pub const DEFAULT_CLOSE_CODE: u16 = 200;

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type ConnectionSlot = Arc<Mutex<Option<Arc<Connection>>>>;

/// Who is responsible for stopping the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOwnership {
    /// Built by the client; `shutdown()` stops it.
    Created,
    /// Provided by the caller; left running.
    Shared,
}

enum ClientRuntime {
    Created {
        handle: Handle,
        runtime: Mutex<Option<Runtime>>,
    },
    Shared(Handle),
}

impl ClientRuntime {
    fn handle(&self) -> &Handle {
        match self {
            ClientRuntime::Created { handle, .. } | ClientRuntime::Shared(handle) => handle,
        }
    }

    fn ownership(&self) -> RuntimeOwnership {
        match self {
            ClientRuntime::Created { .. } => RuntimeOwnership::Created,
            ClientRuntime::Shared(_) => RuntimeOwnership::Shared,
        }
    }

    /// Close `connection` and, for an owned runtime, stop the runtime.
    ///
    /// Everything that decides what gets torn down is taken here,
    /// before returning.  The teardown itself runs detached: a task
    /// on a shared runtime, or a dedicated thread for an owned one
    /// (a runtime cannot be stopped from its own threads).  The
    /// receiver reports the outcome, and dropping it skips nothing.
    fn tear_down(&self, connection: Option<Arc<Connection>>) -> oneshot::Receiver<Result<(), ClientError>> {
        let (done, outcome) = oneshot::channel();
        let runtime = match self {
            ClientRuntime::Shared(handle) => {
                handle.spawn(async move {
                    let _ = done.send(close_stored(connection).await);
                });
                return outcome;
            }
            ClientRuntime::Created { handle, runtime } => match runtime.lock().take() {
                Some(runtime) => runtime,
                None => {
                    handle.spawn(async move {
                        let _ = done.send(close_stored(connection).await);
                    });
                    return outcome;
                }
            },
        };

        let (hand_over, parcel) = std::sync::mpsc::channel::<(Runtime, Option<Arc<Connection>>, ShutdownAck)>();
        let spawned = std::thread::Builder::new()
            .name("rabbit-client-shutdown".into())
            .spawn(move || {
                let Ok((runtime, connection, done)) = parcel.recv() else {
                    return;
                };
                let closed = runtime.block_on(close_stored(connection));
                runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
                let _ = done.send(closed);
            });
        let failed = match spawned {
            Ok(_) => hand_over.send((runtime, connection, done)).err().map(|returned| {
                let (runtime, _, done) = returned.0;
                (runtime, done, "runtime shutdown thread exited early".to_owned())
            }),
            Err(error) => Some((runtime, done, error.to_string())),
        };
        if let Some((runtime, done, reason)) = failed {
            // Safe from any context, unlike dropping the runtime.
            runtime.shutdown_background();
            let _ = done.send(Err(ClientError::RuntimeShutdown(reason)));
        }
        outcome
    }
}

type ShutdownAck = oneshot::Sender<Result<(), ClientError>>;

/// Close the connection taken out of the slot by `shutdown()`.
async fn close_stored(connection: Option<Arc<Connection>>) -> Result<(), ClientError> {
    let Some(connection) = connection else {
        return Ok(());
    };
    match connection.close().await {
        Ok(()) | Err(ClientError::AlreadyClosed) => Ok(()),
        Err(error) => Err(error),
    }
}

/// Entry point of the client.
pub struct Client {
    config: Arc<Configuration>,
    handlers: Arc<dyn FrameHandlerFactory>,
    runtime: ClientRuntime,
    connection: ConnectionSlot,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("runtime", &self.runtime.ownership())
            .field("connection", &self.connection.lock().as_ref().map(|c| c.peer_addr()))
            .field("is_shutdown", &self.is_shutdown)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client running on a multi-thread runtime of its own.
    pub fn new(config: Configuration, handlers: impl FrameHandlerFactory) -> Result<Self, ClientError> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("rabbit-client")
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self::build(
            config,
            Arc::new(handlers),
            ClientRuntime::Created {
                handle,
                runtime: Mutex::new(Some(runtime)),
            },
        ))
    }

    /// Create a client on a runtime owned by the caller.
    pub fn with_runtime(config: Configuration, handlers: impl FrameHandlerFactory, runtime: Handle) -> Self {
        Self::build(config, Arc::new(handlers), ClientRuntime::Shared(runtime))
    }

    fn build(config: Configuration, handlers: Arc<dyn FrameHandlerFactory>, runtime: ClientRuntime) -> Self {
        Self {
            config: Arc::new(config),
            handlers,
            runtime,
            connection: Arc::new(Mutex::new(None)),
            is_shutdown: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn runtime_ownership(&self) -> RuntimeOwnership {
        self.runtime.ownership()
    }

    /// The stored connection, if any.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    /// Open a transport and run the protocol handshake.
    ///
    /// The new connection is stored as soon as the transport is up,
    /// replacing any previous one, and the handshake runs after that.
    /// If the handshake fails the connection is closed and removed
    /// again, so a failed `connect()` never leaves a half-open
    /// connection behind.
    pub async fn connect(&self) -> Result<Connected, ClientError> {
        if self.is_shutdown() {
            return Err(ClientError::AlreadyShutdown);
        }
        let connection = Arc::new(
            Connection::open(self.runtime.handle(), Arc::clone(&self.config), Arc::clone(&self.handlers)).await?,
        );
        if let Err(error) = self.store(&connection) {
            debug!(peer = %connection.peer_addr(), "client shut down while connecting");
            let _ = connection.close().await;
            return Err(error);
        }
        self.watch_close(&connection);

        let outcome = connection
            .send(
                Outbound::Bytes(Bytes::from_static(PROTOCOL_HEADER)),
                Flush::Immediately,
            )
            .await;
        match outcome {
            Ok(Response::Connection(ConnectionResponse::Connected(connected))) => {
                info!(
                    peer = %connection.peer_addr(),
                    channel_max = connected.channel_max,
                    frame_max = connected.frame_max,
                    "connection established"
                );
                Ok(connected)
            }
            Ok(other) => {
                self.discard(&connection).await;
                Err(ClientError::InvalidResponse(other))
            }
            Err(error) => {
                self.discard(&connection).await;
                Err(error)
            }
        }
    }

    /// Open channel `id` on the stored connection.
    pub async fn open_channel(&self, id: ChannelId) -> Result<Channel, ClientError> {
        let connection = self.connection().ok_or(ClientError::ConnectionClosed)?;
        let response = connection
            .send(Frame::channel_open(id).into(), Flush::Immediately)
            .await?;
        match response {
            Response::Channel(ChannelResponse::Opened { channel_id, notifier }) if channel_id == id => {
                debug!(channel = id, "channel opened");
                Ok(Channel::new(id, self.runtime.handle().clone(), notifier, connection))
            }
            other => Err(ClientError::InvalidResponse(other)),
        }
    }

    /// Ask the broker to close the connection with `code` and
    /// `reason`, then close the transport.
    pub async fn close(&self, reason: &str, code: u16) -> Result<(), ClientError> {
        let connection = self.connection().ok_or(ClientError::ConnectionClosed)?;
        let response = connection
            .send(Frame::connection_close(code, reason).into(), Flush::Immediately)
            .await?;
        match response {
            Response::Connection(ConnectionResponse::Closed) => {
                clear_if_current(&self.connection, &Arc::downgrade(&connection));
                info!(peer = %connection.peer_addr(), code, reason, "connection closed");
                connection.close().await
            }
            other => Err(ClientError::InvalidResponse(other)),
        }
    }

    /// [`close`](Self::close) with an empty reason and
    /// [`DEFAULT_CLOSE_CODE`].
    pub async fn close_default(&self) -> Result<(), ClientError> {
        self.close("", DEFAULT_CLOSE_CODE).await
    }

    /// Close the connection and, if the client created it, stop the
    /// runtime.  Only the first call does anything; later calls fail
    /// with [`ClientError::AlreadyShutdown`].
    ///
    /// Shutdown starts when this is called, not when the future is
    /// polled, and runs to completion even if the future is dropped.
    /// The future only reports the outcome; a connection error takes
    /// precedence over a runtime error.
    ///
    /// When the runtime is owned by the client, await this from
    /// outside that runtime: tasks on it are cancelled as it stops.
    pub fn shutdown(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let outcome = if self
            .is_shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let connection = self.connection.lock().take();
            Some(self.runtime.tear_down(connection))
        } else {
            None
        };
        let ownership = self.runtime.ownership();

        async move {
            let Some(outcome) = outcome else {
                return Err(ClientError::AlreadyShutdown);
            };
            let result = outcome
                .await
                .unwrap_or_else(|_| Err(ClientError::RuntimeShutdown("shutdown task was cancelled".into())));
            info!(?ownership, "client shut down");
            result
        }
    }

    /// Put `connection` in the slot.  Fails once shutdown has begun;
    /// the check happens under the slot lock, so a concurrent
    /// `shutdown()` either finds the connection or is seen here.
    fn store(&self, connection: &Arc<Connection>) -> Result<(), ClientError> {
        let previous = {
            let mut slot = self.connection.lock();
            if self.is_shutdown() {
                return Err(ClientError::AlreadyShutdown);
            }
            slot.replace(Arc::clone(connection))
        };
        if let Some(previous) = previous {
            warn!(peer = %previous.peer_addr(), "replacing stored connection");
        }
        Ok(())
    }

    /// Clear the slot when `connection` closes, unless another
    /// connection has been stored since.
    fn watch_close(&self, connection: &Arc<Connection>) {
        let slot = Arc::clone(&self.connection);
        let closed = connection.closed();
        let watched = Arc::downgrade(connection);
        self.runtime.handle().spawn(async move {
            closed.await;
            if clear_if_current(&slot, &watched) {
                debug!("stored connection closed");
            }
        });
    }

    async fn discard(&self, connection: &Arc<Connection>) {
        clear_if_current(&self.connection, &Arc::downgrade(connection));
        if let Err(error) = connection.close().await {
            debug!(%error, "closing connection after failed handshake");
        }
    }
}

/// Empty `slot` if it holds `connection`.  The `Weak` keeps the
/// allocation alive, so a pointer match cannot be a reused address.
fn clear_if_current(slot: &Mutex<Option<Arc<Connection>>>, connection: &Weak<Connection>) -> bool {
    let mut slot = slot.lock();
    let is_current = slot
        .as_ref()
        .is_some_and(|stored| std::ptr::eq(Arc::as_ptr(stored), connection.as_ptr()));
    if is_current {
        *slot = None;
    }
    is_current
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Acquire) && !std::thread::panicking() {
            panic!("rabbit_client::Client dropped without calling shutdown()");
        }
    }
}
