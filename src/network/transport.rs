//! Framed transport.
//!
//! A [`Transport`] is the handle to a connected stream with a
//! [`FrameHandler`] installed on it.  The stream itself lives in a
//! driver task that owns both the socket and the handler, so the
//! handler is only ever touched from one place:
//!
//! ```text
//!  Connection::send ──► command queue ──► driver ──► handler.on_outbound ──► socket
//!                                           │
//!  ResponseSlot ◄── handler.on_inbound ◄────┘◄────────────────────────────── socket
//! ```
//!
//! Writes marked [`Flush::Immediately`] hit the socket as soon as the
//! driver dequeues them.  Batched writes accumulate until the queue is
//! drained or an immediate write follows, so bytes always leave in
//! submission order.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::error::ClientError;
use crate::protocol::frame::Flush;
use crate::protocol::handler::FrameHandler;
use crate::protocol::response::PendingRequest;

const READ_CAPACITY: usize = 8 * 1024;

/// Byte stream the driver runs over: plain TCP or TLS.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type CloseAck = oneshot::Sender<Result<(), ClientError>>;

enum Command {
    Write { request: PendingRequest, flush: Flush },
    Close { done: CloseAck },
}

/// Why the driver stopped.
enum Exit {
    /// A local close request shut the stream down.
    Requested(Result<(), ClientError>),
    PeerClosed,
    Failed(ClientError),
    /// Every handle to the transport was dropped.
    Abandoned,
}

/// Handle to a running, framed transport.
#[derive(Debug)]
pub struct Transport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<bool>,
    peer: SocketAddr,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Write { request, flush } => f
                .debug_struct("Write")
                .field("payload", &request.payload)
                .field("flush", flush)
                .finish(),
            Command::Close { .. } => f.write_str("Close"),
        }
    }
}

impl Transport {
    /// Install `handler` on `io` and start the driver task on the
    /// current runtime.
    pub(crate) fn spawn(io: Box<dyn Io>, handler: Box<dyn FrameHandler>, peer: SocketAddr) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();
        let (closed, state) = watch::channel(false);
        tokio::spawn(drive(io, handler, queue, closed, peer));
        Self {
            commands,
            state,
            peer,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// True until the driver has stopped.
    pub fn is_active(&self) -> bool {
        !*self.state.borrow() && !self.commands.is_closed()
    }

    /// Queue a correlated write.  Fails with
    /// [`ClientError::AlreadyClosed`] once the transport is inactive.
    pub(crate) fn submit(&self, request: PendingRequest, flush: Flush) -> Result<(), ClientError> {
        if !self.is_active() {
            return Err(ClientError::AlreadyClosed);
        }
        self.commands
            .send(Command::Write { request, flush })
            .map_err(|_| ClientError::AlreadyClosed)
    }

    /// Ask the driver to shut the stream down.  `None` means the
    /// transport is already inactive.
    pub(crate) fn request_close(&self) -> Option<oneshot::Receiver<Result<(), ClientError>>> {
        if !self.is_active() {
            return None;
        }
        let (done, ack) = oneshot::channel();
        self.commands.send(Command::Close { done }).ok()?;
        Some(ack)
    }

    /// Resolves once the driver has stopped, whatever the cause.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut state = self.state.clone();
        async move {
            // Err means the driver dropped its sender, which it only does after stopping.
            let _ = state.wait_for(|closed| *closed).await;
        }
    }
}

async fn drive(
    mut io: Box<dyn Io>,
    mut handler: Box<dyn FrameHandler>,
    mut queue: mpsc::UnboundedReceiver<Command>,
    closed: watch::Sender<bool>,
    peer: SocketAddr,
) {
    let mut closers = Vec::new();
    let exit = pump(&mut io, handler.as_mut(), &mut queue, &mut closers).await;

    let (cause, ack) = match exit {
        Exit::Requested(Ok(())) => {
            debug!(%peer, "transport closed locally");
            (None, Ok(()))
        }
        Exit::Requested(Err(error)) => {
            warn!(%peer, %error, "transport close failed");
            // The handler sees a generic cause; the closer gets the real error.
            (Some(ClientError::ConnectionClosed), Err(error))
        }
        Exit::PeerClosed => {
            debug!(%peer, "transport closed by peer");
            (None, Ok(()))
        }
        Exit::Failed(error) => {
            warn!(%peer, %error, "transport failed");
            (Some(error), Ok(()))
        }
        Exit::Abandoned => {
            debug!(%peer, "transport dropped");
            (None, Ok(()))
        }
    };

    queue.close();
    while let Ok(command) = queue.try_recv() {
        match command {
            Command::Write { request, .. } => request.slot.fail(ClientError::ConnectionClosed),
            Command::Close { done } => closers.push(done),
        }
    }
    drop(io);
    handler.on_closed(cause.as_ref());
    closed.send_replace(true);

    let mut ack = Some(ack);
    for done in closers {
        let _ = done.send(ack.take().unwrap_or(Ok(())));
    }
}

async fn pump(
    io: &mut Box<dyn Io>,
    handler: &mut dyn FrameHandler,
    queue: &mut mpsc::UnboundedReceiver<Command>,
    closers: &mut Vec<CloseAck>,
) -> Exit {
    let mut read_buf = BytesMut::with_capacity(READ_CAPACITY);
    let mut write_buf = BytesMut::new();

    loop {
        tokio::select! {
            command = queue.recv() => {
                let Some(mut command) = command else {
                    return Exit::Abandoned;
                };
                loop {
                    match command {
                        Command::Write { request, flush } => {
                            trace!(payload = ?request.payload, ?flush, "outbound");
                            if let Err(error) = handler.on_outbound(request, &mut write_buf) {
                                return Exit::Failed(error);
                            }
                            if flush == Flush::Immediately {
                                if let Err(error) = write_out(io, &mut write_buf).await {
                                    return Exit::Failed(error.into());
                                }
                            }
                        }
                        Command::Close { done } => {
                            closers.push(done);
                            return Exit::Requested(shut_down(io, &mut write_buf).await);
                        }
                    }
                    match queue.try_recv() {
                        Ok(next) => command = next,
                        Err(_) => break,
                    }
                }
                if let Err(error) = write_out(io, &mut write_buf).await {
                    return Exit::Failed(error.into());
                }
            }
            read = io.read_buf(&mut read_buf) => match read {
                Ok(0) => return Exit::PeerClosed,
                Ok(n) => {
                    trace!(bytes = n, "inbound");
                    if let Err(error) = handler.on_inbound(&mut read_buf, &mut write_buf) {
                        return Exit::Failed(error);
                    }
                    if let Err(error) = write_out(io, &mut write_buf).await {
                        return Exit::Failed(error.into());
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Exit::PeerClosed,
                Err(error) => return Exit::Failed(error.into()),
            }
        }
    }
}

async fn write_out(io: &mut Box<dyn Io>, buf: &mut BytesMut) -> io::Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    io.write_all_buf(buf).await?;
    io.flush().await
}

async fn shut_down(io: &mut Box<dyn Io>, buf: &mut BytesMut) -> Result<(), ClientError> {
    write_out(io, buf).await?;
    match io.shutdown().await {
        Err(error) if error.kind() != io::ErrorKind::NotConnected => Err(error.into()),
        _ => Ok(()),
    }
}
