//! Shared fixtures: a line-oriented frame handler and a scripted
//! broker that speaks it.
//!
//! Each outbound unit becomes one text line (`HEADER`, `OPEN 5`,
//! `CLOSE 200 bye`, ...).  The broker answers each line according to
//! a script, and the handler turns reply lines back into
//! [`Response`]s, resolving slots first in, first out.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rabbit_client::{
    ChannelEvent, ChannelNotifier, ChannelResponse, ClientError, Configuration, Connected,
    ConnectionResponse, Frame, FrameHandler, Method, Outbound, PendingRequest, Response,
    ResponseSlot, TlsSettings, PROTOCOL_HEADER,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Broker-side TLS for a self-signed `localhost` certificate, plus
/// client settings trusting it.  Keep the directory alive while the
/// settings are in use.
pub fn self_signed_tls() -> (TlsAcceptor, TlsSettings, TempDir) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let ca_file = dir.path().join("ca.pem");
    std::fs::write(&ca_file, certified.cert.pem()).unwrap();

    let cert: CertificateDer<'static> = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let server = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    let settings = TlsSettings {
        ca_file: Some(ca_file),
        ..TlsSettings::default()
    };
    (TlsAcceptor::from(Arc::new(server)), settings, dir)
}

#[derive(Default)]
pub struct LineHandler {
    slots: VecDeque<ResponseSlot>,
    notifiers: HashMap<u16, ChannelNotifier>,
}

pub fn line_handler(_: &Configuration) -> Box<dyn FrameHandler> {
    Box::new(LineHandler::default())
}

impl LineHandler {
    fn resolve(&mut self, response: Response) -> Result<(), ClientError> {
        let slot = self
            .slots
            .pop_front()
            .ok_or_else(|| ClientError::Protocol("reply without a request".into()))?;
        slot.succeed(response);
        Ok(())
    }

    fn handle_line(&mut self, line: &str, dst: &mut BytesMut) -> Result<(), ClientError> {
        let mut parts = line.splitn(3, ' ');
        let verb = parts.next().unwrap_or_default();
        let first = parts.next();
        let rest = parts.next();
        let number = |value: Option<&str>| -> Result<u32, ClientError> {
            value
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ClientError::Protocol(format!("malformed line: {line}")))
        };

        match verb {
            "CONNECTED" => {
                let channel_max = number(first)? as u16;
                let frame_max = number(rest)?;
                self.resolve(Response::Connection(ConnectionResponse::Connected(Connected {
                    channel_max,
                    frame_max,
                })))
            }
            "CLOSED" => self.resolve(Response::Connection(ConnectionResponse::Closed)),
            "OPENED" => {
                let channel_id = number(first)? as u16;
                let notifier = ChannelNotifier::default();
                self.notifiers.insert(channel_id, notifier.clone());
                self.resolve(Response::Channel(ChannelResponse::Opened {
                    channel_id,
                    notifier,
                }))
            }
            "CHCLOSED" => {
                let channel_id = number(first)? as u16;
                self.notifiers.remove(&channel_id);
                self.resolve(Response::Channel(ChannelResponse::Closed { channel_id }))
            }
            "REPLY" => {
                let channel_id = number(first)? as u16;
                let frame = Frame::new(
                    channel_id,
                    Method::Other {
                        class_id: 0,
                        method_id: 0,
                        arguments: Bytes::from(rest.unwrap_or_default().to_owned()),
                    },
                );
                self.resolve(Response::Channel(ChannelResponse::Reply { channel_id, frame }))
            }
            "EVENT" => {
                let channel_id = number(first)? as u16;
                if let Some(notifier) = self.notifiers.get(&channel_id) {
                    notifier.notify(ChannelEvent::Frame(Frame::new(
                        channel_id,
                        Method::Other {
                            class_id: 0,
                            method_id: 0,
                            arguments: Bytes::from(rest.unwrap_or_default().to_owned()),
                        },
                    )));
                }
                Ok(())
            }
            "PING" => {
                dst.extend_from_slice(b"PONG\n");
                Ok(())
            }
            _ => Err(ClientError::Protocol(format!("unknown line: {line}"))),
        }
    }
}

impl FrameHandler for LineHandler {
    fn on_outbound(&mut self, request: PendingRequest, dst: &mut BytesMut) -> Result<(), ClientError> {
        let (payload, slot) = request.into_parts();
        let line = match payload {
            Outbound::Bytes(bytes) if bytes.as_ref() == PROTOCOL_HEADER => "HEADER".to_owned(),
            Outbound::Bytes(bytes) => format!("RAW {}", bytes.len()),
            Outbound::Frame(Frame { channel_id, method }) => match method {
                Method::ChannelOpen => format!("OPEN {channel_id}"),
                Method::ConnectionClose {
                    reply_code,
                    reply_text,
                    ..
                } => format!("CLOSE {reply_code} {reply_text}"),
                Method::ChannelClose { reply_code, .. } => format!("CHCLOSE {channel_id} {reply_code}"),
                Method::Other {
                    class_id,
                    method_id,
                    arguments,
                } => format!(
                    "METHOD {channel_id} {class_id}.{method_id} {}",
                    String::from_utf8_lossy(&arguments)
                ),
            },
        };
        dst.extend_from_slice(line.as_bytes());
        dst.extend_from_slice(b"\n");
        self.slots.push_back(slot);
        Ok(())
    }

    fn on_inbound(&mut self, src: &mut BytesMut, dst: &mut BytesMut) -> Result<(), ClientError> {
        while let Some(end) = src.iter().position(|b| *b == b'\n') {
            let line = src.split_to(end + 1);
            let line = String::from_utf8_lossy(&line[..end]).into_owned();
            self.handle_line(line.trim_end(), dst)?;
        }
        Ok(())
    }

    fn on_closed(&mut self, _cause: Option<&ClientError>) {
        for slot in self.slots.drain(..) {
            slot.fail(ClientError::ConnectionClosed);
        }
        for (channel_id, notifier) in self.notifiers.drain() {
            notifier.notify(ChannelEvent::Closed {
                reply_code: 320,
                reply_text: format!("connection closed under channel {channel_id}"),
            });
        }
    }
}

/// What the broker does with one received line.
pub enum Reply {
    Send(String),
    SendAndClose(String),
    Close,
    Ignore,
}

type Script = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

/// The replies a well-behaved broker gives.
pub fn standard_reply(line: &str) -> Reply {
    let mut parts = line.split(' ');
    match (parts.next(), parts.next()) {
        (Some("HEADER"), _) => Reply::Send("CONNECTED 2047 131072".into()),
        (Some("OPEN"), Some(id)) => Reply::Send(format!("OPENED {id}")),
        (Some("CLOSE"), _) => Reply::SendAndClose("CLOSED".into()),
        (Some("CHCLOSE"), Some(id)) => Reply::Send(format!("CHCLOSED {id}")),
        (Some("METHOD"), Some(id)) => Reply::Send(format!("REPLY {id} ok")),
        (Some("PONG"), _) => Reply::Ignore,
        _ => Reply::Close,
    }
}

pub struct Broker {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl Broker {
    pub async fn standard() -> Self {
        Self::start(standard_reply).await
    }

    pub async fn start(script: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self::listen(Arc::new(script), None, Duration::ZERO).await
    }

    pub async fn start_tls(acceptor: TlsAcceptor) -> Self {
        Self::listen(Arc::new(standard_reply), Some(acceptor), Duration::ZERO).await
    }

    /// A TLS broker that waits `delay` before answering the client's
    /// handshake, holding the client in bootstrap that long.
    pub async fn start_tls_after(acceptor: TlsAcceptor, delay: Duration) -> Self {
        Self::listen(Arc::new(standard_reply), Some(acceptor), delay).await
    }

    async fn listen(script: Script, tls: Option<TlsAcceptor>, accept_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (seen, count) = (Arc::clone(&received), Arc::clone(&connections));
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                let (script, seen, tls) = (Arc::clone(&script), Arc::clone(&seen), tls.clone());
                tokio::spawn(async move {
                    match tls {
                        None => serve(socket, script, seen).await,
                        Some(acceptor) => {
                            tokio::time::sleep(accept_delay).await;
                            if let Ok(stream) = acceptor.accept(socket).await {
                                serve(stream, script, seen).await;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn config(&self) -> Configuration {
        Configuration::plain("127.0.0.1", self.port())
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve<S>(stream: S, script: Script, seen: Arc<Mutex<Vec<String>>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        seen.lock().push(line.clone());
        match script(&line) {
            Reply::Send(reply) => {
                if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
            Reply::SendAndClose(reply) => {
                let _ = writer.write_all(format!("{reply}\n").as_bytes()).await;
                let _ = writer.shutdown().await;
                return;
            }
            Reply::Close => {
                let _ = writer.shutdown().await;
                return;
            }
            Reply::Ignore => {}
        }
    }
}
