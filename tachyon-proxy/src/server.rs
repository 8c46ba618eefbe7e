//! Server module for accepting client connections and splicing them onto
//! backends chosen by the selection engine.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tachyon_core::LoadBalancer;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;

use crate::error::{ProxyError, Result};

/// Accept connections on `listener` until it fails.
///
/// Each connection is keyed on the client IP, so the consistent hash
/// strategy pins a client to one backend. The backend's connect latency is
/// reported back when the connection closes, as a failure only if the
/// backend side of the session errored.
pub async fn serve(listener: TcpListener, engine: Arc<LoadBalancer>, connect_timeout: Duration) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = Arc::clone(&engine);

        tokio::task::spawn(async move {
            if let Err(error) = handle_connection(stream, peer, &engine, connect_timeout).await {
                tracing::debug!(%peer, %error, "connection ended with an error");
            }
        });
    }
}

async fn handle_connection(
    mut inbound: TcpStream,
    peer: SocketAddr,
    engine: &LoadBalancer,
    connect_timeout: Duration,
) -> Result<()> {
    let key = peer.ip().to_string();
    let Some(host) = engine.select_host(Some(key.as_str())) else {
        tracing::warn!(%peer, "no backend available, dropping connection");
        return Ok(());
    };

    let started = Instant::now();
    let connected = time::timeout(connect_timeout, TcpStream::connect(&*host)).await;
    let latency = started.elapsed();

    let mut outbound = match connected {
        Ok(Ok(stream)) => Tracked::new(stream),
        Ok(Err(error)) => {
            engine.report_outcome(&host, latency, false);
            tracing::warn!(%host, %error, "backend connect failed");
            return Err(error.into());
        }
        Err(_) => {
            engine.report_outcome(&host, latency, false);
            tracing::warn!(%host, ?connect_timeout, "backend connect timed out");
            return Err(ProxyError::ConnectTimeout { host: host.to_string(), timeout: connect_timeout });
        }
    };

    let spliced = copy_bidirectional(&mut inbound, &mut outbound).await;
    // a client hanging up mid-session says nothing about the backend
    engine.report_outcome(&host, latency, !outbound.failed);

    let (sent, received) = spliced?;
    tracing::trace!(%peer, %host, sent, received, "connection closed");
    Ok(())
}

/// Stream wrapper remembering whether any of its own I/O calls failed.
struct Tracked<S> {
    inner: S,
    failed: bool,
}

impl<S> Tracked<S> {
    fn new(inner: S) -> Self {
        Self { inner, failed: false }
    }

    fn observe<T>(&mut self, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if let Poll::Ready(Err(_)) = &poll {
            self.failed = true;
        }
        poll
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Tracked<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        self.observe(poll)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Tracked<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        self.observe(poll)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_flush(cx);
        self.observe(poll)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_shutdown(cx);
        self.observe(poll)
    }
}
