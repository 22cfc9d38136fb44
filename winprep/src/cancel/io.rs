//! Cancellation-aware async I/O wrappers.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;

/// The error every wrapper returns once its token is cancelled.
pub fn interrupt_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "interrupt")
}

/// Reader that refuses to read after cancellation, even if the inner
/// stream still has data buffered.
pub struct CancelReader<R> {
    inner: R,
    token: CancellationToken,
}

impl<R> CancelReader<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CancelReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(interrupt_error()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

/// Writer that refuses to write after cancellation.
pub struct CancelWriter<W> {
    inner: W,
    token: CancellationToken,
}

impl<W> CancelWriter<W> {
    pub fn new(inner: W, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CancelWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(interrupt_error()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(interrupt_error()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
