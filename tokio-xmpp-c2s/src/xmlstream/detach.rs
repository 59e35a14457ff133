// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Small helper struct to take the I/O object out of a running parser.

use core::pin::Pin;
use core::task::{Context, Poll};
use std::io::{self, IoSlice};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, ReadBuf};

/// Wrapper around an I/O object which can be taken out while the XML
/// reader still owns the wrapper.
///
/// This struct implements [`AsyncRead`], [`AsyncBufRead`] and
/// [`AsyncWrite`] by passing requests down to the wrapped object. Once the
/// object has been taken with [`Self::take`], every request fails with
/// [`io::ErrorKind::NotConnected`].
///
/// The transport needs this on reset: the byte stream is moved into a new
/// parser (possibly after wrapping it in TLS), while the old parser, which
/// may hold stale buffered state, is dropped.
pub(super) struct Detachable<Io> {
    inner: Option<Io>,
}

impl<Io> Detachable<Io> {
    pub(super) fn wrap(inner: Io) -> Self {
        Self { inner: Some(inner) }
    }

    /// Take the inner I/O object out, leaving the wrapper detached.
    pub(super) fn take(&mut self) -> Option<Io> {
        self.inner.take()
    }

    pub(super) fn get(&self) -> Option<&Io> {
        self.inner.as_ref()
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "I/O object detached")
}

impl<Io: Unpin> Detachable<Io> {
    fn pinned(self: Pin<&mut Self>) -> io::Result<Pin<&mut Io>> {
        match self.get_mut().inner.as_mut() {
            Some(inner) => Ok(Pin::new(inner)),
            None => Err(detached()),
        }
    }
}

impl<Io: AsyncRead + Unpin> AsyncRead for Detachable<Io> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        read_buf: &mut ReadBuf,
    ) -> Poll<io::Result<()>> {
        match self.pinned() {
            Ok(inner) => inner.poll_read(cx, read_buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl<Io: AsyncBufRead + Unpin> AsyncBufRead for Detachable<Io> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<&[u8]>> {
        match self.pinned() {
            Ok(inner) => inner.poll_fill_buf(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        if let Ok(inner) = self.pinned() {
            inner.consume(amt);
        }
    }
}

impl<Io: AsyncWrite + Unpin> AsyncWrite for Detachable<Io> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.pinned() {
            Ok(inner) => inner.poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.pinned() {
            Ok(inner) => inner.poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.pinned() {
            Ok(inner) => inner.poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| inner.is_write_vectored())
            .unwrap_or(false)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context,
        bufs: &[IoSlice],
    ) -> Poll<io::Result<usize>> {
        match self.pinned() {
            Ok(inner) => inner.poll_write_vectored(cx, bufs),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
