// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # RFC 6120 XML Streams
//!
//! **Note:** The XML stream is a low-level API which you should probably not
//! use directly.
//!
//! An [`ElementTransport`] frames a byte stream as an XMPP XML stream: it
//! sends our stream header, consumes the peer's header on first read, and
//! then exchanges complete top-level elements as [`minidom::Element`]s.
//!
//! Negotiation changes the meaning of the byte stream twice (after STARTTLS
//! and after SASL). Each time, both sides start a fresh XML document, so the
//! reader and the writer are rebuilt together by
//! [`reset_with`][`ElementTransport::reset_with`]. The old stream root is
//! abandoned, never closed.

use core::future::{poll_fn, Future};
use core::pin::Pin;
use core::{fmt, mem};
use std::borrow::Cow;
use std::io;
use std::sync::Arc;

use futures::{Sink, SinkExt};

use minidom::Element;

use tokio::io::{AsyncBufRead, AsyncWrite};

use xso::{AsXml, Item};

mod common;
mod detach;

use self::common::{RawXmlStream, ReadState};
pub use self::common::StreamHeader;

/// A non-success state which may occur while reading an element from an
/// [`ElementTransport`].
#[derive(Debug)]
pub enum ReadError {
    /// An I/O error occurred in the underlying I/O object, the XML was not
    /// well-formed, or the peer hung up.
    ///
    /// This is fatal.
    HardError(io::Error),

    /// The stream footer was received.
    ///
    /// Any future read attempts will again return this error. The stream has
    /// been closed by the peer and you should probably close it, too.
    StreamFooterReceived,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadError::HardError(e) => write!(f, "XML stream error: {}", e),
            ReadError::StreamFooterReceived => f.write_str("stream footer received"),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::HardError(e) => Some(e),
            ReadError::StreamFooterReceived => None,
        }
    }
}

impl From<ReadError> for io::Error {
    fn from(other: ReadError) -> Self {
        match other {
            ReadError::HardError(e) => e,
            ReadError::StreamFooterReceived => io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream footer while waiting for element",
            ),
        }
    }
}

/// Which way an element travelled through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read from the peer.
    Inbound,

    /// Written to the peer.
    Outbound,
}

/// Callback invoked with every element read or written.
///
/// The tap is a pure side channel: it observes elements, it never changes
/// them or the transport.
pub type ElementTap = Arc<dyn Fn(Direction, &Element) + Send + Sync>;

/// An XMPP XML stream exchanging top-level elements.
///
/// Generation counts the stream headers sent on this connection: it is 1
/// after [`open`][`Self::open`] and grows by one on every reset.
pub struct ElementTransport<Io> {
    stream: RawXmlStream<Io>,
    read_state: ReadState,
    header: Option<StreamHeader<'static>>,
    domain: String,
    generation: u32,
    tap: Option<ElementTap>,
    footer_sent: bool,
}

impl<Io> fmt::Debug for ElementTransport<Io> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ElementTransport")
            .field("domain", &self.domain)
            .field("generation", &self.generation)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> ElementTransport<Io> {
    /// Open a new stream to `domain` over `io`.
    ///
    /// This writes our stream header and flushes it. The peer's header is
    /// consumed by the first [`read_next`][`Self::read_next`].
    pub async fn open(io: Io, domain: &str, tap: Option<ElementTap>) -> io::Result<Self> {
        Self::open_generation(io, domain.to_owned(), tap, 1).await
    }

    async fn open_generation(
        io: Io,
        domain: String,
        tap: Option<ElementTap>,
        generation: u32,
    ) -> io::Result<Self> {
        let mut stream = RawXmlStream::new(io);
        StreamHeader {
            from: None,
            to: Some(Cow::Borrowed(&domain)),
            id: None,
        }
        .send(Pin::new(&mut stream))
        .await?;
        Pin::new(&mut stream).flush().await?;
        log::debug!("Opened stream to {} (generation {})", domain, generation);
        Ok(Self {
            stream,
            read_state: ReadState::Header,
            header: None,
            domain,
            generation,
            tap,
            footer_sent: false,
        })
    }

    /// Read the next top-level element.
    ///
    /// This is cancellation safe: if the future is dropped before
    /// completion, partially read data is kept and the next call picks up
    /// where this one stopped.
    pub async fn read_next(&mut self) -> Result<Element, ReadError> {
        let elem = poll_fn(|cx| {
            self.read_state
                .poll_advance(Pin::new(&mut self.stream), &mut self.header, cx)
        })
        .await?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("RECV {}", String::from(&elem));
        }
        if let Some(tap) = self.tap.as_ref() {
            tap(Direction::Inbound, &elem);
        }
        Ok(elem)
    }

    /// Write an element as a direct child of the stream root, and flush.
    pub async fn write_next(&mut self, elem: &Element) -> io::Result<()> {
        if self.footer_sent {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream footer already sent",
            ));
        }
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("SEND {}", String::from(elem));
        }
        if let Some(tap) = self.tap.as_ref() {
            tap(Direction::Outbound, elem);
        }
        let mut stream = Pin::new(&mut self.stream);
        poll_fn(|cx| stream.as_mut().poll_ready(cx)).await?;
        let iter = elem
            .as_xml_iter()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        for item in iter {
            let item = item.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            stream.as_mut().start_send(item)?;
        }
        stream.flush().await
    }

    /// Tear down the XML layer, pass the byte stream through `f` and open a
    /// new stream over the result.
    ///
    /// The parser and the encoder are discarded together, so the new
    /// stream starts a fresh document on both sides.
    pub async fn reset_with<Io2, E, F, Fut>(self, f: F) -> Result<ElementTransport<Io2>, E>
    where
        Io2: AsyncBufRead + AsyncWrite + Unpin,
        E: From<io::Error>,
        F: FnOnce(Io) -> Fut,
        Fut: Future<Output = Result<Io2, E>>,
    {
        let Self {
            mut stream,
            domain,
            generation,
            tap,
            ..
        } = self;
        let io = Pin::new(&mut stream).take_io().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "I/O object already detached")
        })?;
        mem::drop(stream);
        let io = f(io).await?;
        Ok(ElementTransport::open_generation(io, domain, tap, generation + 1).await?)
    }

    /// Open a new stream over the same byte stream.
    pub async fn restart(self) -> io::Result<Self> {
        self.reset_with(|io| async move { Ok::<_, io::Error>(io) })
            .await
    }

    /// Send the stream footer and shut the writing side down.
    pub async fn close(&mut self) -> io::Result<()> {
        let mut stream = Pin::new(&mut self.stream);
        if !self.footer_sent {
            poll_fn(|cx| stream.as_mut().poll_ready(cx)).await?;
            stream.as_mut().start_send(Item::ElementFoot)?;
            self.footer_sent = true;
        }
        stream.close().await
    }
}

impl<Io> ElementTransport<Io> {
    /// Number of stream headers sent on this connection.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The domain the stream was opened to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The stream header sent by the peer, once it has been read.
    pub fn peer_header(&self) -> Option<&StreamHeader<'static>> {
        self.header.as_ref()
    }
}

impl<Io: AsyncBufRead + Unpin> ElementTransport<Io> {
    /// Access the underlying I/O object.
    pub fn get_ref(&self) -> Option<&Io> {
        self.stream.get_stream()
    }
}
