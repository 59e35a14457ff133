// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::pin::Pin;
use core::task::{Context, Poll};
use std::borrow::Cow;
use std::io;

use futures::{ready, Sink, SinkExt, Stream};

use bytes::{Buf, BytesMut};

use minidom::Element;

use tokio::io::{AsyncBufRead, AsyncWrite};

use rxml::{writer::TrackNamespace, xml_ncname, AttrMap, Event, Namespace, QName};
use xso::{FromEventsBuilder, FromXml, Item};

use super::detach::Detachable;
use super::ReadError;
use crate::ns;

pin_project_lite::pin_project! {
    // NOTE: due to limitations of pin_project_lite, the field comments are
    // no doc comments. Luckily, this struct is only `pub(super)` anyway.
    #[project = RawXmlStreamProj]
    pub(super) struct RawXmlStream<Io> {
        // The parser used for deserialising data. The I/O object sits in a
        // `Detachable` so that it can be moved out on reset.
        #[pin]
        parser: rxml::AsyncReader<Detachable<Io>>,

        // The writer used for serialising data.
        writer: rxml::writer::Encoder<rxml::writer::SimpleNamespaces>,

        // Buffer containing serialised data which will then be sent through
        // the inner `Io`. Sending that serialised data happens in
        // `poll_ready` and `poll_flush`, while appending serialised data
        // happens in `start_send`.
        tx_buffer: BytesMut,

        // If the `tx_buffer`'s size grows beyond this mark, poll_ready will
        // return Poll::Pending until it has managed to flush enough data
        // down the inner writer.
        //
        // This is not checked in `start_send`: an element has to be
        // serialised in one batch once `poll_ready` returned Ready, so a
        // large element may go over the mark.
        tx_buffer_high_water_mark: usize,
    }
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> RawXmlStream<Io> {
    fn new_writer() -> rxml::writer::Encoder<rxml::writer::SimpleNamespaces> {
        let mut writer = rxml::writer::Encoder::new();
        writer
            .ns_tracker_mut()
            .declare_fixed(Some(xml_ncname!("stream")), ns::STREAM.into());
        writer
            .ns_tracker_mut()
            .declare_fixed(None, ns::JABBER_CLIENT.into());
        writer
    }

    pub(super) fn new(io: Io) -> Self {
        let parser = rxml::Parser::default();
        Self {
            parser: rxml::AsyncReader::wrap(Detachable::wrap(io), parser),
            writer: Self::new_writer(),
            tx_buffer: BytesMut::new(),

            // This basically means: "if we already have 2 kiB in our send
            // buffer, do not accept more data".
            tx_buffer_high_water_mark: 2048,
        }
    }
}

impl<Io: AsyncBufRead + Unpin> RawXmlStream<Io> {
    pub(super) fn get_stream(&self) -> Option<&Io> {
        self.parser.inner().get()
    }
}

impl<Io: AsyncBufRead + Unpin> RawXmlStream<Io> {
    /// Move the I/O object out of this stream.
    ///
    /// Both the parser and the encoder are unusable afterwards; the caller
    /// is expected to drop this stream and build a new one around the
    /// returned object.
    pub(super) fn take_io(self: Pin<&mut Self>) -> Option<Io> {
        self.get_mut().parser.inner_mut().take()
    }
}

impl<Io: AsyncBufRead + Unpin> Stream for RawXmlStream<Io> {
    type Item = Result<rxml::Event, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            return Poll::Ready(
                match ready!(this.parser.as_mut().poll_read(cx)).transpose() {
                    // Skip the XML declaration, nobody wants to hear about that.
                    Some(Ok(rxml::Event::XmlDeclaration(_, _))) => continue,
                    Some(Ok(ev)) => Some(Ok(ev)),
                    Some(Err(e)) => Some(Err(parse_error_to_io(e))),
                    None => None,
                },
            );
        }
    }
}

impl<'x, Io: AsyncBufRead + AsyncWrite + Unpin> RawXmlStreamProj<'x, Io> {
    fn progress_write(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        while !self.tx_buffer.is_empty() {
            let inner = Pin::new(self.parser.as_mut().get_mut().inner_mut());
            let written = match ready!(inner.poll_write(cx, &self.tx_buffer)) {
                Ok(v) => v,
                Err(e) => return Poll::Ready(Err(e)),
            };
            if written == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.tx_buffer.advance(written);
        }
        Poll::Ready(Ok(()))
    }
}

impl<'x, Io: AsyncBufRead + AsyncWrite + Unpin> Sink<xso::Item<'x>> for RawXmlStream<Io> {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let mut this = self.project();
        match this.progress_write(cx) {
            // No progress on write, but if we have enough space in the buffer
            // it's ok nonetheless.
            Poll::Pending => (),
            // Some progress and it went fine, move on.
            Poll::Ready(Ok(())) => (),
            // Something went wrong -> return the error.
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
        }
        if this.tx_buffer.len() < *this.tx_buffer_high_water_mark {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let mut this = self.project();
        ready!(this.progress_write(cx))?;
        Pin::new(this.parser.as_mut().get_mut().inner_mut()).poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let mut this = self.project();
        ready!(this.progress_write(cx))?;
        Pin::new(this.parser.as_mut().get_mut().inner_mut()).poll_shutdown(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: xso::Item<'x>) -> Result<(), Self::Error> {
        let this = self.project();
        this.writer
            .encode_into_bytes(item.as_rxml_item(), this.tx_buffer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }
}

/// State for reading elements off a [`RawXmlStream`].
///
/// The state lives outside of any future so that a read which is dropped
/// halfway (e.g. by `tokio::select!`) resumes where it stopped on the next
/// call.
pub(super) enum ReadState {
    /// The peer's stream header was not seen yet.
    Header,

    /// Between two top-level elements.
    ///
    /// In this state, XML whitespace is ignored (as per RFC 6120 § 11.7), but
    /// other text data is rejected.
    PreData,

    /// A top-level element is being built.
    Parsing(<Element as FromXml>::Builder),

    /// The peer closed its stream root. Final.
    Footer,

    /// A hard error occurred. Final, since the nesting state is lost.
    Failed,
}

fn invalid_data<E>(e: E) -> ReadError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    ReadError::HardError(io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Whitespace as allowed between stanzas, the `S` production of XML 1.0.
fn is_xml_whitespace(data: &[u8]) -> bool {
    data.iter()
        .all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
}

/// I/O errors keep their kind, anything the parser rejected is bad data.
fn parse_error_to_io(e: rxml::Error) -> io::Error {
    match e {
        rxml::Error::IO(e) => io::Error::new(e.kind(), e.to_string()),
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

fn unexpected_eof(msg: &'static str) -> ReadError {
    ReadError::HardError(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
}

impl ReadState {
    /// Progress reading the next top-level element from the given source.
    ///
    /// The first call consumes the peer's stream header and stores it in
    /// `header`. XML whitespace between elements is discarded.
    ///
    /// The `source` passed to `poll_advance` should be the same on every
    /// call.
    pub(super) fn poll_advance<Io: AsyncBufRead + Unpin>(
        &mut self,
        mut source: Pin<&mut RawXmlStream<Io>>,
        header: &mut Option<StreamHeader<'static>>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Element, ReadError>> {
        loop {
            match self {
                ReadState::Footer => return Poll::Ready(Err(ReadError::StreamFooterReceived)),
                ReadState::Failed => {
                    return Poll::Ready(Err(ReadError::HardError(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "XML stream unusable because of previous error",
                    ))))
                }
                _ => (),
            }

            let ev = match ready!(source.as_mut().poll_next(cx)).transpose() {
                Ok(ev) => ev,
                Err(e) => {
                    *self = ReadState::Failed;
                    return Poll::Ready(Err(ReadError::HardError(e)));
                }
            };

            match self {
                ReadState::Header => match ev {
                    Some(Event::StartElement(_, name, attrs)) => {
                        match StreamHeader::from_start(name, attrs) {
                            Ok(v) => {
                                *header = Some(v);
                                *self = ReadState::PreData;
                            }
                            Err(e) => {
                                *self = ReadState::Failed;
                                return Poll::Ready(Err(e));
                            }
                        }
                    }
                    Some(Event::XmlDeclaration(_, _)) => (),
                    Some(Event::Text(_, data)) if is_xml_whitespace(data.as_bytes()) => (),
                    Some(_) => {
                        *self = ReadState::Failed;
                        return Poll::Ready(Err(invalid_data(
                            "unexpected content before stream header",
                        )));
                    }
                    None => {
                        *self = ReadState::Failed;
                        return Poll::Ready(Err(unexpected_eof("eof before stream header")));
                    }
                },
                ReadState::PreData => match ev {
                    Some(Event::XmlDeclaration(_, _)) => (),
                    Some(Event::Text(_, data)) => {
                        if !is_xml_whitespace(data.as_bytes()) {
                            *self = ReadState::Failed;
                            return Poll::Ready(Err(invalid_data(
                                "non-whitespace text content between elements",
                            )));
                        }
                    }
                    Some(Event::StartElement(_, name, attrs)) => {
                        match <Element as FromXml>::from_events(name, attrs) {
                            Ok(builder) => *self = ReadState::Parsing(builder),
                            Err(e) => {
                                *self = ReadState::Failed;
                                return Poll::Ready(Err(invalid_data(e)));
                            }
                        }
                    }
                    // The stream root was closed.
                    Some(Event::EndElement(_)) => {
                        *self = ReadState::Footer;
                        return Poll::Ready(Err(ReadError::StreamFooterReceived));
                    }
                    None => {
                        *self = ReadState::Failed;
                        return Poll::Ready(Err(unexpected_eof(
                            "eof before stream footer",
                        )));
                    }
                },
                ReadState::Parsing(builder) => {
                    let Some(ev) = ev else {
                        *self = ReadState::Failed;
                        return Poll::Ready(Err(unexpected_eof("eof during element parsing")));
                    };
                    match builder.feed(ev) {
                        Err(e) => {
                            *self = ReadState::Failed;
                            return Poll::Ready(Err(invalid_data(e)));
                        }
                        Ok(Some(elem)) => {
                            *self = ReadState::PreData;
                            return Poll::Ready(Ok(elem));
                        }
                        Ok(None) => (),
                    }
                }
                ReadState::Footer | ReadState::Failed => unreachable!(),
            }
        }
    }
}

/// Contains metadata from an XML stream header
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamHeader<'x> {
    /// The optional `from` attribute.
    pub from: Option<Cow<'x, str>>,

    /// The optional `to` attribute.
    pub to: Option<Cow<'x, str>>,

    /// The optional `id` attribute.
    pub id: Option<Cow<'x, str>>,
}

impl<'x> StreamHeader<'x> {
    pub(super) async fn send<Io: AsyncBufRead + AsyncWrite + Unpin>(
        self,
        mut stream: Pin<&mut RawXmlStream<Io>>,
    ) -> io::Result<()> {
        stream
            .send(Item::XmlDeclaration(rxml::XmlVersion::V1_0))
            .await?;
        stream
            .send(Item::ElementHeadStart(
                Namespace::from(ns::STREAM),
                Cow::Borrowed(xml_ncname!("stream")),
            ))
            .await?;
        if let Some(from) = self.from {
            stream
                .send(Item::Attribute(
                    Namespace::NONE,
                    Cow::Borrowed(xml_ncname!("from")),
                    from,
                ))
                .await?;
        }
        if let Some(to) = self.to {
            stream
                .send(Item::Attribute(
                    Namespace::NONE,
                    Cow::Borrowed(xml_ncname!("to")),
                    to,
                ))
                .await?;
        }
        if let Some(id) = self.id {
            stream
                .send(Item::Attribute(
                    Namespace::NONE,
                    Cow::Borrowed(xml_ncname!("id")),
                    id,
                ))
                .await?;
        }
        stream
            .send(Item::Attribute(
                Namespace::NONE,
                Cow::Borrowed(xml_ncname!("version")),
                Cow::Borrowed("1.0"),
            ))
            .await?;
        stream.send(Item::ElementHeadEnd).await?;
        Ok(())
    }
}

impl StreamHeader<'static> {
    /// Interpret the start event of the peer's stream root.
    ///
    /// Unknown attributes are ignored, servers are known to add their own.
    fn from_start((ns, name): QName, mut attrs: AttrMap) -> Result<Self, ReadError> {
        if ns != ns::STREAM || name != "stream" {
            return Err(invalid_data("unknown stream header"));
        }

        match attrs.remove(Namespace::none(), "version") {
            Some(v) => {
                if v != "1.0" {
                    return Err(invalid_data(format!(
                        "unsupported stream version: {}",
                        v
                    )));
                }
            }
            None => return Err(invalid_data("required `version` attribute missing")),
        }

        let from = attrs.remove(Namespace::none(), "from");
        let to = attrs.remove(Namespace::none(), "to");
        let id = attrs.remove(Namespace::none(), "id");
        let _ = attrs.remove(Namespace::xml(), "lang");

        if let Some(((ns, name), _)) = attrs.into_iter().next() {
            log::debug!(
                "Ignoring unexpected stream header attribute: {{{}}}{}",
                ns,
                name
            );
        }

        Ok(StreamHeader {
            from: from.map(Cow::Owned),
            to: to.map(Cow::Owned),
            id: id.map(Cow::Owned),
        })
    }
}
