// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use minidom::Element;
use rand::{thread_rng, Rng};

use crate::ns;
use crate::parsers::{
    iq::Iq, message::Message, presence::Presence, stream::StreamError, FromElementError,
};

pub(crate) fn make_id() -> String {
    let id: u64 = thread_rng().gen();
    format!("{}", id)
}

/// A top-level element received once the session is established.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    /// IQ stanza
    Iq(Iq),

    /// Message stanza
    Message(Message),

    /// Presence stanza
    Presence(Presence),

    /// Stream-level error, the peer is about to close the stream
    StreamError(StreamError),

    /// Anything else, left untouched
    Other(Element),
}

impl Stanza {
    /// Classify an element by its name.
    ///
    /// Elements named like a stanza but failing to parse as one are
    /// reported as errors. Any `error` in the streams namespace is a
    /// [`Stanza::StreamError`], whatever its condition. Elements with
    /// unknown names become [`Stanza::Other`].
    pub fn classify(elem: Element) -> Result<Stanza, FromElementError> {
        Ok(match elem.name() {
            "iq" if elem.ns() == ns::JABBER_CLIENT => Stanza::Iq(Iq::try_from(elem)?),
            "message" if elem.ns() == ns::JABBER_CLIENT => {
                Stanza::Message(Message::try_from(elem)?)
            }
            "presence" if elem.ns() == ns::JABBER_CLIENT => {
                Stanza::Presence(Presence::try_from(elem)?)
            }
            "error" if elem.ns() == ns::STREAM => Stanza::StreamError(StreamError::read(&elem)),
            _ => Stanza::Other(elem),
        })
    }

    /// Assign a random ID to the stanza, if no ID has been assigned yet.
    ///
    /// Returns `None` for stream errors and unclassified elements.
    pub fn ensure_id(&mut self) -> Option<&str> {
        match self {
            Self::Iq(iq) => {
                if iq.id.is_empty() {
                    iq.id = make_id();
                }
                Some(&iq.id)
            }
            Self::Message(message) => Some(message.id.get_or_insert_with(make_id).as_str()),
            Self::Presence(presence) => Some(presence.id.get_or_insert_with(make_id).as_str()),
            Self::StreamError(_) | Self::Other(_) => None,
        }
    }
}

impl From<Iq> for Stanza {
    fn from(other: Iq) -> Self {
        Self::Iq(other)
    }
}

impl From<Presence> for Stanza {
    fn from(other: Presence) -> Self {
        Self::Presence(other)
    }
}

impl From<Message> for Stanza {
    fn from(other: Message) -> Self {
        Self::Message(other)
    }
}

impl From<Stanza> for Element {
    fn from(other: Stanza) -> Self {
        match other {
            Stanza::Iq(st) => st.into(),
            Stanza::Message(st) => st.into(),
            Stanza::Presence(st) => st.into(),
            Stanza::StreamError(st) => st.into(),
            Stanza::Other(elem) => elem,
        }
    }
}
