// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `<message/>` stanzas.

use jid::Jid;
use minidom::Element;

use super::{child_text, expect_element, jid_attr, text_element, Error, FromElementError};
use crate::ns;

keywords! {
    /// The `type` of a message.
    pub enum MessageType {
        /// One to one chat.
        Chat = "chat",
        /// Reports an error about a previous message.
        Error = "error",
        /// Multi-user chat.
        Groupchat = "groupchat",
        /// Alert, no reply expected.
        Headline = "headline",
        /// Standalone message, the default.
        Normal = "normal",
    }
}

impl Default for MessageType {
    fn default() -> MessageType {
        MessageType::Normal
    }
}

/// A `<message/>` stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Sender.
    pub from: Option<Jid>,

    /// Recipient.
    pub to: Option<Jid>,

    /// Identifier, assigned on send if missing.
    pub id: Option<String>,

    /// Message type, `normal` if absent.
    pub type_: MessageType,

    /// Text of the first `<body/>`.
    pub body: Option<String>,

    /// Text of the first `<subject/>`.
    pub subject: Option<String>,

    /// Text of the first `<thread/>`.
    pub thread: Option<String>,

    /// Every other child.
    pub payloads: Vec<Element>,
}

impl Message {
    /// An empty message of this type.
    pub fn new(type_: MessageType, to: Option<Jid>) -> Message {
        Message {
            from: None,
            to,
            id: None,
            type_,
            body: None,
            subject: None,
            thread: None,
            payloads: Vec::new(),
        }
    }

    /// An empty chat message to `to`.
    pub fn chat(to: Jid) -> Message {
        Message::new(MessageType::Chat, Some(to))
    }

    /// Set the body.
    pub fn with_body<S: Into<String>>(mut self, body: S) -> Message {
        self.body = Some(body.into());
        self
    }

    /// Add an extension element.
    pub fn with_payload<P: Into<Element>>(mut self, payload: P) -> Message {
        self.payloads.push(payload.into());
        self
    }
}

impl TryFrom<Element> for Message {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Message, FromElementError> {
        let elem = expect_element(elem, "message", ns::JABBER_CLIENT)?;
        let type_ = match elem.attr("type") {
            None => MessageType::default(),
            Some(type_) => {
                MessageType::from_keyword(type_).ok_or(Error::Other("Unknown message type."))?
            }
        };
        let payloads = elem
            .children()
            .filter(|child| {
                !(child.has_ns(ns::JABBER_CLIENT)
                    && matches!(child.name(), "body" | "subject" | "thread"))
            })
            .cloned()
            .collect();
        Ok(Message {
            from: jid_attr(&elem, "from")?,
            to: jid_attr(&elem, "to")?,
            id: elem.attr("id").map(String::from),
            type_,
            body: child_text(&elem, "body", ns::JABBER_CLIENT),
            subject: child_text(&elem, "subject", ns::JABBER_CLIENT),
            thread: child_text(&elem, "thread", ns::JABBER_CLIENT),
            payloads,
        })
    }
}

impl From<Message> for Element {
    fn from(message: Message) -> Element {
        let mut elem = Element::builder("message", ns::JABBER_CLIENT)
            .attr("from", message.from.map(|jid| jid.to_string()))
            .attr("to", message.to.map(|jid| jid.to_string()))
            .attr("id", message.id)
            .attr("type", message.type_.as_str())
            .build();
        for (name, text) in [
            ("subject", message.subject),
            ("body", message.body),
            ("thread", message.thread),
        ] {
            if let Some(text) = text {
                elem.append_child(text_element(name, ns::JABBER_CLIENT, text));
            }
        }
        for payload in message.payloads {
            elem.append_child(payload);
        }
        elem
    }
}
