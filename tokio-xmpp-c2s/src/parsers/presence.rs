// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `<presence/>` stanzas.

use jid::Jid;
use minidom::Element;

use super::{child_text, expect_element, jid_attr, text_element, Error, FromElementError};
use crate::ns;

keywords! {
    /// The `type` of a presence. Absent means available.
    pub enum PresenceType {
        /// Reports an error about a previous presence.
        Error = "error",
        /// Asks for the recipient's current presence.
        Probe = "probe",
        /// Asks to subscribe to the recipient's presence.
        Subscribe = "subscribe",
        /// Grants a subscription.
        Subscribed = "subscribed",
        /// The sender went offline.
        Unavailable = "unavailable",
        /// Cancels a subscription to the recipient.
        Unsubscribe = "unsubscribe",
        /// Denies or revokes a subscription.
        Unsubscribed = "unsubscribed",
    }
}

keywords! {
    /// Availability detail of an available resource.
    pub enum Show {
        /// Temporarily away.
        Away = "away",
        /// Eager to chat.
        Chat = "chat",
        /// Do not disturb.
        Dnd = "dnd",
        /// Away for a long time.
        Xa = "xa",
    }
}

/// A `<presence/>` stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    /// Sender.
    pub from: Option<Jid>,

    /// Recipient, `None` for a broadcast.
    pub to: Option<Jid>,

    /// Identifier, assigned on send if missing.
    pub id: Option<String>,

    /// Type, `None` meaning available.
    pub type_: Option<PresenceType>,

    /// Availability detail.
    pub show: Option<Show>,

    /// Text of the first `<status/>`.
    pub status: Option<String>,

    /// Resource priority, 0 if absent.
    pub priority: i8,

    /// Every other child.
    pub payloads: Vec<Element>,
}

impl Presence {
    /// An empty presence of this type.
    pub fn new(type_: Option<PresenceType>) -> Presence {
        Presence {
            from: None,
            to: None,
            id: None,
            type_,
            show: None,
            status: None,
            priority: 0,
            payloads: Vec::new(),
        }
    }

    /// `<presence/>`, announcing availability.
    pub fn available() -> Presence {
        Presence::new(None)
    }

    /// Set the recipient.
    pub fn with_to(mut self, to: Jid) -> Presence {
        self.to = Some(to);
        self
    }

    /// Set the availability detail.
    pub fn with_show(mut self, show: Show) -> Presence {
        self.show = Some(show);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i8) -> Presence {
        self.priority = priority;
        self
    }
}

impl TryFrom<Element> for Presence {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Presence, FromElementError> {
        let elem = expect_element(elem, "presence", ns::JABBER_CLIENT)?;
        let mut presence = Presence::new(None);
        if let Some(type_) = elem.attr("type") {
            presence.type_ = Some(
                PresenceType::from_keyword(type_).ok_or(Error::Other("Unknown presence type."))?,
            );
        }
        presence.from = jid_attr(&elem, "from")?;
        presence.to = jid_attr(&elem, "to")?;
        presence.id = elem.attr("id").map(String::from);
        if let Some(show) = child_text(&elem, "show", ns::JABBER_CLIENT) {
            presence.show = Some(
                Show::from_keyword(show.trim()).ok_or(Error::Other("Unknown presence show."))?,
            );
        }
        presence.status = child_text(&elem, "status", ns::JABBER_CLIENT);
        if let Some(priority) = child_text(&elem, "priority", ns::JABBER_CLIENT) {
            presence.priority = priority
                .trim()
                .parse()
                .map_err(Error::text_parse_error)?;
        }
        presence.payloads = elem
            .children()
            .filter(|child| {
                !(child.has_ns(ns::JABBER_CLIENT)
                    && matches!(child.name(), "show" | "status" | "priority"))
            })
            .cloned()
            .collect();
        Ok(presence)
    }
}

impl From<Presence> for Element {
    fn from(presence: Presence) -> Element {
        let mut elem = Element::builder("presence", ns::JABBER_CLIENT)
            .attr("from", presence.from.map(|jid| jid.to_string()))
            .attr("to", presence.to.map(|jid| jid.to_string()))
            .attr("id", presence.id)
            .attr("type", presence.type_.map(PresenceType::as_str))
            .build();
        if let Some(show) = presence.show {
            elem.append_child(text_element("show", ns::JABBER_CLIENT, show.to_string()));
        }
        if let Some(status) = presence.status {
            elem.append_child(text_element("status", ns::JABBER_CLIENT, status));
        }
        if presence.priority != 0 {
            elem.append_child(text_element(
                "priority",
                ns::JABBER_CLIENT,
                presence.priority.to_string(),
            ));
        }
        for payload in presence.payloads {
            elem.append_child(payload);
        }
        elem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_is_bare() {
        let elem = Element::from(Presence::available());
        assert!(elem.is("presence", ns::JABBER_CLIENT));
        assert_eq!(elem.attr("type"), None);
        assert!(elem.children().next().is_none());
    }

    #[test]
    fn show_status_priority() {
        let elem: Element = "<presence xmlns='jabber:client' from='romeo@example.net/orchard'>
                <show>dnd</show>
                <status>Wooing Juliet</status>
                <priority>-1</priority>
                <c xmlns='http://jabber.org/protocol/caps'/>
            </presence>"
            .parse()
            .unwrap();
        let presence = Presence::try_from(elem).unwrap();
        assert_eq!(presence.type_, None);
        assert_eq!(presence.show, Some(Show::Dnd));
        assert_eq!(presence.status.as_deref(), Some("Wooing Juliet"));
        assert_eq!(presence.priority, -1);
        assert_eq!(presence.payloads.len(), 1);
        assert_eq!(Presence::try_from(Element::from(presence.clone())).unwrap(), presence);
    }

    #[test]
    fn unavailable() {
        let presence = Presence::new(Some(PresenceType::Unavailable))
            .with_to(Jid::new("juliet@example.com").unwrap())
            .with_show(Show::Away)
            .with_priority(5);
        let elem = Element::from(presence.clone());
        assert_eq!(elem.attr("type"), Some("unavailable"));
        assert_eq!(Presence::try_from(elem).unwrap(), presence);
    }

    #[test]
    fn bad_values() {
        let elem: Element = "<presence xmlns='jabber:client' type='online'/>"
            .parse()
            .unwrap();
        assert!(Presence::try_from(elem).is_err());

        let elem: Element = "<presence xmlns='jabber:client'><priority>high</priority></presence>"
            .parse()
            .unwrap();
        assert!(matches!(
            Presence::try_from(elem),
            Err(FromElementError::Invalid(Error::TextParseError(_)))
        ));
    }
}
