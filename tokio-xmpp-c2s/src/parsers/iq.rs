// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `<iq/>` stanzas.

use jid::Jid;
use minidom::Element;

use super::stanza_error::StanzaError;
use super::{expect_element, jid_attr, required_attr, Error, FromElementError};
use crate::ns;

/// The type of an `<iq/>` and what it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum IqType {
    /// A query, the payload says for what.
    Get(Element),

    /// A change request, the payload says which.
    Set(Element),

    /// The answer to a get or set, possibly with data.
    Result(Option<Element>),

    /// The request failed.
    Error(StanzaError),
}

impl IqType {
    fn as_str(&self) -> &'static str {
        match self {
            IqType::Get(_) => "get",
            IqType::Set(_) => "set",
            IqType::Result(_) => "result",
            IqType::Error(_) => "error",
        }
    }
}

/// An `<iq/>` stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct Iq {
    /// Sender.
    pub from: Option<Jid>,

    /// Recipient.
    pub to: Option<Jid>,

    /// Matches a response to its request. Empty until assigned on send.
    pub id: String,

    /// Type and payload.
    pub payload: IqType,
}

impl Iq {
    fn with_payload<S: Into<String>>(id: S, payload: IqType) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload,
        }
    }

    /// A get request.
    pub fn from_get<S: Into<String>>(id: S, payload: impl Into<Element>) -> Iq {
        Iq::with_payload(id, IqType::Get(payload.into()))
    }

    /// A set request.
    pub fn from_set<S: Into<String>>(id: S, payload: impl Into<Element>) -> Iq {
        Iq::with_payload(id, IqType::Set(payload.into()))
    }

    /// A result, with or without data.
    pub fn from_result<S: Into<String>>(id: S, payload: Option<impl Into<Element>>) -> Iq {
        Iq::with_payload(id, IqType::Result(payload.map(Into::into)))
    }

    /// An empty result addressed to `to`.
    pub fn empty_result<S: Into<String>>(to: Jid, id: S) -> Iq {
        Iq::with_payload(id, IqType::Result(None)).with_to(to)
    }

    /// An error answer.
    pub fn from_error<S: Into<String>>(id: S, error: StanzaError) -> Iq {
        Iq::with_payload(id, IqType::Error(error))
    }

    /// Set the recipient.
    pub fn with_to(mut self, to: Jid) -> Iq {
        self.to = Some(to);
        self
    }

    /// Set the sender.
    pub fn with_from(mut self, from: Jid) -> Iq {
        self.from = Some(from);
        self
    }

    /// Whether this is a get or set, which must be answered.
    pub fn is_request(&self) -> bool {
        matches!(self.payload, IqType::Get(_) | IqType::Set(_))
    }
}

impl TryFrom<Element> for Iq {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Iq, FromElementError> {
        let elem = expect_element(elem, "iq", ns::JABBER_CLIENT)?;
        let id = required_attr(&elem, "id", "Iq without id.")?.to_owned();
        let type_ = required_attr(&elem, "type", "Iq without type.")?;

        let payload = match type_ {
            "get" | "set" => {
                let mut children = elem.children();
                let payload = match (children.next(), children.next()) {
                    (Some(payload), None) => payload.clone(),
                    _ => return Err(Error::Other("Iq request needs exactly one payload.").into()),
                };
                if type_ == "get" {
                    IqType::Get(payload)
                } else {
                    IqType::Set(payload)
                }
            }
            "result" => IqType::Result(elem.children().next().cloned()),
            "error" => {
                // The failed request may be echoed next to the error.
                let error = elem
                    .get_child("error", ns::JABBER_CLIENT)
                    .ok_or(Error::Other("Iq error without error element."))?;
                IqType::Error(StanzaError::try_from(error.clone())?)
            }
            _ => return Err(Error::Other("Unknown iq type.").into()),
        };

        Ok(Iq {
            from: jid_attr(&elem, "from")?,
            to: jid_attr(&elem, "to")?,
            id,
            payload,
        })
    }
}

impl From<Iq> for Element {
    fn from(iq: Iq) -> Element {
        let mut elem = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("from", iq.from.map(|jid| jid.to_string()))
            .attr("to", iq.to.map(|jid| jid.to_string()))
            .attr("id", iq.id)
            .attr("type", iq.payload.as_str())
            .build();
        let child = match iq.payload {
            IqType::Get(payload) | IqType::Set(payload) => payload,
            IqType::Result(Some(payload)) => payload,
            IqType::Result(None) => return elem,
            IqType::Error(error) => error.into(),
        };
        elem.append_child(child);
        elem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::stanza_error::{ErrorType, StanzaCondition};

    #[test]
    fn id_and_type_are_required() {
        let elem: Element = "<iq xmlns='jabber:client' id='a'/>".parse().unwrap();
        assert_eq!(Iq::try_from(elem).unwrap_err().to_string(), "Iq without type.");

        let elem: Element = "<iq xmlns='jabber:client' type='get'/>".parse().unwrap();
        assert_eq!(Iq::try_from(elem).unwrap_err().to_string(), "Iq without id.");

        let elem: Element = "<iq xmlns='jabber:client' type='poke' id='a'/>".parse().unwrap();
        assert_eq!(Iq::try_from(elem).unwrap_err().to_string(), "Unknown iq type.");
    }

    #[test]
    fn get_request() {
        let elem: Element = "<iq xmlns='jabber:client' type='get' id='foo' from='peer@example.com/x'>
            <ping xmlns='urn:xmpp:ping'/>
        </iq>"
            .parse()
            .unwrap();
        let iq = Iq::try_from(elem).unwrap();
        assert_eq!(iq.from, Some(Jid::new("peer@example.com/x").unwrap()));
        assert_eq!(iq.id, "foo");
        assert!(iq.is_request());
        match iq.payload {
            IqType::Get(payload) => assert!(payload.is("ping", "urn:xmpp:ping")),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn request_payload_count() {
        let elem: Element = "<iq xmlns='jabber:client' type='set' id='s'/>".parse().unwrap();
        assert!(Iq::try_from(elem).is_err());

        let elem: Element = "<iq xmlns='jabber:client' type='get' id='g'><a xmlns='urn:a'/><b xmlns='urn:b'/></iq>"
            .parse()
            .unwrap();
        assert!(Iq::try_from(elem).is_err());
    }

    #[test]
    fn error_echoing_the_request() {
        let elem: Element = "<iq xmlns='jabber:client' type='error' id='err1'>
            <ping xmlns='urn:xmpp:ping'/>
            <error type='cancel'>
                <service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>
            </error>
        </iq>"
            .parse()
            .unwrap();
        let iq = Iq::try_from(elem).unwrap();
        assert!(!iq.is_request());
        match iq.payload {
            IqType::Error(error) => {
                assert_eq!(error.type_, ErrorType::Cancel);
                assert_eq!(error.condition, StanzaCondition::ServiceUnavailable);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn serialise() {
        let iq = Iq::from_error(
            "q1",
            StanzaError::new(ErrorType::Cancel, StanzaCondition::ServiceUnavailable, None),
        )
        .with_to(Jid::new("peer@example.com/x").unwrap());
        let elem = Element::from(iq.clone());
        assert_eq!(elem.attr("type"), Some("error"));
        assert_eq!(elem.attr("to"), Some("peer@example.com/x"));
        assert_eq!(elem.attr("from"), None);
        assert_eq!(Iq::try_from(elem).unwrap(), iq);

        let elem = Element::from(Iq::empty_result(Jid::new("example.com").unwrap(), "r1"));
        assert_eq!(elem.attr("type"), Some("result"));
        assert!(elem.children().next().is_none());
    }
}
