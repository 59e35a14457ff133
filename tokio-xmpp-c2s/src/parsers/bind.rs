// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! IQ payloads of the last two negotiation steps: resource binding
//! (RFC 6120 § 7) and legacy session establishment (RFC 3921 § 3).

use core::str::FromStr;

use jid::Jid;
use minidom::Element;

use super::{child_text, expect_element, text_element, Error, FromElementError};
use crate::ns;

/// Asks the server to bind a resource, the requested one if any.
#[derive(Debug, Clone, PartialEq)]
pub struct BindQuery {
    resource: Option<String>,
}

impl BindQuery {
    /// Request `resource`, or let the server pick one.
    pub fn new(resource: Option<String>) -> BindQuery {
        BindQuery { resource }
    }

    /// The requested resource.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }
}

impl TryFrom<Element> for BindQuery {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<BindQuery, FromElementError> {
        let elem = expect_element(elem, "bind", ns::BIND)?;
        Ok(BindQuery {
            resource: child_text(&elem, "resource", ns::BIND),
        })
    }
}

impl From<BindQuery> for Element {
    fn from(bind: BindQuery) -> Element {
        let mut elem = Element::builder("bind", ns::BIND).build();
        if let Some(resource) = bind.resource {
            elem.append_child(text_element("resource", ns::BIND, resource));
        }
        elem
    }
}

/// The server's answer to a [`BindQuery`]: the full address of this
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct BindResponse {
    jid: Jid,
}

impl BindResponse {
    /// Wrap an assigned address.
    pub fn new(jid: Jid) -> BindResponse {
        BindResponse { jid }
    }

    /// The assigned address.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }
}

impl From<BindResponse> for Jid {
    fn from(bind: BindResponse) -> Jid {
        bind.jid
    }
}

impl TryFrom<Element> for BindResponse {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<BindResponse, FromElementError> {
        let elem = expect_element(elem, "bind", ns::BIND)?;
        let text = child_text(&elem, "jid", ns::BIND)
            .ok_or(Error::Other("Bind response without jid."))?;
        let jid = Jid::from_str(text.trim()).map_err(Error::text_parse_error)?;
        Ok(BindResponse { jid })
    }
}

impl From<BindResponse> for Element {
    fn from(bind: BindResponse) -> Element {
        Element::builder("bind", ns::BIND)
            .append(text_element("jid", ns::BIND, bind.jid.to_string()))
            .build()
    }
}

/// `<session/>`, answered even by servers which treat it as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Session;

impl TryFrom<Element> for Session {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Session, FromElementError> {
        expect_element(elem, "session", ns::SESSION).map(|_| Session)
    }
}

impl From<Session> for Element {
    fn from(_: Session) -> Element {
        Element::builder("session", ns::SESSION).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_with_and_without_resource() {
        let elem = Element::from(BindQuery::new(Some(String::from("balcony"))));
        assert_eq!(
            elem.get_child("resource", ns::BIND).map(Element::text).as_deref(),
            Some("balcony")
        );
        assert_eq!(BindQuery::try_from(elem).unwrap().resource(), Some("balcony"));

        let elem = Element::from(BindQuery::new(None));
        assert!(elem.children().next().is_none());
        assert_eq!(BindQuery::try_from(elem).unwrap().resource(), None);
    }

    #[test]
    fn response_jid() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@example.com/4db06f06</jid></bind>"
            .parse()
            .unwrap();
        let response = BindResponse::try_from(elem).unwrap();
        assert_eq!(response.jid().resource(), Some("4db06f06"));
        assert_eq!(
            Jid::from(response),
            Jid::new("juliet@example.com/4db06f06").unwrap()
        );
    }

    #[test]
    fn response_without_usable_jid() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>"
            .parse()
            .unwrap();
        let message = BindResponse::try_from(elem).unwrap_err().to_string();
        assert_eq!(message, "Bind response without jid.");

        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@</jid></bind>"
            .parse()
            .unwrap();
        assert!(matches!(
            BindResponse::try_from(elem),
            Err(FromElementError::Invalid(Error::TextParseError(_)))
        ));
    }

    #[test]
    fn session() {
        let elem: Element =
            "<session xmlns='urn:ietf:params:xml:ns:xmpp-session'><optional/></session>"
                .parse()
                .unwrap();
        assert_eq!(Session::try_from(elem).unwrap(), Session);
        assert!(Element::from(Session).is("session", ns::SESSION));
    }
}
