// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The STARTTLS exchange (RFC 6120 § 5).

use minidom::Element;

use super::FromElementError;
use crate::ns;

/// `<starttls/>`, asking the server to upgrade the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request;

impl From<Request> for Element {
    fn from(_: Request) -> Element {
        Element::builder("starttls", ns::TLS).build()
    }
}

/// The server's answer to a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// `<proceed/>`: the TLS handshake starts right after.
    Proceed,

    /// `<failure/>`: the server will close the stream.
    Failure,
}

impl TryFrom<Element> for Response {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Response, FromElementError> {
        if !elem.has_ns(ns::TLS) {
            return Err(FromElementError::Mismatch(elem));
        }
        match elem.name() {
            "proceed" => Ok(Response::Proceed),
            "failure" => Ok(Response::Failure),
            _ => Err(FromElementError::Mismatch(elem)),
        }
    }
}

impl From<Response> for Element {
    fn from(response: Response) -> Element {
        let name = match response {
            Response::Proceed => "proceed",
            Response::Failure => "failure",
        };
        Element::builder(name, ns::TLS).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers() {
        let elem: Element = "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>"
            .parse()
            .unwrap();
        assert_eq!(Response::try_from(elem).unwrap(), Response::Proceed);

        let elem = Element::from(Response::Failure);
        assert_eq!(Response::try_from(elem).unwrap(), Response::Failure);
    }

    #[test]
    fn sasl_failure_is_not_a_tls_answer() {
        let elem: Element = "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>"
            .parse()
            .unwrap();
        assert!(matches!(
            Response::try_from(elem),
            Err(FromElementError::Mismatch(_))
        ));
    }
}
