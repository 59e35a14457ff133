// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The SASL exchange of RFC 6120 § 6.4. Payloads are base64 on the wire
//! and raw bytes here.

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use minidom::Element;

use super::{expect_element, required_attr, Error, FromElementError};
use crate::ns;

/// Read the base64 payload of `<name xmlns=SASL>`. A lone `=` is an empty
/// payload.
fn decode_payload(elem: Element, name: &str) -> Result<(Element, Vec<u8>), FromElementError> {
    let elem = expect_element(elem, name, ns::SASL)?;
    let text = elem.text();
    let text = text.trim();
    let data = match text {
        "" | "=" => Vec::new(),
        text => Base64.decode(text).map_err(Error::text_parse_error)?,
    };
    Ok((elem, data))
}

fn payload_element(name: &str, data: &[u8]) -> Element {
    let text = if data.is_empty() {
        String::from("=")
    } else {
        Base64.encode(data)
    };
    Element::builder(name, ns::SASL).append(text).build()
}

/// Starts the exchange with the chosen mechanism and its initial response.
#[derive(Debug, Clone, PartialEq)]
pub struct Auth {
    /// Mechanism name, e.g. `SCRAM-SHA-1`.
    pub mechanism: String,

    /// Initial response.
    pub data: Vec<u8>,
}

impl TryFrom<Element> for Auth {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Auth, FromElementError> {
        let (elem, data) = decode_payload(elem, "auth")?;
        let mechanism = required_attr(&elem, "mechanism", "Missing SASL mechanism.")?;
        Ok(Auth {
            mechanism: mechanism.to_owned(),
            data,
        })
    }
}

impl From<Auth> for Element {
    fn from(auth: Auth) -> Element {
        let mut elem = payload_element("auth", &auth.data);
        elem.set_attr("mechanism", auth.mechanism);
        elem
    }
}

/// A server challenge, answered with a [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    /// Challenge data.
    pub data: Vec<u8>,
}

impl TryFrom<Element> for Challenge {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Challenge, FromElementError> {
        let (_, data) = decode_payload(elem, "challenge")?;
        Ok(Challenge { data })
    }
}

impl From<Challenge> for Element {
    fn from(challenge: Challenge) -> Element {
        payload_element("challenge", &challenge.data)
    }
}

/// The client's answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response data.
    pub data: Vec<u8>,
}

impl TryFrom<Element> for Response {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Response, FromElementError> {
        let (_, data) = decode_payload(elem, "response")?;
        Ok(Response { data })
    }
}

impl From<Response> for Element {
    fn from(response: Response) -> Element {
        payload_element("response", &response.data)
    }
}

/// The exchange succeeded, possibly with additional data to verify.
#[derive(Debug, Clone, PartialEq)]
pub struct Success {
    /// Additional data, empty if none.
    pub data: Vec<u8>,
}

impl TryFrom<Element> for Success {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Success, FromElementError> {
        let (_, data) = decode_payload(elem, "success")?;
        Ok(Success { data })
    }
}

impl From<Success> for Element {
    fn from(success: Success) -> Element {
        if success.data.is_empty() {
            Element::builder("success", ns::SASL).build()
        } else {
            payload_element("success", &success.data)
        }
    }
}

keywords! {
    /// SASL failure conditions, RFC 6120 § 6.5.
    pub enum SaslCondition {
        /// The client aborted the exchange.
        Aborted = "aborted",
        /// The account is disabled.
        AccountDisabled = "account-disabled",
        /// The credentials have expired.
        CredentialsExpired = "credentials-expired",
        /// The mechanism needs an encrypted stream.
        EncryptionRequired = "encryption-required",
        /// The base64 data could not be decoded.
        IncorrectEncoding = "incorrect-encoding",
        /// The authorization identity is invalid.
        InvalidAuthzid = "invalid-authzid",
        /// The mechanism is not supported.
        InvalidMechanism = "invalid-mechanism",
        /// The request is malformed.
        MalformedRequest = "malformed-request",
        /// The mechanism is weaker than the server allows.
        MechanismTooWeak = "mechanism-too-weak",
        /// The credentials are wrong.
        NotAuthorized = "not-authorized",
        /// A transient server problem, retrying later may work.
        TemporaryAuthFailure = "temporary-auth-failure",
    }
}

/// The exchange failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// Why.
    pub condition: SaslCondition,

    /// Human-readable description.
    pub text: Option<String>,
}

impl TryFrom<Element> for Failure {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Failure, FromElementError> {
        let elem = expect_element(elem, "failure", ns::SASL)?;
        let condition = elem
            .children()
            .filter(|child| child.has_ns(ns::SASL) && child.name() != "text")
            .find_map(|child| SaslCondition::from_keyword(child.name()))
            .ok_or(Error::Other("Missing or unknown SASL failure condition."))?;
        Ok(Failure {
            condition,
            text: super::child_text(&elem, "text", ns::SASL),
        })
    }
}

impl From<Failure> for Element {
    fn from(failure: Failure) -> Element {
        let mut elem = Element::builder("failure", ns::SASL)
            .append(Element::builder(failure.condition.as_str(), ns::SASL))
            .build();
        if let Some(text) = failure.text {
            elem.append_child(super::text_element("text", ns::SASL, text));
        }
        elem
    }
}
