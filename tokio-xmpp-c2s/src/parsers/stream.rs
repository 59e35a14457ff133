// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Top-level elements of the stream namespace: `<stream:features/>` and
//! `<stream:error/>`.

use core::fmt;

use minidom::Element;

use super::{expect_element, FromElementError};
use crate::ns;

/// What the server offers after a stream header.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamFeatures {
    /// `<starttls/>` is offered, `Some(true)` if flagged `<required/>`.
    pub starttls: Option<bool>,

    /// SASL mechanism names, in server order.
    pub sasl_mechanisms: Vec<String>,

    /// Resource binding is offered.
    pub bind: bool,

    /// Legacy session establishment is offered.
    pub session: bool,

    /// Features this crate does not negotiate.
    pub others: Vec<Element>,
}

impl StreamFeatures {
    /// Whether STARTTLS can be requested.
    pub fn can_starttls(&self) -> bool {
        self.starttls.is_some()
    }

    /// Whether the server refuses to go on without TLS.
    pub fn requires_starttls(&self) -> bool {
        self.starttls == Some(true)
    }

    /// Whether resource binding is offered.
    pub fn can_bind(&self) -> bool {
        self.bind
    }
}

impl TryFrom<Element> for StreamFeatures {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StreamFeatures, FromElementError> {
        let elem = expect_element(elem, "features", ns::STREAM)?;
        let mut features = StreamFeatures::default();
        for child in elem.children() {
            if child.is("starttls", ns::TLS) {
                features.starttls = Some(child.has_child("required", ns::TLS));
            } else if child.is("mechanisms", ns::SASL) {
                features.sasl_mechanisms.extend(
                    child
                        .children()
                        .filter(|mechanism| mechanism.is("mechanism", ns::SASL))
                        .map(|mechanism| mechanism.text().trim().to_owned()),
                );
            } else if child.is("bind", ns::BIND) {
                features.bind = true;
            } else if child.is("session", ns::SESSION) {
                features.session = true;
            } else {
                features.others.push(child.clone());
            }
        }
        Ok(features)
    }
}

impl From<StreamFeatures> for Element {
    fn from(features: StreamFeatures) -> Element {
        let mut elem = Element::builder("features", ns::STREAM).build();
        if let Some(required) = features.starttls {
            let mut starttls = Element::builder("starttls", ns::TLS).build();
            if required {
                starttls.append_child(Element::builder("required", ns::TLS).build());
            }
            elem.append_child(starttls);
        }
        if !features.sasl_mechanisms.is_empty() {
            elem.append_child(
                Element::builder("mechanisms", ns::SASL)
                    .append_all(
                        features
                            .sasl_mechanisms
                            .into_iter()
                            .map(|name| Element::builder("mechanism", ns::SASL).append(name)),
                    )
                    .build(),
            );
        }
        if features.bind {
            elem.append_child(Element::builder("bind", ns::BIND).build());
        }
        if features.session {
            elem.append_child(Element::builder("session", ns::SESSION).build());
        }
        for other in features.others {
            elem.append_child(other);
        }
        elem
    }
}

keywords! {
    /// Stream error conditions, RFC 6120 § 4.9.3.
    pub enum StreamCondition {
        /// XML that cannot be processed.
        BadFormat = "bad-format",
        /// Unsupported or missing namespace prefix.
        BadNamespacePrefix = "bad-namespace-prefix",
        /// A new stream for the same entity replaced this one.
        Conflict = "conflict",
        /// The peer is believed to be gone.
        ConnectionTimeout = "connection-timeout",
        /// The `to` domain is no longer serviced here.
        HostGone = "host-gone",
        /// The `to` domain is not serviced here.
        HostUnknown = "host-unknown",
        /// A stanza lacks a required address.
        ImproperAddressing = "improper-addressing",
        /// The server is misconfigured or broken.
        InternalServerError = "internal-server-error",
        /// The `from` address is not authorized.
        InvalidFrom = "invalid-from",
        /// Wrong stream or content namespace.
        InvalidNamespace = "invalid-namespace",
        /// XML that failed validation.
        InvalidXml = "invalid-xml",
        /// Data sent before authentication.
        NotAuthorized = "not-authorized",
        /// XML that is not well-formed.
        NotWellFormed = "not-well-formed",
        /// A local service policy was violated.
        PolicyViolation = "policy-violation",
        /// A remote entity needed for authentication is unreachable.
        RemoteConnectionFailed = "remote-connection-failed",
        /// Security context or features changed, the stream must be redone.
        Reset = "reset",
        /// The server lacks resources for this stream.
        ResourceConstraint = "resource-constraint",
        /// Comments, processing instructions or other restricted XML.
        RestrictedXml = "restricted-xml",
        /// Connect to another host, see [`StreamError::other_host`].
        SeeOtherHost = "see-other-host",
        /// The server is shutting down.
        SystemShutdown = "system-shutdown",
        /// Anything else, also used for missing or unknown conditions.
        UndefinedCondition = "undefined-condition",
        /// Unsupported stream encoding.
        UnsupportedEncoding = "unsupported-encoding",
        /// A mandatory feature is not supported by the client.
        UnsupportedFeature = "unsupported-feature",
        /// A top-level element the server does not support.
        UnsupportedStanzaType = "unsupported-stanza-type",
        /// Unsupported XMPP version.
        UnsupportedVersion = "unsupported-version",
    }
}

/// A `<stream:error/>`, after which the stream is dead.
///
/// Parsing never rejects an error in the stream namespace: a missing or
/// unknown condition reads as
/// [`UndefinedCondition`][`StreamCondition::UndefinedCondition`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamError {
    /// The defined condition.
    pub condition: StreamCondition,

    /// Target given by a `see-other-host` condition.
    pub other_host: Option<String>,

    /// Human-readable description.
    pub text: Option<String>,

    /// Application-specific condition element.
    pub application_specific: Option<Element>,
}

impl StreamError {
    /// An error with just a condition.
    pub fn new(condition: StreamCondition) -> StreamError {
        StreamError {
            condition,
            other_host: None,
            text: None,
            application_specific: None,
        }
    }
}

impl StreamError {
    /// Read the condition, text and application-specific element of an
    /// error whose name and namespace the caller already checked.
    pub fn read(elem: &Element) -> StreamError {
        let mut error = StreamError::new(StreamCondition::UndefinedCondition);
        let mut condition_seen = false;
        for child in elem.children() {
            if child.is("text", ns::XMPP_STREAMS) {
                if error.text.is_none() {
                    error.text = Some(child.text());
                }
            } else if child.has_ns(ns::XMPP_STREAMS) {
                if condition_seen {
                    continue;
                }
                condition_seen = true;
                if let Some(condition) = StreamCondition::from_keyword(child.name()) {
                    error.condition = condition;
                    if condition == StreamCondition::SeeOtherHost {
                        error.other_host = Some(child.text());
                    }
                }
            } else if error.application_specific.is_none() {
                error.application_specific = Some(child.clone());
            }
        }
        error
    }
}

impl TryFrom<Element> for StreamError {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StreamError, FromElementError> {
        let elem = expect_element(elem, "error", ns::STREAM)?;
        Ok(StreamError::read(&elem))
    }
}

impl From<StreamError> for Element {
    fn from(error: StreamError) -> Element {
        let condition = Element::builder(error.condition.as_str(), ns::XMPP_STREAMS)
            .append_all(error.other_host)
            .build();
        let mut elem = Element::builder("error", ns::STREAM)
            .append(condition)
            .build();
        if let Some(text) = error.text {
            elem.append_child(super::text_element("text", ns::XMPP_STREAMS, text));
        }
        if let Some(application_specific) = error.application_specific {
            elem.append_child(application_specific);
        }
        elem
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.condition.as_str())?;
        if let Some(host) = &self.other_host {
            write!(f, ": {}", host)?;
        }
        if let Some(text) = &self.text {
            write!(f, " ({:?})", text)?;
        }
        if let Some(application_specific) = &self.application_specific {
            write!(f, " <{}/>", application_specific.name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starttls_required() {
        let elem: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>
                <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>
            </stream:features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert!(features.can_starttls());
        assert!(features.requires_starttls());
        assert!(!features.can_bind());
        assert!(features.sasl_mechanisms.is_empty());
    }

    #[test]
    fn mechanisms_bind_and_others() {
        let elem: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>
                <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>
                    <mechanism>SCRAM-SHA-1</mechanism>
                    <mechanism> PLAIN </mechanism>
                </mechanisms>
                <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>
                <session xmlns='urn:ietf:params:xml:ns:xmpp-session'><optional/></session>
                <sm xmlns='urn:xmpp:sm:3'/>
            </stream:features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert!(!features.can_starttls());
        assert!(features.can_bind());
        assert!(features.session);
        assert_eq!(features.sasl_mechanisms, ["SCRAM-SHA-1", "PLAIN"]);
        assert_eq!(features.others.len(), 1);
        assert!(features.others[0].is("sm", "urn:xmpp:sm:3"));
    }

    #[test]
    fn features_serialise() {
        let features = StreamFeatures {
            starttls: Some(false),
            sasl_mechanisms: vec![String::from("PLAIN")],
            bind: true,
            ..StreamFeatures::default()
        };
        let elem = Element::from(features.clone());
        assert!(elem.get_child("starttls", ns::TLS).unwrap().children().next().is_none());
        assert_eq!(StreamFeatures::try_from(elem).unwrap(), features);
    }

    #[test]
    fn features_in_wrong_namespace() {
        let elem: Element = "<features xmlns='jabber:client'/>".parse().unwrap();
        assert!(matches!(
            StreamFeatures::try_from(elem),
            Err(FromElementError::Mismatch(_))
        ));
    }

    #[test]
    fn error_with_prefix() {
        let elem: Element = "<stream:error xmlns:stream='http://etherx.jabber.org/streams'><not-well-formed xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error>"
            .parse()
            .unwrap();
        let error = StreamError::try_from(elem).unwrap();
        assert_eq!(error, StreamError::new(StreamCondition::NotWellFormed));
        assert_eq!(error.to_string(), "not-well-formed");
    }

    #[test]
    fn error_see_other_host() {
        let elem: Element = "<error xmlns='http://etherx.jabber.org/streams'>
                <see-other-host xmlns='urn:ietf:params:xml:ns:xmpp-streams'>[2001:41D0:1:A49b::1]:9222</see-other-host>
                <text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>moved</text>
            </error>"
            .parse()
            .unwrap();
        let error = StreamError::try_from(elem).unwrap();
        assert_eq!(error.condition, StreamCondition::SeeOtherHost);
        assert_eq!(error.other_host.as_deref(), Some("[2001:41D0:1:A49b::1]:9222"));
        assert_eq!(
            error.to_string(),
            "see-other-host: [2001:41D0:1:A49b::1]:9222 (\"moved\")"
        );

        let reparsed = StreamError::try_from(Element::from(error.clone())).unwrap();
        assert_eq!(reparsed, error);
    }

    #[test]
    fn error_without_known_condition() {
        let elem: Element = "<error xmlns='http://etherx.jabber.org/streams'/>"
            .parse()
            .unwrap();
        let error = StreamError::try_from(elem).unwrap();
        assert_eq!(error.condition, StreamCondition::UndefinedCondition);

        let elem: Element = "<error xmlns='http://etherx.jabber.org/streams'><out-of-coffee xmlns='urn:ietf:params:xml:ns:xmpp-streams'/><text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>brb</text></error>"
            .parse()
            .unwrap();
        let error = StreamError::try_from(elem).unwrap();
        assert_eq!(error.condition, StreamCondition::UndefinedCondition);
        assert_eq!(error.text.as_deref(), Some("brb"));
    }
}
