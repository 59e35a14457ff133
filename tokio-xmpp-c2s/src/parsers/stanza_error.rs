// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza errors (RFC 6120 § 8.3).

use jid::Jid;
use minidom::Element;

use super::{child_text, expect_element, jid_attr, required_attr, text_element, Error, FromElementError};
use crate::ns;

keywords! {
    /// What the sender of an erroneous stanza should do next.
    pub enum ErrorType {
        /// Retry after providing credentials.
        Auth = "auth",
        /// Do not retry.
        Cancel = "cancel",
        /// Proceed, this was only a warning.
        Continue = "continue",
        /// Retry after changing the data sent.
        Modify = "modify",
        /// Retry after waiting.
        Wait = "wait",
    }
}

keywords! {
    /// Stanza error conditions, RFC 6120 § 8.3.3.
    pub enum StanzaCondition {
        /// Malformed or unexpected request.
        BadRequest = "bad-request",
        /// A resource or session with that name already exists.
        Conflict = "conflict",
        /// The feature is not implemented by the recipient.
        FeatureNotImplemented = "feature-not-implemented",
        /// The sender lacks the permissions.
        Forbidden = "forbidden",
        /// The recipient moved permanently.
        Gone = "gone",
        /// The server failed internally.
        InternalServerError = "internal-server-error",
        /// The addressed item does not exist.
        ItemNotFound = "item-not-found",
        /// An address is malformed.
        JidMalformed = "jid-malformed",
        /// The request violates the recipient's policy.
        NotAcceptable = "not-acceptable",
        /// No entity may perform this action.
        NotAllowed = "not-allowed",
        /// Credentials are needed first.
        NotAuthorized = "not-authorized",
        /// A local service policy was violated.
        PolicyViolation = "policy-violation",
        /// The recipient is temporarily unavailable.
        RecipientUnavailable = "recipient-unavailable",
        /// The recipient moved temporarily.
        Redirect = "redirect",
        /// Registration is needed first.
        RegistrationRequired = "registration-required",
        /// The recipient's domain does not exist.
        RemoteServerNotFound = "remote-server-not-found",
        /// The recipient's domain did not answer in time.
        RemoteServerTimeout = "remote-server-timeout",
        /// The server lacks the resources.
        ResourceConstraint = "resource-constraint",
        /// The service does not exist or is not offered to the sender.
        ServiceUnavailable = "service-unavailable",
        /// A subscription is needed first.
        SubscriptionRequired = "subscription-required",
        /// Anything else, also used for missing or unknown conditions.
        UndefinedCondition = "undefined-condition",
        /// The request came at the wrong time.
        UnexpectedRequest = "unexpected-request",
    }
}

/// The `<error/>` child of a stanza of type `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct StanzaError {
    /// What to do next.
    pub type_: ErrorType,

    /// The entity which raised the error, if it says so.
    pub by: Option<Jid>,

    /// The defined condition.
    pub condition: StanzaCondition,

    /// Human-readable description.
    pub text: Option<String>,

    /// Application-specific condition element.
    pub other: Option<Element>,
}

impl StanzaError {
    /// An error of this type and condition, with an optional description.
    pub fn new(type_: ErrorType, condition: StanzaCondition, text: Option<&str>) -> StanzaError {
        StanzaError {
            type_,
            by: None,
            condition,
            text: text.map(String::from),
            other: None,
        }
    }
}

impl TryFrom<Element> for StanzaError {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StanzaError, FromElementError> {
        let elem = expect_element(elem, "error", ns::JABBER_CLIENT)?;
        let type_ = required_attr(&elem, "type", "Stanza error without type.")?;
        let type_ = ErrorType::from_keyword(type_)
            .ok_or(Error::Other("Unknown stanza error type."))?;
        let condition = elem
            .children()
            .find(|child| child.has_ns(ns::XMPP_STANZAS) && child.name() != "text")
            .and_then(|child| StanzaCondition::from_keyword(child.name()))
            .unwrap_or(StanzaCondition::UndefinedCondition);
        let other = elem
            .children()
            .find(|child| !child.has_ns(ns::XMPP_STANZAS))
            .cloned();
        Ok(StanzaError {
            type_,
            by: jid_attr(&elem, "by")?,
            condition,
            text: child_text(&elem, "text", ns::XMPP_STANZAS),
            other,
        })
    }
}

impl From<StanzaError> for Element {
    fn from(error: StanzaError) -> Element {
        let mut elem = Element::builder("error", ns::JABBER_CLIENT)
            .attr("type", error.type_.as_str())
            .attr("by", error.by.map(|by| by.to_string()))
            .append(Element::builder(error.condition.as_str(), ns::XMPP_STANZAS))
            .build();
        if let Some(text) = error.text {
            elem.append_child(text_element("text", ns::XMPP_STANZAS, text));
        }
        if let Some(other) = error.other {
            elem.append_child(other);
        }
        elem
    }
}
