// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Callbacks notified by a running [`Client`][`crate::Client`].
//!
//! Callbacks run synchronously on the connection task, in registration
//! order. They must not block; to answer a stanza, capture a
//! [`StanzaSender`][`crate::StanzaSender`] obtained from the builder and
//! send through it.

use std::sync::Arc;

use minidom::Element;

use crate::error::Error;
use crate::jid::Jid;
use crate::parsers::{
    iq::{Iq, IqType},
    message::Message,
    presence::Presence,
    stanza_error::{ErrorType, StanzaCondition, StanzaError},
};
use crate::xmlstream::{Direction, ElementTap};

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;
type ElementCallback = Box<dyn Fn(Direction, &Element) + Send + Sync>;

/// Answers IQ requests (`get` and `set`).
pub trait IqHandler: Send + Sync {
    /// Build the reply to `iq`, or return `None` to leave it to the next
    /// handler.
    fn handle(&self, iq: &Iq) -> Option<Iq>;
}

impl<F> IqHandler for F
where
    F: Fn(&Iq) -> Option<Iq> + Send + Sync,
{
    fn handle(&self, iq: &Iq) -> Option<Iq> {
        self(iq)
    }
}

/// Replies `service-unavailable` to every request.
///
/// Register it last so that it only answers what no other handler did.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIqHandler;

impl IqHandler for DefaultIqHandler {
    fn handle(&self, iq: &Iq) -> Option<Iq> {
        if !iq.is_request() {
            return None;
        }
        let error = StanzaError::new(ErrorType::Cancel, StanzaCondition::ServiceUnavailable, None);
        let reply = Iq::from_error(iq.id.clone(), error);
        Some(match iq.from.clone() {
            Some(from) => reply.with_to(from),
            None => reply,
        })
    }
}

/// Registered callbacks of a client.
#[derive(Default)]
pub struct Observers {
    element: Vec<ElementCallback>,
    iq: Vec<Callback<Iq>>,
    message: Vec<Callback<Message>>,
    presence: Vec<Callback<Presence>>,
    signed_in: Vec<Callback<Jid>>,
    connection_failed: Vec<Callback<Error>>,
    iq_handlers: Vec<Box<dyn IqHandler>>,
}

impl core::fmt::Debug for Observers {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Observers")
            .field("element", &self.element.len())
            .field("iq", &self.iq.len())
            .field("message", &self.message.len())
            .field("presence", &self.presence.len())
            .field("signed_in", &self.signed_in.len())
            .field("connection_failed", &self.connection_failed.len())
            .field("iq_handlers", &self.iq_handlers.len())
            .finish()
    }
}

impl Observers {
    /// Observe every element read or written, during negotiation too.
    pub fn on_element<F: Fn(Direction, &Element) + Send + Sync + 'static>(&mut self, f: F) {
        self.element.push(Box::new(f));
    }

    /// Observe incoming IQs, requests and responses alike.
    pub fn on_iq<F: Fn(&Iq) + Send + Sync + 'static>(&mut self, f: F) {
        self.iq.push(Box::new(f));
    }

    /// Observe incoming messages.
    pub fn on_message<F: Fn(&Message) + Send + Sync + 'static>(&mut self, f: F) {
        self.message.push(Box::new(f));
    }

    /// Observe incoming presences.
    pub fn on_presence<F: Fn(&Presence) + Send + Sync + 'static>(&mut self, f: F) {
        self.presence.push(Box::new(f));
    }

    /// Called once the session is established, with the bound address.
    pub fn on_signed_in<F: Fn(&Jid) + Send + Sync + 'static>(&mut self, f: F) {
        self.signed_in.push(Box::new(f));
    }

    /// Called at most once, when the connection is lost for any reason
    /// other than [`Client::close`][`crate::Client::close`].
    pub fn on_connection_failed<F: Fn(&Error) + Send + Sync + 'static>(&mut self, f: F) {
        self.connection_failed.push(Box::new(f));
    }

    /// Add an IQ handler, consulted after the handlers added before it.
    pub fn iq_handler<H: IqHandler + 'static>(&mut self, handler: H) {
        self.iq_handlers.push(Box::new(handler));
    }

    /// Move the element callbacks into a transport tap.
    ///
    /// Returns `None` if nobody observes raw elements.
    pub(crate) fn take_tap(&mut self) -> Option<ElementTap> {
        if self.element.is_empty() {
            return None;
        }
        let callbacks = core::mem::take(&mut self.element);
        Some(Arc::new(move |direction: Direction, elem: &Element| {
            for callback in &callbacks {
                callback(direction, elem);
            }
        }))
    }

    pub(crate) fn iq(&self, iq: &Iq) {
        for callback in &self.iq {
            callback(iq);
        }
    }

    pub(crate) fn message(&self, message: &Message) {
        for callback in &self.message {
            callback(message);
        }
    }

    pub(crate) fn presence(&self, presence: &Presence) {
        for callback in &self.presence {
            callback(presence);
        }
    }

    pub(crate) fn signed_in(&self, jid: &Jid) {
        for callback in &self.signed_in {
            callback(jid);
        }
    }

    pub(crate) fn connection_failed(&self, error: &Error) {
        for callback in &self.connection_failed {
            callback(error);
        }
    }

    /// Reply of the first handler willing to answer `iq`.
    pub(crate) fn answer(&self, iq: &Iq) -> Option<Iq> {
        match iq.payload {
            IqType::Get(_) | IqType::Set(_) => self
                .iq_handlers
                .iter()
                .find_map(|handler| handler.handle(iq)),
            IqType::Result(_) | IqType::Error(_) => None,
        }
    }
}
