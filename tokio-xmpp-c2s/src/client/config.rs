// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::time::Duration;

use crate::jid::Jid;

/// What to do about STARTTLS during negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartTlsPolicy {
    /// Never attempt TLS, even if the server offers it.
    Disabled,

    /// Upgrade if the server advertises STARTTLS, continue in plaintext
    /// otherwise.
    #[default]
    IfAdvertised,

    /// Fail the connection unless TLS was established.
    Required,
}

/// Settings of a single client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address to authenticate as. The resource, if any, is requested at
    /// bind time.
    pub jid: Jid,

    /// Password for SASL authentication.
    pub password: String,

    /// STARTTLS handling.
    pub starttls: StartTlsPolicy,

    /// Send an initial `<presence/>` once the session is established.
    pub initial_presence: bool,

    /// Upper bound for each read during negotiation. `None` waits forever.
    pub negotiation_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Configuration with default settings for `jid`.
    pub fn new(jid: Jid, password: String) -> Self {
        Self {
            jid,
            password,
            starttls: StartTlsPolicy::default(),
            initial_presence: false,
            negotiation_timeout: None,
        }
    }
}
