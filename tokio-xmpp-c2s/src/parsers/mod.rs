// Copyright (c) 2024 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed views of the elements a client exchanges while negotiating and
//! using its stream.
//!
//! Only what negotiation and dispatch look at is modelled. Anything else is
//! kept as a raw [`Element`] (IQ payloads, message and presence extensions).
//!
//! Conversions follow one contract: `TryFrom<Element>` hands the element
//! back untouched in [`FromElementError::Mismatch`] when its name or
//! namespace is not the expected one, and reports
//! [`FromElementError::Invalid`] when it is the right element with bad
//! content. `From<T> for Element` goes the other way.

use core::str::FromStr;

use jid::Jid;
use minidom::Element;

pub use xso::error::{Error, FromElementError};

/// Declares a fieldless enum whose variants map one to one onto XML
/// keywords, either attribute values or condition element names.
macro_rules! keywords {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $keyword:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// The keyword as it appears on the wire.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $keyword,)+
                }
            }

            /// Look a keyword up, `None` if it is not known.
            pub fn from_keyword(keyword: &str) -> Option<$name> {
                match keyword {
                    $($keyword => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod bind;
pub mod iq;
pub mod message;
pub mod presence;
pub mod sasl;
pub mod stanza_error;
pub mod starttls;
pub mod stream;

/// Pass `elem` through if it is `<name xmlns='ns'/>`.
fn expect_element(elem: Element, name: &str, ns: &str) -> Result<Element, FromElementError> {
    if elem.is(name, ns) {
        Ok(elem)
    } else {
        Err(FromElementError::Mismatch(elem))
    }
}

fn required_attr<'a>(elem: &'a Element, name: &str, missing: &'static str) -> Result<&'a str, Error> {
    elem.attr(name).ok_or(Error::Other(missing))
}

fn jid_attr(elem: &Element, name: &str) -> Result<Option<Jid>, Error> {
    elem.attr(name)
        .map(Jid::from_str)
        .transpose()
        .map_err(Error::text_parse_error)
}

/// Text of the first `<name xmlns='ns'/>` child.
fn child_text(elem: &Element, name: &str, ns: &str) -> Option<String> {
    elem.get_child(name, ns).map(Element::text)
}

fn text_element(name: &str, ns: &str, text: String) -> Element {
    Element::builder(name, ns).append(text).build()
}
