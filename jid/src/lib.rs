// Copyright (c) 2017, 2018 lumi <lumi@pew.im>
// Copyright (c) 2017, 2018, 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
// Copyright (c) 2017, 2018, 2019 Maxime “pep” Buquet <pep@bouah.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![deny(missing_docs)]

//! Provides a type for Jabber IDs.
//!
//! A JID has the shape `user@domain/resource`, where both the `user@` prefix
//! and the `/resource` suffix are optional:
//!
//! ```
//! use jid::Jid;
//!
//! let jid: Jid = "_vt@xmpp.ru/ololo".parse().unwrap();
//! assert_eq!(jid.user(), "_vt");
//! assert_eq!(jid.domain(), "xmpp.ru");
//! assert_eq!(jid.resource(), Some("ololo"));
//! assert_eq!(jid.to_string(), "_vt@xmpp.ru/ololo");
//! ```
//!
//! Parsing splits on the first `/` to isolate the resource, then on the
//! first `@` of what remains to isolate the user. The domain is mandatory.

use core::fmt;
use core::str::FromStr;

use memchr::{memchr, memchr2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An error that signifies that a `Jid` cannot be parsed from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Happens when the domain part of the JID is empty, for example in
    /// `user@`, `/resource` or the empty string.
    DomainEmpty,

    /// Happens when a part given to [`Jid::from_parts`] contains a separator
    /// which would make the formatted JID parse into different parts, for
    /// example a user containing `@`.
    InvalidPart,
}

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match self {
            Error::DomainEmpty => "domain part is empty",
            Error::InvalidPart => "part contains a separator",
        })
    }
}

/// A struct representing a Jabber ID (JID).
///
/// An absent user part is stored as the empty string and is omitted when
/// formatting. An absent resource is `None`, which is different from
/// `Some("")` (a trailing `/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct Jid {
    user: String,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Constructs a JID from its string representation.
    ///
    /// ```
    /// use jid::{Error, Jid};
    ///
    /// let jid = Jid::new("icq.jabber.ru")?;
    /// assert_eq!(jid.user(), "");
    /// assert_eq!(jid.resource(), None);
    ///
    /// assert_eq!(Jid::new("vasya@"), Err(Error::DomainEmpty));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn new(s: &str) -> Result<Jid, Error> {
        let (rest, resource) = match memchr(b'/', s.as_bytes()) {
            Some(slash) => (&s[..slash], Some(&s[slash + 1..])),
            None => (s, None),
        };
        let (user, domain) = match memchr(b'@', rest.as_bytes()) {
            Some(at) => (&rest[..at], &rest[at + 1..]),
            None => ("", rest),
        };
        if domain.is_empty() {
            return Err(Error::DomainEmpty);
        }
        Ok(Jid {
            user: user.to_owned(),
            domain: domain.to_owned(),
            resource: resource.map(str::to_owned),
        })
    }

    /// Builds a JID from already split parts.
    ///
    /// Accepts exactly the parts [`Jid::new`] can produce, so that the
    /// formatted JID parses back into the same parts. Fails with
    /// [`Error::DomainEmpty`] if `domain` is empty, and with
    /// [`Error::InvalidPart`] if `user` contains `@` or `/`, if `domain`
    /// contains `/`, or if `domain` contains `@` while `user` is empty.
    ///
    /// ```
    /// use jid::{Error, Jid};
    ///
    /// let jid = Jid::from_parts("juliet", "example.com", Some("a/b@c"))?;
    /// assert_eq!(jid.to_string(), "juliet@example.com/a/b@c");
    ///
    /// assert_eq!(Jid::from_parts("u@x", "d", None), Err(Error::InvalidPart));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn from_parts(user: &str, domain: &str, resource: Option<&str>) -> Result<Jid, Error> {
        if domain.is_empty() {
            return Err(Error::DomainEmpty);
        }
        let user_separator = memchr2(b'@', b'/', user.as_bytes()).is_some();
        let domain_separator = if user.is_empty() {
            memchr2(b'@', b'/', domain.as_bytes()).is_some()
        } else {
            memchr(b'/', domain.as_bytes()).is_some()
        };
        if user_separator || domain_separator {
            return Err(Error::InvalidPart);
        }
        Ok(Jid {
            user: user.to_owned(),
            domain: domain.to_owned(),
            resource: resource.map(str::to_owned),
        })
    }

    /// The user part, empty if the JID has none.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The domain part, never empty.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resource part, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Whether this JID has no resource.
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// Returns a copy of this JID without its resource.
    pub fn to_bare(&self) -> Jid {
        Jid {
            user: self.user.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Returns a copy of this JID with its resource replaced.
    pub fn with_resource(&self, resource: &str) -> Jid {
        Jid {
            user: self.user.clone(),
            domain: self.domain.clone(),
            resource: Some(resource.to_owned()),
        }
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Jid, Error> {
        Jid::new(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(s: String) -> Result<Jid, Error> {
        Jid::new(&s)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> String {
        jid.to_string()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if !self.user.is_empty() {
            fmt.write_str(&self.user)?;
            fmt.write_str("@")?;
        }
        fmt.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            fmt.write_str("/")?;
            fmt.write_str(resource)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_parts(jid: &Jid, user: &str, domain: &str, resource: Option<&str>) {
        assert_eq!(jid.user(), user);
        assert_eq!(jid.domain(), domain);
        assert_eq!(jid.resource(), resource);
    }

    #[test]
    fn parse_parts() {
        assert_parts(
            &Jid::new("_vt@xmpp.ru/ololo").unwrap(),
            "_vt",
            "xmpp.ru",
            Some("ololo"),
        );
        assert_parts(
            &Jid::new("icq.jabber.ru").unwrap(),
            "",
            "icq.jabber.ru",
            None,
        );
        assert_parts(&Jid::new("vasya@icq.org").unwrap(), "vasya", "icq.org", None);
    }

    #[test]
    fn format_omits_absent_parts() {
        assert_eq!(Jid::new("vasya@icq.org").unwrap().to_string(), "vasya@icq.org");
        assert_eq!(Jid::new("icq.org").unwrap().to_string(), "icq.org");
        assert_eq!(
            Jid::new("icq.org/registered").unwrap().to_string(),
            "icq.org/registered"
        );
    }

    #[test]
    fn string_round_trip() {
        for s in ["u@d/r", "d", "d/r", "u@d", "d/", "u@d/r/with/slashes"] {
            assert_eq!(Jid::new(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn value_round_trip() {
        let jids = [
            Jid::from_parts("u", "d", Some("r")).unwrap(),
            Jid::from_parts("", "d", None).unwrap(),
            Jid::from_parts("", "d", Some("")).unwrap(),
            Jid::from_parts("u", "d", Some("a@b")).unwrap(),
            Jid::from_parts("u", "d", Some("r/s")).unwrap(),
            Jid::from_parts("a", "b@c", None).unwrap(),
        ];
        for jid in jids {
            assert_eq!(jid.to_string().parse::<Jid>().unwrap(), jid);
        }
    }

    #[test]
    fn parts_with_separators() {
        assert_eq!(Jid::from_parts("u@x", "d", None), Err(Error::InvalidPart));
        assert_eq!(Jid::from_parts("u/x", "d", None), Err(Error::InvalidPart));
        assert_eq!(Jid::from_parts("u", "d/x", None), Err(Error::InvalidPart));
        assert_eq!(Jid::from_parts("", "x@d", None), Err(Error::InvalidPart));
        assert_eq!(Jid::from_parts("", "d/x", Some("r")), Err(Error::InvalidPart));
        assert_eq!(
            Error::InvalidPart.to_string(),
            "part contains a separator"
        );
    }

    #[test]
    fn splits_on_first_separator() {
        let jid = Jid::new("a@b@c/d/e").unwrap();
        assert_parts(&jid, "a", "b@c", Some("d/e"));

        // The `@` after the first `/` belongs to the resource.
        let jid = Jid::new("d/user@host").unwrap();
        assert_parts(&jid, "", "d", Some("user@host"));
    }

    #[test]
    fn empty_domain() {
        assert_eq!(Jid::new(""), Err(Error::DomainEmpty));
        assert_eq!(Jid::new("user@"), Err(Error::DomainEmpty));
        assert_eq!(Jid::new("/resource"), Err(Error::DomainEmpty));
        assert_eq!(Jid::new("user@/resource"), Err(Error::DomainEmpty));
        assert_eq!(
            Jid::from_parts("user", "", None),
            Err(Error::DomainEmpty)
        );
    }

    #[test]
    fn bare_and_resource() {
        let full = Jid::new("u@d/r").unwrap();
        assert!(!full.is_bare());
        let bare = full.to_bare();
        assert!(bare.is_bare());
        assert_eq!(bare.to_string(), "u@d");
        assert_eq!(bare.with_resource("other").to_string(), "u@d/other");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_string_form() {
        use serde_test::{assert_de_tokens_error, assert_tokens, Token};

        let jid = Jid::new("vasya@icq.org/home").unwrap();
        assert_tokens(&jid, &[Token::Str("vasya@icq.org/home")]);

        assert_de_tokens_error::<Jid>(&[Token::Str("vasya@")], "domain part is empty");
    }
}
