use sasl::client::mechanisms::{Anonymous, Plain, Scram};
use sasl::client::{Mechanism, MechanismError};
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::Credentials;

use crate::error::AuthError;

/// Picks the SASL mechanism used to authenticate a connection.
pub trait SaslNegotiator: Send + Sync {
    /// Return a fresh mechanism among the ones `offered` by the server.
    fn select(&self, offered: &[String]) -> Result<Box<dyn Mechanism + Send>, AuthError>;
}

type MechanismFactory = fn(&Credentials) -> Result<Box<dyn Mechanism + Send>, MechanismError>;

/// Authenticates with a username and password, preferring the strongest
/// mechanism both sides support.
///
/// An empty username only allows `ANONYMOUS`.
#[derive(Debug, Clone)]
pub struct CredentialsNegotiator {
    creds: Credentials,
    anonymous: bool,
}

impl CredentialsNegotiator {
    /// Negotiator for `username` and `password`.
    pub fn new(username: &str, password: &str) -> Self {
        let creds = Credentials::default()
            .with_username(username)
            .with_password(password);
        CredentialsNegotiator {
            creds,
            anonymous: username.is_empty(),
        }
    }

    fn local_mechanisms(&self) -> Vec<(&'static str, MechanismFactory)> {
        let mut mechs: Vec<(&'static str, MechanismFactory)> = Vec::new();
        if !self.anonymous {
            mechs.push(("SCRAM-SHA-256", scram_sha_256));
            mechs.push(("SCRAM-SHA-1", scram_sha_1));
            mechs.push(("PLAIN", plain));
        }
        mechs.push(("ANONYMOUS", anonymous));
        mechs
    }
}

fn scram_sha_256(creds: &Credentials) -> Result<Box<dyn Mechanism + Send>, MechanismError> {
    let mechanism = Scram::<Sha256>::from_credentials(creds.clone())?;
    Ok(Box::new(mechanism))
}

fn scram_sha_1(creds: &Credentials) -> Result<Box<dyn Mechanism + Send>, MechanismError> {
    let mechanism = Scram::<Sha1>::from_credentials(creds.clone())?;
    Ok(Box::new(mechanism))
}

fn plain(creds: &Credentials) -> Result<Box<dyn Mechanism + Send>, MechanismError> {
    let mechanism = Plain::from_credentials(creds.clone())?;
    Ok(Box::new(mechanism))
}

fn anonymous(_: &Credentials) -> Result<Box<dyn Mechanism + Send>, MechanismError> {
    Ok(Box::new(Anonymous::new()))
}

impl SaslNegotiator for CredentialsNegotiator {
    fn select(&self, offered: &[String]) -> Result<Box<dyn Mechanism + Send>, AuthError> {
        for (name, factory) in self.local_mechanisms() {
            if !offered.iter().any(|remote| remote == name) {
                continue;
            }
            match factory(&self.creds) {
                Ok(mechanism) => {
                    log::debug!("Selected SASL mechanism {}", name);
                    return Ok(mechanism);
                }
                Err(e) => log::warn!("Cannot use SASL mechanism {}: {}", name, e),
            }
        }
        Err(AuthError::NoMechanism)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offered(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| String::from(*name)).collect()
    }

    #[test]
    fn prefers_scram_sha_256() {
        let negotiator = CredentialsNegotiator::new("juliet", "r0m30");
        let mech = negotiator
            .select(&offered(&["PLAIN", "SCRAM-SHA-1", "SCRAM-SHA-256"]))
            .unwrap();
        assert_eq!(mech.name(), "SCRAM-SHA-256");
    }

    #[test]
    fn plain_initial_response() {
        let negotiator = CredentialsNegotiator::new("juliet", "r0m30");
        let mut mech = negotiator.select(&offered(&["PLAIN"])).unwrap();
        assert_eq!(mech.initial(), b"\0juliet\0r0m30");
    }

    #[test]
    fn empty_username_is_anonymous_only() {
        let negotiator = CredentialsNegotiator::new("", "");
        assert!(matches!(
            negotiator.select(&offered(&["PLAIN", "SCRAM-SHA-1"])),
            Err(AuthError::NoMechanism)
        ));
        let mech = negotiator
            .select(&offered(&["PLAIN", "ANONYMOUS"]))
            .unwrap();
        assert_eq!(mech.name(), "ANONYMOUS");
    }

    #[test]
    fn nothing_in_common() {
        let negotiator = CredentialsNegotiator::new("juliet", "r0m30");
        assert!(matches!(
            negotiator.select(&offered(&["EXTERNAL"])),
            Err(AuthError::NoMechanism)
        ));
    }
}
