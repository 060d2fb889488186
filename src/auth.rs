//! SASL server mechanisms.
//!
//! The challenge/response loop itself runs in the connection supervisor; a
//! mechanism only decides, given the responses so far, whether to challenge
//! again or to yield credentials.

use std::sync::Arc;

use thiserror::Error;

/// Credentials produced by a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub authcid: String,
    pub secret: String,
    pub authzid: Option<String>,
}

impl Credentials {
    pub fn plain(authcid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            authcid: authcid.into(),
            secret: secret.into(),
            authzid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authentication canceled.")]
    Canceled,
    #[error("Invalid authentication response.")]
    InvalidResponse,
    #[error("Invalid base64 string.")]
    InvalidBase64,
}

/// Outcome of one [`SaslMechanism::server_attempt`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Send this challenge (pre-base64) and read another response.
    Challenge(Vec<u8>),
    /// Exchange finished; optionally send a final challenge that the client
    /// answers with an empty line.
    Success {
        credentials: Credentials,
        final_challenge: Option<Vec<u8>>,
    },
}

pub trait SaslMechanism: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide the next step given the (decoded) client responses so far.
    fn server_attempt(&self, responses: &[Vec<u8>]) -> Result<Attempt, AuthError>;
}

/// `PLAIN` (RFC 4616): one response, `authzid NUL authcid NUL password`.
#[derive(Debug, Default)]
pub struct PlainMechanism;

impl SaslMechanism for PlainMechanism {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn server_attempt(&self, responses: &[Vec<u8>]) -> Result<Attempt, AuthError> {
        let Some(response) = responses.last() else {
            return Ok(Attempt::Challenge(Vec::new()));
        };
        let mut parts = response.split(|&b| b == 0);
        let (Some(authzid), Some(authcid), Some(secret), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(AuthError::InvalidResponse);
        };
        if authcid.is_empty() {
            return Err(AuthError::InvalidResponse);
        }
        let authzid = String::from_utf8_lossy(authzid).into_owned();
        Ok(Attempt::Success {
            credentials: Credentials {
                authcid: String::from_utf8_lossy(authcid).into_owned(),
                secret: String::from_utf8_lossy(secret).into_owned(),
                authzid: (!authzid.is_empty()).then_some(authzid),
            },
            final_challenge: None,
        })
    }
}

/// `LOGIN`: two fixed prompts, username then password.
#[derive(Debug, Default)]
pub struct LoginMechanism;

impl SaslMechanism for LoginMechanism {
    fn name(&self) -> &'static str {
        "LOGIN"
    }

    fn server_attempt(&self, responses: &[Vec<u8>]) -> Result<Attempt, AuthError> {
        match responses {
            [] => Ok(Attempt::Challenge(b"Username:".to_vec())),
            [_] => Ok(Attempt::Challenge(b"Password:".to_vec())),
            [username, password] => Ok(Attempt::Success {
                credentials: Credentials::plain(
                    String::from_utf8_lossy(username).into_owned(),
                    String::from_utf8_lossy(password).into_owned(),
                ),
                final_challenge: None,
            }),
            _ => Err(AuthError::InvalidResponse),
        }
    }
}

/// The set of mechanisms a connection may advertise and run.
#[derive(Clone, Default)]
pub struct SaslRegistry {
    mechanisms: Vec<Arc<dyn SaslMechanism>>,
}

impl std::fmt::Debug for SaslRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl SaslRegistry {
    /// PLAIN and LOGIN, the plaintext-bearing mechanisms offered once the
    /// transport is safe.
    pub fn plaintext() -> Self {
        Self {
            mechanisms: vec![
                Arc::new(PlainMechanism),
                Arc::new(LoginMechanism),
            ],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SaslMechanism>> {
        self.mechanisms
            .iter()
            .find(|mech| mech.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.mechanisms.iter().map(|mech| mech.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_challenge_then_credentials() {
        let mech = PlainMechanism;
        assert_eq!(
            mech.server_attempt(&[]).unwrap(),
            Attempt::Challenge(Vec::new())
        );
        let got = mech
            .server_attempt(&[b"\x00testuser\x00testpass".to_vec()])
            .unwrap();
        assert_eq!(
            got,
            Attempt::Success {
                credentials: Credentials::plain("testuser", "testpass"),
                final_challenge: None,
            }
        );
    }

    #[test]
    fn plain_with_authzid() {
        let got = PlainMechanism
            .server_attempt(&[b"admin\x00testuser\x00testpass".to_vec()])
            .unwrap();
        match got {
            Attempt::Success { credentials, .. } => {
                assert_eq!(credentials.authzid.as_deref(), Some("admin"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn plain_rejects_malformed() {
        assert!(PlainMechanism
            .server_attempt(&[b"no separators".to_vec()])
            .is_err());
    }

    #[test]
    fn login_prompts_in_order() {
        let mech = LoginMechanism;
        assert_eq!(
            mech.server_attempt(&[]).unwrap(),
            Attempt::Challenge(b"Username:".to_vec())
        );
        assert_eq!(
            mech.server_attempt(&[b"joe".to_vec()]).unwrap(),
            Attempt::Challenge(b"Password:".to_vec())
        );
        let got = mech
            .server_attempt(&[b"joe".to_vec(), b"sesame".to_vec()])
            .unwrap();
        assert_eq!(
            got,
            Attempt::Success {
                credentials: Credentials::plain("joe", "sesame"),
                final_challenge: None,
            }
        );
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let registry = SaslRegistry::plaintext();
        assert!(registry.get("plain").is_some());
        assert!(registry.get("PLAIN").is_some());
        assert!(registry.get("CRAM-MD5").is_none());
        assert!(SaslRegistry::empty().get("PLAIN").is_none());
    }
}
