//! Server configuration.

use std::time::Duration;

use lettermill_types::response::Capability;

use crate::auth::Credentials;
use crate::parse::ParsingParams;

/// Everything the protocol core can be told about how to behave. TLS
/// material is loaded by the binary and handed to the server separately.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    /// Host name shown in the greeting.
    pub greeting_hostname: String,
    /// Allow LOGIN / plaintext mechanisms without TLS.
    pub insecure_login: bool,
    /// Consecutive `BAD` responses before the connection is dropped.
    pub bad_command_limit: Option<u32>,
    /// Upper bound on one IDLE update poll; the poll simply restarts when it
    /// elapses.
    pub max_idle_wait: Duration,
    /// When set, each command's backend work is bounded and answers
    /// `NO [TIMEOUT]` on expiry.
    pub command_timeout: Option<Duration>,
    /// When set, connections greet with `PREAUTH` as this user.
    pub preauth_credentials: Option<Credentials>,
    /// Capabilities advertised from the first greeting on.
    pub initial_capability: Vec<Capability>,
    /// Capabilities added once a session exists.
    pub login_capability: Vec<Capability>,
    pub parsing_params: ParsingParams,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 143,
            greeting_hostname: std::env::var("HOSTNAME")
                .unwrap_or_else(|_| "localhost".into()),
            insecure_login: false,
            bad_command_limit: Some(5),
            max_idle_wait: Duration::from_secs(30),
            command_timeout: None,
            preauth_credentials: None,
            initial_capability: Vec::new(),
            login_capability: vec![
                Capability::Idle,
                Capability::Unselect,
                Capability::Move,
                Capability::Id,
                Capability::UidPlus,
                Capability::MultiAppend,
            ],
            parsing_params: ParsingParams::default(),
        }
    }
}
