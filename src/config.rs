//! Client configuration.
//!
//! The configuration is a JSON file holding login details, an optional proxy,
//! the account tier and an optional starting conversation.  Only a ready-made
//! `access_token` is usable on its own; other login details are handed to an
//! [`Authenticator`] supplied by the host.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::DEFAULT_BASE_URL;
use crate::types::{ConversationId, MessageId};

/// Environment variable overriding the service root.
pub const BASE_URL_ENV: &str = "CHATGPT_BASE_URL";

const CONFIG_FILE: &str = "config.json";
const CONFIG_DIR: &str = "revChatGPT";
const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(360);

/// The contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Bearer token obtained elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Browser session token, exchanged for an access token by an
    /// [`Authenticator`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Account email, used with `password` by an [`Authenticator`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Account password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Proxy for every outbound request, e.g. `http://127.0.0.1:8080`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Paid accounts answer with a different model.
    #[serde(default)]
    pub paid: bool,

    /// Conversation the cursor starts in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    /// Message the cursor starts at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,

    /// Service root; overrides `CHATGPT_BASE_URL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Login details found in a [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A bearer token, usable as is.
    AccessToken(String),
    /// A session token to exchange.
    SessionToken(String),
    /// Account email and password.
    EmailPassword {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },
}

/// Turns login details into an access token.
///
/// Implemented outside this crate; the login protocol is not part of it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Obtain an access token for `credentials`.
    async fn access_token(&self, credentials: &Credentials) -> Result<String>;
}

/// Per-session settings derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Selects the paid model.
    pub paid: bool,
    /// Default limit on each network wait of an `ask`.
    pub ask_timeout: Duration,
    /// Initial cursor conversation.
    pub conversation_id: Option<ConversationId>,
    /// Initial cursor parent.
    pub parent_id: Option<MessageId>,
}

impl SessionConfig {
    /// Settings for the given tier with an empty cursor.
    pub fn new(paid: bool) -> Self {
        Self {
            paid,
            ask_timeout: DEFAULT_ASK_TIMEOUT,
            conversation_id: None,
            parent_id: None,
        }
    }

    /// Sets the default `ask` timeout.
    pub fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }

    /// Sets the initial cursor.
    pub fn with_cursor(
        mut self,
        conversation_id: Option<ConversationId>,
        parent_id: Option<MessageId>,
    ) -> Self {
        self.conversation_id = conversation_id;
        self.parent_id = parent_id;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Config {
    /// Parse a configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::configuration(format!("invalid configuration: {e}"))
        })
    }

    /// Load the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
        Self::from_json(&text)
    }

    /// Load the first configuration file found in the usual places.
    ///
    /// Looks in the working directory, then `$XDG_CONFIG_HOME/revChatGPT/`,
    /// then `$HOME/.config/revChatGPT/`.
    pub fn discover() -> Result<Self> {
        let candidates = Self::candidates(
            Path::new("."),
            env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
            env::var_os("HOME").map(PathBuf::from),
        );
        Self::load_first(&candidates)
    }

    /// The places [`discover`](Self::discover) looks, in order.
    pub fn candidates(
        working_dir: &Path,
        xdg_config_home: Option<PathBuf>,
        home: Option<PathBuf>,
    ) -> Vec<PathBuf> {
        let mut candidates = vec![working_dir.join(CONFIG_FILE)];
        if let Some(xdg) = xdg_config_home {
            candidates.push(xdg.join(CONFIG_DIR).join(CONFIG_FILE));
        }
        if let Some(home) = home {
            candidates.push(home.join(".config").join(CONFIG_DIR).join(CONFIG_FILE));
        }
        candidates
    }

    /// Load the first of `candidates` that exists.
    pub fn load_first(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::load(path),
            None => Err(Error::configuration("no config file found")),
        }
    }

    /// The service root: `base_url`, else `$CHATGPT_BASE_URL`, else the default.
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| env::var(BASE_URL_ENV).ok().filter(|url| !url.is_empty()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// The login details, preferring an access token.
    pub fn credentials(&self) -> Result<Credentials> {
        if let Some(token) = &self.access_token {
            return Ok(Credentials::AccessToken(token.clone()));
        }
        if let Some(token) = &self.session_token {
            return Ok(Credentials::SessionToken(token.clone()));
        }
        if let (Some(email), Some(password)) = (&self.email, &self.password) {
            return Ok(Credentials::EmailPassword {
                email: email.clone(),
                password: password.clone(),
            });
        }
        Err(Error::configuration("no login details provided"))
    }

    /// Resolve an access token, asking `authenticator` when the configuration
    /// holds only a session token or an email and password.
    pub async fn access_token(&self, authenticator: Option<&dyn Authenticator>) -> Result<String> {
        match self.credentials()? {
            Credentials::AccessToken(token) => Ok(token),
            credentials => match authenticator {
                Some(authenticator) => authenticator.access_token(&credentials).await,
                None => Err(Error::authentication(
                    "an access_token is required; session_token and email/password logins \
                     need an external authenticator",
                )),
            },
        }
    }

    /// Session settings carried by this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.paid)
            .with_cursor(self.conversation_id.clone(), self.parent_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedToken;

    #[async_trait]
    impl Authenticator for FixedToken {
        async fn access_token(&self, credentials: &Credentials) -> Result<String> {
            match credentials {
                Credentials::SessionToken(token) => Ok(format!("exchanged-{token}")),
                _ => Err(Error::authentication("unsupported")),
            }
        }
    }

    #[test]
    fn parses_full_config() {
        let config = Config::from_json(
            r#"{
                "access_token": "tok",
                "proxy": "http://127.0.0.1:8080",
                "paid": true,
                "conversation_id": "c1",
                "parent_id": "m1"
            }"#,
        )
        .unwrap();
        assert_eq!(config.credentials().unwrap(), Credentials::AccessToken("tok".into()));
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        let session = config.session_config();
        assert!(session.paid);
        assert_eq!(session.conversation_id, Some("c1".into()));
        assert_eq!(session.parent_id, Some("m1".into()));
        assert_eq!(session.ask_timeout, Duration::from_secs(360));
    }

    #[test]
    fn proxy_must_be_a_string() {
        let err = Config::from_json(r#"{"access_token": "tok", "proxy": 8080}"#).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn credentials_precedence() {
        let config = Config {
            session_token: Some("sess".into()),
            email: Some("a@b.c".into()),
            password: Some("pw".into()),
            ..Config::default()
        };
        assert_eq!(config.credentials().unwrap(), Credentials::SessionToken("sess".into()));

        let config = Config {
            email: Some("a@b.c".into()),
            password: Some("pw".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.credentials().unwrap(),
            Credentials::EmailPassword { .. }
        ));

        let config = Config {
            email: Some("a@b.c".into()),
            ..Config::default()
        };
        assert!(matches!(config.credentials(), Err(Error::Configuration { .. })));
    }

    #[tokio::test]
    async fn access_token_delegates_to_authenticator() {
        let config = Config {
            session_token: Some("sess".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.access_token(None).await,
            Err(Error::Authentication { .. })
        ));
        assert_eq!(
            config.access_token(Some(&FixedToken)).await.unwrap(),
            "exchanged-sess"
        );
    }

    #[test]
    fn explicit_base_url_wins() {
        let config = Config {
            base_url: Some("http://localhost:9/".into()),
            ..Config::default()
        };
        assert_eq!(config.base_url(), "http://localhost:9/");
    }

    #[test]
    fn discovery_order_and_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().join("cwd");
        let xdg = dir.path().join("xdg");
        let home = dir.path().join("home");
        let candidates = Config::candidates(&cwd, Some(xdg.clone()), Some(home.clone()));
        assert_eq!(
            candidates,
            vec![
                cwd.join("config.json"),
                xdg.join("revChatGPT/config.json"),
                home.join(".config/revChatGPT/config.json"),
            ]
        );

        assert!(matches!(
            Config::load_first(&candidates),
            Err(Error::Configuration { .. })
        ));

        fs::create_dir_all(home.join(".config/revChatGPT")).unwrap();
        fs::write(&candidates[2], r#"{"access_token": "home"}"#).unwrap();
        fs::create_dir_all(xdg.join("revChatGPT")).unwrap();
        fs::write(&candidates[1], r#"{"access_token": "xdg"}"#).unwrap();
        let config = Config::load_first(&candidates).unwrap();
        assert_eq!(config.access_token.as_deref(), Some("xdg"));
    }
}
