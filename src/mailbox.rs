use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::{debug, info, warn};

use crate::config::ImapSettings;
use crate::error::{FetchError, SessionError};

/// Sequence number of a message in the selected mailbox.
pub type MessageId = u32;

#[derive(Clone)]
pub enum MailboxSecret {
    Password(String),
    /// OAuth2 bearer token obtained by an external auth flow (SASL XOAUTH2).
    AccessToken(String),
}

#[derive(Clone)]
pub struct MailboxCredentials {
    pub address: String,
    pub secret: MailboxSecret,
}

impl MailboxCredentials {
    pub fn password(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            secret: MailboxSecret::Password(password.into()),
        }
    }

    pub fn access_token(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            secret: MailboxSecret::AccessToken(token.into()),
        }
    }
}

impl fmt::Debug for MailboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.secret {
            MailboxSecret::Password(_) => "password",
            MailboxSecret::AccessToken(_) => "access_token",
        };
        f.debug_struct("MailboxCredentials")
            .field("address", &self.address)
            .field("secret", &format_args!("[REDACTED {kind}]"))
            .finish()
    }
}

/// A live, authenticated mailbox session.
pub trait MailboxSession {
    fn select_inbox(&mut self, mailbox: &str) -> Result<(), SessionError>;
    /// Ids of all messages, newest first.
    fn list_message_ids(&mut self) -> Result<Vec<MessageId>, SessionError>;
    fn fetch_raw_message(&mut self, id: MessageId) -> Result<Vec<u8>, FetchError>;
    /// Ends the session. Must be safe to call more than once.
    fn close(&mut self);
}

pub trait MailboxConnector {
    type Session: MailboxSession;

    fn connect(&self, credentials: &MailboxCredentials) -> Result<Self::Session, SessionError>;
}

/// Owns a session and closes it when dropped, on every exit path.
pub struct SessionGuard<S: MailboxSession> {
    session: S,
}

impl<S: MailboxSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }
}

impl<S: MailboxSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: MailboxSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: MailboxSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.session.close();
    }
}

#[derive(Clone)]
struct XOAuth2 {
    user: String,
    access_token: String,
}

impl imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&self, _data: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

/// Blocking IMAP over TLS.
#[derive(Debug, Clone, Default)]
pub struct ImapConnector {
    settings: ImapSettings,
}

impl ImapConnector {
    pub fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }
}

impl MailboxConnector for ImapConnector {
    type Session = ImapSession;

    fn connect(&self, credentials: &MailboxCredentials) -> Result<ImapSession, SessionError> {
        debug!(host = %self.settings.host, port = self.settings.port, "connecting to imap server");
        let client = imap::ClientBuilder::new(self.settings.host.as_str(), self.settings.port)
            .connect()
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let session = match &credentials.secret {
            MailboxSecret::Password(password) => client
                .login(credentials.address.as_str(), password.as_str())
                .map_err(|(e, _)| SessionError::Auth(e.to_string()))?,
            MailboxSecret::AccessToken(token) => {
                let auth = XOAuth2 {
                    user: credentials.address.clone(),
                    access_token: token.clone(),
                };
                client
                    .authenticate("XOAUTH2", &auth)
                    .map_err(|(e, _)| SessionError::Auth(e.to_string()))?
            }
        };
        info!(address = %credentials.address, "imap login successful");
        Ok(ImapSession {
            session,
            closed: false,
        })
    }
}

pub struct ImapSession {
    session: imap::Session<imap::Connection>,
    closed: bool,
}

impl MailboxSession for ImapSession {
    fn select_inbox(&mut self, mailbox: &str) -> Result<(), SessionError> {
        let selected = self
            .session
            .select(mailbox)
            .map_err(|e| SessionError::SelectInbox {
                mailbox: mailbox.to_string(),
                reason: e.to_string(),
            })?;
        debug!(mailbox, exists = selected.exists, "mailbox selected");
        Ok(())
    }

    fn list_message_ids(&mut self) -> Result<Vec<MessageId>, SessionError> {
        let found = self
            .session
            .search("ALL")
            .map_err(|e| SessionError::List(e.to_string()))?;
        let mut ids = found.into_iter().collect::<Vec<_>>();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    fn fetch_raw_message(&mut self, id: MessageId) -> Result<Vec<u8>, FetchError> {
        let fetches = self
            .session
            .fetch(id.to_string(), "RFC822")
            .map_err(|e| FetchError {
                message_id: id,
                reason: e.to_string(),
            })?;
        let body = fetches
            .iter()
            .find_map(|f| f.body().map(<[u8]>::to_vec))
            .ok_or_else(|| FetchError {
                message_id: id,
                reason: "server returned no RFC822 body".to_string(),
            })?;
        Ok(body)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "imap logout failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct FakeLog {
        pub connects: usize,
        pub closes: usize,
        pub fetched: Vec<MessageId>,
    }

    /// Scripted mailbox: ids map to raw bodies, `None` means the fetch fails.
    #[derive(Clone, Default)]
    pub struct FakeConnector {
        pub messages: BTreeMap<MessageId, Option<Vec<u8>>>,
        pub fail_login: bool,
        pub fail_select: bool,
        pub log: Arc<Mutex<FakeLog>>,
    }

    impl FakeConnector {
        /// Messages given oldest first receive ascending ids.
        pub fn with_messages(bodies: Vec<Option<Vec<u8>>>) -> Self {
            let messages = bodies
                .into_iter()
                .enumerate()
                .map(|(i, body)| (i as MessageId + 1, body))
                .collect();
            Self {
                messages,
                ..Self::default()
            }
        }

        pub fn fetched(&self) -> Vec<MessageId> {
            self.log.lock().expect("fake log").fetched.clone()
        }

        pub fn closes(&self) -> usize {
            self.log.lock().expect("fake log").closes
        }
    }

    pub struct FakeSession {
        messages: BTreeMap<MessageId, Option<Vec<u8>>>,
        fail_select: bool,
        closed: bool,
        log: Arc<Mutex<FakeLog>>,
    }

    impl MailboxConnector for FakeConnector {
        type Session = FakeSession;

        fn connect(&self, _credentials: &MailboxCredentials) -> Result<FakeSession, SessionError> {
            self.log.lock().expect("fake log").connects += 1;
            if self.fail_login {
                return Err(SessionError::Auth("invalid credentials".to_string()));
            }
            Ok(FakeSession {
                messages: self.messages.clone(),
                fail_select: self.fail_select,
                closed: false,
                log: Arc::clone(&self.log),
            })
        }
    }

    impl MailboxSession for FakeSession {
        fn select_inbox(&mut self, mailbox: &str) -> Result<(), SessionError> {
            if self.fail_select {
                return Err(SessionError::SelectInbox {
                    mailbox: mailbox.to_string(),
                    reason: "no such mailbox".to_string(),
                });
            }
            Ok(())
        }

        fn list_message_ids(&mut self) -> Result<Vec<MessageId>, SessionError> {
            Ok(self.messages.keys().rev().copied().collect())
        }

        fn fetch_raw_message(&mut self, id: MessageId) -> Result<Vec<u8>, FetchError> {
            self.log.lock().expect("fake log").fetched.push(id);
            self.messages
                .get(&id)
                .cloned()
                .flatten()
                .ok_or_else(|| FetchError {
                    message_id: id,
                    reason: "connection reset".to_string(),
                })
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.log.lock().expect("fake log").closes += 1;
            }
        }
    }
}
