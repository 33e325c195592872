//! The session store.
//!
//! All lifecycle transitions go through this type: pre-login bootstrap,
//! handshake scratch attachment, promotion to a logged-in session, directive
//! application, lazy timeout enforcement, renewal, and logout.
//!
//! # Token rotation
//!
//! Every transition along the pre-login → login-pending → active line mints a
//! fresh token: the new record is created first, then the old one is deleted.
//! A concurrent reader of the old token observes at worst "invalid token"
//! once the deletion lands; it never sees a window with no state at all. A
//! racing second rotation of the same token finds the old record gone and
//! fails with invalid-token, which is the correct outcome.
//!
//! Timeouts are enforced lazily on lookup; no background sweeper exists.
//! Partially rotated state (new record created, old not yet deleted) is
//! tolerated and ages out through the absolute timeout.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::Duration;
use tracing::debug;
use wru_storage::DynDocumentStore;

use crate::clock::Clock;
use crate::error::AuthError;
use crate::register::UserRecord;
use crate::session::meta::RequestMeta;
use crate::session::model::{Directive, Session, SessionStatus, SingleSession, UserSession};
use crate::session::token::generate_token;
use crate::AuthResult;

const SINGLE_SESSIONS: &str = "single_sessions";
const USER_SESSIONS: &str = "user_sessions";

/// How many times id generation retries on a create conflict before giving
/// up. This is a liveness bound, not a safety one.
const ID_GENERATION_ATTEMPTS: usize = 10;

/// The three session lifetime windows.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// How long a pre-login session may wait for the handshake to finish.
    pub login: Duration,
    /// How long a promoted session survives without traffic.
    pub idle: Duration,
    /// Hard ceiling on a promoted session's lifetime.
    pub absolute: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            login: Duration::minutes(10),
            idle: Duration::hours(1),
            absolute: Duration::days(30),
        }
    }
}

/// Persistent session state over a document store.
pub struct SessionStore {
    store: DynDocumentStore,
    clock: Clock,
    timeouts: SessionTimeouts,
}

impl SessionStore {
    /// Creates a session store over `store`.
    #[must_use]
    pub fn new(store: DynDocumentStore, clock: Clock, timeouts: SessionTimeouts) -> Self {
        Self {
            store,
            clock,
            timeouts,
        }
    }

    /// The configured timeout windows.
    #[must_use]
    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    /// Starts a pre-login session carrying initial scratch state (typically
    /// the landing URL) and returns the new token.
    pub async fn begin_login(&self, info: HashMap<String, String>) -> AuthResult<String> {
        let now = self.clock.now();
        let sid = self
            .create_single(SingleSession {
                id: String::new(),
                user_id: String::new(),
                login_at: now,
                last_access_at: now,
                login_info: info,
            })
            .await?;
        debug!(session_id = %sid, "started pre-login session");
        Ok(sid)
    }

    /// Merges handshake scratch state into a pre-login session and rotates
    /// its token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] when `old_id` does not name a live
    /// pre-login session.
    pub async fn attach_provider(
        &self,
        old_id: &str,
        info: HashMap<String, String>,
    ) -> AuthResult<String> {
        let mut session = self
            .read_single(old_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !session.user_id.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        session.login_info.extend(info);

        let new_id = self.create_single(session).await?;
        self.store.delete(SINGLE_SESSIONS, old_id).await?;
        Ok(new_id)
    }

    /// Promotes a login-pending session to an active one.
    ///
    /// Mints a fresh token whose record carries the resolved user id plus the
    /// device metadata and completion info, links it into the user's session
    /// list, deletes the old record, and returns the new token together with
    /// the scratch state stored during `begin_login`/`attach_provider`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] when `old_id` is unknown or was
    /// already promoted (the first promotion deletes it).
    pub async fn complete_login(
        &self,
        old_id: &str,
        user: &UserRecord,
        meta: &RequestMeta,
        info: HashMap<String, String>,
    ) -> AuthResult<(String, HashMap<String, String>)> {
        let old = self
            .read_single(old_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !old.user_id.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let now = self.clock.now();
        let mut login_info = meta.login_info();
        login_info.extend(info);

        let sid = self
            .create_single(SingleSession {
                id: String::new(),
                user_id: user.user_id.clone(),
                login_at: now,
                last_access_at: now,
                login_info,
            })
            .await?;

        self.link_user_session(user, &sid).await?;
        self.store.delete(SINGLE_SESSIONS, old_id).await?;

        debug!(session_id = %sid, user_id = %user.user_id, "login completed");
        Ok((sid, old.login_info))
    }

    /// Destroys a session. Unknown tokens are not errors; only storage
    /// failures propagate.
    ///
    /// The token is removed from the owning user's session list before the
    /// session record itself is deleted, so the list never references a dead
    /// token.
    pub async fn logout(&self, id: &str) -> AuthResult<()> {
        let Some(session) = self.read_single(id).await? else {
            return Ok(());
        };
        if !session.user_id.is_empty()
            && let Some(mut user) = self.read_user(&session.user_id).await?
        {
            user.sessions.retain(|sid| sid != id);
            self.store
                .replace(USER_SESSIONS, &user.id, &to_doc(&user)?)
                .await?;
        }
        self.store.delete(SINGLE_SESSIONS, id).await?;
        debug!(session_id = %id, "session destroyed");
        Ok(())
    }

    /// Lists a user's live device sessions, ordered by login time.
    ///
    /// Sessions past either timeout window are filtered out but left for the
    /// lazy deletion on their own lookup.
    pub async fn list_user_sessions(&self, user_id: &str) -> AuthResult<Vec<SingleSession>> {
        let docs = self
            .store
            .find_by_field(SINGLE_SESSIONS, "user_id", user_id)
            .await?;
        let now = self.clock.now();
        let mut sessions: Vec<SingleSession> = docs
            .into_iter()
            .map(from_doc)
            .collect::<AuthResult<Vec<SingleSession>>>()?
            .into_iter()
            .filter(|s| {
                now - s.login_at < self.timeouts.absolute
                    && now - s.last_access_at < self.timeouts.idle
            })
            .collect();
        sessions.sort_by_key(|s| s.login_at);
        Ok(sessions)
    }

    /// Resolves a token into a [`Session`] snapshot with its derived status.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for unknown tokens, pre-login
    /// sessions past the login timeout, and promoted sessions past the
    /// absolute timeout; the two timed-out cases also delete the session.
    pub async fn lookup(&self, id: &str) -> AuthResult<Session> {
        let (single, user, status) = self.read_session(id).await?;
        Ok(match user {
            None => Session::before_login(&single, single.login_at + self.timeouts.login),
            Some(user) => Session::logged_in(
                &single,
                &user,
                status,
                single.login_at + self.timeouts.absolute,
            ),
        })
    }

    /// Applies backend directives to the owning user's data bag and stamps
    /// the session's last access time.
    ///
    /// The stamp happens even for an empty directive list; this call is the
    /// only path that extends a session's idle lifetime on normal traffic.
    pub async fn apply_directives(&self, id: &str, directives: &[Directive]) -> AuthResult<()> {
        let (mut single, user, _) = self.read_session(id).await?;

        // A pre-login session has no user bag yet; only the stamp applies.
        if let Some(mut user) = user
            && !directives.is_empty()
        {
            for directive in directives {
                if directive.value.is_empty() {
                    user.data.remove(&directive.key);
                } else {
                    user.data
                        .insert(directive.key.clone(), directive.value.clone());
                }
            }
            self.store
                .replace(USER_SESSIONS, &user.id, &to_doc(&user)?)
                .await?;
        }

        single.last_access_at = self.clock.now();
        self.store
            .replace(SINGLE_SESSIONS, id, &to_doc(&single)?)
            .await?;
        Ok(())
    }

    /// Revives an idle session under a fresh token, or returns the same
    /// token when the session is still active.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] when the token is unknown or the
    /// session is past its absolute lifetime (which also deletes it).
    pub async fn renew(&self, old_id: &str) -> AuthResult<String> {
        let single = self
            .read_single(old_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let now = self.clock.now();

        if single.user_id.is_empty() {
            if now - single.login_at > self.timeouts.login {
                self.logout(old_id).await?;
                return Err(AuthError::InvalidToken);
            }
            return Ok(old_id.to_string());
        }

        if now - single.login_at > self.timeouts.absolute {
            self.logout(old_id).await?;
            return Err(AuthError::InvalidToken);
        }
        if now - single.last_access_at <= self.timeouts.idle {
            return Ok(old_id.to_string());
        }

        let user_id = single.user_id.clone();
        let mut renewed = single;
        renewed.last_access_at = now;
        let new_id = self.create_single(renewed).await?;

        if let Some(mut user) = self.read_user(&user_id).await? {
            for sid in &mut user.sessions {
                if sid == old_id {
                    *sid = new_id.clone();
                }
            }
            self.store
                .replace(USER_SESSIONS, &user.id, &to_doc(&user)?)
                .await?;
        }
        self.store.delete(SINGLE_SESSIONS, old_id).await?;

        debug!(old = %old_id, new = %new_id, "idle session renewed");
        Ok(new_id)
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Reads a token and derives its status, deleting sessions that are past
    /// a hard timeout.
    async fn read_session(
        &self,
        id: &str,
    ) -> AuthResult<(SingleSession, Option<UserSession>, SessionStatus)> {
        let single = self
            .read_single(id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let now = self.clock.now();

        if single.user_id.is_empty() {
            if now - single.login_at > self.timeouts.login {
                self.logout(id).await?;
                return Err(AuthError::InvalidToken);
            }
            return Ok((single, None, SessionStatus::BeforeLogin));
        }

        let user = self
            .read_user(&single.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if now - single.login_at > self.timeouts.absolute {
            self.logout(id).await?;
            return Err(AuthError::InvalidToken);
        }
        let status = if now - single.last_access_at > self.timeouts.idle {
            SessionStatus::IdleTimeout
        } else {
            SessionStatus::Active
        };
        Ok((single, Some(user), status))
    }

    /// Inserts `session` under a freshly generated token, retrying on id
    /// collisions, and returns the token.
    async fn create_single(&self, mut session: SingleSession) -> AuthResult<String> {
        for _ in 0..ID_GENERATION_ATTEMPTS {
            session.id = generate_token();
            match self
                .store
                .create(SINGLE_SESSIONS, &session.id, &to_doc(&session)?)
                .await
            {
                Ok(()) => return Ok(session.id),
                Err(err) if err.is_already_exists() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AuthError::storage(
            "could not allocate a unique session id",
        ))
    }

    /// Adds `sid` to the user's session list, creating the `UserSession` on
    /// first login and refreshing the cached profile on every login.
    async fn link_user_session(&self, user: &UserRecord, sid: &str) -> AuthResult<()> {
        let existing = self.read_user(&user.user_id).await?;
        if let Some(mut user_session) = existing {
            user_session.sessions.push(sid.to_string());
            refresh_profile(&mut user_session, user);
            self.store
                .replace(USER_SESSIONS, &user.user_id, &to_doc(&user_session)?)
                .await?;
            return Ok(());
        }

        let fresh = UserSession {
            id: user.user_id.clone(),
            sessions: vec![sid.to_string()],
            data: HashMap::new(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            organization: user.organization.clone(),
            scopes: user.scopes.clone(),
        };
        match self
            .store
            .create(USER_SESSIONS, &user.user_id, &to_doc(&fresh)?)
            .await
        {
            Ok(()) => Ok(()),
            // Lost a create race with a concurrent first login; append instead.
            Err(err) if err.is_already_exists() => {
                let mut user_session = self
                    .read_user(&user.user_id)
                    .await?
                    .ok_or_else(|| AuthError::storage("user session vanished during create"))?;
                user_session.sessions.push(sid.to_string());
                refresh_profile(&mut user_session, user);
                self.store
                    .replace(USER_SESSIONS, &user.user_id, &to_doc(&user_session)?)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn read_single(&self, id: &str) -> AuthResult<Option<SingleSession>> {
        self.store
            .get(SINGLE_SESSIONS, id)
            .await?
            .map(from_doc)
            .transpose()
    }

    async fn read_user(&self, user_id: &str) -> AuthResult<Option<UserSession>> {
        self.store
            .get(USER_SESSIONS, user_id)
            .await?
            .map(from_doc)
            .transpose()
    }
}

fn refresh_profile(user_session: &mut UserSession, user: &UserRecord) {
    user_session.display_name = user.display_name.clone();
    user_session.email = user.email.clone();
    user_session.organization = user.organization.clone();
    user_session.scopes = user.scopes.clone();
}

fn to_doc<T: Serialize>(value: &T) -> AuthResult<Value> {
    serde_json::to_value(value).map_err(|e| AuthError::internal(e.to_string()))
}

fn from_doc<T: DeserializeOwned>(doc: Value) -> AuthResult<T> {
    serde_json::from_value(doc).map_err(|e| AuthError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;
    use wru_storage::MemoryDocumentStore;

    use super::*;

    fn fixed_store() -> (SessionStore, Clock) {
        let clock = Clock::fixed(datetime!(2021-07-02 10:00:00 UTC));
        let store = SessionStore::new(
            Arc::new(MemoryDocumentStore::new()),
            clock.clone(),
            SessionTimeouts::default(),
        );
        (store, clock)
    }

    fn user(id: &str) -> UserRecord {
        UserRecord {
            user_id: id.to_string(),
            display_name: id.to_string(),
            email: format!("{id}@example.com"),
            organization: "secret".to_string(),
            scopes: vec!["login".to_string()],
            federated_accounts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_begin_login_yields_before_login_session() {
        let (store, _) = fixed_store();
        let sid = store
            .begin_login(HashMap::from([(
                "landing_url".to_string(),
                "/p".to_string(),
            )]))
            .await
            .unwrap();

        let ses = store.lookup(&sid).await.unwrap();
        assert_eq!(ses.status, SessionStatus::BeforeLogin);
        assert_eq!(ses.user_id, "");
        assert_eq!(ses.data["landing_url"], "/p");
    }

    #[tokio::test]
    async fn test_pre_login_session_expires_after_login_timeout() {
        let (store, clock) = fixed_store();
        let sid = store.begin_login(HashMap::new()).await.unwrap();

        clock.advance(Duration::minutes(11));
        let err = store.lookup(&sid).await.unwrap_err();
        assert!(err.is_invalid_token());
    }

    #[tokio::test]
    async fn test_complete_login_requires_existing_session() {
        let (store, _) = fixed_store();
        let err = store
            .complete_login("missing", &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_token());
    }

    #[tokio::test]
    async fn test_duplicate_promote_fails() {
        let (store, _) = fixed_store();
        let sid = store.begin_login(HashMap::new()).await.unwrap();

        store
            .complete_login(&sid, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();
        let err = store
            .complete_login(&sid, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_token());
    }

    #[tokio::test]
    async fn test_logout_removes_session_from_user_list() {
        let (store, _) = fixed_store();
        let a = store.begin_login(HashMap::new()).await.unwrap();
        let (sid_a, _) = store
            .complete_login(&a, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();
        let b = store.begin_login(HashMap::new()).await.unwrap();
        let (sid_b, _) = store
            .complete_login(&b, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();

        store.logout(&sid_a).await.unwrap();

        let remaining = store.list_user_sessions("u1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, sid_b);

        // idempotent
        store.logout(&sid_a).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_refreshes_profile_cache() {
        let (store, _) = fixed_store();
        let a = store.begin_login(HashMap::new()).await.unwrap();
        store
            .complete_login(&a, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();

        let mut updated = user("u1");
        updated.display_name = "Renamed".to_string();
        updated.scopes = vec!["login".to_string(), "admin".to_string()];
        let b = store.begin_login(HashMap::new()).await.unwrap();
        let (sid, _) = store
            .complete_login(&b, &updated, &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();

        let ses = store.lookup(&sid).await.unwrap();
        assert_eq!(ses.display_name, "Renamed");
        assert_eq!(ses.scopes, vec!["login", "admin"]);
    }

    #[tokio::test]
    async fn test_renew_active_session_keeps_token() {
        let (store, clock) = fixed_store();
        let a = store.begin_login(HashMap::new()).await.unwrap();
        let (sid, _) = store
            .complete_login(&a, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();

        clock.advance(Duration::minutes(30));
        assert_eq!(store.renew(&sid).await.unwrap(), sid);
    }

    #[tokio::test]
    async fn test_renew_updates_user_session_list() {
        let (store, clock) = fixed_store();
        let a = store.begin_login(HashMap::new()).await.unwrap();
        let (sid, _) = store
            .complete_login(&a, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();

        clock.advance(Duration::hours(4));
        let renewed = store.renew(&sid).await.unwrap();
        assert_ne!(renewed, sid);

        let sessions = store.list_user_sessions("u1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, renewed);
    }

    #[tokio::test]
    async fn test_directives_stamp_extends_idle_lifetime() {
        let (store, clock) = fixed_store();
        let a = store.begin_login(HashMap::new()).await.unwrap();
        let (sid, _) = store
            .complete_login(&a, &user("u1"), &RequestMeta::default(), HashMap::new())
            .await
            .unwrap();

        clock.advance(Duration::minutes(50));
        store.apply_directives(&sid, &[]).await.unwrap();

        clock.advance(Duration::minutes(50));
        let ses = store.lookup(&sid).await.unwrap();
        assert_eq!(ses.status, SessionStatus::Active);
    }
}
