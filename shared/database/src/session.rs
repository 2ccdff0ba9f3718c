//! Refresh-token sessions, password resets and login throttling.
//!
//! Only SHA-256 hashes of refresh and password-reset tokens are used as
//! keys. Taking a session or reset removes it, so each token works once.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::RedisPool;

const SESSION_PREFIX: &str = "pharmy:session:";
const LOGIN_FAILURE_PREFIX: &str = "pharmy:login_failures:";
const PASSWORD_RESET_PREFIX: &str = "pharmy:password_reset:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSession {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// Pending password reset, keyed by the hash of the mailed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordReset {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_session(&self, token_hash: &str, session: &RefreshSession, ttl: Duration) -> Result<()>;

    /// Removes and returns the session. `None` if unknown or expired.
    async fn take_session(&self, token_hash: &str) -> Result<Option<RefreshSession>>;

    async fn revoke_session(&self, token_hash: &str) -> Result<()>;

    /// Counts a failed login and returns the failures inside the current window.
    async fn record_login_failure(&self, email: &str, window: Duration) -> Result<u32>;

    async fn login_failures(&self, email: &str) -> Result<u32>;

    async fn clear_login_failures(&self, email: &str) -> Result<()>;

    async fn put_password_reset(&self, token_hash: &str, reset: &PasswordReset, ttl: Duration) -> Result<()>;

    /// Removes and returns the reset. `None` if unknown, used or expired.
    async fn take_password_reset(&self, token_hash: &str) -> Result<Option<PasswordReset>>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisSessionStore {
    pool: RedisPool,
}

impl RedisSessionStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: String, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(serde_json::to_string(value)?)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn take_json<T: serde::de::DeserializeOwned>(&self, key: String) -> Result<Option<T>> {
        let mut conn = self.pool.clone();
        let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        value
            .map(|v| serde_json::from_str(&v).context("Corrupt session record"))
            .transpose()
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.num_seconds().max(1) as u64
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put_session(&self, token_hash: &str, session: &RefreshSession, ttl: Duration) -> Result<()> {
        self.put_json(format!("{}{}", SESSION_PREFIX, token_hash), session, ttl)
            .await
            .context("Failed to store refresh session")
    }

    async fn take_session(&self, token_hash: &str) -> Result<Option<RefreshSession>> {
        self.take_json(format!("{}{}", SESSION_PREFIX, token_hash))
            .await
            .context("Failed to take refresh session")
    }

    async fn revoke_session(&self, token_hash: &str) -> Result<()> {
        let mut conn = self.pool.clone();
        conn.del::<_, ()>(format!("{}{}", SESSION_PREFIX, token_hash))
            .await
            .context("Failed to revoke refresh session")?;
        Ok(())
    }

    async fn record_login_failure(&self, email: &str, window: Duration) -> Result<u32> {
        let mut conn = self.pool.clone();
        let key = format!("{}{}", LOGIN_FAILURE_PREFIX, email);
        let count: u32 = conn.incr(&key, 1).await.context("Failed to count login failure")?;
        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(ttl_seconds(window))
                .query_async::<_, ()>(&mut conn)
                .await
                .context("Failed to set login failure window")?;
        }
        Ok(count)
    }

    async fn login_failures(&self, email: &str) -> Result<u32> {
        let mut conn = self.pool.clone();
        let count: Option<u32> = conn
            .get(format!("{}{}", LOGIN_FAILURE_PREFIX, email))
            .await
            .context("Failed to read login failures")?;
        Ok(count.unwrap_or(0))
    }

    async fn clear_login_failures(&self, email: &str) -> Result<()> {
        let mut conn = self.pool.clone();
        conn.del::<_, ()>(format!("{}{}", LOGIN_FAILURE_PREFIX, email))
            .await
            .context("Failed to clear login failures")?;
        Ok(())
    }

    async fn put_password_reset(&self, token_hash: &str, reset: &PasswordReset, ttl: Duration) -> Result<()> {
        self.put_json(format!("{}{}", PASSWORD_RESET_PREFIX, token_hash), reset, ttl)
            .await
            .context("Failed to store password reset")
    }

    async fn take_password_reset(&self, token_hash: &str) -> Result<Option<PasswordReset>> {
        self.take_json(format!("{}{}", PASSWORD_RESET_PREFIX, token_hash))
            .await
            .context("Failed to take password reset")
    }

    async fn ping(&self) -> Result<()> {
        crate::redis::health_check(&self.pool).await
    }
}

/// Process-local store for tests and single-node development.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, (RefreshSession, DateTime<Utc>)>>,
    failures: Mutex<HashMap<String, (u32, DateTime<Utc>)>>,
    resets: Mutex<HashMap<String, (PasswordReset, DateTime<Utc>)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("Session store lock poisoned")
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put_session(&self, token_hash: &str, session: &RefreshSession, ttl: Duration) -> Result<()> {
        let mut sessions = self.sessions.lock().map_err(poisoned)?;
        sessions.insert(token_hash.to_string(), (session.clone(), Utc::now() + ttl));
        Ok(())
    }

    async fn take_session(&self, token_hash: &str) -> Result<Option<RefreshSession>> {
        let mut sessions = self.sessions.lock().map_err(poisoned)?;
        Ok(sessions
            .remove(token_hash)
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(session, _)| session))
    }

    async fn revoke_session(&self, token_hash: &str) -> Result<()> {
        self.sessions.lock().map_err(poisoned)?.remove(token_hash);
        Ok(())
    }

    async fn record_login_failure(&self, email: &str, window: Duration) -> Result<u32> {
        let now = Utc::now();
        let mut failures = self.failures.lock().map_err(poisoned)?;
        let entry = failures.entry(email.to_string()).or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn login_failures(&self, email: &str) -> Result<u32> {
        let failures = self.failures.lock().map_err(poisoned)?;
        Ok(failures
            .get(email)
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(count, _)| *count)
            .unwrap_or(0))
    }

    async fn clear_login_failures(&self, email: &str) -> Result<()> {
        self.failures.lock().map_err(poisoned)?.remove(email);
        Ok(())
    }

    async fn put_password_reset(&self, token_hash: &str, reset: &PasswordReset, ttl: Duration) -> Result<()> {
        let mut resets = self.resets.lock().map_err(poisoned)?;
        resets.insert(token_hash.to_string(), (reset.clone(), Utc::now() + ttl));
        Ok(())
    }

    async fn take_password_reset(&self, token_hash: &str) -> Result<Option<PasswordReset>> {
        let mut resets = self.resets.lock().map_err(poisoned)?;
        Ok(resets
            .remove(token_hash)
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(reset, _)| reset))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RefreshSession {
        RefreshSession {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_session_can_be_taken_once() {
        let store = InMemorySessionStore::new();
        let s = session();
        store.put_session("abc", &s, Duration::days(7)).await.unwrap();

        assert_eq!(store.take_session("abc").await.unwrap(), Some(s));
        assert_eq!(store.take_session("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_session_is_gone() {
        let store = InMemorySessionStore::new();
        store
            .put_session("abc", &session(), Duration::seconds(-1))
            .await
            .unwrap();
        assert_eq!(store.take_session("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revoked_session_is_gone() {
        let store = InMemorySessionStore::new();
        store.put_session("abc", &session(), Duration::days(7)).await.unwrap();
        store.revoke_session("abc").await.unwrap();
        assert_eq!(store.take_session("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_password_reset_is_single_use_and_expires() {
        let store = InMemorySessionStore::new();
        let reset = PasswordReset {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            requested_at: Utc::now(),
        };
        store
            .put_password_reset("r1", &reset, Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(store.take_session("r1").await.unwrap(), None);
        assert_eq!(store.take_password_reset("r1").await.unwrap(), Some(reset.clone()));
        assert_eq!(store.take_password_reset("r1").await.unwrap(), None);

        store
            .put_password_reset("r2", &reset, Duration::seconds(-1))
            .await
            .unwrap();
        assert_eq!(store.take_password_reset("r2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_failures_count_and_clear() {
        let store = InMemorySessionStore::new();
        let window = Duration::minutes(15);
        for expected in 1..=3 {
            assert_eq!(store.record_login_failure("a@b.co", window).await.unwrap(), expected);
        }
        assert_eq!(store.login_failures("a@b.co").await.unwrap(), 3);
        assert_eq!(store.login_failures("other@b.co").await.unwrap(), 0);

        store.clear_login_failures("a@b.co").await.unwrap();
        assert_eq!(store.login_failures("a@b.co").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_window_resets() {
        let store = InMemorySessionStore::new();
        store.record_login_failure("a@b.co", Duration::seconds(-1)).await.unwrap();
        assert_eq!(store.login_failures("a@b.co").await.unwrap(), 0);
        assert_eq!(
            store.record_login_failure("a@b.co", Duration::minutes(15)).await.unwrap(),
            1
        );
    }
}
