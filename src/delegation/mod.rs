//! Delegation token lifecycle
//!
//! A delegation token is a bearer credential issued by the metadata server:
//! opaque token bytes plus the signing key that proves possession. The
//! manager keeps no token state of its own. `create` returns a fresh token,
//! `renew` returns the renewed token and leaves replacing the old value to
//! the caller, and `cancel` needs only the token bytes and key.
//!
//! Once a token has been canceled every renewal fails with
//! [`AccessError::TokenRevoked`], including retries after an earlier failed
//! renewal.

use std::fmt;
use std::sync::Arc;

use crate::error::{errno, AccessError, AccessResult};
use crate::metadata::types::UserId;
use crate::rpc::{MetaServerClient, RpcError};
use crate::stats::{ClientStats, Counter};

/// Signed, time-bounded credential
#[derive(Clone, PartialEq, Eq)]
pub struct DelegationToken {
    pub token: Vec<u8>,
    pub key: Vec<u8>,
    pub delegation_allowed: bool,
    /// Issue time in seconds since the epoch (0 when unknown)
    pub issued_time: u64,
    /// Renewal window, counted from `issued_time`
    pub token_valid_for_sec: u64,
    /// Absolute lifetime, counted from `issued_time`
    pub delegation_valid_for_sec: u64,
}

impl DelegationToken {
    /// Minimal token carrying only what cancellation needs
    pub fn from_parts(token: Vec<u8>, key: Vec<u8>) -> Self {
        Self {
            token,
            key,
            delegation_allowed: false,
            issued_time: 0,
            token_valid_for_sec: 0,
            delegation_valid_for_sec: 0,
        }
    }

    /// Copy of this token reduced to token bytes and key
    pub fn cancel_handle(&self) -> Self {
        Self::from_parts(self.token.clone(), self.key.clone())
    }

    /// End of the current renewal window (seconds since the epoch)
    pub fn valid_until(&self) -> u64 {
        self.issued_time.saturating_add(self.token_valid_for_sec)
    }

    /// End of the absolute lifetime (seconds since the epoch)
    pub fn delegation_valid_until(&self) -> u64 {
        self.issued_time
            .saturating_add(self.delegation_valid_for_sec)
    }

    /// True when the absolute lifetime has elapsed at `now`
    ///
    /// Tokens without an issue time (cancel handles) never expire locally.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.issued_time != 0 && now >= self.delegation_valid_until()
    }
}

// Keys never reach the logs
impl fmt::Debug for DelegationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegationToken")
            .field("token_len", &self.token.len())
            .field("key", &"<redacted>")
            .field("delegation_allowed", &self.delegation_allowed)
            .field("issued_time", &self.issued_time)
            .field("token_valid_for_sec", &self.token_valid_for_sec)
            .field("delegation_valid_for_sec", &self.delegation_valid_for_sec)
            .finish()
    }
}

pub(crate) fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Issues, renews and cancels delegation tokens
pub struct DelegationTokenManager {
    meta: Arc<dyn MetaServerClient>,
    stats: Arc<ClientStats>,
}

impl DelegationTokenManager {
    pub fn new(meta: Arc<dyn MetaServerClient>, stats: Arc<ClientStats>) -> Self {
        Self { meta, stats }
    }

    /// Request a new token for `user`
    pub async fn create(
        &self,
        user: Option<UserId>,
        allow_delegation: bool,
        valid_for_sec: u64,
    ) -> AccessResult<DelegationToken> {
        self.stats.incr(Counter::TokenOps);
        let reply = self
            .meta
            .create_delegation_token(UserId::to_wire(user), allow_delegation, valid_for_sec)
            .await
            .map_err(|e| AccessError::from_rpc(e, ""))?;

        let token = DelegationToken::from(reply);
        tracing::debug!(
            "issued delegation token: valid for {}s, lifetime {}s",
            token.token_valid_for_sec,
            token.delegation_valid_for_sec
        );
        Ok(token)
    }

    /// Extend the validity of `token`, returning the renewed token
    ///
    /// Expiry is decided by the server: a canceled token reports
    /// `TokenRevoked` even after its lifetime has passed.
    pub async fn renew(&self, token: &DelegationToken) -> AccessResult<DelegationToken> {
        self.stats.incr(Counter::TokenOps);
        match self
            .meta
            .renew_delegation_token(&token.token, &token.key)
            .await
        {
            Ok(reply) => Ok(DelegationToken::from(reply)),
            // Unknown and canceled tokens look the same to the caller
            Err(RpcError::Status(errno::ENOENT)) | Err(RpcError::Status(errno::EKEYREVOKED)) => {
                tracing::debug!("renewal refused: token revoked or unknown");
                Err(AccessError::TokenRevoked)
            }
            Err(e) => Err(AccessError::from_rpc(e, "")),
        }
    }

    /// Invalidate `token` on the server; canceling twice is not an error
    pub async fn cancel(&self, token: &DelegationToken) -> AccessResult<()> {
        self.stats.incr(Counter::TokenOps);
        match self
            .meta
            .cancel_delegation_token(&token.token, &token.key)
            .await
        {
            Ok(()) => Ok(()),
            Err(RpcError::Status(errno::ENOENT)) | Err(RpcError::Status(errno::EKEYREVOKED)) => {
                tracing::debug!("cancel: token already gone");
                Ok(())
            }
            Err(e) => Err(AccessError::from_rpc(e, "")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMetaServer;

    fn manager(server: &Arc<MemoryMetaServer>) -> DelegationTokenManager {
        DelegationTokenManager::new(server.clone(), Arc::new(ClientStats::default()))
    }

    #[test]
    fn test_cancel_handle_and_expiry() {
        let token = DelegationToken {
            token: vec![1, 2, 3],
            key: vec![9; 16],
            delegation_allowed: true,
            issued_time: 1000,
            token_valid_for_sec: 60,
            delegation_valid_for_sec: 600,
        };
        let handle = token.cancel_handle();
        assert_eq!(handle.token, token.token);
        assert_eq!(handle.key, token.key);
        assert_eq!(handle.issued_time, 0);
        assert!(!handle.is_expired_at(u64::MAX));

        assert_eq!(token.valid_until(), 1060);
        assert!(!token.is_expired_at(1599));
        assert!(token.is_expired_at(1600));
        assert!(!format!("{:?}", token).contains("9, 9"));
    }

    #[tokio::test]
    async fn test_create_renew_cancel() {
        let server = Arc::new(MemoryMetaServer::new());
        let tokens = manager(&server);

        let token = tokens.create(None, true, 120).await.unwrap();
        assert!(token.delegation_allowed);
        assert_eq!(token.token_valid_for_sec, 120);
        assert!(token.delegation_valid_for_sec >= 120);

        let renewed = tokens.renew(&token).await.unwrap();
        assert_eq!(renewed.token, token.token);
        assert_eq!(renewed.issued_time, token.issued_time);

        tokens.cancel(&token.cancel_handle()).await.unwrap();
        tokens.cancel(&token.cancel_handle()).await.unwrap();

        // Every later attempt fails the same way
        for _ in 0..3 {
            assert!(matches!(
                tokens.renew(&renewed).await,
                Err(AccessError::TokenRevoked)
            ));
        }
    }

    #[tokio::test]
    async fn test_renew_with_wrong_key_is_auth_error() {
        let server = Arc::new(MemoryMetaServer::new());
        let tokens = manager(&server);

        let mut token = tokens.create(None, true, 60).await.unwrap();
        token.key[0] ^= 0xff;
        assert!(matches!(
            tokens.renew(&token).await,
            Err(AccessError::Auth { .. })
        ));
        assert!(matches!(
            tokens.cancel(&token).await,
            Err(AccessError::Auth { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let server = Arc::new(MemoryMetaServer::new());
        let tokens = manager(&server);

        let token = tokens.create(None, true, 60).await.unwrap();
        server.advance_clock(token.delegation_valid_for_sec + 1);
        assert!(matches!(
            tokens.renew(&token).await,
            Err(AccessError::TokenExpired)
        ));

        let mut stale = token.clone();
        stale.issued_time = 1;
        stale.delegation_valid_for_sec = 1;
        assert!(matches!(
            tokens.renew(&stale).await,
            Err(AccessError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_canceled_token_stays_revoked_past_lifetime() {
        let server = Arc::new(MemoryMetaServer::new());
        let tokens = manager(&server);

        let token = tokens.create(None, true, 60).await.unwrap();
        tokens.cancel(&token.cancel_handle()).await.unwrap();
        assert!(matches!(
            tokens.renew(&token).await,
            Err(AccessError::TokenRevoked)
        ));

        server.advance_clock(token.delegation_valid_for_sec + 1);
        let mut stale = token.clone();
        stale.issued_time = 1;
        stale.delegation_valid_for_sec = 1;
        assert!(stale.is_expired_at(now_secs()));
        for t in [&token, &stale] {
            assert!(matches!(tokens.renew(t).await, Err(AccessError::TokenRevoked)));
        }
    }

    #[tokio::test]
    async fn test_create_refused() {
        let server = Arc::new(MemoryMetaServer::new());
        server.set_delegation_enabled(false);
        let tokens = manager(&server);
        assert!(matches!(
            tokens.create(Some(UserId(500)), true, 60).await,
            Err(AccessError::Auth { .. })
        ));
    }
}
