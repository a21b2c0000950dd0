//! Short-lived TURN-style credential issuance (spec.md §4.J):
//! `username = <unixExpiry>:<baseUser>`, `credential =
//! HMAC-SHA1(username, baseCredential)`, expiry capped at 30 minutes.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::store::SecretManager;

type HmacSha1 = Hmac<Sha1>;

/// Upper bound on token lifetime, per spec.md §4.J ("expiry ≤ 30 minutes").
pub const MAX_TOKEN_TTL_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnToken {
    pub username: String,
    pub credential: String,
    pub expires_at: i64,
}

impl SecretManager {
    /// Issues a TURN-style token for `base_user`/`base_credential`.
    /// `ttl_secs` is clamped to [`MAX_TOKEN_TTL_SECS`].
    pub fn issue_turn_token(&self, base_user: &str, base_credential: &str, ttl_secs: i64, actor: &str) -> TurnToken {
        let ttl = ttl_secs.clamp(1, MAX_TOKEN_TTL_SECS);
        let expires_at = anchor_core::time::now_secs() + ttl;
        let username = format!("{expires_at}:{base_user}");

        let mut mac = HmacSha1::new_from_slice(base_credential.as_bytes()).expect("HMAC accepts any key length");
        mac.update(username.as_bytes());
        let credential = hex::encode(mac.finalize().into_bytes());

        self.audit_token_issued(base_user, actor);

        TurnToken {
            username,
            credential,
            expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::MasterKey;

    fn manager() -> SecretManager {
        SecretManager::new(MasterKey::derive("pw", b"salt", 100_000))
    }

    #[test]
    fn username_embeds_expiry_and_base_user() {
        let mgr = manager();
        let token = mgr.issue_turn_token("alice", "base-secret", 60, "svc");
        assert!(token.username.ends_with(":alice"));
        let expiry_part: i64 = token.username.split(':').next().unwrap().parse().unwrap();
        assert_eq!(expiry_part, token.expires_at);
    }

    #[test]
    fn ttl_is_clamped_to_thirty_minutes() {
        let mgr = manager();
        let token = mgr.issue_turn_token("alice", "base-secret", 10_000, "svc");
        let now = anchor_core::time::now_secs();
        assert!(token.expires_at <= now + MAX_TOKEN_TTL_SECS);
    }

    #[test]
    fn credential_is_deterministic_hmac_of_username() {
        let mgr = manager();
        let token = mgr.issue_turn_token("alice", "base-secret", 60, "svc");
        let mut mac = HmacSha1::new_from_slice(b"base-secret").unwrap();
        mac.update(token.username.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(token.credential, expected);
    }

    #[test]
    fn issuing_a_token_appends_an_audit_entry() {
        let mgr = manager();
        mgr.issue_turn_token("alice", "base-secret", 60, "svc");
        let log = mgr.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].key, "alice");
    }
}
