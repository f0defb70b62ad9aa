use crate::audit::AuditEntry;
use crate::error::Result;
use crate::models::Prize;
use crate::signature::{SignatureError, SignatureService};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Terminal result of a redemption attempt. Exactly one of these comes
/// back from every call, and exactly one audit entry is written for it.
#[derive(Debug, Clone, PartialEq)]
pub enum RedemptionOutcome {
    Success {
        prize: Prize,
        redeemed_at: DateTime<Utc>,
        signature_version: u32,
    },
    /// Whole subsystem is switched off; decided before the token is even
    /// looked at.
    SystemOff,
    NotFound,
    /// Token disabled or prize inactive.
    Inactive,
    /// Not valid yet; retryable once `valid_from` passes.
    TooEarly { valid_from: DateTime<Utc> },
    Expired,
    UnknownSignatureVersion { version: u32 },
    /// Signature mismatch. The token row is disabled as a side effect to
    /// stop repeated probing of a forged id.
    BadSignature,
    /// Another request already won the conditional write.
    AlreadyRedeemed,
}

impl RedemptionOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            RedemptionOutcome::Success { .. } => "SUCCESS",
            RedemptionOutcome::SystemOff => "SYSTEM_OFF",
            RedemptionOutcome::NotFound => "NOT_FOUND",
            RedemptionOutcome::Inactive => "INACTIVE",
            RedemptionOutcome::TooEarly { .. } => "TOO_EARLY",
            RedemptionOutcome::Expired => "EXPIRED",
            RedemptionOutcome::UnknownSignatureVersion { .. } => "UNKNOWN_SIGNATURE_VERSION",
            RedemptionOutcome::BadSignature => "BAD_SIGNATURE",
            RedemptionOutcome::AlreadyRedeemed => "ALREADY_REDEEMED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RedemptionOutcome::Success { .. })
    }
}

/// Atomic state machine taking a token from valid to redeemed exactly
/// once. Concurrency correctness rests solely on the store's conditional
/// write; every earlier check may pass redundantly for concurrent racers,
/// which is safe because only one of them wins that write.
pub struct RedemptionCoordinator {
    store: Arc<dyn Store>,
    signatures: Arc<SignatureService>,
}

impl RedemptionCoordinator {
    pub fn new(store: Arc<dyn Store>, signatures: Arc<SignatureService>) -> Self {
        Self { store, signatures }
    }

    pub async fn redeem(&self, token_id: Uuid) -> Result<RedemptionOutcome> {
        // Availability gate first, without inspecting the token. The
        // scheduled-state computation is advisory display data only and
        // never participates in this decision.
        if !self.store.system_config().await?.tokens_enabled {
            return self.conclude(token_id, RedemptionOutcome::SystemOff).await;
        }

        let token = match self.store.token(token_id).await? {
            Some(token) => token,
            None => return self.conclude(token_id, RedemptionOutcome::NotFound).await,
        };

        let prize = match self.store.prize(token.prize_id).await? {
            Some(prize) => prize,
            None => return self.conclude(token_id, RedemptionOutcome::Inactive).await,
        };
        if token.disabled || !prize.active {
            return self.conclude(token_id, RedemptionOutcome::Inactive).await;
        }

        let now = Utc::now();

        if let Some(valid_from) = token.valid_from {
            if now < valid_from {
                return self
                    .conclude(token_id, RedemptionOutcome::TooEarly { valid_from })
                    .await;
            }
        }

        if now > token.expires_at {
            return self.conclude(token_id, RedemptionOutcome::Expired).await;
        }

        match self.signatures.verify_token(
            token.signature_version,
            token.id,
            token.prize_id,
            token.expires_at,
            &token.signature,
        ) {
            Ok(()) => {}
            Err(SignatureError::UnknownVersion(version)) => {
                return self
                    .conclude(token_id, RedemptionOutcome::UnknownSignatureVersion { version })
                    .await;
            }
            Err(SignatureError::InvalidSignature) => {
                // One-way disable; further probing of this id gets
                // INACTIVE without any signature work.
                self.store.disable_token(token_id).await?;
                return self.conclude(token_id, RedemptionOutcome::BadSignature).await;
            }
        }

        // The sole concurrency-correctness mechanism: a predicate-guarded
        // write. Zero rows affected means another request already won.
        if !self.store.redeem_token(token_id, now).await? {
            return self
                .conclude(token_id, RedemptionOutcome::AlreadyRedeemed)
                .await;
        }

        let outcome = RedemptionOutcome::Success {
            prize,
            redeemed_at: now,
            signature_version: token.signature_version,
        };
        self.conclude(token_id, outcome).await
    }

    async fn conclude(
        &self,
        token_id: Uuid,
        outcome: RedemptionOutcome,
    ) -> Result<RedemptionOutcome> {
        self.store
            .append_audit(AuditEntry::redemption(token_id, outcome.code()))
            .await?;

        tracing::info!(
            target: "prizegate::redemption",
            token_id = %token_id,
            outcome = outcome.code(),
            "redemption decided"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use std::collections::HashMap;

    fn signatures() -> Arc<SignatureService> {
        let mut secrets = HashMap::new();
        secrets.insert(1, b"test-secret".to_vec());
        Arc::new(SignatureService::new(secrets, 1).unwrap())
    }

    async fn seed_prize(store: &MemoryStore, active: bool) -> Uuid {
        let prize = Prize {
            id: Uuid::new_v4(),
            name: "plush octopus".to_string(),
            active,
        };
        let id = prize.id;
        store.insert_prize(prize).await.unwrap();
        id
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<SignatureService>, RedemptionCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let signatures = signatures();
        let coordinator = RedemptionCoordinator::new(store.clone(), signatures.clone());
        (store, signatures, coordinator)
    }

    #[tokio::test]
    async fn test_redeem_success_then_already_redeemed() {
        let (store, signatures, coordinator) = setup().await;
        let prize_id = seed_prize(&store, true).await;
        let token = signatures
            .issue_token(prize_id, Uuid::new_v4(), None, Utc::now() + Duration::hours(1))
            .unwrap();
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        let first = coordinator.redeem(token_id).await.unwrap();
        assert!(first.is_success());
        match first {
            RedemptionOutcome::Success {
                signature_version, ..
            } => assert_eq!(signature_version, 1),
            _ => unreachable!(),
        }

        let second = coordinator.redeem(token_id).await.unwrap();
        assert_eq!(second, RedemptionOutcome::AlreadyRedeemed);
    }

    #[tokio::test]
    async fn test_missing_token_not_found() {
        let (_, _, coordinator) = setup().await;
        assert_eq!(
            coordinator.redeem(Uuid::new_v4()).await.unwrap(),
            RedemptionOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_expired_checked_before_any_mutation() {
        let (store, signatures, coordinator) = setup().await;
        let prize_id = seed_prize(&store, true).await;
        // Valid signature, expiry in the past.
        let token = signatures
            .issue_token(prize_id, Uuid::new_v4(), None, Utc::now() - Duration::minutes(1))
            .unwrap();
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        assert_eq!(
            coordinator.redeem(token_id).await.unwrap(),
            RedemptionOutcome::Expired
        );

        let stored = store.token(token_id).await.unwrap().unwrap();
        assert!(stored.redeemed_at.is_none());
        assert!(!stored.disabled);
    }

    #[tokio::test]
    async fn test_too_early_until_valid_from() {
        let (store, signatures, coordinator) = setup().await;
        let prize_id = seed_prize(&store, true).await;
        let valid_from = Utc::now() + Duration::hours(1);
        let token = signatures
            .issue_token(
                prize_id,
                Uuid::new_v4(),
                Some(valid_from),
                Utc::now() + Duration::hours(2),
            )
            .unwrap();
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        assert_eq!(
            coordinator.redeem(token_id).await.unwrap(),
            RedemptionOutcome::TooEarly { valid_from }
        );

        // Same token with valid_from in the past redeems fine.
        let mut ready = store.token(token_id).await.unwrap().unwrap();
        ready.valid_from = Some(Utc::now() - Duration::seconds(1));
        store.insert_token(ready).await.unwrap();

        assert!(coordinator.redeem(token_id).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_bad_signature_disables_token() {
        let (store, signatures, coordinator) = setup().await;
        let prize_id = seed_prize(&store, true).await;
        let mut token = signatures
            .issue_token(prize_id, Uuid::new_v4(), None, Utc::now() + Duration::hours(1))
            .unwrap();
        // Corrupt one signature character.
        let mut bytes = token.signature.clone().into_bytes();
        bytes[0] = if bytes[0] == b'A' { b'B' } else { b'A' };
        token.signature = String::from_utf8(bytes).unwrap();
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        assert_eq!(
            coordinator.redeem(token_id).await.unwrap(),
            RedemptionOutcome::BadSignature
        );

        // The row itself is now disabled; even a corrected signature
        // cannot resurrect it.
        let mut repaired = store.token(token_id).await.unwrap().unwrap();
        repaired.signature = signatures
            .sign_token(repaired.id, repaired.prize_id, repaired.expires_at)
            .unwrap();
        store.insert_token(repaired).await.unwrap();

        assert_eq!(
            coordinator.redeem(token_id).await.unwrap(),
            RedemptionOutcome::Inactive
        );
    }

    #[tokio::test]
    async fn test_unknown_signature_version() {
        let (store, signatures, coordinator) = setup().await;
        let prize_id = seed_prize(&store, true).await;
        let mut token = signatures
            .issue_token(prize_id, Uuid::new_v4(), None, Utc::now() + Duration::hours(1))
            .unwrap();
        token.signature_version = 42;
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        assert_eq!(
            coordinator.redeem(token_id).await.unwrap(),
            RedemptionOutcome::UnknownSignatureVersion { version: 42 }
        );

        // No self-disable for an unknown version; the row is untouched.
        assert!(!store.token(token_id).await.unwrap().unwrap().disabled);
    }

    #[tokio::test]
    async fn test_inactive_prize_blocks_redemption() {
        let (store, signatures, coordinator) = setup().await;
        let prize_id = seed_prize(&store, false).await;
        let token = signatures
            .issue_token(prize_id, Uuid::new_v4(), None, Utc::now() + Duration::hours(1))
            .unwrap();
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        assert_eq!(
            coordinator.redeem(token_id).await.unwrap(),
            RedemptionOutcome::Inactive
        );
    }

    #[tokio::test]
    async fn test_system_off_short_circuits() {
        let (store, signatures, coordinator) = setup().await;
        let prize_id = seed_prize(&store, true).await;
        let token = signatures
            .issue_token(prize_id, Uuid::new_v4(), None, Utc::now() + Duration::hours(1))
            .unwrap();
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        store.set_tokens_enabled(false).await.unwrap();
        assert_eq!(
            coordinator.redeem(token_id).await.unwrap(),
            RedemptionOutcome::SystemOff
        );

        store.set_tokens_enabled(true).await.unwrap();
        assert!(coordinator.redeem(token_id).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_concurrent_redemptions_single_winner() {
        let (store, signatures, _) = setup().await;
        let prize_id = seed_prize(&store, true).await;
        let token = signatures
            .issue_token(prize_id, Uuid::new_v4(), None, Utc::now() + Duration::hours(1))
            .unwrap();
        let token_id = token.id;
        store.insert_token(token).await.unwrap();

        let coordinator = Arc::new(RedemptionCoordinator::new(store.clone(), signatures));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.redeem(token_id).await.unwrap()
            }));
        }

        let mut successes = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                RedemptionOutcome::Success { .. } => successes += 1,
                RedemptionOutcome::AlreadyRedeemed => already += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(already, 15);
    }

    #[tokio::test]
    async fn test_every_branch_writes_one_audit_entry() {
        let (store, _, coordinator) = setup().await;
        let missing = Uuid::new_v4();

        coordinator.redeem(missing).await.unwrap();
        coordinator.redeem(missing).await.unwrap();

        let entries = store.audit_for_subject(&missing.to_string()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.outcome == "NOT_FOUND"));
    }
}
