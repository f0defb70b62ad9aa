use crate::audit::AuditEntry;
use crate::error::{Error, Result};
use crate::models::{Person, Prize, Scan, ScanDirection, SystemConfig, Token};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Transactional store the core runs against.
///
/// The backend is a black box; the one contract that matters for
/// correctness is `redeem_token`: a conditional write equivalent to
/// `UPDATE tokens SET redeemed_at = $at WHERE id = $id AND redeemed_at IS
/// NULL`, returning whether a row was affected. That predicate-guarded
/// write is the sole concurrency mechanism for redemption; no
/// application-level lock may stand in for it.
#[async_trait]
pub trait Store: Send + Sync {
    async fn token(&self, id: Uuid) -> Result<Option<Token>>;
    async fn prize(&self, id: Uuid) -> Result<Option<Prize>>;
    async fn person(&self, id: Uuid) -> Result<Option<Person>>;
    /// Case-insensitive lookup for manual/kiosk code entry.
    async fn person_by_code(&self, code: &str) -> Result<Option<Person>>;

    async fn insert_token(&self, token: Token) -> Result<()>;
    async fn insert_prize(&self, prize: Prize) -> Result<()>;
    async fn insert_person(&self, person: Person) -> Result<()>;

    /// One-way: a disabled token never comes back.
    async fn disable_token(&self, id: Uuid) -> Result<()>;

    /// Conditional redemption write. Returns `true` if this call moved
    /// the token from unredeemed to redeemed, `false` if another request
    /// already won (or the token does not exist).
    async fn redeem_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    async fn insert_scan(&self, scan: Scan) -> Result<()>;
    /// Whether the subject has a scan with the given direction in
    /// `[from, to)`.
    async fn has_scan_in_range(
        &self,
        subject_id: Uuid,
        direction: ScanDirection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool>;
    /// Most recent scan instant for the subject, any direction.
    async fn last_scan_at(&self, subject_id: Uuid) -> Result<Option<DateTime<Utc>>>;

    async fn system_config(&self) -> Result<SystemConfig>;
    /// Blind overwrite of the availability flag; boundary jobs rely on
    /// this never being a read-modify-write.
    async fn set_tokens_enabled(&self, enabled: bool) -> Result<()>;

    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;
    async fn audit_for_subject(&self, subject: &str) -> Result<Vec<AuditEntry>>;
}

#[derive(Default)]
struct MemoryInner {
    tokens: HashMap<Uuid, Token>,
    prizes: HashMap<Uuid, Prize>,
    people: HashMap<Uuid, Person>,
    scans: Vec<Scan>,
    audit: Vec<AuditEntry>,
    config: Option<SystemConfig>,
}

/// In-process reference implementation. Each method is atomic under one
/// lock, which models the per-statement serialization the relational
/// backend provides.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryInner>> {
        self.inner
            .read()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryInner>> {
        self.inner
            .write()
            .map_err(|_| Error::Store("store lock poisoned".to_string()))
    }

    /// Number of scan rows recorded for a subject.
    pub fn scan_count(&self, subject_id: Uuid) -> usize {
        self.read()
            .map(|inner| {
                inner
                    .scans
                    .iter()
                    .filter(|s| s.subject_id == subject_id)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn token(&self, id: Uuid) -> Result<Option<Token>> {
        Ok(self.read()?.tokens.get(&id).cloned())
    }

    async fn prize(&self, id: Uuid) -> Result<Option<Prize>> {
        Ok(self.read()?.prizes.get(&id).cloned())
    }

    async fn person(&self, id: Uuid) -> Result<Option<Person>> {
        Ok(self.read()?.people.get(&id).cloned())
    }

    async fn person_by_code(&self, code: &str) -> Result<Option<Person>> {
        let inner = self.read()?;
        Ok(inner
            .people
            .values()
            .find(|p| p.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn insert_token(&self, token: Token) -> Result<()> {
        self.write()?.tokens.insert(token.id, token);
        Ok(())
    }

    async fn insert_prize(&self, prize: Prize) -> Result<()> {
        self.write()?.prizes.insert(prize.id, prize);
        Ok(())
    }

    async fn insert_person(&self, person: Person) -> Result<()> {
        self.write()?.people.insert(person.id, person);
        Ok(())
    }

    async fn disable_token(&self, id: Uuid) -> Result<()> {
        if let Some(token) = self.write()?.tokens.get_mut(&id) {
            token.disabled = true;
        }
        Ok(())
    }

    async fn redeem_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.tokens.get_mut(&id) {
            Some(token) if token.redeemed_at.is_none() => {
                token.redeemed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_scan(&self, scan: Scan) -> Result<()> {
        self.write()?.scans.push(scan);
        Ok(())
    }

    async fn has_scan_in_range(
        &self,
        subject_id: Uuid,
        direction: ScanDirection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner.scans.iter().any(|s| {
            s.subject_id == subject_id
                && s.direction == direction
                && s.scanned_at >= from
                && s.scanned_at < to
        }))
    }

    async fn last_scan_at(&self, subject_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let inner = self.read()?;
        Ok(inner
            .scans
            .iter()
            .filter(|s| s.subject_id == subject_id)
            .map(|s| s.scanned_at)
            .max())
    }

    async fn system_config(&self) -> Result<SystemConfig> {
        Ok(self.read()?.config.unwrap_or_default())
    }

    async fn set_tokens_enabled(&self, enabled: bool) -> Result<()> {
        self.write()?.config = Some(SystemConfig {
            tokens_enabled: enabled,
        });
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.write()?.audit.push(entry);
        Ok(())
    }

    async fn audit_for_subject(&self, subject: &str) -> Result<Vec<AuditEntry>> {
        let inner = self.read()?;
        Ok(inner
            .audit
            .iter()
            .filter(|e| e.subject == subject)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_in: Duration) -> Token {
        Token {
            id: Uuid::new_v4(),
            prize_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            signature: "sig".to_string(),
            signature_version: 1,
            expires_at: Utc::now() + expires_in,
            valid_from: None,
            redeemed_at: None,
            disabled: false,
        }
    }

    #[tokio::test]
    async fn test_redeem_token_is_conditional() {
        let store = MemoryStore::new();
        let t = token(Duration::hours(1));
        let id = t.id;
        store.insert_token(t).await.unwrap();

        let now = Utc::now();
        assert!(store.redeem_token(id, now).await.unwrap());
        // Second write finds the predicate unsatisfied.
        assert!(!store.redeem_token(id, now).await.unwrap());

        let stored = store.token(id).await.unwrap().unwrap();
        assert_eq!(stored.redeemed_at, Some(now));
    }

    #[tokio::test]
    async fn test_redeem_missing_token_affects_no_rows() {
        let store = MemoryStore::new();
        assert!(!store.redeem_token(Uuid::new_v4(), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_person_by_code_case_insensitive() {
        let store = MemoryStore::new();
        let person = Person {
            id: Uuid::new_v4(),
            code: "AB12".to_string(),
            name: "Dana".to_string(),
            active: true,
        };
        store.insert_person(person.clone()).await.unwrap();

        let found = store.person_by_code("ab12").await.unwrap().unwrap();
        assert_eq!(found.id, person.id);
        assert!(store.person_by_code("zz99").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disable_token_is_sticky() {
        let store = MemoryStore::new();
        let t = token(Duration::hours(1));
        let id = t.id;
        store.insert_token(t).await.unwrap();

        store.disable_token(id).await.unwrap();
        assert!(store.token(id).await.unwrap().unwrap().disabled);
    }

    #[tokio::test]
    async fn test_system_config_defaults_enabled() {
        let store = MemoryStore::new();
        assert!(store.system_config().await.unwrap().tokens_enabled);

        store.set_tokens_enabled(false).await.unwrap();
        assert!(!store.system_config().await.unwrap().tokens_enabled);
    }
}
