//! DashMap-backed in-memory store
//!
//! The conditional allowance update takes the shard lock for the entry,
//! compares the stored version, and writes in place. That single point is
//! what serializes concurrent consumption and monitoring writes against one
//! allowance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use airpack_common::{
    AirpackError, Allowance, AllowanceStatus, Result, Session, SessionState, Storage, UsageEvent,
};

/// In-memory storage over keyed concurrent maps
#[derive(Default)]
pub struct MemoryStore {
    allowances: DashMap<Uuid, Allowance>,
    sessions: DashMap<Uuid, Session>,
    usage: DashMap<Uuid, Vec<UsageEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert_allowance(&self, allowance: Allowance) -> Result<()> {
        self.allowances.insert(allowance.id, allowance);
        Ok(())
    }

    async fn allowance(&self, id: Uuid) -> Result<Option<Allowance>> {
        Ok(self.allowances.get(&id).map(|r| r.clone()))
    }

    async fn update_allowance(&self, allowance: &Allowance, expected_version: u64) -> Result<()> {
        let mut entry = self
            .allowances
            .get_mut(&allowance.id)
            .ok_or(AirpackError::AllowanceNotFound(allowance.id))?;
        if entry.version != expected_version {
            return Err(AirpackError::PersistenceConflict {
                expected: expected_version,
                found: entry.version,
            });
        }
        *entry = allowance.clone();
        Ok(())
    }

    async fn owner_allowances(
        &self,
        owner_id: &str,
        status: Option<AllowanceStatus>,
    ) -> Result<Vec<Allowance>> {
        Ok(self
            .allowances
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .map(|e| e.clone())
            .collect())
    }

    async fn allowances_by_status(&self, status: AllowanceStatus) -> Result<Vec<Allowance>> {
        Ok(self
            .allowances
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.clone())
            .collect())
    }

    async fn expiring_allowances(&self, now: DateTime<Utc>) -> Result<Vec<Allowance>> {
        Ok(self
            .allowances
            .iter()
            .filter(|e| e.status == AllowanceStatus::Active && e.is_expired(now))
            .map(|e| e.clone())
            .collect())
    }

    async fn insert_session(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id, session);
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.get(&id).map(|r| r.clone()))
    }

    async fn update_session(&self, session: &Session) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session.id)
            .ok_or(AirpackError::SessionNotFound(session.id))?;
        *entry = session.clone();
        Ok(())
    }

    async fn owner_sessions(&self, owner_id: &str) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .map(|e| e.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn sessions_by_state(&self, state: SessionState) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|e| e.state == state)
            .map(|e| e.clone())
            .collect())
    }

    async fn owner_sessions_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|e| e.owner_id == owner_id && e.created_at >= since)
            .map(|e| e.clone())
            .collect())
    }

    async fn append_usage(&self, event: UsageEvent) -> Result<()> {
        self.usage.entry(event.session_id).or_default().push(event);
        Ok(())
    }

    async fn session_usage(&self, session_id: Uuid) -> Result<Vec<UsageEvent>> {
        Ok(self
            .usage
            .get(&session_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn usage_events_since(&self, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .usage
            .iter()
            .map(|e| e.iter().filter(|ev| ev.recorded_at >= since).count() as u64)
            .sum())
    }
}
