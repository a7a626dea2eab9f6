//! Staleness tracking over the SyncState table.
//!
//! SyncState holds one row per feed with the freshness token of the dump that was last
//! applied. Rows are written on the regeneration's own transaction, so a token is never
//! recorded for data that did not commit.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::fmt;

use crate::download::{Feed, FreshnessToken};
use crate::error::Result;
use crate::parser::format_timestamp;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub key: String,
    pub token: Option<FreshnessToken>,
    pub applied_at: String,
}

/// Outcome of comparing a feed's recorded token to the remote one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale(StaleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    NeverApplied,
    /// The remote gave no token, so it cannot be proven unchanged
    Untracked,
    Newer,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StaleReason::Forced => "forced",
            StaleReason::NeverApplied => "never applied",
            StaleReason::Untracked => "no remote freshness token",
            StaleReason::Newer => "remote is newer",
        })
    }
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

pub struct StalenessTracker;

impl StalenessTracker {
    pub fn recorded(conn: &Connection, feed: &Feed) -> Result<Option<SyncRecord>> {
        Self::recorded_key(conn, &feed.sync_key())
    }

    fn recorded_key(conn: &Connection, key: &str) -> Result<Option<SyncRecord>> {
        let record = conn
            .query_row(
                "SELECT sync_key, token, applied_at FROM SyncState WHERE sync_key = ?1",
                [key],
                |row| {
                    Ok(SyncRecord {
                        key: row.get(0)?,
                        token: row.get::<_, Option<i64>>(1)?.map(FreshnessToken),
                        applied_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Fresh only when both tokens exist and the remote one is not newer
    pub fn freshness(
        recorded: Option<&SyncRecord>,
        remote: Option<FreshnessToken>,
        force: bool,
    ) -> Freshness {
        if force {
            return Freshness::Stale(StaleReason::Forced);
        }
        let Some(recorded) = recorded else {
            return Freshness::Stale(StaleReason::NeverApplied);
        };
        match (recorded.token, remote) {
            (Some(local), Some(remote)) if remote <= local => Freshness::Fresh,
            (_, None) => Freshness::Stale(StaleReason::Untracked),
            _ => Freshness::Stale(StaleReason::Newer),
        }
    }

    pub fn check(
        conn: &Connection,
        feed: &Feed,
        remote: Option<FreshnessToken>,
        force: bool,
    ) -> Result<Freshness> {
        let recorded = Self::recorded(conn, feed)?;
        Ok(Self::freshness(recorded.as_ref(), remote, force))
    }

    /// Record that `feed` was applied at `token`. Call on the regeneration's
    /// transaction before it commits.
    pub fn record(conn: &Connection, feed: &Feed, token: Option<FreshnessToken>) -> Result<()> {
        let applied_at = format_timestamp(Utc::now().timestamp()).unwrap_or_default();
        conn.execute(
            "INSERT INTO SyncState (sync_key, token, applied_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (sync_key) DO UPDATE SET
                 token = excluded.token,
                 applied_at = excluded.applied_at",
            rusqlite::params![feed.sync_key(), token.map(|t| t.0), applied_at],
        )?;
        Ok(())
    }

    pub fn list(conn: &Connection) -> Result<Vec<SyncRecord>> {
        let mut stmt =
            conn.prepare("SELECT sync_key, token, applied_at FROM SyncState ORDER BY sync_key")?;
        let records = stmt
            .query_map([], |row| {
                Ok(SyncRecord {
                    key: row.get(0)?,
                    token: row.get::<_, Option<i64>>(1)?.map(FreshnessToken),
                    applied_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
