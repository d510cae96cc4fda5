// src/core/version/mod.rs

//! The backend-version probe: a one-shot, process-lifetime cache of the
//! connected server's version, parsed from `SELECT version()`. Grounded on
//! `Pgversion()` in `examples/original_source/src/protocol/pool_pg_utils.c`;
//! the check-then-populate caching idiom is grounded on `ReplicaInfo` in
//! the host project's `src/core/state/replication.rs`.

use crate::core::backend::Slot;
use crate::core::errors::PoolError;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// A parsed PostgreSQL version. `major` follows the original's encoding:
/// `V10` and above multiply by 10 (`V12.3` -> `major = 120`), below that the
/// decimal point is folded in (`V9.6` -> `major = 96`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgVersion {
    pub major: i32,
    pub minor: i32,
    pub version_string: String,
}

/// Issues a scalar SQL query against an open `Slot` and returns the first
/// column of the first row. Kept as a trait so the probe can be driven
/// against a fake backend in tests without a real simple-query round trip.
#[async_trait]
pub trait BackendQuerier: Send + Sync {
    async fn query_scalar(&self, slot: &mut Slot, sql: &str) -> Result<String, PoolError>;
}

/// Parses the leading run of ASCII digits in `s`, tolerating anything that
/// follows (so `"12beta1"` yields `12`). An empty or non-numeric prefix
/// parses as `0`, matching `atoi`'s behavior on no valid digits.
fn parse_leading_int(s: &str) -> i32 {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Parses a `SELECT version()` result string into a `PgVersion`, following
/// SPEC_FULL.md §4.3 steps 1-7 exactly.
pub fn parse_version_string(raw: &str) -> Result<PgVersion, PoolError> {
    let space = raw
        .find(' ')
        .ok_or_else(|| PoolError::VersionProbe(format!("no space in version string: {raw:?}")))?;
    let rest = &raw[space + 1..];

    let dot = rest.find('.').unwrap_or(rest.len());
    let v1 = parse_leading_int(&rest[..dot]);

    let (major, after_major);
    if v1 >= 10 {
        major = v1 * 10;
        after_major = &rest[dot..];
    } else {
        let after_dot = if dot < rest.len() { &rest[dot + 1..] } else { "" };
        let dot2 = after_dot.find(['.', ' ']).unwrap_or(after_dot.len());
        let v2 = parse_leading_int(&after_dot[..dot2]);
        major = v1 * 10 + v2;
        after_major = &after_dot[dot2..];
    }

    let minor_region = after_major.strip_prefix('.').unwrap_or(after_major);
    let minor_end = minor_region.find(['.', ' ']).unwrap_or(minor_region.len());
    let minor = parse_leading_int(&minor_region[..minor_end]);

    if !(6..=100).contains(&v1) || !(0..=100).contains(&minor) {
        return Err(PoolError::VersionProbe(format!(
            "version out of range: v1={v1} minor={minor} (raw {raw:?})"
        )));
    }

    Ok(PgVersion {
        major,
        minor,
        version_string: raw.chars().take(255).collect(),
    })
}

/// A one-shot, process-lifetime cache of the backend's version. Mirrors the
/// original's static `pgversion` holder, but scoped to whichever task owns
/// it rather than truly process-global (SPEC_FULL.md §9, "Global caches").
pub struct VersionCache {
    cached: Mutex<Option<PgVersion>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached version, populating it via `querier` on first
    /// call. Any parse or I/O failure is fatal per SPEC_FULL.md §4.3 and
    /// §7: this method never recovers, it only reports.
    pub async fn get(
        &self,
        slot: &mut Slot,
        querier: &dyn BackendQuerier,
    ) -> Result<PgVersion, PoolError> {
        let mut guard = self.cached.lock().await;
        if let Some(v) = guard.as_ref() {
            debug!("version cache hit, no wire traffic issued");
            return Ok(v.clone());
        }

        let raw = querier.query_scalar(slot, "SELECT version()").await?;
        debug!(version_string = %raw, "version probe query returned");
        let parsed = parse_version_string(&raw)?;
        *guard = Some(parsed.clone());
        Ok(parsed)
    }
}

impl Default for VersionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs `err` at `error!` and terminates the process, matching the
/// original's `ereport(FATAL, ...)` which never returns to its caller.
/// Callers should only reach this after `VersionCache::get` (or any other
/// `PoolError::is_fatal()` error) fails — nothing in this core retries a
/// fatal version probe.
pub fn abort_on_fatal(err: &PoolError) -> ! {
    error!(error = %err, "fatal error, terminating process");
    std::process::exit(1)
}
