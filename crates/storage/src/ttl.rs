//! TTL liveness and sweeping (spec.md §4.5, C5).
//!
//! `expireAt` (absolute epoch-millis) always wins over `ttl` (relative
//! to `createdAt`) when both are present. Neither field is required;
//! absence or an unparseable value is treated as "no expiry from that
//! field", not as an error — a document is only dead if some field
//! affirmatively says so.

use serde_json::Value;
use wise_json_core::document::{CREATED_AT_FIELD, EXPIRE_AT_FIELD, TTL_FIELD};

/// `true` if `doc` is still live at `now` (epoch-millis).
///
/// - `expireAt` present and an integer `<= now` → expired.
/// - `expireAt` present but `null` or non-numeric → ignored, alive by
///   this field.
/// - otherwise, `ttl` present, positive, and `createdAt` parseable as
///   epoch-millis, with `createdAt + ttl <= now` → expired.
/// - `ttl == 0` → expired regardless of `createdAt`.
/// - `ttl` absent, or `createdAt` unparseable → no expiry from this field.
pub fn is_alive(doc: &Value, now: i64) -> bool {
    if let Some(field) = doc.get(EXPIRE_AT_FIELD) {
        match field {
            Value::Null => {}
            Value::Number(n) => {
                if let Some(expire_at) = n.as_i64() {
                    return expire_at > now;
                }
            }
            _ => {}
        }
    }

    if let Some(ttl_value) = doc.get(TTL_FIELD) {
        if let Some(ttl) = ttl_value.as_i64() {
            if ttl <= 0 {
                return false;
            }
            if let Some(created_at) = created_at_millis(doc) {
                return created_at + ttl > now;
            }
        }
    }

    true
}

/// Which field (if any) decided a document's liveness verdict, for
/// observability (e.g. surfaced by `Collection::ttl_state`). Mirrors
/// [`is_alive`]'s precedence: `expireAt` wins over `ttl` whenever it's
/// present and well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// Neither field applies; the document has no expiry.
    NoExpiry,
    /// `expireAt` decided the verdict.
    ExpireAt {
        /// Whether the document is expired by this field.
        expired: bool,
    },
    /// `ttl` (relative to `createdAt`) decided the verdict.
    Ttl {
        /// Whether the document is expired by this field.
        expired: bool,
    },
}

/// Like [`is_alive`] but reports which field produced the verdict.
pub fn ttl_state(doc: &Value, now: i64) -> TtlState {
    if let Some(field) = doc.get(EXPIRE_AT_FIELD) {
        match field {
            Value::Null => {}
            Value::Number(n) => {
                if let Some(expire_at) = n.as_i64() {
                    return TtlState::ExpireAt { expired: expire_at <= now };
                }
            }
            _ => {}
        }
    }

    if let Some(ttl_value) = doc.get(TTL_FIELD) {
        if let Some(ttl) = ttl_value.as_i64() {
            if ttl <= 0 {
                return TtlState::Ttl { expired: true };
            }
            if let Some(created_at) = created_at_millis(doc) {
                return TtlState::Ttl { expired: created_at + ttl <= now };
            }
        }
    }

    TtlState::NoExpiry
}

fn created_at_millis(doc: &Value) -> Option<i64> {
    let raw = doc.get(CREATED_AT_FIELD)?;
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

/// Split `docs` into `(alive, expired_ids)` without mutating caller
/// state; callers remove `expired_ids` from the document map and every
/// index. No WAL entry is written for evictions (spec.md §4.5) — they
/// are re-derived by the same liveness check on the next recovery.
pub fn find_expired<'a>(docs: impl IntoIterator<Item = (&'a String, &'a Value)>, now: i64) -> Vec<String> {
    docs.into_iter()
        .filter(|(_, doc)| !is_alive(doc, now))
        .map(|(id, _)| id.clone())
        .collect()
}
