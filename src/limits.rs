//! Hard caps protecting a tenant engine from unbounded growth.

use crate::model::Ms;

/// How long a hold stays active: 2 minutes, never extended.
pub const HOLD_TTL_MS: Ms = 120_000;

pub const MAX_STAFF_PER_TENANT: usize = 4096;
pub const MAX_TIMELINE_ENTRIES_PER_STAFF: usize = 65_536;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// 1970-01-01. Negative timestamps are always a caller bug.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single appointment or hold may not span more than 24 hours.
pub const MAX_SPAN_DURATION_MS: Ms = 86_400_000;
