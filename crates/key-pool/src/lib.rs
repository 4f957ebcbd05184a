//! API key pool with per-key daily quota and request spacing
//!
//! Tracks usage for every key ever seen and answers two questions for the
//! batch runner: which key should serve the next request, and how long that
//! key must rest before it may be used again.
//!
//! Key lifecycle:
//! 1. Key appears in the key source (or is first selected) → zero-usage record
//! 2. Successful request → `requests_today` += 1, `last_request_at` = now
//! 3. Upstream reports quota exhaustion → `exhausted` (sticky until reset)
//! 4. Terminal non-quota failure → `error_count` += 1 (lowers priority)
//! 5. Wall clock passes `reset_time` (next local midnight) → counters zeroed
//!    on the next pool access; no background timer is involved
//!
//! Usage records are persisted to a JSON file on every mutation and are never
//! deleted, even for keys missing from the current key source.

pub mod clock;
pub mod error;
pub mod limits;
pub mod pool;
pub mod store;
pub mod usage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use limits::{FLASH_TTS, LimitsTable, ModelLimits, PRO_TTS};
pub use pool::{KeyPool, KeyStats, PoolStats, SelectedKey, parse_key_source};
pub use store::UsageStore;
pub use usage::{KeyUsage, maybe_reset, next_midnight};
