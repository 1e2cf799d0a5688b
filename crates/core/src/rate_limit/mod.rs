//! Fixed-window admission control: per-agent limits and per-service global ceilings.
//!
//! Counter reads and increments are not transactional, so concurrent requests at a window edge
//! can overshoot a limit slightly. Store failures fail open.

pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::agent::Agent;
use crate::errors::StoreError;

pub use store::{CounterStore, InMemoryCounterStore};

pub const MINUTE_SECS: u64 = 60;
pub const DAY_SECS: u64 = 86_400;
/// Counters live for two windows so a late reader still sees the previous bucket.
pub const MINUTE_TTL_SECS: u64 = 2 * MINUTE_SECS;
pub const DAY_TTL_SECS: u64 = 2 * DAY_SECS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLimit {
    pub per_minute: u32,
    pub per_day: u32,
}

impl ServiceLimit {
    pub const fn new(per_minute: u32, per_day: u32) -> Self {
        Self { per_minute, per_day }
    }
}

/// Ceilings sized to each provider's own limits.
pub fn default_service_limits() -> BTreeMap<String, ServiceLimit> {
    [
        ("github", ServiceLimit::new(80, 20_000)),
        ("cloudflare", ServiceLimit::new(200, 50_000)),
        ("stripe", ServiceLimit::new(60, 20_000)),
        ("tavily", ServiceLimit::new(60, 5_000)),
        ("exa", ServiceLimit::new(60, 5_000)),
        ("resend", ServiceLimit::new(10, 2_000)),
    ]
    .into_iter()
    .map(|(service, limit)| (service.to_string(), limit))
    .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// Unix seconds at which the rejecting window rolls over.
    pub reset_at: u64,
}

struct Window {
    minute_key: String,
    day_key: String,
    per_minute: u32,
    per_day: u32,
    minute_bucket: u64,
    day_bucket: u64,
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    service_limits: BTreeMap<String, ServiceLimit>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, service_limits: BTreeMap<String, ServiceLimit>) -> Self {
        Self { store, service_limits }
    }

    pub fn service_limit(&self, service: &str) -> Option<ServiceLimit> {
        self.service_limits.get(service).copied()
    }

    pub async fn check_agent(&self, agent: &Agent, service: &str) -> RateLimitResult {
        self.check_agent_at(agent, service, unix_now()).await
    }

    /// Per-agent check. The minute window is per service; the daily window spans all services.
    pub async fn check_agent_at(&self, agent: &Agent, service: &str, now: u64) -> RateLimitResult {
        let minute_bucket = now / MINUTE_SECS;
        let day_bucket = now / DAY_SECS;
        let window = Window {
            minute_key: format!("rl:{}:{service}:min:{minute_bucket}", agent.id),
            day_key: format!("rl:{}:daily:{day_bucket}", agent.id),
            per_minute: agent.rate_limit_rpm,
            per_day: agent.rate_limit_daily,
            minute_bucket,
            day_bucket,
        };
        self.check_window(&window, now).await
    }

    pub async fn check_service(&self, service: &str) -> RateLimitResult {
        self.check_service_at(service, unix_now()).await
    }

    /// Global ceiling shared by every caller. Services without a configured limit always pass.
    pub async fn check_service_at(&self, service: &str, now: u64) -> RateLimitResult {
        let minute_bucket = now / MINUTE_SECS;
        let day_bucket = now / DAY_SECS;
        let Some(limit) = self.service_limit(service) else {
            return RateLimitResult {
                allowed: true,
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_at: (minute_bucket + 1) * MINUTE_SECS,
            };
        };

        let window = Window {
            minute_key: format!("rl:svc:{service}:min:{minute_bucket}"),
            day_key: format!("rl:svc:{service}:day:{day_bucket}"),
            per_minute: limit.per_minute,
            per_day: limit.per_day,
            minute_bucket,
            day_bucket,
        };
        self.check_window(&window, now).await
    }

    async fn check_window(&self, window: &Window, now: u64) -> RateLimitResult {
        let (minute_count, day_count) = tokio::join!(
            self.store.current(&window.minute_key, now),
            self.store.current(&window.day_key, now)
        );
        let minute_count = fail_open(&window.minute_key, minute_count);
        let day_count = fail_open(&window.day_key, day_count);

        if day_count >= u64::from(window.per_day) {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                limit: window.per_day,
                reset_at: (window.day_bucket + 1) * DAY_SECS,
            };
        }
        if minute_count >= u64::from(window.per_minute) {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                limit: window.per_minute,
                reset_at: (window.minute_bucket + 1) * MINUTE_SECS,
            };
        }

        let (minute_write, day_write) = tokio::join!(
            self.store.increment(&window.minute_key, MINUTE_TTL_SECS, now),
            self.store.increment(&window.day_key, DAY_TTL_SECS, now)
        );
        fail_open(&window.minute_key, minute_write);
        fail_open(&window.day_key, day_write);

        let minute_left = u64::from(window.per_minute) - minute_count - 1;
        let day_left = u64::from(window.per_day) - day_count - 1;
        RateLimitResult {
            allowed: true,
            remaining: u32::try_from(minute_left.min(day_left)).unwrap_or(u32::MAX),
            limit: window.per_minute,
            reset_at: (window.minute_bucket + 1) * MINUTE_SECS,
        }
    }
}

fn fail_open(key: &str, result: Result<u64, StoreError>) -> u64 {
    match result {
        Ok(count) => count,
        Err(error) => {
            warn!(
                event_name = "gateway.rate_limit.store_error",
                counter_key = %key,
                error = %error,
                "counter store failed; admitting request"
            );
            0
        }
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{
        default_service_limits, CounterStore, InMemoryCounterStore, RateLimiter, ServiceLimit,
    };
    use crate::auth::tests::agent_fixture;
    use crate::errors::StoreError;

    const NOW: u64 = 1_700_000_030;

    fn limiter(limits: &[(&str, u32, u32)]) -> RateLimiter {
        let limits: BTreeMap<String, ServiceLimit> = limits
            .iter()
            .map(|(service, per_minute, per_day)| {
                (service.to_string(), ServiceLimit::new(*per_minute, *per_day))
            })
            .collect();
        RateLimiter::new(Arc::new(InMemoryCounterStore::default()), limits)
    }

    #[tokio::test]
    async fn agent_is_admitted_up_to_its_minute_limit() {
        let limiter = limiter(&[]);
        let mut agent = agent_fixture("a1", "s", &["*"]);
        agent.rate_limit_rpm = 3;

        for expected_remaining in [2, 1, 0] {
            let result = limiter.check_agent_at(&agent, "github", NOW).await;
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
            assert_eq!(result.limit, 3);
        }

        let rejected = limiter.check_agent_at(&agent, "github", NOW).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.limit, 3);
        assert_eq!(rejected.reset_at, (NOW / 60 + 1) * 60);

        let other_service = limiter.check_agent_at(&agent, "tavily", NOW).await;
        assert!(other_service.allowed, "minute window is per service");

        let next_minute = limiter.check_agent_at(&agent, "github", NOW + 60).await;
        assert!(next_minute.allowed);
    }

    #[tokio::test]
    async fn daily_limit_is_checked_first_and_spans_services() {
        let limiter = limiter(&[]);
        let mut agent = agent_fixture("a1", "s", &["*"]);
        agent.rate_limit_rpm = 10;
        agent.rate_limit_daily = 2;

        assert!(limiter.check_agent_at(&agent, "github", NOW).await.allowed);
        assert!(limiter.check_agent_at(&agent, "exa", NOW).await.allowed);

        let rejected = limiter.check_agent_at(&agent, "stripe", NOW).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.limit, 2);
        assert_eq!(rejected.reset_at, (NOW / 86_400 + 1) * 86_400);
    }

    #[tokio::test]
    async fn service_ceiling_is_shared_across_agents() {
        let limiter = limiter(&[("resend", 2, 100)]);

        assert!(limiter.check_service_at("resend", NOW).await.allowed);
        assert!(limiter.check_service_at("resend", NOW).await.allowed);
        let third = limiter.check_service_at("resend", NOW).await;
        assert!(!third.allowed);
        assert_eq!(third.limit, 2);

        assert!(limiter.check_service_at("unlisted", NOW).await.allowed);
    }

    #[test]
    fn default_table_covers_every_builtin_service() {
        let limits = default_service_limits();
        for service in crate::services::SERVICE_NAMES {
            assert!(limits.contains_key(*service), "{service} has no ceiling");
        }
        assert_eq!(limits.get("resend"), Some(&ServiceLimit::new(10, 2_000)));
    }

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn current(&self, _key: &str, _now: u64) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn increment(
            &self,
            _key: &str,
            _ttl_secs: u64,
            _now: u64,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failures_fail_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore), default_service_limits());
        let agent = agent_fixture("a1", "s", &["*"]);

        assert!(limiter.check_agent_at(&agent, "github", NOW).await.allowed);
        assert!(limiter.check_service_at("github", NOW).await.allowed);
    }
}
