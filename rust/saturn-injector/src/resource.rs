use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Proxy quality tier requested by a task-type policy (§4.2). Not the
/// same type as the resource's own continuous `quality_score` -- this is
/// the discrete bucket used to partition the proxy cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyResource {
    pub proxy_id: String,
    pub endpoint: String,
    pub credentials: Option<String>,
    pub market: String,
    pub quality_score: f64,
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub last_used: DateTime<Utc>,
}

impl ProxyResource {
    pub fn new(proxy_id: impl Into<String>, endpoint: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            proxy_id: proxy_id.into(),
            endpoint: endpoint.into(),
            credentials: None,
            market: market.into(),
            quality_score: 0.5,
            success_rate: 0.5,
            avg_response_time: 1.0,
            last_used: Utc::now(),
        }
    }

    /// Ranking score used to pick among proxies in the same (market,
    /// quality) bucket: monotone in both signals, so a proxy can never be
    /// starved behind a tied underperformer.
    pub fn rank_score(&self) -> f64 {
        self.success_rate - self.avg_response_time / 1000.0
    }

    /// EWMA update, decay applied on every outcome, the +0.1 success term
    /// applied only on success (§4.2, resolving the source's ambiguity:
    /// failures must strictly and monotonically reduce the score).
    pub fn record_outcome(&mut self, success: bool, response_time_secs: f64) {
        self.success_rate = 0.9 * self.success_rate + if success { 0.1 } else { 0.0 };
        if success {
            self.avg_response_time = 0.8 * self.avg_response_time + 0.2 * response_time_secs;
        }
        self.last_used = Utc::now();
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.last_used
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialResource {
    pub credential_id: String,
    pub data: HashMap<String, String>,
    pub market: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub domain: String,
    pub success_rate: f64,
    pub last_validated: DateTime<Utc>,
}

impl CredentialResource {
    pub fn new(credential_id: impl Into<String>, market: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            credential_id: credential_id.into(),
            data: HashMap::new(),
            market: market.into(),
            expires_at: None,
            domain: domain.into(),
            success_rate: 0.5,
            last_validated: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp < Utc::now()).unwrap_or(false)
    }

    pub fn is_fresh(&self, freshness_window: chrono::Duration) -> bool {
        Utc::now() - self.last_validated <= freshness_window
    }

    pub fn record_outcome(&mut self, success: bool) {
        self.success_rate = 0.9 * self.success_rate + if success { 0.1 } else { 0.0 };
        if success {
            self.last_validated = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_ewma_success_rate_is_monotone_under_repeated_success() {
        let mut proxy = ProxyResource::new("p1", "http://proxy:8080", "CN");
        proxy.success_rate = 0.5;
        let before = proxy.success_rate;
        proxy.record_outcome(true, 0.2);
        assert!(proxy.success_rate >= before);
    }

    #[test]
    fn proxy_ewma_decays_on_failure_even_without_additive_term() {
        let mut proxy = ProxyResource::new("p2", "http://proxy:8081", "US");
        proxy.success_rate = 0.9;
        proxy.record_outcome(false, 0.0);
        assert!(proxy.success_rate < 0.9);
    }

    #[test]
    fn proxy_avg_response_time_only_updates_on_success() {
        let mut proxy = ProxyResource::new("p3", "http://proxy:8082", "HK");
        proxy.avg_response_time = 1.0;
        proxy.record_outcome(false, 9.0);
        assert_eq!(proxy.avg_response_time, 1.0);
        proxy.record_outcome(true, 0.2);
        assert!(proxy.avg_response_time < 1.0);
    }

    #[test]
    fn credential_is_expired_when_past_expiry() {
        let mut cred = CredentialResource::new("c1", "CN", "xueqiu.com");
        cred.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(cred.is_expired());
    }
}
