// saturn-injector: binds each task to a freshest-viable credential and a
// quality-scored proxy, composes request headers, and tracks resource
// quality from observed outcomes via EWMA (§4.2).

#![allow(clippy::expect_used)]

use crate::context::InjectionContext;
use crate::error::InjectorResult;
use crate::policy::TaskTypePolicy;
use crate::resource::{CredentialResource, ProxyResource, QualityTier};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// External proxy pool, reached through the Broker Gateway's opaque cache
/// in production; abstracted here so the injector's selection logic is
/// testable without a live pool.
#[async_trait]
pub trait ProxyPoolClient: Send + Sync {
    async fn fetch_proxy(&self, market: &str, tier: QualityTier) -> InjectorResult<Option<ProxyResource>>;
}

#[async_trait]
pub trait CredentialPoolClient: Send + Sync {
    async fn fetch_credential(&self, market: &str) -> InjectorResult<Option<CredentialResource>>;
}

#[derive(Debug, Clone)]
pub struct InjectorConfig {
    pub credential_freshness: ChronoDuration,
    pub proxy_idle_window: ChronoDuration,
    pub user_agents: Vec<String>,
    pub market_referers: HashMap<String, String>,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            credential_freshness: ChronoDuration::minutes(30),
            proxy_idle_window: ChronoDuration::hours(1),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string(),
            ],
            market_referers: HashMap::new(),
        }
    }
}

struct Caches {
    proxies: HashMap<(String, QualityTierKey), Vec<ProxyResource>>,
    credentials: HashMap<String, Vec<CredentialResource>>,
    rotation_counter: u64,
}

type QualityTierKey = u8;

fn tier_key(tier: QualityTier) -> QualityTierKey {
    match tier {
        QualityTier::High => 0,
        QualityTier::Medium => 1,
        QualityTier::Low => 2,
    }
}

pub struct ResourceInjector {
    proxy_pool: Box<dyn ProxyPoolClient>,
    credential_pool: Box<dyn CredentialPoolClient>,
    config: InjectorConfig,
    caches: Mutex<Caches>,
}

impl ResourceInjector {
    pub fn new(
        proxy_pool: Box<dyn ProxyPoolClient>,
        credential_pool: Box<dyn CredentialPoolClient>,
        config: InjectorConfig,
    ) -> Self {
        Self {
            proxy_pool,
            credential_pool,
            config,
            caches: Mutex::new(Caches {
                proxies: HashMap::new(),
                credentials: HashMap::new(),
                rotation_counter: 0,
            }),
        }
    }

    pub async fn prepare(
        &self,
        task_id: &str,
        task_type: &str,
        market: &str,
    ) -> InjectorResult<InjectionContext> {
        let policy = TaskTypePolicy::for_task_type(task_type);
        let proxy = self.select_or_fetch_proxy(market, policy.quality_tier).await?;
        let credential = self
            .select_or_fetch_credential(market, policy.requires_fresh_credential)
            .await?;
        let headers = self.compose_headers(task_id, task_type, market, &credential);

        Ok(InjectionContext {
            task_id: task_id.to_string(),
            proxy,
            credential,
            headers,
            timeout: policy.timeout,
        })
    }

    async fn select_or_fetch_proxy(
        &self,
        market: &str,
        tier: QualityTier,
    ) -> InjectorResult<Option<ProxyResource>> {
        {
            let caches = self.caches.lock().expect("injector cache mutex poisoned");
            if let Some(bucket) = caches.proxies.get(&(market.to_string(), tier_key(tier))) {
                if let Some(best) = bucket.iter().max_by(|a, b| {
                    a.rank_score()
                        .partial_cmp(&b.rank_score())
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.last_used.cmp(&b.last_used))
                }) {
                    return Ok(Some(best.clone()));
                }
            }
        }

        let fetched = self.proxy_pool.fetch_proxy(market, tier).await?;
        if let Some(proxy) = &fetched {
            let mut caches = self.caches.lock().expect("injector cache mutex poisoned");
            caches
                .proxies
                .entry((market.to_string(), tier_key(tier)))
                .or_insert_with(Vec::new)
                .push(proxy.clone());
        }
        Ok(fetched)
    }

    async fn select_or_fetch_credential(
        &self,
        market: &str,
        requires_fresh: bool,
    ) -> InjectorResult<Option<CredentialResource>> {
        {
            let mut caches = self.caches.lock().expect("injector cache mutex poisoned");
            if let Some(bucket) = caches.credentials.get_mut(market) {
                bucket.retain(|c| !c.is_expired());
                let valid = bucket
                    .iter()
                    .filter(|c| !requires_fresh || c.is_fresh(self.config.credential_freshness))
                    .max_by(|a, b| a.last_validated.cmp(&b.last_validated));
                if let Some(best) = valid {
                    return Ok(Some(best.clone()));
                }
            }
        }

        let fetched = self.credential_pool.fetch_credential(market).await?;
        if let Some(credential) = &fetched {
            let mut caches = self.caches.lock().expect("injector cache mutex poisoned");
            caches
                .credentials
                .entry(market.to_string())
                .or_insert_with(Vec::new)
                .push(credential.clone());
        }
        Ok(fetched)
    }

    fn compose_headers(
        &self,
        task_id: &str,
        task_type: &str,
        market: &str,
        credential: &Option<CredentialResource>,
    ) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(referer) = self.config.market_referers.get(market) {
            headers.insert("Referer".to_string(), referer.clone());
        }
        let ua = self.next_user_agent();
        headers.insert("User-Agent".to_string(), ua);
        headers.insert("X-Task-Id".to_string(), task_id.to_string());
        headers.insert("X-Task-Type".to_string(), task_type.to_string());
        headers.insert("X-Market".to_string(), market.to_string());

        if let Some(credential) = credential {
            if !credential.data.is_empty() {
                let cookie = credential
                    .data
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                headers
                    .entry("Cookie".to_string())
                    .and_modify(|existing| {
                        existing.push_str("; ");
                        existing.push_str(&cookie);
                    })
                    .or_insert(cookie);
            }
        }
        headers
    }

    fn next_user_agent(&self) -> String {
        if self.config.user_agents.is_empty() {
            return String::new();
        }
        let mut caches = self.caches.lock().expect("injector cache mutex poisoned");
        let idx = (caches.rotation_counter as usize) % self.config.user_agents.len();
        caches.rotation_counter += 1;
        self.config.user_agents[idx].clone()
    }

    /// Updates EWMAs for the proxy/credential used by `context` (§4.2).
    pub fn report_outcome(&self, context: &InjectionContext, success: bool, response_time_secs: f64) {
        let mut caches = self.caches.lock().expect("injector cache mutex poisoned");

        if let Some(proxy) = &context.proxy {
            for bucket in caches.proxies.values_mut() {
                if let Some(entry) = bucket.iter_mut().find(|p| p.proxy_id == proxy.proxy_id) {
                    entry.record_outcome(success, response_time_secs);
                }
            }
        }

        if let Some(credential) = &context.credential {
            if let Some(bucket) = caches.credentials.get_mut(&credential.market) {
                if let Some(entry) = bucket
                    .iter_mut()
                    .find(|c| c.credential_id == credential.credential_id)
                {
                    entry.record_outcome(success);
                }
            }
        }
    }

    /// Periodic sweep (§4.2): drop expired credentials and proxies idle
    /// past the configured window.
    pub fn cleanup_expired(&self) {
        let mut caches = self.caches.lock().expect("injector cache mutex poisoned");
        for bucket in caches.credentials.values_mut() {
            bucket.retain(|c| !c.is_expired());
        }
        let idle_window = self.config.proxy_idle_window;
        for bucket in caches.proxies.values_mut() {
            bucket.retain(|p| p.idle_for() <= idle_window);
        }
    }
}

/// Default timeout for periodic cleanup callers that want a tokio
/// interval rather than rolling their own.
pub fn default_cleanup_interval() -> Duration {
    Duration::from_secs(300)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ProxyResource;

    struct EmptyProxyPool;
    #[async_trait]
    impl ProxyPoolClient for EmptyProxyPool {
        async fn fetch_proxy(&self, _market: &str, _tier: QualityTier) -> InjectorResult<Option<ProxyResource>> {
            Ok(None)
        }
    }

    struct EmptyCredentialPool;
    #[async_trait]
    impl CredentialPoolClient for EmptyCredentialPool {
        async fn fetch_credential(&self, _market: &str) -> InjectorResult<Option<CredentialResource>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn prepare_returns_context_with_null_resources_when_pools_empty() {
        let injector = ResourceInjector::new(
            Box::new(EmptyProxyPool),
            Box::new(EmptyCredentialPool),
            InjectorConfig::default(),
        );
        let ctx = injector.prepare("T1", "1m_realtime", "CN").await.unwrap();
        assert!(ctx.missing_proxy());
        assert!(ctx.missing_credential());
        assert_eq!(ctx.headers.get("X-Task-Id"), Some(&"T1".to_string()));
    }

    #[tokio::test]
    async fn selection_picks_highest_rank_score_in_bucket() {
        let injector = ResourceInjector::new(
            Box::new(EmptyProxyPool),
            Box::new(EmptyCredentialPool),
            InjectorConfig::default(),
        );
        {
            let mut caches = injector.caches.lock().unwrap();
            let mut weak = ProxyResource::new("weak", "http://a", "CN");
            weak.success_rate = 0.3;
            weak.avg_response_time = 0.5;
            let mut strong = ProxyResource::new("strong", "http://b", "CN");
            strong.success_rate = 0.95;
            strong.avg_response_time = 0.1;
            caches
                .proxies
                .entry(("CN".to_string(), tier_key(QualityTier::High)))
                .or_insert_with(Vec::new)
                .extend([weak, strong]);
        }
        let selected = injector
            .select_or_fetch_proxy("CN", QualityTier::High)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.proxy_id, "strong");
    }

    #[tokio::test]
    async fn report_outcome_updates_cached_proxy_in_place() {
        let injector = ResourceInjector::new(
            Box::new(EmptyProxyPool),
            Box::new(EmptyCredentialPool),
            InjectorConfig::default(),
        );
        let proxy = ProxyResource::new("p1", "http://a", "CN");
        {
            let mut caches = injector.caches.lock().unwrap();
            caches
                .proxies
                .entry(("CN".to_string(), tier_key(QualityTier::High)))
                .or_insert_with(Vec::new)
                .push(proxy.clone());
        }
        let ctx = InjectionContext {
            task_id: "T1".into(),
            proxy: Some(proxy),
            credential: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(5),
        };
        injector.report_outcome(&ctx, true, 0.2);
        let updated = injector
            .select_or_fetch_proxy("CN", QualityTier::High)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.success_rate > 0.5);
    }
}
