// Broker-backed proxy and credential pool clients (§4.2): "on empty,
// request one from the credential pool via the Broker Gateway cache."
// In production the proxy/credential pools are external services; this
// worker binary reaches them the same way the rest of the core reaches
// everything else outside the process -- through the Broker Gateway's
// opaque cache, seeded by whatever out-of-band process refills it.

use async_trait::async_trait;
use saturn_broker::BrokerGateway;
use saturn_injector::{CredentialPoolClient, CredentialResource, InjectorError, InjectorResult, ProxyPoolClient, ProxyResource, QualityTier};
use saturn_support::{CircuitBreakerRegistry, RetryConfig, RetryExecutor, SupportError};
use std::sync::Arc;
use tracing::warn;

fn proxy_pool_key(market: &str, tier: QualityTier) -> String {
    format!("proxy_pool:{}:{}", market, tier.as_str())
}

fn credential_pool_key(market: &str) -> String {
    format!("credential_pool:{}", market)
}

/// Same failure threshold/reset window for both pool clients -- a pool
/// that starts timing out gets 5 tries before its breaker opens, and
/// gets a half-open probe again after 30s.
pub fn default_circuit_registry() -> Arc<CircuitBreakerRegistry> {
    Arc::new(CircuitBreakerRegistry::new(5, 30_000))
}

pub struct BrokerBackedProxyPool {
    broker: Arc<dyn BrokerGateway>,
    circuit: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
}

impl BrokerBackedProxyPool {
    /// `circuit` is owned by the caller so it can also be polled for
    /// health reporting (§2a health surface) alongside being used here.
    pub fn new(broker: Arc<dyn BrokerGateway>, circuit: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            broker,
            circuit,
            retry: RetryExecutor::new(RetryConfig::default()),
        }
    }
}

#[async_trait]
impl ProxyPoolClient for BrokerBackedProxyPool {
    async fn fetch_proxy(&self, market: &str, tier: QualityTier) -> InjectorResult<Option<ProxyResource>> {
        let key = proxy_pool_key(market, tier);
        let breaker = self.circuit.get_or_create(&key);
        breaker.allow().map_err(|e| InjectorError::ProxyPoolUnavailable(e.to_string()))?;

        let broker = self.broker.clone();
        let fetch_key = key.clone();
        let result = self
            .retry
            .execute(|| {
                let broker = broker.clone();
                let fetch_key = fetch_key.clone();
                async move { broker.cache_get(&fetch_key).await.map_err(|e| SupportError::Network(e.to_string())) }
            })
            .await;

        match result {
            Ok(value) => {
                breaker.record_success();
                match value {
                    Some(v) => serde_json::from_value(v).map(Some).map_err(|e| {
                        warn!(market, error = %e, "proxy pool cache entry did not deserialize");
                        InjectorError::ProxyPoolUnavailable(e.to_string())
                    }),
                    None => Ok(None),
                }
            }
            Err(e) => {
                breaker.record_failure();
                Err(InjectorError::ProxyPoolUnavailable(e.to_string()))
            }
        }
    }
}

pub struct BrokerBackedCredentialPool {
    broker: Arc<dyn BrokerGateway>,
    circuit: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
}

impl BrokerBackedCredentialPool {
    pub fn new(broker: Arc<dyn BrokerGateway>, circuit: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            broker,
            circuit,
            retry: RetryExecutor::new(RetryConfig::default()),
        }
    }
}

#[async_trait]
impl CredentialPoolClient for BrokerBackedCredentialPool {
    async fn fetch_credential(&self, market: &str) -> InjectorResult<Option<CredentialResource>> {
        let key = credential_pool_key(market);
        let breaker = self.circuit.get_or_create(&key);
        breaker.allow().map_err(|e| InjectorError::CredentialPoolUnavailable(e.to_string()))?;

        let broker = self.broker.clone();
        let fetch_key = key.clone();
        let result = self
            .retry
            .execute(|| {
                let broker = broker.clone();
                let fetch_key = fetch_key.clone();
                async move { broker.cache_get(&fetch_key).await.map_err(|e| SupportError::Network(e.to_string())) }
            })
            .await;

        match result {
            Ok(value) => {
                breaker.record_success();
                match value {
                    Some(v) => serde_json::from_value(v).map(Some).map_err(|e| {
                        warn!(market, error = %e, "credential pool cache entry did not deserialize");
                        InjectorError::CredentialPoolUnavailable(e.to_string())
                    }),
                    None => Ok(None),
                }
            }
            Err(e) => {
                breaker.record_failure();
                Err(InjectorError::CredentialPoolUnavailable(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saturn_broker::InMemoryBroker;
    use saturn_injector::CredentialResource as Cred;
    use saturn_injector::ProxyResource as Proxy;

    #[tokio::test]
    async fn fetch_proxy_returns_none_when_cache_empty() {
        let broker: Arc<dyn BrokerGateway> = Arc::new(InMemoryBroker::new());
        let pool = BrokerBackedProxyPool::new(broker, default_circuit_registry());
        let got = pool.fetch_proxy("CN", QualityTier::High).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn fetch_proxy_deserializes_seeded_cache_entry() {
        let broker: Arc<dyn BrokerGateway> = Arc::new(InMemoryBroker::new());
        let proxy = Proxy::new("p1", "http://10.0.0.1:8080", "CN");
        broker
            .cache_set(&proxy_pool_key("CN", QualityTier::High), serde_json::to_value(&proxy).unwrap(), 3600)
            .await
            .unwrap();
        let pool = BrokerBackedProxyPool::new(broker, default_circuit_registry());
        let got = pool.fetch_proxy("CN", QualityTier::High).await.unwrap().unwrap();
        assert_eq!(got.proxy_id, "p1");
    }

    #[tokio::test]
    async fn fetch_credential_deserializes_seeded_cache_entry() {
        let broker: Arc<dyn BrokerGateway> = Arc::new(InMemoryBroker::new());
        let cred = Cred::new("c1", "CN", "xueqiu.com");
        broker
            .cache_set(&credential_pool_key("CN"), serde_json::to_value(&cred).unwrap(), 1800)
            .await
            .unwrap();
        let pool = BrokerBackedCredentialPool::new(broker, default_circuit_registry());
        let got = pool.fetch_credential("CN").await.unwrap().unwrap();
        assert_eq!(got.credential_id, "c1");
    }

    #[tokio::test]
    async fn circuit_opens_after_repeated_broker_errors_and_is_surfaced_by_any_open() {
        struct AlwaysFailsBroker;
        #[async_trait]
        impl BrokerGateway for AlwaysFailsBroker {
            async fn enqueue(&self, _task: saturn_broker::Task, _delay_seconds: u64) -> saturn_broker::BrokerResult<()> {
                unimplemented!()
            }
            async fn dequeue(
                &self,
                _priority: saturn_broker::Priority,
                _block_timeout_secs: u64,
            ) -> saturn_broker::BrokerResult<Option<saturn_broker::Task>> {
                unimplemented!()
            }
            async fn update_task_status(
                &self,
                _task_id: &str,
                _status: saturn_broker::TaskStatus,
                _details: std::collections::HashMap<String, serde_json::Value>,
            ) -> saturn_broker::BrokerResult<()> {
                unimplemented!()
            }
            async fn cache_set(&self, _key: &str, _value: serde_json::Value, _ttl_seconds: u64) -> saturn_broker::BrokerResult<()> {
                unimplemented!()
            }
            async fn cache_get(&self, _key: &str) -> saturn_broker::BrokerResult<Option<serde_json::Value>> {
                Err(saturn_broker::BrokerError::Unavailable("down for maintenance".into()))
            }
            async fn cache_delete(&self, _key: &str) -> saturn_broker::BrokerResult<()> {
                unimplemented!()
            }
            async fn queue_depth(&self, _queue_name: &str) -> saturn_broker::BrokerResult<u64> {
                unimplemented!()
            }
        }

        let broker: Arc<dyn BrokerGateway> = Arc::new(AlwaysFailsBroker);
        // threshold 1 so the single failed fetch (after its internal
        // retries are exhausted) opens the breaker immediately.
        let circuit = Arc::new(CircuitBreakerRegistry::new(1, 30_000));
        let pool = BrokerBackedProxyPool::new(broker, circuit.clone());
        assert!(!circuit.any_open());
        let got = pool.fetch_proxy("CN", QualityTier::High).await;
        assert!(got.is_err());
        assert!(circuit.any_open());
    }
}
