// Orchestrator interface (§6.4): a real Kubernetes-backed implementation
// is out of scope. An in-memory fake implementation backs the
// autoscaler's own tests, tracking replica counts per (namespace,
// deployment) and nothing else.

#![allow(clippy::expect_used)]

use crate::error::AutoscalerResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn read_deployment(&self, name: &str, namespace: &str) -> AutoscalerResult<Option<u32>>;
    async fn patch_deployment_replicas(&self, name: &str, namespace: &str, replicas: u32) -> AutoscalerResult<()>;
}

pub struct InMemoryOrchestrator {
    replicas: Mutex<HashMap<(String, String), u32>>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self {
            replicas: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed(&self, name: &str, namespace: &str, replicas: u32) {
        self.replicas
            .lock()
            .expect("orchestrator mutex poisoned")
            .insert((name.to_string(), namespace.to_string()), replicas);
    }
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrchestratorClient for InMemoryOrchestrator {
    async fn read_deployment(&self, name: &str, namespace: &str) -> AutoscalerResult<Option<u32>> {
        Ok(self
            .replicas
            .lock()
            .expect("orchestrator mutex poisoned")
            .get(&(name.to_string(), namespace.to_string()))
            .copied())
    }

    async fn patch_deployment_replicas(&self, name: &str, namespace: &str, replicas: u32) -> AutoscalerResult<()> {
        self.replicas
            .lock()
            .expect("orchestrator mutex poisoned")
            .insert((name.to_string(), namespace.to_string()), replicas);
        Ok(())
    }
}
