use crate::resource::{CredentialResource, ProxyResource};
use std::collections::HashMap;
use std::time::Duration;

/// Per-task binding of a Task (identified here by its stable id/type/
/// market/symbol, not a full `saturn_broker::Task` to avoid a cyclic
/// crate dependency) plus the resources and headers the handler needs.
/// Created before handler invocation, passed by reference, discarded on
/// return.
#[derive(Debug, Clone)]
pub struct InjectionContext {
    pub task_id: String,
    pub proxy: Option<ProxyResource>,
    pub credential: Option<CredentialResource>,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
}

impl InjectionContext {
    pub fn missing_credential(&self) -> bool {
        self.credential.is_none()
    }

    pub fn missing_proxy(&self) -> bool {
        self.proxy.is_none()
    }
}
