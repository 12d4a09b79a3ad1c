// Illustrative per-market handler (§4.3), mirroring the original source's
// `xueqiu_core_engine.py` single-market adapter: mandatory credential,
// optional proxy with a tighter/looser concurrency cap either way, a
// timeout clamped to [5s, 45s], and structured `api_error:<code>`
// classification on an application-level failure. Registered only here,
// never in `saturn_consumer::HandlerRegistry`'s own defaults.

use async_trait::async_trait;
use saturn_broker::Task;
use saturn_consumer::Handler;
use saturn_injector::InjectionContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

const NO_PROXY_CONCURRENCY: usize = 5;
const WITH_PROXY_CONCURRENCY: usize = 20;

fn endpoint_for(task: &Task) -> &'static str {
    match task.timeframe.as_deref() {
        Some(_) => "https://stock.xueqiu.com/v5/stock/chart/kline.json",
        None => "https://stock.xueqiu.com/v5/stock/quote.json",
    }
}

pub struct XueqiuHandler {
    sem_no_proxy: Arc<Semaphore>,
    sem_with_proxy: Arc<Semaphore>,
}

impl XueqiuHandler {
    pub fn new() -> Self {
        Self {
            sem_no_proxy: Arc::new(Semaphore::new(NO_PROXY_CONCURRENCY)),
            sem_with_proxy: Arc::new(Semaphore::new(WITH_PROXY_CONCURRENCY)),
        }
    }

    fn build_client(&self, context: &InjectionContext) -> reqwest::Result<reqwest::Client> {
        let timeout = context.timeout.clamp(Duration::from_secs(5), Duration::from_secs(45));
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(proxy) = &context.proxy {
            builder = builder.proxy(reqwest::Proxy::all(&proxy.endpoint)?);
        }
        builder.build()
    }
}

impl Default for XueqiuHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for XueqiuHandler {
    async fn handle(&self, task: &Task, context: &InjectionContext) -> (bool, Option<String>) {
        if context.missing_credential() {
            return (false, Some("missing_credential".to_string()));
        }

        let semaphore = if context.missing_proxy() {
            &self.sem_no_proxy
        } else {
            &self.sem_with_proxy
        };
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return (false, Some("semaphore_closed".to_string())),
        };

        let client = match self.build_client(context) {
            Ok(client) => client,
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "failed to build xueqiu http client");
                return (false, Some(format!("client_build_error:{}", e)));
            }
        };

        let mut request = client
            .get(endpoint_for(task))
            .query(&[("symbol", task.symbol.as_str())]);
        for (key, value) in &context.headers {
            request = request.header(key, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return (false, Some("read_timeout".to_string())),
            Err(e) => return (false, Some(format!("request_error:{}", e))),
        };

        let status = response.status();
        if !status.is_success() {
            return (false, Some(format!("http_error:{}", status.as_u16())));
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return (false, Some(format!("json_decode_error:{}", e))),
        };

        match body.get("error_code").and_then(|v| v.as_i64()) {
            Some(0) => (true, None),
            Some(code) => (false, Some(format!("api_error:{}", code))),
            None => (true, None),
        }
    }
}
