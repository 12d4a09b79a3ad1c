// Crawler worker process entrypoint (§2, §4.4, §4.5): wires the Broker
// Gateway, Resource Injector, Handler Registry and Task Consumer into a
// single running worker, and drives the Drain Controller on SIGTERM or
// SIGINT. No module-level mutable state -- everything lives on this
// explicit `WorkerContext` and is passed down by reference (§9).

use clap::Parser;
use saturn_broker::{BrokerGateway, InMemoryBroker};
use saturn_consumer::{DrainConfig, DrainController, HandlerRegistry, TaskConsumer};
use saturn_crawler::handlers::XueqiuHandler;
use saturn_crawler::{default_circuit_registry, BrokerBackedCredentialPool, BrokerBackedProxyPool, CrawlerSettings};
use saturn_injector::ResourceInjector;
use saturn_support::health::{HealthChecker, HealthStatus};
use saturn_support::CircuitBreakerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "saturn-worker")]
struct Cli {
    /// Path to the worker's TOML config file.
    #[arg(long, env = "SATURN_CONFIG_PATH", default_value = "worker.toml")]
    config: String,
}

/// Owns every subsystem handle for one worker process. Constructed once
/// in `main`, never duplicated into a global -- the re-architecture of
/// the source's process-global consumer/injector handles (§9).
struct WorkerContext {
    consumer: Arc<TaskConsumer>,
    drain: DrainController,
    health: Arc<HealthChecker>,
    proxy_circuit: Arc<CircuitBreakerRegistry>,
    credential_circuit: Arc<CircuitBreakerRegistry>,
}

impl WorkerContext {
    fn build(settings: CrawlerSettings) -> Self {
        let broker: Arc<dyn BrokerGateway> = Arc::new(InMemoryBroker::new());
        let proxy_circuit = default_circuit_registry();
        let credential_circuit = default_circuit_registry();

        let injector = Arc::new(ResourceInjector::new(
            Box::new(BrokerBackedProxyPool::new(broker.clone(), proxy_circuit.clone())),
            Box::new(BrokerBackedCredentialPool::new(broker.clone(), credential_circuit.clone())),
            settings.injector,
        ));

        // The demo registry carries the illustrative xueqiu adapter as
        // its default handler (§4.3); a real deployment registers one
        // handler per supported task type or market here instead.
        let mut registry = HandlerRegistry::new();
        registry.set_default(Arc::new(XueqiuHandler::new()));

        let consumer = Arc::new(TaskConsumer::new(settings.worker, broker, injector, Arc::new(registry)));
        let drain = DrainController::new(consumer.clone(), DrainConfig::default());

        let health = Arc::new(HealthChecker::new());
        health.register_component("broker");
        health.register_component("injector");

        Self {
            consumer,
            drain,
            health,
            proxy_circuit,
            credential_circuit,
        }
    }

    /// Rolls the proxy/credential pool breakers up into the "injector"
    /// health component every 30s, for as long as `handle` isn't aborted.
    fn spawn_injector_health_watch(&self) -> tokio::task::JoinHandle<()> {
        let health = self.health.clone();
        let proxy_circuit = self.proxy_circuit.clone();
        let credential_circuit = self.credential_circuit.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                if proxy_circuit.any_open() || credential_circuit.any_open() {
                    health.update_component("injector", HealthStatus::Degraded, "proxy or credential pool circuit open".into());
                } else {
                    health.update_component("injector", HealthStatus::Healthy, "proxy and credential pool circuits closed".into());
                }
            }
        })
    }

    async fn run(&self) -> i32 {
        match self.consumer.initialize().await {
            Ok(()) => self.health.update_component("broker", HealthStatus::Healthy, "registration published".into()),
            Err(e) => {
                error!(error = %e, "failed to publish initial worker registration, continuing anyway");
                self.health.update_component("broker", HealthStatus::Degraded, e.to_string());
            }
        }

        let mut handles = self.consumer.start();
        handles.push(self.spawn_injector_health_watch());
        info!(status = ?self.health.overall_status(), "worker started, entering steady state");

        wait_for_termination_signal().await;
        info!("termination signal received, starting graceful drain");

        let final_state = self.drain.run().await;
        for handle in handles {
            handle.abort();
        }

        if final_state == saturn_consumer::DrainState::Done {
            0
        } else {
            1
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}

#[tokio::main]
async fn main() {
    saturn_support::init_tracing();

    let cli = Cli::parse();
    let settings = CrawlerSettings::load(&cli.config);

    let context = WorkerContext::build(settings);
    let exit_code = context.run().await;
    std::process::exit(exit_code);
}
