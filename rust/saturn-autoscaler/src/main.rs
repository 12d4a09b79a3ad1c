// Autoscaler process entrypoint (§2, §4.6): a separate binary from the
// worker, polling queue depth on its own loop and driving deployment
// replica counts. Shares nothing with the worker process but the broker.

use clap::Parser;
use saturn_autoscaler::{Autoscaler, AutoscalerConfig, InMemoryOrchestrator};
use saturn_broker::{BrokerGateway, InMemoryBroker};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "saturn-autoscaler")]
struct Cli {
    /// Path to the autoscaler's TOML config file.
    #[arg(long, env = "SATURN_AUTOSCALER_CONFIG", default_value = "autoscaler.toml")]
    config: String,
}

fn load_config(path: &str) -> AutoscalerConfig {
    match saturn_support::config::load_toml::<saturn_autoscaler::config::RawAutoscalerConfig>(path) {
        Ok(raw) => raw.into(),
        Err(e) => {
            tracing::warn!(error = %e, path, "could not load autoscaler config, falling back to defaults with no configured deployments");
            AutoscalerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    saturn_support::init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config);
    let poll_interval = config.poll_interval;

    // A real deployment wires a Kubernetes-backed `OrchestratorClient` and
    // a shared broker connection in place of these in-memory stand-ins
    // (§6.4); both are out of scope here.
    let broker: Arc<dyn BrokerGateway> = Arc::new(InMemoryBroker::new());
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let autoscaler = Autoscaler::new(broker, orchestrator, config);

    info!(poll_interval_secs = poll_interval.as_secs(), "autoscaler starting poll loop");

    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        let actions = autoscaler.tick().await;
        for (deployment, action) in actions {
            if !matches!(action, saturn_autoscaler::ScaleAction::NoAction) {
                info!(deployment, ?action, "scaling action taken");
            }
        }
    }
}
