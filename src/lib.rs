// saturn-crawler: the worker binary's own crate -- wires the
// saturn-support/saturn-broker/saturn-injector/saturn-consumer library
// crates into a runnable process, plus a small set of illustrative
// per-market handlers (§4.3) that are not part of the reusable core.

pub mod config;
pub mod handlers;
pub mod pools;

pub use config::CrawlerSettings;
pub use pools::{default_circuit_registry, BrokerBackedCredentialPool, BrokerBackedProxyPool};
