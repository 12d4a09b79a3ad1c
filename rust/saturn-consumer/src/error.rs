use thiserror::Error;

pub type ConsumerResult<T> = Result<T, ConsumerError>;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("broker error: {0}")]
    Broker(#[from] saturn_broker::BrokerError),
}
