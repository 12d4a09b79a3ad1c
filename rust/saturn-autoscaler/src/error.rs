use thiserror::Error;

pub type AutoscalerResult<T> = Result<T, AutoscalerError>;

#[derive(Debug, Error)]
pub enum AutoscalerError {
    #[error("unknown deployment: {0}")]
    UnknownDeployment(String),

    #[error("replica count {0} outside [{1}, {2}]")]
    OutOfBounds(u32, u32, u32),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("broker error: {0}")]
    Broker(#[from] saturn_broker::BrokerError),
}
