use thiserror::Error;

pub type InjectorResult<T> = Result<T, InjectorError>;

#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("proxy pool unavailable: {0}")]
    ProxyPoolUnavailable(String),

    #[error("credential pool unavailable: {0}")]
    CredentialPoolUnavailable(String),
}
