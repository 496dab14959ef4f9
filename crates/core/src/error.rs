use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("No peer available")]
    NoPeerAvailable,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Response timeout after {0:?}")]
    ResponseTimeout(Duration),
}

impl RelayError {
    /// HTTP-visible status for this failure
    pub fn gateway_status(&self) -> GatewayStatus {
        match self {
            Self::NoPeerAvailable => GatewayStatus::ServiceUnavailable,
            Self::ConnectionLost(_) => GatewayStatus::BadGateway,
            Self::ResponseTimeout(_) => GatewayStatus::GatewayTimeout,
        }
    }
}

/// Gateway-class HTTP statuses a forward request can fail with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    /// 503 - nobody is registered to take the request
    ServiceUnavailable,
    /// 502 - the selected peer went away
    BadGateway,
    /// 504 - the selected peer did not answer in time
    GatewayTimeout,
}

impl GatewayStatus {
    /// Numeric HTTP status code
    pub fn code(&self) -> u16 {
        match self {
            Self::ServiceUnavailable => 503,
            Self::BadGateway => 502,
            Self::GatewayTimeout => 504,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
