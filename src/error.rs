use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorType {
    /// The radio stack rejected or failed an operation.
    Radio,
    ConnectionLost,
    ConnectionFailed,
    /// The remote device does not expose the expected service/characteristic.
    ServiceNotFound,
    InvalidState,
    Cancelled,
    Destroyed,
    Busy,
}

#[derive(Debug, Clone, Eq, PartialEq, ThisError)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorType,
    pub message: String,
}

impl Error {
    pub fn from_string(message: String, kind: ErrorType) -> Self {
        Error { kind, message }
    }

    pub fn kind(&self) -> ErrorType {
        self.kind
    }

    pub(crate) fn connection_lost() -> Self {
        Error::from_string("Connection lost".to_string(), ErrorType::ConnectionLost)
    }

    pub(crate) fn destroyed() -> Self {
        Error::from_string("Session destroyed".to_string(), ErrorType::Destroyed)
    }

    pub(crate) fn cancelled() -> Self {
        Error::from_string("Operation cancelled".to_string(), ErrorType::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_and_message() {
        let err = Error::from_string("radio busy".to_string(), ErrorType::Radio);
        assert_eq!(err.to_string(), "Radio: radio busy");
        assert_eq!(err.kind(), ErrorType::Radio);
    }
}
