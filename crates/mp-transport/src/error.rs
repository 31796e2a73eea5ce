use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("XA resource error: {0}")]
    Xa(String),

    #[error("Resource is closed")]
    Closed,
}
