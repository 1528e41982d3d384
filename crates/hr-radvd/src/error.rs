use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaError {
    /// Raw socket could not be created, bound or configured. Fatal to `start()`.
    #[error("RA socket setup failed: {0}")]
    Socket(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RA socket closed")]
    SocketClosed,

    #[error("RA buffer overflow: {needed} bytes needed, {remaining} remaining")]
    Overflow { needed: usize, remaining: usize },

    #[error("Invalid interface: {0}")]
    InvalidInterface(String),
}

pub type RaResult<T> = Result<T, RaError>;
