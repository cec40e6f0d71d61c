use thiserror::Error;

/// Errors from decoding a compact timeline file (CTF).
#[derive(Error, Debug)]
pub enum CtfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signature mismatch: expected the crocket-style CTF header, got different bytes")]
    BadSignature,

    #[error("truncated body: expected at least {expected} more bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("LEB128 value at offset {offset} did not terminate within 5 bytes")]
    Leb128Overflow { offset: usize },
}

pub type CtfResult<T> = std::result::Result<T, CtfError>;

/// Errors from the editor wire protocol's message framing/decoding.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("handshake failed: could not send client greeting")]
    HandshakeSend(#[source] std::io::Error),

    #[error("handshake failed: could not read server greeting")]
    HandshakeRecv(#[source] std::io::Error),

    #[error("handshake failed: server greeting did not match, got {0:?}")]
    HandshakeMismatch([u8; 12]),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Errors from resolving or establishing the transport connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("could not resolve server address {addr:?}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no addresses returned for {addr:?}")]
    NoAddress { addr: String },

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not configure socket: {0}")]
    Configure(#[source] std::io::Error),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
