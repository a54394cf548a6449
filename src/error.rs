use std::io;

/// Error kinds surfaced by the core (spec.md §7).
#[derive(Debug, thiserror::Error)]
pub enum UError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("address resolution failed for {spec:?}: {source}")]
    Resolve {
        spec: String,
        #[source]
        source: io::Error,
    },

    #[error("no dispatcher installed for this async resource")]
    NoDispatcher,
}

/// Malformed request line, invalid chunk header, header block too large,
/// unsupported `Expect` value — everything that becomes a 4xx on the server
/// side and `invalid-response` on the client side.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request line")]
    BadRequestLine,

    #[error("header block exceeded the size limit")]
    HeaderTooLarge,

    #[error("invalid chunk size line")]
    BadChunkHeader,

    #[error("request has Transfer-Encoding other than chunked and no Content-Length")]
    LengthRequired,

    #[error("unsupported Expect value: {0}")]
    ExpectationFailed(String),

    #[error("write exceeded the stream's write limit")]
    WriteBeyondLimit,

    #[error("malformed HTTP status line in response")]
    BadStatusLine,

    #[error("websocket handshake missing or invalid headers")]
    BadHandshake,

    #[error("websocket frame payload exceeds 2^56-1 bytes")]
    FrameTooLarge,
}

impl ProtocolError {
    /// The status a connection that bails out of request parsing on this
    /// error should send before closing (spec.md §4.5/§4.6), or `None` for
    /// errors that only make sense client-side.
    pub fn status(&self) -> Option<(u16, &'static str)> {
        match self {
            ProtocolError::LengthRequired => Some((411, "Length Required")),
            ProtocolError::ExpectationFailed(_) => Some((417, "Expectation Failed")),
            ProtocolError::BadRequestLine | ProtocolError::BadChunkHeader | ProtocolError::HeaderTooLarge => {
                Some((400, "Bad Request"))
            }
            ProtocolError::WriteBeyondLimit | ProtocolError::BadStatusLine | ProtocolError::BadHandshake | ProtocolError::FrameTooLarge => None,
        }
    }
}

impl UError {
    /// `Some` iff this is a [`ProtocolError`] with a server-side status.
    pub fn protocol_status(&self) -> Option<(u16, &'static str)> {
        match self {
            UError::Protocol(p) => p.status(),
            _ => None,
        }
    }
}

pub type UResult<T> = Result<T, UError>;
