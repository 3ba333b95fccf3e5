use cairn_core::codec::CodecError;
use cairn_core::wire::Address;
use cairn_services::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to bind worker endpoint: {0}")]
    Bind(#[source] TransportError),

    #[error("handshake with scheduler {scheduler} failed: {source}")]
    Handshake {
        scheduler: Address,
        #[source]
        source: TransportError,
    },

    #[error("failed to encode handshake: {0}")]
    Codec(#[from] CodecError),

    /// The worker's own endpoint stopped receiving.
    #[error("worker endpoint failed: {0}")]
    Transport(#[source] TransportError),

    #[error("dispatcher task ended abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
}
