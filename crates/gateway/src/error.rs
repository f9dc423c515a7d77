/// Fatal gateway construction failures. Everything after startup degrades
/// instead: refresh failures log and keep the previous schema.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid gateway configuration: {0}")]
    InvalidConfiguration(String),
    #[error("no valid service SDLs were retrieved from any subgraph")]
    NoValidServiceSdls,
    #[error("schema composition failed: {0}")]
    Composition(String),
}
