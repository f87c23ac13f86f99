use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to encode {namespace}/{key}: {source}")]
    Encode {
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {namespace}/{key}: {source}")]
    Decode {
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
