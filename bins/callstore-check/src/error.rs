use callstore_engine::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("round {round}: {detail}")]
    Mismatch { round: usize, detail: String },

    #[error("round {0} panicked")]
    Panicked(usize),

    #[error("interrupted")]
    Interrupted,
}
