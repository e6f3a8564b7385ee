use thiserror::Error;

pub type HdmResult<T> = Result<T, HdmError>;

#[derive(Debug, Error)]
pub enum HdmError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Crypto(#[from] hdm_crypto::CryptoError),

    #[error("network error: {0}")]
    Network(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("{service} replied with status {status}: {body}")]
    Protocol {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed response from {service}: {reason}")]
    MalformedResponse {
        service: &'static str,
        reason: String,
    },

    #[error("could not unwrap data key for tenant '{tenant}': {source}")]
    KeyUnwrap {
        tenant: String,
        #[source]
        source: Box<HdmError>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HdmError {
    /// Wrap an I/O error with the operation and path it failed on.
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| HdmError::Io { context, source }
    }
}
