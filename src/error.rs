use crate::config::ConfigError;
use crate::der::DecodeError;
use crate::math::ArithmeticError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sample {index}: malformed signature: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },
    #[error("sample {index}: {source}")]
    Arithmetic {
        index: usize,
        #[source]
        source: ArithmeticError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}
