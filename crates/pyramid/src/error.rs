use std::fmt;

#[derive(Debug)]
pub enum PyramidError {
    /// Rejected configuration, raised while building the model.
    Config { key: String, message: String },
    /// Backbone output that does not match the built model.
    Shape { branch: String, message: String },
    Candle(String),
    Io(String),
    Json(String),
}

impl PyramidError {
    pub(crate) fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        PyramidError::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub(crate) fn shape(branch: impl Into<String>, message: impl Into<String>) -> Self {
        PyramidError::Shape {
            branch: branch.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PyramidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyramidError::Config { key, message } => write!(f, "configuration error at `{key}`: {message}"),
            PyramidError::Shape { branch, message } => write!(f, "shape mismatch in `{branch}`: {message}"),
            PyramidError::Candle(msg) => write!(f, "candle error: {msg}"),
            PyramidError::Io(msg) => write!(f, "io error: {msg}"),
            PyramidError::Json(msg) => write!(f, "json error: {msg}"),
        }
    }
}

impl std::error::Error for PyramidError {}

impl From<candle_core::Error> for PyramidError {
    fn from(err: candle_core::Error) -> Self {
        PyramidError::Candle(err.to_string())
    }
}

impl From<std::io::Error> for PyramidError {
    fn from(err: std::io::Error) -> Self {
        PyramidError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PyramidError {
    fn from(err: serde_json::Error) -> Self {
        PyramidError::Json(err.to_string())
    }
}
