use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("{parser} payload was not valid JSON: {source}")]
    Json {
        parser: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{parser} CSV error: {source}")]
    Csv {
        parser: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{parser} row {row_index} invalid: {message}")]
    DataRow {
        parser: &'static str,
        row_index: usize,
        message: String,
    },

    #[error("{parser} validation error: {message}")]
    Validation {
        parser: &'static str,
        message: String,
    },

    #[error("{parser} input did not contain any data rows")]
    EmptyData { parser: &'static str },
}

impl ParserError {
    /// True when the error was caused by caller-supplied content rather than
    /// an internal failure while building frames.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, ParserError::Validation { .. })
    }
}
