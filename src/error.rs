use thiserror::Error;

/// Errors raised while building, loading or evaluating a model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("cannot substitute `{descriptor}`: its normalization is not the identity")]
    UnsupportedSubstitution { descriptor: String },

    #[error("expansion of `{descriptor}` refers to `{descriptor}` itself")]
    RecursiveSubstitution { descriptor: String },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("<{element}> is missing the `{attribute}` attribute")]
    MissingAttribute { element: String, attribute: String },

    #[error("invalid value `{value}` for `{attribute}`")]
    InvalidValue { attribute: String, value: String },

    #[error("unknown descriptor `{0}`")]
    UnknownDescriptor(String),

    #[error("unknown distribution `{0}`")]
    UnknownDistribution(String),

    #[error("`{0}` is declared more than once")]
    DuplicateName(String),

    #[error("malformed model document: {0}")]
    Malformed(String),

    #[error("expected {expected} input layers, got {actual}")]
    LayerCountMismatch { expected: usize, actual: usize },

    #[error("layer `{layer}` is {actual_rows}x{actual_cols}, expected {rows}x{cols}")]
    ShapeMismatch {
        layer: String,
        rows: usize,
        cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    #[error("layer `{layer}` holds {actual} values, expected {expected}")]
    ValueCountMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error("no input layer to take the grid shape from")]
    NoLayers,
}

impl From<quick_xml::events::attributes::AttrError> for ModelError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        ModelError::Xml(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
