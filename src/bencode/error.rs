use serde::de::{Expected, Unexpected};
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BencodeError {
    #[error("element starting at byte {0} is not terminated")]
    ElementNotTerminated(usize),

    #[error("string length at byte {0} is not followed by ':'")]
    ColonMissing(usize),

    #[error("string at byte {0} overflows the input")]
    StringLengthOverflow(usize),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer at byte {0}")]
    InvalidInteger(usize),

    #[error("unexpected token {token:#04x} at byte {offset}")]
    UnexpectedToken { token: u8, offset: usize },

    #[error("dictionary key at byte {0} is not a byte string")]
    KeyNotString(usize),

    #[error("trailing data after byte {0}")]
    TrailingData(usize),

    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("field `{field}`: expected {want}, got {got}")]
    TypeMismatch {
        field: String,
        want: String,
        got: &'static str,
    },

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("target of a typed mapping must be a struct or map")]
    TargetNotStruct,

    #[error("{0}")]
    Custom(String),
}

impl BencodeError {
    /// Prefix the field path of a mapping error with the enclosing key.
    pub(crate) fn with_field(self, key: &str) -> Self {
        let join = |inner: String| {
            if inner.is_empty() {
                key.to_string()
            } else if inner.starts_with('[') {
                format!("{key}{inner}")
            } else {
                format!("{key}.{inner}")
            }
        };

        match self {
            BencodeError::TypeMismatch { field, want, got } => BencodeError::TypeMismatch {
                field: join(field),
                want,
                got,
            },
            BencodeError::MissingField(field) => BencodeError::MissingField(join(field)),
            other => other,
        }
    }
}

fn unexpected_kind(unexp: &Unexpected<'_>) -> &'static str {
    match unexp {
        Unexpected::Signed(_) | Unexpected::Unsigned(_) => "integer",
        Unexpected::Bytes(_) | Unexpected::Str(_) => "byte string",
        Unexpected::Seq => "list",
        Unexpected::Map => "dictionary",
        Unexpected::Bool(_) => "boolean",
        _ => "unsupported value",
    }
}

impl serde::de::Error for BencodeError {
    fn custom<T: Display>(msg: T) -> Self {
        BencodeError::Custom(msg.to_string())
    }

    fn invalid_type(unexp: Unexpected<'_>, exp: &dyn Expected) -> Self {
        BencodeError::TypeMismatch {
            field: String::new(),
            want: exp.to_string(),
            got: unexpected_kind(&unexp),
        }
    }

    fn missing_field(field: &'static str) -> Self {
        BencodeError::MissingField(field.to_string())
    }
}
