mod de;
mod decoder;
mod encoder;
mod error;
mod value;

pub use de::from_value;
pub use decoder::decode;
pub use encoder::encode;
pub use error::BencodeError;
pub use value::BencodeValue;

#[cfg(test)]
pub use value::Dict;
