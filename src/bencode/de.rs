//! Typed mapping of a decoded value tree onto `#[derive(Deserialize)]` records.
//!
//! Field names come from the struct (or its `#[serde(rename)]` tag). Absent
//! keys leave `Option` fields as `None`; a present key of the wrong shape
//! fails with [`BencodeError::TypeMismatch`] naming the dotted key path.

use super::value::Dict;
use super::{BencodeError, BencodeValue};
use bytes::Bytes;
use serde::de::{
    DeserializeSeed, Deserializer, IntoDeserializer, MapAccess, SeqAccess,
    Visitor,
};
use serde::{forward_to_deserialize_any, Deserialize};

type Result<T> = std::result::Result<T, BencodeError>;

/// Map a decoded dictionary onto `T`.
pub fn from_value<'de, T: Deserialize<'de>>(value: &'de BencodeValue) -> Result<T> {
    T::deserialize(Root(value))
}

/// Decode and map in one step.
#[cfg(test)]
pub fn from_bytes<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    let value = super::decode(data)?;
    from_value(&value)
}

/// Top-level entry point: only struct and map targets are accepted.
struct Root<'de>(&'de BencodeValue);

impl<'de> Deserializer<'de> for Root<'de> {
    type Error = BencodeError;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(BencodeError::TargetNotStruct)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        ValueDeserializer(self.0).deserialize_map(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        ValueDeserializer(self.0).deserialize_struct(name, fields, visitor)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct enum identifier ignored_any
    }
}

struct ValueDeserializer<'de>(&'de BencodeValue);

impl<'de> ValueDeserializer<'de> {
    fn mismatch(&self, want: &str) -> BencodeError {
        BencodeError::TypeMismatch {
            field: String::new(),
            want: want.to_string(),
            got: self.0.kind(),
        }
    }
}

impl<'de> Deserializer<'de> for ValueDeserializer<'de> {
    type Error = BencodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            BencodeValue::Integer(i) => visitor.visit_i64(*i),
            BencodeValue::String(s) => visitor.visit_borrowed_bytes(s),
            BencodeValue::List(list) => visitor.visit_seq(ListAccess::new(list.items())),
            BencodeValue::Dict(dict) => visitor.visit_map(DictAccess::new(dict)),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            BencodeValue::Integer(i) => visitor.visit_bool(*i != 0),
            _ => Err(self.mismatch("a 0/1 integer")),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            BencodeValue::String(s) => match std::str::from_utf8(s) {
                Ok(text) => visitor.visit_borrowed_str(text),
                Err(_) => Err(BencodeError::TypeMismatch {
                    field: String::new(),
                    want: "a UTF-8 string".to_string(),
                    got: "non-UTF-8 byte string",
                }),
            },
            _ => Err(self.mismatch("a string")),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            BencodeValue::String(s) => visitor.visit_borrowed_bytes(s),
            _ => Err(self.mismatch("a byte string")),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            BencodeValue::List(list) => visitor.visit_seq(ListAccess::new(list.items())),
            _ => Err(self.mismatch("a list")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.0 {
            BencodeValue::Dict(dict) => visitor.visit_map(DictAccess::new(dict)),
            _ => Err(self.mismatch("a dictionary")),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.0 {
            BencodeValue::Dict(dict) => visitor.visit_map(DictAccess::new(dict)),
            _ => Err(self.mismatch(&format!("struct {name}"))),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.0.as_str() {
            Some(variant) => visitor.visit_enum(variant.into_deserializer()),
            None => Err(self.mismatch("a variant name")),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char unit unit_struct identifier
    }
}

struct ListAccess<'de> {
    items: std::slice::Iter<'de, BencodeValue>,
    index: usize,
}

impl<'de> ListAccess<'de> {
    fn new(items: &'de [BencodeValue]) -> Self {
        Self {
            items: items.iter(),
            index: 0,
        }
    }
}

impl<'de> SeqAccess<'de> for ListAccess<'de> {
    type Error = BencodeError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        let Some(item) = self.items.next() else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        seed.deserialize(ValueDeserializer(item))
            .map(Some)
            .map_err(|e| e.with_field(&format!("[{index}]")))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

struct DictAccess<'de> {
    entries: std::slice::Iter<'de, (Bytes, BencodeValue)>,
    pending: Option<(&'de Bytes, &'de BencodeValue)>,
}

impl<'de> DictAccess<'de> {
    fn new(dict: &'de Dict) -> Self {
        Self {
            entries: dict.entries().iter(),
            pending: None,
        }
    }
}

impl<'de> MapAccess<'de> for DictAccess<'de> {
    type Error = BencodeError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        let Some((key, value)) = self.entries.next() else {
            return Ok(None);
        };
        self.pending = Some((key, value));
        seed.deserialize(KeyDeserializer(key)).map(Some)
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let (key, value) = self
            .pending
            .take()
            .ok_or_else(|| BencodeError::Custom("value requested before key".to_string()))?;
        seed.deserialize(ValueDeserializer(value))
            .map_err(|e| e.with_field(&String::from_utf8_lossy(key)))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

/// Dictionary keys surface as `&str` when they are UTF-8, raw bytes otherwise.
struct KeyDeserializer<'de>(&'de [u8]);

impl<'de> Deserializer<'de> for KeyDeserializer<'de> {
    type Error = BencodeError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match std::str::from_utf8(self.0) {
            Ok(key) => visitor.visit_borrowed_str(key),
            Err(_) => visitor.visit_borrowed_bytes(self.0),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}
