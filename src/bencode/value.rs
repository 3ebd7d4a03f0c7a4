use bytes::Bytes;

/// Represents a bencoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Integer: i<number>e
    Integer(i64),
    /// Byte string: <length>:<contents>
    String(Bytes),
    /// List: l<values>e
    List(List),
    /// Dictionary: d<key-value pairs>e (insertion order kept, sorted on encode)
    Dict(Dict),
}

/// A bencoded list together with the input bytes it was parsed from.
#[derive(Debug, Clone, Default)]
pub struct List {
    items: Vec<BencodeValue>,
    raw: Option<Bytes>,
}

impl List {
    pub fn new(items: Vec<BencodeValue>) -> Self {
        Self { items, raw: None }
    }

    pub(super) fn parsed(items: Vec<BencodeValue>, raw: Bytes) -> Self {
        Self {
            items,
            raw: Some(raw),
        }
    }

    pub fn items(&self) -> &[BencodeValue] {
        &self.items
    }

    /// Exact input slice this list was decoded from, if it was decoded at all.
    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for List {}

/// A bencoded dictionary. Keys keep the order they were inserted or parsed in.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Bytes, BencodeValue)>,
    raw: Option<Bytes>,
}

impl Dict {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn parsed(entries: Vec<(Bytes, BencodeValue)>, raw: Bytes) -> Self {
        Self {
            entries,
            raw: Some(raw),
        }
    }

    /// Insert a key, replacing the value in place if the key already exists.
    #[cfg(test)]
    pub fn insert(&mut self, key: impl Into<Bytes>, value: BencodeValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v)
    }

    pub fn entries(&self) -> &[(Bytes, BencodeValue)] {
        &self.entries
    }

    /// Exact input slice this dictionary was decoded from.
    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Dict {}

impl BencodeValue {
    /// Name of this value's shape, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            BencodeValue::Integer(_) => "integer",
            BencodeValue::String(_) => "byte string",
            BencodeValue::List(_) => "list",
            BencodeValue::Dict(_) => "dictionary",
        }
    }

    /// Try to get this value as an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a UTF-8 string
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Try to get this value as a list
    #[cfg(test)]
    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l.items()),
            _ => None,
        }
    }

    /// Try to get this value as a dictionary
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Raw input bytes of a decoded list or dictionary
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::List(l) => l.raw(),
            BencodeValue::Dict(d) => d.raw(),
            _ => None,
        }
    }

    /// Get a value from a dictionary by key
    pub fn dict_get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict()?.get(key)
    }

    pub fn dict_get_str(&self, key: &[u8]) -> Option<&str> {
        self.dict_get(key)?.as_str()
    }

    pub fn dict_get_int(&self, key: &[u8]) -> Option<i64> {
        self.dict_get(key)?.as_integer()
    }
}

impl From<i64> for BencodeValue {
    fn from(value: i64) -> Self {
        BencodeValue::Integer(value)
    }
}

impl From<&str> for BencodeValue {
    fn from(value: &str) -> Self {
        BencodeValue::String(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for BencodeValue {
    fn from(value: Vec<u8>) -> Self {
        BencodeValue::String(Bytes::from(value))
    }
}

impl From<Vec<BencodeValue>> for BencodeValue {
    fn from(items: Vec<BencodeValue>) -> Self {
        BencodeValue::List(List::new(items))
    }
}

impl From<Dict> for BencodeValue {
    fn from(dict: Dict) -> Self {
        BencodeValue::Dict(dict)
    }
}
