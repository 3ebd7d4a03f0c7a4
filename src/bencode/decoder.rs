use super::value::{Dict, List};
use super::{BencodeError, BencodeValue};
use bytes::Bytes;

type Result<T> = std::result::Result<T, BencodeError>;

/// Deepest list/dictionary nesting accepted before bailing out.
const MAX_DEPTH: usize = 256;

/// Decode bencoded data into a BencodeValue
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    decode_bytes(Bytes::copy_from_slice(data))
}

/// Decode a shared buffer; strings and raw slices of the result borrow from it.
pub fn decode_bytes(data: Bytes) -> Result<BencodeValue> {
    let mut parser = Parser::new(data);
    let value = parser.parse_value(0)?;
    if parser.current != parser.buf.len() {
        return Err(BencodeError::TrailingData(parser.current));
    }
    Ok(value)
}

/// Single-pass scanner. `start..current` always spans the token being read.
struct Parser {
    buf: Bytes,
    start: usize,
    current: usize,
}

impl Parser {
    fn new(buf: Bytes) -> Self {
        Self {
            buf,
            start: 0,
            current: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.current).copied()
    }

    fn read(&self) -> Bytes {
        self.buf.slice(self.start..self.current)
    }

    fn parse_value(&mut self, depth: usize) -> Result<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep(MAX_DEPTH));
        }

        match self.peek() {
            None => Err(BencodeError::UnexpectedEof),
            Some(b'i') => self.parse_integer(),
            Some(b'l') => self.parse_list(depth),
            Some(b'd') => self.parse_dict(depth),
            Some(b'0'..=b'9') => self.parse_string().map(BencodeValue::String),
            Some(token) => Err(BencodeError::UnexpectedToken {
                token,
                offset: self.current,
            }),
        }
    }

    fn parse_integer(&mut self) -> Result<BencodeValue> {
        let element = self.current;
        self.current += 1; // Skip 'i'
        self.start = self.current;

        loop {
            match self.peek() {
                None => return Err(BencodeError::ElementNotTerminated(element)),
                Some(b'e') => break,
                Some(_) => self.current += 1,
            }
        }

        let text = self.read();
        self.current += 1; // Skip 'e'

        let digits = text.strip_prefix(b"-").unwrap_or(&text[..]);
        let negative = digits.len() != text.len();
        let well_formed = !digits.is_empty()
            && digits.iter().all(u8::is_ascii_digit)
            && (digits[0] != b'0' || digits.len() == 1)
            && !(negative && digits == b"0");
        if !well_formed {
            return Err(BencodeError::InvalidInteger(element));
        }

        std::str::from_utf8(&text)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(BencodeValue::Integer)
            .ok_or(BencodeError::InvalidInteger(element))
    }

    fn parse_string(&mut self) -> Result<Bytes> {
        let element = self.current;
        self.start = self.current;

        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.current += 1;
        }

        if self.peek() != Some(b':') {
            return Err(BencodeError::ColonMissing(element));
        }

        let length = std::str::from_utf8(&self.read())
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(BencodeError::StringLengthOverflow(element))?;

        self.current += 1; // Skip ':'
        self.start = self.current;

        let end = self
            .current
            .checked_add(length)
            .filter(|end| *end <= self.buf.len())
            .ok_or(BencodeError::StringLengthOverflow(element))?;

        self.current = end;
        Ok(self.read())
    }

    fn parse_list(&mut self, depth: usize) -> Result<BencodeValue> {
        let element = self.current;
        self.current += 1; // Skip 'l'

        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => return Err(BencodeError::ElementNotTerminated(element)),
                Some(b'e') => break,
                Some(_) => items.push(self.parse_value(depth + 1)?),
            }
        }

        self.current += 1; // Skip 'e'
        self.start = element;
        Ok(BencodeValue::List(List::parsed(items, self.read())))
    }

    fn parse_dict(&mut self, depth: usize) -> Result<BencodeValue> {
        let element = self.current;
        self.current += 1; // Skip 'd'

        let mut entries: Vec<(Bytes, BencodeValue)> = Vec::new();
        loop {
            match self.peek() {
                None => return Err(BencodeError::ElementNotTerminated(element)),
                Some(b'e') => break,
                Some(b'0'..=b'9') => {
                    let key = self.parse_string()?;
                    let value = self.parse_value(depth + 1)?;
                    // Duplicate keys: the last occurrence wins.
                    match entries.iter_mut().find(|(k, _)| *k == key) {
                        Some(entry) => entry.1 = value,
                        None => entries.push((key, value)),
                    }
                }
                Some(_) => return Err(BencodeError::KeyNotString(self.current)),
            }
        }

        self.current += 1; // Skip 'e'
        self.start = element;
        Ok(BencodeValue::Dict(Dict::parsed(entries, self.read())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_integer() {
        assert_eq!(decode(b"i-42e").unwrap(), BencodeValue::Integer(-42));
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
    }

    #[test]
    fn test_rejects_malformed_integers() {
        for input in [&b"i-0e"[..], &b"i03e"[..], &b"ie"[..], &b"i-e"[..], &b"i1x2e"[..]] {
            assert_eq!(decode(input), Err(BencodeError::InvalidInteger(0)), "{input:?}");
        }
        assert_eq!(
            decode(b"i99999999999999999999e"),
            Err(BencodeError::InvalidInteger(0))
        );
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(decode(b""), Err(BencodeError::UnexpectedEof));
        assert_eq!(decode(b"i42"), Err(BencodeError::ElementNotTerminated(0)));
        assert_eq!(decode(b"li1e"), Err(BencodeError::ElementNotTerminated(0)));
        assert_eq!(decode(b"d1:a"), Err(BencodeError::UnexpectedEof));
        assert_eq!(decode(b"4spam"), Err(BencodeError::ColonMissing(0)));
        assert_eq!(decode(b"10:spam"), Err(BencodeError::StringLengthOverflow(0)));
        assert_eq!(decode(b"di1ei2ee"), Err(BencodeError::KeyNotString(1)));
        assert_eq!(decode(b"i1ei2e"), Err(BencodeError::TrailingData(3)));
        assert_eq!(
            decode(b"x"),
            Err(BencodeError::UnexpectedToken {
                token: b'x',
                offset: 0
            })
        );
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(decode(b"0:").unwrap(), BencodeValue::String(Bytes::new()));
    }

    #[test]
    fn test_raw_slices_are_recorded() {
        let input = b"d4:infod1:zi1e1:ai2ee3:numli1eee";
        let value = decode(input).unwrap();

        assert_eq!(value.raw(), Some(&input[..]));
        let info = value.dict_get(b"info").unwrap();
        assert_eq!(info.raw(), Some(&b"d1:zi1e1:ai2ee"[..]));
        let num = value.dict_get(b"num").unwrap();
        assert_eq!(num.raw(), Some(&b"li1ee"[..]));
    }

    #[test]
    fn test_dict_keeps_input_order() {
        let value = decode(b"d1:bi1e1:ai2ee").unwrap();
        let keys: Vec<&[u8]> = value
            .as_dict()
            .unwrap()
            .entries()
            .iter()
            .map(|(k, _)| k.as_ref())
            .collect();
        assert_eq!(keys, vec![&b"b"[..], &b"a"[..]]);
    }

    #[test]
    fn test_nesting_limit() {
        let mut input = vec![b'l'; MAX_DEPTH + 2];
        input.extend(vec![b'e'; MAX_DEPTH + 2]);
        assert_eq!(decode(&input), Err(BencodeError::NestingTooDeep(MAX_DEPTH)));
    }
}
