use super::BencodeValue;

/// Encode a BencodeValue into its byte representation.
///
/// Dictionary keys are emitted in ascending byte order regardless of the
/// order they were inserted in.
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut result = Vec::new();
    encode_into(value, &mut result);
    result
}

fn encode_bytes(bytes: &[u8], output: &mut Vec<u8>) {
    output.extend_from_slice(bytes.len().to_string().as_bytes());
    output.push(b':');
    output.extend_from_slice(bytes);
}

fn encode_into(value: &BencodeValue, output: &mut Vec<u8>) {
    match value {
        BencodeValue::Integer(i) => {
            output.push(b'i');
            output.extend_from_slice(i.to_string().as_bytes());
            output.push(b'e');
        }
        BencodeValue::String(s) => encode_bytes(s, output),
        BencodeValue::List(list) => {
            output.push(b'l');
            for item in list.items() {
                encode_into(item, output);
            }
            output.push(b'e');
        }
        BencodeValue::Dict(dict) => {
            let mut entries: Vec<_> = dict.entries().iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            output.push(b'd');
            for (key, value) in entries {
                encode_bytes(key, output);
                encode_into(value, output);
            }
            output.push(b'e');
        }
    }
}
