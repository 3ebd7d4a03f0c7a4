use super::peer::{from_compact_v4, from_compact_v6, from_dict_list};
use super::TrackerError;
use crate::bencode::{decode, BencodeValue};
use std::net::SocketAddr;

/// Decoded HTTP announce response
#[derive(Debug, Clone, Default)]
pub struct AnnounceResponse {
    /// Seconds to wait before the next announce
    pub interval: Option<u64>,
    /// Minimum announce interval
    pub min_interval: Option<u64>,
    /// Opaque id to echo back on later announces
    pub tracker_id: Option<String>,
    /// Number of seeders
    pub complete: Option<u64>,
    /// Number of leechers
    pub incomplete: Option<u64>,
    pub peers: Vec<SocketAddr>,
}

impl AnnounceResponse {
    pub fn from_bytes(body: &[u8]) -> Result<Self, TrackerError> {
        Self::from_bencode(&decode(body)?)
    }

    pub fn from_bencode(value: &BencodeValue) -> Result<Self, TrackerError> {
        let dict = value.as_dict().ok_or(TrackerError::UnexpectedPeersEncoding)?;

        if let Some(failure) = dict.get(b"failure reason") {
            let reason = failure
                .as_bytes()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(TrackerError::Failure(reason));
        }

        let non_negative = |key: &[u8]| value.dict_get_int(key).and_then(|i| u64::try_from(i).ok());

        let mut peers = match dict.get(b"peers") {
            Some(BencodeValue::String(compact)) => from_compact_v4(compact),
            Some(BencodeValue::List(list)) => from_dict_list(list.items())?,
            Some(_) => return Err(TrackerError::UnexpectedPeersEncoding),
            None => Vec::new(),
        };

        match dict.get(b"peers6") {
            Some(BencodeValue::String(compact)) => peers.extend(from_compact_v6(compact)),
            Some(_) => return Err(TrackerError::UnexpectedPeersEncoding),
            None if dict.get(b"peers").is_none() => return Err(TrackerError::MissingField("peers")),
            None => {}
        }

        Ok(AnnounceResponse {
            interval: non_negative(b"interval"),
            min_interval: non_negative(b"min interval"),
            tracker_id: value.dict_get_str(b"tracker id").map(String::from),
            complete: non_negative(b"complete"),
            incomplete: non_negative(b"incomplete"),
            peers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_response() {
        let body = b"d8:intervali900e5:peers12:\x7f\x00\x00\x01\x1a\xe1\x0a\x00\x00\x02\x1a\xe2e";
        let response = AnnounceResponse::from_bytes(body).unwrap();
        assert_eq!(response.interval, Some(900));
        assert_eq!(
            response.peers,
            vec![
                "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:6882".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_optional_fields() {
        let body = b"d8:completei3e10:incompletei7e8:intervali60e12:min intervali120e5:peers0:10:tracker id3:abce";
        let response = AnnounceResponse::from_bytes(body).unwrap();
        assert_eq!(response.complete, Some(3));
        assert_eq!(response.incomplete, Some(7));
        assert_eq!(response.min_interval, Some(120));
        assert_eq!(response.tracker_id.as_deref(), Some("abc"));
        assert!(response.peers.is_empty());
    }

    #[test]
    fn test_failure_reason() {
        let body = b"d14:failure reason9:not founde";
        match AnnounceResponse::from_bytes(body) {
            Err(TrackerError::Failure(reason)) => assert_eq!(reason, "not found"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_peers6_only() {
        let mut body = b"d8:intervali5e6:peers618:".to_vec();
        body.extend_from_slice(&[0u8; 15]);
        body.extend_from_slice(&[1, 0x1a, 0xe1]);
        body.push(b'e');
        let response = AnnounceResponse::from_bytes(&body).unwrap();
        assert_eq!(response.peers, vec!["[::1]:6881".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_unexpected_peers_encoding() {
        let body = b"d8:intervali5e5:peersi3ee";
        assert!(matches!(
            AnnounceResponse::from_bytes(body),
            Err(TrackerError::UnexpectedPeersEncoding)
        ));
    }

    #[test]
    fn test_missing_peers() {
        let body = b"d8:intervali5ee";
        assert!(matches!(
            AnnounceResponse::from_bytes(body),
            Err(TrackerError::MissingField("peers"))
        ));
    }
}
