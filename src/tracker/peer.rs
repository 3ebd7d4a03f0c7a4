use super::TrackerError;
use crate::bencode::BencodeValue;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::debug;

/// Parse compact IPv4 peers (6 bytes: 4 IP + 2 port).
///
/// Trailing bytes that do not form a whole entry are ignored.
pub fn from_compact_v4(data: &[u8]) -> Vec<SocketAddr> {
    let chunks = data.chunks_exact(6);
    if !chunks.remainder().is_empty() {
        debug!("Ignoring {} trailing compact peer bytes", chunks.remainder().len());
    }
    chunks
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            SocketAddr::new(IpAddr::V4(ip), u16::from_be_bytes([c[4], c[5]]))
        })
        .collect()
}

/// Parse compact IPv6 peers (18 bytes: 16 IP + 2 port), as in BEP-7.
pub fn from_compact_v6(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(18)
        .map(|c| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&c[..16]);
            SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(octets)),
                u16::from_be_bytes([c[16], c[17]]),
            )
        })
        .collect()
}

/// Parse the dictionary model: a list of `{ip, port}` dictionaries.
///
/// Entries whose IP is not a literal address are skipped.
pub fn from_dict_list(list: &[BencodeValue]) -> Result<Vec<SocketAddr>, TrackerError> {
    let mut peers = Vec::with_capacity(list.len());

    for entry in list {
        let dict = entry.as_dict().ok_or(TrackerError::UnexpectedPeersEncoding)?;
        let port = dict
            .get(b"port")
            .and_then(|v| v.as_integer())
            .and_then(|p| u16::try_from(p).ok())
            .ok_or(TrackerError::MissingField("port"))?;
        let ip = dict
            .get(b"ip")
            .and_then(|v| v.as_str())
            .ok_or(TrackerError::MissingField("ip"))?;

        match ip.parse::<IpAddr>() {
            Ok(ip) => peers.push(SocketAddr::new(ip, port)),
            Err(_) => debug!("Skipping peer with unusable address {:?}", ip),
        }
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_compact_v4() {
        let data = [1, 2, 3, 4, 0x16, 0x2e, 9, 10, 11, 12, 0x05, 0x22];
        let peers = from_compact_v4(&data);
        assert_eq!(
            peers,
            vec![
                "1.2.3.4:5678".parse::<SocketAddr>().unwrap(),
                "9.10.11.12:1314".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_compact_v4_ignores_trailing_bytes() {
        for extra in 1..6 {
            let mut data = vec![127, 0, 0, 1, 0, 80];
            data.extend(vec![7u8; extra]);
            assert_eq!(from_compact_v4(&data).len(), 1);
        }
    }

    #[test]
    fn test_compact_v6() {
        let mut data = vec![0u8; 18];
        data[15] = 1;
        data[16] = 0x1a;
        data[17] = 0xe1;
        assert_eq!(from_compact_v6(&data), vec!["[::1]:6881".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_dict_list() {
        let value = decode(b"ld2:ip7:1.2.3.44:porti80eed2:ip4:host4:porti81eed2:ip3:::14:porti82eee").unwrap();
        let peers = from_dict_list(value.as_list().unwrap()).unwrap();
        assert_eq!(
            peers,
            vec![
                "1.2.3.4:80".parse::<SocketAddr>().unwrap(),
                "[::1]:82".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_dict_list_rejects_non_dicts() {
        let value = decode(b"li1ee").unwrap();
        assert!(matches!(
            from_dict_list(value.as_list().unwrap()),
            Err(TrackerError::UnexpectedPeersEncoding)
        ));
    }
}
