use percent_encoding::{percent_encode, NON_ALPHANUMERIC};

/// Events sent to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    /// BEP-15 event code; 0 stands for "none"
    pub fn udp_code(event: Option<TrackerEvent>) -> u32 {
        match event {
            None => 0,
            Some(TrackerEvent::Completed) => 1,
            Some(TrackerEvent::Started) => 2,
            Some(TrackerEvent::Stopped) => 3,
        }
    }
}

/// Number of peers asked for over HTTP
pub const HTTP_NUM_WANT: u32 = 50;

/// Parameters of one announce
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Unique peer ID
    pub peer_id: [u8; 20],
    /// Port this peer claims to listen on
    pub port: u16,
    /// Total amount uploaded
    pub uploaded: u64,
    /// Total amount downloaded
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    /// Event (optional)
    pub event: Option<TrackerEvent>,
}

impl AnnounceRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
        }
    }

    /// Build the HTTP query string, raw bytes percent-encoded.
    pub fn to_query_string(&self, tracker_id: Option<&str>) -> String {
        let mut params = vec![
            ("info_hash", percent_encode(&self.info_hash, NON_ALPHANUMERIC).to_string()),
            ("peer_id", percent_encode(&self.peer_id, NON_ALPHANUMERIC).to_string()),
            ("port", self.port.to_string()),
            ("uploaded", self.uploaded.to_string()),
            ("downloaded", self.downloaded.to_string()),
            ("left", self.left.to_string()),
            ("compact", "1".to_string()),
            ("numwant", HTTP_NUM_WANT.to_string()),
            ("no_peer_id", "1".to_string()),
        ];

        if let Some(event) = &self.event {
            params.push(("event", event.as_str().to_string()));
        }
        if let Some(id) = tracker_id {
            params.push((
                "trackerid",
                percent_encode(id.as_bytes(), NON_ALPHANUMERIC).to_string(),
            ));
        }

        params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}
