use super::Pieces;
use crate::bencode::{decode, encode, from_value};
use crate::error::{BittorrentError, Result};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::borrow::Cow;
use std::fmt;

/// `info.files[]` entry as it appears on disk
#[derive(Debug, Deserialize)]
struct RawFile {
    length: u64,
    path: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    length: Option<u64>,
    files: Option<Vec<RawFile>>,
    #[serde(default)]
    private: bool,
}

/// `url-list` is either one URL or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlList {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawMetainfo {
    announce: Option<String>,
    #[serde(rename = "announce-list")]
    announce_list: Option<Vec<Vec<String>>>,
    #[serde(rename = "url-list")]
    url_list: Option<UrlList>,
    comment: Option<String>,
    #[serde(rename = "created by", alias = "created-by")]
    created_by: Option<String>,
    #[serde(rename = "creation date")]
    creation_date: Option<i64>,
    info: RawInfo,
}

/// Represents a file in the torrent
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// Information about the torrent contents
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the file or directory
    pub name: String,
    /// Number of bytes in each piece
    pub piece_length: u64,
    /// Piece table
    pub pieces: Pieces,
    /// Files in the torrent; a single entry named after the torrent in single-file mode
    pub files: Vec<FileInfo>,
    /// Total length of all files
    pub total_length: u64,
    /// Whether `files` came from a multi-file `info` dictionary
    pub multi_file: bool,
    pub private: bool,
}

impl TorrentInfo {
    fn from_raw(raw: RawInfo) -> Result<Self> {
        if raw.piece_length == 0 || raw.piece_length > u32::MAX as u64 {
            return Err(BittorrentError::InvalidTorrent(format!(
                "'piece length' {} out of range",
                raw.piece_length
            )));
        }

        let pieces = Pieces::from_bytes(&raw.pieces)?;

        let (files, multi_file) = match (raw.length, raw.files) {
            (Some(length), None) => (
                vec![FileInfo {
                    path: vec![raw.name.clone()],
                    length,
                }],
                false,
            ),
            (None, Some(files)) => (
                files
                    .into_iter()
                    .map(|f| FileInfo {
                        path: f.path,
                        length: f.length,
                    })
                    .collect(),
                true,
            ),
            _ => {
                return Err(BittorrentError::InvalidTorrent(
                    "Exactly one of 'length' or 'files' is required".to_string(),
                ))
            }
        };

        let total_length: u64 = files.iter().map(|f| f.length).sum();
        let expected_pieces = total_length.div_ceil(raw.piece_length);
        if pieces.len() as u64 != expected_pieces {
            return Err(BittorrentError::InvalidTorrent(format!(
                "{} piece hashes for {} bytes at {} bytes per piece (want {})",
                pieces.len(),
                total_length,
                raw.piece_length,
                expected_pieces
            )));
        }

        Ok(TorrentInfo {
            name: raw.name,
            piece_length: raw.piece_length,
            pieces,
            files,
            total_length,
            multi_file,
            private: raw.private,
        })
    }
}

/// Top-level metainfo structure from a .torrent file
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: Option<String>,
    /// Tiers of additional tracker URLs
    pub announce_list: Option<Vec<Vec<String>>>,
    /// Web seed URLs; parsed for display only
    pub url_list: Vec<String>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    /// Seconds since the Unix epoch
    pub creation_date: Option<i64>,
    /// Information about the torrent contents
    pub info: TorrentInfo,
    /// SHA1 hash of the bencoded info dictionary, as found in the file
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value = decode(data)?;
        let raw: RawMetainfo = from_value(&value)?;

        let info = value
            .dict_get(b"info")
            .ok_or_else(|| BittorrentError::InvalidTorrent("Missing 'info' field".to_string()))?;
        // Hash the bytes as they appear in the file; re-encoding would sort keys.
        let info_bytes = match info.raw() {
            Some(raw) => Cow::Borrowed(raw),
            None => Cow::Owned(encode(info)),
        };

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&Sha1::digest(info_bytes));

        let url_list = match raw.url_list {
            Some(UrlList::One(url)) => vec![url],
            Some(UrlList::Many(urls)) => urls,
            None => Vec::new(),
        };

        Ok(Metainfo {
            announce: raw.announce,
            announce_list: raw.announce_list,
            url_list,
            comment: raw.comment,
            created_by: raw.created_by,
            creation_date: raw.creation_date,
            info: TorrentInfo::from_raw(raw.info)?,
            info_hash,
        })
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Every tracker URL, `announce` first, then the tiers in order, without repeats.
    pub fn trackers(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let tiers = self.announce_list.iter().flatten().flatten();
        for url in self.announce.iter().chain(tiers) {
            if !url.is_empty() && !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }
}

impl fmt::Display for Metainfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Torrent Information")?;
        writeln!(f, "==================")?;
        writeln!(f, "Name: {}", self.info.name)?;
        if let Some(announce) = &self.announce {
            writeln!(f, "Tracker: {}", announce)?;
        }
        if let Some(comment) = &self.comment {
            writeln!(f, "Comment: {}", comment)?;
        }
        if let Some(created_by) = &self.created_by {
            writeln!(f, "Created By: {}", created_by)?;
        }
        if let Some(date) = self.creation_date {
            writeln!(f, "Creation Date: {} (unix)", date)?;
        }
        writeln!(f, "Total Size: {} bytes", self.info.total_length)?;
        writeln!(f, "Piece Length: {} bytes", self.info.piece_length)?;
        writeln!(f, "Number of Pieces: {}", self.info.pieces.len())?;
        writeln!(f, "Private: {}", self.info.private)?;
        writeln!(f, "Info Hash: {}", self.info_hash_hex())?;
        writeln!(f, "\nFiles:")?;

        for (i, file) in self.info.files.iter().enumerate() {
            writeln!(
                f,
                "  {}: {} ({} bytes)",
                i + 1,
                file.path.join("/"),
                file.length
            )?;
        }

        if let Some(announce_list) = &self.announce_list {
            writeln!(f, "\nAdditional Trackers:")?;
            for (tier, trackers) in announce_list.iter().enumerate() {
                writeln!(f, "  Tier {}:", tier + 1)?;
                for tracker in trackers {
                    writeln!(f, "    - {}", tracker)?;
                }
            }
        }

        if !self.url_list.is_empty() {
            writeln!(f, "\nWeb Seeds:")?;
            for url in &self.url_list {
                writeln!(f, "    - {}", url)?;
            }
        }

        Ok(())
    }
}
