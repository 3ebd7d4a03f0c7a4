use crate::error::{BittorrentError, Result};
use crate::torrent::TorrentInfo;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

struct FileEntry {
    path: PathBuf,
    length: u64,
    offset: u64, // Global offset in the torrent
    handle: Option<File>,
}

/// Maps the torrent's byte range onto its files.
///
/// Files are opened on first write and the handles kept until [`sync_all`].
///
/// [`sync_all`]: FileLayout::sync_all
pub struct FileLayout {
    root: PathBuf,
    files: Vec<FileEntry>,
    total_length: u64,
    piece_length: u64,
}

/// Reject path segments that could escape the download directory.
fn check_component(component: &str) -> Result<()> {
    let unsafe_path = || BittorrentError::UnsafePath(component.to_string());
    if component.is_empty() || component.contains(['/', '\\', '\0']) {
        return Err(unsafe_path());
    }
    match Path::new(component).components().next() {
        Some(Component::Normal(_)) => Ok(()),
        _ => Err(unsafe_path()),
    }
}

impl FileLayout {
    /// `<dir>/<name>` for a single file, `<dir>/<name>/<path...>` otherwise.
    pub fn new(download_dir: &Path, info: &TorrentInfo) -> Result<Self> {
        check_component(&info.name)?;

        let root = if info.multi_file {
            download_dir.join(&info.name)
        } else {
            download_dir.to_path_buf()
        };

        let mut files = Vec::with_capacity(info.files.len());
        let mut offset = 0u64;
        for file_info in &info.files {
            if file_info.path.is_empty() {
                return Err(BittorrentError::UnsafePath(String::new()));
            }
            let mut path = root.clone();
            for component in &file_info.path {
                check_component(component)?;
                path.push(component);
            }
            files.push(FileEntry {
                path,
                length: file_info.length,
                offset,
                handle: None,
            });
            offset += file_info.length;
        }

        Ok(Self {
            root,
            files,
            total_length: offset,
            piece_length: info.piece_length,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[cfg(test)]
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.path.as_path())
    }

    /// Write a verified piece at `index * piece_length`.
    pub async fn write_piece(&mut self, index: u32, data: &[u8]) -> Result<()> {
        self.write_at(index as u64 * self.piece_length, data).await
    }

    /// Write data at a global offset, spilling into following files.
    pub async fn write_at(&mut self, mut offset: u64, mut data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.total_length {
            return Err(BittorrentError::Storage(format!(
                "write of {} bytes at {} exceeds torrent length {}",
                data.len(),
                offset,
                self.total_length
            )));
        }

        for entry in &mut self.files {
            if data.is_empty() {
                break;
            }
            if offset >= entry.offset + entry.length {
                continue; // This file is before our offset
            }

            let file_offset = offset - entry.offset;
            let bytes_to_write = std::cmp::min(data.len() as u64, entry.length - file_offset) as usize;

            let file = open(entry).await?;
            file.seek(std::io::SeekFrom::Start(file_offset)).await?;
            file.write_all(&data[..bytes_to_write]).await?;

            debug!(
                "Wrote {} bytes to {:?} at offset {}",
                bytes_to_write, entry.path, file_offset
            );

            offset += bytes_to_write as u64;
            data = &data[bytes_to_write..];
        }

        Ok(())
    }

    /// Flush every open file to disk. Empty files in the torrent are created here.
    pub async fn sync_all(&mut self) -> Result<()> {
        for entry in &mut self.files {
            if entry.length == 0 {
                open(entry).await?;
            }
            if let Some(file) = entry.handle.as_mut() {
                file.flush().await?;
                file.sync_all().await?;
            }
        }
        Ok(())
    }
}

async fn open(entry: &mut FileEntry) -> Result<&mut File> {
    if entry.handle.is_none() {
        if let Some(parent) = entry.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&entry.path)
            .await?;
        entry.handle = Some(file);
    }
    entry
        .handle
        .as_mut()
        .ok_or_else(|| BittorrentError::Storage(format!("cannot open {:?}", entry.path)))
}
