use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// @module: File and directory utilities for intake storage

/// Kind of source file attached to an intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// RFC 822 message (.eml)
    Email,
    /// PDF document
    Pdf,
    /// Raster image (photo or scan)
    Image,
    /// Plain text
    Text,
    /// Anything else; stored and attached but not read
    Other,
}

impl FileKind {
    /// Whether the pipeline can read text or pixels out of this kind
    pub fn is_readable(&self) -> bool {
        !matches!(self, FileKind::Other)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Email => write!(f, "email"),
            FileKind::Pdf => write!(f, "pdf"),
            FileKind::Image => write!(f, "image"),
            FileKind::Text => write!(f, "text"),
            FileKind::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for FileKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" => Ok(FileKind::Email),
            "pdf" => Ok(FileKind::Pdf),
            "image" => Ok(FileKind::Image),
            "text" => Ok(FileKind::Text),
            "other" => Ok(FileKind::Other),
            _ => Err(anyhow::anyhow!("Invalid file kind: {}", s)),
        }
    }
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Hex-encoded SHA-256 of a byte slice
    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Strip path components and characters that are unsafe in file names
    pub fn sanitize_filename(name: &str) -> String {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let cleaned: String = base
            .chars()
            .map(|c| match c {
                c if c.is_alphanumeric() => c,
                '.' | '-' | '_' | ' ' => c,
                _ => '_',
            })
            .collect();
        let cleaned = cleaned.trim().trim_start_matches('.').to_string();
        if cleaned.is_empty() {
            "file".to_string()
        } else {
            cleaned
        }
    }

    /// Write bytes to a content-addressed path under `files_dir`
    ///
    /// Layout is `<files_dir>/<sha[0..2]>/<sha>/<filename>`. Writing the same
    /// content twice is a no-op.
    pub fn store_file<P: AsRef<Path>>(files_dir: P, filename: &str, bytes: &[u8]) -> Result<(PathBuf, String)> {
        let sha = Self::sha256_hex(bytes);
        let dir = files_dir.as_ref().join(&sha[..2]).join(&sha);
        Self::ensure_dir(&dir)
            .with_context(|| format!("Failed to create storage directory: {:?}", dir))?;

        let path = dir.join(Self::sanitize_filename(filename));
        if !path.exists() {
            fs::write(&path, bytes)
                .with_context(|| format!("Failed to write stored file: {:?}", path))?;
        }

        Ok((path, sha))
    }

    /// Read a stored file back into memory
    pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        fs::read(&path).with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// MIME type guessed from the file name
    pub fn guess_mime(filename: &str) -> String {
        mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    /// Detect the kind of a file from its name and leading bytes
    pub fn detect_file_kind(filename: &str, bytes: &[u8]) -> FileKind {
        let ext = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "eml" | "msg" if !bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) => return FileKind::Email,
            "pdf" => return FileKind::Pdf,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tif" | "tiff" | "heic" => {
                return FileKind::Image;
            }
            "txt" | "text" | "csv" => return FileKind::Text,
            _ => {}
        }

        // Fall back to examining file contents
        if bytes.starts_with(b"%PDF") {
            return FileKind::Pdf;
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G'])
            || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
            || bytes.starts_with(b"GIF8")
            || (bytes.len() > 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
        {
            return FileKind::Image;
        }

        if let Some(text) = utf8_prefix(&bytes[..bytes.len().min(4096)]) {
            if looks_like_email(text) {
                return FileKind::Email;
            }
            if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
                return FileKind::Text;
            }
        }

        FileKind::Other
    }

    /// Find all files below a directory; hidden files and directories are pruned
    pub fn find_intake_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let root = dir.as_ref();
        let mut result = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            // The root itself may live under a dot directory
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));
        for entry in walker {
            let entry = entry.context("Failed to read directory entry")?;
            if entry.path().is_file() {
                result.push(entry.into_path());
            }
        }

        Ok(result)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

// Valid UTF-8, allowing a character cut off by the sniffing window
fn utf8_prefix(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&bytes[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

// An RFC 822 message starts with header lines; require at least two of the usual ones.
fn looks_like_email(text: &str) -> bool {
    let header_block = text.split("\n\n").next().unwrap_or("");
    let known = ["from:", "to:", "subject:", "date:", "message-id:", "mime-version:"];
    let hits = header_block
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            known.iter().any(|h| lower.starts_with(h))
        })
        .count();
    hits >= 2
}
