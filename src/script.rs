//! Script identity and dialect detection.
//!
//! A [`ScriptUnit`] is created once during discovery and then passed by
//! reference through validation, classification, and probing. It never
//! changes after construction.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;

/// Script dialects understood by the harness.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptKind {
    /// POSIX shell and its common derivatives (`bash`, `dash`, `ksh`, `zsh`).
    Shell,
    /// Windows PowerShell / PowerShell 7 scripts.
    PowerShell,
}

impl ScriptKind {
    /// Extensions accepted for discovery, lower-case and without the dot.
    pub const KNOWN_EXTENSIONS: [&'static str; 7] =
        ["sh", "bash", "dash", "ksh", "zsh", "ps1", "psm1"];

    /// Maps a file extension (without the dot, any case) to a dialect.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "sh" | "bash" | "dash" | "ksh" | "zsh" => Some(Self::Shell),
            "ps1" | "psm1" => Some(Self::PowerShell),
            _ => None,
        }
    }

    /// Short label used in console output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::PowerShell => "powershell",
        }
    }
}

/// One discovered script, treated as an opaque and independently testable
/// artefact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptUnit {
    path: Utf8PathBuf,
    relative_path: String,
    kind: ScriptKind,
}

impl ScriptUnit {
    /// Creates a unit from its absolute path, its forward-slash path relative
    /// to the discovery root, and its dialect.
    #[must_use]
    pub fn new(path: Utf8PathBuf, relative_path: impl Into<String>, kind: ScriptKind) -> Self {
        Self {
            path,
            relative_path: relative_path.into(),
            kind,
        }
    }

    /// Absolute path on disk.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Path relative to the discovery root, always `/`-separated.
    #[must_use]
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Dialect derived from the file extension.
    #[must_use]
    pub const fn kind(&self) -> ScriptKind {
        self.kind
    }

    /// Reads and decodes the script source.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be opened or
    /// read.
    pub fn read_source(&self) -> io::Result<String> {
        let parent = self.path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let file_name = self.path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("script path has no file name: {}", self.path),
            )
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
        let bytes = dir.read(file_name)?;
        Ok(decode_source(&bytes))
    }
}

/// Decodes script bytes, honouring UTF-8 and UTF-16 byte-order marks.
///
/// PowerShell scripts authored on Windows are frequently saved as UTF-16LE;
/// anything without a BOM is read as UTF-8 with lossy replacement so that a
/// stray byte never aborts validation.
#[must_use]
pub fn decode_source(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, true);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, false);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| match *pair {
            [low, high] if little_endian => u16::from(low) | (u16::from(high) << 8),
            [high, low] => u16::from(low) | (u16::from(high) << 8),
            _ => u16::from(b'?'),
        })
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
}
