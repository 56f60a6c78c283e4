//! DSP boot images.
//!
//! An image is a sequence of big-endian records, each a 32-bit load address,
//! a 16-bit word count and that many 16-bit words.

use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileId {
    Loader,
    Application,
}

impl FileId {
    pub fn file_name(self) -> &'static str {
        match self {
            FileId::Loader => "r1t1-gpak-loader.bin",
            FileId::Application => "r1t1-gpak-app.bin",
        }
    }
}

/// Source of the DSP boot images.
pub trait FirmwareStore: Send + Sync {
    fn load(&self, file: FileId) -> io::Result<Vec<u8>>;
}

/// Images read from a firmware directory.
#[derive(Clone, Debug)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }
}

impl FirmwareStore for DirectoryStore {
    fn load(&self, file: FileId) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(file.file_name()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub address: u32,
    pub words: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareImage {
    sections: Vec<Section>,
}

impl FirmwareImage {
    const HEADER: usize = 6;

    /// `None` for an empty image or one whose last record is cut short.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let mut sections = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            if rest.len() < Self::HEADER {
                return None;
            }
            let address = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let count = u16::from_be_bytes([rest[4], rest[5]]) as usize;
            let body = rest.get(Self::HEADER..Self::HEADER + count * 2)?;
            let words = body
                .chunks_exact(2)
                .map(|w| u16::from_be_bytes([w[0], w[1]]))
                .collect();
            sections.push(Section { address, words });
            rest = &rest[Self::HEADER + count * 2..];
        }
        if sections.is_empty() {
            return None;
        }
        Some(Self { sections })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn words(&self) -> usize {
        self.sections.iter().map(|s| s.words.len()).sum()
    }

    /// Serialize back to the on-disk record layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for section in &self.sections {
            out.extend_from_slice(&section.address.to_be_bytes());
            out.extend_from_slice(&(section.words.len() as u16).to_be_bytes());
            for word in &section.words {
                out.extend_from_slice(&word.to_be_bytes());
            }
        }
        out
    }

    pub fn from_sections(sections: Vec<Section>) -> Self {
        Self { sections }
    }
}
