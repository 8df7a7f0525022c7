use std::path::Path;
use serde_bencode::value::Value;
use serde_derive::Deserialize;
use sha1::{Digest, Sha1};
use url::Url;
use crate::ID;

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("bencode error whilst decoding metainfo: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("invalid file extension, expected .torrent")]
    InvalidExtension,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("invalid announce url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid pieces length, must be a non-zero multiple of 20")]
    InvalidPiecesLength,

    #[error("piece length must be non-zero")]
    ZeroPieceLength,

    #[error("number of pieces does not cover file length {0}")]
    LengthMismatch(u64),

    #[error("multi-file torrents are not supported")]
    MultiFile,
}

type Result<T> = std::result::Result<T, MetaInfoError>;

// Top level of a .torrent file, the info dict is kept raw so its hash
// is computed over exactly what the file contains.
#[derive(Deserialize)]
struct RawMetaInfo {

    announce: String,

    #[serde(default)]
    #[serde(rename = "announce-list")]
    announce_list: Option<Vec<Vec<String>>>,

    info: Value,

    #[serde(default)]
    comment: Option<String>,

    #[serde(default)]
    #[serde(rename = "created by")]
    created_by: Option<String>,

}

#[derive(Clone, Deserialize)]
pub struct Info {

    // Suggested name of the file.
    pub name: String,

    // String consisting of the concatenation of all 20-byte SHA1 hash values, one per piece.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,

    // Number of bytes in each piece.
    #[serde(rename = "piece length")]
    pub piece_length: u64,

    // Length of the file in bytes, absent for multi-file torrents.
    #[serde(default)]
    pub length: Option<u64>,

    #[serde(default)]
    pub files: Option<Vec<Value>>,

}

#[derive(Clone)]
pub struct MetaInfo {

    // The announce URL of the tracker.
    pub announce: Url,

    // (optional) tiers of backup trackers.
    pub announce_list: Vec<Vec<Url>>,

    pub info: Info,

    // sha1 hash of info dict.
    info_hash: ID,

    pub comment: Option<String>,

    pub created_by: Option<String>,

}

impl MetaInfo {

    pub fn new<P: AsRef<Path>>(path: P) -> Result<MetaInfo> {
        if path.as_ref().extension().unwrap_or_default() != "torrent" {
            return Err(MetaInfoError::InvalidExtension);
        }
        let metainfo = Self::from_bytes(&std::fs::read(path)?)?;
        tracing::debug!("metainfo loaded: {:?}", metainfo);
        Ok(metainfo)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MetaInfo> {
        let raw: RawMetaInfo = serde_bencode::from_bytes(bytes)?;

        let info_bytes = serde_bencode::to_bytes(&raw.info)?;
        let info: Info = serde_bencode::from_bytes(&info_bytes)?;
        let info_hash: ID = Sha1::digest(&info_bytes).into();

        if info.files.is_some() || info.length.is_none() {
            return Err(MetaInfoError::MultiFile);
        }
        if info.pieces.is_empty() || info.pieces.len() % 20 != 0 {
            return Err(MetaInfoError::InvalidPiecesLength);
        }
        if info.piece_length == 0 {
            return Err(MetaInfoError::ZeroPieceLength);
        }
        let length = info.length.unwrap_or_default();
        let num_pieces = (info.pieces.len() / 20) as u64;
        if length == 0
            || length > num_pieces * info.piece_length
            || length <= (num_pieces - 1) * info.piece_length
        {
            return Err(MetaInfoError::LengthMismatch(length));
        }

        let announce_list = raw.announce_list
            .unwrap_or_default()
            .into_iter()
            .map(|tier| tier
                .iter()
                .map(|url| Url::parse(url))
                .collect::<std::result::Result<Vec<Url>, _>>()
            )
            .collect::<std::result::Result<Vec<Vec<Url>>, _>>()?;

        Ok(MetaInfo {
            announce: Url::parse(&raw.announce)?,
            announce_list,
            info,
            info_hash,
            comment: raw.comment,
            created_by: raw.created_by,
        })
    }

    pub fn piece_hashes(&self) -> Vec<ID> {
        self.info.pieces
            .chunks_exact(20)
            .map(|c| {
                let mut hash = [0; 20];
                hash.copy_from_slice(c);
                hash
            })
            .collect()
    }

    pub fn piece_len(&self) -> usize { self.info.piece_length as usize }

    pub fn num_pieces(&self) -> u32 { self.info.pieces.len() as u32 / 20 }

    pub fn total_len(&self) -> u64 { self.info.length.unwrap_or(0) }

    pub fn info_hash(&self) -> ID { self.info_hash }

    pub fn name(&self) -> &str { &self.info.name }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    // The announce url followed by the announce-list tiers, without duplicates.
    pub fn tracker_urls(&self) -> Vec<Url> {
        let mut urls = vec![self.announce.clone()];
        for url in self.announce_list.iter().flatten() {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("announce", &self.announce.as_str())
            .field("info", &self.info)
            .field("info_hash", &self.info_hash_hex())
            .field("announce_list", &self.announce_list.iter()
                .map(|tier| tier.iter().map(Url::as_str).collect())
                .collect::<Vec<Vec<&str>>>()
            )
            .field("comment", &self.comment)
            .field("created_by", &self.created_by)
            .finish()
    }
}

// Dont want to print out the pieces field, so we implement Debug manually.
impl std::fmt::Debug for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Info")
            .field("name", &self.name)
            .field("num pieces", &(self.pieces.len() / 20))
            .field("piece_length", &self.piece_length)
            .field("length", &self.length)
            .finish()
    }
}
