//! Opaque file descriptor codec.
//!
//! The backend hands out file descriptors as URL-safe base64 strings with
//! zero-run compression over a little-endian binary payload. This module
//! decodes them into [`FileId`], re-encodes for tests and tooling, and
//! builds the [`InputLocation`] value a chunk fetch needs.
//!
//! The codec is pure: no I/O, no clocks, no globals.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::MalformedDescriptor;

/// Descriptor header flag: the payload describes a web location.
const WEB_LOCATION_FLAG: u32 = 1 << 24;

/// Descriptor header flag: a file reference follows the header.
const FILE_REFERENCE_FLAG: u32 = 1 << 25;

/// Mask selecting the type tag bits of the header.
const TYPE_MASK: u32 = (1 << 24) - 1;

/// Channel ids are stored with a -100… marker prefix; this strips it.
const CHANNEL_ID_MARKER: i64 = 1_000_000_000_000;

/// What kind of media a descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A chat or channel profile photo.
    ChatPhoto,
    /// A photo stored as media.
    Photo,
    /// Any document-backed media (files, video, audio).
    Document,
}

impl FileKind {
    fn from_tag(tag: u32) -> Result<Self, MalformedDescriptor> {
        match tag {
            1 => Ok(Self::ChatPhoto),
            2 => Ok(Self::Photo),
            5 => Ok(Self::Document),
            other => Err(MalformedDescriptor::UnknownType(other)),
        }
    }

    fn tag(self) -> u32 {
        match self {
            Self::ChatPhoto => 1,
            Self::Photo => 2,
            Self::Document => 5,
        }
    }
}

/// A decoded file descriptor.
///
/// `file_reference` is an opaque, time-limited token; it authorizes chunk
/// fetches and is refreshed by re-reading the stored message when the
/// upstream reports it expired. Every other field is stable for the
/// lifetime of the stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileId {
    /// Media kind, which selects the location shape.
    pub kind: FileKind,
    /// Datacenter the file's bytes live in.
    pub dc_id: u32,
    /// Media identifier.
    pub media_id: i64,
    /// Access hash paired with `media_id`.
    pub access_hash: i64,
    /// Opaque fetch authorization token. May expire.
    pub file_reference: Vec<u8>,
    /// Thumbnail size marker; empty requests the full file.
    pub thumb_size: String,
    /// Photo storage volume (photo and chat-photo kinds).
    pub volume_id: i64,
    /// Local id within the volume (photo and chat-photo kinds).
    pub local_id: i32,
    /// Owning chat (chat-photo kind only).
    pub chat_id: i64,
    /// Access hash of the owning chat (chat-photo kind only).
    pub chat_access_hash: i64,
    /// Whether the descriptor points at the full-size chat photo.
    pub big: bool,
}

impl FileId {
    /// Decode an opaque descriptor string.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedDescriptor`] when the envelope does not decode,
    /// the payload is truncated, or the type tag is not served.
    pub fn decode(descriptor: &str) -> Result<Self, MalformedDescriptor> {
        let packed = URL_SAFE_NO_PAD
            .decode(descriptor)
            .map_err(|_| MalformedDescriptor::Encoding)?;
        let payload = rle_decode(&packed);
        let mut r = Reader::new(&payload);

        let header = r.u32()?;
        if header & WEB_LOCATION_FLAG != 0 {
            return Err(MalformedDescriptor::WebLocation);
        }
        let kind = FileKind::from_tag(header & TYPE_MASK)?;
        let dc_id = r.u32()?;

        let file_reference = if header & FILE_REFERENCE_FLAG != 0 {
            let len = r.u16()? as usize;
            r.bytes(len)?.to_vec()
        } else {
            Vec::new()
        };

        let media_id = r.i64()?;
        let access_hash = r.i64()?;

        let (volume_id, local_id) = match kind {
            FileKind::Photo | FileKind::ChatPhoto => (r.i64()?, r.i32()?),
            FileKind::Document => (0, 0),
        };

        let (chat_id, chat_access_hash, big) = if kind == FileKind::ChatPhoto {
            (r.i64()?, r.i64()?, r.u8()? != 0)
        } else {
            (0, 0, false)
        };

        let thumb_size = match kind {
            FileKind::Document | FileKind::Photo => {
                let len = r.u8()? as usize;
                String::from_utf8_lossy(r.bytes(len)?).into_owned()
            }
            FileKind::ChatPhoto => String::new(),
        };

        Ok(Self {
            kind,
            dc_id,
            media_id,
            access_hash,
            file_reference,
            thumb_size,
            volume_id,
            local_id,
            chat_id,
            chat_access_hash,
            big,
        })
    }

    /// Encode back into the opaque descriptor string.
    pub fn encode(&self) -> String {
        let mut out = Vec::with_capacity(64);
        let mut header = self.kind.tag();
        if !self.file_reference.is_empty() {
            header |= FILE_REFERENCE_FLAG;
        }
        out.extend_from_slice(&header.to_le_bytes());
        out.extend_from_slice(&self.dc_id.to_le_bytes());
        if !self.file_reference.is_empty() {
            out.extend_from_slice(&(self.file_reference.len() as u16).to_le_bytes());
            out.extend_from_slice(&self.file_reference);
        }
        out.extend_from_slice(&self.media_id.to_le_bytes());
        out.extend_from_slice(&self.access_hash.to_le_bytes());
        match self.kind {
            FileKind::Photo | FileKind::ChatPhoto => {
                out.extend_from_slice(&self.volume_id.to_le_bytes());
                out.extend_from_slice(&self.local_id.to_le_bytes());
            }
            FileKind::Document => {}
        }
        if self.kind == FileKind::ChatPhoto {
            out.extend_from_slice(&self.chat_id.to_le_bytes());
            out.extend_from_slice(&self.chat_access_hash.to_le_bytes());
            out.push(u8::from(self.big));
        }
        match self.kind {
            FileKind::Document | FileKind::Photo => {
                out.push(self.thumb_size.len() as u8);
                out.extend_from_slice(self.thumb_size.as_bytes());
            }
            FileKind::ChatPhoto => {}
        }
        URL_SAFE_NO_PAD.encode(rle_encode(&out))
    }

    /// Build the chunk-fetch location for this file.
    pub fn location(&self) -> InputLocation {
        match self.kind {
            FileKind::Document => InputLocation::Document {
                media_id: self.media_id,
                access_hash: self.access_hash,
                file_reference: self.file_reference.clone(),
                thumb_size: self.thumb_size.clone(),
            },
            FileKind::Photo => InputLocation::Photo {
                media_id: self.media_id,
                access_hash: self.access_hash,
                file_reference: self.file_reference.clone(),
                thumb_size: self.thumb_size.clone(),
            },
            FileKind::ChatPhoto => {
                let peer = if self.chat_id > 0 {
                    Peer::User {
                        user_id: self.chat_id,
                        access_hash: self.chat_access_hash,
                    }
                } else if self.chat_access_hash != 0 {
                    Peer::Channel {
                        channel_id: channel_id_from(self.chat_id),
                        access_hash: self.chat_access_hash,
                    }
                } else {
                    Peer::Chat {
                        chat_id: -self.chat_id,
                    }
                };
                InputLocation::PeerPhoto {
                    peer,
                    volume_id: self.volume_id,
                    local_id: self.local_id,
                    big: self.big,
                }
            }
        }
    }

    /// Whether fetches should start at the reduced thumbnail chunk size.
    pub fn is_thumbnail(&self) -> bool {
        !self.thumb_size.is_empty()
    }
}

/// Upstream location of a file's bytes, shaped per media kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputLocation {
    /// Document-backed media.
    Document {
        media_id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
        thumb_size: String,
    },
    /// Stored photo.
    Photo {
        media_id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
        thumb_size: String,
    },
    /// Profile photo addressed through its owning peer.
    PeerPhoto {
        peer: Peer,
        volume_id: i64,
        local_id: i32,
        big: bool,
    },
}

/// The peer owning a profile photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "peer", rename_all = "snake_case")]
pub enum Peer {
    /// A user account.
    User { user_id: i64, access_hash: i64 },
    /// A basic group.
    Chat { chat_id: i64 },
    /// A channel or supergroup.
    Channel { channel_id: i64, access_hash: i64 },
}

/// Strip the -100… marker a channel id carries in chat contexts.
fn channel_id_from(chat_id: i64) -> i64 {
    -chat_id - CHANNEL_ID_MARKER
}

/// Expand zero runs: `0x00 n` decodes to `n` zero bytes.
fn rle_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied();
    while let Some(b) = iter.next() {
        if b == 0 {
            let count = iter.next().unwrap_or(0);
            out.extend(std::iter::repeat(0u8).take(count as usize));
        } else {
            out.push(b);
        }
    }
    out
}

/// Compress zero runs: `n` consecutive zeros encode as `0x00 n`.
fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0u8;
    for &b in data {
        if b == 0 {
            zeros += 1;
            if zeros == u8::MAX {
                out.push(0);
                out.push(zeros);
                zeros = 0;
            }
        } else {
            if zeros > 0 {
                out.push(0);
                out.push(zeros);
                zeros = 0;
            }
            out.push(b);
        }
    }
    if zeros > 0 {
        out.push(0);
        out.push(zeros);
    }
    out
}

/// Bounds-checked little-endian reader over the decoded payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], MalformedDescriptor> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(MalformedDescriptor::Truncated)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, MalformedDescriptor> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MalformedDescriptor> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, MalformedDescriptor> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, MalformedDescriptor> {
        let b = self.bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64, MalformedDescriptor> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(i64::from_le_bytes(buf))
    }
}
