//! Record codec — fixed-width on-disk layout for chains and links.
//!
//! Each store file is a header followed by packed records. No separators,
//! no checksums. All integers are little-endian.
//!
//! ```text
//! chains.bin  [ChainHeader: 8][Chain: 256] x count
//! links.bin   [LinkHeader: 8][Link: 16] x count
//! ```
//!
//! Chain record:
//! ```text
//! [name: 128][name_len: u8][kind: u8][min_days: u8][color: 3][id: u16]
//! [created: i64][stopped: i64][tags: 4 x 16][zero padding]
//! ```
//!
//! A tag slot is `[id << 5 | name_len: u8][name: 15]`; a zero first byte
//! marks the slot empty.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::calendar::timestamp_in_range;

/// Maximum chain name length in bytes.
pub const NAME_MAX: usize = 128;
/// Maximum number of tags per chain.
pub const MAX_TAGS: usize = 4;
/// Maximum tag name length in bytes (5-bit length field).
pub const TAG_NAME_MAX: usize = 15;
/// Tag ids are 3 bits wide; 0 means "no tag".
pub const TAG_ID_MAX: u8 = 7;

const CHAIN_SIZE: usize = 256;
const NAME_AT: usize = 0;
const NAME_LEN_AT: usize = NAME_AT + NAME_MAX;
const KIND_AT: usize = NAME_LEN_AT + 1;
const MIN_DAYS_AT: usize = KIND_AT + 1;
const COLOR_AT: usize = MIN_DAYS_AT + 1;
const ID_AT: usize = COLOR_AT + 3;
const CREATED_AT: usize = ID_AT + 2;
const STOPPED_AT: usize = CREATED_AT + 8;
const TAGS_AT: usize = STOPPED_AT + 8;
const TAG_SLOT: usize = 1 + TAG_NAME_MAX;

const LINK_SIZE: usize = 16;
const LINK_CHAIN_AT: usize = 0;
const LINK_TAGS_AT: usize = 2;
const LINK_TS_AT: usize = 8;

const HEADER_SIZE: usize = 8;

const _: () = assert!(TAGS_AT + MAX_TAGS * TAG_SLOT <= CHAIN_SIZE);
const _: () = assert!(TAG_NAME_MAX < 1 << 5);
const _: () = assert!(TAG_ID_MAX < 1 << 3);
const _: () = assert!(LINK_TS_AT + 8 == LINK_SIZE);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("name is empty")]
    EmptyName,

    #[error("name is {0} bytes (max {NAME_MAX})")]
    NameTooLong(usize),

    #[error("name is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown chain kind {0}")]
    UnknownKind(u8),

    #[error("min_days {min_days} invalid for {kind} chain")]
    InvalidMinDays { kind: &'static str, min_days: u8 },

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("invalid color {0:?}, expected #rrggbb")]
    InvalidColor(String),

    #[error("timestamp {0} outside years 1 to 9999")]
    TimestampOutOfRange(i64),
}

/// A fixed-size record that can be written into and read from a byte slice
/// of exactly `SIZE` bytes.
pub trait Record: Sized {
    const SIZE: usize;

    /// Encode into `buf`, which is `SIZE` bytes and zeroed.
    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Result<Self, CodecError>;
}

/// A file header. `count` is the number of records that follow it.
pub trait Header: Record + Default {
    fn count(&self) -> usize;
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), CodecError> {
    if buf.len() != expected {
        return Err(CodecError::Length {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(bytes)
}

/// Read a timestamp field, rejecting values the calendar cannot represent.
fn read_timestamp(buf: &[u8], at: usize) -> Result<i64, CodecError> {
    let ts = read_i64(buf, at);
    if !timestamp_in_range(ts) {
        return Err(CodecError::TimestampOutOfRange(ts));
    }
    Ok(ts)
}

fn write_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_i64(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

// ── Headers ──

/// Header of the chain file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainHeader {
    /// Next unused chain id. Never decreases, ids are never reused.
    pub id_counter: u16,
    pub count: u16,
}

impl Record for ChainHeader {
    const SIZE: usize = HEADER_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        write_u16(buf, 0, self.id_counter);
        write_u16(buf, 2, self.count);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            id_counter: read_u16(buf, 0),
            count: read_u16(buf, 2),
        })
    }
}

impl Header for ChainHeader {
    fn count(&self) -> usize {
        self.count as usize
    }
}

/// Header of the link file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHeader {
    pub count: u16,
}

impl Record for LinkHeader {
    const SIZE: usize = HEADER_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        write_u16(buf, 0, self.count);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            count: read_u16(buf, 0),
        })
    }
}

impl Header for LinkHeader {
    fn count(&self) -> usize {
        self.count as usize
    }
}

// ── Chain ──

/// Cadence of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Daily,
    /// Satisfied in any week with at least `min_days` links.
    Weekly { min_days: u8 },
}

impl ChainKind {
    pub fn weekly(min_days: u8) -> Result<Self, CodecError> {
        if !(1..=7).contains(&min_days) {
            return Err(CodecError::InvalidMinDays {
                kind: "weekly",
                min_days,
            });
        }
        Ok(Self::Weekly { min_days })
    }

    fn to_raw(self) -> (u8, u8) {
        match self {
            Self::Daily => (0, 0),
            Self::Weekly { min_days } => (1, min_days),
        }
    }

    fn from_raw(kind: u8, min_days: u8) -> Result<Self, CodecError> {
        match kind {
            0 if min_days == 0 => Ok(Self::Daily),
            0 => Err(CodecError::InvalidMinDays {
                kind: "daily",
                min_days,
            }),
            1 => Self::weekly(min_days),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// 24-bit RGB color, written as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const DEFAULT: Color = Color {
        r: 0x4c,
        g: 0xaf,
        b: 0x50,
    };
}

impl Default for Color {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        let invalid = || CodecError::InvalidColor(s.to_string());
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A chain-scoped tag. Links carry tags as a bitmap where bit `id - 1`
/// marks tag `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: u8,
    pub name: String,
}

impl Tag {
    pub fn new(id: u8, name: impl Into<String>) -> Result<Self, CodecError> {
        let name = name.into();
        if id == 0 || id > TAG_ID_MAX {
            return Err(CodecError::InvalidTag(format!("id {id} out of range")));
        }
        if name.is_empty() || name.len() > TAG_NAME_MAX {
            return Err(CodecError::InvalidTag(format!(
                "{name:?} must be 1 to {TAG_NAME_MAX} bytes"
            )));
        }
        Ok(Self { id, name })
    }

    /// Bit for this tag in a link's tag bitmap.
    pub fn bit(&self) -> u8 {
        1 << (self.id - 1)
    }
}

/// Validate a chain name for storage.
pub fn check_name(name: &str) -> Result<(), CodecError> {
    if name.is_empty() {
        return Err(CodecError::EmptyName);
    }
    if name.len() > NAME_MAX {
        return Err(CodecError::NameTooLong(name.len()));
    }
    Ok(())
}

/// A tracked habit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    pub id: u16,
    pub name: String,
    /// Creation time, epoch seconds.
    pub created: i64,
    pub kind: ChainKind,
    pub color: Color,
    pub tags: Vec<Tag>,
    /// Retirement time, epoch seconds. `None` while active.
    pub stopped: Option<i64>,
}

impl Chain {
    pub fn is_active(&self) -> bool {
        self.stopped.is_none()
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// Resolve tag names into a link tag bitmap.
    pub fn tag_bits<S: AsRef<str>>(&self, names: &[S]) -> Result<u8, CodecError> {
        names.iter().try_fold(0u8, |bits, name| {
            let name = name.as_ref();
            self.tag(name).map(|t| bits | t.bit()).ok_or_else(|| {
                CodecError::InvalidTag(format!("{name:?} is not a tag of {}", self.name))
            })
        })
    }
}

impl Record for Chain {
    const SIZE: usize = CHAIN_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        let name = self.name.as_bytes();
        let name_len = name.len().min(NAME_MAX);
        buf[NAME_AT..NAME_AT + name_len].copy_from_slice(&name[..name_len]);
        buf[NAME_LEN_AT] = name_len as u8;

        let (kind, min_days) = self.kind.to_raw();
        buf[KIND_AT] = kind;
        buf[MIN_DAYS_AT] = min_days;
        buf[COLOR_AT..COLOR_AT + 3].copy_from_slice(&[self.color.r, self.color.g, self.color.b]);
        write_u16(buf, ID_AT, self.id);
        write_i64(buf, CREATED_AT, self.created);
        write_i64(buf, STOPPED_AT, self.stopped.unwrap_or(0));

        for (slot, tag) in self.tags.iter().take(MAX_TAGS).enumerate() {
            let at = TAGS_AT + slot * TAG_SLOT;
            let tag_name = tag.name.as_bytes();
            let len = tag_name.len().min(TAG_NAME_MAX);
            buf[at] = (tag.id << 5) | len as u8;
            buf[at + 1..at + 1 + len].copy_from_slice(&tag_name[..len]);
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        check_len(buf, Self::SIZE)?;

        let name_len = buf[NAME_LEN_AT] as usize;
        if name_len > NAME_MAX {
            return Err(CodecError::NameTooLong(name_len));
        }
        let name = std::str::from_utf8(&buf[NAME_AT..NAME_AT + name_len])
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();

        let mut tags = Vec::new();
        for slot in 0..MAX_TAGS {
            let at = TAGS_AT + slot * TAG_SLOT;
            let meta = buf[at];
            if meta == 0 {
                continue;
            }
            let len = (meta & 0x1f) as usize;
            let tag_name = std::str::from_utf8(&buf[at + 1..at + 1 + len])
                .map_err(|_| CodecError::InvalidUtf8)?;
            tags.push(Tag::new(meta >> 5, tag_name)?);
        }

        let stopped = read_timestamp(buf, STOPPED_AT)?;
        Ok(Self {
            id: read_u16(buf, ID_AT),
            name,
            created: read_timestamp(buf, CREATED_AT)?,
            kind: ChainKind::from_raw(buf[KIND_AT], buf[MIN_DAYS_AT])?,
            color: Color {
                r: buf[COLOR_AT],
                g: buf[COLOR_AT + 1],
                b: buf[COLOR_AT + 2],
            },
            tags,
            stopped: (stopped != 0).then_some(stopped),
        })
    }
}

// ── Link ──

/// One completion mark: chain `chain_id` was done on the local day whose
/// midnight is `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Link {
    pub chain_id: u16,
    /// Bit `k` set means the chain tag with id `k + 1` applies.
    pub tags: u8,
    pub timestamp: i64,
}

impl Link {
    pub fn new(chain_id: u16, timestamp: i64) -> Self {
        Self {
            chain_id,
            tags: 0,
            timestamp,
        }
    }
}

impl Record for Link {
    const SIZE: usize = LINK_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        write_u16(buf, LINK_CHAIN_AT, self.chain_id);
        buf[LINK_TAGS_AT] = self.tags;
        write_i64(buf, LINK_TS_AT, self.timestamp);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        check_len(buf, Self::SIZE)?;
        Ok(Self {
            chain_id: read_u16(buf, LINK_CHAIN_AT),
            tags: buf[LINK_TAGS_AT],
            timestamp: read_timestamp(buf, LINK_TS_AT)?,
        })
    }
}
