//! Multiplexing of several data families into one sync exchange.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::{code, from_cbor, text, to_cbor, uint, Fields};
use ciborium::value::Value;
use std::fmt;

/// Kind of data carried by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataFamily {
    /// Log records.
    Logging,
    /// Endpoint configuration.
    Configuration,
    /// Notifications.
    Notification,
    /// Endpoint profile.
    Profile,
}

impl DataFamily {
    /// Converts to a numeric code for CBOR encoding.
    pub fn to_code(&self) -> u8 {
        match self {
            DataFamily::Logging => 1,
            DataFamily::Configuration => 2,
            DataFamily::Notification => 3,
            DataFamily::Profile => 4,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DataFamily::Logging),
            2 => Some(DataFamily::Configuration),
            3 => Some(DataFamily::Notification),
            4 => Some(DataFamily::Profile),
            _ => None,
        }
    }

    /// Lowercase name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            DataFamily::Logging => "logging",
            DataFamily::Configuration => "configuration",
            DataFamily::Notification => "notification",
            DataFamily::Profile => "profile",
        }
    }
}

impl fmt::Display for DataFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One family's encoded payload inside a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSection {
    /// Family the payload belongs to.
    pub family: DataFamily,
    /// Family-specific encoded message.
    pub payload: Vec<u8>,
}

/// Unit exchanged with the server per sync opportunity.
///
/// Carries at most one section per data family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncFrame {
    sections: Vec<FrameSection>,
}

impl SyncFrame {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a section. Fails if the family is already present.
    pub fn push(&mut self, family: DataFamily, payload: Vec<u8>) -> ProtocolResult<()> {
        if self.section(family).is_some() {
            return Err(ProtocolError::DuplicateSection {
                family: family.name(),
            });
        }
        self.sections.push(FrameSection { family, payload });
        Ok(())
    }

    /// Returns the payload for `family`, if present.
    pub fn section(&self, family: DataFamily) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|s| s.family == family)
            .map(|s| s.payload.as_slice())
    }

    /// All sections in insertion order.
    pub fn sections(&self) -> &[FrameSection] {
        &self.sections
    }

    /// Families present in the frame.
    pub fn families(&self) -> impl Iterator<Item = DataFamily> + '_ {
        self.sections.iter().map(|s| s.family)
    }

    /// Returns true if no family contributed a section.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let sections = self
            .sections
            .iter()
            .map(|s| {
                Value::Map(vec![
                    (text("family"), uint(u64::from(s.family.to_code()))),
                    (text("payload"), Value::Bytes(s.payload.clone())),
                ])
            })
            .collect();
        to_cbor(&Value::Map(vec![(text("sections"), Value::Array(sections))]))
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let value = from_cbor(bytes)?;
        let fields = Fields::of(&value, "frame")?;

        let mut frame = SyncFrame::new();
        for section in fields.array("sections")? {
            let section_fields = Fields::of(section, "frame section")?;
            let raw = code(section_fields.required("family")?, "family")?;
            let family = u8::try_from(raw)
                .ok()
                .and_then(DataFamily::from_code)
                .ok_or(ProtocolError::UnknownCode {
                    kind: "family",
                    code: raw,
                })?;
            let payload = section_fields
                .optional_bytes("payload")?
                .ok_or_else(|| ProtocolError::invalid_structure("frame section: missing payload"))?
                .to_vec();
            frame.push(family, payload)?;
        }
        Ok(frame)
    }
}
