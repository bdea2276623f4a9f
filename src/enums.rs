use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a stored file represents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    #[default]
    Volume,
    SegmentationMask,
}

/// MRI acquisition sequence that a file contributes to a channel group.
///
/// The derived ordering is the canonical one: T1, T1ce, T2, FLAIR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelRole {
    T1,
    T1ce,
    T2,
    #[serde(rename = "FLAIR")]
    Flair,
}

impl ChannelRole {
    /// Every role a complete channel group has to provide.
    pub const REQUIRED: [ChannelRole; 4] = [
        ChannelRole::T1,
        ChannelRole::T1ce,
        ChannelRole::T2,
        ChannelRole::Flair,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelRole::T1 => "T1",
            ChannelRole::T1ce => "T1ce",
            ChannelRole::T2 => "T2",
            ChannelRole::Flair => "FLAIR",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::REQUIRED
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or(())
    }
}

/// Sample encoding announced in the `data_type` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataType {
    /// Normalized intensities, little-endian `f32` in [0, 1]
    Float32 = 1,
    /// Integer region labels, little-endian `u32`
    LabelU32 = 2,
}

impl DataType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(DataType::Float32),
            2 => Some(DataType::LabelU32),
            _ => None,
        }
    }

    /// Bytes per payload sample.
    pub fn sample_size(self) -> usize {
        4
    }
}

/// How a stored volume is turned into a wire blob.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Intensity,
    Labels,
}

impl Encoding {
    pub const ALL: [Encoding; 2] = [Encoding::Intensity, Encoding::Labels];

    pub fn data_type(self) -> DataType {
        match self {
            Encoding::Intensity => DataType::Float32,
            Encoding::Labels => DataType::LabelU32,
        }
    }
}
