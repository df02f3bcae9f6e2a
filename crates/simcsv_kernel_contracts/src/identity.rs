#![forbid(unsafe_code)]

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Imsi(String);

impl Imsi {
    pub const MIN_DIGITS: usize = 6;
    pub const MAX_DIGITS: usize = 15;

    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() < Self::MIN_DIGITS || trimmed.len() > Self::MAX_DIGITS {
            return None;
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Imsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Iccid(String);

impl Iccid {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() < 18 || trimmed.len() > 22 {
            return None;
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Iccid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity read from the inserted card; either item may be unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CardIdentity {
    pub iccid: Option<Iccid>,
    pub imsi: Option<Imsi>,
}
