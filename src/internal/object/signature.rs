//! Author/committer identity records attached to commits and tags: name, email, Unix timestamp,
//! and a numeric timezone offset, reproduced byte-for-byte so hashes stay stable across re-encode.

use std::fmt::Display;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which identity line a [`Signature`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Decode, Encode)]
pub enum SignatureType {
    Author,
    Committer,
    Tagger,
}

impl SignatureType {
    fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Author => "author",
            SignatureType::Committer => "committer",
            SignatureType::Tagger => "tagger",
        }
    }

    fn from_str_field(s: &str) -> Result<Self, GitError> {
        match s {
            "author" => Ok(SignatureType::Author),
            "committer" => Ok(SignatureType::Committer),
            "tagger" => Ok(SignatureType::Tagger),
            _ => Err(GitError::InvalidSignatureType(s.to_string())),
        }
    }
}

/// `Name <email> <unix-timestamp> <+HHMM|-HHMM>` identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Decode, Encode)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    /// Timezone offset in minutes, e.g. `+0800` is `480`.
    pub timezone_offset: i32,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_data().unwrap()))
    }
}

impl Signature {
    pub fn new(signature_type: SignatureType, name: String, email: String) -> Self {
        let now = chrono::Utc::now();
        Signature {
            signature_type,
            name,
            email,
            timestamp: now.timestamp(),
            timezone_offset: 0,
        }
    }

    /// Parse a line of the form `<type> <name> <<email>> <timestamp> <tz>`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let line = String::from_utf8(data)
            .map_err(|e| GitError::ConversionError(e.to_string()))?;
        let line = line.trim_end_matches(['\n', '\r']);

        let (field, rest) = line
            .split_once(' ')
            .ok_or_else(|| GitError::InvalidCommit("empty identity line".to_string()))?;
        let signature_type = SignatureType::from_str_field(field)?;

        let email_start = rest
            .find('<')
            .ok_or_else(|| GitError::InvalidCommit("missing '<' in identity".to_string()))?;
        let email_end = rest
            .find('>')
            .ok_or_else(|| GitError::InvalidCommit("missing '>' in identity".to_string()))?;

        let name = rest[..email_start].trim().to_string();
        let email = rest[email_start + 1..email_end].to_string();
        let tail = rest[email_end + 1..].trim();

        let mut parts = tail.split_whitespace();
        let timestamp = parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let timezone_offset = parts
            .next()
            .map(parse_tz_offset)
            .unwrap_or(0);

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            timezone_offset,
        })
    }

    /// Serialize back to the `<type> <name> <<email>> <timestamp> <tz>` line (no trailing
    /// newline; callers append separators between header fields).
    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let tz = format_tz_offset(self.timezone_offset);
        Ok(format!(
            "{} {} <{}> {} {}",
            self.signature_type.as_str(),
            self.name,
            self.email,
            self.timestamp,
            tz
        )
        .into_bytes())
    }
}

fn parse_tz_offset(s: &str) -> i32 {
    if s.len() != 5 {
        return 0;
    }
    let sign = if s.starts_with('-') { -1 } else { 1 };
    let hours = i32::from_str(&s[1..3]).unwrap_or(0);
    let minutes = i32::from_str(&s[3..5]).unwrap_or(0);
    sign * (hours * 60 + minutes)
}

fn format_tz_offset(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let abs = minutes.abs();
    format!("{}{:02}{:02}", sign, abs / 60, abs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_author_line() {
        let line = b"author Ada <a@x.com> 1700000000 +0800".to_vec();
        let sig = Signature::from_data(line.clone()).unwrap();
        assert_eq!(sig.name, "Ada");
        assert_eq!(sig.email, "a@x.com");
        assert_eq!(sig.timestamp, 1700000000);
        assert_eq!(sig.timezone_offset, 480);
        assert_eq!(sig.to_data().unwrap(), line);
    }

    #[test]
    fn negative_timezone_round_trips() {
        let line = b"committer Bob <b@x.com> 1700000000 -0530".to_vec();
        let sig = Signature::from_data(line.clone()).unwrap();
        assert_eq!(sig.timezone_offset, -330);
        assert_eq!(sig.to_data().unwrap(), line);
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(Signature::from_data(b"not an identity".to_vec()).is_err());
    }
}
