//! Archived segment keys.
//!
//! A key names one immutable segment in object storage:
//!
//! ```text
//! STARTTS__ENDTS[__LABEL...][__TIER].ext
//! 20220101000000000000000__20220101000100000000000__DEFAULT__INST__HEALTH_STATUS__decom.bin
//! ```
//!
//! Both timestamps are fixed-width (see [`crate::timestamp`]) so sorting keys
//! lexically sorts them chronologically. The tier suffix is absent for raw
//! segments. The bucket key prefixes the file name with the remote directory
//! and the `YYYYMMDD` date of the first record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::timestamp::{format_date, format_timestamp, parse_timestamp};
use crate::{Error, Result};

pub const FIELD_SEPARATOR: &str = "__";
pub const RAW_EXTENSION: &str = "log";
pub const REDUCED_EXTENSION: &str = "bin";

/// Aggregation stage of a segment in the reduction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Raw,
    Decom,
    Minute,
    Hour,
    Day,
}

/// Registry patterns: the full file-name ending that marks each tracked tier.
const TIER_PATTERNS: [(Tier, &str); 3] = [
    (Tier::Decom, "__decom.bin"),
    (Tier::Minute, "__reduced_minute.bin"),
    (Tier::Hour, "__reduced_hour.bin"),
];

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Raw, Tier::Decom, Tier::Minute, Tier::Hour, Tier::Day];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Decom => "decom",
            Tier::Minute => "minute",
            Tier::Hour => "hour",
            Tier::Day => "day",
        }
    }

    /// Field appended to the key for this tier; `None` for raw segments.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Tier::Raw => None,
            Tier::Decom => Some("decom"),
            Tier::Minute => Some("reduced_minute"),
            Tier::Hour => Some("reduced_hour"),
            Tier::Day => Some("reduced_day"),
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            Tier::Raw => RAW_EXTENSION,
            _ => REDUCED_EXTENSION,
        }
    }

    /// Name component of the reduction set tracking this tier, if any.
    ///
    /// Raw segments are never reduced directly and day is terminal.
    pub fn reducer_set(self) -> Option<&'static str> {
        match self {
            Tier::Decom => Some("decom"),
            Tier::Minute => Some("minute"),
            Tier::Hour => Some("hour"),
            Tier::Raw | Tier::Day => None,
        }
    }

    /// The tier a segment of this tier is rolled up into.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Raw => Some(Tier::Decom),
            Tier::Decom => Some(Tier::Minute),
            Tier::Minute => Some(Tier::Hour),
            Tier::Hour => Some(Tier::Day),
            Tier::Day => None,
        }
    }

    /// Detects the tracked tier of a key from its file-name ending.
    ///
    /// Returns `Ok(None)` for keys no pattern matches (raw or day segments).
    /// A key matching more than one pattern is rejected rather than resolved.
    pub fn detect(key: &str) -> Result<Option<Tier>> {
        let mut matches = TIER_PATTERNS
            .iter()
            .filter(|(_, pattern)| key.ends_with(pattern))
            .map(|(tier, _)| *tier);
        let first = matches.next();
        if matches.next().is_some() {
            return Err(Error::InvalidKey(format!("{key} matches several tiers")));
        }
        Ok(first)
    }

    fn from_suffix(field: &str) -> Option<Tier> {
        Tier::ALL
            .into_iter()
            .find(|tier| tier.suffix() == Some(field))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Tier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == lower || tier.suffix() == Some(lower.as_str()))
            .ok_or_else(|| Error::UnknownTier(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub start_ns: u64,
    pub end_ns: u64,
    pub labels: Vec<String>,
    pub tier: Tier,
    pub extension: String,
}

impl SegmentKey {
    pub fn new(start_ns: u64, end_ns: u64, tier: Tier) -> Self {
        Self {
            start_ns,
            end_ns,
            labels: Vec::new(),
            tier,
            extension: tier.default_extension().to_string(),
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn scope(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    pub fn target(&self) -> Option<&str> {
        self.labels.get(1).map(String::as_str)
    }

    pub fn file_name(&self) -> Result<String> {
        let mut fields = vec![format_timestamp(self.start_ns)?, format_timestamp(self.end_ns)?];
        for label in &self.labels {
            validate_label(label)?;
            fields.push(label.clone());
        }
        if let Some(suffix) = self.tier.suffix() {
            fields.push(suffix.to_string());
        }
        if self.extension.is_empty() || self.extension.contains(['/', '.']) {
            return Err(Error::InvalidKey(format!("bad extension {:?}", self.extension)));
        }
        Ok(format!("{}.{}", fields.join(FIELD_SEPARATOR), self.extension))
    }

    /// Object-store key: `{remote_dir}/{YYYYMMDD}/{file_name}`.
    pub fn bucket_key(&self, remote_dir: &str) -> Result<String> {
        let date = format_date(self.start_ns)?;
        let file_name = self.file_name()?;
        let remote_dir = remote_dir.trim_end_matches('/');
        if remote_dir.is_empty() {
            Ok(format!("{date}/{file_name}"))
        } else {
            Ok(format!("{remote_dir}/{date}/{file_name}"))
        }
    }

    /// Parses a key, ignoring any directory prefix.
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = || Error::InvalidKey(key.to_string());
        let name = key.rsplit('/').next().unwrap_or(key);
        let (stem, extension) = name.rsplit_once('.').ok_or_else(invalid)?;
        if extension.is_empty() {
            return Err(invalid());
        }

        let mut fields: Vec<&str> = stem.split(FIELD_SEPARATOR).collect();
        if fields.len() < 2 {
            return Err(invalid());
        }
        let start_ns = parse_timestamp(fields[0]).map_err(|_| invalid())?;
        let end_ns = parse_timestamp(fields[1]).map_err(|_| invalid())?;
        if end_ns < start_ns {
            return Err(invalid());
        }

        let mut tier = Tier::Raw;
        if fields.len() > 2 {
            if let Some(found) = fields.last().and_then(|field| Tier::from_suffix(field)) {
                tier = found;
                fields.pop();
            }
        }
        let labels = fields[2..].iter().map(|s| s.to_string()).collect();

        Ok(Self {
            start_ns,
            end_ns,
            labels,
            tier,
            extension: extension.to_string(),
        })
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file_name() {
            Ok(name) => f.write_str(&name),
            Err(_) => write!(f, "<invalid key {}..{}>", self.start_ns, self.end_ns),
        }
    }
}

fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() || label.contains(FIELD_SEPARATOR) || label.contains(['/', '.']) {
        return Err(Error::InvalidKey(format!("bad label {label:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 1_640_995_200_000_000_000;
    const END: u64 = START + 60_000_000_000;

    #[test]
    fn raw_key_has_log_extension_and_no_suffix() {
        let key = SegmentKey::new(START, END, Tier::Raw).with_labels(["tlm"]);
        assert_eq!(
            key.file_name().unwrap(),
            "20220101000000000000000__20220101000100000000000__tlm.log"
        );
    }

    #[test]
    fn decom_key_parses_back() {
        let name = "20220101000000000000000__20220101000100000000000__S__T__P__decom.bin";
        let key = SegmentKey::parse(name).unwrap();
        assert_eq!(key.start_ns, START);
        assert_eq!(key.end_ns, END);
        assert_eq!(key.tier, Tier::Decom);
        assert_eq!(key.scope(), Some("S"));
        assert_eq!(key.target(), Some("T"));
        assert_eq!(key.file_name().unwrap(), name);
    }

    #[test]
    fn bucket_key_uses_first_record_date() {
        let key = SegmentKey::new(START, END, Tier::Minute).with_labels(["S", "T", "P"]);
        assert_eq!(
            key.bucket_key("S/reduced_minute_logs/tlm/T/").unwrap(),
            "S/reduced_minute_logs/tlm/T/20220101/\
             20220101000000000000000__20220101000100000000000__S__T__P__reduced_minute.bin"
        );
    }

    #[test]
    fn parse_ignores_directories() {
        let key = SegmentKey::parse(
            "a/b/20220101/20220101000000000000000__20220101000100000000000__S__T__reduced_hour.bin",
        )
        .unwrap();
        assert_eq!(key.tier, Tier::Hour);
        assert_eq!(key.labels, vec!["S", "T"]);
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(SegmentKey::parse("nonsense.log").is_err());
        assert!(SegmentKey::parse("20220101000100000000000__20220101000000000000000.log").is_err());
        assert!(SegmentKey::new(START, END, Tier::Raw)
            .with_labels(["a__b"])
            .file_name()
            .is_err());
    }

    #[test]
    fn tier_patterns_are_mutually_exclusive() {
        for (tier, pattern) in TIER_PATTERNS {
            let key = format!("x__y__S__T{pattern}");
            assert_eq!(Tier::detect(&key).unwrap(), Some(tier));
        }
        assert_eq!(Tier::detect("x__y__S__T.log").unwrap(), None);
        assert_eq!(Tier::detect("x__y__S__T__reduced_day.bin").unwrap(), None);
    }

    #[test]
    fn tier_from_str_is_case_insensitive_and_strict() {
        assert_eq!("DECOM".parse::<Tier>().unwrap(), Tier::Decom);
        assert_eq!("reduced_hour".parse::<Tier>().unwrap(), Tier::Hour);
        assert!(matches!("weekly".parse::<Tier>(), Err(Error::UnknownTier(_))));
    }

    #[test]
    fn tier_chain_ends_at_day() {
        let mut tier = Tier::Raw;
        let mut chain = vec![tier];
        while let Some(next) = tier.next() {
            chain.push(next);
            tier = next;
        }
        assert_eq!(chain, Tier::ALL.to_vec());
        assert_eq!(Tier::Day.reducer_set(), None);
    }
}
