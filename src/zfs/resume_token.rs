//! Resume-token codec.
//!
//! A resume token is an opaque blob produced by the volume manager that
//! encodes the exact parameters of a partially completed send. The tool
//! dumps the embedded nvlist when asked to dry-run a token send; this module
//! parses that dump into a structured record and cross-checks it against a
//! send request.
//!
//! Every field of a token is untrusted input: a peer supplying a crafted
//! token could otherwise coerce the sender into streaming a different
//! filesystem or into downgrading an encrypted raw send to plaintext.

use thiserror::Error;

use crate::zfs::path::DatasetPath;
use crate::zfs::version::decompose_version_string;

#[derive(Debug, Error)]
pub enum ResumeTokenError {
    /// The installed tool cannot decode resume tokens.
    #[error("zfs installation does not support resume token decoding")]
    DecodingNotSupported,
    /// The dump did not have the expected shape.
    #[error("resume token parsing error: {0}")]
    Parsing(String),
    /// The token decoded but is structurally inconsistent.
    #[error("resume token is corrupt: {0}")]
    Corrupt(String),
    /// Decoding could not be completed at all (e.g. the tool could not be
    /// run). Callers treat this conservatively.
    #[error("resume token decoding failed: {0}")]
    Other(String),
}

/// Decoded resume token. All fields originate from the peer and must be
/// validated before use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeToken {
    /// Target filesystem+snapshot of the interrupted send (`fs@snap`).
    pub to_name: String,
    pub from_guid: Option<u64>,
    pub to_guid: Option<u64>,
    pub raw_ok: bool,
    pub compress_ok: bool,
}

/// One reason a token does not describe the requested send operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenMismatch {
    #[error("filesystem in resume token `toname` = {token:?} does not match expected value {expected:?}")]
    Filesystem { token: String, expected: String },
    #[error("resume token not expected to be incremental, but `fromguid` = {0}")]
    UnexpectedFromGuid(u64),
    #[error("resume token expected to be incremental, but `fromguid` not present")]
    MissingFromGuid,
    #[error("resume token `fromguid` != expected: {token} != {expected}")]
    FromGuid { token: u64, expected: u64 },
    #[error("resume token does not have `toguid`")]
    MissingToGuid,
    #[error("resume token `toguid` != expected: {token} != {expected}")]
    ToGuid { token: u64, expected: u64 },
    #[error("resume token must have `rawok` and `compressok` set for an encrypted raw send")]
    MissingRawOk,
    #[error("resume token must not have `rawok` or `compressok` set for a plain send")]
    UnexpectedRawOk,
}

impl ResumeToken {
    /// Parse the combined output of a token dry-run (`zfs send -nvt`).
    ///
    /// The dump looks like
    ///
    /// ```text
    /// resume token contents:
    /// nvlist version: 0
    ///         fromguid = 0x595d9f81aa9dddab
    ///         object = 0x1
    ///         offset = 0x0
    ///         bytes = 0x400
    ///         toguid = 0x854f02a2dd32cf0d
    ///         toname = pool/work/a@b
    /// ```
    ///
    /// with flag entries such as `rawok = 1` present when set. Keys we do
    /// not know are skipped; `toname` and `toguid` are required for the
    /// token to be usable at all.
    pub fn parse_nv_output(output: &str) -> Result<Self, ResumeTokenError> {
        if !output.contains("resume token contents") {
            return Err(ResumeTokenError::Parsing(
                "output does not contain an nvlist dump".to_string(),
            ));
        }

        let mut token = ResumeToken::default();
        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once(" = ") else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "fromguid" => token.from_guid = Some(parse_guid(value)?),
                "toguid" => token.to_guid = Some(parse_guid(value)?),
                "toname" => token.to_name = value.to_string(),
                "rawok" => token.raw_ok = parse_flag(value)?,
                "compressok" => token.compress_ok = parse_flag(value)?,
                _ => {}
            }
        }

        if token.to_name.is_empty() {
            return Err(ResumeTokenError::Corrupt("missing `toname`".to_string()));
        }
        if token.to_guid.is_none() {
            return Err(ResumeTokenError::Corrupt("missing `toguid`".to_string()));
        }
        Ok(token)
    }

    /// The filesystem part of `toname`.
    pub fn to_name_split(&self) -> Result<(DatasetPath, String), ResumeTokenError> {
        let (fs, _kind, name) = decompose_version_string(&self.to_name)
            .map_err(|e| ResumeTokenError::Corrupt(e.to_string()))?;
        let fs = DatasetPath::parse(&fs).map_err(|e| ResumeTokenError::Corrupt(e.to_string()))?;
        Ok((fs, name))
    }

    /// Cross-check the token against the send operation the peer requested.
    ///
    /// `expected_from_guid` is the GUID of the request's `from` version (or
    /// `None` for a full send), `expected_to_guid` the GUID of its `to`
    /// version, both resolved against local datasets. `encrypted` is the
    /// request's encrypted-raw flag.
    pub fn validate_corresponds_to_send(
        &self,
        expected_fs: &str,
        expected_from_guid: Option<u64>,
        expected_to_guid: u64,
        encrypted: bool,
    ) -> Result<(), TokenMismatch> {
        let token_fs = match self.to_name.split_once(['@', '#']) {
            Some((fs, _)) => fs,
            None => self.to_name.as_str(),
        };
        if token_fs != expected_fs {
            return Err(TokenMismatch::Filesystem {
                token: token_fs.to_string(),
                expected: expected_fs.to_string(),
            });
        }

        match (self.from_guid, expected_from_guid) {
            (Some(token_guid), None) => return Err(TokenMismatch::UnexpectedFromGuid(token_guid)),
            (None, Some(_)) => return Err(TokenMismatch::MissingFromGuid),
            (Some(token_guid), Some(expected)) if token_guid != expected => {
                return Err(TokenMismatch::FromGuid {
                    token: token_guid,
                    expected,
                })
            }
            _ => {}
        }

        match self.to_guid {
            None => return Err(TokenMismatch::MissingToGuid),
            Some(token_guid) if token_guid != expected_to_guid => {
                return Err(TokenMismatch::ToGuid {
                    token: token_guid,
                    expected: expected_to_guid,
                })
            }
            Some(_) => {}
        }

        if encrypted {
            if !(self.raw_ok && self.compress_ok) {
                return Err(TokenMismatch::MissingRawOk);
            }
        } else if self.raw_ok || self.compress_ok {
            return Err(TokenMismatch::UnexpectedRawOk);
        }

        Ok(())
    }
}

fn parse_guid(value: &str) -> Result<u64, ResumeTokenError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let radix = if digits.len() < value.len() { 16 } else { 10 };
    u64::from_str_radix(digits, radix)
        .map_err(|_| ResumeTokenError::Parsing(format!("bad guid value {value:?}")))
}

fn parse_flag(value: &str) -> Result<bool, ResumeTokenError> {
    match value {
        "1" | "0x1" => Ok(true),
        "0" | "0x0" => Ok(false),
        other => Err(ResumeTokenError::Parsing(format!("bad flag value {other:?}"))),
    }
}
