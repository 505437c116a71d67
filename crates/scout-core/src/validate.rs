//! Target classification and validation.
//!
//! A submitted target is either an IP address or a DNS name. The rules are
//! deliberately stricter than the standard library parsers for dotted-quad
//! input: any octet-style string that reasonable validators disagree on
//! (leading zeros, out-of-range octets, wrong octet count) is refused instead
//! of canonicalised.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::types::TargetKind;

pub const MAX_HOSTNAME_LEN: usize = 253;
pub const MAX_LABEL_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target required")]
    Empty,

    #[error("'{0}' is not a valid IPv4 address")]
    MalformedIpv4(String),

    #[error("hostname must be between 1 and {MAX_HOSTNAME_LEN} characters")]
    BadLength,

    #[error("'{0}' could not be converted to an ASCII hostname")]
    IdnaFailed(String),

    #[error("hostname contains an empty label")]
    EmptyLabel,

    #[error("'{0}' is not a valid hostname label")]
    BadLabel(String),

    #[error("single-label hostnames are not allowed")]
    SingleLabel,

    #[error("top-level label cannot be all digits")]
    NumericTld,
}

/// A target that passed validation, with its classification and the
/// normalized form every downstream component uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTarget {
    pub kind: TargetKind,
    pub normalized: String,
}

/// Classify and normalize a raw target string.
///
/// Rule order matters: IP parsing is attempted first (with an IPv6 zone
/// suffix stripped), then digits-and-dots strings are rejected as malformed
/// IPv4, and only then is the string treated as a DNS name.
pub fn validate_target(raw: &str, allow_single_label: bool) -> Result<ValidatedTarget, TargetError> {
    let target = raw.trim();
    if target.is_empty() {
        return Err(TargetError::Empty);
    }

    // A zone suffix (fe80::1%eth0) is not part of the address.
    let ip_candidate = target.split('%').next().unwrap_or(target);
    if let Some(ip) = parse_ip_strict(ip_candidate) {
        return Ok(ValidatedTarget {
            kind: TargetKind::Ip,
            normalized: ip.to_string(),
        });
    }

    if target.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return Err(TargetError::MalformedIpv4(target.to_string()));
    }

    validate_hostname(target, allow_single_label)
}

fn parse_ip_strict(s: &str) -> Option<IpAddr> {
    if s.contains(':') {
        return s.parse::<Ipv6Addr>().ok().map(IpAddr::V6);
    }
    parse_ipv4_strict(s).map(IpAddr::V4)
}

/// Exactly four decimal octets in [0,255], no leading zero on multi-digit
/// octets. The std parser happens to agree today; spelling the rules out keeps
/// the contract independent of parser quirks.
fn parse_ipv4_strict(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in s.split('.') {
        if count == 4 {
            return None;
        }
        if part.is_empty() || part.len() > 3 {
            return None;
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if part.len() > 1 && part.starts_with('0') {
            return None;
        }
        let value: u16 = part.parse().ok()?;
        if value > 255 {
            return None;
        }
        octets[count] = value as u8;
        count += 1;
    }
    if count != 4 {
        return None;
    }
    Some(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
}

fn validate_hostname(raw: &str, allow_single_label: bool) -> Result<ValidatedTarget, TargetError> {
    // One trailing dot (fully-qualified form) is tolerated and stripped.
    let name = raw.strip_suffix('.').unwrap_or(raw);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return Err(TargetError::BadLength);
    }

    let ascii =
        idna::domain_to_ascii(name).map_err(|_| TargetError::IdnaFailed(name.to_string()))?;
    if ascii.is_empty() || ascii.len() > MAX_HOSTNAME_LEN {
        return Err(TargetError::BadLength);
    }
    if ascii.starts_with('.') || ascii.ends_with('.') || ascii.contains("..") {
        return Err(TargetError::EmptyLabel);
    }

    let labels: Vec<&str> = ascii.split('.').collect();
    for label in &labels {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(TargetError::BadLabel((*label).to_string()));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(TargetError::BadLabel((*label).to_string()));
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(TargetError::BadLabel((*label).to_string()));
        }
    }

    if !allow_single_label && labels.len() < 2 {
        return Err(TargetError::SingleLabel);
    }

    // An all-digit rightmost label would be indistinguishable from a truncated
    // IP address.
    let last = labels.last().expect("at least one label");
    if last.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TargetError::NumericTld);
    }

    Ok(ValidatedTarget {
        kind: TargetKind::Dns,
        normalized: ascii,
    })
}
