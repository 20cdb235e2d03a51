use std::fmt;
use std::net::IpAddr;

use serde::{Serialize, Serializer};
use url::Url;

use crate::error::CertCheckError;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A hostname usable both for TLS SNI and as a path segment of the
/// attestation API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Domain(String);

impl Domain {
    /// Parses host input such as `example.com`, `Example.COM.` or
    /// `https://example.com/path`, keeping only the lower-cased host.
    pub fn parse(input: &str) -> Result<Domain, CertCheckError> {
        let trimmed = input.trim();
        let host = if trimmed.contains("://") {
            let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
            url.host_str()
                .ok_or_else(|| invalid("URL has no host".to_string()))?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string()
        } else {
            trimmed.to_string()
        };

        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return Err(invalid("cannot be empty".to_string()));
        }
        if host.parse::<IpAddr>().is_ok() {
            return Ok(Domain(host));
        }
        if host.len() > MAX_NAME_LEN {
            return Err(invalid(format!("longer than {} characters", MAX_NAME_LEN)));
        }
        for label in host.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(invalid(format!("invalid label '{}'", label)));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(invalid(format!("label '{}' starts or ends with '-'", label)));
            }
            if !label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(invalid(format!("label '{}' has invalid characters", label)));
            }
        }
        Ok(Domain(host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// IP literals are dialed without SNI.
    pub fn is_ip_literal(&self) -> bool {
        self.0.parse::<IpAddr>().is_ok()
    }
}

fn invalid(reason: String) -> CertCheckError {
    CertCheckError::InvalidInput {
        field: "domain".to_string(),
        reason,
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
