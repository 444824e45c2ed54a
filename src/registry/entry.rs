//! Service records
//!
//! [`ServiceInfo`] is what a worker advertises. On the wire it is wrapped
//! in a version-tagged JSON record and validated again when read back, so
//! a malformed or foreign payload is rejected at the boundary instead of
//! flowing into selection.

use std::collections::BTreeSet;
use std::net::IpAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationError};

use super::key::validate_segment;

/// Record version written by this crate
pub const RECORD_VERSION: u32 = 1;

/// Where a service can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// IP address
    pub ip: IpAddr,

    /// Public hostname, preferred over the IP when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Port
    pub port: u16,
}

impl NetworkAddress {
    /// Create an address without hostname
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            hostname: None,
            port,
        }
    }

    /// Set the hostname
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Host clients should connect to
    pub fn connection_host(&self) -> String {
        match &self.hostname {
            Some(hostname) => hostname.clone(),
            None => self.ip.to_string(),
        }
    }
}

/// A registered worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Identifier, unique within its category
    pub id: String,

    /// Capability labels
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Network address
    pub address: NetworkAddress,

    /// Utilization, lower is more available
    pub load_factor: f64,
}

impl ServiceInfo {
    /// Create a service record with no tags
    pub fn new(id: impl Into<String>, address: NetworkAddress, load_factor: f64) -> Self {
        Self {
            id: id.into(),
            tags: BTreeSet::new(),
            address,
            load_factor,
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Replace the tag set
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this service qualifies for a request
    ///
    /// A service qualifies when every tag it carries is among the
    /// requested ones. No requested tags means every service qualifies.
    pub fn qualifies_for(&self, requested: Option<&BTreeSet<String>>) -> bool {
        match requested {
            Some(requested) => self.tags.is_subset(requested),
            None => true,
        }
    }

    /// Check the record before it is written or after it is read
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_segment("service id", &self.id)?;
        validate_tags(&self.tags)?;

        if !self.load_factor.is_finite() || self.load_factor < 0.0 {
            return Err(ValidationError::InvalidLoadFactor(self.load_factor));
        }

        if self.address.port == 0 {
            return Err(ValidationError::InvalidPort);
        }

        Ok(())
    }

    /// Encode as a versioned record
    pub fn encode(&self) -> Result<Bytes> {
        self.validate()?;

        let record = RecordRef {
            version: RECORD_VERSION,
            service: self,
        };
        let json = serde_json::to_vec(&record).map_err(|e| Error::codec(&self.id, e))?;
        Ok(Bytes::from(json))
    }

    /// Decode and validate a versioned record read from `key`
    pub fn decode(key: &str, payload: &[u8]) -> Result<Self> {
        let record: RecordOwned =
            serde_json::from_slice(payload).map_err(|e| Error::codec(key, e))?;

        if record.version != RECORD_VERSION {
            return Err(Error::codec(
                key,
                ValidationError::UnsupportedVersion(record.version),
            ));
        }

        record
            .service
            .validate()
            .map_err(|e| Error::codec(key, e))?;

        Ok(record.service)
    }
}

/// Reject blank tags and tags with surrounding whitespace
pub(crate) fn validate_tags<'a, I>(tags: I) -> std::result::Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a String>,
{
    for tag in tags {
        if tag.trim().is_empty() || tag.trim() != tag {
            return Err(ValidationError::MalformedTag(tag.clone()));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RecordRef<'a> {
    version: u32,
    #[serde(flatten)]
    service: &'a ServiceInfo,
}

#[derive(Deserialize)]
struct RecordOwned {
    version: u32,
    #[serde(flatten)]
    service: ServiceInfo,
}
