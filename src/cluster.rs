//! Cluster address book.
//!
//! Parses the comma-separated `host:port` list naming the cluster members and
//! derives reduced lists when a member is taken out of rotation. Lists are
//! immutable once built; removal produces a new list.

use std::fmt;

use thiserror::Error;

/// A single cluster member address.
///
/// The port is kept as an opaque string: the harness only compares it for
/// equality and splices it back into the wire format. Ports are assumed
/// unique within one cluster's address list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Endpoint {
            host: host.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A malformed item in a cluster address list.
///
/// An item without a colon is fatal configuration: the harness cannot guess
/// a port.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid cluster address {0:?}: expected host:port")]
pub struct AddressParseError(pub String);

/// Ordered, immutable list of cluster member endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressList(Vec<Endpoint>);

impl AddressList {
    /// Parse a comma-separated `host:port` list, preserving input order.
    /// Splits each item on its first colon.
    pub fn parse(text: &str) -> Result<Self, AddressParseError> {
        let mut endpoints = Vec::new();
        for item in text.split(',') {
            match item.split_once(':') {
                Some((host, port)) => endpoints.push(Endpoint::new(host, port)),
                None => return Err(AddressParseError(item.to_string())),
            }
        }
        Ok(AddressList(endpoints))
    }

    /// A list containing exactly one endpoint, for direct connections.
    pub fn single(endpoint: Endpoint) -> Self {
        AddressList(vec![endpoint])
    }

    /// Exact inverse of `parse` for well-formed lists.
    pub fn serialize(&self) -> String {
        self.0
            .iter()
            .map(Endpoint::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// A new list with every endpoint whose port equals `port` removed.
    pub fn without_port(&self, port: &str) -> AddressList {
        AddressList(self.0.iter().filter(|e| e.port != port).cloned().collect())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
