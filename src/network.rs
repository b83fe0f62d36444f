// Network specifier for the export table
//
// The configured network scopes which hosts an export line permits. It must
// parse as CIDR; `0.0.0.0/0` renders as the NFS "all hosts" wildcard.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{ExportError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportNetwork {
    V4 { addr: Ipv4Addr, prefix: u8 },
    V6 { addr: Ipv6Addr, prefix: u8 },
    /// Anything that is not `<address>/<prefix>` for a known family
    Unsupported(String),
}

impl ExportNetwork {
    /// Classify a specifier without failing; see [`ExportNetwork::parse`].
    pub fn classify(spec: &str) -> Self {
        let unsupported = || ExportNetwork::Unsupported(spec.to_string());

        let Some((addr, prefix)) = spec.split_once('/') else {
            return unsupported();
        };
        // Reject signs and whitespace that u8::from_str would otherwise accept
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return unsupported();
        }
        let Ok(prefix) = prefix.parse::<u8>() else {
            return unsupported();
        };

        if let Ok(addr) = addr.parse::<Ipv4Addr>() {
            if prefix <= 32 {
                return ExportNetwork::V4 { addr, prefix };
            }
        } else if let Ok(addr) = addr.parse::<Ipv6Addr>() {
            if prefix <= 128 {
                return ExportNetwork::V6 { addr, prefix };
            }
        }
        unsupported()
    }

    /// Parse a CIDR specifier, failing with `InvalidNetwork` otherwise.
    pub fn parse(spec: &str) -> Result<Self> {
        match Self::classify(spec) {
            ExportNetwork::Unsupported(spec) => Err(ExportError::InvalidNetwork(spec)),
            network => Ok(network),
        }
    }

    pub fn is_all_hosts(&self) -> bool {
        match self {
            ExportNetwork::V4 { addr, prefix } => addr.is_unspecified() && *prefix == 0,
            ExportNetwork::V6 { .. } | ExportNetwork::Unsupported(_) => false,
        }
    }

    /// Host specifier written in front of the export options.
    pub fn export_host(&self) -> String {
        if self.is_all_hosts() {
            "*".to_string()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for ExportNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportNetwork::V4 { addr, prefix } => write!(f, "{}/{}", addr, prefix),
            ExportNetwork::V6 { addr, prefix } => write!(f, "{}/{}", addr, prefix),
            ExportNetwork::Unsupported(spec) => f.write_str(spec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let network = ExportNetwork::parse("10.0.0.0/24").unwrap();
        assert_eq!(
            network,
            ExportNetwork::V4 {
                addr: Ipv4Addr::new(10, 0, 0, 0),
                prefix: 24
            }
        );
        assert_eq!(network.export_host(), "10.0.0.0/24");
    }

    #[test]
    fn test_parse_ipv6() {
        let network = ExportNetwork::parse("fd00::/8").unwrap();
        assert!(matches!(network, ExportNetwork::V6 { prefix: 8, .. }));
        assert_eq!(network.export_host(), "fd00::/8");
    }

    #[test]
    fn test_all_hosts_sentinel() {
        let network = ExportNetwork::parse("0.0.0.0/0").unwrap();
        assert!(network.is_all_hosts());
        assert_eq!(network.export_host(), "*");

        assert!(!ExportNetwork::parse("0.0.0.0/8").unwrap().is_all_hosts());
        assert!(!ExportNetwork::parse("::/0").unwrap().is_all_hosts());
    }

    #[test]
    fn test_invalid_specifiers() {
        for spec in [
            "",
            "10.0.0.1",
            "10.0.0.0/33",
            "10.0.0.0/",
            "10.0.0.0/+8",
            "10.0.0/8",
            "fd00::/129",
            "host.example.com/24",
            "*",
        ] {
            assert!(
                matches!(ExportNetwork::parse(spec), Err(ExportError::InvalidNetwork(_))),
                "{spec:?} should be rejected"
            );
            assert_eq!(
                ExportNetwork::classify(spec),
                ExportNetwork::Unsupported(spec.to_string())
            );
        }
    }
}
