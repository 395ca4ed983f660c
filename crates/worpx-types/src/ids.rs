//! Identifiers used throughout Worpx.
//!
//! Ledger entities (channels, escrow deposits, mempool entries, batches,
//! disputes, reports) use UUIDv7 for time-ordered lexicographic sorting.
//! Agents are identified by the opaque string handed to us by the
//! registry, and chains by a closed enum.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::WorpxError;

/// Declares a UUIDv7-backed entity identifier with a display prefix.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a bilateral payment channel.
    ChannelId,
    "ch"
);
entity_id!(
    /// Identifier of an escrow deposit.
    EscrowId,
    "esc"
);
entity_id!(
    /// Identifier of an admitted mempool entry.
    EntryId,
    "tx"
);
entity_id!(
    /// Identifier of a settlement batch.
    BatchId,
    "batch"
);
entity_id!(
    /// Identifier of a dispute.
    DisputeId,
    "dsp"
);
entity_id!(
    /// Identifier of a reconciliation report.
    ReportId,
    "rcn"
);

// ---------------------------------------------------------------------------
// AgentId
// ---------------------------------------------------------------------------

/// Opaque identifier of an autonomous agent, issued by the agent registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Settlement chains supported by the external submission collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Base,
    Ethereum,
    Polygon,
    Solana,
}

impl Chain {
    /// All supported chains, in declaration order.
    pub const ALL: [Chain; 4] = [Chain::Base, Chain::Ethereum, Chain::Polygon, Chain::Solana];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Solana => "solana",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = WorpxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "ethereum" => Ok(Self::Ethereum),
            "polygon" => Ok(Self::Polygon),
            "solana" => Ok(Self::Solana),
            other => Err(WorpxError::UnknownChain(other.to_string())),
        }
    }
}

/// Token symbol (e.g., "USDC").
pub type Token = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_uniqueness_and_ordering() {
        let a = ChannelId::new();
        let b = ChannelId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn display_prefixes() {
        assert!(ChannelId::new().to_string().starts_with("ch:"));
        assert!(EscrowId::new().to_string().starts_with("esc:"));
        assert!(BatchId::new().to_string().starts_with("batch:"));
        assert!(DisputeId::new().to_string().starts_with("dsp:"));
    }

    #[test]
    fn chain_parse_and_display() {
        for chain in Chain::ALL {
            let parsed: Chain = chain.to_string().parse().unwrap();
            assert_eq!(parsed, chain);
        }
        assert_eq!("Polygon".parse::<Chain>().unwrap(), Chain::Polygon);
        assert!(matches!(
            "bitcoin".parse::<Chain>(),
            Err(WorpxError::UnknownChain(_))
        ));
    }

    #[test]
    fn chain_serializes_lowercase() {
        let json = serde_json::to_string(&Chain::Ethereum).unwrap();
        assert_eq!(json, "\"ethereum\"");
    }

    #[test]
    fn agent_id_display() {
        let agent = AgentId::from("agent-7");
        assert_eq!(agent.to_string(), "agent-7");
        assert_eq!(agent.as_str(), "agent-7");
    }
}
