//! Peer wire protocol
//!
//! Exercise nodes talk to the collector in newline-delimited text. Data is
//! grouped into named sections, each introduced by a header line:
//!
//! ```text
//! *****[ UUID ]*****
//! 4c4c4544-0042-3510-8051-b7c04f543232
//! *****[ Routes IPv4 ]*****
//! 10.0.0.0/8
//! *****[ END ]*****
//! ```
//!
//! - [`framing`] turns raw bytes into [`Line`]s and encodes server directives
//! - [`SectionKind`] is the closed set of section names the collector knows

pub mod framing;

pub use framing::{header, SectionCodec, DEFAULT_MAX_LINE_LENGTH};

use std::fmt;

/// Goal types a node can report state for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GoalType {
    /// IPv4 routing table of a monitor node
    RoutesIpv4,
    /// IPv6 routing table of a monitor node
    RoutesIpv6,
    /// Traffic counters seen by a monitor node
    ReceivedTraffic,
    /// Import/export policy of the registry
    Neighbors,
    /// IPv4 prefixes registered for the ASN
    AsnIpv4,
    /// IPv6 prefixes registered for the ASN
    AsnIpv6,
    /// IPv4 prefixes reachable through the AS-SET
    AsSetIpv4,
    /// IPv6 prefixes reachable through the AS-SET
    AsSetIpv6,
}

impl GoalType {
    /// Get all goal types
    pub fn all() -> &'static [GoalType] {
        &[
            GoalType::RoutesIpv4,
            GoalType::RoutesIpv6,
            GoalType::ReceivedTraffic,
            GoalType::Neighbors,
            GoalType::AsnIpv4,
            GoalType::AsnIpv6,
            GoalType::AsSetIpv4,
            GoalType::AsSetIpv6,
        ]
    }

    /// Canonical section name, as stored and published
    pub fn name(&self) -> &'static str {
        match self {
            GoalType::RoutesIpv4 => "Routes IPv4",
            GoalType::RoutesIpv6 => "Routes IPv6",
            GoalType::ReceivedTraffic => "Received traffic",
            GoalType::Neighbors => "NEIGHBORS",
            GoalType::AsnIpv4 => "ASN IPv4",
            GoalType::AsnIpv6 => "ASN IPv6",
            GoalType::AsSetIpv4 => "AS-SET IPv4",
            GoalType::AsSetIpv6 => "AS-SET IPv6",
        }
    }

    /// Look up a goal type by section name, ignoring ASCII case
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|goal| goal.name().eq_ignore_ascii_case(name))
    }

    /// Whether this goal is reported by monitor nodes (as opposed to the registry)
    pub fn is_monitor(&self) -> bool {
        matches!(
            self,
            GoalType::RoutesIpv4 | GoalType::RoutesIpv6 | GoalType::ReceivedTraffic
        )
    }
}

impl fmt::Display for GoalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Known section names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    /// Node announces its identifier
    Uuid,
    /// Server asks the node to identify itself
    Id,
    /// Terminates a report
    End,
    /// Reported state for a goal
    Goal(GoalType),
    /// Answer to a registry query
    QueryResult,
    /// Answer to a registry update
    UpdateResult,
    /// Anything else, kept for diagnostics
    Unrecognized(String),
}

impl SectionKind {
    /// Classify a header name
    pub fn from_name(name: &str) -> Self {
        match name {
            "UUID" => SectionKind::Uuid,
            "ID" => SectionKind::Id,
            "END" => SectionKind::End,
            "QUERY-RESULT" => SectionKind::QueryResult,
            "UPDATE-RESULT" => SectionKind::UpdateResult,
            other => GoalType::from_name(other)
                .map(SectionKind::Goal)
                .unwrap_or_else(|| SectionKind::Unrecognized(other.to_string())),
        }
    }

    /// Name as it appears on the wire
    pub fn name(&self) -> &str {
        match self {
            SectionKind::Uuid => "UUID",
            SectionKind::Id => "ID",
            SectionKind::End => "END",
            SectionKind::Goal(goal) => goal.name(),
            SectionKind::QueryResult => "QUERY-RESULT",
            SectionKind::UpdateResult => "UPDATE-RESULT",
            SectionKind::Unrecognized(name) => name,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A `*****[ name ]*****` marker, carrying the name
    Header(String),
    /// Any other line, trailing whitespace removed
    Text(String),
}

/// A completed section: name and accumulated body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section kind
    pub kind: SectionKind,
    /// Body lines, each followed by `\n`
    pub body: String,
}

impl Section {
    /// Start an empty section
    pub fn open(name: &str) -> Self {
        Self {
            kind: SectionKind::from_name(name),
            body: String::new(),
        }
    }

    /// Append one body line
    pub fn push_line(&mut self, line: &str) {
        self.body.push_str(line);
        self.body.push('\n');
    }
}

/// Blocks the server writes to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `ID` immediately closed by `END`
    RequestIdentity,
    /// Registry query
    Query(String),
    /// Registry update
    Update(String),
}
