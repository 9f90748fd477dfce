//! Common types used across homsearch

use crate::error::CommonError;
use serde::{Deserialize, Serialize};

/// Format tag assigned to a query record by format sniffing
///
/// Every query carries exactly one tag for its whole lifetime. The tag decides
/// the input file extension and which pipeline stages apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFormat {
    /// Multiple sequence alignment in Stockholm format
    StockholmMsa,
    /// Aligned FASTA (all sequences share one length)
    AlignedFasta,
    /// A single sequence, with or without a FASTA header
    PlainFasta,
    /// A3M alignment or unaligned multi-record FASTA
    A3m,
    /// Precomputed COMER profile
    ComerProfile,
    /// Precomputed COTHER profile
    CotherProfile,
}

impl QueryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryFormat::StockholmMsa => "stockholm",
            QueryFormat::AlignedFasta => "aligned_fasta",
            QueryFormat::PlainFasta => "plain_fasta",
            QueryFormat::A3m => "a3m",
            QueryFormat::ComerProfile => "comer_profile",
            QueryFormat::CotherProfile => "cother_profile",
        }
    }

    /// File extension of the per-query input file
    pub fn extension(&self) -> &'static str {
        match self {
            QueryFormat::StockholmMsa => "sto",
            QueryFormat::AlignedFasta => "afa",
            QueryFormat::PlainFasta => "fa",
            QueryFormat::A3m => "a3m",
            QueryFormat::ComerProfile => "pro",
            QueryFormat::CotherProfile => "tpro",
        }
    }

    /// Whether the query is already a profile and needs no search or construction
    pub fn is_profile(&self) -> bool {
        matches!(self, QueryFormat::ComerProfile | QueryFormat::CotherProfile)
    }

    /// Profile method a precomputed profile belongs to
    pub fn profile_method(&self) -> Option<Method> {
        match self {
            QueryFormat::ComerProfile => Some(Method::Comer),
            QueryFormat::CotherProfile => Some(Method::Cother),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueryFormat {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stockholm" | "sto" => Ok(QueryFormat::StockholmMsa),
            "aligned_fasta" | "afa" => Ok(QueryFormat::AlignedFasta),
            "plain_fasta" | "fa" | "fasta" => Ok(QueryFormat::PlainFasta),
            "a3m" => Ok(QueryFormat::A3m),
            "comer_profile" | "pro" => Ok(QueryFormat::ComerProfile),
            "cother_profile" | "tpro" => Ok(QueryFormat::CotherProfile),
            _ => Err(CommonError::UnknownFormat(s.to_string())),
        }
    }
}

/// Profile-construction method chosen for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// COMER profiles
    #[default]
    Comer,
    /// COTHER profiles, which also need a covariance file
    Cother,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Comer => "comer",
            Method::Cother => "cother",
        }
    }

    /// Extension of the profile file this method produces
    pub fn profile_extension(&self) -> &'static str {
        match self {
            Method::Comer => "pro",
            Method::Cother => "tpro",
        }
    }

    /// Marker that opens a profile file of this method
    pub fn profile_marker(&self) -> &'static str {
        match self {
            Method::Comer => "COMER profile",
            Method::Cother => "COTHER profile",
        }
    }

    pub fn needs_covariance(&self) -> bool {
        matches!(self, Method::Cother)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "comer" => Ok(Method::Comer),
            "cother" => Ok(Method::Cother),
            _ => Err(CommonError::UnknownMethod(s.to_string())),
        }
    }
}

/// Kind of artifact a pipeline stage records for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Alignment the profile was built from
    Msa,
    /// Constructed (or rewritten) profile
    Profile,
    /// Structural covariance file (COTHER only)
    Covariance,
    /// Effective number of sequences
    Neff,
    /// Profile-database search results
    Output,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Msa => "msa",
            ArtifactKind::Profile => "profile",
            ArtifactKind::Covariance => "covariance",
            ArtifactKind::Neff => "neff",
            ArtifactKind::Output => "output",
        }
    }

    pub fn all() -> [ArtifactKind; 5] {
        [
            ArtifactKind::Msa,
            ArtifactKind::Profile,
            ArtifactKind::Covariance,
            ArtifactKind::Neff,
            ArtifactKind::Output,
        ]
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ArtifactKind::all()
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| CommonError::UnknownArtifact(s.to_string()))
    }
}
