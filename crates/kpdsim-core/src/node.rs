//! Exchange-graph nodes.
//!
//! A node is either a donor-candidate pair, a non-directed donor, or a bridge
//! donor left behind by a realized chain. The variant carries the candidate
//! only for pairs; the donor list lives on the node itself because a pair's
//! donors survive the conversion to a bridge node.

use crate::candidate::Candidate;
use crate::donor::Donor;
use crate::types::NodeType;

/// Index of a node within the iteration pool.
pub type NodeIndex = usize;

/// Kind-specific payload of a [`Node`].
#[derive(Debug, Clone)]
pub enum NodeVariant {
    Pair { candidate: Candidate },
    Ndd,
    Bridge,
}

/// A node in the exchange graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable 1-based id, unique within an iteration.
    pub id: usize,
    /// Day the node entered the pool.
    pub arrival_time: u32,
    /// Ordered donor list; matches reference donors by index into this list.
    pub donors: Vec<Donor>,
    pub variant: NodeVariant,
}

impl Node {
    /// Donor-candidate pair. `donors` must be non-empty.
    pub fn pair(id: usize, arrival_time: u32, donors: Vec<Donor>, candidate: Candidate) -> Self {
        debug_assert!(!donors.is_empty());
        Node {
            id,
            arrival_time,
            donors,
            variant: NodeVariant::Pair { candidate },
        }
    }

    /// Non-directed donor node.
    pub fn ndd(id: usize, arrival_time: u32, donor: Donor) -> Self {
        Node {
            id,
            arrival_time,
            donors: vec![donor],
            variant: NodeVariant::Ndd,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self.variant {
            NodeVariant::Pair { .. } => NodeType::Pair,
            NodeVariant::Ndd => NodeType::Ndd,
            NodeVariant::Bridge => NodeType::Bridge,
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self.variant, NodeVariant::Pair { .. })
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match &self.variant {
            NodeVariant::Pair { candidate } => Some(candidate),
            _ => None,
        }
    }

    /// PRA of the paired candidate; zero for donor-only nodes.
    pub fn candidate_pra(&self) -> u32 {
        self.candidate().map_or(0, |c| c.pra)
    }

    pub fn donor_count(&self) -> usize {
        self.donors.len()
    }

    /// Converts the tail of a realized chain into a bridge donor. The donor
    /// list survives; the candidate (if this was a pair) leaves the graph.
    pub fn into_bridge(&mut self) {
        self.variant = NodeVariant::Bridge;
    }

    /// Candidate demographic columns, blank for donor-only nodes.
    pub fn candidate_csv_fields(&self) -> Vec<String> {
        match self.candidate() {
            Some(candidate) => candidate.csv_fields(),
            None => Candidate::empty_csv_fields(),
        }
    }
}
