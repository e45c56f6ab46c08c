//! ---
//! cps_section: "04-topology-analysis"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Indexed multigraph model of the distribution network with online analysis."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use thiserror::Error;

use crate::graph::BusId;

/// Constructive errors surfaced by [`crate::Topology::build`]. Runtime
/// lookups never error; they return `None`/`false`/empty results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("branch id list ({branch_ids}) and endpoint list ({endpoints}) differ in length")]
    LengthMismatch { branch_ids: usize, endpoints: usize },
    #[error("bus {0} appears more than once in the bus list")]
    DuplicateBus(BusId),
}
