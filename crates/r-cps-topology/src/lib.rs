//! ---
//! cps_section: "04-topology-analysis"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Indexed multigraph model of the distribution network with online analysis."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Power-system topology service.
//!
//! An indexed undirected multigraph of buses and branches supporting
//! connectivity analysis (electrical islands), shortest-path search,
//! structural-vulnerability analysis (critical lines and buses), loop
//! enumeration, radiality checks and power-flow tracing — all usable
//! online while branches open during a simulation.
//!
//! External bus and branch ids are opaque integers chosen by the driver;
//! internally every present bus gets a dense index so the algorithms run
//! on plain adjacency vectors.

pub mod analysis;
pub mod error;
pub mod graph;
pub mod trace;

pub use error::TopologyError;
pub use graph::{BranchId, BusId, Path, Topology};
