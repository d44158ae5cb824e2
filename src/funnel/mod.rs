// Module declarations
pub mod cleanup;
pub mod duplicates;
pub mod journey;
pub mod organize;
pub mod types;
pub mod validator;

pub use types::*;

pub use cleanup::{find_duplicate_groups, merge_duplicate_groups, plan_repoints, DuplicateGroup};
pub use duplicates::{button_preview, find_duplicate_candidates, DuplicateCandidate};
pub use journey::{link_cluster, plan_journey_links, validate_journey, JourneyLink};
pub use organize::{execute_organize_plan, plan_auto_organize, OrganizePlan};
pub use validator::{
    check_completeness, cluster_health, validate_cluster, validate_structure, ClusterHealth,
    ValidationResult,
};

/// Number of articles in a complete 3-2-1 cluster
pub const CLUSTER_SIZE: usize = 6;

/// Cluster position of the single BOFU article, which carries appointment booking
pub const BOFU_POSITION: i64 = 6;
