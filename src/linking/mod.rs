//! Link suggestion, bottleneck rebalancing and in-body link injection.

pub mod bottleneck;
pub mod contextual;
pub mod markdown;
pub mod rejections;
pub mod suggestions;

pub use bottleneck::{
    apply_rebalance, detect_bottlenecks, generate_suggestions, inbound_counts, Bottleneck,
    BottleneckConfig, Severity, SmartLinkSuggestion,
};
pub use contextual::{inject_contextual_links, RelatedArticle};
pub use rejections::{JsonRejectionStore, MemoryRejectionStore, RejectionStore};
pub use suggestions::{
    apply_assignments, plan_bulk_apply, suggest_links, LinkAssignment, SmartSuggestion,
    SuggestionConfig,
};
