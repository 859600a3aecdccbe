//! Journal Insight crate - thematic clustering, emotion trends, and digest
//! preparation over a caller-supplied set of entries.
//!
//! Nothing here touches the persisted index. Components hold no state between
//! calls and can be shared freely across concurrent callers.

pub mod cluster;
pub mod digest;
pub mod error;
pub mod trends;

pub use cluster::{kmeans, Cluster, ClusterConfig, Clusterer, KMeansOutcome, Partition};
pub use digest::ThemeDigest;
pub use error::InsightError;
pub use trends::{EmotionTrend, TagCount, TrendAggregator, DEFAULT_TREND_COUNT};
