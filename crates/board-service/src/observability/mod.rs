//! Observability for the board service: health probes and Prometheus metrics.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `board_sockets_active` | Gauge | none | Sockets connected to this node |
//! | `board_elections_total` | Counter | `outcome` | Syncer election results |
//! | `board_sweep_cleared_total` | Counter | `kind` | Dead-node entries reclaimed |
//! | `board_store_unavailable_total` | Counter | `operation` | Store calls skipped during outages |
//! | `board_store_latency_seconds` | Histogram | `operation` | Redis command latency |
//! | `board_recording_forwards_total` | Counter | `outcome` | Cross-node recording stops |
//! | `board_bus_resubscribes_total` | Counter | none | Cluster bus subscriptions re-established |
//! | `board_events_dropped_total` | Counter | none | Outbound events dropped on full queues |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
