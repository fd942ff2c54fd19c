/// Data layer: subjects, cohort tables, and loading.
///
/// Architecture:
/// ```text
///  dataset .json          participant table .csv / .json / .parquet
///        │                          │
///        ▼                          ▼
///   ┌──────────┐              ┌──────────┐
///   │  loader   │              │  loader   │
///   └──────────┘              └──────────┘
///        │                          │
///        ▼                          ▼
///   ┌──────────┐   align rows  ┌──────────────────┐
///   │  Dataset  │ ────────────▶ │ CohortAssignment │
///   └──────────┘               └──────────────────┘
/// ```
pub mod loader;
pub mod model;

pub use loader::{dataset_from_json, load_cohort_table, load_dataset, DEFAULT_COHORT_COLUMN};
pub use model::{CohortAssignment, CohortTable, Dataset, MetadataValue, RepresentationKind, Subject};
