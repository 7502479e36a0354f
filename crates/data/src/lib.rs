//! Datasets and label-sorted client partitioning.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dataset;
pub mod partition;
pub mod synthetic;

pub use dataset::{Dataset, INSURANCE_COLUMNS, INSURANCE_CONTINUOUS};
pub use partition::{partition, ClientShard, ColumnStats, Federation, PartitionConfig};
pub use synthetic::linear_dataset;

/// Common imports for data handling.
pub mod prelude {
    pub use crate::{
        linear_dataset, partition, ClientShard, ColumnStats, Dataset, Federation,
        PartitionConfig, INSURANCE_COLUMNS, INSURANCE_CONTINUOUS,
    };
}
