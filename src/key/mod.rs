//! Sort-key machinery shared by sources, the merge heap and result assembly.
//!
//! Key columns of every batch that enters a scan are encoded once through a
//! scan-wide [`KeyConverter`] into Arrow's row format, so positions taken
//! from different batches compare by plain byte order.

mod owned;
mod position;

pub use owned::SortKey;
pub use position::{find_position, KeyConverter, SortableBatchPosition, SortingView};
