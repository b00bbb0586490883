//! Object tables.
//!
//! One table per object type. Rows are addressed by [`RowKey`](crate::RowKey)
//! and hold one [`Field`] per declared property; list properties live inline
//! in their parent row, so deleting the row drops its lists with it.

mod table;

pub use table::{Field, Row, Table};
