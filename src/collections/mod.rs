//! Live handles onto stored objects and their collections.
//!
//! - [`Object`]: one row, resolved through its [`StoreHandle`](crate::StoreHandle)
//!   on every access.
//! - [`List`]: an ordered list property of one object.
//! - [`Results`]: every object of one type, in creation order.
//!
//! Handles never cache decoded data. Each one carries a [`Tracker`] that
//! remembers when it was last known to be valid so most accesses skip the
//! liveness lookup.

mod list;
mod object;
mod operations;
mod results;
mod tracker;

pub use list::{List, ListIter, ObjectIter};
pub use object::Object;
pub use operations::{apply_list_op, ListOp};
pub use results::{Results, ResultsIter};
pub use tracker::ChangeToken;

use crate::error::Result;
use crate::types::{RowKey, TableId};

/// A collection of objects that can be appended to a [`List`] in one step.
pub trait ObjectCollection {
    /// Table of the objects this collection yields, if it holds objects.
    fn element_table(&self) -> Option<TableId>;

    /// Keys of the collection's current members, in order.
    fn snapshot_keys(&self) -> Result<Vec<RowKey>>;
}
