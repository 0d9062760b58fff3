//! Structural block editing.
//!
//! - [`flatten`] - bounded depth-first walk of a block tree into [`FlatTree`]
//! - [`resolve_selector`] / [`resolve_single`] - selectors over the flat list
//! - [`plan_range`] / [`execute_plan`] - fingerprint-guarded range replacement

mod flatten;
mod range;
mod selector;

pub use flatten::{FlatTree, ScanLimits, flatten, list_all_children};
pub use range::{
    Anchor, RangeOutcome, RangePlan, RangeSpec, execute_plan, fingerprint, plan_range, revalidate,
};
pub use selector::{SelectorResolution, resolve_selector, resolve_single};
