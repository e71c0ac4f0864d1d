//! Listing materialization and record extraction.

pub mod extract;
pub mod scroller;

pub use extract::{extract_groups, ExtractSettings};
pub use scroller::{scroll_until_settled, ScrollOutcome, ScrollSettings};
