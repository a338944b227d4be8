//! # Airpack Ledger
//!
//! Legal, ordered consumption against a user's data allowances.
//!
//! ## Allocation order
//!
//! Active allowances are spent soonest-expiring first, with never-expiring
//! allowances last, which minimizes capacity lost to expiry. Within one
//! allowance every write is a conditional update keyed on the record
//! version, so two concurrent allocations can never both spend the same
//! megabytes.

mod allocation;
mod ledger;

pub use allocation::{AllocationResult, AllocationSlice};
pub use ledger::{Ledger, LedgerConfig};
