//! Behavioural scenarios for complete `provcheck` runs.

#[path = "common/test_constants.rs"]
mod test_constants;

mod harness;
