pub mod filter;

pub use filter::{run_filter, FilterArgs};
