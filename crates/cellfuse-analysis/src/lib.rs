pub mod boundary;
pub mod eligibility;

pub use boundary::{Region, find_region, select_main_input};
pub use eligibility::is_fusable;
