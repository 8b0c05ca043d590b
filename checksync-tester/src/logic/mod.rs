pub mod reports;
pub mod scenarios;
pub mod sim;
pub mod tester;

pub use scenarios::{Scenario, find_scenario, list_scenarios};
pub use tester::*;
