//! Scenario banners.

use isolab::Scenario;

use super::colors::SemanticStyle;

/// Prints the heading shown once per scenario, before any target runs.
pub fn print_scenario_banner(scenario: Scenario) {
    let title = format!("◆ {}", scenario.name());
    println!();
    println!("{}", title.header());
    println!("  {}", scenario.description().muted());
    println!();
}
