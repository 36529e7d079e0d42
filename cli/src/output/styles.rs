//! Terminal palette for deployment output.

use owo_colors::Style;

/// One style per kind of line the CLI prints. Everything is plain unless the
/// sheet comes from [`Styles::colored`].
#[derive(Default, Clone, Copy)]
pub struct Styles {
    /// Finished steps and environments that went live.
    pub done: Style,
    /// Completed with caveats: unverified health, leftover instances.
    pub warning: Style,
    /// Environments that failed.
    pub failed: Style,
    /// Rollbacks that need an operator.
    pub critical: Style,
    /// In-progress step markers.
    pub step: Style,
    /// Keys in `key  value` listings.
    pub key: Style,
    pub heading: Style,
}

impl Styles {
    #[must_use]
    pub fn colored() -> Self {
        Self {
            done: Style::new().green(),
            warning: Style::new().yellow(),
            failed: Style::new().red(),
            critical: Style::new().bold().red(),
            step: Style::new().cyan(),
            key: Style::new().dimmed(),
            heading: Style::new().bold(),
        }
    }
}
