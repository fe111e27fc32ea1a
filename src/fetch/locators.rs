// src/fetch/locators.rs
//
// Every element the portal flow touches. When the portal layout changes, this
// table is the only place that needs editing.

use std::fmt;

/// How far along an element must be before it counts as found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// In the DOM.
    Attached,
    /// In the DOM and laid out with a non-zero box.
    Visible,
}

/// A CSS selector plus which match to use, optionally narrowed to a descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub name: &'static str,
    pub css: &'static str,
    /// Zero-based index among all matches of `css`.
    pub nth: usize,
    /// Selector applied inside the `nth` match.
    pub descendant: Option<&'static str>,
    pub presence: Presence,
}

impl Locator {
    const fn visible(name: &'static str, css: &'static str) -> Self {
        Self {
            name,
            css,
            nth: 0,
            descendant: None,
            presence: Presence::Visible,
        }
    }

    const fn nth(mut self, nth: usize) -> Self {
        self.nth = nth;
        self
    }

    const fn within(mut self, descendant: &'static str) -> Self {
        self.descendant = Some(descendant);
        self
    }

    const fn attached(mut self) -> Self {
        self.presence = Presence::Attached;
        self
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.name, self.css)?;
        if self.nth > 0 {
            write!(f, " #{}", self.nth + 1)?;
        }
        if let Some(d) = self.descendant {
            write!(f, " > {d}")?;
        }
        f.write_str(")")
    }
}

// ─── login page ──────────────────────────────────────────────────────
pub const USERNAME: Locator = Locator::visible("username", r#"input[name="data[User][username]"]"#);
pub const PASSWORD: Locator = Locator::visible("password", "#UserPassword");
pub const SUBMIT: Locator = Locator::visible("submit", ".btn-primary");
pub const LOGGED_IN: Locator = Locator::visible("dashboard", "body.sidebar-mini").attached();

// ─── report navigation ───────────────────────────────────────────────
pub const REPORTS_MENU: Locator = Locator::visible("reports menu", "li.treeview").nth(1);
pub const REPORT_LINK: Locator = Locator::visible("report link", "ul.treeview-menu")
    .nth(1)
    .within("a");
pub const DATE_RANGE: Locator = Locator::visible("date range", "#PartsIndentDaterange");
pub const RANGE_START: Locator = Locator::visible("range start", r#"input[name="daterangepicker_start"]"#);
pub const RANGE_END: Locator = Locator::visible("range end", r#"input[name="daterangepicker_end"]"#);
pub const APPLY_RANGE: Locator = Locator::visible("apply range", ".applyBtn");
pub const DOWNLOAD: Locator = Locator::visible("download", "#myButton");

// ─── division selector (select2 widget) ──────────────────────────────
pub const DIVISION_SELECT: Locator = Locator::visible("division selector", ".select2-selection--single");
pub const DIVISION_OPTION_CSS: &str = ".select2-results__option";
pub const SECOND_DIVISION: Locator =
    Locator::visible("second division", DIVISION_OPTION_CSS).nth(1).attached();

/// The whole table, in the order the flow uses it.
pub const ALL: &[Locator] = &[
    USERNAME,
    PASSWORD,
    SUBMIT,
    LOGGED_IN,
    REPORTS_MENU,
    REPORT_LINK,
    DATE_RANGE,
    RANGE_START,
    RANGE_END,
    APPLY_RANGE,
    DOWNLOAD,
    DIVISION_SELECT,
    SECOND_DIVISION,
];

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;
    use std::collections::HashSet;

    #[test]
    fn every_selector_parses() {
        for loc in ALL {
            assert!(Selector::parse(loc.css).is_ok(), "bad selector in {loc}");
            if let Some(d) = loc.descendant {
                assert!(Selector::parse(d).is_ok(), "bad descendant in {loc}");
            }
        }
    }

    #[test]
    fn names_are_unique() {
        let names: HashSet<_> = ALL.iter().map(|l| l.name).collect();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn display_shows_position_and_descendant() {
        assert_eq!(
            REPORT_LINK.to_string(),
            "report link (ul.treeview-menu #2 > a)"
        );
        assert_eq!(PASSWORD.to_string(), "password (#UserPassword)");
    }
}
