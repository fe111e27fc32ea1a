// src/fetch/page.rs
//
// Read-only inspection of portal HTML, used for diagnostics.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use super::locators::DIVISION_OPTION_CSS;

static FLASH_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("#flashMessage, #authMessage, .alert, .message")
        .expect("flash message selector should parse")
});

static OPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(DIVISION_OPTION_CSS).expect("select2 option selector should parse")
});

fn collapse<'a>(text: impl Iterator<Item = &'a str>) -> String {
    text.flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First non-empty flash/alert message on the page, e.g. "Invalid username or password".
pub fn flash_message(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&FLASH_SELECTOR)
        .map(|el| collapse(el.text()))
        .find(|t| !t.is_empty())
}

/// Labels of the open select2 dropdown, in display order.
pub fn option_labels(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&OPTION_SELECTOR)
        .map(|el| collapse(el.text()))
        .collect()
}
