use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use adnoto_core::text::{ellipsize, similar_titles};
use adnoto_core::{parse_currency, MerchantSignature, Milliunits, Order};

use crate::email::ParsedEmail;

// ── Compiled pattern caches ──────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

macro_rules! sel {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Selector {
            static S: OnceLock<Selector> = OnceLock::new();
            S.get_or_init(|| Selector::parse($pat).expect("invalid selector"))
        }
    };
}

re!(re_currency, r"\$\s*([\d,]+\.?\d*)");
re!(re_quantity, r"(?i)\b(?:qty|quantity)\s*[:.]?\s*\d+");

sel!(sel_cost_breakdown, r#"table[id$="costBreakdownRight"] td"#);
sel!(sel_item_rows, r#"table[id$="itemDetails"] tr"#);
sel!(sel_row_font, "font");
sel!(sel_text_cells, "td, span, div");
sel!(sel_images_with_alt, "img[alt]");
sel!(sel_links, "a");

// ── Extractor ────────────────────────────────────────────────────────────────

/// Turns one order-confirmation email into a normalized [`Order`].
pub struct OrderExtractor {
    signature: MerchantSignature,
    max_item_length: usize,
}

impl OrderExtractor {
    pub fn new(signature: MerchantSignature, max_item_length: usize) -> Self {
        OrderExtractor { signature, max_item_length }
    }

    /// Extract an order, or `None` when the message is not an order
    /// confirmation or no usable total/items can be recovered. Never fails
    /// hard; the reason for a rejection is logged.
    pub fn extract(&self, email: &ParsedEmail) -> Option<Order> {
        if !self.signature.matches_email(&email.sender, &email.subject) {
            debug!(subject = %email.subject, "ignoring non-order email");
            return None;
        }
        if email.body.trim().is_empty() {
            warn!(subject = %email.subject, "email body is empty, skipping");
            return None;
        }

        let doc = Html::parse_document(&email.body);

        let Some(amount) = extract_amount(&doc) else {
            warn!(subject = %email.subject, "could not parse an order total");
            return None;
        };

        let items = extract_items(&doc);
        if items.is_empty() {
            warn!(subject = %email.subject, "no items found in email");
            return None;
        }
        let items: Vec<String> = items
            .into_iter()
            .map(|title| ellipsize(&title, self.max_item_length))
            .collect();

        info!(count = items.len(), total = %amount, date = %email.received, "extracted order");

        Some(Order {
            date: email.received,
            amount: -amount,
            items,
            source_ref: email.source_ref.clone(),
        })
    }
}

// ── Amount strategies ────────────────────────────────────────────────────────

/// Strategies are tried in order; the first positive total wins.
fn extract_amount(doc: &Html) -> Option<Milliunits> {
    amount_from_cost_table(doc)
        .or_else(|| amount_from_total_label(doc))
        .or_else(|| amount_from_last_currency(doc))
}

/// The structured cost-breakdown cell most order templates carry.
fn amount_from_cost_table(doc: &Html) -> Option<Milliunits> {
    let cell = doc.select(sel_cost_breakdown()).next()?;
    currency_in(&element_text(cell))
}

/// Find a "Total"-labeled element and read the price from its neighbor.
fn amount_from_total_label(doc: &Html) -> Option<Milliunits> {
    for el in doc.select(sel_text_cells()) {
        let text = element_text(el);
        if !(text.contains("Order Total") || text.contains("Total:")) {
            continue;
        }
        let Some(next) = next_element(el) else { continue };
        if let Some(amount) = currency_in(&element_text(next)) {
            return Some(amount);
        }
    }
    None
}

/// Last currency-formatted substring in the document; in typical templates
/// the grand total is the final amount printed.
fn amount_from_last_currency(doc: &Html) -> Option<Milliunits> {
    let text = document_text(doc);
    re_currency()
        .captures_iter(&text)
        .filter_map(|c| parse_currency(c.get(1)?.as_str()))
        .filter(|m| m.raw() > 0)
        .last()
}

/// First positive currency amount inside `text`.
fn currency_in(text: &str) -> Option<Milliunits> {
    let captures = re_currency().captures(text)?;
    parse_currency(captures.get(1)?.as_str()).filter(|m| m.raw() > 0)
}

// ── Item strategies ──────────────────────────────────────────────────────────

const PLAUSIBLE_TITLE_CHARS: std::ops::RangeInclusive<usize> = 10..=120;

const GENERIC_IMAGE_TERMS: &[&str] = &["amazon", "logo", "prime", "arrow", "button", "spacer"];

const GENERIC_LINK_PHRASES: &[&str] = &[
    "view or manage order",
    "your orders",
    "order details",
    "your account",
    "learn more",
    "contact us",
    "unsubscribe",
    "privacy",
    "conditions of use",
];

/// Strategies are tried in order; the first that yields any item wins.
/// Candidates similar to an already accepted title are dropped.
fn extract_items(doc: &Html) -> Vec<String> {
    let strategies: [fn(&Html) -> Vec<String>; 4] = [
        items_from_detail_table,
        items_from_image_alt,
        items_from_links,
        items_from_quantity_cells,
    ];
    for strategy in strategies {
        let items = dedup_similar(strategy(doc));
        if !items.is_empty() {
            return items;
        }
    }
    Vec::new()
}

/// The structured item-details table, reading each row's display text.
fn items_from_detail_table(doc: &Html) -> Vec<String> {
    let mut items = Vec::new();
    for row in doc.select(sel_item_rows()) {
        let title: String = row.select(sel_row_font()).flat_map(|f| f.text()).collect();
        let title = collapse_truncated_tail(title.trim());
        if !title.is_empty() {
            items.push(title);
        }
    }
    items
}

/// Product images usually carry the title as alternate text.
fn items_from_image_alt(doc: &Html) -> Vec<String> {
    doc.select(sel_images_with_alt())
        .filter_map(|img| img.value().attr("alt"))
        .map(str::trim)
        .filter(|alt| plausible_title(alt) && !generic_image_alt(alt))
        .map(str::to_string)
        .collect()
}

/// Product links, skipping navigational boilerplate.
fn items_from_links(doc: &Html) -> Vec<String> {
    doc.select(sel_links())
        .map(element_text)
        .filter(|text| plausible_title(text))
        .filter(|text| {
            let lower = text.to_lowercase();
            !GENERIC_LINK_PHRASES.iter().any(|phrase| lower.contains(phrase))
        })
        .collect()
}

/// Elements next to a quantity indicator ("Qty: 1"), skipping price rows.
fn items_from_quantity_cells(doc: &Html) -> Vec<String> {
    let mut items = Vec::new();
    for el in doc.select(sel_text_cells()) {
        if !re_quantity().is_match(&element_text(el)) {
            continue;
        }
        for neighbor in [next_element(el), prev_element(el)].into_iter().flatten() {
            let text = element_text(neighbor);
            if plausible_title(&text) && !price_noise(&text) {
                items.push(text);
                break;
            }
        }
    }
    items
}

fn plausible_title(text: &str) -> bool {
    PLAUSIBLE_TITLE_CHARS.contains(&text.chars().count())
}

fn generic_image_alt(alt: &str) -> bool {
    let lower = alt.to_lowercase();
    GENERIC_IMAGE_TERMS.iter().any(|term| lower == *term)
        || lower.contains("amazon.com")
        || lower.contains("logo")
}

fn price_noise(text: &str) -> bool {
    let lower = text.to_lowercase();
    text.contains('$')
        || lower.contains("total")
        || lower.contains("shipping")
        || lower.contains("tax")
}

/// Mail templates cut long titles mid-token and append "...". Drop the cut
/// token and re-mark the truncation with a two-character "..".
fn collapse_truncated_tail(title: &str) -> String {
    if !title.ends_with("...") {
        return title.to_string();
    }
    let mut tokens: Vec<&str> = title.split_whitespace().collect();
    tokens.pop();
    let mut out = tokens.join(" ");
    if out.ends_with(',') {
        out.pop();
    }
    out.push_str("..");
    out
}

/// Keep the first of each group of similar titles, in discovery order.
fn dedup_similar(candidates: Vec<String>) -> Vec<String> {
    let mut accepted: Vec<String> = Vec::new();
    for candidate in candidates {
        if accepted.iter().any(|kept| similar_titles(kept, &candidate)) {
            continue;
        }
        accepted.push(candidate);
    }
    accepted
}

// ── DOM helpers ──────────────────────────────────────────────────────────────

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn document_text(doc: &Html) -> String {
    doc.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Next sibling that is an element, skipping text nodes.
fn next_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

/// Previous sibling that is an element, skipping text nodes.
fn prev_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.prev_siblings().find_map(ElementRef::wrap)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn extractor() -> OrderExtractor {
        OrderExtractor::new(MerchantSignature::default(), 45)
    }

    fn email(subject: &str, body: &str) -> ParsedEmail {
        ParsedEmail {
            sender: "auto-confirm@amazon.com".to_string(),
            subject: subject.to_string(),
            received: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            body: body.to_string(),
            source_ref: "<msg-1@mail>".to_string(),
        }
    }

    fn order_email(body: &str) -> ParsedEmail {
        email("Your Amazon.com order of \"USB-C Cable\"", body)
    }

    const FULL_BODY: &str = r#"<html><body>
        <table id="x_costBreakdownRight"><tr><td>$52.30</td></tr></table>
        <table id="x_itemDetails"><tr><td><font>USB-C Cable, 6ft</font></td></tr></table>
        </body></html>"#;

    // ── Classification ────────────────────────────────────────────────────────

    #[test]
    fn rejects_shipment_notice() {
        let e = email("Your Amazon.com order has shipped", FULL_BODY);
        assert!(extractor().extract(&e).is_none());
    }

    #[test]
    fn rejects_unrelated_email() {
        let e = email("Deals of the day", FULL_BODY);
        assert!(extractor().extract(&e).is_none());
    }

    #[test]
    fn rejects_empty_body() {
        let e = order_email("   ");
        assert!(extractor().extract(&e).is_none());
    }

    // ── Amount cascade ────────────────────────────────────────────────────────

    fn amount_of(body: &str) -> Option<Milliunits> {
        extract_amount(&Html::parse_document(body))
    }

    #[test]
    fn amount_from_structured_cost_cell() {
        assert_eq!(amount_of(FULL_BODY), Some(Milliunits::new(52_300)));
    }

    #[test]
    fn amount_from_total_label_neighbor() {
        let body = r#"<table><tr>
            <td>Order Total:</td><td>$12.34</td>
            </tr></table>"#;
        assert_eq!(amount_of(body), Some(Milliunits::new(12_340)));
    }

    #[test]
    fn amount_falls_back_to_last_currency_substring() {
        let body = "<p>Subtotal $10.00 plus shipping $2.50 comes to $12.50</p>";
        assert_eq!(amount_of(body), Some(Milliunits::new(12_500)));
    }

    #[test]
    fn amount_ignores_zero_values() {
        let body = "<p>Gift card applied: $0.00</p><p>Charged $8.99</p>";
        assert_eq!(amount_of(body), Some(Milliunits::new(8_990)));
    }

    #[test]
    fn no_amount_rejects_email() {
        let e = order_email(
            r#"<table id="x_itemDetails"><tr><td><font>USB-C Cable, 6ft</font></td></tr></table>"#,
        );
        assert!(extractor().extract(&e).is_none());
    }

    // ── Item cascade ──────────────────────────────────────────────────────────

    fn items_of(body: &str) -> Vec<String> {
        extract_items(&Html::parse_document(body))
    }

    #[test]
    fn items_from_structured_table() {
        assert_eq!(items_of(FULL_BODY), vec!["USB-C Cable, 6ft"]);
    }

    #[test]
    fn truncated_table_title_collapses_to_two_dot_marker() {
        let body = r#"<table id="x_itemDetails"><tr>
            <td><font>Mechanical Keyboard with RGB Backli...</font></td>
            </tr></table>"#;
        assert_eq!(items_of(body), vec!["Mechanical Keyboard with RGB.."]);
    }

    #[test]
    fn truncated_title_drops_trailing_comma() {
        let body = r#"<table id="x_itemDetails"><tr>
            <td><font>USB-C Cable, 6ft, Bra...</font></td>
            </tr></table>"#;
        assert_eq!(items_of(body), vec!["USB-C Cable, 6ft.."]);
    }

    #[test]
    fn items_fall_back_to_image_alt_text() {
        let body = r#"
            <img src="l.png" alt="Amazon" />
            <img src="a.png" alt="Mechanical Pencil Set with Case" />
            <img src="b.png" alt="store logo banner" />"#;
        assert_eq!(items_of(body), vec!["Mechanical Pencil Set with Case"]);
    }

    #[test]
    fn items_fall_back_to_product_links() {
        let body = r##"
            <a href="#">View or manage order</a>
            <a href="#">Stainless Steel Water Bottle 32oz</a>
            <a href="#">Conditions of Use</a>"##;
        assert_eq!(items_of(body), vec!["Stainless Steel Water Bottle 32oz"]);
    }

    #[test]
    fn items_fall_back_to_quantity_neighbors() {
        let body = r#"<table><tr>
            <td>Noise Cancelling Headphones Black</td><td>Qty: 1</td>
            </tr><tr>
            <td>Order Total</td><td>$99.00</td>
            </tr></table>"#;
        assert_eq!(items_of(body), vec!["Noise Cancelling Headphones Black"]);
    }

    #[test]
    fn quantity_neighbor_skips_price_text() {
        let body = r#"<table><tr>
            <td>Shipping Total $4.99</td><td>Quantity: 2</td>
            </tr></table>"#;
        assert!(items_of(body).is_empty());
    }

    #[test]
    fn similar_candidates_are_deduplicated() {
        let body = r##"
            <a href="#">Apple iPhone 15 Pro Case Black</a>
            <a href="#">Apple iPhone 15 Pro Case Blue</a>
            <a href="#">Stainless Steel Water Bottle 32oz</a>"##;
        assert_eq!(
            items_of(body),
            vec!["Apple iPhone 15 Pro Case Black", "Stainless Steel Water Bottle 32oz"]
        );
    }

    #[test]
    fn structured_table_takes_precedence_over_links() {
        let body = r##"
            <table id="x_itemDetails"><tr><td><font>USB-C Cable, 6ft</font></td></tr></table>
            <a href="#">Stainless Steel Water Bottle 32oz</a>"##;
        assert_eq!(items_of(body), vec!["USB-C Cable, 6ft"]);
    }

    // ── Full extraction ───────────────────────────────────────────────────────

    #[test]
    fn extracts_normalized_order() {
        let order = extractor().extract(&order_email(FULL_BODY)).unwrap();
        assert_eq!(order.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(order.amount, Milliunits::new(-52_300));
        assert_eq!(order.items, vec!["USB-C Cable, 6ft"]);
        assert_eq!(order.source_ref, "<msg-1@mail>");
    }

    #[test]
    fn long_item_titles_are_display_truncated() {
        let body = r#"<html><body>
            <table id="x_costBreakdownRight"><tr><td>$19.99</td></tr></table>
            <table id="x_itemDetails"><tr><td><font>Extra Long Product Title That Goes On And On About Features Nobody Reads</font></td></tr></table>
            </body></html>"#;
        let order = extractor().extract(&order_email(body)).unwrap();
        assert_eq!(order.items[0].chars().count(), 45);
        assert!(order.items[0].ends_with("..."));
    }

    #[test]
    fn no_items_rejects_email() {
        let body = r#"<table id="x_costBreakdownRight"><tr><td>$19.99</td></tr></table>"#;
        assert!(extractor().extract(&order_email(body)).is_none());
    }
}
