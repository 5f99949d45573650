//! Pure HTML-to-record extractors for item pages.
//!
//! Every function here is a total function from an HTML string to a typed
//! value. Missing fields are missing, never errors: the processing path
//! treats partial records as valid output.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured record scraped from one item page. All fields are optional by
/// design; whatever could not be extracted is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FigureRecord {
    pub item_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub releases: Vec<Release>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub companies: Vec<Company>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artists: Vec<Artist>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Labels folded into the typed record rather than the misc map.
const CONSUMED_LABELS: &[&str] = &[
    "company", "companies", "manufacturer", "artist", "artists", "sculptor",
    "illustrator", "scale", "release", "releases", "release date",
];

/// Assemble a full record from an item page.
pub fn extract_record(html: &str, item_id: &str) -> FigureRecord {
    let doc = Html::parse_document(html);

    FigureRecord {
        item_id: item_id.to_string(),
        name: first_text(&doc, "h1.title")
            .or_else(|| first_text(&doc, "span.item-name"))
            .or_else(|| first_text(&doc, "h1")),
        image_url: first_attr(&doc, ".item-picture img", "src")
            .or_else(|| first_attr(&doc, "img.main-picture", "src")),
        manufacturer: field_value(&doc, "manufacturer")
            .or_else(|| field_value(&doc, "company")),
        scale: field_value(&doc, "scale"),
        releases: extract_releases(html),
        companies: extract_companies(html),
        artists: extract_artists(html),
        fields: extract_misc_fields(html),
    }
}

/// Release entries: date, optional edition tag, optional price.
pub fn extract_releases(html: &str) -> Vec<Release> {
    let doc = Html::parse_document(html);
    let mut releases = Vec::new();

    for field in data_fields(&doc) {
        let label = field_label(&field).unwrap_or_default();
        if !label.contains("release") {
            continue;
        }
        for entry in select_within(&field, ".item-release, .data-value a.time") {
            let text = element_text(&entry);
            if text.is_empty() {
                continue;
            }
            releases.push(parse_release_entry(&text));
        }
        // Fallback: a releases field with a bare value and no entry markup.
        if releases.is_empty() {
            if let Some(value) = field_value_of(&field) {
                releases.push(parse_release_entry(&value));
            }
        }
    }

    releases
}

fn parse_release_entry(text: &str) -> Release {
    // Typical shapes: "2024-06-15", "2024-06-15 (Limited)", "2024-06 ¥14,800".
    let mut release = Release::default();
    let mut remainder = text.trim().to_string();

    if let Some(open) = remainder.find('(') {
        if let Some(close) = remainder[open..].find(')') {
            let edition = remainder[open + 1..open + close].trim().to_string();
            if !edition.is_empty() {
                release.edition = Some(edition);
            }
            remainder.replace_range(open..=open + close, "");
        }
    }

    let mut date_parts = Vec::new();
    for token in remainder.split_whitespace() {
        if token.starts_with('¥') || token.starts_with('$') {
            release.price = Some(token.to_string());
        } else {
            date_parts.push(token);
        }
    }
    let date = date_parts.join(" ").trim().to_string();
    if !date.is_empty() {
        release.date = Some(date);
    }

    release
}

/// Companies with their roles ("Manufacturer", "Distributor", ...).
pub fn extract_companies(html: &str) -> Vec<Company> {
    let doc = Html::parse_document(html);
    let mut companies = Vec::new();

    for field in data_fields(&doc) {
        let label = match field_label(&field) {
            Some(l) => l,
            None => continue,
        };
        if !(label.contains("company") || label.contains("manufacturer")) {
            continue;
        }
        let role = role_from_label(&label, "company");
        for entry in select_within(&field, ".data-value a, .data-value span.entry") {
            let name = element_text(&entry);
            if !name.is_empty() {
                companies.push(Company {
                    name,
                    role: role.clone(),
                });
            }
        }
    }

    companies
}

/// Artists (sculptors, illustrators, ...) with their roles.
pub fn extract_artists(html: &str) -> Vec<Artist> {
    let doc = Html::parse_document(html);
    let mut artists = Vec::new();

    for field in data_fields(&doc) {
        let label = match field_label(&field) {
            Some(l) => l,
            None => continue,
        };
        if !(label.contains("artist") || label.contains("sculptor") || label.contains("illustrator"))
        {
            continue;
        }
        let role = role_from_label(&label, "artist");
        for entry in select_within(&field, ".data-value a, .data-value span.entry") {
            let name = element_text(&entry);
            if !name.is_empty() {
                artists.push(Artist {
                    name,
                    role: role.clone(),
                });
            }
        }
    }

    artists
}

/// Everything labeled on the page that the typed record does not consume:
/// classification, version, material, dimensions, JAN code and friends.
pub fn extract_misc_fields(html: &str) -> BTreeMap<String, String> {
    let doc = Html::parse_document(html);
    let mut fields = BTreeMap::new();

    for field in data_fields(&doc) {
        let label = match field_label(&field) {
            Some(l) => l,
            None => continue,
        };
        if CONSUMED_LABELS.iter().any(|c| label.contains(c)) {
            continue;
        }
        if let Some(value) = field_value_of(&field) {
            fields.insert(label, value);
        }
    }

    fields
}

fn role_from_label(label: &str, generic: &str) -> Option<String> {
    let singular = label.trim().trim_end_matches('s');
    if singular.is_empty() || singular == generic.trim_end_matches('s') {
        None
    } else {
        Some(singular.to_string())
    }
}

fn data_fields<'a>(doc: &'a Html) -> Vec<ElementRef<'a>> {
    match Selector::parse(".data-field") {
        Ok(sel) => doc.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn field_label(field: &ElementRef<'_>) -> Option<String> {
    let text = select_within(field, ".data-label")
        .first()
        .map(|el| element_text(el))?;
    if text.is_empty() {
        None
    } else {
        Some(text.to_lowercase())
    }
}

fn field_value_of(field: &ElementRef<'_>) -> Option<String> {
    let text = select_within(field, ".data-value")
        .first()
        .map(|el| element_text(el))?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn field_value(doc: &Html, label: &str) -> Option<String> {
    for field in data_fields(doc) {
        match field_label(&field) {
            Some(found) if found.contains(label) => return field_value_of(&field),
            _ => {}
        }
    }
    None
}

fn select_within<'a>(element: &ElementRef<'a>, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(sel) => element.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .map(|el| element_text(&el))
        .filter(|s| !s.is_empty())
}

fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM_PAGE: &str = r#"
        <html><body>
          <h1 class="title">Hatsune Miku: Racing Ver.</h1>
          <div class="item-picture"><img src="https://static.myfigurecollection.net/pics/12345.jpg"></div>
          <div class="data-field">
            <div class="data-label">Manufacturer</div>
            <div class="data-value"><a href="/entry/1">Good Smile Company</a></div>
          </div>
          <div class="data-field">
            <div class="data-label">Scale</div>
            <div class="data-value">1/8</div>
          </div>
          <div class="data-field">
            <div class="data-label">Artists</div>
            <div class="data-value"><a href="/entry/2">Sakura Sculptor</a> <a href="/entry/3">Ai Illustrator</a></div>
          </div>
          <div class="data-field">
            <div class="data-label">Releases</div>
            <div class="data-value">
              <span class="item-release">2024-06-15 (Limited) ¥14,800</span>
              <span class="item-release">2024-12</span>
            </div>
          </div>
          <div class="data-field">
            <div class="data-label">Material</div>
            <div class="data-value">ABS &amp; PVC</div>
          </div>
          <div class="data-field">
            <div class="data-label">JAN</div>
            <div class="data-value">4580416940000</div>
          </div>
        </body></html>
    "#;

    #[test]
    fn extracts_core_profile_fields() {
        let record = extract_record(ITEM_PAGE, "12345");
        assert_eq!(record.item_id, "12345");
        assert_eq!(record.name.as_deref(), Some("Hatsune Miku: Racing Ver."));
        assert_eq!(
            record.image_url.as_deref(),
            Some("https://static.myfigurecollection.net/pics/12345.jpg")
        );
        assert_eq!(record.manufacturer.as_deref(), Some("Good Smile Company"));
        assert_eq!(record.scale.as_deref(), Some("1/8"));
    }

    #[test]
    fn extracts_releases_with_edition_and_price() {
        let releases = extract_releases(ITEM_PAGE);
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].date.as_deref(), Some("2024-06-15"));
        assert_eq!(releases[0].edition.as_deref(), Some("Limited"));
        assert_eq!(releases[0].price.as_deref(), Some("¥14,800"));
        assert_eq!(releases[1].date.as_deref(), Some("2024-12"));
        assert_eq!(releases[1].edition, None);
    }

    #[test]
    fn extracts_companies_and_artists() {
        let companies = extract_companies(ITEM_PAGE);
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].name, "Good Smile Company");

        let artists = extract_artists(ITEM_PAGE);
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].name, "Sakura Sculptor");
        assert_eq!(artists[1].name, "Ai Illustrator");
    }

    #[test]
    fn misc_fields_skip_consumed_labels() {
        let fields = extract_misc_fields(ITEM_PAGE);
        assert_eq!(fields.get("material").map(String::as_str), Some("ABS & PVC"));
        assert_eq!(fields.get("jan").map(String::as_str), Some("4580416940000"));
        assert!(!fields.contains_key("manufacturer"));
        assert!(!fields.contains_key("releases"));
        assert!(!fields.contains_key("scale"));
    }

    #[test]
    fn partial_pages_yield_partial_records() {
        let record = extract_record("<html><body><p>nothing here</p></body></html>", "77");
        assert_eq!(record.item_id, "77");
        assert_eq!(record.name, None);
        assert!(record.releases.is_empty());
        assert!(record.fields.is_empty());
    }
}
