//! Deterministic mapping from a found item to the portal's publication schema.
//!
//! Formatting is a pure function of the item and the category table loaded at
//! startup: no clock, no network, no randomness. The same item always yields
//! the same [`PublicationRequest`], including its idempotency key.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::Days;
use serde::Deserialize;

use crate::models::{
    ContactPoint, Item, PublicationRequest, ResourceDescriptor, TemporalCoverage,
};
use crate::AppError;

/// EU data-theme authority; short theme codes are expanded against it.
pub const THEME_AUTHORITY: &str = "http://publications.europa.eu/resource/authority/data-theme/";

/// Keywords every publication starts with, in this order.
pub const BASE_KEYWORDS: [&str; 2] = ["rzeczy znalezione", "lost and found"];

/// Retention window covered by a publication, counted from the found date.
pub const RETENTION_DAYS: u64 = 90;

/// Joins keywords in the `keywords` custom field.
pub const KEYWORD_SEPARATOR: &str = ", ";

pub const RESOURCE_FORMAT: &str = "JPG";
pub const LICENSE: &str = "cc-zero";

/// Portal category and theme for one internal label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryMapping {
    pub category: String,
    pub theme: String,
}

impl CategoryMapping {
    fn new(category: &str, theme_code: &str) -> Self {
        Self {
            category: category.to_string(),
            theme: expand_theme(theme_code),
        }
    }
}

/// Result of looking a label up in the [`CategoryMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    Mapped(&'a CategoryMapping),
    /// The label is not in the table; carries the configured fallback.
    Unmapped(&'a CategoryMapping),
}

impl<'a> Classification<'a> {
    pub fn mapping(&self) -> &'a CategoryMapping {
        match *self {
            Classification::Mapped(m) | Classification::Unmapped(m) => m,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Classification::Mapped(_))
    }
}

#[derive(Deserialize)]
struct CategoryFile {
    fallback: CategoryMapping,
    #[serde(default)]
    categories: Vec<CategoryEntry>,
}

#[derive(Deserialize)]
struct CategoryEntry {
    label: String,
    category: String,
    theme: String,
}

/// Immutable lookup table from intake category labels to portal vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMap {
    entries: HashMap<String, CategoryMapping>,
    fallback: CategoryMapping,
}

impl Default for CategoryMap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CategoryMap {
    /// The table used by the intake service's category list.
    pub fn builtin() -> Self {
        let entries = [
            ("Dokumenty", "government", "JUST"),
            ("Elektronika", "technology", "TECH"),
            ("Biżuteria", "economy", "ECON"),
            ("Odzież", "society", "SOCI"),
            ("Portfele i torby", "economy", "ECON"),
            ("Klucze", "technology", "TECH"),
            ("Telefony", "technology", "TECH"),
            ("Inne", "other", "SOCI"),
        ]
        .into_iter()
        .map(|(label, category, theme)| (label.to_string(), CategoryMapping::new(category, theme)))
        .collect();

        Self {
            entries,
            fallback: CategoryMapping::new("other", "SOCI"),
        }
    }

    /// Parses a table from TOML.
    ///
    /// ```toml
    /// [fallback]
    /// category = "other"
    /// theme = "SOCI"
    ///
    /// [[categories]]
    /// label = "Elektronika"
    /// category = "technology"
    /// theme = "TECH"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` on invalid TOML or duplicate labels.
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let file: CategoryFile = toml::from_str(content)
            .map_err(|e| AppError::ConfigError(format!("invalid category map: {e}")))?;

        let mut entries = HashMap::with_capacity(file.categories.len());
        for entry in file.categories {
            let label = entry.label.trim().to_string();
            let mapping = CategoryMapping::new(&entry.category, &entry.theme);
            if entries.insert(label.clone(), mapping).is_some() {
                return Err(AppError::ConfigError(format!(
                    "category '{label}' is mapped more than once"
                )));
            }
        }

        Ok(Self {
            entries,
            fallback: CategoryMapping::new(&file.fallback.category, &file.fallback.theme),
        })
    }

    /// Reads a TOML table from disk.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("cannot read category map {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn classify(&self, label: &str) -> Classification<'_> {
        match self.entries.get(label.trim()) {
            Some(mapping) => Classification::Mapped(mapping),
            None => Classification::Unmapped(&self.fallback),
        }
    }

    pub fn fallback(&self) -> &CategoryMapping {
        &self.fallback
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn expand_theme(theme: &str) -> String {
    let theme = theme.trim();
    if theme.contains("://") {
        theme.to_string()
    } else {
        format!("{THEME_AUTHORITY}{theme}")
    }
}

/// Stable per-item key the portal can use to collapse duplicate submissions.
pub fn idempotency_key(item_id: &str) -> String {
    format!("lost-item-{item_id}")
}

/// Converts items into portal publication requests.
#[derive(Debug, Clone, Default)]
pub struct ItemFormatter {
    categories: CategoryMap,
}

impl ItemFormatter {
    pub fn new(categories: CategoryMap) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    /// Formats an item.
    ///
    /// # Errors
    ///
    /// Returns `AppError::FormatError` only when the item has no image URL,
    /// since the image is the single published resource.
    pub fn format(&self, item: &Item) -> Result<PublicationRequest, AppError> {
        let image_url = item
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                AppError::FormatError(format!("item {} has no image URL", item.id))
            })?;

        let mapping = self.categories.classify(&item.category).mapping();
        let temporal = temporal_coverage(item)?;
        let key = idempotency_key(&item.id);

        let resource = ResourceDescriptor {
            name: resource_name(item),
            description: resource_description(item),
            format: RESOURCE_FORMAT.to_string(),
            url: image_url.to_string(),
            size: item.image_size,
        };

        let tags = keywords(item);

        Ok(PublicationRequest {
            custom_fields: custom_fields(item, mapping, &temporal, &key, &tags),
            idempotency_key: key,
            title: item.title.clone(),
            notes: item.description.clone(),
            category: mapping.category.clone(),
            theme: mapping.theme.clone(),
            tags,
            license: LICENSE.to_string(),
            temporal,
            spatial: non_empty(&item.location),
            contact_point: ContactPoint {
                email: non_empty(&item.contact_email),
                phone: non_empty(&item.contact_phone),
            },
            resources: vec![resource],
        })
    }
}

/// Base keywords, then category and location, then title words longer than
/// three characters in title order. Duplicates are kept.
pub fn keywords(item: &Item) -> Vec<String> {
    let mut keywords: Vec<String> = BASE_KEYWORDS.iter().map(|k| k.to_string()).collect();

    for field in [&item.category, &item.location] {
        let field = field.trim();
        if !field.is_empty() {
            keywords.push(field.to_lowercase());
        }
    }

    keywords.extend(
        item.title
            .split_whitespace()
            .filter(|word| word.chars().count() > 3)
            .map(str::to_lowercase),
    );

    keywords
}

fn temporal_coverage(item: &Item) -> Result<TemporalCoverage, AppError> {
    let start_date = item.found_date.date_naive();
    let end_date = start_date
        .checked_add_days(Days::new(RETENTION_DAYS))
        .ok_or_else(|| {
            AppError::FormatError(format!("found date of item {} is out of range", item.id))
        })?;
    Ok(TemporalCoverage {
        start_date,
        end_date,
    })
}

fn resource_name(item: &Item) -> String {
    let title = item.title.trim();
    if title.is_empty() {
        format!("Zdjęcie [{}]", item.id)
    } else {
        format!("Zdjęcie: {} [{}]", title, item.id)
    }
}

fn resource_description(item: &Item) -> String {
    let category = item.category.trim();
    if category.is_empty() {
        "Fotografia znalezionego przedmiotu".to_string()
    } else {
        format!("Fotografia znalezionego przedmiotu - {category}")
    }
}

fn custom_fields(
    item: &Item,
    mapping: &CategoryMapping,
    temporal: &TemporalCoverage,
    key: &str,
    tags: &[String],
) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("item_id".to_string(), item.id.clone());
    fields.insert("idempotency_key".to_string(), key.to_string());
    fields.insert("keywords".to_string(), tags.join(KEYWORD_SEPARATOR));
    fields.insert("license".to_string(), LICENSE.to_string());
    fields.insert(
        "found_date".to_string(),
        temporal.start_date.format("%Y-%m-%d").to_string(),
    );
    fields.insert(
        "temporal_start".to_string(),
        temporal.start_date.format("%Y-%m-%d").to_string(),
    );
    fields.insert(
        "temporal_end".to_string(),
        temporal.end_date.format("%Y-%m-%d").to_string(),
    );
    fields.insert("category".to_string(), mapping.category.clone());
    fields.insert("theme".to_string(), mapping.theme.clone());

    if let Some(date) = item.reporting_date {
        fields.insert(
            "reporting_date".to_string(),
            date.date_naive().format("%Y-%m-%d").to_string(),
        );
    }

    let optional = [
        ("title", &item.title),
        ("notes", &item.description),
        ("location", &item.location),
        ("reporting_location", &item.reporting_location),
        ("contact_email", &item.contact_email),
        ("contact_phone", &item.contact_phone),
    ];
    for (name, value) in optional {
        if let Some(value) = non_empty(value) {
            fields.insert(name.to_string(), value);
        }
    }

    fields
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn item(category: &str, title: &str, location: &str) -> Item {
        Item {
            id: "item-42".to_string(),
            title: title.to_string(),
            description: "Opis".to_string(),
            category: category.to_string(),
            location: location.to_string(),
            found_date: Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).unwrap(),
            reporting_date: None,
            reporting_location: String::new(),
            image_url: Some("http://minio:9000/items/item-42.jpg".to_string()),
            image_size: None,
            contact_email: String::new(),
            contact_phone: String::new(),
            vector_id: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_mapped_category() {
        let formatter = ItemFormatter::default();
        let request = formatter
            .format(&item("Elektronika", "Telefon Samsung", "Park Centralny"))
            .unwrap();
        assert_eq!(request.category, "technology");
        assert_eq!(request.theme, format!("{THEME_AUTHORITY}TECH"));
    }

    #[test]
    fn test_phone_found_in_park() {
        let formatter = ItemFormatter::default();
        let request = formatter
            .format(&item("Elektronika", "Telefon Samsung", "Park Centralny"))
            .unwrap();

        assert_eq!(request.category, "technology");
        assert!(request.theme.ends_with("/TECH"));
        assert_eq!(
            request.temporal.start_date,
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
        );
        assert_eq!(
            request.temporal.end_date,
            NaiveDate::from_ymd_opt(2025, 4, 15).unwrap()
        );
        assert_eq!(
            request.tags,
            vec![
                "rzeczy znalezione",
                "lost and found",
                "elektronika",
                "park centralny",
                "telefon",
                "samsung",
            ]
        );
        assert_eq!(request.idempotency_key, "lost-item-item-42");
        assert_eq!(request.spatial.as_deref(), Some("Park Centralny"));

        let body = serde_json::to_value(request.resource_request().unwrap()).unwrap();
        let attributes = &body["data"]["attributes"];
        assert_eq!(attributes["tags"], serde_json::json!(request.tags));
        assert_eq!(
            attributes["custom_fields"]["keywords"],
            "rzeczy znalezione, lost and found, elektronika, park centralny, telefon, samsung"
        );
        assert_eq!(attributes["custom_fields"]["license"], "cc-zero");
        assert_eq!(attributes["custom_fields"]["notes"], "Opis");
        assert_eq!(attributes["custom_fields"]["location"], "Park Centralny");
    }

    #[test]
    fn test_every_builtin_label_maps_to_its_table_value() {
        let map = CategoryMap::builtin();
        let formatter = ItemFormatter::new(map.clone());
        for label in [
            "Dokumenty",
            "Elektronika",
            "Biżuteria",
            "Odzież",
            "Portfele i torby",
            "Klucze",
            "Telefony",
            "Inne",
        ] {
            let expected = map.classify(label);
            assert!(expected.is_mapped(), "{label} should be mapped");
            let request = formatter.format(&item(label, "x", "y")).unwrap();
            assert_eq!(request.theme, expected.mapping().theme);
            assert_eq!(request.category, expected.mapping().category);
        }
    }

    #[test]
    fn test_unmapped_category_uses_fallback() {
        let formatter = ItemFormatter::default();
        for label in ["Zabawki", "", "elektronika"] {
            let request = formatter.format(&item(label, "x", "y")).unwrap();
            assert_eq!(request.category, "other");
            assert_eq!(request.theme, format!("{THEME_AUTHORITY}SOCI"));
        }
    }

    #[test]
    fn test_temporal_window_is_ninety_days() {
        let formatter = ItemFormatter::default();
        for (y, m, d) in [(2025, 1, 15), (2024, 2, 29), (2025, 12, 31), (1999, 6, 1)] {
            let mut it = item("Klucze", "x", "y");
            it.found_date = Utc.with_ymd_and_hms(y, m, d, 23, 59, 0).unwrap();
            let request = formatter.format(&it).unwrap();
            let span = request.temporal.end_date - request.temporal.start_date;
            assert_eq!(span.num_days(), 90);
            assert_eq!(request.temporal.start_date, NaiveDate::from_ymd_opt(y, m, d).unwrap());
        }
    }

    #[test]
    fn test_keywords_order() {
        let it = item("Elektronika", "Telefon Samsung w etui", "Park Centralny");
        assert_eq!(
            keywords(&it),
            vec![
                "rzeczy znalezione",
                "lost and found",
                "elektronika",
                "park centralny",
                "telefon",
                "samsung",
                "etui",
            ]
        );
    }

    #[test]
    fn test_keywords_keep_duplicates_and_count_chars() {
        let it = item("Klucze", "Klucze klucze żółw", "");
        assert_eq!(
            keywords(&it),
            vec![
                "rzeczy znalezione",
                "lost and found",
                "klucze",
                "klucze",
                "klucze",
                "żółw",
            ]
        );
    }

    #[test]
    fn test_missing_image_is_format_error() {
        let formatter = ItemFormatter::default();
        let mut it = item("Klucze", "x", "y");
        it.image_url = None;
        assert!(matches!(formatter.format(&it), Err(AppError::FormatError(_))));
        it.image_url = Some("   ".to_string());
        assert!(matches!(formatter.format(&it), Err(AppError::FormatError(_))));
    }

    #[test]
    fn test_contact_point_omits_empty_values() {
        let formatter = ItemFormatter::default();
        let mut it = item("Klucze", "x", "y");
        it.contact_email = "biuro@um.pl".to_string();
        let request = formatter.format(&it).unwrap();
        assert_eq!(request.contact_point.email.as_deref(), Some("biuro@um.pl"));
        assert!(request.contact_point.phone.is_none());
        assert!(!request.custom_fields.contains_key("contact_phone"));

        let json = serde_json::to_value(&request.contact_point).unwrap();
        assert!(json.get("phone").is_none());
    }

    #[test]
    fn test_single_resource_uses_image_url() {
        let formatter = ItemFormatter::default();
        let request = formatter
            .format(&item("Telefony", "Telefon", "Dworzec"))
            .unwrap();
        assert_eq!(request.resources.len(), 1);
        let resource = &request.resources[0];
        assert_eq!(resource.url, "http://minio:9000/items/item-42.jpg");
        assert_eq!(resource.format, "JPG");
        assert_eq!(resource.name, "Zdjęcie: Telefon [item-42]");
        assert!(resource.size.is_none());

        let body = serde_json::to_value(request.resource_request().unwrap()).unwrap();
        assert_eq!(body["data"]["type"], "resource");
        assert!(body["data"]["attributes"].get("size").is_none());
        assert_eq!(
            body["data"]["attributes"]["custom_fields"]["idempotency_key"],
            "lost-item-item-42"
        );
    }

    #[test]
    fn test_format_is_deterministic() {
        let formatter = ItemFormatter::default();
        let it = item("Odzież", "Kurtka zimowa", "Rynek");
        assert_eq!(formatter.format(&it).unwrap(), formatter.format(&it).unwrap());
    }

    #[test]
    fn test_category_map_from_toml() {
        let map = CategoryMap::from_toml_str(
            r#"
            [fallback]
            category = "misc"
            theme = "SOCI"

            [[categories]]
            label = "Rowery"
            category = "transport"
            theme = "http://example.org/theme/TRAN"
            "#,
        )
        .unwrap();
        assert_eq!(map.len(), 1);
        let rowery = map.classify("Rowery");
        assert!(rowery.is_mapped());
        assert_eq!(rowery.mapping().theme, "http://example.org/theme/TRAN");
        assert_eq!(map.classify("Klucze").mapping().category, "misc");
    }

    #[test]
    fn test_category_map_rejects_duplicates() {
        let result = CategoryMap::from_toml_str(
            r#"
            [fallback]
            category = "other"
            theme = "SOCI"

            [[categories]]
            label = "Klucze"
            category = "technology"
            theme = "TECH"

            [[categories]]
            label = "Klucze"
            category = "economy"
            theme = "ECON"
            "#,
        );
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
