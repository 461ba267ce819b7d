use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};

/// One `<item>` of the watchlist feed. Every text field is empty rather than absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published_at: String,
    pub description: String,
    pub category: String,
    pub poster_url: String,
    pub keywords: String,
    pub rating: String,
    pub guid: String,
    pub year: Year,
}

impl FeedEntry {
    /// Only an exact (case-insensitive) "movie" counts as a movie; everything else is a series.
    pub fn classify(&self) -> Category {
        if self.category.to_lowercase() == "movie" {
            Category::Movie
        } else {
            Category::Series
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Movie,
    Series,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Movie, Category::Series];

    /// Folder under the vault root that holds notes of this category.
    pub fn folder(self) -> &'static str {
        match self {
            Category::Movie => "movies",
            Category::Series => "shows",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Movie => "movie",
            Category::Series => "series",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Release year derived from `pubDate`. An unparseable date is kept as `NaN`
/// so notes show that the feed carried a bad date instead of a made-up year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Year(Option<i32>);

impl Year {
    pub const NAN: Year = Year(None);

    pub fn new(year: i32) -> Self {
        Year(Some(year))
    }

    pub fn value(self) -> Option<i32> {
        self.0
    }

    pub fn from_published(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Year::NAN;
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
            return Year::new(dt.year());
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Year::new(dt.year());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            return Year::new(dt.year());
        }
        if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Year::new(d.year());
        }
        // "November 12, 2016" / "Nov 12, 2016"
        if let Ok(d) = NaiveDate::parse_from_str(raw, "%B %d, %Y") {
            return Year::new(d.year());
        }
        if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(y) = raw.parse() {
                return Year::new(y);
            }
        }
        Year::NAN
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(y) => write!(f, "{}", y),
            None => f.write_str("NaN"),
        }
    }
}

impl Serialize for Year {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value() {
            Some(y) => serializer.serialize_i32(y),
            None => serializer.serialize_str("NaN"),
        }
    }
}
