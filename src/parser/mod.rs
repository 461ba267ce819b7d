pub mod entry;

use std::sync::LazyLock;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};

use crate::error::{Result, SyncError};
pub use entry::{Category, FeedEntry, Year};

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&[^&;\s]+;").unwrap());

/// One fetched page of the feed.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entries: Vec<FeedEntry>,
    pub next_page_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    PubDate,
    Description,
    Category,
    Keywords,
    Rating,
    Guid,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"pubDate" => Some(Field::PubDate),
            b"description" => Some(Field::Description),
            b"category" => Some(Field::Category),
            b"keywords" => Some(Field::Keywords),
            b"rating" => Some(Field::Rating),
            b"guid" => Some(Field::Guid),
            _ => None,
        }
    }
}

/// Collects the first occurrence of each field among the item's children.
/// The thumbnail is looked up anywhere inside the item (e.g. under `<media:group>`).
#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    link: Option<String>,
    pub_date: Option<String>,
    description: Option<String>,
    category: Option<String>,
    poster_url: Option<String>,
    keywords: Option<String>,
    rating: Option<String>,
    guid: Option<String>,
}

impl ItemBuilder {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::PubDate => &mut self.pub_date,
            Field::Description => &mut self.description,
            Field::Category => &mut self.category,
            Field::Keywords => &mut self.keywords,
            Field::Rating => &mut self.rating,
            Field::Guid => &mut self.guid,
        };
        slot.get_or_insert(value);
    }

    fn build(self) -> FeedEntry {
        let published_at = self.pub_date.unwrap_or_default();
        let year = Year::from_published(&published_at);
        FeedEntry {
            title: self.title.unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            published_at,
            description: self.description.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            poster_url: self.poster_url.unwrap_or_default(),
            keywords: self.keywords.unwrap_or_default(),
            rating: self.rating.unwrap_or_default(),
            guid: self.guid.unwrap_or_default(),
            year,
        }
    }
}

/// Parse one page of feed XML into its entries and the `rel="next"` link, if any.
pub fn parse_page(xml: &str) -> Result<Page> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = Page::default();
    let mut buf = Vec::new();

    let mut depth = 0usize;
    let mut seen_root = false;
    // Depth of the open <item>, if any.
    let mut item_depth: Option<usize> = None;
    let mut item: Option<ItemBuilder> = None;
    // Field currently being read: (field, depth of its element, accumulated text).
    let mut field: Option<(Field, usize, String)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                seen_root = true;
                let name = e.name();

                if name.as_ref() == b"item" && item.is_none() {
                    item = Some(ItemBuilder::default());
                    item_depth = Some(depth);
                } else if let (Some(builder), Some(d)) = (item.as_mut(), item_depth) {
                    if is_thumbnail(name.as_ref()) {
                        read_thumbnail(&e, builder)?;
                    } else if depth == d + 1 {
                        if let Some(f) = Field::from_name(name.as_ref()) {
                            // <link rel="..."/> is a relation, not the entry's link text.
                            if f != Field::Link || attr(&e, b"rel")?.is_none() {
                                field = Some((f, depth, String::new()));
                            }
                        }
                    }
                } else {
                    check_next_link(&e, &mut page)?;
                }
            }
            Ok(Event::Empty(e)) => {
                seen_root = true;
                match item.as_mut() {
                    Some(builder) if is_thumbnail(e.name().as_ref()) => read_thumbnail(&e, builder)?,
                    Some(_) => {}
                    None => check_next_link(&e, &mut page)?,
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, _, text)) = field.as_mut() {
                    text.push_str(&unescape_lossy(&e));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some((_, _, text)) = field.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => {
                if matches!(field, Some((_, d, _)) if d == depth) {
                    if let (Some((f, _, text)), Some(builder)) = (field.take(), item.as_mut()) {
                        builder.set(f, text.trim().to_string());
                    }
                }
                if item_depth == Some(depth) && e.name().as_ref() == b"item" {
                    if let Some(builder) = item.take() {
                        page.entries.push(builder.build());
                    }
                    item_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SyncError::Parse(format!(
                    "XML error at position {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(SyncError::Parse("document has no root element".into()));
    }
    if depth != 0 {
        return Err(SyncError::Parse(format!(
            "unexpected end of document with {} unclosed element(s)",
            depth
        )));
    }

    Ok(page)
}

fn is_thumbnail(name: &[u8]) -> bool {
    matches!(name, b"media:thumbnail" | b"thumbnail")
}

fn read_thumbnail(e: &BytesStart, builder: &mut ItemBuilder) -> Result<()> {
    if builder.poster_url.is_none() {
        if let Some(url) = attr(e, b"url")? {
            builder.poster_url = Some(url);
        }
    }
    Ok(())
}

/// Any `<link>` (bare or prefixed, e.g. `atom:link`) with `rel="next"` outside an item names the next page.
fn check_next_link(e: &BytesStart, page: &mut Page) -> Result<()> {
    if page.next_page_url.is_some() || e.local_name().as_ref() != b"link" {
        return Ok(());
    }
    if attr(e, b"rel")?.as_deref() != Some("next") {
        return Ok(());
    }
    if let Some(href) = attr(e, b"href")? {
        let href = href.trim();
        if !href.is_empty() {
            page.next_page_url = Some(href.to_string());
        }
    }
    Ok(())
}

fn attr(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(|err| SyncError::Parse(format!("bad attribute: {}", err)))?;
        if a.key.as_ref() == key {
            let value = a.unescape_value()?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

// HTML-ish descriptions often carry entities XML doesn't define (&nbsp;).
// Each reference is resolved on its own; unknown ones stay as written.
fn unescape_lossy(e: &BytesText) -> String {
    let raw = String::from_utf8_lossy(e);
    ENTITY_RE
        .replace_all(&raw, |caps: &Captures| match quick_xml::escape::unescape(&caps[0]) {
            Ok(text) => text.into_owned(),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}
