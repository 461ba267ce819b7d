use crate::parser::FeedEntry;

use super::path;

pub const INDEX_FILE: &str = "watch.md";

/// Render the front-matter-only note for an entry.
///
/// Strings go out as JSON string literals, which YAML reads as double-quoted
/// scalars, so colons, quotes and newlines in feed text stay inside their value.
pub fn render_note(entry: &FeedEntry) -> String {
    let fields: [(&str, &str); 9] = [
        ("title", &entry.title),
        ("link", &entry.link),
        ("pubDate", &entry.published_at),
        ("description", &entry.description),
        ("category", &entry.category),
        ("poster", &entry.poster_url),
        ("keywords", &entry.keywords),
        ("rating", &entry.rating),
        ("guid", &entry.guid),
    ];

    let mut out = String::from("---\n");
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&quote(value));
        out.push('\n');
    }
    out.push_str(&format!("year: {}\n", entry.year));
    out.push_str("---\n");
    out
}

/// The index note: a Dataview table over every movie note under `root`.
pub fn render_index(root: &str) -> String {
    let movies = path::join(root, "movies");
    format!(
        "---\n\
         cssclasses:\n  - watchlist\n\
         ---\n\
         \n\
         ```dataview\n\
         TABLE WITHOUT ID\n  \
         (\"![](\" + poster + \")\") AS Poster,\n  \
         link(file.link, title) AS Title,\n  \
         year AS Year,\n  \
         rating AS Rating\n\
         FROM {}\n\
         SORT pubDate DESC\n\
         ```\n",
        quote(&movies)
    )
}

fn quote(value: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}
