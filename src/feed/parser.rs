//! Feed document parsing (RSS 2.0 and Atom)
//!
//! Items are mapped into [`FeedItem`] records. The enclosure URL and length
//! win over `<link>`; `pubDate` is RFC 822; `newznab:attr` / `nZEDb:attr`
//! extension elements populate the freeform attribute map plus typed
//! shortcuts for size, imdb, rageid, tvdbid, tvmazeid, season, and episode.

use chrono::Utc;

use super::item::FeedItem;
use crate::error::{Error, Result};
use crate::utils::filename_from_subject;

/// Parse a feed document, trying RSS first and falling back to Atom.
pub fn parse_feed(content: &str) -> Result<Vec<FeedItem>> {
    match parse_rss(content) {
        Ok(items) => Ok(items),
        Err(rss_err) => match parse_atom(content) {
            Ok(items) => Ok(items),
            Err(atom_err) => Err(Error::InvalidFeed(format!(
                "not RSS ({rss_err}) and not Atom ({atom_err})"
            ))),
        },
    }
}

fn parse_rss(content: &str) -> std::result::Result<Vec<FeedItem>, String> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| e.to_string())?;

    let items = channel
        .items()
        .iter()
        .map(|item| {
            let title = item.title().unwrap_or("").to_string();
            let mut feed_item = FeedItem {
                filename: filename_from_subject(&title),
                title,
                description: item.description().unwrap_or("").to_string(),
                category: item
                    .categories()
                    .first()
                    .map(|c| c.name().to_string())
                    .unwrap_or_default(),
                ..Default::default()
            };

            // enclosure wins over link for both url and size
            if let Some(enclosure) = item.enclosure() {
                feed_item.url = enclosure.url().to_string();
                feed_item.size = enclosure.length().parse().unwrap_or(0);
            } else if let Some(link) = item.link() {
                feed_item.url = link.to_string();
            }

            feed_item.time = item.pub_date().and_then(|date| {
                chrono::DateTime::parse_from_rfc2822(date)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            });

            apply_extensions(&mut feed_item, item.extensions());
            feed_item
        })
        .collect();

    Ok(items)
}

/// Fold `newznab:attr` / `nZEDb:attr` entries into the item.
fn apply_extensions(item: &mut FeedItem, extensions: &rss::extension::ExtensionMap) {
    let mut season: Option<i64> = None;
    let mut episode: Option<i64> = None;

    for namespace in ["newznab", "nZEDb", "nzedb"] {
        let Some(elements) = extensions.get(namespace) else {
            continue;
        };
        let Some(attrs) = elements.get("attr") else {
            continue;
        };
        for attr in attrs {
            let Some(name) = attr.attrs().get("name") else {
                continue;
            };
            let Some(value) = attr.attrs().get("value") else {
                continue;
            };
            item.attributes.push((name.clone(), value.clone()));
            match name.to_ascii_lowercase().as_str() {
                "size" => {
                    if item.size == 0 {
                        item.size = value.parse().unwrap_or(0);
                    }
                }
                "imdb" | "imdbid" => item.imdb_id = parse_prefixed_int(value),
                "rageid" => item.rage_id = value.parse().unwrap_or(0),
                "tvdbid" => item.tvdb_id = value.parse().unwrap_or(0),
                "tvmazeid" => item.tvmaze_id = value.parse().unwrap_or(0),
                "season" => season = Some(parse_prefixed_int(value)),
                "episode" => episode = Some(parse_prefixed_int(value)),
                _ => {}
            }
        }
    }

    if let (Some(season), Some(episode)) = (season, episode) {
        item.set_season_episode(season, episode);
    }
}

/// Parse integers that may carry a non-numeric prefix, e.g. `tt0944947` or
/// `S02`.
fn parse_prefixed_int(value: &str) -> i64 {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn parse_atom(content: &str) -> std::result::Result<Vec<FeedItem>, String> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())
        .map_err(|e| e.to_string())?;

    let items = feed
        .entries()
        .iter()
        .map(|entry| {
            let title = entry.title().as_str().to_string();
            let mut item = FeedItem {
                filename: filename_from_subject(&title),
                title,
                ..Default::default()
            };

            // prefer an enclosure link, then one pointing at an .nzb
            let links = entry.links();
            let chosen = links
                .iter()
                .find(|l| l.rel() == "enclosure")
                .or_else(|| {
                    links.iter().find(|l| {
                        l.href().ends_with(".nzb")
                            || l.mime_type() == Some("application/x-nzb")
                    })
                })
                .or_else(|| links.first());
            if let Some(link) = chosen {
                item.url = link.href().to_string();
                item.size = link
                    .length()
                    .and_then(|l| l.parse().ok())
                    .unwrap_or(0);
            }

            item.time = entry
                .published()
                .copied()
                .or_else(|| Some(*entry.updated()))
                .map(|dt| dt.with_timezone(&Utc));

            item.description = entry
                .summary()
                .map(|s| s.as_str().to_string())
                .or_else(|| {
                    entry
                        .content()
                        .and_then(|c| c.value().map(|v| v.to_string()))
                })
                .unwrap_or_default();

            item.category = entry
                .categories()
                .first()
                .map(|c| c.term().to_string())
                .unwrap_or_default();

            item
        })
        .collect();

    Ok(items)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
  <channel>
    <title>indexer</title>
    <item>
      <title>Game.of.Clowns.S02E06.1080p.HDTV.X264-Group</title>
      <link>https://indexer.example/details/1</link>
      <category>TV &gt; HD</category>
      <pubDate>Sat, 01 Feb 2025 10:30:00 +0000</pubDate>
      <enclosure url="https://indexer.example/get/1.nzb" length="1717986918" type="application/x-nzb"/>
      <newznab:attr name="rageid" value="123456"/>
      <newznab:attr name="season" value="S02"/>
      <newznab:attr name="episode" value="E06"/>
      <newznab:attr name="grabs" value="77"/>
    </item>
    <item>
      <title>Linkless.Item</title>
      <link>https://indexer.example/get/2.nzb</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn rss_items_map_enclosure_category_and_date() {
        let items = parse_feed(RSS_SAMPLE).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.url, "https://indexer.example/get/1.nzb", "enclosure wins over link");
        assert_eq!(first.size, 1_717_986_918);
        assert_eq!(first.category, "TV > HD");
        let time = first.time.expect("pubDate parses as RFC 822");
        assert_eq!(time.to_rfc3339(), "2025-02-01T10:30:00+00:00");

        let second = &items[1];
        assert_eq!(second.url, "https://indexer.example/get/2.nzb", "link is the fallback");
        assert_eq!(second.size, 0);
    }

    #[test]
    fn newznab_attributes_populate_map_and_shortcuts() {
        let items = parse_feed(RSS_SAMPLE).unwrap();
        let first = &items[0];
        assert_eq!(first.rage_id, 123_456);
        assert_eq!(first.attribute("grabs"), Some("77"));
        assert_eq!(first.season_num(), 2, "typed season attr overrides lazy parse");
        assert_eq!(first.episode_num(), 6);
    }

    #[test]
    fn filename_derives_from_title() {
        let items = parse_feed(RSS_SAMPLE).unwrap();
        assert_eq!(items[0].filename, "Game.of.Clowns.S02E06.1080p.HDTV.X264-Group");
    }

    #[test]
    fn atom_feeds_parse_with_enclosure_links() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>indexer</title>
  <id>urn:feed</id>
  <updated>2025-02-01T10:30:00Z</updated>
  <entry>
    <title>Show.S01E01.720p</title>
    <id>urn:item:1</id>
    <updated>2025-02-01T10:30:00Z</updated>
    <link rel="enclosure" href="https://indexer.example/get/9.nzb" length="1000"/>
    <summary>first episode</summary>
  </entry>
</feed>"#;
        let items = parse_feed(atom).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://indexer.example/get/9.nzb");
        assert_eq!(items[0].size, 1000);
        assert_eq!(items[0].description, "first episode");
        assert!(items[0].time.is_some());
    }

    #[test]
    fn garbage_is_neither_rss_nor_atom() {
        let err = parse_feed("{\"not\": \"xml\"}").unwrap_err();
        assert!(err.to_string().contains("not RSS"));
    }
}
