//! Feed item records
//!
//! One [`FeedItem`] per `<item>` in a fetched feed document. Season and
//! episode are parsed lazily from the title on first access and cached, since
//! most items never hit a filter term that needs them.

use chrono::{DateTime, Utc};
use std::sync::OnceLock;

use crate::types::DupeMode;

/// Classification of an item against the feed history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FeedItemStatus {
    /// Not yet classified
    #[default]
    Unknown,
    /// Present before the engine started watching; never auto-fetched
    Backlog,
    /// Already fetched in an earlier pass
    Fetched,
    /// First seen in this pass
    New,
}

/// Outcome of filter evaluation for an item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchStatus {
    /// No rule decided the item
    #[default]
    Ignored,
    /// An Accept (or Options) rule matched
    Accepted,
    /// A Reject rule matched or a Require rule did not
    Rejected,
}

/// One entry from an RSS/Atom feed.
#[derive(Clone, Debug, Default)]
pub struct FeedItem {
    /// Item title
    pub title: String,
    /// Filename derived from the title (subject heuristics) or enclosure
    pub filename: String,
    /// Download URL (enclosure preferred over link)
    pub url: String,
    /// Category from the feed
    pub category: String,
    /// Size in bytes (enclosure length or newznab size attribute)
    pub size: i64,
    /// Publication time
    pub time: Option<DateTime<Utc>>,
    /// Item description
    pub description: String,
    /// IMDB id from newznab attributes
    pub imdb_id: i64,
    /// TVRage id from newznab attributes
    pub rage_id: i64,
    /// TVDB id from newznab attributes
    pub tvdb_id: i64,
    /// TVMaze id from newznab attributes
    pub tvmaze_id: i64,
    /// Freeform attribute map from `newznab:attr` / `nZEDb:attr`
    pub attributes: Vec<(String, String)>,
    /// History classification
    pub status: FeedItemStatus,
    /// Filter outcome
    pub match_status: MatchStatus,
    /// 1-based index of the deciding rule (0 = none)
    pub match_rule: u32,
    /// Duplicate key (filter options may rewrite it)
    pub dupe_key: String,
    /// Duplicate score
    pub dupe_score: i32,
    /// Duplicate mode
    pub dupe_mode: DupeMode,
    /// Duplicate status string against queue/history (for the dupestatus field)
    pub dupe_status: String,
    /// Category assigned by filter options
    pub add_category: String,
    /// Whether the synthesized job starts paused
    pub pause_nzb: bool,
    /// Priority for the synthesized job
    pub priority: i32,
    pub(crate) season_episode: OnceLock<SeasonEpisode>,
}

#[derive(Clone, Debug, Default)]
struct SeasonEpisode {
    season: Option<String>,
    episode: Option<String>,
    season_num: i64,
    episode_num: i64,
}

fn season_episode_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // a season/episode token needs non-alphanumeric characters on both
        // sides, e.g. ".S02E06." — a bare prefix or suffix does not count
        #[allow(clippy::unwrap_used)]
        regex::Regex::new(r"(?i)[^a-z0-9]s?([0-9]+)[ex]([0-9]+(-?e[0-9]+)?)[^a-z0-9]").unwrap()
    })
}

impl FeedItem {
    fn season_episode(&self) -> &SeasonEpisode {
        self.season_episode.get_or_init(|| {
            let Some(caps) = season_episode_regex().captures(&self.title) else {
                return SeasonEpisode::default();
            };
            let season_num: i64 = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let raw_episode = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let episode_num: i64 = raw_episode
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
            let episode = format!(
                "E{}",
                raw_episode.to_ascii_uppercase().replace("-E", "-")
            );
            SeasonEpisode {
                season: Some(format!("S{season_num:02}")),
                episode: Some(episode),
                season_num,
                episode_num,
            }
        })
    }

    /// Season string (e.g. `S02`) parsed from the title, if present.
    pub fn season(&self) -> Option<&str> {
        self.season_episode().season.as_deref()
    }

    /// Episode string (e.g. `E06` or `E06-07`) parsed from the title.
    pub fn episode(&self) -> Option<&str> {
        self.season_episode().episode.as_deref()
    }

    /// Numeric season (0 when the title carries none).
    pub fn season_num(&self) -> i64 {
        self.season_episode().season_num
    }

    /// Numeric episode (0 when the title carries none).
    pub fn episode_num(&self) -> i64 {
        self.season_episode().episode_num
    }

    /// Age in seconds relative to `now` (0 for undated items).
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.time
            .map(|t| (now - t).num_seconds().max(0))
            .unwrap_or(0)
    }

    /// Seed season/episode from typed feed attributes, overriding the title
    /// heuristics. Ignored if the title was already parsed.
    pub fn set_season_episode(&mut self, season: i64, episode: i64) {
        let _ = self.season_episode.set(SeasonEpisode {
            season: Some(format!("S{season:02}")),
            episode: Some(format!("E{episode:02}")),
            season_num: season,
            episode_num: episode,
        });
    }

    /// Look up a freeform attribute by name (case-insensitive).
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Rebuild the dupe key from tv ids and/or a series name, the way filter
    /// options request it. Numeric ids win; a series key needs a parsed
    /// season/episode.
    pub fn build_dupe_key(
        &mut self,
        rage_id: Option<&str>,
        tvdb_id: Option<&str>,
        tvmaze_id: Option<&str>,
        series: Option<&str>,
    ) {
        let rage = parse_id(rage_id).unwrap_or(self.rage_id);
        let tvdb = parse_id(tvdb_id).unwrap_or(self.tvdb_id);
        let tvmaze = parse_id(tvmaze_id).unwrap_or(self.tvmaze_id);

        let mut parts: Vec<String> = Vec::new();
        if rage != 0 {
            parts.push(format!("rageid={rage}"));
        }
        if tvdb != 0 {
            parts.push(format!("tvdbid={tvdb}"));
        }
        if tvmaze != 0 {
            parts.push(format!("tvmazeid={tvmaze}"));
        }
        if let Some(series) = series.filter(|s| !s.is_empty())
            && let (Some(season), Some(episode)) = (
                self.season().map(str::to_string),
                self.episode().map(str::to_string),
            )
        {
            parts.push(format!(
                "series={}-{}-{}",
                series.to_ascii_lowercase(),
                season,
                episode
            ));
        }
        if !parts.is_empty() {
            self.dupe_key = parts.join("-");
        }
    }

    /// Append an extra component to the dupe key.
    pub fn append_dupe_key(&mut self, extra: &str) {
        if extra.is_empty() {
            return;
        }
        if self.dupe_key.is_empty() {
            self.dupe_key = extra.to_string();
        } else {
            self.dupe_key = format!("{}-{}", self.dupe_key, extra);
        }
    }
}

fn parse_id(value: Option<&str>) -> Option<i64> {
    value.filter(|v| !v.is_empty()).and_then(|v| v.parse().ok())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn item_titled(title: &str) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn season_episode_parses_standard_scene_title() {
        let item = item_titled("Game.of.Clowns.S02E06.REAL.1080p.HDTV.X264-Group");
        assert_eq!(item.season(), Some("S02"));
        assert_eq!(item.episode(), Some("E06"));
        assert_eq!(item.season_num(), 2);
        assert_eq!(item.episode_num(), 6);
    }

    #[test]
    fn season_episode_handles_multi_episode_ranges() {
        let item = item_titled("Show.Name.S01E03-e04.720p");
        assert_eq!(item.season(), Some("S01"));
        assert_eq!(item.episode(), Some("E03-04"));
        assert_eq!(item.episode_num(), 3, "numeric episode is the first of the range");
    }

    #[test]
    fn season_episode_accepts_x_separator() {
        let item = item_titled("Show.Name.2x06.HDTV");
        assert_eq!(item.season(), Some("S02"));
        assert_eq!(item.episode_num(), 6);
    }

    #[test]
    fn title_without_episode_token_parses_to_nothing() {
        let item = item_titled("Some.Movie.2024.1080p.BluRay");
        // "2024.1080" has digits around the dot, not an s/e token with 'e' or 'x'
        assert_eq!(item.season(), None);
        assert_eq!(item.season_num(), 0);
        assert_eq!(item.episode_num(), 0);
    }

    #[test]
    fn age_is_zero_for_undated_items() {
        let item = item_titled("x");
        assert_eq!(item.age_seconds(Utc::now()), 0);
    }

    #[test]
    fn age_reflects_publication_time() {
        let mut item = item_titled("x");
        item.time = Some(Utc::now() - chrono::Duration::hours(15));
        let age = item.age_seconds(Utc::now());
        assert!((15 * 3600 - 5..=15 * 3600 + 5).contains(&age), "age was {age}");
    }

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let mut item = item_titled("x");
        item.attributes.push(("RageID".to_string(), "123".to_string()));
        assert_eq!(item.attribute("rageid"), Some("123"));
        assert_eq!(item.attribute("missing"), None);
    }

    #[test]
    fn build_dupe_key_prefers_numeric_ids() {
        let mut item = item_titled("Show.S02E06.HDTV.");
        item.build_dupe_key(Some("123456"), None, None, None);
        assert_eq!(item.dupe_key, "rageid=123456");
    }

    #[test]
    fn build_dupe_key_with_series_uses_season_episode() {
        let mut item = item_titled("Show.Name.S02E06.HDTV.x264");
        item.build_dupe_key(None, None, None, Some("Show Name"));
        assert_eq!(item.dupe_key, "series=show name-S02-E06");
    }

    #[test]
    fn append_dupe_key_joins_with_dash() {
        let mut item = item_titled("x");
        item.append_dupe_key("extra");
        assert_eq!(item.dupe_key, "extra");
        item.append_dupe_key("more");
        assert_eq!(item.dupe_key, "extra-more");
    }
}
