//! RSS/Atom feed ingestion
//!
//! Each configured feed owns a [`FeedState`]: its compiled filter, its
//! in-memory history (url → status / last-seen), and its status. The engine
//! fetches the feed document on the configured interval and hands it to
//! [`FeedState::process_document`], which parses, classifies against the
//! history, runs the filter over new items, and returns the accepted ones so
//! the engine can synthesize download requests.

pub mod filter;
pub mod item;
pub mod parser;

pub use filter::FeedFilter;
pub use item::{FeedItem, FeedItemStatus, MatchStatus};

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::FeedConfig;
use crate::error::Result;

/// Lifecycle status of one feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FeedStatus {
    /// Never fetched
    #[default]
    Undefined,
    /// Fetch in progress
    Running,
    /// Last fetch succeeded
    Finished,
    /// Last fetch failed
    Failed,
}

/// Per-url history entry used to classify items as new/backlog/fetched.
#[derive(Clone, Debug)]
struct HistoryEntry {
    status: FeedItemStatus,
    last_seen: DateTime<Utc>,
}

/// State of one configured feed.
pub struct FeedState {
    /// Feed configuration
    pub config: FeedConfig,
    filter: FeedFilter,
    history: HashMap<String, HistoryEntry>,
    /// Lifecycle status
    pub status: FeedStatus,
    /// Last successful fetch time
    pub last_update: Option<DateTime<Utc>>,
    first_pass: bool,
}

impl FeedState {
    /// Build feed state with a compiled filter.
    pub fn new(config: FeedConfig) -> Self {
        let filter = FeedFilter::compile(&config.filter);
        Self {
            config,
            filter,
            history: HashMap::new(),
            status: FeedStatus::Undefined,
            last_update: None,
            first_pass: true,
        }
    }

    /// Number of urls currently remembered.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Classify and filter a fetched feed document. Returns the items that
    /// are `New` and `Accepted` — the ones to turn into download requests.
    ///
    /// On the very first pass every item is classified `Backlog` and nothing
    /// is returned: the engine only auto-fetches items that appear after it
    /// started watching the feed.
    pub fn process_document(
        &mut self,
        content: &str,
        queued_dupe_keys: &dyn Fn(&str) -> bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeedItem>> {
        let mut items = parser::parse_feed(content)?;
        let mut accepted = Vec::new();

        for item in &mut items {
            if item.url.is_empty() {
                continue;
            }
            let known = self.history.get(&item.url).map(|e| e.status);
            item.status = match known {
                Some(status) => {
                    // seen before: refresh last_seen, keep its class
                    if let Some(entry) = self.history.get_mut(&item.url) {
                        entry.last_seen = now;
                    }
                    status
                }
                None if self.first_pass => {
                    self.history.insert(
                        item.url.clone(),
                        HistoryEntry {
                            status: FeedItemStatus::Backlog,
                            last_seen: now,
                        },
                    );
                    FeedItemStatus::Backlog
                }
                None => FeedItemStatus::New,
            };

            if item.status != FeedItemStatus::New {
                continue;
            }

            // feed-level defaults the filter may override
            item.add_category = self.config.category.clone();
            item.priority = self.config.priority;
            item.pause_nzb = self.config.pause_nzb;
            item.dupe_status = if queued_dupe_keys(&item.dupe_key) {
                "QUEUED".to_string()
            } else {
                String::new()
            };

            self.filter.evaluate(item);

            let fetched = item.match_status == MatchStatus::Accepted;
            self.history.insert(
                item.url.clone(),
                HistoryEntry {
                    status: if fetched {
                        FeedItemStatus::Fetched
                    } else {
                        FeedItemStatus::Backlog
                    },
                    last_seen: now,
                },
            );
            if fetched {
                accepted.push(item.clone());
            }
        }

        self.purge_history(now);
        self.first_pass = false;
        self.last_update = Some(now);
        self.status = FeedStatus::Finished;
        Ok(accepted)
    }

    /// Drop history entries whose url vanished from the feed longer ago than
    /// the configured horizon.
    fn purge_history(&mut self, now: DateTime<Utc>) {
        let horizon = chrono::Duration::days(self.config.history_days.max(1) as i64);
        self.history.retain(|_, entry| now - entry.last_seen <= horizon);
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn feed_config(filter: &str) -> FeedConfig {
        FeedConfig {
            name: "indexer".to_string(),
            url: "https://indexer.example/rss".to_string(),
            interval_minutes: 15,
            filter: filter.to_string(),
            pause_nzb: false,
            category: "tv".to_string(),
            priority: 10,
            history_days: 7,
        }
    }

    fn doc(titles_and_urls: &[(&str, &str)]) -> String {
        let items: String = titles_and_urls
            .iter()
            .map(|(title, url)| {
                format!(
                    "<item><title>{title}</title>\
                     <enclosure url=\"{url}\" length=\"1073741824\" type=\"application/x-nzb\"/>\
                     </item>"
                )
            })
            .collect();
        format!(
            "<rss version=\"2.0\"><channel><title>t</title>{items}</channel></rss>"
        )
    }

    fn no_dupes(_key: &str) -> bool {
        false
    }

    #[test]
    fn first_pass_marks_everything_backlog() {
        let mut state = FeedState::new(feed_config(""));
        let accepted = state
            .process_document(
                &doc(&[("A.S01E01.HDTV", "https://x/1.nzb")]),
                &no_dupes,
                Utc::now(),
            )
            .unwrap();
        assert!(accepted.is_empty(), "backlog items are never auto-fetched");
        assert_eq!(state.history_len(), 1);
    }

    #[test]
    fn new_items_after_first_pass_are_filtered_and_returned() {
        let mut state = FeedState::new(feed_config("A:hdtv"));
        let now = Utc::now();
        state
            .process_document(&doc(&[("Old.S01E01.HDTV", "https://x/1.nzb")]), &no_dupes, now)
            .unwrap();

        let accepted = state
            .process_document(
                &doc(&[
                    ("Old.S01E01.HDTV", "https://x/1.nzb"),
                    ("New.S01E02.HDTV", "https://x/2.nzb"),
                    ("New.S01E03.WEB", "https://x/3.nzb"),
                ]),
                &no_dupes,
                now,
            )
            .unwrap();
        assert_eq!(accepted.len(), 1, "only the new HDTV item is accepted");
        assert_eq!(accepted[0].url, "https://x/2.nzb");
        assert_eq!(accepted[0].status, FeedItemStatus::New);
        assert_eq!(accepted[0].match_status, MatchStatus::Accepted);
    }

    #[test]
    fn feed_defaults_flow_into_accepted_items() {
        let mut state = FeedState::new(feed_config("A:hdtv"));
        let now = Utc::now();
        state.process_document(&doc(&[]), &no_dupes, now).unwrap();
        let accepted = state
            .process_document(&doc(&[("X.S01E01.HDTV", "https://x/9.nzb")]), &no_dupes, now)
            .unwrap();
        assert_eq!(accepted[0].add_category, "tv");
        assert_eq!(accepted[0].priority, 10);
    }

    #[test]
    fn rejected_new_items_land_in_backlog_not_fetched() {
        let mut state = FeedState::new(feed_config("A:hdtv"));
        let now = Utc::now();
        state.process_document(&doc(&[]), &no_dupes, now).unwrap();
        state
            .process_document(&doc(&[("X.S01E01.WEB", "https://x/5.nzb")]), &no_dupes, now)
            .unwrap();

        // the same item again: already in history, no refetch
        let accepted = state
            .process_document(&doc(&[("X.S01E01.WEB", "https://x/5.nzb")]), &no_dupes, now)
            .unwrap();
        assert!(accepted.is_empty());
    }

    #[test]
    fn history_purges_items_gone_past_the_horizon() {
        let mut state = FeedState::new(feed_config(""));
        let start = Utc::now();
        state
            .process_document(&doc(&[("A", "https://x/1.nzb")]), &no_dupes, start)
            .unwrap();
        assert_eq!(state.history_len(), 1);

        // ten days later the item is gone from the feed
        let later = start + chrono::Duration::days(10);
        state.process_document(&doc(&[]), &no_dupes, later).unwrap();
        assert_eq!(state.history_len(), 0, "7-day horizon must purge the entry");
    }

    #[test]
    fn accepted_item_is_not_refetched_next_pass() {
        let mut state = FeedState::new(feed_config("A:hdtv"));
        let now = Utc::now();
        state.process_document(&doc(&[]), &no_dupes, now).unwrap();
        let pass1 = state
            .process_document(&doc(&[("X.HDTV", "https://x/7.nzb")]), &no_dupes, now)
            .unwrap();
        assert_eq!(pass1.len(), 1);
        let pass2 = state
            .process_document(&doc(&[("X.HDTV", "https://x/7.nzb")]), &no_dupes, now)
            .unwrap();
        assert!(pass2.is_empty(), "fetched items must not be fetched twice");
    }

    #[test]
    fn dupe_status_reflects_queue_lookup() {
        let mut state = FeedState::new(feed_config("Q:-dupestatus:*queued*"));
        let now = Utc::now();
        state.process_document(&doc(&[]), &no_dupes, now).unwrap();
        let accepted = state
            .process_document(
                &doc(&[("X.HDTV", "https://x/8.nzb")]),
                &|_key: &str| true,
                now,
            )
            .unwrap();
        assert!(
            accepted.is_empty(),
            "items already queued by dupe key must fail the require rule"
        );
    }
}
