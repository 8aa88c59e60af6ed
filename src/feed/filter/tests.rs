//! Filter DSL tests: term grammar, matching modes, the precedence-free
//! reducer, options, and back-reference expansion.

use super::*;
use crate::feed::item::{FeedItem, MatchStatus};
use chrono::Utc;

/// The item from the reference scenario: a 1.6 GB HDTV episode, 15 hours
/// old, categorized "TV > HD", with a rageid attribute.
fn scenario_item() -> FeedItem {
    FeedItem {
        title: "Game.of.Clowns.S02E06.REAL.1080p.HDTV.X264-Group.WEB-DL".to_string(),
        filename: "Game.of.Clowns.S02E06.REAL.1080p.HDTV.X264-Group.WEB-DL".to_string(),
        category: "TV > HD".to_string(),
        size: (1.6 * 1024.0 * 1024.0 * 1024.0) as i64,
        time: Some(Utc::now() - chrono::Duration::hours(15)),
        rage_id: 123_456,
        ..Default::default()
    }
}

fn evaluate(filter: &str, item: &mut FeedItem) -> MatchStatus {
    FeedFilter::compile(filter).evaluate(item);
    item.match_status
}

#[test]
fn scenario_compound_filter_accepts() {
    let mut item = scenario_item();
    let status = evaluate(
        "HDTV category:*hd* -badgroup s02e* size:>600MB size:<2000MB",
        &mut item,
    );
    assert_eq!(status, MatchStatus::Accepted);
    assert_eq!(item.match_rule, 1);
}

#[test]
fn scenario_size_filter_ignores() {
    let mut item = scenario_item();
    assert_eq!(evaluate("size:<1.4GB", &mut item), MatchStatus::Ignored);
    assert_eq!(item.match_rule, 0);
}

#[test]
fn scenario_regex_filter_accepts() {
    let mut item = scenario_item();
    assert_eq!(
        evaluate(r"$game.*\.s02e[0-9]*\..*", &mut item),
        MatchStatus::Accepted
    );
}

#[test]
fn word_match_requires_whole_words() {
    let mut item = scenario_item();
    assert_eq!(evaluate("hdtv", &mut item), MatchStatus::Accepted);
    // "HDT" is not a word of the title, and word mode does not substring
    assert_eq!(evaluate("hdt", &mut item), MatchStatus::Ignored);
    // wrapping in stars switches to substring mode
    assert_eq!(evaluate("*hdt*", &mut item), MatchStatus::Accepted);
}

#[test]
fn parameter_with_separators_is_substring_match() {
    let mut item = scenario_item();
    // dots switch to substring search across the whole title
    assert_eq!(evaluate("game.of.clowns", &mut item), MatchStatus::Accepted);
    assert_eq!(evaluate("fame.of.clowns", &mut item), MatchStatus::Ignored);
}

#[test]
fn negative_term_inverts_the_match() {
    let mut item = scenario_item();
    assert_eq!(evaluate("-hdtv", &mut item), MatchStatus::Ignored);
    assert_eq!(evaluate("-betamax", &mut item), MatchStatus::Accepted);
}

#[test]
fn reject_rule_short_circuits() {
    let mut item = scenario_item();
    let status = evaluate("R:hdtv % A:game*", &mut item);
    assert_eq!(status, MatchStatus::Rejected);
    assert_eq!(item.match_rule, 1, "the reject rule decided the item");
}

#[test]
fn require_rule_rejects_when_unmet() {
    let mut item = scenario_item();
    assert_eq!(evaluate("Q:betamax % A:hdtv", &mut item), MatchStatus::Rejected);
    assert_eq!(item.match_rule, 1);

    let mut item = scenario_item();
    assert_eq!(evaluate("Q:hdtv % A:game*", &mut item), MatchStatus::Accepted);
    assert_eq!(item.match_rule, 2);
}

#[test]
fn comment_rules_are_skipped() {
    let mut item = scenario_item();
    let status = evaluate("# this comment mentions hdtv % A:game*", &mut item);
    assert_eq!(status, MatchStatus::Accepted);
    assert_eq!(item.match_rule, 2);
}

#[test]
fn or_operator_needs_explicit_braces_with_and() {
    let mut item = scenario_item();
    // (T | F) T -> T
    assert_eq!(
        evaluate("( hdtv | betamax ) game*", &mut item),
        MatchStatus::Accepted
    );
    // (F | F) -> F
    assert_eq!(
        evaluate("( betamax | vhs ) game*", &mut item),
        MatchStatus::Ignored
    );
}

#[test]
fn mixing_and_with_or_without_braces_stays_unreduced() {
    // "T F | T": TF -> F, then F|T -> T. The reducer has NO precedence,
    // so AND does not bind tighter than OR here. This quirk is load-bearing.
    let mut item = scenario_item();
    assert_eq!(
        evaluate("hdtv betamax | game*", &mut item),
        MatchStatus::Accepted,
        "TF|T reduces to F|T and then to T in the precedence-free reducer"
    );
}

#[test]
fn age_terms_parse_units() {
    let mut item = scenario_item(); // 15 hours old
    assert_eq!(evaluate("age:>10h", &mut item), MatchStatus::Accepted);
    assert_eq!(evaluate("age:<10h", &mut item), MatchStatus::Ignored);
    // bare numbers mean days
    assert_eq!(evaluate("age:<2", &mut item), MatchStatus::Accepted);
    assert_eq!(evaluate("age:>2", &mut item), MatchStatus::Ignored);
    assert_eq!(evaluate("age:>100m", &mut item), MatchStatus::Accepted);
}

#[test]
fn numeric_fields_compare_as_integers() {
    let mut item = scenario_item();
    assert_eq!(evaluate("rageid:=123456", &mut item), MatchStatus::Accepted);
    assert_eq!(evaluate("rageid:=999", &mut item), MatchStatus::Ignored);
    assert_eq!(evaluate("season:=2 episode:=6", &mut item), MatchStatus::Accepted);
}

#[test]
fn attr_fields_read_the_attribute_map() {
    let mut item = scenario_item();
    item.attributes
        .push(("grabs".to_string(), "42".to_string()));
    assert_eq!(evaluate("attr-grabs:=42", &mut item), MatchStatus::Accepted);
    assert_eq!(evaluate("attr-grabs:=7", &mut item), MatchStatus::Ignored);
}

#[test]
fn unknown_field_invalidates_the_rule_only() {
    let mut item = scenario_item();
    // first rule invalid (unknown field), second still evaluates
    let status = evaluate("bogusfield:x % A:hdtv", &mut item);
    assert_eq!(status, MatchStatus::Accepted);
    assert_eq!(item.match_rule, 2);
}

#[test]
fn accept_options_apply_category_pause_and_priority() {
    let mut item = scenario_item();
    let status = evaluate("A(category:Series, pause:yes, priority:50):hdtv", &mut item);
    assert_eq!(status, MatchStatus::Accepted);
    assert_eq!(item.add_category, "Series");
    assert!(item.pause_nzb);
    assert_eq!(item.priority, 50);
}

#[test]
fn short_option_aliases_work() {
    let mut item = scenario_item();
    evaluate("A(c:TV, p:no, r:10, s:100, k:tvshow):hdtv", &mut item);
    assert_eq!(item.add_category, "TV");
    assert!(!item.pause_nzb);
    assert_eq!(item.priority, 10);
    assert_eq!(item.dupe_score, 100);
    assert_eq!(item.dupe_key, "tvshow");
}

#[test]
fn additive_options_accumulate_over_options_rules() {
    let mut item = scenario_item();
    // Options rules do not short-circuit; the later Accept still applies
    let status = evaluate("O(s:100):hdtv % A(s+:11, r+:5):game*", &mut item);
    assert_eq!(status, MatchStatus::Accepted);
    assert_eq!(item.dupe_score, 111);
    assert_eq!(item.priority, 5);
    assert_eq!(item.match_rule, 2);
}

#[test]
fn dupemode_option_parses_all_modes() {
    for (value, expected) in [
        ("score", crate::types::DupeMode::Score),
        ("all", crate::types::DupeMode::All),
        ("f", crate::types::DupeMode::Force),
    ] {
        let mut item = scenario_item();
        evaluate(&format!("A(m:{value}):hdtv"), &mut item);
        assert_eq!(item.dupe_mode, expected, "dupemode {value}");
    }
}

#[test]
fn season_episode_variables_expand_in_dupekey() {
    let mut item = scenario_item();
    evaluate("A(k:show-${season}${episode}):hdtv", &mut item);
    assert_eq!(item.dupe_key, "show-S02E06");
}

#[test]
fn numbered_backreferences_expand_from_regex_captures() {
    let mut item = scenario_item();
    evaluate(r"A(k:ep-${1}): $s([0-9]+)e[0-9]+", &mut item);
    assert_eq!(item.dupe_key, "ep-02");
}

#[test]
fn series_option_builds_a_series_dupe_key() {
    let mut item = FeedItem {
        title: "Game.of.Clowns.S02E06.HDTV.x264-Group".to_string(),
        ..Default::default()
    };
    evaluate("A(series:Game of Clowns):hdtv", &mut item);
    assert_eq!(item.dupe_key, "series=game of clowns-S02-E06");
}

#[test]
fn rageid_option_builds_an_id_dupe_key() {
    let mut item = scenario_item();
    evaluate("A(rageid:99):hdtv", &mut item);
    assert_eq!(item.dupe_key, "rageid=99");
}

#[test]
fn legacy_bare_number_option_is_priority() {
    let mut item = scenario_item();
    evaluate("A(100):hdtv", &mut item);
    assert_eq!(item.priority, 100);
}

#[test]
fn legacy_bare_word_option_is_category() {
    let mut item = scenario_item();
    evaluate("A(Movies):hdtv", &mut item);
    assert_eq!(item.add_category, "Movies");
}

#[test]
fn evaluation_is_idempotent() {
    let filter = FeedFilter::compile("O(s:100):hdtv % A(s+:1):game*");
    let mut item = scenario_item();
    filter.evaluate(&mut item);
    let first = (item.match_status, item.match_rule, item.dupe_score);
    // score accumulated once; rerun resets nothing except re-applying options
    let mut item = scenario_item();
    filter.evaluate(&mut item);
    filter.evaluate(&mut item);
    // idempotence of match status and rule index
    assert_eq!((item.match_status, item.match_rule), (first.0, first.1));
}

#[test]
fn link_field_matches_url() {
    let mut item = scenario_item();
    item.url = "https://indexer.example/get/abcdef.nzb".to_string();
    assert_eq!(evaluate("link:*indexer.example*", &mut item), MatchStatus::Accepted);
    assert_eq!(evaluate("url:*other.example*", &mut item), MatchStatus::Ignored);
}

#[test]
fn empty_filter_ignores_everything() {
    let mut item = scenario_item();
    assert_eq!(evaluate("", &mut item), MatchStatus::Ignored);
}
