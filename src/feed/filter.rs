//! Feed filter expression engine
//!
//! A filter is a `%`-separated list of rules. Each rule starts with a command
//! (`A:`/`Accept:`, `A(...):`, `R:`/`Reject:`, `Q:`/`Require:`, `O(...)`,
//! `#` comment; no command means accept), followed by space-separated terms.
//! A term is `[±][field:]<op><param>` where the op is text match (implicit or
//! `@`), regex (`$`), a numeric comparison (`=`, `<`, `<=`, `>`, `>=`), or
//! grouping (`(`, `)`, `|`).
//!
//! Evaluation turns the terms into a string of `T`/`F`/`(`/`)`/`|` and
//! reduces it by literal rewriting. There are deliberately no operator
//! priorities: the order of `OR` and `AND` is not defined and they should not
//! be mixed in one group without braces. Re-implementations must keep this
//! quirk.

use chrono::Utc;
use regex::Regex;

use super::item::{FeedItem, MatchStatus};
use crate::types::DupeMode;
use crate::utils::wild_match;

/// Characters that split a text value into words for word-mode matching.
const WORD_SEPARATORS: &str = " !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TermCommand {
    Text,
    Regex,
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    OpeningBrace,
    ClosingBrace,
    OrOperator,
}

#[derive(Debug, Clone)]
struct Term {
    positive: bool,
    field: Option<String>,
    command: TermCommand,
    param: String,
    int_param: i64,
    float_param: f64,
    float: bool,
    regex: Option<Regex>,
}

enum FieldValue {
    Str(String),
    Int(i64),
}

fn field_is_known(field: &str) -> bool {
    matches!(
        field.to_ascii_lowercase().as_str(),
        "title"
            | "filename"
            | "category"
            | "link"
            | "url"
            | "size"
            | "age"
            | "imdbid"
            | "rageid"
            | "tvdbid"
            | "tvmazeid"
            | "description"
            | "season"
            | "episode"
            | "priority"
            | "dupekey"
            | "dupescore"
            | "dupestatus"
    ) || field.to_ascii_lowercase().starts_with("attr-")
}

fn field_value(field: Option<&str>, item: &FeedItem) -> Option<FieldValue> {
    let name = field.unwrap_or("title").to_ascii_lowercase();
    let value = match name.as_str() {
        "title" => FieldValue::Str(item.title.clone()),
        "filename" => FieldValue::Str(item.filename.clone()),
        "category" => FieldValue::Str(item.category.clone()),
        "link" | "url" => FieldValue::Str(item.url.clone()),
        "size" => FieldValue::Int(item.size),
        "age" => FieldValue::Int(item.age_seconds(Utc::now())),
        "imdbid" => FieldValue::Int(item.imdb_id),
        "rageid" => FieldValue::Int(item.rage_id),
        "tvdbid" => FieldValue::Int(item.tvdb_id),
        "tvmazeid" => FieldValue::Int(item.tvmaze_id),
        "description" => FieldValue::Str(item.description.clone()),
        "season" => FieldValue::Int(item.season_num()),
        "episode" => FieldValue::Int(item.episode_num()),
        "priority" => FieldValue::Int(item.priority as i64),
        "dupekey" => FieldValue::Str(item.dupe_key.clone()),
        "dupescore" => FieldValue::Int(item.dupe_score as i64),
        "dupestatus" => FieldValue::Str(item.dupe_status.clone()),
        other => {
            let attr = other.strip_prefix("attr-")?;
            FieldValue::Str(item.attribute(attr).unwrap_or("").to_string())
        }
    };
    Some(value)
}

impl Term {
    /// Compile one term token.
    fn compile(token: &str) -> Option<Term> {
        let mut rest = token;
        let mut positive = true;
        if let Some(stripped) = rest.strip_prefix('-') {
            positive = false;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped;
        }

        // lone grouping tokens
        if rest.len() == 1 {
            let command = match rest.as_bytes()[0] {
                b'(' => Some(TermCommand::OpeningBrace),
                b')' => Some(TermCommand::ClosingBrace),
                b'|' => Some(TermCommand::OrOperator),
                _ => None,
            };
            if let Some(command) = command {
                return Some(Term {
                    positive,
                    field: None,
                    command,
                    param: String::new(),
                    int_param: 0,
                    float_param: 0.0,
                    float: false,
                    regex: None,
                });
            }
        }

        // field prefix, unless the token starts with an operator character
        let mut field: Option<String> = None;
        let first = rest.chars().next()?;
        if !matches!(first, '@' | '$' | '<' | '>' | '=')
            && let Some(colon) = rest.find(':')
        {
            field = Some(rest[..colon].to_string());
            rest = &rest[colon + 1..];
        }

        if rest.is_empty() {
            return None;
        }

        let command;
        if let Some(stripped) = rest.strip_prefix('@') {
            command = TermCommand::Text;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('$') {
            command = TermCommand::Regex;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("<=") {
            command = TermCommand::LessEqual;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix(">=") {
            command = TermCommand::GreaterEqual;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('=') {
            command = TermCommand::Equal;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('<') {
            command = TermCommand::Less;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('>') {
            command = TermCommand::Greater;
            rest = stripped;
        } else {
            command = TermCommand::Text;
        }

        if let Some(f) = &field
            && !field_is_known(f)
        {
            return None;
        }

        let mut term = Term {
            positive,
            field,
            command,
            param: rest.to_string(),
            int_param: 0,
            float_param: 0.0,
            float: false,
            regex: None,
        };

        if let Some(f) = term.field.clone()
            && !term.parse_param(&f)
        {
            return None;
        }

        if term.command == TermCommand::Regex {
            let built = regex::RegexBuilder::new(&term.param)
                .case_insensitive(true)
                .size_limit(1024 * 1024)
                .build();
            match built {
                Ok(re) => term.regex = Some(re),
                Err(_) => return None,
            }
        }

        Some(term)
    }

    fn parse_param(&mut self, field: &str) -> bool {
        let lower = field.to_ascii_lowercase();
        if lower == "size" {
            self.parse_size_param()
        } else if lower == "age" {
            self.parse_age_param()
        } else if self.command >= TermCommand::Equal && self.command <= TermCommand::GreaterEqual {
            self.parse_numeric_param()
        } else {
            true
        }
    }

    fn split_number_suffix(&self) -> (f64, String) {
        let digits_end = self
            .param
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(self.param.len());
        let number: f64 = self.param[..digits_end].parse().unwrap_or(0.0);
        (number, self.param[digits_end..].to_string())
    }

    fn parse_size_param(&mut self) -> bool {
        let (number, suffix) = self.split_number_suffix();
        let factor: i64 = match suffix.to_ascii_uppercase().as_str() {
            "" => 1,
            "K" | "KB" => 1024,
            "M" | "MB" => 1024 * 1024,
            "G" | "GB" => 1024 * 1024 * 1024,
            _ => return false,
        };
        self.int_param = (number * factor as f64) as i64;
        true
    }

    fn parse_age_param(&mut self) -> bool {
        let (number, suffix) = self.split_number_suffix();
        let factor: i64 = match suffix.to_ascii_lowercase().as_str() {
            "m" => 60,
            "h" => 60 * 60,
            // days by default
            "" | "d" => 60 * 60 * 24,
            _ => return false,
        };
        self.int_param = (number * factor as f64) as i64;
        true
    }

    fn parse_numeric_param(&mut self) -> bool {
        self.float = self.param.contains('.');
        self.float_param = self.param.parse().unwrap_or(0.0);
        self.int_param = self.float_param as i64;
        self.param
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    }

    /// Evaluate the term against an item; captured submatches (for `${N}`)
    /// are appended to `refs`.
    fn matches(&self, item: &FeedItem, refs: Option<&mut Vec<String>>) -> bool {
        let Some(value) = field_value(self.field.as_deref(), item) else {
            return false;
        };
        let matched = self.match_value(value, refs);
        self.positive == matched
    }

    fn match_value(&self, value: FieldValue, refs: Option<&mut Vec<String>>) -> bool {
        match self.command {
            TermCommand::Text => {
                let text = match value {
                    FieldValue::Str(s) => s,
                    FieldValue::Int(i) => i.to_string(),
                };
                self.match_text(&text, refs)
            }
            TermCommand::Regex => {
                let text = match value {
                    FieldValue::Str(s) => s,
                    FieldValue::Int(i) => i.to_string(),
                };
                self.match_regex(&text, refs)
            }
            TermCommand::Equal
            | TermCommand::Less
            | TermCommand::LessEqual
            | TermCommand::Greater
            | TermCommand::GreaterEqual => {
                let (int_value, float_value) = match value {
                    FieldValue::Int(i) => (i, i as f64),
                    FieldValue::Str(s) => {
                        let f: f64 = s.trim().parse().unwrap_or(0.0);
                        (f as i64, f)
                    }
                };
                if self.float {
                    match self.command {
                        TermCommand::Equal => float_value == self.float_param,
                        TermCommand::Less => float_value < self.float_param,
                        TermCommand::LessEqual => float_value <= self.float_param,
                        TermCommand::Greater => float_value > self.float_param,
                        TermCommand::GreaterEqual => float_value >= self.float_param,
                        _ => false,
                    }
                } else {
                    match self.command {
                        TermCommand::Equal => int_value == self.int_param,
                        TermCommand::Less => int_value < self.int_param,
                        TermCommand::LessEqual => int_value <= self.int_param,
                        TermCommand::Greater => int_value > self.int_param,
                        TermCommand::GreaterEqual => int_value >= self.int_param,
                        _ => false,
                    }
                }
            }
            _ => false,
        }
    }

    /// Word match by default; substring match when the parameter is wrapped
    /// in `*...*` or contains a word separator itself.
    fn match_text(&self, text: &str, refs: Option<&mut Vec<String>>) -> bool {
        let param = self.param.as_str();
        let wrapped = param.len() >= 2 && param.starts_with('*') && param.ends_with('*');
        let substr = wrapped
            || param.chars().any(|c| {
                WORD_SEPARATORS.contains(c) && c != '*' && c != '?' && c != '#'
            });

        if !substr {
            // word-search: split the value on separators, match each word
            for word in text
                .split(|c: char| WORD_SEPARATORS.contains(c))
                .filter(|w| !w.is_empty())
            {
                if let Some(captures) = wild_captures(param, word) {
                    if let Some(refs) = refs {
                        refs.extend(captures);
                    }
                    return true;
                }
            }
            false
        } else {
            // substring-search: wrap in stars unless already anchored
            let (pattern, skip_first_ref) = if wrapped {
                (param.to_string(), 0)
            } else if param.starts_with('*') {
                (format!("{param}*"), 0)
            } else if param.ends_with('*') {
                (format!("*{param}"), 1)
            } else {
                (format!("*{param}*"), 1)
            };
            if let Some(captures) = wild_captures(&pattern, text) {
                if let Some(refs) = refs {
                    refs.extend(captures.into_iter().skip(skip_first_ref));
                }
                return true;
            }
            false
        }
    }

    fn match_regex(&self, text: &str, refs: Option<&mut Vec<String>>) -> bool {
        let Some(re) = &self.regex else {
            return false;
        };
        match re.captures(text) {
            Some(caps) => {
                if let Some(refs) = refs {
                    for group in caps.iter().skip(1).flatten() {
                        refs.push(group.as_str().to_string());
                    }
                }
                true
            }
            None => false,
        }
    }
}

/// Wildcard match (`*`, `?`, `#`) recording the span every wildcard consumed.
/// Case-insensitive. Returns `None` on mismatch.
fn wild_captures(pattern: &str, value: &str) -> Option<Vec<String>> {
    if !wild_match(pattern, value) {
        return None;
    }
    let p: Vec<char> = pattern.chars().flat_map(|c| c.to_lowercase()).collect();
    let v: Vec<char> = value.chars().collect();
    let v_lower: Vec<char> = value.chars().flat_map(|c| c.to_lowercase()).collect();
    // lowercase can change char counts for exotic scripts; fall back to no refs
    if v.len() != v_lower.len() {
        return Some(Vec::new());
    }
    let mut captures = Vec::new();
    if capture_at(&p, &v_lower, 0, &mut captures) {
        Some(
            captures
                .iter()
                .map(|&(start, len)| v[start..start + len].iter().collect())
                .collect(),
        )
    } else {
        Some(Vec::new())
    }
}

fn capture_at(p: &[char], v: &[char], pos: usize, captures: &mut Vec<(usize, usize)>) -> bool {
    match p.first() {
        None => pos == v.len(),
        Some('*') => {
            for take in 0..=(v.len() - pos) {
                captures.push((pos, take));
                if capture_at(&p[1..], v, pos + take, captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        Some('?') => {
            if pos < v.len() {
                captures.push((pos, 1));
                if capture_at(&p[1..], v, pos + 1, captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        Some('#') => {
            if pos < v.len() && v[pos].is_ascii_digit() {
                captures.push((pos, 1));
                if capture_at(&p[1..], v, pos + 1, captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        Some(&c) => pos < v.len() && v[pos] == c && capture_at(&p[1..], v, pos + 1, captures),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleCommand {
    Accept,
    Reject,
    Require,
    Options,
    Comment,
}

/// One compiled filter rule: a command, its options, and its terms.
struct Rule {
    command: RuleCommand,
    is_valid: bool,
    terms: Vec<Term>,
    category: Option<String>,
    pause: Option<bool>,
    priority: Option<i32>,
    add_priority: Option<i32>,
    dupe_score: Option<i32>,
    add_dupe_score: Option<i32>,
    dupe_key: Option<String>,
    add_dupe_key: Option<String>,
    dupe_mode: Option<DupeMode>,
    rage_id: Option<String>,
    tvdb_id: Option<String>,
    tvmaze_id: Option<String>,
    series: Option<String>,
}

impl Rule {
    fn empty(command: RuleCommand) -> Self {
        Self {
            command,
            is_valid: true,
            terms: Vec::new(),
            category: None,
            pause: None,
            priority: None,
            add_priority: None,
            dupe_score: None,
            add_dupe_score: None,
            dupe_key: None,
            add_dupe_key: None,
            dupe_mode: None,
            rage_id: None,
            tvdb_id: None,
            tvmaze_id: None,
            series: None,
        }
    }

    fn wants_refs(&self) -> bool {
        let has_pattern = |v: &Option<String>| v.as_deref().is_some_and(|s| s.contains("${"));
        has_pattern(&self.category) || has_pattern(&self.dupe_key) || has_pattern(&self.add_dupe_key)
    }

    fn compile(rule_str: &str) -> Self {
        let trimmed = rule_str.trim();
        let mut rule = Rule::empty(RuleCommand::Accept);

        let rest = match rule.compile_command(trimmed) {
            Some(rest) => rest,
            None => {
                rule.is_valid = false;
                return rule;
            }
        };
        if rule.command == RuleCommand::Comment {
            return rule;
        }

        for token in rest.split(' ').filter(|t| !t.is_empty()) {
            match Term::compile(token) {
                Some(term) => rule.terms.push(term),
                None => {
                    rule.is_valid = false;
                    return rule;
                }
            }
        }
        rule
    }

    /// Strip the leading command and (for `A(...)`/`O(...)`) its options.
    /// Returns the remaining term text, or `None` on a malformed rule.
    fn compile_command<'a>(&mut self, rule: &'a str) -> Option<&'a str> {
        let lower = rule.to_ascii_lowercase();
        let (command, consumed, has_options) = if lower.starts_with("accept(") {
            (RuleCommand::Accept, 7, true)
        } else if lower.starts_with("accept:") {
            (RuleCommand::Accept, 7, false)
        } else if lower.starts_with("a(") {
            (RuleCommand::Accept, 2, true)
        } else if lower.starts_with("a:") {
            (RuleCommand::Accept, 2, false)
        } else if lower.starts_with("options(") {
            (RuleCommand::Options, 8, true)
        } else if lower.starts_with("o(") {
            (RuleCommand::Options, 2, true)
        } else if lower.starts_with("reject:") {
            (RuleCommand::Reject, 7, false)
        } else if lower.starts_with("r:") {
            (RuleCommand::Reject, 2, false)
        } else if lower.starts_with("require:") {
            (RuleCommand::Require, 8, false)
        } else if lower.starts_with("q:") {
            (RuleCommand::Require, 2, false)
        } else if rule.starts_with('#') {
            self.command = RuleCommand::Comment;
            return Some(rule);
        } else {
            // no command prefix: plain accept terms
            return Some(rule);
        };

        self.command = command;
        let mut rest = &rule[consumed..];
        if has_options {
            rest = self.compile_options(rest)?;
        }
        Some(rest.trim_start())
    }

    /// Parse `key:value, key2, ...)` options; returns text after the `)`.
    fn compile_options<'a>(&mut self, rule: &'a str) -> Option<&'a str> {
        let close = rule.find(')')?;
        let options = &rule[..close];
        for option in options.split(',') {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            let (key, value) = match option.split_once(':') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (option, ""),
            };
            let key_lower = key.to_ascii_lowercase();
            match key_lower.as_str() {
                "category" | "cat" | "c" => self.category = Some(value.to_string()),
                "pause" | "p" => {
                    let on = value.is_empty()
                        || value.eq_ignore_ascii_case("yes")
                        || value.eq_ignore_ascii_case("y");
                    let off = value.eq_ignore_ascii_case("no") || value.eq_ignore_ascii_case("n");
                    if !on && !off {
                        return None;
                    }
                    self.pause = Some(on);
                }
                "priority" | "pr" | "r" => {
                    self.priority = Some(parse_signed(value)?);
                }
                "priority+" | "pr+" | "r+" => {
                    self.add_priority = Some(parse_signed(value)?);
                }
                "dupescore" | "ds" | "s" => {
                    self.dupe_score = Some(parse_signed(value)?);
                }
                "dupescore+" | "ds+" | "s+" => {
                    self.add_dupe_score = Some(parse_signed(value)?);
                }
                "dupekey" | "dk" | "k" => self.dupe_key = Some(value.to_string()),
                "dupekey+" | "dk+" | "k+" => self.add_dupe_key = Some(value.to_string()),
                "dupemode" | "dm" | "m" => {
                    self.dupe_mode = Some(match value.to_ascii_lowercase().as_str() {
                        "score" | "s" => DupeMode::Score,
                        "all" | "a" => DupeMode::All,
                        "force" | "f" => DupeMode::Force,
                        _ => return None,
                    });
                }
                "rageid" => self.rage_id = Some(value.to_string()),
                "tvdbid" => self.tvdb_id = Some(value.to_string()),
                "tvmazeid" => self.tvmaze_id = Some(value.to_string()),
                "series" => self.series = Some(value.to_string()),
                // compatibility with older filter versions
                "paused" => self.pause = Some(true),
                "unpaused" => self.pause = Some(false),
                _ => {
                    if key.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
                        self.priority = parse_signed(key);
                    } else {
                        self.category = Some(key.to_string());
                    }
                }
            }
        }
        let mut rest = &rule[close + 1..];
        if let Some(stripped) = rest.strip_prefix(':') {
            rest = stripped;
        }
        Some(rest)
    }

    /// Evaluate the rule's expression against an item; `refs` collects
    /// submatches for `${N}` expansion.
    fn matches(&self, item: &FeedItem, refs: &mut Vec<String>) -> bool {
        refs.clear();
        let want_refs = self.wants_refs();

        let mut expr = String::with_capacity(self.terms.len());
        for term in &self.terms {
            let ch = match term.command {
                TermCommand::OpeningBrace => '(',
                TermCommand::ClosingBrace => ')',
                TermCommand::OrOperator => '|',
                _ => {
                    let term_refs = if want_refs { Some(&mut *refs) } else { None };
                    if term.matches(item, term_refs) { 'T' } else { 'F' }
                }
            };
            expr.push(ch);
        }

        // reduce the expression tree to one element. NOTE: there are no
        // operator priorities; OR and AND should not be mixed in one group.
        loop {
            let before = expr.len();
            for (from, to) in [
                ("TT", "T"),
                ("TF", "F"),
                ("FT", "F"),
                ("FF", "F"),
                ("||", "|"),
                ("(|", "("),
                ("|)", ")"),
                ("T|T", "T"),
                ("T|F", "T"),
                ("F|T", "T"),
                ("F|F", "F"),
                ("(T)", "T"),
                ("(F)", "F"),
            ] {
                while expr.contains(from) {
                    expr = expr.replace(from, to);
                }
            }
            if expr.len() == before {
                break;
            }
        }

        expr == "T"
    }

    fn expand(template: &str, item: &FeedItem, refs: &[String]) -> String {
        let mut value = template.to_string();
        let mut attempts = 0;
        while let Some(start) = value.find("${") {
            attempts += 1;
            if attempts > 100 {
                break;
            }
            let Some(end_rel) = value[start..].find('}') else {
                break;
            };
            let end = start + end_rel;
            let var = &value[start + 2..end];
            let replacement = if var.eq_ignore_ascii_case("season") {
                item.season().unwrap_or("").to_string()
            } else if var.eq_ignore_ascii_case("episode") {
                item.episode().unwrap_or("").to_string()
            } else {
                let index: usize = match var.parse::<usize>() {
                    Ok(n) if n >= 1 => n - 1,
                    _ => break,
                };
                match refs.get(index) {
                    Some(v) => v.clone(),
                    None => break,
                }
            };
            value.replace_range(start..=end, &replacement);
        }
        value
    }

    fn apply_options(&self, item: &mut FeedItem, refs: &[String]) {
        if let Some(pause) = self.pause {
            item.pause_nzb = pause;
        }
        if let Some(category) = &self.category {
            item.add_category = Self::expand(category, item, refs);
        }
        if let Some(priority) = self.priority {
            item.priority = priority;
        }
        if let Some(add) = self.add_priority {
            item.priority += add;
        }
        if let Some(score) = self.dupe_score {
            item.dupe_score = score;
        }
        if let Some(add) = self.add_dupe_score {
            item.dupe_score += add;
        }
        if self.rage_id.is_some()
            || self.tvdb_id.is_some()
            || self.tvmaze_id.is_some()
            || self.series.is_some()
        {
            item.build_dupe_key(
                self.rage_id.as_deref(),
                self.tvdb_id.as_deref(),
                self.tvmaze_id.as_deref(),
                self.series.as_deref(),
            );
        }
        if let Some(key) = &self.dupe_key {
            item.dupe_key = Self::expand(key, item, refs);
        }
        if let Some(extra) = &self.add_dupe_key {
            let expanded = Self::expand(extra, item, refs);
            item.append_dupe_key(&expanded);
        }
        if let Some(mode) = self.dupe_mode {
            item.dupe_mode = mode;
        }
    }
}

fn parse_signed(value: &str) -> Option<i32> {
    if !value.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
        return None;
    }
    // leading-number parse, tolerating trailing junk the way atoi does
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// A compiled feed filter: rules separated by `%`.
pub struct FeedFilter {
    rules: Vec<Rule>,
}

impl FeedFilter {
    /// Compile a filter expression. Individual invalid rules are kept but
    /// never match (the rest of the filter still works).
    pub fn compile(filter: &str) -> Self {
        let rules = filter.split('%').map(Rule::compile).collect();
        Self { rules }
    }

    /// Number of compiled rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate the filter against an item, setting its match status, rule
    /// index and option-derived fields.
    pub fn evaluate(&self, item: &mut FeedItem) {
        item.match_status = MatchStatus::Ignored;
        item.match_rule = 0;
        let mut refs = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let rule_number = index as u32 + 1;
            if !rule.is_valid {
                continue;
            }
            match rule.command {
                RuleCommand::Accept | RuleCommand::Options => {
                    if rule.matches(item, &mut refs) {
                        item.match_status = MatchStatus::Accepted;
                        item.match_rule = rule_number;
                        rule.apply_options(item, &refs);
                        if rule.command == RuleCommand::Accept {
                            return;
                        }
                    }
                }
                RuleCommand::Reject => {
                    if rule.matches(item, &mut refs) {
                        item.match_status = MatchStatus::Rejected;
                        item.match_rule = rule_number;
                        return;
                    }
                }
                RuleCommand::Require => {
                    if !rule.matches(item, &mut refs) {
                        item.match_status = MatchStatus::Rejected;
                        item.match_rule = rule_number;
                        return;
                    }
                }
                RuleCommand::Comment => {}
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
