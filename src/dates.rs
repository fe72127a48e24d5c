//! Japanese era-date normalization.
//!
//! Report tables date transactions either in the era convention
//! (era name + era-relative year + month + day, e.g. 令和6年5月10日 or the
//! abbreviated R6.5.10) or as a plain Gregorian year-month-day. This module
//! folds both into ISO `YYYY-MM-DD`.
//!
//! A string that matches neither convention is returned unchanged; callers
//! treat it as "unparsed", and the failure is logged rather than raised.

use chrono::NaiveDate;
use regex::Regex;
use tracing::warn;

/// Gregorian year of the year *before* year 1 of each era, so that
/// `base + era_year` gives the Gregorian year.
const ERA_BASES: [(&str, i32); 3] = [("令和", 2018), ("平成", 1988), ("昭和", 1925)];

/// Fold full-width digits and date punctuation to their ASCII forms and
/// drop bracketing characters.
pub fn to_halfwidth(input: &str) -> String {
    input
        .chars()
        .filter_map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
            '．' => Some('.'),
            '／' => Some('/'),
            '－' => Some('-'),
            '，' => Some(','),
            '：' => Some(':'),
            '　' => Some(' '),
            '（' | '）' | '(' | ')' | '「' | '」' | '［' | '］' | '[' | ']' | '【' | '】' => None,
            _ => Some(c),
        })
        .collect()
}

/// Normalize a date string to ISO `YYYY-MM-DD`. Era form is tried first,
/// then a four-digit Gregorian form sanity-checked to [1900, 2100]. Anything
/// else comes back unchanged.
pub fn normalize_date(input: &str) -> String {
    let cleaned = to_halfwidth(input.trim());

    if let Some(date) = parse_era_date(&cleaned).or_else(|| parse_gregorian_date(&cleaned)) {
        return date;
    }

    warn!(input, "date string did not match era or Gregorian form");
    input.to_string()
}

fn parse_era_date(s: &str) -> Option<String> {
    let re = Regex::new(
        r"(令和|平成|昭和|[RHS])\s*(元|\d{1,2})\s*[年.\-/]\s*(\d{1,2})\s*[月.\-/]\s*(\d{1,2})\s*日?",
    )
    .unwrap();
    let caps = re.captures(s)?;

    let era = match &caps[1] {
        "令和" | "R" => "令和",
        "平成" | "H" => "平成",
        "昭和" | "S" => "昭和",
        _ => return None,
    };
    let base = ERA_BASES.iter().find(|(name, _)| *name == era)?.1;

    // 元年 denotes year one of the era.
    let era_year: i32 = if &caps[2] == "元" {
        1
    } else {
        caps[2].parse().ok()?
    };
    if era_year == 0 {
        return None;
    }

    let year = base + era_year;
    let month: u32 = caps[3].parse().ok()?;
    let day: u32 = caps[4].parse().ok()?;

    format_checked(year, month, day)
}

fn parse_gregorian_date(s: &str) -> Option<String> {
    let re = Regex::new(r"(\d{4})\s*[年.\-/]\s*(\d{1,2})\s*[月.\-/]\s*(\d{1,2})\s*日?").unwrap();
    let caps = re.captures(s)?;

    let year: i32 = caps[1].parse().ok()?;
    if !(1900..=2100).contains(&year) {
        return None;
    }
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;

    format_checked(year, month, day)
}

fn format_checked(year: i32, month: u32, day: u32) -> Option<String> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviated_reiwa_converts() {
        assert_eq!(normalize_date("R6.5.10"), "2024-05-10");
    }

    #[test]
    fn first_year_of_era_converts() {
        assert_eq!(normalize_date("令和元年5月10日"), "2019-05-10");
    }

    #[test]
    fn kanji_era_with_two_digit_day() {
        assert_eq!(normalize_date("令和6年12月31日"), "2024-12-31");
        assert_eq!(normalize_date("平成30年1月1日"), "2018-01-01");
        assert_eq!(normalize_date("昭和60年8月15日"), "1985-08-15");
    }

    #[test]
    fn gregorian_slash_form_converts() {
        assert_eq!(normalize_date("2023/04/01"), "2023-04-01");
    }

    #[test]
    fn gregorian_kanji_form_converts() {
        assert_eq!(normalize_date("2023年4月1日"), "2023-04-01");
    }

    #[test]
    fn fullwidth_digits_are_folded() {
        assert_eq!(normalize_date("令和６年５月１０日"), "2024-05-10");
        assert_eq!(normalize_date("２０２３／０４／０１"), "2023-04-01");
    }

    #[test]
    fn unparseable_input_is_returned_unchanged() {
        assert_eq!(normalize_date("not a date"), "not a date");
        assert_eq!(normalize_date(""), "");
        assert_eq!(normalize_date("第12号"), "第12号");
    }

    #[test]
    fn out_of_range_gregorian_year_is_unparsed() {
        assert_eq!(normalize_date("1234/05/06"), "1234/05/06");
        assert_eq!(normalize_date("2999/01/01"), "2999/01/01");
    }

    #[test]
    fn impossible_calendar_date_is_unparsed() {
        assert_eq!(normalize_date("2023/02/30"), "2023/02/30");
    }

    #[test]
    fn bracketed_dates_are_cleaned_before_matching() {
        assert_eq!(normalize_date("（令和6年5月10日）"), "2024-05-10");
    }
}
