// SPDX-License-Identifier: MIT

use super::*;
use yare::parameterized;

#[test]
fn parses_single_id() {
    let set = ImapSet::parse("42").unwrap();
    assert_eq!(set.intervals(), &[ImapInterval::single(42)]);
}

#[test]
fn parses_mixed_set() {
    let set = ImapSet::parse("42,51:53").unwrap();
    assert_eq!(set.intervals(), &[ImapInterval::single(42), ImapInterval::closed(51, 53)]);
}

#[test]
fn parses_open_interval() {
    let set = ImapSet::parse("1:*").unwrap();
    assert!(set.is_all());
    assert!(set.contains(1));
    assert!(set.contains(i64::MAX));
}

#[parameterized(
    empty = { "" },
    letters = { "abc" },
    reversed = { "9:3" },
    dangling_comma = { "1," },
)]
fn rejects_malformed(input: &str) {
    assert!(ImapSet::parse(input).is_err());
}

#[test]
fn contains_respects_bounds() {
    let set = ImapSet::parse("5:7,10").unwrap();
    assert!(!set.contains(4));
    assert!(set.contains(5));
    assert!(set.contains(7));
    assert!(!set.contains(8));
    assert!(set.contains(10));
}

#[test]
fn display_round_trips() {
    for input in ["42", "42,51:53", "1:*", "3:9,12:*"] {
        let set = ImapSet::parse(input).unwrap();
        assert_eq!(set.to_string(), input);
    }
}
