// SPDX-License-Identifier: MIT

//! Item sets (`1:*`, `42,51:53`): comma-separated id intervals.

use std::fmt;

use thiserror::Error;

/// One closed or right-open interval of ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImapInterval {
    pub begin: i64,
    /// `None` means open towards the highest existing id (`*`).
    pub end: Option<i64>,
}

impl ImapInterval {
    pub fn single(id: i64) -> Self {
        Self { begin: id, end: Some(id) }
    }

    pub fn closed(begin: i64, end: i64) -> Self {
        Self { begin, end: Some(end) }
    }

    pub fn open(begin: i64) -> Self {
        Self { begin, end: None }
    }
}

impl fmt::Display for ImapInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) if end == self.begin => write!(f, "{}", self.begin),
            Some(end) => write!(f, "{}:{}", self.begin, end),
            None => write!(f, "{}:*", self.begin),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid item set: {0}")]
pub struct ImapSetParseError(String);

/// A set of id intervals, as written in item-addressing commands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImapSet {
    intervals: Vec<ImapInterval>,
}

impl ImapSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(id: i64) -> Self {
        Self { intervals: vec![ImapInterval::single(id)] }
    }

    pub fn add(&mut self, interval: ImapInterval) {
        self.intervals.push(interval);
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[ImapInterval] {
        &self.intervals
    }

    /// True if the set consists of the single open interval `1:*`.
    pub fn is_all(&self) -> bool {
        self.intervals.len() == 1
            && self.intervals[0].begin <= 1
            && self.intervals[0].end.is_none()
    }

    /// Parses `42,51:53,60:*`.
    pub fn parse(input: &str) -> Result<Self, ImapSetParseError> {
        let mut set = ImapSet::new();
        if input.is_empty() {
            return Err(ImapSetParseError("empty set".into()));
        }
        for part in input.split(',') {
            let interval = match part.split_once(':') {
                None => {
                    let id = part
                        .parse::<i64>()
                        .map_err(|_| ImapSetParseError(input.to_string()))?;
                    ImapInterval::single(id)
                }
                Some((begin, end)) => {
                    let begin = begin
                        .parse::<i64>()
                        .map_err(|_| ImapSetParseError(input.to_string()))?;
                    if end == "*" {
                        ImapInterval::open(begin)
                    } else {
                        let end = end
                            .parse::<i64>()
                            .map_err(|_| ImapSetParseError(input.to_string()))?;
                        if end < begin {
                            return Err(ImapSetParseError(input.to_string()));
                        }
                        ImapInterval::closed(begin, end)
                    }
                }
            };
            set.add(interval);
        }
        Ok(set)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.intervals.iter().any(|iv| match iv.end {
            Some(end) => id >= iv.begin && id <= end,
            None => id >= iv.begin,
        })
    }
}

impl fmt::Display for ImapSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, iv) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{iv}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "imap_set_tests.rs"]
mod tests;
