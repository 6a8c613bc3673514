#![forbid(unsafe_code)]

//! Item-position filters of the form `N` or `N-M` (1-based, inclusive).

use std::fmt;
use std::str::FromStr;

use crate::error::ScrapeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    start: usize,
    end: usize,
}

impl RangeSpec {
    pub fn new(start: usize, end: usize) -> Result<Self, ScrapeError> {
        if start < 1 {
            return Err(ScrapeError::InvalidInput(format!(
                "range must start at 1 or later, got {start}"
            )));
        }
        if end < start {
            return Err(ScrapeError::InvalidInput(format!(
                "range end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of positions covered.
    pub fn count(&self) -> usize {
        self.end - self.start + 1
    }

    /// Keeps only the items at the covered positions.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.start - 1)
            .take(self.count())
            .collect()
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for RangeSpec {
    type Err = ScrapeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| ScrapeError::InvalidInput(format!("invalid range: {value}")))
        };
        match trimmed.split_once('-') {
            Some((start, end)) => Self::new(parse(start)?, parse(end)?),
            None => {
                let position = parse(trimmed)?;
                Self::new(position, position)
            }
        }
    }
}
