//! Page requests and windowing
//!
//! `take` is signed: a positive value reads forward, a negative value reads
//! backward from the cursor (or from the end) and the window is handed back
//! in the original order. `skip` always counts away from the starting point.

use std::collections::VecDeque;

use super::unique::UniqueSelector;

/// Cursor, take, skip and distinct parameters of a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    /// Row to start from, excluded from the result.
    pub cursor: Option<UniqueSelector>,
    pub take: Option<i64>,
    pub skip: Option<u64>,
    /// Keep only the first row per distinct combination of these fields.
    pub distinct: Vec<String>,
}

impl PageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(mut self, cursor: UniqueSelector) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn distinct<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinct = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Boxed lazy sequence handed back by windowing.
pub(crate) type Window<T> = Box<dyn Iterator<Item = T> + Send>;

/// Where a window starts relative to an ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Anchor {
    /// No cursor: the start (forward) or the end (backward) of the sequence.
    Edge,
    /// Position of the cursor row, which is itself excluded.
    At(usize),
}

/// Apply skip and signed take to an ordered sequence.
///
/// Forward windows stay lazy over `items`; backward windows buffer at most
/// `|take|` items.
pub(crate) fn window<T: Send + 'static>(
    items: Vec<T>,
    anchor: Anchor,
    skip: u64,
    take: Option<i64>,
) -> Window<T> {
    let skip = usize::try_from(skip).unwrap_or(usize::MAX);
    match take {
        Some(n) if n < 0 => {
            let limit = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
            let mut items = items;
            if let Anchor::At(pos) = anchor {
                items.truncate(pos);
            }
            let mut buffered = VecDeque::with_capacity(limit.min(items.len()));
            for item in items.into_iter().rev().skip(skip).take(limit) {
                buffered.push_front(item);
            }
            Box::new(buffered.into_iter())
        }
        _ => {
            let start = match anchor {
                Anchor::Edge => 0,
                Anchor::At(pos) => pos.saturating_add(1),
            };
            let rows = items.into_iter().skip(start).skip(skip);
            match take {
                Some(n) => Box::new(rows.take(usize::try_from(n).unwrap_or(usize::MAX))),
                None => Box::new(rows),
            }
        }
    }
}
