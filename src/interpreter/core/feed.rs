use std::collections::VecDeque;

use crate::interpreter::core::cell::{Cell, Kind};
use crate::interpreter::core::series::{Series, SeriesId, SERIES_FLAG_MANAGED};
use crate::interpreter::core::{Runtime, Specifier};

pub type FeedId = usize;

/// The next infix operator may not run; only the nearest operand is taken.
pub const FEED_FLAG_NO_LOOKAHEAD: u32 = 1 << 0;
/// A deferring operator was seen while fulfilling an argument and is waiting
/// for the next frame up to run it.
pub const FEED_FLAG_DEFERRING_ENFIX: u32 = 1 << 1;
/// A `|` or vaporized group was hit during argument gathering.
pub const FEED_FLAG_BARRIER_HIT: u32 = 1 << 2;

pub enum FeedSource {
    Array { array: SeriesId, index: usize },
    /// Cells handed in directly by a caller; reified into an array on demand.
    Variadic(VecDeque<Cell>),
}

/// The value source a frame pulls from. `value` is the current cell, or END.
pub struct Feed {
    pub source: FeedSource,
    pub value: Cell,
    /// Cached lookup of `value` when it is a word.
    pub gotten: Option<Cell>,
    pub lookback: Option<Cell>,
    pub specifier: Specifier,
    pub flags: u32,
}

impl Feed {
    pub fn is_end(&self) -> bool { self.value.is_end() }

    pub fn has_flag(&self, flag: u32) -> bool { self.flags & flag != 0 }
}

impl Runtime {
    pub fn push_array_feed(&mut self, array: SeriesId, index: usize, specifier: Specifier) -> FeedId {
        let value = self.heap.array(array).get(index).cloned().unwrap_or_else(Cell::end);
        self.feeds.push(Feed {
            source: FeedSource::Array { array, index: index + 1 },
            value,
            gotten: None,
            lookback: None,
            specifier,
            flags: 0,
        });
        self.feeds.len() - 1
    }

    pub fn push_variadic_feed(&mut self, cells: Vec<Cell>, specifier: Specifier) -> FeedId {
        let mut queue: VecDeque<Cell> = cells.into();
        let value = queue.pop_front().unwrap_or_else(Cell::end);
        self.feeds.push(Feed { source: FeedSource::Variadic(queue), value, gotten: None, lookback: None, specifier, flags: 0 });
        self.feeds.len() - 1
    }

    pub fn drop_feed(&mut self, id: FeedId) {
        debug_assert_eq!(id + 1, self.feeds.len(), "feeds must be dropped in LIFO order");
        self.feeds.truncate(id);
    }

    pub fn feed(&self, id: FeedId) -> &Feed { &self.feeds[id] }

    pub fn feed_mut(&mut self, id: FeedId) -> &mut Feed { &mut self.feeds[id] }

    pub fn feed_at(&self, id: FeedId) -> &Cell { &self.feeds[id].value }

    /// Advance the feed, returning the cell that was current. Any lookback
    /// from the previous advance is dropped.
    pub fn fetch_next(&mut self, id: FeedId) -> Cell {
        let next = match self.feeds[id].source {
            FeedSource::Array { array, ref mut index } => {
                let i = *index;
                *index += 1;
                self.heap.array(array).get(i).cloned()
            }
            FeedSource::Variadic(ref mut queue) => queue.pop_front(),
        };
        let feed = &mut self.feeds[id];
        let current = std::mem::replace(&mut feed.value, next.unwrap_or_else(Cell::end));
        feed.gotten = None;
        feed.lookback = None;
        current
    }

    /// Like `fetch_next`, but the cell that was current stays readable as
    /// `lookback` until the next advance.
    pub fn fetch_keep_lookback(&mut self, id: FeedId) -> Cell {
        let current = self.fetch_next(id);
        self.feeds[id].lookback = Some(current.clone());
        current
    }

    /// Peek at the cell after the current one without advancing.
    pub fn feed_peek(&self, id: FeedId) -> Cell {
        match self.feeds[id].source {
            FeedSource::Array { array, index } => self.heap.array(array).get(index).cloned().unwrap_or_else(Cell::end),
            FeedSource::Variadic(ref queue) => queue.front().cloned().unwrap_or_else(Cell::end),
        }
    }

    /// Turn a variadic feed into an array feed so its position can be
    /// captured in a value. Array feeds are returned as-is.
    pub fn reify_feed(&mut self, id: FeedId) -> (SeriesId, usize) {
        if let FeedSource::Array { array, index } = self.feeds[id].source {
            return (array, index - 1);
        }
        let mut cells = Vec::new();
        if !self.feeds[id].value.is_end() {
            cells.push(self.feeds[id].value.clone());
        }
        if let FeedSource::Variadic(ref mut queue) = self.feeds[id].source {
            cells.extend(queue.drain(..));
        }
        let mut series = Series::array(cells);
        series.flags |= SERIES_FLAG_MANAGED;
        let array = self.heap.alloc(series);
        self.feeds[id].source = FeedSource::Array { array, index: 1 };
        (array, 0)
    }

    /// Position of the current value, for error reporting.
    pub fn feed_near(&self, id: FeedId) -> Option<(SeriesId, usize)> {
        match self.feeds[id].source {
            FeedSource::Array { array, index } => Some((array, index.saturating_sub(1))),
            FeedSource::Variadic(_) => None,
        }
    }

    pub fn feed_at_barrier(&self, id: FeedId) -> bool {
        let feed = &self.feeds[id];
        feed.value.is_end() || feed.has_flag(FEED_FLAG_BARRIER_HIT)
    }

    pub fn feed_is_bar(&self, id: FeedId) -> bool { self.feeds[id].value.is(Kind::Bar) }
}

#[cfg(test)]
mod test_feed {
    use crate::interpreter::core::*;

    #[test]
    fn test_lookback_survives_one_advance() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let array = rt.load("1 2 3").unwrap();
        let feed = rt.push_array_feed(array, 0, None);
        assert_eq!(rt.fetch_keep_lookback(feed).as_integer(), Some(1));
        assert_eq!(rt.feed(feed).lookback.as_ref().and_then(|c| c.as_integer()), Some(1));
        assert_eq!(rt.feed_at(feed).as_integer(), Some(2));
        rt.fetch_next(feed);
        assert!(rt.feed(feed).lookback.is_none());
        rt.fetch_next(feed);
        assert!(rt.feed(feed).is_end());
        rt.drop_feed(feed);
    }

    #[test]
    fn test_variadic_feed_reifies() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let feed = rt.push_variadic_feed(vec![Cell::integer(1), Cell::integer(2)], None);
        rt.fetch_next(feed);
        let (array, index) = rt.reify_feed(feed);
        assert_eq!(index, 0);
        assert_eq!(rt.heap.array(array).len(), 1);
        assert!(rt.feed_peek(feed).is_end());
        rt.drop_feed(feed);
    }
}
