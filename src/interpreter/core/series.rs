use crate::interpreter::core::action::Dispatcher;
use crate::interpreter::core::cell::Cell;
use crate::interpreter::core::frame::FrameId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SeriesId(pub u32);

pub const SERIES_FLAG_MANAGED: u32 = 1 << 0;
pub const SERIES_FLAG_MARKED: u32 = 1 << 1;
pub const SERIES_FLAG_ROOT: u32 = 1 << 2;
pub const SERIES_FLAG_INACCESSIBLE: u32 = 1 << 3;
pub const SERIES_FLAG_PROTECTED: u32 = 1 << 4;
pub const SERIES_FLAG_FIXED_SIZE: u32 = 1 << 5;
pub const SERIES_FLAG_VARLIST: u32 = 1 << 6;
pub const SERIES_FLAG_PARAMLIST: u32 = 1 << 7;
pub const SERIES_FLAG_DETAILS: u32 = 1 << 8;
pub const SERIES_FLAG_PAIRING: u32 = 1 << 9;
pub const SERIES_FLAG_KEYLIST: u32 = 1 << 10;
pub const SERIES_FLAG_SINGULAR: u32 = 1 << 11;

/// Leading byte of a live series header: never a legal UTF-8 lead byte.
pub const SERIES_BYTE_BASE: u8 = 0xF8;
pub const FREED_SERIES_BYTE: u8 = 0xC0;
pub const FREED_CELL_BYTE: u8 = 0xC1;

/// UTF-8 text with a cached codepoint count. Indices are in codepoints.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Text {
    utf8: String,
    len: usize,
}

impl Text {
    pub fn new(s: &str) -> Text { Text { utf8: s.to_string(), len: s.chars().count() } }

    pub fn as_str(&self) -> &str { &self.utf8 }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    fn byte_offset(&self, index: usize) -> usize {
        if index >= self.len {
            return self.utf8.len();
        }
        self.utf8.char_indices().nth(index).map(|(b, _)| b).unwrap_or(self.utf8.len())
    }

    pub fn char_at(&self, index: usize) -> Option<char> { self.utf8.chars().nth(index) }

    pub fn slice(&self, from: usize, to: usize) -> &str {
        let (a, b) = (self.byte_offset(from), self.byte_offset(to.max(from)));
        &self.utf8[a..b]
    }

    pub fn insert(&mut self, index: usize, s: &str) {
        let at = self.byte_offset(index);
        self.utf8.insert_str(at, s);
        self.len += s.chars().count();
    }

    pub fn push_str(&mut self, s: &str) {
        self.utf8.push_str(s);
        self.len += s.chars().count();
    }

    pub fn remove(&mut self, from: usize, to: usize) {
        let (a, b) = (self.byte_offset(from), self.byte_offset(to.max(from)));
        self.utf8.replace_range(a..b, "");
        self.len -= to.max(from).min(self.len) - from.min(self.len);
    }
}

pub enum Content {
    Array(Vec<Cell>),
    Text(Text),
    Binary(Vec<u8>),
}

impl Content {
    pub fn len(&self) -> usize {
        match self {
            Content::Array(v) => v.len(),
            Content::Text(t) => t.len(),
            Content::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Element width in bytes.
    pub fn width(&self) -> usize {
        match self {
            Content::Array(_) => std::mem::size_of::<Cell>(),
            Content::Text(_) | Content::Binary(_) => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Link {
    None,
    Keylist(SeriesId),
    Exemplar(SeriesId),
    Owner(Option<FrameId>),
}

#[derive(Clone, Copy)]
pub enum Misc {
    None,
    Dispatcher(Dispatcher),
    Frame(FrameId),
}

pub struct Series {
    pub flags: u32,
    pub content: Content,
    pub link: Link,
    pub misc: Misc,
}

impl Series {
    pub fn array(cells: Vec<Cell>) -> Series {
        let flags = if cells.len() == 1 { SERIES_FLAG_SINGULAR } else { 0 };
        Series { flags, content: Content::Array(cells), link: Link::None, misc: Misc::None }
    }

    pub fn text(s: &str) -> Series { Series { flags: 0, content: Content::Text(Text::new(s)), link: Link::None, misc: Misc::None } }

    pub fn binary(bytes: Vec<u8>) -> Series { Series { flags: 0, content: Content::Binary(bytes), link: Link::None, misc: Misc::None } }

    pub fn is_managed(&self) -> bool { self.flags & SERIES_FLAG_MANAGED != 0 }

    pub fn leading_byte(&self) -> u8 {
        let mut b = SERIES_BYTE_BASE;
        if self.flags & SERIES_FLAG_MANAGED != 0 {
            b |= 0x02;
        }
        if self.flags & SERIES_FLAG_MARKED != 0 {
            b |= 0x01;
        }
        if self.flags & SERIES_FLAG_ROOT != 0 {
            b |= 0x04;
        }
        b
    }
}

enum Slot {
    Live(Series),
    Freed,
}

/// Arena of series nodes. Ids are stable for the life of a node; freed slots
/// are recycled through a free list.
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    pub ballast: isize,
    pub recycle_requested: bool,
    pub live: usize,
}

impl Heap {
    pub fn new(ballast: isize) -> Heap { Heap { slots: Vec::new(), free_list: Vec::new(), ballast, recycle_requested: false, live: 0 } }

    pub fn alloc(&mut self, series: Series) -> SeriesId {
        self.ballast -= (series.content.len() * series.content.width()).max(16) as isize;
        if self.ballast <= 0 {
            self.recycle_requested = true;
        }
        self.live += 1;
        match self.free_list.pop() {
            Some(i) => {
                self.slots[i as usize] = Slot::Live(series);
                SeriesId(i)
            }
            None => {
                self.slots.push(Slot::Live(series));
                SeriesId(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn free(&mut self, id: SeriesId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            if let Slot::Live(_) = slot {
                *slot = Slot::Freed;
                self.free_list.push(id.0);
                self.live -= 1;
            }
        }
    }

    pub fn is_live(&self, id: SeriesId) -> bool { matches!(self.slots.get(id.0 as usize), Some(Slot::Live(_))) }

    pub fn leading_byte(&self, id: SeriesId) -> u8 {
        match self.slots.get(id.0 as usize) {
            Some(Slot::Live(s)) => s.leading_byte(),
            _ => FREED_SERIES_BYTE,
        }
    }

    pub fn get(&self, id: SeriesId) -> &Series {
        match self.slots.get(id.0 as usize) {
            Some(Slot::Live(s)) => s,
            _ => panic!("access to freed series node {:?}", id),
        }
    }

    pub fn get_mut(&mut self, id: SeriesId) -> &mut Series {
        match self.slots.get_mut(id.0 as usize) {
            Some(Slot::Live(s)) => s,
            _ => panic!("access to freed series node {:?}", id),
        }
    }

    pub fn flags(&self, id: SeriesId) -> u32 { self.get(id).flags }

    pub fn set_flag(&mut self, id: SeriesId, flag: u32) { self.get_mut(id).flags |= flag; }

    pub fn clear_flag(&mut self, id: SeriesId, flag: u32) { self.get_mut(id).flags &= !flag; }

    pub fn has_flag(&self, id: SeriesId, flag: u32) -> bool { self.get(id).flags & flag != 0 }

    pub fn len(&self, id: SeriesId) -> usize { self.get(id).content.len() }

    pub fn array(&self, id: SeriesId) -> &Vec<Cell> {
        match &self.get(id).content {
            Content::Array(v) => v,
            _ => panic!("series {:?} is not an array", id),
        }
    }

    pub fn array_mut(&mut self, id: SeriesId) -> &mut Vec<Cell> {
        match &mut self.get_mut(id).content {
            Content::Array(v) => v,
            _ => panic!("series {:?} is not an array", id),
        }
    }

    pub fn is_array(&self, id: SeriesId) -> bool { matches!(self.get(id).content, Content::Array(_)) }

    pub fn text(&self, id: SeriesId) -> &Text {
        match &self.get(id).content {
            Content::Text(t) => t,
            _ => panic!("series {:?} is not text", id),
        }
    }

    pub fn text_mut(&mut self, id: SeriesId) -> &mut Text {
        match &mut self.get_mut(id).content {
            Content::Text(t) => t,
            _ => panic!("series {:?} is not text", id),
        }
    }

    pub fn binary(&self, id: SeriesId) -> &Vec<u8> {
        match &self.get(id).content {
            Content::Binary(b) => b,
            _ => panic!("series {:?} is not binary", id),
        }
    }

    pub fn binary_mut(&mut self, id: SeriesId) -> &mut Vec<u8> {
        match &mut self.get_mut(id).content {
            Content::Binary(b) => b,
            _ => panic!("series {:?} is not binary", id),
        }
    }

    pub fn live_ids(&self) -> Vec<SeriesId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Slot::Live(_) => Some(SeriesId(i as u32)),
                Slot::Freed => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod test_series {
    use super::*;

    #[test]
    fn test_text_codepoint_indexing() {
        let mut t = Text::new("héllo");
        assert_eq!(t.len(), 5);
        assert_eq!(t.char_at(1), Some('é'));
        t.insert(1, "ü");
        assert_eq!(t.as_str(), "hüéllo");
        assert_eq!(t.len(), 6);
        t.remove(1, 3);
        assert_eq!(t.as_str(), "hllo");
        assert_eq!(t.len(), 4);
        assert_eq!(t.slice(1, 3), "ll");
    }

    #[test]
    fn test_freed_slots_are_reused_and_marked() {
        let mut heap = Heap::new(1 << 20);
        let a = heap.alloc(Series::text("a"));
        let b = heap.alloc(Series::binary(vec![1, 2]));
        heap.free(a);
        assert!(!heap.is_live(a));
        assert_eq!(heap.leading_byte(a), FREED_SERIES_BYTE);
        let c = heap.alloc(Series::text("c"));
        assert_eq!(c, a);
        assert_eq!(heap.binary(b), &vec![1, 2]);
        assert_eq!(heap.live, 2);
    }

    #[test]
    fn test_leading_bytes_are_not_utf8_leads() {
        let mut heap = Heap::new(1 << 20);
        let a = heap.alloc(Series::array(vec![]));
        heap.set_flag(a, SERIES_FLAG_MANAGED | SERIES_FLAG_MARKED | SERIES_FLAG_ROOT);
        for byte in [heap.leading_byte(a), FREED_SERIES_BYTE, FREED_CELL_BYTE, SERIES_BYTE_BASE] {
            assert!(std::str::from_utf8(&[byte, 0x80, 0x80, 0x80]).is_err());
        }
    }
}
