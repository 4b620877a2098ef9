use phf::phf_map;

use crate::interpreter::core::series::{Heap, Series, SeriesId, FREED_CELL_BYTE, SERIES_FLAG_MANAGED, SERIES_FLAG_PAIRING};
use crate::interpreter::core::symbol::SymId;

/// Closed set of value kinds. `End` is the cell-shaped end marker and `Null`
/// is the non-value; neither may appear inside an array.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub enum Kind {
    End = 0,
    Null,
    Void,
    Blank,
    Logic,
    Integer,
    Decimal,
    Percent,
    Money,
    Char,
    Pair,
    Tuple,
    Time,
    Date,
    Datatype,
    Typeset,
    Word,
    SetWord,
    GetWord,
    SymWord,
    Path,
    SetPath,
    GetPath,
    SymPath,
    Block,
    SetBlock,
    GetBlock,
    SymBlock,
    Group,
    SetGroup,
    GetGroup,
    SymGroup,
    Binary,
    Text,
    File,
    Url,
    Tag,
    Email,
    Issue,
    Bitset,
    Map,
    Varargs,
    Object,
    Module,
    Error,
    Frame,
    Port,
    Action,
    Event,
    Handle,
    Library,
    Custom,
    Bar,
    Quoted,
}

pub const KINDS: [Kind; 54] = [
    Kind::End,
    Kind::Null,
    Kind::Void,
    Kind::Blank,
    Kind::Logic,
    Kind::Integer,
    Kind::Decimal,
    Kind::Percent,
    Kind::Money,
    Kind::Char,
    Kind::Pair,
    Kind::Tuple,
    Kind::Time,
    Kind::Date,
    Kind::Datatype,
    Kind::Typeset,
    Kind::Word,
    Kind::SetWord,
    Kind::GetWord,
    Kind::SymWord,
    Kind::Path,
    Kind::SetPath,
    Kind::GetPath,
    Kind::SymPath,
    Kind::Block,
    Kind::SetBlock,
    Kind::GetBlock,
    Kind::SymBlock,
    Kind::Group,
    Kind::SetGroup,
    Kind::GetGroup,
    Kind::SymGroup,
    Kind::Binary,
    Kind::Text,
    Kind::File,
    Kind::Url,
    Kind::Tag,
    Kind::Email,
    Kind::Issue,
    Kind::Bitset,
    Kind::Map,
    Kind::Varargs,
    Kind::Object,
    Kind::Module,
    Kind::Error,
    Kind::Frame,
    Kind::Port,
    Kind::Action,
    Kind::Event,
    Kind::Handle,
    Kind::Library,
    Kind::Custom,
    Kind::Bar,
    Kind::Quoted,
];

static KIND_NAMES: phf::Map<&'static str, Kind> = phf_map! {
    "void!" => Kind::Void,
    "blank!" => Kind::Blank,
    "logic!" => Kind::Logic,
    "integer!" => Kind::Integer,
    "decimal!" => Kind::Decimal,
    "percent!" => Kind::Percent,
    "money!" => Kind::Money,
    "char!" => Kind::Char,
    "pair!" => Kind::Pair,
    "tuple!" => Kind::Tuple,
    "time!" => Kind::Time,
    "date!" => Kind::Date,
    "datatype!" => Kind::Datatype,
    "typeset!" => Kind::Typeset,
    "word!" => Kind::Word,
    "set-word!" => Kind::SetWord,
    "get-word!" => Kind::GetWord,
    "sym-word!" => Kind::SymWord,
    "path!" => Kind::Path,
    "set-path!" => Kind::SetPath,
    "get-path!" => Kind::GetPath,
    "sym-path!" => Kind::SymPath,
    "block!" => Kind::Block,
    "set-block!" => Kind::SetBlock,
    "get-block!" => Kind::GetBlock,
    "sym-block!" => Kind::SymBlock,
    "group!" => Kind::Group,
    "set-group!" => Kind::SetGroup,
    "get-group!" => Kind::GetGroup,
    "sym-group!" => Kind::SymGroup,
    "binary!" => Kind::Binary,
    "text!" => Kind::Text,
    "file!" => Kind::File,
    "url!" => Kind::Url,
    "tag!" => Kind::Tag,
    "email!" => Kind::Email,
    "issue!" => Kind::Issue,
    "bitset!" => Kind::Bitset,
    "map!" => Kind::Map,
    "varargs!" => Kind::Varargs,
    "object!" => Kind::Object,
    "module!" => Kind::Module,
    "error!" => Kind::Error,
    "frame!" => Kind::Frame,
    "port!" => Kind::Port,
    "action!" => Kind::Action,
    "event!" => Kind::Event,
    "handle!" => Kind::Handle,
    "library!" => Kind::Library,
    "custom!" => Kind::Custom,
    "bar!" => Kind::Bar,
    "quoted!" => Kind::Quoted,
};

/// Which of the four variants of a word, path, block or group.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Sigil {
    Plain,
    Set,
    Get,
    Sym,
}

impl Kind {
    pub fn from_u8(b: u8) -> Option<Kind> { KINDS.get(b as usize).copied() }

    pub fn from_name(name: &str) -> Option<Kind> { KIND_NAMES.get(name).copied() }

    pub fn name(self) -> &'static str {
        match self {
            Kind::End => "end",
            Kind::Null => "null",
            _ => KIND_NAMES.entries().find(|(_, k)| **k == self).map(|(n, _)| *n).unwrap_or("unknown!"),
        }
    }

    pub fn bit(self) -> u64 { 1u64 << (self as u8) }

    pub fn is_any_word(self) -> bool { matches!(self, Kind::Word | Kind::SetWord | Kind::GetWord | Kind::SymWord) }

    pub fn is_any_path(self) -> bool { matches!(self, Kind::Path | Kind::SetPath | Kind::GetPath | Kind::SymPath) }

    pub fn is_any_block(self) -> bool { matches!(self, Kind::Block | Kind::SetBlock | Kind::GetBlock | Kind::SymBlock) }

    pub fn is_any_group(self) -> bool { matches!(self, Kind::Group | Kind::SetGroup | Kind::GetGroup | Kind::SymGroup) }

    pub fn is_any_array(self) -> bool { self.is_any_path() || self.is_any_block() || self.is_any_group() }

    pub fn is_any_string(self) -> bool { matches!(self, Kind::Text | Kind::File | Kind::Url | Kind::Tag | Kind::Email) }

    pub fn is_any_series(self) -> bool { self.is_any_array() || self.is_any_string() || matches!(self, Kind::Binary) }

    pub fn is_any_context(self) -> bool { matches!(self, Kind::Object | Kind::Module | Kind::Error | Kind::Frame | Kind::Port) }

    pub fn is_any_number(self) -> bool { matches!(self, Kind::Integer | Kind::Decimal | Kind::Percent | Kind::Money) }

    /// Kinds that evaluate to themselves.
    pub fn is_inert(self) -> bool {
        matches!(
            self,
            Kind::Block
                | Kind::Binary
                | Kind::Text
                | Kind::File
                | Kind::Url
                | Kind::Tag
                | Kind::Email
                | Kind::Issue
                | Kind::Bitset
                | Kind::Map
                | Kind::Varargs
                | Kind::Object
                | Kind::Frame
                | Kind::Module
                | Kind::Error
                | Kind::Port
                | Kind::Blank
                | Kind::Logic
                | Kind::Integer
                | Kind::Decimal
                | Kind::Percent
                | Kind::Money
                | Kind::Char
                | Kind::Pair
                | Kind::Tuple
                | Kind::Time
                | Kind::Date
                | Kind::Datatype
                | Kind::Typeset
                | Kind::Event
                | Kind::Handle
                | Kind::Library
                | Kind::Custom
                | Kind::SymWord
                | Kind::SymPath
                | Kind::SymBlock
                | Kind::SymGroup
        )
    }

    pub fn sigil(self) -> Sigil {
        match self {
            Kind::SetWord | Kind::SetPath | Kind::SetBlock | Kind::SetGroup => Sigil::Set,
            Kind::GetWord | Kind::GetPath | Kind::GetBlock | Kind::GetGroup => Sigil::Get,
            Kind::SymWord | Kind::SymPath | Kind::SymBlock | Kind::SymGroup => Sigil::Sym,
            _ => Sigil::Plain,
        }
    }

    /// Same family with another sigil, e.g. `Word` + `Set` gives `SetWord`.
    pub fn with_sigil(self, sigil: Sigil) -> Kind {
        let base = if self.is_any_word() {
            Kind::Word as u8
        } else if self.is_any_path() {
            Kind::Path as u8
        } else if self.is_any_block() {
            Kind::Block as u8
        } else if self.is_any_group() {
            Kind::Group as u8
        } else {
            return self;
        };
        let offset = match sigil {
            Sigil::Plain => 0,
            Sigil::Set => 1,
            Sigil::Get => 2,
            Sigil::Sym => 3,
        };
        Kind::from_u8(base + offset).unwrap_or(self)
    }
}

pub const TS_ANY_WORD: u64 = (1 << Kind::Word as u8) | (1 << Kind::SetWord as u8) | (1 << Kind::GetWord as u8) | (1 << Kind::SymWord as u8);
pub const TS_ANY_PATH: u64 = (1 << Kind::Path as u8) | (1 << Kind::SetPath as u8) | (1 << Kind::GetPath as u8) | (1 << Kind::SymPath as u8);
pub const TS_ANY_BLOCK: u64 = (1 << Kind::Block as u8) | (1 << Kind::SetBlock as u8) | (1 << Kind::GetBlock as u8) | (1 << Kind::SymBlock as u8);
pub const TS_ANY_GROUP: u64 = (1 << Kind::Group as u8) | (1 << Kind::SetGroup as u8) | (1 << Kind::GetGroup as u8) | (1 << Kind::SymGroup as u8);
pub const TS_ANY_ARRAY: u64 = TS_ANY_PATH | TS_ANY_BLOCK | TS_ANY_GROUP;
pub const TS_ANY_STRING: u64 = (1 << Kind::Text as u8) | (1 << Kind::File as u8) | (1 << Kind::Url as u8) | (1 << Kind::Tag as u8) | (1 << Kind::Email as u8);
pub const TS_ANY_SERIES: u64 = TS_ANY_ARRAY | TS_ANY_STRING | (1 << Kind::Binary as u8);
pub const TS_ANY_NUMBER: u64 = (1 << Kind::Integer as u8) | (1 << Kind::Decimal as u8) | (1 << Kind::Percent as u8) | (1 << Kind::Money as u8);
pub const TS_ANY_CONTEXT: u64 = (1 << Kind::Object as u8) | (1 << Kind::Module as u8) | (1 << Kind::Error as u8) | (1 << Kind::Frame as u8) | (1 << Kind::Port as u8);
/// Every kind a variable may hold except null, void, end and action.
pub const TS_VALUE: u64 = !((1 << Kind::End as u8) | (1 << Kind::Null as u8) | (1 << Kind::Void as u8) | (1 << Kind::Action as u8));
pub const TS_ANY_VALUE: u64 = !((1 << Kind::End as u8) | (1 << Kind::Null as u8));

// Node and cell flags. Storage flags describe where a cell lives and are
// never carried by a move.
pub const NODE_FLAG_NODE: u32 = 1 << 0;
pub const NODE_FLAG_CELL: u32 = 1 << 1;
pub const NODE_FLAG_MANAGED: u32 = 1 << 2;
pub const NODE_FLAG_MARKED: u32 = 1 << 3;
pub const NODE_FLAG_ROOT: u32 = 1 << 4;
pub const CELL_FLAG_STACK_LIFETIME: u32 = 1 << 5;
pub const CELL_FLAG_FIRST_IS_NODE: u32 = 1 << 6;
pub const CELL_FLAG_SECOND_IS_NODE: u32 = 1 << 7;
pub const CELL_FLAG_PROTECTED: u32 = 1 << 8;
pub const CELL_FLAG_UNEVALUATED: u32 = 1 << 9;
pub const CELL_FLAG_ENFIXED: u32 = 1 << 10;
pub const CELL_FLAG_NEWLINE_BEFORE: u32 = 1 << 11;
pub const CELL_FLAG_ARG_MARKED_CHECKED: u32 = 1 << 12;
pub const CELL_FLAG_OUT_MARKED_STALE: u32 = 1 << 13;
/// A null standing in for an `<end>` argument.
pub const CELL_FLAG_ENDISH: u32 = 1 << 14;

pub const CELL_MASK_PERSIST: u32 = NODE_FLAG_NODE | NODE_FLAG_CELL | NODE_FLAG_ROOT | CELL_FLAG_STACK_LIFETIME;
pub const CELL_MASK_COPIED: u32 = CELL_FLAG_ENFIXED | CELL_FLAG_UNEVALUATED | CELL_FLAG_NEWLINE_BEFORE;

/// Reference target of a word or array.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Binding {
    Unbound,
    /// A concrete context varlist (or the varlist an action value is bound to).
    Specific(SeriesId),
    /// Relative to an action's paramlist; needs a frame specifier to resolve.
    Relative(SeriesId),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParamClass {
    Normal,
    HardQuote,
    SoftQuote,
    Refinement,
    Local,
    Return,
}

pub const PARAM_FLAG_ENDABLE: u32 = 1 << 0;
pub const PARAM_FLAG_SKIPPABLE: u32 = 1 << 1;
pub const PARAM_FLAG_VARIADIC: u32 = 1 << 2;
pub const PARAM_FLAG_NOOP_IF_BLANK: u32 = 1 << 3;
pub const PARAM_FLAG_DEQUOTE_REQUOTE: u32 = 1 << 4;
pub const PARAM_FLAG_QUOTED_WORD: u32 = 1 << 5;
pub const PARAM_FLAG_QUOTED_PATH: u32 = 1 << 6;

/// A typeset; as a parameter key it also carries a symbol and a class.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Typeset {
    pub bits: u64,
    pub flags: u32,
    pub class: ParamClass,
    pub sym: Option<SymId>,
}

impl Typeset {
    pub fn new(bits: u64) -> Typeset { Typeset { bits, flags: 0, class: ParamClass::Normal, sym: None } }

    pub fn param(sym: SymId, class: ParamClass, bits: u64) -> Typeset { Typeset { bits, flags: 0, class, sym: Some(sym) } }

    pub fn allows(&self, kind: Kind) -> bool { self.bits & kind.bit() != 0 }

    pub fn has(&self, flag: u32) -> bool { self.flags & flag != 0 }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct Action {
    pub paramlist: SeriesId,
    pub details: SeriesId,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Varargs {
    /// Bound to a running frame: takes from that frame's feed.
    Frame { varlist: SeriesId, param: usize },
    /// Bound to a singular array holding a BLOCK! whose index advances.
    /// `param` and `index` name the paramlist slot used to typecheck takes.
    Array { holder: SeriesId, param: Option<SeriesId>, index: usize },
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Date {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub time: Option<i64>,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Payload {
    None,
    Logic(bool),
    Integer(i64),
    Decimal(f64),
    Char(char),
    Pair(SeriesId),
    Tuple { len: u8, bytes: [u8; 8] },
    Time(i64),
    Date(Date),
    Datatype(Kind),
    Typeset(Typeset),
    Word { sym: SymId, index: u32 },
    Series { series: SeriesId, index: usize },
    Context { varlist: SeriesId, phase: Option<Action> },
    Action(Action),
    Varargs(Varargs),
    Handle(u64),
    Quoted { cell: SeriesId, depth: u32 },
}

impl Payload {
    /// Series referenced from the payload (first and second word).
    pub fn nodes(&self) -> (Option<SeriesId>, Option<SeriesId>) {
        match *self {
            Payload::Pair(id) => (Some(id), None),
            Payload::Series { series, .. } => (Some(series), None),
            Payload::Context { varlist, phase } => (Some(varlist), phase.map(|a| a.paramlist)),
            Payload::Action(a) => (Some(a.paramlist), Some(a.details)),
            Payload::Varargs(Varargs::Frame { varlist, .. }) => (Some(varlist), None),
            Payload::Varargs(Varargs::Array { holder, param, .. }) => (Some(holder), param),
            Payload::Quoted { cell, .. } => (Some(cell), None),
            _ => (None, None),
        }
    }
}

/// The universal value unit.
#[derive(Clone, Debug)]
pub struct Cell {
    pub kind: Kind,
    /// Quoting depth 0..3; deeper values use `Kind::Quoted`.
    pub quote: u8,
    pub flags: u32,
    pub binding: Binding,
    pub payload: Payload,
}

impl PartialEq for Cell {
    fn eq(&self, other: &Cell) -> bool {
        self.kind == other.kind && self.quote == other.quote && self.binding == other.binding && self.payload == other.payload
    }
}

impl Cell {
    pub fn new(kind: Kind, payload: Payload) -> Cell {
        let mut cell = Cell { kind, quote: 0, flags: NODE_FLAG_NODE | NODE_FLAG_CELL, binding: Binding::Unbound, payload };
        cell.update_node_flags();
        cell
    }

    pub fn end() -> Cell { Cell::new(Kind::End, Payload::None) }

    pub fn null() -> Cell { Cell::new(Kind::Null, Payload::None) }

    pub fn endish_null() -> Cell {
        let mut c = Cell::null();
        c.flags |= CELL_FLAG_ENDISH;
        c
    }

    pub fn void() -> Cell { Cell::new(Kind::Void, Payload::None) }

    pub fn blank() -> Cell { Cell::new(Kind::Blank, Payload::None) }

    pub fn bar() -> Cell { Cell::new(Kind::Bar, Payload::None) }

    pub fn logic(b: bool) -> Cell { Cell::new(Kind::Logic, Payload::Logic(b)) }

    pub fn integer(i: i64) -> Cell { Cell::new(Kind::Integer, Payload::Integer(i)) }

    pub fn decimal(d: f64) -> Cell { Cell::new(Kind::Decimal, Payload::Decimal(d)) }

    pub fn char(c: char) -> Cell { Cell::new(Kind::Char, Payload::Char(c)) }

    pub fn datatype(k: Kind) -> Cell { Cell::new(Kind::Datatype, Payload::Datatype(k)) }

    pub fn typeset(ts: Typeset) -> Cell { Cell::new(Kind::Typeset, Payload::Typeset(ts)) }

    pub fn word(kind: Kind, sym: SymId) -> Cell { Cell::new(kind, Payload::Word { sym, index: 0 }) }

    pub fn bound_word(kind: Kind, sym: SymId, binding: Binding, index: u32) -> Cell {
        let mut c = Cell::new(kind, Payload::Word { sym, index });
        c.binding = binding;
        c
    }

    pub fn series(kind: Kind, series: SeriesId, index: usize) -> Cell { Cell::new(kind, Payload::Series { series, index }) }

    pub fn context(kind: Kind, varlist: SeriesId) -> Cell { Cell::new(kind, Payload::Context { varlist, phase: None }) }

    pub fn frame(varlist: SeriesId, phase: Action, binding: Binding) -> Cell {
        let mut c = Cell::new(Kind::Frame, Payload::Context { varlist, phase: Some(phase) });
        c.binding = binding;
        c
    }

    pub fn action(action: Action, binding: Binding) -> Cell {
        let mut c = Cell::new(Kind::Action, Payload::Action(action));
        c.binding = binding;
        c
    }

    pub fn handle(h: u64) -> Cell { Cell::new(Kind::Handle, Payload::Handle(h)) }

    /// Reset to a fresh kind and payload, keeping only storage flags.
    pub fn reset(&mut self, kind: Kind, payload: Payload) {
        self.kind = kind;
        self.quote = 0;
        self.flags &= CELL_MASK_PERSIST;
        self.flags |= NODE_FLAG_NODE | NODE_FLAG_CELL;
        self.binding = Binding::Unbound;
        self.payload = payload;
        self.update_node_flags();
    }

    pub fn set_end(&mut self) { self.reset(Kind::End, Payload::None); }

    pub fn set_null(&mut self) { self.reset(Kind::Null, Payload::None); }

    fn update_node_flags(&mut self) {
        self.flags &= !(CELL_FLAG_FIRST_IS_NODE | CELL_FLAG_SECOND_IS_NODE);
        let (a, b) = self.payload.nodes();
        if a.is_some() {
            self.flags |= CELL_FLAG_FIRST_IS_NODE;
        }
        if b.is_some() {
            self.flags |= CELL_FLAG_SECOND_IS_NODE;
        }
    }

    /// Copy `src` into this cell, carrying only the copyable flag subset.
    pub fn move_from(&mut self, src: &Cell) {
        self.kind = src.kind;
        self.quote = src.quote;
        self.flags = (self.flags & CELL_MASK_PERSIST) | (src.flags & CELL_MASK_COPIED) | NODE_FLAG_NODE | NODE_FLAG_CELL;
        self.binding = src.binding;
        self.payload = src.payload;
        self.update_node_flags();
    }

    /// A fresh cell holding the same value; storage flags are not carried.
    pub fn copied(&self) -> Cell {
        let mut c = Cell::end();
        c.move_from(self);
        c
    }

    pub fn is_end(&self) -> bool { self.kind == Kind::End }

    pub fn is_null(&self) -> bool { self.kind == Kind::Null }

    pub fn is_void(&self) -> bool { self.kind == Kind::Void && self.quote == 0 }

    pub fn is_blank(&self) -> bool { self.kind == Kind::Blank && self.quote == 0 }

    pub fn is_bar(&self) -> bool { self.kind == Kind::Bar && self.quote == 0 }

    pub fn is_quoted(&self) -> bool { self.quote > 0 || self.kind == Kind::Quoted }

    /// Kind with quoting taken into account (`'x` is QUOTED!).
    pub fn type_kind(&self) -> Kind {
        if self.is_quoted() {
            Kind::Quoted
        } else {
            self.kind
        }
    }

    /// True if this unquoted cell has kind `k`.
    pub fn is(&self, k: Kind) -> bool { self.quote == 0 && self.kind == k }

    pub fn has_flag(&self, flag: u32) -> bool { self.flags & flag != 0 }

    pub fn set_flag(&mut self, flag: u32) { self.flags |= flag; }

    pub fn clear_flag(&mut self, flag: u32) { self.flags &= !flag; }

    pub fn is_truthy(&self) -> bool {
        match (self.kind, self.quote) {
            (_, q) if q > 0 => true,
            (Kind::Null, _) | (Kind::Blank, _) | (Kind::End, _) => false,
            (Kind::Logic, _) => self.payload != Payload::Logic(false),
            _ => true,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.payload {
            Payload::Integer(i) if self.quote == 0 => Some(i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self.payload {
            Payload::Decimal(d) if self.quote == 0 => Some(d),
            Payload::Integer(i) if self.quote == 0 => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_logic(&self) -> Option<bool> {
        match self.payload {
            Payload::Logic(b) if self.quote == 0 => Some(b),
            _ => None,
        }
    }

    pub fn word_sym(&self) -> Option<SymId> {
        match self.payload {
            Payload::Word { sym, .. } => Some(sym),
            Payload::Typeset(ts) => ts.sym,
            _ => None,
        }
    }

    pub fn word_index(&self) -> u32 {
        match self.payload {
            Payload::Word { index, .. } => index,
            _ => 0,
        }
    }

    pub fn series_id(&self) -> Option<SeriesId> {
        match self.payload {
            Payload::Series { series, .. } => Some(series),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self.payload {
            Payload::Series { index, .. } => index,
            _ => 0,
        }
    }

    pub fn set_index(&mut self, i: usize) {
        if let Payload::Series { ref mut index, .. } = self.payload {
            *index = i;
        }
    }

    pub fn as_action(&self) -> Option<Action> {
        match self.payload {
            Payload::Action(a) if self.quote == 0 => Some(a),
            _ => None,
        }
    }

    pub fn varlist(&self) -> Option<SeriesId> {
        match self.payload {
            Payload::Context { varlist, .. } => Some(varlist),
            _ => None,
        }
    }

    pub fn as_typeset(&self) -> Option<Typeset> {
        match self.payload {
            Payload::Typeset(ts) => Some(ts),
            _ => None,
        }
    }

    /// The leading header byte; never a legal UTF-8 lead byte.
    pub fn leading_byte(&self) -> u8 {
        if self.flags & NODE_FLAG_NODE == 0 {
            return FREED_CELL_BYTE;
        }
        let mut b = 0xF8;
        if self.flags & NODE_FLAG_CELL != 0 {
            b |= 0x04;
        }
        if self.flags & NODE_FLAG_ROOT != 0 {
            b |= 0x02;
        }
        if self.flags & CELL_FLAG_STACK_LIFETIME != 0 {
            b |= 0x01;
        }
        b
    }
}

/// Total quoting depth of a cell.
pub fn quote_depth(cell: &Cell) -> u32 {
    match cell.payload {
        Payload::Quoted { depth, .. } if cell.kind == Kind::Quoted => depth,
        _ => cell.quote as u32,
    }
}

/// Kind of the cell with all quoting pierced.
pub fn unescaped_kind(heap: &Heap, cell: &Cell) -> Kind {
    match cell.payload {
        Payload::Quoted { cell: id, .. } if cell.kind == Kind::Quoted => heap.array(id)[0].kind,
        _ => cell.kind,
    }
}

/// Add `n` levels of quoting. Depths above 3 move the unescaped cell into a
/// pairing node.
pub fn quotify(heap: &mut Heap, cell: &mut Cell, n: u32) {
    if n == 0 {
        return;
    }
    let depth = quote_depth(cell) + n;
    if cell.kind == Kind::Quoted {
        if let Payload::Quoted { depth: ref mut d, .. } = cell.payload {
            *d = depth;
        }
        return;
    }
    if depth <= 3 {
        cell.quote = depth as u8;
        return;
    }
    let mut inner = cell.copied();
    inner.quote = 0;
    let mut pairing = Series::array(vec![inner, Cell::blank()]);
    pairing.flags |= SERIES_FLAG_PAIRING | SERIES_FLAG_MANAGED;
    let id = heap.alloc(pairing);
    let keep = cell.flags & (CELL_MASK_PERSIST | CELL_MASK_COPIED);
    cell.reset(Kind::Quoted, Payload::Quoted { cell: id, depth });
    cell.flags |= keep;
}

/// Remove `n` levels of quoting (`n` must not exceed the depth).
pub fn unquotify(heap: &Heap, cell: &mut Cell, n: u32) {
    if n == 0 {
        return;
    }
    if let Payload::Quoted { cell: id, depth } = cell.payload {
        if cell.kind == Kind::Quoted {
            let depth = depth.saturating_sub(n);
            if depth > 3 {
                cell.payload = Payload::Quoted { cell: id, depth };
                return;
            }
            let keep = cell.flags & (CELL_MASK_PERSIST | CELL_MASK_COPIED);
            let inner = heap.array(id)[0].clone();
            cell.move_from(&inner);
            cell.flags |= keep;
            cell.quote = depth as u8;
            return;
        }
    }
    cell.quote = cell.quote.saturating_sub(n as u8);
}

/// Strip all quoting, returning the depth removed.
pub fn dequotify(heap: &Heap, cell: &mut Cell) -> u32 {
    let depth = quote_depth(cell);
    unquotify(heap, cell, depth);
    depth
}

#[cfg(test)]
mod test_cell {
    use super::*;

    #[test]
    fn test_move_copies_only_masked_flags() {
        let mut src = Cell::integer(10);
        src.set_flag(CELL_FLAG_UNEVALUATED | NODE_FLAG_ROOT | CELL_FLAG_PROTECTED | CELL_FLAG_NEWLINE_BEFORE);
        let mut dst = Cell::blank();
        dst.set_flag(CELL_FLAG_STACK_LIFETIME);
        dst.move_from(&src);
        assert_eq!(dst.kind, Kind::Integer);
        assert!(dst.has_flag(CELL_FLAG_UNEVALUATED));
        assert!(dst.has_flag(CELL_FLAG_NEWLINE_BEFORE));
        assert!(dst.has_flag(CELL_FLAG_STACK_LIFETIME));
        assert!(!dst.has_flag(NODE_FLAG_ROOT));
        assert!(!dst.has_flag(CELL_FLAG_PROTECTED));
    }

    #[test]
    fn test_reset_keeps_persistent_flags() {
        let mut c = Cell::integer(1);
        c.set_flag(NODE_FLAG_ROOT | CELL_FLAG_ENFIXED);
        c.reset(Kind::Blank, Payload::None);
        assert!(c.has_flag(NODE_FLAG_ROOT));
        assert!(!c.has_flag(CELL_FLAG_ENFIXED));
    }

    #[test]
    fn test_deep_quote_round_trip() {
        let mut heap = Heap::new(1 << 20);
        let original = Cell::integer(7);
        for n in [0, 1, 3, 4, 9] {
            let mut c = original.clone();
            quotify(&mut heap, &mut c, n);
            assert_eq!(quote_depth(&c), n);
            assert_eq!(unescaped_kind(&heap, &c), Kind::Integer);
            if n > 3 {
                assert_eq!(c.kind, Kind::Quoted);
            }
            unquotify(&heap, &mut c, n);
            assert_eq!(c, original);
        }
    }

    #[test]
    fn test_quote_in_steps_crosses_pairing_boundary() {
        let mut heap = Heap::new(1 << 20);
        let mut c = Cell::char('x');
        quotify(&mut heap, &mut c, 3);
        quotify(&mut heap, &mut c, 2);
        assert_eq!(quote_depth(&c), 5);
        unquotify(&heap, &mut c, 2);
        assert_eq!(c.kind, Kind::Char);
        assert_eq!(c.quote, 3);
        assert_eq!(dequotify(&heap, &mut c), 3);
        assert_eq!(c, Cell::char('x'));
    }

    #[test]
    fn test_sigil_variants() {
        assert_eq!(Kind::Word.with_sigil(Sigil::Set), Kind::SetWord);
        assert_eq!(Kind::GetPath.with_sigil(Sigil::Plain), Kind::Path);
        assert_eq!(Kind::Group.with_sigil(Sigil::Get), Kind::GetGroup);
        assert_eq!(Kind::SymBlock.sigil(), Sigil::Sym);
        assert_eq!(Kind::from_name("integer!"), Some(Kind::Integer));
        assert_eq!(Kind::Integer.name(), "integer!");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Cell::null().is_truthy());
        assert!(!Cell::blank().is_truthy());
        assert!(!Cell::logic(false).is_truthy());
        assert!(Cell::integer(0).is_truthy());
        let mut q = Cell::logic(false);
        q.quote = 1;
        assert!(q.is_truthy());
    }

    #[test]
    fn test_cell_leading_byte() {
        let mut c = Cell::integer(1);
        c.set_flag(CELL_FLAG_STACK_LIFETIME | NODE_FLAG_ROOT);
        assert!(c.leading_byte() >= 0xF8);
        assert_eq!(KINDS.len(), Kind::Quoted as usize + 1);
    }
}
