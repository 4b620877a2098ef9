pub mod action;
pub mod cell;
pub mod compare;
pub mod context;
pub mod error;
pub mod eval;
pub mod feed;
pub mod frame;
pub mod fulfill;
pub mod mold;
pub mod path;
pub mod series;
pub mod signal;
pub mod symbol;

mod tests;

use std::fmt;

use tracing::{debug, info};

pub use crate::interpreter::core::action::{Bounce, Dispatcher};
pub use crate::interpreter::core::cell::*;
pub use crate::interpreter::core::context::VarRef;
pub use crate::interpreter::core::error::{Category, Error};
pub use crate::interpreter::core::feed::*;
pub use crate::interpreter::core::frame::*;
pub use crate::interpreter::core::series::*;
pub use crate::interpreter::core::signal::*;
pub use crate::interpreter::core::symbol::{SymId, Symbols};

use crate::fail;
use crate::interpreter::natives;
use crate::reader;
use crate::reader::lexer::{Mark, StrKind, TokenKind};
use crate::reader::parser::{Item, Node, Shape};

/// Frame varlist used to resolve relative words, or `None` when the cells
/// being evaluated are fully specified.
pub type Specifier = Option<SeriesId>;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Evaluator steps between signal checks.
    pub eval_dose: i64,
    /// Bytes of series allocation that trigger a recycle request.
    pub ballast: isize,
    pub max_depth: usize,
    pub data_stack_limit: usize,
    /// Native stack an evaluation may use below its entry point before
    /// failing with `stack-overflow`. Keep it under the running thread's
    /// stack size.
    pub stack_bytes: usize,
}

impl Default for Config {
    fn default() -> Config { Config {
            eval_dose: 10_000,
            ballast: 3_000_000,
            max_depth: 1024,
            data_stack_limit: 1_000_000,
            stack_bytes: 1536 * 1024,
        } }
}

impl Config {
    pub fn eval_dose(mut self, dose: i64) -> Config {
        self.eval_dose = dose.max(1);
        self
    }

    pub fn ballast(mut self, bytes: isize) -> Config {
        self.ballast = bytes;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Config {
        self.max_depth = depth;
        self
    }

    pub fn data_stack_limit(mut self, limit: usize) -> Config {
        self.data_stack_limit = limit;
        self
    }

    pub fn stack_bytes(mut self, bytes: usize) -> Config {
        self.stack_bytes = bytes;
        self
    }
}

/// A throw in progress: the label identifies the catcher.
#[derive(Clone, Debug)]
pub struct Thrown {
    pub label: Cell,
    pub value: Cell,
}

/// Actions the evaluator and natives recognize by identity.
#[derive(Clone, Copy, Debug)]
pub struct Specials {
    pub unwind: Action,
    pub redo: Action,
    pub path_0: Action,
    pub brk: Action,
    pub cont: Action,
    pub quit: Action,
    pub parse_accept: Action,
    pub parse_reject: Action,
    pub ret: Action,
}

pub fn new() -> Result<Runtime, Error> { Runtime::new(Config::default()) }

fn sigil_of(mark: Mark) -> Sigil {
    match mark {
        Mark::Plain => Sigil::Plain,
        Mark::Set => Sigil::Set,
        Mark::Get => Sigil::Get,
        Mark::Sym => Sigil::Sym,
    }
}

/// All interpreter state. Nothing is global; every operation takes the
/// runtime explicitly.
pub struct Runtime {
    pub config: Config,
    pub heap: Heap,
    pub symbols: Symbols,
    pub frames: Vec<Frame>,
    pub feeds: Vec<Feed>,
    /// The data stack.
    pub stack: Vec<Cell>,
    pub thrown: Option<Thrown>,
    /// Unmanaged series, freed if a failure unwinds past their creation.
    pub manuals: Vec<SeriesId>,
    /// API handles, each owned by the frame that was running when made.
    pub api: Vec<Option<(Cell, Option<FrameId>)>>,
    /// Cells kept alive across evaluations by natives that hold them.
    pub guards: Vec<Cell>,
    pub lib: SeriesId,
    pub user: SeriesId,
    specials: Option<Specials>,
    pub signals: u32,
    pub eval_countdown: i64,
    /// Native stack address where the outermost `run` began.
    pub stack_base: Option<usize>,
    pub total_evals: u64,
    pub gc_disabled: u32,
    /// Captured PRINT output, when capturing.
    pub capture: Option<String>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Runtime frames={} feeds={} dsp={} series={}>", self.frames.len(), self.feeds.len(), self.stack.len(), self.heap.live)
    }
}

impl Runtime {
    pub fn new(config: Config) -> Result<Runtime, Error> {
        let mut rt = Runtime {
            heap: Heap::new(config.ballast),
            eval_countdown: config.eval_dose,
            stack_base: None,
            config,
            symbols: Symbols::new(),
            frames: Vec::new(),
            feeds: Vec::new(),
            stack: Vec::new(),
            thrown: None,
            manuals: Vec::new(),
            api: Vec::new(),
            guards: Vec::new(),
            lib: SeriesId(0),
            user: SeriesId(0),
            specials: None,
            signals: 0,
            total_evals: 0,
            gc_disabled: 0,
            capture: None,
        };
        rt.lib = rt.make_context(Kind::Module, &[]);
        rt.user = rt.make_context(Kind::Module, &[]);
        rt.heap.set_flag(rt.lib, SERIES_FLAG_ROOT);
        rt.heap.set_flag(rt.user, SERIES_FLAG_ROOT);
        natives::register(&mut rt)?;
        rt.define_constants();
        rt.specials = Some(Specials {
            unwind: rt.lib_action("unwind")?,
            redo: rt.lib_action("redo")?,
            path_0: rt.lib_action("path-0")?,
            brk: rt.lib_action("break")?,
            cont: rt.lib_action("continue")?,
            quit: rt.lib_action("quit")?,
            parse_accept: rt.lib_action("parse-accept")?,
            parse_reject: rt.lib_action("parse-reject")?,
            ret: rt.lib_action("return")?,
        });
        info!(symbols = rt.symbols.len(), series = rt.heap.live, "runtime booted");
        Ok(rt)
    }

    pub fn specials(&self) -> Specials {
        match self.specials {
            Some(s) => s,
            None => panic!("runtime used before boot finished"),
        }
    }

    fn define_constants(&mut self) {
        for kind in KINDS.iter().copied() {
            if matches!(kind, Kind::End | Kind::Null) {
                continue;
            }
            let name = kind.name();
            self.lib_define(name, Cell::datatype(kind));
        }
        for name in [
            "any-value!",
            "any-word!",
            "any-path!",
            "any-block!",
            "any-group!",
            "any-array!",
            "any-string!",
            "any-series!",
            "any-number!",
            "any-scalar!",
            "any-context!",
        ] {
            if let Some(bits) = action::typeset_by_name(name) {
                self.lib_define(name, Cell::typeset(Typeset::new(bits)));
            }
        }
        for (name, value) in [("true", true), ("false", false), ("on", true), ("off", false), ("yes", true), ("no", false)] {
            self.lib_define(name, Cell::logic(value));
        }
        self.lib_define("blank", Cell::blank());
    }

    /// Set (or add) a library variable.
    pub fn lib_define(&mut self, name: &str, value: Cell) {
        let sym = self.symbols.intern(name);
        let lib = self.lib;
        match self.find_key(lib, sym) {
            Some(i) => self.heap.array_mut(lib)[i] = value,
            None => {
                self.append_key(lib, sym, value);
            }
        }
    }

    pub fn lib_value(&self, name: &str) -> Option<Cell> { self.symbols.lookup(name).and_then(|s| self.context_var(self.lib, s).cloned()) }

    pub fn lib_action(&self, name: &str) -> Result<Action, Error> {
        match self.lib_value(name).and_then(|c| c.as_action()) {
            Some(a) => Ok(a),
            None => fail!(Internal, "no-native", "{} is not a library action", name),
        }
    }

    /// Scan source text into a new unbound block.
    pub fn scan(&mut self, text: &str) -> Result<SeriesId, Error> {
        let tokens = reader::lexer::tokenize(text)?;
        let items = reader::parser::parse(&tokens)?;
        let cells = self.cells_from_items(&items)?;
        Ok(self.alloc_array(cells))
    }

    fn cells_from_items(&mut self, items: &[Item]) -> Result<Vec<Cell>, Error> {
        let mut cells = Vec::with_capacity(items.len());
        for item in items {
            let mut cell = self.cell_from_node(&item.node)?;
            if item.newline {
                cell.set_flag(CELL_FLAG_NEWLINE_BEFORE);
            }
            cells.push(cell);
        }
        Ok(cells)
    }

    fn cell_from_node(&mut self, node: &Node) -> Result<Cell, Error> {
        let cell = match node {
            Node::Quoted(n, inner) => {
                let mut cell = self.cell_from_node(inner)?;
                quotify(&mut self.heap, &mut cell, *n);
                cell
            }
            Node::Array(shape, mark, items) => {
                let base = match shape {
                    Shape::Block => Kind::Block,
                    Shape::Group => Kind::Group,
                    Shape::Path => Kind::Path,
                };
                let cells = self.cells_from_items(items)?;
                let id = self.alloc_array(cells);
                Cell::series(base.with_sigil(sigil_of(*mark)), id, 0)
            }
            Node::Scalar(token) => self.cell_from_token(token)?,
        };
        Ok(cell)
    }

    fn cell_from_token(&mut self, token: &TokenKind) -> Result<Cell, Error> {
        let cell = match token {
            TokenKind::Word(name, mark) => self.word(Kind::Word.with_sigil(sigil_of(*mark)), name),
            TokenKind::Integer(i) => Cell::integer(*i),
            TokenKind::Decimal(d) => Cell::decimal(*d),
            TokenKind::Percent(d) => Cell::new(Kind::Percent, Payload::Decimal(*d)),
            TokenKind::Money(d) => Cell::new(Kind::Money, Payload::Decimal(*d)),
            TokenKind::Char(c) => Cell::char(*c),
            TokenKind::Str(kind, s) => {
                let kind = match kind {
                    StrKind::Text => Kind::Text,
                    StrKind::File => Kind::File,
                    StrKind::Url => Kind::Url,
                    StrKind::Tag => Kind::Tag,
                    StrKind::Email => Kind::Email,
                    StrKind::Issue => Kind::Issue,
                };
                self.text_cell(kind, s)
            }
            TokenKind::Binary(bytes) => {
                let mut series = Series::binary(bytes.clone());
                series.flags |= SERIES_FLAG_MANAGED;
                Cell::series(Kind::Binary, self.heap.alloc(series), 0)
            }
            TokenKind::Pair(x, y, integral) => {
                let (x, y) = if *integral { (Cell::integer(*x as i64), Cell::integer(*y as i64)) } else { (Cell::decimal(*x), Cell::decimal(*y)) };
                self.make_pair(x, y)
            }
            TokenKind::Tuple(parts) => {
                let mut bytes = [0u8; 8];
                bytes[..parts.len()].copy_from_slice(parts);
                Cell::new(Kind::Tuple, Payload::Tuple { len: parts.len() as u8, bytes })
            }
            TokenKind::Time(nanos) => Cell::new(Kind::Time, Payload::Time(*nanos)),
            TokenKind::Date(year, month, day) => Cell::new(Kind::Date, Payload::Date(Date { year: *year, month: *month, day: *day, time: None })),
            TokenKind::Blank => Cell::blank(),
            TokenKind::Bar => Cell::bar(),
            TokenKind::Construct(name) => match name.as_str() {
                "void" => Cell::void(),
                "true" => Cell::logic(true),
                "false" => Cell::logic(false),
                "blank" | "none" => Cell::blank(),
                other => fail!(Syntax, "scan-invalid", "unknown construction syntax #[{}]", other),
            },
            TokenKind::Open(..) | TokenKind::Close(..) | TokenKind::Quote(_) | TokenKind::Slash | TokenKind::SetMark => {
                fail!(Syntax, "scan-invalid", "misplaced delimiter")
            }
        };
        Ok(cell)
    }

    /// A PAIR! value backed by a managed two-cell pairing.
    pub fn make_pair(&mut self, x: Cell, y: Cell) -> Cell {
        let mut pairing = Series::array(vec![x, y]);
        pairing.flags |= SERIES_FLAG_PAIRING | SERIES_FLAG_MANAGED;
        Cell::new(Kind::Pair, Payload::Pair(self.heap.alloc(pairing)))
    }

    /// Scan and bind into the user context.
    pub fn load(&mut self, text: &str) -> Result<SeriesId, Error> {
        let block = self.scan(text)?;
        self.bind_user(block);
        Ok(block)
    }

    /// Load and evaluate source text, trapping failures. An uncaught QUIT
    /// yields its value; any other uncaught throw is an error.
    pub fn run(&mut self, text: &str) -> Result<Cell, Error> {
        debug!(source = text, "run");
        let outer = self.stack_base;
        if outer.is_none() {
            self.stack_base = Some(native_stack_address());
        }
        let result = self.trap(|rt| {
            let block = rt.load(text)?;
            rt.do_array_top(block)
        });
        self.stack_base = outer;
        result
    }

    /// Evaluate a whole block at top level, converting uncaught throws.
    pub fn do_array_top(&mut self, block: SeriesId) -> Result<Cell, Error> {
        let mut out = Cell::null();
        if self.eval_array_at_throws(&mut out, block, 0, None, 0)? {
            return self.uncaught_throw();
        }
        Ok(out)
    }

    fn uncaught_throw(&mut self) -> Result<Cell, Error> {
        let thrown = match self.thrown.take() {
            Some(t) => t,
            None => panic!("throw signaled without a thrown value"),
        };
        if thrown.label.as_action() == Some(self.specials().quit) {
            info!("quit");
            return Ok(thrown.value);
        }
        let label = self.mold(&thrown.label);
        fail!(error::no_catch(&label))
    }

    /// Record a throw; dispatchers then return `Bounce::Thrown`.
    pub fn init_thrown(&mut self, label: Cell, value: Cell) {
        debug_assert!(self.thrown.is_none(), "throw while another throw is in progress");
        self.thrown = Some(Thrown { label, value });
    }

    pub fn take_thrown(&mut self) -> Thrown {
        match self.thrown.take() {
            Some(t) => t,
            None => panic!("no throw in progress"),
        }
    }

    /// Label of the current throw, for catchers to inspect.
    pub fn thrown_label(&self) -> Option<&Cell> { self.thrown.as_ref().map(|t| &t.label) }

    /// Allocate an API handle owned by the running frame.
    pub fn alloc_api(&mut self, cell: Cell) -> usize {
        let owner = self.frames.len().checked_sub(1);
        self.api.push(Some((cell, owner)));
        self.api.len() - 1
    }

    pub fn take_api(&mut self, handle: usize) -> Cell {
        match self.api.get_mut(handle).and_then(|h| h.take()) {
            Some((cell, _)) => cell,
            None => panic!("API handle {} already released", handle),
        }
    }

    pub fn release_api_handles(&mut self, f: FrameId) {
        for slot in self.api.iter_mut() {
            if matches!(slot, Some((_, Some(owner))) if *owner >= f) {
                *slot = None;
            }
        }
        while matches!(self.api.last(), Some(None)) {
            self.api.pop();
        }
    }

    /// Text content of a string-kind cell from its index.
    pub fn cell_text(&self, cell: &Cell) -> String {
        match cell.series_id() {
            Some(id) if self.heap.is_live(id) && !self.heap.is_array(id) => match &self.heap.get(id).content {
                Content::Text(t) => t.slice(cell.index(), t.len()).to_string(),
                Content::Binary(b) => String::from_utf8_lossy(&b[cell.index().min(b.len())..]).into_owned(),
                Content::Array(_) => String::new(),
            },
            _ => String::new(),
        }
    }

    pub fn text_cell(&mut self, kind: Kind, text: &str) -> Cell {
        let id = self.alloc_text(text);
        Cell::series(kind, id, 0)
    }

    pub fn block_cell(&mut self, kind: Kind, cells: Vec<Cell>) -> Cell {
        let id = self.alloc_array(cells);
        Cell::series(kind, id, 0)
    }

    /// Write PRINT output to stdout, or to the capture buffer when set.
    pub fn emit(&mut self, text: &str) {
        match self.capture {
            Some(ref mut buf) => {
                buf.push_str(text);
                buf.push('\n');
            }
            None => println!("{}", text),
        }
    }

    pub fn word(&mut self, kind: Kind, name: &str) -> Cell {
        let sym = self.symbols.intern(name);
        Cell::word(kind, sym)
    }

    /// Keep a cell alive across evaluations until `unguard_to(mark)`.
    pub fn guard(&mut self, cell: &Cell) -> usize {
        self.guards.push(cell.clone());
        self.guards.len() - 1
    }

    pub fn unguard_to(&mut self, mark: usize) { self.guards.truncate(mark); }

    pub fn push_stack(&mut self, cell: Cell) -> Result<(), Error> {
        if self.stack.len() >= self.config.data_stack_limit {
            fail!(error::stack_overflow())
        }
        self.stack.push(cell);
        Ok(())
    }

    #[cfg(test)]
    pub fn push_test_frame(&mut self, text: &str) -> (FeedId, FrameId) {
        let block = self.load(text).unwrap();
        let feed = self.push_array_feed(block, 0, None);
        let f = self.push_frame(feed, 0).unwrap();
        (feed, f)
    }
}
