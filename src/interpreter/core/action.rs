use tracing::debug;

use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::series::*;
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::{Runtime, Specifier};
use crate::fail;

// Action properties live on the paramlist's flags.
pub const ACTION_FLAG_QUOTES_FIRST: u32 = 1 << 16;
pub const ACTION_FLAG_DEFERS_LOOKBACK: u32 = 1 << 17;
pub const ACTION_FLAG_POSTPONES: u32 = 1 << 18;
pub const ACTION_FLAG_INVISIBLE: u32 = 1 << 19;
pub const ACTION_FLAG_RETURN_REQUOTES: u32 = 1 << 20;
pub const ACTION_FLAG_HAS_RETURN: u32 = 1 << 21;
pub const ACTION_FLAG_SKIPPABLE_FIRST: u32 = 1 << 22;
pub const ACTION_FLAG_ENDABLE_FIRST: u32 = 1 << 23;

/// What a dispatcher hands back to the evaluator.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Bounce {
    /// Result was written to the frame's output cell.
    Out,
    Null,
    /// Result is held in an API handle, to be moved into the output.
    Api(usize),
    /// A throw is in progress; see `Runtime::thrown`.
    Thrown,
    /// Re-run the frame's phase, optionally typechecking the varlist again.
    Redo { checked: bool },
    /// The action leaves the output cell as it was.
    Invisible,
}

pub type Dispatcher = fn(&mut Runtime, FrameId) -> Result<Bounce, Error>;

/// Typeset names usable in parameter type blocks, beyond datatype names.
pub fn typeset_by_name(name: &str) -> Option<u64> {
    let bits = match name {
        "any-value!" => TS_ANY_VALUE & !Kind::Void.bit(),
        "any-word!" => TS_ANY_WORD,
        "any-path!" => TS_ANY_PATH,
        "any-block!" => TS_ANY_BLOCK,
        "any-group!" => TS_ANY_GROUP,
        "any-array!" => TS_ANY_ARRAY,
        "any-string!" => TS_ANY_STRING,
        "any-series!" => TS_ANY_SERIES,
        "any-number!" => TS_ANY_NUMBER,
        "any-scalar!" => TS_ANY_NUMBER | Kind::Char.bit() | Kind::Pair.bit() | Kind::Tuple.bit() | Kind::Time.bit(),
        "any-context!" => TS_ANY_CONTEXT,
        "any-function!" => Kind::Action.bit(),
        _ => return Kind::from_name(name).map(|k| k.bit()),
    };
    Some(bits)
}

/// Default typeset of an untyped parameter: anything but null and void.
pub const TS_PARAM_DEFAULT: u64 = TS_VALUE | (1 << Kind::Action as u8);

impl Runtime {
    /// Build a managed paramlist from a spec block. `definitional_return`
    /// adds a RETURN slot unless the spec declares `return:` itself.
    pub fn make_paramlist(&mut self, spec: SeriesId, index: usize, definitional_return: bool) -> Result<SeriesId, Error> {
        let items: Vec<Cell> = self.heap.array(spec).iter().skip(index).cloned().collect();
        let mut params: Vec<Typeset> = Vec::new();
        let mut locals = false;
        let mut action_flags = 0u32;
        for item in &items {
            let kind = item.kind;
            if item.quote == 0 && kind == Kind::Text {
                continue;
            }
            if item.quote == 0 && kind == Kind::Tag {
                match self.cell_text(item).as_str() {
                    "local" => locals = true,
                    "defer" => action_flags |= ACTION_FLAG_DEFERS_LOOKBACK,
                    "postpone" => action_flags |= ACTION_FLAG_POSTPONES,
                    other => fail!(error::bad_func_def(&format!("<{}>", other))),
                }
                continue;
            }
            if item.quote == 0 && kind == Kind::Block {
                let last = match params.last_mut() {
                    Some(p) if p.class != ParamClass::Local => p,
                    _ => fail!(error::bad_func_def(&self.mold(item))),
                };
                let block = item.series_id().unwrap_or_else(|| panic!("block without series"));
                let (bits, flags) = self.param_types(block, item.index(), last.class)?;
                last.bits = bits;
                last.flags |= flags;
                if last.has(PARAM_FLAG_SKIPPABLE) && last.class != ParamClass::HardQuote {
                    fail!(error::bad_func_def("<skip> is only for hard quoted parameters"))
                }
                continue;
            }
            let sym = match item.word_sym() {
                Some(s) => s,
                None if self.is_refinement_path(item) => self.refinement_sym(item),
                None => fail!(error::bad_func_def(&self.mold(item))),
            };
            let class = match (kind, item.quote) {
                (Kind::Word, 0) if locals => ParamClass::Local,
                (Kind::Word, 0) => ParamClass::Normal,
                (Kind::Word, 1) => ParamClass::SoftQuote,
                (Kind::GetWord, 0) => ParamClass::HardQuote,
                (Kind::Path, 0) => {
                    locals = false;
                    ParamClass::Refinement
                }
                (Kind::SetWord, 0) if self.symbols.lower(sym) == "return" => ParamClass::Return,
                (Kind::SetWord, 0) if locals => ParamClass::Local,
                _ => fail!(error::bad_func_def(&self.mold(item))),
            };
            let canon = self.symbols.canon(sym);
            if params.iter().any(|p| p.sym.map(|s| self.symbols.canon(s)) == Some(canon)) {
                fail!(error::bad_func_def(&format!("duplicate parameter {}", self.symbols.spelling(sym))))
            }
            let bits = match class {
                ParamClass::Refinement => Kind::Logic.bit() | Kind::Blank.bit(),
                ParamClass::Local => TS_ANY_VALUE,
                _ => TS_PARAM_DEFAULT,
            };
            params.push(Typeset::param(sym, class, bits));
        }
        if definitional_return && !params.iter().any(|p| p.class == ParamClass::Return) {
            let ret = self.symbols.intern("return");
            params.push(Typeset::param(ret, ParamClass::Return, TS_ANY_VALUE));
        }
        let mut cells = vec![Cell::blank()];
        cells.extend(params.into_iter().map(Cell::typeset));
        let mut series = Series::array(cells);
        series.flags |= SERIES_FLAG_PARAMLIST | SERIES_FLAG_MANAGED | action_flags;
        Ok(self.heap.alloc(series))
    }

    /// Types and parameter flags from a `[integer! <opt> ...]` block.
    fn param_types(&self, block: SeriesId, index: usize, class: ParamClass) -> Result<(u64, u32), Error> {
        let mut bits = 0u64;
        let mut flags = 0u32;
        for t in self.heap.array(block).iter().skip(index) {
            if t.quote == 0 && t.kind == Kind::Tag {
                match self.cell_text(t).as_str() {
                    "opt" => bits |= Kind::Null.bit(),
                    "end" => flags |= PARAM_FLAG_ENDABLE,
                    "..." => flags |= PARAM_FLAG_VARIADIC,
                    "blank" => flags |= PARAM_FLAG_NOOP_IF_BLANK,
                    "skip" => flags |= PARAM_FLAG_SKIPPABLE | PARAM_FLAG_ENDABLE,
                    "dequote" | "requote" => flags |= PARAM_FLAG_DEQUOTE_REQUOTE,
                    "invisible" if class == ParamClass::Return => {}
                    other => fail!(error::bad_func_def(&format!("<{}>", other))),
                }
                continue;
            }
            if t.quote == 0 && t.kind == Kind::Text {
                continue;
            }
            if t.quote == 1 && t.kind == Kind::Word {
                flags |= PARAM_FLAG_QUOTED_WORD;
                continue;
            }
            if t.quote == 1 && t.kind == Kind::Path {
                flags |= PARAM_FLAG_QUOTED_PATH;
                continue;
            }
            let name = match (t.quote, t.kind, t.word_sym()) {
                (0, Kind::Word, Some(sym)) => self.symbols.lower(sym).to_string(),
                (0, Kind::Datatype, _) => match t.payload {
                    Payload::Datatype(k) => k.name().to_string(),
                    _ => String::new(),
                },
                _ => fail!(error::bad_func_def(&self.mold(t))),
            };
            match typeset_by_name(&name) {
                Some(b) => bits |= b,
                None => fail!(error::bad_func_def(&name)),
            }
        }
        if flags & PARAM_FLAG_SKIPPABLE != 0 {
            bits |= Kind::Null.bit();
        }
        Ok((bits, flags))
    }

    /// `/name` paths in a spec: a blank head followed by one word.
    pub fn is_refinement_path(&self, cell: &Cell) -> bool {
        if cell.quote != 0 || cell.kind != Kind::Path {
            return false;
        }
        let arr = match cell.series_id() {
            Some(a) => self.heap.array(a),
            None => return false,
        };
        arr.len() == 2 && arr[0].is_blank() && arr[1].is(Kind::Word)
    }

    fn refinement_sym(&self, cell: &Cell) -> SymId {
        let arr = self.heap.array(cell.series_id().unwrap_or_else(|| panic!("refinement path without series")));
        arr[1].word_sym().unwrap_or_else(|| panic!("refinement path without word"))
    }

    /// Finish a paramlist into an action. The paramlist's archetype cell and
    /// cached first-parameter flags are filled in here.
    pub fn make_action(&mut self, paramlist: SeriesId, dispatcher: Dispatcher, details: Vec<Cell>, exemplar: Option<SeriesId>) -> Action {
        let mut det = Series::array(details);
        det.flags |= SERIES_FLAG_DETAILS | SERIES_FLAG_MANAGED;
        det.misc = Misc::Dispatcher(dispatcher);
        if let Some(ex) = exemplar {
            det.link = Link::Exemplar(ex);
        }
        let details = self.heap.alloc(det);
        let action = Action { paramlist, details };
        self.heap.array_mut(paramlist)[0] = Cell::action(action, Binding::Unbound);

        let mut flags = 0;
        let n = self.heap.len(paramlist);
        for i in 1..n {
            let p = self.param(paramlist, i);
            if matches!(p.class, ParamClass::Local | ParamClass::Return) {
                continue;
            }
            if let Some(ex) = exemplar {
                if self.is_specialized(ex, i) {
                    continue;
                }
            }
            if p.class == ParamClass::HardQuote {
                flags |= ACTION_FLAG_QUOTES_FIRST;
                if p.has(PARAM_FLAG_SKIPPABLE) {
                    flags |= ACTION_FLAG_SKIPPABLE_FIRST;
                }
            }
            if p.has(PARAM_FLAG_ENDABLE) {
                flags |= ACTION_FLAG_ENDABLE_FIRST;
            }
            break;
        }
        for i in 1..n {
            let p = self.param(paramlist, i);
            if p.has(PARAM_FLAG_DEQUOTE_REQUOTE) {
                flags |= ACTION_FLAG_RETURN_REQUOTES;
            }
            if p.class == ParamClass::Return {
                flags |= ACTION_FLAG_HAS_RETURN;
                if p.bits == 0 {
                    flags |= ACTION_FLAG_INVISIBLE;
                }
            }
        }
        self.heap.set_flag(paramlist, flags);
        debug!(params = n - 1, flags, "made action");
        action
    }

    pub fn param(&self, paramlist: SeriesId, index: usize) -> Typeset {
        match self.heap.array(paramlist)[index].payload {
            Payload::Typeset(ts) => ts,
            _ => panic!("paramlist slot {} is not a typeset", index),
        }
    }

    pub fn find_param(&self, paramlist: SeriesId, sym: SymId) -> Option<usize> {
        let canon = self.symbols.canon(sym);
        (1..self.heap.len(paramlist)).find(|&i| self.param(paramlist, i).sym.map(|s| self.symbols.canon(s)) == Some(canon))
    }

    pub fn action_flags(&self, action: Action) -> u32 { self.heap.flags(action.paramlist) }

    pub fn action_has(&self, action: Action, flag: u32) -> bool { self.heap.has_flag(action.paramlist, flag) }

    pub fn dispatcher(&self, action: Action) -> Dispatcher {
        match self.heap.get(action.details).misc {
            Misc::Dispatcher(d) => d,
            _ => panic!("action details without dispatcher"),
        }
    }

    pub fn details(&self, action: Action) -> &Vec<Cell> { self.heap.array(action.details) }

    pub fn exemplar(&self, action: Action) -> Option<SeriesId> {
        match self.heap.get(action.details).link {
            Link::Exemplar(ex) => Some(ex),
            _ => None,
        }
    }

    /// Paramlist whose keys a call frame's varlist is laid out by.
    pub fn underlying_paramlist(&self, action: Action) -> SeriesId {
        match self.heap.get(action.paramlist).link {
            Link::Keylist(under) => under,
            _ => action.paramlist,
        }
    }

    /// An exemplar slot holds a specialized value when it has been marked.
    pub fn is_specialized(&self, exemplar: SeriesId, index: usize) -> bool {
        self.heap.array(exemplar).get(index).map(|c| c.has_flag(CELL_FLAG_ARG_MARKED_CHECKED)).unwrap_or(false)
    }

    /// First parameter that a call would take from its callsite (or from the
    /// left, for enfix), skipping specialized, local and return slots.
    pub fn first_unspecialized_param(&self, action: Action) -> Option<Typeset> {
        let paramlist = self.underlying_paramlist(action);
        let exemplar = self.exemplar(action);
        for i in 1..self.heap.len(paramlist) {
            let p = self.param(paramlist, i);
            match p.class {
                ParamClass::Local | ParamClass::Return => continue,
                ParamClass::Refinement => return None,
                _ => {}
            }
            if let Some(ex) = exemplar {
                if self.is_specialized(ex, i) {
                    continue;
                }
            }
            return Some(p);
        }
        None
    }

    /// Does `cell` fit the types of parameter `param`?
    pub fn type_matches(&self, param: &Typeset, cell: &Cell) -> bool {
        if cell.is_null() {
            return param.allows(Kind::Null) || (cell.has_flag(CELL_FLAG_ENDISH) && param.has(PARAM_FLAG_ENDABLE));
        }
        if cell.quote == 1 && cell.kind == Kind::Word && param.has(PARAM_FLAG_QUOTED_WORD) {
            return true;
        }
        if cell.quote == 1 && cell.kind == Kind::Path && param.has(PARAM_FLAG_QUOTED_PATH) {
            return true;
        }
        param.allows(cell.type_kind())
    }

    /// Spelling of an action's parameters, for WORDS OF and help text.
    pub fn param_words(&self, action: Action) -> Vec<(SymId, ParamClass)> {
        let paramlist = self.underlying_paramlist(action);
        let exemplar = self.exemplar(action);
        (1..self.heap.len(paramlist))
            .filter(|&i| exemplar.map(|ex| !self.is_specialized(ex, i)).unwrap_or(true))
            .filter_map(|i| {
                let p = self.param(paramlist, i);
                match p.class {
                    ParamClass::Local | ParamClass::Return => None,
                    _ => p.sym.map(|s| (s, p.class)),
                }
            })
            .collect()
    }

    /// Create an action from `spec` and `body` the way FUNC does: the body is
    /// deep copied and its parameter words made relative to the paramlist.
    pub fn make_func(&mut self, spec: &Cell, body: &Cell, specifier: Specifier, dispatcher: Dispatcher) -> Result<Action, Error> {
        let spec_array = spec.series_id().unwrap_or_else(|| panic!("func spec without series"));
        let paramlist = self.make_paramlist(spec_array, spec.index(), true)?;
        let body_array = body.series_id().unwrap_or_else(|| panic!("func body without series"));
        let body_spec = self.derive_specifier(body, specifier);
        let copy = self.copy_array_deep(body_array, body.index(), body_spec);
        self.relativize_deep(copy, paramlist);
        let mut body_cell = Cell::series(Kind::Block, copy, 0);
        body_cell.binding = Binding::Relative(paramlist);
        Ok(self.make_action(paramlist, dispatcher, vec![body_cell], None))
    }

    /// A new action running `underlying` with some arguments fixed by the
    /// exemplar frame `exemplar` (whose marked slots are specialized).
    pub fn make_specialization(&mut self, underlying: Action, binding: Binding, exemplar: SeriesId, dispatcher: Dispatcher) -> Action {
        let base = self.underlying_paramlist(underlying);
        let cells = self.heap.array(base).clone();
        let mut series = Series::array(cells);
        series.flags |= SERIES_FLAG_PARAMLIST | SERIES_FLAG_MANAGED;
        series.flags |= self.heap.flags(underlying.paramlist) & (ACTION_FLAG_DEFERS_LOOKBACK | ACTION_FLAG_POSTPONES);
        series.link = Link::Keylist(base);
        let paramlist = self.heap.alloc(series);
        self.make_action(paramlist, dispatcher, vec![Cell::action(underlying, binding)], Some(exemplar))
    }

    /// An action sharing `first`'s interface whose details are arbitrary;
    /// used for CHAIN and other wrappers over an existing parameter list.
    pub fn make_facade(&mut self, first: Action, dispatcher: Dispatcher, details: Vec<Cell>) -> Action {
        let base = self.underlying_paramlist(first);
        let cells = self.heap.array(base).clone();
        let mut series = Series::array(cells);
        series.flags |= SERIES_FLAG_PARAMLIST | SERIES_FLAG_MANAGED;
        series.flags |= self.heap.flags(first.paramlist) & (ACTION_FLAG_DEFERS_LOOKBACK | ACTION_FLAG_POSTPONES);
        series.link = Link::Keylist(base);
        let paramlist = self.heap.alloc(series);
        let exemplar = self.exemplar(first);
        self.make_action(paramlist, dispatcher, details, exemplar)
    }

    /// A fresh exemplar context for specializing `action`: its keys are the
    /// underlying paramlist, and slots already specialized stay marked.
    pub fn make_exemplar(&mut self, action: Action, binding: Binding) -> SeriesId {
        let base = self.underlying_paramlist(action);
        let n = self.heap.len(base);
        let mut cells = match self.exemplar(action) {
            Some(ex) => self.heap.array(ex).clone(),
            None => (0..n).map(|_| Cell::null()).collect(),
        };
        cells.resize(n, Cell::null());
        let mut series = Series::array(cells);
        series.flags |= SERIES_FLAG_VARLIST | SERIES_FLAG_MANAGED;
        series.link = Link::Keylist(base);
        let ex = self.heap.alloc(series);
        self.heap.array_mut(ex)[0] = Cell::frame(ex, action, binding);
        ex
    }

    /// Specialize `action` so the named refinements are already in use;
    /// their arguments are still gathered at the callsite.
    pub fn specialize_refinements(&mut self, action: Action, binding: Binding, refinements: &[SymId]) -> Result<Action, Error> {
        let ex = self.make_exemplar(action, binding);
        let base = self.underlying_paramlist(action);
        for &sym in refinements {
            let i = match self.find_param(base, sym) {
                Some(i) if self.param(base, i).class == ParamClass::Refinement => i,
                _ => fail!(error::bad_refine(self.symbols.spelling(sym))),
            };
            let mut used = Cell::logic(true);
            used.set_flag(CELL_FLAG_ARG_MARKED_CHECKED);
            self.heap.array_mut(ex)[i] = used;
        }
        Ok(self.make_specialization(action, binding, ex, specializer_dispatcher))
    }
}

/// Runs a specialization: the frame was filled from the exemplar, so the
/// specialized action's own phase takes over.
pub fn specializer_dispatcher(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let phase = rt.frames[f].phase.unwrap_or_else(|| panic!("specializer without phase"));
    let target = rt.details(phase)[0].clone();
    match target.as_action() {
        Some(a) => {
            rt.frames[f].phase = Some(a);
            rt.frames[f].binding = target.binding;
            Ok(Bounce::Redo { checked: false })
        }
        None => fail!(Internal, "bad-specialization", "specialization details hold no action"),
    }
}

#[cfg(test)]
mod test_action {
    use super::*;
    use crate::interpreter::core::*;

    fn paramlist_of(rt: &mut Runtime, spec: &str) -> Result<SeriesId, Error> {
        let block = rt.load(spec).unwrap();
        rt.make_paramlist(block, 0, true)
    }

    #[test]
    fn test_param_classes_from_spec() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let pl = paramlist_of(&mut rt, "a 'b :c /only d <local> e").unwrap();
        let classes: Vec<ParamClass> = (1..rt.heap.len(pl)).map(|i| rt.param(pl, i).class).collect();
        assert_eq!(
            classes,
            vec![
                ParamClass::Normal,
                ParamClass::SoftQuote,
                ParamClass::HardQuote,
                ParamClass::Refinement,
                ParamClass::Normal,
                ParamClass::Local,
                ParamClass::Return,
            ]
        );
    }

    #[test]
    fn test_type_block_tags() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let pl = paramlist_of(&mut rt, "v [<opt> integer!] :w [<skip> word!] r [<end> <...> text!]").unwrap();
        let v = rt.param(pl, 1);
        assert!(v.allows(Kind::Null) && v.allows(Kind::Integer) && !v.allows(Kind::Text));
        let w = rt.param(pl, 2);
        assert!(w.has(PARAM_FLAG_SKIPPABLE) && w.has(PARAM_FLAG_ENDABLE));
        let r = rt.param(pl, 3);
        assert!(r.has(PARAM_FLAG_VARIADIC) && r.has(PARAM_FLAG_ENDABLE));
    }

    #[test]
    fn test_bad_specs_fail() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert!(paramlist_of(&mut rt, "a a").unwrap_err().is("bad-func-def"));
        assert!(paramlist_of(&mut rt, "[integer!]").unwrap_err().is("bad-func-def"));
        assert!(paramlist_of(&mut rt, "a [no-such-type!]").unwrap_err().is("bad-func-def"));
        assert!(paramlist_of(&mut rt, "a [<skip> integer!]").unwrap_err().is("bad-func-def"));
    }

    #[test]
    fn test_first_param_flags_are_cached() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let quoting = rt.run("func [:x [<skip> integer!]] [x]").unwrap().as_action().unwrap();
        assert!(rt.action_has(quoting, ACTION_FLAG_QUOTES_FIRST));
        assert!(rt.action_has(quoting, ACTION_FLAG_SKIPPABLE_FIRST));
        let invisible = rt.run("func [return: []] [null]").unwrap().as_action().unwrap();
        assert!(rt.action_has(invisible, ACTION_FLAG_INVISIBLE));
        let deferring = rt.run("func [<defer> x] [x]").unwrap().as_action().unwrap();
        assert!(rt.action_has(deferring, ACTION_FLAG_DEFERS_LOOKBACK));
    }
}
