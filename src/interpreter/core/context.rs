use crate::interpreter::core::cell::{
    Binding, Cell, Kind, ParamClass, Payload, Typeset, CELL_FLAG_PROTECTED, TS_ANY_VALUE,
};
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::series::{
    Link, Series, SeriesId, SERIES_FLAG_INACCESSIBLE, SERIES_FLAG_KEYLIST, SERIES_FLAG_MANAGED, SERIES_FLAG_VARLIST,
};
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::{Runtime, Specifier};
use crate::fail;

/// Resolved location of a variable: slot `index` of a context varlist.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VarRef {
    pub ctx: SeriesId,
    pub index: usize,
}

impl Runtime {
    /// New managed context of `kind` with the given keys, all vars null.
    pub fn make_context(&mut self, kind: Kind, keys: &[SymId]) -> SeriesId {
        let mut key_cells = vec![Cell::blank()];
        key_cells.extend(keys.iter().map(|&s| Cell::typeset(Typeset::param(s, ParamClass::Normal, TS_ANY_VALUE))));
        let mut keylist = Series::array(key_cells);
        keylist.flags |= SERIES_FLAG_KEYLIST | SERIES_FLAG_MANAGED;
        let keylist = self.heap.alloc(keylist);

        let mut vars = vec![Cell::end()];
        vars.extend(keys.iter().map(|_| Cell::null()));
        let mut varlist = Series::array(vars);
        varlist.flags |= SERIES_FLAG_VARLIST | SERIES_FLAG_MANAGED;
        varlist.link = Link::Keylist(keylist);
        let varlist = self.heap.alloc(varlist);
        self.heap.array_mut(varlist)[0] = Cell::context(kind, varlist);
        varlist
    }

    pub fn keylist(&self, ctx: SeriesId) -> SeriesId {
        match self.heap.get(ctx).link {
            Link::Keylist(k) => k,
            _ => panic!("series {:?} is not a context varlist", ctx),
        }
    }

    /// Number of variables (keys) in a context.
    pub fn context_len(&self, ctx: SeriesId) -> usize { self.heap.len(self.keylist(ctx)) - 1 }

    pub fn context_kind(&self, ctx: SeriesId) -> Kind { self.heap.array(ctx)[0].kind }

    pub fn key(&self, ctx: SeriesId, index: usize) -> Typeset {
        let keylist = self.keylist(ctx);
        match self.heap.array(keylist)[index].payload {
            Payload::Typeset(ts) => ts,
            _ => panic!("key {} of {:?} is not a typeset", index, ctx),
        }
    }

    pub fn key_sym(&self, ctx: SeriesId, index: usize) -> SymId {
        self.key(ctx, index).sym.unwrap_or_else(|| panic!("key {} of {:?} has no symbol", index, ctx))
    }

    /// Slot of the key spelled like `sym` (case-insensitively).
    pub fn find_key(&self, ctx: SeriesId, sym: SymId) -> Option<usize> {
        let canon = self.symbols.canon(sym);
        let keylist = self.keylist(ctx);
        self.heap.array(keylist).iter().enumerate().skip(1).find_map(|(i, k)| match k.payload {
            Payload::Typeset(Typeset { sym: Some(s), .. }) if self.symbols.canon(s) == canon => Some(i),
            _ => None,
        })
    }

    /// Add a key holding `value`; returns its slot. Only for non-frame contexts.
    pub fn append_key(&mut self, ctx: SeriesId, sym: SymId, value: Cell) -> usize {
        let keylist = self.keylist(ctx);
        self.heap.array_mut(keylist).push(Cell::typeset(Typeset::param(sym, ParamClass::Normal, TS_ANY_VALUE)));
        let vars = self.heap.array_mut(ctx);
        vars.push(value);
        vars.len() - 1
    }

    pub fn check_accessible(&self, ctx: SeriesId) -> Result<(), Error> {
        if !self.heap.is_live(ctx) || self.heap.has_flag(ctx, SERIES_FLAG_INACCESSIBLE) {
            fail!(error::series_data_freed())
        }
        Ok(())
    }

    pub fn var(&self, r: VarRef) -> &Cell { &self.heap.array(r.ctx)[r.index] }

    pub fn context_var(&self, ctx: SeriesId, sym: SymId) -> Option<&Cell> { self.find_key(ctx, sym).map(|i| &self.heap.array(ctx)[i]) }

    /// Resolve a word through its binding, with `specifier` supplying the
    /// frame for words relative to a function body.
    pub fn resolve_word(&self, word: &Cell, specifier: Specifier) -> Result<VarRef, Error> {
        let sym = word.word_sym().unwrap_or_else(|| panic!("resolve of non-word {:?}", word.kind));
        let index = word.word_index() as usize;
        let ctx = match word.binding {
            Binding::Unbound => fail!(error::not_bound(self.symbols.spelling(sym))),
            Binding::Specific(ctx) => ctx,
            Binding::Relative(paramlist) => match specifier {
                Some(varlist) if self.keylist(varlist) == paramlist || self.find_key(varlist, sym) == Some(index) => varlist,
                _ => fail!(error::not_bound(self.symbols.spelling(sym))),
            },
        };
        self.check_accessible(ctx)?;
        if index == 0 || index >= self.heap.len(ctx) {
            fail!(error::not_bound(self.symbols.spelling(sym)))
        }
        Ok(VarRef { ctx, index })
    }

    /// Variable contents, which may be null or void.
    pub fn get_var(&self, word: &Cell, specifier: Specifier) -> Result<Cell, Error> {
        let r = self.resolve_word(word, specifier)?;
        Ok(self.var(r).clone())
    }

    /// Lookup that never fails; used for lookahead.
    pub fn try_get_var(&self, word: &Cell, specifier: Specifier) -> Option<Cell> { self.resolve_word(word, specifier).ok().map(|r| self.var(r).clone()) }

    pub fn write_var(&mut self, r: VarRef, value: &Cell) -> Result<(), Error> {
        if self.var(r).has_flag(CELL_FLAG_PROTECTED) {
            let sym = self.key_sym(r.ctx, r.index);
            fail!(error::protected_word(self.symbols.spelling(sym)))
        }
        let slot = &mut self.heap.array_mut(r.ctx)[r.index];
        slot.move_from(value);
        Ok(())
    }

    pub fn set_var(&mut self, word: &Cell, specifier: Specifier, value: &Cell) -> Result<(), Error> {
        let r = self.resolve_word(word, specifier)?;
        self.write_var(r, value)
    }

    /// Mark a series managed, taking it off the manual tracking list.
    pub fn ensure_managed(&mut self, id: SeriesId) {
        if self.heap.has_flag(id, SERIES_FLAG_MANAGED) {
            return;
        }
        self.heap.set_flag(id, SERIES_FLAG_MANAGED);
        if let Some(pos) = self.manuals.iter().rposition(|&m| m == id) {
            self.manuals.remove(pos);
        }
    }

    /// Resolve a relative binding against `specifier`.
    pub fn derelativize(&mut self, cell: &Cell, specifier: Specifier) -> Cell {
        let mut out = cell.clone();
        if let Binding::Relative(_) = cell.binding {
            if let Some(varlist) = specifier {
                self.ensure_managed(varlist);
                out.binding = Binding::Specific(varlist);
            }
        }
        out
    }

    /// Specifier for evaluating the contents of array `cell` that was found
    /// under `specifier`.
    pub fn derive_specifier(&self, cell: &Cell, specifier: Specifier) -> Specifier {
        match cell.binding {
            Binding::Relative(_) => specifier,
            Binding::Specific(v) => Some(v),
            Binding::Unbound => None,
        }
    }

    /// Bind every word in `array` (deeply) into `ctx`, adding keys for set-words
    /// only when `add_set_words` is given. Words already found in `ctx` are
    /// rebound; others are left alone.
    pub fn bind_deep(&mut self, array: SeriesId, ctx: SeriesId, add_set_words: bool) {
        let len = self.heap.len(array);
        for i in 0..len {
            let cell = self.heap.array(array)[i].clone();
            if cell.kind.is_any_word() {
                let sym = match cell.word_sym() {
                    Some(s) => s,
                    None => continue,
                };
                let index = match self.find_key(ctx, sym) {
                    Some(i) => Some(i),
                    None if add_set_words && cell.kind == Kind::SetWord => Some(self.append_key(ctx, sym, Cell::null())),
                    None => None,
                };
                if let Some(index) = index {
                    let slot = &mut self.heap.array_mut(array)[i];
                    slot.binding = Binding::Specific(ctx);
                    slot.payload = Payload::Word { sym, index: index as u32 };
                }
            } else if cell.kind.is_any_array() {
                if let Some(inner) = cell.series_id() {
                    self.bind_deep(inner, ctx, add_set_words);
                }
            }
        }
    }

    /// Bind every word in freshly loaded code to the user context, adding a
    /// key for each new spelling and importing its library value if any.
    pub fn bind_user(&mut self, array: SeriesId) {
        let len = self.heap.len(array);
        for i in 0..len {
            let cell = self.heap.array(array)[i].clone();
            let inner = match cell.payload {
                Payload::Quoted { cell: id, .. } if cell.kind == Kind::Quoted => Some(id),
                _ => None,
            };
            if let Some(id) = inner {
                self.bind_user(id);
                continue;
            }
            if cell.kind.is_any_word() {
                if let Some(sym) = cell.word_sym() {
                    let index = self.user_slot(sym);
                    let slot = &mut self.heap.array_mut(array)[i];
                    slot.binding = Binding::Specific(self.user);
                    slot.payload = Payload::Word { sym, index: index as u32 };
                }
            } else if cell.kind.is_any_array() {
                if let Some(inner) = cell.series_id() {
                    self.bind_user(inner);
                }
            }
        }
    }

    fn user_slot(&mut self, sym: SymId) -> usize {
        let user = self.user;
        if let Some(i) = self.find_key(user, sym) {
            return i;
        }
        let imported = self.context_var(self.lib, sym).map(|c| c.copied()).unwrap_or_else(Cell::null);
        self.append_key(user, sym, imported)
    }

    /// Make word-bearing cells in `array` relative to `paramlist` where their
    /// spelling names a parameter, marking nested arrays relative too.
    pub fn relativize_deep(&mut self, array: SeriesId, paramlist: SeriesId) {
        let len = self.heap.len(array);
        for i in 0..len {
            let cell = self.heap.array(array)[i].clone();
            if cell.kind.is_any_word() {
                let sym = match cell.word_sym() {
                    Some(s) => s,
                    None => continue,
                };
                if let Some(index) = self.find_param(paramlist, sym) {
                    let slot = &mut self.heap.array_mut(array)[i];
                    slot.binding = Binding::Relative(paramlist);
                    slot.payload = Payload::Word { sym, index: index as u32 };
                }
            } else if cell.kind.is_any_array() {
                if let Some(inner) = cell.series_id() {
                    self.relativize_deep(inner, paramlist);
                    self.heap.array_mut(array)[i].binding = Binding::Relative(paramlist);
                }
            }
        }
    }

    /// Managed deep copy of `array` from `index`, resolving relative cells
    /// against `specifier`.
    pub fn copy_array_deep(&mut self, array: SeriesId, index: usize, specifier: Specifier) -> SeriesId {
        let cells: Vec<Cell> = self.heap.array(array).iter().skip(index).cloned().collect();
        let mut copied = Vec::with_capacity(cells.len());
        for cell in cells {
            let mut c = self.derelativize(&cell, specifier);
            if cell.quote == 0 && cell.kind.is_any_array() {
                if let Some(inner) = cell.series_id() {
                    let inner_spec = self.derive_specifier(&cell, specifier);
                    let copy = self.copy_array_deep(inner, 0, inner_spec);
                    c = Cell::series(cell.kind, copy, cell.index());
                    c.flags |= cell.flags & crate::interpreter::core::cell::CELL_FLAG_NEWLINE_BEFORE;
                }
            }
            copied.push(c);
        }
        self.alloc_array(copied)
    }

    /// Shallow managed copy with relative cells resolved.
    pub fn copy_array_shallow(&mut self, array: SeriesId, from: usize, to: usize, specifier: Specifier) -> SeriesId {
        let cells: Vec<Cell> = self.heap.array(array)[from.min(to)..to].to_vec();
        let copied = cells.iter().map(|c| self.derelativize(c, specifier)).collect();
        self.alloc_array(copied)
    }

    pub fn alloc_array(&mut self, cells: Vec<Cell>) -> SeriesId {
        let mut series = Series::array(cells);
        series.flags |= SERIES_FLAG_MANAGED;
        self.heap.alloc(series)
    }

    pub fn alloc_text(&mut self, text: &str) -> SeriesId {
        let mut series = Series::text(text);
        series.flags |= SERIES_FLAG_MANAGED;
        self.heap.alloc(series)
    }

    /// Copy an object's keys and vars into a new context of the same kind.
    pub fn copy_context(&mut self, ctx: SeriesId, deep: bool) -> Result<SeriesId, Error> {
        self.check_accessible(ctx)?;
        let kind = self.context_kind(ctx);
        let keys: Vec<SymId> = (1..=self.context_len(ctx)).map(|i| self.key_sym(ctx, i)).collect();
        let copy = self.make_context(kind, &keys);
        for i in 1..=keys.len() {
            let mut v = self.heap.array(ctx)[i].copied();
            if deep && v.quote == 0 && (v.kind.is_any_series()) {
                if let (true, Some(inner)) = (v.kind.is_any_array(), v.series_id()) {
                    let c = self.copy_array_deep(inner, 0, None);
                    self.bind_deep(c, copy, false);
                    v = Cell::series(v.kind, c, v.index());
                }
            }
            self.heap.array_mut(copy)[i] = v;
        }
        Ok(copy)
    }
}

#[cfg(test)]
mod test_context {
    use crate::interpreter::core::*;

    #[test]
    fn test_make_context_and_lookup() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let a = rt.symbols.intern("alpha");
        let b = rt.symbols.intern("Beta");
        let ctx = rt.make_context(Kind::Object, &[a, b]);
        assert_eq!(rt.context_len(ctx), 2);
        let beta = rt.symbols.intern("BETA");
        assert_eq!(rt.find_key(ctx, beta), Some(2));
        let word = Cell::bound_word(Kind::Word, beta, Binding::Specific(ctx), 2);
        rt.set_var(&word, None, &Cell::integer(5)).unwrap();
        assert_eq!(rt.get_var(&word, None).unwrap(), Cell::integer(5));
    }

    #[test]
    fn test_unbound_word_fails() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let s = rt.symbols.intern("nowhere");
        let err = rt.get_var(&Cell::word(Kind::Word, s), None).unwrap_err();
        assert!(err.is("not-bound"));
    }

    #[test]
    fn test_protected_variable_rejects_writes() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let s = rt.symbols.intern("locked");
        let ctx = rt.make_context(Kind::Object, &[s]);
        rt.heap.array_mut(ctx)[1].set_flag(CELL_FLAG_PROTECTED);
        let err = rt.write_var(VarRef { ctx, index: 1 }, &Cell::integer(1)).unwrap_err();
        assert!(err.is("protected-word"));
    }

    #[test]
    fn test_bind_user_imports_library_values() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let block = rt.load("append fresh-word").unwrap();
        let first = rt.heap.array(block)[0].clone();
        assert_eq!(first.binding, Binding::Specific(rt.user));
        assert!(rt.get_var(&first, None).unwrap().is(Kind::Action));
        let second = rt.heap.array(block)[1].clone();
        assert!(rt.get_var(&second, None).unwrap().is_null());
    }
}
