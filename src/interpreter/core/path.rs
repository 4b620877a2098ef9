use tracing::trace;

use crate::interpreter::core::cell::*;
use crate::interpreter::core::context::VarRef;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::series::*;
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::{Runtime, Specifier};
use crate::fail;

/// What a path evaluated to.
#[derive(Debug)]
pub enum PathResult {
    Value(Cell),
    /// An action to invoke; its refinements are pushed on the data stack
    /// with the first one on top.
    Action { action: Action, binding: Binding, label: Option<SymId> },
    Thrown,
}

/// Where the value being picked from lives, so immediates can be written
/// back after a poke.
#[derive(Clone, Copy, Debug)]
enum Place {
    Var(VarRef),
    Slot { array: SeriesId, index: usize },
    Nowhere,
}

/// Path flag: GROUP! elements are refused instead of evaluated, for paths
/// handed to GET and SET as data.
pub const PATH_FLAG_NO_GROUPS: u32 = 1 << 0;

/// A path element with its group or get-word already resolved.
enum Picker {
    Value(Cell),
    Thrown,
}

impl Runtime {
    /// The `/` path: two blanks.
    pub fn is_divide_path(&self, cell: &Cell) -> bool {
        if !cell.is(Kind::Path) {
            return false;
        }
        match cell.series_id() {
            Some(a) => {
                let cells = &self.heap.array(a)[cell.index().min(self.heap.len(a))..];
                cells.len() == 2 && cells[0].is_blank() && cells[1].is_blank()
            }
            None => false,
        }
    }

    /// Paths with a blank head (`/foo`) evaluate to themselves.
    pub fn is_inert_path(&self, cell: &Cell) -> bool {
        match cell.series_id() {
            Some(a) => self.heap.array(a).get(cell.index()).map(|h| h.is_blank()).unwrap_or(true),
            None => true,
        }
    }

    fn path_cells(&mut self, path: &Cell, specifier: Specifier) -> (Vec<Cell>, Specifier) {
        let array = self.array_of(path);
        let spec = self.derive_specifier(path, specifier);
        let cells = self.heap.array(array).iter().skip(path.index()).cloned().collect();
        (cells, spec)
    }

    fn resolve_picker(&mut self, item: &Cell, specifier: Specifier, flags: u32) -> Result<Picker, Error> {
        if item.quote != 0 {
            let mut v = self.derelativize(item, specifier);
            unquotify(&self.heap, &mut v, 1);
            return Ok(Picker::Value(v));
        }
        match item.kind {
            Kind::Group => {
                if flags & PATH_FLAG_NO_GROUPS != 0 {
                    fail!(error::path_group_refused())
                }
                let array = self.array_of(item);
                let spec = self.derive_specifier(item, specifier);
                let mut out = Cell::null();
                if self.eval_array_at_throws(&mut out, array, item.index(), spec, 0)? {
                    return Ok(Picker::Thrown);
                }
                Ok(Picker::Value(out))
            }
            Kind::GetWord => Ok(Picker::Value(self.get_var(item, specifier)?)),
            _ => Ok(Picker::Value(self.derelativize(item, specifier))),
        }
    }

    /// Push the rest of a path as refinements of the action it reached, in
    /// reverse so the first refinement ends up on top.
    fn push_refinements(&mut self, rest: &[Cell], specifier: Specifier, flags: u32) -> Result<bool, Error> {
        let base = self.stack.len();
        for item in rest {
            let sym = match (item.quote, item.kind) {
                (0, Kind::Word) => item.word_sym(),
                (0, Kind::GetWord) => {
                    let value = self.get_var(item, specifier)?;
                    if value.is_truthy() {
                        item.word_sym()
                    } else {
                        None
                    }
                }
                (0, Kind::Group) => match self.resolve_picker(item, specifier, flags)? {
                    Picker::Thrown => {
                        self.stack.truncate(base);
                        return Ok(true);
                    }
                    Picker::Value(v) if v.is_null() || v.is_blank() => None,
                    Picker::Value(v) if v.kind.is_any_word() => v.word_sym(),
                    Picker::Value(v) => fail!(error::bad_refine(&self.mold(&v))),
                },
                (0, Kind::Blank) => None,
                _ => fail!(error::bad_refine(&self.mold(item))),
            };
            if let Some(sym) = sym {
                self.push_stack(Cell::word(Kind::Word, sym))?;
            }
        }
        self.stack[base..].reverse();
        Ok(false)
    }

    /// Evaluate a PATH!. With `push_refinements`, reaching an action stops
    /// the walk and the remaining elements become its refinements.
    pub fn eval_path_throws(&mut self, path: &Cell, specifier: Specifier, push_refinements: bool, flags: u32) -> Result<PathResult, Error> {
        if self.is_divide_path(path) {
            return Ok(PathResult::Action { action: self.specials().path_0, binding: Binding::Unbound, label: None });
        }
        let (cells, spec) = self.path_cells(path, specifier);
        let head = match cells.first() {
            Some(h) => h.clone(),
            None => return Ok(PathResult::Value(Cell::blank())),
        };
        let mut label = None;
        let mut current = if head.is(Kind::Word) {
            let r = self.resolve_word(&head, spec)?;
            label = head.word_sym();
            self.var(r).clone()
        } else {
            match self.resolve_picker(&head, spec, flags)? {
                Picker::Thrown => return Ok(PathResult::Thrown),
                Picker::Value(v) => v,
            }
        };

        for i in 1..cells.len() {
            if let Some(action) = current.as_action() {
                if !push_refinements {
                    fail!(error::bad_path_pick(&self.mold(&cells[i])))
                }
                if self.push_refinements(&cells[i..], spec, flags)? {
                    return Ok(PathResult::Thrown);
                }
                trace!(refinements = cells.len() - i, "path reached action");
                return Ok(PathResult::Action { action, binding: current.binding, label });
            }
            if current.is_null() {
                fail!(error::no_value(&self.mold(&cells[i - 1])))
            }
            let picker = match self.resolve_picker(&cells[i], spec, flags)? {
                Picker::Thrown => return Ok(PathResult::Thrown),
                Picker::Value(p) => p,
            };
            if picker.is(Kind::Word) {
                label = picker.word_sym();
            }
            current = self.pick(&current, &picker)?.0;
        }
        if let Some(action) = current.as_action() {
            if push_refinements {
                return Ok(PathResult::Action { action, binding: current.binding, label });
            }
        }
        Ok(PathResult::Value(current))
    }

    /// GET-PATH!: the value at the path, without invoking actions. An action
    /// reached with refinements becomes a specialization using them.
    pub fn get_path_throws(&mut self, out: &mut Cell, path: &Cell, specifier: Specifier, flags: u32) -> Result<bool, Error> {
        let base = self.stack.len();
        let mut plain = path.clone();
        plain.kind = Kind::Path;
        match self.eval_path_throws(&plain, specifier, true, flags)? {
            PathResult::Thrown => Ok(true),
            PathResult::Value(v) => {
                *out = v;
                Ok(false)
            }
            PathResult::Action { action, binding, .. } => {
                let mut refinements: Vec<SymId> = self.stack.split_off(base).iter().filter_map(|c| c.word_sym()).collect();
                refinements.reverse();
                if refinements.is_empty() {
                    *out = Cell::action(action, binding);
                } else {
                    let special = self.specialize_refinements(action, binding, &refinements)?;
                    *out = Cell::action(special, binding);
                }
                Ok(false)
            }
        }
    }

    /// SET-PATH!: poke `value` into the last element's target.
    pub fn set_path_throws(&mut self, path: &Cell, specifier: Specifier, value: &Cell, flags: u32) -> Result<bool, Error> {
        let (cells, spec) = self.path_cells(path, specifier);
        if cells.len() < 2 {
            fail!(error::bad_path_poke(&self.mold(path)))
        }
        let head = cells[0].clone();
        let (mut current, mut place) = if head.kind.is_any_word() && head.quote == 0 {
            let r = self.resolve_word(&head, spec)?;
            (self.var(r).clone(), Place::Var(r))
        } else {
            match self.resolve_picker(&head, spec, flags)? {
                Picker::Thrown => return Ok(true),
                Picker::Value(v) => (v, Place::Nowhere),
            }
        };
        let last = cells.len() - 1;
        for i in 1..last {
            if current.is_null() {
                fail!(error::no_value(&self.mold(&cells[i - 1])))
            }
            let picker = match self.resolve_picker(&cells[i], spec, flags)? {
                Picker::Thrown => return Ok(true),
                Picker::Value(p) => p,
            };
            let (next, next_place) = self.pick(&current, &picker)?;
            current = next;
            place = next_place;
        }
        if current.is_null() {
            fail!(error::no_value(&self.mold(&cells[last - 1])))
        }
        let picker = match self.resolve_picker(&cells[last], spec, flags)? {
            Picker::Thrown => return Ok(true),
            Picker::Value(p) => p,
        };
        if let Some(updated) = self.poke(&current, &picker, value)? {
            match place {
                Place::Var(r) => self.write_var(r, &updated)?,
                Place::Slot { array, index } => {
                    self.check_mutable(array)?;
                    self.heap.array_mut(array)[index].move_from(&updated);
                }
                Place::Nowhere => fail!(error::bad_path_poke(&self.mold(&picker))),
            }
        }
        Ok(false)
    }

    pub fn check_mutable(&self, series: SeriesId) -> Result<(), Error> {
        if self.heap.has_flag(series, SERIES_FLAG_PROTECTED) {
            fail!(error::protected_series())
        }
        Ok(())
    }

    fn bad_pick(&self, picker: &Cell) -> Error { error::bad_path_pick(&self.mold(picker)) }

    fn bad_poke(&self, picker: &Cell) -> Error { error::bad_path_poke(&self.mold(picker)) }

    /// PICK as a native: one path step without tracking where it landed.
    pub fn pick_value(&mut self, current: &Cell, picker: &Cell) -> Result<Cell, Error> { self.pick(current, picker).map(|(v, _)| v) }

    /// POKE as a native. Immediates come back updated rather than changed
    /// in place.
    pub fn poke_value(&mut self, current: &Cell, picker: &Cell, value: &Cell) -> Result<Option<Cell>, Error> { self.poke(current, picker, value) }

    /// One path step: `picker` applied to `current`.
    fn pick(&mut self, current: &Cell, picker: &Cell) -> Result<(Cell, Place), Error> {
        match self.path_step(current, picker, None)? {
            PathStep::Picked(value, place) => Ok((value, place)),
            _ => Err(self.bad_pick(picker)),
        }
    }

    /// Store into `current` at `picker`. Series and contexts are changed in
    /// place (returns `None`); immediates return their updated value for
    /// the caller to write back.
    fn poke(&mut self, current: &Cell, picker: &Cell, value: &Cell) -> Result<Option<Cell>, Error> {
        match self.path_step(current, picker, Some(value))? {
            PathStep::Poked => Ok(None),
            PathStep::Immediate(updated) => Ok(Some(updated)),
            _ => Err(self.bad_poke(picker)),
        }
    }

    /// Dispatch one step to the hook for `current`'s kind, following redos.
    fn path_step(&mut self, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
        let mut current = current.clone();
        loop {
            let hook = match path_hook(&current) {
                Some(hook) => hook,
                None => return Ok(PathStep::Unhandled),
            };
            match hook(self, &current, picker, setval)? {
                PathStep::Redo(next) => current = next,
                step => return Ok(step),
            }
        }
    }

    /// Component by word name or 1-based integer.
    fn component_index(&self, picker: &Cell, names: &[&str]) -> Option<usize> {
        if let Some(n) = picker.as_integer() {
            return if n >= 1 && (n as usize) <= names.len() { Some(n as usize - 1) } else { None };
        }
        let sym = picker.word_sym()?;
        let lower = self.symbols.lower(sym);
        names.iter().position(|n| *n == lower)
    }

    fn select_slot(&self, array: SeriesId, start: usize, picker: &Cell) -> Option<usize> {
        let canon = picker.word_sym().map(|s| self.symbols.canon(s));
        let cells = self.heap.array(array);
        let found = (start..cells.len()).find(|&i| {
            let c = &cells[i];
            c.quote == 0 && c.kind.is_any_word() && c.word_sym().map(|s| self.symbols.canon(s)) == canon
        })?;
        if found + 1 < cells.len() {
            Some(found + 1)
        } else {
            None
        }
    }
}

/// What a path hook did with one step.
enum PathStep {
    /// Picked value, and where it lives when it can be written through.
    Picked(Cell, Place),
    /// The target was changed in place.
    Poked,
    /// Updated copy of an immediate; the caller writes it back.
    Immediate(Cell),
    /// Dispatch again with this value standing in for the target.
    Redo(Cell),
    Unhandled,
}

/// `setval` is `None` for a pick.
type PathHook = fn(&mut Runtime, &Cell, &Cell, Option<&Cell>) -> Result<PathStep, Error>;

fn path_hook(current: &Cell) -> Option<PathHook> {
    let kind = current.kind;
    let hook: PathHook = match kind {
        _ if current.quote != 0 => unquote_hook,
        Kind::Quoted => unquote_hook,
        k if k.is_any_array() => array_hook,
        k if k.is_any_string() => string_hook,
        Kind::Binary => binary_hook,
        k if k.is_any_context() => context_hook,
        Kind::Pair => pair_hook,
        Kind::Tuple => tuple_hook,
        Kind::Date => date_hook,
        Kind::Time => time_hook,
        _ => return None,
    };
    Some(hook)
}

/// Paths look through every level of quoting.
fn unquote_hook(rt: &mut Runtime, current: &Cell, _picker: &Cell, _setval: Option<&Cell>) -> Result<PathStep, Error> {
    let depth = match current.payload {
        Payload::Quoted { depth, .. } if current.kind == Kind::Quoted => depth,
        _ => current.quote as u32,
    };
    let mut plain = current.clone();
    unquotify(&rt.heap, &mut plain, depth);
    Ok(PathStep::Redo(plain))
}

fn array_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let array = rt.array_of(current);
    let start = current.index();
    let len = rt.heap.len(array);
    let slot = if let Some(n) = picker.as_integer() {
        let at = start as i64 + n - 1;
        if n < 1 || at >= len as i64 {
            if setval.is_some() {
                fail!(error::out_of_range(&n.to_string()))
            }
            return Ok(PathStep::Picked(Cell::null(), Place::Nowhere));
        }
        at as usize
    } else if picker.kind.is_any_word() && picker.quote == 0 {
        match rt.select_slot(array, start, picker) {
            Some(i) => i,
            None if setval.is_some() => return Ok(PathStep::Unhandled),
            None => return Ok(PathStep::Picked(Cell::null(), Place::Nowhere)),
        }
    } else {
        return Ok(PathStep::Unhandled);
    };
    match setval {
        None => {
            let spec = rt.derive_specifier(current, None);
            let cell = rt.heap.array(array)[slot].clone();
            let value = rt.derelativize(&cell, spec);
            Ok(PathStep::Picked(value, Place::Slot { array, index: slot }))
        }
        Some(value) => {
            if value.is_null() {
                fail!(error::need_non_null(&rt.mold(picker)))
            }
            rt.check_mutable(array)?;
            let stored = value.copied();
            rt.heap.array_mut(array)[slot].move_from(&stored);
            Ok(PathStep::Poked)
        }
    }
}

fn string_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let n = match picker.as_integer() {
        Some(n) => n,
        None => return Ok(PathStep::Unhandled),
    };
    let id = rt.array_of(current);
    let at = current.index() as i64 + n - 1;
    let value = match setval {
        None => {
            if n < 1 {
                return Ok(PathStep::Picked(Cell::null(), Place::Nowhere));
            }
            let ch = match rt.heap.get(id).content {
                Content::Text(ref t) => t.char_at(at as usize).map(Cell::char),
                _ => None,
            };
            return Ok(PathStep::Picked(ch.unwrap_or_else(Cell::null), Place::Nowhere));
        }
        Some(value) => value,
    };
    let ch = match value.payload {
        Payload::Char(c) if value.quote == 0 => c,
        _ => fail!(error::invalid_arg(&rt.mold(value))),
    };
    rt.check_mutable(id)?;
    let text = rt.heap.text_mut(id);
    if n < 1 || at >= text.len() as i64 {
        fail!(error::out_of_range(&n.to_string()))
    }
    let at = at as usize;
    text.remove(at, at + 1);
    text.insert(at, &ch.to_string());
    Ok(PathStep::Poked)
}

fn binary_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let n = match picker.as_integer() {
        Some(n) => n,
        None => return Ok(PathStep::Unhandled),
    };
    let id = rt.array_of(current);
    let at = current.index() as i64 + n - 1;
    let value = match setval {
        None => {
            if n < 1 {
                return Ok(PathStep::Picked(Cell::null(), Place::Nowhere));
            }
            let byte = match rt.heap.get(id).content {
                Content::Binary(ref b) => b.get(at as usize).map(|&byte| Cell::integer(byte as i64)),
                _ => None,
            };
            return Ok(PathStep::Picked(byte.unwrap_or_else(Cell::null), Place::Nowhere));
        }
        Some(value) => value,
    };
    let byte = match value.as_integer() {
        Some(b @ 0..=255) => b as u8,
        _ => fail!(error::out_of_range(&rt.mold(value))),
    };
    rt.check_mutable(id)?;
    let bytes = rt.heap.binary_mut(id);
    if n < 1 || at >= bytes.len() as i64 {
        fail!(error::out_of_range(&n.to_string()))
    }
    bytes[at as usize] = byte;
    Ok(PathStep::Poked)
}

fn context_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let ctx = match current.varlist() {
        Some(ctx) => ctx,
        None => return Ok(PathStep::Unhandled),
    };
    rt.check_accessible(ctx)?;
    let sym = match picker.word_sym() {
        Some(s) if picker.kind.is_any_word() => s,
        _ => return Ok(PathStep::Unhandled),
    };
    let r = match rt.find_key(ctx, sym) {
        Some(index) => VarRef { ctx, index },
        None => return Ok(PathStep::Unhandled),
    };
    match setval {
        None => Ok(PathStep::Picked(rt.var(r).clone(), Place::Var(r))),
        Some(value) => {
            rt.write_var(r, value)?;
            Ok(PathStep::Poked)
        }
    }
}

fn pair_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let id = match current.payload {
        Payload::Pair(id) => id,
        _ => return Ok(PathStep::Unhandled),
    };
    let i = match rt.component_index(picker, &["x", "y"]) {
        Some(i) => i,
        None => return Ok(PathStep::Unhandled),
    };
    let value = match setval {
        None => return Ok(PathStep::Picked(rt.heap.array(id)[i].clone(), Place::Nowhere)),
        Some(value) => value,
    };
    if !value.kind.is_any_number() {
        fail!(error::invalid_arg(&rt.mold(value)))
    }
    let mut cells = rt.heap.array(id).clone();
    cells[i] = value.copied();
    let y = cells.pop().unwrap_or_else(Cell::blank);
    let x = cells.pop().unwrap_or_else(Cell::blank);
    let mut updated = current.clone();
    updated.payload = rt.make_pair(x, y).payload;
    Ok(PathStep::Immediate(updated))
}

fn tuple_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let (len, mut bytes) = match current.payload {
        Payload::Tuple { len, bytes } => (len, bytes),
        _ => return Ok(PathStep::Unhandled),
    };
    let n = match picker.as_integer() {
        Some(n) => n,
        None => return Ok(PathStep::Unhandled),
    };
    let value = match setval {
        None if n >= 1 && n <= len as i64 => return Ok(PathStep::Picked(Cell::integer(bytes[(n - 1) as usize] as i64), Place::Nowhere)),
        None => return Ok(PathStep::Picked(Cell::null(), Place::Nowhere)),
        Some(value) => value,
    };
    let b = match value.as_integer() {
        Some(b @ 0..=255) => b as u8,
        _ => fail!(error::out_of_range(&rt.mold(value))),
    };
    if !(1..=8).contains(&n) {
        fail!(error::out_of_range(&n.to_string()))
    }
    bytes[(n - 1) as usize] = b;
    let mut updated = current.clone();
    updated.payload = Payload::Tuple { len: len.max(n as u8), bytes };
    Ok(PathStep::Immediate(updated))
}

fn date_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let mut d = match current.payload {
        Payload::Date(d) => d,
        _ => return Ok(PathStep::Unhandled),
    };
    let which = rt.component_index(picker, &["year", "month", "day", "time"]);
    let value = match setval {
        None => {
            let picked = match which {
                Some(0) => Cell::integer(d.year as i64),
                Some(1) => Cell::integer(d.month as i64),
                Some(2) => Cell::integer(d.day as i64),
                Some(3) => match d.time {
                    Some(t) => Cell::new(Kind::Time, Payload::Time(t)),
                    None => Cell::null(),
                },
                _ => return Ok(PathStep::Unhandled),
            };
            return Ok(PathStep::Picked(picked, Place::Nowhere));
        }
        Some(value) => value,
    };
    let i = match which {
        Some(i @ 0..=2) => i,
        _ => return Ok(PathStep::Unhandled),
    };
    let v = value.as_integer().ok_or_else(|| error::invalid_arg(&rt.mold(value)))?;
    match i {
        0 => d.year = v as i32,
        1 if (1..=12).contains(&v) => d.month = v as u8,
        2 if (1..=31).contains(&v) => d.day = v as u8,
        _ => fail!(error::out_of_range(&v.to_string())),
    }
    let mut updated = current.clone();
    updated.payload = Payload::Date(d);
    Ok(PathStep::Immediate(updated))
}

fn time_hook(rt: &mut Runtime, current: &Cell, picker: &Cell, setval: Option<&Cell>) -> Result<PathStep, Error> {
    let nanos = match current.payload {
        Payload::Time(nanos) => nanos,
        _ => return Ok(PathStep::Unhandled),
    };
    if setval.is_some() {
        return Ok(PathStep::Unhandled);
    }
    let secs = nanos / 1_000_000_000;
    let picked = match rt.component_index(picker, &["hour", "minute", "second"]) {
        Some(0) => Cell::integer(secs / 3600),
        Some(1) => Cell::integer((secs / 60) % 60),
        Some(2) => Cell::integer(secs % 60),
        _ => return Ok(PathStep::Unhandled),
    };
    Ok(PathStep::Picked(picked, Place::Nowhere))
}

#[cfg(test)]
mod test_path {
    use super::{path_hook, PathStep};
    use crate::interpreter::core::*;

    fn eval(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_pick_by_index_and_select() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("b: [a 10 b 20 [x y]]").unwrap();
        assert_eq!(eval(&mut rt, "b/2"), "10");
        assert_eq!(eval(&mut rt, "b/b"), "20");
        assert_eq!(eval(&mut rt, "b/5/2"), "y");
        assert_eq!(eval(&mut rt, ":b/99"), "null");
        assert_eq!(eval(&mut rt, "b/99"), "error: no-value");
        assert_eq!(eval(&mut rt, ":b/99/1"), "error: no-value");
        assert_eq!(eval(&mut rt, "i: 4 b/(i)"), "20");
    }

    #[test]
    fn test_set_path_writes_in_place() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("b: [1 2 3] o: make object! [x: 1]").unwrap();
        assert_eq!(eval(&mut rt, "b/2: 20 b"), "[1 20 3]");
        assert_eq!(eval(&mut rt, "o/x: 5 o/x"), "5");
        assert_eq!(eval(&mut rt, "o/y: 5"), "error: bad-path-poke");
        assert_eq!(eval(&mut rt, "o/y"), "error: bad-path-pick");
    }

    #[test]
    fn test_immediates_write_back() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "p: 1x2 p/y: 10 p"), "1x10");
        assert_eq!(eval(&mut rt, "t: 1.2.3 t/2: 9 t"), "1.9.3");
        assert_eq!(eval(&mut rt, "t/3"), "3");
        assert_eq!(eval(&mut rt, "tm: 1:02:03 tm/minute"), "2");
    }

    #[test]
    fn test_inert_and_divide_paths() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "/foo"), "/foo");
        assert_eq!(eval(&mut rt, "10 / 4"), "2.5");
        assert_eq!(eval(&mut rt, "12 / 4"), "3");
    }

    #[test]
    fn test_get_path_specializes_refinements() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("f: func [a /twice] [either twice [a * 2] [a]]").unwrap();
        assert_eq!(eval(&mut rt, "g: :f/twice g 4"), "8");
        assert_eq!(eval(&mut rt, ":f/nope"), "error: bad-refine");
    }

    #[test]
    fn test_get_and_set_refuse_path_groups() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("b: [1 2 3]").unwrap();
        assert_eq!(eval(&mut rt, "set 'b/(1) 5"), "error: path-group");
        assert_eq!(eval(&mut rt, "get 'b/(1)"), "error: path-group");
        assert_eq!(eval(&mut rt, "b"), "[1 2 3]");
        assert_eq!(eval(&mut rt, "set 'b/1 9 get 'b/1"), "9");
        assert_eq!(eval(&mut rt, "b/(1)"), "9");
        assert_eq!(eval(&mut rt, "b/(2): 20 b"), "[9 20 3]");
    }

    #[test]
    fn test_numeric_set_path_and_url_from_source() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "b: [1 2 3] b/2: 20 b"), "[1 20 3]");
        assert_eq!(eval(&mut rt, "u: http://example.com u"), "http://example.com");
    }

    #[test]
    fn test_hooks_dispatch_by_kind() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert!(path_hook(&Cell::integer(5)).is_none());
        assert_eq!(eval(&mut rt, "n: 5 n/1"), "error: bad-path-pick");

        let pair = rt.run("1x2").unwrap();
        match rt.path_step(&pair, &Cell::integer(2), Some(&Cell::integer(7))).unwrap() {
            PathStep::Immediate(updated) => assert_eq!(rt.mold(&updated), "1x7"),
            _ => panic!("pair poke should hand back an updated copy"),
        }

        let block = rt.run("[1 2]").unwrap();
        assert!(matches!(rt.path_step(&block, &Cell::integer(1), Some(&Cell::integer(9))).unwrap(), PathStep::Poked));
        assert!(matches!(rt.path_step(&block, &Cell::blank(), None).unwrap(), PathStep::Unhandled));
        assert_eq!(rt.mold(&block), "[9 2]");
    }

    #[test]
    fn test_paths_look_through_quotes() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "q: first [''[a b c]] q/2"), "b");
    }
}
