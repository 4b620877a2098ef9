use tracing::trace;

use crate::interpreter::core::action::{ACTION_FLAG_DEFERS_LOOKBACK, ACTION_FLAG_INVISIBLE, ACTION_FLAG_POSTPONES};
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::feed::{FEED_FLAG_BARRIER_HIT, FEED_FLAG_DEFERRING_ENFIX, FEED_FLAG_NO_LOOKAHEAD};
use crate::interpreter::core::frame::*;
use crate::interpreter::core::series::*;
use crate::interpreter::core::Runtime;
use crate::fail;

/// State of the refinement most recently passed while walking parameters.
#[derive(Clone, Copy, PartialEq, Debug)]
enum Refine {
    /// Before any refinement, or inside a used one.
    Ordinary,
    Unused,
    /// Used, but named later in the path; args come in the pickup pass.
    Pickup,
}

impl Runtime {
    /// Fill the varlist of the frame's running action. Returns true if an
    /// argument evaluation threw; the caller aborts the action.
    pub fn fulfill_throws(&mut self, f: FrameId) -> Result<bool, Error> {
        let phase = match self.frames[f].phase {
            Some(p) => p,
            None => panic!("fulfill without a running action"),
        };
        let paramlist = self.underlying_paramlist(phase);
        let varlist = self.frame_varlist(f);
        let n = self.heap.len(paramlist);
        let dsp_orig = self.frames[f].dsp_orig;
        let special = self.frames[f].special;
        let typecheck_only = self.frames[f].has_flag(EVAL_FLAG_TYPECHECK_ONLY);

        let mut refine = Refine::Ordinary;
        let mut pickups = false;
        // previous arg was an enfix left operand taken tightly
        let mut tight = false;
        let mut i = 1;
        loop {
            if i >= n {
                if self.stack.len() <= dsp_orig {
                    break;
                }
                let top = match self.stack.pop() {
                    Some(c) => c,
                    None => break,
                };
                let slot = top.word_index() as usize;
                if slot == 0 {
                    let name = top.word_sym().map(|s| self.symbols.spelling(s).to_string()).unwrap_or_default();
                    fail!(error::bad_refine(&name))
                }
                trace!(slot, "refinement pickup");
                pickups = true;
                refine = Refine::Ordinary;
                self.frames[f].flags |= EVAL_FLAG_DOING_PICKUPS;
                i = slot + 1;
                continue;
            }
            let param = self.param(paramlist, i);
            self.frames[f].param = i;
            let specialized = match special {
                Special::Exemplar(ex) if self.is_specialized(ex, i) => Some(self.heap.array(ex)[i].clone()),
                _ => None,
            };

            match param.class {
                ParamClass::Refinement => {
                    if pickups {
                        i = n;
                        continue;
                    }
                    let used = if typecheck_only {
                        self.heap.array(varlist)[i].is_truthy()
                    } else if let Some(ref v) = specialized {
                        v.is_truthy()
                    } else {
                        match self.take_pushed_refinement(dsp_orig, &param, i) {
                            Some(true) => {
                                refine = Refine::Ordinary;
                                self.set_arg_checked(varlist, i, Cell::logic(true));
                                i += 1;
                                continue;
                            }
                            Some(false) => {
                                refine = Refine::Pickup;
                                self.set_arg_checked(varlist, i, Cell::logic(true));
                                i += 1;
                                continue;
                            }
                            None => false,
                        }
                    };
                    refine = if used { Refine::Ordinary } else { Refine::Unused };
                    self.set_arg_checked(varlist, i, if used { Cell::logic(true) } else { Cell::blank() });
                    i += 1;
                    continue;
                }
                ParamClass::Local => {
                    self.set_arg_checked(varlist, i, Cell::null());
                    i += 1;
                    continue;
                }
                ParamClass::Return => {
                    self.ensure_managed(varlist);
                    let ret = Cell::action(self.specials().ret, Binding::Specific(varlist));
                    self.set_arg_checked(varlist, i, ret);
                    i += 1;
                    continue;
                }
                _ => {}
            }

            match refine {
                Refine::Unused => {
                    self.set_arg_checked(varlist, i, Cell::null());
                    i += 1;
                    continue;
                }
                Refine::Pickup => {
                    self.heap.array_mut(varlist)[i].set_null();
                    i += 1;
                    continue;
                }
                Refine::Ordinary => {}
            }

            if let Some(v) = specialized {
                self.set_arg_checked(varlist, i, v);
                i += 1;
                continue;
            }

            if typecheck_only {
                self.finalize_arg(f, varlist, i, &param)?;
                i += 1;
                continue;
            }

            if self.frames[f].has_flag(EVAL_FLAG_NEXT_ARG_FROM_OUT) {
                self.frames[f].flags &= !EVAL_FLAG_NEXT_ARG_FROM_OUT;
                if self.arg_from_out_throws(f, phase, varlist, i, &param, &mut tight)? {
                    return Ok(true);
                }
                i += 1;
                continue;
            }

            if param.has(PARAM_FLAG_VARIADIC) {
                let mut v = Cell::new(Kind::Varargs, Payload::Varargs(Varargs::Frame { varlist, param: i }));
                v.binding = Binding::Specific(varlist);
                self.ensure_managed(varlist);
                self.set_arg_checked(varlist, i, v);
                i += 1;
                continue;
            }

            let feed = self.frames[f].feed;
            if self.feeds[feed].has_flag(FEED_FLAG_DEFERRING_ENFIX) {
                fail!(error::ambiguous_infix())
            }
            self.frames[f].flags &= !EVAL_FLAG_NO_LOOKAHEAD;
            if tight {
                self.feeds[feed].flags |= FEED_FLAG_NO_LOOKAHEAD;
            } else {
                self.feeds[feed].flags &= !FEED_FLAG_NO_LOOKAHEAD;
            }
            tight = false;

            if self.feed_at_barrier(feed) {
                self.feeds[feed].flags &= !FEED_FLAG_NO_LOOKAHEAD;
                if param.has(PARAM_FLAG_ENDABLE) {
                    self.set_arg_checked(varlist, i, Cell::endish_null());
                    i += 1;
                    continue;
                }
                fail!(error::no_arg(&self.frame_label(f), &self.param_name(&param)))
            }

            match param.class {
                ParamClass::HardQuote => {
                    let specifier = self.feeds[feed].specifier;
                    let next = self.feeds[feed].value.clone();
                    let mut quoted = self.derelativize(&next, specifier);
                    if param.has(PARAM_FLAG_SKIPPABLE) && !self.type_matches(&param, &quoted) {
                        self.set_arg_checked(varlist, i, Cell::null());
                        i += 1;
                        continue;
                    }
                    quoted.set_flag(CELL_FLAG_UNEVALUATED);
                    self.fetch_next(feed);
                    self.heap.array_mut(varlist)[i].move_from(&quoted);
                }
                ParamClass::SoftQuote => {
                    let specifier = self.feeds[feed].specifier;
                    let next = self.fetch_next(feed);
                    if next.is_bar() {
                        self.feeds[feed].flags |= FEED_FLAG_BARRIER_HIT;
                        self.heap.array_mut(varlist)[i].set_end();
                    } else if is_soft_quotable(&next) {
                        let mut value = Cell::null();
                        if self.eval_soft_quoted_throws(&mut value, &next, specifier)? {
                            self.frames[f].out = value;
                            return Ok(true);
                        }
                        self.heap.array_mut(varlist)[i].move_from(&value);
                    } else {
                        let mut quoted = self.derelativize(&next, specifier);
                        quoted.set_flag(CELL_FLAG_UNEVALUATED);
                        self.heap.array_mut(varlist)[i].move_from(&quoted);
                    }
                }
                _ => {
                    let (threw, value) = self.eval_step_in_subframe_throws(f, EVAL_FLAG_FULFILLING_ARG)?;
                    self.feeds[feed].flags &= !FEED_FLAG_NO_LOOKAHEAD;
                    if threw {
                        return Ok(true);
                    }
                    self.heap.array_mut(varlist)[i].move_from(&value);
                }
            }
            self.finalize_arg(f, varlist, i, &param)?;
            i += 1;
        }
        self.frames[f].flags &= !(EVAL_FLAG_DOING_PICKUPS | EVAL_FLAG_TYPECHECK_ONLY);
        self.frames[f].special = Special::Arg;
        Ok(false)
    }

    /// Look for a path refinement matching `param` on the data stack. In
    /// order (on top) it is popped and gives `Some(true)`; out of order it is
    /// tagged with its slot for the pickup pass and gives `Some(false)`.
    fn take_pushed_refinement(&mut self, dsp_orig: usize, param: &Typeset, slot: usize) -> Option<bool> {
        let sym = param.sym?;
        let canon = self.symbols.canon(sym);
        let top = self.stack.len();
        if top <= dsp_orig {
            return None;
        }
        let pos = (dsp_orig..top).rev().find(|&p| {
            let c = &self.stack[p];
            c.word_index() == 0 && c.word_sym().map(|s| self.symbols.canon(s)) == Some(canon)
        })?;
        if pos == top - 1 {
            self.stack.pop();
            return Some(true);
        }
        if let Payload::Word { ref mut index, .. } = self.stack[pos].payload {
            *index = slot as u32;
        }
        Some(false)
    }

    fn set_arg_checked(&mut self, varlist: SeriesId, i: usize, value: Cell) {
        let slot = &mut self.heap.array_mut(varlist)[i];
        slot.move_from(&value);
        slot.flags |= value.flags & CELL_FLAG_ENDISH;
        slot.set_flag(CELL_FLAG_ARG_MARKED_CHECKED);
    }

    pub fn param_name(&self, param: &Typeset) -> String { param.sym.map(|s| self.symbols.spelling(s).to_string()).unwrap_or_default() }

    /// Take the enfix left operand (or chained input) from the frame output.
    fn arg_from_out_throws(
        &mut self,
        f: FrameId,
        phase: Action,
        varlist: SeriesId,
        i: usize,
        param: &Typeset,
        tight: &mut bool,
    ) -> Result<bool, Error> {
        let out = self.frames[f].out.clone();
        let invisible = self.action_has(phase, ACTION_FLAG_INVISIBLE);
        if !invisible {
            self.frames[f].out.set_end();
            self.frames[f].out.set_flag(CELL_FLAG_OUT_MARKED_STALE);
        }
        if out.is_end() || out.has_flag(CELL_FLAG_OUT_MARKED_STALE) {
            if param.has(PARAM_FLAG_VARIADIC) {
                let empty = self.alloc_array(vec![]);
                let holder = self.alloc_array(vec![Cell::series(Kind::Block, empty, 0)]);
                let v = Cell::new(Kind::Varargs, Payload::Varargs(Varargs::Array { holder, param: None, index: i }));
                self.set_arg_checked(varlist, i, v);
                return Ok(false);
            }
            if param.has(PARAM_FLAG_ENDABLE) {
                self.set_arg_checked(varlist, i, Cell::endish_null());
                return Ok(false);
            }
            fail!(error::no_arg(&self.frame_label(f), &self.param_name(param)))
        }
        if param.has(PARAM_FLAG_VARIADIC) {
            let inner = self.alloc_array(vec![out.copied()]);
            let holder = self.alloc_array(vec![Cell::series(Kind::Block, inner, 0)]);
            let v = Cell::new(Kind::Varargs, Payload::Varargs(Varargs::Array { holder, param: None, index: i }));
            self.set_arg_checked(varlist, i, v);
            return Ok(false);
        }
        match param.class {
            ParamClass::HardQuote => {
                if !out.has_flag(CELL_FLAG_UNEVALUATED) {
                    fail!(error::evaluative_quote(&self.frame_label(f)))
                }
                self.heap.array_mut(varlist)[i].move_from(&out);
            }
            ParamClass::SoftQuote if out.has_flag(CELL_FLAG_UNEVALUATED) && is_soft_quotable(&out) => {
                let mut value = Cell::null();
                if self.eval_soft_quoted_throws(&mut value, &out, None)? {
                    self.frames[f].out = value;
                    return Ok(true);
                }
                self.heap.array_mut(varlist)[i].move_from(&value);
            }
            _ => {
                self.heap.array_mut(varlist)[i].move_from(&out);
                let defers = self.action_has(phase, ACTION_FLAG_DEFERS_LOOKBACK | ACTION_FLAG_POSTPONES);
                if self.frames[f].has_flag(EVAL_FLAG_RUNNING_ENFIX) && !defers {
                    *tight = true;
                }
            }
        }
        self.finalize_arg(f, varlist, i, param)?;
        Ok(false)
    }

    /// Evaluate a soft-quoted group, get-word or get-path.
    fn eval_soft_quoted_throws(&mut self, out: &mut Cell, cell: &Cell, specifier: Option<SeriesId>) -> Result<bool, Error> {
        match cell.kind {
            Kind::Group => {
                let array = cell.series_id().unwrap_or_else(|| panic!("group without series"));
                let spec = self.derive_specifier(cell, specifier);
                *out = Cell::null();
                self.eval_array_at_throws(out, array, cell.index(), spec, 0)
            }
            Kind::GetWord => {
                *out = self.get_var(cell, specifier)?;
                Ok(false)
            }
            _ => {
                let mut path = cell.clone();
                path.kind = Kind::GetPath;
                self.get_path_throws(out, &path, specifier, 0)
            }
        }
    }

    /// Typecheck a gathered argument, applying END and quoting conventions.
    pub fn finalize_arg(&mut self, f: FrameId, varlist: SeriesId, i: usize, param: &Typeset) -> Result<(), Error> {
        let mut arg = self.heap.array(varlist)[i].clone();
        if arg.is_end() {
            if param.has(PARAM_FLAG_ENDABLE) {
                self.set_arg_checked(varlist, i, Cell::endish_null());
                return Ok(());
            }
            fail!(error::no_arg(&self.frame_label(f), &self.param_name(param)))
        }
        if param.has(PARAM_FLAG_VARIADIC) && arg.is(Kind::Varargs) {
            self.heap.array_mut(varlist)[i].set_flag(CELL_FLAG_ARG_MARKED_CHECKED);
            return Ok(());
        }
        if param.has(PARAM_FLAG_DEQUOTE_REQUOTE) && arg.is_quoted() {
            let depth = dequotify(&self.heap, &mut arg);
            self.frames[f].requotes += depth;
            self.heap.array_mut(varlist)[i].move_from(&arg);
        }
        if param.has(PARAM_FLAG_NOOP_IF_BLANK) && arg.is_blank() {
            self.frames[f].flags |= EVAL_FLAG_FULFILL_ONLY;
            self.heap.array_mut(varlist)[i].set_flag(CELL_FLAG_ARG_MARKED_CHECKED);
            return Ok(());
        }
        if !self.type_matches(param, &arg) {
            let kind = if arg.is_null() { "null" } else { arg.type_kind().name() };
            fail!(error::expect_arg(&self.frame_label(f), &self.param_name(param), kind))
        }
        self.heap.array_mut(varlist)[i].set_flag(CELL_FLAG_ARG_MARKED_CHECKED);
        Ok(())
    }
}

/// Cells a soft-quoted parameter evaluates instead of taking literally.
pub fn is_soft_quotable(cell: &Cell) -> bool { cell.quote == 0 && matches!(cell.kind, Kind::Group | Kind::GetWord | Kind::GetPath) }

#[cfg(test)]
mod test_fulfill {
    use crate::interpreter::core::*;

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_refinements_in_any_order() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("f: func [a /x xa /y ya] [reduce [a x :xa y :ya]]").unwrap();
        assert_eq!(run(&mut rt, "f/x/y 1 2 3"), "[1 #[true] 2 #[true] 3]");
        assert_eq!(run(&mut rt, "f/y/x 1 2 3"), "[1 #[true] 3 #[true] 2]");
        assert_eq!(run(&mut rt, "f 1"), "[1 _ _ _ _]");
        assert_eq!(run(&mut rt, "f/z 1"), "error: bad-refine");
    }

    #[test]
    fn test_endable_and_missing_args() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("e: func [x [<end> integer!]] [either null? :x [\"none\"] [x]]").unwrap();
        assert_eq!(run(&mut rt, "e"), "\"none\"");
        assert_eq!(run(&mut rt, "e 5"), "5");
        rt.run("g: func [x] [x]").unwrap();
        assert_eq!(run(&mut rt, "g"), "error: no-arg");
        assert_eq!(run(&mut rt, "g \"text\""), "\"text\"");
    }

    #[test]
    fn test_type_errors_name_the_argument() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("h: func [n [integer!]] [n]").unwrap();
        let err = rt.run("h \"no\"").unwrap_err();
        assert!(err.is("expect-arg"));
        assert!(err.message.contains("h does not allow text!"));
    }

    #[test]
    fn test_quoting_params() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("hq: func [:v] [v] sq: func ['v] [v]").unwrap();
        assert_eq!(run(&mut rt, "hq (1 + 2)"), "(1 + 2)");
        assert_eq!(run(&mut rt, "sq (1 + 2)"), "3");
        assert_eq!(run(&mut rt, "sq foo"), "foo");
    }

    #[test]
    fn test_skippable_hard_quote_declines() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("sk: func [:n [<skip> integer!] v] [reduce [:n v]]").unwrap();
        assert_eq!(run(&mut rt, "sk 10 20"), "[10 20]");
        assert_eq!(run(&mut rt, "sk \"x\""), "[_ \"x\"]");
    }

    #[test]
    fn test_noop_if_blank_skips_the_body() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("counter: 0 nb: func [x [<blank> integer!]] [counter: counter + 1 x]").unwrap();
        assert_eq!(run(&mut rt, "nb _"), "null");
        assert_eq!(run(&mut rt, "counter"), "0");
        assert_eq!(run(&mut rt, "nb 4"), "4");
    }
}
