use tracing::debug;

use crate::interpreter::core::action::{specializer_dispatcher, Bounce, ACTION_FLAG_INVISIBLE};
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::series::SeriesId;
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::Runtime;
use crate::interpreter::natives::Native;
use crate::{arg, fail, native};

pub const NATIVES: &[Native] = &[
    native!("func", "spec [block!] body [block!]", func),
    native!("function", "spec [block!] body [block!]", function),
    native!("does", "body [block!]", does),
    native!("enfix", "action [action!]", enfix),
    native!("specialize", "specializee [action!] def [block!]", specialize),
    native!("chain", "pipeline [block!]", chain),
    native!("apply", "applicand [action!] def [block!]", apply),
];

/// Runs a FUNC body. Its words are relative to the paramlist and resolve
/// through the frame's varlist.
pub fn func_dispatcher(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let phase = match rt.frames[f].phase {
        Some(p) => p,
        None => fail!(Internal, "no-phase", "function body run without a phase"),
    };
    let body = rt.details(phase)[0].clone();
    let varlist = rt.frame_varlist(f);
    let array = rt.array_of(&body);
    let mut result = Cell::null();
    if rt.eval_array_at_throws(&mut result, array, body.index(), Some(varlist), 0)? {
        return Ok(Bounce::Thrown);
    }
    if rt.action_has(phase, ACTION_FLAG_INVISIBLE) {
        return Ok(Bounce::Invisible);
    }
    rt.check_return_type(f, &result)?;
    rt.set_out(f, result);
    Ok(Bounce::Out)
}

/// Runs the first action of a CHAIN in this frame, leaving the rest of the
/// pipeline on the data stack to receive its output.
fn chainer_dispatcher(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let phase = match rt.frames[f].phase {
        Some(p) => p,
        None => fail!(Internal, "no-phase", "chain run without a phase"),
    };
    let pipeline = rt.details(phase).clone();
    let (first, rest) = match pipeline.split_first() {
        Some((first, rest)) => (first.clone(), rest.to_vec()),
        None => fail!(Internal, "bad-chain", "chain has an empty pipeline"),
    };
    if let Some(next) = rest.first() {
        rt.push_stack(next.clone())?;
    }
    rt.frames[f].phase = first.as_action();
    rt.frames[f].binding = first.binding;
    Ok(Bounce::Redo { checked: false })
}

impl Runtime {
    /// Typecheck a result against the `return:` types of the action running
    /// in frame `f`. Untyped returns accept anything.
    pub fn check_return_type(&self, f: FrameId, value: &Cell) -> Result<(), Error> {
        let original = match self.frames[f].original {
            Some(a) => a,
            None => return Ok(()),
        };
        let paramlist = self.underlying_paramlist(original);
        let ret = (1..self.heap.len(paramlist)).map(|i| self.param(paramlist, i)).find(|p| p.class == ParamClass::Return);
        if let Some(p) = ret {
            if p.bits != 0 && p.bits != TS_ANY_VALUE && !self.type_matches(&p, value) {
                let kind = if value.is_null() { "null" } else { value.type_kind().name() };
                fail!(Script, "bad-return-type", "return type {} is not allowed by {}", kind, self.frame_label(f))
            }
        }
        Ok(())
    }

    /// Set-words found anywhere in `body` that `spec` does not already name.
    fn gather_locals(&self, spec: &Cell, body: &Cell) -> Vec<SymId> {
        let mut known: Vec<SymId> = Vec::new();
        for item in self.heap.array(self.array_of(spec)).iter().skip(spec.index()) {
            if let Some(sym) = item.word_sym() {
                known.push(self.symbols.canon(sym));
            } else if self.is_refinement_path(item) {
                if let Some(sym) = self.heap.array(self.array_of(item))[1].word_sym() {
                    known.push(self.symbols.canon(sym));
                }
            }
        }
        let mut found = Vec::new();
        self.collect_set_words(self.array_of(body), body.index(), &mut known, &mut found);
        found
    }

    fn collect_set_words(&self, array: SeriesId, index: usize, known: &mut Vec<SymId>, found: &mut Vec<SymId>) {
        for cell in self.heap.array(array).iter().skip(index) {
            if cell.is(Kind::SetWord) {
                if let Some(sym) = cell.word_sym() {
                    let canon = self.symbols.canon(sym);
                    if !known.contains(&canon) {
                        known.push(canon);
                        found.push(sym);
                    }
                }
            } else if cell.quote == 0 && cell.kind.is_any_array() {
                if let Some(inner) = cell.series_id() {
                    self.collect_set_words(inner, 0, known, found);
                }
            }
        }
    }

    /// Fill an exemplar for `action` by running `def` bound into it. Returns
    /// false if `def` threw.
    fn run_exemplar_def_throws(&mut self, ex: SeriesId, action: Action, binding: Binding, def: &Cell) -> Result<bool, Error> {
        let mark = self.guards.len();
        self.guard(&Cell::frame(ex, action, binding));
        let array = self.array_of(def);
        let spec = self.derive_specifier(def, None);
        let copy = self.copy_array_deep(array, def.index(), spec);
        self.bind_deep(copy, ex, false);
        let body = Cell::series(Kind::Block, copy, 0);
        self.guard(&body);
        let mut discarded = Cell::null();
        let threw = self.do_block_throws(&mut discarded, &body);
        self.unguard_to(mark);
        threw
    }

    /// Mark the exemplar slots that `def` set as specialized, typechecking
    /// them. Setting an argument of a refinement puts the refinement in use.
    fn mark_specialized(&mut self, ex: SeriesId, action: Action) -> Result<(), Error> {
        let base = self.underlying_paramlist(action);
        let mut refinement: Option<usize> = None;
        for i in 1..self.heap.len(base) {
            let p = self.param(base, i);
            if matches!(p.class, ParamClass::Local | ParamClass::Return) {
                continue;
            }
            if p.class == ParamClass::Refinement {
                refinement = Some(i);
            }
            if self.is_specialized(ex, i) {
                continue;
            }
            let value = self.heap.array(ex)[i].clone();
            if value.is_null() {
                continue;
            }
            if !self.type_matches(&p, &value) {
                fail!(error::expect_arg("specialize", &self.param_name(&p), value.type_kind().name()))
            }
            let mut marked = if p.class == ParamClass::Refinement {
                if value.is_truthy() {
                    Cell::logic(true)
                } else {
                    Cell::blank()
                }
            } else {
                value.copied()
            };
            marked.set_flag(CELL_FLAG_ARG_MARKED_CHECKED);
            self.heap.array_mut(ex)[i] = marked;
            if let Some(r) = refinement.filter(|&r| r != i && !self.is_specialized(ex, r)) {
                let mut used = Cell::logic(true);
                used.set_flag(CELL_FLAG_ARG_MARKED_CHECKED);
                self.heap.array_mut(ex)[r] = used;
            }
        }
        Ok(())
    }
}

fn make_function(rt: &mut Runtime, f: FrameId, spec: &Cell, body: &Cell) -> Result<Bounce, Error> {
    let action = rt.make_func(spec, body, None, func_dispatcher)?;
    rt.set_out(f, Cell::action(action, Binding::Unbound));
    Ok(Bounce::Out)
}

fn func(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let spec = arg!(rt, f, 1);
    let body = arg!(rt, f, 2);
    make_function(rt, f, &spec, &body)
}

/// FUNC whose body set-words become locals automatically.
fn function(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let spec = arg!(rt, f, 1);
    let body = arg!(rt, f, 2);
    let locals = rt.gather_locals(&spec, &body);
    if locals.is_empty() {
        return make_function(rt, f, &spec, &body);
    }
    let mut items: Vec<Cell> = rt.heap.array(rt.array_of(&spec)).iter().skip(spec.index()).cloned().collect();
    items.push(rt.text_cell(Kind::Tag, "local"));
    for sym in locals {
        items.push(Cell::word(Kind::Word, sym));
    }
    let widened = rt.block_cell(Kind::Block, items);
    make_function(rt, f, &widened, &body)
}

fn does(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let body = arg!(rt, f, 1);
    let spec = rt.block_cell(Kind::Block, vec![]);
    make_function(rt, f, &spec, &body)
}

fn enfix(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let mut action = arg!(rt, f, 1);
    action.set_flag(CELL_FLAG_ENFIXED);
    rt.set_out(f, action);
    Ok(Bounce::Out)
}

fn specialize(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let specializee = arg!(rt, f, 1);
    let def = arg!(rt, f, 2);
    let action = match specializee.as_action() {
        Some(a) => a,
        None => return Err(rt.bad_arg(f, 1)),
    };
    let binding = specializee.binding;
    let ex = rt.make_exemplar(action, binding);
    if rt.run_exemplar_def_throws(ex, action, binding, &def)? {
        return Ok(Bounce::Thrown);
    }
    rt.mark_specialized(ex, action)?;
    let specialized = rt.make_specialization(action, binding, ex, specializer_dispatcher);
    debug!(label = %rt.frame_label(f), "specialized");
    rt.set_out(f, Cell::action(specialized, Binding::Unbound));
    Ok(Bounce::Out)
}

fn chain(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let pipeline = arg!(rt, f, 1);
    let array = rt.array_of(&pipeline);
    let spec = rt.derive_specifier(&pipeline, None);
    let mut reduced = Cell::null();
    if rt.reduce_throws(&mut reduced, array, pipeline.index(), spec)? {
        return Ok(Bounce::Thrown);
    }
    let actions: Vec<Cell> = rt.heap.array(rt.array_of(&reduced)).to_vec();
    for a in &actions {
        if a.as_action().is_none() {
            fail!(error::invalid_arg(&rt.mold(a)))
        }
    }
    // Build back to front: each link runs its action, then hands off to the
    // chain of everything after it.
    let mut tail = match actions.last() {
        Some(last) => last.clone(),
        None => fail!(error::invalid_arg("[]")),
    };
    for link in actions.iter().rev().skip(1) {
        let first = match link.as_action() {
            Some(a) => a,
            None => fail!(error::invalid_arg(&rt.mold(link))),
        };
        let facade = rt.make_facade(first, chainer_dispatcher, vec![link.clone(), tail]);
        tail = Cell::action(facade, Binding::Unbound);
    }
    tail.clear_flag(CELL_FLAG_ENFIXED);
    rt.set_out(f, tail);
    Ok(Bounce::Out)
}

/// Call an action with arguments assigned by name in `def`.
fn apply(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let applicand = arg!(rt, f, 1);
    let def = arg!(rt, f, 2);
    let action = match applicand.as_action() {
        Some(a) => a,
        None => return Err(rt.bad_arg(f, 1)),
    };
    let binding = applicand.binding;
    let ex = rt.make_exemplar(action, binding);
    if rt.run_exemplar_def_throws(ex, action, binding, &def)? {
        return Ok(Bounce::Thrown);
    }
    let base = rt.underlying_paramlist(action);
    let mut refinement = None;
    for i in 1..rt.heap.len(base) {
        let p = rt.param(base, i);
        match p.class {
            ParamClass::Refinement => refinement = Some(i),
            ParamClass::Local | ParamClass::Return => {}
            _ => {
                if let Some(r) = refinement {
                    if !rt.heap.array(ex)[i].is_null() && rt.heap.array(ex)[r].is_null() {
                        rt.heap.array_mut(ex)[r] = Cell::logic(true);
                    }
                }
            }
        }
    }
    let mut result = Cell::null();
    let frame = Cell::frame(ex, action, binding);
    let mark = rt.guards.len();
    rt.guard(&frame);
    let threw = rt.do_frame_throws(&mut result, &frame);
    rt.unguard_to(mark);
    if threw? {
        return Ok(Bounce::Thrown);
    }
    rt.set_out(f, result);
    Ok(Bounce::Out)
}

#[cfg(test)]
mod test_function {
    use crate::interpreter::core::*;

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_func_arguments_and_refinements() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("f: func [x /twice] [either twice [x * 4] [x * 2]]").unwrap();
        assert_eq!(run(&mut rt, "f 3"), "6");
        assert_eq!(run(&mut rt, "f/twice 3"), "12");
        assert_eq!(run(&mut rt, "g: :f/twice g 2"), "8");
        assert_eq!(run(&mut rt, "f"), "error: no-arg");
        rt.run("h: func [a /with b] [either with [a + b] [a]]").unwrap();
        assert_eq!(run(&mut rt, "h/with 1 2"), "3");
        assert_eq!(run(&mut rt, "h 1"), "1");
    }

    #[test]
    fn test_func_locals_do_not_leak() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("t: 1 f: func [x <local> t] [t: x * 10 t]").unwrap();
        assert_eq!(run(&mut rt, "f 5"), "50");
        assert_eq!(run(&mut rt, "t"), "1");
        rt.run("g: function [x] [u: x + 1 u]").unwrap();
        assert_eq!(run(&mut rt, "g 1"), "2");
        assert_eq!(run(&mut rt, "u"), "error: no-value");
    }

    #[test]
    fn test_recursion_keeps_frames_apart() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("fact: func [n] [either n <= 1 [1] [n * fact n - 1]]").unwrap();
        assert_eq!(run(&mut rt, "fact 10"), "3628800");
    }

    #[test]
    fn test_does_and_enfix() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("n: 0 bump: does [n: n + 1]").unwrap();
        assert_eq!(run(&mut rt, "bump bump n"), "2");
        rt.run("plus: enfix func [a b] [a + b]").unwrap();
        assert_eq!(run(&mut rt, "1 plus 2"), "3");
        rt.run("->: enfix func [:left [word!] right] [reduce [left right]]").unwrap();
        assert_eq!(run(&mut rt, "x: 5 x -> 1"), "[x 1]");
        assert_eq!(run(&mut rt, "x"), "5");
    }

    #[test]
    fn test_specialize() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("add10: specialize :add [value2: 10]").unwrap();
        assert_eq!(run(&mut rt, "add10 5"), "15");
        rt.run("f: func [x /scale k] [either scale [x * k] [x]]").unwrap();
        rt.run("triple: specialize :f [k: 3]").unwrap();
        assert_eq!(run(&mut rt, "triple 4"), "12");
        assert_eq!(run(&mut rt, "specialize :add [value2: \"x\"]"), "error: expect-arg");
    }

    #[test]
    fn test_chain_and_apply() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("inc: func [x] [x + 1] dbl: func [x] [x * 2]").unwrap();
        rt.run("inc-dbl: chain [:inc :dbl]").unwrap();
        assert_eq!(run(&mut rt, "inc-dbl 3"), "8");
        rt.run("three: chain [:inc :dbl :inc]").unwrap();
        assert_eq!(run(&mut rt, "three 1"), "5");
        assert_eq!(run(&mut rt, "apply :subtract [value1: 10 value2: 4]"), "6");
        rt.run("f: func [x /scale k] [either scale [x * k] [x]]").unwrap();
        assert_eq!(run(&mut rt, "apply :f [x: 2 k: 5]"), "10");
    }
}
