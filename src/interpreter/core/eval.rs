use tracing::{debug, trace};

use crate::interpreter::core::action::*;
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::feed::{FeedId, FeedSource, FEED_FLAG_BARRIER_HIT, FEED_FLAG_DEFERRING_ENFIX, FEED_FLAG_NO_LOOKAHEAD};
use crate::interpreter::core::frame::*;
use crate::interpreter::core::path::PathResult;
use crate::interpreter::core::series::*;
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::{Runtime, Specifier};
use crate::fail;

/// Evaluator states. One expression runs Start through PostSwitch; a
/// frame evaluating to the end loops back to Start.
#[derive(Debug)]
pub enum Step {
    Start,
    /// Look ahead for a left-quoting enfix, then evaluate the feed's cell.
    Lookahead,
    Reevaluate { current: Cell, gotten: Option<Cell> },
    ProcessAction,
    Dispatch,
    PostSwitch,
    Finished,
    Thrown,
}

/// An enfix operator found after a completed expression.
struct Enfix {
    action: Action,
    binding: Binding,
    label: Option<SymId>,
}

impl Runtime {
    /// Run the frame until its expression (or its whole feed, with
    /// `EVAL_FLAG_TO_END`) is done. Returns true if a throw is in progress.
    pub fn eval_core(&mut self, f: FrameId) -> Result<bool, Error> { self.run_steps(f, Step::Start) }

    pub fn run_steps(&mut self, f: FrameId, first: Step) -> Result<bool, Error> {
        let mut step = first;
        loop {
            step = match step {
                Step::Start => {
                    self.start_new_expression(f)?;
                    Step::Lookahead
                }
                Step::Lookahead => self.lookahead(f)?,
                Step::Reevaluate { current, gotten } => self.evaluate_cell(f, current, gotten)?,
                Step::ProcessAction => self.process_action(f)?,
                Step::Dispatch => self.dispatch(f)?,
                Step::PostSwitch => self.post_switch(f)?,
                Step::Finished => break,
                Step::Thrown => return Ok(true),
            };
        }
        let frame = &mut self.frames[f];
        if !frame.has_flag(EVAL_FLAG_FULFILLING_ARG) {
            frame.out.clear_flag(CELL_FLAG_UNEVALUATED);
        }
        if !frame.has_flag(EVAL_FLAG_PRESERVE_STALE) {
            frame.out.clear_flag(CELL_FLAG_OUT_MARKED_STALE);
        }
        Ok(false)
    }

    fn start_new_expression(&mut self, f: FrameId) -> Result<(), Error> {
        self.eval_countdown -= 1;
        self.total_evals += 1;
        if self.eval_countdown <= 0 {
            self.do_signals()?;
        }
        let feed = self.frames[f].feed;
        let expr_index = self.feed_near(feed).map(|(_, i)| i);
        let tight = self.feeds[feed].has_flag(FEED_FLAG_NO_LOOKAHEAD);
        self.feeds[feed].flags &= !FEED_FLAG_NO_LOOKAHEAD;
        let frame = &mut self.frames[f];
        frame.expr_index = expr_index;
        frame.out.set_flag(CELL_FLAG_OUT_MARKED_STALE);
        if tight {
            frame.flags |= EVAL_FLAG_NO_LOOKAHEAD;
        } else {
            frame.flags &= !EVAL_FLAG_NO_LOOKAHEAD;
        }
        Ok(())
    }

    /// Fetch the current cell. If the cell after it is an enfix operator
    /// that quotes its left side, that operator takes the cell as-is.
    fn lookahead(&mut self, f: FrameId) -> Result<Step, Error> {
        let feed = self.frames[f].feed;
        if self.feeds[feed].is_end() {
            return Ok(Step::Finished);
        }
        let specifier = self.feeds[feed].specifier;
        let current = self.fetch_keep_lookback(feed);
        let mut gotten = None;
        if self.frames[f].has_flag(EVAL_FLAG_NO_LOOKAHEAD) || !self.feeds[feed].value.is(Kind::Word) {
            return Ok(Step::Reevaluate { current, gotten });
        }
        let next = self.feeds[feed].value.clone();
        let op = match self.try_get_var(&next, specifier) {
            Some(v) if v.has_flag(CELL_FLAG_ENFIXED) => v,
            _ => return Ok(Step::Reevaluate { current, gotten }),
        };
        let action = match op.as_action() {
            Some(a) if self.action_has(a, ACTION_FLAG_QUOTES_FIRST) => a,
            _ => return Ok(Step::Reevaluate { current, gotten }),
        };

        if current.is(Kind::Word) {
            gotten = self.try_get_var(&current, specifier);
        }
        let head = if current.is(Kind::Path) { self.path_head_action(&current, specifier) } else { None };
        let prefix = match gotten.as_ref().filter(|g| !g.has_flag(CELL_FLAG_ENFIXED)).and_then(|g| g.as_action()) {
            Some(a) => Some(a),
            None if current.is(Kind::Action) => current.as_action(),
            None => head,
        };
        if let Some(p) = prefix {
            if self.action_has(p, ACTION_FLAG_QUOTES_FIRST) {
                let declines = self.action_has(p, ACTION_FLAG_SKIPPABLE_FIRST)
                    && self.first_unspecialized_param(p).map(|param| !self.type_matches(&param, &next)).unwrap_or(false);
                if !declines {
                    return Ok(Step::Reevaluate { current, gotten });
                }
            }
        }
        if self.action_has(action, ACTION_FLAG_SKIPPABLE_FIRST) {
            let fits = self.first_unspecialized_param(action).map(|param| self.type_matches(&param, &current)).unwrap_or(false);
            if !fits {
                return Ok(Step::Reevaluate { current, gotten });
            }
        }
        if (current.is(Kind::Word) || current.is(Kind::Path)) && self.feed_peek(feed).is_end() {
            return Ok(Step::Reevaluate { current, gotten });
        }

        let mut left = self.derelativize(&current, specifier);
        left.set_flag(CELL_FLAG_UNEVALUATED);
        self.frames[f].out = left;
        self.fetch_next(feed);
        self.push_action(f, action, op.binding)?;
        self.begin_action(f, next.word_sym(), true);
        Ok(Step::ProcessAction)
    }

    /// The action a path's head word refers to, if any.
    fn path_head_action(&self, path: &Cell, specifier: Specifier) -> Option<Action> {
        let array = path.series_id()?;
        let head = self.heap.array(array).get(path.index())?;
        if !head.is(Kind::Word) {
            return None;
        }
        let spec = self.derive_specifier(path, specifier);
        self.try_get_var(head, spec).and_then(|v| v.as_action())
    }

    fn write_out(&mut self, f: FrameId, mut value: Cell) -> Step {
        value.clear_flag(CELL_FLAG_OUT_MARKED_STALE);
        self.frames[f].out = value;
        Step::PostSwitch
    }

    fn run_action(&mut self, f: FrameId, action: Action, binding: Binding, label: Option<SymId>, lookback: bool) -> Result<Step, Error> {
        self.push_action(f, action, binding)?;
        self.begin_action(f, label, lookback);
        Ok(Step::ProcessAction)
    }

    /// Evaluate a right-hand side in a subframe sharing this frame's feed.
    fn eval_rhs(&mut self, f: FrameId, target: &str) -> Result<Option<Cell>, Error> {
        let feed = self.frames[f].feed;
        if self.feeds[feed].is_end() {
            fail!(error::need_non_end(target))
        }
        let quoted = self.feeds[feed].value.is_quoted();
        let (threw, value) = self.eval_step_in_subframe_throws(f, 0)?;
        if threw {
            return Ok(None);
        }
        if value.is_end() {
            fail!(error::need_non_end(target))
        }
        if value.is_void() && !quoted {
            fail!(error::need_non_void(target))
        }
        Ok(Some(value))
    }

    fn evaluate_cell(&mut self, f: FrameId, current: Cell, gotten: Option<Cell>) -> Result<Step, Error> {
        let feed = self.frames[f].feed;
        let specifier = self.feeds[feed].specifier;

        if current.is_quoted() {
            let mut value = self.derelativize(&current, specifier);
            unquotify(&self.heap, &mut value, 1);
            value.set_flag(CELL_FLAG_UNEVALUATED);
            return Ok(self.write_out(f, value));
        }

        match current.kind {
            Kind::End => panic!("END cell reached the evaluator switch"),
            Kind::Null => fail!(error::evaluate_null()),
            Kind::Void => fail!(error::void_evaluation()),
            Kind::Bar => {
                if self.frames[f].has_flag(EVAL_FLAG_FULFILLING_ARG) {
                    self.feeds[feed].flags |= FEED_FLAG_BARRIER_HIT;
                    return Ok(Step::Finished);
                }
                if self.frames[f].has_flag(EVAL_FLAG_TO_END) && !self.feeds[feed].is_end() {
                    return Ok(Step::Start);
                }
                Ok(Step::Finished)
            }

            Kind::Word => {
                let value = match gotten {
                    Some(g) => g,
                    None => self.get_var(&current, specifier)?,
                };
                let name = self.word_spelling(&current);
                if let Some(action) = value.as_action() {
                    let enfixed = value.has_flag(CELL_FLAG_ENFIXED);
                    return self.run_action(f, action, value.binding, current.word_sym(), enfixed);
                }
                if value.is_null() {
                    fail!(error::no_value(&name))
                }
                if value.is_void() {
                    fail!(error::need_non_void(&name))
                }
                let mut out = value;
                out.clear_flag(CELL_FLAG_UNEVALUATED | CELL_FLAG_ENFIXED);
                Ok(self.write_out(f, out))
            }

            Kind::SetWord => {
                let name = self.word_spelling(&current);
                let value = match self.eval_rhs(f, &name)? {
                    Some(v) => v,
                    None => return Ok(Step::Thrown),
                };
                self.set_var(&current, specifier, &value)?;
                Ok(self.write_out(f, value))
            }

            Kind::GetWord => {
                let mut value = self.get_var(&current, specifier)?;
                value.clear_flag(CELL_FLAG_UNEVALUATED);
                Ok(self.write_out(f, value))
            }

            Kind::Group => {
                let array = self.array_of(&current);
                let spec = self.derive_specifier(&current, specifier);
                let mut out = self.frames[f].out.clone();
                let threw = self.eval_array_at_throws(&mut out, array, current.index(), spec, EVAL_FLAG_PRESERVE_STALE)?;
                if threw {
                    return Ok(Step::Thrown);
                }
                if out.has_flag(CELL_FLAG_OUT_MARKED_STALE) {
                    self.frames[f].out = out;
                    if self.frames[f].has_flag(EVAL_FLAG_FULFILLING_ARG) {
                        self.feeds[feed].flags |= FEED_FLAG_BARRIER_HIT;
                        return Ok(Step::Finished);
                    }
                    return Ok(self.after_invisible(f));
                }
                out.clear_flag(CELL_FLAG_UNEVALUATED);
                Ok(self.write_out(f, out))
            }

            Kind::GetGroup => {
                let array = self.array_of(&current);
                let spec = self.derive_specifier(&current, specifier);
                let mut spare = Cell::null();
                if self.eval_array_at_throws(&mut spare, array, current.index(), spec, 0)? {
                    return Ok(Step::Thrown);
                }
                self.frames[f].spare = spare.clone();
                if spare.quote == 0 && (spare.kind.is_any_word() || spare.kind.is_any_path() || spare.kind.is_any_block()) {
                    let mut get = spare;
                    get.kind = get.kind.with_sigil(Sigil::Get);
                    return Ok(Step::Reevaluate { current: get, gotten: None });
                }
                if let Some(action) = spare.as_action() {
                    if self.first_unspecialized_param(action).is_none() {
                        return self.run_action(f, action, spare.binding, None, false);
                    }
                }
                fail!(error::invalid_type(spare.type_kind().name()))
            }

            Kind::SetGroup => {
                let value = match self.eval_rhs(f, "set-group!")? {
                    Some(v) => v,
                    None => return Ok(Step::Thrown),
                };
                self.frames[f].out = value.clone();
                let array = self.array_of(&current);
                let spec = self.derive_specifier(&current, specifier);
                let mut spare = Cell::null();
                if self.eval_array_at_throws(&mut spare, array, current.index(), spec, 0)? {
                    return Ok(Step::Thrown);
                }
                self.frames[f].spare = spare.clone();
                if let Some(action) = spare.as_action() {
                    return self.run_action(f, action, spare.binding, None, true);
                }
                match spare.kind {
                    _ if spare.quote > 0 => fail!(error::invalid_type(spare.type_kind().name())),
                    k if k.is_any_word() => self.set_var(&spare, None, &value)?,
                    k if k.is_any_path() => {
                        if self.set_path_throws(&spare, None, &value, 0)? {
                            return Ok(Step::Thrown);
                        }
                    }
                    k if k.is_any_block() => self.set_block(&spare, None, &value)?,
                    _ => fail!(error::invalid_type(spare.type_kind().name())),
                }
                Ok(self.write_out(f, value))
            }

            Kind::Path => {
                if self.is_divide_path(&current) {
                    let path_0 = self.specials().path_0;
                    let label = self.symbols.intern("/");
                    return self.run_action(f, path_0, Binding::Unbound, Some(label), false);
                }
                if self.is_inert_path(&current) {
                    let mut value = self.derelativize(&current, specifier);
                    value.set_flag(CELL_FLAG_UNEVALUATED);
                    return Ok(self.write_out(f, value));
                }
                match self.eval_path_throws(&current, specifier, true, 0)? {
                    PathResult::Thrown => Ok(Step::Thrown),
                    PathResult::Action { action, binding, label } => self.run_action(f, action, binding, label, false),
                    PathResult::Value(value) => {
                        if value.is_null() {
                            fail!(error::no_value(&self.mold(&current)))
                        }
                        if value.is_void() {
                            fail!(error::need_non_void(&self.mold(&current)))
                        }
                        Ok(self.write_out(f, value))
                    }
                }
            }

            Kind::SetPath => {
                let name = self.mold(&current);
                let value = match self.eval_rhs(f, &name)? {
                    Some(v) => v,
                    None => return Ok(Step::Thrown),
                };
                self.frames[f].out = value.clone();
                if self.set_path_throws(&current, specifier, &value, 0)? {
                    return Ok(Step::Thrown);
                }
                Ok(self.write_out(f, value))
            }

            Kind::GetPath => {
                let mut out = Cell::null();
                if self.get_path_throws(&mut out, &current, specifier, 0)? {
                    return Ok(Step::Thrown);
                }
                Ok(self.write_out(f, out))
            }

            Kind::GetBlock => {
                let array = self.array_of(&current);
                let spec = self.derive_specifier(&current, specifier);
                let mut out = Cell::null();
                if self.reduce_throws(&mut out, array, current.index(), spec)? {
                    return Ok(Step::Thrown);
                }
                Ok(self.write_out(f, out))
            }

            Kind::SetBlock => {
                let value = match self.eval_rhs(f, "set-block!")? {
                    Some(v) => v,
                    None => return Ok(Step::Thrown),
                };
                self.frames[f].out = value.clone();
                let target = self.derelativize(&current, specifier);
                self.set_block(&target, specifier, &value)?;
                Ok(self.write_out(f, value))
            }

            Kind::Action => {
                let action = match current.as_action() {
                    Some(a) => a,
                    None => panic!("action cell without action payload"),
                };
                self.run_action(f, action, current.binding, None, false)
            }

            kind if kind.is_inert() => {
                let mut value = self.derelativize(&current, specifier);
                value.set_flag(CELL_FLAG_UNEVALUATED);
                Ok(self.write_out(f, value))
            }

            kind => fail!(error::invalid_type(kind.name())),
        }
    }

    fn process_action(&mut self, f: FrameId) -> Result<Step, Error> {
        if self.fulfill_throws(f)? {
            self.abort_action(f);
            return Ok(Step::Thrown);
        }
        if self.frames[f].has_flag(EVAL_FLAG_FULFILL_ONLY) {
            self.frames[f].out = Cell::null();
            self.drop_action(f);
            return Ok(Step::PostSwitch);
        }
        Ok(Step::Dispatch)
    }

    fn dispatch(&mut self, f: FrameId) -> Result<Step, Error> {
        let phase = match self.frames[f].phase {
            Some(p) => p,
            None => panic!("dispatch without a phase"),
        };
        let invisible = self.action_has(phase, ACTION_FLAG_INVISIBLE);
        if !invisible {
            let out = &mut self.frames[f].out;
            out.set_end();
            out.set_flag(CELL_FLAG_OUT_MARKED_STALE);
        }
        let dispatcher = self.dispatcher(phase);
        let bounce = dispatcher(self, f)?;
        match bounce {
            Bounce::Out => {
                let out = &mut self.frames[f].out;
                if out.is_end() {
                    out.set_null();
                }
                out.clear_flag(CELL_FLAG_UNEVALUATED | CELL_FLAG_OUT_MARKED_STALE);
            }
            Bounce::Null => self.frames[f].out = Cell::null(),
            Bounce::Api(handle) => {
                let mut value = self.take_api(handle);
                value.clear_flag(CELL_FLAG_UNEVALUATED);
                self.frames[f].out = value;
            }
            Bounce::Thrown => return self.dispatch_thrown(f),
            Bounce::Redo { checked: false } => return Ok(Step::Dispatch),
            Bounce::Redo { checked: true } => {
                let frame = &mut self.frames[f];
                frame.flags |= EVAL_FLAG_TYPECHECK_ONLY;
                frame.special = Special::Arg;
                return Ok(Step::ProcessAction);
            }
            Bounce::Invisible => {
                let stale = self.frames[f].out.has_flag(CELL_FLAG_OUT_MARKED_STALE);
                self.drop_action(f);
                if !stale {
                    return Ok(Step::PostSwitch);
                }
                return Ok(self.after_invisible(f));
            }
        }
        self.finish_action(f)
    }

    /// An invisible left the output as it was before the expression began.
    /// A prior value stays available to an enfix operator that follows, so
    /// `1 + 2 comment "hi" * 3` multiplies 3; otherwise the next cell is
    /// evaluated as part of this same step.
    fn after_invisible(&mut self, f: FrameId) -> Step {
        let feed = self.frames[f].feed;
        if self.feeds[feed].is_end() {
            return Step::Finished;
        }
        let prior = !self.frames[f].out.is_end();
        if prior && self.enfix_at(feed).is_some() {
            self.frames[f].out.clear_flag(CELL_FLAG_OUT_MARKED_STALE);
            return Step::PostSwitch;
        }
        Step::Lookahead
    }

    /// Apply requoting and run any chained actions pushed by the dispatcher.
    fn finish_action(&mut self, f: FrameId) -> Result<Step, Error> {
        if let Some(original) = self.frames[f].original {
            let requotes = self.frames[f].requotes;
            if requotes > 0 && self.action_has(original, ACTION_FLAG_RETURN_REQUOTES) && !self.frames[f].out.is_null() {
                let mut out = self.frames[f].out.clone();
                quotify(&mut self.heap, &mut out, requotes);
                self.frames[f].out = out;
            }
        }
        while self.stack.len() > self.frames[f].dsp_orig {
            let next = match self.stack.pop() {
                Some(c) => c,
                None => break,
            };
            if let Some(depth) = next.as_integer() {
                let mut out = self.frames[f].out.clone();
                quotify(&mut self.heap, &mut out, depth as u32);
                self.frames[f].out = out;
                continue;
            }
            if let Some(action) = next.as_action() {
                let label = self.frames[f].label;
                self.drop_action(f);
                return self.run_action(f, action, next.binding, label, true);
            }
        }
        self.drop_action(f);
        Ok(Step::PostSwitch)
    }

    /// A dispatcher threw. UNWIND and REDO aimed at this frame are handled
    /// here; anything else keeps propagating.
    fn dispatch_thrown(&mut self, f: FrameId) -> Result<Step, Error> {
        let varlist = self.frame_varlist(f);
        let specials = self.specials();
        let (target, binding) = match self.thrown_label() {
            Some(label) => (label.as_action(), label.binding),
            None => (None, Binding::Unbound),
        };
        if binding == Binding::Specific(varlist) {
            if target == Some(specials.unwind) {
                let thrown = self.take_thrown();
                self.stack.truncate(self.frames[f].dsp_orig);
                debug!(label = %self.frame_label(f), "unwind caught");
                let mut value = thrown.value;
                value.clear_flag(CELL_FLAG_UNEVALUATED);
                self.frames[f].out = value;
                return self.finish_action(f);
            }
            if target == Some(specials.redo) {
                let thrown = self.take_thrown();
                let phase = thrown.value.as_action().or(self.frames[f].original);
                debug!(label = %self.frame_label(f), "redo caught");
                self.stack.truncate(self.frames[f].dsp_orig);
                let frame = &mut self.frames[f];
                frame.phase = phase;
                frame.flags |= EVAL_FLAG_TYPECHECK_ONLY;
                frame.special = Special::Arg;
                if let Some(ex) = phase.and_then(|p| self.exemplar(p)) {
                    self.frames[f].special = Special::Exemplar(ex);
                }
                return Ok(Step::ProcessAction);
            }
        }
        self.abort_action(f);
        Ok(Step::Thrown)
    }

    /// An enfix action named by the feed's current cell.
    fn enfix_at(&mut self, feed: FeedId) -> Option<Enfix> {
        let next = self.feeds[feed].value.clone();
        if self.is_divide_path(&next) {
            let label = self.symbols.intern("/");
            return Some(Enfix { action: self.specials().path_0, binding: Binding::Unbound, label: Some(label) });
        }
        if !next.is(Kind::Word) {
            return None;
        }
        let value = self.try_get_var(&next, self.feeds[feed].specifier)?;
        if !value.has_flag(CELL_FLAG_ENFIXED) {
            return None;
        }
        let action = value.as_action()?;
        Some(Enfix { action, binding: value.binding, label: next.word_sym() })
    }

    fn post_switch(&mut self, f: FrameId) -> Result<Step, Error> {
        let feed = self.frames[f].feed;
        let to_end = self.frames[f].has_flag(EVAL_FLAG_TO_END);
        if self.feeds[feed].is_end() {
            return Ok(Step::Finished);
        }
        let enfix = match self.enfix_at(feed) {
            Some(e) => e,
            None => return Ok(if to_end { Step::Start } else { Step::Finished }),
        };
        let flags = self.action_flags(enfix.action);
        let invisible = flags & ACTION_FLAG_INVISIBLE != 0;
        if self.frames[f].has_flag(EVAL_FLAG_NO_LOOKAHEAD) && !invisible {
            return Ok(Step::Finished);
        }
        if flags & ACTION_FLAG_QUOTES_FIRST != 0 {
            if flags & ACTION_FLAG_ENDABLE_FIRST == 0 {
                let name = enfix.label.map(|s| self.symbols.spelling(s).to_string()).unwrap_or_default();
                fail!(error::literal_left(&name))
            }
            return Ok(if to_end { Step::Start } else { Step::Finished });
        }
        let fulfilling = self.frames[f].has_flag(EVAL_FLAG_FULFILLING_ARG);
        if fulfilling && flags & ACTION_FLAG_POSTPONES != 0 {
            self.feeds[feed].flags |= FEED_FLAG_DEFERRING_ENFIX;
            return Ok(Step::Finished);
        }
        if self.feeds[feed].has_flag(FEED_FLAG_DEFERRING_ENFIX) {
            self.feeds[feed].flags &= !FEED_FLAG_DEFERRING_ENFIX;
        } else if fulfilling && flags & ACTION_FLAG_DEFERS_LOOKBACK != 0 {
            self.feeds[feed].flags |= FEED_FLAG_DEFERRING_ENFIX;
            trace!("deferring enfix to the enclosing level");
            return Ok(Step::Finished);
        }
        self.fetch_next(feed);
        self.run_action(f, enfix.action, enfix.binding, enfix.label, true)
    }

    /// Evaluate `array` from `index` to its end into `out`. When nothing
    /// produces a value, `out` is left as it was but marked stale if the
    /// caller passes `EVAL_FLAG_PRESERVE_STALE`; otherwise it becomes null.
    pub fn eval_array_at_throws(&mut self, out: &mut Cell, array: SeriesId, index: usize, specifier: Specifier, flags: u32) -> Result<bool, Error> {
        let feed = self.push_array_feed(array, index, specifier);
        let f = self.push_frame(feed, flags | EVAL_FLAG_TO_END)?;
        let threw = self.eval_core(f)?;
        let frame = self.drop_frame(f);
        self.drop_feed(feed);
        if threw {
            *out = frame.out;
            return Ok(true);
        }
        if !frame.out.is_end() {
            *out = frame.out;
            out.clear_flag(CELL_FLAG_OUT_MARKED_STALE);
        } else if flags & EVAL_FLAG_PRESERVE_STALE != 0 {
            out.set_flag(CELL_FLAG_OUT_MARKED_STALE);
        } else {
            *out = Cell::null();
        }
        Ok(false)
    }

    /// Evaluate one expression of a fully specified block value.
    pub fn do_block_throws(&mut self, out: &mut Cell, block: &Cell) -> Result<bool, Error> {
        let array = self.array_of(block);
        let spec = self.derive_specifier(block, None);
        *out = Cell::null();
        self.eval_array_at_throws(out, array, block.index(), spec, 0)
    }

    /// One step on the parent's feed in a fresh frame. The result is END
    /// if the step produced nothing.
    pub fn eval_step_in_subframe_throws(&mut self, parent: FrameId, flags: u32) -> Result<(bool, Cell), Error> {
        let feed = self.frames[parent].feed;
        let f = self.push_frame(feed, flags)?;
        let threw = self.eval_core(f)?;
        let frame = self.drop_frame(f);
        Ok((threw, frame.out))
    }

    /// Evaluate one expression of `array` at `index`, returning the index
    /// after it. Used by EVALUATE and by PARSE's DO.
    pub fn eval_step_at_throws(&mut self, out: &mut Cell, array: SeriesId, index: usize, specifier: Specifier) -> Result<(bool, usize), Error> {
        let feed = self.push_array_feed(array, index, specifier);
        let f = match self.push_frame(feed, 0) {
            Ok(f) => f,
            Err(e) => {
                self.drop_feed(feed);
                return Err(e);
            }
        };
        let threw = self.eval_core(f)?;
        let frame = self.drop_frame(f);
        let next = match self.feeds[feed].source {
            FeedSource::Array { index, .. } => index - 1,
            _ => index,
        };
        self.drop_feed(feed);
        *out = frame.out;
        Ok((threw, next))
    }

    /// Evaluate each expression of an array, collecting results into a new
    /// block. Nulls are kept as blanks; invisible expressions vanish.
    pub fn reduce_throws(&mut self, out: &mut Cell, array: SeriesId, index: usize, specifier: Specifier) -> Result<bool, Error> {
        let mark = self.guards.len();
        let feed = self.push_array_feed(array, index, specifier);
        let f = match self.push_frame(feed, 0) {
            Ok(f) => f,
            Err(e) => {
                self.drop_feed(feed);
                return Err(e);
            }
        };
        let mut items: Vec<Cell> = Vec::new();
        while !self.feeds[feed].is_end() {
            let newline = self.feeds[feed].value.has_flag(CELL_FLAG_NEWLINE_BEFORE);
            self.frames[f].out.set_end();
            self.frames[f].out.set_flag(CELL_FLAG_OUT_MARKED_STALE);
            if self.eval_core(f)? {
                self.drop_frame(f);
                self.drop_feed(feed);
                self.unguard_to(mark);
                return Ok(true);
            }
            let value = self.frames[f].out.clone();
            if value.is_end() || value.has_flag(CELL_FLAG_OUT_MARKED_STALE) {
                continue;
            }
            let mut item = if value.is_null() { Cell::blank() } else { value.copied() };
            item.clear_flag(CELL_FLAG_UNEVALUATED | CELL_FLAG_NEWLINE_BEFORE);
            if newline {
                item.set_flag(CELL_FLAG_NEWLINE_BEFORE);
            }
            // Items ride the guard list so a recycle mid-reduce keeps them.
            self.guard(&item);
            items.push(item);
        }
        self.drop_frame(f);
        self.drop_feed(feed);
        self.unguard_to(mark);
        *out = self.block_cell(Kind::Block, items);
        Ok(false)
    }

    /// Multi-assign words of `target` from `value`: a block value assigns
    /// element by element (padding with blanks), anything else is broadcast.
    pub fn set_block(&mut self, target: &Cell, specifier: Specifier, value: &Cell) -> Result<(), Error> {
        if value.is_null() {
            fail!(error::need_non_null("set-block!"))
        }
        let array = self.array_of(target);
        let spec = self.derive_specifier(target, specifier);
        let words: Vec<Cell> = self.heap.array(array).iter().skip(target.index()).cloned().collect();
        let source: Option<Vec<Cell>> = if value.is(Kind::Block) {
            let id = self.array_of(value);
            let vspec = self.derive_specifier(value, None);
            let cells: Vec<Cell> = self.heap.array(id).iter().skip(value.index()).cloned().collect();
            Some(cells.iter().map(|c| self.derelativize(c, vspec)).collect())
        } else {
            None
        };
        for (i, word) in words.iter().enumerate() {
            if !word.kind.is_any_word() || word.quote != 0 {
                fail!(error::invalid_arg(&self.mold(word)))
            }
            let item = match source {
                Some(ref cells) => cells.get(i).cloned().unwrap_or_else(Cell::blank),
                None => value.clone(),
            };
            self.set_var(word, spec, &item)?;
        }
        Ok(())
    }

    /// Call `action` with `args` already evaluated, in parameter order.
    /// Refinements stay unused unless the action is specialized.
    pub fn apply_throws(&mut self, out: &mut Cell, action: Action, binding: Binding, label: Option<SymId>, args: Vec<Cell>) -> Result<bool, Error> {
        let feed = self.push_variadic_feed(vec![], None);
        let f = match self.push_frame(feed, 0) {
            Ok(f) => f,
            Err(e) => {
                self.drop_feed(feed);
                return Err(e);
            }
        };
        self.push_action(f, action, binding)?;
        self.begin_action(f, label, false);
        let paramlist = self.underlying_paramlist(action);
        let varlist = self.frame_varlist(f);
        let exemplar = self.exemplar(action);
        let mut given = args.into_iter();
        let mut refined = false;
        for i in 1..self.heap.len(paramlist) {
            if let Some(ex) = exemplar {
                if self.is_specialized(ex, i) {
                    let v = self.heap.array(ex)[i].clone();
                    self.heap.array_mut(varlist)[i].move_from(&v);
                    continue;
                }
            }
            let param = self.param(paramlist, i);
            match param.class {
                ParamClass::Refinement => {
                    refined = true;
                    self.heap.array_mut(varlist)[i].move_from(&Cell::blank());
                }
                ParamClass::Local | ParamClass::Return => {}
                _ if refined => {}
                _ => {
                    let v = match given.next() {
                        Some(v) => v,
                        None if param.has(PARAM_FLAG_ENDABLE) => Cell::endish_null(),
                        None => fail!(error::no_arg(&self.frame_label(f), &self.param_name(&param))),
                    };
                    self.heap.array_mut(varlist)[i].move_from(&v);
                }
            }
        }
        self.frames[f].flags |= EVAL_FLAG_TYPECHECK_ONLY;
        self.frames[f].special = Special::Arg;
        let threw = self.run_steps(f, Step::ProcessAction)?;
        let frame = self.drop_frame(f);
        self.drop_feed(feed);
        *out = frame.out;
        if !threw && out.is_end() {
            out.set_null();
        }
        Ok(threw)
    }

    /// Run a FRAME! value: its fields are the arguments.
    pub fn do_frame_throws(&mut self, out: &mut Cell, frame_value: &Cell) -> Result<bool, Error> {
        let (source, phase) = match frame_value.payload {
            Payload::Context { varlist, phase: Some(phase) } => (varlist, phase),
            _ => fail!(error::invalid_arg(&self.mold(frame_value))),
        };
        self.check_accessible(source)?;
        let feed = self.push_variadic_feed(vec![], None);
        let f = match self.push_frame(feed, 0) {
            Ok(f) => f,
            Err(e) => {
                self.drop_feed(feed);
                return Err(e);
            }
        };
        self.push_action(f, phase, frame_value.binding)?;
        self.begin_action(f, None, false);
        let varlist = self.frame_varlist(f);
        let n = self.heap.len(varlist).min(self.heap.len(source));
        for i in 1..n {
            let v = self.heap.array(source)[i].clone();
            self.heap.array_mut(varlist)[i].move_from(&v);
        }
        self.frames[f].flags |= EVAL_FLAG_TYPECHECK_ONLY;
        self.frames[f].special = Special::Arg;
        let threw = self.run_steps(f, Step::ProcessAction)?;
        let frame = self.drop_frame(f);
        self.drop_feed(feed);
        *out = frame.out;
        if !threw && out.is_end() {
            out.set_null();
        }
        Ok(threw)
    }

    pub fn array_of(&self, cell: &Cell) -> SeriesId {
        match cell.series_id() {
            Some(id) => id,
            None => panic!("{} cell has no series", cell.kind.name()),
        }
    }

    pub fn word_spelling(&self, word: &Cell) -> String { word.word_sym().map(|s| self.symbols.spelling(s).to_string()).unwrap_or_default() }
}

#[cfg(test)]
mod test_eval {
    use crate::interpreter::core::*;

    fn eval(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_enfix_is_left_to_right() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "1 + 2 * 3"), "9");
        assert_eq!(eval(&mut rt, "add 1 2 * 3"), "7");
        assert_eq!(eval(&mut rt, "x: 1 if x = 1 [\"one\"]"), "\"one\"");
    }

    #[test]
    fn test_deferred_else_waits_for_the_enclosing_call() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("g: func [v [<opt> any-value!]] [either null? :v [\"none\"] [v]]").unwrap();
        assert_eq!(eval(&mut rt, "g if false [2] else [3]"), "\"none\"");
        assert_eq!(eval(&mut rt, "1 + if false [2] else [3]"), "error: expect-arg");
        assert_eq!(eval(&mut rt, "x: if true [10] else [20] x"), "10");
        assert_eq!(eval(&mut rt, "if false [1] else [2] then [3]"), "3");
    }

    #[test]
    fn test_stale_output_survives_invisibles() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "1 comment \"x\""), "1");
        assert_eq!(eval(&mut rt, "(2 comment \"y\")"), "2");
        assert_eq!(eval(&mut rt, "1 + 2 comment \"hi\" * 3"), "9");
        assert_eq!(eval(&mut rt, "1 + 2 (comment \"hi\") * 3"), "9");
        rt.run("ap: enfix func [a b] [a + b]").unwrap();
        assert_eq!(eval(&mut rt, "1 ap 2 comment \"c\" ap 3"), "6");
        assert_eq!(eval(&mut rt, "10 elide 20 - 5"), "10");
        assert_eq!(eval(&mut rt, "add 1 comment \"z\" 2"), "3");
        assert_eq!(eval(&mut rt, "do []"), "null");
    }

    #[test]
    fn test_void_and_null_guards() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "x: #[void]"), "error: void-evaluation");
        assert_eq!(eval(&mut rt, "v: '#[void] x: :v"), "error: need-non-void");
        assert_eq!(eval(&mut rt, "x: '#[void] void? :x"), "#[true]");
        assert_eq!(eval(&mut rt, "undefined-thing"), "error: no-value");
        assert_eq!(eval(&mut rt, "y:"), "error: need-non-end");
    }

    #[test]
    fn test_bar_is_an_expression_barrier() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "1 + 2 | 3 + 4"), "7");
        assert_eq!(eval(&mut rt, "add 1 | 2"), "error: no-arg");
    }

    #[test]
    fn test_set_block_pads_and_broadcasts() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "[a b c]: [1 2] reduce [a b c]"), "[1 2 _]");
        assert_eq!(eval(&mut rt, "[a b]: 5 reduce [a b]"), "[5 5]");
        assert_eq!(eval(&mut rt, "[a b]: null"), "error: need-non-null");
    }

    #[test]
    fn test_get_and_set_groups() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "w: 'target (w): 10 target"), "10");
        assert_eq!(eval(&mut rt, "v: 20 :('v)"), "20");
        assert_eq!(eval(&mut rt, ":([1 + 1 2 + 2])"), "[2 4]");
    }

    #[test]
    fn test_quoted_values_lose_one_level() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "'foo"), "foo");
        assert_eq!(eval(&mut rt, "''foo"), "'foo");
        assert_eq!(eval(&mut rt, "''''''x"), "'''''x");
    }

    #[test]
    fn test_left_quoting_enfix_takes_word() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(eval(&mut rt, "s: [a b c] length of s"), "3");
        assert_eq!(eval(&mut rt, "type of 10"), "integer!");
    }

    #[test]
    fn test_signal_countdown_counts_expressions() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let before = rt.total_evals;
        rt.run("1 2 3").unwrap();
        assert!(rt.total_evals >= before + 3);
    }

    #[test]
    fn test_reduce_collects_across_recycles() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let guarded = rt.guards.len();
        assert_eq!(eval(&mut rt, "reduce [1 + 2 3 * 4]"), "[3 12]");
        assert_eq!(eval(&mut rt, "reduce [copy \"x\" reduce [4 5] (recycle 10)]"), "[\"x\" [4 5] 10]");
        assert_eq!(eval(&mut rt, "reduce []"), "[]");
        assert_eq!(eval(&mut rt, "catch [reduce [1 throw 2 3]]"), "2");
        assert_eq!(rt.guards.len(), guarded);
    }
}
