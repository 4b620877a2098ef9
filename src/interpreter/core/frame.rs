use tracing::trace;

use crate::interpreter::core::cell::{Binding, Cell, Kind, CELL_FLAG_OUT_MARKED_STALE, CELL_FLAG_STACK_LIFETIME};
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::feed::{FeedId, FEED_FLAG_BARRIER_HIT};
use crate::interpreter::core::series::{Link, Misc, Series, SeriesId, SERIES_FLAG_INACCESSIBLE, SERIES_FLAG_MANAGED, SERIES_FLAG_VARLIST};
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::{Action, Runtime};
use crate::fail;

pub type FrameId = usize;

pub const EVAL_FLAG_TO_END: u32 = 1 << 0;
pub const EVAL_FLAG_FULFILLING_ARG: u32 = 1 << 1;
pub const EVAL_FLAG_NO_LOOKAHEAD: u32 = 1 << 2;
pub const EVAL_FLAG_PRESERVE_STALE: u32 = 1 << 3;
pub const EVAL_FLAG_RUNNING_ENFIX: u32 = 1 << 4;
pub const EVAL_FLAG_NEXT_ARG_FROM_OUT: u32 = 1 << 5;
pub const EVAL_FLAG_FULFILL_ONLY: u32 = 1 << 6;
pub const EVAL_FLAG_DOING_PICKUPS: u32 = 1 << 7;
pub const EVAL_FLAG_TYPECHECK_ONLY: u32 = 1 << 8;
pub const EVAL_FLAG_PUSH_PATH_REFINEMENTS: u32 = 1 << 9;
pub const EVAL_FLAG_EXPLICIT_EVALUATE: u32 = 1 << 10;

/// Where argument fulfillment reads pre-filled values from.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Special {
    /// Nothing pre-filled; gather everything from the callsite.
    Param,
    /// The varlist itself already holds candidate args (redo, APPLY-like calls).
    Arg,
    /// A specialization exemplar.
    Exemplar(SeriesId),
}

/// One level of evaluation over a feed. Frames live on `Runtime::frames` and
/// are addressed by index; the previous frame is `id - 1`.
pub struct Frame {
    pub feed: FeedId,
    pub out: Cell,
    pub spare: Cell,
    pub flags: u32,
    pub dsp_orig: usize,
    /// Index of the expression start in the feed's array.
    pub expr_index: Option<usize>,
    pub original: Option<Action>,
    pub phase: Option<Action>,
    pub binding: Binding,
    pub varlist: Option<SeriesId>,
    pub param: usize,
    pub special: Special,
    pub label: Option<SymId>,
    /// Quoting levels stripped from `<dequote>` args, re-added to the result.
    pub requotes: u32,
}

impl Frame {
    pub fn has_flag(&self, flag: u32) -> bool { self.flags & flag != 0 }
}

/// Address of a local in the caller's native stack frame.
#[inline(never)]
pub fn native_stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

impl Runtime {
    /// Fail before the native stack runs out. Frames nest Rust calls, so the
    /// frame count alone cannot bound it.
    pub fn check_native_stack(&self) -> Result<(), Error> {
        if let Some(base) = self.stack_base {
            if base.abs_diff(native_stack_address()) > self.config.stack_bytes {
                fail!(error::stack_overflow())
            }
        }
        Ok(())
    }

    pub fn push_frame(&mut self, feed: FeedId, flags: u32) -> Result<FrameId, Error> {
        if self.frames.len() >= self.config.max_depth {
            fail!(error::stack_overflow())
        }
        self.check_native_stack()?;
        let mut out = Cell::end();
        out.set_flag(CELL_FLAG_OUT_MARKED_STALE);
        self.frames.push(Frame {
            feed,
            out,
            spare: Cell::end(),
            flags,
            dsp_orig: self.stack.len(),
            expr_index: None,
            original: None,
            phase: None,
            binding: Binding::Unbound,
            varlist: None,
            param: 0,
            special: Special::Param,
            label: None,
            requotes: 0,
        });
        Ok(self.frames.len() - 1)
    }

    /// Pop the top frame. The data stack returns to where it was at push.
    pub fn drop_frame(&mut self, f: FrameId) -> Frame {
        debug_assert_eq!(f + 1, self.frames.len(), "frames must be dropped in LIFO order");
        let frame = self.frames.pop().unwrap_or_else(|| panic!("no frame {} to drop", f));
        self.stack.truncate(frame.dsp_orig);
        frame
    }

    pub fn frame(&self, f: FrameId) -> &Frame { &self.frames[f] }

    pub fn frame_mut(&mut self, f: FrameId) -> &mut Frame { &mut self.frames[f] }

    /// Allocate the varlist for a call to `action` and make it the frame's
    /// running action. The varlist's keys are the action's paramlist.
    pub fn push_action(&mut self, f: FrameId, action: Action, binding: Binding) -> Result<(), Error> {
        let paramlist = self.underlying_paramlist(action);
        let n = self.heap.len(paramlist);
        let mut cells = Vec::with_capacity(n);
        cells.push(Cell::end());
        for _ in 1..n {
            let mut c = Cell::null();
            c.set_flag(CELL_FLAG_STACK_LIFETIME);
            cells.push(c);
        }
        let mut series = Series::array(cells);
        series.flags |= SERIES_FLAG_VARLIST;
        series.link = Link::Keylist(paramlist);
        series.misc = Misc::Frame(f);
        let varlist = self.heap.alloc(series);
        self.manuals.push(varlist);
        self.heap.array_mut(varlist)[0] = Cell::frame(varlist, action, binding);

        let special = match self.exemplar(action) {
            Some(ex) => Special::Exemplar(ex),
            None => Special::Param,
        };
        let frame = &mut self.frames[f];
        frame.original = Some(action);
        frame.phase = Some(action);
        frame.binding = binding;
        frame.varlist = Some(varlist);
        frame.param = 1;
        frame.special = special;
        frame.requotes = 0;
        Ok(())
    }

    pub fn begin_action(&mut self, f: FrameId, label: Option<SymId>, lookback: bool) {
        let frame = &mut self.frames[f];
        frame.label = label;
        if lookback {
            frame.flags |= EVAL_FLAG_RUNNING_ENFIX | EVAL_FLAG_NEXT_ARG_FROM_OUT;
        } else {
            frame.flags &= !(EVAL_FLAG_RUNNING_ENFIX | EVAL_FLAG_NEXT_ARG_FROM_OUT);
        }
        trace!(label = label.map(|s| self.symbols.spelling(s)).unwrap_or("anonymous"), lookback, "begin action");
    }

    /// End the frame's action. A varlist nobody captured is freed; one that
    /// escaped into a FRAME! or a bound word becomes inaccessible.
    pub fn drop_action(&mut self, f: FrameId) {
        let (feed, fulfilling, varlist) = {
            let frame = &self.frames[f];
            (frame.feed, frame.has_flag(EVAL_FLAG_FULFILLING_ARG), frame.varlist)
        };
        if !fulfilling {
            self.feeds[feed].flags &= !FEED_FLAG_BARRIER_HIT;
        }
        self.release_api_handles(f);
        if let Some(v) = varlist {
            if self.heap.is_live(v) {
                if self.heap.has_flag(v, SERIES_FLAG_MANAGED) {
                    self.heap.set_flag(v, SERIES_FLAG_INACCESSIBLE);
                    let series = self.heap.get_mut(v);
                    series.misc = Misc::None;
                    self.heap.array_mut(v).truncate(1);
                } else {
                    if let Some(pos) = self.manuals.iter().rposition(|&m| m == v) {
                        self.manuals.remove(pos);
                    }
                    self.heap.free(v);
                }
            }
        }
        let frame = &mut self.frames[f];
        frame.flags &= !(EVAL_FLAG_RUNNING_ENFIX
            | EVAL_FLAG_NEXT_ARG_FROM_OUT
            | EVAL_FLAG_FULFILL_ONLY
            | EVAL_FLAG_DOING_PICKUPS
            | EVAL_FLAG_TYPECHECK_ONLY);
        frame.original = None;
        frame.phase = None;
        frame.varlist = None;
        frame.binding = Binding::Unbound;
        frame.special = Special::Param;
    }

    /// Drop a running action after a throw or failure, discarding anything
    /// it pushed on the data stack.
    pub fn abort_action(&mut self, f: FrameId) {
        let dsp = self.frames[f].dsp_orig;
        self.stack.truncate(dsp);
        self.drop_action(f);
    }

    pub fn frame_varlist(&self, f: FrameId) -> SeriesId {
        self.frames[f].varlist.unwrap_or_else(|| panic!("frame {} is not running an action", f))
    }

    /// Argument `n` (1-based) of the frame's running action.
    pub fn arg(&self, f: FrameId, n: usize) -> &Cell { &self.heap.array(self.frame_varlist(f))[n] }

    pub fn arg_mut(&mut self, f: FrameId, n: usize) -> &mut Cell {
        let v = self.frame_varlist(f);
        &mut self.heap.array_mut(v)[n]
    }

    /// A refinement slot is truthy when the refinement was used.
    pub fn refine(&self, f: FrameId, n: usize) -> bool { self.arg(f, n).is_truthy() }

    pub fn out(&self, f: FrameId) -> &Cell { &self.frames[f].out }

    pub fn out_mut(&mut self, f: FrameId) -> &mut Cell { &mut self.frames[f].out }

    pub fn set_out(&mut self, f: FrameId, value: Cell) { self.frames[f].out.move_from(&value); }

    /// Name the frame's action was invoked through, for error messages.
    pub fn frame_label(&self, f: FrameId) -> String {
        match self.frames[f].label {
            Some(sym) => self.symbols.spelling(sym).to_string(),
            None => "anonymous".to_string(),
        }
    }

    /// The frame running the action whose varlist is `varlist`, if it is
    /// still on the stack.
    pub fn frame_of_varlist(&self, varlist: SeriesId) -> Option<FrameId> {
        if !self.heap.is_live(varlist) || self.heap.has_flag(varlist, SERIES_FLAG_INACCESSIBLE) {
            return None;
        }
        match self.heap.get(varlist).misc {
            Misc::Frame(f) if self.frames.get(f).map(|fr| fr.varlist == Some(varlist)).unwrap_or(false) => Some(f),
            _ => None,
        }
    }

    /// The value of the frame as a FRAME!, which makes the varlist managed.
    pub fn frame_value(&mut self, f: FrameId) -> Cell {
        let v = self.frame_varlist(f);
        self.ensure_managed(v);
        let frame = &self.frames[f];
        let phase = frame.phase.or(frame.original);
        match phase {
            Some(p) => Cell::frame(v, p, frame.binding),
            None => Cell::context(Kind::Frame, v),
        }
    }
}

#[cfg(test)]
mod test_frame {
    use crate::interpreter::core::*;

    #[test]
    fn test_unmanaged_varlist_is_freed_on_drop() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let (feed, f) = rt.push_test_frame("");
        let action = rt.lib_action("add").unwrap();
        rt.push_action(f, action, Binding::Unbound).unwrap();
        let v = rt.frame_varlist(f);
        assert!(rt.manuals.contains(&v));
        rt.drop_action(f);
        assert!(!rt.heap.is_live(v));
        assert!(!rt.manuals.contains(&v));
        rt.drop_frame(f);
        rt.drop_feed(feed);
    }

    #[test]
    fn test_captured_varlist_becomes_inaccessible() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let (feed, f) = rt.push_test_frame("");
        let action = rt.lib_action("add").unwrap();
        rt.push_action(f, action, Binding::Unbound).unwrap();
        let value = rt.frame_value(f);
        let v = value.varlist().unwrap();
        rt.drop_action(f);
        assert!(rt.heap.is_live(v));
        assert!(rt.heap.has_flag(v, SERIES_FLAG_INACCESSIBLE));
        assert!(rt.frame_of_varlist(v).is_none());
        rt.drop_frame(f);
        rt.drop_feed(feed);
    }

    #[test]
    fn test_depth_limit_fails_with_stack_overflow() {
        let config = Config { max_depth: 4, ..Config::default() };
        let mut rt = Runtime::new(config).unwrap();
        let feed = rt.push_variadic_feed(vec![], None);
        let base = rt.frames.len();
        let mut err = None;
        for _ in 0..8 {
            if let Err(e) = rt.push_frame(feed, 0) {
                err = Some(e);
                break;
            }
        }
        assert!(err.unwrap().is("stack-overflow"));
        rt.frames.truncate(base);
        rt.drop_feed(feed);
    }
}
