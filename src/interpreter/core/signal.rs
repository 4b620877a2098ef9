use tracing::{debug, info, warn};

use crate::interpreter::core::cell::{Binding, Cell};
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::series::{
    Content, Link, SeriesId, SERIES_FLAG_INACCESSIBLE, SERIES_FLAG_MANAGED, SERIES_FLAG_MARKED, SERIES_FLAG_ROOT,
};
use crate::interpreter::core::{FeedSource, Runtime};
use crate::fail;

pub const SIG_RECYCLE: u32 = 1 << 0;
pub const SIG_HALT: u32 = 1 << 1;
pub const SIG_INTERRUPT: u32 = 1 << 2;

/// Stack heights captured when a trap is entered; restored on failure.
#[derive(Clone, Copy, Debug)]
pub struct Snapshot {
    frames: usize,
    feeds: usize,
    stack: usize,
    manuals: usize,
    api: usize,
    guards: usize,
    gc_disabled: u32,
}

impl Runtime {
    pub fn request_halt(&mut self) {
        self.signals |= SIG_HALT;
        self.eval_countdown = 1;
    }

    pub fn request_recycle(&mut self) {
        self.signals |= SIG_RECYCLE;
        self.eval_countdown = 1;
    }

    /// Run pending signals. Called by the evaluator each time the dose of
    /// evaluations runs out.
    pub fn do_signals(&mut self) -> Result<(), Error> {
        self.eval_countdown = self.config.eval_dose.max(1);
        if self.heap.recycle_requested {
            self.signals |= SIG_RECYCLE;
        }
        if self.signals & SIG_RECYCLE != 0 {
            self.signals &= !SIG_RECYCLE;
            self.recycle();
        }
        if self.signals & SIG_INTERRUPT != 0 {
            self.signals &= !SIG_INTERRUPT;
            debug!(depth = self.frames.len(), "interrupt signal ignored: no debugger attached");
        }
        if self.signals & SIG_HALT != 0 {
            self.signals &= !SIG_HALT;
            warn!("halt requested");
            fail!(error::halted())
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            frames: self.frames.len(),
            feeds: self.feeds.len(),
            stack: self.stack.len(),
            manuals: self.manuals.len(),
            api: self.api.len(),
            guards: self.guards.len(),
            gc_disabled: self.gc_disabled,
        }
    }

    /// Run `body`; if it fails, put every stack back the way it was at entry
    /// and hand back the error annotated with where it was raised.
    pub fn trap<T>(&mut self, body: impl FnOnce(&mut Runtime) -> Result<T, Error>) -> Result<T, Error> {
        let snap = self.snapshot();
        match body(self) {
            Ok(v) => Ok(v),
            Err(e) => Err(self.restore(&snap, e)),
        }
    }

    pub fn restore(&mut self, snap: &Snapshot, mut err: Error) -> Error {
        if let Some(f) = (snap.frames..self.frames.len()).rev().find(|&f| self.frames[f].label.is_some()) {
            err = err.with_where(&self.frame_label(f));
        }
        if let Some(f) = self.frames.len().checked_sub(1).filter(|&f| f >= snap.frames) {
            if let Some(near) = self.near_text(f) {
                err = err.with_near(near);
            }
        }
        for f in (snap.frames..self.frames.len()).rev() {
            if let Some(v) = self.frames[f].varlist {
                if self.heap.is_live(v) && self.heap.has_flag(v, SERIES_FLAG_MANAGED) {
                    self.heap.set_flag(v, SERIES_FLAG_INACCESSIBLE);
                    self.heap.array_mut(v).truncate(1);
                }
            }
        }
        self.frames.truncate(snap.frames);
        self.feeds.truncate(snap.feeds);
        self.stack.truncate(snap.stack);
        for id in self.manuals.split_off(snap.manuals.min(self.manuals.len())) {
            if self.heap.is_live(id) && !self.heap.has_flag(id, SERIES_FLAG_MANAGED) {
                self.heap.free(id);
            }
        }
        self.api.truncate(snap.api);
        self.guards.truncate(snap.guards);
        self.gc_disabled = snap.gc_disabled;
        self.thrown = None;
        debug!(id = %err.id, frames = self.frames.len(), "trapped failure");
        err
    }

    fn near_text(&self, f: usize) -> Option<String> {
        let frame = &self.frames[f];
        let (array, index) = self.feed_near(frame.feed)?;
        let start = frame.expr_index.unwrap_or(index).min(index);
        let cells = self.heap.array(array);
        let end = (index + 1).min(cells.len()).max(start);
        let mut parts: Vec<String> = cells[start..end].iter().map(|c| self.mold(c)).collect();
        if parts.len() > 6 {
            parts = parts.split_off(parts.len() - 6);
            parts.insert(0, "...".to_string());
        }
        Some(parts.join(" "))
    }

    /// Mark-and-sweep over managed series. Returns how many were freed.
    pub fn recycle(&mut self) -> usize {
        if self.gc_disabled > 0 {
            debug!("recycle skipped: collector disabled");
            return 0;
        }
        let mut pending: Vec<SeriesId> = Vec::new();
        for id in self.heap.live_ids() {
            if self.heap.has_flag(id, SERIES_FLAG_ROOT) {
                pending.push(id);
            }
        }
        pending.extend(self.manuals.iter().copied());
        let mut roots: Vec<Cell> = Vec::new();
        for frame in &self.frames {
            roots.push(frame.out.clone());
            roots.push(frame.spare.clone());
            if let Some(v) = frame.varlist {
                pending.push(v);
            }
            for a in frame.original.iter().chain(frame.phase.iter()) {
                pending.push(a.paramlist);
                pending.push(a.details);
            }
            push_binding(&mut pending, frame.binding);
        }
        for feed in &self.feeds {
            if let FeedSource::Array { array, .. } = feed.source {
                pending.push(array);
            }
            if let FeedSource::Variadic(ref queue) = feed.source {
                roots.extend(queue.iter().cloned());
            }
            roots.push(feed.value.clone());
            roots.extend(feed.gotten.iter().cloned());
            roots.extend(feed.lookback.iter().cloned());
            pending.extend(feed.specifier);
        }
        roots.extend(self.stack.iter().cloned());
        roots.extend(self.guards.iter().cloned());
        roots.extend(self.api.iter().flatten().map(|(c, _)| c.clone()));
        if let Some(ref t) = self.thrown {
            roots.push(t.label.clone());
            roots.push(t.value.clone());
        }
        for cell in &roots {
            push_cell(&mut pending, cell);
        }

        while let Some(id) = pending.pop() {
            if !self.heap.is_live(id) || self.heap.has_flag(id, SERIES_FLAG_MARKED) {
                continue;
            }
            self.heap.set_flag(id, SERIES_FLAG_MARKED);
            let series = self.heap.get(id);
            match series.link {
                Link::Keylist(k) | Link::Exemplar(k) => pending.push(k),
                _ => {}
            }
            if let Content::Array(ref cells) = series.content {
                for cell in cells {
                    push_cell(&mut pending, cell);
                }
            }
        }

        let mut freed = 0;
        for id in self.heap.live_ids() {
            let flags = self.heap.flags(id);
            if flags & SERIES_FLAG_MARKED != 0 {
                self.heap.clear_flag(id, SERIES_FLAG_MARKED);
            } else if flags & SERIES_FLAG_MANAGED != 0 {
                self.heap.free(id);
                freed += 1;
            }
        }
        self.heap.ballast = self.config.ballast;
        self.heap.recycle_requested = false;
        info!(freed, live = self.heap.live, "recycled");
        freed
    }
}

fn push_binding(pending: &mut Vec<SeriesId>, binding: Binding) {
    match binding {
        Binding::Specific(id) | Binding::Relative(id) => pending.push(id),
        Binding::Unbound => {}
    }
}

fn push_cell(pending: &mut Vec<SeriesId>, cell: &Cell) {
    let (a, b) = cell.payload.nodes();
    pending.extend(a);
    pending.extend(b);
    push_binding(pending, cell.binding);
}

#[cfg(test)]
mod test_signal {
    use crate::interpreter::core::*;

    #[test]
    fn test_recycle_frees_unreachable_series() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.recycle();
        let before = rt.heap.live;
        let garbage = rt.alloc_array(vec![Cell::integer(1)]);
        let kept = rt.alloc_text("kept");
        let mark = rt.guard(&Cell::series(Kind::Text, kept, 0));
        let freed = rt.recycle();
        assert!(freed >= 1);
        assert!(!rt.heap.is_live(garbage));
        assert!(rt.heap.is_live(kept));
        rt.unguard_to(mark);
        assert_eq!(rt.heap.live, before + 1);
    }

    #[test]
    fn test_user_variables_survive_recycle() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("keep: [a [b c] \"text\"]").unwrap();
        rt.recycle();
        let value = rt.run("keep/2/2").unwrap();
        assert_eq!(rt.mold(&value), "c");
    }

    #[test]
    fn test_trap_restores_stacks() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let snap = rt.snapshot();
        let err = rt.run("f: func [x] [x + undefined-word] f 1").unwrap_err();
        assert!(err.is("no-value"));
        assert_eq!(err.where_.as_deref(), Some("+"));
        assert_eq!(rt.frames.len(), 0);
        assert_eq!(rt.feeds.len(), 0);
        assert_eq!(rt.manuals.len(), 0);
        assert_eq!(rt.stack.len(), 0);
        let _ = snap;
    }

    #[test]
    fn test_halt_signal_fails_evaluation() {
        let config = Config { eval_dose: 1, ..Config::default() };
        let mut rt = Runtime::new(config).unwrap();
        rt.request_halt();
        let err = rt.run("loop 10 [1]").unwrap_err();
        assert!(err.is("halted"));
        assert_eq!(rt.run("1 + 1").unwrap(), Cell::integer(2));
    }
}
