use crate::interpreter::core::action::Bounce;
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::series::{Content, Series, SERIES_FLAG_MANAGED};
use crate::interpreter::core::Runtime;
use crate::interpreter::natives::Native;
use crate::{arg, fail, native};

const INSERT_SPEC: &str = "series [any-series!] value [<opt> any-value!] /part limit [any-number! any-series!] /only /dup count [any-number!]";

pub const NATIVES: &[Native] = &[
    native!("append", INSERT_SPEC, append),
    native!("insert", INSERT_SPEC, insert),
    native!("first", "value [<blank> any-series! tuple! pair!]", first),
    native!("second", "value [<blank> any-series! tuple! pair!]", second),
    native!("last", "value [<blank> any-series! tuple!]", last),
    native!("pick", "location [<blank> any-value!] picker [any-value!]", pick),
    native!("poke", "location [any-value!] picker [any-value!] value [<opt> any-value!]", poke),
    native!("select", "series [<blank> any-array! any-context!] value [any-value!] /case", select),
    native!("find", "series [<blank> any-series!] value [<opt> any-value!] /case /tail", find),
    native!("copy", "value [any-value!] /part limit [any-number! any-series!] /deep", copy),
    native!("take", "series [<blank> any-series! varargs!] /part limit [any-number!] /last", take),
    native!("head", "series [any-series!]", head),
    native!("tail", "series [any-series!]", tail),
    native!("next", "series [any-series!]", next),
    native!("back", "series [any-series!]", back),
    native!("skip", "series [any-series!] offset [any-number! logic!]", skip),
    native!("at", "series [any-series!] index [any-number!]", at),
    native!("index?", "series [<blank> any-series!]", index_q),
    native!("length?", "series [<blank> any-series! any-context!]", length_q),
    native!("head?", "series [any-series!]", head_q),
    native!("tail?", "series [any-series! varargs!]", tail_q),
    native!("empty?", "series [<opt> any-series! any-context! blank!]", empty_q),
    native!("clear", "series [<blank> any-series!]", clear),
    native!("remove", "series [any-series!] /part limit [any-number! any-series!]", remove),
];

fn out(rt: &mut Runtime, f: FrameId, value: Cell) -> Result<Bounce, Error> {
    rt.set_out(f, value);
    Ok(Bounce::Out)
}

fn at_index(series: &Cell, index: usize) -> Cell {
    let mut moved = series.clone();
    moved.set_index(index);
    moved.clear_flag(CELL_FLAG_UNEVALUATED);
    moved
}

impl Runtime {
    /// Elements from the series position to its tail. Positions past the
    /// tail (after removals) count as empty.
    pub fn series_length(&self, series: &Cell) -> usize {
        let len = self.heap.len(self.array_of(series));
        len.saturating_sub(series.index())
    }

    /// Items remaining at a position: series length, or variable count for
    /// contexts. None for kinds that have no length.
    pub fn length_of(&self, value: &Cell) -> Result<Option<usize>, Error> {
        if value.quote != 0 {
            return Ok(None);
        }
        if value.kind.is_any_series() {
            return Ok(Some(self.series_length(value)));
        }
        if let Some(ctx) = value.varlist().filter(|_| value.kind.is_any_context()) {
            self.check_accessible(ctx)?;
            return Ok(Some(self.context_len(ctx)));
        }
        Ok(None)
    }

    /// A `/part` limit as an element count from `series`' position. Series
    /// limits must be positions in the same series.
    fn part_count(&self, series: &Cell, limit: &Cell) -> Result<usize, Error> {
        let available = self.series_length(series);
        if let Some(n) = limit.as_decimal() {
            return Ok((n.max(0.0) as usize).min(available));
        }
        if limit.kind.is_any_series() && limit.series_id() == series.series_id() {
            return Ok(limit.index().saturating_sub(series.index()).min(available));
        }
        fail!(error::invalid_arg(&self.mold(limit)))
    }

    fn binary_cell(&mut self, bytes: Vec<u8>) -> Cell {
        let mut s = Series::binary(bytes);
        s.flags |= SERIES_FLAG_MANAGED;
        let id = self.heap.alloc(s);
        Cell::series(Kind::Binary, id, 0)
    }

    /// Text that APPEND puts into a string: blocks contribute each element
    /// formed, other values their FORM.
    fn insertion_text(&self, value: &Cell) -> String {
        if value.is(Kind::Block) {
            let array = self.array_of(value);
            return self.heap.array(array).iter().skip(value.index()).map(|c| self.form(c)).collect();
        }
        self.form(value)
    }

    fn insertion_bytes(&self, value: &Cell) -> Result<Vec<u8>, Error> {
        match value.payload {
            Payload::Integer(b @ 0..=255) if value.quote == 0 => Ok(vec![b as u8]),
            Payload::Char(c) if value.quote == 0 => Ok(c.to_string().into_bytes()),
            _ if value.is(Kind::Binary) => {
                let id = self.array_of(value);
                Ok(self.heap.binary(id)[value.index().min(self.heap.len(id))..].to_vec())
            }
            _ if value.quote == 0 && value.kind.is_any_string() => Ok(self.cell_text(value).into_bytes()),
            _ => fail!(error::invalid_arg(&self.mold(value))),
        }
    }

    /// Shared body of APPEND and INSERT: put `value` into `series` at
    /// element offset `at`, returning the offset just past what went in.
    pub fn insert_at(&mut self, series: &Cell, at: usize, value: &Cell, only: bool, part: Option<usize>, dup: usize) -> Result<usize, Error> {
        let id = self.array_of(series);
        self.check_mutable(id)?;
        let at = at.min(self.heap.len(id));
        if series.kind.is_any_array() {
            let mut items: Vec<Cell> = if !only && (value.is(Kind::Block) || value.is(Kind::Group)) {
                let src = self.array_of(value);
                let spec = self.derive_specifier(value, None);
                let cells: Vec<Cell> = self.heap.array(src).iter().skip(value.index()).cloned().collect();
                cells.iter().map(|c| self.derelativize(c, spec)).collect()
            } else {
                let mut item = value.copied();
                item.clear_flag(CELL_FLAG_UNEVALUATED);
                vec![item]
            };
            if let Some(n) = part {
                items.truncate(n);
            }
            let repeated: Vec<Cell> = (0..dup).flat_map(|_| items.iter().cloned()).collect();
            let count = repeated.len();
            self.heap.array_mut(id).splice(at..at, repeated);
            return Ok(at + count);
        }
        if series.kind == Kind::Binary {
            let mut bytes = self.insertion_bytes(value)?;
            if let Some(n) = part {
                bytes.truncate(n);
            }
            let repeated: Vec<u8> = (0..dup).flat_map(|_| bytes.iter().copied()).collect();
            let count = repeated.len();
            self.heap.binary_mut(id).splice(at..at, repeated);
            return Ok(at + count);
        }
        let mut text = self.insertion_text(value);
        if let Some(n) = part {
            text = text.chars().take(n).collect();
        }
        let repeated = text.repeat(dup);
        let count = repeated.chars().count();
        self.heap.text_mut(id).insert(at, &repeated);
        Ok(at + count)
    }

    /// Remove `count` elements at `at`, returning them in a fresh series of
    /// the same kind.
    pub fn remove_span(&mut self, series: &Cell, at: usize, count: usize) -> Result<Cell, Error> {
        let id = self.array_of(series);
        self.check_mutable(id)?;
        let len = self.heap.len(id);
        let (from, to) = (at.min(len), (at + count).min(len));
        let removed = match self.heap.get_mut(id).content {
            Content::Array(ref mut cells) => Content::Array(cells.drain(from..to).collect()),
            Content::Binary(ref mut bytes) => Content::Binary(bytes.drain(from..to).collect()),
            Content::Text(ref mut text) => {
                let s = text.slice(from, to).to_string();
                text.remove(from, to);
                return Ok(self.text_cell(series.kind, &s));
            }
        };
        Ok(match removed {
            Content::Array(cells) => self.block_cell(if series.kind.is_any_array() { series.kind } else { Kind::Block }, cells),
            Content::Binary(bytes) => self.binary_cell(bytes),
            Content::Text(_) => Cell::null(),
        })
    }

    /// Position of `value` in `series` at or after its index, and the
    /// position just past the match.
    pub fn find_in_series(&self, series: &Cell, value: &Cell, case: bool) -> Result<Option<(usize, usize)>, Error> {
        let id = self.array_of(series);
        let start = series.index();
        let len = self.heap.len(id);
        if start >= len {
            return Ok(None);
        }
        if series.kind.is_any_array() {
            let cells = self.heap.array(id);
            if value.is(Kind::Block) {
                let needle: Vec<Cell> = self.heap.array(self.array_of(value)).iter().skip(value.index()).cloned().collect();
                if needle.is_empty() {
                    return Ok(Some((start, start)));
                }
                let found = (start..len.saturating_sub(needle.len() - 1))
                    .find(|&i| needle.iter().enumerate().all(|(k, n)| self.equal_values(&cells[i + k], n, case)));
                return Ok(found.map(|i| (i, i + needle.len())));
            }
            let found = (start..len).find(|&i| self.equal_values(&cells[i], value, case));
            return Ok(found.map(|i| (i, i + 1)));
        }
        if series.kind == Kind::Binary {
            let hay = self.heap.binary(id);
            let needle = self.insertion_bytes(value)?;
            if needle.is_empty() {
                return Ok(Some((start, start)));
            }
            let found = (start..len).find(|&i| hay[i..].starts_with(&needle));
            return Ok(found.map(|i| (i, i + needle.len())));
        }
        let fold = |s: &str| -> Vec<char> {
            if case {
                s.chars().collect()
            } else {
                s.chars().flat_map(|c| c.to_lowercase()).collect()
            }
        };
        let text = self.heap.text(id);
        let hay = fold(text.slice(start, text.len()));
        let needle = match value.payload {
            Payload::Char(c) if value.quote == 0 => fold(&c.to_string()),
            _ => fold(&self.insertion_text(value)),
        };
        if needle.is_empty() {
            return Ok(Some((start, start)));
        }
        if needle.len() > hay.len() {
            return Ok(None);
        }
        let found = (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()] == needle[..]);
        Ok(found.map(|i| (start + i, start + i + needle.len())))
    }

    /// Copy of a value as COPY makes it. Immediates come back unchanged.
    pub fn copy_value(&mut self, value: &Cell, part: Option<usize>, deep: bool) -> Result<Cell, Error> {
        if value.quote != 0 {
            return Ok(value.clone());
        }
        if value.kind.is_any_series() {
            let id = self.array_of(value);
            let start = value.index().min(self.heap.len(id));
            let end = match part {
                Some(n) => (start + n).min(self.heap.len(id)),
                None => self.heap.len(id),
            };
            if value.kind.is_any_array() {
                let spec = self.derive_specifier(value, None);
                let copy = if deep {
                    let whole = self.copy_array_deep(id, start, spec);
                    self.heap.array_mut(whole).truncate(end - start);
                    whole
                } else {
                    self.copy_array_shallow(id, start, end, spec)
                };
                return Ok(Cell::series(value.kind, copy, 0));
            }
            if value.kind == Kind::Binary {
                let bytes = self.heap.binary(id)[start..end].to_vec();
                return Ok(self.binary_cell(bytes));
            }
            let text = self.heap.text(id).slice(start, end).to_string();
            return Ok(self.text_cell(value.kind, &text));
        }
        if let Some(ctx) = value.varlist().filter(|_| value.kind.is_any_context() && value.kind != Kind::Frame) {
            let copy = self.copy_context(ctx, deep)?;
            return Ok(Cell::context(value.kind, copy));
        }
        Ok(value.clone())
    }

    /// Take the next item a VARARGS! offers, or null when it is exhausted.
    /// Returns None if evaluating the item threw.
    pub fn take_varargs(&mut self, varargs: &Cell) -> Result<Option<Cell>, Error> {
        match varargs.payload {
            Payload::Varargs(Varargs::Frame { varlist, param }) => {
                let frame = match self.frame_of_varlist(varlist) {
                    Some(fr) => fr,
                    None => fail!(error::series_data_freed()),
                };
                let feed = self.frames[frame].feed;
                if self.feeds[feed].is_end() || self.feed_is_bar(feed) {
                    return Ok(Some(Cell::null()));
                }
                let p = self.key(varlist, param);
                let value = match p.class {
                    ParamClass::HardQuote | ParamClass::SoftQuote => {
                        let spec = self.feeds[feed].specifier;
                        let cell = self.fetch_next(feed);
                        self.derelativize(&cell, spec)
                    }
                    _ => {
                        let (threw, value) = self.eval_step_in_subframe_throws(frame, 0)?;
                        if threw {
                            return Ok(None);
                        }
                        if value.is_end() {
                            Cell::null()
                        } else {
                            value
                        }
                    }
                };
                if !self.type_matches(&p, &value) {
                    let kind = if value.is_null() { "null" } else { value.type_kind().name() };
                    fail!(error::expect_arg(&self.frame_label(frame), &self.param_name(&p), kind))
                }
                Ok(Some(value))
            }
            Payload::Varargs(Varargs::Array { holder, .. }) => {
                let block = self.heap.array(holder)[0].clone();
                let array = self.array_of(&block);
                let index = block.index();
                let item = match self.heap.array(array).get(index).cloned() {
                    Some(c) => c,
                    None => return Ok(Some(Cell::null())),
                };
                self.heap.array_mut(holder)[0].set_index(index + 1);
                let spec = self.derive_specifier(&block, None);
                Ok(Some(self.derelativize(&item, spec)))
            }
            _ => fail!(error::invalid_arg(&self.mold(varargs))),
        }
    }

    fn varargs_at_tail(&self, varargs: &Cell) -> bool {
        match varargs.payload {
            Payload::Varargs(Varargs::Frame { varlist, .. }) => match self.frame_of_varlist(varlist) {
                Some(fr) => {
                    let feed = self.frames[fr].feed;
                    self.feeds[feed].is_end() || self.feed_is_bar(feed)
                }
                None => true,
            },
            Payload::Varargs(Varargs::Array { holder, .. }) => {
                let block = &self.heap.array(holder)[0];
                self.series_length(block) == 0
            }
            _ => true,
        }
    }
}

fn part_arg(rt: &Runtime, f: FrameId, series: &Cell, refine: usize) -> Result<Option<usize>, Error> {
    if !rt.refine(f, refine) {
        return Ok(None);
    }
    rt.part_count(series, rt.arg(f, refine + 1)).map(Some)
}

/// The `/part` of APPEND and INSERT counts items taken from the value.
fn insert_part(rt: &Runtime, f: FrameId) -> Option<usize> {
    if !rt.refine(f, 3) {
        return None;
    }
    let limit = rt.arg(f, 4);
    match limit.as_decimal() {
        Some(n) => Some(n.max(0.0) as usize),
        None => Some(rt.series_length(limit)),
    }
}

fn dup_arg(rt: &Runtime, f: FrameId) -> usize {
    if !rt.refine(f, 6) {
        return 1;
    }
    rt.arg(f, 7).as_decimal().map(|n| n.max(0.0) as usize).unwrap_or(0)
}

fn append(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let value = arg!(rt, f, 2);
    if value.is_null() {
        return out(rt, f, series);
    }
    let tail = rt.heap.len(rt.array_of(&series));
    rt.insert_at(&series, tail, &value, rt.refine(f, 5), insert_part(rt, f), dup_arg(rt, f))?;
    out(rt, f, at_index(&series, series.index()))
}

fn insert(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let value = arg!(rt, f, 2);
    if value.is_null() {
        return out(rt, f, series);
    }
    let after = rt.insert_at(&series, series.index(), &value, rt.refine(f, 5), insert_part(rt, f), dup_arg(rt, f))?;
    out(rt, f, at_index(&series, after))
}

fn pick_nth(rt: &mut Runtime, f: FrameId, n: i64) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let picked = rt.pick_value(&value, &Cell::integer(n))?;
    if picked.is_null() {
        return Ok(Bounce::Null);
    }
    out(rt, f, picked)
}

fn first(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { pick_nth(rt, f, 1) }

fn second(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { pick_nth(rt, f, 2) }

fn last(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let n = match value.payload {
        Payload::Tuple { len, .. } => len as i64,
        _ => rt.series_length(&value) as i64,
    };
    if n == 0 {
        return Ok(Bounce::Null);
    }
    pick_nth(rt, f, n)
}

fn pick(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let location = arg!(rt, f, 1);
    let picker = arg!(rt, f, 2);
    let picked = rt.pick_value(&location, &picker)?;
    out(rt, f, picked)
}

fn poke(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let location = arg!(rt, f, 1);
    let picker = arg!(rt, f, 2);
    let value = arg!(rt, f, 3);
    rt.poke_value(&location, &picker, &value)?;
    out(rt, f, value)
}

fn select(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let value = arg!(rt, f, 2);
    let case = rt.refine(f, 3);
    if let Some(ctx) = series.varlist().filter(|_| series.kind.is_any_context()) {
        rt.check_accessible(ctx)?;
        let found = match value.word_sym() {
            Some(sym) if value.kind.is_any_word() => rt.context_var(ctx, sym).cloned(),
            _ => fail!(error::invalid_arg(&rt.mold(&value))),
        };
        return match found {
            Some(v) => out(rt, f, v),
            None => Ok(Bounce::Null),
        };
    }
    let id = rt.array_of(&series);
    let spec = rt.derive_specifier(&series, None);
    let cells = rt.heap.array(id);
    let found = (series.index()..cells.len()).find(|&i| rt.equal_values(&cells[i], &value, case)).and_then(|i| cells.get(i + 1).cloned());
    match found {
        Some(v) => {
            let v = rt.derelativize(&v, spec);
            out(rt, f, v)
        }
        None => Ok(Bounce::Null),
    }
}

fn find(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let value = arg!(rt, f, 2);
    if value.is_null() {
        return Ok(Bounce::Null);
    }
    match rt.find_in_series(&series, &value, rt.refine(f, 3))? {
        Some((start, end)) => {
            let position = if rt.refine(f, 4) { end } else { start };
            out(rt, f, at_index(&series, position))
        }
        None => Ok(Bounce::Null),
    }
}

fn copy(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let part = if value.kind.is_any_series() { part_arg(rt, f, &value, 2)? } else { None };
    let copied = rt.copy_value(&value, part, rt.refine(f, 4))?;
    out(rt, f, copied)
}

fn take(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    if series.is(Kind::Varargs) {
        if rt.refine(f, 2) || rt.refine(f, 4) {
            fail!(Script, "bad-refines", "TAKE of a VARARGS! takes one item from its front")
        }
        return match rt.take_varargs(&series)? {
            Some(v) if v.is_null() => Ok(Bounce::Null),
            Some(v) => out(rt, f, v),
            None => Ok(Bounce::Thrown),
        };
    }
    let available = rt.series_length(&series);
    let from_back = rt.refine(f, 4);
    if rt.refine(f, 2) {
        let n = int_or(rt.arg(f, 3), 1).min(available);
        let at = if from_back { series.index() + available - n } else { series.index() };
        let removed = rt.remove_span(&series, at, n)?;
        return out(rt, f, removed);
    }
    if available == 0 {
        return Ok(Bounce::Null);
    }
    let at = if from_back { series.index() + available - 1 } else { series.index() };
    let item = rt.pick_value(&at_index(&series, at), &Cell::integer(1))?;
    rt.remove_span(&series, at, 1)?;
    out(rt, f, item)
}

fn int_or(cell: &Cell, default: usize) -> usize { cell.as_decimal().map(|n| n.max(0.0) as usize).unwrap_or(default) }

fn head(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    out(rt, f, at_index(&series, 0))
}

fn tail(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let len = rt.heap.len(rt.array_of(&series));
    out(rt, f, at_index(&series, len))
}

/// Move a series position by `delta`, clamped to the head and tail.
fn shifted(rt: &Runtime, series: &Cell, delta: i64) -> Cell {
    let len = rt.heap.len(rt.array_of(series)) as i64;
    let index = (series.index() as i64 + delta).clamp(0, len);
    at_index(series, index as usize)
}

fn next(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let moved = shifted(rt, &series, 1);
    out(rt, f, moved)
}

fn back(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let moved = shifted(rt, &series, -1);
    out(rt, f, moved)
}

fn skip(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let offset = match rt.arg(f, 2).payload {
        Payload::Logic(b) => b as i64,
        _ => rt.arg(f, 2).as_decimal().map(|d| d as i64).unwrap_or(0),
    };
    let moved = shifted(rt, &series, offset);
    out(rt, f, moved)
}

/// AT is 1-based: `at s 1` is `s` itself.
fn at(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let n = rt.arg(f, 2).as_decimal().map(|d| d as i64).unwrap_or(1);
    let delta = if n > 0 { n - 1 } else { n };
    let moved = shifted(rt, &series, delta);
    out(rt, f, moved)
}

fn index_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    out(rt, f, Cell::integer(series.index() as i64 + 1))
}

fn length_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    match rt.length_of(&value)? {
        Some(n) => out(rt, f, Cell::integer(n as i64)),
        None => Err(rt.bad_arg(f, 1)),
    }
}

fn head_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    out(rt, f, Cell::logic(series.index() == 0))
}

fn tail_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let at_tail = if series.is(Kind::Varargs) { rt.varargs_at_tail(&series) } else { rt.series_length(&series) == 0 };
    out(rt, f, Cell::logic(at_tail))
}

fn empty_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let empty = value.is_null() || value.is_blank() || rt.length_of(&value)? == Some(0);
    out(rt, f, Cell::logic(empty))
}

fn clear(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let n = rt.series_length(&series);
    rt.remove_span(&series, series.index(), n)?;
    out(rt, f, series)
}

fn remove(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let series = arg!(rt, f, 1);
    let n = part_arg(rt, f, &series, 2)?.unwrap_or(1);
    rt.remove_span(&series, series.index(), n)?;
    out(rt, f, series)
}

#[cfg(test)]
mod test_series {
    use crate::interpreter::core::*;

    fn same_series(a: &Cell, b: &Cell) -> bool { a.series_id().is_some() && a.series_id() == b.series_id() }

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_append_and_insert() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "append [a b] [c d]"), "[a b c d]");
        assert_eq!(run(&mut rt, "append/only [a] [b c]"), "[a [b c]]");
        assert_eq!(run(&mut rt, "append/dup [] 'x 3"), "[x x x]");
        assert_eq!(run(&mut rt, "append/part [] [1 2 3] 2"), "[1 2]");
        assert_eq!(run(&mut rt, "append \"ab\" [1 \"c\"]"), "\"ab1c\"");
        assert_eq!(run(&mut rt, "append #{01} 2"), "#{0102}");
        assert_eq!(run(&mut rt, "append [a] null"), "[a]");
        assert_eq!(run(&mut rt, "b: [c] insert b [a b] b"), "[a b c]");
        assert_eq!(run(&mut rt, "insert \"world\" \"hello \""), "\"world\"");
    }

    #[test]
    fn test_append_path_refinements() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "list: [] append/only/dup list [x] 2 list"), "[[x] [x]]");
    }

    #[test]
    fn test_positions() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "next [a b c]"), "[b c]");
        assert_eq!(run(&mut rt, "head next [a b c]"), "[a b c]");
        assert_eq!(run(&mut rt, "index? tail [a b c]"), "4");
        assert_eq!(run(&mut rt, "back [a]"), "[a]");
        assert_eq!(run(&mut rt, "skip [a b c] 2"), "[c]");
        assert_eq!(run(&mut rt, "skip [a b c] 10"), "[]");
        assert_eq!(run(&mut rt, "at \"abcd\" 3"), "\"cd\"");
        assert_eq!(run(&mut rt, "tail? next [a]"), "#[true]");
        assert_eq!(run(&mut rt, "head? [a]"), "#[true]");
        assert_eq!(run(&mut rt, "length? next \"abc\""), "2");
        assert_eq!(run(&mut rt, "empty? _"), "#[true]");
        assert_eq!(run(&mut rt, "index? _"), "null");
    }

    #[test]
    fn test_pick_first_last_select_find() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "first [a b]"), "a");
        assert_eq!(run(&mut rt, "second \"xyz\""), "#\"y\"");
        assert_eq!(run(&mut rt, "last [1 2 3]"), "3");
        assert_eq!(run(&mut rt, "last []"), "null");
        assert_eq!(run(&mut rt, "first 1.2.3"), "1");
        assert_eq!(run(&mut rt, "pick [a b c] 5"), "null");
        assert_eq!(run(&mut rt, "b: [1 2 3] poke b 2 'x b"), "[1 x 3]");
        assert_eq!(run(&mut rt, "select [a 1 b 2] 'b"), "2");
        assert_eq!(run(&mut rt, "select make object! [k: 10] 'k"), "10");
        assert_eq!(run(&mut rt, "find [a b c] 'b"), "[b c]");
        assert_eq!(run(&mut rt, "find [a b c d] [b c]"), "[b c d]");
        assert_eq!(run(&mut rt, "find \"Hello\" \"LL\""), "\"llo\"");
        assert_eq!(run(&mut rt, "find/case \"Hello\" \"LL\""), "null");
        assert_eq!(run(&mut rt, "find/tail \"abc\" #\"b\""), "\"c\"");
    }

    #[test]
    fn test_copy_take_remove_clear() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "a: [1 [2]] b: copy a append b 3 a"), "[1 [2]]");
        assert_eq!(run(&mut rt, "a: [[1]] b: copy/deep a append first b 2 a"), "[[1]]");
        assert_eq!(run(&mut rt, "copy/part \"abcdef\" 3"), "\"abc\"");
        assert_eq!(run(&mut rt, "b: [1 2 3] take b"), "1");
        assert_eq!(run(&mut rt, "b: [1 2 3] take/last b b"), "[1 2]");
        assert_eq!(run(&mut rt, "b: [1 2 3] take/part b 2"), "[1 2]");
        assert_eq!(run(&mut rt, "take []"), "null");
        assert_eq!(run(&mut rt, "b: [1 2 3] remove next b b"), "[1 3]");
        assert_eq!(run(&mut rt, "s: \"abc\" clear next s s"), "\"a\"");
    }

    #[test]
    fn test_copy_makes_a_new_series() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let a = rt.run("a: [x]").unwrap();
        let b = rt.run("copy a").unwrap();
        let c = rt.run("a").unwrap();
        assert!(!same_series(&a, &b));
        assert!(same_series(&a, &c));
    }

    #[test]
    fn test_protected_series_refuse_changes() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "b: [1] protect b append b 2"), "error: protected");
        assert_eq!(run(&mut rt, "unprotect b append b 2"), "[1 2]");
    }

    #[test]
    fn test_variadic_take() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("sum-all: func [args [integer! <...>]] [total: 0 while [not tail? args] [total: total + take args] total]").unwrap();
        assert_eq!(run(&mut rt, "sum-all 1 2 3"), "6");
        assert_eq!(run(&mut rt, "sum-all"), "0");
        rt.run("grab: func [:args [<...> any-value!]] [reduce [take args take args]]").unwrap();
        assert_eq!(run(&mut rt, "grab (1 + 2) x"), "[(1 + 2) x]");
    }
}
