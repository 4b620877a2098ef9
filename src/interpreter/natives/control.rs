use tracing::debug;

use crate::interpreter::core::action::Bounce;
use crate::interpreter::core::cell::*;
use crate::interpreter::core::context::VarRef;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::eval::Step;
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::path::PATH_FLAG_NO_GROUPS;
use crate::interpreter::core::series::SeriesId;
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::Runtime;
use crate::interpreter::natives::Native;
use crate::{arg, fail, native};

pub const NATIVES: &[Native] = &[
    native!("if", "condition [<opt> any-value!] 'branch [block! action! quoted!]", if_native),
    native!(
        "either",
        "condition [<opt> any-value!] 'true-branch [block! action! quoted!] 'false-branch [block! action! quoted!]",
        either
    ),
    native!(enfix "else", "<defer> optional [<opt> any-value! void!] 'branch [block! action! quoted!]", else_native),
    native!(enfix "then", "<defer> optional [<opt> any-value! void!] 'branch [block! action! quoted!]", then),
    native!(enfix "also", "<defer> optional [<opt> any-value! void!] 'branch [block! action! quoted!]", also),
    native!("all", "block [block!]", all),
    native!("any", "block [block!]", any),
    native!("case", "cases [block!] /all", case),
    native!("loop", "count [<blank> any-number! logic!] body [block!]", loop_native),
    native!("while", "condition [block!] body [block!]", while_native),
    native!("repeat", "'word [word!] value [<blank> any-number! any-series!] body [block!]", repeat),
    native!("for-each", "'vars [word! block!] data [<blank> any-series! any-context!] body [block!]", for_each),
    native!("break", "", break_native),
    native!("continue", "value [<end> <opt> any-value!]", continue_native),
    native!("catch", "block [block!] /name names [block! word! action! object!] /quit /any", catch),
    native!("throw", "value [<opt> any-value!] /name label [word! action! object!]", throw),
    native!("quit", "/with value [<opt> any-value!]", quit),
    native!("halt", "", halt),
    native!("unwind", "level [frame! action! integer!] /with value [<opt> any-value! void!]", unwind),
    native!("redo", "restartee [frame! action!] /other sibling [action!]", redo),
    native!("return", "value [<end> <opt> any-value! void!]", return_native),
    native!("fail", "reason [<end> <opt> text! block! error! word!]", fail_native),
    native!("trap", "code [block!]", trap),
    native!("comment", "return: [] :discarded [block! any-string! binary! any-scalar!]", comment),
    native!("elide", "return: [] discarded [<opt> any-value! void!]", elide),
    native!("do", "source [<blank> <opt> block! group! text! frame! action!]", do_native),
    native!("eval", "value [<opt> any-value!]", eval),
    native!("evaluate", "source [<blank> block! group!] /set var [any-word!]", evaluate),
    native!("reduce", "value [<opt> any-value!]", reduce),
    native!("compose", "value [any-array!] /deep /only", compose),
    native!("get", "source [any-word! any-path! block!] /any", get),
    native!("set", "target [any-word! any-path! block!] value [<opt> any-value! void!]", set),
    native!("lit", ":value [any-value! void!]", lit),
    native!("quote", "value [<opt> any-value! void!] /depth count [integer!]", quote),
    native!("unquote", "value [<opt> any-value! void!] /depth count [integer!]", unquote),
    native!("null", "", null),
    native!("void", "", void),
];

/// Null results of a taken branch become VOID!, so null always means the
/// branch did not run.
fn voidify(cell: Cell) -> Cell {
    if cell.is_null() {
        Cell::void()
    } else {
        cell
    }
}

/// Loops reserve null for BREAK and blank for "never ran".
fn voidify_loop(cell: Cell) -> Cell {
    if cell.is_null() || cell.is_blank() {
        Cell::void()
    } else {
        cell
    }
}

fn out(rt: &mut Runtime, f: FrameId, value: Cell) -> Result<Bounce, Error> {
    rt.set_out(f, value);
    Ok(Bounce::Out)
}

fn if_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let condition = arg!(rt, f, 1);
    if !rt.condition_true(&condition)? {
        return Ok(Bounce::Null);
    }
    let mut result = Cell::null();
    if rt.do_branch_throws(&mut result, &arg!(rt, f, 2), &condition)? {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, voidify(result))
}

fn either(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let condition = arg!(rt, f, 1);
    let branch = if rt.condition_true(&condition)? { arg!(rt, f, 2) } else { arg!(rt, f, 3) };
    let mut result = Cell::null();
    if rt.do_branch_throws(&mut result, &branch, &condition)? {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, result)
}

fn else_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let optional = arg!(rt, f, 1);
    if !optional.is_null() {
        return out(rt, f, optional);
    }
    let mut result = Cell::null();
    if rt.do_branch_throws(&mut result, &arg!(rt, f, 2), &Cell::null())? {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, result)
}

fn then(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let optional = arg!(rt, f, 1);
    if optional.is_null() {
        return Ok(Bounce::Null);
    }
    let mut result = Cell::null();
    if rt.do_branch_throws(&mut result, &arg!(rt, f, 2), &optional)? {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, voidify(result))
}

fn also(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let optional = arg!(rt, f, 1);
    if optional.is_null() {
        return Ok(Bounce::Null);
    }
    let mut discarded = Cell::null();
    if rt.do_branch_throws(&mut discarded, &arg!(rt, f, 2), &optional)? {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, optional)
}

/// Step through a block one expression at a time, handing each produced
/// value to `visit`. Stops early when `visit` returns false.
fn each_expression_throws(rt: &mut Runtime, block: &Cell, mut visit: impl FnMut(&mut Runtime, Cell) -> Result<bool, Error>) -> Result<bool, Error> {
    let array = rt.array_of(block);
    let spec = rt.derive_specifier(block, None);
    let mut index = block.index();
    while index < rt.heap.len(array) {
        let mut value = Cell::null();
        let (threw, next) = rt.eval_step_at_throws(&mut value, array, index, spec)?;
        if threw {
            return Ok(true);
        }
        index = next;
        if value.is_end() {
            continue;
        }
        if !visit(rt, value)? {
            break;
        }
    }
    Ok(false)
}

fn all(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let block = arg!(rt, f, 1);
    let mut last = Cell::null();
    let mut failed = false;
    let threw = each_expression_throws(rt, &block, |_, value| {
        if !value.is_truthy() {
            failed = true;
            return Ok(false);
        }
        last = value;
        Ok(true)
    })?;
    if threw {
        return Ok(Bounce::Thrown);
    }
    if failed {
        return Ok(Bounce::Null);
    }
    out(rt, f, last)
}

fn any(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let block = arg!(rt, f, 1);
    let mut found = None;
    let threw = each_expression_throws(rt, &block, |_, value| {
        if value.is_truthy() {
            found = Some(value);
            return Ok(false);
        }
        Ok(true)
    })?;
    if threw {
        return Ok(Bounce::Thrown);
    }
    match found {
        Some(v) => out(rt, f, v),
        None => Ok(Bounce::Null),
    }
}

fn case(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let cases = arg!(rt, f, 1);
    let all = rt.refine(f, 2);
    let array = rt.array_of(&cases);
    let spec = rt.derive_specifier(&cases, None);
    let mut index = cases.index();
    let mut result = Cell::null();
    while index < rt.heap.len(array) {
        let mut condition = Cell::null();
        let (threw, next) = rt.eval_step_at_throws(&mut condition, array, index, spec)?;
        if threw {
            return Ok(Bounce::Thrown);
        }
        index = next;
        if condition.is_end() {
            break;
        }
        // A trailing condition without a branch falls out as the result.
        if index >= rt.heap.len(array) {
            return out(rt, f, condition);
        }
        let branch_cell = rt.heap.array(array)[index].clone();
        let branch_cell = rt.derelativize(&branch_cell, spec);
        index += 1;
        let branchable = branch_cell.is(Kind::Block) || branch_cell.is(Kind::Action) || branch_cell.is(Kind::Group) || branch_cell.is_quoted();
        if !rt.condition_true(&condition)? {
            if !branchable {
                fail!(error::invalid_type(branch_cell.type_kind().name()))
            }
            continue;
        }
        let branch = if branch_cell.is(Kind::Group) {
            let mut evaluated = Cell::null();
            if rt.do_block_throws(&mut evaluated, &branch_cell)? {
                return Ok(Bounce::Thrown);
            }
            evaluated
        } else {
            branch_cell
        };
        let mut taken = Cell::null();
        if rt.do_branch_throws(&mut taken, &branch, &condition)? {
            return Ok(Bounce::Thrown);
        }
        result = voidify(taken);
        if !all {
            break;
        }
    }
    out(rt, f, result)
}

enum Pass {
    Done,
    Broke,
    Thrown,
}

/// One run of a loop body. CONTINUE is absorbed here; BREAK is reported so
/// the loop can return null.
fn loop_body_throws(rt: &mut Runtime, result: &mut Cell, body: &Cell) -> Result<Pass, Error> {
    if !rt.do_block_throws(result, body)? {
        return Ok(Pass::Done);
    }
    let specials = rt.specials();
    let label = rt.thrown_label().and_then(|l| l.as_action());
    if label == Some(specials.brk) {
        rt.take_thrown();
        return Ok(Pass::Broke);
    }
    if label == Some(specials.cont) {
        *result = rt.take_thrown().value;
        return Ok(Pass::Done);
    }
    Ok(Pass::Thrown)
}

fn loop_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let count = arg!(rt, f, 1);
    let body = arg!(rt, f, 2);
    let times = match count.payload {
        Payload::Logic(true) => i64::MAX,
        Payload::Logic(false) => 0,
        Payload::Integer(n) => n,
        Payload::Decimal(d) => d as i64,
        _ => return Err(rt.bad_arg(f, 1)),
    };
    let mut last = Cell::blank();
    let mut n = 0;
    while n < times {
        n += 1;
        let mut result = Cell::null();
        match loop_body_throws(rt, &mut result, &body)? {
            Pass::Thrown => return Ok(Bounce::Thrown),
            Pass::Broke => return Ok(Bounce::Null),
            Pass::Done => last = voidify_loop(result),
        }
    }
    out(rt, f, last)
}

fn while_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let condition = arg!(rt, f, 1);
    let body = arg!(rt, f, 2);
    let mut last = Cell::blank();
    loop {
        let mut test = Cell::null();
        if rt.do_block_throws(&mut test, &condition)? {
            return Ok(Bounce::Thrown);
        }
        if !rt.condition_true(&test)? {
            break;
        }
        let mut result = Cell::null();
        match loop_body_throws(rt, &mut result, &body)? {
            Pass::Thrown => return Ok(Bounce::Thrown),
            Pass::Broke => return Ok(Bounce::Null),
            Pass::Done => last = voidify_loop(result),
        }
    }
    out(rt, f, last)
}

/// A context holding the loop variables and a deep copy of `body` bound
/// into it. Both are guarded until the caller unguards.
fn loop_context(rt: &mut Runtime, words: &[SymId], body: &Cell) -> (SeriesId, Cell) {
    let ctx = rt.make_context(Kind::Object, words);
    let array = rt.array_of(body);
    let spec = rt.derive_specifier(body, None);
    let copy = rt.copy_array_deep(array, body.index(), spec);
    rt.bind_deep(copy, ctx, false);
    let bound = Cell::series(Kind::Block, copy, 0);
    rt.guard(&Cell::context(Kind::Object, ctx));
    rt.guard(&bound);
    (ctx, bound)
}

fn loop_vars(rt: &Runtime, vars: &Cell) -> Result<Vec<SymId>, Error> {
    if let Some(sym) = vars.word_sym().filter(|_| vars.kind.is_any_word()) {
        return Ok(vec![sym]);
    }
    let array = rt.array_of(vars);
    let mut syms = Vec::new();
    for cell in rt.heap.array(array).iter().skip(vars.index()) {
        match cell.word_sym() {
            Some(s) if cell.kind.is_any_word() => syms.push(s),
            _ => fail!(error::invalid_arg(&rt.mold(cell))),
        }
    }
    if syms.is_empty() {
        fail!(error::invalid_arg(&rt.mold(vars)))
    }
    Ok(syms)
}

fn repeat(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let word = arg!(rt, f, 1);
    let value = arg!(rt, f, 2);
    let body = arg!(rt, f, 3);
    let syms = loop_vars(rt, &word)?;
    let mark = rt.guards.len();
    let (ctx, bound) = loop_context(rt, &syms, &body);
    let result = repeat_bound(rt, ctx, &bound, &value);
    rt.unguard_to(mark);
    match result? {
        Some(last) => out(rt, f, last),
        None if rt.thrown.is_some() => Ok(Bounce::Thrown),
        None => Ok(Bounce::Null),
    }
}

/// Returns `None` on BREAK or on a throw (told apart by `Runtime::thrown`).
fn repeat_bound(rt: &mut Runtime, ctx: SeriesId, body: &Cell, value: &Cell) -> Result<Option<Cell>, Error> {
    let slot = VarRef { ctx, index: 1 };
    let mut last = Cell::blank();
    let total = match value.payload {
        Payload::Integer(n) => n,
        Payload::Decimal(d) => d as i64,
        _ => 0,
    };
    let mut i = 0i64;
    loop {
        let item = if value.kind.is_any_series() {
            let len = rt.heap.len(rt.array_of(value));
            let at = value.index() + i as usize;
            if at >= len {
                break;
            }
            let mut pos = value.clone();
            pos.set_index(at);
            rt.pick_value(&pos, &Cell::integer(1))?
        } else {
            if i >= total {
                break;
            }
            Cell::integer(i + 1)
        };
        i += 1;
        rt.write_var(slot, &item)?;
        let mut result = Cell::null();
        match loop_body_throws(rt, &mut result, body)? {
            Pass::Thrown | Pass::Broke => return Ok(None),
            Pass::Done => last = voidify_loop(result),
        }
    }
    Ok(Some(last))
}

fn for_each(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let vars = arg!(rt, f, 1);
    let data = arg!(rt, f, 2);
    let body = arg!(rt, f, 3);
    let syms = loop_vars(rt, &vars)?;
    let mark = rt.guards.len();
    let (ctx, bound) = loop_context(rt, &syms, &body);
    let result = for_each_bound(rt, ctx, syms.len(), &bound, &data);
    rt.unguard_to(mark);
    match result? {
        Some(last) => out(rt, f, last),
        None if rt.thrown.is_some() => Ok(Bounce::Thrown),
        None => Ok(Bounce::Null),
    }
}

fn for_each_bound(rt: &mut Runtime, ctx: SeriesId, width: usize, body: &Cell, data: &Cell) -> Result<Option<Cell>, Error> {
    let mut last = Cell::blank();
    let mut at = if data.kind.is_any_context() { 1 } else { data.index() };
    loop {
        let items: Vec<Cell> = if let Some(source) = data.varlist().filter(|_| data.kind.is_any_context()) {
            rt.check_accessible(source)?;
            if at > rt.context_len(source) {
                break;
            }
            let key = Cell::bound_word(Kind::Word, rt.key_sym(source, at), Binding::Specific(source), at as u32);
            let value = rt.heap.array(source)[at].clone();
            at += 1;
            vec![key, value]
        } else {
            let len = rt.heap.len(rt.array_of(data));
            if at >= len {
                break;
            }
            let mut pos = data.clone();
            pos.set_index(at);
            let mut items = Vec::with_capacity(width);
            for k in 0..width {
                let item = rt.pick_value(&pos, &Cell::integer(k as i64 + 1))?;
                items.push(if item.is_null() { Cell::blank() } else { item });
            }
            at += width;
            items
        };
        for (k, item) in items.into_iter().take(width).enumerate() {
            rt.write_var(VarRef { ctx, index: k + 1 }, &item)?;
        }
        let mut result = Cell::null();
        match loop_body_throws(rt, &mut result, body)? {
            Pass::Thrown | Pass::Broke => return Ok(None),
            Pass::Done => last = voidify_loop(result),
        }
    }
    Ok(Some(last))
}

fn break_native(rt: &mut Runtime, _f: FrameId) -> Result<Bounce, Error> {
    let label = Cell::action(rt.specials().brk, Binding::Unbound);
    rt.init_thrown(label, Cell::null());
    Ok(Bounce::Thrown)
}

fn continue_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = voidify(arg!(rt, f, 1));
    let label = Cell::action(rt.specials().cont, Binding::Unbound);
    rt.init_thrown(label, value);
    Ok(Bounce::Thrown)
}

fn catch(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let block = arg!(rt, f, 1);
    let (named, names) = (rt.refine(f, 2), arg!(rt, f, 3));
    let (quit, any) = (rt.refine(f, 4), rt.refine(f, 5));
    if named && any {
        fail!(Script, "bad-refines", "incompatible refinements: /name and /any")
    }
    let mut result = Cell::null();
    if !rt.do_block_throws(&mut result, &block)? {
        return Ok(Bounce::Null);
    }
    let label = match rt.thrown_label() {
        Some(l) => l.clone(),
        None => return Ok(Bounce::Thrown),
    };
    let is_quit = label.as_action() == Some(rt.specials().quit);
    let caught = if is_quit {
        quit
    } else if any {
        true
    } else if named {
        if names.is(Kind::Block) {
            let array = rt.array_of(&names);
            let candidates: Vec<Cell> = rt.heap.array(array).iter().skip(names.index()).cloned().collect();
            candidates.iter().any(|c| rt.equal_values(c, &label, false))
        } else {
            rt.equal_values(&names, &label, false)
        }
    } else {
        label.is_blank()
    };
    if !caught {
        return Ok(Bounce::Thrown);
    }
    let thrown = rt.take_thrown();
    debug!(label = %rt.mold(&thrown.label), "caught");
    if named || any {
        let mut pair = vec![thrown.label];
        if !thrown.value.is_null() {
            pair.push(thrown.value);
        }
        let block = rt.block_cell(Kind::Block, pair);
        return out(rt, f, block);
    }
    out(rt, f, thrown.value)
}

fn throw(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let label = if rt.refine(f, 2) { arg!(rt, f, 3) } else { Cell::blank() };
    rt.init_thrown(label, value);
    Ok(Bounce::Thrown)
}

fn quit(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = if rt.refine(f, 1) { arg!(rt, f, 2) } else { Cell::void() };
    let label = Cell::action(rt.specials().quit, Binding::Unbound);
    rt.init_thrown(label, value);
    Ok(Bounce::Thrown)
}

fn halt(_rt: &mut Runtime, _f: FrameId) -> Result<Bounce, Error> { fail!(error::halted()) }

/// Varlist of the frame an UNWIND or REDO aims at: a FRAME! value, the
/// nearest frame running an action, or a count of action frames upward.
fn target_varlist(rt: &Runtime, f: FrameId, level: &Cell) -> Result<SeriesId, Error> {
    let found = match level.payload {
        Payload::Context { varlist, .. } => rt.frame_of_varlist(varlist).map(|_| varlist),
        Payload::Action(a) => (0..f)
            .rev()
            .find(|&i| rt.frames[i].varlist.is_some() && (rt.frames[i].original == Some(a) || rt.frames[i].phase == Some(a)))
            .and_then(|i| rt.frames[i].varlist),
        Payload::Integer(n) if n > 0 => (0..f).rev().filter(|&i| rt.frames[i].varlist.is_some()).nth(n as usize - 1).and_then(|i| rt.frames[i].varlist),
        _ => None,
    };
    match found {
        Some(v) => Ok(v),
        None => fail!(error::invalid_arg(&rt.mold(level))),
    }
}

fn unwind(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let level = arg!(rt, f, 1);
    let target = target_varlist(rt, f, &level)?;
    let value = if rt.refine(f, 2) { arg!(rt, f, 3) } else { Cell::void() };
    let label = Cell::action(rt.specials().unwind, Binding::Specific(target));
    rt.init_thrown(label, value);
    Ok(Bounce::Thrown)
}

fn redo(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let restartee = arg!(rt, f, 1);
    let target = target_varlist(rt, f, &restartee)?;
    let sibling = if rt.refine(f, 2) {
        let sibling = arg!(rt, f, 3);
        let running = rt.frame_of_varlist(target).and_then(|t| rt.frames[t].original);
        let compatible = match (sibling.as_action(), running) {
            (Some(s), Some(r)) => rt.underlying_paramlist(s) == rt.underlying_paramlist(r),
            _ => false,
        };
        if !compatible {
            fail!(Script, "redo-other", "REDO/OTHER needs an action sharing the frame's parameters")
        }
        sibling
    } else {
        Cell::null()
    };
    let label = Cell::action(rt.specials().redo, Binding::Specific(target));
    rt.init_thrown(label, sibling);
    Ok(Bounce::Thrown)
}

/// Definitional RETURN: bound to the varlist of the call it returns from.
fn return_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let target = match rt.frames[f].binding {
        Binding::Specific(v) => v,
        _ => fail!(Script, "return-archetype", "RETURN used outside of a function body"),
    };
    let frame = match rt.frame_of_varlist(target) {
        Some(t) => t,
        None => fail!(error::series_data_freed()),
    };
    let mut value = arg!(rt, f, 1);
    if value.is_null() && value.has_flag(CELL_FLAG_ENDISH) {
        value = Cell::void();
    }
    rt.check_return_type(frame, &value)?;
    let label = Cell::action(rt.specials().unwind, Binding::Specific(target));
    rt.init_thrown(label, value);
    Ok(Bounce::Thrown)
}

fn fail_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let reason = arg!(rt, f, 1);
    let mut e = match reason.kind {
        Kind::Text if reason.quote == 0 => Error::user(rt.cell_text(&reason)),
        Kind::Error if reason.quote == 0 => rt.error_from_value(&reason)?,
        Kind::Word if reason.quote == 0 => {
            let id = rt.word_spelling(&reason);
            Error::new(error::Category::User, &id, id.clone())
        }
        Kind::Block if reason.quote == 0 => {
            let mut reduced = Cell::null();
            let array = rt.array_of(&reason);
            let spec = rt.derive_specifier(&reason, None);
            if rt.reduce_throws(&mut reduced, array, reason.index(), spec)? {
                return Ok(Bounce::Thrown);
            }
            Error::user(rt.form(&reduced))
        }
        _ => Error::user("failure".to_string()),
    };
    if let Some(caller) = (0..f).rev().find(|&i| rt.frames[i].original.is_some() && rt.frames[i].label.is_some()) {
        e = e.with_where(&rt.frame_label(caller));
    }
    Err(e)
}

fn trap(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let code = arg!(rt, f, 1);
    let outcome = rt.trap(|rt| {
        let mut result = Cell::null();
        rt.do_block_throws(&mut result, &code)
    });
    match outcome {
        Ok(true) => Ok(Bounce::Thrown),
        Ok(false) => Ok(Bounce::Null),
        Err(e) => {
            let value = rt.error_to_value(&e);
            out(rt, f, value)
        }
    }
}

fn comment(_rt: &mut Runtime, _f: FrameId) -> Result<Bounce, Error> { Ok(Bounce::Invisible) }

fn elide(_rt: &mut Runtime, _f: FrameId) -> Result<Bounce, Error> { Ok(Bounce::Invisible) }

fn do_native(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let source = arg!(rt, f, 1);
    if source.is_null() {
        return Ok(Bounce::Null);
    }
    let mut result = Cell::null();
    let threw = match source.kind {
        _ if source.quote != 0 => return Err(rt.bad_arg(f, 1)),
        Kind::Block | Kind::Group => rt.do_block_throws(&mut result, &source)?,
        Kind::Text => {
            let text = rt.cell_text(&source);
            let block = rt.load(&text)?;
            rt.eval_array_at_throws(&mut result, block, 0, None, 0)?
        }
        Kind::Frame => rt.do_frame_throws(&mut result, &source)?,
        Kind::Action => match source.as_action() {
            Some(a) => rt.apply_throws(&mut result, a, source.binding, None, vec![])?,
            None => return Err(rt.bad_arg(f, 1)),
        },
        _ => return Err(rt.bad_arg(f, 1)),
    };
    if threw {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, result)
}

/// Evaluate the argument as if it had been written in place of EVAL: an
/// action found this way takes its own arguments from the callsite.
fn eval(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let feed = rt.frames[f].feed;
    let sub = rt.push_frame(feed, 0)?;
    let threw = rt.run_steps(sub, Step::Reevaluate { current: value, gotten: None })?;
    let frame = rt.drop_frame(sub);
    if threw {
        return Ok(Bounce::Thrown);
    }
    if frame.out.is_end() {
        return Ok(Bounce::Null);
    }
    out(rt, f, frame.out)
}

fn evaluate(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let source = arg!(rt, f, 1);
    let array = rt.array_of(&source);
    let spec = rt.derive_specifier(&source, None);
    if source.index() >= rt.heap.len(array) {
        return Ok(Bounce::Null);
    }
    let mut value = Cell::null();
    let (threw, next) = rt.eval_step_at_throws(&mut value, array, source.index(), spec)?;
    if threw {
        return Ok(Bounce::Thrown);
    }
    if rt.refine(f, 2) {
        let var = arg!(rt, f, 3);
        let stored = if value.is_end() { Cell::null() } else { value };
        rt.set_var(&var, None, &stored)?;
    }
    let mut position = source;
    position.set_index(next);
    out(rt, f, position)
}

fn reduce(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    if !(value.is(Kind::Block) || value.is(Kind::Group)) {
        return out(rt, f, value);
    }
    let array = rt.array_of(&value);
    let spec = rt.derive_specifier(&value, None);
    let mut result = Cell::null();
    if rt.reduce_throws(&mut result, array, value.index(), spec)? {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, result)
}

fn compose(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let (deep, only) = (rt.refine(f, 2), rt.refine(f, 3));
    match compose_throws(rt, &value, deep, only)? {
        Some(composed) => out(rt, f, composed),
        None => Ok(Bounce::Thrown),
    }
}

/// New array of the same kind with each GROUP! replaced by its result.
/// Block results are spliced unless `only`; null results vanish.
fn compose_throws(rt: &mut Runtime, value: &Cell, deep: bool, only: bool) -> Result<Option<Cell>, Error> {
    let array = rt.array_of(value);
    let spec = rt.derive_specifier(value, None);
    let cells: Vec<Cell> = rt.heap.array(array).iter().skip(value.index()).cloned().collect();
    let mut items = Vec::with_capacity(cells.len());
    for cell in cells {
        let cell = rt.derelativize(&cell, spec);
        let newline = cell.has_flag(CELL_FLAG_NEWLINE_BEFORE);
        if cell.is(Kind::Group) {
            let mut result = Cell::null();
            if rt.do_block_throws(&mut result, &cell)? {
                return Ok(None);
            }
            if result.is_null() {
                continue;
            }
            if result.is(Kind::Block) && !only {
                let inner = rt.array_of(&result);
                let spliced: Vec<Cell> = rt.heap.array(inner).iter().skip(result.index()).cloned().collect();
                let inner_spec = rt.derive_specifier(&result, None);
                for c in spliced {
                    items.push(rt.derelativize(&c, inner_spec));
                }
                continue;
            }
            let mut item = result.copied();
            item.clear_flag(CELL_FLAG_UNEVALUATED | CELL_FLAG_NEWLINE_BEFORE);
            if newline {
                item.set_flag(CELL_FLAG_NEWLINE_BEFORE);
            }
            items.push(item);
            continue;
        }
        if deep && cell.quote == 0 && cell.kind.is_any_array() {
            match compose_throws(rt, &cell, deep, only)? {
                Some(mut inner) => {
                    if newline {
                        inner.set_flag(CELL_FLAG_NEWLINE_BEFORE);
                    }
                    items.push(inner);
                }
                None => return Ok(None),
            }
            continue;
        }
        items.push(cell);
    }
    Ok(Some(rt.block_cell(value.kind, items)))
}

fn get(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let source = arg!(rt, f, 1);
    let any = rt.refine(f, 2);
    let value = match source.kind {
        k if k.is_any_word() => rt.get_var(&source, None)?,
        k if k.is_any_path() => {
            let mut result = Cell::null();
            if rt.get_path_throws(&mut result, &source, None, PATH_FLAG_NO_GROUPS)? {
                return Ok(Bounce::Thrown);
            }
            result
        }
        _ => {
            let array = rt.array_of(&source);
            let spec = rt.derive_specifier(&source, None);
            let words: Vec<Cell> = rt.heap.array(array).iter().skip(source.index()).cloned().collect();
            let mut values = Vec::with_capacity(words.len());
            for w in words {
                let w = rt.derelativize(&w, spec);
                if !w.kind.is_any_word() || w.quote != 0 {
                    fail!(error::invalid_arg(&rt.mold(&w)))
                }
                let v = rt.get_var(&w, None)?;
                values.push(if v.is_null() { Cell::blank() } else { v });
            }
            rt.block_cell(Kind::Block, values)
        }
    };
    if value.is_void() && !any {
        fail!(error::need_non_void(&rt.mold(&source)))
    }
    out(rt, f, value)
}

fn set(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let target = arg!(rt, f, 1);
    let value = arg!(rt, f, 2);
    match target.kind {
        k if k.is_any_word() => rt.set_var(&target, None, &value)?,
        k if k.is_any_path() => {
            if rt.set_path_throws(&target, None, &value, PATH_FLAG_NO_GROUPS)? {
                return Ok(Bounce::Thrown);
            }
        }
        _ => rt.set_block(&target, None, &value)?,
    }
    out(rt, f, value)
}

fn lit(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    out(rt, f, value)
}

fn depth_arg(rt: &Runtime, f: FrameId) -> Result<u32, Error> {
    if !rt.refine(f, 2) {
        return Ok(1);
    }
    match rt.arg(f, 3).as_integer() {
        Some(n) if n >= 0 => Ok(n as u32),
        _ => Err(rt.bad_arg(f, 3)),
    }
}

fn quote(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let mut value = arg!(rt, f, 1);
    if value.is_null() {
        fail!(error::need_non_null("quote"))
    }
    let depth = depth_arg(rt, f)?;
    quotify(&mut rt.heap, &mut value, depth);
    out(rt, f, value)
}

fn unquote(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let mut value = arg!(rt, f, 1);
    let depth = depth_arg(rt, f)?;
    if quote_depth(&value) < depth {
        fail!(error::invalid_arg(&rt.mold(&value)))
    }
    unquotify(&rt.heap, &mut value, depth);
    out(rt, f, value)
}

fn null(_rt: &mut Runtime, _f: FrameId) -> Result<Bounce, Error> { Ok(Bounce::Null) }

fn void(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { out(rt, f, Cell::void()) }

#[cfg(test)]
mod test_control {
    use crate::interpreter::core::*;

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_conditionals() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "if false [1]"), "null");
        assert_eq!(run(&mut rt, "either 1 > 2 [\"big\"] [\"small\"]"), "\"small\"");
        assert_eq!(run(&mut rt, "either true [null] [1]"), "null");
        assert_eq!(run(&mut rt, "if true [null] else [2]"), "#[void]");
        assert_eq!(run(&mut rt, "null then [1]"), "null");
        assert_eq!(run(&mut rt, "10 also [20]"), "10");
        assert_eq!(run(&mut rt, "if #[void] [1]"), "error: void-evaluation");
        assert_eq!(run(&mut rt, "v: '#[void] if :v [1]"), "error: expect-arg");
    }

    #[test]
    fn test_all_any_case() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "all [1 2 3]"), "3");
        assert_eq!(run(&mut rt, "all [1 false 3]"), "null");
        assert_eq!(run(&mut rt, "all [1 elide 2]"), "1");
        assert_eq!(run(&mut rt, "any [null false 5]"), "5");
        assert_eq!(run(&mut rt, "any [null _]"), "null");
        assert_eq!(run(&mut rt, "case [1 > 2 [\"a\"] 2 > 1 [\"b\"]]"), "\"b\"");
        assert_eq!(run(&mut rt, "case [false [1] 10 + 20]"), "30");
        assert_eq!(run(&mut rt, "n: 0 case/all [true [n: n + 1] true [n: n + 10]] n"), "11");
        assert_eq!(run(&mut rt, "case [false <tag>]"), "error: invalid-type");
    }

    #[test]
    fn test_loops_and_break() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "n: 0 loop 5 [n: n + 1] n"), "5");
        assert_eq!(run(&mut rt, "loop 0 [1]"), "_");
        assert_eq!(run(&mut rt, "loop 3 [null]"), "#[void]");
        assert_eq!(run(&mut rt, "n: 0 loop 10 [n: n + 1 if n = 3 [break]]"), "null");
        assert_eq!(run(&mut rt, "n: 0 while [n < 4] [n: n + 1]"), "4");
        assert_eq!(run(&mut rt, "sum: 0 repeat i 4 [sum: sum + i] sum"), "10");
        assert_eq!(run(&mut rt, "out: [] for-each x [a b c] [append out x] out"), "[a b c]");
        assert_eq!(run(&mut rt, "out: [] for-each [k v] [a 1 b 2] [append out v] out"), "[1 2]");
        assert_eq!(run(&mut rt, "n: 0 for-each x [1 2 3 4] [if odd? x [continue] n: n + x] n"), "6");
    }

    #[test]
    fn test_loop_variables_do_not_leak() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "i: 100 repeat i 3 [i] i"), "100");
    }

    #[test]
    fn test_catch_and_throw() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "catch [throw 10 20]"), "10");
        assert_eq!(run(&mut rt, "catch [1 + 2]"), "null");
        assert_eq!(run(&mut rt, "catch/name [throw/name 5 'five] 'five"), "[five 5]");
        assert_eq!(run(&mut rt, "catch [catch/name [throw 1] 'other]"), "1");
        assert_eq!(run(&mut rt, "throw 1"), "error: no-catch");
        assert_eq!(run(&mut rt, "quit/with 7 8"), "7");
    }

    #[test]
    fn test_return_and_unwind() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("early: func [x] [if x > 0 [return \"positive\"] \"other\"]").unwrap();
        assert_eq!(run(&mut rt, "early 1"), "\"positive\"");
        assert_eq!(run(&mut rt, "early -1"), "\"other\"");
        rt.run("typed: func [return: [integer!] x] [return x]").unwrap();
        assert_eq!(run(&mut rt, "typed 1"), "1");
        assert_eq!(run(&mut rt, "typed \"no\""), "error: bad-return-type");
        rt.run("outer: func [] [inner 10 20] inner: func [x] [unwind :outer x]").unwrap();
        assert_eq!(run(&mut rt, "outer"), "#[void]");
        rt.run("outer: func [] [inner 10 20] inner: func [x] [unwind/with :outer x]").unwrap();
        assert_eq!(run(&mut rt, "outer"), "10");
    }

    #[test]
    fn test_redo_restarts_with_updated_args() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("count-up: func [n] [if n < 5 [n: n + 1 redo :count-up] n]").unwrap();
        assert_eq!(run(&mut rt, "count-up 1"), "5");
    }

    #[test]
    fn test_fail_and_trap() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let e = rt.run("checker: func [] [fail \"bad thing\"] checker").unwrap_err();
        assert_eq!(e.message, "bad thing");
        assert_eq!(e.where_.as_deref(), Some("checker"));
        assert_eq!(run(&mut rt, "trap [1 + 2]"), "null");
        assert_eq!(run(&mut rt, "e: trap [1 / 0] e/id"), "zero-divide");
        assert_eq!(run(&mut rt, "e: trap [fail [\"x is\" 1 + 1]] e/message"), "\"x is 2\"");
        assert_eq!(run(&mut rt, "catch [trap [throw 3]]"), "3");
    }

    #[test]
    fn test_evaluation_natives() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "do [1 + 2]"), "3");
        assert_eq!(run(&mut rt, "do \"3 * 3\""), "9");
        assert_eq!(run(&mut rt, "do _"), "null");
        assert_eq!(run(&mut rt, "eval :add 1 2"), "3");
        assert_eq!(run(&mut rt, "pos: evaluate/set [1 + 2 10] 'r reduce [r pos]"), "[3 [10]]");
        assert_eq!(run(&mut rt, "evaluate []"), "null");
        assert_eq!(run(&mut rt, "reduce [1 + 1 null 3]"), "[2 _ 3]");
        assert_eq!(run(&mut rt, "compose [1 (1 + 1) ([3 4]) (null)]"), "[1 2 3 4]");
        assert_eq!(run(&mut rt, "compose/only [([a b])]"), "[[a b]]");
        assert_eq!(run(&mut rt, "compose/deep [x [(2 * 5)]]"), "[x [10]]");
    }

    #[test]
    fn test_get_set_and_quoting() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "set 'v 12 get 'v"), "12");
        assert_eq!(run(&mut rt, "set [a b] [1 2] get [a b]"), "[1 2]");
        assert_eq!(run(&mut rt, "lit (1 + 2)"), "(1 + 2)");
        assert_eq!(run(&mut rt, "quote/depth 'x 2"), "''x");
        assert_eq!(run(&mut rt, "unquote first [''x]"), "'x");
        assert_eq!(run(&mut rt, "unquote 1"), "error: invalid-arg");
        assert_eq!(run(&mut rt, "null? null"), "#[true]");
    }
}
