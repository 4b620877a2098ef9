use tracing::debug;

use crate::interpreter::core::action::{Bounce, Dispatcher};
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Category, Error};
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::Runtime;
use crate::interpreter::parse;
use crate::fail;

pub mod control;
pub mod data;
pub mod function;
pub mod math;
pub mod series;

/// One library action implemented in Rust. `spec` is scanned like a FUNC
/// spec, without a definitional RETURN.
pub struct Native {
    pub name: &'static str,
    pub spec: &'static str,
    pub dispatcher: Dispatcher,
    pub enfix: bool,
}

/// Fields of an ERROR! context, in slot order.
const ERROR_FIELDS: [&str; 5] = ["type", "id", "message", "where", "near"];

/// Install every native into the library context, then the generated
/// `integer?`-style type checkers.
pub fn register(rt: &mut Runtime) -> Result<(), Error> {
    let tables: [&[Native]; 6] = [math::NATIVES, control::NATIVES, function::NATIVES, series::NATIVES, data::NATIVES, parse::NATIVES];
    let mut count = 0;
    for table in tables {
        for native in table {
            define_native(rt, native.name, native.spec, native.dispatcher, vec![], native.enfix)?;
            count += 1;
        }
    }
    for kind in KINDS.iter().copied() {
        if matches!(kind, Kind::End | Kind::Null) {
            continue;
        }
        let name = format!("{}?", kind.name().trim_end_matches('!'));
        define_native(rt, &name, "value [<opt> any-value! void!]", type_checker, vec![Cell::datatype(kind)], false)?;
        count += 1;
    }
    debug!(count, "natives registered");
    Ok(())
}

fn define_native(rt: &mut Runtime, name: &str, spec: &str, dispatcher: Dispatcher, details: Vec<Cell>, enfix: bool) -> Result<(), Error> {
    let block = rt.scan(spec)?;
    let paramlist = rt.make_paramlist(block, 0, false)?;
    let action = rt.make_action(paramlist, dispatcher, details, None);
    let mut value = Cell::action(action, Binding::Unbound);
    if enfix {
        value.set_flag(CELL_FLAG_ENFIXED);
    }
    rt.lib_define(name, value);
    Ok(())
}

fn type_checker(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let wanted = match rt.frames[f].phase.map(|phase| &rt.details(phase)[0].payload) {
        Some(Payload::Datatype(k)) => *k,
        _ => fail!(Internal, "bad-checker", "type checker without a datatype"),
    };
    let arg = rt.arg(f, 1);
    let matches = !arg.is_null() && arg.type_kind() == wanted;
    rt.set_out(f, Cell::logic(matches));
    Ok(Bounce::Out)
}

impl Runtime {
    /// The `expect-arg` error for argument `n` of the running native.
    pub fn bad_arg(&self, f: FrameId, n: usize) -> Error {
        let name = match self.frames[f].phase {
            Some(phase) => {
                let paramlist = self.underlying_paramlist(phase);
                self.param_name(&self.param(paramlist, n))
            }
            None => String::new(),
        };
        let arg = self.arg(f, n);
        let kind = if arg.is_null() { "null" } else { arg.type_kind().name() };
        error::expect_arg(&self.frame_label(f), &name, kind)
    }

    /// Run a branch the way IF and friends do. A block is evaluated, an
    /// action is called with `condition` if it takes an argument, and a
    /// quoted value gives itself one level less quoted.
    pub fn do_branch_throws(&mut self, out: &mut Cell, branch: &Cell, condition: &Cell) -> Result<bool, Error> {
        if branch.is_quoted() {
            let mut value = branch.clone();
            unquotify(&self.heap, &mut value, 1);
            value.clear_flag(CELL_FLAG_UNEVALUATED);
            *out = value;
            return Ok(false);
        }
        if branch.is(Kind::Block) || branch.is(Kind::Group) {
            return self.do_block_throws(out, branch);
        }
        if let Some(action) = branch.as_action() {
            let args = match self.first_unspecialized_param(action) {
                Some(_) => vec![condition.clone()],
                None => vec![],
            };
            return self.apply_throws(out, action, branch.binding, None, args);
        }
        fail!(error::invalid_type(branch.type_kind().name()))
    }

    /// Truthiness of a condition argument. VOID! and literal blocks are
    /// rejected as conditions.
    pub fn condition_true(&self, condition: &Cell) -> Result<bool, Error> {
        if condition.is_void() {
            fail!(error::need_non_void("condition"))
        }
        if condition.is(Kind::Block) && condition.has_flag(CELL_FLAG_UNEVALUATED) {
            fail!(Script, "block-conditional", "literal block used as a conditional")
        }
        Ok(condition.is_truthy())
    }

    /// An ERROR! context holding the fields of `e`.
    pub fn error_to_value(&mut self, e: &Error) -> Cell {
        let keys: Vec<_> = ERROR_FIELDS.iter().map(|k| self.symbols.intern(k)).collect();
        let ctx = self.make_context(Kind::Error, &keys);
        let vars = vec![
            self.word(Kind::Word, e.category.name()),
            self.word(Kind::Word, &e.id),
            self.text_cell(Kind::Text, &e.message),
            match e.where_ {
                Some(ref w) => self.word(Kind::Word, w),
                None => Cell::blank(),
            },
            match e.near {
                Some(ref n) => self.text_cell(Kind::Text, n),
                None => Cell::blank(),
            },
        ];
        for (i, v) in vars.into_iter().enumerate() {
            self.heap.array_mut(ctx)[i + 1] = v;
        }
        Cell::context(Kind::Error, ctx)
    }

    /// Recover a raisable error from an ERROR! context. Missing fields fall
    /// back to a user error.
    pub fn error_from_value(&self, value: &Cell) -> Result<Error, Error> {
        let ctx = match value.varlist() {
            Some(c) if value.is(Kind::Error) => c,
            _ => fail!(error::invalid_arg(&self.mold(value))),
        };
        self.check_accessible(ctx)?;
        let field = |name: &str| -> Option<Cell> {
            let sym = self.symbols.lookup(name)?;
            self.context_var(ctx, sym).filter(|c| !c.is_null() && !c.is_blank()).cloned()
        };
        let category = field("type").map(|c| Category::from_name(&self.form(&c))).unwrap_or(Category::User);
        let id = field("id").map(|c| self.form(&c)).unwrap_or_else(|| "user".to_string());
        let message = field("message").map(|c| self.form(&c)).unwrap_or_default();
        let mut e = Error::new(category, &id, message);
        if let Some(w) = field("where") {
            e = e.with_where(&self.form(&w));
        }
        if let Some(n) = field("near") {
            e = e.with_near(self.form(&n));
        }
        Ok(e)
    }
}

#[cfg(test)]
mod test_natives {
    use crate::interpreter::core::*;

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_type_checkers_are_generated() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "integer? 1"), "#[true]");
        assert_eq!(run(&mut rt, "integer? 1.5"), "#[false]");
        assert_eq!(run(&mut rt, "block? [a]"), "#[true]");
        assert_eq!(run(&mut rt, "quoted? first ['a]"), "#[true]");
        assert_eq!(run(&mut rt, "text? null"), "#[false]");
        assert_eq!(run(&mut rt, "void? print []"), "#[true]");
    }

    #[test]
    fn test_branch_kinds() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "if true [1 + 1]"), "2");
        rt.run("double: func [x] [x * 2]").unwrap();
        assert_eq!(run(&mut rt, "if 10 :double"), "20");
        assert_eq!(run(&mut rt, "if true 'word"), "word");
        assert_eq!(run(&mut rt, "if true [null]"), "#[void]");
        assert_eq!(run(&mut rt, "if [x] [1]"), "error: block-conditional");
    }

    #[test]
    fn test_error_values_round_trip() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let e = Error::script("no-value", "x has no value".to_string()).with_where("print");
        let value = rt.error_to_value(&e);
        let back = rt.error_from_value(&value).unwrap();
        assert_eq!(back.category, error::Category::Script);
        assert!(back.is("no-value"));
        assert_eq!(back.where_.as_deref(), Some("print"));
    }
}
