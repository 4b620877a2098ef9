use tracing::info;

use crate::interpreter::core::action::Bounce;
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::series::{Series, SeriesId, SERIES_FLAG_MANAGED, SERIES_FLAG_PROTECTED};
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::Runtime;
use crate::interpreter::natives::Native;
use crate::{arg, fail, native};

pub const NATIVES: &[Native] = &[
    native!("make", "type [<opt> any-value!] def [<opt> any-value!]", make),
    native!("to", "type [datatype!] value [any-value!]", to),
    native!("context", "spec [block!]", context),
    native!(enfix "of", ":property [word!] value [<opt> any-value! void!]", of),
    native!("type-of", "value [<opt> any-value! void!]", type_of),
    native!("null?", "value [<opt> any-value! void!]", null_q),
    native!("value?", "value [<opt> any-value! void!]", value_q),
    native!("set?", "var [any-word!]", set_q),
    native!("protect", "value [any-word! any-series! any-context!]", protect),
    native!("unprotect", "value [any-word! any-series! any-context!]", unprotect),
    native!("recycle", "", recycle),
    native!("print", "line [<opt> any-value!]", print),
    native!("probe", "value [<opt> any-value! void!]", probe),
    native!("mold", "value [<opt> any-value! void!] /only", mold),
    native!("form", "value [<opt> any-value! void!]", form),
    native!("spaced", "line [block!]", spaced),
    native!("unspaced", "line [block!]", unspaced),
];

fn out(rt: &mut Runtime, f: FrameId, value: Cell) -> Result<Bounce, Error> {
    rt.set_out(f, value);
    Ok(Bounce::Out)
}

impl Runtime {
    /// Bind a copy of `body` into `ctx`, adding its top level set-words as
    /// keys, then run it. Returns true if the body threw.
    pub fn run_in_context_throws(&mut self, ctx: SeriesId, body: &Cell) -> Result<bool, Error> {
        let array = self.array_of(body);
        let spec = self.derive_specifier(body, None);
        let copy = self.copy_array_deep(array, body.index(), spec);
        let set_words: Vec<SymId> = self.heap.array(copy).iter().filter(|c| c.is(Kind::SetWord)).filter_map(|c| c.word_sym()).collect();
        for sym in set_words {
            if self.find_key(ctx, sym).is_none() {
                self.append_key(ctx, sym, Cell::null());
            }
        }
        self.bind_deep(copy, ctx, false);
        let mark = self.guard(&Cell::context(self.context_kind(ctx), ctx));
        let code = Cell::series(Kind::Block, copy, 0);
        self.guard(&code);
        let mut discarded = Cell::null();
        let threw = self.do_block_throws(&mut discarded, &code);
        self.unguard_to(mark);
        threw
    }

    /// Conversion as TO does it. Conversions that lose meaning fail with
    /// `bad-make`.
    pub fn to_value(&mut self, kind: Kind, value: &Cell) -> Result<Cell, Error> {
        let bad = |rt: &Runtime| error::bad_make(kind.name(), &rt.mold(value));
        if value.quote != 0 {
            return Err(bad(self));
        }
        let converted = match kind {
            Kind::Integer => match value.payload {
                Payload::Integer(i) => Cell::integer(i),
                Payload::Decimal(d) => Cell::integer(d.trunc() as i64),
                Payload::Char(c) => Cell::integer(c as i64),
                Payload::Logic(b) => Cell::integer(b as i64),
                _ if value.kind.is_any_string() => {
                    let s = self.cell_text(value);
                    match s.trim().parse::<i64>() {
                        Ok(i) => Cell::integer(i),
                        Err(_) => return Err(bad(self)),
                    }
                }
                _ => return Err(bad(self)),
            },
            Kind::Decimal | Kind::Percent => {
                let d = match value.payload {
                    Payload::Integer(i) => i as f64,
                    Payload::Decimal(d) => d,
                    _ if value.kind.is_any_string() => match self.cell_text(value).trim().parse::<f64>() {
                        Ok(d) => d,
                        Err(_) => return Err(bad(self)),
                    },
                    _ => return Err(bad(self)),
                };
                let mut c = Cell::decimal(d);
                c.kind = kind;
                c
            }
            Kind::Char => match value.payload {
                Payload::Char(c) => Cell::char(c),
                Payload::Integer(i) => match u32::try_from(i).ok().and_then(char::from_u32) {
                    Some(c) => Cell::char(c),
                    None => fail!(error::out_of_range(&i.to_string())),
                },
                _ if value.kind.is_any_string() => match self.cell_text(value).chars().next() {
                    Some(c) => Cell::char(c),
                    None => return Err(bad(self)),
                },
                _ => return Err(bad(self)),
            },
            Kind::Logic => Cell::logic(value.is_truthy()),
            k if k.is_any_string() => {
                let s = if value.kind.is_any_string() { self.cell_text(value) } else { self.form(value) };
                self.text_cell(k, &s)
            }
            k if k.is_any_word() => {
                let sym = match value.word_sym() {
                    Some(s) if value.kind.is_any_word() => s,
                    _ if value.kind.is_any_string() => {
                        let s = self.cell_text(value);
                        if s.is_empty() || s.chars().any(|c| c.is_whitespace() || "[]()\"".contains(c)) {
                            return Err(bad(self));
                        }
                        self.symbols.intern(&s)
                    }
                    _ => return Err(bad(self)),
                };
                Cell::word(k, sym)
            }
            k if k.is_any_array() => {
                let items = if value.kind.is_any_array() {
                    let array = self.array_of(value);
                    let spec = self.derive_specifier(value, None);
                    let cells: Vec<Cell> = self.heap.array(array).iter().skip(value.index()).cloned().collect();
                    cells.iter().map(|c| self.derelativize(c, spec)).collect()
                } else if value.is(Kind::Text) {
                    let source = self.cell_text(value);
                    let loaded = self.load(&source)?;
                    self.heap.array(loaded).clone()
                } else {
                    vec![value.copied()]
                };
                self.block_cell(k, items)
            }
            Kind::Binary => {
                let bytes = match value.payload {
                    Payload::Integer(i) => i.to_be_bytes().to_vec(),
                    _ if value.kind.is_any_string() => self.cell_text(value).into_bytes(),
                    _ if value.is(Kind::Binary) => {
                        let id = self.array_of(value);
                        self.heap.binary(id)[value.index().min(self.heap.len(id))..].to_vec()
                    }
                    _ => return Err(bad(self)),
                };
                let mut s = Series::binary(bytes);
                s.flags |= SERIES_FLAG_MANAGED;
                Cell::series(Kind::Binary, self.heap.alloc(s), 0)
            }
            Kind::Datatype => Cell::datatype(value.type_kind()),
            _ => return Err(bad(self)),
        };
        Ok(converted)
    }

    /// An ERROR! built from a text message or a block of field settings.
    fn make_error(&mut self, def: &Cell) -> Result<Option<Cell>, Error> {
        if def.is(Kind::Text) {
            let message = self.cell_text(def);
            return Ok(Some(self.error_to_value(&Error::user(message))));
        }
        if !def.is(Kind::Block) {
            fail!(error::bad_make("error!", &self.mold(def)))
        }
        let value = self.error_to_value(&Error::user(String::new()));
        let ctx = match value.varlist() {
            Some(c) => c,
            None => fail!(Internal, "bad-error", "error value without a context"),
        };
        if self.run_in_context_throws(ctx, def)? {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// VARARGS! over the items of a block, taken literally.
    fn make_varargs(&mut self, def: &Cell) -> Cell {
        let array = self.array_of(def);
        let spec = self.derive_specifier(def, None);
        let len = self.heap.len(array);
        let copy = self.copy_array_shallow(array, def.index(), len, spec);
        let mut holder = Series::array(vec![Cell::series(Kind::Block, copy, 0)]);
        holder.flags |= SERIES_FLAG_MANAGED;
        let holder = self.heap.alloc(holder);
        Cell::new(Kind::Varargs, Payload::Varargs(Varargs::Array { holder, param: None, index: 0 }))
    }

    /// The context a word is bound into, as a value.
    fn binding_of(&mut self, word: &Cell) -> Cell {
        match word.binding {
            Binding::Specific(ctx) if self.heap.is_live(ctx) => match self.frame_of_varlist(ctx) {
                Some(fr) if self.frames[fr].varlist == Some(ctx) => self.frame_value(fr),
                _ => Cell::context(self.context_kind(ctx), ctx),
            },
            _ => Cell::null(),
        }
    }

    fn words_of(&mut self, value: &Cell) -> Result<Cell, Error> {
        if let Some(action) = value.as_action() {
            let params = self.param_words(action);
            let mut words = Vec::with_capacity(params.len());
            for (sym, class) in params {
                let word = match class {
                    ParamClass::Refinement => {
                        let refinement = vec![Cell::blank(), Cell::word(Kind::Word, sym)];
                        self.block_cell(Kind::Path, refinement)
                    }
                    ParamClass::HardQuote => Cell::word(Kind::GetWord, sym),
                    ParamClass::SoftQuote => {
                        let mut w = Cell::word(Kind::Word, sym);
                        quotify(&mut self.heap, &mut w, 1);
                        w
                    }
                    _ => Cell::word(Kind::Word, sym),
                };
                words.push(word);
            }
            return Ok(self.block_cell(Kind::Block, words));
        }
        match value.varlist().filter(|_| value.kind.is_any_context()) {
            Some(ctx) => {
                self.check_accessible(ctx)?;
                let words: Vec<Cell> = (1..=self.context_len(ctx)).map(|i| Cell::word(Kind::Word, self.key_sym(ctx, i))).collect();
                Ok(self.block_cell(Kind::Block, words))
            }
            None => fail!(error::cannot_reflect(value.type_kind().name(), "words")),
        }
    }

    fn values_of(&mut self, value: &Cell) -> Result<Cell, Error> {
        match value.varlist().filter(|_| value.kind.is_any_context()) {
            Some(ctx) => {
                self.check_accessible(ctx)?;
                let values: Vec<Cell> = (1..=self.context_len(ctx))
                    .map(|i| {
                        let v = &self.heap.array(ctx)[i];
                        if v.is_null() {
                            Cell::blank()
                        } else {
                            v.copied()
                        }
                    })
                    .collect();
                Ok(self.block_cell(Kind::Block, values))
            }
            None => fail!(error::cannot_reflect(value.type_kind().name(), "values")),
        }
    }

    /// Form the items of a block, reduced, skipping blanks.
    fn delimit_throws(&mut self, block: &Cell, delimiter: &str) -> Result<Option<String>, Error> {
        let array = self.array_of(block);
        let spec = self.derive_specifier(block, None);
        let mut reduced = Cell::null();
        if self.reduce_throws(&mut reduced, array, block.index(), spec)? {
            return Ok(None);
        }
        let items = self.heap.array(self.array_of(&reduced));
        let pieces: Vec<String> = items.iter().filter(|c| !c.is_blank() && !c.is_void()).map(|c| self.form(c)).collect();
        Ok(Some(pieces.join(delimiter)))
    }

    fn set_protection(&mut self, value: &Cell, protect: bool) -> Result<(), Error> {
        if value.kind.is_any_word() {
            let r = self.resolve_word(value, None)?;
            let slot = &mut self.heap.array_mut(r.ctx)[r.index];
            if protect {
                slot.set_flag(CELL_FLAG_PROTECTED);
            } else {
                slot.clear_flag(CELL_FLAG_PROTECTED);
            }
            return Ok(());
        }
        if let Some(ctx) = value.varlist().filter(|_| value.kind.is_any_context()) {
            self.check_accessible(ctx)?;
            for slot in self.heap.array_mut(ctx).iter_mut().skip(1) {
                if protect {
                    slot.set_flag(CELL_FLAG_PROTECTED);
                } else {
                    slot.clear_flag(CELL_FLAG_PROTECTED);
                }
            }
            return Ok(());
        }
        let id = self.array_of(value);
        if protect {
            self.heap.set_flag(id, SERIES_FLAG_PROTECTED);
        } else {
            self.heap.clear_flag(id, SERIES_FLAG_PROTECTED);
        }
        Ok(())
    }
}

fn make(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let ty = arg!(rt, f, 1);
    let def = arg!(rt, f, 2);
    let kind = match ty.payload {
        Payload::Datatype(k) if ty.quote == 0 => k,
        _ if ty.is_null() => fail!(error::bad_make("null", &rt.mold(&def))),
        _ => ty.type_kind(),
    };
    match kind {
        Kind::Object | Kind::Module => {
            let parent = ty.varlist().filter(|_| ty.kind.is_any_context());
            let ctx = match parent {
                Some(p) => rt.copy_context(p, true)?,
                None => rt.make_context(kind, &[]),
            };
            if def.is(Kind::Block) {
                if rt.run_in_context_throws(ctx, &def)? {
                    return Ok(Bounce::Thrown);
                }
            } else if !def.is_blank() {
                fail!(error::bad_make(kind.name(), &rt.mold(&def)))
            }
            out(rt, f, Cell::context(kind, ctx))
        }
        Kind::Error => match rt.make_error(&def)? {
            Some(e) => out(rt, f, e),
            None => Ok(Bounce::Thrown),
        },
        Kind::Frame => match def.as_action() {
            Some(action) => {
                let ex = rt.make_exemplar(action, def.binding);
                out(rt, f, Cell::frame(ex, action, def.binding))
            }
            None => fail!(error::bad_make("frame!", &rt.mold(&def))),
        },
        Kind::Varargs if def.is(Kind::Block) => {
            let v = rt.make_varargs(&def);
            out(rt, f, v)
        }
        Kind::Datatype | Kind::Action | Kind::Varargs => fail!(error::bad_make(kind.name(), &rt.mold(&def))),
        k if (k.is_any_series()) && def.as_integer().is_some() => {
            let empty = if k.is_any_array() {
                rt.block_cell(k, vec![])
            } else if k == Kind::Binary {
                let mut s = Series::binary(Vec::new());
                s.flags |= SERIES_FLAG_MANAGED;
                Cell::series(Kind::Binary, rt.heap.alloc(s), 0)
            } else {
                rt.text_cell(k, "")
            };
            out(rt, f, empty)
        }
        k => {
            if def.is_null() {
                fail!(error::bad_make(k.name(), "null"))
            }
            let made = rt.to_value(k, &def)?;
            out(rt, f, made)
        }
    }
}

fn to(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let kind = match rt.arg(f, 1).payload {
        Payload::Datatype(k) => k,
        _ => return Err(rt.bad_arg(f, 1)),
    };
    let value = arg!(rt, f, 2);
    let converted = rt.to_value(kind, &value)?;
    out(rt, f, converted)
}

fn context(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let spec = arg!(rt, f, 1);
    let ctx = rt.make_context(Kind::Object, &[]);
    if rt.run_in_context_throws(ctx, &spec)? {
        return Ok(Bounce::Thrown);
    }
    out(rt, f, Cell::context(Kind::Object, ctx))
}

/// Reflection: `length of x`, `type of x`, `words of o` and the like.
fn of(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let property = rt.word_spelling(rt.arg(f, 1)).to_lowercase();
    let value = arg!(rt, f, 2);
    let kind_name = if value.is_null() { "null" } else { value.type_kind().name() };
    let reflected = match property.as_str() {
        "type" => {
            if value.is_null() {
                return Ok(Bounce::Null);
            }
            Cell::datatype(value.type_kind())
        }
        "length" => match rt.length_of(&value)? {
            Some(n) => Cell::integer(n as i64),
            None => fail!(error::cannot_reflect(kind_name, "length")),
        },
        "index" if value.quote == 0 && value.kind.is_any_series() => Cell::integer(value.index() as i64 + 1),
        "head" if value.quote == 0 && value.kind.is_any_series() => {
            let mut h = value.clone();
            h.set_index(0);
            h
        }
        "tail" if value.quote == 0 && value.kind.is_any_series() => {
            let mut t = value.clone();
            t.set_index(rt.heap.len(rt.array_of(&value)));
            t
        }
        "words" => rt.words_of(&value)?,
        "values" => rt.values_of(&value)?,
        "binding" if value.kind.is_any_word() => {
            let bound = rt.binding_of(&value);
            if bound.is_null() {
                return Ok(Bounce::Null);
            }
            bound
        }
        other => fail!(error::cannot_reflect(kind_name, other)),
    };
    out(rt, f, reflected)
}

fn type_of(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    if value.is_null() {
        return Ok(Bounce::Null);
    }
    out(rt, f, Cell::datatype(value.type_kind()))
}

fn null_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let is_null = rt.arg(f, 1).is_null();
    out(rt, f, Cell::logic(is_null))
}

fn value_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let is_value = !rt.arg(f, 1).is_null();
    out(rt, f, Cell::logic(is_value))
}

fn set_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let var = arg!(rt, f, 1);
    let set = match rt.try_get_var(&var, None) {
        Some(v) => !v.is_null() && !v.is_void(),
        None => false,
    };
    out(rt, f, Cell::logic(set))
}

fn protect(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    rt.set_protection(&value, true)?;
    out(rt, f, value)
}

fn unprotect(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    rt.set_protection(&value, false)?;
    out(rt, f, value)
}

fn recycle(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let swept = rt.recycle();
    info!(swept, "recycle requested");
    out(rt, f, Cell::integer(swept as i64))
}

fn print(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let line = arg!(rt, f, 1);
    if line.is_null() {
        return Ok(Bounce::Null);
    }
    let text = if line.is(Kind::Block) {
        match rt.delimit_throws(&line, " ")? {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(s),
            None => return Ok(Bounce::Thrown),
        }
    } else {
        Some(rt.form(&line))
    };
    if let Some(text) = text {
        rt.emit(&text);
    }
    out(rt, f, Cell::void())
}

fn probe(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let molded = rt.mold(&value);
    rt.emit(&molded);
    if value.is_null() {
        return Ok(Bounce::Null);
    }
    out(rt, f, value)
}

fn mold(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let mut molded = rt.mold(&value);
    if rt.refine(f, 2) && value.quote == 0 && value.kind.is_any_block() {
        let open = molded.find('[').map(|i| i + 1).unwrap_or(0);
        let close = molded.rfind(']').unwrap_or(molded.len());
        molded = molded[open..close.max(open)].to_string();
    }
    let text = rt.text_cell(Kind::Text, &molded);
    out(rt, f, text)
}

fn form(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let value = arg!(rt, f, 1);
    let formed = rt.form(&value);
    let text = rt.text_cell(Kind::Text, &formed);
    out(rt, f, text)
}

fn spaced(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { delimited(rt, f, " ") }

fn unspaced(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { delimited(rt, f, "") }

fn delimited(rt: &mut Runtime, f: FrameId, delimiter: &str) -> Result<Bounce, Error> {
    let line = arg!(rt, f, 1);
    match rt.delimit_throws(&line, delimiter)? {
        Some(s) => {
            let text = rt.text_cell(Kind::Text, &s);
            out(rt, f, text)
        }
        None => Ok(Bounce::Thrown),
    }
}

#[cfg(test)]
mod test_data {
    use crate::interpreter::core::*;

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_make_object_and_derive() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("o: make object! [a: 1 b: a + 1]").unwrap();
        assert_eq!(run(&mut rt, "o/b"), "2");
        assert_eq!(run(&mut rt, "a"), "error: no-value");
        rt.run("p: make o [b: 10 c: 3]").unwrap();
        assert_eq!(run(&mut rt, "reduce [p/a p/b p/c o/b]"), "[1 10 3 2]");
        assert_eq!(run(&mut rt, "words of p"), "[a b c]");
        assert_eq!(run(&mut rt, "values of context [x: 1 y: null]"), "[1 _]");
    }

    #[test]
    fn test_reflectors() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "length of [a b c]"), "3");
        assert_eq!(run(&mut rt, "type of 10"), "integer!");
        assert_eq!(run(&mut rt, "type of null"), "null");
        assert_eq!(run(&mut rt, "index of next \"abc\""), "2");
        assert_eq!(run(&mut rt, "type-of first ['a]"), "quoted!");
        assert_eq!(run(&mut rt, "length of 10"), "error: cannot-reflect");
        assert_eq!(run(&mut rt, "words of :append"), "[series value /part limit /only /dup count]");
        rt.run("f: func [n] [binding of 'n]").unwrap();
        assert_eq!(run(&mut rt, "frame? f 1"), "#[true]");
    }

    #[test]
    fn test_to_conversions() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "to integer! \"42\""), "42");
        assert_eq!(run(&mut rt, "to integer! 3.7"), "3");
        assert_eq!(run(&mut rt, "to text! 10"), "\"10\"");
        assert_eq!(run(&mut rt, "to word! \"abc\""), "abc");
        assert_eq!(run(&mut rt, "to block! \"a 1\""), "[a 1]");
        assert_eq!(run(&mut rt, "to char! 65"), "#\"A\"");
        assert_eq!(run(&mut rt, "to integer! \"x\""), "error: bad-make");
        assert_eq!(run(&mut rt, "make block! 10"), "[]");
        assert_eq!(run(&mut rt, "make path! [a b]"), "a/b");
    }

    #[test]
    fn test_frames_and_errors() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "f: make frame! :subtract f/value1: 10 f/value2: 3 do f"), "7");
        rt.run("e: make error! [id: 'custom message: \"boom\"]").unwrap();
        assert_eq!(run(&mut rt, "e/message"), "\"boom\"");
        let err = rt.run("fail e").unwrap_err();
        assert!(err.is("custom"));
        assert_eq!(err.message, "boom");
        assert_eq!(run(&mut rt, "v: make varargs! [1 2] reduce [take v take v tail? v]"), "[1 2 #[true]]");
    }

    #[test]
    fn test_predicates_and_protection() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "null? null"), "#[true]");
        assert_eq!(run(&mut rt, "value? 0"), "#[true]");
        assert_eq!(run(&mut rt, "x: 1 set? 'x"), "#[true]");
        assert_eq!(run(&mut rt, "set? 'never-assigned"), "#[false]");
        assert_eq!(run(&mut rt, "y: 1 protect 'y y: 2"), "error: protected-word");
        assert_eq!(run(&mut rt, "unprotect 'y y: 2"), "2");
    }

    #[test]
    fn test_output_natives() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.capture = Some(String::new());
        assert_eq!(run(&mut rt, "print [\"a\" 1 + 1 _ \"b\"]"), "#[void]");
        assert_eq!(run(&mut rt, "probe [x]"), "[x]");
        assert_eq!(run(&mut rt, "print []"), "#[void]");
        assert_eq!(rt.capture.take().unwrap(), "a 2 b\n[x]\n");
        assert_eq!(run(&mut rt, "spaced [\"x\" 1]"), "\"x 1\"");
        assert_eq!(run(&mut rt, "unspaced [\"x\" 1 null]"), "\"x1\"");
        assert_eq!(run(&mut rt, "mold/only [a [b]]"), "\"a [b]\"");
        assert_eq!(run(&mut rt, "form [a [b]]"), "\"a b\"");
    }
}
