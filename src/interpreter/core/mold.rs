use std::fmt::Write;

use crate::interpreter::core::cell::*;
use crate::interpreter::core::series::{Content, SeriesId, SERIES_FLAG_INACCESSIBLE};
use crate::interpreter::core::Runtime;

const MONTHS: [&str; 12] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

/// Output buffer plus the series being molded, so cycles print as `...`.
struct Molder {
    out: String,
    stack: Vec<SeriesId>,
    form: bool,
    indent: usize,
}

impl Runtime {
    /// Source-form text of a value: loading it back gives an equal value.
    pub fn mold(&self, cell: &Cell) -> String {
        let mut m = Molder { out: String::new(), stack: Vec::new(), form: false, indent: 0 };
        self.mold_into(&mut m, cell);
        m.out
    }

    /// Human-readable text: strings without delimiters, blocks without
    /// brackets, null as nothing.
    pub fn form(&self, cell: &Cell) -> String {
        if cell.is_null() {
            return String::new();
        }
        let mut m = Molder { out: String::new(), stack: Vec::new(), form: true, indent: 0 };
        if cell.quote == 0 && cell.kind.is_any_block() {
            let id = match cell.series_id() {
                Some(id) => id,
                None => return String::new(),
            };
            self.form_items(&mut m, id, cell.index());
            return m.out;
        }
        self.mold_into(&mut m, cell);
        m.out
    }

    fn form_items(&self, m: &mut Molder, id: SeriesId, index: usize) {
        m.stack.push(id);
        for (n, item) in self.heap.array(id).iter().skip(index).enumerate() {
            if n > 0 {
                m.out.push(' ');
            }
            if item.quote == 0 && item.kind.is_any_block() {
                if let Some(inner) = item.series_id() {
                    if !m.stack.contains(&inner) {
                        self.form_items(m, inner, item.index());
                        continue;
                    }
                }
            }
            self.mold_into(m, item);
        }
        m.stack.pop();
    }

    fn mold_into(&self, m: &mut Molder, cell: &Cell) {
        let depth = quote_depth(cell);
        if depth > 0 {
            for _ in 0..depth {
                m.out.push('\'');
            }
            let mut inner = cell.clone();
            unquotify(&self.heap, &mut inner, depth);
            self.mold_into(m, &inner);
            return;
        }
        let form = m.form;
        match (cell.kind, &cell.payload) {
            (Kind::End, _) => {}
            (Kind::Null, _) => m.out.push_str(if form { "" } else { "null" }),
            (Kind::Void, _) => m.out.push_str("#[void]"),
            (Kind::Blank, _) => m.out.push('_'),
            (Kind::Bar, _) => m.out.push('|'),
            (Kind::Logic, Payload::Logic(b)) => match (form, b) {
                (true, b) => m.out.push_str(if *b { "true" } else { "false" }),
                (false, b) => m.out.push_str(if *b { "#[true]" } else { "#[false]" }),
            },
            (Kind::Integer, Payload::Integer(i)) => {
                let _ = write!(m.out, "{}", i);
            }
            (Kind::Decimal, Payload::Decimal(d)) => m.out.push_str(&format_decimal(*d)),
            (Kind::Percent, Payload::Decimal(d)) => {
                m.out.push_str(&format_decimal(d * 100.0).trim_end_matches(".0").to_string());
                m.out.push('%');
            }
            (Kind::Money, Payload::Decimal(d)) => {
                let _ = write!(m.out, "{}${:.2}", if *d < 0.0 { "-" } else { "" }, d.abs());
            }
            (Kind::Char, Payload::Char(c)) => {
                if form {
                    m.out.push(*c);
                } else {
                    m.out.push_str("#\"");
                    escape_char(&mut m.out, *c, '"');
                    m.out.push('"');
                }
            }
            (Kind::Pair, Payload::Pair(id)) => {
                let cells = self.heap.array(*id);
                self.mold_into(m, &cells[0]);
                m.out.push('x');
                self.mold_into(m, &cells[1]);
            }
            (Kind::Tuple, Payload::Tuple { len, bytes }) => {
                let parts: Vec<String> = bytes[..*len as usize].iter().map(|b| b.to_string()).collect();
                m.out.push_str(&parts.join("."));
            }
            (Kind::Time, Payload::Time(nanos)) => m.out.push_str(&format_time(*nanos)),
            (Kind::Date, Payload::Date(d)) => {
                let month = MONTHS.get(d.month.saturating_sub(1) as usize).copied().unwrap_or("???");
                let _ = write!(m.out, "{}-{}-{}", d.day, month, d.year);
                if let Some(t) = d.time {
                    m.out.push('/');
                    m.out.push_str(&format_time(t));
                }
            }
            (Kind::Datatype, Payload::Datatype(k)) => m.out.push_str(k.name()),
            (Kind::Typeset, Payload::Typeset(ts)) => {
                m.out.push_str("make typeset! [");
                let names: Vec<&str> = KINDS.iter().filter(|k| ts.allows(**k) && **k != Kind::End).map(|k| k.name()).collect();
                m.out.push_str(&names.join(" "));
                m.out.push(']');
            }
            (k, Payload::Word { sym, .. }) if k.is_any_word() => {
                let spelling = self.symbols.spelling(*sym);
                match k.sigil() {
                    Sigil::Plain => m.out.push_str(spelling),
                    Sigil::Set => {
                        m.out.push_str(spelling);
                        m.out.push(':');
                    }
                    Sigil::Get => {
                        m.out.push(':');
                        m.out.push_str(spelling);
                    }
                    Sigil::Sym => {
                        m.out.push('@');
                        m.out.push_str(spelling);
                    }
                }
            }
            (k, Payload::Series { series, index }) if k.is_any_array() => self.mold_array(m, k, *series, *index),
            (k, Payload::Series { series, index }) if k.is_any_string() || k == Kind::Issue => {
                let text = match self.heap.get(*series).content {
                    Content::Text(ref t) => t.slice(*index, t.len()).to_string(),
                    _ => String::new(),
                };
                match k {
                    _ if form => m.out.push_str(&text),
                    Kind::Text => {
                        m.out.push('"');
                        for c in text.chars() {
                            escape_char(&mut m.out, c, '"');
                        }
                        m.out.push('"');
                    }
                    Kind::File => {
                        m.out.push('%');
                        if text.contains(' ') {
                            let _ = write!(m.out, "\"{}\"", text);
                        } else {
                            m.out.push_str(&text);
                        }
                    }
                    Kind::Tag => {
                        let _ = write!(m.out, "<{}>", text);
                    }
                    Kind::Issue => {
                        m.out.push('#');
                        m.out.push_str(&text);
                    }
                    _ => m.out.push_str(&text),
                }
            }
            (Kind::Binary, Payload::Series { series, index }) => {
                m.out.push_str("#{");
                for b in self.heap.binary(*series).iter().skip(*index) {
                    let _ = write!(m.out, "{:02X}", b);
                }
                m.out.push('}');
            }
            (Kind::Bitset, Payload::Series { series, .. }) => {
                m.out.push_str("make bitset! #{");
                for b in self.heap.binary(*series) {
                    let _ = write!(m.out, "{:02X}", b);
                }
                m.out.push('}');
            }
            (Kind::Map, Payload::Series { series, .. }) => {
                m.out.push_str("make map! ");
                self.mold_array(m, Kind::Block, *series, 0);
            }
            (k, Payload::Context { varlist, phase }) if k.is_any_context() => self.mold_context(m, k, *varlist, *phase),
            (Kind::Action, Payload::Action(a)) => {
                m.out.push_str("#[action! [");
                let words: Vec<String> = self
                    .param_words(*a)
                    .into_iter()
                    .map(|(sym, class)| {
                        let s = self.symbols.spelling(sym);
                        match class {
                            ParamClass::Refinement => format!("/{}", s),
                            ParamClass::HardQuote => format!(":{}", s),
                            ParamClass::SoftQuote => format!("'{}", s),
                            _ => s.to_string(),
                        }
                    })
                    .collect();
                m.out.push_str(&words.join(" "));
                m.out.push_str("]]");
            }
            (Kind::Varargs, Payload::Varargs(v)) => match v {
                Varargs::Frame { .. } => m.out.push_str("#[varargs! frame]"),
                Varargs::Array { holder, .. } => {
                    m.out.push_str("#[varargs! ");
                    match self.heap.array(*holder).first() {
                        Some(block) => self.mold_into(m, block),
                        None => m.out.push_str("[]"),
                    }
                    m.out.push(']');
                }
            },
            (Kind::Handle, Payload::Handle(h)) => {
                let _ = write!(m.out, "#[handle! {}]", h);
            }
            (k, _) => {
                let _ = write!(m.out, "#[{}]", k.name());
            }
        }
    }

    fn mold_array(&self, m: &mut Molder, kind: Kind, id: SeriesId, index: usize) {
        let path = kind.is_any_path();
        let (open, close) = if kind.is_any_group() {
            ("(", ")")
        } else if path {
            ("", "")
        } else {
            ("[", "]")
        };
        match kind.sigil() {
            Sigil::Get => m.out.push(':'),
            Sigil::Sym => m.out.push('@'),
            _ => {}
        }
        if m.stack.contains(&id) {
            let _ = write!(m.out, "{}...{}", open, close);
            return;
        }
        m.stack.push(id);
        m.out.push_str(open);
        m.indent += 1;
        let mut broke = false;
        let cells = self.heap.array(id);
        for (n, item) in cells.iter().skip(index).enumerate() {
            if path {
                if n > 0 {
                    m.out.push('/');
                }
                // blanks are the empty segments of `/a` and `/`
                if !item.is_blank() {
                    self.mold_into(m, item);
                }
                continue;
            }
            if item.has_flag(CELL_FLAG_NEWLINE_BEFORE) {
                broke = true;
                m.out.push('\n');
                m.out.push_str(&"    ".repeat(m.indent));
            } else if n > 0 {
                m.out.push(' ');
            }
            self.mold_into(m, item);
        }
        m.indent -= 1;
        if broke {
            m.out.push('\n');
            m.out.push_str(&"    ".repeat(m.indent));
        }
        m.out.push_str(close);
        m.stack.pop();
        if kind.sigil() == Sigil::Set {
            m.out.push(':');
        }
    }

    fn mold_context(&self, m: &mut Molder, kind: Kind, varlist: SeriesId, phase: Option<Action>) {
        if !self.heap.is_live(varlist) || self.heap.has_flag(varlist, SERIES_FLAG_INACCESSIBLE) {
            let _ = write!(m.out, "#[{} inaccessible]", kind.name());
            return;
        }
        if m.stack.contains(&varlist) {
            let _ = write!(m.out, "make {} [...]", kind.name());
            return;
        }
        m.stack.push(varlist);
        let _ = write!(m.out, "make {} [", kind.name());
        let n = self.context_len(varlist);
        let mut first = true;
        for i in 1..=n {
            let key = self.key(varlist, i);
            if kind == Kind::Frame && matches!(key.class, ParamClass::Local | ParamClass::Return) {
                continue;
            }
            if phase.is_some() && kind == Kind::Frame && key.class == ParamClass::Refinement && self.heap.array(varlist)[i].is_null() {
                continue;
            }
            if !first {
                m.out.push(' ');
            }
            first = false;
            if let Some(sym) = key.sym {
                m.out.push_str(self.symbols.spelling(sym));
                m.out.push_str(": ");
            }
            let value = &self.heap.array(varlist)[i];
            if value.kind.is_any_word() || value.kind.is_any_path() || value.kind == Kind::Action {
                if value.quote == 0 && value.kind != Kind::Action {
                    m.out.push('\'');
                }
            }
            self.mold_into(m, value);
        }
        m.out.push(']');
        m.stack.pop();
    }
}

/// Decimals always show a fractional part.
pub fn format_decimal(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{:.1}", d)
    } else {
        format!("{}", d)
    }
}

fn format_time(nanos: i64) -> String {
    let sign = if nanos < 0 { "-" } else { "" };
    let nanos = nanos.abs();
    let secs = nanos / 1_000_000_000;
    let frac = nanos % 1_000_000_000;
    let mut s = format!("{}{}:{:02}:{:02}", sign, secs / 3600, (secs / 60) % 60, secs % 60);
    if frac != 0 {
        let digits = format!("{:09}", frac);
        s.push('.');
        s.push_str(digits.trim_end_matches('0'));
    }
    s
}

fn escape_char(out: &mut String, c: char, delim: char) {
    match c {
        '\n' => out.push_str("^/"),
        '\t' => out.push_str("^-"),
        '^' => out.push_str("^^"),
        '\0' => out.push_str("^@"),
        c if c == delim => {
            out.push('^');
            out.push(c);
        }
        c => out.push(c),
    }
}

#[cfg(test)]
mod test_mold {
    use crate::interpreter::core::*;

    fn molded(rt: &mut Runtime, code: &str) -> String {
        let v = rt.run(code).unwrap();
        rt.mold(&v)
    }

    #[test]
    fn test_scalars() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(molded(&mut rt, "1.5"), "1.5");
        assert_eq!(molded(&mut rt, "3.0"), "3.0");
        assert_eq!(molded(&mut rt, "#\"a\""), "#\"a\"");
        assert_eq!(molded(&mut rt, "1x2"), "1x2");
        assert_eq!(molded(&mut rt, "1.2.3"), "1.2.3");
        assert_eq!(molded(&mut rt, "10:00"), "10:00:00");
        assert_eq!(molded(&mut rt, "17-Oct-2026"), "17-Oct-2026");
        assert_eq!(molded(&mut rt, "true"), "#[true]");
        assert_eq!(molded(&mut rt, "integer!"), "integer!");
    }

    #[test]
    fn test_strings_escape() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(molded(&mut rt, "\"a^\"b^/\""), "\"a^\"b^/\"");
        assert_eq!(molded(&mut rt, "%file.txt"), "%file.txt");
        assert_eq!(molded(&mut rt, "<tag>"), "<tag>");
        assert_eq!(molded(&mut rt, "#{0A0B}"), "#{0A0B}");
    }

    #[test]
    fn test_arrays_and_sigils() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(molded(&mut rt, "[a b: :c @d (e) 'f]"), "[a b: :c @d (e) 'f]");
        assert_eq!(molded(&mut rt, "'a/b/c"), "a/b/c");
        assert_eq!(molded(&mut rt, "[a/b: :a/b]"), "[a/b: :a/b]");
        assert_eq!(molded(&mut rt, "'/refine"), "/refine");
        assert_eq!(molded(&mut rt, "[[x]: :[y] @[z]]"), "[[x]: :[y] @[z]]");
    }

    #[test]
    fn test_form_drops_delimiters() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let v = rt.run("[\"a\" [b c] #\"d\" 1]").unwrap();
        assert_eq!(rt.form(&v), "a b c d 1");
        assert_eq!(rt.form(&Cell::null()), "");
    }

    #[test]
    fn test_objects_and_cycles() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(molded(&mut rt, "make object! [a: 1 b: 'w]"), "make object! [a: 1 b: 'w]");
        assert_eq!(molded(&mut rt, "b: copy [1] append/only b b b"), "[1 [...]]");
    }
}
