use std::cmp::Ordering;

use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::Error;
use crate::interpreter::core::series::Content;
use crate::interpreter::core::Runtime;
use crate::fail;

impl Runtime {
    /// Equality as `=` sees it. Numbers compare across integer and decimal,
    /// text and words ignore case unless `strict`.
    pub fn equal_values(&self, a: &Cell, b: &Cell, strict: bool) -> bool {
        if quote_depth(a) != quote_depth(b) {
            return false;
        }
        let (ka, kb) = (unescaped_kind(&self.heap, a), unescaped_kind(&self.heap, b));
        if a.kind == Kind::Quoted || b.kind == Kind::Quoted {
            let (mut x, mut y) = (a.clone(), b.clone());
            dequotify(&self.heap, &mut x);
            dequotify(&self.heap, &mut y);
            return self.equal_values(&x, &y, strict);
        }
        if ka != kb {
            let numeric = ka.is_any_number() && kb.is_any_number();
            if strict || !numeric {
                return false;
            }
            return match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            };
        }
        match (&a.payload, &b.payload) {
            (Payload::None, Payload::None) => true,
            (Payload::Logic(x), Payload::Logic(y)) => x == y,
            (Payload::Integer(x), Payload::Integer(y)) => x == y,
            (Payload::Decimal(x), Payload::Decimal(y)) => x == y,
            (Payload::Char(x), Payload::Char(y)) => {
                if strict {
                    x == y
                } else {
                    x.to_lowercase().eq(y.to_lowercase())
                }
            }
            (Payload::Pair(x), Payload::Pair(y)) => {
                let (xs, ys) = (self.heap.array(*x), self.heap.array(*y));
                self.equal_values(&xs[0], &ys[0], strict) && self.equal_values(&xs[1], &ys[1], strict)
            }
            (Payload::Tuple { len: la, bytes: ba }, Payload::Tuple { len: lb, bytes: bb }) => ba[..*la as usize] == bb[..*lb as usize],
            (Payload::Time(x), Payload::Time(y)) => x == y,
            (Payload::Date(x), Payload::Date(y)) => x == y,
            (Payload::Datatype(x), Payload::Datatype(y)) => x == y,
            (Payload::Typeset(x), Payload::Typeset(y)) => x.bits == y.bits,
            (Payload::Word { sym: x, .. }, Payload::Word { sym: y, .. }) => {
                if strict {
                    x == y
                } else {
                    self.symbols.same(*x, *y)
                }
            }
            (Payload::Series { series: x, index: i }, Payload::Series { series: y, index: j }) => {
                if x == y && i == j {
                    return true;
                }
                self.equal_series(*x, *i, *y, *j, strict)
            }
            (Payload::Context { varlist: x, .. }, Payload::Context { varlist: y, .. }) => x == y,
            (Payload::Action(x), Payload::Action(y)) => x.paramlist == y.paramlist,
            (Payload::Handle(x), Payload::Handle(y)) => x == y,
            (Payload::Varargs(x), Payload::Varargs(y)) => x == y,
            _ => false,
        }
    }

    fn equal_series(&self, x: crate::interpreter::core::SeriesId, i: usize, y: crate::interpreter::core::SeriesId, j: usize, strict: bool) -> bool {
        match (&self.heap.get(x).content, &self.heap.get(y).content) {
            (Content::Array(a), Content::Array(b)) => {
                let (a, b) = (&a[i.min(a.len())..], &b[j.min(b.len())..]);
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(p, q)| self.equal_values(p, q, strict))
            }
            (Content::Text(a), Content::Text(b)) => {
                let (a, b) = (a.slice(i, a.len()), b.slice(j, b.len()));
                if strict {
                    a == b
                } else {
                    a.to_lowercase() == b.to_lowercase()
                }
            }
            (Content::Binary(a), Content::Binary(b)) => a[i.min(a.len())..] == b[j.min(b.len())..],
            _ => false,
        }
    }

    /// Ordering for `<` and friends. Kinds without a natural order fail.
    pub fn compare_values(&self, a: &Cell, b: &Cell, strict: bool) -> Result<Ordering, Error> {
        let order = match (&a.payload, &b.payload) {
            _ if a.quote != 0 || b.quote != 0 => None,
            _ if a.kind.is_any_number() && b.kind.is_any_number() => match (&a.payload, &b.payload) {
                (Payload::Integer(x), Payload::Integer(y)) => Some(x.cmp(y)),
                _ => match (a.as_decimal(), b.as_decimal()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            },
            _ if a.kind != b.kind => None,
            (Payload::Char(x), Payload::Char(y)) => {
                if strict {
                    Some(x.cmp(y))
                } else {
                    Some(x.to_lowercase().cmp(y.to_lowercase()))
                }
            }
            (Payload::Time(x), Payload::Time(y)) => Some(x.cmp(y)),
            (Payload::Date(x), Payload::Date(y)) => Some((x.year, x.month, x.day, x.time.unwrap_or(0)).cmp(&(y.year, y.month, y.day, y.time.unwrap_or(0)))),
            (Payload::Tuple { len: la, bytes: ba }, Payload::Tuple { len: lb, bytes: bb }) => Some(ba[..*la as usize].cmp(&bb[..*lb as usize])),
            (Payload::Logic(x), Payload::Logic(y)) => Some(x.cmp(y)),
            (Payload::Word { sym: x, .. }, Payload::Word { sym: y, .. }) => {
                if strict {
                    Some(self.symbols.spelling(*x).cmp(self.symbols.spelling(*y)))
                } else {
                    Some(self.symbols.lower(*x).cmp(self.symbols.lower(*y)))
                }
            }
            (Payload::Series { .. }, Payload::Series { .. }) if a.kind.is_any_string() => {
                let (x, y) = (self.cell_text(a), self.cell_text(b));
                if strict {
                    Some(x.cmp(&y))
                } else {
                    Some(x.to_lowercase().cmp(&y.to_lowercase()))
                }
            }
            (Payload::Series { series: x, index: i }, Payload::Series { series: y, index: j }) if a.kind == Kind::Binary => {
                Some(self.heap.binary(*x)[*i..].cmp(&self.heap.binary(*y)[*j..]))
            }
            _ => None,
        };
        match order {
            Some(o) => Ok(o),
            None => fail!(
                Script,
                "invalid-compare",
                "cannot compare {} with {}",
                a.type_kind().name(),
                b.type_kind().name()
            ),
        }
    }
}

#[cfg(test)]
mod test_compare {
    use crate::interpreter::core::*;

    fn truth(rt: &mut Runtime, code: &str) -> bool {
        let v = rt.run(code).unwrap();
        v.as_logic().unwrap()
    }

    #[test]
    fn test_equality_is_lax_by_default() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert!(truth(&mut rt, "1 = 1.0"));
        assert!(truth(&mut rt, "\"abc\" = \"ABC\""));
        assert!(truth(&mut rt, "'Foo = 'foo"));
        assert!(truth(&mut rt, "[a \"b\" 1] = [A \"B\" 1.0]"));
        assert!(!truth(&mut rt, "\"abc\" == \"ABC\""));
        assert!(!truth(&mut rt, "1 == 1.0"));
        assert!(!truth(&mut rt, "'a = ''a"));
    }

    #[test]
    fn test_ordering() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert!(truth(&mut rt, "1 < 2.5"));
        assert!(truth(&mut rt, "\"apple\" < \"Banana\""));
        assert!(truth(&mut rt, "1:00 > 0:59"));
        assert!(truth(&mut rt, "1.2.3 < 1.2.4"));
        assert!(rt.run("[1] < [2]").unwrap_err().is("invalid-compare"));
    }
}
