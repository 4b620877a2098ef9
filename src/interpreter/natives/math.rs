use std::cmp::Ordering;

use crate::interpreter::core::action::Bounce;
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::Runtime;
use crate::interpreter::natives::Native;
use crate::{arg, fail, native};

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Clone, Copy, PartialEq, Debug)]
enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Subtract => "subtract",
            Op::Multiply => "multiply",
            Op::Divide => "divide",
            Op::Remainder => "remainder",
        }
    }
}

const MATH_SPEC: &str = "value1 [any-scalar! date!] value2 [any-scalar! date!]";
const COMPARE_SPEC: &str = "value1 [<opt> any-value!] value2 [<opt> any-value!]";
const ORDER_SPEC: &str = "value1 [any-value!] value2 [any-value!]";

pub const NATIVES: &[Native] = &[
    native!("add", MATH_SPEC, add),
    native!("subtract", MATH_SPEC, subtract),
    native!("multiply", MATH_SPEC, multiply),
    native!("divide", MATH_SPEC, divide),
    native!("remainder", MATH_SPEC, remainder),
    native!(enfix "+", MATH_SPEC, add),
    native!(enfix "-", MATH_SPEC, subtract),
    native!(enfix "*", MATH_SPEC, multiply),
    native!("path-0", MATH_SPEC, divide),
    native!("negate", "number [any-scalar!]", negate),
    native!("abs", "value [any-number! pair! time!]", abs),
    native!("min", ORDER_SPEC, min),
    native!("max", ORDER_SPEC, max),
    native!("even?", "number [integer! char!]", even_q),
    native!("odd?", "number [integer! char!]", odd_q),
    native!("zero?", "value [any-scalar!]", zero_q),
    native!("equal?", COMPARE_SPEC, equal_q),
    native!("not-equal?", COMPARE_SPEC, not_equal_q),
    native!("strict-equal?", COMPARE_SPEC, strict_equal_q),
    native!("strict-not-equal?", COMPARE_SPEC, strict_not_equal_q),
    native!("same?", COMPARE_SPEC, same_q),
    native!("lesser?", ORDER_SPEC, lesser_q),
    native!("greater?", ORDER_SPEC, greater_q),
    native!("lesser-or-equal?", ORDER_SPEC, lesser_or_equal_q),
    native!("greater-or-equal?", ORDER_SPEC, greater_or_equal_q),
    native!(enfix "=", COMPARE_SPEC, equal_q),
    native!(enfix "<>", COMPARE_SPEC, not_equal_q),
    native!(enfix "==", COMPARE_SPEC, strict_equal_q),
    native!(enfix "!==", COMPARE_SPEC, strict_not_equal_q),
    native!(enfix "<", ORDER_SPEC, lesser_q),
    native!(enfix ">", ORDER_SPEC, greater_q),
    native!(enfix "<=", ORDER_SPEC, lesser_or_equal_q),
    native!(enfix ">=", ORDER_SPEC, greater_or_equal_q),
    native!("not", "value [<opt> any-value!]", not),
    native!(enfix "and", "left [<opt> any-value!] :right [block! group!]", and),
    native!(enfix "or", "left [<opt> any-value!] :right [block! group!]", or),
];

fn add(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { binary(rt, f, Op::Add) }

fn subtract(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { binary(rt, f, Op::Subtract) }

fn multiply(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { binary(rt, f, Op::Multiply) }

fn divide(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { binary(rt, f, Op::Divide) }

fn remainder(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { binary(rt, f, Op::Remainder) }

fn binary(rt: &mut Runtime, f: FrameId, op: Op) -> Result<Bounce, Error> {
    let (a, b) = (arg!(rt, f, 1), arg!(rt, f, 2));
    let result = rt.arith(op, &a, &b)?;
    rt.set_out(f, result);
    Ok(Bounce::Out)
}

fn cannot_use(op: &str, cell: &Cell) -> Error {
    Error::script("cannot-use", format!("cannot use {} on {} value", op, cell.type_kind().name()))
}

/// Result kind when two plain numbers meet.
fn number_kind(a: Kind, b: Kind) -> Kind {
    match (a, b) {
        (Kind::Money, _) | (_, Kind::Money) => Kind::Money,
        (Kind::Percent, Kind::Percent) => Kind::Percent,
        (Kind::Integer, Kind::Integer) => Kind::Integer,
        _ => Kind::Decimal,
    }
}

fn integer_op(op: Op, x: i64, y: i64) -> Result<Cell, Error> {
    let result = match op {
        Op::Add => x.checked_add(y),
        Op::Subtract => x.checked_sub(y),
        Op::Multiply => x.checked_mul(y),
        Op::Divide => {
            if y == 0 {
                fail!(error::zero_divide())
            }
            if x % y != 0 {
                return Ok(Cell::decimal(x as f64 / y as f64));
            }
            x.checked_div(y)
        }
        Op::Remainder => {
            if y == 0 {
                fail!(error::zero_divide())
            }
            x.checked_rem(y)
        }
    };
    match result {
        Some(i) => Ok(Cell::integer(i)),
        None => fail!(error::overflow()),
    }
}

fn decimal_op(op: Op, x: f64, y: f64) -> Result<f64, Error> {
    let result = match op {
        Op::Add => x + y,
        Op::Subtract => x - y,
        Op::Multiply => x * y,
        Op::Divide | Op::Remainder if y == 0.0 => fail!(error::zero_divide()),
        Op::Divide => x / y,
        Op::Remainder => x % y,
    };
    if !result.is_finite() {
        fail!(error::overflow())
    }
    Ok(result)
}

/// Days since 1970-01-01 of a civil date.
pub fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    let y = year as i64 - if month <= 2 { 1 } else { 0 };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

pub fn civil_from_days(days: i64) -> (i32, u8, u8) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = (yoe + era * 400 + if month <= 2 { 1 } else { 0 }) as i32;
    (year, month, day)
}

fn time_nanos(cell: &Cell) -> Option<i64> {
    match cell.payload {
        Payload::Time(n) if cell.quote == 0 => Some(n),
        _ => None,
    }
}

impl Runtime {
    /// The arithmetic behind ADD and friends, across every scalar kind that
    /// supports it.
    fn arith(&mut self, op: Op, a: &Cell, b: &Cell) -> Result<Cell, Error> {
        let (ka, kb) = (a.type_kind(), b.type_kind());
        if ka.is_any_number() && kb.is_any_number() {
            let kind = number_kind(ka, kb);
            if kind == Kind::Integer {
                let (x, y) = (a.as_integer().unwrap_or(0), b.as_integer().unwrap_or(0));
                return integer_op(op, x, y);
            }
            let (x, y) = match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(cannot_use(op.name(), a)),
            };
            let d = decimal_op(op, x, y)?;
            return Ok(Cell::new(kind, Payload::Decimal(d)));
        }
        match (ka, kb) {
            (Kind::Pair, _) | (_, Kind::Pair) => self.pair_arith(op, a, b),
            (Kind::Tuple, _) => self.tuple_arith(op, a, b),
            (Kind::Time, _) => {
                let x = time_nanos(a).unwrap_or(0);
                let nanos = match (op, b.payload) {
                    (Op::Add | Op::Subtract, Payload::Time(y)) => {
                        if op == Op::Add {
                            x.checked_add(y)
                        } else {
                            x.checked_sub(y)
                        }
                    }
                    (Op::Add | Op::Subtract, Payload::Integer(secs)) => {
                        let y = secs.checked_mul(NANOS_PER_SEC).ok_or_else(error::overflow)?;
                        if op == Op::Add {
                            x.checked_add(y)
                        } else {
                            x.checked_sub(y)
                        }
                    }
                    (Op::Multiply | Op::Divide, _) if kb.is_any_number() => {
                        let scale = b.as_decimal().unwrap_or(1.0);
                        Some(decimal_op(op, x as f64, scale)? as i64)
                    }
                    _ => return Err(cannot_use(op.name(), b)),
                };
                match nanos {
                    Some(n) => Ok(Cell::new(Kind::Time, Payload::Time(n))),
                    None => fail!(error::overflow()),
                }
            }
            (Kind::Date, _) => {
                let d = match a.payload {
                    Payload::Date(d) => d,
                    _ => return Err(cannot_use(op.name(), a)),
                };
                let days = days_from_civil(d.year, d.month, d.day);
                match (op, b.payload) {
                    (Op::Add, Payload::Integer(n)) | (Op::Subtract, Payload::Integer(n)) => {
                        let n = if op == Op::Add { n } else { -n };
                        let (year, month, day) = civil_from_days(days + n);
                        Ok(Cell::new(Kind::Date, Payload::Date(Date { year, month, day, time: d.time })))
                    }
                    (Op::Subtract, Payload::Date(e)) => Ok(Cell::integer(days - days_from_civil(e.year, e.month, e.day))),
                    _ => Err(cannot_use(op.name(), b)),
                }
            }
            (Kind::Char, _) => {
                let c = match a.payload {
                    Payload::Char(c) => c as i64,
                    _ => return Err(cannot_use(op.name(), a)),
                };
                let n = match b.payload {
                    Payload::Integer(n) => n,
                    Payload::Char(d) if op == Op::Subtract => return Ok(Cell::integer(c - d as i64)),
                    _ => return Err(cannot_use(op.name(), b)),
                };
                let code = match op {
                    Op::Add => c + n,
                    Op::Subtract => c - n,
                    _ => return Err(cannot_use(op.name(), a)),
                };
                match u32::try_from(code).ok().and_then(char::from_u32) {
                    Some(ch) => Ok(Cell::char(ch)),
                    None => fail!(error::out_of_range(&code.to_string())),
                }
            }
            (_, Kind::Date | Kind::Time) if op == Op::Add && ka == Kind::Integer => self.arith(op, b, a),
            _ => Err(cannot_use(op.name(), if ka.is_any_number() { b } else { a })),
        }
    }

    fn pair_parts(&self, cell: &Cell) -> Option<(Cell, Cell)> {
        match cell.payload {
            Payload::Pair(id) if cell.quote == 0 => {
                let parts = self.heap.array(id);
                Some((parts[0].clone(), parts[1].clone()))
            }
            _ if cell.kind.is_any_number() => Some((cell.clone(), cell.clone())),
            _ => None,
        }
    }

    fn pair_arith(&mut self, op: Op, a: &Cell, b: &Cell) -> Result<Cell, Error> {
        let (ax, ay) = self.pair_parts(a).ok_or_else(|| cannot_use(op.name(), a))?;
        let (bx, by) = self.pair_parts(b).ok_or_else(|| cannot_use(op.name(), b))?;
        let x = self.arith(op, &ax, &bx)?;
        let y = self.arith(op, &ay, &by)?;
        Ok(self.make_pair(x, y))
    }

    fn tuple_arith(&mut self, op: Op, a: &Cell, b: &Cell) -> Result<Cell, Error> {
        let (len, bytes) = match a.payload {
            Payload::Tuple { len, bytes } => (len, bytes),
            _ => return Err(cannot_use(op.name(), a)),
        };
        let (blen, other): (u8, [i64; 8]) = match b.payload {
            Payload::Tuple { len, bytes } => (len, bytes.map(|x| x as i64)),
            Payload::Integer(n) => (len, [n; 8]),
            Payload::Decimal(d) if b.kind == Kind::Decimal => (len, [d as i64; 8]),
            _ => return Err(cannot_use(op.name(), b)),
        };
        let len = len.max(blen);
        let mut out = [0u8; 8];
        for i in 0..len as usize {
            let (x, y) = (bytes[i] as i64, other[i]);
            let v = match op {
                Op::Add => x + y,
                Op::Subtract => x - y,
                Op::Multiply => x * y,
                Op::Divide | Op::Remainder if y == 0 => fail!(error::zero_divide()),
                Op::Divide => x / y,
                Op::Remainder => x % y,
            };
            out[i] = v.clamp(0, 255) as u8;
        }
        Ok(Cell::new(Kind::Tuple, Payload::Tuple { len, bytes: out }))
    }

    fn ordering(&self, f: FrameId) -> Result<Ordering, Error> {
        let (a, b) = (self.arg(f, 1), self.arg(f, 2));
        self.compare_values(a, b, false)
    }
}

fn negate(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let v = arg!(rt, f, 1);
    let result = match v.payload {
        Payload::Integer(i) => Cell::integer(i.checked_neg().ok_or_else(error::overflow)?),
        Payload::Decimal(d) => Cell::new(v.kind, Payload::Decimal(-d)),
        Payload::Time(n) => Cell::new(Kind::Time, Payload::Time(-n)),
        Payload::Pair(_) => rt.arith(Op::Multiply, &v, &Cell::integer(-1))?,
        _ => return Err(cannot_use("negate", &v)),
    };
    rt.set_out(f, result);
    Ok(Bounce::Out)
}

fn abs(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let v = arg!(rt, f, 1);
    let result = match v.payload {
        Payload::Integer(i) => Cell::integer(i.checked_abs().ok_or_else(error::overflow)?),
        Payload::Decimal(d) => Cell::new(v.kind, Payload::Decimal(d.abs())),
        Payload::Time(n) => Cell::new(Kind::Time, Payload::Time(n.abs())),
        Payload::Pair(id) => {
            let parts = rt.heap.array(id).clone();
            let x = if parts[0].as_decimal().unwrap_or(0.0) < 0.0 { rt.arith(Op::Multiply, &parts[0], &Cell::integer(-1))? } else { parts[0].clone() };
            let y = if parts[1].as_decimal().unwrap_or(0.0) < 0.0 { rt.arith(Op::Multiply, &parts[1], &Cell::integer(-1))? } else { parts[1].clone() };
            rt.make_pair(x, y)
        }
        _ => return Err(cannot_use("abs", &v)),
    };
    rt.set_out(f, result);
    Ok(Bounce::Out)
}

fn min(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let pick = if rt.ordering(f)? == Ordering::Greater { 2 } else { 1 };
    let v = arg!(rt, f, pick);
    rt.set_out(f, v);
    Ok(Bounce::Out)
}

fn max(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let pick = if rt.ordering(f)? == Ordering::Less { 2 } else { 1 };
    let v = arg!(rt, f, pick);
    rt.set_out(f, v);
    Ok(Bounce::Out)
}

fn integer_of(cell: &Cell) -> i64 {
    match cell.payload {
        Payload::Integer(i) => i,
        Payload::Char(c) => c as i64,
        _ => 0,
    }
}

fn even_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let even = integer_of(rt.arg(f, 1)) % 2 == 0;
    rt.set_out(f, Cell::logic(even));
    Ok(Bounce::Out)
}

fn odd_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let odd = integer_of(rt.arg(f, 1)) % 2 != 0;
    rt.set_out(f, Cell::logic(odd));
    Ok(Bounce::Out)
}

fn zero_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let v = arg!(rt, f, 1);
    let zero = match v.payload {
        Payload::Integer(i) => i == 0,
        Payload::Decimal(d) => d == 0.0,
        Payload::Char(c) => c == '\0',
        Payload::Time(n) => n == 0,
        Payload::Tuple { len, bytes } => bytes[..len as usize].iter().all(|&b| b == 0),
        Payload::Pair(id) => rt.heap.array(id).iter().all(|c| c.as_decimal() == Some(0.0)),
        _ => false,
    };
    rt.set_out(f, Cell::logic(zero));
    Ok(Bounce::Out)
}

fn logic_out(rt: &mut Runtime, f: FrameId, b: bool) -> Result<Bounce, Error> {
    rt.set_out(f, Cell::logic(b));
    Ok(Bounce::Out)
}

fn equal_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let eq = rt.equal_values(rt.arg(f, 1), rt.arg(f, 2), false);
    logic_out(rt, f, eq)
}

fn not_equal_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let eq = rt.equal_values(rt.arg(f, 1), rt.arg(f, 2), false);
    logic_out(rt, f, !eq)
}

fn strict_equal_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let eq = rt.equal_values(rt.arg(f, 1), rt.arg(f, 2), true);
    logic_out(rt, f, eq)
}

fn strict_not_equal_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let eq = rt.equal_values(rt.arg(f, 1), rt.arg(f, 2), true);
    logic_out(rt, f, !eq)
}

/// Identity: series and contexts must be the same node, at the same index.
fn same_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let (a, b) = (rt.arg(f, 1), rt.arg(f, 2));
    let same = match (&a.payload, &b.payload) {
        (Payload::Series { .. }, _) | (Payload::Context { .. }, _) | (Payload::Action(_), _) => a.kind == b.kind && a.payload == b.payload,
        _ => rt.equal_values(a, b, true),
    };
    logic_out(rt, f, same)
}

fn lesser_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let o = rt.ordering(f)?;
    logic_out(rt, f, o == Ordering::Less)
}

fn greater_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let o = rt.ordering(f)?;
    logic_out(rt, f, o == Ordering::Greater)
}

fn lesser_or_equal_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let o = rt.ordering(f)?;
    logic_out(rt, f, o != Ordering::Greater)
}

fn greater_or_equal_q(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let o = rt.ordering(f)?;
    logic_out(rt, f, o != Ordering::Less)
}

fn not(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let truthy = rt.arg(f, 1).is_truthy();
    logic_out(rt, f, !truthy)
}

/// Shared by AND and OR: the right side only runs when `left` does not
/// already decide the answer.
fn short_circuit(rt: &mut Runtime, f: FrameId, decided_by: bool) -> Result<Bounce, Error> {
    let left = rt.condition_true(rt.arg(f, 1))?;
    if left == decided_by {
        return logic_out(rt, f, left);
    }
    let right = arg!(rt, f, 2);
    let mut out = Cell::null();
    if rt.do_block_throws(&mut out, &right)? {
        return Ok(Bounce::Thrown);
    }
    let truthy = rt.condition_true(&out)?;
    logic_out(rt, f, truthy)
}

fn and(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { short_circuit(rt, f, false) }

fn or(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> { short_circuit(rt, f, true) }

#[cfg(test)]
mod test_math {
    use super::{civil_from_days, days_from_civil};
    use crate::interpreter::core::*;

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_integer_math() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "add 1 2"), "3");
        assert_eq!(run(&mut rt, "10 - 4 * 2"), "12");
        assert_eq!(run(&mut rt, "7 / 2"), "3.5");
        assert_eq!(run(&mut rt, "8 / 2"), "4");
        assert_eq!(run(&mut rt, "remainder 7 3"), "1");
        assert_eq!(run(&mut rt, "1 / 0"), "error: zero-divide");
        assert_eq!(run(&mut rt, "9223372036854775807 + 1"), "error: overflow");
    }

    #[test]
    fn test_mixed_scalars() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "1 + 0.5"), "1.5");
        assert_eq!(run(&mut rt, "$1.50 + 1"), "$2.50");
        assert_eq!(run(&mut rt, "1x2 + 3x4"), "4x6");
        assert_eq!(run(&mut rt, "2x3 * 2"), "4x6");
        assert_eq!(run(&mut rt, "1.2.3 + 1"), "2.3.4");
        assert_eq!(run(&mut rt, "250.0.0 + 10"), "255.10.10");
        assert_eq!(run(&mut rt, "1:00 + 0:30"), "1:30:00");
        assert_eq!(run(&mut rt, "#\"a\" + 1"), "#\"b\"");
        assert_eq!(run(&mut rt, "\"a\" + 1"), "error: expect-arg");
    }

    #[test]
    fn test_dates_step_by_days() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "31-Dec-2025 + 1"), "1-Jan-2026");
        assert_eq!(run(&mut rt, "1-Mar-2024 - 1"), "29-Feb-2024");
        assert_eq!(run(&mut rt, "1-Jan-2026 - 1-Jan-2025"), "365");
        assert_eq!(civil_from_days(days_from_civil(1969, 7, 20)), (1969, 7, 20));
    }

    #[test]
    fn test_divide_path() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "12 / 4"), "3");
        assert_eq!(run(&mut rt, "1 + 2 / 3"), "1");
    }

    #[test]
    fn test_comparisons_and_logic() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "1 < 2"), "#[true]");
        assert_eq!(run(&mut rt, "max 3 7"), "7");
        assert_eq!(run(&mut rt, "min \"b\" \"a\""), "\"a\"");
        assert_eq!(run(&mut rt, "null = null"), "#[true]");
        assert_eq!(run(&mut rt, "not null"), "#[true]");
        assert_eq!(run(&mut rt, "even? 4"), "#[true]");
        assert_eq!(run(&mut rt, "true and [false]"), "#[false]");
        assert_eq!(run(&mut rt, "x: 0 false and [x: 1] x"), "0");
        assert_eq!(run(&mut rt, "x: 0 true or [x: 1] x"), "0");
        assert_eq!(run(&mut rt, "false or [1 = 1]"), "#[true]");
        assert_eq!(run(&mut rt, "b: [1] same? b b"), "#[true]");
        assert_eq!(run(&mut rt, "same? [1] [1]"), "#[false]");
    }
}
