use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::Value as Json;

use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{Category, Error};
use crate::interpreter::core::series::SeriesId;
use crate::interpreter::core::symbol::SymId;
use crate::interpreter::core::Runtime;

/// A cell viewed through the runtime that owns its series, serialized as
/// `{"type": kind, "value": ...}`.
pub struct JsonCell<'a> {
    rt: &'a Runtime,
    cell: &'a Cell,
    /// Series already being written, so cycles come out as molded text.
    seen: Vec<SeriesId>,
}

impl<'a> JsonCell<'a> {
    pub fn new(rt: &'a Runtime, cell: &'a Cell) -> JsonCell<'a> { JsonCell { rt, cell, seen: Vec::new() } }

    fn nested(&self, cell: &'a Cell, id: SeriesId) -> JsonCell<'a> {
        let mut seen = self.seen.clone();
        seen.push(id);
        JsonCell { rt: self.rt, cell, seen }
    }
}

struct Items<'a>(&'a JsonCell<'a>, SeriesId, usize);

impl Serialize for Items<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let Items(parent, id, index) = *self;
        let cells = parent.rt.heap.array(id);
        let mut seq = serializer.serialize_seq(Some(cells.len().saturating_sub(index)))?;
        for cell in cells.iter().skip(index) {
            seq.serialize_element(&parent.nested(cell, id))?;
        }
        seq.end()
    }
}

struct Fields<'a>(&'a JsonCell<'a>, SeriesId);

impl Serialize for Fields<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let Fields(parent, ctx) = *self;
        let rt = parent.rt;
        let len = rt.context_len(ctx);
        let mut map = serializer.serialize_map(Some(len))?;
        for i in 1..=len {
            let name = rt.symbols.spelling(rt.key_sym(ctx, i));
            map.serialize_entry(name, &parent.nested(&rt.heap.array(ctx)[i], ctx))?;
        }
        map.end()
    }
}

impl Serialize for JsonCell<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (rt, cell) = (self.rt, self.cell);
        let type_name = if cell.is_null() { "null" } else { cell.type_kind().name() };
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", type_name)?;
        if cell.is_quoted() {
            map.serialize_entry("value", &rt.mold(cell))?;
            return map.end();
        }
        let cycle = cell.series_id().or_else(|| cell.varlist()).is_some_and(|id| self.seen.contains(&id));
        match cell.payload {
            _ if cycle => map.serialize_entry("value", &rt.mold(cell))?,
            Payload::None => map.serialize_entry("value", &())?,
            Payload::Logic(b) => map.serialize_entry("value", &b)?,
            Payload::Integer(i) => map.serialize_entry("value", &i)?,
            Payload::Decimal(d) => map.serialize_entry("value", &d)?,
            Payload::Char(c) => map.serialize_entry("value", &c.to_string())?,
            Payload::Word { sym, .. } => map.serialize_entry("value", rt.symbols.spelling(sym))?,
            Payload::Series { series, index } if cell.kind.is_any_array() => map.serialize_entry("value", &Items(self, series, index))?,
            Payload::Series { .. } if cell.kind.is_any_string() => map.serialize_entry("value", &rt.cell_text(cell))?,
            Payload::Context { varlist, .. } if cell.kind.is_any_context() && !cell.is(Kind::Frame) && rt.check_accessible(varlist).is_ok() => {
                map.serialize_entry("value", &Fields(self, varlist))?
            }
            _ => map.serialize_entry("value", &rt.mold(cell))?,
        }
        map.end()
    }
}

impl Runtime {
    pub fn to_json(&self, cell: &Cell) -> Result<String, Error> {
        serde_json::to_string(&JsonCell::new(self, cell)).map_err(|e| Error::new(Category::Internal, "bad-json", e.to_string()))
    }

    /// Build a value from JSON text. Objects become OBJECT!, arrays BLOCK!,
    /// and `{"type": ..., "value": ...}` pairs written by `to_json` come
    /// back as the kind they name.
    pub fn from_json(&mut self, text: &str) -> Result<Cell, Error> {
        let json: Json = serde_json::from_str(text).map_err(|e| Error::new(Category::Syntax, "bad-json", e.to_string()))?;
        self.json_to_cell(&json)
    }

    fn json_to_cell(&mut self, json: &Json) -> Result<Cell, Error> {
        let cell = match json {
            Json::Null => Cell::null(),
            Json::Bool(b) => Cell::logic(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Cell::integer(i),
                None => Cell::decimal(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => self.text_cell(Kind::Text, s),
            Json::Array(items) => {
                let mut cells = Vec::with_capacity(items.len());
                for item in items {
                    let cell = self.json_to_cell(item)?;
                    cells.push(if cell.is_null() { Cell::blank() } else { cell });
                }
                self.block_cell(Kind::Block, cells)
            }
            Json::Object(fields) => {
                if let Some(tagged) = self.tagged_json(fields)? {
                    return Ok(tagged);
                }
                let keys: Vec<SymId> = fields.keys().map(|k| self.symbols.intern(k)).collect();
                let ctx = self.make_context(Kind::Object, &keys);
                for (i, value) in fields.values().enumerate() {
                    let cell = self.json_to_cell(value)?;
                    self.heap.array_mut(ctx)[i + 1] = cell;
                }
                Cell::context(Kind::Object, ctx)
            }
        };
        Ok(cell)
    }

    fn tagged_json(&mut self, fields: &serde_json::Map<String, Json>) -> Result<Option<Cell>, Error> {
        let (kind, value) = match (fields.len(), fields.get("type").and_then(Json::as_str), fields.get("value")) {
            (2, Some(name), Some(value)) => match Kind::from_name(name) {
                Some(kind) => (kind, value),
                None if name == "null" => return Ok(Some(Cell::null())),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        let cell = match (kind, value) {
            (Kind::Blank, _) => Cell::blank(),
            (Kind::Void, _) => Cell::void(),
            (Kind::Logic, Json::Bool(b)) => Cell::logic(*b),
            (Kind::Integer, Json::Number(n)) if n.is_i64() => Cell::integer(n.as_i64().unwrap_or_default()),
            (Kind::Decimal, Json::Number(n)) => Cell::decimal(n.as_f64().unwrap_or(f64::NAN)),
            (Kind::Char, Json::String(s)) if s.chars().count() == 1 => Cell::char(s.chars().next().unwrap_or('\0')),
            (k, Json::String(s)) if k.is_any_word() => self.word(k, s),
            (k, Json::String(s)) if k.is_any_string() => self.text_cell(k, s),
            (k, Json::Array(_)) if k.is_any_array() => {
                let mut block = self.json_to_cell(value)?;
                block.kind = k;
                block
            }
            (Kind::Object, Json::Object(_)) => self.json_to_cell(value)?,
            (_, Json::String(molded)) => {
                let loaded = self.load(molded)?;
                match self.heap.array(loaded).first() {
                    Some(first) => first.clone(),
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(cell))
    }
}

#[cfg(test)]
mod test_json {
    use crate::interpreter::core::*;

    #[test]
    fn test_block_serialization() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let value = rt.run("[1 \"a\" x 2.5]").unwrap();
        let json = rt.to_json(&value).unwrap();
        assert_eq!(
            json,
            r#"{"type":"block!","value":[{"type":"integer!","value":1},{"type":"text!","value":"a"},{"type":"word!","value":"x"},{"type":"decimal!","value":2.5}]}"#
        );
    }

    #[test]
    fn test_object_and_null() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let value = rt.run("make object! [a: 1 b: _]").unwrap();
        assert_eq!(rt.to_json(&value).unwrap(), r#"{"type":"object!","value":{"a":{"type":"integer!","value":1},"b":{"type":"blank!","value":null}}}"#);
        assert_eq!(rt.to_json(&Cell::null()).unwrap(), r#"{"type":"null","value":null}"#);
    }

    #[test]
    fn test_cyclic_block_is_molded() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let value = rt.run("b: [1] append/only b b b").unwrap();
        let json = rt.to_json(&value).unwrap();
        assert!(json.starts_with(r#"{"type":"block!","value":[{"type":"integer!","value":1},{"type":"block!","value":"[1 "#));
    }

    #[test]
    fn test_from_plain_json() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        let value = rt.from_json(r#"{"a": [1, 2.5, null, "t"], "b": true}"#).unwrap();
        assert!(value.is(Kind::Object));
        let user = rt.user;
        let sym = rt.symbols.intern("o");
        let index = rt.append_key(user, sym, value);
        assert!(index > 0);
        let a = rt.run("o/a").unwrap();
        assert_eq!(rt.mold(&a), "[1 2.5 _ \"t\"]");
        let b = rt.run("o/b").unwrap();
        assert_eq!(rt.mold(&b), "#[true]");
        assert!(rt.from_json("{not json").unwrap_err().is("bad-json"));
    }

    #[test]
    fn test_tagged_values_come_back() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        for source in ["[a b/c 'd]", "10:30", "#\"x\"", "%file.txt"] {
            let value = rt.run(source).unwrap();
            let json = rt.to_json(&value).unwrap();
            let back = rt.from_json(&json).unwrap();
            assert_eq!(rt.mold(&back), rt.mold(&value), "{}", json);
        }
    }
}
