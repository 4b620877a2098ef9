pub mod core_macros;
pub mod core;
pub mod core_json;
pub mod natives;
pub mod parse;

use crate::interpreter::core::{Config, Runtime};

macro_rules! try_or_return_error {
    ($inp:expr) => {
        match $inp {
            Ok(v) => v,
            Err(e) => return Err(e.to_string()),
        }
    };
}

pub fn new(config: Config) -> Result<Interpreter, String> { Interpreter::new(config) }

/// Embedding facade over a booted runtime: source text in, molded (or
/// JSON) result out.
pub struct Interpreter {
    rt: Runtime,
    json: bool,
}

impl Interpreter {
    fn new(config: Config) -> Result<Interpreter, String> {
        let rt = try_or_return_error!(Runtime::new(config));
        Ok(Interpreter { rt, json: false })
    }

    /// Print results as `{"type": .., "value": ..}` instead of molding.
    pub fn set_json(&mut self, json: bool) { self.json = json; }

    pub fn runtime(&mut self) -> &mut Runtime { &mut self.rt }

    /// Run source text. Void results come back as an empty string.
    pub fn execute(&mut self, input: &str) -> Result<String, String> {
        let value = try_or_return_error!(self.rt.run(input));
        if self.json {
            return Ok(try_or_return_error!(self.rt.to_json(&value)));
        }
        if value.is_void() {
            return Ok(String::new());
        }
        Ok(self.rt.mold(&value))
    }
}

#[cfg(test)]
mod test_interpreter {
    use super::*;

    #[test]
    fn test_execute() {
        let mut i = new(Config::default()).unwrap();
        assert_eq!(i.execute("1 + 2 * 3").unwrap(), "9");
        assert_eq!(i.execute("x: [a b] append x 'c").unwrap(), "[a b c]");
        assert_eq!(i.execute("print \"hi\"").unwrap(), "");
        let err = i.execute("1 + undefined-word").unwrap_err();
        assert!(err.contains("undefined-word"), "{}", err);
    }

    #[test]
    fn test_execute_json() {
        let mut i = new(Config::default().eval_dose(100)).unwrap();
        i.set_json(true);
        assert_eq!(i.execute("10").unwrap(), r#"{"type":"integer!","value":10}"#);
    }

    #[test]
    fn test_state_persists_between_calls() {
        let mut i = new(Config::default()).unwrap();
        i.execute("counter: 0").unwrap();
        i.execute("counter: counter + 1").unwrap();
        assert_eq!(i.execute("counter").unwrap(), "1");
        i.runtime().capture = Some(String::new());
        i.execute("print [counter]").unwrap();
        assert_eq!(i.runtime().capture.take().unwrap(), "1\n");
    }
}
