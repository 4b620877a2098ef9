use std::fmt;

use crate::reader::lexer::ScanError;

/// Broad classification of a raised error, reported as `** Script Error:` etc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Script,
    Syntax,
    Access,
    Resource,
    User,
    Internal,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Script => "script",
            Category::Syntax => "syntax",
            Category::Access => "access",
            Category::Resource => "resource",
            Category::User => "user",
            Category::Internal => "internal",
        }
    }

    pub fn from_name(name: &str) -> Category {
        match name {
            "script" => Category::Script,
            "syntax" => Category::Syntax,
            "access" => Category::Access,
            "resource" => Category::Resource,
            "internal" => Category::Internal,
            _ => Category::User,
        }
    }
}

/// A structured failure. Raised with `fail!` and propagated with `?` until a
/// trap restores the runtime and hands it back as an ERROR! value.
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    pub category: Category,
    pub id: String,
    pub message: String,
    pub where_: Option<String>,
    pub near: Option<String>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut cat = self.category.name().to_string();
        if let Some(first) = cat.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        write!(f, "** {} Error: {}", cat, self.message)?;
        if let Some(ref w) = self.where_ {
            write!(f, "\n** Where: {}", w)?;
        }
        if let Some(ref n) = self.near {
            write!(f, "\n** Near: {}", n)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ScanError> for Error {
    fn from(e: ScanError) -> Error { Error::syntax(e.id, format!("{} (line {})", e.message, e.line)) }
}

impl Error {
    pub fn new(category: Category, id: &str, message: String) -> Error {
        Error { category, id: id.to_string(), message, where_: None, near: None }
    }

    pub fn script(id: &str, message: String) -> Error { Error::new(Category::Script, id, message) }

    pub fn syntax(id: &str, message: String) -> Error { Error::new(Category::Syntax, id, message) }

    pub fn access(id: &str, message: String) -> Error { Error::new(Category::Access, id, message) }

    pub fn user(message: String) -> Error { Error::new(Category::User, "user", message) }

    pub fn internal(message: String) -> Error { Error::new(Category::Internal, "internal", message) }

    pub fn with_where(mut self, label: &str) -> Error {
        if self.where_.is_none() {
            self.where_ = Some(label.to_string());
        }
        self
    }

    pub fn with_near(mut self, near: String) -> Error {
        if self.near.is_none() {
            self.near = Some(near);
        }
        self
    }

    pub fn is(&self, id: &str) -> bool { self.id == id }
}

// Constructors for the ids the evaluator raises itself.

pub fn no_value(name: &str) -> Error { Error::script("no-value", format!("{} has no value", name)) }

pub fn not_bound(name: &str) -> Error { Error::script("not-bound", format!("{} word is not bound to a context", name)) }

pub fn no_arg(label: &str, param: &str) -> Error { Error::script("no-arg", format!("{} is missing its {} argument", label, param)) }

pub fn expect_arg(label: &str, param: &str, kind: &str) -> Error {
    Error::script("expect-arg", format!("{} does not allow {} for its {} argument", label, kind, param))
}

pub fn need_non_void(name: &str) -> Error { Error::script("need-non-void", format!("{} is VOID!", name)) }

pub fn need_non_null(name: &str) -> Error { Error::script("need-non-null", format!("{} needs a value, can't be null", name)) }

pub fn need_non_end(name: &str) -> Error { Error::script("need-non-end", format!("end was reached while trying to set {}", name)) }

pub fn literal_left_path() -> Error {
    Error::script("literal-left-path", "Use `->` to shove left enfix operands into PATH!s".to_string())
}

pub fn literal_left(name: &str) -> Error {
    Error::script("literal-left", format!("{} quotes its left argument but there was already evaluation on its left", name))
}

pub fn ambiguous_infix() -> Error {
    Error::script("ambiguous-infix", "Ambiguous infix expression--use GROUP! to clarify".to_string())
}

pub fn evaluative_quote(label: &str) -> Error {
    Error::script("evaluative-quote", format!("{} quotes its left argument, but that argument was evaluated", label))
}

pub fn void_evaluation() -> Error { Error::script("void-evaluation", "VOID! cells cannot be evaluated".to_string()) }

pub fn evaluate_null() -> Error { Error::script("evaluate-null", "null cannot be evaluated".to_string()) }

pub fn bad_path_pick(picker: &str) -> Error { Error::script("bad-path-pick", format!("cannot pick {}", picker)) }

pub fn bad_path_poke(picker: &str) -> Error { Error::script("bad-path-poke", format!("cannot poke {}", picker)) }

pub fn path_group_refused() -> Error { Error::script("path-group", "GROUP! in PATH! used with GET or SET (use REDUCE/EVAL)".to_string()) }

pub fn bad_refine(name: &str) -> Error { Error::script("bad-refine", format!("incompatible or invalid refinement: /{}", name)) }

pub fn bad_make(kind: &str, spec: &str) -> Error { Error::script("bad-make", format!("cannot MAKE/TO {} from: {}", kind, spec)) }

pub fn cannot_reflect(kind: &str, prop: &str) -> Error { Error::script("cannot-reflect", format!("cannot use {} on {} value", prop, kind)) }

pub fn out_of_range(value: &str) -> Error { Error::script("out-of-range", format!("value out of range: {}", value)) }

pub fn size_limit(value: &str) -> Error { Error::script("size-limit", format!("maximum limit reached: {}", value)) }

pub fn bad_func_def(item: &str) -> Error { Error::script("bad-func-def", format!("invalid function definition: {}", item)) }

pub fn no_catch(label: &str) -> Error { Error::script("no-catch", format!("missing CATCH for THROW of {}", label)) }

pub fn invalid_arg(value: &str) -> Error { Error::script("invalid-arg", format!("invalid argument: {}", value)) }

pub fn invalid_type(kind: &str) -> Error { Error::script("invalid-type", format!("{} type is not allowed here", kind)) }

pub fn zero_divide() -> Error { Error::new(Category::Script, "zero-divide", "attempt to divide by zero".to_string()) }

pub fn overflow() -> Error { Error::new(Category::Script, "overflow", "math or number overflow".to_string()) }

pub fn stack_overflow() -> Error { Error::new(Category::Internal, "stack-overflow", "stack overflow".to_string()) }

pub fn halted() -> Error { Error::new(Category::Internal, "halted", "halted by user or script".to_string()) }

pub fn parse_rule(rule: &str) -> Error { Error::syntax("parse-rule", format!("PARSE - invalid rule or usage of rule: {}", rule)) }

pub fn parse_end(rule: &str) -> Error { Error::syntax("parse-end", format!("PARSE - unexpected end of rule after: {}", rule)) }

pub fn parse_command(rule: &str) -> Error { Error::syntax("parse-command", format!("PARSE - command cannot be used as variable: {}", rule)) }

pub fn parse_variable(rule: &str) -> Error { Error::syntax("parse-variable", format!("PARSE - expected a variable, not: {}", rule)) }

pub fn parse_series(rule: &str) -> Error { Error::syntax("parse-series", format!("PARSE - input must be a series: {}", rule)) }

pub fn protected_word(name: &str) -> Error { Error::access("protected-word", format!("variable {} locked by PROTECT (see UNPROTECT)", name)) }

pub fn protected_series() -> Error { Error::access("protected", "protected value or series - cannot modify".to_string()) }

pub fn series_data_freed() -> Error { Error::access("series-data-freed", "series data has been freed (frame no longer running)".to_string()) }

#[cfg(test)]
mod test_error {
    use super::*;
    use crate::fail;

    fn raise() -> Result<(), Error> { fail!(Script, "bad-make", "cannot make {}", "thing") }

    #[test]
    fn test_display_has_category_and_where() {
        let e = no_value("foo").with_where("print").with_near("print foo".to_string());
        let text = e.to_string();
        assert!(text.starts_with("** Script Error: foo has no value"));
        assert!(text.contains("** Where: print"));
        assert!(text.contains("** Near: print foo"));
    }

    #[test]
    fn test_fail_macro_returns_structured_error() {
        let e = raise().unwrap_err();
        assert_eq!(e.category, Category::Script);
        assert!(e.is("bad-make"));
        assert_eq!(e.message, "cannot make thing");
    }

    #[test]
    fn test_where_is_not_overwritten() {
        let e = halted().with_where("inner").with_where("outer");
        assert_eq!(e.where_.as_deref(), Some("inner"));
        assert_eq!(Category::from_name("access"), Category::Access);
    }
}
