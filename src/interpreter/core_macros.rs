/// Return early with an error: either a prepared `Error` or a category,
/// id and message format.
#[macro_export]
macro_rules! fail {
    ($err:expr) => {
        return Err($err)
    };
    ($cat:ident, $id:expr, $($arg:tt)*) => {
        return Err($crate::interpreter::core::error::Error::new(
            $crate::interpreter::core::error::Category::$cat,
            $id,
            format!($($arg)*),
        ))
    };
}

/// Clone argument `n` of a running native's frame.
#[macro_export]
macro_rules! arg {
    ($rt:expr, $f:expr, $n:expr) => {
        $rt.arg($f, $n).clone()
    };
}

/// An entry of a native table.
#[macro_export]
macro_rules! native {
    (enfix $name:literal, $spec:expr, $dispatcher:path) => {
        $crate::interpreter::natives::Native { name: $name, spec: $spec, dispatcher: $dispatcher, enfix: true }
    };
    ($name:literal, $spec:expr, $dispatcher:path) => {
        $crate::interpreter::natives::Native { name: $name, spec: $spec, dispatcher: $dispatcher, enfix: false }
    };
}
