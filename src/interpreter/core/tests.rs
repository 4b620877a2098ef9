#![allow(unused_imports)]

use crate::interpreter::core::*;

#[cfg(test)]
mod test_evaluator {
    use super::*;

    fn eval_str(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    fn setup() -> Runtime {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("x: 42 y: 10").unwrap();
        rt
    }

    #[test]
    fn test_enfix_is_left_to_right() {
        let mut rt = setup();
        assert_eq!(eval_str(&mut rt, "1 + 2 * 3"), "9");
        assert_eq!(eval_str(&mut rt, "x - y"), "32");
        assert_eq!(eval_str(&mut rt, "negate 1 + 2"), "-3");
    }

    #[test]
    fn test_else_defers_past_if_branch() {
        let mut rt = setup();
        assert_eq!(eval_str(&mut rt, "if true [10] else [20]"), "10");
        assert_eq!(eval_str(&mut rt, "if false [10] else [20]"), "20");
        assert_eq!(eval_str(&mut rt, "if false [10] then [30]"), "null");
    }

    #[test]
    fn test_left_quote_takes_word_unevaluated() {
        let mut rt = setup();
        rt.run("->: enfix func [:left [word!] right [block!]] [reduce [left first right]]").unwrap();
        assert_eq!(eval_str(&mut rt, "x: 5 x -> [x]"), "[x x]");
        assert_eq!(eval_str(&mut rt, "x"), "5");
    }

    #[test]
    fn test_invisible_keeps_prior_result() {
        let mut rt = setup();
        assert_eq!(eval_str(&mut rt, "1 + 2 comment \"hi\" * 3"), "9");
        assert_eq!(eval_str(&mut rt, "10 elide 20"), "10");
        assert_eq!(eval_str(&mut rt, "comment [nothing]"), "null");
    }

    #[test]
    fn test_path_refinements_reach_fulfiller() {
        let mut rt = setup();
        assert_eq!(eval_str(&mut rt, "list: [] append/only/dup list [x] 3"), "[[x] [x] [x]]");
        assert_eq!(eval_str(&mut rt, "append/dup/only copy [] [y] 2"), "[[y] [y]]");
        assert_eq!(eval_str(&mut rt, "append/bogus [] 1"), "error: bad-refine");
    }

    #[test]
    fn test_parse_collect_rollback() {
        let mut rt = setup();
        rt.run("parse [a b c] [collect x [keep 'a keep 'z | keep 'a keep 'b keep 'c]]").unwrap();
        assert_eq!(eval_str(&mut rt, "x"), "[a b c]");
    }

    #[test]
    fn test_arguments_evaluate_left_to_right() {
        let mut rt = setup();
        rt.run("log: copy [] note: func [v] [append log v v]").unwrap();
        assert_eq!(eval_str(&mut rt, "add note 1 note 2"), "3");
        assert_eq!(eval_str(&mut rt, "log"), "[1 2]");
    }

    #[test]
    fn test_inert_values_evaluate_to_themselves() {
        let mut rt = setup();
        for source in ["10", "\"text\"", "[a b]", "#\"c\"", "1.5", "%file", "<tag>", "_"] {
            let once = eval_str(&mut rt, source);
            assert_eq!(once, source);
            let twice = eval_str(&mut rt, &format!("do [{}]", source));
            assert_eq!(twice, source);
        }
    }

    #[test]
    fn test_quoting_round_trip() {
        let mut rt = setup();
        assert_eq!(eval_str(&mut rt, "quote/depth [a] 3"), "'''[a]");
        assert_eq!(eval_str(&mut rt, "unquote/depth quote/depth x 2 2"), "42");
        assert_eq!(eval_str(&mut rt, "'''a"), "''a");
        assert_eq!(eval_str(&mut rt, "lit 'a"), "'a");
    }

    #[test]
    fn test_set_word_reads_back() {
        let mut rt = setup();
        assert_eq!(eval_str(&mut rt, "z: 1 + 1 z"), "2");
        assert_eq!(eval_str(&mut rt, "a: b: 3 reduce [a b]"), "[3 3]");
        assert_eq!(eval_str(&mut rt, "[p q]: [1 2] reduce [p q]"), "[1 2]");
        assert_eq!(eval_str(&mut rt, "o: make object! [f: 1] o/f: 5 o/f"), "5");
    }

    #[test]
    fn test_argument_endability() {
        let mut rt = setup();
        assert_eq!(eval_str(&mut rt, "add 1"), "error: no-arg");
        rt.run("maybe: func [v [<end> integer!]] [either null? :v [0] [v]]").unwrap();
        assert_eq!(eval_str(&mut rt, "maybe"), "0");
        assert_eq!(eval_str(&mut rt, "maybe 7"), "7");
    }

    #[test]
    fn test_throw_value_reaches_catch_unchanged() {
        let mut rt = setup();
        rt.run("pass: func [b] [do b]").unwrap();
        assert_eq!(eval_str(&mut rt, "catch [pass [pass [throw [1 2]]] 99]"), "[1 2]");
        assert_eq!(eval_str(&mut rt, "throw 1"), "error: no-catch");
        assert_eq!(eval_str(&mut rt, "quit/with 5"), "5");
    }

    #[test]
    fn test_failures_unwind_frames_and_stack() {
        let mut rt = setup();
        rt.run("f: func [x] [x + undefined-word]").unwrap();
        let err = rt.run("f 1").unwrap_err();
        assert!(err.is("no-value"));
        assert_eq!(err.where_.as_deref(), Some("+"));
        assert!(rt.frames.is_empty());
        assert!(rt.feeds.is_empty());
        assert!(rt.stack.is_empty());
        assert!(rt.thrown.is_none());
        assert_eq!(eval_str(&mut rt, "x"), "42");
    }

    #[test]
    fn test_frames_are_inaccessible_after_return() {
        let mut rt = setup();
        rt.run("keep-frame: func [n] [binding of 'n]").unwrap();
        assert_eq!(eval_str(&mut rt, "fr: keep-frame 1 fr/n"), "error: series-data-freed");
    }

    #[test]
    fn test_recycle_keeps_reachable_values() {
        let mut rt = setup();
        rt.run("data: [a [b c] \"text\"] loop 50 [copy [garbage]]").unwrap();
        let before = rt.heap.live;
        let swept = rt.recycle();
        assert!(swept > 0);
        assert!(rt.heap.live < before);
        assert_eq!(eval_str(&mut rt, "data"), "[a [b c] \"text\"]");
    }

    #[test]
    fn test_signals() {
        let mut rt = Runtime::new(Config::default().eval_dose(50)).unwrap();
        rt.request_halt();
        assert_eq!(eval_str(&mut rt, "loop 1000 [1 + 1]"), "error: halted");
        assert_eq!(eval_str(&mut rt, "loop 1000 [1 + 1]"), "2");
        rt.request_recycle();
        assert_eq!(eval_str(&mut rt, "loop 100 [copy [a]] 3"), "3");
    }

    #[test]
    fn test_deep_recursion_fails_cleanly_with_defaults() {
        let mut rt = setup();
        rt.run("f: func [n] [either n > 0 [f n - 1] [0]]").unwrap();
        assert_eq!(eval_str(&mut rt, "f 10"), "0");
        assert_eq!(eval_str(&mut rt, "f 100000"), "error: stack-overflow");
        assert!(rt.frames.is_empty());
        assert!(rt.stack_base.is_none());
        assert_eq!(eval_str(&mut rt, "f 3"), "0");
    }

    #[test]
    fn test_native_stack_budget_is_enforced() {
        let mut rt = Runtime::new(Config::default().max_depth(1_000_000).stack_bytes(64 * 1024)).unwrap();
        rt.run("f: func [n] [either n > 0 [f n - 1] [0]]").unwrap();
        assert_eq!(eval_str(&mut rt, "f 100000"), "error: stack-overflow");
        assert!(rt.frames.is_empty());
        assert!(rt.feeds.is_empty());
    }

    #[test]
    fn test_runaway_recursion_is_an_error() {
        let mut rt = Runtime::new(Config::default().max_depth(64)).unwrap();
        rt.run("deep: func [] [deep]").unwrap();
        assert_eq!(eval_str(&mut rt, "deep"), "error: stack-overflow");
        assert!(rt.frames.is_empty());
        assert_eq!(eval_str(&mut rt, "1 + 1"), "2");
    }
}
