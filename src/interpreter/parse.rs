use phf::phf_map;
use tracing::{debug, trace};

use crate::interpreter::core::action::Bounce;
use crate::interpreter::core::cell::*;
use crate::interpreter::core::error::{self, Error};
use crate::interpreter::core::frame::FrameId;
use crate::interpreter::core::series::SeriesId;
use crate::interpreter::core::{Runtime, Specifier};
use crate::interpreter::natives::Native;
use crate::{arg, fail, native};

pub const NATIVES: &[Native] = &[
    native!("parse", "input [any-series!] rules [block!] /case", parse),
    native!("parse-accept", "", parse_accept),
    native!("parse-reject", "", parse_reject),
];

/// Result of matching one rule at an input position.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Step {
    Matched(usize),
    /// Matched, and an ACCEPT ended the rule block early. Loops stop.
    Accepted(usize),
    NotFound,
    Thrown,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Keyword {
    While,
    Any,
    Some,
    Opt,
    Not,
    Ahead,
    Copy,
    Set,
    Collect,
    Keep,
    Only,
    Remove,
    Insert,
    Change,
    If,
    Accept,
    Break,
    Reject,
    Fail,
    Mark,
    Seek,
    Into,
    Do,
    Lit,
    To,
    Thru,
    Skip,
    End,
}

/// PARSE keywords, by lowercase spelling.
static KEYWORDS: phf::Map<&'static str, Keyword> = phf_map! {
    "while" => Keyword::While,
    "any" => Keyword::Any,
    "some" => Keyword::Some,
    "opt" => Keyword::Opt,
    "not" => Keyword::Not,
    "ahead" => Keyword::Ahead,
    "copy" => Keyword::Copy,
    "set" => Keyword::Set,
    "collect" => Keyword::Collect,
    "keep" => Keyword::Keep,
    "only" => Keyword::Only,
    "remove" => Keyword::Remove,
    "insert" => Keyword::Insert,
    "change" => Keyword::Change,
    "if" => Keyword::If,
    "accept" => Keyword::Accept,
    "break" => Keyword::Break,
    "reject" => Keyword::Reject,
    "fail" => Keyword::Fail,
    "mark" => Keyword::Mark,
    "seek" => Keyword::Seek,
    "into" => Keyword::Into,
    "do" => Keyword::Do,
    "lit" => Keyword::Lit,
    "quote" => Keyword::Lit,
    "to" => Keyword::To,
    "thru" => Keyword::Thru,
    "skip" => Keyword::Skip,
    "end" => Keyword::End,
};

/// Cursor over a rule block.
#[derive(Clone, Copy, Debug)]
struct Rules {
    array: SeriesId,
    index: usize,
    specifier: Specifier,
}

/// The series being matched, plus what the rules can change about the run.
struct ParseState {
    input: Cell,
    series: SeriesId,
    specifier: Specifier,
    case: bool,
    /// Array KEEP pushes into, while inside a COLLECT.
    collection: Option<SeriesId>,
}

impl Runtime {
    fn rules_of(&self, block: &Cell) -> Rules {
        Rules { array: self.array_of(block), index: block.index(), specifier: self.derive_specifier(block, None) }
    }

    fn rule_at(&mut self, rules: &Rules) -> Option<Cell> {
        let cell = self.heap.array(rules.array).get(rules.index)?.clone();
        Some(self.derelativize(&cell, rules.specifier))
    }

    fn take_rule(&mut self, rules: &mut Rules, after: &str) -> Result<Cell, Error> {
        match self.rule_at(rules) {
            Some(rule) => {
                rules.index += 1;
                Ok(rule)
            }
            None => fail!(error::parse_end(after)),
        }
    }

    fn keyword(&self, rule: &Cell) -> Option<Keyword> {
        if !rule.is(Kind::Word) {
            return None;
        }
        rule.word_sym().and_then(|sym| KEYWORDS.get(self.symbols.lower(sym)).copied())
    }

    fn peek_keyword(&mut self, rules: &Rules, want: Keyword) -> bool {
        match self.rule_at(rules) {
            Some(rule) => self.keyword(&rule) == Some(want),
            None => false,
        }
    }

    fn take_only(&mut self, rules: &mut Rules) -> bool {
        let only = self.peek_keyword(rules, Keyword::Only);
        if only {
            rules.index += 1;
        }
        only
    }

    /// Advance past one complete rule without running it.
    fn skip_item(&mut self, rules: &mut Rules) -> Result<(), Error> {
        let rule = self.take_rule(rules, "rule")?;
        if rule.is(Kind::Integer) {
            if matches!(self.rule_at(rules), Some(ref r) if r.is(Kind::Integer)) {
                rules.index += 1;
            }
            return self.skip_item(rules);
        }
        let keyword = match self.keyword(&rule) {
            Some(k) => k,
            None => return Ok(()),
        };
        let name = self.mold(&rule);
        match keyword {
            Keyword::While | Keyword::Any | Keyword::Some | Keyword::Opt | Keyword::Not | Keyword::Ahead | Keyword::Remove | Keyword::To | Keyword::Thru | Keyword::Do => self.skip_item(rules),
            Keyword::Copy | Keyword::Set | Keyword::Collect => {
                self.take_rule(rules, &name)?;
                self.skip_item(rules)
            }
            Keyword::Keep => {
                self.take_only(rules);
                match self.rule_at(rules) {
                    Some(r) if r.is(Kind::GetBlock) => {
                        rules.index += 1;
                        Ok(())
                    }
                    _ => self.skip_item(rules),
                }
            }
            Keyword::Insert => {
                self.take_only(rules);
                self.take_rule(rules, &name).map(|_| ())
            }
            Keyword::Change => {
                self.take_only(rules);
                self.skip_item(rules)?;
                self.take_rule(rules, &name).map(|_| ())
            }
            Keyword::Into | Keyword::Mark | Keyword::Seek | Keyword::If | Keyword::Lit => self.take_rule(rules, &name).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn input_len(&self, st: &ParseState) -> usize { self.heap.len(st.series) }

    fn input_at_position(&self, st: &ParseState, pos: usize) -> Cell {
        let mut at = st.input.clone();
        at.set_index(pos.min(self.input_len(st)));
        at
    }

    /// The element of the input at `pos`: a value, a char or a byte.
    fn input_element(&mut self, st: &ParseState, pos: usize) -> Option<Cell> {
        if st.input.kind.is_any_array() {
            let cell = self.heap.array(st.series).get(pos)?.clone();
            return Some(self.derelativize(&cell, st.specifier));
        }
        if st.input.is(Kind::Binary) {
            return self.heap.binary(st.series).get(pos).map(|b| Cell::integer(*b as i64));
        }
        self.heap.text(st.series).char_at(pos).map(Cell::char)
    }

    /// Match literal text (or bytes) at `pos` in string or binary input.
    fn match_text(&self, st: &ParseState, pos: usize, needle: &str) -> Option<usize> {
        if st.input.is(Kind::Binary) {
            let bytes = self.heap.binary(st.series);
            let n = needle.len();
            return (pos + n <= bytes.len() && &bytes[pos..pos + n] == needle.as_bytes()).then_some(pos + n);
        }
        let text = self.heap.text(st.series);
        let n = needle.chars().count();
        if pos + n > text.len() {
            return None;
        }
        let hay = text.slice(pos, pos + n);
        let same = if st.case { hay == needle } else { hay.to_lowercase() == needle.to_lowercase() };
        same.then_some(pos + n)
    }

    /// Match a value literally against the input at `pos`.
    fn match_literal(&mut self, st: &ParseState, value: &Cell, pos: usize) -> Step {
        if st.input.kind.is_any_array() {
            return match self.input_element(st, pos) {
                Some(elem) if self.equal_values(&elem, value, st.case) => Step::Matched(pos + 1),
                _ => Step::NotFound,
            };
        }
        let needle = if value.is(Kind::Tag) { self.mold(value) } else { self.form(value) };
        match self.match_text(st, pos, &needle) {
            Some(next) => Step::Matched(next),
            None => Step::NotFound,
        }
    }

    fn eval_rule_group_throws(&mut self, out: &mut Cell, group: &Cell) -> Result<bool, Error> {
        let mut code = group.clone();
        code.kind = Kind::Group;
        self.do_block_throws(out, &code)
    }

    /// Run a block of rules at `pos`, catching ACCEPT and REJECT thrown
    /// from inside it.
    fn subparse_throws(&mut self, st: &mut ParseState, rules: Rules, pos: usize) -> Result<Step, Error> {
        trace!(pos, "subparse");
        self.check_native_stack()?;
        let step = self.subparse_alternates(st, rules, pos)?;
        if step != Step::Thrown {
            return Ok(step);
        }
        let specials = self.specials();
        match self.thrown_label().and_then(|l| l.as_action()) {
            Some(a) if a == specials.parse_accept => {
                let thrown = self.take_thrown();
                let at = thrown.value.as_integer().unwrap_or(pos as i64).max(0) as usize;
                Ok(Step::Accepted(at))
            }
            Some(a) if a == specials.parse_reject => {
                self.take_thrown();
                Ok(Step::NotFound)
            }
            _ => Ok(Step::Thrown),
        }
    }

    fn subparse_alternates(&mut self, st: &mut ParseState, mut rules: Rules, start: usize) -> Result<Step, Error> {
        let collected = st.collection.map(|c| self.heap.len(c));
        let mut pos = start;
        loop {
            let rule = match self.rule_at(&rules) {
                Some(r) => r,
                None => return Ok(Step::Matched(pos)),
            };
            if rule.is(Kind::Bar) {
                return Ok(Step::Matched(pos));
            }
            match self.parse_item(st, &mut rules, pos)? {
                Step::Matched(p) | Step::Accepted(p) => {
                    pos = p;
                    continue;
                }
                Step::Thrown => return Ok(Step::Thrown),
                Step::NotFound => {}
            }
            if let (Some(c), Some(len)) = (st.collection, collected) {
                self.heap.array_mut(c).truncate(len);
            }
            loop {
                match self.rule_at(&rules) {
                    None => return Ok(Step::NotFound),
                    Some(r) => {
                        rules.index += 1;
                        if r.is(Kind::Bar) {
                            break;
                        }
                    }
                }
            }
            pos = start;
        }
    }

    /// Match one rule, with whatever counts and keywords prefix it.
    /// `rules` is always advanced past the whole rule, matched or not.
    fn parse_item(&mut self, st: &mut ParseState, rules: &mut Rules, pos: usize) -> Result<Step, Error> {
        let rule = self.take_rule(rules, "rule")?;
        if let Some(min) = rule.as_integer().filter(|_| rule.is(Kind::Integer)) {
            let max = match self.rule_at(rules) {
                Some(r) if r.is(Kind::Integer) => {
                    rules.index += 1;
                    if matches!(self.rule_at(rules), Some(ref third) if third.is(Kind::Integer)) {
                        fail!(error::parse_rule(&self.mold(&rule)))
                    }
                    r.as_integer().unwrap_or(min)
                }
                _ => min,
            };
            if min < 0 || max < min {
                fail!(error::parse_rule(&self.mold(&rule)))
            }
            return self.parse_repeat(st, rules, pos, min as usize, max as usize);
        }
        if rule.is(Kind::SetWord) {
            let here = self.input_at_position(st, pos);
            self.set_var(&rule, None, &here)?;
            return Ok(Step::Matched(pos));
        }
        if rule.is(Kind::GetWord) {
            let target = self.get_var(&rule, None)?;
            return self.seek(st, &target).map(Step::Matched);
        }
        if rule.is(Kind::Group) {
            let mut discarded = Cell::null();
            if self.eval_rule_group_throws(&mut discarded, &rule)? {
                return Ok(Step::Thrown);
            }
            return Ok(Step::Matched(pos));
        }
        if rule.is(Kind::GetGroup) {
            let mut result = Cell::null();
            if self.eval_rule_group_throws(&mut result, &rule)? {
                return Ok(Step::Thrown);
            }
            if result.is_null() {
                return Ok(Step::Matched(pos));
            }
            return self.match_value(st, &result, pos);
        }
        if let Some(keyword) = self.keyword(&rule) {
            return self.parse_keyword(st, keyword, &rule, rules, pos);
        }
        if rule.is(Kind::Word) {
            let value = self.get_var(&rule, None)?;
            return self.match_value(st, &value, pos);
        }
        if rule.is(Kind::Path) {
            let mut value = Cell::null();
            if self.get_path_throws(&mut value, &rule, None, 0)? {
                return Ok(Step::Thrown);
            }
            return self.match_value(st, &value, pos);
        }
        self.match_value(st, &rule, pos)
    }

    fn parse_repeat(&mut self, st: &mut ParseState, rules: &mut Rules, pos: usize, min: usize, max: usize) -> Result<Step, Error> {
        let start = *rules;
        self.skip_item(rules)?;
        let mut count = 0;
        let mut at = pos;
        while count < max {
            let mut each = start;
            match self.parse_item(st, &mut each, at)? {
                Step::Matched(p) => {
                    count += 1;
                    if p == at && max == usize::MAX {
                        break;
                    }
                    at = p;
                }
                Step::Accepted(p) => {
                    count += 1;
                    at = p;
                    break;
                }
                Step::NotFound => break,
                Step::Thrown => return Ok(Step::Thrown),
            }
        }
        Ok(if count < min { Step::NotFound } else { Step::Matched(at) })
    }

    fn parse_keyword(&mut self, st: &mut ParseState, keyword: Keyword, rule: &Cell, rules: &mut Rules, pos: usize) -> Result<Step, Error> {
        let name = self.mold(rule);
        let len = self.input_len(st);
        let step = match keyword {
            Keyword::While | Keyword::Any => self.parse_repeat(st, rules, pos, 0, usize::MAX)?,
            Keyword::Some => self.parse_repeat(st, rules, pos, 1, usize::MAX)?,
            Keyword::Opt => self.parse_repeat(st, rules, pos, 0, 1)?,
            Keyword::Not => match self.parse_item(st, rules, pos)? {
                Step::Matched(_) | Step::Accepted(_) => Step::NotFound,
                Step::NotFound => Step::Matched(pos),
                Step::Thrown => Step::Thrown,
            },
            Keyword::Ahead => match self.parse_item(st, rules, pos)? {
                Step::Matched(_) | Step::Accepted(_) => Step::Matched(pos),
                other => other,
            },
            Keyword::Copy | Keyword::Set => {
                let target = self.parse_target(rules, &name)?;
                let step = self.parse_item(st, rules, pos)?;
                if let Step::Matched(end) | Step::Accepted(end) = step {
                    let value = if keyword == Keyword::Copy {
                        let from = self.input_at_position(st, pos);
                        self.copy_value(&from, Some(end.saturating_sub(pos)), false)?
                    } else if end > pos {
                        self.input_element(st, pos).unwrap_or_else(Cell::null)
                    } else {
                        Cell::null()
                    };
                    self.set_var(&target, None, &value)?;
                }
                step
            }
            Keyword::Collect => {
                let target = self.parse_target(rules, &name)?;
                let collection = self.alloc_array(vec![]);
                let block = Cell::series(Kind::Block, collection, 0);
                let mark = self.guard(&block);
                let outer = st.collection.replace(collection);
                let step = self.parse_item(st, rules, pos);
                st.collection = outer;
                self.unguard_to(mark);
                let step = step?;
                if let Step::Matched(_) | Step::Accepted(_) = step {
                    self.set_var(&target, None, &block)?;
                }
                step
            }
            Keyword::Keep => self.parse_keep(st, rules, pos, &name)?,
            Keyword::Remove => match self.parse_item(st, rules, pos)? {
                Step::Matched(end) | Step::Accepted(end) => {
                    let input = st.input.clone();
                    self.remove_span(&input, pos, end.saturating_sub(pos))?;
                    Step::Matched(pos)
                }
                other => other,
            },
            Keyword::Insert => {
                let only = self.take_only(rules);
                let value = match self.rule_value(rules, &name)? {
                    Some(v) => v,
                    None => return Ok(Step::Thrown),
                };
                let input = st.input.clone();
                Step::Matched(self.insert_at(&input, pos, &value, only, None, 1)?)
            }
            Keyword::Change => {
                let only = self.take_only(rules);
                let step = self.parse_item(st, rules, pos)?;
                let value = match self.rule_value(rules, &name)? {
                    Some(v) => v,
                    None => return Ok(Step::Thrown),
                };
                match step {
                    Step::Matched(end) | Step::Accepted(end) => {
                        let input = st.input.clone();
                        self.remove_span(&input, pos, end.saturating_sub(pos))?;
                        Step::Matched(self.insert_at(&input, pos, &value, only, None, 1)?)
                    }
                    other => other,
                }
            }
            Keyword::If => {
                let condition = self.take_rule(rules, &name)?;
                if !condition.is(Kind::Group) {
                    fail!(error::parse_rule(&self.mold(&condition)))
                }
                let mut result = Cell::null();
                if self.eval_rule_group_throws(&mut result, &condition)? {
                    return Ok(Step::Thrown);
                }
                if result.is_truthy() {
                    Step::Matched(pos)
                } else {
                    Step::NotFound
                }
            }
            Keyword::Accept | Keyword::Break => {
                let label = Cell::action(self.specials().parse_accept, Binding::Unbound);
                self.init_thrown(label, Cell::integer(pos as i64));
                Step::Thrown
            }
            Keyword::Reject => {
                let label = Cell::action(self.specials().parse_reject, Binding::Unbound);
                self.init_thrown(label, Cell::null());
                Step::Thrown
            }
            Keyword::Fail => Step::NotFound,
            Keyword::Mark => {
                let target = self.parse_target(rules, &name)?;
                let here = self.input_at_position(st, pos);
                self.set_var(&target, None, &here)?;
                Step::Matched(pos)
            }
            Keyword::Seek => {
                let target = self.take_rule(rules, &name)?;
                let value = if target.kind.is_any_word() && target.quote == 0 { self.get_var(&target, None)? } else { target };
                Step::Matched(self.seek(st, &value)?)
            }
            Keyword::Into => self.parse_into(st, rules, pos, &name)?,
            Keyword::Do => self.parse_do(st, rules, pos)?,
            Keyword::Lit => {
                let value = self.take_rule(rules, &name)?;
                self.match_literal(st, &value, pos)
            }
            Keyword::To | Keyword::Thru => {
                if self.peek_keyword(rules, Keyword::End) {
                    rules.index += 1;
                    return Ok(Step::Matched(len));
                }
                let start = *rules;
                self.skip_item(rules)?;
                let mut found = Step::NotFound;
                for at in pos..=len {
                    let mut each = start;
                    match self.parse_item(st, &mut each, at)? {
                        Step::Matched(end) | Step::Accepted(end) => {
                            found = Step::Matched(if keyword == Keyword::To { at } else { end });
                            break;
                        }
                        Step::Thrown => return Ok(Step::Thrown),
                        Step::NotFound => {}
                    }
                }
                found
            }
            Keyword::Skip => {
                if pos < len {
                    Step::Matched(pos + 1)
                } else {
                    Step::NotFound
                }
            }
            Keyword::End => {
                if pos >= len {
                    Step::Matched(pos)
                } else {
                    Step::NotFound
                }
            }
            Keyword::Only => fail!(error::parse_rule(&name)),
        };
        Ok(step)
    }

    /// The WORD! or SET-WORD! following COPY, SET, COLLECT or MARK.
    fn parse_target(&mut self, rules: &mut Rules, after: &str) -> Result<Cell, Error> {
        let target = self.take_rule(rules, after)?;
        if !(target.is(Kind::Word) || target.is(Kind::SetWord)) {
            fail!(error::parse_variable(&self.mold(&target)))
        }
        if self.keyword(&target).is_some() {
            fail!(error::parse_command(&self.mold(&target)))
        }
        Ok(target)
    }

    /// The value INSERT or CHANGE puts in: groups are evaluated, words
    /// fetched, quoted values unquoted once. `None` if a group threw.
    fn rule_value(&mut self, rules: &mut Rules, after: &str) -> Result<Option<Cell>, Error> {
        let mut value = self.take_rule(rules, after)?;
        if value.is(Kind::Group) {
            let mut result = Cell::null();
            if self.eval_rule_group_throws(&mut result, &value)? {
                return Ok(None);
            }
            return Ok(Some(result));
        }
        if value.is(Kind::Word) {
            return self.get_var(&value, None).map(Some);
        }
        if value.is_quoted() {
            unquotify(&self.heap, &mut value, 1);
        }
        Ok(Some(value))
    }

    fn parse_keep(&mut self, st: &mut ParseState, rules: &mut Rules, pos: usize, name: &str) -> Result<Step, Error> {
        let collection = match st.collection {
            Some(c) => c,
            None => fail!(error::parse_rule(name)),
        };
        let only = self.take_only(rules);
        if let Some(block) = self.rule_at(rules).filter(|r| r.is(Kind::GetBlock)) {
            rules.index += 1;
            let array = self.array_of(&block);
            let spec = self.derive_specifier(&block, None);
            let mut reduced = Cell::null();
            if self.reduce_throws(&mut reduced, array, block.index(), spec)? {
                return Ok(Step::Thrown);
            }
            let items = self.heap.array(self.array_of(&reduced)).clone();
            self.keep_items(collection, items, only);
            return Ok(Step::Matched(pos));
        }
        let step = self.parse_item(st, rules, pos)?;
        if let Step::Matched(end) | Step::Accepted(end) = step {
            let count = end.saturating_sub(pos);
            if st.input.kind.is_any_array() {
                let items: Vec<Cell> = (pos..end).filter_map(|i| self.input_element(st, i)).collect();
                self.keep_items(collection, items, only);
            } else if count > 0 {
                let from = self.input_at_position(st, pos);
                let span = self.copy_value(&from, Some(count), false)?;
                self.heap.array_mut(collection).push(span);
            }
        }
        Ok(step)
    }

    fn keep_items(&mut self, collection: SeriesId, items: Vec<Cell>, only: bool) {
        if only {
            let block = self.block_cell(Kind::Block, items);
            self.heap.array_mut(collection).push(block);
        } else {
            self.heap.array_mut(collection).extend(items);
        }
    }

    fn parse_into(&mut self, st: &mut ParseState, rules: &mut Rules, pos: usize, name: &str) -> Result<Step, Error> {
        let mut sub_rules = self.take_rule(rules, name)?;
        if sub_rules.is(Kind::Word) {
            sub_rules = self.get_var(&sub_rules, None)?;
        }
        if !sub_rules.is(Kind::Block) {
            fail!(error::parse_rule(&self.mold(&sub_rules)))
        }
        let sub = match self.input_element(st, pos) {
            Some(v) if v.quote == 0 && v.kind.is_any_series() => v,
            _ => return Ok(Step::NotFound),
        };
        let mut inner = ParseState {
            series: self.array_of(&sub),
            specifier: self.derive_specifier(&sub, None),
            input: sub.clone(),
            case: st.case,
            collection: st.collection,
        };
        let rules = self.rules_of(&sub_rules);
        let tail = self.input_len(&inner);
        Ok(match self.subparse_throws(&mut inner, rules, sub.index())? {
            Step::Matched(end) | Step::Accepted(end) if end == tail => Step::Matched(pos + 1),
            Step::Thrown => Step::Thrown,
            _ => Step::NotFound,
        })
    }

    /// Evaluate one expression of the input, then match the rule that
    /// follows against its result.
    fn parse_do(&mut self, st: &mut ParseState, rules: &mut Rules, pos: usize) -> Result<Step, Error> {
        if !st.input.kind.is_any_array() {
            fail!(error::parse_rule("do"))
        }
        if pos >= self.input_len(st) {
            self.skip_item(rules)?;
            return Ok(Step::NotFound);
        }
        let mut result = Cell::null();
        let (threw, next) = self.eval_step_at_throws(&mut result, st.series, pos, st.specifier)?;
        if threw {
            return Ok(Step::Thrown);
        }
        if result.is_end() {
            self.skip_item(rules)?;
            return Ok(Step::NotFound);
        }
        let holder = self.block_cell(Kind::Block, vec![result]);
        let mark = self.guard(&holder);
        let mut single = ParseState {
            series: self.array_of(&holder),
            specifier: None,
            input: holder,
            case: st.case,
            collection: st.collection,
        };
        let step = self.parse_item(&mut single, rules, 0);
        self.unguard_to(mark);
        Ok(match step? {
            Step::Matched(1) | Step::Accepted(1) => Step::Matched(next),
            Step::Thrown => Step::Thrown,
            _ => Step::NotFound,
        })
    }

    fn seek(&self, st: &ParseState, target: &Cell) -> Result<usize, Error> {
        let len = self.input_len(st);
        if let Some(i) = target.as_integer().filter(|_| target.is(Kind::Integer)) {
            return Ok((i.max(1) as usize - 1).min(len));
        }
        if target.quote == 0 && target.kind.is_any_series() {
            if self.array_of(target) != st.series {
                fail!(error::parse_series(&self.mold(target)))
            }
            return Ok(target.index().min(len));
        }
        fail!(error::parse_variable(&self.mold(target)))
    }

    /// Match a fetched or literal rule value.
    fn match_value(&mut self, st: &mut ParseState, rule: &Cell, pos: usize) -> Result<Step, Error> {
        if rule.is_quoted() {
            let mut literal = rule.clone();
            unquotify(&self.heap, &mut literal, 1);
            return Ok(self.match_literal(st, &literal, pos));
        }
        let step = match rule.kind {
            Kind::Blank => Step::Matched(pos),
            Kind::Logic => {
                if rule.is_truthy() {
                    Step::Matched(pos)
                } else {
                    Step::NotFound
                }
            }
            Kind::Block => {
                let rules = self.rules_of(rule);
                self.subparse_throws(st, rules, pos)?
            }
            Kind::Datatype | Kind::Typeset => match self.input_element(st, pos) {
                Some(elem) => {
                    let hit = match rule.payload {
                        Payload::Datatype(k) => elem.type_kind() == k,
                        Payload::Typeset(ref ts) => self.type_matches(ts, &elem),
                        _ => false,
                    };
                    if hit {
                        Step::Matched(pos + 1)
                    } else {
                        Step::NotFound
                    }
                }
                None => Step::NotFound,
            },
            Kind::Integer | Kind::Action | Kind::Null | Kind::Void | Kind::Bar => fail!(error::parse_rule(&self.mold(rule))),
            k if k.is_any_word() || k.is_any_path() => fail!(error::parse_rule(&self.mold(rule))),
            _ => self.match_literal(st, rule, pos),
        };
        Ok(step)
    }
}

fn parse(rt: &mut Runtime, f: FrameId) -> Result<Bounce, Error> {
    let input = arg!(rt, f, 1);
    let rules = arg!(rt, f, 2);
    if input.quote != 0 || !input.kind.is_any_series() {
        fail!(error::parse_series(&rt.mold(&input)))
    }
    let mut st = ParseState {
        series: rt.array_of(&input),
        specifier: rt.derive_specifier(&input, None),
        case: rt.refine(f, 3) || input.is(Kind::Binary),
        input: input.clone(),
        collection: None,
    };
    let cursor = rt.rules_of(&rules);
    let step = rt.subparse_throws(&mut st, cursor, input.index())?;
    debug!(?step, "parse finished");
    match step {
        Step::Matched(end) | Step::Accepted(end) => {
            let mut result = input;
            result.set_index(end);
            rt.set_out(f, result);
            Ok(Bounce::Out)
        }
        Step::NotFound => Ok(Bounce::Null),
        Step::Thrown => Ok(Bounce::Thrown),
    }
}

fn parse_accept(_rt: &mut Runtime, _f: FrameId) -> Result<Bounce, Error> { fail!(Script, "internal-parse", "parse-accept is for internal PARSE use only") }

fn parse_reject(_rt: &mut Runtime, _f: FrameId) -> Result<Bounce, Error> { fail!(Script, "internal-parse", "parse-reject is for internal PARSE use only") }

#[cfg(test)]
mod test_parse {
    use crate::interpreter::core::*;

    fn run(rt: &mut Runtime, code: &str) -> String {
        match rt.run(code) {
            Ok(v) => rt.mold(&v),
            Err(e) => format!("error: {}", e.id),
        }
    }

    #[test]
    fn test_parse_returns_match_position() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "parse \"aaab\" [some \"a\" \"b\"]"), "\"\"");
        assert_eq!(run(&mut rt, "parse \"aaab\" [some \"a\"]"), "\"b\"");
        assert_eq!(run(&mut rt, "parse [a] [integer!]"), "null");
        assert_eq!(run(&mut rt, "parse [a 1] [word! integer!]"), "[]");
        assert_eq!(run(&mut rt, "parse \"ABC\" [\"abc\"]"), "\"\"");
        assert_eq!(run(&mut rt, "parse/case \"ABC\" [\"abc\"]"), "null");
    }

    #[test]
    fn test_collect_rolls_back_failed_alternate() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("parse [a b c] [collect x [keep 'a keep 'z | keep 'a keep 'b keep 'c]]").unwrap();
        assert_eq!(run(&mut rt, "x"), "[a b c]");
        rt.run("parse [a b] [collect y [keep only 2 word!]]").unwrap();
        assert_eq!(run(&mut rt, "y"), "[[a b]]");
        rt.run("parse [a] [collect z [keep :[1 + 1] 'a]]").unwrap();
        assert_eq!(run(&mut rt, "z"), "[2]");
    }

    #[test]
    fn test_counts_and_modifiers() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "parse [1 1 1] [3 integer!]"), "[]");
        assert_eq!(run(&mut rt, "parse [1 1] [3 integer!]"), "null");
        assert_eq!(run(&mut rt, "parse [1 1] [1 3 integer!]"), "[]");
        assert_eq!(run(&mut rt, "parse \"ab\" [\"a\" ahead \"b\" \"b\" end]"), "\"\"");
        assert_eq!(run(&mut rt, "parse \"ab\" [not \"b\" skip skip]"), "\"\"");
        assert_eq!(run(&mut rt, "parse \"b\" [opt \"a\" \"b\"]"), "\"\"");
        assert_eq!(run(&mut rt, "n: 0 parse [a a] [some ['a (n: n + 1)]] n"), "2");
    }

    #[test]
    fn test_capture_and_positions() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        rt.run("parse \"hello world\" [copy w to \" \" skip copy r to end]").unwrap();
        assert_eq!(run(&mut rt, "reduce [w r]"), "[\"hello\" \"world\"]");
        rt.run("parse \"abcd\" [thru \"c\" copy x to end]").unwrap();
        assert_eq!(run(&mut rt, "x"), "\"d\"");
        rt.run("parse \"abc\" [skip m: skip seek m copy rest to end]").unwrap();
        assert_eq!(run(&mut rt, "rest"), "\"bc\"");
        rt.run("parse [10 b] [set v integer! mark p to end]").unwrap();
        assert_eq!(run(&mut rt, "reduce [v p]"), "[10 [b]]");
    }

    #[test]
    fn test_series_modification() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "s: \"abc\" parse s [remove \"a\" \"b\" insert \"X\" \"c\"] s"), "\"bXc\"");
        assert_eq!(run(&mut rt, "s: [1 2 3] parse s [change integer! 'x 2 integer!] s"), "[x 2 3]");
    }

    #[test]
    fn test_into_do_and_interrupts() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "parse [[a b] c] [into ['a 'b] 'c]"), "[]");
        assert_eq!(run(&mut rt, "parse [1 + 2] [do integer!]"), "[]");
        assert_eq!(run(&mut rt, "parse [a b c] ['a accept 'q]"), "[b c]");
        assert_eq!(run(&mut rt, "parse [a] [reject]"), "null");
        assert_eq!(run(&mut rt, "parse [a] [:(if true [['a]])]"), "[]");
        assert_eq!(run(&mut rt, "parse [a] [:(if false [['b]]) 'a]"), "[]");
        assert_eq!(run(&mut rt, "parse [a] [if (1 > 2) 'a | 'a]"), "[]");
    }

    #[test]
    fn test_rule_errors() {
        let mut rt = Runtime::new(Config::default()).unwrap();
        assert_eq!(run(&mut rt, "parse [a] [1 2 3 word!]"), "error: parse-rule");
        assert_eq!(run(&mut rt, "parse [a] [copy]"), "error: parse-end");
        assert_eq!(run(&mut rt, "parse [1] [keep integer!]"), "error: parse-rule");
        assert_eq!(run(&mut rt, "parse [1] [copy 10 integer!]"), "error: parse-variable");
        assert_eq!(run(&mut rt, "parse-accept"), "error: internal-parse");
        assert_eq!(run(&mut rt, "catch [parse [a] [(throw 7)]]"), "7");
    }
}
