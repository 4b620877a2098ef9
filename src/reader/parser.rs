use super::lexer::{Delim, Mark, ScanError, Token, TokenKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Block,
    Group,
    Path,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Any token that stands for a single value.
    Scalar(TokenKind),
    Array(Shape, Mark, Vec<Item>),
    Quoted(u32, Box<Node>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub node: Node,
    pub newline: bool,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

pub fn parse(tokens: &[Token]) -> Result<Vec<Item>, ScanError> {
    let mut parser = Parser { tokens, pos: 0 };
    let (items, _) = parser.items(None)?;
    Ok(items)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> { self.tokens.get(self.pos) }

    fn line(&self) -> usize { self.peek().or_else(|| self.tokens.last()).map(|t| t.line).unwrap_or(1) }

    fn items(&mut self, close: Option<Delim>) -> Result<(Vec<Item>, bool), ScanError> {
        let mut items = Vec::new();
        loop {
            let token = match self.peek() {
                Some(t) => t,
                None if close.is_some() => {
                    return Err(ScanError { id: "scan-missing", message: "missing closing bracket".into(), line: self.line() })
                }
                None => return Ok((items, false)),
            };
            if let TokenKind::Close(delim, set) = &token.kind {
                if Some(*delim) != close {
                    return Err(ScanError { id: "scan-extra", message: "unexpected closing bracket".into(), line: token.line });
                }
                self.pos += 1;
                return Ok((items, *set));
            }
            let newline = token.newline;
            let node = self.item()?;
            items.push(Item { node, newline });
        }
    }

    fn item(&mut self) -> Result<Node, ScanError> {
        if let Some(Token { kind: TokenKind::Quote(n), .. }) = self.peek() {
            self.pos += 1;
            let inner = self.item()?;
            return Ok(Node::Quoted(*n, Box::new(inner)));
        }
        let leading_slash = matches!(self.peek(), Some(Token { kind: TokenKind::Slash, .. }));
        let head = if leading_slash { Node::Scalar(TokenKind::Blank) } else { self.element()? };
        let mut segments = vec![head];
        let mut first = leading_slash;
        while let Some(t) = self.peek() {
            if t.kind != TokenKind::Slash || !(first || t.joined) {
                break;
            }
            first = false;
            self.pos += 1;
            let next_is_element = match self.peek() {
                Some(t) => t.joined && !matches!(t.kind, TokenKind::Close(..) | TokenKind::Slash | TokenKind::Quote(_) | TokenKind::SetMark),
                None => false,
            };
            segments.push(if next_is_element { self.element()? } else { Node::Scalar(TokenKind::Blank) });
        }
        let set_mark = matches!(self.peek(), Some(Token { kind: TokenKind::SetMark, joined: true, .. }));
        if set_mark {
            self.pos += 1;
        }
        if segments.len() == 1 {
            return Ok(segments.pop().unwrap_or(Node::Scalar(TokenKind::Blank)));
        }
        self.finish_path(segments, set_mark)
    }

    /// Moves sigils of the outer segments onto the path itself.
    fn finish_path(&self, mut segments: Vec<Node>, set_mark: bool) -> Result<Node, ScanError> {
        let mut mark = Mark::Plain;
        if let Some(Node::Scalar(TokenKind::Word(_, m))) | Some(Node::Array(_, m, _)) = segments.first_mut() {
            if matches!(*m, Mark::Get | Mark::Sym) {
                mark = *m;
                *m = Mark::Plain;
            }
        }
        if let Some(Node::Scalar(TokenKind::Word(_, m))) | Some(Node::Array(_, m, _)) = segments.last_mut() {
            if *m == Mark::Set {
                if mark != Mark::Plain {
                    return Err(ScanError { id: "scan-invalid", message: "path has two sigils".into(), line: self.line() });
                }
                mark = Mark::Set;
                *m = Mark::Plain;
            }
        }
        if set_mark {
            if mark != Mark::Plain {
                return Err(ScanError { id: "scan-invalid", message: "path has two sigils".into(), line: self.line() });
            }
            mark = Mark::Set;
        }
        let items = segments.into_iter().map(|node| Item { node, newline: false }).collect();
        Ok(Node::Array(Shape::Path, mark, items))
    }

    fn element(&mut self) -> Result<Node, ScanError> {
        let token = match self.peek() {
            Some(t) => t,
            None => return Err(ScanError { id: "scan-missing", message: "unexpected end of input".into(), line: self.line() }),
        };
        self.pos += 1;
        match &token.kind {
            TokenKind::Open(delim, mark) => {
                let (children, set) = self.items(Some(*delim))?;
                let shape = if *delim == Delim::Block { Shape::Block } else { Shape::Group };
                let mark = if set { Mark::Set } else { *mark };
                Ok(Node::Array(shape, mark, children))
            }
            TokenKind::Close(..) | TokenKind::Slash | TokenKind::Quote(_) | TokenKind::SetMark => {
                Err(ScanError { id: "scan-invalid", message: "misplaced delimiter".into(), line: token.line })
            }
            kind => Ok(Node::Scalar(kind.clone())),
        }
    }
}

#[cfg(test)]
mod test_parser {
    use super::*;
    use crate::reader::lexer::tokenize;

    fn nodes(src: &str) -> Vec<Node> { parse(&tokenize(src).unwrap()).unwrap().into_iter().map(|i| i.node).collect() }

    fn word(s: &str) -> Node { Node::Scalar(TokenKind::Word(s.into(), Mark::Plain)) }

    fn blank() -> Node { Node::Scalar(TokenKind::Blank) }

    fn path(mark: Mark, segs: Vec<Node>) -> Node {
        Node::Array(Shape::Path, mark, segs.into_iter().map(|node| Item { node, newline: false }).collect())
    }

    #[test]
    fn test_paths() {
        assert_eq!(nodes("a/b"), vec![path(Mark::Plain, vec![word("a"), word("b")])]);
        assert_eq!(nodes("a/b:"), vec![path(Mark::Set, vec![word("a"), word("b")])]);
        assert_eq!(nodes(":a/b"), vec![path(Mark::Get, vec![word("a"), word("b")])]);
        assert_eq!(nodes("/only"), vec![path(Mark::Plain, vec![blank(), word("only")])]);
        assert_eq!(nodes("10 / 4")[1], path(Mark::Plain, vec![blank(), blank()]));
        assert_eq!(nodes("b/2:"), vec![path(Mark::Set, vec![word("b"), Node::Scalar(TokenKind::Integer(2))])]);
        assert_eq!(nodes("b/2"), vec![path(Mark::Plain, vec![word("b"), Node::Scalar(TokenKind::Integer(2))])]);
    }

    #[test]
    fn test_nesting_and_marks() {
        assert_eq!(nodes("[a b]:"), vec![Node::Array(Shape::Block, Mark::Set, vec![
            Item { node: word("a"), newline: false },
            Item { node: word("b"), newline: false },
        ])]);
        assert_eq!(nodes(":(x)"), vec![Node::Array(Shape::Group, Mark::Get, vec![Item { node: word("x"), newline: false }])]);
        assert_eq!(nodes("''x"), vec![Node::Quoted(2, Box::new(word("x")))]);
        let items = parse(&tokenize("[a\n b]").unwrap()).unwrap();
        match &items[0].node {
            Node::Array(_, _, inner) => assert!(inner[1].newline),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbalanced() {
        assert_eq!(parse(&tokenize("[a").unwrap()).unwrap_err().id, "scan-missing");
        assert_eq!(parse(&tokenize("a)").unwrap()).unwrap_err().id, "scan-extra");
        assert_eq!(parse(&tokenize("(a]").unwrap()).unwrap_err().id, "scan-extra");
    }
}
