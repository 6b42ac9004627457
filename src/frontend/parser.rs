use super::lexer::{Span, Spanned};
use super::parser_error::ParserError;
use super::token::Token;
use crate::lang::{BlockStatement, Expression, InfixOperator, PrefixOperator, Program, Statement};

/// Binding power of an operator position, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,      // == !=
    LessGreater, // < >
    Sum,         // + -
    Product,     // * /
    Prefix,      // -x !x
    Call,        // f(x)
    Index,       // a[i]
}

fn precedence_of(token: &Token) -> Precedence {
    match token {
        Token::Eq | Token::NotEq => Precedence::Equals,
        Token::Lt | Token::Gt => Precedence::LessGreater,
        Token::Plus | Token::Minus => Precedence::Sum,
        Token::Star | Token::Slash => Precedence::Product,
        Token::LParen => Precedence::Call,
        Token::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

fn infix_operator(token: &Token) -> Option<InfixOperator> {
    Some(match token {
        Token::Plus => InfixOperator::Plus,
        Token::Minus => InfixOperator::Minus,
        Token::Star => InfixOperator::Multiply,
        Token::Slash => InfixOperator::Divide,
        Token::Lt => InfixOperator::LessThan,
        Token::Gt => InfixOperator::GreaterThan,
        Token::Eq => InfixOperator::Equal,
        Token::NotEq => InfixOperator::NotEqual,
        _ => return None,
    })
}

/// Pratt parser for Monkey.
///
/// The parser consumes a stream of lexed `Spanned` tokens and produces a
/// `Program`. It stops at the first error; there is no recovery.
///
/// Notes:
/// - Comments are filtered out in `Parser::new`.
/// - Semicolons after statements are optional.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token.
    ///
    /// Used to provide stable source locations for errors that occur after
    /// advancing past the last token or at end-of-file.
    last_span: Option<Span>,
}

impl Parser {
    /// Creates a new parser from lexer output.
    pub fn new(tokens: Vec<Spanned>) -> Self {
        let tokens: Vec<Spanned> = tokens
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Comment(_)))
            .collect();
        Parser {
            tokens,
            pos: 0,
            last_span: None,
        }
    }

    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Spanned> {
        let token = self.tokens.get(self.pos);
        if let Some(s) = token {
            self.last_span = Some(s.span.clone());
        }
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Eof))
    }

    /// Constructs a `ParserError` at the most relevant location.
    ///
    /// Priority:
    /// 1. If `current()` exists, use its span.
    /// 2. Else, use `last_span`.
    /// 3. Else, default to (1,1) for truly empty input.
    fn error(&self, message: &str) -> ParserError {
        let (line, col) = match (self.current(), &self.last_span) {
            (Some(spanned), _) => (spanned.span.line, spanned.span.col),
            (None, Some(span)) => (span.line, span.col),
            (None, None) => (1, 1),
        };
        ParserError {
            message: message.to_string(),
            line,
            col,
        }
    }

    fn describe_current(&self) -> String {
        match self.peek() {
            Some(Token::Eof) | None => "end of input".to_string(),
            Some(token) => format!("'{}'", token),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParserError> {
        if self.peek() == Some(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!(
                "expected '{}', got {}",
                expected,
                self.describe_current()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParserError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(&format!(
                "expected identifier, got {}",
                self.describe_current()
            ))),
        }
    }

    /// Parses a complete Monkey program.
    pub fn parse(&mut self) -> Result<Program, ParserError> {
        let mut statements = Vec::new();
        while !self.at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParserError> {
        let stmt = match self.peek() {
            Some(Token::Let) => self.parse_let()?,
            Some(Token::Return) => {
                self.advance();
                Statement::Return(self.parse_expression(Precedence::Lowest)?)
            }
            _ => Statement::Expression(self.parse_expression(Precedence::Lowest)?),
        };

        if self.peek() == Some(&Token::Semicolon) {
            self.advance();
        }

        Ok(stmt)
    }

    fn parse_let(&mut self) -> Result<Statement, ParserError> {
        self.expect(Token::Let)?;
        let name = self.expect_ident()?;
        self.expect(Token::Assign)?;

        let mut value = self.parse_expression(Precedence::Lowest)?;
        if let Expression::Function { name: fn_name, .. } = &mut value {
            *fn_name = Some(name.clone());
        }

        Ok(Statement::Let { name, value })
    }

    fn parse_block(&mut self) -> Result<BlockStatement, ParserError> {
        self.expect(Token::LBrace)?;
        let mut statements = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error("expected '}', got end of input"));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(BlockStatement { statements })
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression, ParserError> {
        let mut left = self.parse_prefix()?;

        while let Some(token) = self.peek() {
            if precedence >= precedence_of(token) {
                break;
            }
            left = match token.clone() {
                Token::LParen => self.parse_call(left)?,
                Token::LBracket => self.parse_index(left)?,
                _ => self.parse_infix(left)?,
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, ParserError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected expression, got end of input"));
        };

        let expr = match token {
            Token::Ident(name) => {
                self.advance();
                Expression::Identifier(name)
            }
            Token::Integer(n) => {
                self.advance();
                Expression::Integer(n)
            }
            Token::String(s) => {
                self.advance();
                Expression::String(s)
            }
            Token::True | Token::False => {
                self.advance();
                Expression::Boolean(token == Token::True)
            }
            Token::Bang | Token::Minus => {
                self.advance();
                let operator = if token == Token::Bang {
                    PrefixOperator::Bang
                } else {
                    PrefixOperator::Minus
                };
                let right = self.parse_expression(Precedence::Prefix)?;
                Expression::Prefix {
                    operator,
                    right: Box::new(right),
                }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect(Token::RParen)?;
                expr
            }
            Token::If => self.parse_if()?,
            Token::Function => self.parse_function()?,
            Token::LBracket => {
                self.advance();
                Expression::Array(self.parse_expression_list(Token::RBracket)?)
            }
            Token::LBrace => self.parse_hash()?,
            _ => {
                return Err(self.error(&format!(
                    "expected expression, got {}",
                    self.describe_current()
                )));
            }
        };

        Ok(expr)
    }

    fn parse_infix(&mut self, left: Expression) -> Result<Expression, ParserError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected operator, got end of input"));
        };
        let Some(operator) = infix_operator(&token) else {
            return Err(self.error(&format!("'{}' is not an infix operator", token)));
        };
        self.advance();

        let right = self.parse_expression(precedence_of(&token))?;
        Ok(Expression::Infix {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_call(&mut self, function: Expression) -> Result<Expression, ParserError> {
        self.expect(Token::LParen)?;
        let arguments = self.parse_expression_list(Token::RParen)?;
        Ok(Expression::Call {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_index(&mut self, left: Expression) -> Result<Expression, ParserError> {
        self.expect(Token::LBracket)?;
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect(Token::RBracket)?;
        Ok(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }

    /// Parses `a, b, c <end>` after the opening delimiter was consumed.
    fn parse_expression_list(&mut self, end: Token) -> Result<Vec<Expression>, ParserError> {
        let mut items = Vec::new();
        if self.peek() == Some(&end) {
            self.advance();
            return Ok(items);
        }

        loop {
            items.push(self.parse_expression(Precedence::Lowest)?);
            if self.peek() == Some(&Token::Comma) {
                self.advance();
            } else {
                self.expect(end)?;
                return Ok(items);
            }
        }
    }

    fn parse_if(&mut self) -> Result<Expression, ParserError> {
        self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(Token::RParen)?;

        let consequence = self.parse_block()?;
        let alternative = if self.peek() == Some(&Token::Else) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_function(&mut self) -> Result<Expression, ParserError> {
        self.expect(Token::Function)?;
        self.expect(Token::LParen)?;

        let mut parameters = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
        } else {
            loop {
                parameters.push(self.expect_ident()?);
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    self.expect(Token::RParen)?;
                    break;
                }
            }
        }

        let body = self.parse_block()?;
        Ok(Expression::Function {
            name: None,
            parameters,
            body,
        })
    }

    fn parse_hash(&mut self) -> Result<Expression, ParserError> {
        self.expect(Token::LBrace)?;
        let mut pairs = Vec::new();

        while self.peek() != Some(&Token::RBrace) {
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(Token::Colon)?;
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if self.peek() != Some(&Token::RBrace) {
                self.expect(Token::Comma)?;
            }
        }

        self.expect(Token::RBrace)?;
        Ok(Expression::Hash(pairs))
    }
}

/// Lexes and parses `source` in one step.
pub fn parse_source(source: &str) -> Result<Program, crate::Error> {
    let tokens = super::lexer::Lexer::new(source).tokenize()?;
    let program = Parser::new(tokens).parse()?;
    Ok(program)
}
