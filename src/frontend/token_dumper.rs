use super::lexer::Spanned;
use super::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints source-like text for each token
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        for s in tokens {
            println!("{}", self.render(s));
        }
    }

    fn render(&self, s: &Spanned) -> String {
        let line = s.span.line;
        let col = s.span.col;

        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            format!(
                "[{:02}:{:02}] {}{:<8} {:?}{}",
                line, col, colr, kind, s.token, reset
            )
        } else {
            format!(
                "[{:02}:{:02}] {}{:<8} {}{}",
                line, col, colr, kind, s.token, reset
            )
        }
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment(_) => "COMMENT",
            Eof => "EOF",

            Integer(_) => "INT",
            String(_) => "STRING",
            Ident(_) => "IDENT",

            LParen | RParen | LBrace | RBrace | LBracket | RBracket => "DELIM",
            Comma | Semicolon | Colon => "PUNCT",

            Assign | Plus | Minus | Bang | Star | Slash => "OP",
            Eq | NotEq | Lt | Gt => "CMP",

            Function | Let | True | False | If | Else | Return => "KEYWORD",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment(_) | Eof => Self::DIM,
            String(_) => Self::GRN,
            Integer(_) | True | False => Self::CYN,
            Ident(_) => Self::YEL,
            Assign | Plus | Minus | Bang | Star | Slash => Self::MAG,
            Eq | NotEq | Lt | Gt => Self::MAG,
            _ => Self::RESET,
        }
    }
}
