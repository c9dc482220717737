//! Parser for function text.

use std::str::FromStr;

use ahash::AHashMap;
use ir::{Attr, Block, Const, Expr, Function, Opcode, Stmt, Tape, Ty, Var, VarData};
use smol_str::SmolStr;

use crate::error::{Location, ParseResult};
use crate::lexer::{LexError, Lexer, LocatedError, LocatedToken, Token};

#[cfg(test)]
mod tests;

/// Parse the entire `text` into a list of functions.
pub fn parse_functions(text: &str) -> ParseResult<Vec<Function>> {
    let mut parser = Parser::new(text);
    parser.parse_function_list()
}

/// Parse the entire `text` into a function
pub fn parse_function(text: &str) -> ParseResult<Function> {
    let mut parser = Parser::new(text);
    let func = parser.parse_function()?;
    if parser.token().is_some() {
        return err!(parser.loc, "expected end of input after function %{}", func.name);
    }
    Ok(func)
}

pub struct Parser<'a> {
    lex: Lexer<'a>,

    lex_error: Option<LexError>,

    /// Current lookahead token.
    lookahead: Option<Token<'a>>,

    /// Location of lookahead.
    loc: Location,
}

/// Context for resolving variable names when parsing a single function.
struct Context {
    function: Function,
    scopes: Vec<AHashMap<SmolStr, Var>>,
}

impl Context {
    fn new(f: Function) -> Self {
        Self { function: f, scopes: Vec::new() }
    }

    fn open(&mut self) {
        self.scopes.push(AHashMap::default())
    }

    fn close(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, ty: Ty, mutable: bool, loc: Location) -> ParseResult<Var> {
        if ir::KEYWORDS.contains(&name) {
            return err!(loc, "'{}' is a keyword and can not be used as a variable name", name);
        }
        let var = self.function.vars.push_and_get_key(VarData { name: name.into(), ty, mutable });
        match self.scopes.last_mut() {
            Some(scope) => {
                if scope.insert(name.into(), var).is_some() {
                    return err!(loc, "variable '{}' is declared twice in the same block", name);
                }
            }
            None => return err!(loc, "declaration outside of a block"),
        }
        Ok(var)
    }

    fn lookup(&self, name: &str, loc: Location) -> ParseResult<Var> {
        match self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            Some(&var) => Ok(var),
            None => err!(loc, "undefined variable '{}'", name),
        }
    }
}

impl<'a> Parser<'a> {
    /// Create a new `Parser` which reads `text`. The referenced text must outlive the parser.
    pub fn new(text: &'a str) -> Self {
        Self {
            lex: Lexer::new(text),
            lex_error: None,
            lookahead: None,
            loc: Location { line_number: 0 },
        }
    }

    // Consume the current lookahead token and return it.
    fn consume(&mut self) -> Option<Token<'a>> {
        self.lookahead.take()
    }

    // Get the current lookahead token, after making sure there is one.
    // Comments are skipped.
    fn token(&mut self) -> Option<Token<'a>> {
        while self.lookahead.is_none() {
            match self.lex.next() {
                Some(Ok(LocatedToken { token: Token::Comment(_), .. })) => continue,
                Some(Ok(LocatedToken { token, location })) => {
                    self.lookahead = Some(token);
                    self.loc = location;
                }
                Some(Err(LocatedError { error, location })) => {
                    self.lex_error = Some(error);
                    self.loc = location;
                    break;
                }
                None => break,
            }
        }
        self.lookahead
    }

    fn unexpected<T>(&mut self, err_msg: &str) -> ParseResult<T> {
        if let Some(LexError::InvalidChar) = self.lex_error.take() {
            return err!(self.loc, "invalid character: {}", err_msg);
        }
        err!(self.loc, err_msg)
    }

    // Match and consume a token without payload.
    fn match_token(&mut self, want: Token<'a>, err_msg: &str) -> ParseResult<()> {
        if self.token() == Some(want) {
            self.consume();
            Ok(())
        } else {
            self.unexpected(err_msg)
        }
    }

    // If the next token is a `want`, consume it, otherwise do nothing.
    fn optional(&mut self, want: Token<'a>) -> bool {
        if self.token() == Some(want) {
            self.consume();
            true
        } else {
            false
        }
    }

    // Match and consume a specific identifier string.
    // Used for keywords that only appear in certain contexts.
    fn match_identifier(&mut self, want: &'static str, err_msg: &str) -> ParseResult<()> {
        self.match_token(Token::Identifier(want), err_msg)
    }

    fn match_ident(&mut self, err_msg: &str) -> ParseResult<&'a str> {
        if let Some(Token::Identifier(name)) = self.token() {
            self.consume();
            Ok(name)
        } else {
            self.unexpected(err_msg)
        }
    }

    fn match_name(&mut self, err_msg: &str) -> ParseResult<&'a str> {
        if let Some(Token::Name(name)) = self.token() {
            self.consume();
            Ok(name)
        } else {
            self.unexpected(err_msg)
        }
    }

    fn match_tape(&mut self, err_msg: &str) -> ParseResult<Tape> {
        if let Some(Token::Tape(tape)) = self.token() {
            self.consume();
            Ok(tape)
        } else {
            self.unexpected(err_msg)
        }
    }

    fn match_int(&mut self, err_msg: &str) -> ParseResult<i32> {
        if let Some(Token::Integer(text)) = self.token() {
            self.consume();
            text.parse().map_err(|_| self.error("integer immediate out of range"))
        } else {
            self.unexpected(err_msg)
        }
    }

    fn match_float(&mut self, err_msg: &str) -> ParseResult<f64> {
        if let Some(Token::Float(text) | Token::Integer(text)) = self.token() {
            self.consume();
            text.parse().map_err(|_| self.error("invalid floating point immediate"))
        } else {
            self.unexpected(err_msg)
        }
    }

    fn match_ty(&mut self) -> ParseResult<Ty> {
        let name = self.match_ident("expected type")?;
        match Ty::from_str(name) {
            Ok(ty) => Ok(ty),
            Err(()) => err!(self.loc, "unknown type '{}'", name),
        }
    }

    fn match_var(&mut self, ctx: &Context, err_msg: &str) -> ParseResult<Var> {
        let name = self.match_ident(err_msg)?;
        ctx.lookup(name, self.loc)
    }

    fn error(&self, message: &str) -> crate::ParseError {
        crate::ParseError { location: self.loc, message: message.to_owned() }
    }

    /// Parse a list of function definitions.
    pub fn parse_function_list(&mut self) -> ParseResult<Vec<Function>> {
        let mut list = Vec::new();
        while self.token().is_some() {
            list.push(self.parse_function()?);
        }
        if let Some(err) = self.lex_error.take() {
            return match err {
                LexError::InvalidChar => err!(self.loc, "invalid character"),
            };
        }
        Ok(list)
    }

    // Parse a whole function definition.
    //
    // function ::= * attr* "function" name "(" params ")" ["->" types] block
    //
    pub fn parse_function(&mut self) -> ParseResult<Function> {
        let mut attrs = Vec::new();
        while let Some(Token::Attr(name)) = self.token() {
            self.consume();
            attrs.push(self.parse_attr_args(name)?);
        }

        self.match_identifier("function", "expected 'function'")?;
        let name = self.match_name("expected function name")?;
        let mut ctx = Context::new(Function::new(name));
        ctx.function.attrs = attrs;
        ctx.open();

        self.match_token(Token::LPar, "expected '(' before parameters")?;
        if !self.optional(Token::RPar) {
            loop {
                let name = self.match_ident("expected parameter name")?;
                self.match_token(Token::Colon, "expected ':' after parameter name")?;
                let ty = self.match_ty()?;
                let param = ctx.declare(name, ty, false, self.loc)?;
                ctx.function.params.push(param);
                if self.optional(Token::RPar) {
                    break;
                }
                self.match_token(Token::Comma, "expected ',' or ')' after parameter")?;
            }
        }

        let mut returns = Vec::new();
        if self.optional(Token::Arrow) {
            loop {
                returns.push(self.match_ty()?);
                if !self.optional(Token::Comma) {
                    break;
                }
            }
        }
        ctx.function.returns = returns;

        let body = self.parse_block(&mut ctx)?;
        ctx.close();
        ctx.function.body = body;
        Ok(ctx.function)
    }

    // attr-args ::= [ "(" path { "," path } ")" ]
    // path ::= ident { "." ident }
    fn parse_attr_args(&mut self, name: &str) -> ParseResult<Attr> {
        let mut args = Vec::new();
        if self.optional(Token::LPar) && !self.optional(Token::RPar) {
            loop {
                let mut path = self.match_ident("expected attribute argument")?.to_owned();
                while self.optional(Token::Dot) {
                    path.push('.');
                    path.push_str(self.match_ident("expected field name after '.'")?);
                }
                args.push(SmolStr::from(path));
                if self.optional(Token::RPar) {
                    break;
                }
                self.match_token(Token::Comma, "expected ',' or ')' in attribute")?;
            }
        }
        Ok(Attr { name: name.into(), args })
    }

    fn parse_block(&mut self, ctx: &mut Context) -> ParseResult<Block> {
        self.match_token(Token::LBrace, "expected '{'")?;
        ctx.open();
        let stmts = self.parse_stmts(ctx)?;
        ctx.close();
        Ok(Block::new(stmts))
    }

    // Parse statements up to and including the closing '}' without opening a new scope.
    fn parse_stmts(&mut self, ctx: &mut Context) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.optional(Token::RBrace) {
            if self.token().is_none() {
                return self.unexpected("expected '}' before end of input");
            }
            stmts.push(self.parse_stmt(ctx)?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self, ctx: &mut Context) -> ParseResult<Stmt> {
        let keyword = match self.token() {
            Some(Token::LBrace) => return Ok(Stmt::Block(self.parse_block(ctx)?)),
            Some(Token::Identifier(keyword)) => keyword,
            _ => return self.unexpected("expected statement"),
        };
        self.consume();

        let stmt = match keyword {
            "let" => {
                let mutable = self.optional(Token::Identifier("mut"));
                let name = self.match_ident("expected variable name")?;
                let loc = self.loc;
                self.match_token(Token::Colon, "expected ':' after variable name")?;
                let ty = self.match_ty()?;
                self.match_token(Token::Equal, "expected '='")?;
                // the initializer is resolved before the new variable comes into scope
                let expr = self.parse_expr(ctx)?;
                let dst = ctx.declare(name, ty, mutable, loc)?;
                Stmt::Def { dst, decl: true, expr }
            }
            "if" => self.parse_if(ctx)?,
            "while" => {
                self.match_token(Token::LBrace, "expected '{' after while")?;
                // variables of the header stay visible in the body
                ctx.open();
                let header = Block::new(self.parse_stmts(ctx)?);
                self.match_token(Token::Arrow, "expected '->' after loop header")?;
                let cond = self.match_var(ctx, "expected loop condition")?;
                let body = self.parse_block(ctx)?;
                ctx.close();
                Stmt::While { header, cond, body }
            }
            "do" => {
                self.match_token(Token::LBrace, "expected '{' after do")?;
                ctx.open();
                let body = Block::new(self.parse_stmts(ctx)?);
                self.match_identifier("while", "expected 'while' after do block")?;
                let cond = self.match_var(ctx, "expected loop condition")?;
                ctx.close();
                Stmt::DoWhile { body, cond }
            }
            "store" => {
                let obj = self.match_var(ctx, "expected record")?;
                self.match_token(Token::Dot, "expected '.'")?;
                let field = self.match_ident("expected field name")?.into();
                self.match_token(Token::Comma, "expected ','")?;
                let val = self.match_var(ctx, "expected stored value")?;
                Stmt::Store { obj, field, val }
            }
            "push" => {
                let tape = self.match_tape("expected tape")?;
                self.match_token(Token::Comma, "expected ','")?;
                if let Some(Token::Integer(_)) = self.token() {
                    let decision = self.match_int("expected decision")?;
                    Stmt::PushDecision { tape, decision }
                } else {
                    let val = self.match_var(ctx, "expected pushed value")?;
                    Stmt::Push { tape, val }
                }
            }
            "unreachable" => Stmt::Unreachable,
            "return" => {
                let mut vals = Vec::new();
                if self.token() != Some(Token::RBrace) {
                    loop {
                        vals.push(self.match_var(ctx, "expected return value")?);
                        if !self.optional(Token::Comma) {
                            break;
                        }
                    }
                }
                Stmt::Return(vals)
            }
            name => {
                let dst = ctx.lookup(name, self.loc)?;
                self.match_token(Token::Equal, "expected '=' in assignment")?;
                let expr = self.parse_expr(ctx)?;
                Stmt::Def { dst, decl: false, expr }
            }
        };
        Ok(stmt)
    }

    // if-stmt ::= "if" * var block { "else" "if" var block } "else" block
    fn parse_if(&mut self, ctx: &mut Context) -> ParseResult<Stmt> {
        let mut branches = Vec::new();
        loop {
            let cond = self.match_var(ctx, "expected condition")?;
            let block = self.parse_block(ctx)?;
            branches.push((cond, block));
            self.match_identifier("else", "expected 'else', conditionals require an else branch")?;
            if !self.optional(Token::Identifier("if")) {
                break;
            }
        }
        let else_ = self.parse_block(ctx)?;
        Ok(Stmt::If { branches, else_ })
    }

    fn parse_expr(&mut self, ctx: &Context) -> ParseResult<Expr> {
        let keyword = self.match_ident("expected expression")?;
        let expr = match keyword {
            "fconst" => Expr::Const(Const::Real(self.match_float("expected float immediate")?)),
            "iconst" => Expr::Const(Const::Int(self.match_int("expected integer immediate")?)),
            "bconst" => {
                let val = match self.match_ident("expected 'true' or 'false'")? {
                    "true" => true,
                    "false" => false,
                    _ => return err!(self.loc, "expected 'true' or 'false'"),
                };
                Expr::Const(Const::Bool(val))
            }
            "copy" => Expr::Copy(self.match_var(ctx, "expected copied variable")?),
            "load" => {
                let obj = self.match_var(ctx, "expected record")?;
                self.match_token(Token::Dot, "expected '.'")?;
                let field = self.match_ident("expected field name")?.into();
                Expr::Load { obj, field }
            }
            "call" => {
                let callee = self.match_name("expected callee name")?.into();
                self.match_token(Token::LPar, "expected '(' before arguments")?;
                let mut args = Vec::new();
                if !self.optional(Token::RPar) {
                    loop {
                        args.push(self.match_var(ctx, "expected argument")?);
                        if self.optional(Token::RPar) {
                            break;
                        }
                        self.match_token(Token::Comma, "expected ',' or ')' after argument")?;
                    }
                }
                let node = if self.optional(Token::LBracket) {
                    self.match_identifier("node", "expected 'node'")?;
                    let node = self.match_ident("expected node name")?;
                    self.match_token(Token::RBracket, "expected ']'")?;
                    Some(node.into())
                } else {
                    None
                };
                Expr::Call { callee, args, node }
            }
            "pop" => Expr::Pop(self.match_tape("expected tape")?),
            "top_is" => {
                let tape = self.match_tape("expected tape")?;
                self.match_token(Token::Comma, "expected ','")?;
                Expr::TopIs(tape, self.match_int("expected decision")?)
            }
            op => {
                let opcode = match Opcode::from_str(op) {
                    Ok(opcode) => opcode,
                    Err(()) => return err!(self.loc, "unknown opcode '{}'", op),
                };
                let mut args = Vec::with_capacity(opcode.arity());
                for i in 0..opcode.arity() {
                    if i != 0 {
                        self.match_token(Token::Comma, "expected ',' between operands")?;
                    }
                    args.push(self.match_var(ctx, "expected operand")?);
                }
                Expr::Op { opcode, args }
            }
        };
        Ok(expr)
    }
}
