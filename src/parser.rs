use crate::{error::ParseErrors, flatten, lexer::Token};
use anyhow::{bail, Result};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    slice::Iter,
};

pub type Program = Vec<Statement>;

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    Let(Identifier, Expression),
    Return(Option<Expression>),
    Expression(Expression),
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let statement = match self {
            Self::Let(identifier, expression) => format!("let {} = {};", identifier, expression),
            Self::Return(Some(expression)) => format!("return {};", expression),
            Self::Return(None) => "return;".to_string(),
            Self::Expression(expression) => expression.to_string(),
        };
        write!(f, "{}", statement)
    }
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct Block(pub Vec<Statement>);

impl Display for Block {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", flatten(&self.0, " "))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Identifier(Identifier),
    Literal(Literal),
    Prefix(Operator, Box<Expression>),
    Infix(Box<Expression>, Operator, Box<Expression>),
    If(Box<Expression>, Block, Option<Block>),
    Function(FunctionLiteral),
    Call(Box<Expression>, Vec<Expression>),
    Index(Box<Expression>, Box<Expression>),
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let expression = match self {
            Self::Identifier(identifier) => identifier.to_string(),
            Self::Literal(literal) => literal.to_string(),
            Self::Prefix(operator, operand) => format!("({}{})", operator, operand),
            Self::Infix(left, operator, right) => format!("({} {} {})", left, operator, right),
            Self::If(condition, consequence, alternative) => match alternative {
                Some(alternative) => {
                    format!("if {} {{ {} }} else {{ {} }}", condition, consequence, alternative)
                }
                None => format!("if {} {{ {} }}", condition, consequence),
            },
            Self::Function(function) => function.to_string(),
            Self::Call(function, arguments) => format!("{}({})", function, flatten(arguments, ", ")),
            Self::Index(left, index) => format!("({}[{}])", left, index),
        };
        write!(f, "{}", expression)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Identifier(pub String);

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    Integer(i64),
    Boolean(bool),
    String(String),
    Array(Vec<Expression>),
    Hash(Vec<(Expression, Expression)>),
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let literal = match self {
            Literal::Integer(x) => x.to_string(),
            Literal::Boolean(x) => x.to_string(),
            Literal::String(x) => format!("\"{}\"", x),
            Literal::Array(elements) => format!("[{}]", flatten(elements, ", ")),
            Literal::Hash(pairs) => {
                let pairs = pairs
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value))
                    .collect::<Vec<_>>();
                format!("{{{}}}", pairs.join(", "))
            }
        };
        write!(f, "{}", literal)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunctionLiteral {
    pub name: Option<String>,
    pub parameters: Vec<Identifier>,
    pub body: Block,
}

impl Display for FunctionLiteral {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let name = self.name.as_deref().unwrap_or_default();
        write!(
            f,
            "fn{}({}) {{ {} }}",
            if name.is_empty() { String::new() } else { format!("<{}>", name) },
            flatten(&self.parameters, ", "),
            self.body
        )
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Operator {
    Plus,
    Minus,
    Asterisk,
    Slash,
    Bang,
    LessThan,
    GreaterThan,
    Equal,
    NotEqual,
}

impl Operator {
    fn of_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::Plus => Self::Plus,
            Token::Minus => Self::Minus,
            Token::Asterisk => Self::Asterisk,
            Token::Slash => Self::Slash,
            Token::Bang => Self::Bang,
            Token::LessThan => Self::LessThan,
            Token::GreaterThan => Self::GreaterThan,
            Token::Equal => Self::Equal,
            Token::NotEqual => Self::NotEqual,
            _ => return None,
        })
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let operator = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Asterisk => "*",
            Self::Slash => "/",
            Self::Bang => "!",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        };
        write!(f, "{}", operator)
    }
}

#[derive(Debug, PartialEq, PartialOrd, Copy, Clone)]
pub enum Precedence {
    Lowest,
    Equals,
    LessThanGreaterThan,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

impl Precedence {
    pub fn of_token(token: &Token) -> Self {
        match token {
            Token::Equal => Self::Equals,
            Token::NotEqual => Self::Equals,
            Token::LessThan => Self::LessThanGreaterThan,
            Token::GreaterThan => Self::LessThanGreaterThan,
            Token::Plus => Self::Sum,
            Token::Minus => Self::Sum,
            Token::Slash => Self::Product,
            Token::Asterisk => Self::Product,
            Token::LeftParentheses => Self::Call,
            Token::LeftBracket => Self::Index,
            _ => Self::Lowest,
        }
    }
}

pub struct Parser<'a> {
    pub tokens: Iter<'a, Token>,
    errors: Vec<String>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens: tokens.iter(),
            errors: Vec::new(),
        }
    }

    /// Parses every statement, collecting one message per malformed statement.
    /// Fails with [`ParseErrors`] if anything was collected.
    pub fn parse(&mut self) -> Result<Program> {
        let mut program = Program::new();
        while !matches!(self.peek_nth(0), Token::EndOfFile) {
            match self.parse_statement() {
                Ok(statement) => program.push(statement),
                Err(error) => {
                    self.errors.push(error.to_string());
                    self.synchronize();
                }
            }
        }
        if !self.errors.is_empty() {
            bail!(ParseErrors(std::mem::take(&mut self.errors)));
        }
        Ok(program)
    }

    fn synchronize(&mut self) {
        loop {
            match self.read_token() {
                Token::Semicolon | Token::EndOfFile => break,
                _ => continue,
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek_nth(0) {
            Token::Let => self.parse_let_statement(),
            Token::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement> {
        self.expect(Token::Let)?;

        let identifier = match self.read_token() {
            Token::Identifier(identifier) => identifier.to_string(),
            token => bail!("Expected an identifier after 'let'! Found '{}'.", token),
        };

        self.expect(Token::Assign)?;

        let mut expression = self.parse_expression(Precedence::Lowest)?;
        if let Expression::Function(function) = &mut expression {
            function.name = Some(identifier.to_string());
        }

        self.skip_semicolon();

        Ok(Statement::Let(Identifier(identifier), expression))
    }

    fn parse_return_statement(&mut self) -> Result<Statement> {
        self.expect(Token::Return)?;

        if matches!(
            self.peek_nth(0),
            Token::Semicolon | Token::RightBrace | Token::EndOfFile
        ) {
            self.skip_semicolon();
            return Ok(Statement::Return(None));
        }

        let expression = self.parse_expression(Precedence::Lowest)?;
        self.skip_semicolon();
        Ok(Statement::Return(Some(expression)))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement> {
        let statement = Statement::Expression(self.parse_expression(Precedence::Lowest)?);
        self.skip_semicolon();
        Ok(statement)
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(Token::LeftBrace)?;
        let mut statements = Vec::new();
        loop {
            match self.peek_nth(0) {
                Token::RightBrace => {
                    self.read_token();
                    break;
                }
                Token::EndOfFile => bail!("Expected '}}' to close a block! Found end of file."),
                _ => statements.push(self.parse_statement()?),
            }
        }
        Ok(Block(statements))
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let mut expression = self.parse_prefix()?;
        while !matches!(self.peek_nth(0), Token::Semicolon | Token::EndOfFile)
            && precedence < Precedence::of_token(self.peek_nth(0))
        {
            expression = match self.peek_nth(0) {
                Token::LeftParentheses => self.parse_call_expression(expression)?,
                Token::LeftBracket => self.parse_index_expression(expression)?,
                _ => self.parse_infix_expression(expression)?,
            };
        }
        Ok(expression)
    }

    fn parse_prefix(&mut self) -> Result<Expression> {
        let expression = match self.read_token() {
            Token::Identifier(identifier) => Expression::Identifier(Identifier(identifier.to_string())),
            Token::Integer(value) => Expression::Literal(Literal::Integer(*value)),
            Token::String(value) => Expression::Literal(Literal::String(value.to_string())),
            Token::True => Expression::Literal(Literal::Boolean(true)),
            Token::False => Expression::Literal(Literal::Boolean(false)),
            token @ (Token::Bang | Token::Minus) => {
                let operator = Operator::of_token(token).unwrap_or(Operator::Bang);
                Expression::Prefix(operator, Box::new(self.parse_expression(Precedence::Prefix)?))
            }
            Token::LeftParentheses => {
                let expression = self.parse_expression(Precedence::Lowest)?;
                self.expect(Token::RightParentheses)?;
                expression
            }
            Token::If => self.parse_if_expression()?,
            Token::Function => self.parse_function_literal()?,
            Token::LeftBracket => {
                Expression::Literal(Literal::Array(self.parse_expression_list(Token::RightBracket)?))
            }
            Token::LeftBrace => self.parse_hash_literal()?,
            token => bail!("Token not valid for an expression: '{}'", token),
        };
        Ok(expression)
    }

    fn parse_infix_expression(&mut self, left_expression: Expression) -> Result<Expression> {
        let token = self.read_token();
        let precedence = Precedence::of_token(token);
        let operator = match Operator::of_token(token) {
            Some(operator) => operator,
            None => bail!("Token not valid for an infix expression: '{}'", token),
        };
        Ok(Expression::Infix(
            Box::new(left_expression),
            operator,
            Box::new(self.parse_expression(precedence)?),
        ))
    }

    fn parse_call_expression(&mut self, function: Expression) -> Result<Expression> {
        self.expect(Token::LeftParentheses)?;
        let arguments = self.parse_expression_list(Token::RightParentheses)?;
        Ok(Expression::Call(Box::new(function), arguments))
    }

    fn parse_index_expression(&mut self, left: Expression) -> Result<Expression> {
        self.expect(Token::LeftBracket)?;
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect(Token::RightBracket)?;
        Ok(Expression::Index(Box::new(left), Box::new(index)))
    }

    fn parse_if_expression(&mut self) -> Result<Expression> {
        self.expect(Token::LeftParentheses)?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(Token::RightParentheses)?;
        let consequence = self.parse_block()?;
        let alternative = if matches!(self.peek_nth(0), Token::Else) {
            self.read_token();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expression::If(Box::new(condition), consequence, alternative))
    }

    fn parse_function_literal(&mut self) -> Result<Expression> {
        self.expect(Token::LeftParentheses)?;
        let mut parameters = Vec::new();
        if matches!(self.peek_nth(0), Token::RightParentheses) {
            self.read_token();
        } else {
            loop {
                match self.read_token() {
                    Token::Identifier(name) => parameters.push(Identifier(name.to_string())),
                    token => bail!("Expected a parameter name! Found '{}'.", token),
                }
                match self.read_token() {
                    Token::Comma => continue,
                    Token::RightParentheses => break,
                    token => bail!("Expected ',' or ')' in parameter list! Found '{}'.", token),
                }
            }
        }
        let body = self.parse_block()?;
        Ok(Expression::Function(FunctionLiteral {
            name: None,
            parameters,
            body,
        }))
    }

    fn parse_hash_literal(&mut self) -> Result<Expression> {
        let mut pairs = Vec::new();
        while !matches!(self.peek_nth(0), Token::RightBrace) {
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(Token::Colon)?;
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if !matches!(self.peek_nth(0), Token::RightBrace) {
                self.expect(Token::Comma)?;
            }
        }
        self.expect(Token::RightBrace)?;
        Ok(Expression::Literal(Literal::Hash(pairs)))
    }

    fn parse_expression_list(&mut self, end: Token) -> Result<Vec<Expression>> {
        let mut expressions = Vec::new();
        if *self.peek_nth(0) == end {
            self.read_token();
            return Ok(expressions);
        }
        loop {
            expressions.push(self.parse_expression(Precedence::Lowest)?);
            match self.read_token() {
                Token::Comma => continue,
                token if *token == end => break,
                token => bail!("Expected ',' or '{}'! Found '{}'.", end, token),
            }
        }
        Ok(expressions)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.read_token();
        if *token != expected {
            bail!("Expected '{}' token! Found '{}'.", expected, token);
        }
        Ok(())
    }

    fn skip_semicolon(&mut self) {
        if matches!(self.peek_nth(0), Token::Semicolon) {
            self.read_token();
        }
    }

    fn read_token(&mut self) -> &'a Token {
        self.tokens.next().unwrap_or(&Token::EndOfFile)
    }

    fn peek_nth(&self, n: usize) -> &'a Token {
        self.tokens.clone().nth(n).unwrap_or(&Token::EndOfFile)
    }
}
