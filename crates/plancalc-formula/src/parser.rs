//! Formula parser
//!
//! A recursive descent parser for planning formulas with proper operator
//! precedence. Anything outside the grammar is a parse error; there is no
//! fallback evaluation of unrecognized text.

use std::str::FromStr;

use plancalc_core::{AggregateKind, Dimension};
use rust_decimal::Decimal;

use crate::ast::{
    BinaryOperator, CellReference, DimFilter, DimValue, FormulaExpr, FormulaStatement,
    ReferenceCall, UnaryOperator,
};
use crate::error::{FormulaError, FormulaResult};
use crate::functions::function_registry;

/// Words with a fixed meaning inside `CASE`
const KEYWORDS: &[&str] = &["CASE", "WHEN", "THEN", "ELSE", "END"];

/// Parse a `target = expression` statement
///
/// # Example
/// ```rust
/// use plancalc_formula::parse_statement;
///
/// let stmt = parse_statement("[OrgUnit=$LOOP].[COST] = [OrgUnit=$LOOP].[COST] * 1.1").unwrap();
/// assert!(stmt.target.uses_loop());
/// ```
pub fn parse_statement(text: &str) -> FormulaResult<FormulaStatement> {
    let mut parser = FormulaParser::new(text.trim());

    if !matches!(parser.current_token(), Token::LeftBracket) {
        return Err(parser.error("Formula must start with a target cell reference"));
    }
    let target = parser.parse_bracket_reference()?;
    if !matches!(parser.current_token(), Token::Equal) {
        return Err(parser.error("Expected '=' after the target"));
    }
    parser.consume();

    let expr = parser.parse_expression()?;
    parser.expect_end()?;

    Ok(FormulaStatement { target, expr })
}

/// Parse a bare expression (sub-formula bodies and tests)
///
/// # Example
/// ```rust
/// use plancalc_formula::parse_expression;
///
/// let ast = parse_expression("SUM:[Period=P01].[COST] / 12").unwrap();
/// let ast = parse_expression("IF([COST] > 100, 1, 0)").unwrap();
/// ```
pub fn parse_expression(text: &str) -> FormulaResult<FormulaExpr> {
    let mut parser = FormulaParser::new(text.trim());
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Number(String),
    String(String),

    // Names
    Identifier(String),
    Macro(String), // $NAME

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Punctuation
    Colon,
    Comma,
    Dot,
    Question,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,

    /// Text the scanner cannot turn into a token
    Invalid(String),

    // End of input
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::String(s) => format!("string '{}'", s),
            Token::Identifier(name) => format!("'{}'", name),
            Token::Macro(name) => format!("'${}'", name),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Caret => "'^'".into(),
            Token::Equal => "'='".into(),
            Token::NotEqual => "'<>'".into(),
            Token::LessThan => "'<'".into(),
            Token::LessEqual => "'<='".into(),
            Token::GreaterThan => "'>'".into(),
            Token::GreaterEqual => "'>='".into(),
            Token::Colon => "':'".into(),
            Token::Comma => "','".into(),
            Token::Dot => "'.'".into(),
            Token::Question => "'?'".into(),
            Token::LeftParen => "'('".into(),
            Token::RightParen => "')'".into(),
            Token::LeftBracket => "'['".into(),
            Token::RightBracket => "']'".into(),
            Token::Invalid(message) => message.clone(),
            Token::Eof => "end of formula".into(),
        }
    }
}

/// Formula parser
struct FormulaParser<'a> {
    input: &'a str,
    pos: usize,
    token_start: usize,
    current_token: Option<Token>,
}

impl<'a> FormulaParser<'a> {
    fn new(input: &'a str) -> Self {
        let mut parser = Self {
            input,
            pos: 0,
            token_start: 0,
            current_token: None,
        };
        parser.advance_token();
        parser
    }

    // === Token scanning ===

    fn advance_token(&mut self) {
        self.skip_whitespace();
        self.token_start = self.pos;
        self.current_token = Some(self.scan_token());
    }

    fn scan_token(&mut self) -> Token {
        let c = match self.peek_char() {
            Some(c) => c,
            None => return Token::Eof,
        };

        // Single-character tokens
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            ':' => Some(Token::Colon),
            ',' => Some(Token::Comma),
            '?' => Some(Token::Question),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '[' => Some(Token::LeftBracket),
            ']' => Some(Token::RightBracket),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return token;
        }

        match c {
            '=' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                }
                Token::Equal
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Token::NotEqual
                } else {
                    Token::Invalid("unexpected character '!'".into())
                }
            }
            '<' => {
                self.advance();
                match self.peek_char() {
                    Some('=') => {
                        self.advance();
                        Token::LessEqual
                    }
                    Some('>') => {
                        self.advance();
                        Token::NotEqual
                    }
                    _ => Token::LessThan,
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Token::GreaterEqual
                } else {
                    Token::GreaterThan
                }
            }
            '\'' | '"' => self.scan_string(c),
            '.' if self.peek_char_at(1).map_or(false, |d| d.is_ascii_digit()) => {
                self.scan_number()
            }
            '.' => {
                self.advance();
                Token::Dot
            }
            '$' => {
                self.advance();
                let name = self.scan_word();
                if name.is_empty() {
                    Token::Invalid("'$' must be followed by a name".into())
                } else {
                    Token::Macro(name.to_string())
                }
            }
            c if c.is_ascii_digit() => self.scan_number(),
            c if c.is_alphabetic() || c == '_' => Token::Identifier(self.scan_word().to_string()),
            other => {
                self.advance();
                Token::Invalid(format!("unexpected character '{}'", other))
            }
        }
    }

    fn scan_string(&mut self, quote: char) -> Token {
        self.advance(); // opening quote

        let mut value = String::new();
        loop {
            match self.peek_char() {
                None => return Token::Invalid("unterminated string".into()),
                Some(c) if c == quote => {
                    self.advance();
                    // Doubled quote is an escaped quote
                    if self.peek_char() == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }

        Token::String(value)
    }

    fn scan_number(&mut self) -> Token {
        let start = self.pos;

        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek_char() == Some('.')
            && self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit())
        {
            self.advance();
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Scientific notation
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let digits_at = match self.peek_char_at(1) {
                Some('+' | '-') => 2,
                _ => 1,
            };
            if self
                .peek_char_at(digits_at)
                .map_or(false, |c| c.is_ascii_digit())
            {
                for _ in 0..digits_at {
                    self.advance();
                }
                while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        Token::Number(self.input[start..self.pos].to_string())
    }

    fn scan_word(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek_char()
            .map_or(false, |c| c.is_alphanumeric() || c == '_')
        {
            self.advance();
        }
        &self.input[start..self.pos]
    }

    // === Helper methods ===

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn current_token(&self) -> &Token {
        self.current_token.as_ref().unwrap_or(&Token::Eof)
    }

    fn consume(&mut self) -> Token {
        let token = self.current_token.take().unwrap_or(Token::Eof);
        self.advance_token();
        token
    }

    fn error(&self, message: impl Into<String>) -> FormulaError {
        FormulaError::parse(self.token_start, message)
    }

    fn unexpected(&self, context: &str) -> FormulaError {
        match self.current_token() {
            Token::Invalid(message) => self.error(message.clone()),
            token => self.error(format!("Unexpected {} {}", token.describe(), context)),
        }
    }

    fn expect(&mut self, expected: Token) -> FormulaResult<()> {
        if *self.current_token() == expected {
            self.consume();
            Ok(())
        } else {
            Err(self.unexpected(&format!("(expected {})", expected.describe())))
        }
    }

    fn expect_end(&mut self) -> FormulaResult<()> {
        match self.current_token() {
            Token::Eof => Ok(()),
            Token::Dot => Err(self.error("Member access is not allowed")),
            _ => Err(self.unexpected("after expression")),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.current_token(), Token::Identifier(name) if name.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> FormulaResult<()> {
        if self.is_keyword(keyword) {
            self.consume();
            Ok(())
        } else {
            Err(self.unexpected(&format!("(expected {})", keyword)))
        }
    }

    // === Expression parsing with precedence ===
    // Precedence (lowest to highest):
    // 1. Comparison: =, ==, <>, !=, <, <=, >, >=
    // 2. Addition/Subtraction: +, -
    // 3. Multiplication/Division: *, /
    // 4. Exponentiation: ^
    // 5. Unary: -, +
    // 6. Primary: literals, references, macros, function calls, parentheses

    fn parse_expression(&mut self) -> FormulaResult<FormulaExpr> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current_token() {
                Token::Equal => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.consume();
            let right = self.parse_additive()?;
            left = FormulaExpr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.consume();
            let right = self.parse_multiplicative()?;
            left = FormulaExpr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_exponent()?;

        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };

            self.consume();
            let right = self.parse_exponent()?;
            left = FormulaExpr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_exponent(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_unary()?;

        if matches!(self.current_token(), Token::Caret) {
            self.consume();
            let right = self.parse_exponent()?; // Right associative
            return Ok(FormulaExpr::BinaryOp {
                op: BinaryOperator::Power,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        match self.current_token() {
            Token::Minus => {
                self.consume();
                let operand = self.parse_unary()?;
                Ok(FormulaExpr::UnaryOp {
                    op: UnaryOperator::Negate,
                    operand: Box::new(operand),
                })
            }
            // Prefix plus (no-op)
            Token::Plus => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        match self.current_token().clone() {
            Token::Number(text) => {
                let value = parse_decimal(&text).ok_or_else(|| {
                    self.error(format!("Invalid number '{}'", text))
                })?;
                self.consume();
                Ok(FormulaExpr::Number(value))
            }

            Token::LeftParen => {
                self.consume();
                let expr = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }

            Token::LeftBracket => Ok(FormulaExpr::CellRef(self.parse_bracket_reference()?)),

            Token::Macro(name) => {
                if name.eq_ignore_ascii_case("LOOP") {
                    return Err(self.error("$LOOP is only valid as a dimension filter value"));
                }
                self.consume();
                Ok(FormulaExpr::SubFormula(name))
            }

            Token::Identifier(name) => {
                self.consume();
                self.parse_identifier(name)
            }

            Token::String(_) => Err(self.error(
                "String literals are only valid in REF and dimension filters",
            )),

            _ => Err(self.unexpected("in expression")),
        }
    }

    fn parse_identifier(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        let upper = name.to_ascii_uppercase();

        // SUM:[...] / SUM:KF
        if let Some(kind) = AggregateKind::from_tag(&upper) {
            if matches!(self.current_token(), Token::Colon) {
                self.consume();
                return self.parse_aggregate(kind);
            }
        }

        if upper == "CASE" {
            return self.parse_case();
        }

        if matches!(self.current_token(), Token::LeftParen) {
            return match upper.as_str() {
                "REF" => self.parse_reference_call(),
                _ => self.parse_function_call(upper),
            };
        }

        if KEYWORDS.contains(&upper.as_str()) {
            return Err(self.error(format!("Unexpected keyword {}", upper)));
        }
        if matches!(self.current_token(), Token::Dot) {
            return Err(self.error("Member access is not allowed"));
        }
        if !is_constant_name(&name) {
            return Err(self.error(format!(
                "Unknown identifier '{}' (constants are uppercase symbols)",
                name
            )));
        }

        Ok(FormulaExpr::Constant(name))
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        let def = function_registry()
            .get(&name)
            .ok_or_else(|| self.error(format!("Function '{}' is not allowed", name)))?;

        self.expect(Token::LeftParen)?;

        let mut args = Vec::new();

        // Parse arguments
        if !matches!(self.current_token(), Token::RightParen) {
            args.push(self.parse_expression()?);

            while matches!(self.current_token(), Token::Comma) {
                self.consume();
                args.push(self.parse_expression()?);
            }
        }

        self.expect(Token::RightParen)?;
        def.check_arity(args.len())?;

        Ok(FormulaExpr::Function { name, args })
    }

    /// `CASE WHEN c THEN v ... [ELSE e] END`, after the `CASE` keyword
    ///
    /// Arguments are the condition/value pairs in order, followed by the
    /// `ELSE` value when present, so an odd count means an `ELSE` arm.
    fn parse_case(&mut self) -> FormulaResult<FormulaExpr> {
        let mut args = Vec::new();

        self.expect_keyword("WHEN")?;
        loop {
            args.push(self.parse_expression()?);
            self.expect_keyword("THEN")?;
            args.push(self.parse_expression()?);

            if self.is_keyword("WHEN") {
                self.consume();
            } else {
                break;
            }
        }

        if self.is_keyword("ELSE") {
            self.consume();
            args.push(self.parse_expression()?);
        }
        self.expect_keyword("END")?;

        Ok(FormulaExpr::Function {
            name: "CASE".into(),
            args,
        })
    }

    /// `REF('name', dim=value, ...)`, after the `REF` keyword
    fn parse_reference_call(&mut self) -> FormulaResult<FormulaExpr> {
        self.expect(Token::LeftParen)?;

        let name = match self.current_token().clone() {
            Token::String(name) | Token::Identifier(name) => name,
            _ => return Err(self.unexpected("(REF expects a reference data name)")),
        };
        self.consume();

        let mut filters = Vec::new();
        while matches!(self.current_token(), Token::Comma) {
            self.consume();
            filters.push(self.parse_dim_filter()?);
        }
        self.expect(Token::RightParen)?;

        Ok(FormulaExpr::Reference(ReferenceCall { name, filters }))
    }

    fn parse_aggregate(&mut self, kind: AggregateKind) -> FormulaResult<FormulaExpr> {
        let mut reference = match self.current_token().clone() {
            Token::LeftBracket => self.parse_bracket_reference()?,
            Token::Identifier(code) | Token::String(code) => {
                self.consume();
                CellReference::key_figure(code)
            }
            _ => return Err(self.unexpected(&format!("after {}:", kind))),
        };
        reference.aggregate = Some(kind);
        Ok(FormulaExpr::CellRef(reference))
    }

    /// `[Dim=v,...]?.[KF]` or `[KF]`
    fn parse_bracket_reference(&mut self) -> FormulaResult<CellReference> {
        self.expect(Token::LeftBracket)?;

        let mut filters = Vec::new();
        match self.current_token().clone() {
            Token::RightBracket => {
                self.consume();
            }
            Token::Identifier(name) => {
                self.consume();
                match self.current_token() {
                    // Bare key figure
                    Token::RightBracket => {
                        self.consume();
                        return Ok(CellReference::key_figure(name));
                    }
                    Token::Equal => {
                        self.consume();
                        let value = self.parse_dim_value()?;
                        filters.push(DimFilter::new(Dimension::parse(&name), value));
                    }
                    _ => return Err(self.unexpected("in cell reference")),
                }
                while matches!(self.current_token(), Token::Comma) {
                    self.consume();
                    filters.push(self.parse_dim_filter()?);
                }
                self.expect(Token::RightBracket)?;
            }
            Token::Number(code) | Token::String(code) => {
                self.consume();
                self.expect(Token::RightBracket)?;
                return Ok(CellReference::key_figure(code));
            }
            _ => return Err(self.unexpected("in cell reference")),
        }

        let optional = matches!(self.current_token(), Token::Question);
        if optional {
            self.consume();
        }
        if !matches!(self.current_token(), Token::Dot) {
            return Err(self.unexpected("(expected '.[KEY_FIGURE]' after dimension filters)"));
        }
        self.consume();
        self.expect(Token::LeftBracket)?;
        let key_figure = match self.consume() {
            Token::Identifier(code) | Token::Number(code) | Token::String(code) => code,
            Token::Macro(_) => return Err(self.error("The key figure cannot be $LOOP")),
            _ => return Err(self.error("Expected a key figure")),
        };
        self.expect(Token::RightBracket)?;

        Ok(CellReference {
            aggregate: None,
            filters,
            key_figure: DimValue::Code(key_figure),
            optional,
        })
    }

    fn parse_dim_filter(&mut self) -> FormulaResult<DimFilter> {
        let name = match self.current_token().clone() {
            Token::Identifier(name) => name,
            _ => return Err(self.unexpected("(expected a dimension name)")),
        };
        self.consume();
        self.expect(Token::Equal)?;
        let value = self.parse_dim_value()?;
        Ok(DimFilter::new(Dimension::parse(&name), value))
    }

    fn parse_dim_value(&mut self) -> FormulaResult<DimValue> {
        match self.current_token().clone() {
            Token::Identifier(code) | Token::Number(code) | Token::String(code) => {
                self.consume();
                Ok(DimValue::Code(code))
            }
            Token::Macro(name) if name.eq_ignore_ascii_case("LOOP") => {
                self.consume();
                Ok(DimValue::Loop)
            }
            Token::Macro(name) => Err(self.error(format!(
                "'${}' is not a dimension value (only $LOOP is)",
                name
            ))),
            _ => Err(self.unexpected("(expected a dimension value)")),
        }
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = if text.starts_with('.') {
        format!("0{}", text)
    } else {
        text.to_string()
    };
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text).ok()
    } else {
        Decimal::from_str(&text).ok()
    }
}

/// Constants are uppercase symbols: letters, digits and `_`, starting with a letter
fn is_constant_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().map_or(false, |c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn num(value: Decimal) -> Box<FormulaExpr> {
        Box::new(FormulaExpr::Number(value))
    }

    fn parse_err(text: &str) -> String {
        match parse_expression(text) {
            Err(FormulaError::Parse { message, .. }) => message,
            other => panic!("expected parse error for {:?}, got {:?}", text, other),
        }
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_expression("42").unwrap(), FormulaExpr::Number(dec!(42)));
        assert_eq!(parse_expression("1.05").unwrap(), FormulaExpr::Number(dec!(1.05)));
        assert_eq!(parse_expression(".5").unwrap(), FormulaExpr::Number(dec!(0.5)));
        assert_eq!(parse_expression("1e3").unwrap(), FormulaExpr::Number(dec!(1000)));
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let ast = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            ast,
            FormulaExpr::BinaryOp {
                op: BinaryOperator::Add,
                left: num(dec!(1)),
                right: Box::new(FormulaExpr::BinaryOp {
                    op: BinaryOperator::Multiply,
                    left: num(dec!(2)),
                    right: num(dec!(3)),
                }),
            }
        );
    }

    #[test]
    fn test_parse_power_right_associative() {
        let ast = parse_expression("2 ^ 3 ^ 2").unwrap();
        match ast {
            FormulaExpr::BinaryOp {
                op: BinaryOperator::Power,
                left,
                right,
            } => {
                assert_eq!(*left, FormulaExpr::Number(dec!(2)));
                assert!(matches!(
                    *right,
                    FormulaExpr::BinaryOp {
                        op: BinaryOperator::Power,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_comparison_operators() {
        for (text, op) in [
            ("1 = 2", BinaryOperator::Equal),
            ("1 == 2", BinaryOperator::Equal),
            ("1 <> 2", BinaryOperator::NotEqual),
            ("1 != 2", BinaryOperator::NotEqual),
            ("1 <= 2", BinaryOperator::LessEqual),
            ("1 > 2", BinaryOperator::GreaterThan),
        ] {
            match parse_expression(text).unwrap() {
                FormulaExpr::BinaryOp { op: parsed, .. } => assert_eq!(parsed, op, "{}", text),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_unary() {
        assert_eq!(
            parse_expression("-5").unwrap(),
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: num(dec!(5)),
            }
        );
        assert_eq!(parse_expression("+5").unwrap(), FormulaExpr::Number(dec!(5)));
    }

    #[test]
    fn test_parse_cell_references() {
        assert_eq!(
            parse_expression("[COST]").unwrap(),
            FormulaExpr::CellRef(CellReference::key_figure("COST"))
        );

        let expected = CellReference::key_figure("COST")
            .with_filter(Dimension::OrgUnit, DimValue::Loop)
            .with_filter(Dimension::Period, DimValue::Code("P01".into()));
        assert_eq!(
            parse_expression("[OrgUnit=$LOOP, Period=P01].[COST]").unwrap(),
            FormulaExpr::CellRef(expected)
        );

        match parse_expression("[Channel='Web shop']?.[REVENUE]").unwrap() {
            FormulaExpr::CellRef(r) => {
                assert!(r.optional);
                assert_eq!(r.filters[0].dimension, Dimension::Extra("Channel".into()));
                assert_eq!(r.filters[0].value, DimValue::Code("Web shop".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_aggregates() {
        let expected = FormulaExpr::CellRef(CellReference {
            aggregate: Some(AggregateKind::Sum),
            ..CellReference::key_figure("COST")
        });
        assert_eq!(parse_expression("SUM:COST").unwrap(), expected);
        assert_eq!(parse_expression("sum:[COST]").unwrap(), expected);

        match parse_expression("MAX:[Period=P01].[COST]").unwrap() {
            FormulaExpr::CellRef(r) => {
                assert_eq!(r.aggregate, Some(AggregateKind::Max));
                assert_eq!(r.filters.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        // MIN( is the function, MIN: the aggregate
        assert!(matches!(
            parse_expression("MIN(1, 2)").unwrap(),
            FormulaExpr::Function { ref name, .. } if name == "MIN"
        ));
    }

    #[test]
    fn test_parse_macros() {
        assert_eq!(
            parse_expression("$BASE * GROWTH").unwrap(),
            FormulaExpr::BinaryOp {
                op: BinaryOperator::Multiply,
                left: Box::new(FormulaExpr::SubFormula("BASE".into())),
                right: Box::new(FormulaExpr::Constant("GROWTH".into())),
            }
        );

        assert_eq!(
            parse_expression("REF('Budget', OrgUnit=$LOOP)").unwrap(),
            FormulaExpr::Reference(ReferenceCall {
                name: "Budget".into(),
                filters: vec![DimFilter::new(Dimension::OrgUnit, DimValue::Loop)],
            })
        );
    }

    #[test]
    fn test_parse_if_and_case() {
        match parse_expression("if([COST] > 0, 1, 2)").unwrap() {
            FormulaExpr::Function { name, args } => {
                assert_eq!(name, "IF");
                assert_eq!(args.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        match parse_expression("CASE WHEN [COST] > 10 THEN 1 WHEN [COST] > 5 THEN 2 ELSE 3 END")
            .unwrap()
        {
            FormulaExpr::Function { name, args } => {
                assert_eq!(name, "CASE");
                assert_eq!(args.len(), 5);
                assert_eq!(args[4], FormulaExpr::Number(dec!(3)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_statement() {
        let stmt = parse_statement("[Period=P01].[COST] = SUM:COST * 1.1").unwrap();
        assert_eq!(stmt.target.filters.len(), 1);
        assert_eq!(stmt.target.key_figure, DimValue::Code("COST".into()));
        assert!(matches!(
            stmt.expr,
            FormulaExpr::BinaryOp {
                op: BinaryOperator::Multiply,
                ..
            }
        ));

        // '=' inside the expression is a comparison
        let stmt = parse_statement("[FLAG] = IF([COST] = 0, 1, 0)").unwrap();
        assert!(matches!(stmt.expr, FormulaExpr::Function { .. }));
    }

    #[test]
    fn test_parse_statement_requires_target() {
        assert!(matches!(
            parse_statement("1 + 2"),
            Err(FormulaError::Parse { .. })
        ));
        assert!(matches!(
            parse_statement("[COST] 1 + 2"),
            Err(FormulaError::Parse { .. })
        ));
    }

    #[test]
    fn test_disallowed_constructs() {
        assert!(parse_err("SQRT(4)").contains("not allowed"));
        assert!(parse_err("FOO.bar").contains("Member access"));
        assert!(parse_err("[COST].value").contains("Member access"));
        assert!(parse_err("1 # 2").contains("unexpected character"));
        assert!(parse_err("lowercase").contains("Unknown identifier"));
        assert!(parse_err("$LOOP + 1").contains("$LOOP"));
        assert!(parse_err("'text'").contains("String literals"));
        assert!(parse_err("REF('Budget'").contains("expected"));
        assert!(parse_err("[OrgUnit=A]").contains(".[KEY_FIGURE]"));
        assert!(parse_err("1 +").contains("end of formula"));
        assert!(parse_err("CASE(1, 2)").contains("WHEN"));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(parse_err("REF('Budget)").contains("unterminated"));
    }

    #[test]
    fn test_argument_count_checked_at_parse() {
        assert!(matches!(
            parse_expression("IF(1, 2)"),
            Err(FormulaError::ArgumentCount { .. })
        ));
        assert!(matches!(
            parse_expression("NOT(1, 2)"),
            Err(FormulaError::ArgumentCount { .. })
        ));
    }
}
