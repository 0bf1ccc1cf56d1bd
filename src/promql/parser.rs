use super::labels::{LabelMatcher, MatchOp, METRIC_NAME};
use super::QueryError;

/// Functions the evaluator understands.
pub const FUNCTIONS: &[&str] = &[
    "rate",
    "irate",
    "increase",
    "delta",
    "idelta",
    "avg_over_time",
    "sum_over_time",
    "min_over_time",
    "max_over_time",
    "count_over_time",
    "last_over_time",
    "abs",
    "ceil",
    "floor",
    "round",
    "exp",
    "ln",
    "log2",
    "log10",
    "sqrt",
    "clamp",
    "clamp_min",
    "clamp_max",
    "scalar",
    "vector",
    "time",
    "sort",
    "sort_desc",
];

/// PromQL expression AST
#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    String(String),
    /// `name{label="value"} offset 5m`
    Selector(Selector),
    /// `name{..}[5m]`
    RangeSelector { selector: Selector, range_ms: i64 },
    Paren(Box<Expr>),
    /// Unary minus.
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        return_bool: bool,
        matching: Option<VectorMatching>,
    },
    Aggregation {
        op: AggregationOp,
        expr: Box<Expr>,
        param: Option<Box<Expr>>,
        grouping: Option<Grouping>,
    },
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone)]
pub struct Selector {
    pub name: Option<String>,
    /// Includes the `__name__` matcher when a name was given.
    pub matchers: Vec<LabelMatcher>,
    pub offset_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Atan2,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And | BinaryOp::Unless => 2,
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::Less
            | BinaryOp::LessOrEqual
            | BinaryOp::Greater
            | BinaryOp::GreaterOrEqual => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Atan2 => 5,
            BinaryOp::Pow => 6,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 3
    }

    pub fn is_set(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Unless)
    }
}

const POW_PRECEDENCE: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Group,
    Stddev,
    Stdvar,
    TopK,
    BottomK,
    Quantile,
}

impl AggregationOp {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => AggregationOp::Sum,
            "avg" => AggregationOp::Avg,
            "min" => AggregationOp::Min,
            "max" => AggregationOp::Max,
            "count" => AggregationOp::Count,
            "group" => AggregationOp::Group,
            "stddev" => AggregationOp::Stddev,
            "stdvar" => AggregationOp::Stdvar,
            "topk" => AggregationOp::TopK,
            "bottomk" => AggregationOp::BottomK,
            "quantile" => AggregationOp::Quantile,
            _ => return None,
        })
    }

    pub fn takes_param(&self) -> bool {
        matches!(self, AggregationOp::TopK | AggregationOp::BottomK | AggregationOp::Quantile)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    /// true for `by`, false for `without`
    pub by: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMatching {
    /// true for `on`, false for `ignoring`
    pub on: bool,
    pub labels: Vec<String>,
}

/// PromQL parser
pub struct Parser {
    input: Vec<char>,
    position: usize,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Parse a complete expression.
    pub fn parse(&mut self) -> Result<Expr, QueryError> {
        let expr = self.parse_expr(0)?;
        self.skip_whitespace();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected character {c:?}")));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self, min_precedence: u8) -> Result<Expr, QueryError> {
        let mut lhs = self.parse_unary()?;

        loop {
            self.skip_whitespace();
            let Some((op, len)) = self.peek_binary_op() else {
                break;
            };
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.position += len;

            let (return_bool, matching) = self.parse_binary_modifiers(op)?;
            // `^` is right associative
            let next = if op == BinaryOp::Pow { precedence } else { precedence + 1 };
            let rhs = self.parse_expr(next)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                return_bool,
                matching,
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, QueryError> {
        self.skip_whitespace();
        match self.peek() {
            Some('-') => {
                self.position += 1;
                let operand = self.parse_expr(POW_PRECEDENCE)?;
                Ok(Expr::Negate(Box::new(operand)))
            }
            Some('+') => {
                self.position += 1;
                self.parse_expr(POW_PRECEDENCE)
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, QueryError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('(') => {
                self.position += 1;
                let inner = self.parse_expr(0)?;
                self.expect(')')?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Some('{') => {
                let matchers = self.parse_label_matchers()?;
                self.selector(None, matchers)
            }
            Some('"') | Some('\'') | Some('`') => Ok(Expr::String(self.parse_string()?)),
            Some(c) if c.is_ascii_digit() || c == '.' => Ok(Expr::Number(self.parse_number()?)),
            Some(c) if is_identifier_start(c) => {
                let start = self.position;
                let name = self.parse_identifier();
                self.skip_whitespace();

                if let Some(op) = AggregationOp::from_name(&name) {
                    if matches!(self.peek(), Some('(')) || self.peek_keyword("by") || self.peek_keyword("without") {
                        return self.parse_aggregation(op);
                    }
                }
                if name == "count_values" {
                    return Err(QueryError::Unsupported("count_values aggregation".into()));
                }

                match name.to_ascii_lowercase().as_str() {
                    "inf" => return Ok(Expr::Number(f64::INFINITY)),
                    "nan" => return Ok(Expr::Number(f64::NAN)),
                    _ => {}
                }

                if self.peek() == Some('(') {
                    return self.parse_function_call(name, start);
                }

                let matchers = if self.peek() == Some('{') {
                    self.parse_label_matchers()?
                } else {
                    Vec::new()
                };
                self.selector(Some(name), matchers)
            }
            Some(c) => Err(self.error(format!("unexpected character {c:?}"))),
        }
    }

    fn selector(&mut self, name: Option<String>, mut matchers: Vec<LabelMatcher>) -> Result<Expr, QueryError> {
        if let Some(name) = &name {
            if matchers.iter().any(|m| m.name == METRIC_NAME) {
                return Err(self.error("metric name must not be set twice"));
            }
            matchers.insert(0, LabelMatcher::new(METRIC_NAME, MatchOp::Equal, name.clone())?);
        }
        if matchers.iter().all(|m| m.matches_empty()) {
            return Err(self.error("vector selector must contain at least one non-empty matcher"));
        }
        Ok(Expr::Selector(Selector {
            name,
            matchers,
            offset_ms: 0,
        }))
    }

    /// Range, `offset` and `@` suffixes.
    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, QueryError> {
        self.skip_whitespace();
        if self.peek() == Some('[') {
            self.position += 1;
            self.skip_whitespace();
            let range_ms = self.parse_duration()?;
            self.skip_whitespace();
            if self.peek() == Some(':') {
                return Err(QueryError::Unsupported("subqueries".into()));
            }
            self.expect(']')?;
            expr = match expr {
                Expr::Selector(selector) => Expr::RangeSelector { selector, range_ms },
                _ => return Err(QueryError::Unsupported("subqueries".into())),
            };
        }

        self.skip_whitespace();
        if self.peek_keyword("offset") {
            self.position += "offset".len();
            self.skip_whitespace();
            let negative = if self.peek() == Some('-') {
                self.position += 1;
                true
            } else {
                false
            };
            let offset = self.parse_duration()?;
            let offset = if negative { -offset } else { offset };
            match &mut expr {
                Expr::Selector(selector) | Expr::RangeSelector { selector, .. } => selector.offset_ms = offset,
                _ => return Err(self.error("offset modifier must follow a selector")),
            }
            self.skip_whitespace();
        }

        if self.peek() == Some('@') {
            return Err(QueryError::Unsupported("@ modifier".into()));
        }
        Ok(expr)
    }

    fn parse_function_call(&mut self, name: String, start: usize) -> Result<Expr, QueryError> {
        if !FUNCTIONS.contains(&name.as_str()) {
            self.position = start;
            return Err(self.error(format!("unknown function {name:?}")));
        }
        let args = self.parse_arguments()?;
        Ok(Expr::Call { name, args })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, QueryError> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.position += 1;
                return Ok(args);
            }
            if !args.is_empty() {
                self.expect(',')?;
            }
            args.push(self.parse_expr(0)?);
        }
    }

    fn parse_aggregation(&mut self, op: AggregationOp) -> Result<Expr, QueryError> {
        let mut grouping = self.parse_grouping()?;
        let mut args = self.parse_arguments()?;
        if grouping.is_none() {
            grouping = self.parse_grouping()?;
        }

        let expected = if op.takes_param() { 2 } else { 1 };
        if args.len() != expected {
            return Err(self.error(format!(
                "wrong number of arguments for aggregation: expected {expected}, got {}",
                args.len()
            )));
        }
        let expr = args.pop().map(Box::new).ok_or_else(|| self.error("missing aggregation argument"))?;
        let param = args.pop().map(Box::new);
        Ok(Expr::Aggregation {
            op,
            expr,
            param,
            grouping,
        })
    }

    fn parse_grouping(&mut self) -> Result<Option<Grouping>, QueryError> {
        self.skip_whitespace();
        let by = if self.peek_keyword("by") {
            self.position += 2;
            true
        } else if self.peek_keyword("without") {
            self.position += "without".len();
            false
        } else {
            return Ok(None);
        };
        let labels = self.parse_label_list()?;
        Ok(Some(Grouping { by, labels }))
    }

    /// `(a, b, c)`
    fn parse_label_list(&mut self) -> Result<Vec<String>, QueryError> {
        self.skip_whitespace();
        self.expect('(')?;
        let mut labels = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(')') => {
                    self.position += 1;
                    return Ok(labels);
                }
                Some(',') if !labels.is_empty() => self.position += 1,
                Some(c) if is_identifier_start(c) => labels.push(self.parse_identifier()),
                _ => return Err(self.error("expected label name")),
            }
        }
    }

    fn parse_binary_modifiers(&mut self, op: BinaryOp) -> Result<(bool, Option<VectorMatching>), QueryError> {
        self.skip_whitespace();
        let return_bool = if self.peek_keyword("bool") {
            if !op.is_comparison() {
                return Err(self.error("bool modifier can only be used on comparison operators"));
            }
            self.position += 4;
            true
        } else {
            false
        };

        self.skip_whitespace();
        let matching = if self.peek_keyword("on") {
            self.position += 2;
            Some(VectorMatching {
                on: true,
                labels: self.parse_label_list()?,
            })
        } else if self.peek_keyword("ignoring") {
            self.position += "ignoring".len();
            Some(VectorMatching {
                on: false,
                labels: self.parse_label_list()?,
            })
        } else {
            None
        };

        self.skip_whitespace();
        if self.peek_keyword("group_left") || self.peek_keyword("group_right") {
            return Err(QueryError::Unsupported("many-to-one matching (group_left/group_right)".into()));
        }
        Ok((return_bool, matching))
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, usize)> {
        let c = self.peek()?;
        let next = self.peek_at(1);
        let op = match (c, next) {
            ('=', Some('=')) => (BinaryOp::Equal, 2),
            ('!', Some('=')) => (BinaryOp::NotEqual, 2),
            ('<', Some('=')) => (BinaryOp::LessOrEqual, 2),
            ('>', Some('=')) => (BinaryOp::GreaterOrEqual, 2),
            ('<', _) => (BinaryOp::Less, 1),
            ('>', _) => (BinaryOp::Greater, 1),
            ('+', _) => (BinaryOp::Add, 1),
            ('-', _) => (BinaryOp::Sub, 1),
            ('*', _) => (BinaryOp::Mul, 1),
            ('/', _) => (BinaryOp::Div, 1),
            ('%', _) => (BinaryOp::Mod, 1),
            ('^', _) => (BinaryOp::Pow, 1),
            _ if self.peek_keyword("and") => (BinaryOp::And, 3),
            _ if self.peek_keyword("or") => (BinaryOp::Or, 2),
            _ if self.peek_keyword("unless") => (BinaryOp::Unless, 6),
            _ if self.peek_keyword("atan2") => (BinaryOp::Atan2, 5),
            _ => return None,
        };
        Some(op)
    }

    /// `{name="value", other=~"re.*"}`
    fn parse_label_matchers(&mut self) -> Result<Vec<LabelMatcher>, QueryError> {
        self.expect('{')?;
        let mut matchers = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.position += 1;
                    return Ok(matchers);
                }
                Some(c) if is_identifier_start(c) => {}
                _ => return Err(self.error("expected label matcher")),
            }

            let name = self.parse_identifier();
            self.skip_whitespace();
            let op = match (self.peek(), self.peek_at(1)) {
                (Some('='), Some('~')) => MatchOp::Regex,
                (Some('!'), Some('~')) => MatchOp::NotRegex,
                (Some('!'), Some('=')) => MatchOp::NotEqual,
                (Some('='), _) => MatchOp::Equal,
                _ => return Err(self.error("expected label matching operator")),
            };
            self.position += if op == MatchOp::Equal { 1 } else { 2 };
            self.skip_whitespace();
            let value = self.parse_string()?;
            matchers.push(LabelMatcher::new(name, op, value)?);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.position += 1,
                Some('}') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.position;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                self.position += 1;
            } else {
                break;
            }
        }
        self.input[start..self.position].iter().collect()
    }

    fn parse_number(&mut self) -> Result<f64, QueryError> {
        let start = self.position;
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '-' || c == '+')
                && matches!(self.input.get(self.position.wrapping_sub(1)), Some('e') | Some('E'));
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                self.position += 1;
            } else {
                break;
            }
        }
        let text: String = self.input[start..self.position].iter().collect();
        text.parse().map_err(|_| {
            self.position = start;
            self.error(format!("invalid number {text:?}"))
        })
    }

    fn parse_string(&mut self) -> Result<String, QueryError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'' | '`')) => q,
            _ => return Err(self.error("expected string literal")),
        };
        self.position += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.position += 1;
            if c == quote {
                return Ok(value);
            }
            if c == '\\' && quote != '`' {
                let Some(escaped) = self.peek() else {
                    return Err(self.error("unterminated string"));
                };
                self.position += 1;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                value.push(c);
            }
        }
    }

    /// Prometheus duration such as `5m`, `1h30m` or `250ms`, in milliseconds.
    fn parse_duration(&mut self) -> Result<i64, QueryError> {
        let start = self.position;
        let mut total: i64 = 0;
        loop {
            let digits_start = self.position;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.position += 1;
            }
            if self.position == digits_start {
                break;
            }
            let digits: String = self.input[digits_start..self.position].iter().collect();
            let amount: i64 = digits.parse().map_err(|_| self.error("invalid duration"))?;

            let unit_ms = match (self.peek(), self.peek_at(1)) {
                (Some('m'), Some('s')) => {
                    self.position += 2;
                    1
                }
                (Some(unit), _) => {
                    let ms = match unit {
                        's' => 1_000,
                        'm' => 60_000,
                        'h' => 3_600_000,
                        'd' => 86_400_000,
                        'w' => 7 * 86_400_000,
                        'y' => 365 * 86_400_000,
                        _ => return Err(self.error("invalid duration unit")),
                    };
                    self.position += 1;
                    ms
                }
                (None, _) => return Err(self.error("missing duration unit")),
            };
            total = amount
                .checked_mul(unit_ms)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(|| self.error("duration out of range"))?;
        }

        if self.position == start {
            return Err(self.error("expected duration"));
        }
        Ok(total)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.position += 1;
            } else if c == '#' {
                while !matches!(self.peek(), None | Some('\n')) {
                    self.position += 1;
                }
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    /// The keyword at the cursor, not followed by more identifier characters.
    fn peek_keyword(&self, keyword: &str) -> bool {
        let end = self.position + keyword.len();
        if end > self.input.len() {
            return false;
        }
        let matches = self.input[self.position..end]
            .iter()
            .zip(keyword.chars())
            .all(|(a, b)| a.eq_ignore_ascii_case(&b));
        matches && !matches!(self.input.get(end), Some(c) if c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
    }

    fn expect(&mut self, expected: char) -> Result<(), QueryError> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.position += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Parse {
            position: self.position,
            message: message.into(),
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

pub fn parse(query: &str) -> Result<Expr, QueryError> {
    Parser::new(query).parse()
}
