//! Intermediate forms produced by the assembly parser.
//!
//! The `Display` implementations recover the source spelling of a term for
//! error and warning messages.

use std::fmt;

/// Unsigned literal value.
pub type UValue = u64;
/// Signed literal value.
pub type SValue = i64;

/// `{prev}` or `{next}` bus register reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTerm {
    /// Previous (true) or next (false) bus register.
    pub prev: bool,
}

impl fmt::Display for BusTerm {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{{{}}}", if self.prev { "prev" } else { "next" })
    }
}

/// Function-unit operand port or special-register reference:
/// `unit.port[.operation]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuTerm {
    /// Unit name.
    pub unit: String,
    /// Port name.
    pub port: String,
    /// Operation name, if used.
    pub operation: Option<String>,
}

impl fmt::Display for FuTerm {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}.{}", self.unit, self.port)?;
        if let Some(operation) = &self.operation {
            write!(formatter, ".{operation}")?;
        }

        Ok(())
    }
}

/// Register-file index or function-unit operand reference:
/// `rf[.port].index` or `fu.operation.index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTerm {
    /// Unit name.
    pub unit: String,
    /// Port or operation name, if used.
    pub port: Option<String>,
    /// Register or operand index.
    pub index: UValue,
}

impl fmt::Display for IndexTerm {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.unit)?;
        if let Some(port) = &self.port {
            write!(formatter, ".{port}")?;
        }
        write!(formatter, ".{}", self.index)
    }
}

/// Any port or register reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterTerm {
    /// Bus term.
    Bus(BusTerm),
    /// FU term.
    FunctionUnit(FuTerm),
    /// Index term.
    Index(IndexTerm),
}

impl fmt::Display for RegisterTerm {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegisterTerm::Bus(term) => term.fmt(formatter),
            RegisterTerm::FunctionUnit(term) => term.fmt(formatter),
            RegisterTerm::Index(term) => term.fmt(formatter),
        }
    }
}

/// A label with optional offset and optional pre-resolved value:
/// `name[(+|-)offset][=literal]`.
///
/// A given `=literal` is compared against the resolved value at resolution
/// time; a mismatch is a compile error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    /// Name of the label.
    pub label: String,
    /// Offset from the label, `(minus, amount)`.
    pub offset: Option<(bool, UValue)>,
    /// Pre-resolved value, if spelled out.
    pub value: Option<UValue>,
}

impl fmt::Display for Expression {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.label)?;
        if let Some((minus, amount)) = self.offset {
            write!(formatter, "{}{amount}", if minus { '-' } else { '+' })?;
        }
        if let Some(value) = self.value {
            write!(formatter, "={value:#x}")?;
        }

        Ok(())
    }
}

/// A literal or a label expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralOrExpression {
    /// A literal and whether it was spelled with a sign.
    Literal {
        /// The value bits.
        value: UValue,
        /// True when the literal was written signed.
        signed: bool,
    },
    /// A label expression.
    Expression(Expression),
}

impl LiteralOrExpression {
    /// The literal value, 0 for expressions.
    pub fn literal_value(&self) -> UValue {
        match self {
            LiteralOrExpression::Literal { value, .. } => *value,
            LiteralOrExpression::Expression(_) => 0,
        }
    }

    /// True when this is an expression.
    pub fn is_expression(&self) -> bool {
        matches!(self, LiteralOrExpression::Expression(_))
    }
}

impl fmt::Display for LiteralOrExpression {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LiteralOrExpression::Literal { value, signed } => {
                if *signed {
                    write!(formatter, "{}", *value as SValue)
                } else {
                    write!(formatter, "{value}")
                }
            }
            LiteralOrExpression::Expression(expression) => expression.fmt(formatter),
        }
    }
}

/// Source field of a parsed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserSource {
    /// A register or port.
    Register(RegisterTerm),
    /// An immediate literal or expression.
    Immediate(LiteralOrExpression),
}

impl fmt::Display for ParserSource {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParserSource::Register(term) => term.fmt(formatter),
            ParserSource::Immediate(value) => value.fmt(formatter),
        }
    }
}

/// Guard field of a parsed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserGuard {
    /// True for `!`, false for `?`.
    pub inverted: bool,
    /// Guard port or register.
    pub term: RegisterTerm,
}

impl fmt::Display for ParserGuard {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}{}", if self.inverted { '!' } else { '?' }, self.term)
    }
}

/// One init data field: `[width:]literal-or-expression`.
///
/// Width 0 means "use the natural encoded width".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDataField {
    /// Number of MAUs initialized by the field, or 0.
    pub width: UValue,
    /// Initialization value.
    pub value: LiteralOrExpression,
}

impl fmt::Display for InitDataField {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}:{}", self.width, self.value)
    }
}

/// One parsed annotation: `{hexId field field ...}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Identification code.
    pub id: UValue,
    /// Payload fields.
    pub payload: Vec<InitDataField>,
}

/// The slot-specific payload of a parsed instruction slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserMoveBody {
    /// Empty move slot.
    Empty,
    /// One long immediate slot.
    LongImmediate {
        /// Destination immediate unit register.
        destination: RegisterTerm,
        /// Assigned value.
        value: LiteralOrExpression,
    },
    /// Data transport.
    Transport {
        /// Optional guard.
        guard: Option<ParserGuard>,
        /// Source field.
        source: ParserSource,
        /// Destination field.
        destination: RegisterTerm,
    },
}

/// All info of one parsed instruction slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserMove {
    /// The slot payload.
    pub body: ParserMoveBody,
    /// True when the slot is the first of its instruction.
    pub is_begin: bool,
    /// Source line number, for errors.
    pub line: u32,
    /// Attached annotations.
    pub annotations: Vec<Annotation>,
}

impl fmt::Display for ParserMove {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match &self.body {
            ParserMoveBody::Empty => write!(formatter, "..."),
            ParserMoveBody::LongImmediate { destination, value } => {
                write!(formatter, "[{destination}={value}]")
            }
            ParserMoveBody::Transport { guard, source, destination } => {
                if let Some(guard) = guard {
                    write!(formatter, "{guard} ")?;
                }
                write!(formatter, "{source} -> {destination}")
            }
        }
    }
}

/// A parsed data area definition line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLine {
    /// Number of MAUs initialized by the line.
    pub width: UValue,
    /// Address space whose MAUs are initialized.
    pub data_space: String,
    /// Init data fields; an uninitialized line if empty.
    pub init_data: Vec<InitDataField>,
    /// Labels of the line.
    pub labels: Vec<String>,
    /// Source line number.
    pub line: u32,
}
