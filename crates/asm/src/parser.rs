//! The assembly parser.
//!
//! Parsing happens in two stages. A splitter walks the raw source once,
//! strips `#` comments, tracks line numbers and cuts the text into
//! `;`-terminated statements. Each statement is then parsed with nom
//! combinators into one [`Statement`], which the driver feeds into the
//! section creators.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0, multispace1, satisfy},
    combinator::{all_consuming, map, opt, recognize, verify},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::CompileError;

/// One parsed slot of an instruction: an empty or transport move plus its
/// annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSlot {
    /// The slot payload.
    pub body: ParserMoveBody,
    /// Attached annotations.
    pub annotations: Vec<Annotation>,
}

/// One parsed long immediate: `[dst = value] {ann}*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongImmediate {
    /// Destination immediate unit register.
    pub destination: RegisterTerm,
    /// Assigned value.
    pub value: LiteralOrExpression,
    /// Attached annotations.
    pub annotations: Vec<Annotation>,
}

/// An assembler directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `:procedure <name>;`
    Procedure(String),
    /// `:global <name>;`
    Global(String),
}

/// One `;`-terminated statement of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `CODE [start];`
    CodeHeader {
        /// Optional start address; 0 when omitted.
        start: UValue,
    },
    /// `DATA <aspace-name> [start];`
    DataHeader {
        /// Address space name.
        space: String,
        /// Optional fixed start address.
        start: Option<UValue>,
    },
    /// A directive.
    Directive(Directive),
    /// `label:* instruction {long-immediate}*;`
    CodeLine {
        /// Code labels of the instruction.
        labels: Vec<String>,
        /// Instruction slots; empty for the `. . .` instruction.
        slots: Vec<ParsedSlot>,
        /// Long immediates encoded in dedicated instruction slots.
        long_immediates: Vec<LongImmediate>,
    },
    /// `label:* DA <width> <init-field>*;`
    DataLine {
        /// Data labels of the line.
        labels: Vec<String>,
        /// Number of MAUs the line reserves.
        width: UValue,
        /// Init data fields.
        init_data: Vec<InitDataField>,
    },
}

/// A statement with the source line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    /// 1-based source line of the statement's first token.
    pub line: u32,
    /// The parsed statement.
    pub statement: Statement,
}

/// Parses a whole source file into statements.
///
/// Syntax errors carry the line number of the offending statement.
pub fn parse_program(source: &str) -> Result<Vec<ParsedStatement>, CompileError> {
    let mut statements = Vec::new();

    for (line, text) in split_statements(source)? {
        let statement = parse_statement(&text)
            .map_err(|message| CompileError::new(line, message))?;

        statements.push(ParsedStatement { line, statement });
    }

    Ok(statements)
}

/// Cuts the source into `;`-terminated statements, stripping comments and
/// tracking line numbers.
fn split_statements(source: &str) -> Result<Vec<(u32, String)>, CompileError> {
    let mut statements = Vec::new();

    let mut line: u32 = 1;
    let mut statement_line: u32 = 0;
    let mut text = String::new();
    let mut in_comment = false;

    for character in source.chars() {
        match character {
            '\n' => {
                line += 1;
                in_comment = false;

                if !text.is_empty() {
                    text.push('\n');
                }
            }
            _ if in_comment => {}
            '#' => in_comment = true,
            ';' => {
                if statement_line != 0 {
                    statements.push((statement_line, std::mem::take(&mut text)));
                    statement_line = 0;
                } else {
                    text.clear();
                }
            }
            _ => {
                if !character.is_whitespace() && statement_line == 0 {
                    statement_line = line;
                }
                text.push(character);
            }
        }
    }

    if statement_line != 0 {
        return Err(CompileError::new(statement_line, "statement without terminating `;`"));
    }

    Ok(statements)
}

fn parse_statement(text: &str) -> Result<Statement, String> {
    let full = alt((directive, code_header, data_header, data_line, code_line));

    match all_consuming(delimited(multispace0, full, multispace0))(text) {
        Ok((_, statement)) => Ok(statement),
        Err(_) => Err("syntax error".to_string()),
    }
}

// ------------------------------------------------------------------
// Tokens.
// ------------------------------------------------------------------

fn name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// A keyword: the given word not followed by a name character.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| {
        let (rest, matched) = tag(word)(input)?;

        if rest.chars().next().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        } else {
            Ok((rest, matched))
        }
    }
}

fn hex_number(input: &str) -> IResult<&str, UValue> {
    let (input, digits) =
        preceded(tag("0x"), take_while1(|c: char| c.is_ascii_hexdigit()))(input)?;

    match UValue::from_str_radix(digits, 16) {
        Ok(value) => Ok((input, value)),
        Err(_) => {
            Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::HexDigit)))
        }
    }
}

fn bin_number(input: &str) -> IResult<&str, UValue> {
    let (input, digits) = preceded(tag("0b"), take_while1(|c| c == '0' || c == '1'))(input)?;

    match UValue::from_str_radix(digits, 2) {
        Ok(value) => Ok((input, value)),
        Err(_) => {
            Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))
        }
    }
}

fn dec_number(input: &str) -> IResult<&str, UValue> {
    let (input, digits) = take_while1(|c: char| c.is_ascii_digit())(input)?;

    match digits.parse::<UValue>() {
        Ok(value) => Ok((input, value)),
        Err(_) => {
            Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))
        }
    }
}

/// `0x…`, `0b…` or an unsigned decimal.
fn unsigned_literal(input: &str) -> IResult<&str, UValue> {
    alt((hex_number, bin_number, dec_number))(input)
}

/// A decimal spelled with an explicit sign; the value keeps its two's
/// complement bits.
fn signed_number(input: &str) -> IResult<&str, UValue> {
    let (input, (sign, magnitude)) =
        pair(alt((char('+'), char('-'))), dec_number)(input)?;

    let value = match sign {
        '-' => (magnitude as SValue).wrapping_neg() as UValue,
        _ => magnitude,
    };

    Ok((input, value))
}

/// Any literal, with its signedness.
fn literal(input: &str) -> IResult<&str, LiteralOrExpression> {
    alt((
        map(unsigned_literal, |value| LiteralOrExpression::Literal { value, signed: false }),
        map(signed_number, |value| LiteralOrExpression::Literal { value, signed: true }),
    ))(input)
}

/// `name[(+|-)offset][=literal]`
fn expression(input: &str) -> IResult<&str, Expression> {
    let (input, label) = name(input)?;

    let (input, offset) = opt(tuple((
        multispace0,
        alt((char('+'), char('-'))),
        multispace0,
        unsigned_literal,
    )))(input)?;

    let (input, value) = opt(preceded(
        tuple((multispace0, char('='), multispace0)),
        map(literal, |value| value.literal_value()),
    ))(input)?;

    Ok((
        input,
        Expression {
            label: label.to_string(),
            offset: offset.map(|(_, sign, _, amount)| (sign == '-', amount)),
            value,
        },
    ))
}

fn literal_or_expression(input: &str) -> IResult<&str, LiteralOrExpression> {
    alt((literal, map(expression, LiteralOrExpression::Expression)))(input)
}

// ------------------------------------------------------------------
// Register terms.
// ------------------------------------------------------------------

/// `{prev}` or `{next}`
fn bus_term(input: &str) -> IResult<&str, RegisterTerm> {
    let (input, word) = delimited(
        pair(char('{'), multispace0),
        alt((keyword("prev"), keyword("next"))),
        pair(multispace0, char('}')),
    )(input)?;

    Ok((input, RegisterTerm::Bus(BusTerm { prev: word == "prev" })))
}

/// `rf[.port].index` or `fu.operation.index`
fn index_term(input: &str) -> IResult<&str, RegisterTerm> {
    let (input, unit) = name(input)?;
    let (input, _) = char('.')(input)?;
    let (input, port) = opt(terminated(name, char('.')))(input)?;
    let (input, index) = dec_number(input)?;

    Ok((
        input,
        RegisterTerm::Index(IndexTerm {
            unit: unit.to_string(),
            port: port.map(str::to_string),
            index,
        }),
    ))
}

/// `unit.port[.operation]`
fn fu_term(input: &str) -> IResult<&str, RegisterTerm> {
    let (input, unit) = name(input)?;
    let (input, _) = char('.')(input)?;
    let (input, port) = name(input)?;
    let (input, operation) = opt(preceded(char('.'), name))(input)?;

    Ok((
        input,
        RegisterTerm::FunctionUnit(FuTerm {
            unit: unit.to_string(),
            port: port.to_string(),
            operation: operation.map(str::to_string),
        }),
    ))
}

fn register_term(input: &str) -> IResult<&str, RegisterTerm> {
    alt((index_term, fu_term, bus_term))(input)
}

// ------------------------------------------------------------------
// Moves.
// ------------------------------------------------------------------

/// `[?|!]guard-term`
fn guard(input: &str) -> IResult<&str, ParserGuard> {
    let (input, invert) = alt((char('?'), char('!')))(input)?;
    let (input, term) = preceded(multispace0, register_term)(input)?;

    Ok((input, ParserGuard { inverted: invert == '!', term }))
}

/// `[width:]literal-or-expression`
fn init_data_field(input: &str) -> IResult<&str, InitDataField> {
    let (input, width) = opt(terminated(
        dec_number,
        tuple((multispace0, char(':'), multispace0)),
    ))(input)?;

    let (input, value) = literal_or_expression(input)?;

    Ok((input, InitDataField { width: width.unwrap_or(0), value }))
}

/// `{hexId field field ...}`
fn annotation(input: &str) -> IResult<&str, Annotation> {
    let (input, _) = pair(char('{'), multispace0)(input)?;
    let (input, id) = hex_number(input)?;
    let (input, payload) = many0(preceded(multispace1, init_data_field))(input)?;
    let (input, _) = pair(multispace0, char('}'))(input)?;

    Ok((input, Annotation { id, payload }))
}

fn annotations(input: &str) -> IResult<&str, Vec<Annotation>> {
    many0(preceded(multispace0, annotation))(input)
}

/// `[?|!]guard src -> dst {ann}*`
fn transport(input: &str) -> IResult<&str, ParsedSlot> {
    let (input, guard) = opt(terminated(guard, multispace0))(input)?;

    let (input, source) = alt((
        map(register_term, ParserSource::Register),
        map(literal_or_expression, ParserSource::Immediate),
    ))(input)?;

    let (input, _) = tuple((multispace0, tag("->"), multispace0))(input)?;
    let (input, destination) = register_term(input)?;
    let (input, annotations) = annotations(input)?;

    Ok((
        input,
        ParsedSlot {
            body: ParserMoveBody::Transport { guard, source, destination },
            annotations,
        },
    ))
}

/// One slot: `...` or a transport.
fn slot(input: &str) -> IResult<&str, ParsedSlot> {
    alt((
        map(tag("..."), |_| ParsedSlot {
            body: ParserMoveBody::Empty,
            annotations: Vec::new(),
        }),
        transport,
    ))(input)
}

/// `[dst = value] {ann}*`
fn long_immediate(input: &str) -> IResult<&str, LongImmediate> {
    let (input, _) = pair(char('['), multispace0)(input)?;
    let (input, destination) = register_term(input)?;
    let (input, _) = tuple((multispace0, char('='), multispace0))(input)?;
    let (input, value) = literal_or_expression(input)?;
    let (input, _) = pair(multispace0, char(']'))(input)?;
    let (input, annotations) = annotations(input)?;

    Ok((input, LongImmediate { destination, value, annotations }))
}

// ------------------------------------------------------------------
// Statements.
// ------------------------------------------------------------------

/// `name:`, where the name never collides with the `DA` keyword.
fn label(input: &str) -> IResult<&str, String> {
    let (input, text) = terminated(
        verify(name, |text: &str| text != "DA"),
        pair(multispace0, char(':')),
    )(input)?;

    Ok((input, text.to_string()))
}

fn labels(input: &str) -> IResult<&str, Vec<String>> {
    many0(terminated(label, multispace0))(input)
}

fn directive(input: &str) -> IResult<&str, Statement> {
    let (input, _) = pair(char(':'), multispace0)(input)?;

    let (input, statement) = alt((
        map(
            preceded(pair(keyword("procedure"), multispace1), name),
            |text| Statement::Directive(Directive::Procedure(text.to_string())),
        ),
        map(preceded(pair(keyword("global"), multispace1), name), |text| {
            Statement::Directive(Directive::Global(text.to_string()))
        }),
    ))(input)?;

    Ok((input, statement))
}

fn code_header(input: &str) -> IResult<&str, Statement> {
    let (input, _) = keyword("CODE")(input)?;
    let (input, start) = opt(preceded(multispace1, unsigned_literal))(input)?;

    Ok((input, Statement::CodeHeader { start: start.unwrap_or(0) }))
}

fn data_header(input: &str) -> IResult<&str, Statement> {
    let (input, _) = pair(keyword("DATA"), multispace1)(input)?;
    let (input, space) = name(input)?;
    let (input, start) = opt(preceded(multispace1, unsigned_literal))(input)?;

    Ok((input, Statement::DataHeader { space: space.to_string(), start }))
}

fn data_line(input: &str) -> IResult<&str, Statement> {
    let (input, labels) = labels(input)?;
    let (input, _) = pair(keyword("DA"), multispace1)(input)?;
    let (input, width) = dec_number(input)?;
    let (input, init_data) = many0(preceded(multispace1, init_data_field))(input)?;

    Ok((input, Statement::DataLine { labels, width, init_data }))
}

fn code_line(input: &str) -> IResult<&str, Statement> {
    let (input, labels) = labels(input)?;

    let (input, slots) = alt((
        map(tuple((tag("."), multispace1, tag("."), multispace1, tag("."))), |_| Vec::new()),
        separated_list1(tuple((multispace0, char(','), multispace0)), slot),
    ))(input)?;

    let (input, long_immediates) =
        many0(preceded(multispace0, long_immediate))(input)?;

    Ok((input, Statement::CodeLine { labels, slots, long_immediates }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> Statement {
        let program = parse_program(text).unwrap();
        assert_eq!(program.len(), 1);

        program.into_iter().next().unwrap().statement
    }

    #[test]
    fn test_code_header() {
        assert_eq!(parse_one("CODE ;"), Statement::CodeHeader { start: 0 });
        assert_eq!(parse_one("CODE 0x40 ;"), Statement::CodeHeader { start: 0x40 });
    }

    #[test]
    fn test_data_header() {
        assert_eq!(
            parse_one("DATA data 16 ;"),
            Statement::DataHeader { space: "data".to_string(), start: Some(16) }
        );
        assert_eq!(
            parse_one("DATA main_memory;"),
            Statement::DataHeader { space: "main_memory".to_string(), start: None }
        );
    }

    #[test]
    fn test_directives() {
        assert_eq!(
            parse_one(":procedure main;"),
            Statement::Directive(Directive::Procedure("main".to_string()))
        );
        assert_eq!(
            parse_one(": global counter ;"),
            Statement::Directive(Directive::Global("counter".to_string()))
        );
    }

    #[test]
    fn test_transport_with_label_and_guard() {
        let Statement::CodeLine { labels, slots, long_immediates } =
            parse_one("main: !bool.0 r.1 -> alu.in1t.add ;")
        else {
            panic!("expected a code line");
        };

        assert_eq!(labels, vec!["main".to_string()]);
        assert!(long_immediates.is_empty());
        assert_eq!(slots.len(), 1);

        let ParserMoveBody::Transport { guard, source, destination } = &slots[0].body else {
            panic!("expected a transport");
        };

        let guard = guard.as_ref().unwrap();
        assert!(guard.inverted);
        assert_eq!(
            guard.term,
            RegisterTerm::Index(IndexTerm { unit: "bool".to_string(), port: None, index: 0 })
        );

        assert_eq!(
            *source,
            ParserSource::Register(RegisterTerm::Index(IndexTerm {
                unit: "r".to_string(),
                port: None,
                index: 1,
            }))
        );

        assert_eq!(
            *destination,
            RegisterTerm::FunctionUnit(FuTerm {
                unit: "alu".to_string(),
                port: "in1t".to_string(),
                operation: Some("add".to_string()),
            })
        );
    }

    #[test]
    fn test_immediate_source_and_annotation() {
        let Statement::CodeLine { slots, .. } =
            parse_one("0x5 -> r.0 {0x01 2:0xff} ;")
        else {
            panic!("expected a code line");
        };

        let ParserMoveBody::Transport { source, .. } = &slots[0].body else {
            panic!("expected a transport");
        };

        assert_eq!(
            *source,
            ParserSource::Immediate(LiteralOrExpression::Literal { value: 5, signed: false })
        );

        assert_eq!(slots[0].annotations.len(), 1);
        assert_eq!(slots[0].annotations[0].id, 1);
        assert_eq!(
            slots[0].annotations[0].payload,
            vec![InitDataField {
                width: 2,
                value: LiteralOrExpression::Literal { value: 0xff, signed: false },
            }]
        );
    }

    #[test]
    fn test_multiple_slots_and_long_immediate() {
        let Statement::CodeLine { slots, long_immediates, .. } =
            parse_one("r.1 -> r.2, ... [imm.0 = table+4] ;")
        else {
            panic!("expected a code line");
        };

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].body, ParserMoveBody::Empty);

        assert_eq!(long_immediates.len(), 1);
        assert_eq!(
            long_immediates[0].value,
            LiteralOrExpression::Expression(Expression {
                label: "table".to_string(),
                offset: Some((false, 4)),
                value: None,
            })
        );
    }

    #[test]
    fn test_empty_instruction() {
        let Statement::CodeLine { slots, .. } = parse_one(". . . ;") else {
            panic!("expected a code line");
        };

        assert!(slots.is_empty());
    }

    #[test]
    fn test_data_line() {
        let Statement::DataLine { labels, width, init_data } =
            parse_one("table: DA 4 2:0x1234 -1 label=8 ;")
        else {
            panic!("expected a data line");
        };

        assert_eq!(labels, vec!["table".to_string()]);
        assert_eq!(width, 4);
        assert_eq!(init_data.len(), 3);
        assert_eq!(
            init_data[1].value,
            LiteralOrExpression::Literal { value: (-1i64) as UValue, signed: true }
        );
        assert_eq!(
            init_data[2].value,
            LiteralOrExpression::Expression(Expression {
                label: "label".to_string(),
                offset: None,
                value: Some(8),
            })
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let program = parse_program(
            "# header comment\nCODE;\n\nmain: # trailing comment\n  0x1 -> r.0;\n",
        )
        .unwrap();

        assert_eq!(program.len(), 2);
        assert_eq!(program[0].line, 2);
        assert_eq!(program[1].line, 4);
    }

    #[test]
    fn test_missing_semicolon() {
        let error = parse_program("CODE").unwrap_err();

        assert_eq!(error.line, 1);
    }

    #[test]
    fn test_syntax_error_carries_line() {
        let error = parse_program("CODE;\n@@bad@@;").unwrap_err();

        assert_eq!(error.line, 2);
    }
}
