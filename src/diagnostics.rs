//! Unified error taxonomy. Every phase-specific error enum wraps into
//! [`Error`], which formats as `path:line:col: <phase> error: message`.

use crate::position::Pos;
use crate::symbol::Symbol;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum LexError {
    UnterminatedString(Pos),
    UnterminatedComment(Pos),
    InvalidEscape(Pos, char),
    UnexpectedChar(Pos, char),
}

#[derive(Debug)]
pub enum ParseError {
    UnexpectedToken { pos: Pos, expected: String, found: String },
    UnexpectedEof { pos: Pos, expected: String },
}

#[derive(Debug)]
pub enum TypeError {
    UndefinedVariable(Pos, Symbol),
    UndefinedType(Pos, Symbol),
    UndefinedFunction(Pos, Symbol),
    UndefinedField(Pos, Symbol),
    TypeMismatch { pos: Pos, expected: String, found: String },
    NotAFunction(Pos, Symbol),
    NotARecord(Pos),
    NotAnArray(Pos),
    ArityMismatch { pos: Pos, expected: usize, found: usize },
    NotAssignable(Pos),
    DuplicateTypeDecl(Pos, Symbol),
    DuplicateFunctionDecl(Pos, Symbol),
    DuplicateRecordField(Pos, Symbol),
    CyclicTypeDecl(Pos, Symbol),
    BreakOutsideLoop(Pos),
}

/// An internal-consistency failure during IR construction: these indicate a
/// compiler bug, never a fault in the user's source.
#[derive(Debug)]
pub enum IrError {
    MalformedTree(&'static str),
    CanonInvariant(&'static str),
    RegAllocInvariant(&'static str),
}

#[derive(Debug)]
pub enum Error {
    Io(PathBuf, std::io::Error),
    Lex(LexError),
    Parse(ParseError),
    Type(TypeError),
    Ir(IrError),
}

impl From<LexError> for Error {
    fn from(e: LexError) -> Self { Error::Lex(e) }
}
impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self { Error::Parse(e) }
}
impl From<TypeError> for Error {
    fn from(e: TypeError) -> Self { Error::Type(e) }
}
impl From<IrError> for Error {
    fn from(e: IrError) -> Self { Error::Ir(e) }
}

/// Formats an [`Error`] as `path:line:col: message`, resolving interned
/// [`Symbol`]s through the compiler's string table.
pub struct Diagnostic<'a> {
    pub path: &'a std::path::Path,
    pub error: &'a Error,
    pub strings: &'a dyn Fn(Symbol) -> &'a str,
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.display();
        match self.error {
            Error::Io(p, e) => write!(f, "{}: {}", p.display(), e),
            Error::Lex(e) => {
                let (pos, msg) = match e {
                    LexError::UnterminatedString(p) => (*p, "unterminated string literal".to_string()),
                    LexError::UnterminatedComment(p) => (*p, "unterminated comment".to_string()),
                    LexError::InvalidEscape(p, c) => (*p, format!("invalid escape sequence '\\{c}'")),
                    LexError::UnexpectedChar(p, c) => (*p, format!("unexpected character '{c}'")),
                };
                write!(f, "{path}:{pos}: lex error: {msg}")
            }
            Error::Parse(e) => match e {
                ParseError::UnexpectedToken { pos, expected, found } => {
                    write!(f, "{path}:{pos}: parse error: expected {expected}, found {found}")
                }
                ParseError::UnexpectedEof { pos, expected } => {
                    write!(f, "{path}:{pos}: parse error: expected {expected}, found end of file")
                }
            },
            Error::Type(e) => {
                let (pos, msg) = match e {
                    TypeError::UndefinedVariable(p, s) => (*p, format!("undefined variable '{}'", (self.strings)(*s))),
                    TypeError::UndefinedType(p, s) => (*p, format!("undefined type '{}'", (self.strings)(*s))),
                    TypeError::UndefinedFunction(p, s) => (*p, format!("undefined function '{}'", (self.strings)(*s))),
                    TypeError::UndefinedField(p, s) => (*p, format!("undefined field '{}'", (self.strings)(*s))),
                    TypeError::TypeMismatch { pos, expected, found } => {
                        (*pos, format!("type mismatch: expected {expected}, found {found}"))
                    }
                    TypeError::NotAFunction(p, s) => (*p, format!("'{}' is not a function", (self.strings)(*s))),
                    TypeError::NotARecord(p) => (*p, "expression is not a record".to_string()),
                    TypeError::NotAnArray(p) => (*p, "expression is not an array".to_string()),
                    TypeError::ArityMismatch { pos, expected, found } => {
                        (*pos, format!("expected {expected} arguments, found {found}"))
                    }
                    TypeError::NotAssignable(p) => (*p, "left-hand side is not assignable".to_string()),
                    TypeError::DuplicateTypeDecl(p, s) => (*p, format!("duplicate type declaration '{}'", (self.strings)(*s))),
                    TypeError::DuplicateFunctionDecl(p, s) => (*p, format!("duplicate function declaration '{}'", (self.strings)(*s))),
                    TypeError::DuplicateRecordField(p, s) => (*p, format!("duplicate record field '{}'", (self.strings)(*s))),
                    TypeError::CyclicTypeDecl(p, s) => (*p, format!("cyclic type declaration involving '{}'", (self.strings)(*s))),
                    TypeError::BreakOutsideLoop(p) => (*p, "break outside of a loop".to_string()),
                };
                write!(f, "{path}:{pos}: type error: {msg}")
            }
            Error::Ir(e) => {
                let msg = match e {
                    IrError::MalformedTree(m) => format!("internal error: malformed tree ({m})"),
                    IrError::CanonInvariant(m) => format!("internal error: canonicalization invariant violated ({m})"),
                    IrError::RegAllocInvariant(m) => format!("internal error: register allocator invariant violated ({m})"),
                };
                write!(f, "{path}: {msg}")
            }
        }
    }
}
