//! Validating reads that collect diagnostics instead of stopping at the first problem.
//!
//! A strict read (`ReadBinary`) fails with a `ParseError`. A validating read
//! (`ReadBinaryValidated`) keeps going where it can, reports what it finds to a [`Logger`] and
//! returns `None` only when nothing usable could be recovered. Each report carries a stable code
//! (`V0004` and so on), a severity, a message and the dotted scope of the structure being read,
//! e.g. `morx.chains[0].subtables[2]`.
//!
//! Every report is also forwarded to the `log` crate under the `otcodec::validate` target.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::binary::read::{ReadBinary, ReadBinaryDep, ReadCtxt};
use crate::tag::DisplayTag;

const LOG_TARGET: &str = "otcodec::validate";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// A value substituted into a diagnostic message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    Int(i64),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub scope: String,
    pub severity: Severity,
    pub code: &'static str,
    pub template: &'static str,
    pub args: Vec<Arg>,
    /// Absolute position in the input, when one is known.
    pub position: Option<usize>,
}

/// Collects diagnostics for a structure and its children.
///
/// Loggers created with `child` or `index` share their parent's list of diagnostics, so the
/// root logger sees everything reported beneath it.
#[derive(Clone)]
pub struct Logger {
    scope: String,
    sink: Rc<RefCell<Vec<Diagnostic>>>,
}

/// Types that can be read with validation.
pub trait ReadBinaryValidated: ReadBinary {
    fn read_validated<'a>(ctxt: &mut ReadCtxt<'a>, logger: &Logger)
        -> Option<Self::HostType<'a>>;
}

/// Types that need arguments to be read with validation.
pub trait ReadBinaryDepValidated: ReadBinaryDep {
    fn read_dep_validated<'a>(
        ctxt: &mut ReadCtxt<'a>,
        args: Self::Args<'a>,
        logger: &Logger,
    ) -> Option<Self::HostType<'a>>;
}

impl<T> ReadBinaryDepValidated for T
where
    T: ReadBinaryValidated,
{
    fn read_dep_validated<'a>(
        ctxt: &mut ReadCtxt<'a>,
        (): (),
        logger: &Logger,
    ) -> Option<T::HostType<'a>> {
        T::read_validated(ctxt, logger)
    }
}

impl Severity {
    fn log_level(self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Critical => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<u16> for Arg {
    fn from(value: u16) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(value) => write!(f, "{}", value),
            Arg::Text(text) => f.write_str(text),
        }
    }
}

impl Diagnostic {
    /// The template with each `{}` replaced by the next argument.
    pub fn message(&self) -> String {
        let mut message = String::with_capacity(self.template.len());
        let mut args = self.args.iter();
        let mut rest = self.template;
        while let Some(index) = rest.find("{}") {
            message.push_str(&rest[..index]);
            match args.next() {
                Some(arg) => message.push_str(&arg.to_string()),
                None => message.push_str("{}"),
            }
            rest = &rest[index + 2..];
        }
        message.push_str(rest);
        message
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.scope, self.code, self.message())
    }
}

impl Logger {
    /// A root logger for a structure called `scope`.
    pub fn new(scope: impl Into<String>) -> Self {
        Logger {
            scope: scope.into(),
            sink: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A root logger for the table with tag `tag`.
    pub fn for_table(tag: u32) -> Self {
        Logger::new(DisplayTag(tag).to_string())
    }

    /// A logger for the field `name` of the current structure.
    pub fn child(&self, name: &str) -> Self {
        Logger {
            scope: format!("{}.{}", self.scope, name),
            sink: Rc::clone(&self.sink),
        }
    }

    /// A logger for element `index` of the current list.
    pub fn index(&self, index: usize) -> Self {
        Logger {
            scope: format!("{}[{}]", self.scope, index),
            sink: Rc::clone(&self.sink),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn report(
        &self,
        severity: Severity,
        code: &'static str,
        template: &'static str,
        args: Vec<Arg>,
        position: Option<usize>,
    ) {
        let diagnostic = Diagnostic {
            scope: self.scope.clone(),
            severity,
            code,
            template,
            args,
            position,
        };
        log::log!(target: LOG_TARGET, severity.log_level(), "{}", diagnostic);
        self.sink.borrow_mut().push(diagnostic);
    }

    pub fn debug(&self, code: &'static str, template: &'static str, args: Vec<Arg>) {
        self.report(Severity::Debug, code, template, args, None)
    }

    pub fn info(&self, code: &'static str, template: &'static str, args: Vec<Arg>) {
        self.report(Severity::Info, code, template, args, None)
    }

    pub fn warning(&self, code: &'static str, template: &'static str, args: Vec<Arg>) {
        self.report(Severity::Warning, code, template, args, None)
    }

    pub fn error(&self, code: &'static str, template: &'static str, args: Vec<Arg>) {
        self.report(Severity::Error, code, template, args, None)
    }

    pub fn critical(&self, code: &'static str, template: &'static str, args: Vec<Arg>) {
        self.report(Severity::Critical, code, template, args, None)
    }

    pub fn warning_at(
        &self,
        position: usize,
        code: &'static str,
        template: &'static str,
        args: Vec<Arg>,
    ) {
        self.report(Severity::Warning, code, template, args, Some(position))
    }

    pub fn error_at(
        &self,
        position: usize,
        code: &'static str,
        template: &'static str,
        args: Vec<Arg>,
    ) {
        self.report(Severity::Error, code, template, args, Some(position))
    }

    /// A copy of every diagnostic reported through this logger or any logger sharing its list.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.sink.borrow().clone()
    }

    /// Returns `true` if anything at `Error` severity or above has been reported.
    pub fn has_errors(&self) -> bool {
        self.sink
            .borrow()
            .iter()
            .any(|diagnostic| diagnostic.severity >= Severity::Error)
    }

    /// Returns `true` if a diagnostic with `code` has been reported.
    pub fn has_code(&self, code: &str) -> bool {
        self.sink
            .borrow()
            .iter()
            .any(|diagnostic| diagnostic.code == code)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("scope", &self.scope)
            .field("diagnostics", &self.sink.borrow().len())
            .finish()
    }
}

/// Check that at least `length` bytes remain, reporting V0004 if they do not.
pub fn ensure_remaining(ctxt: &ReadCtxt<'_>, logger: &Logger, length: usize) -> bool {
    if ctxt.remaining() >= length {
        true
    } else {
        logger.error_at(
            ctxt.position(),
            "V0004",
            "Insufficient bytes.",
            Vec::new(),
        );
        false
    }
}

/// Read `T` strictly, reporting a failure as V0001 instead of returning it.
///
/// Used for types that have no checks beyond what the strict reader does.
pub fn read_or_report<'a, T>(
    ctxt: &mut ReadCtxt<'a>,
    args: T::Args<'a>,
    logger: &Logger,
) -> Option<T::HostType<'a>>
where
    T: ReadBinaryDep,
{
    let position = ctxt.position();
    match T::read_dep(ctxt, args) {
        Ok(value) => Some(value),
        Err(err) => {
            logger.error_at(
                position,
                "V0001",
                "Unable to read structure: {}.",
                vec![Arg::from(err.to_string())],
            );
            None
        }
    }
}
