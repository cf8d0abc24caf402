/// GDB/MI types and data structures
///
/// This module defines the value model produced by the record parser
/// and the typed records (stream, out-of-band, result) built from it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

use crate::variables::VariableTree;

/// Address reported by GDB for a breakpoint that is not yet resolved
pub const PENDING_ADDRESS: &str = "<PENDING>";

/// Discriminant of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    String,
    Tuple,
    List,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::String => "string",
            ContentType::Tuple => "tuple",
            ContentType::List => "list",
        };
        write!(f, "{}", s)
    }
}

/// A value was accessed as the wrong variant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("type mismatch: expected {expected}, found {found}")]
pub struct TypeMismatch {
    pub expected: ContentType,
    pub found: ContentType,
}

/// Represents values in GDB/MI output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Tuple(Vec<MiResult>),
    List(MiList),
}

/// The elements of a GDB/MI list. A list holds either results or
/// values, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiList {
    Empty,
    Results(Vec<MiResult>),
    Values(Vec<Value>),
}

impl MiList {
    pub fn is_empty(&self) -> bool {
        match self {
            MiList::Empty => true,
            MiList::Results(r) => r.is_empty(),
            MiList::Values(v) => v.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MiList::Empty => 0,
            MiList::Results(r) => r.len(),
            MiList::Values(v) => v.len(),
        }
    }
}

/// A `name=value` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiResult {
    pub name: String,
    pub value: Value,
}

impl MiResult {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        MiResult {
            name: name.into(),
            value,
        }
    }
}

impl Value {
    pub fn content_type(&self) -> ContentType {
        match self {
            Value::String(_) => ContentType::String,
            Value::Tuple(_) => ContentType::Tuple,
            Value::List(_) => ContentType::List,
        }
    }

    fn mismatch(&self, expected: ContentType) -> TypeMismatch {
        TypeMismatch {
            expected,
            found: self.content_type(),
        }
    }

    /// Get the value as a string
    pub fn as_str(&self) -> Result<&str, TypeMismatch> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch(ContentType::String)),
        }
    }

    /// Get the value as a tuple
    pub fn as_tuple(&self) -> Result<&[MiResult], TypeMismatch> {
        match self {
            Value::Tuple(t) => Ok(t),
            other => Err(other.mismatch(ContentType::Tuple)),
        }
    }

    /// Get the value as a list
    pub fn as_list(&self) -> Result<&MiList, TypeMismatch> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(other.mismatch(ContentType::List)),
        }
    }
}

/// Lookup helpers over the ordered results of a tuple or record
pub trait ResultsExt {
    fn value_of(&self, name: &str) -> Option<&Value>;
    fn str_of(&self, name: &str) -> Option<&str>;
}

impl ResultsExt for [MiResult] {
    fn value_of(&self, name: &str) -> Option<&Value> {
        self.iter().find(|r| r.name == name).map(|r| &r.value)
    }

    fn str_of(&self, name: &str) -> Option<&str> {
        self.value_of(name).and_then(|v| v.as_str().ok())
    }
}

/// Represents a GDB/MI stream record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamRecord {
    Console(String),  // ~ prefix
    Target(String),   // @ prefix
    Log(String),      // & prefix
}

impl StreamRecord {
    pub fn content(&self) -> &str {
        match self {
            StreamRecord::Console(s) | StreamRecord::Target(s) | StreamRecord::Log(s) => s,
        }
    }
}

/// Stop reason for stopped events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopReason {
    #[default]
    Undefined,
    BreakpointHit,
    WatchpointTrigger,
    ReadWatchpointTrigger,
    AccessWatchpointTrigger,
    FunctionFinished,
    LocationReached,
    WatchpointScope,
    EndSteppingRange,
    ExitedSignalled,
    Exited,
    ExitedNormally,
    SignalReceived,
}

impl StopReason {
    /// Map the `reason` attribute of a `*stopped` record
    pub fn from_wire(s: &str) -> Self {
        match s {
            "breakpoint-hit" => StopReason::BreakpointHit,
            "watchpoint-trigger" => StopReason::WatchpointTrigger,
            "read-watchpoint-trigger" => StopReason::ReadWatchpointTrigger,
            "access-watchpoint-trigger" => StopReason::AccessWatchpointTrigger,
            "function-finished" => StopReason::FunctionFinished,
            "location-reached" => StopReason::LocationReached,
            "watchpoint-scope" => StopReason::WatchpointScope,
            "end-stepping-range" => StopReason::EndSteppingRange,
            "exited-signalled" => StopReason::ExitedSignalled,
            "exited" => StopReason::Exited,
            "exited-normally" => StopReason::ExitedNormally,
            "signal-received" => StopReason::SignalReceived,
            _ => StopReason::Undefined,
        }
    }

    /// True for the reasons that end the inferior
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            StopReason::Exited | StopReason::ExitedNormally | StopReason::ExitedSignalled
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Undefined => "undefined",
            StopReason::BreakpointHit => "breakpoint-hit",
            StopReason::WatchpointTrigger => "watchpoint-trigger",
            StopReason::ReadWatchpointTrigger => "read-watchpoint-trigger",
            StopReason::AccessWatchpointTrigger => "access-watchpoint-trigger",
            StopReason::FunctionFinished => "function-finished",
            StopReason::LocationReached => "location-reached",
            StopReason::WatchpointScope => "watchpoint-scope",
            StopReason::EndSteppingRange => "end-stepping-range",
            StopReason::ExitedSignalled => "exited-signalled",
            StopReason::Exited => "exited",
            StopReason::ExitedNormally => "exited-normally",
            StopReason::SignalReceived => "signal-received",
        };
        write!(f, "{}", s)
    }
}

/// An asynchronous record: a stream record, a stop or run notification
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OutOfBandRecord {
    pub stream_record: Option<StreamRecord>,
    pub is_stopped: bool,
    pub stop_reason: StopReason,
    pub frame: Option<Frame>,
    pub breakpoint_number: Option<u32>,
    pub thread_id: Option<u32>,
    pub signal_name: Option<String>,
    pub signal_meaning: Option<String>,
    pub exit_code: Option<i32>,
    /// Set by `*running` notifications
    pub is_running: bool,
}

/// GDB/MI result classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultKind {
    #[default]
    Undefined,
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultKind::Undefined => "undefined",
            ResultKind::Done => "done",
            ResultKind::Running => "running",
            ResultKind::Connected => "connected",
            ResultKind::Error => "error",
            ResultKind::Exit => "exit",
        };
        write!(f, "{}", s)
    }
}

/// The typed data carried by a result record. Which variant is filled
/// depends on the command that produced the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResultPayload {
    /// `bkpt={...}` or `BreakpointTable={...}`; `full_table` is set for the latter
    Breakpoints {
        breakpoints: BTreeMap<u32, BreakPoint>,
        full_table: bool,
    },
    CallStack(Vec<Frame>),
    /// Arguments keyed by frame level
    FrameArguments(BTreeMap<u32, VariableTree>),
    LocalVariables(VariableTree),
    Variable(VariableTree),
    ThreadIds(Vec<u32>),
    NewThread {
        thread_id: u32,
        frame: Option<Frame>,
    },
    Frame(Frame),
    Files(Vec<String>),
    RegisterNames(BTreeMap<u32, String>),
    ChangedRegisters(Vec<u32>),
    RegisterValues(BTreeMap<u32, String>),
    Memory {
        start_address: u64,
        bytes: Vec<u8>,
    },
    OverloadsChoice(Vec<OverloadsChoiceEntry>),
}

/// Represents a GDB/MI result record
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultRecord {
    pub token: Option<u64>,
    pub kind: ResultKind,
    /// Results that did not select a typed payload
    pub attributes: HashMap<String, Value>,
    pub payload: Option<ResultPayload>,
}

impl ResultRecord {
    pub fn new(kind: ResultKind) -> Self {
        ResultRecord {
            kind,
            ..Default::default()
        }
    }

    /// The `msg` attribute of an `^error` record
    pub fn message(&self) -> Option<&str> {
        self.attributes.get("msg").and_then(|v| v.as_str().ok())
    }

    pub fn breakpoints(&self) -> Option<&BTreeMap<u32, BreakPoint>> {
        match &self.payload {
            Some(ResultPayload::Breakpoints { breakpoints, .. }) => Some(breakpoints),
            _ => None,
        }
    }
}

/// One complete chunk of debugger output, up to and including the prompt
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Output {
    pub raw: String,
    pub parsed_ok: bool,
    pub out_of_band: Vec<OutOfBandRecord>,
    pub result_record: Option<ResultRecord>,
}

impl Output {
    pub fn has_result_record(&self) -> bool {
        self.result_record.is_some()
    }

    pub fn has_out_of_band_record(&self) -> bool {
        !self.out_of_band.is_empty()
    }
}

/// Breakpoint information
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BreakPoint {
    pub number: u32,
    pub kind: String,
    pub disposition: String,
    pub enabled: bool,
    pub address: String,
    pub function: String,
    pub file_name: String,
    pub full_file_path: String,
    pub line: u32,
    pub condition: Option<String>,
    pub hits: u32,
    pub ignore_count: u32,
    pub original_location: String,
}

impl BreakPoint {
    pub fn is_pending(&self) -> bool {
        self.address == PENDING_ADDRESS
    }
}

/// Formats the breakpoint in its `bkpt={...}` wire form
impl fmt::Display for BreakPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bkpt={{number=\"{}\"", self.number)?;
        if !self.kind.is_empty() {
            write!(f, ",type={}", quote(&self.kind))?;
        }
        if !self.disposition.is_empty() {
            write!(f, ",disp={}", quote(&self.disposition))?;
        }
        write!(f, ",enabled=\"{}\"", if self.enabled { "y" } else { "n" })?;
        write!(f, ",addr={}", quote(&self.address))?;
        if !self.function.is_empty() {
            write!(f, ",func={}", quote(&self.function))?;
        }
        if self.is_pending() {
            write!(f, ",pending={}", quote(&format!("{}:{}", self.file_name, self.line)))?;
        } else if !self.file_name.is_empty() {
            write!(f, ",file={}", quote(&self.file_name))?;
        }
        if !self.full_file_path.is_empty() {
            write!(f, ",fullname={}", quote(&self.full_file_path))?;
        }
        if !self.is_pending() && self.line != 0 {
            write!(f, ",line=\"{}\"", self.line)?;
        }
        if let Some(cond) = &self.condition {
            write!(f, ",cond={}", quote(cond))?;
        }
        if self.ignore_count != 0 {
            write!(f, ",ignore=\"{}\"", self.ignore_count)?;
        }
        if !self.original_location.is_empty() {
            write!(f, ",original-location={}", quote(&self.original_location))?;
        }
        write!(f, ",times=\"{}\"}}", self.hits)
    }
}

/// Function argument
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: String,
}

/// Frame information
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub address: String,
    pub function_name: String,
    pub args: Vec<Argument>,
    pub level: u32,
    pub file_name: String,
    pub file_full_name: String,
    pub line: u32,
    /// Set when the frame has no debug info
    pub library: String,
}

impl Frame {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn has_source(&self) -> bool {
        !self.file_name.is_empty() || !self.file_full_name.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverloadsChoiceKind {
    Cancel,
    All,
    Location,
}

/// One line of the menu GDB prints when a location names several overloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverloadsChoiceEntry {
    pub index: u32,
    pub kind: OverloadsChoiceKind,
    pub function_name: String,
    pub file_name: String,
    pub line: u32,
}

/// Quote and escape text as a GDB/MI c-string
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let v = Value::String("main".into());
        assert_eq!(v.content_type(), ContentType::String);
        assert_eq!(v.as_str(), Ok("main"));

        let err = v.as_tuple().unwrap_err();
        assert_eq!(err.expected, ContentType::Tuple);
        assert_eq!(err.found, ContentType::String);
    }

    #[test]
    fn test_results_lookup() {
        let tuple = vec![
            MiResult::new("number", Value::String("1".into())),
            MiResult::new("args", Value::List(MiList::Empty)),
        ];
        assert_eq!(tuple.str_of("number"), Some("1"));
        assert_eq!(tuple.str_of("args"), None);
        assert!(tuple.value_of("args").unwrap().as_list().unwrap().is_empty());
        assert!(tuple.value_of("missing").is_none());
    }

    #[test]
    fn test_stop_reason_wire_names() {
        let reasons = [
            ("breakpoint-hit", StopReason::BreakpointHit),
            ("end-stepping-range", StopReason::EndSteppingRange),
            ("exited-normally", StopReason::ExitedNormally),
            ("signal-received", StopReason::SignalReceived),
        ];

        for (wire, expected) in &reasons {
            let parsed = StopReason::from_wire(wire);
            assert_eq!(parsed, *expected);
            assert_eq!(parsed.to_string(), *wire);
        }
        assert_eq!(StopReason::from_wire("solib-event"), StopReason::Undefined);
        assert!(StopReason::ExitedSignalled.is_exit());
        assert!(!StopReason::SignalReceived.is_exit());
    }

    #[test]
    fn test_breakpoint_wire_form() {
        let bp = BreakPoint {
            number: 2,
            kind: "breakpoint".into(),
            disposition: "keep".into(),
            enabled: false,
            address: "0x1000".into(),
            function: "f".into(),
            file_name: "a \"b\".c".into(),
            line: 7,
            ..Default::default()
        };
        assert_eq!(
            bp.to_string(),
            "bkpt={number=\"2\",type=\"breakpoint\",disp=\"keep\",enabled=\"n\",addr=\"0x1000\",func=\"f\",file=\"a \\\"b\\\".c\",line=\"7\",times=\"0\"}"
        );
    }

    #[test]
    fn test_pending_breakpoint_wire_form() {
        let bp = BreakPoint {
            number: 1,
            enabled: true,
            address: PENDING_ADDRESS.into(),
            file_name: "foo.c".into(),
            line: 42,
            ..Default::default()
        };
        assert!(bp.is_pending());
        assert!(bp.to_string().contains("pending=\"foo.c:42\""));
        assert!(!bp.to_string().contains("line="));
    }
}
