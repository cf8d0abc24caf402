/// GDB/MI output parser
///
/// A recursive-descent parser over one buffered chunk of debugger output.
/// Every parsing function takes the whole input plus a start offset and
/// returns the parsed item together with the offset just past it. A
/// failure anywhere aborts the enclosing parse.

use crate::types::*;
use crate::variables::{VariableId, VariableTree};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use thiserror::Error;

const PROMPT: &str = "(gdb)";
const OVERLOADS_PROMPT: &str = ">";
const NEAR_CONTEXT: usize = 48;

const PREFIX_STOPPED_ASYNC: &str = "*stopped";
const PREFIX_RUNNING_ASYNC: &str = "*running";
const PREFIX_BKPT: &str = "bkpt={";
const PREFIX_BREAKPOINT_TABLE: &str = "BreakpointTable={";
const PREFIX_THREAD_IDS: &str = "thread-ids={";
const PREFIX_NEW_THREAD_ID: &str = "new-thread-id=\"";
const PREFIX_FILES: &str = "files=[";
const PREFIX_STACK: &str = "stack=[";
const PREFIX_FRAME: &str = "frame={";
const PREFIX_STACK_ARGS: &str = "stack-args=[";
const PREFIX_LOCALS: &str = "locals=[";
const PREFIX_VALUE: &str = "value=\"";
const PREFIX_REGISTER_NAMES: &str = "register-names=";
const PREFIX_CHANGED_REGISTERS: &str = "changed-registers=";
const PREFIX_REGISTER_VALUES: &str = "register-values=";
const PREFIX_MEMORY_ADDR: &str = "addr=";
const PREFIX_MEMORY_BYTES: &str = "memory=[";

/// A malformed record. Carries the offset of the failure and the text
/// found there.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}, near {near:?}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
    pub near: String,
}

impl ParseError {
    pub fn at(input: &str, offset: usize, message: impl Into<String>) -> Self {
        let near: String = input
            .get(offset..)
            .unwrap_or("")
            .chars()
            .take(NEAR_CONTEXT)
            .collect();
        let message = message.into();
        log::debug!("GDB_PARSE_FAIL[{}]: {} -> {:?}", offset, message, near);
        ParseError {
            offset,
            message,
            near,
        }
    }
}

/// The parsed item and the offset just past it
pub type Parsed<T> = std::result::Result<(T, usize), ParseError>;

fn byte_at(input: &str, cur: usize) -> Option<u8> {
    input.as_bytes().get(cur).copied()
}

fn looking_at(input: &str, cur: usize, literal: &str) -> bool {
    input
        .as_bytes()
        .get(cur..)
        .map_or(false, |rest| rest.starts_with(literal.as_bytes()))
}

fn slice(input: &str, from: usize, to: usize) -> &str {
    input.get(from..to).unwrap_or("")
}

/// Skip spaces, tabs and line breaks
fn skip_blanks(input: &str, mut cur: usize) -> usize {
    while let Some(b' ' | b'\t' | b'\r' | b'\n') = byte_at(input, cur) {
        cur += 1;
    }
    cur
}

fn skip_spaces(input: &str, mut cur: usize) -> usize {
    while let Some(b' ' | b'\t') = byte_at(input, cur) {
        cur += 1;
    }
    cur
}

fn skip_to_end_of_line(input: &str, cur: usize) -> usize {
    match input.as_bytes()[cur.min(input.len())..].iter().position(|&b| b == b'\n') {
        Some(pos) => cur + pos + 1,
        None => input.len(),
    }
}

fn expect_char(input: &str, cur: usize, expected: u8) -> Result<usize, ParseError> {
    match byte_at(input, cur) {
        Some(b) if b == expected => Ok(cur + 1),
        _ => Err(ParseError::at(
            input,
            cur,
            format!("expected '{}'", expected as char),
        )),
    }
}

/// A record ends at a line break or at the end of the buffer
fn end_of_record(input: &str, cur: usize) -> Option<usize> {
    match byte_at(input, cur) {
        None => Some(cur),
        Some(b'\n') => Some(cur + 1),
        Some(b'\r') if byte_at(input, cur + 1) == Some(b'\n') => Some(cur + 2),
        Some(b'\r') if byte_at(input, cur + 1).is_none() => Some(cur + 1),
        _ => None,
    }
}

fn digits_len(input: &str, cur: usize) -> usize {
    input.as_bytes()[cur.min(input.len())..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count()
}

fn parse_number<T: FromStr>(text: &str, input: &str, offset: usize, what: &str) -> Result<T, ParseError> {
    text.trim()
        .parse()
        .map_err(|_| ParseError::at(input, offset, format!("invalid {}: {:?}", what, text)))
}

fn parse_hex_u64(text: &str) -> Option<u64> {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(digits, 16).ok()
}

/// Parse an identifier: `[A-Za-z_][A-Za-z0-9_-]*`
pub fn parse_identifier(input: &str, start: usize) -> Parsed<String> {
    match byte_at(input, start) {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return Err(ParseError::at(input, start, "expected an identifier")),
    }
    let mut cur = start + 1;
    while let Some(b) = byte_at(input, cur) {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            cur += 1;
        } else {
            break;
        }
    }
    Ok((slice(input, start, cur).to_string(), cur))
}

fn is_octal_digit(b: Option<u8>) -> bool {
    matches!(b, Some(b'0'..=b'7'))
}

/// Append a run of octal-escaped bytes, decoded as one UTF-8 string.
/// Undecodable runs become one `?` per byte.
fn flush_octal_run(run: &mut Vec<u8>, out: &mut Vec<u8>) {
    if run.is_empty() {
        return;
    }
    match std::str::from_utf8(run.as_slice()) {
        Ok(text) => out.extend_from_slice(text.as_bytes()),
        Err(_) => out.extend(std::iter::repeat(b'?').take(run.len())),
    }
    run.clear();
}

/// Parse a C-style quoted string, decoding its escape sequences
pub fn parse_c_string(input: &str, start: usize) -> Parsed<String> {
    let mut cur = expect_char(input, start, b'"')?;
    let mut out: Vec<u8> = Vec::new();
    let mut octal_run: Vec<u8> = Vec::new();

    loop {
        let b = match byte_at(input, cur) {
            Some(b) => b,
            None => return Err(ParseError::at(input, start, "unterminated string")),
        };
        match b {
            b'\\' => {
                let escaped = match byte_at(input, cur + 1) {
                    Some(e) => e,
                    None => return Err(ParseError::at(input, cur, "dangling escape")),
                };
                if is_octal_digit(Some(escaped))
                    && is_octal_digit(byte_at(input, cur + 2))
                    && is_octal_digit(byte_at(input, cur + 3))
                {
                    let bytes = input.as_bytes();
                    let code = u32::from(bytes[cur + 1] - b'0') * 64
                        + u32::from(bytes[cur + 2] - b'0') * 8
                        + u32::from(bytes[cur + 3] - b'0');
                    let byte = u8::try_from(code)
                        .map_err(|_| ParseError::at(input, cur, "octal escape out of range"))?;
                    octal_run.push(byte);
                    cur += 4;
                    continue;
                }
                flush_octal_run(&mut octal_run, &mut out);
                match escaped {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'"' => out.push(b'"'),
                    b'\\' => out.push(b'\\'),
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'v' => out.push(0x0b),
                    b'e' => out.push(0x1b),
                    other => {
                        out.push(b'\\');
                        out.push(other);
                    }
                }
                cur += 2;
            }
            b'"' => {
                flush_octal_run(&mut octal_run, &mut out);
                let text = String::from_utf8(out)
                    .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
                return Ok((text, cur + 1));
            }
            other => {
                flush_octal_run(&mut octal_run, &mut out);
                out.push(other);
                cur += 1;
            }
        }
    }
}

/// Parse `ident=value`
pub fn parse_gdbmi_result(input: &str, start: usize) -> Parsed<MiResult> {
    let (name, cur) = parse_identifier(input, start)?;
    let cur = expect_char(input, cur, b'=')?;
    let (value, cur) = parse_gdbmi_value(input, cur)?;
    Ok((MiResult { name, value }, cur))
}

/// Parse a string, tuple or list value
pub fn parse_gdbmi_value(input: &str, start: usize) -> Parsed<Value> {
    match byte_at(input, start) {
        Some(b'"') => {
            let (s, cur) = parse_c_string(input, start)?;
            Ok((Value::String(s), cur))
        }
        Some(b'{') => {
            let (t, cur) = parse_gdbmi_tuple(input, start)?;
            Ok((Value::Tuple(t), cur))
        }
        Some(b'[') => {
            let (l, cur) = parse_gdbmi_list(input, start)?;
            Ok((Value::List(l), cur))
        }
        _ => Err(ParseError::at(input, start, "expected a value")),
    }
}

/// Parse `{ [result {, result}] }`
pub fn parse_gdbmi_tuple(input: &str, start: usize) -> Parsed<Vec<MiResult>> {
    let mut cur = expect_char(input, start, b'{')?;
    let mut results = Vec::new();
    if byte_at(input, cur) == Some(b'}') {
        return Ok((results, cur + 1));
    }
    loop {
        if starts_value(byte_at(input, cur)) {
            // Older GDBs print bare values in tuples, e.g. script={"silent"}
            let (value, next) = parse_gdbmi_value(input, cur)?;
            log::trace!("skipping bare value {:?} in tuple", value);
            cur = next;
        } else {
            let (result, next) = parse_gdbmi_result(input, cur)?;
            results.push(result);
            cur = next;
        }
        match byte_at(input, cur) {
            Some(b',') => cur += 1,
            Some(b'}') => return Ok((results, cur + 1)),
            _ => return Err(ParseError::at(input, cur, "expected ',' or '}' in tuple")),
        }
    }
}

fn starts_value(b: Option<u8>) -> bool {
    matches!(b, Some(b'"' | b'{' | b'['))
}

/// Parse `[ results ]` or `[ values ]`. The kind of the first element
/// fixes the kind of the list.
pub fn parse_gdbmi_list(input: &str, start: usize) -> Parsed<MiList> {
    let mut cur = expect_char(input, start, b'[')?;
    if byte_at(input, cur) == Some(b']') {
        return Ok((MiList::Empty, cur + 1));
    }

    if starts_value(byte_at(input, cur)) {
        let mut values = Vec::new();
        loop {
            let (value, next) = parse_gdbmi_value(input, cur)?;
            values.push(value);
            cur = next;
            match byte_at(input, cur) {
                Some(b',') if starts_value(byte_at(input, cur + 1)) => cur += 1,
                Some(b',') => {
                    return Err(ParseError::at(input, cur + 1, "result in a list of values"))
                }
                Some(b']') => return Ok((MiList::Values(values), cur + 1)),
                _ => return Err(ParseError::at(input, cur, "expected ',' or ']' in list")),
            }
        }
    }

    let mut results = Vec::new();
    loop {
        let (result, next) = parse_gdbmi_result(input, cur)?;
        let follows_tuple = matches!(result.value, Value::Tuple(_));
        results.push(result);
        cur = next;
        // Locations of a multi-location breakpoint follow it as bare tuples
        while follows_tuple
            && byte_at(input, cur) == Some(b',')
            && byte_at(input, cur + 1) == Some(b'{')
        {
            let (_, next) = parse_gdbmi_tuple(input, cur + 1)?;
            log::trace!("skipping anonymous tuple {:?}", slice(input, cur + 1, next));
            cur = next;
        }
        match byte_at(input, cur) {
            Some(b',') if starts_value(byte_at(input, cur + 1)) => {
                return Err(ParseError::at(input, cur + 1, "value in a list of results"))
            }
            Some(b',') => cur += 1,
            Some(b']') => return Ok((MiList::Results(results), cur + 1)),
            _ => return Err(ParseError::at(input, cur, "expected ',' or ']' in list")),
        }
    }
}

/// Parse a `~"..."`, `@"..."` or `&"..."` stream record
pub fn parse_stream_record(input: &str, start: usize) -> Parsed<StreamRecord> {
    let prefix = byte_at(input, start);
    let (text, cur) = match prefix {
        Some(b'~' | b'@' | b'&') => parse_c_string(input, start + 1)?,
        _ => return Err(ParseError::at(input, start, "expected a stream record")),
    };
    let record = match prefix {
        Some(b'~') => StreamRecord::Console(text),
        Some(b'@') => StreamRecord::Target(text),
        _ => StreamRecord::Log(text),
    };
    let cur = end_of_record(input, cur)
        .ok_or_else(|| ParseError::at(input, cur, "trailing data after stream record"))?;
    Ok((record, cur))
}

fn parse_exit_code(text: &str) -> Option<i32> {
    // GDB prints exit codes in octal
    if text.len() > 1 && text.starts_with('0') {
        i32::from_str_radix(text, 8).ok()
    } else {
        text.parse().ok()
    }
}

fn apply_stop_attribute(record: &mut OutOfBandRecord, result: &MiResult) {
    let text = match result.value.as_str() {
        Ok(text) => text,
        Err(_) => {
            log::trace!("ignoring non-string stop attribute {}", result.name);
            return;
        }
    };
    match result.name.as_str() {
        "reason" => record.stop_reason = StopReason::from_wire(text),
        "bkptno" => record.breakpoint_number = text.parse().ok(),
        "thread-id" => record.thread_id = text.parse().ok(),
        "signal-name" => record.signal_name = Some(text.to_string()),
        "signal-meaning" => record.signal_meaning = Some(text.to_string()),
        "exit-code" => record.exit_code = parse_exit_code(text),
        _ => {}
    }
}

/// Parse `*stopped,attr=...,frame={...},...`
pub fn parse_stopped_async_output(input: &str, start: usize) -> Parsed<OutOfBandRecord> {
    if !looking_at(input, start, PREFIX_STOPPED_ASYNC) {
        return Err(ParseError::at(input, start, "expected *stopped"));
    }
    let mut cur = start + PREFIX_STOPPED_ASYNC.len();
    let mut record = OutOfBandRecord {
        is_stopped: true,
        ..Default::default()
    };

    loop {
        if let Some(next) = end_of_record(input, cur) {
            return Ok((record, next));
        }
        cur = expect_char(input, cur, b',')?;
        if looking_at(input, cur, PREFIX_FRAME) {
            let (frame, next) = parse_frame(input, cur)?;
            record.frame = Some(frame);
            cur = next;
            continue;
        }
        let (result, next) = parse_gdbmi_result(input, cur)?;
        apply_stop_attribute(&mut record, &result);
        cur = next;
    }
}

/// Parse `*running,thread-id="..."`
pub fn parse_running_async_output(input: &str, start: usize) -> Parsed<OutOfBandRecord> {
    if !looking_at(input, start, PREFIX_RUNNING_ASYNC) {
        return Err(ParseError::at(input, start, "expected *running"));
    }
    let mut cur = start + PREFIX_RUNNING_ASYNC.len();
    let mut record = OutOfBandRecord {
        is_running: true,
        ..Default::default()
    };
    loop {
        if let Some(next) = end_of_record(input, cur) {
            return Ok((record, next));
        }
        cur = expect_char(input, cur, b',')?;
        let (result, next) = parse_gdbmi_result(input, cur)?;
        if result.name == "thread-id" {
            // "all" leaves the thread unset
            record.thread_id = result.value.as_str().ok().and_then(|t| t.parse().ok());
        }
        cur = next;
    }
}

fn is_out_of_band_prefix(b: Option<u8>) -> bool {
    matches!(b, Some(b'~' | b'@' | b'&' | b'*' | b'=' | b'+'))
}

/// Parse one out-of-band record. Notifications that carry nothing the
/// engine tracks (`=...`, `+...`, other `*...`) are skipped to the end of
/// their line and yield `None`.
pub fn parse_out_of_band_record(input: &str, start: usize) -> Parsed<Option<OutOfBandRecord>> {
    let cur = start + digits_len(input, start);
    match byte_at(input, cur) {
        Some(b'~' | b'@' | b'&') => {
            let (stream, next) = parse_stream_record(input, cur)?;
            Ok((
                Some(OutOfBandRecord {
                    stream_record: Some(stream),
                    ..Default::default()
                }),
                next,
            ))
        }
        Some(b'*') if looking_at(input, cur, PREFIX_STOPPED_ASYNC) => {
            let (record, next) = parse_stopped_async_output(input, cur)?;
            Ok((Some(record), next))
        }
        Some(b'*') if looking_at(input, cur, PREFIX_RUNNING_ASYNC) => {
            let (record, next) = parse_running_async_output(input, cur)?;
            Ok((Some(record), next))
        }
        Some(b'*' | b'=' | b'+') => {
            let next = skip_to_end_of_line(input, cur);
            log::trace!("skipping notification {:?}", slice(input, cur, next).trim_end());
            Ok((None, next))
        }
        _ => Err(ParseError::at(input, start, "expected an out-of-band record")),
    }
}

fn result_kind_at(input: &str, cur: usize) -> Option<(ResultKind, usize)> {
    let kinds = [
        ("done", ResultKind::Done),
        ("running", ResultKind::Running),
        ("connected", ResultKind::Connected),
        ("error", ResultKind::Error),
        ("exit", ResultKind::Exit),
    ];
    for (word, kind) in kinds {
        if looking_at(input, cur, word) {
            let next = cur + word.len();
            match byte_at(input, next) {
                None | Some(b',' | b'\n' | b'\r') => return Some((kind, next)),
                _ => {}
            }
        }
    }
    None
}

fn set_payload(record: &mut ResultRecord, payload: ResultPayload) {
    match (&mut record.payload, payload) {
        (
            Some(ResultPayload::Breakpoints { breakpoints, .. }),
            ResultPayload::Breakpoints {
                breakpoints: more, ..
            },
        ) => breakpoints.extend(more),
        (slot, payload) => {
            if slot.is_some() {
                log::debug!("replacing result payload with {:?}", payload);
            }
            *slot = Some(payload);
        }
    }
}

/// Parse the result starting at `cur`, selecting a typed payload by its
/// prefix. Unrecognised results land in the attribute map.
fn parse_result_payload(input: &str, cur: usize, record: &mut ResultRecord) -> Result<usize, ParseError> {
    if looking_at(input, cur, PREFIX_BKPT) {
        let (bp, next) = parse_breakpoint(input, cur)?;
        let mut breakpoints = BTreeMap::new();
        breakpoints.insert(bp.number, bp);
        set_payload(
            record,
            ResultPayload::Breakpoints {
                breakpoints,
                full_table: false,
            },
        );
        Ok(next)
    } else if looking_at(input, cur, PREFIX_BREAKPOINT_TABLE) {
        let (breakpoints, next) = parse_breakpoint_table(input, cur)?;
        set_payload(
            record,
            ResultPayload::Breakpoints {
                breakpoints,
                full_table: true,
            },
        );
        Ok(next)
    } else if looking_at(input, cur, PREFIX_THREAD_IDS) {
        let (ids, next) = parse_threads_list(input, cur)?;
        set_payload(record, ResultPayload::ThreadIds(ids));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_NEW_THREAD_ID) {
        let ((thread_id, frame), next) = parse_new_thread_id(input, cur)?;
        set_payload(record, ResultPayload::NewThread { thread_id, frame });
        Ok(next)
    } else if looking_at(input, cur, PREFIX_FILES) {
        let (files, next) = parse_file_list(input, cur)?;
        set_payload(record, ResultPayload::Files(files));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_STACK) {
        let (frames, next) = parse_call_stack(input, cur)?;
        set_payload(record, ResultPayload::CallStack(frames));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_FRAME) {
        let (frame, next) = parse_frame(input, cur)?;
        set_payload(record, ResultPayload::Frame(frame));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_STACK_ARGS) {
        let (args, next) = parse_stack_arguments(input, cur)?;
        set_payload(record, ResultPayload::FrameArguments(args));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_LOCALS) {
        let (locals, next) = parse_local_var_list(input, cur)?;
        set_payload(record, ResultPayload::LocalVariables(locals));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_VALUE) {
        let (variable, next) = parse_variable_value(input, cur)?;
        set_payload(record, ResultPayload::Variable(variable));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_REGISTER_NAMES) {
        let (names, next) = parse_register_names(input, cur)?;
        set_payload(record, ResultPayload::RegisterNames(names));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_CHANGED_REGISTERS) {
        let (changed, next) = parse_changed_registers(input, cur)?;
        set_payload(record, ResultPayload::ChangedRegisters(changed));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_REGISTER_VALUES) {
        let (values, next) = parse_register_values(input, cur)?;
        set_payload(record, ResultPayload::RegisterValues(values));
        Ok(next)
    } else if looking_at(input, cur, PREFIX_MEMORY_ADDR) || looking_at(input, cur, PREFIX_MEMORY_BYTES) {
        let (memory, next) = parse_memory_values(input, cur)?;
        set_payload(
            record,
            ResultPayload::Memory {
                start_address: memory.start_address,
                bytes: memory.bytes,
            },
        );
        for extra in memory.others {
            record.attributes.insert(extra.name, extra.value);
        }
        Ok(next)
    } else {
        let (result, next) = parse_gdbmi_result(input, cur)?;
        record.attributes.insert(result.name, result.value);
        Ok(next)
    }
}

/// Parse `[token]^class[,result...]`
pub fn parse_result_record(input: &str, start: usize) -> Parsed<ResultRecord> {
    let token_len = digits_len(input, start);
    let token = if token_len > 0 {
        Some(parse_number::<u64>(slice(input, start, start + token_len), input, start, "token")?)
    } else {
        None
    };
    let cur = expect_char(input, start + token_len, b'^')?;
    let (kind, mut cur) = result_kind_at(input, cur)
        .ok_or_else(|| ParseError::at(input, cur, "unknown result class"))?;

    let mut record = ResultRecord {
        token,
        ..ResultRecord::new(kind)
    };

    loop {
        if let Some(next) = end_of_record(input, cur) {
            return Ok((record, next));
        }
        cur = expect_char(input, cur, b',')?;
        if byte_at(input, cur) == Some(b'{') {
            // Extra breakpoint locations printed after `bkpt={...}`
            let (_, next) = parse_gdbmi_tuple(input, cur)?;
            log::trace!("skipping anonymous tuple {:?}", slice(input, cur, next));
            cur = next;
            continue;
        }
        cur = parse_result_payload(input, cur, &mut record)?;
    }
}

fn parse_out_of_band_records(
    input: &str,
    mut cur: usize,
    records: &mut Vec<OutOfBandRecord>,
) -> Result<usize, ParseError> {
    loop {
        cur = skip_blanks(input, cur);
        let after_token = cur + digits_len(input, cur);
        if !is_out_of_band_prefix(byte_at(input, after_token)) {
            return Ok(cur);
        }
        let (record, next) = parse_out_of_band_record(input, cur)?;
        if let Some(record) = record {
            records.push(record);
        }
        cur = next;
    }
}

fn at_result_record(input: &str, cur: usize) -> bool {
    byte_at(input, cur + digits_len(input, cur)) == Some(b'^')
}

fn at_overloads_choice_prompt(input: &str, cur: usize) -> bool {
    byte_at(input, cur) == Some(b'[')
        && byte_at(input, cur + 1).map_or(false, |b| b.is_ascii_digit())
}

/// Parse one complete output: out-of-band records, an optional result
/// record, and the terminating `(gdb)` prompt.
pub fn parse_output_record(input: &str, start: usize) -> Parsed<Output> {
    let mut output = Output::default();
    let mut cur = parse_out_of_band_records(input, start, &mut output.out_of_band)?;

    if at_result_record(input, cur) {
        let (record, next) = parse_result_record(input, cur)?;
        output.result_record = Some(record);
        cur = parse_out_of_band_records(input, next, &mut output.out_of_band)?;
    } else if at_overloads_choice_prompt(input, cur) {
        let (entries, next) = parse_overloads_choice_prompt(input, cur)?;
        output.result_record = Some(ResultRecord {
            payload: Some(ResultPayload::OverloadsChoice(entries)),
            ..ResultRecord::new(ResultKind::Undefined)
        });
        cur = skip_blanks(input, next);
        if looking_at(input, cur, PROMPT) {
            cur = skip_blanks(input, cur + PROMPT.len());
        }
        output.raw = slice(input, start, cur).to_string();
        output.parsed_ok = true;
        return Ok((output, cur));
    }

    cur = skip_blanks(input, cur);
    if !looking_at(input, cur, PROMPT) {
        return Err(ParseError::at(input, cur, "expected the (gdb) prompt"));
    }
    cur = skip_blanks(input, cur + PROMPT.len());
    if cur == start {
        return Err(ParseError::at(input, start, "output record consumed no input"));
    }

    output.raw = slice(input, start, cur).to_string();
    output.parsed_ok = true;
    Ok((output, cur))
}

/// Parse every output record in a buffer. Stops at the first failure,
/// returning what was parsed before it together with the error.
pub fn parse_output_records(input: &str) -> (Vec<Output>, Option<ParseError>) {
    let mut outputs = Vec::new();
    let mut cur = 0;
    loop {
        cur = skip_blanks(input, cur);
        if cur >= input.len() {
            return (outputs, None);
        }
        match parse_output_record(input, cur) {
            Ok((output, next)) => {
                outputs.push(output);
                cur = next;
            }
            Err(e) => return (outputs, Some(e)),
        }
    }
}

fn tuple_value<'a>(result: &'a MiResult, input: &str, start: usize) -> Result<&'a [MiResult], ParseError> {
    result
        .value
        .as_tuple()
        .map_err(|e| ParseError::at(input, start, format!("{}: {}", result.name, e)))
}

fn location_pattern(input: &str, start: usize, pattern: &str) -> Result<Regex, ParseError> {
    Regex::new(pattern).map_err(|e| ParseError::at(input, start, format!("regex error: {}", e)))
}

/// Build a breakpoint from the fields of a `bkpt` tuple
pub fn breakpoint_from_tuple(tuple: &[MiResult], input: &str, start: usize) -> Result<BreakPoint, ParseError> {
    let number = tuple
        .str_of("number")
        .ok_or_else(|| ParseError::at(input, start, "breakpoint without a number"))?;
    let mut bp = BreakPoint {
        number: parse_number(number, input, start, "breakpoint number")?,
        kind: tuple.str_of("type").unwrap_or_default().to_string(),
        disposition: tuple.str_of("disp").unwrap_or_default().to_string(),
        enabled: tuple.str_of("enabled") == Some("y"),
        address: tuple.str_of("addr").unwrap_or_default().to_string(),
        function: tuple.str_of("func").unwrap_or_default().to_string(),
        file_name: tuple.str_of("file").unwrap_or_default().to_string(),
        full_file_path: tuple.str_of("fullname").unwrap_or_default().to_string(),
        line: tuple.str_of("line").and_then(|l| l.parse().ok()).unwrap_or(0),
        condition: tuple.str_of("cond").map(str::to_string),
        hits: tuple.str_of("times").and_then(|t| t.parse().ok()).unwrap_or(0),
        ignore_count: tuple.str_of("ignore").and_then(|t| t.parse().ok()).unwrap_or(0),
        original_location: tuple.str_of("original-location").unwrap_or_default().to_string(),
    };

    if bp.is_pending() {
        let pending = tuple
            .str_of("pending")
            .ok_or_else(|| ParseError::at(input, start, "pending breakpoint without location"))?;
        let re = location_pattern(input, start, r"^(.+):(\d+)$")?;
        let caps = re.captures(pending).ok_or_else(|| {
            ParseError::at(input, start, format!("malformed pending location {:?}", pending))
        })?;
        bp.file_name = caps[1].to_string();
        bp.line = parse_number(&caps[2], input, start, "pending line")?;
    }
    Ok(bp)
}

/// Parse `bkpt={...}`
pub fn parse_breakpoint(input: &str, start: usize) -> Parsed<BreakPoint> {
    if !looking_at(input, start, PREFIX_BKPT) {
        return Err(ParseError::at(input, start, "expected bkpt={"));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let tuple = tuple_value(&result, input, start)?;
    Ok((breakpoint_from_tuple(tuple, input, start)?, cur))
}

/// Parse `BreakpointTable={nr_rows=...,hdr=[...],body=[bkpt={...},...]}`
pub fn parse_breakpoint_table(input: &str, start: usize) -> Parsed<BTreeMap<u32, BreakPoint>> {
    if !looking_at(input, start, PREFIX_BREAKPOINT_TABLE) {
        return Err(ParseError::at(input, start, "expected BreakpointTable={"));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let table = tuple_value(&result, input, start)?;
    let mut breakpoints = BTreeMap::new();

    let body = match table.value_of("body") {
        Some(body) => body
            .as_list()
            .map_err(|e| ParseError::at(input, start, format!("body: {}", e)))?,
        None => return Err(ParseError::at(input, start, "breakpoint table without body")),
    };
    match body {
        MiList::Empty => {}
        MiList::Results(rows) => {
            for row in rows {
                let bp = breakpoint_from_tuple(tuple_value(row, input, start)?, input, start)?;
                breakpoints.insert(bp.number, bp);
            }
        }
        MiList::Values(rows) => {
            for row in rows {
                let tuple = row
                    .as_tuple()
                    .map_err(|e| ParseError::at(input, start, format!("body row: {}", e)))?;
                let bp = breakpoint_from_tuple(tuple, input, start)?;
                breakpoints.insert(bp.number, bp);
            }
        }
    }
    Ok((breakpoints, cur))
}

fn arguments_from_list(list: &MiList) -> Vec<Argument> {
    match list {
        MiList::Empty => Vec::new(),
        // args=[name="a",name="b"]
        MiList::Results(results) => results
            .iter()
            .filter_map(|r| r.value.as_str().ok())
            .map(|name| Argument {
                name: name.to_string(),
                value: String::new(),
            })
            .collect(),
        // args=[{name="a",value="1"},...]
        MiList::Values(values) => values
            .iter()
            .filter_map(|v| v.as_tuple().ok())
            .map(|t| Argument {
                name: t.str_of("name").unwrap_or_default().to_string(),
                value: t.str_of("value").unwrap_or_default().to_string(),
            })
            .collect(),
    }
}

/// Build a frame from the fields of a `frame` tuple
pub fn frame_from_tuple(tuple: &[MiResult]) -> Frame {
    Frame {
        address: tuple.str_of("addr").unwrap_or_default().to_string(),
        function_name: tuple.str_of("func").unwrap_or_default().to_string(),
        args: tuple
            .value_of("args")
            .and_then(|v| v.as_list().ok())
            .map(arguments_from_list)
            .unwrap_or_default(),
        level: tuple.str_of("level").and_then(|l| l.parse().ok()).unwrap_or(0),
        file_name: tuple.str_of("file").unwrap_or_default().to_string(),
        file_full_name: tuple.str_of("fullname").unwrap_or_default().to_string(),
        line: tuple.str_of("line").and_then(|l| l.parse().ok()).unwrap_or(0),
        library: tuple.str_of("from").unwrap_or_default().to_string(),
    }
}

/// Parse `frame={...}`
pub fn parse_frame(input: &str, start: usize) -> Parsed<Frame> {
    if !looking_at(input, start, PREFIX_FRAME) {
        return Err(ParseError::at(input, start, "expected frame={"));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    Ok((frame_from_tuple(tuple_value(&result, input, start)?), cur))
}

/// Parse `stack=[frame={...},...]`
pub fn parse_call_stack(input: &str, start: usize) -> Parsed<Vec<Frame>> {
    if !looking_at(input, start, PREFIX_STACK) {
        return Err(ParseError::at(input, start, "expected stack=["));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let mut frames = Vec::new();
    match result.value {
        Value::List(MiList::Results(rows)) => {
            for row in &rows {
                frames.push(frame_from_tuple(tuple_value(row, input, start)?));
            }
        }
        Value::List(MiList::Empty) => {}
        _ => return Err(ParseError::at(input, start, "stack is not a list of frames")),
    }
    Ok((frames, cur))
}

/// Add a variable to `tree`, unfolding aggregate values into members
fn add_variable(tree: &mut VariableTree, name: &str, value: &str, type_name: Option<&str>) -> VariableId {
    let id = tree.add_root(name, value);
    if let (Some(var), Some(type_name)) = (tree.get_mut(id), type_name) {
        var.type_name = type_name.to_string();
    }
    unfold_value(tree, id, value);
    id
}

/// Parse the members of an aggregate value into children of `id`.
/// Values that do not parse stay as plain text.
pub fn unfold_value(tree: &mut VariableTree, id: VariableId, value: &str) {
    if !value.trim_start().starts_with('{') {
        return;
    }
    if let Err(e) = parse_member_variable(value, 0, tree, id) {
        log::debug!("keeping {:?} unfolded: {}", value, e);
        tree.clear_children(id);
    }
}

fn variables_from_list(list: &MiList) -> VariableTree {
    let mut tree = VariableTree::new();
    match list {
        MiList::Empty => {}
        MiList::Results(results) => {
            for r in results {
                if let Ok(name) = r.value.as_str() {
                    add_variable(&mut tree, name, "", None);
                }
            }
        }
        MiList::Values(values) => {
            for t in values.iter().filter_map(|v| v.as_tuple().ok()) {
                add_variable(
                    &mut tree,
                    t.str_of("name").unwrap_or_default(),
                    t.str_of("value").unwrap_or_default(),
                    t.str_of("type"),
                );
            }
        }
    }
    tree
}

/// Parse `stack-args=[frame={level="0",args=[...]},...]`
pub fn parse_stack_arguments(input: &str, start: usize) -> Parsed<BTreeMap<u32, VariableTree>> {
    if !looking_at(input, start, PREFIX_STACK_ARGS) {
        return Err(ParseError::at(input, start, "expected stack-args=["));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let mut per_frame = BTreeMap::new();
    let rows: &[MiResult] = match &result.value {
        Value::List(MiList::Results(rows)) => rows.as_slice(),
        Value::List(MiList::Empty) => &[],
        _ => return Err(ParseError::at(input, start, "stack-args is not a list of frames")),
    };
    for row in rows {
        let tuple = tuple_value(row, input, start)?;
        let level = tuple
            .str_of("level")
            .ok_or_else(|| ParseError::at(input, start, "frame arguments without level"))?;
        let level: u32 = parse_number(level, input, start, "frame level")?;
        let args = match tuple.value_of("args").map(|a| a.as_list()) {
            Some(Ok(list)) => variables_from_list(list),
            Some(Err(e)) => return Err(ParseError::at(input, start, format!("args: {}", e))),
            None => VariableTree::new(),
        };
        per_frame.insert(level, args);
    }
    Ok((per_frame, cur))
}

/// Parse `locals=[...]`
pub fn parse_local_var_list(input: &str, start: usize) -> Parsed<VariableTree> {
    if !looking_at(input, start, PREFIX_LOCALS) {
        return Err(ParseError::at(input, start, "expected locals=["));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let list = result
        .value
        .as_list()
        .map_err(|e| ParseError::at(input, start, format!("locals: {}", e)))?;
    Ok((variables_from_list(list), cur))
}

/// Parse `value="..."`. The variable is unnamed; the caller knows which
/// expression it evaluated.
pub fn parse_variable_value(input: &str, start: usize) -> Parsed<VariableTree> {
    if !looking_at(input, start, PREFIX_VALUE) {
        return Err(ParseError::at(input, start, "expected value=\""));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let value = result
        .value
        .as_str()
        .map_err(|e| ParseError::at(input, start, format!("value: {}", e)))?;
    let mut tree = VariableTree::new();
    add_variable(&mut tree, "", value, None);
    Ok((tree, cur))
}

/// Parse `thread-ids={thread-id="1",thread-id="2"}`
pub fn parse_threads_list(input: &str, start: usize) -> Parsed<Vec<u32>> {
    if !looking_at(input, start, PREFIX_THREAD_IDS) {
        return Err(ParseError::at(input, start, "expected thread-ids={"));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let mut ids = Vec::new();
    for r in tuple_value(&result, input, start)? {
        let id = r
            .value
            .as_str()
            .map_err(|e| ParseError::at(input, start, format!("{}: {}", r.name, e)))?;
        ids.push(parse_number(id, input, start, "thread id")?);
    }
    Ok((ids, cur))
}

/// Parse `new-thread-id="2"` and the frame that may follow it
pub fn parse_new_thread_id(input: &str, start: usize) -> Parsed<(u32, Option<Frame>)> {
    if !looking_at(input, start, PREFIX_NEW_THREAD_ID) {
        return Err(ParseError::at(input, start, "expected new-thread-id="));
    }
    let (result, mut cur) = parse_gdbmi_result(input, start)?;
    let id = result
        .value
        .as_str()
        .map_err(|e| ParseError::at(input, start, format!("new-thread-id: {}", e)))?;
    let id = parse_number(id, input, start, "thread id")?;

    let mut frame = None;
    if byte_at(input, cur) == Some(b',') && looking_at(input, cur + 1, PREFIX_FRAME) {
        let (f, next) = parse_frame(input, cur + 1)?;
        frame = Some(f);
        cur = next;
    }
    Ok(((id, frame), cur))
}

/// Parse `files=[{file="a.c",fullname="/x/a.c"},...]` into a sorted list
/// of unique paths, preferring full names
pub fn parse_file_list(input: &str, start: usize) -> Parsed<Vec<String>> {
    if !looking_at(input, start, PREFIX_FILES) {
        return Err(ParseError::at(input, start, "expected files=["));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let mut files = BTreeSet::new();
    match &result.value {
        Value::List(MiList::Values(values)) => {
            for v in values {
                let t = v
                    .as_tuple()
                    .map_err(|e| ParseError::at(input, start, format!("file entry: {}", e)))?;
                if let Some(path) = t.str_of("fullname").or_else(|| t.str_of("file")) {
                    files.insert(path.to_string());
                }
            }
        }
        Value::List(MiList::Empty) => {}
        _ => return Err(ParseError::at(input, start, "files is not a list of tuples")),
    }
    Ok((files.into_iter().collect(), cur))
}

fn string_list<'a>(result: &'a MiResult, input: &str, start: usize) -> Result<Vec<&'a str>, ParseError> {
    match &result.value {
        Value::List(MiList::Values(values)) => values
            .iter()
            .map(|v| {
                v.as_str()
                    .map_err(|e| ParseError::at(input, start, format!("{}: {}", result.name, e)))
            })
            .collect(),
        Value::List(MiList::Empty) => Ok(Vec::new()),
        _ => Err(ParseError::at(
            input,
            start,
            format!("{} is not a list of strings", result.name),
        )),
    }
}

/// Parse `register-names=["eax","ecx",...]`. Unnamed slots are skipped
/// but keep their index.
pub fn parse_register_names(input: &str, start: usize) -> Parsed<BTreeMap<u32, String>> {
    if !looking_at(input, start, PREFIX_REGISTER_NAMES) {
        return Err(ParseError::at(input, start, "expected register-names="));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let mut names = BTreeMap::new();
    for (index, name) in string_list(&result, input, start)?.into_iter().enumerate() {
        if !name.is_empty() {
            let index = u32::try_from(index)
                .map_err(|_| ParseError::at(input, start, "too many registers"))?;
            names.insert(index, name.to_string());
        }
    }
    Ok((names, cur))
}

/// Parse `changed-registers=["0","1",...]`
pub fn parse_changed_registers(input: &str, start: usize) -> Parsed<Vec<u32>> {
    if !looking_at(input, start, PREFIX_CHANGED_REGISTERS) {
        return Err(ParseError::at(input, start, "expected changed-registers="));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let mut changed = Vec::new();
    for number in string_list(&result, input, start)? {
        changed.push(parse_number(number, input, start, "register number")?);
    }
    Ok((changed, cur))
}

/// Parse `register-values=[{number="0",value="0x1"},...]`
pub fn parse_register_values(input: &str, start: usize) -> Parsed<BTreeMap<u32, String>> {
    if !looking_at(input, start, PREFIX_REGISTER_VALUES) {
        return Err(ParseError::at(input, start, "expected register-values="));
    }
    let (result, cur) = parse_gdbmi_result(input, start)?;
    let mut values = BTreeMap::new();
    let rows: &[Value] = match &result.value {
        Value::List(MiList::Values(rows)) => rows.as_slice(),
        Value::List(MiList::Empty) => &[],
        _ => return Err(ParseError::at(input, start, "register-values is not a list")),
    };
    for row in rows {
        let t = row
            .as_tuple()
            .map_err(|e| ParseError::at(input, start, format!("register value: {}", e)))?;
        let number = t
            .str_of("number")
            .ok_or_else(|| ParseError::at(input, start, "register value without number"))?;
        let number = parse_number(number, input, start, "register number")?;
        values.insert(number, t.str_of("value").unwrap_or_default().to_string());
    }
    Ok((values, cur))
}

/// Memory read by `-data-read-memory` or `-data-read-memory-bytes`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryValues {
    pub start_address: u64,
    pub bytes: Vec<u8>,
    /// The remaining results of the record (`nr-bytes`, `next-row`, ...)
    pub others: Vec<MiResult>,
}

fn hex_bytes(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

fn memory_rows(memory: &MiList, values: &mut MemoryValues, input: &str, start: usize) -> Result<(), ParseError> {
    let rows: &[Value] = match memory {
        MiList::Values(rows) => rows.as_slice(),
        MiList::Empty => return Ok(()),
        MiList::Results(_) => return Err(ParseError::at(input, start, "memory is not a list of rows")),
    };
    for (i, row) in rows.iter().enumerate() {
        let t = row
            .as_tuple()
            .map_err(|e| ParseError::at(input, start, format!("memory row: {}", e)))?;
        if let Some(contents) = t.str_of("contents") {
            // -data-read-memory-bytes: one hex string per row
            if i == 0 {
                if let Some(begin) = t.str_of("begin").and_then(parse_hex_u64) {
                    values.start_address = begin;
                }
            }
            let bytes = hex_bytes(contents)
                .ok_or_else(|| ParseError::at(input, start, "malformed memory contents"))?;
            values.bytes.extend(bytes);
            continue;
        }
        if let Some(Ok(MiList::Values(data))) = t.value_of("data").map(|d| d.as_list()) {
            for word in data {
                let word = word
                    .as_str()
                    .map_err(|e| ParseError::at(input, start, format!("memory word: {}", e)))?;
                let byte = parse_hex_u64(word)
                    .and_then(|w| u8::try_from(w).ok())
                    .ok_or_else(|| ParseError::at(input, start, format!("memory word {:?} is not a byte", word)))?;
                values.bytes.push(byte);
            }
        }
    }
    Ok(())
}

/// Parse the results of a memory read, from `addr=` (or `memory=[`) up
/// to the end of the record
pub fn parse_memory_values(input: &str, start: usize) -> Parsed<MemoryValues> {
    let mut values = MemoryValues::default();
    let mut cur = start;
    loop {
        let (result, next) = parse_gdbmi_result(input, cur)?;
        match result.name.as_str() {
            "addr" => {
                let addr = result
                    .value
                    .as_str()
                    .map_err(|e| ParseError::at(input, cur, format!("addr: {}", e)))?;
                values.start_address = parse_hex_u64(addr)
                    .ok_or_else(|| ParseError::at(input, cur, format!("invalid address {:?}", addr)))?;
            }
            "memory" => {
                let list = result
                    .value
                    .as_list()
                    .map_err(|e| ParseError::at(input, cur, format!("memory: {}", e)))?;
                memory_rows(list, &mut values, input, cur)?;
            }
            _ => values.others.push(result),
        }
        cur = next;
        if byte_at(input, cur) == Some(b',') && byte_at(input, cur + 1) != Some(b'{') {
            cur += 1;
        } else {
            return Ok((values, cur));
        }
    }
}

/// Parse the overloads menu GDB prints for an ambiguous location:
///
/// ```text
/// [0] cancel
/// [1] all
/// [2] Person::f(int) at person.cc:42
/// >
/// ```
pub fn parse_overloads_choice_prompt(input: &str, start: usize) -> Parsed<Vec<OverloadsChoiceEntry>> {
    let location = location_pattern(input, start, r"^(.*) at (.+):(\d+)$")?;
    let mut entries = Vec::new();
    let mut cur = start;

    while byte_at(input, cur) == Some(b'[') {
        let digits = digits_len(input, cur + 1);
        if digits == 0 {
            return Err(ParseError::at(input, cur, "expected a choice index"));
        }
        let index = parse_number(slice(input, cur + 1, cur + 1 + digits), input, cur, "choice index")?;
        cur = expect_char(input, cur + 1 + digits, b']')?;
        cur = skip_spaces(input, cur);

        let line_end = skip_to_end_of_line(input, cur);
        let text = slice(input, cur, line_end).trim_end();
        let entry = match text {
            "cancel" => OverloadsChoiceEntry {
                index,
                kind: OverloadsChoiceKind::Cancel,
                function_name: String::new(),
                file_name: String::new(),
                line: 0,
            },
            "all" => OverloadsChoiceEntry {
                index,
                kind: OverloadsChoiceKind::All,
                function_name: String::new(),
                file_name: String::new(),
                line: 0,
            },
            _ => match location.captures(text) {
                Some(caps) => OverloadsChoiceEntry {
                    index,
                    kind: OverloadsChoiceKind::Location,
                    function_name: caps[1].to_string(),
                    file_name: caps[2].to_string(),
                    line: parse_number(&caps[3], input, cur, "choice line")?,
                },
                None => OverloadsChoiceEntry {
                    index,
                    kind: OverloadsChoiceKind::Location,
                    function_name: text.to_string(),
                    file_name: String::new(),
                    line: 0,
                },
            },
        };
        entries.push(entry);
        cur = skip_blanks(input, line_end);
    }

    if entries.is_empty() {
        return Err(ParseError::at(input, start, "expected an overloads menu"));
    }
    if looking_at(input, cur, OVERLOADS_PROMPT) {
        cur = skip_spaces(input, cur + OVERLOADS_PROMPT.len());
    }
    Ok((entries, cur))
}

/// Offset of the quote closing the one at `open`, or the end of input
fn skip_quoted(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut cur = open + 1;
    while cur < bytes.len() && bytes[cur] != quote {
        if bytes[cur] == b'\\' {
            cur += 1;
        }
        cur += 1;
    }
    cur
}

/// Offset of the end of a member value: the first `,` or `}` outside
/// of quotes and nested brackets
fn scan_member_value(input: &str, start: usize) -> Result<usize, ParseError> {
    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut cur = start;
    while cur < bytes.len() {
        match bytes[cur] {
            quote @ (b'"' | b'\'') => cur = skip_quoted(bytes, cur, quote),
            b'{' | b'(' | b'[' => depth += 1,
            b'}' if depth == 0 => return Ok(cur),
            b',' if depth == 0 => return Ok(cur),
            b'}' | b')' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        cur += 1;
    }
    Err(ParseError::at(input, start, "unterminated member value"))
}

/// Split `name = value` at the start of a member. Anonymous members
/// (array elements, nested aggregates) have no name.
fn member_name(input: &str, start: usize) -> (Option<String>, usize) {
    let bytes = input.as_bytes();
    let mut cur = start;
    while cur < bytes.len() {
        match bytes[cur] {
            b',' | b'}' | b'{' | b'"' | b'\'' => break,
            b' ' if looking_at(input, cur, " = ") => {
                let name = slice(input, start, cur).trim();
                if name.is_empty() {
                    break;
                }
                return (Some(name.to_string()), cur + 3);
            }
            _ => cur += 1,
        }
    }
    (None, start)
}

/// Drop `<repeats N times>` and `...` elision markers from a value
fn strip_elision_markers(raw: &str) -> &str {
    let mut value = raw.trim();
    loop {
        if let Some(stripped) = value.strip_suffix("...") {
            value = stripped.trim_end();
            continue;
        }
        if value.ends_with(" times>") {
            if let Some(pos) = value.rfind("<repeats ") {
                value = value[..pos].trim_end();
                continue;
            }
        }
        return value;
    }
}

/// Offset of the brace closing the one opened at `open`
fn closing_brace(input: &str, open: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut cur = open;
    while cur < bytes.len() {
        match bytes[cur] {
            quote @ (b'"' | b'\'') => cur = skip_quoted(bytes, cur, quote),
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(cur);
                }
            }
            _ => {}
        }
        cur += 1;
    }
    None
}

/// True when `value` is exactly one brace-delimited aggregate
fn is_aggregate(value: &str) -> bool {
    value.starts_with('{') && closing_brace(value, 0) == Some(value.len() - 1)
}

/// Parse an aggregate value as printed by GDB, e.g.
/// `{a = 1, b = {c = 2}, s = 0x0 <repeats 4 times>, {x = 1}}`, adding each
/// member as a child of `parent`. Returns the offset past the closing `}`.
pub fn parse_member_variable(
    input: &str,
    start: usize,
    tree: &mut VariableTree,
    parent: VariableId,
) -> Result<usize, ParseError> {
    let mut cur = expect_char(input, skip_spaces(input, start), b'{')?;
    let mut index = 0usize;

    loop {
        cur = skip_spaces(input, cur);
        match byte_at(input, cur) {
            None => return Err(ParseError::at(input, start, "unterminated aggregate")),
            Some(b'}') => return Ok(cur + 1),
            _ => {}
        }

        if looking_at(input, cur, "...") {
            cur += 3;
        } else {
            let (name, value_start) = member_name(input, cur);
            let value_start = skip_spaces(input, value_start);
            let value_end = scan_member_value(input, value_start)?;
            let value = strip_elision_markers(slice(input, value_start, value_end));
            let name = name.unwrap_or_else(|| format!("[{}]", index));

            if is_aggregate(value) {
                let child = tree
                    .add_child(parent, name, value)
                    .ok_or_else(|| ParseError::at(input, value_start, "unknown parent variable"))?;
                parse_member_variable(input, value_start, tree, child)?;
            } else if !value.is_empty() {
                tree.add_child(parent, name, value)
                    .ok_or_else(|| ParseError::at(input, value_start, "unknown parent variable"))?;
            }
            index += 1;
            cur = value_end;
        }

        cur = skip_spaces(input, cur);
        match byte_at(input, cur) {
            Some(b',') => cur += 1,
            Some(b'}') => return Ok(cur + 1),
            _ => return Err(ParseError::at(input, cur, "expected ',' or '}' between members")),
        }
    }
}
