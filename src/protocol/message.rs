use crate::core::{Error, Result, StateUpdate};

/// Byte separating lines inside one datagram
pub const LINE_SEPARATOR: char = '\r';

/// Bare acknowledgement
pub const ACK: &str = "ACK";

/// Bare rejection
pub const NAK: &str = "NAK";

/// Splits a payload into its non-empty lines, preserving order
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split(LINE_SEPARATOR)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Shape of a datagram before any expectation is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    /// Exactly one line reading `ACK`
    Ack,
    /// Exactly one line reading `NAK`
    Nak,
    /// Anything else: a command reply or push data
    Other,
}

/// One inbound datagram, decoded and split into lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Whole decoded payload, separators included
    pub text: String,
    /// Non-empty lines in arrival order
    pub lines: Vec<String>,
}

impl Datagram {
    /// Decodes raw datagram bytes. Invalid UTF-8 is replaced rather than rejected
    /// so the datagram still reaches dispatch.
    pub fn decode(payload: &[u8]) -> Self {
        Self::from_text(String::from_utf8_lossy(payload).into_owned())
    }

    /// Builds a datagram from already decoded text
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let lines = split_lines(&text).into_iter().map(str::to_owned).collect();
        Datagram { text, lines }
    }

    /// Classifies the datagram as ACK, NAK or other
    pub fn kind(&self) -> DatagramKind {
        match self.lines.as_slice() {
            [line] if line == ACK => DatagramKind::Ack,
            [line] if line == NAK => DatagramKind::Nak,
            _ => DatagramKind::Other,
        }
    }

    /// Whether the datagram is a bare NAK
    pub fn is_nak(&self) -> bool {
        self.kind() == DatagramKind::Nak
    }
}

/// Parses one push-data line of the form `#DDDDD=[-]DDDD[D]`
pub fn parse_push_line(line: &str) -> Result<StateUpdate> {
    let rest = line
        .strip_prefix('#')
        .ok_or_else(|| Error::parse(line, "missing leading '#'"))?;
    let (number, value) = rest
        .split_once('=')
        .ok_or_else(|| Error::parse(line, "missing '=' separator"))?;

    if number.len() != 5 || !is_ascii_digits(number) {
        return Err(Error::parse(line, "controller number must be 5 digits"));
    }

    let digits = value.strip_prefix('-').unwrap_or(value);
    if !(4..=5).contains(&digits.len()) || !is_ascii_digits(digits) {
        return Err(Error::parse(line, "controller value must be 4 or 5 digits"));
    }

    // Both fields are bounded to five ASCII digits, so neither parse can overflow.
    let controller_number = number
        .parse()
        .map_err(|e| Error::parse(line, format!("bad controller number: {}", e)))?;
    let controller_value = value
        .parse()
        .map_err(|e| Error::parse(line, format!("bad controller value: {}", e)))?;

    Ok(StateUpdate::new(controller_number, controller_value))
}

fn is_ascii_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}
