//! Byte-level JSON extent scanning.
//!
//! Finds where a JSON value ends without building it, so prose scanning can
//! cheaply reject candidates before handing a slice to `serde_json`. Running
//! out of input is reported separately from malformed input: a streaming
//! caller waits on the former and moves on from the latter.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanError {
    /// Input ended before the value closed.
    Incomplete,
    /// Bytes that can never become valid JSON.
    Invalid,
}

pub(crate) type ScanResult = Result<usize, ScanError>;

#[inline]
pub(crate) fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while let Some(b' ' | b'\n' | b'\r' | b'\t') = bytes.get(i) {
        i += 1;
    }
    i
}

#[inline]
fn at(bytes: &[u8], i: usize) -> Result<u8, ScanError> {
    bytes.get(i).copied().ok_or(ScanError::Incomplete)
}

pub(crate) fn string_end(bytes: &[u8], start: usize) -> ScanResult {
    if at(bytes, start)? != b'"' {
        return Err(ScanError::Invalid);
    }
    let mut i = start + 1;
    loop {
        match at(bytes, i)? {
            b'"' => return Ok(i + 1),
            b'\\' => {
                at(bytes, i + 1)?;
                i += 2;
            }
            0x00..=0x1F => return Err(ScanError::Invalid),
            _ => i += 1,
        }
    }
}

/// End offset (exclusive) of the value starting at or after `start`.
pub(crate) fn value_end(bytes: &[u8], start: usize) -> ScanResult {
    let i = skip_ws(bytes, start);
    match at(bytes, i)? {
        b'"' => string_end(bytes, i),
        b'{' => object_end(bytes, i),
        b'[' => array_end(bytes, i),
        b't' => literal_end(bytes, i, b"true"),
        b'f' => literal_end(bytes, i, b"false"),
        b'n' => literal_end(bytes, i, b"null"),
        b'-' | b'0'..=b'9' => number_end(bytes, i),
        _ => Err(ScanError::Invalid),
    }
}

/// End offset (exclusive) of the object whose `{` is at `start`.
pub(crate) fn object_end(bytes: &[u8], start: usize) -> ScanResult {
    if at(bytes, start)? != b'{' {
        return Err(ScanError::Invalid);
    }
    let mut i = skip_ws(bytes, start + 1);
    if at(bytes, i)? == b'}' {
        return Ok(i + 1);
    }
    loop {
        i = string_end(bytes, skip_ws(bytes, i))?;
        i = skip_ws(bytes, i);
        if at(bytes, i)? != b':' {
            return Err(ScanError::Invalid);
        }
        i = skip_ws(bytes, value_end(bytes, i + 1)?);
        match at(bytes, i)? {
            b',' => i += 1,
            b'}' => return Ok(i + 1),
            _ => return Err(ScanError::Invalid),
        }
    }
}

fn array_end(bytes: &[u8], start: usize) -> ScanResult {
    if at(bytes, start)? != b'[' {
        return Err(ScanError::Invalid);
    }
    let mut i = skip_ws(bytes, start + 1);
    if at(bytes, i)? == b']' {
        return Ok(i + 1);
    }
    loop {
        i = skip_ws(bytes, value_end(bytes, i)?);
        match at(bytes, i)? {
            b',' => i += 1,
            b']' => return Ok(i + 1),
            _ => return Err(ScanError::Invalid),
        }
    }
}

fn literal_end(bytes: &[u8], start: usize, lit: &[u8]) -> ScanResult {
    let available = &bytes[start..bytes.len().min(start + lit.len())];
    if !lit.starts_with(available) {
        return Err(ScanError::Invalid);
    }
    if available.len() < lit.len() {
        return Err(ScanError::Incomplete);
    }
    Ok(start + lit.len())
}

fn digits_end(bytes: &[u8], mut i: usize) -> ScanResult {
    if !at(bytes, i)?.is_ascii_digit() {
        return Err(ScanError::Invalid);
    }
    while bytes.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    Ok(i)
}

fn number_end(bytes: &[u8], start: usize) -> ScanResult {
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    i = match at(bytes, i)? {
        b'0' => i + 1,
        b'1'..=b'9' => digits_end(bytes, i)?,
        _ => return Err(ScanError::Invalid),
    };
    if bytes.get(i) == Some(&b'.') {
        i = digits_end(bytes, i + 1)?;
    }
    if let Some(b'e' | b'E') = bytes.get(i) {
        i += 1;
        if let Some(b'+' | b'-') = bytes.get(i) {
            i += 1;
        }
        i = digits_end(bytes, i)?;
    }
    Ok(i)
}
