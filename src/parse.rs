//! Decoding of raw accounting buffers into typed counter records.
//!
//! Field positions are fixed by the kernel record formats:
//! - system stat: first line is `cpu  <ticks...>`, summed into one total;
//! - process stat: the process name sits inside parentheses and may itself
//!   contain parentheses or spaces, so numeric fields are anchored after
//!   the *last* `)`;
//! - process status: labelled `VmSize:`/`VmRSS:` lines, values in kB;
//! - process io: every line is `label: integer`.

use crate::error::ParseError;

/// Fields extracted from a process primary stat record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub name: String,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub num_threads: u64,
}

/// Memory gauges extracted from a process extended status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord {
    pub vm_size_kb: u64,
    pub vm_rss_kb: u64,
}

/// Cumulative I/O counters extracted from a process io record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRecord {
    pub rchar_bytes: u64,
    pub wchar_bytes: u64,
    pub syscr_count: u64,
    pub syscw_count: u64,
}

fn as_text(buf: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(buf).map_err(|_| ParseError::NotUtf8)
}

fn parse_u64(tok: &str, field: &'static str) -> Result<u64, ParseError> {
    tok.parse::<u64>()
        .map_err(|source| ParseError::InvalidInt { field, source })
}

fn field_at<'a>(
    fields: &[&'a str],
    idx: usize,
    name: &'static str,
) -> Result<&'a str, ParseError> {
    fields.get(idx).copied().ok_or(ParseError::MissingField(name))
}

/// Sums all per-mode tick counters from the first line of the system
/// stat record into a single total.
pub fn parse_system_total(buf: &[u8]) -> Result<u64, ParseError> {
    let text = as_text(buf)?;
    let first = text.lines().next().ok_or(ParseError::MissingField("cpu"))?;
    let rest = first
        .strip_prefix("cpu")
        .ok_or(ParseError::MissingField("cpu"))?;

    let mut total: u64 = 0;
    let mut seen = false;
    for tok in rest.split_whitespace() {
        total = total.saturating_add(parse_u64(tok, "cpu ticks")?);
        seen = true;
    }
    if !seen {
        return Err(ParseError::MissingField("cpu ticks"));
    }
    Ok(total)
}

/// Decodes a process primary stat record.
///
/// The name is taken from the outermost parentheses. Numeric fields are
/// positioned after the last `)`: post-anchor indices 11, 12 and 17
/// correspond to the file's utime, stime and num_threads fields
/// (positions 14, 15 and 20 in the record's native ordering).
pub fn parse_proc_stat(buf: &[u8]) -> Result<StatRecord, ParseError> {
    let text = as_text(buf)?;
    let open = text.find('(').ok_or(ParseError::MissingName)?;
    let close = text.rfind(')').ok_or(ParseError::MissingName)?;
    if close < open {
        return Err(ParseError::MissingName);
    }

    let name = text[open + 1..close].to_string();
    let fields: Vec<&str> = text[close + 1..].split_whitespace().collect();

    let utime_ticks = parse_u64(field_at(&fields, 11, "utime")?, "utime")?;
    let stime_ticks = parse_u64(field_at(&fields, 12, "stime")?, "stime")?;
    let num_threads = parse_u64(field_at(&fields, 17, "num_threads")?, "num_threads")?;

    Ok(StatRecord {
        name,
        utime_ticks,
        stime_ticks,
        num_threads,
    })
}

fn labelled_kb(line: &str, label: &'static str) -> Result<u64, ParseError> {
    let value = line
        .split_whitespace()
        .nth(1)
        .ok_or(ParseError::MissingField(label))?;
    parse_u64(value, label)
}

/// Scans a process extended status record for the VmSize and VmRSS
/// gauges (integers in kilobytes).
pub fn parse_proc_status(buf: &[u8]) -> Result<StatusRecord, ParseError> {
    let text = as_text(buf)?;

    let mut vm_size_kb: Option<u64> = None;
    let mut vm_rss_kb: Option<u64> = None;

    for line in text.lines() {
        if line.starts_with("VmSize:") {
            vm_size_kb = Some(labelled_kb(line, "VmSize")?);
        } else if line.starts_with("VmRSS:") {
            vm_rss_kb = Some(labelled_kb(line, "VmRSS")?);
        }
        if vm_size_kb.is_some() && vm_rss_kb.is_some() {
            break;
        }
    }

    match (vm_size_kb, vm_rss_kb) {
        (Some(vm_size_kb), Some(vm_rss_kb)) => Ok(StatusRecord {
            vm_size_kb,
            vm_rss_kb,
        }),
        (None, _) => Err(ParseError::MissingField("VmSize")),
        (_, None) => Err(ParseError::MissingField("VmRSS")),
    }
}

/// Decodes a process io record. Unrecognized labels are ignored; the
/// four tracked counters are all required.
pub fn parse_proc_io(buf: &[u8]) -> Result<IoRecord, ParseError> {
    let text = as_text(buf)?;

    let mut rchar: Option<u64> = None;
    let mut wchar: Option<u64> = None;
    let mut syscr: Option<u64> = None;
    let mut syscw: Option<u64> = None;

    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label {
            "rchar" => rchar = Some(parse_u64(value, "rchar")?),
            "wchar" => wchar = Some(parse_u64(value, "wchar")?),
            "syscr" => syscr = Some(parse_u64(value, "syscr")?),
            "syscw" => syscw = Some(parse_u64(value, "syscw")?),
            _ => {}
        }
    }

    Ok(IoRecord {
        rchar_bytes: rchar.ok_or(ParseError::MissingField("rchar"))?,
        wchar_bytes: wchar.ok_or(ParseError::MissingField("wchar"))?,
        syscr_count: syscr.ok_or(ParseError::MissingField("syscr"))?,
        syscw_count: syscw.ok_or(ParseError::MissingField("syscw"))?,
    })
}
