//! LIST / MLSD response parser.
//!
//! Supports three grammars:
//! 1. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//! 2. **Unix-style** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 3. **DOS/IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//!
//! A line containing `;` and `=` is treated as MLSD; otherwise Unix is
//! tried, then DOS. `.`/`..` never produce entries, and a malformed
//! line is dropped rather than failing the whole listing.

use crate::ftp::types::{EntryKind, FileEntry};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref DOS_RE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+       # date
        (\d{1,2}:\d{2}(?:[AP]M)?)\s+    # time
        (<DIR>|\d+)\s+                  # size or <DIR>
        (.+)$                           # filename (may contain spaces)
        ",
    )
    .unwrap();
}

/// Parse a full multi-line LIST or MLSD response body.
pub fn parse_listing(raw: &str) -> Vec<FileEntry> {
    parse_listing_at(raw, Utc::now())
}

/// Same as [`parse_listing`] with an explicit "now" for the year-less
/// Unix date rule.
pub fn parse_listing_at(raw: &str, now: DateTime<Utc>) -> Vec<FileEntry> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| parse_line(line.trim_end_matches('\r'), now))
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

fn parse_line(line: &str, now: DateTime<Utc>) -> Option<FileEntry> {
    if line.contains(';') && line.contains('=') {
        return parse_mlsd(line);
    }
    parse_unix(line, now).or_else(|| parse_dos(line))
}

/// Join a directory and entry name, strip the session base prefix, and
/// normalise leading/trailing separators.
pub fn entry_path(base: &str, dir: &str, name: &str) -> String {
    let mut full = format!("{}/{}", dir.trim_end_matches('/'), name);
    if !full.starts_with('/') {
        full.insert(0, '/');
    }
    let base = base.trim_matches('/');
    let stripped = if !base.is_empty() {
        let prefix = format!("/{}", base);
        match full.strip_prefix(&prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
            _ => full,
        }
    } else {
        full
    };
    stripped.trim_matches('/').to_string()
}

// ─── MLSD / MLST ─────────────────────────────────────────────────────

/// Parse an MLSD fact line: `fact1=val1;fact2=val2; filename`.
///
/// The token after the last `;` is the name; everything before it is
/// `fact=value` pairs. `cdir`/`pdir` entries are discarded entirely.
fn parse_mlsd(line: &str) -> Option<FileEntry> {
    let (facts_str, name) = line.rsplit_once(';')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut facts: HashMap<String, String> = HashMap::new();
    for segment in facts_str.split(';') {
        if let Some((k, v)) = segment.trim().split_once('=') {
            facts.insert(k.to_ascii_lowercase(), v.to_string());
        }
    }

    let kind = match facts.get("type").map(|v| v.to_ascii_lowercase()) {
        Some(t) if t == "cdir" || t == "pdir" => return None,
        Some(t) if t == "dir" => EntryKind::Directory,
        Some(t) if t == "file" => EntryKind::Regular,
        Some(t)
            if t == "link"
                || t.starts_with("os.unix=symlink")
                || t.starts_with("os.unix=slink") =>
        {
            EntryKind::Symlink
        }
        Some(t) if t.starts_with("os.unix=block") => EntryKind::Special,
        _ => EntryKind::Unknown,
    };

    let mut entry = FileEntry::new(name, kind);
    if kind != EntryKind::Directory {
        if let Some(size) = facts.get("size").and_then(|v| v.parse::<i64>().ok()) {
            entry.size = size;
        }
    }
    entry.modified = facts.get("modify").and_then(|v| parse_mlsd_time(v));
    entry.created = facts.get("create").and_then(|v| parse_mlsd_time(v));

    if let Some(perm) = facts.get("perm") {
        // "r"/"l" grant reading, "w"/"a" grant writing
        let writable = perm.contains('w') || perm.contains('a');
        entry.read_only = !writable;
        entry.extras.insert("perm".into(), perm.clone());
    }
    if let Some(unique) = facts.get("unique") {
        entry.extras.insert("unique".into(), unique.clone());
    }
    if let Some(media) = facts.get("media-type") {
        entry.extras.insert("mediaType".into(), media.clone());
    }
    if let Some(owner) = facts.get("unix.owner") {
        entry.extras.insert("owner".into(), owner.clone());
    }
    if let Some(group) = facts.get("unix.group") {
        entry.extras.insert("group".into(), group.clone());
    }
    Some(entry)
}

/// MLSD timestamp: `YYYYMMDDHHmmSS[.fraction]`, fixed UTC calendar.
fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let base = if s.len() >= 14 { &s[..14] } else { s };
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix `ls -l` ────────────────────────────────────────────────────

/// Parse a Unix `ls -l` line:
/// ```text
/// drwxr-xr-x   2 user group  4096 Jan  1 12:00 dirname
/// -rw-r--r--   1 user group  1234 Jan  1  2025 file.txt
/// lrwxrwxrwx   1 user group    42 Jan  1 12:00 link -> target
/// ```
/// Fields are permissions, link count, owner, group, size, a 3-token
/// date, then the name — the rest of the line verbatim, so embedded
/// spaces survive.
fn parse_unix(line: &str, now: DateTime<Utc>) -> Option<FileEntry> {
    let (tokens, name_start) = leading_tokens(line, 8)?;
    let name_raw = line[name_start..].trim_start();
    if name_raw.is_empty() {
        return None;
    }

    let perms = tokens[0];
    if perms.len() < 10 || !"-dlbcsp".contains(perms.chars().next()?) {
        return None;
    }
    let size: i64 = tokens[4].parse().ok()?;

    let kind = match perms.as_bytes()[0] {
        b'd' => EntryKind::Directory,
        b'l' => EntryKind::Symlink,
        _ => EntryKind::Regular,
    };

    let (name, link_target) = if kind == EntryKind::Symlink {
        match name_raw.split_once(" -> ") {
            Some((n, t)) => (n.to_string(), Some(t.to_string())),
            None => (name_raw.to_string(), None),
        }
    } else {
        (name_raw.to_string(), None)
    };

    let mut entry = FileEntry::new(name, kind);
    entry.size = if kind == EntryKind::Directory { -1 } else { size };
    entry.modified = parse_unix_date(tokens[5], tokens[6], tokens[7], now);
    entry.read_only = !perms.contains('w');
    entry.link_count = tokens[1].parse().ok();
    entry.link_target = link_target;
    entry.extras.insert("perm".into(), perms.to_string());
    entry.extras.insert("owner".into(), tokens[2].to_string());
    entry.extras.insert("group".into(), tokens[3].to_string());
    Some(entry)
}

/// First `count` whitespace-delimited tokens of `line`, plus the byte
/// offset just past the last one.
fn leading_tokens(line: &str, count: usize) -> Option<(Vec<&str>, usize)> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::with_capacity(count);
    let mut i = 0;
    while tokens.len() < count {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        tokens.push(&line[start..i]);
    }
    Some((tokens, i))
}

/// Date portion: `Jan  1 12:00` (year omitted) or `Jan  1 2025`.
///
/// Servers omit the year only for recent files. When the year-less
/// form, parsed against the current year, lands in the future, the
/// file is from last year — roll back exactly one.
fn parse_unix_date(
    month: &str,
    day: &str,
    tail: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if tail.contains(':') {
        let composed = format!("{} {} {} {}", now.year(), month, day, tail);
        let parsed = NaiveDateTime::parse_from_str(&composed, "%Y %b %d %H:%M").ok()?;
        let stamp = Utc.from_utc_datetime(&parsed);
        if stamp > now {
            let composed = format!("{} {} {} {}", now.year() - 1, month, day, tail);
            if let Ok(prev) = NaiveDateTime::parse_from_str(&composed, "%Y %b %d %H:%M") {
                return Some(Utc.from_utc_datetime(&prev));
            }
        }
        Some(stamp)
    } else {
        let composed = format!("{} {} {}", tail, month, day);
        let date = NaiveDate::parse_from_str(&composed, "%Y %b %d").ok()?;
        Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
    }
}

// ─── DOS / IIS ───────────────────────────────────────────────────────

/// Parse a DOS-style line:
/// ```text
/// 01-01-26  12:00AM       1234 file.txt
/// 01-01-26  12:00PM      <DIR> Directory Name
/// ```
/// `<DIR>` marks a directory of unknown size.
fn parse_dos(line: &str) -> Option<FileEntry> {
    let caps = DOS_RE.captures(line)?;

    let date_str = caps.get(1)?.as_str();
    let time_str = caps.get(2)?.as_str();
    let size_or_dir = caps.get(3)?.as_str();
    let name = caps.get(4)?.as_str();

    let (kind, size) = if size_or_dir == "<DIR>" {
        (EntryKind::Directory, -1)
    } else {
        (EntryKind::Regular, size_or_dir.parse::<i64>().ok()?)
    };

    let mut entry = FileEntry::new(name, kind);
    entry.size = size;
    entry.modified = parse_dos_date(date_str, time_str);
    Some(entry)
}

fn parse_dos_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    for fmt in ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&combined, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    None
}
