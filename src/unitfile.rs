// src/unitfile.rs

//! Order- and comment-preserving systemd unit file model.
//!
//! The parser keeps every comment, blank line, and key ordering so that
//! `parse` followed by [`UnitFile::to_string`] reproduces untouched input
//! byte for byte. Reads follow systemd conventions: the last occurrence
//! of a key wins for scalar lookups, all occurrences are preserved for
//! list lookups, and an empty value clears previously accumulated list
//! entries. The one sanctioned round-trip-breaking mutation is
//! [`UnitFile::merge`], used for drop-in application.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::split::{self, SplitFlags, WHITESPACE};

/// One line inside a group: either a preserved comment/blank line or a
/// key-value pair whose value retains raw continuation sequences.
#[derive(Debug, Clone)]
enum Line {
    Comment(String),
    KeyValue { key: String, value: String },
}

/// A named group with its leading comments and ordered lines
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    comments: Vec<String>,
    lines: Vec<Line>,
}

impl Group {
    fn new(name: &str) -> Group {
        Group {
            name: name.to_string(),
            comments: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Group name; `""` is the reserved bucket for trailing comments in a
    /// file with no group header.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn add(&mut self, key: &str, value: &str) {
        self.lines.push(Line::KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn set(&mut self, key: &str, value: &str) {
        // The last occurrence is the one scalar reads see
        for line in self.lines.iter_mut().rev() {
            if let Line::KeyValue { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.add(key, value);
    }

    fn unset(&mut self, key: &str) {
        self.lines
            .retain(|line| !matches!(line, Line::KeyValue { key: k, .. } if k == key));
    }

    /// All keys in first-occurrence order (duplicates collapsed)
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for line in &self.lines {
            if let Line::KeyValue { key, .. } = line {
                if !keys.contains(&key.as_str()) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

/// A parsed unit file
#[derive(Debug, Clone, Default)]
pub struct UnitFile {
    /// Base file name, e.g. `demo.container`
    pub filename: String,
    /// Full source path, if loaded from disk
    pub path: Option<PathBuf>,
    groups: Vec<Group>,
}

fn line_is_comment(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with(';')
}

fn group_name_is_valid(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c == '[' || c == ']' || c.is_control())
}

fn key_name_is_valid(key: &str) -> bool {
    !key.is_empty() && !key.chars().any(|c| c == '=' || c.is_control())
}

/// Strip `\`-newline continuation sequences from a raw value
fn apply_line_continuation(raw: &str) -> String {
    if !raw.contains("\\\n") {
        return raw.to_string();
    }
    raw.split("\\\n").collect()
}

/// Parse an integer the way `strtol` does: optional sign, `0x`/`0X` hex,
/// leading-`0` octal, else decimal.
fn parse_number(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits != "0" && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

impl UnitFile {
    pub fn new(filename: &str) -> UnitFile {
        UnitFile {
            filename: filename.to_string(),
            path: None,
            groups: Vec::new(),
        }
    }

    /// Read and parse a unit file from disk
    pub fn load(path: &Path) -> Result<UnitFile> {
        let text = std::fs::read_to_string(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut unit = UnitFile::parse(&text, &filename)?;
        unit.path = Some(path.to_path_buf());
        Ok(unit)
    }

    /// Parse unit file text
    pub fn parse(text: &str, filename: &str) -> Result<UnitFile> {
        let mut unit = UnitFile::new(filename);
        let parse_err = |line_no: usize, msg: String| Error::Parse {
            path: filename.to_string(),
            line: line_no,
            msg,
        };

        // Split into raw lines; a trailing newline does not produce an
        // extra empty line.
        let mut raw: Vec<&str> = text.split('\n').collect();
        if text.ends_with('\n') {
            raw.pop();
        }

        // Assemble logical lines: a non-comment line ending in a
        // backslash continues onto the next raw line. The raw text,
        // including the `\`-newline sequence, is preserved.
        let mut logical: Vec<(usize, String)> = Vec::new();
        let mut i = 0;
        while i < raw.len() {
            let start = i + 1;
            let mut line = raw[i].to_string();
            i += 1;
            if !line_is_comment(&line) {
                while line.ends_with('\\') && i < raw.len() {
                    line.push('\n');
                    line.push_str(raw[i]);
                    i += 1;
                }
            }
            logical.push((start, line));
        }

        let mut pending: Vec<String> = Vec::new();
        let mut current: Option<usize> = None;

        for (line_no, line) in logical {
            if line_is_comment(&line) {
                pending.push(line);
                continue;
            }

            if let Some(stripped) = line.strip_prefix('[') {
                let name = stripped.strip_suffix(']').ok_or_else(|| {
                    parse_err(line_no, format!("invalid group header {:?}", line))
                })?;
                if !group_name_is_valid(name) {
                    return Err(parse_err(line_no, format!("invalid group name {:?}", name)));
                }

                // A single blank pending line is the separator between
                // groups; it stays with the preceding group.
                if pending.first().is_some_and(|p| p.is_empty()) {
                    if let Some(cur) = current {
                        group_lines(&mut unit.groups, cur).push(Line::Comment(pending.remove(0)));
                    }
                }
                let idx = unit.ensure_group(name);
                unit.groups[idx].comments.append(&mut pending);
                current = Some(idx);
                continue;
            }

            let eq = line.find('=').ok_or_else(|| {
                parse_err(line_no, format!("line is not a comment, group, or key: {:?}", line))
            })?;
            let key = line[..eq].trim();
            let value = &line[eq + 1..];
            if !key_name_is_valid(key) {
                return Err(parse_err(line_no, format!("invalid key name {:?}", key)));
            }
            let Some(cur) = current else {
                return Err(parse_err(line_no, "key=value line before any group".to_string()));
            };

            let lines = group_lines(&mut unit.groups, cur);
            for comment in pending.drain(..) {
                lines.push(Line::Comment(comment));
            }
            lines.push(Line::KeyValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }

        if !pending.is_empty() {
            match current {
                Some(cur) => {
                    let lines = group_lines(&mut unit.groups, cur);
                    for comment in pending.drain(..) {
                        lines.push(Line::Comment(comment));
                    }
                }
                None => {
                    // File of nothing but comments: the "" bucket
                    let idx = unit.ensure_group("");
                    unit.groups[idx].comments.append(&mut pending);
                }
            }
        }

        Ok(unit)
    }

    fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    fn ensure_group(&mut self, name: &str) -> usize {
        match self.group_index(name) {
            Some(idx) => idx,
            None => {
                self.groups.push(Group::new(name));
                self.groups.len() - 1
            }
        }
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.group_index(name).is_some()
    }

    /// Group names in file order
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    /// Keys present in a group, first-occurrence order
    pub fn keys(&self, group: &str) -> Vec<String> {
        self.group_index(group)
            .map(|idx| {
                self.groups[idx]
                    .keys()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw value of the last occurrence of `key`
    pub fn lookup_last_raw(&self, group: &str, key: &str) -> Option<&str> {
        let idx = self.group_index(group)?;
        self.groups[idx].lines.iter().rev().find_map(|line| match line {
            Line::KeyValue { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Last value of `key`, continuation-applied and whitespace-trimmed,
    /// with one layer of matching surrounding quotes removed
    pub fn lookup_last(&self, group: &str, key: &str) -> Option<String> {
        let raw = self.lookup_last_raw(group, key)?;
        let joined = apply_line_continuation(raw);
        let trimmed = joined.trim();
        let chars: Vec<char> = trimmed.chars().collect();
        if chars.len() >= 2
            && (chars[0] == '"' || chars[0] == '\'')
            && chars[chars.len() - 1] == chars[0]
        {
            return Some(trimmed[1..trimmed.len() - 1].to_string());
        }
        Some(trimmed.to_string())
    }

    /// Alias for [`UnitFile::lookup_last`]
    pub fn lookup(&self, group: &str, key: &str) -> Option<String> {
        self.lookup_last(group, key)
    }

    /// All raw values of `key` in order; an empty value clears prior
    /// entries (systemd list convention)
    pub fn lookup_all_raw(&self, group: &str, key: &str) -> Vec<String> {
        let Some(idx) = self.group_index(group) else {
            return Vec::new();
        };
        let mut values = Vec::new();
        for line in &self.groups[idx].lines {
            if let Line::KeyValue { key: k, value } = line {
                if k == key {
                    if value.trim().is_empty() {
                        values.clear();
                    } else {
                        values.push(value.clone());
                    }
                }
            }
        }
        values
    }

    /// All values of `key`, continuation-applied and trimmed
    pub fn lookup_all(&self, group: &str, key: &str) -> Vec<String> {
        self.lookup_all_raw(group, key)
            .iter()
            .map(|v| apply_line_continuation(v).trim().to_string())
            .collect()
    }

    /// All values of `key` split into whitespace-separated words,
    /// escapes retained
    pub fn lookup_all_strv(&self, group: &str, key: &str) -> Result<Vec<String>> {
        let mut words = Vec::new();
        for value in self.lookup_all(group, key) {
            words = split::split_string_append(
                words,
                &value,
                WHITESPACE,
                SplitFlags::RETAIN_ESCAPE | SplitFlags::UNQUOTE,
            )?;
        }
        Ok(words)
    }

    /// All values of `key` split as command-line arguments
    /// (unquoted, C-unescaped, relaxed)
    pub fn lookup_all_args(&self, group: &str, key: &str) -> Result<Vec<String>> {
        let mut words = Vec::new();
        for value in self.lookup_all(group, key) {
            words = split::split_string_append(
                words,
                &value,
                WHITESPACE,
                SplitFlags::RELAX | SplitFlags::UNQUOTE | SplitFlags::CUNESCAPE,
            )?;
        }
        Ok(words)
    }

    /// Boolean read: `1/yes/true/on` and `0/no/false/off`, case-insensitive
    pub fn lookup_boolean(&self, group: &str, key: &str) -> Option<bool> {
        let value = self.lookup_last(group, key)?;
        match value.to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" | "on" => Some(true),
            "0" | "no" | "false" | "off" => Some(false),
            _ => None,
        }
    }

    pub fn lookup_boolean_with_default(&self, group: &str, key: &str, default: bool) -> bool {
        self.lookup_boolean(group, key).unwrap_or(default)
    }

    /// Numeric read with `strtol`-style `0x`/octal prefixes
    pub fn lookup_int(&self, group: &str, key: &str) -> Option<i64> {
        parse_number(&self.lookup_last(group, key)?)
    }

    pub fn lookup_uint32(&self, group: &str, key: &str) -> Option<u32> {
        self.lookup_int(group, key)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// UID read: numeric, else username lookup
    pub fn lookup_uid(&self, group: &str, key: &str) -> Result<Option<u32>> {
        let Some(value) = self.lookup_last(group, key) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        if let Some(n) = parse_number(&value).and_then(|v| u32::try_from(v).ok()) {
            return Ok(Some(n));
        }
        match nix::unistd::User::from_name(&value) {
            Ok(Some(user)) => Ok(Some(user.uid.as_raw())),
            _ => Err(Error::UnknownUser(value)),
        }
    }

    /// GID read: numeric, else groupname lookup
    pub fn lookup_gid(&self, group: &str, key: &str) -> Result<Option<u32>> {
        let Some(value) = self.lookup_last(group, key) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        if let Some(n) = parse_number(&value).and_then(|v| u32::try_from(v).ok()) {
            return Ok(Some(n));
        }
        match nix::unistd::Group::from_name(&value) {
            Ok(Some(group)) => Ok(Some(group.gid.as_raw())),
            _ => Err(Error::UnknownGroup(value)),
        }
    }

    /// Replace the last occurrence of `key` (append if absent)
    pub fn set(&mut self, group: &str, key: &str, value: &str) {
        let idx = self.ensure_group(group);
        self.groups[idx].set(key, value);
    }

    /// Append a new `key=value` line
    pub fn add(&mut self, group: &str, key: &str, value: &str) {
        let idx = self.ensure_group(group);
        self.groups[idx].add(key, value);
    }

    /// Remove every occurrence of `key`
    pub fn unset(&mut self, group: &str, key: &str) {
        if let Some(idx) = self.group_index(group) {
            self.groups[idx].unset(key);
        }
    }

    /// Remove a whole group
    pub fn remove_group(&mut self, group: &str) {
        self.groups.retain(|g| g.name != group);
    }

    /// Rename a group; if the target already exists the contents are
    /// merged into it
    pub fn rename_group(&mut self, from: &str, to: &str) {
        let Some(from_idx) = self.group_index(from) else {
            return;
        };
        match self.group_index(to) {
            Some(to_idx) => {
                let mut moved = self.groups.remove(from_idx);
                let to_idx = if to_idx > from_idx { to_idx - 1 } else { to_idx };
                self.groups[to_idx].comments.append(&mut moved.comments);
                self.groups[to_idx].lines.append(&mut moved.lines);
            }
            None => self.groups[from_idx].name = to.to_string(),
        }
    }

    /// Merge another unit file into this one (drop-in application).
    /// This is the one mutation that intentionally breaks byte round-trip.
    pub fn merge(&mut self, other: &UnitFile) {
        for group in &other.groups {
            let idx = self.ensure_group(&group.name);
            self.groups[idx].comments.extend(group.comments.iter().cloned());
            self.groups[idx].lines.extend(group.lines.iter().cloned());
        }
    }

    /// Split `base@instance.ext` into the template file name and the
    /// instance; `None` for non-template names
    pub fn template_parts(&self) -> Option<(String, String)> {
        let (stem, ext) = match self.filename.rfind('.') {
            Some(dot) => (&self.filename[..dot], &self.filename[dot..]),
            None => (self.filename.as_str(), ""),
        };
        let at = stem.find('@')?;
        Some((format!("{}@{}", &stem[..at], ext), stem[at + 1..].to_string()))
    }

    /// Drop-in directory name candidates, broad to specific:
    /// `<type>.d`, truncated-at-`-` prefixes, the template base for
    /// instances, and the full unit name.
    pub fn dropin_paths(&self) -> Vec<String> {
        let (stem, ext) = match self.filename.rfind('.') {
            Some(dot) => (&self.filename[..dot], &self.filename[dot..]),
            None => (self.filename.as_str(), ""),
        };

        let mut paths = Vec::new();
        if !ext.is_empty() {
            paths.push(format!("{}.d", &ext[1..]));
        }
        for (pos, c) in stem.char_indices() {
            if c == '-' {
                paths.push(format!("{}{}.d", &stem[..=pos], ext));
            }
        }
        if let Some((template_base, instance)) = self.template_parts() {
            if !instance.is_empty() {
                paths.push(format!("{}.d", template_base));
            }
        }
        paths.push(format!("{}.d", self.filename));
        paths
    }

    /// Serialize; untouched parses reproduce their input exactly
    pub fn write_to(&self, out: &mut String) {
        for group in &self.groups {
            for comment in &group.comments {
                out.push_str(comment);
                out.push('\n');
            }
            if !group.name.is_empty() {
                out.push('[');
                out.push_str(&group.name);
                out.push_str("]\n");
            }
            for line in &group.lines {
                match line {
                    Line::Comment(text) => {
                        out.push_str(text);
                        out.push('\n');
                    }
                    Line::KeyValue { key, value } => {
                        out.push_str(key);
                        out.push('=');
                        out.push_str(value);
                        out.push('\n');
                    }
                }
            }
        }
    }
}

fn group_lines(groups: &mut [Group], idx: usize) -> &mut Vec<Line> {
    &mut groups[idx].lines
}

impl fmt::Display for UnitFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_to(&mut out);
        f.write_str(&out)
    }
}
