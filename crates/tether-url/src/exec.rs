// ABOUTME: Parser for exec:<command>[:<path>] URLs.
// ABOUTME: Splits on colons outside quoted spans and stores the command in the host slot.

use std::collections::HashMap;

use crate::error::{Result, UrlError};
use crate::{Kind, Protocol, Url};

/// Lowercase exec URL prefix. Matching is case-insensitive.
pub const EXEC_PREFIX: &str = "exec:";

/// Check whether a raw URL uses the exec scheme.
pub fn is_exec_url(raw: &str) -> bool {
    raw.get(..EXEC_PREFIX.len())
        .map(|prefix| prefix.eq_ignore_ascii_case(EXEC_PREFIX))
        .unwrap_or(false)
}

/// Parse an exec URL. The caller must have checked the prefix with [`is_exec_url`].
///
/// The remainder after the prefix is split on `:` except inside single- or
/// double-quoted spans. Empty fields are dropped, so at most two fields may
/// remain: the command and an optional path. Matching outer quotes are
/// stripped from the command only.
pub fn parse_exec(raw: &str, kind: Kind) -> Result<Url> {
    let remainder = &raw[EXEC_PREFIX.len()..];

    let fields = split_unquoted(remainder);
    let (command, path) = match fields.as_slice() {
        [] => return Err(UrlError::NoCommand),
        [command] => (*command, ""),
        [command, path] => (*command, *path),
        _ => return Err(UrlError::TooManySeparators),
    };

    Ok(Url {
        kind,
        protocol: Protocol::Exec,
        host: strip_quotes(command).to_string(),
        path: path.to_string(),
        environment: HashMap::new(),
        parameters: HashMap::new(),
    })
}

/// Split on colons that are not inside an open quote. A quote opens on `'` or
/// `"` and only closes on the same mark.
fn split_unquoted(input: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, c) in input.char_indices() {
        match quote {
            Some(mark) if c == mark => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ':' => {
                if start < index {
                    fields.push(&input[start..index]);
                }
                start = index + 1;
            }
            None => {}
        }
    }
    if start < input.len() {
        fields.push(&input[start..]);
    }

    fields
}

fn strip_quotes(command: &str) -> &str {
    let bytes = command.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &command[1..command.len() - 1];
        }
    }
    command
}
