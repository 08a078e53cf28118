//! Plain-text tables for connection listings.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::connection::Connection;

/// Marker shown next to the current connection.
pub const CURRENT_MARKER: &str = "*";
/// Header values longer than this are shortened for display.
pub const HEADER_LENGTH_LIMIT: usize = 40;
/// Shown in the headers column when a connection has none.
pub const EMPTY_HEADERS: &str = "<empty>";
pub const NO_CONNECTIONS: &str = "There were no connections.";

/// Table of names and URLs, marking `current`.
pub fn render_list<'a>(
    connections: impl IntoIterator<Item = &'a Connection>,
    current: Option<&str>,
) -> String {
    let connections: Vec<&Connection> = connections.into_iter().collect();
    if connections.is_empty() {
        return format!("{}\n", NO_CONNECTIONS);
    }

    let name_width = column_width(connections.iter().map(|c| c.name.as_str()), "NAME");
    let mut out = String::new();
    let _ = writeln!(out, "  {:<name_width$}   {}", "NAME", "URL");
    for conn in connections {
        let _ = writeln!(
            out,
            "{} {:<name_width$}   {}",
            marker(conn, current),
            conn.name,
            conn.service_url
        );
    }
    out
}

/// Full table with token and headers, one header per line.
///
/// Tokens are masked unless `show_token` is set.
pub fn render_describe<'a>(
    connections: impl IntoIterator<Item = &'a Connection>,
    current: Option<&str>,
    show_token: bool,
) -> String {
    let connections: Vec<&Connection> = connections.into_iter().collect();
    if connections.is_empty() {
        return format!("{}\n", NO_CONNECTIONS);
    }

    let tokens: Vec<String> = connections
        .iter()
        .map(|c| display_token(&c.auth_token, show_token))
        .collect();
    let name_width = column_width(connections.iter().map(|c| c.name.as_str()), "NAME");
    let url_width = column_width(connections.iter().map(|c| c.service_url.as_str()), "URL");
    let token_width = column_width(tokens.iter().map(String::as_str), "TOKEN");

    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {:<name_width$}   {:<url_width$}   {:<token_width$}   {}",
        "NAME", "URL", "TOKEN", "HEADERS"
    );
    for (conn, token) in connections.iter().zip(&tokens) {
        let headers = header_lines(&conn.headers);
        let _ = writeln!(
            out,
            "{} {:<name_width$}   {:<url_width$}   {:<token_width$}   {}",
            marker(conn, current),
            conn.name,
            conn.service_url,
            token,
            headers[0]
        );
        let indent = 2 + name_width + 3 + url_width + 3 + token_width + 3;
        for line in &headers[1..] {
            let _ = writeln!(out, "{:indent$}{}", "", line);
        }
    }
    out
}

/// One `Name: value` line per header, never empty.
pub fn header_lines(headers: &BTreeMap<String, String>) -> Vec<String> {
    if headers.is_empty() {
        return vec![EMPTY_HEADERS.to_string()];
    }
    headers
        .iter()
        .map(|(k, v)| format!("{}: {}", k, truncate_middle(v, HEADER_LENGTH_LIMIT)))
        .collect()
}

/// Shorten `value` to its head and tail joined by ` ... ` when it exceeds `limit` chars.
pub fn truncate_middle(value: &str, limit: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= limit {
        return value.to_string();
    }
    let keep = (limit / 2).saturating_sub(5);
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{} ... {}", head, tail)
}

fn display_token(token: &str, show: bool) -> String {
    if token.is_empty() {
        return "-".to_string();
    }
    if show {
        return token.to_string();
    }
    let count = token.chars().count();
    if count <= 8 {
        return "****".to_string();
    }
    let tail: String = token.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

fn marker(conn: &Connection, current: Option<&str>) -> &'static str {
    if current == Some(conn.name.as_str()) {
        CURRENT_MARKER
    } else {
        " "
    }
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>, header: &str) -> usize {
    values
        .map(|v| v.chars().count())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0)
}
