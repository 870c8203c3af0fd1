//! Maps remote file identifiers onto safe relative paths inside the local root.
//!
//! The mapping is stable but not invertible; the sanitized path is the
//! canonical name of a file everywhere else in the crate (baseline keys,
//! conflict names, messages sent back to the peer).

/// Extensions that are kept as-is. Anything else after the last dot is treated
/// as part of the name.
const KNOWN_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".css", ".json", ".md", ".svg"];

/// Extension given to files whose extension is absent or unknown.
pub const DEFAULT_EXTENSION: &str = ".tsx";

/// Base name used when nothing usable survives sanitization.
pub const FALLBACK_NAME: &str = "Unnamed";

/// Decides how a segment that starts with a digit is made safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierContext {
    /// File and directory names: prefixed with `$`.
    Path,
    /// Code identifiers: prefixed with `_`.
    Symbol,
}

impl IdentifierContext {
    fn digit_prefix(self) -> char {
        match self {
            IdentifierContext::Path => '$',
            IdentifierContext::Symbol => '_',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedPath {
    /// The full relative path, `dir_name/name extension`.
    pub path: String,
    /// Sanitized directory part, empty for files at the root.
    pub dir_name: String,
    /// Sanitized base name without extension.
    pub name: String,
    /// Extension including the leading dot.
    pub extension: String,
}

/// Sanitizes a remote path. With `capitalize`, component files (`.tsx`, or
/// files whose extension had to be inferred) get an upper-case first letter.
///
/// Only `.tsx .ts .jsx .js .css .json .md .svg` count as extensions. Anything
/// else is folded into the name and the file becomes a component:
/// `notes.txt` turns into `Notes_txt.tsx`.
pub fn sanitize_path(raw: &str, capitalize: bool) -> SanitizedPath {
    let normalized = normalize_path(raw.trim());
    let mut segments: Vec<&str> = normalized
        .split('/')
        .filter(|segment| !segment.is_empty() && !is_all_dots(segment))
        .collect();

    let file = segments.pop().unwrap_or("");
    let (stem, extension) = split_extension(file);

    let mut name = sanitize_identifier(stem, IdentifierContext::Path);
    if name.is_empty() {
        name = FALLBACK_NAME.to_owned();
    }
    if capitalize && extension == DEFAULT_EXTENSION {
        name = capitalize_first(&name);
    }

    let dir_name = segments
        .iter()
        .map(|segment| sanitize_identifier(segment, IdentifierContext::Path))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let path = if dir_name.is_empty() {
        format!("{}{}", name, extension)
    } else {
        format!("{}/{}{}", dir_name, name, extension)
    };

    SanitizedPath {
        path,
        dir_name,
        name,
        extension,
    }
}

/// Replaces every character outside `[a-zA-Z0-9$_]` with `_`, collapses runs of
/// `_` and makes sure the result does not start with a digit.
pub fn sanitize_identifier(raw: &str, context: IdentifierContext) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '$' || c == '_' { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, context.digit_prefix());
    }
    out
}

/// Collapses `.`, `..`, repeated separators and backslashes. A leading `/` is
/// kept; `..` cannot climb above an absolute root.
pub fn normalize_path(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

fn split_extension(file: &str) -> (&str, String) {
    if let Some(index) = file.rfind('.') {
        if index > 0 {
            let extension = file[index..].to_ascii_lowercase();
            if KNOWN_EXTENSIONS.contains(&extension.as_str()) {
                return (&file[..index], extension);
            }
        }
    }
    (file, DEFAULT_EXTENSION.to_owned())
}

fn is_all_dots(segment: &str) -> bool {
    segment.chars().all(|c| c == '.')
}

fn capitalize_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            let mut out = String::with_capacity(name.len());
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
            out
        }
        _ => name.to_owned(),
    }
}
