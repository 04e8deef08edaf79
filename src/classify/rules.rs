//! Text heuristics behind the mandatory-input and privilege checks.

use std::iter::Peekable;
use std::str::CharIndices;
use std::sync::LazyLock;

use regex::Regex;

use crate::script::ScriptKind;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
}

fn earliest(regexes: &[Regex], source: &str) -> Option<String> {
    regexes
        .iter()
        .filter_map(|regex| regex.find(source))
        .min_by_key(regex::Match::start)
        .map(|found| found.as_str().trim().to_owned())
}

static REQUIRED_EXPANSION: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"\$\{([A-Za-z_][A-Za-z0-9_]*|[0-9]+):?\?"]));

static ARGUMENT_GUARD: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r#"\$#"?\s*(-lt|-le|-eq|-ne|<=|<|==|=|!=)\s*"?([0-9]+)"#])
});

const SHELL_PRIVILEGE_PATTERNS: [&str; 5] = [
    r#"\bEUID\}?"?\s*(?:-ne|-eq|-gt|-lt|!=|==|=|>)\s*"?0\b"#,
    r#"\bUID\}?"?\s*(?:-ne|-eq|!=|==|=)\s*"?0\b"#,
    r#"(?:\$\(|`)\s*id\s+-u\s*(?:\)|`)"?\s*(?:-ne|-eq|!=|==|=)\s*"?0\b"#,
    r"(?i)\bmust\s+(?:be\s+)?run\s+(?:as|by)\s+root\b",
    r"(?i)\brun\s+(?:this\s+(?:script\s+)?)?(?:as\s+root|with\s+sudo)\b",
];

const POWERSHELL_PRIVILEGE_PATTERNS: [&str; 6] = [
    r"(?im)^\s*#requires\s+.*-RunAsAdministrator\b",
    r#"(?i)WindowsBuiltInRole\]\s*(?:::\s*|["'])Administrator"#,
    r#"(?i)IsInRole\(\s*["']Administrators?["']"#,
    r"S-1-5-32-544",
    r"(?i)\b(?:must|needs?\s+to)\s+be\s+run\s+as\s+(?:an\s+)?administrator\b",
    r"(?i)\brun\s+(?:this\s+(?:script\s+)?)?as\s+(?:an\s+)?administrator\b",
];

const COMMON_PRIVILEGE_PATTERN: &str = r"(?i)\brequires?\s+(?:elevated|root|superuser|administrator|admin)\s+(?:privileges|rights|permissions|access)\b";

static SHELL_PRIVILEGE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut patterns = SHELL_PRIVILEGE_PATTERNS.to_vec();
    patterns.push(COMMON_PRIVILEGE_PATTERN);
    compile(&patterns)
});

static POWERSHELL_PRIVILEGE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let mut patterns = POWERSHELL_PRIVILEGE_PATTERNS.to_vec();
    patterns.push(COMMON_PRIVILEGE_PATTERN);
    compile(&patterns)
});

static MANDATORY_ATTRIBUTE: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"(?i)\bMandatory\b"]));

static MANDATORY_DISABLED: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"(?i)\bMandatory\s*=\s*(?:\$false|0)\b"]));

static VARIABLE: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"\$([A-Za-z_][A-Za-z0-9_]*)"]));

/// Evidence that the script expects elevation, if any.
pub(super) fn privilege_signal(kind: ScriptKind, source: &str) -> Option<String> {
    match kind {
        ScriptKind::Shell => earliest(&SHELL_PRIVILEGE, source),
        ScriptKind::PowerShell => earliest(&POWERSHELL_PRIVILEGE, source),
    }
}

/// Required inputs that have no default, in order of appearance.
pub(super) fn mandatory_parameters(kind: ScriptKind, source: &str) -> Vec<String> {
    match kind {
        ScriptKind::Shell => shell_mandatory(source),
        ScriptKind::PowerShell => powershell_mandatory(source),
    }
}

fn shell_mandatory(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for regex in REQUIRED_EXPANSION.iter() {
        for captures in regex.captures_iter(source) {
            let Some(name) = captures.get(1).map(|found| found.as_str()) else {
                continue;
            };
            let label = if name.bytes().all(|byte| byte.is_ascii_digit()) {
                format!("${name}")
            } else {
                name.to_owned()
            };
            if !names.contains(&label) {
                names.push(label);
            }
        }
    }

    let required = ARGUMENT_GUARD
        .iter()
        .flat_map(|regex| regex.captures_iter(source))
        .filter_map(|captures| {
            let operator = captures.get(1)?.as_str();
            let count = captures.get(2)?.as_str().parse::<usize>().ok()?;
            minimum_arguments(operator, count)
        })
        .max();
    if let Some(count) = required {
        let noun = if count == 1 { "argument" } else { "arguments" };
        names.push(format!("{count} positional {noun}"));
    }
    names
}

/// Minimum argument count implied by a `$# <op> <count>` guard.
fn minimum_arguments(operator: &str, count: usize) -> Option<usize> {
    match operator {
        "-lt" | "<" if count > 0 => Some(count),
        "-le" | "<=" => Some(count.saturating_add(1)),
        "-eq" | "==" | "=" if count == 0 => Some(1),
        "-ne" | "!=" if count > 0 => Some(count),
        _ => None,
    }
}

fn powershell_mandatory(source: &str) -> Vec<String> {
    let Some(block) = script_param_block(source) else {
        return Vec::new();
    };
    split_declarations(block)
        .iter()
        .filter_map(|declaration| mandatory_without_default(declaration))
        .collect()
}

fn mandatory_without_default(declaration: &str) -> Option<String> {
    let mut attributes = String::new();
    let mut rest = String::new();
    let mut depth = 0_usize;
    for ch in declaration.chars() {
        match ch {
            '[' => {
                depth += 1;
                attributes.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                attributes.push(ch);
            }
            _ if depth > 0 => attributes.push(ch),
            _ => rest.push(ch),
        }
    }

    let mandatory = MANDATORY_ATTRIBUTE
        .iter()
        .any(|regex| regex.is_match(&attributes))
        && !MANDATORY_DISABLED
            .iter()
            .any(|regex| regex.is_match(&attributes));
    if !mandatory {
        return None;
    }

    let captures = VARIABLE.iter().find_map(|regex| regex.captures(&rest))?;
    let variable = captures.get(0)?;
    let name = captures.get(1)?.as_str().to_owned();
    let has_default = rest
        .get(variable.end()..)
        .is_some_and(|after| after.contains('='));
    (!has_default).then_some(name)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Inert {
    Comment,
    Text,
}

/// Character walker that steps over PowerShell strings and comments.
struct Scanner<'a> {
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_second(&self) -> Option<char> {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next().map(|(_, ch)| ch)
    }

    /// Consumes a comment or string literal at the cursor.
    fn skip_inert(&mut self) -> Option<Inert> {
        match self.peek_char()? {
            '#' => {
                while self.peek_char().is_some_and(|ch| ch != '\n') {
                    self.chars.next();
                }
                Some(Inert::Comment)
            }
            '<' if self.peek_second() == Some('#') => {
                self.chars.next();
                self.chars.next();
                let mut previous = ' ';
                for (_, ch) in self.chars.by_ref() {
                    if previous == '#' && ch == '>' {
                        break;
                    }
                    previous = ch;
                }
                Some(Inert::Comment)
            }
            quote @ ('\'' | '"') => {
                self.chars.next();
                while let Some((_, ch)) = self.chars.next() {
                    if ch == '`' && quote == '"' {
                        self.chars.next();
                    } else if ch == quote {
                        if self.peek_char() == Some(quote) {
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                }
                Some(Inert::Text)
            }
            _ => None,
        }
    }
}

/// Returns the body of the script-level `param( … )` block.
fn script_param_block(source: &str) -> Option<&str> {
    let mut scanner = Scanner::new(source);
    let mut depth = 0_usize;
    let mut word = String::new();
    let mut previous_ident = false;

    loop {
        if scanner.skip_inert().is_some() {
            word.clear();
            previous_ident = false;
            continue;
        }
        let (_, ch) = scanner.chars.next()?;
        let ident = ch.is_ascii_alphanumeric() || ch == '_';
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '(' if depth == 0 && word.eq_ignore_ascii_case("param") => {
                return balanced_body(source, &mut scanner);
            }
            _ => {}
        }
        if ident {
            if !previous_ident {
                word.clear();
            }
            word.push(ch);
        } else if !ch.is_whitespace() {
            word.clear();
        }
        previous_ident = ident;
    }
}

fn balanced_body<'a>(source: &'a str, scanner: &mut Scanner<'_>) -> Option<&'a str> {
    let start = scanner.chars.peek().map_or(source.len(), |(index, _)| *index);
    let mut depth = 1_usize;
    loop {
        if scanner.skip_inert().is_some() {
            continue;
        }
        let (index, ch) = scanner.chars.next()?;
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return source.get(start..index);
                }
            }
            _ => {}
        }
    }
}

/// Splits a `param` body on top-level commas. String contents are blanked
/// and comments dropped so that neither can fake an attribute or default.
fn split_declarations(body: &str) -> Vec<String> {
    let mut scanner = Scanner::new(body);
    let mut declarations = Vec::new();
    let mut current = String::new();
    let mut depth = 0_usize;

    loop {
        match scanner.skip_inert() {
            Some(Inert::Text) => {
                current.push_str("''");
                continue;
            }
            Some(Inert::Comment) => {
                current.push(' ');
                continue;
            }
            None => {}
        }
        let Some((_, ch)) = scanner.chars.next() else {
            break;
        };
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                declarations.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        declarations.push(current);
    }
    declarations
}
