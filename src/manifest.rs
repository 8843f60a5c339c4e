//! Reading and writing `META-INF/MANIFEST.MF`.
//!
//! Only the main section is interpreted. Per-entry sections after the first
//! blank line are carried through untouched so rewriting an archive never
//! loses them.

/// Location of the manifest inside a JAR/WAR/EAR.
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Maximum bytes per physical line, excluding the line break.
const LINE_WIDTH: usize = 72;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    main: Vec<(String, String)>,
    sections: Vec<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            main: vec![("Manifest-Version".to_string(), "1.0".to_string())],
            sections: Vec::new(),
        }
    }

    /// Parse manifest bytes. The error string explains the first bad line.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {}", e))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut main: Vec<(String, String)> = Vec::new();
        let mut lines = split_lines(text).into_iter().enumerate();

        for (number, line) in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix(' ') {
                match main.last_mut() {
                    Some((_, value)) => value.push_str(rest),
                    None => return Err(format!("line {}: continuation without header", number + 1)),
                }
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| format!("line {}: missing ':' in {:?}", number + 1, line))?;
            if name.is_empty() || name.contains(' ') {
                return Err(format!("line {}: invalid attribute name {:?}", number + 1, name));
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            main.push((name.to_string(), value.to_string()));
        }

        let mut sections: Vec<String> = lines.map(|(_, line)| line.to_string()).collect();
        while sections.last().is_some_and(|l| l.is_empty()) {
            sections.pop();
        }

        Ok(Self { main, sections })
    }

    /// Case-insensitive lookup, first match wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.main
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace the value of an existing attribute in place, or append.
    pub fn set(&mut self, name: &str, value: &str) {
        match self
            .main
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.main.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .main
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.main.remove(index).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.main.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (name, value) in &self.main {
            write_wrapped(&mut out, &format!("{}: {}", name, value));
        }
        out.push_str("\r\n");
        if !self.sections.is_empty() {
            for line in &self.sections {
                out.push_str(line);
                out.push_str("\r\n");
            }
            out.push_str("\r\n");
        }
        out.into_bytes()
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(i) => {
                lines.push(&rest[..i]);
                let skip = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[i + skip..];
            }
            None => {
                lines.push(rest);
                rest = "";
            }
        }
    }
    lines
}

/// Break `line` into 72-byte physical lines; continuations start with a space.
fn write_wrapped(out: &mut String, line: &str) {
    let mut rest = line;
    let mut width = LINE_WIDTH;
    loop {
        if rest.len() <= width {
            out.push_str(rest);
            out.push_str("\r\n");
            return;
        }
        let mut cut = width;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str("\r\n ");
        rest = &rest[cut..];
        width = LINE_WIDTH - 1;
    }
}
