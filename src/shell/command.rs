//! Command line parsing.

/// A verb plus its arguments, parsed fresh from each input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Lower-cased first token.
    pub verb: String,
    pub args: Vec<String>,
}

impl Command {
    /// Split on whitespace. `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next()?.to_lowercase();
        let args = tokens.map(String::from).collect();
        Some(Self { verb, args })
    }
}
