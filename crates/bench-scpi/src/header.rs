//! Command header canonicalisation
//!
//! Instruments accept both long and short keyword forms (`sense:FREQuency:CENTer`
//! and `SENS:FREQ:CENT` are the same command), optional root nodes and
//! implicit numeric suffixes. `ParsedCommand` reduces a received command line
//! to a canonical short-form header so the receiving side can match on a
//! single spelling.

/// Long keyword forms and their short equivalents
const KEYWORDS: &[(&str, &str)] = &[
    ("BANDWIDTH", "BAND"),
    ("CALCULATE", "CALC"),
    ("CENTER", "CENT"),
    ("CONTINUOUS", "CONT"),
    ("DETECTOR", "DET"),
    ("DISPLAY", "DISP"),
    ("ENABLE", "ENAB"),
    ("ERROR", "ERR"),
    ("EVENT", "EVEN"),
    ("FREQUENCY", "FREQ"),
    ("IMMEDIATE", "IMM"),
    ("INITIATE", "INIT"),
    ("LEVEL", "LEV"),
    ("MARKER", "MARK"),
    ("MAXIMUM", "MAX"),
    ("MODULATION", "MOD"),
    ("OPERATION", "OPER"),
    ("OUTPUT", "OUTP"),
    ("POWER", "POW"),
    ("RESOLUTION", "RES"),
    ("RLEVEL", "RLEV"),
    ("STATE", "STAT"),
    ("STATUS", "STAT"),
    ("SYSTEM", "SYST"),
    ("TRACE", "TRAC"),
    ("WINDOW", "WIND"),
];

/// Optional root nodes that may be omitted
const OPTIONAL_ROOTS: &[&str] = &["SENS", "SENSE", "SOUR", "SOURCE"];

/// A command line split into canonical header, query flag and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Canonical short-form header (`SENS:` / `SOUR:` roots removed)
    pub header: String,
    /// Whether the header ended with `?`
    pub query: bool,
    /// Raw argument text after the header (trimmed, may be empty)
    pub argument: String,
}

fn shorten(node: &str) -> String {
    let upper = node.to_ascii_uppercase();

    // Trace node numeric suffix: TRACE1 -> TRAC
    let (stem, suffix) = match upper.find(|c: char| c.is_ascii_digit()) {
        Some(pos) => (&upper[..pos], &upper[pos..]),
        None => (upper.as_str(), ""),
    };

    let short = KEYWORDS
        .iter()
        .find(|(long, short)| stem == *long || stem == *short)
        .map(|(_, short)| *short)
        .unwrap_or(stem);

    if short == "TRAC" && suffix == "1" {
        short.to_string()
    } else {
        format!("{}{}", short, suffix)
    }
}

impl ParsedCommand {
    /// Parse a command line; returns `None` for a blank line
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (raw_header, argument) = match line.find(char::is_whitespace) {
            Some(pos) => (&line[..pos], line[pos..].trim()),
            None => (line, ""),
        };

        let (raw_header, query) = match raw_header.strip_suffix('?') {
            Some(h) => (h, true),
            None => (raw_header, false),
        };

        // Common commands (*IDN?, *RST, ...) have no tree structure
        if raw_header.starts_with('*') {
            return Some(Self {
                header: raw_header.to_ascii_uppercase(),
                query,
                argument: argument.to_string(),
            });
        }

        let mut nodes: Vec<String> = raw_header
            .trim_start_matches(':')
            .split(':')
            .filter(|n| !n.is_empty())
            .map(shorten)
            .collect();

        if nodes.len() > 1 && OPTIONAL_ROOTS.contains(&nodes[0].as_str()) {
            nodes.remove(0);
        }

        Some(Self {
            header: nodes.join(":"),
            query,
            argument: argument.to_string(),
        })
    }

    /// Canonical form of a header constant, for comparison with parsed commands
    pub fn canonical_header(header: &str) -> String {
        Self::parse(header).map(|p| p.header).unwrap_or_default()
    }

    /// Returns true if this command has the same canonical header as `header`
    pub fn is(&self, header: &str) -> bool {
        self.header == Self::canonical_header(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_and_short_forms_match() {
        let long = ParsedCommand::parse("sense:FREQuency:CENTer 100 MHz").unwrap();
        let short = ParsedCommand::parse("SENS:FREQ:CENT 100 MHz").unwrap();
        let bare = ParsedCommand::parse("FREQ:CENT 100 MHz").unwrap();

        assert_eq!(long.header, "FREQ:CENT");
        assert_eq!(long, short);
        assert_eq!(short, bare);
        assert_eq!(long.argument, "100 MHz");
        assert!(!long.query);
    }

    #[test]
    fn test_query_flag() {
        let cmd = ParsedCommand::parse("CALCulate:MARKer:Y?").unwrap();
        assert!(cmd.query);
        assert_eq!(cmd.header, "CALC:MARK:Y");
        assert!(cmd.argument.is_empty());
    }

    #[test]
    fn test_common_commands() {
        let cmd = ParsedCommand::parse("*idn?").unwrap();
        assert_eq!(cmd.header, "*IDN");
        assert!(cmd.query);
    }

    #[test]
    fn test_trace_suffix() {
        let a = ParsedCommand::parse(":TRACe1:TYPE MAXHold").unwrap();
        let b = ParsedCommand::parse(":TRAC:TYPE WRIT").unwrap();
        let c = ParsedCommand::parse(":TRAC2:TYPE WRIT").unwrap();
        assert_eq!(a.header, "TRAC:TYPE");
        assert_eq!(b.header, "TRAC:TYPE");
        assert_eq!(c.header, "TRAC2:TYPE");
    }

    #[test]
    fn test_is_matches_constant() {
        let cmd = ParsedCommand::parse("sense:BANDwidth:RESolution 8 MHz").unwrap();
        assert!(cmd.is("SENS:BAND:RES"));
        assert!(!cmd.is("SENS:FREQ:SPAN"));
    }

    #[test]
    fn test_blank_line() {
        assert!(ParsedCommand::parse("   ").is_none());
    }
}
