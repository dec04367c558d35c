//! Wire protocol: turns the text of one pipe read into typed commands.
//!
//! A batch is a run of commands separated by `|`. A command is either a
//! keyword (`EXIT`, `CLEAR`) or five `,`-separated fields:
//!
//! ```text
//! EXIT
//! CLEAR
//! FILL,<ignored>,<r>,<g>,<b>
//! <x>,<y>,<r>,<g>,<b>
//! ```
//!
//! There is no escaping, so neither delimiter can appear inside a value.
//!
//! ## Rust concepts
//! - Implementing `Iterator` for a borrowing tokenizer (`Tokens<'a>`)
//! - `thiserror` derive for a structured error enum
//! - `Cow<str>` to avoid copying when the bytes are already valid UTF-8

use crate::Color;
use std::borrow::Cow;
use thiserror::Error;

pub const RECORD_DELIMITER: char = '|';
pub const FIELD_DELIMITER: char = ',';
pub const EXIT_KEYWORD: &str = "EXIT";
pub const CLEAR_KEYWORD: &str = "CLEAR";
pub const FILL_MARKER: &str = "FILL";

/// Fields in a pixel or fill command. Extra fields are ignored.
pub const FIELD_COUNT: usize = 5;

// ── Tokenizer ────────────────────────────────────────────────────────

/// Lazy splitter over a single delimiter.
///
/// Every piece between delimiters is yielded, empty ones included, so
/// `"a||b"` produces `"a"`, `""`, `"b"`. Used for both the record level
/// (`|`) and the field level (`,`).
#[derive(Clone, Debug)]
pub struct Tokens<'a> {
    rest: Option<&'a str>,
    delimiter: char,
}

impl<'a> Tokens<'a> {
    pub fn new(text: &'a str, delimiter: char) -> Self {
        Self {
            rest: Some(text),
            delimiter,
        }
    }

    /// Commands of a batch. One trailing `|` closes the batch rather than
    /// opening an empty last command, since producers commonly terminate
    /// every command with the delimiter.
    pub fn records(text: &'a str) -> Self {
        let text = text.strip_suffix(RECORD_DELIMITER).unwrap_or(text);
        Self::new(text, RECORD_DELIMITER)
    }

    /// Subfields of a single command.
    pub fn fields(text: &'a str) -> Self {
        Self::new(text, FIELD_DELIMITER)
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        match rest.find(self.delimiter) {
            Some(index) => {
                self.rest = Some(&rest[index + self.delimiter.len_utf8()..]);
                Some(&rest[..index])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Color exactly as it arrived on the wire.
///
/// Channels are not range-checked by the parser; canvases clamp them when
/// they draw (see [`RawColor::to_color`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawColor {
    pub r: i32,
    pub g: i32,
    pub b: i32,
}

impl RawColor {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(r: i32, g: i32, b: i32) -> Self {
        Self { r, g, b }
    }

    /// Clamp each channel into a byte.
    pub fn to_color(self) -> Color {
        Color::new(clamp_channel(self.r), clamp_channel(self.g), clamp_channel(self.b))
    }
}

fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, u8::MAX as i32) as u8
}

/// One parsed command from the pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Stop the service.
    Exit,
    /// Set every pixel to black.
    Clear,
    /// Set every pixel to one color.
    Fill(RawColor),
    /// Set a single pixel.
    SetPixel { x: i32, y: i32, color: RawColor },
}

/// Why a command could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("expected 5 fields, found {found}")]
    MissingFields { found: usize },

    /// `field` is 1-based, matching how the wire format is usually described.
    #[error("field {field} is not an integer: {value:?}")]
    InvalidInteger { field: usize, value: String },
}

// ── Parsing ──────────────────────────────────────────────────────────

/// Text of one chunk: the bytes up to the first NUL (or all of them),
/// decoded as UTF-8. Invalid sequences become U+FFFD and will fail to parse
/// as numbers further down.
pub fn batch_text(chunk: &[u8]) -> Cow<'_, str> {
    let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
    String::from_utf8_lossy(&chunk[..end])
}

/// Parse a single `|`-delimited command.
///
/// Surrounding whitespace is ignored on the command and on each field.
pub fn parse_command(token: &str) -> Result<Command, ParseError> {
    let token = token.trim();
    match token {
        "" => return Err(ParseError::Empty),
        EXIT_KEYWORD => return Ok(Command::Exit),
        CLEAR_KEYWORD => return Ok(Command::Clear),
        _ => {}
    }

    let mut fields = [""; FIELD_COUNT];
    let mut found = 0;
    for (slot, field) in fields.iter_mut().zip(Tokens::fields(token)) {
        *slot = field.trim();
        found += 1;
    }
    if found < FIELD_COUNT {
        return Err(ParseError::MissingFields { found });
    }

    let [first, second, r, g, b] = fields;

    if first == FILL_MARKER {
        // The second field is a placeholder, but it still has to look like one.
        if second != FILL_MARKER {
            parse_field(2, second)?;
        }
        let color = RawColor::new(parse_field(3, r)?, parse_field(4, g)?, parse_field(5, b)?);
        return Ok(Command::Fill(color));
    }

    let x = parse_field(1, first)?;
    let y = parse_field(2, second)?;
    let color = RawColor::new(parse_field(3, r)?, parse_field(4, g)?, parse_field(5, b)?);
    Ok(Command::SetPixel { x, y, color })
}

fn parse_field(field: usize, value: &str) -> Result<i32, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidInteger {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn collect(tokens: Tokens<'_>) -> Vec<&str> {
        tokens.collect()
    }

    // ── Tokenizer ──────────────────────────────────────────────────

    #[test]
    fn tokens_split_in_order() {
        assert_eq!(collect(Tokens::new("a|b|c", '|')), vec!["a", "b", "c"]);
    }

    #[test]
    fn tokens_keep_empty_pieces() {
        assert_eq!(collect(Tokens::new("a||b", '|')), vec!["a", "", "b"]);
        assert_eq!(collect(Tokens::new("|a", '|')), vec!["", "a"]);
    }

    #[test]
    fn tokens_of_empty_text_is_one_empty_piece() {
        assert_eq!(collect(Tokens::new("", ',')), vec![""]);
    }

    #[test]
    fn tokens_are_lazy() {
        let mut tokens = Tokens::new("1,2,3", ',');
        assert_eq!(tokens.next(), Some("1"));
        assert_eq!(tokens.next(), Some("2"));
        assert_eq!(tokens.next(), Some("3"));
        assert_eq!(tokens.next(), None);
        assert_eq!(tokens.next(), None);
    }

    #[rstest]
    #[case("CLEAR|", vec!["CLEAR"])]
    #[case("CLEAR|1,2,3,4,5|", vec!["CLEAR", "1,2,3,4,5"])]
    #[case("CLEAR||", vec!["CLEAR", ""])]
    #[case("|", vec![""])]
    fn records_drop_one_trailing_delimiter(#[case] text: &str, #[case] expected: Vec<&str>) {
        assert_eq!(collect(Tokens::records(text)), expected);
    }

    // ── Batch text ─────────────────────────────────────────────────

    #[test]
    fn batch_text_stops_at_first_nul() {
        assert_eq!(batch_text(b"CLEAR\0garbage"), "CLEAR");
    }

    #[test]
    fn batch_text_uses_whole_chunk_without_nul() {
        assert_eq!(batch_text(b"1,2,3,4,5"), "1,2,3,4,5");
    }

    #[test]
    fn batch_text_replaces_invalid_utf8() {
        assert_eq!(batch_text(b"1,\xff"), "1,\u{fffd}");
    }

    // ── Commands ───────────────────────────────────────────────────

    #[rstest]
    #[case("EXIT", Command::Exit)]
    #[case("CLEAR", Command::Clear)]
    #[case(" CLEAR\n", Command::Clear)]
    #[case("10,20,255,0,0", Command::SetPixel { x: 10, y: 20, color: RawColor::new(255, 0, 0) })]
    #[case("-1,+2,3,4,5", Command::SetPixel { x: -1, y: 2, color: RawColor::new(3, 4, 5) })]
    #[case("1, 2 ,3,4,5", Command::SetPixel { x: 1, y: 2, color: RawColor::new(3, 4, 5) })]
    #[case("1,2,3,4,5,6,7", Command::SetPixel { x: 1, y: 2, color: RawColor::new(3, 4, 5) })]
    #[case("0,0,300,-4,5", Command::SetPixel { x: 0, y: 0, color: RawColor::new(300, -4, 5) })]
    #[case("FILL,0,10,20,30", Command::Fill(RawColor::new(10, 20, 30)))]
    #[case("FILL,99,10,20,30", Command::Fill(RawColor::new(10, 20, 30)))]
    #[case("FILL,FILL,10,20,30", Command::Fill(RawColor::new(10, 20, 30)))]
    fn parse_valid_commands(#[case] token: &str, #[case] expected: Command) {
        assert_eq!(parse_command(token), Ok(expected));
    }

    #[rstest]
    #[case("", ParseError::Empty)]
    #[case("   ", ParseError::Empty)]
    #[case("exit", ParseError::MissingFields { found: 1 })]
    #[case("1,2,3,4", ParseError::MissingFields { found: 4 })]
    #[case("FILL,0,1,2", ParseError::MissingFields { found: 4 })]
    #[case("1,2,bad,4,5", ParseError::InvalidInteger { field: 3, value: "bad".into() })]
    #[case("1,2,3,4,", ParseError::InvalidInteger { field: 5, value: "".into() })]
    #[case("1,FILL,3,4,5", ParseError::InvalidInteger { field: 2, value: "FILL".into() })]
    #[case("FILL,x,1,2,3", ParseError::InvalidInteger { field: 2, value: "x".into() })]
    #[case("FILL,0,1,2,FILL", ParseError::InvalidInteger { field: 5, value: "FILL".into() })]
    #[case("1,2,3,4,99999999999", ParseError::InvalidInteger { field: 5, value: "99999999999".into() })]
    fn parse_malformed_commands(#[case] token: &str, #[case] expected: ParseError) {
        assert_eq!(parse_command(token), Err(expected));
    }

    #[test]
    fn parse_error_messages_name_the_field() {
        let err = parse_command("1,2,bad,4,5").unwrap_err();
        assert_eq!(err.to_string(), "field 3 is not an integer: \"bad\"");
    }

    // ── Colors ─────────────────────────────────────────────────────

    #[rstest]
    #[case(RawColor::new(255, 0, 0), Color::new(255, 0, 0))]
    #[case(RawColor::new(300, -4, 128), Color::new(255, 0, 128))]
    #[case(RawColor::BLACK, Color::BLACK)]
    fn raw_color_clamps_to_bytes(#[case] raw: RawColor, #[case] expected: Color) {
        assert_eq!(raw.to_color(), expected);
    }
}
