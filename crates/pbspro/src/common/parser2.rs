use anyhow::anyhow;
use chumsky::Parser;
use chumsky::error::Simple;
use chumsky::primitive::{end, filter};
use colored::Color;

pub type ParseError = Simple<char>;

// Parsing infrastructure
pub trait CharParser<T>: Parser<char, T, Error = ParseError> + Sized {
    fn parse_text(&self, input: &str) -> anyhow::Result<T> {
        self.parse(input)
            .map_err(|errors| anyhow!("{}", format_errors_cli(input, errors)))
    }
}
impl<T, P> CharParser<T> for P where P: Parser<char, T, Error = ParseError> {}

#[cfg(not(test))]
fn color_string<S: AsRef<str>>(string: S, color: Color) -> colored::ColoredString {
    use colored::Colorize;
    string.as_ref().color(color)
}

#[cfg(test)]
fn color_string<S: AsRef<str>>(string: S, _color: Color) -> String {
    string.as_ref().to_string()
}

/// Formats `chumsky` error into a user-visible (optionally colored) string.
/// Currently it handles just the first error.
pub fn format_errors_cli(input: &str, mut errors: Vec<ParseError>) -> String {
    use chumsky::Span;
    use std::fmt::Write;

    const ERROR_COLOR: Color = Color::Red;

    errors.truncate(1);
    let Some(error) = errors.pop() else {
        return "Unknown parsing error".to_string();
    };

    let mut output = String::new();

    let span = error.span();
    let expected = if error.expected().len() == 0 {
        "something else".to_string()
    } else {
        let mut expected = error
            .expected()
            .map(|expected| match expected {
                Some(expected) => expected.to_string(),
                None => "<end of input>".to_string(),
            })
            .collect::<Vec<_>>();
        expected.sort_unstable();
        expected
            .into_iter()
            .map(|expected| color_string(expected, Color::Blue).to_string())
            .collect::<Vec<_>>()
            .join(" or ")
    };

    let message = format!(
        "{} found{}, expected {}:",
        if error.found().is_some() {
            "Unexpected token"
        } else {
            "Unexpected end of input"
        },
        if let Some(label) = error.label() {
            format!(
                " while attempting to parse {}",
                color_string(label, Color::Yellow)
            )
        } else {
            String::new()
        },
        expected,
    );

    output.push_str(&message);
    output.push('\n');

    if input.is_empty() {
        output.push_str("(the input was empty)");
        return output;
    }

    // Writing into a String cannot fail
    let _ = writeln!(
        output,
        "  {}{}{}",
        input.chars().take(span.start()).collect::<String>(),
        color_string(
            input
                .chars()
                .skip(span.start())
                .take(span.end() - span.start())
                .collect::<String>(),
            ERROR_COLOR
        ),
        input.chars().skip(span.end()).collect::<String>()
    );

    let spaces = " ".repeat(2 + span.start());
    let _ = writeln!(output, "{spaces}{}", color_string("|", ERROR_COLOR));

    let note = match error.reason() {
        chumsky::error::SimpleReason::Custom(msg) => msg.clone(),
        _ => format!(
            "Unexpected {}",
            error
                .found()
                .map(|c| format!("token `{c}`"))
                .unwrap_or_else(|| "end of input".to_string())
        ),
    };
    let _ = writeln!(
        output,
        "{spaces}{}{}",
        color_string("--- ", ERROR_COLOR),
        color_string(note, ERROR_COLOR)
    );

    output
}

// Common parsers
fn parse_integer_string() -> impl CharParser<String> {
    let digit = filter(|c: &char| c.is_ascii_digit());
    digit
        .chain(digit.repeated())
        .collect::<String>()
        .labelled("number")
}

/// Parse 4-byte integer.
pub fn parse_u32() -> impl CharParser<u32> {
    parse_integer_string().try_map(|p, span| {
        p.parse::<u32>()
            .map_err(|_| ParseError::custom(span, "Cannot parse as 4-byte unsigned integer"))
    })
}

/// Parses a resource name such as `ncpus` or `slot_type`.
pub fn parse_resource_name() -> impl CharParser<String> {
    filter(|c: &char| c.is_ascii_alphabetic())
        .chain(filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_' || *c == '-').repeated())
        .collect::<String>()
        .labelled("resource name")
}

/// Return a parser that will fail if there is any input following the text parsed by the
/// provided parser.
pub fn all_consuming<T>(parser: impl CharParser<T>) -> impl CharParser<T> {
    parser.then_ignore(end())
}
