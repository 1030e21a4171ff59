use crate::common::parser2::{CharParser, ParseError, all_consuming, parse_u32};
use chumsky::Parser;
use chumsky::primitive::just;
use chumsky::text::TextParser;

/// Parse a range in the format `start[-end][:step]` and return the number of values it covers.
fn parse_range_count() -> impl CharParser<u32> {
    let start = parse_u32().labelled("start");
    let end = just("-").ignore_then(parse_u32()).labelled("end").or_not();
    let step = just(":").ignore_then(parse_u32()).labelled("step").or_not();

    start
        .then(end)
        .then(step)
        .try_map(|((start, end), step), span| match (start, end, step) {
            (_, None, None) => Ok(1),
            (v, Some(w), step) if w >= v && step != Some(0) => {
                let step = step.unwrap_or(1);
                Ok((w - v + 1).div_ceil(step))
            }
            _ => Err(ParseError::custom(span, "Invalid range")),
        })
        .labelled("range")
}

fn parse_range_size_inner() -> impl CharParser<u32> {
    all_consuming(
        parse_range_count()
            .padded()
            .separated_by(just(','))
            .at_least(1)
            .map(|counts| counts.into_iter().sum()),
    )
}

/// Counts the indices of a PBS array range expression such as `1-10:2,15`,
/// without expanding it.
pub fn parse_range_size(input: &str) -> anyhow::Result<u32> {
    parse_range_size_inner().parse_text(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::expect_parser_error;

    #[test]
    fn test_single_ranges() {
        assert_eq!(parse_range_size("7").unwrap(), 1);
        assert_eq!(parse_range_size("1-10").unwrap(), 10);
        assert_eq!(parse_range_size("1-10:2").unwrap(), 5);
        assert_eq!(parse_range_size("1-9:3").unwrap(), 3);
        assert_eq!(parse_range_size("5-5").unwrap(), 1);
    }

    #[test]
    fn test_joined_ranges() {
        assert_eq!(parse_range_size("1-2,5-7").unwrap(), 5);
        assert_eq!(parse_range_size("1-2,5-7,11-20:2").unwrap(), 10);
        assert_eq!(parse_range_size("1, 3, 5-6").unwrap(), 4);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(parse_range_size("").is_err());
        assert!(parse_range_size("10-1").is_err());
        assert!(parse_range_size("1-10:0").is_err());
        assert!(parse_range_size("1-10,").is_err());
    }

    #[test]
    fn test_range_error() {
        insta::assert_snapshot!(expect_parser_error(parse_range_size_inner(), "12-x"), @r###"
        Unexpected token found while attempting to parse number, expected something else:
          12-x
             |
             --- Unexpected token `x`
        "###);
    }
}
