use crate::common::parser2::{CharParser, all_consuming, parse_resource_name, parse_u32};
use chumsky::Parser;
use chumsky::primitive::{choice, filter, just};
use serde::Serialize;
use std::fmt;

/// One `+` separated clause of a select expression, e.g. `2:ncpus=4:mem=8gb`.
/// Values are kept untyped, the caller types them using resource definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub count: u32,
    pub resources: Vec<(String, String)>,
}

enum ChunkItem {
    Count(u32),
    Resource(String, String),
}

fn parse_chunk_item() -> impl CharParser<ChunkItem> {
    let value = filter(|c: &char| *c != ':' && *c != '+')
        .repeated()
        .at_least(1)
        .collect::<String>()
        .labelled("value");
    let resource = parse_resource_name()
        .then_ignore(just('='))
        .then(value)
        .map(|(name, value)| ChunkItem::Resource(name, value));
    parse_u32().map(ChunkItem::Count).or(resource)
}

fn parse_chunk() -> impl CharParser<RawChunk> {
    parse_chunk_item()
        .separated_by(just(':'))
        .at_least(1)
        .map(|items| {
            // `-l select=mem=16gb` means one chunk
            let mut chunk = RawChunk {
                count: 1,
                resources: Vec::new(),
            };
            for item in items {
                match item {
                    ChunkItem::Count(count) => chunk.count = count,
                    ChunkItem::Resource(name, value) => chunk.resources.push((name, value)),
                }
            }
            chunk
        })
}

fn parse_select_inner() -> impl CharParser<Vec<RawChunk>> {
    all_consuming(parse_chunk().separated_by(just('+')).at_least(1))
}

/// Splits a select (or schedselect) expression into its chunks.
pub fn parse_select_chunks(input: &str) -> anyhow::Result<Vec<RawChunk>> {
    parse_select_inner().parse_text(input.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arrangement {
    #[default]
    Free,
    Pack,
    Scatter,
    VScatter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sharing {
    Excl,
    Shared,
    ExclHost,
}

/// Parsed `place` job attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Placement {
    pub arrangement: Arrangement,
    pub sharing: Option<Sharing>,
    /// Resource named by `group=<resource>`.
    pub grouping: Option<String>,
}

impl fmt::Display for Arrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arrangement::Free => "free",
            Arrangement::Pack => "pack",
            Arrangement::Scatter => "scatter",
            Arrangement::VScatter => "vscatter",
        })
    }
}

enum PlaceItem {
    Arrangement(Arrangement),
    Sharing(Sharing),
    Group(String),
}

fn parse_place_item() -> impl CharParser<PlaceItem> {
    let arrangement = choice((
        just("free").to(Arrangement::Free),
        just("pack").to(Arrangement::Pack),
        just("scatter").to(Arrangement::Scatter),
        just("vscatter").to(Arrangement::VScatter),
    ))
    .map(PlaceItem::Arrangement);
    let sharing = choice((
        just("exclhost").to(Sharing::ExclHost),
        just("excl").to(Sharing::Excl),
        just("shared").to(Sharing::Shared),
    ))
    .map(PlaceItem::Sharing);
    let group = just("group=")
        .ignore_then(parse_resource_name())
        .map(PlaceItem::Group);

    choice((arrangement, sharing, group)).labelled("placement")
}

fn parse_place_inner() -> impl CharParser<Placement> {
    all_consuming(
        parse_place_item()
            .separated_by(just(':'))
            .at_least(1)
            .map(|items| {
                let mut placement = Placement::default();
                for item in items {
                    match item {
                        PlaceItem::Arrangement(value) => placement.arrangement = value,
                        PlaceItem::Sharing(value) => placement.sharing = Some(value),
                        PlaceItem::Group(value) => placement.grouping = Some(value),
                    }
                }
                placement
            }),
    )
}

/// Parses `arrangement[:sharing][:group=resource]` in any order.
/// An empty expression is the default `free` placement.
pub fn parse_place(input: &str) -> anyhow::Result<Placement> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Placement::default());
    }
    parse_place_inner().parse_text(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(count: u32, resources: &[(&str, &str)]) -> RawChunk {
        RawChunk {
            count,
            resources: resources
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_select_single_chunk() {
        assert_eq!(
            parse_select_chunks("2:ncpus=4:mem=8gb").unwrap(),
            vec![chunk(2, &[("ncpus", "4"), ("mem", "8gb")])]
        );
    }

    #[test]
    fn test_select_default_count() {
        assert_eq!(
            parse_select_chunks("mem=16gb").unwrap(),
            vec![chunk(1, &[("mem", "16gb")])]
        );
        assert_eq!(parse_select_chunks("3").unwrap(), vec![chunk(3, &[])]);
    }

    #[test]
    fn test_select_multi_chunk() {
        assert_eq!(
            parse_select_chunks("1:ncpus=2:slot_type=execute+3:ncpus=1:host=ip-0A").unwrap(),
            vec![
                chunk(1, &[("ncpus", "2"), ("slot_type", "execute")]),
                chunk(3, &[("ncpus", "1"), ("host", "ip-0A")]),
            ]
        );
    }

    #[test]
    fn test_select_invalid() {
        assert!(parse_select_chunks("1:ncpus=").is_err());
        assert!(parse_select_chunks("1:ncpus=2+").is_err());
    }

    #[test]
    fn test_place_default() {
        assert_eq!(parse_place("").unwrap(), Placement::default());
    }

    #[test]
    fn test_place_tokens() {
        assert_eq!(
            parse_place("scatter:excl").unwrap(),
            Placement {
                arrangement: Arrangement::Scatter,
                sharing: Some(Sharing::Excl),
                grouping: None,
            }
        );
        assert_eq!(
            parse_place("exclhost:group=host:pack").unwrap(),
            Placement {
                arrangement: Arrangement::Pack,
                sharing: Some(Sharing::ExclHost),
                grouping: Some("host".to_string()),
            }
        );
        assert_eq!(
            parse_place("vscatter").unwrap().arrangement,
            Arrangement::VScatter
        );
    }

    #[test]
    fn test_place_invalid() {
        assert!(parse_place("spread").is_err());
        assert!(parse_place("pack:").is_err());
    }
}
