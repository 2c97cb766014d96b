//! Text notation for loading series into memory storage
//!
//! Uses the `load` block format common to PromQL test suites:
//!
//! ```text
//! load 30s
//!     http_requests_total{job="api"} 0 1 10 100 1000
//!     http_requests_total{job="web"} 0+10x4 _ stale 5
//! ```
//!
//! The header sets the spacing between slots; slot `i` lands at `i * interval`
//! milliseconds. Value tokens:
//!
//! | Token     | Meaning                                     |
//! |-----------|---------------------------------------------|
//! | `1.5`     | a sample (also `NaN`, `Inf`, `-Inf`)        |
//! | `_`       | empty slot                                  |
//! | `_xN`     | N empty slots                               |
//! | `stale`   | stale marker                                |
//! | `a+bxN`   | N+1 samples: `a, a+b, ..., a+N*b`           |
//! | `a-bxN`   | N+1 samples: `a, a-b, ..., a-N*b`           |

use super::MemoryStorage;
use crate::error::{Error, Result};
use crate::types::{stale_nan, Label, Labels, Point, METRIC_NAME_LABEL};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, digit1, multispace0, space0, space1},
    combinator::{map, map_res, opt, value},
    multi::{many1, separated_list0},
    number::complete::recognize_float,
    sequence::{delimited, preceded},
    IResult, Parser,
};

/// Parse a `load` block into a fresh [`MemoryStorage`]
///
/// # Example
///
/// ```rust
/// use kuba_rangevec::storage::load;
/// use kuba_rangevec::types::Labels;
///
/// let storage = load("load 30s\n  bar 0 1 10 100 1000").unwrap();
/// let series = storage.get(&Labels::from_pairs([("__name__", "bar")])).unwrap();
/// assert_eq!(series.points()[2].timestamp, 60_000);
/// assert_eq!(series.points()[2].value, 10.0);
/// ```
pub fn load(text: &str) -> Result<MemoryStorage> {
    let storage = MemoryStorage::new();
    load_into(&storage, text)?;
    Ok(storage)
}

/// Parse a `load` block and append its series to `storage`
pub fn load_into(storage: &MemoryStorage, text: &str) -> Result<()> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let header = lines
        .next()
        .ok_or_else(|| Error::Parse("empty load block".to_string()))?;
    let parts = parse_complete("load header", header, load_header)?;
    let interval = duration_millis(header, parts)?;
    if interval <= 0 {
        return Err(Error::Parse("load interval must be positive".to_string()));
    }

    for line in lines {
        let series = parse_complete("series line", line, series_line)?;
        let labels = series.labels(line)?;
        let points = expand(&series.tokens, interval);
        storage.append_points(labels, &points)?;
    }
    Ok(())
}

/// Parse a duration such as `30s`, `5m`, `1h30m` or `250ms` into milliseconds
///
/// # Example
///
/// ```rust
/// use kuba_rangevec::storage::loader::parse_duration;
///
/// assert_eq!(parse_duration("5m").unwrap(), 300_000);
/// assert_eq!(parse_duration("1h30m").unwrap(), 5_400_000);
/// assert_eq!(parse_duration("250ms").unwrap(), 250);
/// assert!(parse_duration("5x").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<i64> {
    let parts = parse_complete("duration", s, duration_parts)?;
    duration_millis(s, parts)
}

/// Run `parser` over the whole of `input`
fn parse_complete<'a, T>(
    what: &str,
    input: &'a str,
    parser: fn(&'a str) -> IResult<&'a str, T>,
) -> Result<T> {
    match parser(input) {
        Ok((remaining, out)) if remaining.trim().is_empty() => Ok(out),
        Ok((remaining, _)) => Err(Error::Parse(format!(
            "unexpected trailing input '{}' in {} '{}'",
            remaining.trim(),
            what,
            input
        ))),
        Err(e) => Err(Error::Parse(format!("invalid {} '{}': {:?}", what, input, e))),
    }
}

fn duration_millis(input: &str, parts: Vec<(i64, i64)>) -> Result<i64> {
    parts
        .into_iter()
        .try_fold(0i64, |total, (amount, unit_ms)| {
            amount
                .checked_mul(unit_ms)
                .and_then(|ms| total.checked_add(ms))
        })
        .ok_or_else(|| Error::Parse(format!("duration '{}' overflows", input)))
}

// ============================================================================
// Grammar
// ============================================================================

/// One parsed series line: `name{labels} values...`
#[derive(Debug)]
struct SeriesLine<'a> {
    name: Option<&'a str>,
    labels: Vec<(&'a str, String)>,
    tokens: Vec<ValueToken>,
}

impl SeriesLine<'_> {
    fn labels(&self, line: &str) -> Result<Labels> {
        let mut labels: Vec<Label> = self
            .labels
            .iter()
            .map(|(name, value)| Label::new(*name, value.as_str()))
            .collect();
        if let Some(name) = self.name {
            labels.push(Label::new(METRIC_NAME_LABEL, name));
        }
        if labels.is_empty() {
            return Err(Error::Parse(format!("series without labels: '{}'", line)));
        }
        Ok(Labels::new(labels))
    }
}

/// A value token of a series line
#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueToken {
    /// `_` or `_xN`: empty slots
    Gap(i64),
    /// `stale`
    Stale,
    /// A single sample
    Sample(f64),
    /// `a+bxN` / `a-bxN`
    Series { start: f64, delta: f64, count: i64 },
}

/// Parse the header: `load 30s`
fn load_header(input: &str) -> IResult<&str, Vec<(i64, i64)>> {
    preceded((tag("load"), space1), duration_parts).parse(input)
}

/// Parse duration components as `(amount, unit in ms)` pairs
fn duration_parts(input: &str) -> IResult<&str, Vec<(i64, i64)>> {
    many1((repeat_count, duration_unit)).parse(input)
}

fn duration_unit(input: &str) -> IResult<&str, i64> {
    alt((
        value(1, tag("ms")),
        value(1_000, tag("s")),
        value(60_000, tag("m")),
        value(3_600_000, tag("h")),
        value(86_400_000, tag("d")),
        value(604_800_000, tag("w")),
        value(31_536_000_000, tag("y")),
    ))
    .parse(input)
}

fn series_line(input: &str) -> IResult<&str, SeriesLine<'_>> {
    let (input, name) = opt(metric_name).parse(input)?;
    let (input, labels) = opt(label_set).parse(input)?;
    let (input, _) = space0(input)?;
    let (input, tokens) = separated_list0(space1, value_token).parse(input)?;

    Ok((
        input,
        SeriesLine {
            name,
            labels: labels.unwrap_or_default(),
            tokens,
        },
    ))
}

fn metric_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':')(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// Parse `{a="x", b="y"}`, allowing a trailing comma
fn label_set(input: &str) -> IResult<&str, Vec<(&str, String)>> {
    delimited(
        (char('{'), multispace0),
        separated_list0((multispace0, char(','), multispace0), label_pair),
        (multispace0, opt(char(',')), multispace0, char('}')),
    )
    .parse(input)
}

fn label_pair(input: &str) -> IResult<&str, (&str, String)> {
    let (input, name) = label_name(input)?;
    let (input, _) = (multispace0, char('='), multispace0).parse(input)?;
    let (input, value) = quoted_value(input)?;
    Ok((input, (name, value)))
}

/// Double-quoted label value with `\"`, `\\` and `\n` escapes
fn quoted_value(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\n", char('n')),
                    value("\\", char('\\')),
                    value("\"", char('"')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )
    .parse(input)
}

fn value_token(input: &str) -> IResult<&str, ValueToken> {
    alt((
        map(
            preceded(char('_'), opt(preceded(char('x'), repeat_count))),
            |slots| ValueToken::Gap(slots.unwrap_or(1)),
        ),
        value(ValueToken::Stale, tag("stale")),
        series_expansion,
        map(sample_value, ValueToken::Sample),
    ))
    .parse(input)
}

/// Parse `a+bxN` / `a-bxN`; `a` and `b` may carry exponents
fn series_expansion(input: &str) -> IResult<&str, ValueToken> {
    let (input, start) = sample_value(input)?;
    let (input, sign) = alt((value(1.0, char('+')), value(-1.0, char('-')))).parse(input)?;
    let (input, delta) = sample_value(input)?;
    let (input, count) = preceded(char('x'), repeat_count).parse(input)?;

    Ok((
        input,
        ValueToken::Series {
            start,
            delta: sign * delta,
            count,
        },
    ))
}

fn sample_value(input: &str) -> IResult<&str, f64> {
    alt((
        value(f64::INFINITY, alt((tag("Inf"), tag("+Inf")))),
        value(f64::NEG_INFINITY, tag("-Inf")),
        value(f64::NAN, tag("NaN")),
        map_res(recognize_float, |s: &str| s.parse::<f64>()),
    ))
    .parse(input)
}

fn repeat_count(input: &str) -> IResult<&str, i64> {
    map_res(digit1, |s: &str| s.parse::<i64>()).parse(input)
}

/// Lay value tokens out on slots spaced `interval` apart
fn expand(tokens: &[ValueToken], interval: i64) -> Vec<Point> {
    let mut points = Vec::new();
    let mut slot: i64 = 0;

    for token in tokens {
        match *token {
            ValueToken::Gap(slots) => slot += slots,
            ValueToken::Stale => {
                points.push(Point::new(slot * interval, stale_nan()));
                slot += 1;
            }
            ValueToken::Sample(v) => {
                points.push(Point::new(slot * interval, v));
                slot += 1;
            }
            ValueToken::Series {
                start,
                delta,
                count,
            } => {
                for i in 0..=count {
                    points.push(Point::new(slot * interval, start + delta * i as f64));
                    slot += 1;
                }
            }
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::is_stale_nan;

    fn values(storage: &MemoryStorage, labels: &Labels) -> Vec<(i64, f64)> {
        storage
            .get(labels)
            .unwrap()
            .points()
            .iter()
            .map(|p| (p.timestamp, p.value))
            .collect()
    }

    #[test]
    fn test_load_plain_values() {
        let storage = load("load 30s\n  bar 0 1 10 100 1000").unwrap();
        let bar = Labels::from_pairs([("__name__", "bar")]);
        assert_eq!(
            values(&storage, &bar),
            vec![(0, 0.0), (30_000, 1.0), (60_000, 10.0), (90_000, 100.0), (120_000, 1000.0)]
        );
    }

    #[test]
    fn test_load_labels_and_expansions() {
        let text = r#"
            load 1m
                http_requests{job="api", path="/a\"b"} 0+10x3 _ 5
                http_requests{job="web"} 10-2x2 _x2 stale
        "#;
        let storage = load(text).unwrap();

        let api = Labels::from_pairs([
            ("__name__", "http_requests"),
            ("job", "api"),
            ("path", "/a\"b"),
        ]);
        assert_eq!(
            values(&storage, &api),
            vec![
                (0, 0.0),
                (60_000, 10.0),
                (120_000, 20.0),
                (180_000, 30.0),
                (300_000, 5.0)
            ]
        );

        let web = Labels::from_pairs([("__name__", "http_requests"), ("job", "web")]);
        let web_points = storage.get(&web).unwrap();
        let ts: Vec<_> = web_points.points().iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![0, 60_000, 120_000, 300_000]);
        assert!(is_stale_nan(web_points.points()[3].value));
        assert_eq!(web_points.points()[2].value, 6.0);
    }

    #[test]
    fn test_negative_start_expansion() {
        let storage = load("load 10s\n  m -5+5x2").unwrap();
        let m = Labels::from_pairs([("__name__", "m")]);
        assert_eq!(values(&storage, &m), vec![(0, -5.0), (10_000, 0.0), (20_000, 5.0)]);
    }

    #[test]
    fn test_exponent_in_expansion() {
        let storage = load("load 1m\n  a 1e-3+1x2\n  b 2e+1-1x3\n  c 1e-3").unwrap();

        let a = values(&storage, &Labels::from_pairs([("__name__", "a")]));
        assert_eq!(a.len(), 3);
        assert_eq!(a[0], (0, 0.001));
        assert!((a[2].1 - 2.001).abs() < 1e-12);

        assert_eq!(
            values(&storage, &Labels::from_pairs([("__name__", "b")])),
            vec![(0, 20.0), (60_000, 19.0), (120_000, 18.0), (180_000, 17.0)]
        );
        assert_eq!(
            values(&storage, &Labels::from_pairs([("__name__", "c")])),
            vec![(0, 0.001)]
        );
    }

    #[test]
    fn test_label_set_forms() {
        let text = r#"
            load 10s
                {__name__="m", job = "api",} 1 Inf -Inf
                m{job="", zone="a\nb"} 2
        "#;
        let storage = load(text).unwrap();

        let api = Labels::from_pairs([("__name__", "m"), ("job", "api")]);
        assert_eq!(
            values(&storage, &api),
            vec![(0, 1.0), (10_000, f64::INFINITY), (20_000, f64::NEG_INFINITY)]
        );

        let empty_job = Labels::from_pairs([("__name__", "m"), ("job", ""), ("zone", "a\nb")]);
        assert_eq!(values(&storage, &empty_job), vec![(0, 2.0)]);
    }

    #[test]
    fn test_load_rejects_bad_input() {
        assert!(load("").is_err());
        assert!(load("store 30s\n m 1").is_err());
        assert!(load("load 0s\n m 1").is_err());
        assert!(load("load 30s\n m{job=api} 1").is_err());
        assert!(load("load 30s\n m abc").is_err());
        assert!(load("load 30s\n m 1+2").is_err());
        assert!(load("load 30s\n m{job=\"api\" 1").is_err());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("1d").unwrap(), 86_400_000);
        assert_eq!(parse_duration("90s").unwrap(), 90_000);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("10").is_err());
    }
}
