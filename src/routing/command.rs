//! Route command parsing.
//!
//! Routing tables can be described as a list of text commands:
//!
//! ```text
//! # comment
//! route add <service> <src> <dst> [weight <w>]
//! route del <service> [<src> [<dst>]]
//! ```
//!
//! `src` is either `/path` (any host) or `host/path`; a host-only source
//! means path `/`. Commands apply in order, so `del` removes what earlier
//! `add` lines created.

use url::Url;

use crate::routing::table::{RouteDef, TargetDef};

/// Error in a route command, tagged with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: unknown command {command:?}")]
    UnknownCommand { line: usize, command: String },
    #[error("line {line}: `{command}` requires {expected}")]
    MissingArgument {
        line: usize,
        command: &'static str,
        expected: &'static str,
    },
    #[error("line {line}: invalid weight {value:?}")]
    InvalidWeight { line: usize, value: String },
    #[error("line {line}: unexpected argument {value:?}")]
    UnexpectedArgument { line: usize, value: String },
}

/// Parse route commands into route definitions.
pub fn parse(text: &str) -> Result<Vec<RouteDef>, ParseError> {
    let mut defs: Vec<RouteDef> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }

        let words: Vec<&str> = content.split_whitespace().collect();
        match words.as_slice() {
            ["route", "add", rest @ ..] => defs.push(parse_add(line, rest)?),
            ["route", "del", rest @ ..] => apply_del(line, rest, &mut defs)?,
            [first, second, ..] if *first == "route" => {
                return Err(ParseError::UnknownCommand {
                    line,
                    command: format!("route {second}"),
                })
            }
            _ => {
                return Err(ParseError::UnknownCommand {
                    line,
                    command: content.to_string(),
                })
            }
        }
    }

    Ok(defs)
}

fn parse_add(line: usize, args: &[&str]) -> Result<RouteDef, ParseError> {
    let [service, src, dst, options @ ..] = args else {
        return Err(ParseError::MissingArgument {
            line,
            command: "route add",
            expected: "<service> <src> <dst>",
        });
    };

    let weight = match options {
        [] => 1,
        ["weight", value] => value.parse().map_err(|_| ParseError::InvalidWeight {
            line,
            value: value.to_string(),
        })?,
        ["weight"] => {
            return Err(ParseError::MissingArgument {
                line,
                command: "route add",
                expected: "a value after `weight`",
            })
        }
        [other, ..] => {
            return Err(ParseError::UnexpectedArgument {
                line,
                value: other.to_string(),
            })
        }
    };

    let (host, path) = split_source(src);
    Ok(RouteDef {
        service: service.to_string(),
        host,
        path,
        targets: vec![TargetDef {
            url: dst.to_string(),
            weight,
        }],
    })
}

fn apply_del(line: usize, args: &[&str], defs: &mut Vec<RouteDef>) -> Result<(), ParseError> {
    match args {
        [] => Err(ParseError::MissingArgument {
            line,
            command: "route del",
            expected: "<service>",
        }),
        [service] => {
            defs.retain(|d| d.service != *service);
            Ok(())
        }
        [service, src] => {
            let (host, path) = split_source(src);
            defs.retain(|d| !(d.service == *service && d.host == host && d.path == path));
            Ok(())
        }
        [service, src, dst] => {
            let (host, path) = split_source(src);
            for def in defs
                .iter_mut()
                .filter(|d| d.service == *service && d.host == host && d.path == path)
            {
                def.targets.retain(|t| !same_url(&t.url, dst));
            }
            defs.retain(|d| !d.targets.is_empty());
            Ok(())
        }
        [_, _, _, extra, ..] => Err(ParseError::UnexpectedArgument {
            line,
            value: extra.to_string(),
        }),
    }
}

/// Split `host/path` into its parts; a leading `/` means any host.
fn split_source(src: &str) -> (Option<String>, String) {
    match src.find('/') {
        Some(0) => (None, src.to_string()),
        Some(i) => (Some(src[..i].to_string()), src[i..].to_string()),
        None => (Some(src.to_string()), "/".to_string()),
    }
}

fn same_url(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
